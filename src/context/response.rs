//! Per-request response accumulator.
//!
//! Handlers and middleware never write to the socket. They record headers, a
//! status, and a body (or a redirect target) here, and the dispatcher flushes the
//! result exactly once after the chain has finished.

use serde::Serialize;

use super::cast::Scalar;
use crate::http::{Headers, Response, StatusCode};

pub const CONTENT_TYPE_HTML: &str = "text/html; charset=utf-8";
pub const CONTENT_TYPE_TEXT: &str = "text/plain; charset=utf-8";
pub const CONTENT_TYPE_JSON: &str = "application/json";

/// Headers, status, and body accumulated for one request.
///
/// Once [`terminate`](Self::terminate) has been called every mutating method is a
/// no-op, which lets an early middleware pin a response (a cached page, an auth
/// failure) without downstream handlers overwriting it.
///
/// # Examples
///
/// ```
/// use condor::context::ResponseBuffer;
/// use condor::http::StatusCode;
///
/// let mut buffer = ResponseBuffer::new();
/// buffer.set_status(StatusCode::Created).json(r#"{"id":7}"#);
/// buffer.terminate();
/// buffer.text("overwritten?");
///
/// assert_eq!(buffer.status(), StatusCode::Created);
/// assert_eq!(buffer.body(), br#"{"id":7}"#);
/// ```
#[derive(Debug, Default)]
pub struct ResponseBuffer {
    headers: Headers,
    status: Option<StatusCode>,
    body: Vec<u8>,
    content_type: Option<&'static str>,
    override_content_type: Option<String>,
    redirect: Option<String>,
    terminated: bool,
    flushed: bool,
}

impl ResponseBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the body and its content type in one step.
    pub fn set_body(
        &mut self,
        content: impl Into<Vec<u8>>,
        content_type: &'static str,
    ) -> &mut Self {
        if !self.terminated {
            self.body = content.into();
            self.content_type = Some(content_type);
        }
        self
    }

    /// Renders a scalar as an HTML body.
    pub fn any(&mut self, value: impl Into<Scalar>) -> &mut Self {
        let rendered = value.into().to_string();
        self.set_body(rendered, CONTENT_TYPE_HTML)
    }

    pub fn html(&mut self, body: impl Into<String>) -> &mut Self {
        self.set_body(body.into(), CONTENT_TYPE_HTML)
    }

    pub fn text(&mut self, body: impl Into<String>) -> &mut Self {
        self.set_body(body.into(), CONTENT_TYPE_TEXT)
    }

    /// Sets an already-encoded JSON document as the body.
    pub fn json(&mut self, body: impl Into<String>) -> &mut Self {
        self.set_body(body.into(), CONTENT_TYPE_JSON)
    }

    /// Serializes `value` and sets it as a JSON body.
    ///
    /// # Errors
    ///
    /// Returns the serializer error; the buffer is left untouched in that case.
    pub fn json_value<T: Serialize>(&mut self, value: &T) -> Result<&mut Self, serde_json::Error> {
        let encoded = serde_json::to_vec(value)?;
        Ok(self.set_body(encoded, CONTENT_TYPE_JSON))
    }

    /// Appends a header; duplicates are kept in insertion order.
    pub fn set_header(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        if !self.terminated {
            self.headers.insert(key, value);
        }
        self
    }

    pub fn set_status(&mut self, status: StatusCode) -> &mut Self {
        if !self.terminated {
            self.status = Some(status);
        }
        self
    }

    /// Forces the `Content-Type` written at flush time, whatever body helper was used.
    pub fn set_content_type(&mut self, content_type: impl Into<String>) -> &mut Self {
        if !self.terminated {
            self.override_content_type = Some(content_type.into());
        }
        self
    }

    /// Redirects permanently (308) to `target`. Any body is discarded at flush time.
    pub fn redirect(&mut self, target: impl Into<String>) -> &mut Self {
        if !self.terminated {
            self.redirect = Some(target.into());
        }
        self
    }

    /// Locks the buffer against further changes. Idempotent.
    pub fn terminate(&mut self) {
        self.terminated = true;
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    /// The status that would be written if the buffer were flushed now.
    pub fn status(&self) -> StatusCode {
        if self.redirect.is_some() {
            StatusCode::PermanentRedirect
        } else {
            self.status.unwrap_or(StatusCode::Ok)
        }
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// The content type that would be written: the explicit override if any,
    /// otherwise the one inferred from the last body helper.
    pub fn content_type(&self) -> Option<&str> {
        self.override_content_type.as_deref().or(self.content_type)
    }

    pub fn redirect_target(&self) -> Option<&str> {
        self.redirect.as_deref()
    }

    /// Moves the accumulated state into a wire [`Response`].
    ///
    /// Headers are written in insertion order, followed by either a `Location`
    /// header (redirect) or the body's `Content-Type`. Returns `None` if the buffer
    /// was already flushed; call [`reset`](Self::reset) to reuse it. Only the
    /// dispatcher flushes.
    pub(crate) fn flush(&mut self) -> Option<Response> {
        if self.flushed {
            return None;
        }
        self.flushed = true;

        let mut response = Response::new(self.status());
        for (key, value) in std::mem::take(&mut self.headers) {
            response = response.header(key, value);
        }

        if let Some(target) = self.redirect.take() {
            return Some(response.header("Location", target));
        }

        let body = std::mem::take(&mut self.body);
        if let Some(content_type) = self.content_type() {
            response = response.header("Content-Type", content_type.to_owned());
        }
        Some(response.body_bytes(body))
    }

    /// Returns the buffer to its zero state. Idempotent.
    pub(crate) fn reset(&mut self) {
        self.headers.clear();
        self.body.clear();
        self.status = None;
        self.content_type = None;
        self.override_content_type = None;
        self.redirect = None;
        self.terminated = false;
        self.flushed = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_200_with_empty_body() {
        let mut buffer = ResponseBuffer::new();
        let response = buffer.flush().unwrap();
        assert_eq!(response.status(), StatusCode::Ok);
        assert!(response.body_ref().is_empty());
        assert!(response.headers().get("content-type").is_none());
    }

    #[test]
    fn content_type_follows_last_body_helper() {
        let mut buffer = ResponseBuffer::new();
        buffer.text("plain").json(r#"{"a":1}"#);
        assert_eq!(buffer.content_type(), Some(CONTENT_TYPE_JSON));
        buffer.any(42);
        assert_eq!(buffer.content_type(), Some(CONTENT_TYPE_HTML));
        assert_eq!(buffer.body(), b"42");
    }

    #[test]
    fn explicit_content_type_wins() {
        let mut buffer = ResponseBuffer::new();
        buffer.set_content_type("application/xml").text("<a/>");
        let response = buffer.flush().unwrap();
        assert_eq!(response.headers().get("content-type"), Some("application/xml"));
    }

    #[test]
    fn json_value_serializes() {
        #[derive(Serialize)]
        struct User {
            id: u32,
        }
        let mut buffer = ResponseBuffer::new();
        buffer.json_value(&User { id: 3 }).unwrap();
        assert_eq!(buffer.body(), br#"{"id":3}"#);
    }

    #[test]
    fn terminate_locks_every_setter() {
        let mut buffer = ResponseBuffer::new();
        buffer.set_status(StatusCode::Unauthorized).json(r#"{"message":"no"}"#);
        buffer.terminate();
        buffer.terminate();

        buffer
            .set_body("x", CONTENT_TYPE_TEXT)
            .set_header("X-Late", "1")
            .set_status(StatusCode::Ok)
            .set_content_type("text/csv")
            .redirect("/elsewhere");

        assert_eq!(buffer.body(), br#"{"message":"no"}"#);
        assert!(buffer.headers().is_empty());
        assert_eq!(buffer.status(), StatusCode::Unauthorized);
        assert_eq!(buffer.content_type(), Some(CONTENT_TYPE_JSON));
        assert!(buffer.redirect_target().is_none());
    }

    #[test]
    fn headers_keep_duplicates_in_order() {
        let mut buffer = ResponseBuffer::new();
        buffer
            .set_header("Set-Cookie", "a=1")
            .set_header("X-Other", "o")
            .set_header("Set-Cookie", "b=2");
        let response = buffer.flush().unwrap();
        let cookies: Vec<_> = response.headers().get_all("set-cookie").collect();
        assert_eq!(cookies, vec!["a=1", "b=2"]);
    }

    #[test]
    fn redirect_replaces_body() {
        let mut buffer = ResponseBuffer::new();
        buffer.html("<p>ignored</p>").redirect("/login");
        let response = buffer.flush().unwrap();
        assert_eq!(response.status(), StatusCode::PermanentRedirect);
        assert_eq!(response.headers().get("location"), Some("/login"));
        assert!(response.body_ref().is_empty());
    }

    #[test]
    fn flush_happens_once() {
        let mut buffer = ResponseBuffer::new();
        buffer.text("once");
        assert!(buffer.flush().is_some());
        assert!(buffer.flush().is_none());
    }

    #[test]
    fn reset_is_idempotent() {
        let mut buffer = ResponseBuffer::new();
        buffer
            .set_status(StatusCode::Created)
            .set_header("X-A", "1")
            .text("body");
        buffer.terminate();
        let _ = buffer.flush();

        buffer.reset();
        let after_one = format!("{buffer:?}");
        buffer.reset();
        assert_eq!(format!("{buffer:?}"), after_one);

        assert!(!buffer.is_terminated());
        assert!(buffer.body().is_empty());
        assert!(buffer.headers().is_empty());
        assert_eq!(buffer.status(), StatusCode::Ok);
        assert!(buffer.flush().is_some());
    }
}
