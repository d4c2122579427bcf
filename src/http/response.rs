//! HTTP/1.1 response as written to the wire.
//!
//! Built by [`ResponseBuffer::flush`](crate::context::ResponseBuffer::flush) or by
//! the server itself for protocol-level failures, then serialised with
//! [`Response::into_bytes`].

use bytes::{BufMut, BytesMut};

use super::{Headers, StatusCode};

/// A finished HTTP/1.1 response.
///
/// # Examples
///
/// ```
/// use condor::http::{Response, StatusCode};
///
/// let response = Response::new(StatusCode::Ok)
///     .header("Content-Type", "application/json")
///     .body(r#"{"status":"ok"}"#);
///
/// let bytes = response.into_bytes();
/// let text = std::str::from_utf8(&bytes).unwrap();
/// assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
/// assert!(text.contains("Content-Length: 15\r\n"));
/// ```
#[derive(Debug, Clone)]
pub struct Response {
    status: StatusCode,
    headers: Headers,
    body: Vec<u8>,
    keep_alive: bool,
}

impl Response {
    /// Creates a new response with the given status and an empty body.
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: Headers::new(),
            body: Vec::new(),
            keep_alive: true,
        }
    }

    /// A response carrying a JSON document with `Content-Type: application/json`.
    pub fn json(status: StatusCode, body: impl Into<String>) -> Self {
        Self::new(status)
            .header("Content-Type", "application/json")
            .body(body)
    }

    /// Appends a response header. Multiple calls with the same name are additive.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    #[must_use]
    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into().into_bytes();
        self
    }

    #[must_use]
    pub fn body_bytes(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// Controls whether `Connection: keep-alive` or `Connection: close` is written.
    #[must_use]
    pub fn keep_alive(mut self, keep_alive: bool) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn body_ref(&self) -> &[u8] {
        &self.body
    }

    /// The body decoded as UTF-8, replacing invalid sequences.
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Serializes the response into HTTP/1.1 wire format.
    ///
    /// `Content-Length` and `Connection` are always written last; any values a
    /// handler set for them are dropped.
    pub fn into_bytes(mut self) -> BytesMut {
        let content_length = self.body.len();

        self.headers.remove("content-length");
        self.headers.remove("connection");

        let connection = if self.keep_alive {
            "keep-alive"
        } else {
            "close"
        };

        let estimated_size = 128 + self.headers.len() * 64 + content_length;
        let mut buf = BytesMut::with_capacity(estimated_size);

        buf.put(
            format!(
                "HTTP/1.1 {} {}\r\n",
                self.status.as_u16(),
                self.status.canonical_reason()
            )
            .as_bytes(),
        );

        for (name, value) in self.headers.iter() {
            buf.put(format!("{name}: {value}\r\n").as_bytes());
        }

        buf.put(format!("Connection: {connection}\r\n").as_bytes());
        buf.put(format!("Content-Length: {content_length}\r\n").as_bytes());
        buf.put(&b"\r\n"[..]);
        buf.put(self.body.as_slice());

        buf
    }
}

impl Default for Response {
    fn default() -> Self {
        Self::new(StatusCode::Ok)
    }
}
