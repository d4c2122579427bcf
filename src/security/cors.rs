use crate::context::Context;
use crate::http::{Method, StatusCode};
use crate::middleware::{BoxFuture, Middleware};

/// CORS middleware — validates the `Origin` header, handles preflight requests,
/// and injects `Access-Control-*` headers on actual responses.
///
/// Constructed via [`CorsMiddleware::new`] and further configured through the
/// builder methods [`allow_origin`](Self::allow_origin),
/// [`allow_method`](Self::allow_method), and [`allow_header`](Self::allow_header).
///
/// # Behavior
///
/// - If no `Origin` header is present the request passes through unmodified.
/// - If the origin is not in the allow-list the request passes through unmodified.
/// - `OPTIONS` preflight requests are answered with `204 No Content` and the
///   appropriate `Access-Control-*` headers; the response is terminated and the
///   rest of the chain is **not** run.
/// - For all other requests the rest of the chain runs first and the CORS headers are
///   appended to the response buffer afterwards, unless a handler terminated it.
/// - When the wildcard origin `"*"` is used, a `Vary: Origin` header is **not** added;
///   for specific origins it is added to ensure correct cache behavior.
///
/// Preflights only reach global middleware for paths with a matching `OPTIONS`
/// route; register one (a wildcard such as `/*` works) when serving browsers.
///
/// # Examples
///
/// ```rust
/// use std::sync::Arc;
/// use condor::middleware::from_middleware;
/// use condor::security::CorsMiddleware;
///
/// let cors = from_middleware(Arc::new(
///     CorsMiddleware::new()
///         .allow_origin("https://example.com")
///         .allow_method("PATCH")
///         .allow_header("X-Custom-Header"),
/// ));
/// ```
pub struct CorsMiddleware {
    allowed_origins: Vec<String>,
    allowed_methods: Vec<String>,
    allowed_headers: Vec<String>,
}

impl Default for CorsMiddleware {
    fn default() -> Self {
        Self::new()
    }
}

impl CorsMiddleware {
    /// Creates a new `CorsMiddleware` with permissive defaults:
    ///
    /// | Setting          | Default value                          |
    /// |------------------|----------------------------------------|
    /// | Allowed origins  | `*` (all origins)                      |
    /// | Allowed methods  | `GET`, `POST`, `PUT`, `DELETE`         |
    /// | Allowed headers  | `Content-Type`, `Authorization`        |
    pub fn new() -> Self {
        Self {
            allowed_origins: vec!["*".to_string()],
            allowed_methods: vec![
                "GET".to_string(),
                "POST".to_string(),
                "PUT".to_string(),
                "DELETE".to_string(),
            ],
            allowed_headers: vec!["Content-Type".to_string(), "Authorization".to_string()],
        }
    }

    /// Restricts the allow-list to specific origins, dropping the default `*`.
    #[must_use]
    pub fn only_origins<I, S>(mut self, origins: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_origins = origins.into_iter().map(Into::into).collect();
        self
    }

    /// Adds an allowed origin.
    ///
    /// Pass `"*"` to permit all origins. When the allow-list contains `"*"`,
    /// every `Origin` value is accepted and the response carries
    /// `Access-Control-Allow-Origin: *`.
    #[must_use]
    pub fn allow_origin(mut self, origin: impl Into<String>) -> Self {
        self.allowed_origins.push(origin.into());
        self
    }

    /// Adds an allowed HTTP method, sent verbatim in `Access-Control-Allow-Methods`.
    #[must_use]
    pub fn allow_method(mut self, method: impl Into<String>) -> Self {
        self.allowed_methods.push(method.into());
        self
    }

    /// Adds an allowed request header, sent verbatim in `Access-Control-Allow-Headers`.
    #[must_use]
    pub fn allow_header(mut self, header: impl Into<String>) -> Self {
        self.allowed_headers.push(header.into());
        self
    }

    // The value for `Access-Control-Allow-Origin`, or `None` if `origin` is not allowed.
    fn resolve_origin(&self, origin: &str) -> Option<String> {
        if self.allowed_origins.iter().any(|o| o == "*") {
            Some("*".to_owned())
        } else if self.allowed_origins.iter().any(|o| o == origin) {
            Some(origin.to_owned())
        } else {
            None
        }
    }
}

impl Middleware for CorsMiddleware {
    fn handle<'a>(&'a self, ctx: &'a mut Context) -> BoxFuture<'a> {
        Box::pin(async move {
            let allow_origin = ctx
                .request()
                .header("origin")
                .and_then(|origin| self.resolve_origin(origin));
            let Some(allow_origin) = allow_origin else {
                ctx.next().await;
                return;
            };

            let methods = self.allowed_methods.join(", ");
            let headers = self.allowed_headers.join(", ");
            let is_wildcard = allow_origin == "*";

            if ctx.request().method() == &Method::Options {
                let response = ctx.response();
                response
                    .set_status(StatusCode::NoContent)
                    .set_header("Access-Control-Allow-Origin", allow_origin)
                    .set_header("Access-Control-Allow-Methods", methods)
                    .set_header("Access-Control-Allow-Headers", headers)
                    .set_header("Access-Control-Max-Age", "3600");
                if !is_wildcard {
                    response.set_header("Vary", "Origin");
                }
                response.terminate();
                return;
            }

            ctx.next().await;

            let response = ctx.response();
            response
                .set_header("Access-Control-Allow-Origin", allow_origin)
                .set_header("Access-Control-Allow-Methods", methods)
                .set_header("Access-Control-Allow-Headers", headers);
            if !is_wildcard {
                response.set_header("Vary", "Origin");
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    use super::*;
    use crate::context::testing::context;
    use crate::middleware::{Node, from_middleware, node};

    fn handler(called: &Arc<AtomicBool>) -> Node {
        let called = Arc::clone(called);
        node(move |ctx| {
            let called = Arc::clone(&called);
            Box::pin(async move {
                called.store(true, Ordering::SeqCst);
                ctx.response().text("handled");
            })
        })
    }

    async fn run(
        cors: CorsMiddleware,
        raw: &str,
        called: &Arc<AtomicBool>,
    ) -> crate::http::Response {
        let mut ctx = context(raw.as_bytes());
        ctx.chain_mut()
            .build(&[from_middleware(Arc::new(cors))], &[], Some(handler(called)));
        ctx.execute().await;
        ctx.response().flush().unwrap()
    }

    #[tokio::test]
    async fn preflight_short_circuits() {
        let called = Arc::new(AtomicBool::new(false));
        let response = run(
            CorsMiddleware::new(),
            "OPTIONS /users HTTP/1.1\r\nOrigin: https://a.example\r\n\r\n",
            &called,
        )
        .await;

        assert!(!called.load(Ordering::SeqCst));
        assert_eq!(response.status(), StatusCode::NoContent);
        assert_eq!(response.headers().get("access-control-allow-origin"), Some("*"));
        assert_eq!(response.headers().get("access-control-max-age"), Some("3600"));
        assert!(response.headers().get("vary").is_none());
    }

    #[tokio::test]
    async fn actual_request_gets_headers() {
        let called = Arc::new(AtomicBool::new(false));
        let cors = CorsMiddleware::new().only_origins(["https://a.example"]);
        let response = run(
            cors,
            "GET /users HTTP/1.1\r\nOrigin: https://a.example\r\n\r\n",
            &called,
        )
        .await;

        assert!(called.load(Ordering::SeqCst));
        assert_eq!(response.body_text(), "handled");
        assert_eq!(
            response.headers().get("access-control-allow-origin"),
            Some("https://a.example")
        );
        assert_eq!(response.headers().get("vary"), Some("Origin"));
    }

    #[tokio::test]
    async fn unknown_origin_passes_through() {
        let called = Arc::new(AtomicBool::new(false));
        let cors = CorsMiddleware::new().only_origins(["https://a.example"]);
        let response = run(
            cors,
            "OPTIONS /users HTTP/1.1\r\nOrigin: https://evil.example\r\n\r\n",
            &called,
        )
        .await;

        assert!(called.load(Ordering::SeqCst));
        assert!(response.headers().get("access-control-allow-origin").is_none());
    }
}
