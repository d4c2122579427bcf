//! The application: setup phase and dispatch.
//!
//! An [`AppBuilder`] collects routes, global middleware, event jobs and
//! service plug-ins. [`AppBuilder::build`] validates the configuration and
//! freezes everything into an [`App`], which is read-only from then on and can
//! be shared across any number of concurrent requests.
//!
//! Each call to [`App::dispatch`] gets its own [`Context`], and with it its own
//! chain, cursor and response buffer.

use std::{
    any::Any,
    panic::AssertUnwindSafe,
    sync::Arc,
};

use futures::FutureExt;
use serde_json::json;
use thiserror::Error;
use tracing::{Instrument, error, warn};
use uuid::Uuid;

use crate::cache::CacheStore;
use crate::config::{Config, ConfigError};
use crate::context::{CancelToken, Context, Form, FormError, RequestView};
use crate::events::{Event, EventError, EventsManager, JobFuture};
use crate::http::{Method, Request, Response, StatusCode};
use crate::mail::MailTransport;
use crate::middleware::{BoxFuture, Middleware, Middlewares, Node, from_middleware, node};
use crate::router::{Lookup, RouteError, Router};
use crate::services::Services;

pub(crate) mod panic;

const NOT_FOUND_BODY: &str = r#"{"message": "Not Found"}"#;
const METHOD_NOT_ALLOWED_BODY: &str = r#"{"message": "Method not allowed"}"#;
const INTERNAL_ERROR_BODY: &str = r#"{"message": "internal error"}"#;

/// Errors that abort application startup.
#[derive(Debug, Error)]
pub enum SetupError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("invalid route: {0}")]
    Route(#[from] RouteError),

    #[error("invalid event registration: {0}")]
    Event(#[from] EventError),
}

/// How a dispatched request ended.
#[derive(Debug)]
pub enum Outcome {
    /// The response to write back to the client.
    Responded(Response),
    /// The request's token was cancelled first; nothing should be written.
    Cancelled,
}

impl Outcome {
    pub fn into_response(self) -> Option<Response> {
        match self {
            Self::Responded(response) => Some(response),
            Self::Cancelled => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

type Provider = Box<dyn FnOnce(Services) -> Services + Send>;

/// Collects everything an [`App`] is made of.
///
/// ```rust
/// use condor::app::App;
/// use condor::config::Config;
///
/// let mut builder = App::builder(Config::default());
/// builder
///     .router()
///     .get("/", |ctx| Box::pin(async move { ctx.response().text("hello"); }))
///     .unwrap();
/// let app = builder.build().unwrap();
/// assert_eq!(app.router().len(), 1);
/// ```
pub struct AppBuilder {
    config: Config,
    router: Router,
    middlewares: Middlewares,
    events: EventsManager,
    cache_store: Option<Arc<dyn CacheStore>>,
    mail_transport: Option<Arc<dyn MailTransport>>,
    providers: Vec<Provider>,
}

impl AppBuilder {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            router: Router::new(),
            middlewares: Middlewares::new(),
            events: EventsManager::new(),
            cache_store: None,
            mail_transport: None,
            providers: Vec::new(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The route table, for registering routes and groups.
    pub fn router(&mut self) -> &mut Router {
        &mut self.router
    }

    /// Appends a global middleware closure; globals run before route middleware,
    /// in attach order.
    pub fn attach<F>(&mut self, middleware: F) -> &mut Self
    where
        F: for<'a> Fn(&'a mut Context) -> BoxFuture<'a> + Send + Sync + 'static,
    {
        self.middlewares.attach(node(middleware));
        self
    }

    /// Appends a global middleware value.
    pub fn attach_middleware<M>(&mut self, middleware: M) -> &mut Self
    where
        M: Middleware + 'static,
    {
        self.middlewares.attach(from_middleware(Arc::new(middleware)));
        self
    }

    /// Appends an already type-erased global node.
    pub fn attach_node(&mut self, middleware: Node) -> &mut Self {
        self.middlewares.attach(middleware);
        self
    }

    /// Registers `job` to run whenever `event` is fired.
    ///
    /// # Errors
    ///
    /// [`EventError::EmptyName`] if `event` is empty.
    pub fn on<F>(&mut self, event: impl Into<String>, job: F) -> Result<&mut Self, EventError>
    where
        F: for<'a> Fn(&'a Event, &'a mut Context) -> JobFuture<'a> + Send + Sync + 'static,
    {
        self.events.register(event, job)?;
        Ok(self)
    }

    /// Replaces the default in-memory cache with `store`.
    pub fn cache_store(&mut self, store: Arc<dyn CacheStore>) -> &mut Self {
        self.cache_store = Some(store);
        self
    }

    /// Routes outgoing mail through `transport` instead of the log.
    pub fn mail_transport(&mut self, transport: Arc<dyn MailTransport>) -> &mut Self {
        self.mail_transport = Some(transport);
        self
    }

    /// Registers a singleton of type `T`, built by `factory` on its first
    /// [`Context::resolve`] and shared afterwards. Database pools and other
    /// clients are plugged in this way.
    pub fn provide_lazy<T, F>(&mut self, factory: F) -> &mut Self
    where
        T: Send + Sync + 'static,
        F: Fn() -> T + Send + Sync + 'static,
    {
        self.providers
            .push(Box::new(move |services| services.provide_lazy(factory)));
        self
    }

    /// Validates the configuration and freezes the app.
    ///
    /// # Errors
    ///
    /// [`SetupError::Config`] when the configuration is inconsistent, such as JWT
    /// enabled without a secret.
    pub fn build(self) -> Result<App, SetupError> {
        self.config.validate()?;
        panic::install_hook();

        let mut services = Services::new(self.config).with_events(self.events);
        if let Some(store) = self.cache_store {
            services = services.with_cache_store(store);
        }
        if let Some(transport) = self.mail_transport {
            services = services.with_mail_transport(transport);
        }
        for provide in self.providers {
            services = provide(services);
        }

        tracing::debug!(
            routes = self.router.len(),
            middleware = self.middlewares.len(),
            "application built"
        );
        Ok(App {
            router: self.router,
            middlewares: self.middlewares,
            services: Arc::new(services),
        })
    }
}

/// A built application, ready to dispatch requests.
pub struct App {
    router: Router,
    middlewares: Middlewares,
    services: Arc<Services>,
}

impl App {
    pub fn builder(config: Config) -> AppBuilder {
        AppBuilder::new(config)
    }

    pub fn config(&self) -> &Config {
        self.services.config()
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    pub fn middlewares(&self) -> &Middlewares {
        &self.middlewares
    }

    pub fn services(&self) -> &Arc<Services> {
        &self.services
    }

    /// Dispatches `request`, cancelling it once the configured request timeout
    /// elapses.
    pub async fn dispatch(&self, request: Request) -> Outcome {
        let cancel = CancelToken::new();
        let Some(timeout) = self.config().request_timeout else {
            return self.dispatch_with(request, cancel).await;
        };

        let dispatch = self.dispatch_with(request, cancel.clone());
        tokio::pin!(dispatch);
        tokio::select! {
            outcome = &mut dispatch => outcome,
            () = tokio::time::sleep(timeout) => {
                cancel.cancel();
                dispatch.await
            }
        }
    }

    /// Dispatches `request` under a caller-owned cancellation token.
    ///
    /// Routes the request, runs its chain behind a panic boundary, flushes the
    /// response buffer, dispatches fired events and resets the context.
    pub async fn dispatch_with(&self, request: Request, cancel: CancelToken) -> Outcome {
        let request_id = Uuid::new_v4();
        let span = tracing::info_span!(
            "request",
            id = %request_id,
            method = %request.method(),
            path = %request.path()
        );
        self.run(request, cancel, request_id, span.clone())
            .instrument(span)
            .await
    }

    async fn run(
        &self,
        request: Request,
        cancel: CancelToken,
        request_id: Uuid,
        span: tracing::Span,
    ) -> Outcome {
        let (route, params) = match self.router.lookup(request.method(), request.path()) {
            Lookup::Found { route, params } => (route, params),
            Lookup::MethodNotAllowed { allowed } => {
                error!(allowed = ?allowed, "method not allowed");
                let allow = allowed
                    .iter()
                    .map(Method::to_string)
                    .collect::<Vec<_>>()
                    .join(", ");
                return Outcome::Responded(
                    Response::json(StatusCode::MethodNotAllowed, METHOD_NOT_ALLOWED_BODY)
                        .header("Allow", allow),
                );
            }
            Lookup::NotFound => {
                error!("route not found");
                return Outcome::Responded(Response::json(StatusCode::NotFound, NOT_FOUND_BODY));
            }
        };

        let form = match Form::parse(&request, self.config().max_upload_size) {
            Ok(form) => form,
            Err(err @ FormError::TooLarge { .. }) => {
                warn!(error = %err, "rejecting oversized body");
                let body = json!({ "message": err.to_string() }).to_string();
                return Outcome::Responded(Response::json(StatusCode::PayloadTooLarge, body));
            }
            Err(err) => {
                warn!(error = %err, "rejecting malformed body");
                let body = json!({ "message": err.to_string() }).to_string();
                return Outcome::Responded(Response::json(StatusCode::BadRequest, body));
            }
        };

        let mut ctx = Context::new(
            RequestView::new(request, params, form),
            Arc::clone(&self.services),
        )
        .with_cancel(cancel.clone())
        .with_span(request_id, span);
        ctx.chain_mut().build(
            self.middlewares.as_slice(),
            route.middleware(),
            Some(route.handler().clone()),
        );

        let finished = {
            let execute = AssertUnwindSafe(ctx.execute()).catch_unwind();
            tokio::select! {
                biased;
                () = cancel.cancelled() => None,
                result = execute => Some(result),
            }
        };

        let response = match finished {
            None => {
                warn!("request cancelled before completion");
                ctx.reset();
                return Outcome::Cancelled;
            }
            Some(Err(payload)) => self.recover(payload),
            Some(Ok(())) => match ctx.response().flush() {
                Some(response) => self.finish(&mut ctx, response, &cancel).await,
                None => {
                    error!("response buffer was flushed before the chain completed");
                    Response::json(StatusCode::InternalServerError, INTERNAL_ERROR_BODY)
                }
            },
        };
        ctx.reset();
        Outcome::Responded(response)
    }

    /// Saves the session and runs the fired events' jobs after a completed chain.
    ///
    /// The jobs stop early if `cancel` fires; the response is delivered
    /// either way.
    async fn finish(
        &self,
        ctx: &mut Context,
        mut response: Response,
        cancel: &CancelToken,
    ) -> Response {
        if let Some(cookie) = ctx.persist_session().await {
            response = response.header("Set-Cookie", cookie);
        }
        if !ctx.fired_events().is_empty() {
            tokio::select! {
                biased;
                () = cancel.cancelled() => warn!("deadline passed while running event jobs"),
                () = ctx.dispatch_events() => {}
            }
        }
        response
    }

    /// Turns a caught panic into a 500 response.
    fn recover(&self, payload: Box<dyn Any + Send>) -> Response {
        let message = panic::message(&*payload);
        let trace = panic::take_backtrace().unwrap_or_default();
        error!(panic = %message, backtrace = %trace, "handler panicked");

        if !self.config().debug {
            return Response::json(StatusCode::InternalServerError, INTERNAL_ERROR_BODY);
        }
        let body = json!({ "message": message, "stack trace": trace });
        Response::json(StatusCode::InternalServerError, body.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn get(path: &str) -> Request {
        let raw = format!("GET {path} HTTP/1.1\r\nHost: test\r\n\r\n");
        Request::parse(raw.as_bytes()).unwrap().0
    }

    #[test]
    fn build_rejects_invalid_config() {
        let mut config = Config::default();
        config.jwt.enabled = true;
        config.jwt.secret = None;
        assert!(matches!(
            App::builder(config).build(),
            Err(SetupError::Config(ConfigError::MissingJwtSecret))
        ));
    }

    #[test]
    fn empty_event_name_is_rejected() {
        let mut builder = App::builder(Config::default());
        let result = builder.on("", |_event, _ctx| Box::pin(async {}));
        assert!(matches!(result, Err(EventError::EmptyName)));
    }

    #[tokio::test]
    async fn handler_without_body_is_empty_200() {
        let mut builder = App::builder(Config::default());
        builder.router().get("/", |_ctx| Box::pin(async {})).unwrap();
        let app = builder.build().unwrap();

        let response = app.dispatch(get("/")).await.into_response().unwrap();
        assert_eq!(response.status(), StatusCode::Ok);
        assert!(response.body_ref().is_empty());
    }

    #[tokio::test]
    async fn buffer_flushed_inside_the_chain_is_a_500() {
        let mut builder = App::builder(Config::default());
        builder
            .router()
            .get("/", |ctx| {
                Box::pin(async move {
                    ctx.response().text("lost");
                    let _ = ctx.response().flush();
                })
            })
            .unwrap();
        let app = builder.build().unwrap();

        let response = app.dispatch(get("/")).await.into_response().unwrap();
        assert_eq!(response.status(), StatusCode::InternalServerError);
        assert_eq!(response.body_text(), INTERNAL_ERROR_BODY);
    }

    #[tokio::test]
    async fn method_not_allowed_lists_methods() {
        let mut builder = App::builder(Config::default());
        builder
            .router()
            .post("/items", |_ctx| Box::pin(async {}))
            .unwrap();
        let app = builder.build().unwrap();

        let response = app.dispatch(get("/items")).await.into_response().unwrap();
        assert_eq!(response.status(), StatusCode::MethodNotAllowed);
        assert_eq!(response.headers().get("allow"), Some("POST"));
    }

    #[tokio::test]
    async fn cancelled_token_yields_no_response() {
        let mut builder = App::builder(Config::default());
        builder
            .router()
            .get("/slow", |ctx| {
                Box::pin(async move {
                    ctx.cancel_token().cancelled().await;
                    ctx.response().text("too late");
                })
            })
            .unwrap();
        let app = builder.build().unwrap();

        let cancel = CancelToken::new();
        cancel.cancel();
        let outcome = app.dispatch_with(get("/slow"), cancel).await;
        assert!(outcome.is_cancelled());
    }
}
