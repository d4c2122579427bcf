//! Per-request context: the request facade, the response buffer, the execution
//! chain, and accessors for the app's shared services.
//!
//! A `Context` is created by the dispatcher for exactly one request and dropped
//! (after [`reset`](Context::reset)) once the response has been produced. Nothing
//! in it is shared with concurrent requests except the [`Services`] handle.

use std::{
    any::{Any, TypeId},
    collections::HashMap,
    panic::AssertUnwindSafe,
    sync::Arc,
};

use futures::FutureExt;
use uuid::Uuid;

use crate::app::panic;
use crate::auth::Auth;
use crate::cache::CacheStore;
use crate::config::Config;
use crate::events::{Event, EventError};
use crate::hashing::Hashing;
use crate::jwt::Jwt;
use crate::mail::Mailer;
use crate::middleware::{BoxFuture, Chain};
use crate::services::{ServiceError, Services};
use crate::sessions::{Session, SessionError};
use crate::validation::Validator;

mod cancel;
mod cast;
mod form;
mod request;
mod response;
mod upload;

pub use cancel::CancelToken;
pub use cast::{CastError, Scalar};
pub use form::{FilePart, Form, FormError};
pub use request::RequestView;
pub use response::{CONTENT_TYPE_HTML, CONTENT_TYPE_JSON, CONTENT_TYPE_TEXT, ResponseBuffer};
pub use upload::{UploadError, UploadedFile, copy_file, move_file};

/// Type-erased request extensions map — used to inject per-request state
/// into handlers without requiring handlers to know about each other's types.
#[derive(Default)]
pub struct Extensions {
    map: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
}

impl Extensions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `value`, replacing any previous value of the same type.
    pub fn insert<T>(&mut self, value: T)
    where
        T: Send + Sync + 'static,
    {
        self.map.insert(TypeId::of::<T>(), Box::new(value));
    }

    pub fn get<T>(&self) -> Option<&T>
    where
        T: Send + Sync + 'static,
    {
        self.map
            .get(&TypeId::of::<T>())
            .and_then(|value| value.downcast_ref::<T>())
    }

    pub fn get_mut<T>(&mut self) -> Option<&mut T>
    where
        T: Send + Sync + 'static,
    {
        self.map
            .get_mut(&TypeId::of::<T>())
            .and_then(|value| value.downcast_mut::<T>())
    }

    pub fn remove<T>(&mut self) -> Option<T>
    where
        T: Send + Sync + 'static,
    {
        self.map
            .remove(&TypeId::of::<T>())
            .and_then(|value| value.downcast::<T>().ok())
            .map(|value| *value)
    }

    pub fn clear(&mut self) {
        self.map.clear();
    }
}

/// Path parameters captured by the matched route.
#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub struct PathParams {
    map: HashMap<String, String>,
}

impl PathParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: String, value: String) {
        self.map.insert(key, value);
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.map.get(key).map(|value| value.as_str())
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.map.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// Everything one request's handlers can see and touch.
///
/// Handlers read the request through [`request`](Self::request), write the reply
/// through [`response`](Self::response), continue the chain with
/// [`next`](Self::next), and reach shared services through the accessor methods.
pub struct Context {
    request: RequestView,
    response: ResponseBuffer,
    chain: Chain,
    services: Arc<Services>,
    fired: Vec<Event>,
    dispatching: bool,
    session: Option<Session>,
    extensions: Extensions,
    cancel: CancelToken,
    request_id: Uuid,
    span: tracing::Span,
}

impl Context {
    pub(crate) fn new(request: RequestView, services: Arc<Services>) -> Self {
        Self {
            request,
            response: ResponseBuffer::new(),
            chain: Chain::new(),
            services,
            fired: Vec::new(),
            dispatching: false,
            session: None,
            extensions: Extensions::new(),
            cancel: CancelToken::new(),
            request_id: Uuid::new_v4(),
            span: tracing::Span::none(),
        }
    }

    pub(crate) fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub(crate) fn with_span(mut self, request_id: Uuid, span: tracing::Span) -> Self {
        self.request_id = request_id;
        self.span = span;
        self
    }

    pub fn request(&self) -> &RequestView {
        &self.request
    }

    pub fn response(&mut self) -> &mut ResponseBuffer {
        &mut self.response
    }

    pub fn response_ref(&self) -> &ResponseBuffer {
        &self.response
    }

    pub fn extensions(&self) -> &Extensions {
        &self.extensions
    }

    pub fn extensions_mut(&mut self) -> &mut Extensions {
        &mut self.extensions
    }

    pub fn request_id(&self) -> Uuid {
        self.request_id
    }

    /// The `request` tracing span this request runs in.
    pub fn span(&self) -> &tracing::Span {
        &self.span
    }

    /// The token the server cancels when this request's deadline passes.
    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub(crate) fn chain(&self) -> &Chain {
        &self.chain
    }

    pub(crate) fn chain_mut(&mut self) -> &mut Chain {
        &mut self.chain
    }

    /// Runs the next node in the chain, if any.
    ///
    /// A node that never awaits `next` ends the request's chain there.
    pub fn next(&mut self) -> BoxFuture<'_> {
        Box::pin(async move {
            if let Some(node) = self.chain.advance() {
                node(self).await;
            }
        })
    }

    /// Runs the built chain from its first node.
    pub(crate) async fn execute(&mut self) {
        self.chain.start();
        self.next().await;
        self.chain.finish();
    }

    /// Queues `event` for dispatch after the chain completes.
    ///
    /// # Errors
    ///
    /// [`EventError::EmptyName`] or [`EventError::Unregistered`], and
    /// [`EventError::FiredFromJob`] when called from an event job. The request
    /// carries on either way.
    pub fn fire(&mut self, event: Event) -> Result<(), EventError> {
        if self.dispatching {
            return Err(EventError::FiredFromJob { name: event.name });
        }
        self.services.events().check(&event.name)?;
        tracing::debug!(event = %event.name, "event fired");
        self.fired.push(event);
        Ok(())
    }

    pub fn fired_events(&self) -> &[Event] {
        &self.fired
    }

    /// Runs the jobs of every fired event, in firing order.
    ///
    /// Each job runs behind its own panic boundary: a panicking job is logged
    /// and the remaining jobs still run.
    pub(crate) async fn dispatch_events(&mut self) {
        let batch = std::mem::take(&mut self.fired);
        self.dispatching = true;
        for event in &batch {
            let jobs = self.services.events().jobs(&event.name);
            tracing::debug!(event = %event.name, jobs = jobs.len(), "dispatching event");
            for (index, job) in jobs.iter().enumerate() {
                if let Err(payload) = AssertUnwindSafe(job(event, self)).catch_unwind().await {
                    tracing::error!(
                        event = %event.name,
                        job = index,
                        panic = %panic::message(&*payload),
                        backtrace = %panic::take_backtrace().unwrap_or_default(),
                        "event job panicked"
                    );
                }
            }
        }
        self.dispatching = false;
    }

    /// This client's session, loaded from the session store on first use.
    ///
    /// Changes are written back once the chain completes, and a new session's
    /// id reaches the client as a cookie.
    ///
    /// # Errors
    ///
    /// [`SessionError::Service`] when sessions are disabled, or a store or
    /// decoding failure.
    pub async fn session(&mut self) -> Result<&mut Session, SessionError> {
        let session = match self.session.take() {
            Some(session) => session,
            None => {
                let manager = self.services.sessions()?;
                let cookie = self.request.cookie(manager.cookie_name());
                manager.load(cookie).await?
            }
        };
        Ok(self.session.insert(session))
    }

    /// Saves the session if this request touched it. Returns the `Set-Cookie`
    /// value the client must receive, if any.
    pub(crate) async fn persist_session(&mut self) -> Option<String> {
        let session = self.session.take()?;
        let manager = self.services.sessions().ok()?;
        match manager.save(&session).await {
            Ok(cookie) => cookie,
            Err(err) => {
                tracing::error!(error = %err, "failed to save session");
                None
            }
        }
    }

    /// Login state and bearer tokens for this request.
    pub fn auth(&mut self) -> Auth<'_> {
        Auth::new(self)
    }

    pub fn config(&self) -> &Config {
        self.services.config()
    }

    pub fn services(&self) -> &Arc<Services> {
        &self.services
    }

    pub fn validator(&self) -> &Validator {
        self.services.validator()
    }

    pub fn jwt(&self) -> Result<&Jwt, ServiceError> {
        self.services.jwt()
    }

    pub fn cache(&self) -> Result<Arc<dyn CacheStore>, ServiceError> {
        self.services.cache()
    }

    pub fn mailer(&self) -> Mailer {
        self.services.mailer()
    }

    pub fn hashing(&self) -> Hashing {
        self.services.hashing()
    }

    /// A user-provided singleton registered with
    /// [`AppBuilder::provide_lazy`](crate::app::AppBuilder::provide_lazy),
    /// constructed on first use.
    pub fn resolve<T>(&self) -> Result<Arc<T>, ServiceError>
    where
        T: Send + Sync + 'static,
    {
        self.services.resolve::<T>()
    }

    /// Returns the per-request state to empty. Idempotent.
    pub(crate) fn reset(&mut self) {
        self.chain.reset();
        self.response.reset();
        self.fired.clear();
        self.dispatching = false;
        self.session = None;
        self.extensions.clear();
    }
}
