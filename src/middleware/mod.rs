//! Middleware and handlers as chain nodes.
//!
//! Global middleware, per-route middleware, and route handlers all share one
//! shape, [`Node`]: an async function of `&mut Context`. A node continues the
//! request by awaiting [`Context::next`]; returning without doing so
//! short-circuits everything after it (auth failures, rate limits, cached
//! responses).
//!
//! ## Core types
//!
//! - [`Node`] — type-erased, cheaply cloneable chain element.
//! - [`node`] — turns a closure into a [`Node`].
//! - [`Middleware`] — trait for middleware that carries configuration.
//! - [`from_middleware`] — converts a [`Middleware`] into a [`Node`].
//! - [`Middlewares`] — the process-wide, append-only list of global middleware.
//! - [`Chain`] — the per-request node list and cursor.
//! - [`LoggerMiddleware`] — built-in request/response logger.

use std::{future::Future, pin::Pin, sync::Arc};

use tokio::time::Instant;

use crate::context::Context;

mod chain;

pub use chain::{Chain, ChainState};

/// The future returned by every chain node.
pub type BoxFuture<'a> = Pin<Box<dyn Future<Output = ()> + Send + 'a>>;

/// A type-erased, reference-counted chain element.
///
/// The future a node returns may borrow the [`Context`] but nothing the node
/// itself captured; clone captured state into the `async` block.
///
/// ```rust,no_run
/// use condor::middleware::{Node, node};
///
/// let stamp: Node = node(|ctx| {
///     Box::pin(async move {
///         ctx.response().set_header("X-Powered-By", "condor");
///         ctx.next().await;
///     })
/// });
/// ```
pub type Node = Arc<dyn for<'a> Fn(&'a mut Context) -> BoxFuture<'a> + Send + Sync + 'static>;

/// Wraps a closure as a [`Node`].
///
/// The bound is spelled out here (rather than behind a conversion trait) so the
/// compiler infers the closure's higher-ranked signature at the call site.
pub fn node<F>(f: F) -> Node
where
    F: for<'a> Fn(&'a mut Context) -> BoxFuture<'a> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Middleware that carries its own configuration.
///
/// Implementors may:
///
/// - **Pass through** — await `ctx.next()` and return.
/// - **Short-circuit** — fill the response and return without calling `next`.
/// - **Decorate** — await `ctx.next()`, then adjust the response buffer.
pub trait Middleware: Send + Sync {
    fn handle<'a>(&'a self, ctx: &'a mut Context) -> BoxFuture<'a>;
}

/// Converts a [`Middleware`] into a [`Node`].
pub fn from_middleware<M>(middleware: Arc<M>) -> Node
where
    M: Middleware + 'static,
{
    node(move |ctx| {
        let middleware = Arc::clone(&middleware);
        Box::pin(async move { middleware.handle(ctx).await })
    })
}

/// The global middleware list, in attachment order.
///
/// Built during setup and read-only once the app starts serving. There is no
/// priority mechanism: attachment order is execution order.
#[derive(Clone, Default)]
pub struct Middlewares {
    nodes: Vec<Node>,
}

impl Middlewares {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `middleware` to the end of the list.
    pub fn attach(&mut self, middleware: Node) -> &mut Self {
        self.nodes.push(middleware);
        self
    }

    /// A copy of the current list. Mutating it does not affect the registry.
    pub fn list(&self) -> Vec<Node> {
        self.nodes.clone()
    }

    pub(crate) fn as_slice(&self) -> &[Node] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// Logs each request's method, path, status, and duration once the rest of the
/// chain has run.
///
/// ```text
/// GET /users/7 - 200 (1.204ms)
/// ```
pub struct LoggerMiddleware;

impl Middleware for LoggerMiddleware {
    fn handle<'a>(&'a self, ctx: &'a mut Context) -> BoxFuture<'a> {
        Box::pin(async move {
            let start = Instant::now();

            ctx.next().await;

            let duration = start.elapsed();
            tracing::info!(
                method = %ctx.request().method(),
                path = %ctx.request().path(),
                status = ctx.response_ref().status().as_u16(),
                "{} {} - {} ({:?})",
                ctx.request().method(),
                ctx.request().path(),
                ctx.response_ref().status().as_u16(),
                duration
            );
        })
    }
}
