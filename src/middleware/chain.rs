//! The per-request execution chain.

use super::Node;

/// Lifecycle of a [`Chain`].
///
/// ```text
/// Idle --build--> Built --start--> Running --(cursor past end | short-circuit)--> Done
///   ^                                                                              |
///   +------------------------------------reset-------------------------------------+
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainState {
    Idle,
    Built,
    Running,
    Done,
}

/// Global middleware, route middleware, and the route handler for one request,
/// plus a cursor tracking how far execution has progressed.
///
/// Owned by the request's [`Context`](crate::context::Context), never by the app,
/// so concurrent requests cannot observe each other's progress.
pub struct Chain {
    nodes: Vec<Node>,
    cursor: usize,
    state: ChainState,
}

impl Default for Chain {
    fn default() -> Self {
        Self::new()
    }
}

impl Chain {
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            cursor: 0,
            state: ChainState::Idle,
        }
    }

    /// Replaces the node list with `global ++ route ++ [handler]` and rewinds
    /// the cursor.
    pub fn build(&mut self, global: &[Node], route: &[Node], handler: Option<Node>) {
        self.nodes.clear();
        self.nodes.reserve(global.len() + route.len() + 1);
        self.nodes.extend_from_slice(global);
        self.nodes.extend_from_slice(route);
        self.nodes.extend(handler);
        self.cursor = 0;
        self.state = ChainState::Built;
    }

    /// Marks a built chain as running.
    pub fn start(&mut self) {
        if self.state == ChainState::Built {
            self.state = ChainState::Running;
        }
    }

    /// Hands out the node at the cursor and moves the cursor past it.
    ///
    /// Returns `None` once every node has been handed out, or when the chain is
    /// not running.
    pub fn advance(&mut self) -> Option<Node> {
        if self.state != ChainState::Running {
            return None;
        }
        match self.nodes.get(self.cursor) {
            Some(node) => {
                self.cursor += 1;
                Some(node.clone())
            }
            None => {
                self.state = ChainState::Done;
                None
            }
        }
    }

    /// Marks the chain done, whether or not every node ran.
    pub fn finish(&mut self) {
        if self.state == ChainState::Running {
            self.state = ChainState::Done;
        }
    }

    /// Clears the node list and returns to [`ChainState::Idle`]. Idempotent.
    pub fn reset(&mut self) {
        self.nodes.clear();
        self.cursor = 0;
        self.state = ChainState::Idle;
    }

    pub fn state(&self) -> ChainState {
        self.state
    }

    /// Number of nodes handed out so far.
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::context::testing::context;
    use crate::middleware::node;

    type Trace = Arc<Mutex<Vec<&'static str>>>;

    fn recording(trace: &Trace, name: &'static str, forward: bool) -> Node {
        let trace = Arc::clone(trace);
        node(move |ctx| {
            let trace = Arc::clone(&trace);
            Box::pin(async move {
                trace.lock().unwrap().push(name);
                if forward {
                    ctx.next().await;
                }
            })
        })
    }

    #[test]
    fn build_concatenates_in_order() {
        let trace = Trace::default();
        let global = [recording(&trace, "g", true)];
        let route = [recording(&trace, "r1", true), recording(&trace, "r2", true)];
        let mut chain = Chain::new();
        chain.build(&global, &route, Some(recording(&trace, "h", false)));
        assert_eq!(chain.len(), 4);
        assert_eq!(chain.state(), ChainState::Built);
        assert_eq!(chain.cursor(), 0);
    }

    #[test]
    fn advance_requires_running() {
        let mut chain = Chain::new();
        chain.build(&[], &[], Some(node(|_| Box::pin(async {}))));
        assert!(chain.advance().is_none());
        chain.start();
        assert!(chain.advance().is_some());
        assert!(chain.advance().is_none());
        assert_eq!(chain.state(), ChainState::Done);
    }

    #[tokio::test]
    async fn nodes_run_in_build_order() {
        let trace = Trace::default();
        let mut ctx = context(b"GET / HTTP/1.1\r\n\r\n");
        ctx.chain_mut().build(
            &[recording(&trace, "global-1", true), recording(&trace, "global-2", true)],
            &[recording(&trace, "route", true)],
            Some(recording(&trace, "handler", true)),
        );
        ctx.execute().await;

        assert_eq!(
            *trace.lock().unwrap(),
            vec!["global-1", "global-2", "route", "handler"]
        );
        assert_eq!(ctx.chain().state(), ChainState::Done);
    }

    #[tokio::test]
    async fn short_circuit_stops_the_chain() {
        let trace = Trace::default();
        let mut ctx = context(b"GET / HTTP/1.1\r\n\r\n");
        ctx.chain_mut().build(
            &[recording(&trace, "auth", false)],
            &[recording(&trace, "route", true)],
            Some(recording(&trace, "handler", true)),
        );
        ctx.execute().await;

        assert_eq!(*trace.lock().unwrap(), vec!["auth"]);
        assert_eq!(ctx.chain().cursor(), 1);
        assert_eq!(ctx.chain().state(), ChainState::Done);
    }

    #[tokio::test]
    async fn code_after_next_runs_on_the_way_back() {
        let trace = Trace::default();
        let outer = {
            let trace = Arc::clone(&trace);
            node(move |ctx| {
                let trace = Arc::clone(&trace);
                Box::pin(async move {
                    trace.lock().unwrap().push("before");
                    ctx.next().await;
                    trace.lock().unwrap().push("after");
                })
            })
        };
        let mut ctx = context(b"GET / HTTP/1.1\r\n\r\n");
        ctx.chain_mut()
            .build(&[outer], &[], Some(recording(&trace, "handler", false)));
        ctx.execute().await;

        assert_eq!(*trace.lock().unwrap(), vec!["before", "handler", "after"]);
    }

    #[tokio::test]
    async fn empty_chain_is_a_no_op() {
        let mut ctx = context(b"GET / HTTP/1.1\r\n\r\n");
        ctx.chain_mut().build(&[], &[], None);
        ctx.execute().await;

        assert_eq!(ctx.chain().state(), ChainState::Done);
        let response = ctx.response().flush().unwrap();
        assert_eq!(response.status(), crate::http::StatusCode::Ok);
        assert!(response.body_ref().is_empty());
    }

    #[test]
    fn reset_returns_to_idle() {
        let mut chain = Chain::new();
        chain.build(&[], &[], Some(node(|_| Box::pin(async {}))));
        chain.start();
        let _ = chain.advance();

        chain.reset();
        chain.reset();
        assert_eq!(chain.state(), ChainState::Idle);
        assert_eq!(chain.cursor(), 0);
        assert!(chain.is_empty());
    }
}
