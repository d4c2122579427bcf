//! Request routing — map URL patterns and HTTP methods to chain nodes.
//!
//! [`Router`] is the route table. Each [`Route`] binds a method and a path
//! pattern to a handler [`Node`] plus the route's own middleware. Three pattern
//! styles are supported:
//!
//! | Pattern              | Example match              | Captured params              |
//! |----------------------|----------------------------|------------------------------|
//! | `/users`             | `/users`                   | *(none)*                     |
//! | `/users/:id`         | `/users/42`                | `id → "42"`                  |
//! | `/files/*`           | `/files/docs/readme.txt`   | `wildcard → "/docs/readme.txt"` |
//!
//! Trailing slashes are normalized on both patterns and incoming paths, so `/users/` and
//! `/users` are treated as equivalent.
//!
//! The table is filled during setup and read-only afterwards. Two routes that
//! could match the same requests with the same method are rejected at
//! registration, so lookup never has to break a tie.

use thiserror::Error;

use crate::context::{Context, PathParams};
use crate::http::Method;
use crate::middleware::{BoxFuture, Node, node};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RouteError {
    #[error("unsupported HTTP method {method:?} (expected one of GET, POST, PUT, PATCH, DELETE, OPTIONS, HEAD)")]
    UnsupportedMethod { method: String },

    #[error("route {method} {path} duplicates the already registered {method} {existing}")]
    Duplicate {
        method: Method,
        path: String,
        existing: String,
    },

    #[error("route {method} {path} overlaps the already registered {method} {existing}")]
    Conflict {
        method: Method,
        path: String,
        existing: String,
    },
}

// A single path segment, either a literal string or a named capture (`:name`).
#[derive(Debug, Clone)]
enum Segment {
    Static(String),
    Parameter(String),
}

// Compiled representation of a route pattern string.
#[derive(Debug, Clone)]
enum Pattern {
    // Matches one exact path string, e.g. `/users`.
    Exact(String),
    // Matches a fixed number of segments where some may be named captures, e.g. `/users/:id`.
    Parameterized { segments: Vec<Segment> },
    // Matches the prefix itself and anything below it, e.g. `/files/*`.
    Wildcard(String),
}

fn trim_trailing_slash(path: &str) -> &str {
    if path != "/" && path.ends_with('/') {
        &path[..path.len() - 1]
    } else {
        path
    }
}

impl Pattern {
    /// Parse a route pattern string into a `Pattern`.
    ///
    /// The pattern is classified as follows (checked in order):
    ///
    /// 1. Ends with `/*` → [`Pattern::Wildcard`] — matches any path sharing the prefix.
    /// 2. Contains `:` → [`Pattern::Parameterized`] — one or more named captures.
    /// 3. Otherwise → [`Pattern::Exact`] — literal path match.
    ///
    /// A trailing slash (other than on the root `/`) is stripped before classification so
    /// that `/users/` and `/users` compile to identical patterns.
    fn parse(pattern: &str) -> Self {
        let pattern = trim_trailing_slash(pattern);

        if let Some(prefix) = pattern.strip_suffix("/*") {
            return Pattern::Wildcard(prefix.to_string());
        }

        if pattern.contains(':') {
            let segments = pattern
                .split('/')
                .filter(|s| !s.is_empty())
                .map(|s| {
                    if let Some(p) = s.strip_prefix(':') {
                        Segment::Parameter(p.to_string())
                    } else {
                        Segment::Static(s.to_string())
                    }
                })
                .collect();

            return Pattern::Parameterized { segments };
        }

        Pattern::Exact(pattern.to_string())
    }

    // Parameter names erased, so `/users/:id` and `/users/:user_id` compare equal.
    fn shape(&self) -> String {
        match self {
            Pattern::Exact(p) => p.clone(),
            Pattern::Parameterized { segments } => segments
                .iter()
                .map(|seg| match seg {
                    Segment::Static(s) => format!("/{s}"),
                    Segment::Parameter(_) => "/:".to_string(),
                })
                .collect(),
            Pattern::Wildcard(prefix) => format!("{prefix}/*"),
        }
    }

    // Literal segments as `Some`, captures as `None`, plus whether the pattern
    // accepts any tail after them.
    fn segments(&self) -> (Vec<Option<&str>>, bool) {
        fn literal(path: &str) -> Vec<Option<&str>> {
            path.split('/').filter(|s| !s.is_empty()).map(Some).collect()
        }
        match self {
            Pattern::Exact(p) => (literal(p), false),
            Pattern::Parameterized { segments } => {
                let segments = segments
                    .iter()
                    .map(|seg| match seg {
                        Segment::Static(s) => Some(s.as_str()),
                        Segment::Parameter(_) => None,
                    })
                    .collect();
                (segments, false)
            }
            Pattern::Wildcard(prefix) => (literal(prefix), true),
        }
    }

    // Whether some request path would match both patterns.
    fn overlaps(&self, other: &Pattern) -> bool {
        let (a, a_tail) = self.segments();
        let (b, b_tail) = other.segments();
        let compatible = a.iter().zip(&b).all(|pair| match pair {
            (Some(x), Some(y)) => x == y,
            _ => true,
        });
        compatible
            && match (a_tail, b_tail) {
                (false, false) => a.len() == b.len(),
                (true, false) => b.len() >= a.len(),
                (false, true) => a.len() >= b.len(),
                (true, true) => true,
            }
    }

    // Try to match `path` against this pattern, returning extracted [`PathParams`] on success.
    fn matches(&self, path: &str) -> Option<PathParams> {
        let path = trim_trailing_slash(path);

        match self {
            Pattern::Exact(p) => (p == path).then(PathParams::new),
            Pattern::Parameterized { segments } => {
                let mut params = PathParams::new();
                let path_segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

                if segments.len() != path_segments.len() {
                    return None;
                }

                for (seg, path_seg) in segments.iter().zip(path_segments) {
                    match seg {
                        Segment::Static(s) => {
                            if s != path_seg {
                                return None;
                            }
                        }
                        Segment::Parameter(name) => {
                            params.insert(name.clone(), path_seg.to_string());
                        }
                    }
                }

                Some(params)
            }
            Pattern::Wildcard(prefix) => {
                let suffix = path.strip_prefix(prefix.as_str())?;
                // `/files/*` must not match `/filesystem`.
                if !suffix.is_empty() && !suffix.starts_with('/') {
                    return None;
                }
                let mut params = PathParams::new();
                params.insert("wildcard".to_string(), suffix.to_string());
                Some(params)
            }
        }
    }
}

/// One registered route: method, pattern, handler, and route middleware.
pub struct Route {
    method: Method,
    path: String,
    pattern: Pattern,
    handler: Node,
    middleware: Vec<Node>,
}

impl Route {
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// The pattern as registered (group prefix included).
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn handler(&self) -> &Node {
        &self.handler
    }

    /// Middleware that runs after the global middleware and before the handler.
    pub fn middleware(&self) -> &[Node] {
        &self.middleware
    }

    /// Appends route middleware.
    pub fn with(&mut self, middleware: Node) -> &mut Self {
        self.middleware.push(middleware);
        self
    }
}

impl std::fmt::Debug for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Route")
            .field("method", &self.method)
            .field("path", &self.path)
            .field("middleware", &self.middleware.len())
            .finish_non_exhaustive()
    }
}

/// Result of matching a request against the table.
#[derive(Debug)]
pub enum Lookup<'a> {
    Found { route: &'a Route, params: PathParams },
    /// The path matched at least one route, none for this method.
    MethodNotAllowed { allowed: Vec<Method> },
    NotFound,
}

macro_rules! method_helpers {
    ($($(#[$doc:meta])* $name:ident => $method:expr;)+) => {
        $(
            $(#[$doc])*
            pub fn $name<F>(&mut self, path: &str, handler: F) -> Result<&mut Route, RouteError>
            where
                F: for<'a> Fn(&'a mut Context) -> BoxFuture<'a> + Send + Sync + 'static,
            {
                self.add($method, path, node(handler))
            }
        )+
    };
}

/// The route table.
///
/// # Examples
///
/// ```rust
/// use condor::router::{Lookup, Router};
/// use condor::http::Method;
///
/// let mut router = Router::new();
/// router
///     .get("/users/:id", |ctx| {
///         Box::pin(async move {
///             let id = ctx.request().path_param("id").unwrap_or_default().to_owned();
///             ctx.response().text(id);
///         })
///     })
///     .unwrap();
///
/// assert!(matches!(router.lookup(&Method::Get, "/users/7"), Lookup::Found { .. }));
/// assert!(matches!(router.lookup(&Method::Post, "/users/7"), Lookup::MethodNotAllowed { .. }));
/// assert!(matches!(router.lookup(&Method::Get, "/posts"), Lookup::NotFound));
/// ```
#[derive(Default)]
pub struct Router {
    routes: Vec<Route>,
}

impl Router {
    pub fn new() -> Self {
        Self { routes: Vec::new() }
    }

    /// Registers `handler` for `method` (case-insensitive) on `path`.
    ///
    /// # Errors
    ///
    /// [`RouteError::UnsupportedMethod`] unless `method` is one of GET, POST, PUT,
    /// PATCH, DELETE, OPTIONS or HEAD; [`RouteError::Duplicate`] if a route with
    /// the same method and pattern exists; [`RouteError::Conflict`] if an existing
    /// route of the same method would match any of the same paths
    /// (`/users/:id` against `/users/new`, `/files/*` against `/files/:name`).
    pub fn register(
        &mut self,
        method: &str,
        path: &str,
        handler: Node,
        middleware: Vec<Node>,
    ) -> Result<&mut Route, RouteError> {
        let parsed: Method = match method.to_ascii_uppercase().parse() {
            Ok(parsed) => parsed,
            Err(never) => match never {},
        };
        if !parsed.is_routable() {
            return Err(RouteError::UnsupportedMethod {
                method: method.to_owned(),
            });
        }
        self.insert(parsed, path, handler, middleware)
    }

    method_helpers! {
        /// Registers a `GET` route.
        get => Method::Get;
        /// Registers a `POST` route.
        post => Method::Post;
        /// Registers a `PUT` route.
        put => Method::Put;
        /// Registers a `PATCH` route.
        patch => Method::Patch;
        /// Registers a `DELETE` route.
        delete => Method::Delete;
        /// Registers an `OPTIONS` route.
        options => Method::Options;
        /// Registers a `HEAD` route.
        head => Method::Head;
    }

    /// Registers the routes added by `f` under `prefix`, each with `middleware`
    /// ahead of its own.
    ///
    /// ```rust
    /// use condor::middleware::node;
    /// use condor::router::Router;
    ///
    /// let mut router = Router::new();
    /// let auth = node(|ctx| Box::pin(async move { ctx.next().await }));
    /// router
    ///     .group("/api", vec![auth], |api| {
    ///         api.get("/users", |ctx| Box::pin(async move { ctx.response().json("[]"); }))?;
    ///         Ok(())
    ///     })
    ///     .unwrap();
    /// assert_eq!(router.routes()[0].path(), "/api/users");
    /// ```
    pub fn group<F>(&mut self, prefix: &str, middleware: Vec<Node>, f: F) -> Result<(), RouteError>
    where
        F: FnOnce(&mut Group<'_>) -> Result<(), RouteError>,
    {
        let mut group = Group {
            router: self,
            prefix: join(prefix, ""),
            middleware,
        };
        f(&mut group)
    }

    fn add(&mut self, method: Method, path: &str, handler: Node) -> Result<&mut Route, RouteError> {
        self.insert(method, path, handler, Vec::new())
    }

    fn insert(
        &mut self,
        method: Method,
        path: &str,
        handler: Node,
        middleware: Vec<Node>,
    ) -> Result<&mut Route, RouteError> {
        let pattern = Pattern::parse(path);
        let shape = pattern.shape();
        for existing in self.routes.iter().filter(|r| r.method == method) {
            let same_shape = existing.pattern.shape() == shape;
            if same_shape || existing.pattern.overlaps(&pattern) {
                let (method, path, existing) =
                    (method.clone(), path.to_owned(), existing.path.clone());
                return Err(if same_shape {
                    RouteError::Duplicate { method, path, existing }
                } else {
                    RouteError::Conflict { method, path, existing }
                });
            }
        }

        tracing::debug!(method = %method, path, "route registered");
        self.routes.push(Route {
            method,
            path: path.to_owned(),
            pattern,
            handler,
            middleware,
        });
        let last = self.routes.len() - 1;
        Ok(&mut self.routes[last])
    }

    /// Matches `method` and `path` against the table.
    ///
    /// Registration rejects overlapping routes, so at most one route per method
    /// matches any path.
    pub fn lookup(&self, method: &Method, path: &str) -> Lookup<'_> {
        let mut allowed = Vec::new();
        for route in &self.routes {
            if let Some(params) = route.pattern.matches(path) {
                if &route.method == method {
                    return Lookup::Found { route, params };
                }
                if !allowed.contains(&route.method) {
                    allowed.push(route.method.clone());
                }
            }
        }

        if allowed.is_empty() {
            Lookup::NotFound
        } else {
            Lookup::MethodNotAllowed { allowed }
        }
    }

    /// All registered routes in registration order.
    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

/// Routes sharing a path prefix and leading middleware. Created by [`Router::group`].
pub struct Group<'r> {
    router: &'r mut Router,
    prefix: String,
    middleware: Vec<Node>,
}

impl Group<'_> {
    method_helpers! {
        /// Registers a `GET` route under the group prefix.
        get => Method::Get;
        /// Registers a `POST` route under the group prefix.
        post => Method::Post;
        /// Registers a `PUT` route under the group prefix.
        put => Method::Put;
        /// Registers a `PATCH` route under the group prefix.
        patch => Method::Patch;
        /// Registers a `DELETE` route under the group prefix.
        delete => Method::Delete;
        /// Registers an `OPTIONS` route under the group prefix.
        options => Method::Options;
        /// Registers a `HEAD` route under the group prefix.
        head => Method::Head;
    }

    /// A nested group: prefixes and middleware accumulate.
    pub fn group<F>(&mut self, prefix: &str, middleware: Vec<Node>, f: F) -> Result<(), RouteError>
    where
        F: FnOnce(&mut Group<'_>) -> Result<(), RouteError>,
    {
        let mut nested = Group {
            router: &mut *self.router,
            prefix: join(&self.prefix, prefix),
            middleware: self.middleware.iter().cloned().chain(middleware).collect(),
        };
        f(&mut nested)
    }

    fn add(&mut self, method: Method, path: &str, handler: Node) -> Result<&mut Route, RouteError> {
        let full = join(&self.prefix, path);
        self.router
            .insert(method, &full, handler, self.middleware.clone())
    }
}

// Joins two path pieces with exactly one `/` between them; never ends in `/`
// unless the result is the root.
fn join(prefix: &str, path: &str) -> String {
    let prefix = prefix.trim_end_matches('/');
    let path = path.trim_start_matches('/');
    let joined = match (prefix.is_empty(), path.is_empty()) {
        (true, true) => "/".to_string(),
        (true, false) => format!("/{path}"),
        (false, true) => prefix.to_string(),
        (false, false) => format!("{prefix}/{path}"),
    };
    let joined = if joined.starts_with('/') {
        joined
    } else {
        format!("/{joined}")
    };
    trim_trailing_slash(&joined).to_string()
}
