//! # condor
//!
//! A small async web-application framework on a from-scratch HTTP/1.1 server.
//!
//! Every request gets its own [`Context`] and walks an ordered chain of global
//! middleware, route middleware and the route handler. Each node decides
//! whether to continue with [`Context::next`]. Panics anywhere in the chain are
//! caught once and turned into a 500 response.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use condor::{App, Config, Server};
//! use condor::middleware::LoggerMiddleware;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::from_env()?;
//!     condor::logging::init(&config.log)?;
//!     let addr = config.http.addr();
//!
//!     let mut builder = App::builder(config);
//!     builder.attach_middleware(LoggerMiddleware);
//!     builder.router().get("/hello/:name", |ctx| {
//!         Box::pin(async move {
//!             let name = ctx.request().path_param("name").unwrap_or("world").to_owned();
//!             ctx.response().text(format!("Hello, {name}!"));
//!         })
//!     })?;
//!
//!     Server::bind(addr).await?.serve(builder.build()?).await?;
//!     Ok(())
//! }
//! ```

pub mod app;
pub mod auth;
pub mod cache;
pub mod config;
pub mod context;
pub mod events;
pub mod hashing;
pub mod http;
pub mod jwt;
pub mod logging;
pub mod mail;
pub mod middleware;
pub mod router;
pub mod security;
pub mod server;
pub mod services;
pub mod sessions;
pub mod validation;

pub use app::{App, AppBuilder, Outcome, SetupError};
pub use config::Config;
pub use context::Context;
pub use events::Event;
pub use http::{Headers, Method, Request, Response, StatusCode};
pub use middleware::{BoxFuture, Node, node};
pub use router::Router;
pub use server::{Server, ServerError};
