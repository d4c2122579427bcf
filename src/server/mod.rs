//! Async TCP server using Tokio.
//!
//! Accepts TCP connections and feeds each HTTP/1.1 request to an [`App`].
//! Supports HTTP/1.1 persistent connections (keep-alive) out of the box.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::BytesMut;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};

use crate::app::{App, Outcome};
use crate::http::{
    StatusCode,
    request::{Request, RequestError},
    response::Response,
};

/// Errors produced by the server.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to bind to {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
}

/// Bytes buffered for a single request beyond the upload limit before the
/// connection is refused with 413.
const HEADER_ALLOWANCE: usize = 64 * 1024;

/// Initial read buffer capacity per connection.
const INITIAL_BUF_SIZE: usize = 4096;

/// The condor HTTP server.
///
/// # Examples
///
/// ```rust,no_run
/// use condor::app::App;
/// use condor::config::Config;
/// use condor::server::Server;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let config = Config::from_env()?;
///     let addr = config.http.addr();
///     let mut builder = App::builder(config);
///     builder
///         .router()
///         .get("/", |ctx| Box::pin(async move { ctx.response().text("Hello!"); }))?;
///     let app = builder.build()?;
///
///     Server::bind(addr).await?.serve(app).await?;
///     Ok(())
/// }
/// ```
pub struct Server {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl Server {
    /// Binds the server to the given TCP address.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Bind`] if the address cannot be bound
    /// (e.g. port already in use, insufficient permissions).
    pub async fn bind(addr: impl AsRef<str>) -> Result<Self, ServerError> {
        let addr = addr.as_ref();
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::Bind {
                addr: addr.to_owned(),
                source: e,
            })?;
        let local_addr = listener.local_addr()?;
        Ok(Self {
            listener,
            local_addr,
        })
    }

    /// Returns the local address the server is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Starts accepting connections and dispatching their requests to `app`.
    ///
    /// The app is shared across all spawned Tokio tasks. This method runs until
    /// the process is terminated or an unrecoverable listener error occurs.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Io`] if the TCP listener itself fails.
    pub async fn serve(self, app: App) -> Result<(), ServerError> {
        let app = Arc::new(app);
        info!(address = %self.local_addr, "condor listening");

        loop {
            let (stream, peer_addr) = match self.listener.accept().await {
                Ok(pair) => pair,
                Err(e) => {
                    error!(error = %e, "failed to accept connection");
                    continue;
                }
            };

            debug!(peer = %peer_addr, "connection accepted");
            let app = Arc::clone(&app);

            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, peer_addr, app).await {
                    warn!(peer = %peer_addr, error = %e, "connection closed with error");
                }
            });
        }
    }
}

/// Handles a single TCP connection over its lifetime.
///
/// HTTP/1.1 connections are persistent by default: we loop, serving every
/// complete request already buffered before reading more, until the peer
/// closes the connection, signals `Connection: close`, or a request is
/// cancelled.
async fn handle_connection(
    mut stream: TcpStream,
    peer_addr: SocketAddr,
    app: Arc<App>,
) -> Result<(), std::io::Error> {
    let max_request_size = app.config().max_upload_size.saturating_add(HEADER_ALLOWANCE);
    let mut buf = BytesMut::with_capacity(INITIAL_BUF_SIZE);

    loop {
        let ready = match Request::parse(&buf) {
            Ok((request, body_offset)) => {
                // Wait for the full body to arrive if Content-Length is set.
                let total_needed = body_offset + request.content_length().unwrap_or(0);
                (buf.len() >= total_needed).then_some((request, total_needed))
            }
            Err(RequestError::Incomplete) => None,
            Err(e) => {
                warn!(peer = %peer_addr, error = %e, "bad request, sending 400");
                let response = Response::new(StatusCode::BadRequest)
                    .body(format!("Bad Request: {e}"))
                    .keep_alive(false);
                stream.write_all(&response.into_bytes()).await?;
                break;
            }
        };

        let Some((request, total_needed)) = ready else {
            if stream.read_buf(&mut buf).await? == 0 {
                debug!(peer = %peer_addr, "connection closed by peer");
                break;
            }
            if buf.len() > max_request_size {
                warn!(peer = %peer_addr, "request too large, sending 413");
                let response = Response::json(
                    StatusCode::PayloadTooLarge,
                    r#"{"message": "request entity too large"}"#,
                )
                .keep_alive(false);
                stream.write_all(&response.into_bytes()).await?;
                break;
            }
            continue;
        };

        let keep_alive = request.is_keep_alive();

        let response = match app.dispatch(request).await {
            Outcome::Responded(response) => response.keep_alive(keep_alive),
            Outcome::Cancelled => {
                debug!(peer = %peer_addr, "request cancelled, closing connection");
                break;
            }
        };
        stream.write_all(&response.into_bytes()).await?;
        stream.flush().await?;

        let _ = buf.split_to(total_needed);

        if !keep_alive {
            debug!(peer = %peer_addr, "Connection: close, shutting down");
            break;
        }
    }

    Ok(())
}
