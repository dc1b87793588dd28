//! Async TCP server using Tokio.
//!
//! Accepts TCP connections and dispatches one HTTP/1.1 request per connection
//! to a [`Handler`]. Every connection runs on its own Tokio task and is closed
//! once its response has been written; there is no keep-alive.
//!
//! Reads are not subject to timeouts, so a peer that stops sending keeps its
//! task alive until it disconnects.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::http::request::{DEFAULT_BUFFER_SIZE, MAX_REQUEST_SIZE, read_request};
use crate::http::{ReadBuffer, Request, ResponseWriter, StatusCode, WriterState, default_headers};

/// Errors produced by the server.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to bind listener to {addr}: {source}")]
    Listener {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("accept loop terminated abnormally: {0}")]
    AcceptLoop(#[from] tokio::task::JoinError),
}

/// Application callback invoked once per parsed request.
///
/// The handler owns the [`Request`] and drives the [`ResponseWriter`] to emit
/// the response. Errors are the handler's business: it reports them by
/// writing an appropriate status and body. If it returns without writing a
/// status line at all, the server answers `500 Internal Server Error`.
///
/// # Examples
///
/// ```rust,no_run
/// use chillhttp::http::{Request, ResponseWriter, StatusCode, default_headers};
/// use chillhttp::server::Handler;
/// use tokio::io::AsyncWrite;
///
/// struct Hello;
///
/// impl Handler for Hello {
///     async fn handle<W>(&self, _req: Request, w: &mut ResponseWriter<W>)
///     where
///         W: AsyncWrite + Unpin + Send,
///     {
///         let body = b"Hello, World!";
///         let _ = w.write_status_line(StatusCode::OK).await;
///         let _ = w.write_headers(&default_headers(body.len())).await;
///         let _ = w.write_body(body).await;
///     }
/// }
/// ```
pub trait Handler: Send + Sync + 'static {
    fn handle<W>(
        &self,
        request: Request,
        writer: &mut ResponseWriter<W>,
    ) -> impl Future<Output = ()> + Send
    where
        W: AsyncWrite + Unpin + Send;
}

/// Per-connection buffer limits.
///
/// Deserializable so it can be loaded from a JSON file; missing fields take
/// their defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Initial read buffer capacity per connection. The buffer doubles when full.
    pub initial_buffer_size: usize,
    /// Maximum number of bytes read for one request before it is rejected.
    pub max_request_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            initial_buffer_size: DEFAULT_BUFFER_SIZE,
            max_request_size: MAX_REQUEST_SIZE,
        }
    }
}

impl ServerConfig {
    #[must_use]
    pub fn with_initial_buffer_size(mut self, size: usize) -> Self {
        self.initial_buffer_size = size;
        self
    }

    #[must_use]
    pub fn with_max_request_size(mut self, size: usize) -> Self {
        self.max_request_size = size;
        self
    }
}

/// A bound, not yet running HTTP server.
///
/// # Examples
///
/// ```rust,no_run
/// # use chillhttp::http::{Request, ResponseWriter};
/// # use chillhttp::server::{Handler, Server};
/// # use tokio::io::AsyncWrite;
/// # struct App;
/// # impl Handler for App {
/// #     async fn handle<W: AsyncWrite + Unpin + Send>(&self, _: Request, _: &mut ResponseWriter<W>) {}
/// # }
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let server = Server::bind("127.0.0.1:42069").await?;
///     let handle = server.serve(App);
///     tokio::signal::ctrl_c().await?;
///     handle.close().await?;
///     Ok(())
/// }
/// ```
pub struct Server {
    listener: TcpListener,
    local_addr: SocketAddr,
    config: ServerConfig,
}

impl Server {
    /// Binds the server to the given TCP address.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Listener`] if the address cannot be bound
    /// (e.g. port already in use, insufficient permissions).
    pub async fn bind(addr: impl AsRef<str>) -> Result<Self, ServerError> {
        let addr = addr.as_ref();
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::Listener {
                addr: addr.to_owned(),
                source: e,
            })?;
        let local_addr = listener.local_addr()?;
        Ok(Self {
            listener,
            local_addr,
            config: ServerConfig::default(),
        })
    }

    #[must_use]
    pub fn with_config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    /// Returns the local address the server is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Spawns the accept loop and returns immediately.
    ///
    /// The returned [`ServerHandle`] stops the server when
    /// [`closed`](ServerHandle::close) or dropped.
    pub fn serve<H: Handler>(self, handler: H) -> ServerHandle {
        let closed = Arc::new(AtomicBool::new(false));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let accept_loop = tokio::spawn(accept_loop(
            self.listener,
            self.local_addr,
            self.config,
            Arc::new(handler),
            Arc::clone(&closed),
            shutdown_rx,
        ));

        ServerHandle {
            local_addr: self.local_addr,
            closed,
            shutdown: shutdown_tx,
            accept_loop,
        }
    }
}

/// Binds `0.0.0.0:<port>` and starts serving `handler` in the background.
///
/// # Errors
///
/// Returns [`ServerError::Listener`] if the port cannot be bound.
pub async fn serve<H: Handler>(port: u16, handler: H) -> Result<ServerHandle, ServerError> {
    let server = Server::bind(format!("0.0.0.0:{port}")).await?;
    Ok(server.serve(handler))
}

/// Control handle for a running server.
#[derive(Debug)]
pub struct ServerHandle {
    local_addr: SocketAddr,
    closed: Arc<AtomicBool>,
    shutdown: watch::Sender<bool>,
    accept_loop: JoinHandle<()>,
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Stops accepting connections and closes the listening socket.
    ///
    /// Returns once the listener is closed. Connections that were already
    /// accepted keep running until their response is written.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::AcceptLoop`] if the accept loop panicked.
    pub async fn close(self) -> Result<(), ServerError> {
        self.closed.store(true, Ordering::Release);
        // Err only means the loop is already gone.
        let _ = self.shutdown.send(true);
        self.accept_loop.await?;
        Ok(())
    }
}

async fn accept_loop<H: Handler>(
    listener: TcpListener,
    local_addr: SocketAddr,
    config: ServerConfig,
    handler: Arc<H>,
    closed: Arc<AtomicBool>,
    mut shutdown: watch::Receiver<bool>,
) {
    info!(address = %local_addr, "chillhttp listening");

    loop {
        let accepted = tokio::select! {
            biased;
            // Fires on close() and when the handle is dropped.
            _ = shutdown.changed() => break,
            accepted = listener.accept() => accepted,
        };

        let (stream, peer_addr) = match accepted {
            Ok(pair) => pair,
            Err(e) => {
                error!(error = %e, "failed to accept connection");
                continue;
            }
        };

        if closed.load(Ordering::Acquire) {
            debug!(peer = %peer_addr, "server closed, dropping connection");
            continue;
        }

        debug!(peer = %peer_addr, "connection accepted");
        let handler = Arc::clone(&handler);

        tokio::spawn(async move {
            serve_connection(stream, peer_addr, handler.as_ref(), config).await;
        });
    }

    closed.store(true, Ordering::Release);
    drop(listener);
    info!(address = %local_addr, "chillhttp stopped listening");
}

/// Runs the read → parse → handle → write pipeline for one connection.
///
/// Parse failures are answered with `400 Bad Request`. The stream is shut
/// down on every normal exit; if the handler panics, the task unwinds and
/// dropping the stream closes it.
pub(crate) async fn serve_connection<S, H>(
    mut stream: S,
    peer_addr: SocketAddr,
    handler: &H,
    config: ServerConfig,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send,
    H: Handler,
{
    let mut buf = ReadBuffer::new(config.initial_buffer_size, config.max_request_size);

    match read_request(&mut stream, &mut buf).await {
        Ok(request) => {
            debug!(
                peer = %peer_addr,
                method = %request.method(),
                target = %request.target(),
                "dispatching request"
            );

            let mut writer = ResponseWriter::new(&mut stream);
            handler.handle(request, &mut writer).await;

            match writer.state() {
                WriterState::Done => {}
                WriterState::AwaitingStatusLine => {
                    warn!(peer = %peer_addr, "handler wrote no response, sending 500");
                    write_status_only(&mut writer, StatusCode::INTERNAL_SERVER_ERROR, peer_addr)
                        .await;
                }
                state => {
                    warn!(peer = %peer_addr, ?state, "handler left the response unfinished");
                }
            }
        }
        Err(e) => {
            warn!(peer = %peer_addr, error = %e, "bad request, sending 400");
            let mut writer = ResponseWriter::new(&mut stream);
            write_status_only(&mut writer, StatusCode::BAD_REQUEST, peer_addr).await;
        }
    }

    if let Err(e) = stream.shutdown().await {
        debug!(peer = %peer_addr, error = %e, "shutdown failed");
    }
    debug!(peer = %peer_addr, "connection closed");
}

// Best effort: the peer may already be gone.
async fn write_status_only<W>(writer: &mut ResponseWriter<W>, status: StatusCode, peer_addr: SocketAddr)
where
    W: AsyncWrite + Unpin,
{
    let result = async {
        writer.write_status_line(status).await?;
        writer.write_headers(&default_headers(0)).await?;
        writer.write_body(&[]).await
    }
    .await;

    if let Err(e) = result {
        debug!(peer = %peer_addr, error = %e, "failed to write {status} response");
    }
}
