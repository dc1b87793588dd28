//! # chillhttp
//!
//! A minimal HTTP/1.1 message engine: an incremental request parser, an
//! order-enforcing response writer with chunked transfer-encoding and
//! trailers, and a Tokio accept loop that hands each connection's request
//! to an application [`Handler`].
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use chillhttp::http::{Request, ResponseWriter, StatusCode, default_headers};
//! use chillhttp::server::{Handler, serve};
//! use tokio::io::AsyncWrite;
//!
//! struct Hello;
//!
//! impl Handler for Hello {
//!     async fn handle<W>(&self, _req: Request, w: &mut ResponseWriter<W>)
//!     where
//!         W: AsyncWrite + Unpin + Send,
//!     {
//!         let body = b"Hello, World!";
//!         let _ = w.write_status_line(StatusCode::OK).await;
//!         let _ = w.write_headers(&default_headers(body.len())).await;
//!         let _ = w.write_body(body).await;
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let server = serve(42069, Hello).await?;
//!     println!("Listening on http://{}", server.local_addr());
//!     tokio::signal::ctrl_c().await?;
//!     server.close().await?;
//!     Ok(())
//! }
//! ```

pub mod http;
pub mod server;

// ── Convenience re-exports ────────────────────────────────────────────────────
pub use http::{Headers, Method, ParseError, Request, ResponseWriter, StatusCode, WriteError};
pub use server::{Handler, Server, ServerConfig, ServerError, ServerHandle, serve};
