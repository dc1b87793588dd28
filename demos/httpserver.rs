//! Demo server with a handful of routes.
//!
//! ```text
//! cargo run --example httpserver -- --port 42069
//! curl -v localhost:42069/yourproblem
//! curl --raw -v localhost:42069/httpbin/stream/5
//! ```

use std::future::Future;
use std::path::PathBuf;

use bytes::Bytes;
use chillhttp::http::{Headers, Request, ResponseWriter, StatusCode, default_headers};
use chillhttp::server::{Handler, Server, ServerConfig};
use clap::Parser;
use sha2::{Digest, Sha256};
use tokio::io::AsyncWrite;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(about = "chillhttp demo server")]
struct Args {
    /// Port to listen on.
    #[arg(short, long, default_value_t = 42069)]
    port: u16,

    /// JSON file with buffer limits.
    #[arg(long)]
    config: Option<PathBuf>,

    /// File served at /video.
    #[arg(long, default_value = "assets/vim.mp4")]
    video: PathBuf,

    /// Upstream that /httpbin/* is proxied to.
    #[arg(long, default_value = "https://httpbin.org")]
    upstream: String,
}

const OK_PAGE: &str = r#"<html>
  <head>
    <title>200 OK</title>
  </head>
  <body>
    <h1>Success!</h1>
    <p>Your request was an absolute banger.</p>
  </body>
</html>"#;

const BAD_REQUEST_PAGE: &str = r#"<html>
  <head>
    <title>400 Bad Request</title>
  </head>
  <body>
    <h1>Bad Request</h1>
    <p>Your request honestly kinda sucked.</p>
  </body>
</html>"#;

const SERVER_ERROR_PAGE: &str = r#"<html>
  <head>
    <title>500 Internal Server Error</title>
  </head>
  <body>
    <h1>Internal Server Error</h1>
    <p>Okay, you know what? This one is on me.</p>
  </body>
</html>"#;

struct Routes {
    video: PathBuf,
    upstream: String,
    client: reqwest::Client,
}

impl Handler for Routes {
    async fn handle<W>(&self, req: Request, w: &mut ResponseWriter<W>)
    where
        W: AsyncWrite + Unpin + Send,
    {
        let target = req.target();
        let result = if let Some(url) = upstream_url(&self.upstream, target) {
            self.proxy(url, w).await
        } else {
            match target {
                "/video" => self.serve_video(w).await,
                "/yourproblem" => html(w, StatusCode::BAD_REQUEST, BAD_REQUEST_PAGE).await,
                "/myproblem" => html(w, StatusCode::INTERNAL_SERVER_ERROR, SERVER_ERROR_PAGE).await,
                _ => html(w, StatusCode::OK, OK_PAGE).await,
            }
        };

        if let Err(e) = result {
            warn!(target = %target, error = %e, "failed to write response");
        }
    }
}

impl Routes {
    async fn serve_video<W>(&self, w: &mut ResponseWriter<W>) -> Result<(), chillhttp::WriteError>
    where
        W: AsyncWrite + Unpin + Send,
    {
        let video = match tokio::fs::read(&self.video).await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(path = %self.video.display(), error = %e, "video not found");
                return plain(w, StatusCode::INTERNAL_SERVER_ERROR, "Video not found\n").await;
            }
        };

        let mut headers = default_headers(video.len());
        headers.insert("Content-Type", "video/mp4");
        w.write_status_line(StatusCode::OK).await?;
        w.write_headers(&headers).await?;
        w.write_body(&video).await
    }

    /// Proxies to `url`, re-emitting the upstream body as chunks.
    async fn proxy<W>(&self, url: String, w: &mut ResponseWriter<W>) -> Result<(), chillhttp::WriteError>
    where
        W: AsyncWrite + Unpin + Send,
    {
        info!(url = %url, "proxying");

        let mut upstream = match self.client.get(&url).send().await {
            Ok(resp) => resp,
            Err(e) => {
                warn!(url = %url, error = %e, "upstream request failed");
                return plain(w, StatusCode::INTERNAL_SERVER_ERROR, "Proxy error\n").await;
            }
        };

        let mut headers = default_headers(0);
        headers.remove("content-length");
        headers.insert("Transfer-Encoding", "chunked");
        headers.insert("Trailer", "X-Content-SHA256, X-Content-Length");

        w.write_status_line(StatusCode::from(upstream.status().as_u16()))
            .await?;
        w.write_headers(&headers).await?;
        relay_chunks(&mut upstream, w).await
    }
}

/// Maps `/httpbin/<path>` onto `<upstream>/<path>`.
fn upstream_url(upstream: &str, target: &str) -> Option<String> {
    let path = target.strip_prefix("/httpbin/")?;
    Some(format!("{}/{}", upstream.trim_end_matches('/'), path))
}

/// A response body that arrives in pieces.
trait ChunkSource {
    fn next_chunk(&mut self) -> impl Future<Output = Result<Option<Bytes>, String>> + Send;
}

impl ChunkSource for reqwest::Response {
    async fn next_chunk(&mut self) -> Result<Option<Bytes>, String> {
        self.chunk().await.map_err(|e| e.to_string())
    }
}

/// Writes every chunk from `source`, then the terminal chunk and the
/// `X-Content-SHA256` / `X-Content-Length` trailers.
///
/// If the source fails partway, the chunked message is left unterminated
/// so the client sees a truncated response.
async fn relay_chunks<S, W>(source: &mut S, w: &mut ResponseWriter<W>) -> Result<(), chillhttp::WriteError>
where
    S: ChunkSource,
    W: AsyncWrite + Unpin + Send,
{
    let mut hasher = Sha256::new();
    let mut total = 0usize;
    loop {
        match source.next_chunk().await {
            Ok(Some(chunk)) => {
                hasher.update(&chunk);
                total += chunk.len();
                w.write_chunked_body(&chunk).await?;
            }
            Ok(None) => break,
            Err(e) => {
                warn!(error = %e, bytes_relayed = total, "upstream body read failed");
                return Ok(());
            }
        }
    }
    w.write_chunked_body_done().await?;

    let mut trailers = Headers::new();
    trailers.insert("X-Content-SHA256", format!("{:x}", hasher.finalize()));
    trailers.insert("X-Content-Length", total.to_string());
    w.write_trailers(&trailers).await
}

async fn html<W>(w: &mut ResponseWriter<W>, status: StatusCode, page: &str) -> Result<(), chillhttp::WriteError>
where
    W: AsyncWrite + Unpin + Send,
{
    let mut headers = default_headers(page.len());
    headers.insert("Content-Type", "text/html");
    w.write_status_line(status).await?;
    w.write_headers(&headers).await?;
    w.write_body(page.as_bytes()).await
}

async fn plain<W>(w: &mut ResponseWriter<W>, status: StatusCode, body: &str) -> Result<(), chillhttp::WriteError>
where
    W: AsyncWrite + Unpin + Send,
{
    w.write_status_line(status).await?;
    w.write_headers(&default_headers(body.len())).await?;
    w.write_body(body.as_bytes()).await
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "chillhttp=debug,httpserver=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let config = match &args.config {
        Some(path) => serde_json::from_str(&std::fs::read_to_string(path)?)?,
        None => ServerConfig::default(),
    };

    let routes = Routes {
        video: args.video,
        upstream: args.upstream,
        client: reqwest::Client::new(),
    };

    let server = Server::bind(format!("0.0.0.0:{}", args.port))
        .await?
        .with_config(config)
        .serve(routes);
    info!(address = %server.local_addr(), "server started");

    tokio::signal::ctrl_c().await?;
    info!("received shutdown signal, shutting down server");
    server.close().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use chillhttp::http::WriterState;

    use super::*;

    struct Scripted(VecDeque<Result<Option<Bytes>, String>>);

    impl ChunkSource for Scripted {
        async fn next_chunk(&mut self) -> Result<Option<Bytes>, String> {
            self.0.pop_front().unwrap_or(Ok(None))
        }
    }

    async fn chunked_writer() -> ResponseWriter<Vec<u8>> {
        let mut headers = Headers::new();
        headers.insert("Transfer-Encoding", "chunked");
        headers.insert("Trailer", "X-Content-SHA256, X-Content-Length");
        let mut w = ResponseWriter::new(Vec::new());
        w.write_status_line(StatusCode::OK).await.unwrap();
        w.write_headers(&headers).await.unwrap();
        w
    }

    #[test]
    fn only_httpbin_subpaths_are_proxied() {
        assert_eq!(
            upstream_url("https://httpbin.org", "/httpbin/stream/5").as_deref(),
            Some("https://httpbin.org/stream/5")
        );
        assert_eq!(
            upstream_url("http://127.0.0.1:8080/", "/httpbin/get?x=1").as_deref(),
            Some("http://127.0.0.1:8080/get?x=1")
        );
        assert_eq!(upstream_url("https://httpbin.org", "/httpbinfoo"), None);
        assert_eq!(upstream_url("https://httpbin.org", "/httpbin"), None);
    }

    #[tokio::test]
    async fn complete_body_gets_trailers() {
        let mut source = Scripted(VecDeque::from([
            Ok(Some(Bytes::from_static(b"abc"))),
            Ok(Some(Bytes::from_static(b"de"))),
        ]));
        let mut w = chunked_writer().await;
        relay_chunks(&mut source, &mut w).await.unwrap();
        assert_eq!(w.state(), WriterState::Done);

        let wire = String::from_utf8(w.into_inner()).unwrap();
        let sha = format!("{:x}", Sha256::digest(b"abcde"));
        assert!(
            wire.ends_with(&format!(
                "3\r\nabc\r\n2\r\nde\r\n0\r\nX-Content-SHA256: {sha}\r\nX-Content-Length: 5\r\n\r\n"
            )),
            "{wire}"
        );
    }

    #[tokio::test]
    async fn failed_upstream_leaves_body_unterminated() {
        let mut source = Scripted(VecDeque::from([
            Ok(Some(Bytes::from_static(b"abc"))),
            Err("connection reset".to_owned()),
        ]));
        let mut w = chunked_writer().await;
        relay_chunks(&mut source, &mut w).await.unwrap();
        assert_eq!(w.state(), WriterState::AwaitingBody);

        let wire = String::from_utf8(w.into_inner()).unwrap();
        assert!(wire.ends_with("\r\n\r\n3\r\nabc\r\n"), "{wire}");
        assert!(!wire.contains("X-Content-Length:"), "{wire}");
    }
}
