//! HTTP/1.1 response serialization.
//!
//! [`ResponseWriter`] streams a response onto any [`AsyncWrite`] in the only
//! order HTTP allows: status line, headers, then either a fixed-length body
//! or a sequence of chunks optionally followed by trailers. Calls made out of
//! that order are rejected with [`WriteError::InvalidWriterState`] and write
//! nothing.

use bytes::{BufMut, BytesMut};
use thiserror::Error;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use super::{HTTP_VERSION, Headers, StatusCode};

/// Errors produced while writing a response.
#[derive(Debug, Error)]
pub enum WriteError {
    #[error("invalid writer state: expected {expected:?}, currently {actual:?}")]
    InvalidWriterState {
        expected: WriterState,
        actual: WriterState,
    },

    #[error("trailer {0:?} was not declared in the Trailer header")]
    UndeclaredTrailer(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Progress of a [`ResponseWriter`]. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriterState {
    AwaitingStatusLine,
    AwaitingHeaders,
    AwaitingBody,
    /// The terminal chunk has been written and a `Trailer` header was declared.
    AwaitingTrailers,
    Done,
}

/// Baseline response headers for a plain-text body of `content_len` bytes.
///
/// Callers override or remove entries as needed, e.g. replacing
/// `Content-Length` with `Transfer-Encoding: chunked`.
///
/// # Examples
///
/// ```
/// use chillhttp::http::default_headers;
///
/// let headers = default_headers(12);
/// assert_eq!(headers.get("content-type"), Some("text/plain"));
/// assert_eq!(headers.get("content-length"), Some("12"));
/// assert_eq!(headers.get("connection"), Some("close"));
/// ```
pub fn default_headers(content_len: usize) -> Headers {
    let mut headers = Headers::with_capacity(3);
    headers.insert("Content-Type", "text/plain");
    headers.insert("Content-Length", content_len.to_string());
    headers.insert("Connection", "close");
    headers
}

/// Writes one HTTP/1.1 response onto `W`, enforcing message order.
///
/// # Examples
///
/// ```
/// use chillhttp::http::{ResponseWriter, StatusCode, default_headers};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let mut w = ResponseWriter::new(Vec::new());
/// w.write_status_line(StatusCode::OK).await?;
/// w.write_headers(&default_headers(5)).await?;
/// w.write_body(b"hello").await?;
///
/// let wire = String::from_utf8(w.into_inner())?;
/// assert!(wire.starts_with("HTTP/1.1 200 OK\r\n"));
/// assert!(wire.ends_with("\r\n\r\nhello"));
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct ResponseWriter<W> {
    writer: W,
    state: WriterState,
    // Names listed in the `Trailer` header, if one was written.
    declared_trailers: Option<Vec<String>>,
}

impl<W> ResponseWriter<W>
where
    W: AsyncWrite + Unpin,
{
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            state: WriterState::AwaitingStatusLine,
            declared_trailers: None,
        }
    }

    pub fn state(&self) -> WriterState {
        self.state
    }

    /// Returns a reference to the underlying writer.
    pub fn get_ref(&self) -> &W {
        &self.writer
    }

    /// Consumes the response writer, returning the underlying writer.
    pub fn into_inner(self) -> W {
        self.writer
    }

    /// Writes `HTTP/1.1 <code> <reason>\r\n`.
    ///
    /// Codes without a known reason phrase are written with an empty one.
    pub async fn write_status_line(&mut self, status: StatusCode) -> Result<(), WriteError> {
        self.ensure_state(WriterState::AwaitingStatusLine)?;

        let line = format!(
            "{HTTP_VERSION} {} {}\r\n",
            status.as_u16(),
            status.canonical_reason()
        );
        self.writer.write_all(line.as_bytes()).await?;

        self.state = WriterState::AwaitingHeaders;
        Ok(())
    }

    /// Writes every header as `Name: Value\r\n`, then the blank separator line.
    ///
    /// A `Trailer` header declares which trailer names
    /// [`write_trailers`](Self::write_trailers) may send later.
    pub async fn write_headers(&mut self, headers: &Headers) -> Result<(), WriteError> {
        self.ensure_state(WriterState::AwaitingHeaders)?;

        let mut buf = BytesMut::with_capacity(64 + headers.len() * 64);
        put_fields(&mut buf, headers);
        self.writer.write_all(&buf).await?;

        self.declared_trailers = headers.get("trailer").map(|names| {
            names
                .split(',')
                .map(str::trim)
                .filter(|name| !name.is_empty())
                .map(str::to_owned)
                .collect()
        });
        self.state = WriterState::AwaitingBody;
        Ok(())
    }

    /// Writes a fixed-length body and finishes the response.
    ///
    /// The caller is responsible for having sent a matching `Content-Length`.
    pub async fn write_body(&mut self, body: &[u8]) -> Result<(), WriteError> {
        self.ensure_state(WriterState::AwaitingBody)?;

        self.writer.write_all(body).await?;
        self.finish().await
    }

    /// Writes one chunk: `<hex length>\r\n<data>\r\n`.
    ///
    /// May be called any number of times. An empty slice writes nothing, since
    /// a zero-length chunk would end the body.
    pub async fn write_chunked_body(&mut self, data: &[u8]) -> Result<(), WriteError> {
        self.ensure_state(WriterState::AwaitingBody)?;
        if data.is_empty() {
            return Ok(());
        }

        let mut buf = BytesMut::with_capacity(data.len() + 20);
        buf.put(format!("{:x}\r\n", data.len()).as_bytes());
        buf.put(data);
        buf.put(&b"\r\n"[..]);
        self.writer.write_all(&buf).await?;
        Ok(())
    }

    /// Writes the terminal zero-length chunk.
    ///
    /// If the headers declared a `Trailer`, only `0\r\n` is written and the
    /// writer waits for [`write_trailers`](Self::write_trailers). Otherwise the
    /// final blank line follows immediately and the response is done.
    pub async fn write_chunked_body_done(&mut self) -> Result<(), WriteError> {
        self.ensure_state(WriterState::AwaitingBody)?;

        if self.declared_trailers.is_some() {
            self.writer.write_all(b"0\r\n").await?;
            self.state = WriterState::AwaitingTrailers;
            Ok(())
        } else {
            self.writer.write_all(b"0\r\n\r\n").await?;
            self.finish().await
        }
    }

    /// Writes trailer fields followed by the final blank line.
    ///
    /// # Errors
    ///
    /// [`WriteError::UndeclaredTrailer`] if a name is missing from the
    /// `Trailer` header sent with the response headers. Nothing is written in
    /// that case.
    pub async fn write_trailers(&mut self, trailers: &Headers) -> Result<(), WriteError> {
        self.ensure_state(WriterState::AwaitingTrailers)?;

        let declared = self.declared_trailers.as_deref().unwrap_or_default();
        if let Some((name, _)) = trailers
            .iter()
            .find(|(name, _)| !declared.iter().any(|d| d.eq_ignore_ascii_case(name)))
        {
            return Err(WriteError::UndeclaredTrailer(name.to_owned()));
        }

        let mut buf = BytesMut::with_capacity(32 + trailers.len() * 64);
        put_fields(&mut buf, trailers);
        self.writer.write_all(&buf).await?;
        self.finish().await
    }

    async fn finish(&mut self) -> Result<(), WriteError> {
        self.writer.flush().await?;
        self.state = WriterState::Done;
        Ok(())
    }

    fn ensure_state(&self, expected: WriterState) -> Result<(), WriteError> {
        if self.state == expected {
            Ok(())
        } else {
            Err(WriteError::InvalidWriterState {
                expected,
                actual: self.state,
            })
        }
    }
}

fn put_fields(buf: &mut BytesMut, fields: &Headers) {
    for (name, value) in fields.iter() {
        buf.put(format!("{name}: {value}\r\n").as_bytes());
    }
    buf.put(&b"\r\n"[..]);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wire(w: ResponseWriter<Vec<u8>>) -> String {
        String::from_utf8(w.into_inner()).unwrap()
    }

    fn chunked_headers(trailer: Option<&str>) -> Headers {
        let mut h = default_headers(0);
        h.remove("content-length");
        h.insert("Transfer-Encoding", "chunked");
        if let Some(names) = trailer {
            h.insert("Trailer", names);
        }
        h
    }

    #[tokio::test]
    async fn simple_ok_response() {
        let mut w = ResponseWriter::new(Vec::new());
        w.write_status_line(StatusCode::OK).await.unwrap();
        w.write_headers(&default_headers(5)).await.unwrap();
        w.write_body(b"Hello").await.unwrap();
        assert_eq!(w.state(), WriterState::Done);
        assert_eq!(
            wire(w),
            "HTTP/1.1 200 OK\r\n\
             Content-Type: text/plain\r\n\
             Content-Length: 5\r\n\
             Connection: close\r\n\
             \r\n\
             Hello"
        );
    }

    #[tokio::test]
    async fn status_line_reasons() {
        for (code, line) in [
            (StatusCode::OK, "HTTP/1.1 200 OK\r\n"),
            (StatusCode::BAD_REQUEST, "HTTP/1.1 400 Bad Request\r\n"),
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "HTTP/1.1 500 Internal Server Error\r\n",
            ),
            (StatusCode::from(404), "HTTP/1.1 404 \r\n"),
        ] {
            let mut w = ResponseWriter::new(Vec::new());
            w.write_status_line(code).await.unwrap();
            assert_eq!(w.state(), WriterState::AwaitingHeaders);
            assert_eq!(wire(w), line);
        }
    }

    #[tokio::test]
    async fn headers_before_status_line_rejected() {
        let mut w = ResponseWriter::new(Vec::new());
        let err = w.write_headers(&default_headers(0)).await.unwrap_err();
        assert!(matches!(
            err,
            WriteError::InvalidWriterState {
                expected: WriterState::AwaitingHeaders,
                actual: WriterState::AwaitingStatusLine,
            }
        ));
        assert!(wire(w).is_empty());
    }

    #[tokio::test]
    async fn status_line_twice_rejected() {
        let mut w = ResponseWriter::new(Vec::new());
        w.write_status_line(StatusCode::OK).await.unwrap();
        assert!(w.write_status_line(StatusCode::OK).await.is_err());
        assert_eq!(w.state(), WriterState::AwaitingHeaders);
    }

    #[tokio::test]
    async fn body_before_headers_rejected() {
        let mut w = ResponseWriter::new(Vec::new());
        w.write_status_line(StatusCode::OK).await.unwrap();
        assert!(matches!(
            w.write_body(b"x").await,
            Err(WriteError::InvalidWriterState { .. })
        ));
    }

    #[tokio::test]
    async fn second_body_rejected() {
        let mut w = ResponseWriter::new(Vec::new());
        w.write_status_line(StatusCode::OK).await.unwrap();
        w.write_headers(&default_headers(2)).await.unwrap();
        w.write_body(b"ok").await.unwrap();
        let err = w.write_body(b"again").await.unwrap_err();
        assert!(matches!(
            err,
            WriteError::InvalidWriterState {
                actual: WriterState::Done,
                ..
            }
        ));
        assert!(wire(w).ends_with("\r\n\r\nok"));
    }

    #[tokio::test]
    async fn chunked_body_without_trailers() {
        let mut w = ResponseWriter::new(Vec::new());
        w.write_status_line(StatusCode::OK).await.unwrap();
        w.write_headers(&chunked_headers(None)).await.unwrap();
        let head_len = w.get_ref().len();

        w.write_chunked_body(b"abc").await.unwrap();
        assert_eq!(w.state(), WriterState::AwaitingBody);
        w.write_chunked_body_done().await.unwrap();
        assert_eq!(w.state(), WriterState::Done);

        let out = wire(w);
        assert_eq!(&out[head_len..], "3\r\nabc\r\n0\r\n\r\n");
    }

    #[tokio::test]
    async fn chunk_sizes_are_hex() {
        let mut w = ResponseWriter::new(Vec::new());
        w.write_status_line(StatusCode::OK).await.unwrap();
        w.write_headers(&chunked_headers(None)).await.unwrap();
        let head_len = w.get_ref().len();

        w.write_chunked_body(&[b'x'; 26]).await.unwrap();
        w.write_chunked_body(b"").await.unwrap();
        w.write_chunked_body(b"yz").await.unwrap();
        w.write_chunked_body_done().await.unwrap();

        let out = wire(w);
        let expected = format!("1a\r\n{}\r\n2\r\nyz\r\n0\r\n\r\n", "x".repeat(26));
        assert_eq!(&out[head_len..], expected);
    }

    #[tokio::test]
    async fn chunked_body_with_trailers() {
        let mut w = ResponseWriter::new(Vec::new());
        w.write_status_line(StatusCode::OK).await.unwrap();
        w.write_headers(&chunked_headers(Some("X-Content-SHA256, X-Content-Length")))
            .await
            .unwrap();
        let head_len = w.get_ref().len();

        w.write_chunked_body(b"hello").await.unwrap();
        w.write_chunked_body_done().await.unwrap();
        assert_eq!(w.state(), WriterState::AwaitingTrailers);

        // the body is finished, more chunks are refused
        assert!(w.write_chunked_body(b"late").await.is_err());

        let mut trailers = Headers::new();
        trailers.insert("X-Content-SHA256", "abc123");
        trailers.insert("X-Content-Length", "5");
        w.write_trailers(&trailers).await.unwrap();
        assert_eq!(w.state(), WriterState::Done);

        let out = wire(w);
        assert_eq!(
            &out[head_len..],
            "5\r\nhello\r\n0\r\nX-Content-SHA256: abc123\r\nX-Content-Length: 5\r\n\r\n"
        );
    }

    #[tokio::test]
    async fn undeclared_trailer_rejected() {
        let mut w = ResponseWriter::new(Vec::new());
        w.write_status_line(StatusCode::OK).await.unwrap();
        w.write_headers(&chunked_headers(Some("X-Checksum")))
            .await
            .unwrap();
        w.write_chunked_body_done().await.unwrap();

        let mut trailers = Headers::new();
        trailers.insert("X-Other", "1");
        let err = w.write_trailers(&trailers).await.unwrap_err();
        assert!(matches!(err, WriteError::UndeclaredTrailer(name) if name == "X-Other"));
        assert_eq!(w.state(), WriterState::AwaitingTrailers);

        // names are matched case-insensitively
        let mut trailers = Headers::new();
        trailers.insert("x-checksum", "1");
        w.write_trailers(&trailers).await.unwrap();
        assert_eq!(w.state(), WriterState::Done);
    }

    #[tokio::test]
    async fn trailers_without_declaration_rejected() {
        let mut w = ResponseWriter::new(Vec::new());
        w.write_status_line(StatusCode::OK).await.unwrap();
        w.write_headers(&chunked_headers(None)).await.unwrap();
        w.write_chunked_body_done().await.unwrap();
        assert!(matches!(
            w.write_trailers(&Headers::new()).await,
            Err(WriteError::InvalidWriterState {
                actual: WriterState::Done,
                ..
            })
        ));
    }

    #[test]
    fn default_headers_can_be_overridden() {
        let mut h = default_headers(10);
        h.insert("Content-Type", "text/html");
        assert_eq!(h.get("content-type"), Some("text/html"));
        assert_eq!(h.len(), 3);
        assert_eq!(
            h.iter().map(|(k, _)| k).collect::<Vec<_>>(),
            ["Content-Type", "Content-Length", "Connection"]
        );
    }
}
