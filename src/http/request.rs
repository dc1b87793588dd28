//! Incremental HTTP/1.1 request parsing.
//!
//! [`RequestParser`] is a push parser: it is handed whatever bytes have
//! arrived so far and reports how many it consumed, so a caller can keep
//! the unconsumed tail and retry once the socket delivers more.
//! [`read_request`] is the async driver that does exactly that over any
//! [`AsyncRead`].

use std::str;

use bytes::{Buf, Bytes, BytesMut};
use serde::de::DeserializeOwned;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};

use super::headers::find_crlf;
use super::{HTTP_VERSION, Headers, Method};

/// Initial read buffer capacity per connection.
pub const DEFAULT_BUFFER_SIZE: usize = 4096;

/// Maximum number of bytes read for a single request before rejecting it (8 MiB).
pub const MAX_REQUEST_SIZE: usize = 8 * 1024 * 1024;

/// Errors that can occur while reading and parsing an HTTP/1.1 request.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("malformed request line: {line:?}")]
    MalformedRequestLine { line: String },

    #[error("invalid method {0:?}: must consist of uppercase ASCII letters")]
    InvalidMethod(String),

    #[error("unsupported HTTP version {0:?}")]
    UnsupportedVersion(String),

    #[error("malformed header: {reason}")]
    MalformedHeader { reason: String },

    #[error("invalid Content-Length {0:?}")]
    InvalidContentLength(String),

    #[error("body of {received} bytes exceeds declared Content-Length of {declared}")]
    BodyOverflow { declared: usize, received: usize },

    #[error("stream ended before the request was complete")]
    IncompleteRequest,

    #[error("parser already produced a complete request")]
    ParserAlreadyComplete,

    #[error("request exceeds maximum allowed size of {max_bytes} bytes")]
    RequestTooLarge { max_bytes: usize },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ParseError {
    pub fn malformed_header<S: ToString>(reason: S) -> Self {
        Self::MalformedHeader {
            reason: reason.to_string(),
        }
    }

    fn malformed_request_line(line: &str) -> Self {
        Self::MalformedRequestLine {
            line: line.to_owned(),
        }
    }
}

/// Progress of a [`RequestParser`]. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParserState {
    AwaitingRequestLine,
    AwaitingHeaders,
    AwaitingBody,
    Complete,
}

/// The first line of a request: `<method> <target> <version>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestLine {
    pub method: Method,
    pub target: String,
    pub version: String,
}

impl RequestLine {
    /// Parses a request line without its trailing CRLF.
    ///
    /// Nothing is produced unless every field validates.
    fn parse(raw: &[u8]) -> Result<Self, ParseError> {
        let line = str::from_utf8(raw)
            .map_err(|_| ParseError::malformed_request_line(&String::from_utf8_lossy(raw)))?;

        let parts: Vec<&str> = line.split(' ').collect();
        let &[method, target, version] = parts.as_slice() else {
            return Err(ParseError::malformed_request_line(line));
        };

        if method.is_empty() || !method.bytes().all(|b| b.is_ascii_uppercase()) {
            return Err(ParseError::InvalidMethod(method.to_owned()));
        }
        if target.is_empty() {
            return Err(ParseError::malformed_request_line(line));
        }
        if version != HTTP_VERSION {
            return Err(ParseError::UnsupportedVersion(version.to_owned()));
        }

        Ok(Self {
            method: method.parse().unwrap_or_else(|never| match never {}),
            target: target.to_owned(),
            version: version.to_owned(),
        })
    }
}

/// A fully parsed HTTP/1.1 request.
///
/// Produced by [`RequestParser::into_request`], [`Request::parse`] or
/// [`read_request`] once the parser reached [`ParserState::Complete`].
///
/// # Examples
///
/// ```
/// use chillhttp::http::{Method, Request};
///
/// let raw = b"GET /hello?name=world HTTP/1.1\r\nHost: localhost\r\n\r\n";
/// let request = Request::parse(raw).unwrap();
///
/// assert_eq!(request.method(), &Method::Get);
/// assert_eq!(request.path(), "/hello");
/// assert_eq!(request.query_string(), Some("name=world"));
/// assert_eq!(request.headers().get("host"), Some("localhost"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    line: RequestLine,
    headers: Headers,
    body: Bytes,
}

impl Request {
    /// Parses a request that is entirely contained in `buf`.
    ///
    /// Bytes after the header block are ignored only when the request has no
    /// `Content-Length`. With one, the body must end exactly at the end of
    /// `buf`; anything more is a [`ParseError::BodyOverflow`].
    ///
    /// # Errors
    ///
    /// Any [`ParseError`] from the parser, or [`ParseError::IncompleteRequest`]
    /// if `buf` ends before the request does.
    pub fn parse(buf: &[u8]) -> Result<Self, ParseError> {
        let mut parser = RequestParser::new();
        parser.parse(buf)?;
        parser.into_request()
    }

    /// Returns the request line.
    pub fn line(&self) -> &RequestLine {
        &self.line
    }

    /// Returns the HTTP method.
    pub fn method(&self) -> &Method {
        &self.line.method
    }

    /// Returns the raw request target, including any query string.
    pub fn target(&self) -> &str {
        &self.line.target
    }

    /// Returns the protocol version string (always `HTTP/1.1`).
    pub fn version(&self) -> &str {
        &self.line.version
    }

    /// Returns the request target without the query string.
    pub fn path(&self) -> &str {
        match self.line.target.split_once('?') {
            Some((path, _)) => path,
            None => &self.line.target,
        }
    }

    /// Returns the raw query string (without the leading `?`), if any.
    pub fn query_string(&self) -> Option<&str> {
        self.line.target.split_once('?').map(|(_, q)| q)
    }

    /// Returns the request headers. Names are stored lowercase.
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Returns the request body bytes.
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Returns the value of the `Content-Length` header parsed as a `usize`, if present.
    pub fn content_length(&self) -> Option<usize> {
        self.headers.get("content-length")?.parse().ok()
    }

    /// Deserializes the body as JSON.
    pub fn json<T>(&self) -> Result<T, serde_json::Error>
    where
        T: DeserializeOwned,
    {
        serde_json::from_slice(&self.body)
    }
}

/// Incremental request parser.
///
/// Call [`feed`](Self::feed) (one state step) or [`parse`](Self::parse)
/// (as many steps as the input allows) with the unconsumed tail of the
/// input, drop the consumed prefix, and repeat with more bytes until
/// [`is_complete`](Self::is_complete) returns `true`. The result does not
/// depend on how the input was split across calls.
///
/// # Examples
///
/// ```
/// use chillhttp::http::{ParserState, RequestParser};
///
/// let mut parser = RequestParser::new();
/// assert_eq!(parser.parse(b"POST /submit HTTP/1.1\r\nContent-").unwrap(), 23);
/// assert_eq!(parser.state(), ParserState::AwaitingHeaders);
///
/// assert_eq!(parser.parse(b"Content-Length: 2\r\n\r\nok").unwrap(), 23);
/// assert!(parser.is_complete());
///
/// let request = parser.into_request().unwrap();
/// assert_eq!(request.body().as_ref(), b"ok");
/// ```
#[derive(Debug)]
pub struct RequestParser {
    state: ParserState,
    line: Option<RequestLine>,
    headers: Headers,
    body: BytesMut,
}

impl Default for RequestParser {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestParser {
    pub fn new() -> Self {
        Self {
            state: ParserState::AwaitingRequestLine,
            line: None,
            headers: Headers::new(),
            body: BytesMut::new(),
        }
    }

    pub fn state(&self) -> ParserState {
        self.state
    }

    pub fn is_complete(&self) -> bool {
        self.state == ParserState::Complete
    }

    /// Runs a single state step over `buf` and returns the bytes consumed.
    ///
    /// `Ok(0)` means "need more data" unless the step moved the parser to
    /// [`ParserState::Complete`]; check [`is_complete`](Self::is_complete).
    ///
    /// A request without `Content-Length` has an empty body: the parser
    /// completes without consuming anything that follows the header block.
    ///
    /// # Errors
    ///
    /// - [`ParseError::MalformedRequestLine`], [`ParseError::InvalidMethod`],
    ///   [`ParseError::UnsupportedVersion`] — bad request line.
    /// - [`ParseError::MalformedHeader`] — bad header line.
    /// - [`ParseError::InvalidContentLength`] — `Content-Length` is not a
    ///   non-negative integer.
    /// - [`ParseError::BodyOverflow`] — more body bytes than declared.
    /// - [`ParseError::ParserAlreadyComplete`] — the parser is already done.
    pub fn feed(&mut self, buf: &[u8]) -> Result<usize, ParseError> {
        match self.state {
            ParserState::AwaitingRequestLine => {
                let Some(end) = find_crlf(buf) else {
                    return Ok(0);
                };
                self.line = Some(RequestLine::parse(&buf[..end])?);
                self.state = ParserState::AwaitingHeaders;
                Ok(end + 2)
            }

            ParserState::AwaitingHeaders => {
                let (consumed, done) = self.headers.parse(buf)?;
                if done {
                    self.state = ParserState::AwaitingBody;
                }
                Ok(consumed)
            }

            ParserState::AwaitingBody => {
                let Some(declared) = self.declared_length()? else {
                    self.state = ParserState::Complete;
                    return Ok(0);
                };

                let received = self.body.len() + buf.len();
                if received > declared {
                    return Err(ParseError::BodyOverflow { declared, received });
                }

                self.body.extend_from_slice(buf);
                if received == declared {
                    self.state = ParserState::Complete;
                }
                Ok(buf.len())
            }

            ParserState::Complete => Err(ParseError::ParserAlreadyComplete),
        }
    }

    /// Feeds `buf` repeatedly until the parser needs more data or completes.
    ///
    /// Returns the total number of bytes consumed from `buf`.
    pub fn parse(&mut self, buf: &[u8]) -> Result<usize, ParseError> {
        let mut consumed = 0;
        while !self.is_complete() {
            let n = self.feed(&buf[consumed..])?;
            if n == 0 {
                break;
            }
            consumed += n;
        }
        Ok(consumed)
    }

    /// Consumes a completed parser and returns the request.
    ///
    /// # Errors
    ///
    /// [`ParseError::IncompleteRequest`] if the parser has not reached
    /// [`ParserState::Complete`].
    pub fn into_request(self) -> Result<Request, ParseError> {
        match (self.state, self.line) {
            (ParserState::Complete, Some(line)) => Ok(Request {
                line,
                headers: self.headers,
                body: self.body.freeze(),
            }),
            _ => Err(ParseError::IncompleteRequest),
        }
    }

    fn declared_length(&self) -> Result<Option<usize>, ParseError> {
        let Some(raw) = self.headers.get("content-length") else {
            return Ok(None);
        };
        if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_digit()) {
            return Err(ParseError::InvalidContentLength(raw.to_owned()));
        }
        raw.parse()
            .map(Some)
            .map_err(|_| ParseError::InvalidContentLength(raw.to_owned()))
    }
}

/// Growable per-connection read buffer.
///
/// Bytes are appended at the end by [`fill_from`](Self::fill_from) and
/// discarded from the front by [`consume`](Self::consume). When the buffer
/// is full its capacity is doubled before the next read.
#[derive(Debug)]
pub struct ReadBuffer {
    buf: BytesMut,
    total_read: usize,
    max_size: usize,
}

impl Default for ReadBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER_SIZE, MAX_REQUEST_SIZE)
    }
}

impl ReadBuffer {
    /// Creates a buffer with `initial_capacity` bytes that refuses to read
    /// more than `max_size` bytes in total.
    pub fn new(initial_capacity: usize, max_size: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(initial_capacity),
            total_read: 0,
            max_size,
        }
    }

    /// Bytes read but not yet consumed.
    pub fn unconsumed(&self) -> &[u8] {
        &self.buf
    }

    /// Drops the first `n` unconsumed bytes.
    pub fn consume(&mut self, n: usize) {
        self.buf.advance(n);
    }

    /// Current capacity of the underlying arena.
    pub fn capacity(&self) -> usize {
        self.buf.capacity()
    }

    /// Performs one read from `reader`, returning the number of bytes appended.
    ///
    /// `Ok(0)` means end of stream.
    pub async fn fill_from<R>(&mut self, reader: &mut R) -> Result<usize, ParseError>
    where
        R: AsyncRead + Unpin,
    {
        if self.total_read >= self.max_size {
            return Err(ParseError::RequestTooLarge {
                max_bytes: self.max_size,
            });
        }
        if self.buf.len() == self.buf.capacity() {
            let additional = self.buf.capacity().max(1);
            self.buf.reserve(additional);
        }

        let n = reader.read_buf(&mut self.buf).await?;
        self.total_read += n;
        Ok(n)
    }
}

/// Reads from `reader` until a complete request has been parsed.
///
/// For a request without `Content-Length`, bytes following the header block
/// are left in `buf`. A request with a body must not share a read with extra
/// bytes: those fail with [`ParseError::BodyOverflow`].
///
/// # Errors
///
/// Any [`ParseError`] from the parser, [`ParseError::IncompleteRequest`] if
/// the stream ends first, [`ParseError::RequestTooLarge`] if the buffer's
/// size limit is hit, and [`ParseError::Io`] if a read fails.
pub async fn read_request<R>(reader: &mut R, buf: &mut ReadBuffer) -> Result<Request, ParseError>
where
    R: AsyncRead + Unpin,
{
    let mut parser = RequestParser::new();

    loop {
        let consumed = parser.parse(buf.unconsumed())?;
        buf.consume(consumed);

        if parser.is_complete() {
            return parser.into_request();
        }

        if buf.fill_from(reader).await? == 0 {
            return Err(ParseError::IncompleteRequest);
        }
    }
}
