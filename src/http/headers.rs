//! HTTP header map with case-insensitive name lookup, and the incremental
//! header-line parser that fills it.

use std::fmt;

use super::request::ParseError;

const CRLF: &[u8] = b"\r\n";

/// A case-insensitive HTTP header map with unique names.
///
/// Entries keep insertion order so serialized output is deterministic.
/// Inserting a name that is already present (in any letter case) replaces
/// the previous value in place: the last write wins.
///
/// # Examples
///
/// ```
/// use chillhttp::http::Headers;
///
/// let mut headers = Headers::new();
/// headers.insert("Content-Type", "text/html");
/// headers.insert("content-type", "text/plain");
///
/// assert_eq!(headers.get("CONTENT-TYPE"), Some("text/plain"));
/// assert_eq!(headers.len(), 1);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    inner: Vec<(String, String)>,
}

impl Headers {
    /// Creates an empty header map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a header map with pre-allocated capacity for `capacity` entries.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Vec::with_capacity(capacity),
        }
    }

    /// Sets a header, replacing any existing value stored under the same name.
    ///
    /// The replaced entry keeps its position but takes the new name spelling.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self
            .inner
            .iter_mut()
            .find(|(k, _)| k.eq_ignore_ascii_case(&name))
        {
            Some(entry) => *entry = (name, value),
            None => self.inner.push((name, value)),
        }
    }

    /// Returns the value for the given header name (case-insensitive), or `None`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.inner
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Removes the entry with the given header name (case-insensitive).
    ///
    /// Returns the removed value, if there was one.
    pub fn remove(&mut self, name: &str) -> Option<String> {
        let pos = self
            .inner
            .iter()
            .position(|(k, _)| k.eq_ignore_ascii_case(name))?;
        Some(self.inner.remove(pos).1)
    }

    /// Returns `true` if the map contains an entry with the given name.
    pub fn contains(&self, name: &str) -> bool {
        self.inner.iter().any(|(k, _)| k.eq_ignore_ascii_case(name))
    }

    /// Returns the number of header entries.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Returns `true` if there are no header entries.
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Returns an iterator over all `(name, value)` pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.inner.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Parses at most one header line from the front of `buf`.
    ///
    /// Returns `(consumed, done)`:
    ///
    /// - `(0, false)` — no complete line is buffered yet; call again once more
    ///   bytes have arrived. Truncated input is never reported as an error.
    /// - `(2, true)` — `buf` starts with the blank line that ends the header
    ///   section.
    /// - `(n, false)` — one `name: value` line of `n - 2` bytes was stored
    ///   under its lowercase name.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError::MalformedHeader`] if the line has no colon, has
    /// whitespace directly before the colon, or has a name containing
    /// characters outside the HTTP token set.
    ///
    /// # Examples
    ///
    /// ```
    /// use chillhttp::http::Headers;
    ///
    /// let mut headers = Headers::new();
    /// let raw = b"Host: localhost:42069\r\n\r\n";
    ///
    /// assert_eq!(headers.parse(raw).unwrap(), (23, false));
    /// assert_eq!(headers.parse(&raw[23..]).unwrap(), (2, true));
    /// assert_eq!(headers.get("host"), Some("localhost:42069"));
    /// ```
    pub fn parse(&mut self, buf: &[u8]) -> Result<(usize, bool), ParseError> {
        if buf.is_empty() {
            return Ok((0, false));
        }
        if buf.starts_with(CRLF) {
            return Ok((CRLF.len(), true));
        }

        let Some(end) = find_crlf(buf) else {
            return Ok((0, false));
        };

        let line = std::str::from_utf8(&buf[..end])
            .map_err(|_| ParseError::malformed_header("header line is not valid UTF-8"))?;
        let (raw_name, raw_value) = line
            .split_once(':')
            .ok_or_else(|| ParseError::malformed_header("missing colon"))?;

        if raw_name.is_empty() {
            return Err(ParseError::malformed_header("empty header name"));
        }
        if raw_name.ends_with([' ', '\t']) {
            return Err(ParseError::malformed_header(
                "whitespace between header name and colon",
            ));
        }

        let name = raw_name.trim();
        if name.is_empty() || !name.bytes().all(is_token_char) {
            return Err(ParseError::malformed_header(format!(
                "invalid header name {name:?}"
            )));
        }

        self.insert(name.to_ascii_lowercase(), raw_value.trim());
        Ok((end + CRLF.len(), false))
    }
}

impl fmt::Display for Headers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (name, value) in &self.inner {
            write!(f, "{name}: {value}\r\n")?;
        }
        Ok(())
    }
}

/// Returns the offset of the first `\r\n` in `buf`.
pub(crate) fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(CRLF.len()).position(|w| w == CRLF)
}

// RFC 9110 §5.6.2 `tchar`.
fn is_token_char(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`|~".contains(&b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn case_insensitive_get() {
        let mut h = Headers::new();
        h.insert("Content-Type", "text/plain");
        assert_eq!(h.get("content-type"), Some("text/plain"));
        assert_eq!(h.get("CONTENT-TYPE"), Some("text/plain"));
        assert_eq!(h.get("Content-Type"), Some("text/plain"));
    }

    #[test]
    fn insert_replaces_existing_name() {
        let mut h = Headers::new();
        h.insert("X-Foo", "bar");
        h.insert("Connection", "close");
        h.insert("x-foo", "baz");
        assert_eq!(h.len(), 2);
        assert_eq!(h.get("X-FOO"), Some("baz"));
        // replaced entry keeps its slot
        assert_eq!(h.iter().next(), Some(("x-foo", "baz")));
    }

    #[test]
    fn remove() {
        let mut h = Headers::new();
        h.insert("X-Foo", "bar");
        assert_eq!(h.remove("x-foo").as_deref(), Some("bar"));
        assert!(h.is_empty());
        assert_eq!(h.remove("x-foo"), None); // already gone
    }

    #[test]
    fn contains() {
        let mut h = Headers::new();
        h.insert("Authorization", "Bearer token");
        assert!(h.contains("authorization"));
        assert!(!h.contains("x-missing"));
    }

    #[test]
    fn display_writes_wire_lines() {
        let mut h = Headers::new();
        h.insert("Content-Type", "text/plain");
        h.insert("Content-Length", "0");
        assert_eq!(
            h.to_string(),
            "Content-Type: text/plain\r\nContent-Length: 0\r\n"
        );
    }

    // ── Headers::parse ────────────────────────────────────────────────────────

    #[test]
    fn parse_single_header() {
        let mut h = Headers::new();
        let (n, done) = h.parse(b"Host: localhost:42069\r\n\r\n").unwrap();
        assert_eq!(n, 23);
        assert!(!done);
        assert_eq!(h.get("host"), Some("localhost:42069"));
        // stored under the folded name
        assert_eq!(h.iter().next(), Some(("host", "localhost:42069")));
    }

    #[test]
    fn parse_trims_extra_whitespace() {
        let mut h = Headers::new();
        let (n, done) = h.parse(b"Host:    localhost:42069    \r\n\r\n").unwrap();
        assert_eq!(n, 30);
        assert!(!done);
        assert_eq!(h.get("host"), Some("localhost:42069"));
    }

    #[test]
    fn parse_leading_whitespace_before_name_is_trimmed() {
        let mut h = Headers::new();
        let (n, _) = h.parse(b"   Host: example.com\r\n").unwrap();
        assert_eq!(n, 22);
        assert_eq!(h.get("host"), Some("example.com"));
    }

    #[test]
    fn parse_two_headers_with_existing() {
        let mut h = Headers::new();
        h.insert("Existing", "value");
        let data = b"Host: localhost:42069\r\nContent-Type: application/json\r\n\r\n";

        let (n, done) = h.parse(data).unwrap();
        assert_eq!((n, done), (23, false));

        let (n2, done) = h.parse(&data[n..]).unwrap();
        assert_eq!((n2, done), (32, false));

        let (n3, done) = h.parse(&data[n + n2..]).unwrap();
        assert_eq!((n3, done), (2, true));

        assert_eq!(h.get("existing"), Some("value"));
        assert_eq!(h.get("content-type"), Some("application/json"));
        assert_eq!(h.len(), 3);
    }

    #[test]
    fn parse_repeated_name_last_write_wins() {
        let mut h = Headers::new();
        h.parse(b"Accept: text/html\r\n").unwrap();
        h.parse(b"ACCEPT: application/json\r\n").unwrap();
        assert_eq!(h.len(), 1);
        assert_eq!(h.get("accept"), Some("application/json"));
    }

    #[test]
    fn parse_done() {
        let mut h = Headers::new();
        assert_eq!(h.parse(b"\r\n").unwrap(), (2, true));
        assert!(h.is_empty());
    }

    #[test]
    fn parse_empty_needs_more() {
        let mut h = Headers::new();
        assert_eq!(h.parse(b"").unwrap(), (0, false));
    }

    #[test]
    fn parse_partial_line_needs_more() {
        let mut h = Headers::new();
        assert_eq!(h.parse(b"Host: localh").unwrap(), (0, false));
        assert_eq!(h.parse(b"\r").unwrap(), (0, false));
        assert!(h.is_empty());
    }

    #[test]
    fn parse_rejects_space_before_colon() {
        let mut h = Headers::new();
        let err = h
            .parse(b"       Host : localhost:42069       \r\n\r\n")
            .unwrap_err();
        assert!(matches!(err, ParseError::MalformedHeader { .. }));
        assert!(h.is_empty());
    }

    #[test]
    fn parse_rejects_missing_colon() {
        let mut h = Headers::new();
        let err = h.parse(b"NoColonHere\r\n").unwrap_err();
        assert!(matches!(err, ParseError::MalformedHeader { .. }));
    }

    #[test]
    fn parse_rejects_empty_name() {
        let mut h = Headers::new();
        let err = h.parse(b": value\r\n").unwrap_err();
        assert!(matches!(err, ParseError::MalformedHeader { .. }));
    }

    #[test]
    fn parse_rejects_invalid_token_characters() {
        let mut h = Headers::new();
        for line in [&b"H\xc2\xa9st: x\r\n"[..], b"Ho(st: x\r\n", b"Ho st: x\r\n"] {
            let err = h.parse(line).unwrap_err();
            assert!(matches!(err, ParseError::MalformedHeader { .. }), "{line:?}");
        }
    }

    #[test]
    fn parse_accepts_token_punctuation() {
        let mut h = Headers::new();
        h.parse(b"X-Weird!#$%&'*+-.^_`|~: ok\r\n").unwrap();
        assert_eq!(h.get("x-weird!#$%&'*+-.^_`|~"), Some("ok"));
    }

    #[test]
    fn parse_value_keeps_inner_colons() {
        let mut h = Headers::new();
        h.parse(b"Referer: http://a.example:8080/x\r\n").unwrap();
        assert_eq!(h.get("referer"), Some("http://a.example:8080/x"));
    }
}
