//! HTTP/1.x stream parser using httparse.
//!
//! One worker follows one direction of a TCP connection. It parses message
//! heads at its consumed offset, skips bodies framed by `Content-Length` or
//! chunked encoding, and emits at most one layer per chunk. A pipelined
//! message already buffered is reported with the next chunk.

use compact_str::{format_compact, CompactString};
use httparse::{Header, Request, Response, Status, EMPTY_HEADER};
use tracing::debug;

use crate::dissector::{Chunk, StreamDissector, StreamWorker};
use crate::intern::{FieldDef, Interner, Symbol};
use crate::layer::{LayerBuilder, PathPattern};
use crate::stream::{StreamBuffer, StreamKey};

/// Maximum number of headers to parse.
const MAX_HEADERS: usize = 100;

/// Buffered bytes without a complete head before the stream is given up.
const MAX_HEAD_LEN: usize = 64 * 1024;

/// HTTP/1.x dissector over reassembled TCP streams.
#[derive(Debug, Clone, Copy, Default)]
pub struct HttpDissector;

impl StreamDissector for HttpDissector {
    fn name(&self) -> &'static str {
        "http"
    }

    fn description(&self) -> &'static str {
        "Hypertext Transfer Protocol"
    }

    fn patterns(&self) -> Vec<PathPattern> {
        vec![PathPattern::suffix(&["tcp"])]
    }

    fn create_worker(&self, key: &StreamKey, interner: &Interner) -> Box<dyn StreamWorker> {
        debug!(key = %key, "http worker created");
        Box::new(HttpWorker::new(interner))
    }
}

struct HttpFields {
    token: Symbol,
    application: Symbol,
    message: FieldDef,
    method: FieldDef,
    path: FieldDef,
    version: FieldDef,
    status: FieldDef,
    reason: FieldDef,
    header: FieldDef,
    host: FieldDef,
    content_length: FieldDef,
}

/// How the body following a parsed head is delimited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Body {
    None,
    /// Bytes still to skip
    Length(usize),
    Chunked,
    /// Response body runs to the end of the connection.
    UntilClose,
}

struct HttpWorker {
    fields: HttpFields,
    /// Stream offset of the next unparsed byte
    consumed: usize,
    messages: u64,
    body: Body,
    failed: bool,
}

impl HttpWorker {
    fn new(interner: &Interner) -> Self {
        Self {
            fields: HttpFields {
                token: interner.intern("http"),
                application: interner.intern("application"),
                message: interner.field("http.message", "Message Number"),
                method: interner.field("http.method", "Method"),
                path: interner.field("http.path", "Path"),
                version: interner.field("http.version", "Version"),
                status: interner.field("http.status", "Status Code"),
                reason: interner.field("http.reason", "Reason"),
                header: interner.field("http.header", "Header"),
                host: interner.field("http.host", "Host"),
                content_length: interner.field("http.content_length", "Content Length"),
            },
            consumed: 0,
            messages: 0,
            body: Body::None,
            failed: false,
        }
    }

    /// Advance past the current body. Returns `true` at a message boundary.
    fn skip_body(&mut self, key: &StreamKey, stream: &StreamBuffer) -> bool {
        match self.body {
            Body::None => true,
            Body::Length(remaining) => {
                let n = stream.read(self.consumed, remaining).len();
                self.consumed += n;
                if n == remaining {
                    self.body = Body::None;
                    true
                } else {
                    self.body = Body::Length(remaining - n);
                    false
                }
            }
            Body::Chunked => match parse_chunked_body(stream.read(self.consumed, usize::MAX)) {
                Chunked::Complete(n) => {
                    self.consumed += n;
                    self.body = Body::None;
                    true
                }
                Chunked::Partial => false,
                Chunked::Malformed(reason) => {
                    debug!(key = %key, offset = self.consumed, reason, "bad chunked body, ignoring stream");
                    self.failed = true;
                    false
                }
            },
            Body::UntilClose => {
                self.consumed = stream.len();
                false
            }
        }
    }

    fn parse(&self, data: &[u8]) -> Result<Option<(LayerBuilder, usize, Body)>, httparse::Error> {
        let mut headers = [EMPTY_HEADER; MAX_HEADERS];
        let f = &self.fields;
        let mut layer = LayerBuilder::detached(f.token.clone());
        layer.tag(f.application.clone());
        layer.attr(&f.message, self.messages + 1);

        if data.starts_with(b"HTTP/") {
            let mut resp = Response::new(&mut headers);
            let Status::Complete(head_len) = resp.parse(data)? else {
                return Ok(None);
            };
            let version = format_compact!("HTTP/1.{}", resp.version.unwrap_or(1));
            let code = resp.code.unwrap_or(0);
            let reason = resp.reason.unwrap_or("");
            layer.attr(&f.version, version.clone());
            layer.attr(&f.status, code);
            layer.attr(&f.reason, reason);
            layer.set_summary(format_compact!("{version} {code} {reason}"));

            let framing = self.headers(&mut layer, resp.headers);
            let body = match framing {
                Some(body) => body,
                // 1xx, 204 and 304 never carry a body.
                None if code < 200 || code == 204 || code == 304 => Body::None,
                None => Body::UntilClose,
            };
            Ok(Some((layer, head_len, body)))
        } else {
            let mut req = Request::new(&mut headers);
            let Status::Complete(head_len) = req.parse(data)? else {
                return Ok(None);
            };
            let method = req.method.unwrap_or("");
            let path = req.path.unwrap_or("");
            let version = format_compact!("HTTP/1.{}", req.version.unwrap_or(1));
            layer.attr(&f.method, method);
            layer.attr(&f.path, path);
            layer.attr(&f.version, version.clone());
            layer.set_summary(format_compact!("{method} {path} {version}"));

            let body = self.headers(&mut layer, req.headers).unwrap_or(Body::None);
            Ok(Some((layer, head_len, body)))
        }
    }

    /// Record headers and return the body framing they declare, if any.
    fn headers(&self, layer: &mut LayerBuilder, headers: &[Header<'_>]) -> Option<Body> {
        let f = &self.fields;
        let mut framing = None;

        for header in headers {
            let value = CompactString::new(String::from_utf8_lossy(header.value).trim());
            layer.attr(&f.header, format_compact!("{}: {value}", header.name));

            if header.name.eq_ignore_ascii_case("host") {
                layer.attr(&f.host, value);
            } else if header.name.eq_ignore_ascii_case("content-length") {
                match value.parse::<u64>() {
                    Ok(len) => {
                        layer.attr(&f.content_length, len);
                        if framing != Some(Body::Chunked) {
                            framing = Some(Body::Length(len as usize));
                        }
                    }
                    Err(_) => {
                        let attr = layer.attr(&f.content_length, value);
                        attr.error = true;
                    }
                }
            } else if header.name.eq_ignore_ascii_case("transfer-encoding")
                && value.to_ascii_lowercase().contains("chunked")
            {
                framing = Some(Body::Chunked);
            }
        }
        framing
    }
}

impl StreamWorker for HttpWorker {
    fn analyze(&mut self, chunk: &Chunk<'_>) -> Option<LayerBuilder> {
        if self.failed || !self.skip_body(chunk.key, chunk.stream) {
            return None;
        }

        let data = chunk.stream.read(self.consumed, usize::MAX);
        if data.is_empty() {
            return None;
        }

        match self.parse(data) {
            Ok(Some((layer, head_len, body))) => {
                self.consumed += head_len;
                self.messages += 1;
                self.body = body;
                self.skip_body(chunk.key, chunk.stream);
                Some(layer)
            }
            Ok(None) => {
                if data.len() > MAX_HEAD_LEN {
                    debug!(key = %chunk.key, "http head too long, ignoring stream");
                    self.failed = true;
                }
                None
            }
            Err(e) => {
                debug!(key = %chunk.key, offset = self.consumed, error = %e, "not http, ignoring stream");
                self.failed = true;
                None
            }
        }
    }
}

/// Outcome of scanning a chunked body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Chunked {
    /// Body length, trailers included
    Complete(usize),
    /// More data is needed
    Partial,
    Malformed(&'static str),
}

/// Scan a chunked body at the start of `data`.
fn parse_chunked_body(data: &[u8]) -> Chunked {
    let mut pos = 0;

    loop {
        let Some(line_end) = data[pos..]
            .windows(2)
            .position(|w| w == b"\r\n")
            .map(|p| pos + p)
        else {
            // An unterminated size line can still be rejected early.
            let partial = &data[pos..];
            let size = partial.split(|&b| b == b';').next().unwrap_or(partial);
            let hex = |b: &u8| b.is_ascii_hexdigit() || matches!(b, b' ' | b'\t' | b'\r');
            if partial.contains(&b';') || size.iter().all(hex) {
                return Chunked::Partial;
            }
            return Chunked::Malformed("invalid chunk size");
        };

        let Ok(size_line) = std::str::from_utf8(&data[pos..line_end]) else {
            return Chunked::Malformed("chunk size line is not text");
        };
        // Chunk extensions follow a semicolon.
        let size_part = size_line.split(';').next().unwrap_or(size_line);
        let Ok(chunk_size) = usize::from_str_radix(size_part.trim(), 16) else {
            return Chunked::Malformed("invalid chunk size");
        };

        pos = line_end + 2;

        if chunk_size == 0 {
            if data.len() >= pos + 2 && &data[pos..pos + 2] == b"\r\n" {
                return Chunked::Complete(pos + 2);
            }
            return match data[pos..].windows(4).position(|w| w == b"\r\n\r\n") {
                Some(end) => Chunked::Complete(pos + end + 4),
                None => Chunked::Partial,
            };
        }

        let Some(end) = pos.checked_add(chunk_size).and_then(|e| e.checked_add(2)) else {
            return Chunked::Malformed("chunk size overflows");
        };
        if data.len() < end {
            return Chunked::Partial;
        }
        if &data[end - 2..end] != b"\r\n" {
            return Chunked::Malformed("chunk data not terminated by CRLF");
        }
        pos = end;
    }
}
