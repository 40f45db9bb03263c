// src/core/protocol/http.rs

//! Implements the HTTP/1.1 message model and the corresponding `Encoder` and
//! `Decoder` for network communication. One decoded item is exactly one
//! request; the session loop never pipelines a second request before the
//! first response is written.

use crate::core::GlossdError;
use bytes::{BufMut, Bytes, BytesMut};
use std::fmt;
use std::str::FromStr;
use tokio_util::codec::{Decoder, Encoder};

const CRLF: &[u8] = b"\r\n";

// Protocol-level limits to prevent denial-of-service via oversized messages.
const MAX_HEAD_BYTES: usize = 16 * 1024; // Request line + headers.
const MAX_BODY_BYTES: usize = 1024 * 1024; // 1MB request body cap.
const MAX_HEADERS: usize = 64;

/// The request methods the service answers. Anything else is a protocol
/// error and tears the connection down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Put,
    Patch,
    Delete,
    Options,
}

impl FromStr for Method {
    type Err = GlossdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "GET" => Ok(Method::Get),
            "POST" => Ok(Method::Post),
            "PUT" => Ok(Method::Put),
            "PATCH" => Ok(Method::Patch),
            "DELETE" => Ok(Method::Delete),
            "OPTIONS" => Ok(Method::Options),
            other => Err(GlossdError::InvalidRequest(format!(
                "Unsupported method '{other}'"
            ))),
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
            Method::Options => "OPTIONS",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Version {
    Http10,
    Http11,
}

/// A single parsed HTTP request.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    /// The raw request target, including any query string.
    pub target: String,
    pub version: Version,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

impl HttpRequest {
    /// The target path with the query string stripped.
    pub fn path(&self) -> &str {
        match self.target.find('?') {
            Some(pos) => &self.target[..pos],
            None => &self.target,
        }
    }

    /// The raw query string, if any.
    pub fn query(&self) -> Option<&str> {
        self.target.find('?').map(|pos| &self.target[pos + 1..])
    }

    /// Extracts and percent-decodes one query-string parameter.
    pub fn query_param(&self, name: &str) -> Option<String> {
        let query = self.query()?;
        for pair in query.split('&') {
            let (key, value) = match pair.split_once('=') {
                Some(kv) => kv,
                None => continue,
            };
            if key == name {
                return urlencoding::decode(value).ok().map(|v| v.into_owned());
            }
        }
        None
    }

    /// Case-insensitive header lookup; returns the first matching value.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Extracts one cookie value from the `Cookie` header.
    pub fn cookie(&self, name: &str) -> Option<&str> {
        let cookies = self.header("cookie")?;
        for part in cookies.split(';') {
            let part = part.trim();
            if let Some((key, value)) = part.split_once('=')
                && key == name
            {
                return Some(value);
            }
        }
        None
    }

    /// Whether the client negotiated connection reuse. HTTP/1.1 defaults to
    /// keep-alive unless the client asks to close; HTTP/1.0 the inverse.
    pub fn keep_alive(&self) -> bool {
        let connection = self.header("connection").unwrap_or("");
        match self.version {
            Version::Http11 => !connection.eq_ignore_ascii_case("close"),
            Version::Http10 => connection.eq_ignore_ascii_case("keep-alive"),
        }
    }
}

/// A single HTTP response, built by handlers and the dispatcher.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
    /// When set, the session closes the connection after writing this
    /// response regardless of the request's keep-alive preference.
    pub close: bool,
}

impl HttpResponse {
    pub fn with_status(status: u16) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: Bytes::new(),
            close: false,
        }
    }

    pub fn set_header(&mut self, name: &str, value: &str) {
        if let Some(slot) = self
            .headers
            .iter_mut()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
        {
            slot.1 = value.to_string();
        } else {
            self.headers.push((name.to_string(), value.to_string()));
        }
    }

    /// Appends a header without replacing existing values (`Set-Cookie`).
    pub fn append_header(&mut self, name: &str, value: &str) {
        self.headers.push((name.to_string(), value.to_string()));
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    fn envelope(status: u16, body: serde_json::Value) -> Self {
        let mut res = Self::with_status(status);
        res.set_header("Content-Type", "application/json");
        res.body = Bytes::from(body.to_string());
        res
    }

    /// `200` success envelope with a string message.
    pub fn ok_message(message: &str) -> Self {
        Self::envelope(200, serde_json::json!({"status": "ok", "message": message}))
    }

    /// `200` success envelope carrying a JSON payload in `message`.
    pub fn ok_json(message: serde_json::Value) -> Self {
        Self::envelope(200, serde_json::json!({"status": "ok", "message": message}))
    }

    pub fn bad_request(message: &str) -> Self {
        Self::envelope(
            400,
            serde_json::json!({"status": "error", "message": message}),
        )
    }

    pub fn unauthorized(message: &str) -> Self {
        Self::envelope(
            401,
            serde_json::json!({"status": "error", "message": message}),
        )
    }

    pub fn not_found(message: &str) -> Self {
        Self::envelope(
            404,
            serde_json::json!({"status": "error", "message": message}),
        )
    }

    pub fn too_many_requests(message: &str) -> Self {
        Self::envelope(
            429,
            serde_json::json!({"status": "error", "message": message}),
        )
    }

    pub fn internal_error(message: &str) -> Self {
        Self::envelope(
            500,
            serde_json::json!({"status": "error", "message": message}),
        )
    }
}

/// Maps a status code to its reason phrase for the status line.
fn reason_phrase(status: u16) -> &'static str {
    match status {
        200 => "OK",
        204 => "No Content",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        413 => "Payload Too Large",
        429 => "Too Many Requests",
        500 => "Internal Server Error",
        _ => "Unknown",
    }
}

/// A `tokio_util::codec` implementation for reading `HttpRequest`s and
/// writing `HttpResponse`s over one connection.
#[derive(Debug, Default)]
pub struct HttpCodec;

impl Encoder<HttpResponse> for HttpCodec {
    type Error = GlossdError;

    fn encode(&mut self, item: HttpResponse, dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.reserve(128 + item.body.len());
        dst.put_slice(b"HTTP/1.1 ");
        dst.put_slice(item.status.to_string().as_bytes());
        dst.put_slice(b" ");
        dst.put_slice(reason_phrase(item.status).as_bytes());
        dst.put_slice(CRLF);

        for (name, value) in &item.headers {
            dst.put_slice(name.as_bytes());
            dst.put_slice(b": ");
            dst.put_slice(value.as_bytes());
            dst.put_slice(CRLF);
        }

        // 204 carries no body by definition; everything else gets an explicit
        // Content-Length so the client never needs EOF framing.
        if item.status != 204 {
            dst.put_slice(b"Content-Length: ");
            dst.put_slice(item.body.len().to_string().as_bytes());
            dst.put_slice(CRLF);
        }
        dst.put_slice(CRLF);

        if item.status != 204 {
            dst.put_slice(&item.body);
        }
        Ok(())
    }
}

impl Decoder for HttpCodec {
    type Item = HttpRequest;
    type Error = GlossdError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        // Locate the end of the head section.
        let Some(head_end) = find_double_crlf(src) else {
            if src.len() > MAX_HEAD_BYTES {
                return Err(GlossdError::InvalidRequest(
                    "Request head exceeds size limit".to_string(),
                ));
            }
            return Ok(None);
        };

        if head_end > MAX_HEAD_BYTES {
            return Err(GlossdError::InvalidRequest(
                "Request head exceeds size limit".to_string(),
            ));
        }

        let head = std::str::from_utf8(&src[..head_end])?.to_string();
        let mut lines = head.split("\r\n");

        let request_line = lines
            .next()
            .ok_or_else(|| GlossdError::InvalidRequest("Empty request line".to_string()))?;
        let mut parts = request_line.split(' ');
        let (method_str, target, version_str) =
            match (parts.next(), parts.next(), parts.next(), parts.next()) {
                (Some(m), Some(t), Some(v), None) => (m, t, v),
                _ => {
                    return Err(GlossdError::InvalidRequest(
                        "Malformed request line".to_string(),
                    ));
                }
            };

        let method = method_str.parse::<Method>()?;
        let version = match version_str {
            "HTTP/1.1" => Version::Http11,
            "HTTP/1.0" => Version::Http10,
            other => {
                return Err(GlossdError::InvalidRequest(format!(
                    "Unsupported protocol version '{other}'"
                )));
            }
        };

        let mut headers = Vec::new();
        let mut content_length: usize = 0;
        for line in lines {
            if line.is_empty() {
                continue;
            }
            if headers.len() >= MAX_HEADERS {
                return Err(GlossdError::InvalidRequest(
                    "Too many request headers".to_string(),
                ));
            }
            let (name, value) = line.split_once(':').ok_or_else(|| {
                GlossdError::InvalidRequest("Malformed header line".to_string())
            })?;
            let name = name.trim();
            let value = value.trim();
            if name.eq_ignore_ascii_case("content-length") {
                content_length = value.parse::<usize>().map_err(|_| {
                    GlossdError::InvalidRequest("Invalid Content-Length".to_string())
                })?;
            }
            headers.push((name.to_string(), value.to_string()));
        }

        if content_length > MAX_BODY_BYTES {
            return Err(GlossdError::PayloadTooLarge);
        }

        let body_start = head_end + 4;
        let total = body_start + content_length;
        if src.len() < total {
            // Wait for the rest of the body.
            src.reserve(total - src.len());
            return Ok(None);
        }

        let frame = src.split_to(total);
        let body = Bytes::copy_from_slice(&frame[body_start..]);

        Ok(Some(HttpRequest {
            method,
            target: target.to_string(),
            version,
            headers,
            body,
        }))
    }
}

/// Finds the head/body separator, returning the offset of the first CRLFCRLF.
fn find_double_crlf(src: &[u8]) -> Option<usize> {
    src.windows(4).position(|window| window == b"\r\n\r\n")
}
