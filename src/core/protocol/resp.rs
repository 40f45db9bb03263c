// src/core/protocol/resp.rs

//! Implements the RESP (REdis Serialization Protocol) frames the cache client
//! speaks, with a symmetric `Encoder`/`Decoder` so tests can stand up an
//! in-process mock cache with the same codec.

use crate::core::GlossdError;
use bytes::{Buf, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

/// The CRLF (Carriage Return, Line Feed) sequence used to terminate lines in RESP.
const CRLF: &[u8] = b"\r\n";
const CRLF_LEN: usize = 2;

// Protocol-level limits. Session records are tiny; anything near these
// limits indicates a confused or hostile peer.
const MAX_ELEMENTS: usize = 1_024;
const MAX_BULK_STRING_SIZE: usize = 1024 * 1024;
const MAX_RECURSION_DEPTH: usize = 8;

/// An enum representing a single frame in the RESP protocol.
#[derive(Debug, Clone, PartialEq)]
pub enum RespValue {
    SimpleString(String),
    Error(String),
    Integer(i64),
    BulkString(Bytes),
    Null,
    Array(Vec<RespValue>),
}

impl RespValue {
    /// Builds a command frame from raw argument slices, the only shape the
    /// client ever sends.
    pub fn command<T: AsRef<[u8]>>(args: &[T]) -> RespValue {
        RespValue::Array(
            args.iter()
                .map(|a| RespValue::BulkString(Bytes::copy_from_slice(a.as_ref())))
                .collect(),
        )
    }

    /// Interprets this frame as UTF-8 text, if it carries any.
    pub fn as_string(&self) -> Option<String> {
        match self {
            RespValue::SimpleString(s) => Some(s.clone()),
            RespValue::BulkString(b) => String::from_utf8(b.to_vec()).ok(),
            RespValue::Integer(i) => Some(i.to_string()),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            RespValue::Integer(i) => Some(*i),
            RespValue::SimpleString(s) => s.parse().ok(),
            RespValue::BulkString(b) => std::str::from_utf8(b).ok()?.parse().ok(),
            _ => None,
        }
    }
}

/// A `tokio_util::codec` implementation for encoding and decoding `RespValue`s.
#[derive(Debug, Default)]
pub struct RespCodec;

impl Encoder<RespValue> for RespCodec {
    type Error = GlossdError;

    fn encode(&mut self, item: RespValue, dst: &mut BytesMut) -> Result<(), Self::Error> {
        match item {
            RespValue::SimpleString(s) => {
                dst.extend_from_slice(b"+");
                dst.extend_from_slice(s.as_bytes());
                dst.extend_from_slice(CRLF);
            }
            RespValue::Error(s) => {
                dst.extend_from_slice(b"-");
                dst.extend_from_slice(s.as_bytes());
                dst.extend_from_slice(CRLF);
            }
            RespValue::Integer(i) => {
                dst.extend_from_slice(b":");
                dst.extend_from_slice(i.to_string().as_bytes());
                dst.extend_from_slice(CRLF);
            }
            RespValue::BulkString(b) => {
                dst.extend_from_slice(b"$");
                dst.extend_from_slice(b.len().to_string().as_bytes());
                dst.extend_from_slice(CRLF);
                dst.extend_from_slice(&b);
                dst.extend_from_slice(CRLF);
            }
            RespValue::Null => {
                dst.extend_from_slice(b"$-1\r\n");
            }
            RespValue::Array(arr) => {
                dst.extend_from_slice(b"*");
                dst.extend_from_slice(arr.len().to_string().as_bytes());
                dst.extend_from_slice(CRLF);
                for frame in arr {
                    self.encode(frame, dst)?;
                }
            }
        }
        Ok(())
    }
}

impl Decoder for RespCodec {
    type Item = RespValue;
    type Error = GlossdError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.is_empty() {
            return Ok(None);
        }

        let mut bytes = &src[..];
        match self.decode_recursive(&mut bytes, 0) {
            Ok(frame) => {
                let len = src.len() - bytes.len();
                src.advance(len);
                Ok(Some(frame))
            }
            // `IncompleteData` means we need more bytes from the socket;
            // any other error is a real protocol violation.
            Err(GlossdError::IncompleteData) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

impl RespCodec {
    fn decode_recursive(
        &self,
        bytes: &mut &[u8],
        depth: usize,
    ) -> Result<RespValue, GlossdError> {
        if depth > MAX_RECURSION_DEPTH {
            return Err(GlossdError::InvalidRequest(
                "RESP recursion depth limit exceeded".to_string(),
            ));
        }

        if bytes.is_empty() {
            return Err(GlossdError::IncompleteData);
        }

        match bytes[0] {
            b'+' => self.parse_simple_string(bytes),
            b'-' => self.parse_error(bytes),
            b':' => self.parse_integer(bytes),
            b'$' => self.parse_bulk_string(bytes),
            b'*' => self.parse_array(bytes, depth),
            _ => Err(GlossdError::InvalidRequest(
                "Unrecognized RESP type marker".to_string(),
            )),
        }
    }

    /// Finds the next CRLF and returns the line, advancing past it.
    fn parse_line<'a>(&self, bytes: &mut &'a [u8]) -> Result<&'a [u8], GlossdError> {
        if let Some(pos) = find_crlf(bytes) {
            let line = &bytes[..pos];
            *bytes = &bytes[pos + CRLF_LEN..];
            Ok(line)
        } else {
            Err(GlossdError::IncompleteData)
        }
    }

    fn parse_simple_string(&self, bytes: &mut &[u8]) -> Result<RespValue, GlossdError> {
        *bytes = &bytes[1..];
        let line = self.parse_line(bytes)?;
        Ok(RespValue::SimpleString(
            String::from_utf8_lossy(line).to_string(),
        ))
    }

    fn parse_error(&self, bytes: &mut &[u8]) -> Result<RespValue, GlossdError> {
        *bytes = &bytes[1..];
        let line = self.parse_line(bytes)?;
        Ok(RespValue::Error(String::from_utf8_lossy(line).to_string()))
    }

    fn parse_integer(&self, bytes: &mut &[u8]) -> Result<RespValue, GlossdError> {
        *bytes = &bytes[1..];
        let line = self.parse_line(bytes)?;
        let s = String::from_utf8_lossy(line);
        let i = s
            .parse::<i64>()
            .map_err(|_| GlossdError::InvalidRequest("Malformed RESP integer".to_string()))?;
        Ok(RespValue::Integer(i))
    }

    fn parse_bulk_string(&self, bytes: &mut &[u8]) -> Result<RespValue, GlossdError> {
        *bytes = &bytes[1..];
        let line = self.parse_line(bytes)?;
        let s = String::from_utf8_lossy(line);
        let str_len = s
            .parse::<isize>()
            .map_err(|_| GlossdError::InvalidRequest("Malformed RESP bulk length".to_string()))?;

        if str_len == -1 {
            return Ok(RespValue::Null);
        }

        let str_len = str_len as usize;
        if str_len > MAX_BULK_STRING_SIZE {
            return Err(GlossdError::InvalidRequest(
                "RESP bulk string exceeds size limit".to_string(),
            ));
        }

        if bytes.len() < str_len + CRLF_LEN {
            return Err(GlossdError::IncompleteData);
        }

        if &bytes[str_len..str_len + CRLF_LEN] != CRLF {
            return Err(GlossdError::InvalidRequest(
                "RESP bulk string missing terminator".to_string(),
            ));
        }

        let data = Bytes::copy_from_slice(&bytes[..str_len]);
        *bytes = &bytes[str_len + CRLF_LEN..];
        Ok(RespValue::BulkString(data))
    }

    fn parse_array(&self, bytes: &mut &[u8], depth: usize) -> Result<RespValue, GlossdError> {
        *bytes = &bytes[1..];
        let line = self.parse_line(bytes)?;
        let s = String::from_utf8_lossy(line);
        let arr_len = s
            .parse::<isize>()
            .map_err(|_| GlossdError::InvalidRequest("Malformed RESP array length".to_string()))?;

        if arr_len == -1 {
            return Ok(RespValue::Null);
        }

        let arr_len = arr_len as usize;
        if arr_len > MAX_ELEMENTS {
            return Err(GlossdError::InvalidRequest(
                "RESP array exceeds element limit".to_string(),
            ));
        }

        let mut frames = Vec::with_capacity(arr_len);
        for _ in 0..arr_len {
            frames.push(self.decode_recursive(bytes, depth + 1)?);
        }
        Ok(RespValue::Array(frames))
    }
}

/// Helper function to find the next CRLF sequence in a buffer.
fn find_crlf(src: &[u8]) -> Option<usize> {
    src.windows(CRLF_LEN).position(|window| window == CRLF)
}
