// src/core/protocol/mod.rs

//! Wire protocols spoken by the server: HTTP/1.1 towards clients and RESP
//! towards the key-value cache.

mod http;
mod resp;

pub use http::{HttpCodec, HttpRequest, HttpResponse, Method, Version};
pub use resp::{RespCodec, RespValue};
