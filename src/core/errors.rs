// src/core/errors.rs

//! Defines the primary error type for the entire application.

use std::num::ParseIntError;
use std::sync::Arc;
use thiserror::Error;

/// The main error enum, representing all possible failures within the server.
/// Using `thiserror` allows for clean error definitions and automatic `From` trait implementations.
#[derive(Error, Debug)]
pub enum GlossdError {
    #[error("IO Error: {0}")]
    Io(Arc<std::io::Error>),

    #[error("Incomplete data in stream")]
    IncompleteData,

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Request entity too large")]
    PayloadTooLarge,

    #[error("Invalid or expired session")]
    SessionInvalid,

    #[error("Too many requests")]
    RateLimited,

    #[error("Database error: {0}")]
    Database(String),

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("HTTP client error: {0}")]
    HttpClientError(String),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal Server Error: {0}")]
    Internal(String),
}

// Manual implementation of Clone because `std::io::Error` is not cloneable.
// We wrap it in an Arc to allow for cheap, shared cloning.
impl Clone for GlossdError {
    fn clone(&self) -> Self {
        match self {
            GlossdError::Io(e) => GlossdError::Io(Arc::clone(e)),
            GlossdError::IncompleteData => GlossdError::IncompleteData,
            GlossdError::InvalidRequest(s) => GlossdError::InvalidRequest(s.clone()),
            GlossdError::PayloadTooLarge => GlossdError::PayloadTooLarge,
            GlossdError::SessionInvalid => GlossdError::SessionInvalid,
            GlossdError::RateLimited => GlossdError::RateLimited,
            GlossdError::Database(s) => GlossdError::Database(s.clone()),
            GlossdError::Cache(s) => GlossdError::Cache(s.clone()),
            GlossdError::HttpClientError(s) => GlossdError::HttpClientError(s.clone()),
            GlossdError::Tls(s) => GlossdError::Tls(s.clone()),
            GlossdError::Config(s) => GlossdError::Config(s.clone()),
            GlossdError::Internal(s) => GlossdError::Internal(s.clone()),
        }
    }
}

impl PartialEq for GlossdError {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (GlossdError::Io(e1), GlossdError::Io(e2)) => e1.to_string() == e2.to_string(),
            (GlossdError::InvalidRequest(s1), GlossdError::InvalidRequest(s2)) => s1 == s2,
            (GlossdError::Database(s1), GlossdError::Database(s2)) => s1 == s2,
            (GlossdError::Cache(s1), GlossdError::Cache(s2)) => s1 == s2,
            (GlossdError::HttpClientError(s1), GlossdError::HttpClientError(s2)) => s1 == s2,
            (GlossdError::Tls(s1), GlossdError::Tls(s2)) => s1 == s2,
            (GlossdError::Config(s1), GlossdError::Config(s2)) => s1 == s2,
            (GlossdError::Internal(s1), GlossdError::Internal(s2)) => s1 == s2,
            _ => core::mem::discriminant(self) == core::mem::discriminant(other),
        }
    }
}

// --- From trait implementations for easy error conversion ---

impl From<std::io::Error> for GlossdError {
    fn from(e: std::io::Error) -> Self {
        GlossdError::Io(Arc::new(e))
    }
}

impl From<sqlx::Error> for GlossdError {
    fn from(e: sqlx::Error) -> Self {
        GlossdError::Database(e.to_string())
    }
}

impl From<reqwest::Error> for GlossdError {
    fn from(e: reqwest::Error) -> Self {
        GlossdError::HttpClientError(e.to_string())
    }
}

impl From<rustls::Error> for GlossdError {
    fn from(e: rustls::Error) -> Self {
        GlossdError::Tls(e.to_string())
    }
}

impl From<serde_json::Error> for GlossdError {
    fn from(e: serde_json::Error) -> Self {
        GlossdError::InvalidRequest(format!("Invalid JSON: {e}"))
    }
}

impl From<ParseIntError> for GlossdError {
    fn from(_: ParseIntError) -> Self {
        GlossdError::InvalidRequest("Value is not an integer or out of range".to_string())
    }
}

impl From<std::str::Utf8Error> for GlossdError {
    fn from(_: std::str::Utf8Error) -> Self {
        GlossdError::InvalidRequest("Invalid UTF-8 in request".to_string())
    }
}
