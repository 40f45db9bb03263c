// src/core/auth/token.rs

//! The session-token primitive, independent of any storage.
//!
//! A token is `<id>.<signature>`: a random 128-bit id in hex and an
//! HMAC-SHA256 over the id under the server secret, also in hex. Validation
//! fails closed and indistinguishably on every malformed or forged input, so
//! a probing client learns nothing about which check rejected it.

use hmac::{Hmac, Mac};
use rand::RngCore;
use rand::rngs::OsRng;
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Raw entropy per session id: 128 bits, rendered as 32 hex characters.
const SESSION_ID_BYTES: usize = 16;

/// Produces a cryptographically random session id.
pub fn generate_session_id() -> String {
    let mut buffer = [0u8; SESSION_ID_BYTES];
    OsRng.fill_bytes(&mut buffer);
    hex::encode(buffer)
}

/// Computes the hex HMAC-SHA256 signature of `id` under `secret`.
pub fn sign(id: &str, secret: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC accepts keys of any length");
    mac.update(id.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Generates a fresh signed token: `<32 hex chars>.<64 hex chars>`.
pub fn mint_token(secret: &str) -> String {
    let id = generate_session_id();
    let signature = sign(&id, secret);
    format!("{id}.{signature}")
}

/// Checks a presented token against `secret`. The signature comparison is
/// constant-time; a missing separator, bad hex, or wrong signature all fail
/// the same way.
pub fn validate(token: &str, secret: &str) -> bool {
    let Some((id, signature)) = token.split_once('.') else {
        return false;
    };
    if id.is_empty() || signature.is_empty() {
        return false;
    }
    let Ok(signature_bytes) = hex::decode(signature) else {
        return false;
    };

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC accepts keys of any length");
    mac.update(id.as_bytes());
    mac.verify_slice(&signature_bytes).is_ok()
}
