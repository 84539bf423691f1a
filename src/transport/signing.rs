//! HMAC-SHA256 request signing shared by the outbound relay client and the
//! inbound event endpoint.
//!
//! The signature is HMAC-SHA256(secret, timestamp + method + path + body)
//! encoded as base64.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use hmac::{Hmac, Mac};
use reqwest::header::{HeaderMap, HeaderValue};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

pub const HEADER_SIGNATURE: &str = "x-wagerline-signature";
pub const HEADER_TIMESTAMP: &str = "x-wagerline-timestamp";

#[derive(Error, Debug, PartialEq, Eq)]
pub enum SignatureError {
    #[error("missing header {0}")]
    MissingHeader(&'static str),
    #[error("malformed timestamp")]
    BadTimestamp,
    #[error("request is {age_secs}s away from server time")]
    Stale { age_secs: i64 },
    #[error("signature mismatch")]
    Mismatch,
    #[error("HMAC key error: {0}")]
    HmacKey(String),
}

fn mac(secret: &str, timestamp: i64, method: &str, path: &str, body: &[u8]) -> Result<HmacSha256, SignatureError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| SignatureError::HmacKey(e.to_string()))?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(method.to_uppercase().as_bytes());
    mac.update(path.as_bytes());
    mac.update(body);
    Ok(mac)
}

pub fn sign(secret: &str, timestamp: i64, method: &str, path: &str, body: &[u8]) -> Result<String, SignatureError> {
    let mac = mac(secret, timestamp, method, path, body)?;
    Ok(BASE64.encode(mac.finalize().into_bytes()))
}

/// Signature headers for a request sent now.
pub fn signed_headers(secret: &str, method: &str, path: &str, body: &[u8]) -> Result<HeaderMap, SignatureError> {
    let timestamp = chrono::Utc::now().timestamp();
    let signature = sign(secret, timestamp, method, path, body)?;

    let mut headers = HeaderMap::new();
    headers.insert(HEADER_TIMESTAMP, HeaderValue::from(timestamp));
    headers.insert(
        HEADER_SIGNATURE,
        HeaderValue::from_str(&signature).map_err(|e| SignatureError::HmacKey(e.to_string()))?,
    );
    Ok(headers)
}

/// Check the signature headers of an inbound request against `now`.
pub fn verify(
    secret: &str,
    headers: &HeaderMap,
    method: &str,
    path: &str,
    body: &[u8],
    now: i64,
    max_skew_secs: i64,
) -> Result<(), SignatureError> {
    let timestamp = headers
        .get(HEADER_TIMESTAMP)
        .ok_or(SignatureError::MissingHeader(HEADER_TIMESTAMP))?
        .to_str()
        .ok()
        .and_then(|t| t.parse::<i64>().ok())
        .ok_or(SignatureError::BadTimestamp)?;
    let signature = headers
        .get(HEADER_SIGNATURE)
        .ok_or(SignatureError::MissingHeader(HEADER_SIGNATURE))?
        .to_str()
        .map_err(|_| SignatureError::Mismatch)?;

    // Header-supplied, so the arithmetic must not overflow.
    let age_secs = now.saturating_sub(timestamp);
    if age_secs.unsigned_abs() > u64::try_from(max_skew_secs).unwrap_or(0) {
        return Err(SignatureError::Stale { age_secs });
    }

    let expected = BASE64.decode(signature).map_err(|_| SignatureError::Mismatch)?;
    mac(secret, timestamp, method, path, body)?
        .verify_slice(&expected)
        .map_err(|_| SignatureError::Mismatch)
}
