//! Webhook signature verification (Svix signing scheme)
//!
//! The identity provider signs `{svix-id}.{svix-timestamp}.{body}` with
//! HMAC-SHA256 using the base64 key after the `whsec_` prefix. The
//! `svix-signature` header carries one or more space-separated `v1,<base64>`
//! entries; any one matching is enough.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

pub const HEADER_ID: &str = "svix-id";
pub const HEADER_TIMESTAMP: &str = "svix-timestamp";
pub const HEADER_SIGNATURE: &str = "svix-signature";

const SECRET_PREFIX: &str = "whsec_";

/// Accepted clock skew in either direction
pub const TIMESTAMP_TOLERANCE_SECS: i64 = 5 * 60;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("Webhook secret is not valid base64: {0}")]
    InvalidSecret(String),

    #[error("Invalid signature timestamp")]
    InvalidTimestamp,

    #[error("Message timestamp too old")]
    TimestampTooOld,

    #[error("Message timestamp too new")]
    TimestampTooNew,

    #[error("No matching signature found")]
    NoMatchingSignature,
}

/// The three signing headers of one delivery
#[derive(Debug, Clone, Copy)]
pub struct SignatureHeaders<'a> {
    pub id: &'a str,
    pub timestamp: &'a str,
    pub signature: &'a str,
}

#[derive(Clone)]
pub struct SignatureVerifier {
    key: Vec<u8>,
}

impl std::fmt::Debug for SignatureVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignatureVerifier").finish_non_exhaustive()
    }
}

impl SignatureVerifier {
    pub fn new(secret: &str) -> Result<Self, SignatureError> {
        let encoded = secret.strip_prefix(SECRET_PREFIX).unwrap_or(secret);
        let key = BASE64
            .decode(encoded)
            .map_err(|e| SignatureError::InvalidSecret(e.to_string()))?;
        Ok(Self { key })
    }

    pub fn verify(
        &self,
        headers: &SignatureHeaders<'_>,
        payload: &[u8],
    ) -> Result<(), SignatureError> {
        self.verify_at(headers, payload, chrono::Utc::now().timestamp())
    }

    /// Verify against an explicit clock, in unix seconds
    pub fn verify_at(
        &self,
        headers: &SignatureHeaders<'_>,
        payload: &[u8],
        now: i64,
    ) -> Result<(), SignatureError> {
        let timestamp: i64 = headers
            .timestamp
            .trim()
            .parse()
            .map_err(|_| SignatureError::InvalidTimestamp)?;

        // An overflowing difference can only come from a timestamp far from now
        let too_old = match now.checked_sub(timestamp) {
            Some(age) => age > TIMESTAMP_TOLERANCE_SECS,
            None => timestamp < now,
        };
        if too_old {
            return Err(SignatureError::TimestampTooOld);
        }
        if timestamp > now.saturating_add(TIMESTAMP_TOLERANCE_SECS) {
            return Err(SignatureError::TimestampTooNew);
        }

        let expected = self.compute(headers.id, timestamp, payload)?;

        let matched = headers
            .signature
            .split_whitespace()
            .filter_map(|entry| entry.split_once(','))
            .filter(|(version, _)| *version == "v1")
            .filter_map(|(_, sig)| BASE64.decode(sig).ok())
            .any(|candidate| bool::from(candidate.as_slice().ct_eq(expected.as_slice())));

        if matched {
            Ok(())
        } else {
            Err(SignatureError::NoMatchingSignature)
        }
    }

    /// Produce a `v1,<base64>` signature entry for a delivery
    pub fn sign(
        &self,
        msg_id: &str,
        timestamp: i64,
        payload: &[u8],
    ) -> Result<String, SignatureError> {
        let digest = self.compute(msg_id, timestamp, payload)?;
        Ok(format!("v1,{}", BASE64.encode(digest)))
    }

    fn compute(
        &self,
        msg_id: &str,
        timestamp: i64,
        payload: &[u8],
    ) -> Result<Vec<u8>, SignatureError> {
        let mut mac = HmacSha256::new_from_slice(&self.key)
            .map_err(|e| SignatureError::InvalidSecret(e.to_string()))?;
        mac.update(format!("{}.{}.", msg_id, timestamp).as_bytes());
        mac.update(payload);
        Ok(mac.finalize().into_bytes().to_vec())
    }
}
