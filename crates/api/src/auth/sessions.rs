//! Identity-provider session tokens
//!
//! Session JWTs are issued by the identity provider and verified locally
//! against its PEM public key (RS256). Claims follow the provider's v1 and
//! v2 layouts: the active organization is either `org_id` or `o.id`.

use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use thiserror::Error;

/// Cookie the identity provider's frontend stores the session token in
pub const SESSION_COOKIE: &str = "__session";

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Invalid session verification key: {0}")]
    InvalidKey(String),

    #[error("Invalid session token: {0}")]
    InvalidToken(#[from] jsonwebtoken::errors::Error),
}

#[derive(Debug, Deserialize)]
struct OrganizationClaim {
    id: String,
    rol: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SessionClaims {
    sub: String,
    sid: Option<String>,
    org_id: Option<String>,
    org_role: Option<String>,
    o: Option<OrganizationClaim>,
}

/// A signed-in user, as seen by the request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub user_id: String,
    pub session_id: Option<String>,
    pub org_id: Option<String>,
    pub org_role: Option<String>,
}

impl Session {
    pub fn has_organization(&self) -> bool {
        self.org_id.is_some()
    }
}

impl From<SessionClaims> for Session {
    fn from(claims: SessionClaims) -> Self {
        let (org_id, org_role) = match claims.o {
            Some(o) => (Some(o.id), o.rol),
            None => (claims.org_id, claims.org_role),
        };

        Self {
            user_id: claims.sub,
            session_id: claims.sid,
            org_id: org_id.filter(|id| !id.is_empty()),
            org_role,
        }
    }
}

#[derive(Clone)]
pub struct SessionVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl SessionVerifier {
    /// Verifier for RS256 tokens signed by the identity provider
    pub fn from_rsa_pem(pem: &str) -> Result<Self, SessionError> {
        let key = DecodingKey::from_rsa_pem(pem.as_bytes())
            .map_err(|e| SessionError::InvalidKey(e.to_string()))?;
        Ok(Self::with_key(key, Algorithm::RS256))
    }

    /// Verifier for HS256 tokens with a shared secret
    pub fn from_secret(secret: &[u8]) -> Self {
        Self::with_key(DecodingKey::from_secret(secret), Algorithm::HS256)
    }

    fn with_key(key: DecodingKey, algorithm: Algorithm) -> Self {
        let mut validation = Validation::new(algorithm);
        validation.validate_nbf = true;
        // Session tokens carry an authorized party, not an audience
        validation.validate_aud = false;
        Self { key, validation }
    }

    pub fn verify(&self, token: &str) -> Result<Session, SessionError> {
        let data = decode::<SessionClaims>(token, &self.key, &self.validation)?;
        Ok(data.claims.into())
    }
}
