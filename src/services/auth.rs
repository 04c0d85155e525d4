//! Bearer token signing and verification.
//!
//! Tokens are HS256 JWTs, issued by the login endpoint or by any other issuer
//! holding the same secret. `sub` is the principal id and the optional
//! `admin` claim grants elevated privilege.

use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::services::access::Principal;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    pub sub: String,
    #[serde(default)]
    pub admin: bool,
    pub exp: i64,
    pub iat: i64,
}

pub struct JwtVerifier {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
}

impl JwtVerifier {
    pub fn new(secret: &str) -> Result<Self, AuthError> {
        if secret.is_empty() {
            return Err(AuthError::EmptySecret);
        }
        Ok(Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            validation: Validation::default(),
        })
    }

    /// Validate signature and expiry, returning the caller.
    pub fn verify(&self, token: &str) -> Result<Principal, AuthError> {
        let data = decode::<Claims>(token, &self.decoding, &self.validation)
            .map_err(AuthError::Token)?;
        Ok(Principal {
            id: data.claims.sub,
            is_admin: data.claims.admin,
        })
    }

    /// Sign a token for `principal`, valid for `ttl_secs`.
    pub fn issue(&self, principal: &Principal, ttl_secs: i64) -> Result<String, AuthError> {
        let now = chrono::Utc::now().timestamp();
        let claims = Claims {
            sub: principal.id.clone(),
            admin: principal.is_admin,
            exp: now + ttl_secs,
            iat: now,
        };
        encode(&Header::default(), &claims, &self.encoding).map_err(AuthError::Token)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("JWT secret must not be empty")]
    EmptySecret,

    #[error("Invalid or expired token: {0}")]
    Token(#[from] jsonwebtoken::errors::Error),
}
