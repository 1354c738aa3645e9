//! Identity verification for the session handshake.
//!
//! Verification is an external concern: the handler hands over the raw
//! credential from the first frame and gets back either a stable identity or
//! a typed failure. [`JwtVerifier`] is the production implementation; tests
//! substitute their own.

mod jwt;

pub use jwt::JwtVerifier;

use async_trait::async_trait;
use thiserror::Error;

/// Errors that can occur while verifying a credential
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Invalid credential: {0}")]
    InvalidCredential(#[from] jsonwebtoken::errors::Error),

    #[error("Credential carries no subject")]
    MissingSubject,

    #[error("Missing verification secret")]
    MissingSecret,
}

/// Configuration for credential verification
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// Shared secret the credentials are signed with
    pub secret: String,
}

impl AuthConfig {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    /// Create from environment variables
    pub fn from_env() -> Result<Self, AuthError> {
        let secret = std::env::var("AUTH_SECRET").map_err(|_| AuthError::MissingSecret)?;
        if secret.is_empty() {
            return Err(AuthError::MissingSecret);
        }
        Ok(Self::new(secret))
    }
}

/// Maps an opaque credential to a stable participant identity
#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    async fn verify(&self, credential: &str) -> Result<String, AuthError>;
}
