//! JWT credential verification.
//!
//! Credentials are HS256-signed tokens whose `sub` claim is the participant
//! identity. Expiry is enforced by the validation defaults.

use async_trait::async_trait;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

use super::{AuthConfig, AuthError, IdentityVerifier};

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String,
    exp: u64,
}

/// HS256 verifier over a shared secret
pub struct JwtVerifier {
    decoding_key: DecodingKey,
    validation: Validation,
}

impl JwtVerifier {
    pub fn new(config: &AuthConfig) -> Self {
        Self {
            decoding_key: DecodingKey::from_secret(config.secret.as_bytes()),
            validation: Validation::new(Algorithm::HS256),
        }
    }

    /// Build from `AUTH_SECRET`
    pub fn from_env() -> Result<Self, AuthError> {
        Ok(Self::new(&AuthConfig::from_env()?))
    }
}

#[async_trait]
impl IdentityVerifier for JwtVerifier {
    async fn verify(&self, credential: &str) -> Result<String, AuthError> {
        let data = decode::<Claims>(credential, &self.decoding_key, &self.validation)?;
        if data.claims.sub.is_empty() {
            return Err(AuthError::MissingSubject);
        }
        Ok(data.claims.sub)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};

    const SECRET: &str = "test-secret";

    fn token(sub: &str, exp: u64) -> String {
        let claims = Claims {
            sub: sub.to_string(),
            exp,
        };
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(SECRET.as_bytes()),
        )
        .unwrap()
    }

    fn far_future() -> u64 {
        chrono::Utc::now().timestamp() as u64 + 3600
    }

    #[tokio::test]
    async fn test_verify_returns_subject() {
        let verifier = JwtVerifier::new(&AuthConfig::new(SECRET));
        let identity = verifier.verify(&token("user-1", far_future())).await.unwrap();
        assert_eq!(identity, "user-1");
    }

    #[tokio::test]
    async fn test_verify_rejects_wrong_secret() {
        let verifier = JwtVerifier::new(&AuthConfig::new("other-secret"));
        assert!(verifier.verify(&token("user-1", far_future())).await.is_err());
    }

    #[tokio::test]
    async fn test_verify_rejects_expired() {
        let verifier = JwtVerifier::new(&AuthConfig::new(SECRET));
        let expired = chrono::Utc::now().timestamp() as u64 - 3600;
        assert!(verifier.verify(&token("user-1", expired)).await.is_err());
    }

    #[tokio::test]
    async fn test_verify_rejects_garbage() {
        let verifier = JwtVerifier::new(&AuthConfig::new(SECRET));
        assert!(verifier.verify("not-a-token").await.is_err());
    }

    #[tokio::test]
    async fn test_verify_rejects_empty_subject() {
        let verifier = JwtVerifier::new(&AuthConfig::new(SECRET));
        let result = verifier.verify(&token("", far_future())).await;
        assert!(matches!(result, Err(AuthError::MissingSubject)));
    }
}
