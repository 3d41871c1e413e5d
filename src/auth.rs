//! Token validation seam for the external authentication collaborator
//!
//! Validation happens exactly once per connect handshake. This subsystem
//! never caches or refreshes tokens; an expired credential surfaces as a
//! terminal authentication failure and the caller must obtain a fresh token.

use crate::tier::Tier;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

/// Authentication failures, never auto-retried
#[derive(Debug, Error, Clone, PartialEq)]
pub enum AuthError {
    #[error("token rejected")]
    InvalidToken,
    #[error("token expired at {expired_at}")]
    Expired { expired_at: DateTime<Utc> },
    #[error("authentication service unavailable: {0}")]
    Unavailable(String),
}

/// Claims returned by the authentication collaborator for a valid token
#[derive(Debug, Clone, PartialEq)]
pub struct TokenClaims {
    pub subscriber_id: String,
    pub tier: Tier,
    pub expires_at: DateTime<Utc>,
}

impl TokenClaims {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// Validation seam for the external authentication service
#[async_trait]
pub trait TokenValidator: Send + Sync {
    /// Validate a bearer token presented during the connect handshake
    async fn validate(&self, token: &str) -> Result<TokenClaims, AuthError>;
}

/// Fixed token table, for deployments where the authentication collaborator
/// is not wired in (and for tests)
#[derive(Debug, Default)]
pub struct StaticTokenValidator {
    tokens: std::collections::HashMap<String, TokenClaims>,
}

impl StaticTokenValidator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, token: impl Into<String>, claims: TokenClaims) {
        self.tokens.insert(token.into(), claims);
    }

    pub fn with_token(mut self, token: impl Into<String>, claims: TokenClaims) -> Self {
        self.insert(token, claims);
        self
    }

    pub fn from_config(section: &crate::config::AuthSection) -> Self {
        let mut validator = Self::new();
        for entry in &section.tokens {
            validator.insert(
                entry.token.clone(),
                TokenClaims {
                    subscriber_id: entry.subscriber_id.clone(),
                    tier: entry.tier,
                    // Entries without an expiry never expire
                    expires_at: entry.expires_at.unwrap_or(DateTime::<Utc>::MAX_UTC),
                },
            );
        }
        validator
    }
}

#[async_trait]
impl TokenValidator for StaticTokenValidator {
    async fn validate(&self, token: &str) -> Result<TokenClaims, AuthError> {
        let claims = self.tokens.get(token).ok_or(AuthError::InvalidToken)?;
        if claims.is_expired(Utc::now()) {
            return Err(AuthError::Expired {
                expired_at: claims.expires_at,
            });
        }
        Ok(claims.clone())
    }
}
