//! Session authentication: resolves a bearer token to a user identity once
//! per connection, before any room operation is permitted.

use campuschat_proto::Identity;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use thiserror::Error;

/// Connection-time authentication failure. The kinds are distinguishable so
/// a client can tell "log in again" apart from a transient server problem.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("no authentication token provided")]
    MissingToken,
    #[error("malformed authentication token")]
    MalformedToken,
    #[error("authentication token expired")]
    ExpiredToken,
    #[error("user not found")]
    UnknownUser,
    #[error("authentication timed out")]
    Timeout,
}

/// Resolves a presented credential to a user identity.
///
/// Runs exactly once per connection; the resolved identity is immutable for
/// the connection's lifetime. Token issuance itself belongs to the external
/// user directory, not to this subsystem.
pub trait Authenticator: Send + Sync {
    fn authenticate(&self, token: Option<&str>) -> Result<Identity, AuthError>;
}

struct TokenEntry {
    identity: Identity,
    expires_at: Option<DateTime<Utc>>,
}

/// In-memory token directory standing in for the external identity
/// provider: token -> identity, with optional expiry.
#[derive(Default)]
pub struct TokenDirectory {
    tokens: DashMap<String, TokenEntry>,
}

impl TokenDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn issue(&self, token: impl Into<String>, identity: Identity) {
        self.tokens.insert(
            token.into(),
            TokenEntry {
                identity,
                expires_at: None,
            },
        );
    }

    pub fn issue_expiring(
        &self,
        token: impl Into<String>,
        identity: Identity,
        expires_at: DateTime<Utc>,
    ) {
        self.tokens.insert(
            token.into(),
            TokenEntry {
                identity,
                expires_at: Some(expires_at),
            },
        );
    }

    pub fn revoke(&self, token: &str) {
        self.tokens.remove(token);
    }
}

impl Authenticator for TokenDirectory {
    fn authenticate(&self, token: Option<&str>) -> Result<Identity, AuthError> {
        let token = token.ok_or(AuthError::MissingToken)?.trim();
        if token.is_empty() || token.chars().any(char::is_whitespace) {
            return Err(AuthError::MalformedToken);
        }
        let entry = self.tokens.get(token).ok_or(AuthError::UnknownUser)?;
        if let Some(expires_at) = entry.expires_at {
            if expires_at <= Utc::now() {
                return Err(AuthError::ExpiredToken);
            }
        }
        Ok(entry.identity.clone())
    }
}
