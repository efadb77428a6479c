//! Bearer-token providers.
//!
//! Obtaining a token (OAuth consent, refresh) is outside this crate; the
//! orchestrator only needs something that hands one over on demand. Two
//! trivial providers are included for the CLI and for tests.

use crate::error::AuthError;
use async_trait::async_trait;

/// Default variable read by [`EnvTokenProvider`].
pub const DEFAULT_TOKEN_VAR: &str = "CAPTURE2PDF_ACCESS_TOKEN";

/// Source of bearer tokens for the upload sink.
#[async_trait]
pub trait AuthProvider: Send + Sync {
    /// Return a token, prompting the user only when `interactive` is true.
    async fn get_token(&self, interactive: bool) -> Result<String, AuthError>;
}

/// Always returns the same token.
#[derive(Clone)]
pub struct StaticTokenProvider {
    token: String,
}

impl StaticTokenProvider {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

impl std::fmt::Debug for StaticTokenProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("StaticTokenProvider(<redacted>)")
    }
}

#[async_trait]
impl AuthProvider for StaticTokenProvider {
    async fn get_token(&self, _interactive: bool) -> Result<String, AuthError> {
        if self.token.trim().is_empty() {
            return Err(AuthError::Failed("empty token".into()));
        }
        Ok(self.token.clone())
    }
}

/// Reads the token from an environment variable on every call, so a token
/// refreshed by an outside process is picked up without a restart.
#[derive(Debug, Clone)]
pub struct EnvTokenProvider {
    var: String,
}

impl EnvTokenProvider {
    pub fn new(var: impl Into<String>) -> Self {
        Self { var: var.into() }
    }
}

impl Default for EnvTokenProvider {
    fn default() -> Self {
        Self::new(DEFAULT_TOKEN_VAR)
    }
}

#[async_trait]
impl AuthProvider for EnvTokenProvider {
    async fn get_token(&self, _interactive: bool) -> Result<String, AuthError> {
        match std::env::var(&self.var) {
            Ok(t) if !t.trim().is_empty() => Ok(t.trim().to_string()),
            _ => Err(AuthError::Failed(format!("{} is not set", self.var))),
        }
    }
}
