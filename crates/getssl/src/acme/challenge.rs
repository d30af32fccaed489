//! HTTP-01 challenge registry
//!
//! Holds the token -> key authorization mapping served by the responder at
//! `/.well-known/acme-challenge/<token>`.

use dashmap::DashMap;
use std::sync::Arc;
use tracing::{debug, trace};

/// HTTP-01 challenge path prefix
pub const ACME_CHALLENGE_PREFIX: &str = "/.well-known/acme-challenge/";

/// Pending HTTP-01 challenges, shared between the sequencer and the responder
///
/// Cloning is cheap and every clone sees the same registrations.
#[derive(Debug, Clone, Default)]
pub struct ChallengeManager {
    /// Map of challenge token -> key authorization response
    challenges: Arc<DashMap<String, String>>,
}

impl ChallengeManager {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the key authorization to serve for `token`
    pub fn add_challenge(&self, token: &str, key_authorization: &str) {
        debug!(token = %token, "Registering ACME HTTP-01 challenge");
        self.challenges
            .insert(token.to_string(), key_authorization.to_string());
    }

    /// Stop serving `token`
    pub fn remove_challenge(&self, token: &str) {
        if self.challenges.remove(token).is_some() {
            debug!(token = %token, "Removed ACME challenge");
        }
    }

    /// Key authorization registered for `token`
    pub fn get_response(&self, token: &str) -> Option<String> {
        let result = self.challenges.get(token).map(|v| v.clone());
        if result.is_none() {
            trace!(token = %token, "ACME challenge token not found");
        }
        result
    }

    /// Token part of a challenge request path
    ///
    /// Returns `None` for paths outside the challenge prefix and for an
    /// empty or nested token.
    pub fn extract_token(path: &str) -> Option<&str> {
        path.strip_prefix(ACME_CHALLENGE_PREFIX)
            .filter(|token| !token.is_empty() && !token.contains('/'))
    }

    #[cfg(test)]
    pub(crate) fn pending_count(&self) -> usize {
        self.challenges.len()
    }
}
