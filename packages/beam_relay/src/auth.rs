//! Beam-key authentication: decides whether a presented credential
//! admits a connection into a beam.
//!
//! This is the relay-access layer only; application identity (used for
//! persistence attribution) lives in `identity.rs`.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::repository::RelayRepository;

/// Checks a credential against a beam. Never raises toward the caller:
/// missing beams, store errors, and lookup timeouts all read as a
/// failed handshake.
#[derive(Clone)]
pub struct AuthValidator {
    repository: Arc<RelayRepository>,
    /// When false, any credential is accepted once the beam exists.
    require_beam_key: bool,
    timeout: Duration,
}

impl AuthValidator {
    pub fn new(repository: Arc<RelayRepository>, require_beam_key: bool, timeout: Duration) -> Self {
        Self {
            repository,
            require_beam_key,
            timeout,
        }
    }

    pub async fn validate(&self, beam_id: &str, credential: &str) -> bool {
        let lookup = tokio::time::timeout(self.timeout, self.repository.get_beam(beam_id)).await;

        match lookup {
            Ok(Ok(Some(beam))) => {
                if !self.require_beam_key {
                    return true;
                }
                let ok = credential == beam.beam_key;
                if !ok {
                    debug!(beam = %beam_id, "Rejected credential for beam");
                }
                ok
            }
            Ok(Ok(None)) => {
                debug!(beam = %beam_id, "Auth against nonexistent beam");
                false
            }
            Ok(Err(e)) => {
                warn!(beam = %beam_id, "Beam lookup failed during auth: {e:#}");
                false
            }
            Err(_) => {
                warn!(beam = %beam_id, "Beam lookup timed out during auth");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::test_helpers::test_repository;

    async fn validator(require_key: bool) -> AuthValidator {
        let repo = Arc::new(test_repository().await);
        repo.create_beam("beam-1", "right-key", None).await.unwrap();
        AuthValidator::new(repo, require_key, Duration::from_secs(2))
    }

    #[tokio::test]
    async fn correct_key_is_accepted() {
        let v = validator(true).await;
        assert!(v.validate("beam-1", "right-key").await);
    }

    #[tokio::test]
    async fn wrong_key_is_rejected() {
        let v = validator(true).await;
        assert!(!v.validate("beam-1", "wrong-key").await);
        assert!(!v.validate("beam-1", "").await);
    }

    #[tokio::test]
    async fn missing_beam_is_rejected_either_way() {
        let strict = validator(true).await;
        assert!(!strict.validate("ghost", "anything").await);

        let lax = validator(false).await;
        assert!(!lax.validate("ghost", "anything").await);
    }

    #[tokio::test]
    async fn lookup_timeout_reads_as_failure() {
        let repo = Arc::new(test_repository().await);
        repo.create_beam("beam-1", "right-key", None).await.unwrap();
        // zero budget: the lookup pends on first poll, so the bound
        // always fires before the store answers
        let v = AuthValidator::new(repo, true, Duration::ZERO);
        // freeze the clock so the zero-duration bound fires before the
        // store's worker thread can answer
        tokio::time::pause();

        assert!(!v.validate("beam-1", "right-key").await);
    }

    #[tokio::test]
    async fn open_mode_accepts_any_credential() {
        let v = validator(false).await;
        assert!(v.validate("beam-1", "whatever").await);
        assert!(v.validate("beam-1", "").await);
    }
}
