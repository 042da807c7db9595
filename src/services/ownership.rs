use std::sync::Arc;

use anyhow::Result;

use super::rate_limit::RateLimiter;
use crate::config::OwnerConfig;
use crate::security::hash::{hash_secret, verify_secret};
use crate::storage::{ClaimOutcome, RelationalStore};

/// Outcome of a claim attempt, as the router reports it to the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimResult {
    Claimed,
    AlreadyClaimed,
    Unavailable,
    InvalidCode,
    TooManyAttempts,
}

/// Single-owner lifecycle: seeding the claim code at startup and arbitrating
/// claim attempts. All verification happens inside the store's claim
/// transaction so concurrent attempts serialize on the row lock.
pub struct OwnershipService {
    store: Arc<dyn RelationalStore>,
    limiter: Arc<RateLimiter>,
    config: OwnerConfig,
    default_model: String,
}

impl OwnershipService {
    pub fn new(
        store: Arc<dyn RelationalStore>,
        limiter: Arc<RateLimiter>,
        config: OwnerConfig,
        default_model: String,
    ) -> Self {
        Self {
            store,
            limiter,
            config,
            default_model,
        }
    }

    /// Hash the configured claim code into the database if no un-consumed
    /// code exists yet. The plaintext never leaves this function.
    pub async fn seed_claim_code(&self) -> Result<()> {
        if self.config.claim_code.trim().is_empty() {
            tracing::warn!("no claim code configured, ownership cannot be claimed");
            return Ok(());
        }
        let encoded = hash_secret(&self.config.claim_code, &self.config.claim_pepper)?;
        self.store.seed_claim_code_if_missing(&encoded).await?;
        Ok(())
    }

    pub async fn owner_user_id(&self) -> Result<Option<String>> {
        Ok(self
            .store
            .get_owner()
            .await?
            .map(|owner| owner.owner_user_id))
    }

    pub async fn is_allowed(&self, user_id: &str) -> Result<bool> {
        self.store.is_allowed_user(user_id).await
    }

    pub async fn claim(&self, user_id: &str, code: &str) -> Result<ClaimResult> {
        // The attempt counter is charged before the store is consulted, so
        // probing for "already claimed" burns attempts too.
        let key = format!("claim:attempt:{user_id}");
        let allowed = self
            .limiter
            .check(
                &key,
                self.config.claim_attempt_max,
                self.config.claim_attempt_window_s,
            )
            .await;
        if !allowed {
            return Ok(ClaimResult::TooManyAttempts);
        }

        let code = code.trim().to_string();
        let pepper = self.config.claim_pepper.clone();
        let verify = move |encoded: &str| verify_secret(&code, &pepper, encoded);
        let outcome = self
            .store
            .claim_owner(user_id, &self.default_model, &verify)
            .await?;
        Ok(match outcome {
            ClaimOutcome::Claimed => ClaimResult::Claimed,
            ClaimOutcome::AlreadyClaimed => ClaimResult::AlreadyClaimed,
            ClaimOutcome::Unavailable => ClaimResult::Unavailable,
            ClaimOutcome::InvalidCode => ClaimResult::InvalidCode,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryKv;
    use crate::storage::MemoryStore;

    fn service(store: Arc<MemoryStore>, max_attempts: i64) -> OwnershipService {
        let config = OwnerConfig {
            claim_code: "open-sesame".to_string(),
            claim_pepper: "pepper".to_string(),
            claim_attempt_max: max_attempts,
            claim_attempt_window_s: 300,
        };
        OwnershipService::new(
            store,
            Arc::new(RateLimiter::new(Arc::new(MemoryKv::new()))),
            config,
            "test-model".to_string(),
        )
    }

    #[tokio::test]
    async fn claim_with_correct_code_succeeds_once() {
        let store = Arc::new(MemoryStore::new());
        let service = service(store.clone(), 5);
        service.seed_claim_code().await.unwrap();

        let first = service.claim("100", "open-sesame").await.unwrap();
        assert_eq!(first, ClaimResult::Claimed);
        assert_eq!(service.owner_user_id().await.unwrap().as_deref(), Some("100"));

        let second = service.claim("200", "open-sesame").await.unwrap();
        assert_eq!(second, ClaimResult::AlreadyClaimed);
    }

    #[tokio::test]
    async fn wrong_code_does_not_claim() {
        let store = Arc::new(MemoryStore::new());
        let service = service(store.clone(), 5);
        service.seed_claim_code().await.unwrap();

        let result = service.claim("100", "guess").await.unwrap();
        assert_eq!(result, ClaimResult::InvalidCode);
        assert!(service.owner_user_id().await.unwrap().is_none());
        // And the code survives the failed attempt.
        let retry = service.claim("100", "open-sesame").await.unwrap();
        assert_eq!(retry, ClaimResult::Claimed);
    }

    #[tokio::test]
    async fn attempts_over_the_limit_are_refused() {
        let store = Arc::new(MemoryStore::new());
        let service = service(store.clone(), 2);
        service.seed_claim_code().await.unwrap();

        assert_eq!(service.claim("100", "no").await.unwrap(), ClaimResult::InvalidCode);
        assert_eq!(service.claim("100", "no").await.unwrap(), ClaimResult::InvalidCode);
        // Third attempt is blocked even with the right code.
        assert_eq!(
            service.claim("100", "open-sesame").await.unwrap(),
            ClaimResult::TooManyAttempts
        );
    }

    #[tokio::test]
    async fn unseeded_code_is_unavailable() {
        let store = Arc::new(MemoryStore::new());
        let service = service(store, 5);
        let result = service.claim("100", "open-sesame").await.unwrap();
        assert_eq!(result, ClaimResult::Unavailable);
    }
}
