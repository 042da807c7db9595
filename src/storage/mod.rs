// Relational persistence: ownership, allow-list, audit trail, integration
// connections and heartbeat job configs.

mod memory;
mod postgres;

use crate::config::StorageConfig;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

pub use memory::MemoryStore;
pub use postgres::PostgresStore;

#[derive(Debug, Clone)]
pub struct OwnerRecord {
    pub owner_user_id: String,
    pub claimed_at: String,
}

#[derive(Debug, Clone)]
pub struct AuditEvent {
    pub actor_user_id: Option<String>,
    pub event_type: String,
    pub metadata: Value,
}

#[derive(Debug, Clone)]
pub struct IntegrationConnection {
    pub integration_type: String,
    pub provider: String,
    pub config: Value,
}

#[derive(Debug, Clone)]
pub struct HeartbeatJob {
    pub owner_user_id: String,
    pub job_type: String,
    pub schedule_cron: String,
    pub timezone: String,
    pub enabled: bool,
    pub config: Value,
}

/// Outcome of one transactional claim attempt. Rate limiting happens
/// before the transaction and is not represented here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimOutcome {
    Claimed,
    AlreadyClaimed,
    Unavailable,
    InvalidCode,
}

/// Checks a supplied code against the stored hash; runs inside the claim
/// transaction while the claim-code row is locked.
pub type ClaimVerifier = dyn Fn(&str) -> bool + Send + Sync;

#[async_trait]
pub trait RelationalStore: Send + Sync {
    async fn ensure_initialized(&self) -> Result<()>;

    async fn get_owner(&self) -> Result<Option<OwnerRecord>>;
    async fn seed_claim_code_if_missing(&self, code_hash: &str) -> Result<()>;

    /// The single-owner claim transaction: locks the owner singleton and
    /// the active claim code, verifies the supplied code and commits the
    /// owner, allow-list entry, initial profile, code consumption and
    /// audit event atomically. At most one concurrent caller ever
    /// observes `Claimed`.
    async fn claim_owner(
        &self,
        user_id: &str,
        default_model: &str,
        verify: &ClaimVerifier,
    ) -> Result<ClaimOutcome>;

    async fn is_allowed_user(&self, user_id: &str) -> Result<bool>;
    async fn log_audit(&self, event: AuditEvent) -> Result<()>;

    async fn list_integrations(&self, user_id: &str) -> Result<Vec<IntegrationConnection>>;
    async fn get_integration(
        &self,
        user_id: &str,
        integration_type: &str,
    ) -> Result<Option<IntegrationConnection>>;
    async fn upsert_integration(
        &self,
        user_id: &str,
        integration_type: &str,
        provider: &str,
        config: &Value,
    ) -> Result<()>;

    async fn list_heartbeats(&self, user_id: &str) -> Result<Vec<HeartbeatJob>>;
    async fn enabled_heartbeats_by_type(&self, job_type: &str) -> Result<Vec<HeartbeatJob>>;
    async fn upsert_heartbeat(&self, job: &HeartbeatJob) -> Result<()>;

    async fn get_timezone(&self, user_id: &str) -> Result<Option<String>>;
}

pub fn build_storage(config: &StorageConfig) -> Result<Arc<dyn RelationalStore>> {
    let backend = config.backend.trim().to_lowercase();
    match backend.as_str() {
        "postgres" | "postgresql" | "pg" | "" => Ok(Arc::new(PostgresStore::new(
            config.postgres.dsn.clone(),
            config.postgres.connect_timeout_s,
            config.postgres.pool_size,
        )?)),
        "memory" => Ok(Arc::new(MemoryStore::new())),
        other => Err(anyhow!("unknown storage backend: {other}")),
    }
}
