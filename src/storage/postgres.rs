use crate::storage::{
    AuditEvent, ClaimOutcome, ClaimVerifier, HeartbeatJob, IntegrationConnection, OwnerRecord,
    RelationalStore,
};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use deadpool_postgres::{Manager, ManagerConfig, Pool, RecyclingMethod};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio_postgres::NoTls;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS ownership_state (
    id SMALLINT PRIMARY KEY CHECK (id = 1),
    owner_user_id TEXT NOT NULL,
    claimed_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
);
CREATE TABLE IF NOT EXISTS claim_codes (
    id BIGSERIAL PRIMARY KEY,
    code_hash TEXT NOT NULL,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    consumed_at TIMESTAMPTZ,
    consumed_by_user_id TEXT
);
CREATE TABLE IF NOT EXISTS whitelist (
    user_id TEXT PRIMARY KEY,
    added_by_user_id TEXT NOT NULL,
    added_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
);
CREATE TABLE IF NOT EXISTS audit_log (
    id BIGSERIAL PRIMARY KEY,
    actor_user_id TEXT,
    event_type TEXT NOT NULL,
    metadata JSONB NOT NULL DEFAULT '{}'::jsonb,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
);
CREATE TABLE IF NOT EXISTS user_profiles (
    user_id TEXT PRIMARY KEY,
    default_model TEXT,
    timezone TEXT,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
);
CREATE TABLE IF NOT EXISTS integration_connections (
    id BIGSERIAL PRIMARY KEY,
    owner_user_id TEXT NOT NULL,
    integration_type TEXT NOT NULL,
    provider TEXT NOT NULL,
    config JSONB NOT NULL DEFAULT '{}'::jsonb,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    UNIQUE (owner_user_id, integration_type, provider)
);
CREATE TABLE IF NOT EXISTS heartbeat_jobs (
    id BIGSERIAL PRIMARY KEY,
    owner_user_id TEXT NOT NULL,
    job_type TEXT NOT NULL,
    schedule_cron TEXT NOT NULL,
    timezone TEXT NOT NULL DEFAULT 'UTC',
    enabled BOOLEAN NOT NULL DEFAULT TRUE,
    config JSONB NOT NULL DEFAULT '{}'::jsonb,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    UNIQUE (owner_user_id, job_type)
);
";

pub struct PostgresStore {
    pool: Pool,
    initialized: AtomicBool,
    init_guard: tokio::sync::Mutex<()>,
}

impl PostgresStore {
    pub fn new(dsn: String, connect_timeout_s: u64, pool_size: usize) -> Result<Self> {
        let cleaned = dsn.trim().to_string();
        if cleaned.is_empty() {
            return Err(anyhow!("postgres dsn is empty"));
        }
        let mut config = cleaned.parse::<tokio_postgres::Config>()?;
        config.connect_timeout(Duration::from_secs(connect_timeout_s.max(1)));
        let manager_config = ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        };
        let manager = Manager::from_config(config, NoTls, manager_config);
        let pool = Pool::builder(manager).max_size(pool_size.max(1)).build()?;
        Ok(Self {
            pool,
            initialized: AtomicBool::new(false),
            init_guard: tokio::sync::Mutex::new(()),
        })
    }

    async fn client(&self) -> Result<deadpool_postgres::Client> {
        self.pool
            .get()
            .await
            .map_err(|err| anyhow!("postgres pool: {err}"))
    }

    fn row_to_integration(row: &tokio_postgres::Row) -> IntegrationConnection {
        IntegrationConnection {
            integration_type: row.get("integration_type"),
            provider: row.get("provider"),
            config: row.get("config"),
        }
    }

    fn row_to_heartbeat(row: &tokio_postgres::Row) -> HeartbeatJob {
        HeartbeatJob {
            owner_user_id: row.get("owner_user_id"),
            job_type: row.get("job_type"),
            schedule_cron: row.get("schedule_cron"),
            timezone: row.get("timezone"),
            enabled: row.get("enabled"),
            config: row.get("config"),
        }
    }
}

#[async_trait]
impl RelationalStore for PostgresStore {
    async fn ensure_initialized(&self) -> Result<()> {
        if self.initialized.load(Ordering::Acquire) {
            return Ok(());
        }
        let _guard = self.init_guard.lock().await;
        if self.initialized.load(Ordering::Acquire) {
            return Ok(());
        }
        let client = self.client().await?;
        client.batch_execute(SCHEMA).await?;
        self.initialized.store(true, Ordering::Release);
        Ok(())
    }

    async fn get_owner(&self) -> Result<Option<OwnerRecord>> {
        let client = self.client().await?;
        let row = client
            .query_opt(
                "SELECT owner_user_id, claimed_at::text AS claimed_at
                 FROM ownership_state WHERE id = 1 LIMIT 1",
                &[],
            )
            .await?;
        Ok(row.map(|row| OwnerRecord {
            owner_user_id: row.get("owner_user_id"),
            claimed_at: row.get("claimed_at"),
        }))
    }

    async fn seed_claim_code_if_missing(&self, code_hash: &str) -> Result<()> {
        let client = self.client().await?;
        let existing = client
            .query_opt("SELECT id FROM claim_codes ORDER BY id ASC LIMIT 1", &[])
            .await?;
        if existing.is_some() {
            return Ok(());
        }
        client
            .execute(
                "INSERT INTO claim_codes (code_hash) VALUES ($1)",
                &[&code_hash],
            )
            .await?;
        Ok(())
    }

    async fn claim_owner(
        &self,
        user_id: &str,
        default_model: &str,
        verify: &ClaimVerifier,
    ) -> Result<ClaimOutcome> {
        let mut client = self.client().await?;
        let tx = client.transaction().await?;

        let owner = tx
            .query_opt(
                "SELECT owner_user_id FROM ownership_state WHERE id = 1 FOR UPDATE",
                &[],
            )
            .await?;
        if owner.is_some() {
            return Ok(ClaimOutcome::AlreadyClaimed);
        }

        let code_row = tx
            .query_opt(
                "SELECT id, code_hash FROM claim_codes
                 WHERE consumed_at IS NULL ORDER BY id ASC LIMIT 1 FOR UPDATE",
                &[],
            )
            .await?;
        let Some(code_row) = code_row else {
            return Ok(ClaimOutcome::Unavailable);
        };
        let code_id: i64 = code_row.get("id");
        let code_hash: String = code_row.get("code_hash");

        if !verify(&code_hash) {
            // Keep the failure in the audit trail even though the claim
            // itself rolls nothing forward.
            tx.execute(
                "INSERT INTO audit_log (actor_user_id, event_type, metadata)
                 VALUES ($1, $2, $3)",
                &[
                    &user_id,
                    &"claim_failed_invalid_code",
                    &json!({ "reason": "invalid_code" }),
                ],
            )
            .await?;
            tx.commit().await?;
            return Ok(ClaimOutcome::InvalidCode);
        }

        tx.execute(
            "INSERT INTO ownership_state (id, owner_user_id) VALUES (1, $1)",
            &[&user_id],
        )
        .await?;
        tx.execute(
            "INSERT INTO whitelist (user_id, added_by_user_id) VALUES ($1, $1)
             ON CONFLICT (user_id) DO NOTHING",
            &[&user_id],
        )
        .await?;
        tx.execute(
            "INSERT INTO user_profiles (user_id, default_model) VALUES ($1, $2)
             ON CONFLICT (user_id) DO NOTHING",
            &[&user_id, &default_model],
        )
        .await?;
        tx.execute(
            "UPDATE claim_codes SET consumed_at = NOW(), consumed_by_user_id = $2 WHERE id = $1",
            &[&code_id, &user_id],
        )
        .await?;
        tx.execute(
            "INSERT INTO audit_log (actor_user_id, event_type, metadata) VALUES ($1, $2, $3)",
            &[
                &user_id,
                &"claim_success",
                &json!({ "source": "claim_code" }),
            ],
        )
        .await?;

        tx.commit().await?;
        Ok(ClaimOutcome::Claimed)
    }

    async fn is_allowed_user(&self, user_id: &str) -> Result<bool> {
        let client = self.client().await?;
        let row = client
            .query_opt("SELECT user_id FROM whitelist WHERE user_id = $1", &[&user_id])
            .await?;
        Ok(row.is_some())
    }

    async fn log_audit(&self, event: AuditEvent) -> Result<()> {
        let client = self.client().await?;
        client
            .execute(
                "INSERT INTO audit_log (actor_user_id, event_type, metadata) VALUES ($1, $2, $3)",
                &[&event.actor_user_id, &event.event_type, &event.metadata],
            )
            .await?;
        Ok(())
    }

    async fn list_integrations(&self, user_id: &str) -> Result<Vec<IntegrationConnection>> {
        let client = self.client().await?;
        let rows = client
            .query(
                "SELECT integration_type, provider, config
                 FROM integration_connections
                 WHERE owner_user_id = $1
                 ORDER BY integration_type ASC",
                &[&user_id],
            )
            .await?;
        Ok(rows.iter().map(Self::row_to_integration).collect())
    }

    async fn get_integration(
        &self,
        user_id: &str,
        integration_type: &str,
    ) -> Result<Option<IntegrationConnection>> {
        let client = self.client().await?;
        let row = client
            .query_opt(
                "SELECT integration_type, provider, config
                 FROM integration_connections
                 WHERE owner_user_id = $1 AND integration_type = $2
                 ORDER BY id ASC LIMIT 1",
                &[&user_id, &integration_type],
            )
            .await?;
        Ok(row.as_ref().map(Self::row_to_integration))
    }

    async fn upsert_integration(
        &self,
        user_id: &str,
        integration_type: &str,
        provider: &str,
        config: &Value,
    ) -> Result<()> {
        let client = self.client().await?;
        client
            .execute(
                "INSERT INTO integration_connections (owner_user_id, integration_type, provider, config)
                 VALUES ($1, $2, $3, $4)
                 ON CONFLICT (owner_user_id, integration_type, provider)
                 DO UPDATE SET config = EXCLUDED.config, updated_at = NOW()",
                &[&user_id, &integration_type, &provider, config],
            )
            .await?;
        Ok(())
    }

    async fn list_heartbeats(&self, user_id: &str) -> Result<Vec<HeartbeatJob>> {
        let client = self.client().await?;
        let rows = client
            .query(
                "SELECT owner_user_id, job_type, schedule_cron, timezone, enabled, config
                 FROM heartbeat_jobs
                 WHERE owner_user_id = $1
                 ORDER BY job_type ASC",
                &[&user_id],
            )
            .await?;
        Ok(rows.iter().map(Self::row_to_heartbeat).collect())
    }

    async fn enabled_heartbeats_by_type(&self, job_type: &str) -> Result<Vec<HeartbeatJob>> {
        let client = self.client().await?;
        let rows = client
            .query(
                "SELECT owner_user_id, job_type, schedule_cron, timezone, enabled, config
                 FROM heartbeat_jobs
                 WHERE job_type = $1 AND enabled = TRUE",
                &[&job_type],
            )
            .await?;
        Ok(rows.iter().map(Self::row_to_heartbeat).collect())
    }

    async fn upsert_heartbeat(&self, job: &HeartbeatJob) -> Result<()> {
        let client = self.client().await?;
        client
            .execute(
                "INSERT INTO heartbeat_jobs (owner_user_id, job_type, schedule_cron, timezone, enabled, config)
                 VALUES ($1, $2, $3, $4, $5, $6)
                 ON CONFLICT (owner_user_id, job_type)
                 DO UPDATE SET
                    schedule_cron = EXCLUDED.schedule_cron,
                    timezone = EXCLUDED.timezone,
                    enabled = EXCLUDED.enabled,
                    config = EXCLUDED.config,
                    updated_at = NOW()",
                &[
                    &job.owner_user_id,
                    &job.job_type,
                    &job.schedule_cron,
                    &job.timezone,
                    &job.enabled,
                    &job.config,
                ],
            )
            .await?;
        Ok(())
    }

    async fn get_timezone(&self, user_id: &str) -> Result<Option<String>> {
        let client = self.client().await?;
        let row = client
            .query_opt(
                "SELECT timezone FROM user_profiles WHERE user_id = $1 LIMIT 1",
                &[&user_id],
            )
            .await?;
        Ok(row.and_then(|row| row.get::<_, Option<String>>("timezone")))
    }
}
