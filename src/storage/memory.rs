use crate::storage::{
    AuditEvent, ClaimOutcome, ClaimVerifier, HeartbeatJob, IntegrationConnection, OwnerRecord,
    RelationalStore,
};
use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{HashMap, HashSet};

struct ClaimCodeRow {
    code_hash: String,
    consumed: bool,
}

struct Profile {
    default_model: String,
    timezone: Option<String>,
}

#[derive(Default)]
struct State {
    owner: Option<OwnerRecord>,
    claim_code: Option<ClaimCodeRow>,
    whitelist: HashSet<String>,
    profiles: HashMap<String, Profile>,
    audit: Vec<AuditEvent>,
    integrations: HashMap<(String, String), IntegrationConnection>,
    heartbeats: HashMap<(String, String), HeartbeatJob>,
}

/// In-memory relational backend. The single mutex serializes every claim
/// attempt, which is exactly the guarantee the row locks give Postgres.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of logged audit events, for tests.
    pub fn audit_events(&self) -> Vec<AuditEvent> {
        self.state.lock().audit.clone()
    }

    /// Test helper: set a profile timezone the way onboarding would.
    pub fn set_timezone(&self, user_id: &str, timezone: &str) {
        let mut state = self.state.lock();
        let profile = state
            .profiles
            .entry(user_id.to_string())
            .or_insert_with(|| Profile {
                default_model: String::new(),
                timezone: None,
            });
        profile.timezone = Some(timezone.to_string());
    }

    pub fn claim_code_consumed(&self) -> bool {
        self.state
            .lock()
            .claim_code
            .as_ref()
            .map(|row| row.consumed)
            .unwrap_or(false)
    }
}

#[async_trait]
impl RelationalStore for MemoryStore {
    async fn ensure_initialized(&self) -> Result<()> {
        Ok(())
    }

    async fn get_owner(&self) -> Result<Option<OwnerRecord>> {
        Ok(self.state.lock().owner.clone())
    }

    async fn seed_claim_code_if_missing(&self, code_hash: &str) -> Result<()> {
        let mut state = self.state.lock();
        if state.claim_code.is_none() {
            state.claim_code = Some(ClaimCodeRow {
                code_hash: code_hash.to_string(),
                consumed: false,
            });
        }
        Ok(())
    }

    async fn claim_owner(
        &self,
        user_id: &str,
        default_model: &str,
        verify: &ClaimVerifier,
    ) -> Result<ClaimOutcome> {
        let mut state = self.state.lock();

        if state.owner.is_some() {
            return Ok(ClaimOutcome::AlreadyClaimed);
        }
        let code_hash = match &state.claim_code {
            Some(row) if !row.consumed => row.code_hash.clone(),
            _ => return Ok(ClaimOutcome::Unavailable),
        };

        if !verify(&code_hash) {
            state.audit.push(AuditEvent {
                actor_user_id: Some(user_id.to_string()),
                event_type: "claim_failed_invalid_code".to_string(),
                metadata: serde_json::json!({ "reason": "invalid_code" }),
            });
            return Ok(ClaimOutcome::InvalidCode);
        }

        state.owner = Some(OwnerRecord {
            owner_user_id: user_id.to_string(),
            claimed_at: Utc::now().to_rfc3339(),
        });
        state.whitelist.insert(user_id.to_string());
        state
            .profiles
            .entry(user_id.to_string())
            .or_insert_with(|| Profile {
                default_model: default_model.to_string(),
                timezone: None,
            });
        if let Some(row) = state.claim_code.as_mut() {
            row.consumed = true;
        }
        state.audit.push(AuditEvent {
            actor_user_id: Some(user_id.to_string()),
            event_type: "claim_success".to_string(),
            metadata: serde_json::json!({ "source": "claim_code" }),
        });
        Ok(ClaimOutcome::Claimed)
    }

    async fn is_allowed_user(&self, user_id: &str) -> Result<bool> {
        Ok(self.state.lock().whitelist.contains(user_id))
    }

    async fn log_audit(&self, event: AuditEvent) -> Result<()> {
        self.state.lock().audit.push(event);
        Ok(())
    }

    async fn list_integrations(&self, user_id: &str) -> Result<Vec<IntegrationConnection>> {
        let state = self.state.lock();
        let mut items: Vec<IntegrationConnection> = state
            .integrations
            .iter()
            .filter(|((owner, _), _)| owner == user_id)
            .map(|(_, connection)| connection.clone())
            .collect();
        items.sort_by(|a, b| a.integration_type.cmp(&b.integration_type));
        Ok(items)
    }

    async fn get_integration(
        &self,
        user_id: &str,
        integration_type: &str,
    ) -> Result<Option<IntegrationConnection>> {
        let key = (user_id.to_string(), integration_type.to_string());
        Ok(self.state.lock().integrations.get(&key).cloned())
    }

    async fn upsert_integration(
        &self,
        user_id: &str,
        integration_type: &str,
        provider: &str,
        config: &Value,
    ) -> Result<()> {
        let key = (user_id.to_string(), integration_type.to_string());
        self.state.lock().integrations.insert(
            key,
            IntegrationConnection {
                integration_type: integration_type.to_string(),
                provider: provider.to_string(),
                config: config.clone(),
            },
        );
        Ok(())
    }

    async fn list_heartbeats(&self, user_id: &str) -> Result<Vec<HeartbeatJob>> {
        let state = self.state.lock();
        let mut items: Vec<HeartbeatJob> = state
            .heartbeats
            .iter()
            .filter(|((owner, _), _)| owner == user_id)
            .map(|(_, job)| job.clone())
            .collect();
        items.sort_by(|a, b| a.job_type.cmp(&b.job_type));
        Ok(items)
    }

    async fn enabled_heartbeats_by_type(&self, job_type: &str) -> Result<Vec<HeartbeatJob>> {
        let state = self.state.lock();
        Ok(state
            .heartbeats
            .values()
            .filter(|job| job.job_type == job_type && job.enabled)
            .cloned()
            .collect())
    }

    async fn upsert_heartbeat(&self, job: &HeartbeatJob) -> Result<()> {
        let key = (job.owner_user_id.clone(), job.job_type.clone());
        self.state.lock().heartbeats.insert(key, job.clone());
        Ok(())
    }

    async fn get_timezone(&self, user_id: &str) -> Result<Option<String>> {
        Ok(self
            .state
            .lock()
            .profiles
            .get(user_id)
            .and_then(|profile| profile.timezone.clone()))
    }
}
