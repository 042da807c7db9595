// Shared key-value store used for dedup markers, offsets, rate-limit
// windows, pending confirmations and conversation memory.

mod memory;
mod upstash;

use crate::config::KvConfig;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::sync::Arc;

pub use memory::MemoryKv;
pub use upstash::UpstashKv;

/// Atomic key-value primitives; every mutation that correctness depends on
/// is a single store operation, never read-then-write.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// `SET key value EX ttl NX`; true iff the key was newly reserved.
    async fn set_nx(&self, key: &str, value: &str, ttl_s: u64) -> Result<bool>;

    async fn set(&self, key: &str, value: &str, ttl_s: Option<u64>) -> Result<()>;
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn delete(&self, key: &str) -> Result<()>;

    /// Read and delete in one store operation; at most one caller observes
    /// the value for a given key.
    async fn get_del(&self, key: &str) -> Result<Option<String>>;

    /// Increment a counter, applying the window expiry only when the
    /// counter is new. Returns the post-increment count.
    async fn incr_with_expiry(&self, key: &str, window_s: u64) -> Result<i64>;

    /// Append to a list, trim it to the last `keep_last` entries and
    /// refresh the list TTL.
    async fn list_push(&self, key: &str, value: &str, keep_last: i64, ttl_s: u64) -> Result<()>;
    async fn list_range(&self, key: &str) -> Result<Vec<String>>;
}

pub fn build_kv(config: &KvConfig, http: reqwest::Client) -> Result<Arc<dyn KeyValueStore>> {
    let backend = config.backend.trim().to_lowercase();
    match backend.as_str() {
        "upstash" | "redis" | "" => Ok(Arc::new(UpstashKv::new(
            http,
            config.upstash.rest_url.clone(),
            config.upstash.rest_token.clone(),
        )?)),
        "memory" => Ok(Arc::new(MemoryKv::new())),
        other => Err(anyhow!("unknown kv backend: {other}")),
    }
}
