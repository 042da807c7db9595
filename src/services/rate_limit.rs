use std::sync::Arc;

use crate::kv::KeyValueStore;

/// Fixed-window counter backed by the shared key-value store.
///
/// A store failure counts as a denial. The limiter guards security-sensitive
/// paths (claim codes, OAuth connect), so losing the counter must never turn
/// into unlimited attempts.
pub struct RateLimiter {
    kv: Arc<dyn KeyValueStore>,
}

impl RateLimiter {
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        Self { kv }
    }

    /// Returns true when the caller is still under `max` hits for the
    /// current window. The first hit of a window sets the expiry.
    pub async fn check(&self, key: &str, max: i64, window_s: u64) -> bool {
        match self.kv.incr_with_expiry(key, window_s).await {
            Ok(count) => count <= max,
            Err(error) => {
                tracing::warn!(key, %error, "rate limit store unavailable, denying");
                false
            }
        }
    }
}
