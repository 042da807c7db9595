use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;

use super::client::UpdateSource;
use super::router::UpdateRouter;
use crate::kv::KeyValueStore;

const UPDATE_MARKER_TTL_S: u64 = 60 * 60 * 24;
const OFFSET_KEY: &str = "telegram:offset";

/// Exactly-once update intake: an update is processed only when its
/// `telegram:update:{id}` marker is newly reserved, and the offset
/// checkpoint only ever moves forward.
pub struct UpdateDedupe {
    kv: Arc<dyn KeyValueStore>,
}

impl UpdateDedupe {
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        Self { kv }
    }

    pub async fn should_process(&self, update_id: i64) -> Result<bool> {
        let key = format!("telegram:update:{update_id}");
        self.kv.set_nx(&key, "1", UPDATE_MARKER_TTL_S).await
    }
}

pub struct OffsetStore {
    kv: Arc<dyn KeyValueStore>,
}

impl OffsetStore {
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        Self { kv }
    }

    /// Stored offset, or 0 when absent or unparseable.
    pub async fn get(&self) -> Result<i64> {
        let raw = self.kv.get(OFFSET_KEY).await?;
        Ok(raw
            .and_then(|value| value.trim().parse().ok())
            .unwrap_or(0))
    }

    pub async fn set(&self, offset: i64) -> Result<()> {
        self.kv.set(OFFSET_KEY, &offset.to_string(), None).await
    }
}

pub struct UpdatePoller {
    client: Arc<dyn UpdateSource>,
    router: Arc<UpdateRouter>,
    dedupe: UpdateDedupe,
    offsets: OffsetStore,
    poll_timeout_s: u64,
    poll_retry_ms: u64,
    stop: AtomicBool,
}

impl UpdatePoller {
    pub fn new(
        client: Arc<dyn UpdateSource>,
        router: Arc<UpdateRouter>,
        kv: Arc<dyn KeyValueStore>,
        poll_timeout_s: u64,
        poll_retry_ms: u64,
    ) -> Self {
        Self {
            client,
            router,
            dedupe: UpdateDedupe::new(kv.clone()),
            offsets: OffsetStore::new(kv),
            poll_timeout_s,
            poll_retry_ms,
            stop: AtomicBool::new(false),
        }
    }

    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    pub async fn run(&self) -> Result<()> {
        let mut offset = self.offsets.get().await.unwrap_or(0);
        tracing::info!(offset, "starting telegram long poll worker");

        while !self.stop.load(Ordering::SeqCst) {
            match self.client.get_updates(offset, self.poll_timeout_s).await {
                Ok(updates) => {
                    for update in updates {
                        let next = offset.max(update.update_id + 1);
                        match self.dedupe.should_process(update.update_id).await {
                            Ok(true) => {}
                            Ok(false) => {
                                // Seen before; just advance the checkpoint.
                                offset = next;
                                self.checkpoint(offset).await;
                                continue;
                            }
                            Err(error) => {
                                // Dedupe store down: leave the marker and
                                // offset untouched and retry this update
                                // on the next poll.
                                tracing::error!(%error, "dedupe check failed");
                                break;
                            }
                        }
                        if let Err(error) = self.router.route(&update).await {
                            tracing::error!(
                                %error,
                                update_id = update.update_id,
                                "update handling failed"
                            );
                        }
                        offset = next;
                        self.checkpoint(offset).await;
                    }
                }
                Err(error) => {
                    tracing::error!(%error, "polling loop failed");
                    tokio::time::sleep(Duration::from_millis(self.poll_retry_ms)).await;
                }
            }
        }

        tracing::info!("telegram poller stopped");
        Ok(())
    }

    async fn checkpoint(&self, offset: i64) {
        if let Err(error) = self.offsets.set(offset).await {
            tracing::warn!(%error, offset, "offset checkpoint failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryKv;

    #[tokio::test]
    async fn dedupe_reserves_an_update_exactly_once() {
        let dedupe = UpdateDedupe::new(Arc::new(MemoryKv::new()));
        assert!(dedupe.should_process(42).await.unwrap());
        assert!(!dedupe.should_process(42).await.unwrap());
        assert!(dedupe.should_process(43).await.unwrap());
    }

    #[tokio::test]
    async fn offset_defaults_to_zero_and_round_trips() {
        let offsets = OffsetStore::new(Arc::new(MemoryKv::new()));
        assert_eq!(offsets.get().await.unwrap(), 0);
        offsets.set(1234).await.unwrap();
        assert_eq!(offsets.get().await.unwrap(), 1234);
    }

    #[tokio::test]
    async fn garbage_offset_reads_as_zero() {
        let kv = Arc::new(MemoryKv::new());
        kv.set("telegram:offset", "not-a-number", None).await.unwrap();
        let offsets = OffsetStore::new(kv);
        assert_eq!(offsets.get().await.unwrap(), 0);
    }
}
