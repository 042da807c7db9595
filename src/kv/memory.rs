use crate::kv::KeyValueStore;
use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::HashMap;

enum Entry {
    Scalar(String),
    List(Vec<String>),
}

struct Slot {
    entry: Entry,
    expires_at: Option<f64>,
}

/// In-memory key-value backend with TTL bookkeeping. Serves tests and
/// single-process development deployments.
#[derive(Default)]
pub struct MemoryKv {
    slots: Mutex<HashMap<String, Slot>>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }

    /// Force-expire a key, for tests that exercise TTL behavior.
    pub fn expire_now(&self, key: &str) {
        let mut slots = self.slots.lock();
        if let Some(slot) = slots.get_mut(key) {
            slot.expires_at = Some(now_ts() - 1.0);
        }
    }

    fn prune(slots: &mut HashMap<String, Slot>) {
        let now = now_ts();
        slots.retain(|_, slot| slot.expires_at.map(|at| at > now).unwrap_or(true));
    }
}

fn now_ts() -> f64 {
    Utc::now().timestamp_millis() as f64 / 1000.0
}

fn deadline(ttl_s: u64) -> Option<f64> {
    Some(now_ts() + ttl_s as f64)
}

#[async_trait]
impl KeyValueStore for MemoryKv {
    async fn set_nx(&self, key: &str, value: &str, ttl_s: u64) -> Result<bool> {
        let mut slots = self.slots.lock();
        Self::prune(&mut slots);
        if slots.contains_key(key) {
            return Ok(false);
        }
        slots.insert(
            key.to_string(),
            Slot {
                entry: Entry::Scalar(value.to_string()),
                expires_at: deadline(ttl_s),
            },
        );
        Ok(true)
    }

    async fn set(&self, key: &str, value: &str, ttl_s: Option<u64>) -> Result<()> {
        let mut slots = self.slots.lock();
        Self::prune(&mut slots);
        slots.insert(
            key.to_string(),
            Slot {
                entry: Entry::Scalar(value.to_string()),
                expires_at: ttl_s.and_then(deadline),
            },
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut slots = self.slots.lock();
        Self::prune(&mut slots);
        Ok(slots.get(key).and_then(|slot| match &slot.entry {
            Entry::Scalar(value) => Some(value.clone()),
            Entry::List(_) => None,
        }))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.slots.lock().remove(key);
        Ok(())
    }

    async fn get_del(&self, key: &str) -> Result<Option<String>> {
        let mut slots = self.slots.lock();
        Self::prune(&mut slots);
        Ok(slots.remove(key).and_then(|slot| match slot.entry {
            Entry::Scalar(value) => Some(value),
            Entry::List(_) => None,
        }))
    }

    async fn incr_with_expiry(&self, key: &str, window_s: u64) -> Result<i64> {
        let mut slots = self.slots.lock();
        Self::prune(&mut slots);
        match slots.get_mut(key) {
            Some(slot) => {
                let current = match &slot.entry {
                    Entry::Scalar(value) => value.parse::<i64>().unwrap_or(0),
                    Entry::List(_) => 0,
                };
                let next = current + 1;
                slot.entry = Entry::Scalar(next.to_string());
                Ok(next)
            }
            None => {
                slots.insert(
                    key.to_string(),
                    Slot {
                        entry: Entry::Scalar("1".to_string()),
                        expires_at: deadline(window_s),
                    },
                );
                Ok(1)
            }
        }
    }

    async fn list_push(&self, key: &str, value: &str, keep_last: i64, ttl_s: u64) -> Result<()> {
        let mut slots = self.slots.lock();
        Self::prune(&mut slots);
        let slot = slots.entry(key.to_string()).or_insert_with(|| Slot {
            entry: Entry::List(Vec::new()),
            expires_at: None,
        });
        let items = match &mut slot.entry {
            Entry::List(items) => items,
            Entry::Scalar(_) => {
                slot.entry = Entry::List(Vec::new());
                match &mut slot.entry {
                    Entry::List(items) => items,
                    Entry::Scalar(_) => unreachable!(),
                }
            }
        };
        items.push(value.to_string());
        let keep = keep_last.max(0) as usize;
        if items.len() > keep {
            let drop = items.len() - keep;
            items.drain(..drop);
        }
        slot.expires_at = deadline(ttl_s);
        Ok(())
    }

    async fn list_range(&self, key: &str) -> Result<Vec<String>> {
        let mut slots = self.slots.lock();
        Self::prune(&mut slots);
        Ok(slots
            .get(key)
            .and_then(|slot| match &slot.entry {
                Entry::List(items) => Some(items.clone()),
                Entry::Scalar(_) => None,
            })
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_nx_reserves_once() {
        let kv = MemoryKv::new();
        assert!(kv.set_nx("k", "1", 60).await.unwrap());
        assert!(!kv.set_nx("k", "1", 60).await.unwrap());
        kv.expire_now("k");
        assert!(kv.set_nx("k", "1", 60).await.unwrap());
    }

    #[tokio::test]
    async fn test_get_del_yields_the_value_once() {
        let kv = MemoryKv::new();
        kv.set("k", "v", Some(60)).await.unwrap();
        assert_eq!(kv.get_del("k").await.unwrap().as_deref(), Some("v"));
        assert_eq!(kv.get_del("k").await.unwrap(), None);
        assert_eq!(kv.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_incr_window() {
        let kv = MemoryKv::new();
        assert_eq!(kv.incr_with_expiry("c", 60).await.unwrap(), 1);
        assert_eq!(kv.incr_with_expiry("c", 60).await.unwrap(), 2);
        kv.expire_now("c");
        assert_eq!(kv.incr_with_expiry("c", 60).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_list_push_trims_to_window() {
        let kv = MemoryKv::new();
        for i in 0..5 {
            kv.list_push("l", &i.to_string(), 3, 60).await.unwrap();
        }
        assert_eq!(kv.list_range("l").await.unwrap(), vec!["2", "3", "4"]);
    }
}
