use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{debug, instrument};

/// Best-effort cache for serialized ranking views. Values live until their
/// TTL elapses or a write to the owning leaderboard invalidates the whole
/// key prefix. Never a correctness dependency: a miss falls through to the
/// store.
#[async_trait]
pub trait RankingCache: Send + Sync {
    async fn get(&self, key: &str) -> Option<String>;
    async fn set(&self, key: &str, value: String, ttl: Duration);
    async fn invalidate_prefix(&self, prefix: &str);
}

/// In-memory TTL map implementation of RankingCache
pub struct InMemoryRankingCache {
    entries: Mutex<HashMap<String, (String, Instant)>>,
}

impl Default for InMemoryRankingCache {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryRankingCache {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl RankingCache for InMemoryRankingCache {
    #[instrument(skip(self))]
    async fn get(&self, key: &str) -> Option<String> {
        let mut entries = self.entries.lock().unwrap();

        match entries.get(key) {
            Some((value, expires_at)) if *expires_at > Instant::now() => {
                debug!(key = %key, "Cache hit");
                Some(value.clone())
            }
            Some(_) => {
                // Expired; drop it so the map doesn't accumulate dead keys.
                entries.remove(key);
                debug!(key = %key, "Cache entry expired");
                None
            }
            None => None,
        }
    }

    #[instrument(skip(self, value))]
    async fn set(&self, key: &str, value: String, ttl: Duration) {
        let mut entries = self.entries.lock().unwrap();
        entries.insert(key.to_string(), (value, Instant::now() + ttl));
    }

    #[instrument(skip(self))]
    async fn invalidate_prefix(&self, prefix: &str) {
        let mut entries = self.entries.lock().unwrap();
        let before = entries.len();
        entries.retain(|key, _| !key.starts_with(prefix));
        debug!(
            prefix = %prefix,
            removed = before - entries.len(),
            "Invalidated cached views"
        );
    }
}
