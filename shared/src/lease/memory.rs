use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use super::{KvLease, LeaseError};

#[derive(Debug, Default)]
pub struct MemoryLease {
    entries: Mutex<HashMap<String, (String, Instant)>>,
}

impl MemoryLease {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_held(&self, key: &str) -> bool {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries
            .get(key)
            .map(|(_, expires_at)| *expires_at > Instant::now())
            .unwrap_or(false)
    }
}

#[async_trait]
impl KvLease for MemoryLease {
    async fn try_acquire(&self, key: &str, holder: &str, ttl: Duration) -> Result<bool, LeaseError> {
        let now = Instant::now();
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some((current, expires_at)) = entries.get(key) {
            if *expires_at > now && current != holder {
                return Ok(false);
            }
        }
        entries.insert(key.to_string(), (holder.to_string(), now + ttl));
        Ok(true)
    }

    async fn release(&self, key: &str, holder: &str) -> Result<(), LeaseError> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        if entries.get(key).map(|(current, _)| current == holder).unwrap_or(false) {
            entries.remove(key);
        }
        Ok(())
    }
}
