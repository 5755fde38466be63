/// In-memory cloud store for exercising the sync and pump tasks
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::database::{CloudStore, StoreValue};
use crate::error::RigError;

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    values: Arc<Mutex<HashMap<String, String>>>,
    failures_remaining: Arc<AtomicUsize>,
    stalled: Arc<AtomicBool>,
    writes: Arc<AtomicUsize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `count` operations with `NetworkUnavailable`
    pub fn fail_next(&self, count: usize) {
        self.failures_remaining.store(count, Ordering::SeqCst);
    }

    /// Make every operation hang until `set_stalled(false)`
    pub fn set_stalled(&self, stalled: bool) {
        self.stalled.store(stalled, Ordering::SeqCst);
    }

    pub fn value(&self, path: &str) -> Option<String> {
        self.values.lock().unwrap().get(path).cloned()
    }

    pub fn insert(&self, path: &str, value: StoreValue) {
        self.values
            .lock()
            .unwrap()
            .insert(path.to_string(), value.to_string());
    }

    /// Successful `set_values` calls so far
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    async fn gate(&self) -> Result<(), RigError> {
        while self.stalled.load(Ordering::SeqCst) {
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        }
        let injected = self
            .failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(RigError::NetworkUnavailable("simulated outage".into()));
        }
        Ok(())
    }
}

impl CloudStore for MemoryStore {
    async fn set_values(&self, values: &[(String, StoreValue)]) -> Result<(), RigError> {
        self.gate().await?;
        let mut stored = self.values.lock().unwrap();
        for (path, value) in values {
            stored.insert(path.clone(), value.to_string());
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn get_flag(&self, path: &str) -> Result<bool, RigError> {
        self.gate().await?;
        Ok(self
            .value(path)
            .map(|value| value.eq_ignore_ascii_case("true"))
            .unwrap_or(false))
    }
}
