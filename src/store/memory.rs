//! In-process store
//!
//! Backs simulations and tests. Supports artificial latency, to widen race
//! windows between concurrent callers, and fault injection.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use super::{merge_fields, CasOutcome, ConfigStore, Fields, Record, StoreError, StoreResult};

#[derive(Debug, Default)]
struct Faults {
    unavailable: bool,
    failing_fields: HashSet<String>,
}

/// A `ConfigStore` held entirely in memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: Mutex<HashMap<String, Record>>,
    faults: Mutex<Faults>,
    latency: Option<Duration>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty store that sleeps for `latency` before every operation.
    #[must_use]
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency: Some(latency),
            ..Self::default()
        }
    }

    /// Make every operation fail with [`StoreError::Unavailable`].
    pub fn set_unavailable(&self, unavailable: bool) {
        if let Ok(mut faults) = self.faults.lock() {
            faults.unavailable = unavailable;
        }
    }

    /// Make `set` and `compare_and_set` fail when they write `field`.
    ///
    /// `create` is unaffected so a namespace can still be bootstrapped.
    pub fn fail_writes_touching(&self, field: &str) {
        if let Ok(mut faults) = self.faults.lock() {
            faults.failing_fields.insert(field.to_string());
        }
    }

    /// Clear all injected faults.
    pub fn clear_faults(&self) {
        if let Ok(mut faults) = self.faults.lock() {
            *faults = Faults::default();
        }
    }

    /// Snapshot of a record, bypassing latency and faults.
    #[must_use]
    pub fn peek(&self, namespace: &str) -> Option<Record> {
        self.records
            .lock()
            .ok()
            .and_then(|records| records.get(namespace).cloned())
    }

    async fn delay(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }

    fn check_available(&self) -> StoreResult<()> {
        let faults = self
            .faults
            .lock()
            .map_err(|_| StoreError::Unavailable("fault table poisoned".to_string()))?;
        if faults.unavailable {
            return Err(StoreError::Unavailable("injected outage".to_string()));
        }
        Ok(())
    }

    fn check_write(&self, fields: &Fields) -> StoreResult<()> {
        self.check_available()?;
        let faults = self
            .faults
            .lock()
            .map_err(|_| StoreError::Unavailable("fault table poisoned".to_string()))?;
        if let Some(field) = fields.keys().find(|k| faults.failing_fields.contains(*k)) {
            return Err(StoreError::Unavailable(format!(
                "injected write failure on '{field}'"
            )));
        }
        Ok(())
    }

    fn records(&self) -> StoreResult<MutexGuard<'_, HashMap<String, Record>>> {
        self.records
            .lock()
            .map_err(|_| StoreError::Unavailable("record table poisoned".to_string()))
    }
}

impl ConfigStore for MemoryStore {
    async fn get(&self, namespace: &str) -> StoreResult<Option<Record>> {
        self.delay().await;
        self.check_available()?;
        Ok(self.records()?.get(namespace).cloned())
    }

    async fn create(&self, namespace: &str, fields: Fields) -> StoreResult<Record> {
        self.delay().await;
        self.check_available()?;
        let mut records = self.records()?;
        let record = records
            .entry(namespace.to_string())
            .or_insert_with(|| Record { version: 1, fields });
        Ok(record.clone())
    }

    async fn set(&self, namespace: &str, fields: Fields) -> StoreResult<Record> {
        self.delay().await;
        self.check_write(&fields)?;
        let mut records = self.records()?;
        let record = records
            .get_mut(namespace)
            .ok_or_else(|| StoreError::NotFound(namespace.to_string()))?;
        merge_fields(record, fields);
        Ok(record.clone())
    }

    async fn compare_and_set(
        &self,
        namespace: &str,
        expected_version: u64,
        fields: Fields,
    ) -> StoreResult<CasOutcome> {
        self.delay().await;
        self.check_write(&fields)?;
        let mut records = self.records()?;
        let record = records
            .get_mut(namespace)
            .ok_or_else(|| StoreError::NotFound(namespace.to_string()))?;
        if record.version != expected_version {
            return Ok(CasOutcome::Conflict {
                current_version: record.version,
            });
        }
        merge_fields(record, fields);
        Ok(CasOutcome::Applied(record.clone()))
    }
}
