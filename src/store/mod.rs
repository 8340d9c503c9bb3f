//! Shared key-value store backing the rotation counter
//!
//! A store holds named records of string fields. Every write bumps the
//! record's version, which `compare_and_set` uses to make conditional
//! updates atomic.

pub mod file;
pub mod memory;

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

pub use file::FileStore;
pub use memory::MemoryStore;

/// Field name to value mapping of a single record.
pub type Fields = BTreeMap<String, String>;

/// Result alias for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// A versioned record read from a store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    /// Incremented on every write, starting at 1 on creation
    pub version: u64,
    /// Current field values
    pub fields: Fields,
}

impl Record {
    /// Look up a field value.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }
}

/// Outcome of a conditional write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CasOutcome {
    /// The expected version matched and the write was applied
    Applied(Record),
    /// Another writer got there first
    Conflict {
        /// Version found in the store
        current_version: u64,
    },
}

/// Errors raised by store backends.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The namespace has not been created
    #[error("namespace '{0}' not found")]
    NotFound(String),
    /// The backend could not be reached or refused the operation
    #[error("store unavailable: {0}")]
    Unavailable(String),
    /// Filesystem failure in a file-backed store
    #[error("store i/o error: {0}")]
    Io(#[from] std::io::Error),
    /// Stored document could not be encoded or decoded
    #[error("store serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Narrow key-value interface the assignment service coordinates through.
///
/// Implementations do not need to serialize `get`/`set` pairs; callers that
/// need read-modify-write atomicity use [`ConfigStore::compare_and_set`].
pub trait ConfigStore: Send + Sync {
    /// Read a namespace, or `None` if it was never created.
    fn get(&self, namespace: &str) -> impl Future<Output = StoreResult<Option<Record>>> + Send;

    /// Create a namespace with initial fields. Returns the existing record
    /// untouched if the namespace already exists.
    fn create(
        &self,
        namespace: &str,
        fields: Fields,
    ) -> impl Future<Output = StoreResult<Record>> + Send;

    /// Merge `fields` into an existing namespace unconditionally.
    fn set(&self, namespace: &str, fields: Fields)
        -> impl Future<Output = StoreResult<Record>> + Send;

    /// Merge `fields` only if the record is still at `expected_version`.
    fn compare_and_set(
        &self,
        namespace: &str,
        expected_version: u64,
        fields: Fields,
    ) -> impl Future<Output = StoreResult<CasOutcome>> + Send;
}

impl<T: ConfigStore> ConfigStore for Arc<T> {
    fn get(&self, namespace: &str) -> impl Future<Output = StoreResult<Option<Record>>> + Send {
        (**self).get(namespace)
    }

    fn create(
        &self,
        namespace: &str,
        fields: Fields,
    ) -> impl Future<Output = StoreResult<Record>> + Send {
        (**self).create(namespace, fields)
    }

    fn set(
        &self,
        namespace: &str,
        fields: Fields,
    ) -> impl Future<Output = StoreResult<Record>> + Send {
        (**self).set(namespace, fields)
    }

    fn compare_and_set(
        &self,
        namespace: &str,
        expected_version: u64,
        fields: Fields,
    ) -> impl Future<Output = StoreResult<CasOutcome>> + Send {
        (**self).compare_and_set(namespace, expected_version, fields)
    }
}

/// Apply a partial update to a record, bumping its version.
pub(crate) fn merge_fields(record: &mut Record, fields: Fields) {
    record.fields.extend(fields);
    record.version += 1;
}

/// Build a `Fields` map from string pairs.
#[must_use]
pub fn fields<const N: usize>(pairs: [(&str, String); N]) -> Fields {
    pairs
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
}
