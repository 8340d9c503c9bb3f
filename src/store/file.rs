//! File-backed store
//!
//! Persists all namespaces in a single JSON document. Writes go to a temp
//! file first and are renamed into place so readers never observe a torn
//! document. Conditional writes are atomic within one process; separate
//! processes sharing the file only get the lock protocol's best-effort
//! guarantees.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::{merge_fields, CasOutcome, ConfigStore, Fields, Record, StoreError, StoreResult};

type Document = BTreeMap<String, Record>;

/// A `ConfigStore` persisted to a JSON file.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    io: Mutex<()>,
}

impl FileStore {
    /// Open (or lazily create) a store at `path`.
    ///
    /// The parent directory is created if it does not exist.
    pub fn open<P: AsRef<Path>>(path: P) -> StoreResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        Ok(Self {
            path,
            io: Mutex::new(()),
        })
    }

    /// Path of the backing document.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> StoreResult<Document> {
        if !self.path.exists() {
            return Ok(Document::new());
        }
        let content = std::fs::read_to_string(&self.path)?;
        if content.trim().is_empty() {
            return Ok(Document::new());
        }
        Ok(serde_json::from_str(&content)?)
    }

    fn save(&self, document: &Document) -> StoreResult<()> {
        let json = serde_json::to_string_pretty(document)?;
        let tmp_path = self.path.with_extension("json.tmp");
        std::fs::write(&tmp_path, json.as_bytes())?;
        std::fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }

    /// Run `f` against the loaded document while holding the in-process I/O lock.
    fn with_document<T>(
        &self,
        f: impl FnOnce(&mut Document) -> StoreResult<(T, bool)>,
    ) -> StoreResult<T> {
        let _guard = self
            .io
            .lock()
            .map_err(|_| StoreError::Unavailable("file store lock poisoned".to_string()))?;
        let mut document = self.load()?;
        let (value, dirty) = f(&mut document)?;
        if dirty {
            self.save(&document)?;
        }
        Ok(value)
    }
}

impl ConfigStore for FileStore {
    async fn get(&self, namespace: &str) -> StoreResult<Option<Record>> {
        self.with_document(|doc| Ok((doc.get(namespace).cloned(), false)))
    }

    async fn create(&self, namespace: &str, fields: Fields) -> StoreResult<Record> {
        self.with_document(|doc| {
            if let Some(existing) = doc.get(namespace) {
                return Ok((existing.clone(), false));
            }
            let record = Record { version: 1, fields };
            doc.insert(namespace.to_string(), record.clone());
            Ok((record, true))
        })
    }

    async fn set(&self, namespace: &str, fields: Fields) -> StoreResult<Record> {
        self.with_document(|doc| {
            let record = doc
                .get_mut(namespace)
                .ok_or_else(|| StoreError::NotFound(namespace.to_string()))?;
            merge_fields(record, fields);
            Ok((record.clone(), true))
        })
    }

    async fn compare_and_set(
        &self,
        namespace: &str,
        expected_version: u64,
        fields: Fields,
    ) -> StoreResult<CasOutcome> {
        self.with_document(|doc| {
            let record = doc
                .get_mut(namespace)
                .ok_or_else(|| StoreError::NotFound(namespace.to_string()))?;
            if record.version != expected_version {
                return Ok((
                    CasOutcome::Conflict {
                        current_version: record.version,
                    },
                    false,
                ));
            }
            merge_fields(record, fields);
            Ok((CasOutcome::Applied(record.clone()), true))
        })
    }
}
