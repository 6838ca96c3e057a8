use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use parking_lot::RwLock;
use crate::core::error::Result;
use crate::core::types::{FieldValue, ValueKind};
use crate::storage::kv_store::KVStore;

/// Replace anything outside `[A-Za-z0-9._]` so arbitrary field names map to
/// safe directory names.
pub fn sanitize_field_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// One KVStore per (field name, value type) pair. Documents are decomposed
/// by field; a batch of per-field writes is committed once via
/// `commit_all`.
pub struct FieldStore {
    root: PathBuf,
    bucket_count: u32,
    stores: RwLock<HashMap<(String, ValueKind), Arc<KVStore>>>,
}

impl FieldStore {
    pub fn open(root: impl Into<PathBuf>, bucket_count: u32) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(FieldStore {
            root,
            bucket_count,
            stores: RwLock::new(HashMap::new()),
        })
    }

    fn store_for(&self, field: &str, kind: ValueKind) -> Result<Arc<KVStore>> {
        let slot = (field.to_string(), kind);
        {
            let stores = self.stores.read();
            if let Some(store) = stores.get(&slot) {
                return Ok(Arc::clone(store));
            }
        }

        let path = self
            .root
            .join(sanitize_field_name(field))
            .join(kind.type_name());
        let store = Arc::new(KVStore::open_with_buckets(path, self.bucket_count)?);
        let mut stores = self.stores.write();
        Ok(Arc::clone(stores.entry(slot).or_insert(store)))
    }

    /// Write one field of a document; `key` is the document id string.
    pub fn put(&self, field: &str, key: &str, value: &FieldValue, commit: bool) -> Result<u64> {
        self.store_for(field, value.kind())?.put_value(key, value, commit)
    }

    pub fn get(&self, field: &str, kind: ValueKind, key: &str) -> Result<Option<FieldValue>> {
        self.store_for(field, kind)?.get_value(key, kind)
    }

    pub fn remove(&self, field: &str, kind: ValueKind, key: &str) -> Result<()> {
        self.store_for(field, kind)?.remove(key)
    }

    /// Commit every open per-field store as one batch.
    pub fn commit_all(&self) -> Result<()> {
        let stores = self.stores.read();
        for store in stores.values() {
            store.commit()?;
        }
        Ok(())
    }

    pub fn flush_all(&self) -> Result<()> {
        let stores = self.stores.read();
        for store in stores.values() {
            store.flush()?;
        }
        Ok(())
    }
}
