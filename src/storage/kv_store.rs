use std::path::PathBuf;
use parking_lot::Mutex;
use crate::core::error::Result;
use crate::core::types::{FieldValue, ValueKind};
use crate::storage::data_log::DataLog;
use crate::storage::hash_index::{DEFAULT_BUCKET_COUNT, HashIndex, TOMBSTONE};
use crate::storage::metadata::{self, MetadataPair};

/// Durable single-key typed store: a DataLog for values, a HashIndex for
/// key bindings, and a metadata file holding the pair of committed offsets.
/// Crash consistency follows from never advancing the metadata past a
/// fully-published entry.
pub struct KVStore {
    root: PathBuf,
    log: DataLog,
    index: HashIndex,
    commit_lock: Mutex<()>,
}

impl KVStore {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        Self::open_with_buckets(root, DEFAULT_BUCKET_COUNT)
    }

    pub fn open_with_buckets(root: impl Into<PathBuf>, bucket_count: u32) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        let meta = metadata::read_pair(&root.join("metadata.dat"))?
            .unwrap_or(MetadataPair { first: 0, second: 0 });
        let log = DataLog::open(root.join("data").join("segment"), meta.first)?;
        let index = HashIndex::open(root.join("index"), bucket_count, meta.second)?;
        Ok(KVStore {
            root,
            log,
            index,
            commit_lock: Mutex::new(()),
        })
    }

    pub fn root(&self) -> &PathBuf {
        &self.root
    }

    fn put(&self, key: &str, value: &FieldValue, commit: bool) -> Result<u64> {
        let offset = self.log.append(key, value)?;
        self.index.put(key, offset as i64)?;
        if commit {
            self.commit()?;
        }
        Ok(offset)
    }

    pub fn put_string(&self, key: &str, value: &str, commit: bool) -> Result<u64> {
        self.put(key, &FieldValue::Text(value.to_string()), commit)
    }

    pub fn put_int(&self, key: &str, value: i32, commit: bool) -> Result<u64> {
        self.put(key, &FieldValue::Integer(value), commit)
    }

    pub fn put_float_array(&self, key: &str, value: &[f32], commit: bool) -> Result<u64> {
        self.put(key, &FieldValue::Vector(value.to_vec()), commit)
    }

    pub fn put_float_matrix(&self, key: &str, value: &[Vec<f32>], commit: bool) -> Result<u64> {
        self.put(key, &FieldValue::Matrix(value.to_vec()), commit)
    }

    pub fn put_bytes(&self, key: &str, value: &[u8], commit: bool) -> Result<u64> {
        self.put(key, &FieldValue::Bytes(value.to_vec()), commit)
    }

    pub fn put_value(&self, key: &str, value: &FieldValue, commit: bool) -> Result<u64> {
        self.put(key, value, commit)
    }

    /// Current binding of `key`, if live.
    pub fn offset_of(&self, key: &str) -> Result<Option<u64>> {
        Ok(self
            .index
            .get(key)?
            .filter(|off| *off != TOMBSTONE)
            .map(|off| off as u64))
    }

    fn get(&self, key: &str, kind: ValueKind) -> Result<Option<FieldValue>> {
        match self.offset_of(key)? {
            Some(offset) => Ok(Some(self.log.read_value(offset, kind)?)),
            None => Ok(None),
        }
    }

    pub fn get_string(&self, key: &str) -> Result<Option<String>> {
        Ok(self.get(key, ValueKind::Text)?.and_then(|v| match v {
            FieldValue::Text(s) => Some(s),
            _ => None,
        }))
    }

    pub fn get_int(&self, key: &str) -> Result<Option<i32>> {
        Ok(self.get(key, ValueKind::Integer)?.and_then(|v| match v {
            FieldValue::Integer(i) => Some(i),
            _ => None,
        }))
    }

    pub fn get_float_array(&self, key: &str) -> Result<Option<Vec<f32>>> {
        Ok(self.get(key, ValueKind::Vector)?.and_then(|v| match v {
            FieldValue::Vector(a) => Some(a),
            _ => None,
        }))
    }

    pub fn get_float_matrix(&self, key: &str) -> Result<Option<Vec<Vec<f32>>>> {
        Ok(self.get(key, ValueKind::Matrix)?.and_then(|v| match v {
            FieldValue::Matrix(m) => Some(m),
            _ => None,
        }))
    }

    pub fn get_bytes(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.get(key, ValueKind::Bytes)?.and_then(|v| match v {
            FieldValue::Bytes(b) => Some(b),
            _ => None,
        }))
    }

    pub fn get_value(&self, key: &str, kind: ValueKind) -> Result<Option<FieldValue>> {
        self.get(key, kind)
    }

    /// Direct DataLog accessors; the offsets returned from puts stay valid
    /// for the lifetime of the store.
    pub fn string_at(&self, offset: u64) -> Result<String> {
        match self.log.read_value(offset, ValueKind::Text)? {
            FieldValue::Text(s) => Ok(s),
            _ => unreachable!("read_value enforces the tag"),
        }
    }

    pub fn int_at(&self, offset: u64) -> Result<i32> {
        match self.log.read_value(offset, ValueKind::Integer)? {
            FieldValue::Integer(i) => Ok(i),
            _ => unreachable!("read_value enforces the tag"),
        }
    }

    pub fn float_array_at(&self, offset: u64) -> Result<Vec<f32>> {
        match self.log.read_value(offset, ValueKind::Vector)? {
            FieldValue::Vector(a) => Ok(a),
            _ => unreachable!("read_value enforces the tag"),
        }
    }

    pub fn float_matrix_at(&self, offset: u64) -> Result<Vec<Vec<f32>>> {
        match self.log.read_value(offset, ValueKind::Matrix)? {
            FieldValue::Matrix(m) => Ok(m),
            _ => unreachable!("read_value enforces the tag"),
        }
    }

    pub fn bytes_at(&self, offset: u64) -> Result<Vec<u8>> {
        match self.log.read_value(offset, ValueKind::Bytes)? {
            FieldValue::Bytes(b) => Ok(b),
            _ => unreachable!("read_value enforces the tag"),
        }
    }

    pub fn value_at(&self, offset: u64, kind: ValueKind) -> Result<FieldValue> {
        self.log.read_value(offset, kind)
    }

    /// Key and value of the entry starting at `offset`, regardless of its
    /// current binding; used to walk the dictionary by internal id.
    pub fn entry_at(&self, offset: u64) -> Result<(String, FieldValue)> {
        self.log.read_entry(offset)
    }

    pub fn remove(&self, key: &str) -> Result<()> {
        self.index.remove(key)
    }

    /// Live value offsets, deduplicated per key.
    pub fn value_offsets(&self) -> Result<Vec<u64>> {
        Ok(self
            .index
            .value_offsets()?
            .into_iter()
            .map(|off| off as u64)
            .collect())
    }

    /// Flush mapped pages without moving the metadata offsets.
    pub fn flush(&self) -> Result<()> {
        self.log.flush()?;
        self.index.flush()
    }

    /// Flush mapped pages and durably record both committed offsets.
    /// Serialized so concurrent committers cannot race the metadata
    /// replacement.
    pub fn commit(&self) -> Result<()> {
        let _guard = self.commit_lock.lock();
        self.log.flush()?;
        self.index.flush()?;
        metadata::write_pair(
            &self.root.join("metadata.dat"),
            MetadataPair {
                first: self.log.committed_offset(),
                second: self.index.committed_offset(),
            },
        )
    }
}
