use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use parking_lot::RwLock;
use crate::core::error::{Error, Result};
use crate::storage::data_log::align_up8;
use crate::storage::paged_file::PagedFile;

/// 16 MB index segments per bucket.
pub const INDEX_SEGMENT_SIZE: u64 = 16 * 1024 * 1024;

pub const DEFAULT_BUCKET_COUNT: u32 = 1 << 16;

/// Offset value marking a key as removed.
pub const TOMBSTONE: i64 = -1;

/// One bucket-local append-only log. Entries are never modified; a lookup
/// scans the bucket and keeps the last entry whose key matches.
struct Bucket {
    file: PagedFile,
    reserved: AtomicU64,
    committed: AtomicU64,
}

struct BucketEntry {
    key_start: u64,
    key_len: usize,
    value_offset: u64,
    next: u64,
}

impl Bucket {
    /// Entry layout: [i32 entryLen][i32 keyLen][key][pad to 8][i64 dataOffset].
    fn entry_len(key_len: usize) -> u64 {
        align_up8(8 + key_len as u64) + 8
    }

    fn decode_at(&self, cursor: u64) -> Result<Option<BucketEntry>> {
        if !self.file.has_segment(cursor) {
            return Ok(None);
        }
        let entry_len = self.file.load_i32_acquire(cursor)?;
        if entry_len <= 0 {
            return Ok(None);
        }
        let key_len = self.file.read_i32(cursor + 4)?;
        if key_len < 0 || Self::entry_len(key_len as usize) != entry_len as u64 {
            return Err(Error::corruption(format!(
                "bucket entry at {} has inconsistent lengths",
                cursor
            )));
        }
        Ok(Some(BucketEntry {
            key_start: cursor + 8,
            key_len: key_len as usize,
            value_offset: align_up8(cursor + 8 + key_len as u64),
            next: cursor + entry_len as u64,
        }))
    }

    /// Forward scan from zero used both for recovery and lookups.
    fn scan<F>(&self, limit: u64, mut visit: F) -> Result<u64>
    where
        F: FnMut(&[u8], i64) -> Result<()>,
    {
        let mut cursor = 0u64;
        loop {
            let Some(entry) = self.decode_at(cursor)? else {
                return Ok(cursor);
            };
            if limit > 0 && entry.next > limit {
                return Ok(cursor);
            }
            let mut key = vec![0u8; entry.key_len];
            self.file.read_at(entry.key_start, &mut key)?;
            let data_offset = self.file.read_i64(entry.value_offset)?;
            visit(&key, data_offset)?;
            cursor = entry.next;
        }
    }

    fn append(&self, key: &[u8], data_offset: i64) -> Result<()> {
        let entry_len = Self::entry_len(key.len());
        let offset = self.reserved.fetch_add(entry_len, Ordering::SeqCst);

        let mut body = Vec::with_capacity(entry_len as usize - 4);
        body.extend_from_slice(&(key.len() as i32).to_le_bytes());
        body.extend_from_slice(key);
        body.resize((align_up8(offset + 8 + key.len() as u64) - offset) as usize - 4, 0);
        body.extend_from_slice(&data_offset.to_le_bytes());
        self.file.write_at(offset + 4, &body)?;

        self.file.store_i32_release(offset, entry_len as i32)?;
        self.committed.fetch_max(offset + entry_len, Ordering::AcqRel);
        Ok(())
    }
}

/// Durable map from string keys to DataLog offsets: `bucketCount` bucket
/// logs selected by a stable hash, append-only, tombstoned with `-1`.
pub struct HashIndex {
    dir: PathBuf,
    bucket_count: u32,
    buckets: RwLock<HashMap<u32, Arc<Bucket>>>,
    /// Committed bound from the last metadata commit; recovery refuses to
    /// trust bytes beyond it.
    recovered_bound: u64,
}

impl HashIndex {
    pub fn open(dir: impl Into<PathBuf>, bucket_count: u32, committed_offset: u64) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(HashIndex {
            dir,
            bucket_count,
            buckets: RwLock::new(HashMap::new()),
            recovered_bound: committed_offset,
        })
    }

    fn bucket_of(&self, key: &[u8]) -> u32 {
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(key);
        (hasher.finalize() & 0x7FFF_FFFF) % self.bucket_count
    }

    fn open_bucket(&self, index: u32) -> Result<Arc<Bucket>> {
        {
            let buckets = self.buckets.read();
            if let Some(b) = buckets.get(&index) {
                return Ok(Arc::clone(b));
            }
        }

        let file = PagedFile::open(
            &self.dir,
            format!("index-b{}-seg", index),
            ".idx",
            INDEX_SEGMENT_SIZE,
        )?;
        let bucket = Bucket {
            file,
            reserved: AtomicU64::new(0),
            committed: AtomicU64::new(0),
        };
        // Recover the append cursor from disk; stop at the first entry that
        // was never fully published or that lies past the committed bound.
        let cursor = bucket.scan(self.recovered_bound, |_, _| Ok(()))?;
        bucket.reserved.store(cursor, Ordering::SeqCst);
        bucket.committed.store(cursor, Ordering::SeqCst);

        let bucket = Arc::new(bucket);
        let mut buckets = self.buckets.write();
        Ok(Arc::clone(buckets.entry(index).or_insert(bucket)))
    }

    fn bucket_on_disk(&self, index: u32) -> bool {
        self.dir
            .join(format!("index-b{}-seg0.idx", index))
            .exists()
    }

    pub fn put(&self, key: &str, data_offset: i64) -> Result<()> {
        let index = self.bucket_of(key.as_bytes());
        let bucket = self.open_bucket(index)?;
        bucket.append(key.as_bytes(), data_offset)
    }

    pub fn remove(&self, key: &str) -> Result<()> {
        self.put(key, TOMBSTONE)
    }

    /// Last binding for `key`, or None when unbound or tombstoned.
    pub fn get(&self, key: &str) -> Result<Option<i64>> {
        let index = self.bucket_of(key.as_bytes());
        let opened = self.buckets.read().get(&index).cloned();
        let bucket = match opened {
            Some(b) => b,
            None if self.bucket_on_disk(index) => self.open_bucket(index)?,
            None => return Ok(None),
        };

        let mut last = None;
        let limit = bucket.committed.load(Ordering::Acquire);
        bucket.scan(limit, |k, offset| {
            if k == key.as_bytes() {
                last = Some(offset);
            }
            Ok(())
        })?;
        Ok(last.filter(|off| *off != TOMBSTONE))
    }

    /// Deduplicated live data offsets: last binding per key, tombstones
    /// dropped, ascending.
    pub fn value_offsets(&self) -> Result<Vec<i64>> {
        let mut offsets = Vec::new();
        for index in self.known_buckets()? {
            let bucket = self.open_bucket(index)?;
            let mut last: HashMap<Vec<u8>, i64> = HashMap::new();
            let limit = bucket.committed.load(Ordering::Acquire);
            bucket.scan(limit, |key, offset| {
                last.insert(key.to_vec(), offset);
                Ok(())
            })?;
            offsets.extend(last.into_values().filter(|off| *off != TOMBSTONE));
        }
        offsets.sort_unstable();
        Ok(offsets)
    }

    fn known_buckets(&self) -> Result<Vec<u32>> {
        let mut found: Vec<u32> = self.buckets.read().keys().copied().collect();
        for entry in std::fs::read_dir(&self.dir)? {
            let name = entry?.file_name();
            let name = name.to_string_lossy();
            if let Some(rest) = name.strip_prefix("index-b") {
                if let Some(bucket) = rest.split("-seg").next() {
                    if let Ok(b) = bucket.parse::<u32>() {
                        found.push(b);
                    }
                }
            }
        }
        found.sort_unstable();
        found.dedup();
        Ok(found)
    }

    /// Highest committed offset across buckets; recorded in KVStore
    /// metadata and used as the recovery bound on the next open.
    pub fn committed_offset(&self) -> u64 {
        let buckets = self.buckets.read();
        let session_max = buckets
            .values()
            .map(|b| b.committed.load(Ordering::Acquire))
            .max()
            .unwrap_or(0);
        session_max.max(self.recovered_bound)
    }

    pub fn flush(&self) -> Result<()> {
        let buckets = self.buckets.read();
        for bucket in buckets.values() {
            bucket.file.flush_all()?;
        }
        Ok(())
    }
}
