use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use log::{debug, info, warn};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use crate::core::error::{Error, Result};
use crate::core::types::Document;
use crate::storage::data_log::align_up8;
use crate::storage::metadata::{self, MetadataPair};
use crate::storage::paged_file::PagedFile;

/// 64 MB WAL segments.
pub const WAL_SEGMENT_SIZE: u64 = 64 * 1024 * 1024;

/// Fixed entry header: [i32 rawSize][i32 status][i64 txId].
const WAL_HEADER: u64 = 16;

pub const STATUS_UNCOMMITTED: i32 = 0;
pub const STATUS_COMMITTED: i32 = 1;

/// The two mutations the log can make atomic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum WalOperation {
    Add { document: Document },
    Remove { id: String },
}

/// Crash-safe log of add/remove operations.
///
/// Records are appended with `status = 0` using the same reserve-then-
/// publish pattern as the DataLog; `commit` flips the status in place with
/// a CAS and flushes. Everything below the checkpoint watermark has had its
/// effects made durable in the main stores and is dead weight, removed at
/// the next checkpoint.
pub struct WriteAheadLog {
    file: PagedFile,
    meta_path: PathBuf,
    reserved: AtomicU64,
    committed: AtomicU64,
    checkpoint: AtomicU64,
    next_tx: AtomicU64,
    /// Offsets of transactions recorded in this process, so a concurrent
    /// commit never has to scan past another writer's unpublished entry.
    in_flight: Mutex<HashMap<u64, u64>>,
}

struct WalEntry {
    offset: u64,
    raw_size: i32,
    status: i32,
    tx_id: u64,
}

impl WriteAheadLog {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        let meta_path = root.join("metadata.dat");
        let meta = metadata::read_pair(&meta_path)?.unwrap_or(MetadataPair { first: 0, second: 0 });

        let file = PagedFile::open(&root, "wal-", ".log", WAL_SEGMENT_SIZE)?;
        let wal = WriteAheadLog {
            file,
            meta_path,
            reserved: AtomicU64::new(meta.first),
            committed: AtomicU64::new(meta.first),
            checkpoint: AtomicU64::new(meta.first),
            next_tx: AtomicU64::new(meta.second + 1),
            in_flight: Mutex::new(HashMap::new()),
        };

        // Rebuild the append cursor and the tx counter from the entries
        // written after the last checkpoint.
        let mut cursor = meta.first;
        let mut max_tx = meta.second;
        let mut replayable = 0usize;
        while let Some(entry) = wal.entry_at(cursor)? {
            max_tx = max_tx.max(entry.tx_id);
            if entry.status == STATUS_UNCOMMITTED {
                replayable += 1;
            }
            cursor = entry.offset + align_up8(entry.raw_size as u64);
        }
        wal.reserved.store(cursor, Ordering::SeqCst);
        wal.committed.store(cursor, Ordering::SeqCst);
        wal.next_tx.store(max_tx + 1, Ordering::SeqCst);
        if replayable > 0 {
            info!("wal: {} uncommitted entr(ies) pending replay", replayable);
        }
        Ok(wal)
    }

    fn entry_at(&self, offset: u64) -> Result<Option<WalEntry>> {
        if !self.file.has_segment(offset) {
            return Ok(None);
        }
        let raw_size = self.file.load_i32_acquire(offset)?;
        if raw_size <= 0 {
            return Ok(None);
        }
        if (raw_size as u64) < WAL_HEADER {
            return Err(Error::corruption(format!(
                "wal entry at {} has impossible size {}",
                offset, raw_size
            )));
        }
        let status = self.file.load_i32_acquire(offset + 4)?;
        let tx_id = self.file.read_i64(offset + 8)? as u64;
        Ok(Some(WalEntry {
            offset,
            raw_size,
            status,
            tx_id,
        }))
    }

    fn payload_at(&self, entry: &WalEntry) -> Result<WalOperation> {
        let len = entry.raw_size as usize - WAL_HEADER as usize;
        let mut buf = vec![0u8; len];
        self.file.read_at(entry.offset + WAL_HEADER, &mut buf)?;
        Ok(bincode::deserialize(&buf)?)
    }

    fn record(&self, op: &WalOperation) -> Result<u64> {
        let tx_id = self.next_tx.fetch_add(1, Ordering::SeqCst);
        let payload = bincode::serialize(op)?;
        let raw_size = WAL_HEADER + payload.len() as u64;
        let reservation = align_up8(raw_size);
        let offset = self.reserved.fetch_add(reservation, Ordering::SeqCst);

        let mut body = Vec::with_capacity(12 + payload.len());
        body.extend_from_slice(&STATUS_UNCOMMITTED.to_le_bytes());
        body.extend_from_slice(&(tx_id as i64).to_le_bytes());
        body.extend_from_slice(&payload);
        self.file.write_at(offset + 4, &body)?;

        self.file.store_i32_release(offset, raw_size as i32)?;
        self.committed.fetch_max(offset + reservation, Ordering::AcqRel);
        // An in-flight transaction must survive a crash, or there would be
        // nothing to replay.
        self.file.flush_range(offset, reservation as usize)?;
        self.in_flight.lock().insert(tx_id, offset);
        Ok(tx_id)
    }

    pub fn record_add(&self, document: &Document) -> Result<u64> {
        self.record(&WalOperation::Add {
            document: document.clone(),
        })
    }

    pub fn record_remove(&self, id: &str) -> Result<u64> {
        self.record(&WalOperation::Remove { id: id.to_string() })
    }

    /// Flip the matching entry from uncommitted to committed and flush it.
    pub fn commit(&self, tx_id: u64) -> Result<()> {
        if let Some(offset) = self.in_flight.lock().remove(&tx_id) {
            return self.commit_at(offset);
        }
        // Replayed transactions were recorded by an earlier process; find
        // them by scanning from the watermark. Replay is single-threaded,
        // so the scan cannot race an unpublished reservation.
        let mut cursor = self.checkpoint.load(Ordering::Acquire);
        let end = self.committed.load(Ordering::Acquire);
        while cursor < end {
            let Some(entry) = self.entry_at(cursor)? else {
                break;
            };
            if entry.tx_id == tx_id {
                return self.commit_at(entry.offset);
            }
            cursor = entry.offset + align_up8(entry.raw_size as u64);
        }
        warn!("wal: commit of unknown transaction {}", tx_id);
        Err(Error::corruption(format!(
            "transaction {} not found in the write-ahead log",
            tx_id
        )))
    }

    fn commit_at(&self, offset: u64) -> Result<()> {
        let raw_size = self.file.load_i32_acquire(offset)?;
        self.file
            .compare_exchange_i32(offset + 4, STATUS_UNCOMMITTED, STATUS_COMMITTED)?;
        self.file
            .flush_range(offset, align_up8(raw_size.max(0) as u64) as usize)?;
        Ok(())
    }

    /// In-flight entries, oldest first, from the checkpoint watermark on.
    pub fn read_uncommitted(&self) -> Result<Vec<(u64, WalOperation)>> {
        let mut cursor = self.checkpoint.load(Ordering::Acquire);
        let end = self.committed.load(Ordering::Acquire);
        let mut pending = Vec::new();
        while cursor < end {
            let Some(entry) = self.entry_at(cursor)? else {
                break;
            };
            if entry.status == STATUS_UNCOMMITTED {
                pending.push((entry.tx_id, self.payload_at(&entry)?));
            }
            cursor = entry.offset + align_up8(entry.raw_size as u64);
        }
        Ok(pending)
    }

    /// Advance the watermark past all committed entries and drop dead
    /// segments. Callers must have made the logged effects durable first.
    pub fn checkpoint(&self) -> Result<()> {
        let end = self.committed.load(Ordering::Acquire);
        let last_tx = self.next_tx.load(Ordering::Acquire).saturating_sub(1);
        self.checkpoint.store(end, Ordering::SeqCst);
        metadata::write_pair(
            &self.meta_path,
            MetadataPair {
                first: end,
                second: last_tx,
            },
        )?;
        self.file.remove_segments_below(end)?;
        debug!("wal: checkpoint at {}, last tx {}", end, last_tx);
        Ok(())
    }

    pub fn close(&self) -> Result<()> {
        self.file.flush_all()?;
        metadata::write_pair(
            &self.meta_path,
            MetadataPair {
                first: self.checkpoint.load(Ordering::Acquire),
                second: self.next_tx.load(Ordering::Acquire).saturating_sub(1),
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{DocumentId, FieldValue};
    use tempfile::tempdir;

    fn doc() -> Document {
        Document::new(DocumentId::new()).with_field("genre", FieldValue::Text("Sci-Fi".into()))
    }

    #[test]
    fn record_commit_lifecycle() {
        let dir = tempdir().unwrap();
        let wal = WriteAheadLog::open(dir.path()).unwrap();

        let tx = wal.record_add(&doc()).unwrap();
        assert_eq!(wal.read_uncommitted().unwrap().len(), 1);
        wal.commit(tx).unwrap();
        assert_eq!(wal.read_uncommitted().unwrap().len(), 0);
    }

    #[test]
    fn tx_ids_are_monotonic_across_reopen() {
        let dir = tempdir().unwrap();
        let first_tx;
        {
            let wal = WriteAheadLog::open(dir.path()).unwrap();
            first_tx = wal.record_add(&doc()).unwrap();
            wal.close().unwrap();
        }
        let wal = WriteAheadLog::open(dir.path()).unwrap();
        let next = wal.record_remove("some-id").unwrap();
        assert!(next > first_tx);
    }

    #[test]
    fn uncommitted_entries_survive_reopen() {
        let dir = tempdir().unwrap();
        let d = doc();
        let tx;
        {
            let wal = WriteAheadLog::open(dir.path()).unwrap();
            tx = wal.record_add(&d).unwrap();
            // No commit: simulated crash between persist and commit.
        }
        let wal = WriteAheadLog::open(dir.path()).unwrap();
        let pending = wal.read_uncommitted().unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].0, tx);
        let WalOperation::Add { document } = &pending[0].1 else {
            panic!("expected an add");
        };
        assert_eq!(document.id, d.id);

        wal.commit(tx).unwrap();
        assert!(wal.read_uncommitted().unwrap().is_empty());
    }

    #[test]
    fn checkpoint_discards_history() {
        let dir = tempdir().unwrap();
        let wal = WriteAheadLog::open(dir.path()).unwrap();
        for _ in 0..3 {
            let tx = wal.record_add(&doc()).unwrap();
            wal.commit(tx).unwrap();
        }
        wal.checkpoint().unwrap();
        assert!(wal.read_uncommitted().unwrap().is_empty());

        // New work after the checkpoint is still tracked.
        let tx = wal.record_remove("gone").unwrap();
        assert_eq!(wal.read_uncommitted().unwrap().len(), 1);
        wal.commit(tx).unwrap();
    }

    #[test]
    fn committing_unknown_tx_fails() {
        let dir = tempdir().unwrap();
        let wal = WriteAheadLog::open(dir.path()).unwrap();
        assert!(wal.commit(999).is_err());
    }
}
