use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use crate::core::error::Result;
use crate::storage::paged_file::PagedFile;

const LONG_PAGE_SIZE: u64 = 16 * 1024 * 1024;

/// A flat, growable array of i64 on mapped pages. Bridges HNSW-local
/// vector ids to persister internal ids (`documentIdMap`).
pub struct PagedLongArray {
    file: PagedFile,
    len: AtomicU64,
}

impl PagedLongArray {
    pub fn open(dir: impl Into<PathBuf>, len: u64) -> Result<Self> {
        let file = PagedFile::open(dir, "page-", ".dat", LONG_PAGE_SIZE)?;
        Ok(PagedLongArray {
            file,
            len: AtomicU64::new(len),
        })
    }

    pub fn len(&self) -> u64 {
        self.len.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn set(&self, index: u64, value: i64) -> Result<()> {
        self.file.write_i64(index * 8, value)?;
        self.len.fetch_max(index + 1, Ordering::AcqRel);
        Ok(())
    }

    pub fn get(&self, index: u64) -> Result<i64> {
        if index >= self.len() {
            return Ok(0);
        }
        self.file.read_i64(index * 8)
    }

    pub fn flush(&self) -> Result<()> {
        self.file.flush_all()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn set_get_and_len() {
        let dir = tempdir().unwrap();
        let longs = PagedLongArray::open(dir.path(), 0).unwrap();
        assert!(longs.is_empty());
        longs.set(0, 42).unwrap();
        longs.set(3, -1).unwrap();
        assert_eq!(longs.len(), 4);
        assert_eq!(longs.get(0).unwrap(), 42);
        assert_eq!(longs.get(1).unwrap(), 0);
        assert_eq!(longs.get(3).unwrap(), -1);
        assert_eq!(longs.get(100).unwrap(), 0);
    }

    #[test]
    fn reopen_with_len() {
        let dir = tempdir().unwrap();
        {
            let longs = PagedLongArray::open(dir.path(), 0).unwrap();
            longs.set(5, 777).unwrap();
            longs.flush().unwrap();
        }
        let longs = PagedLongArray::open(dir.path(), 6).unwrap();
        assert_eq!(longs.get(5).unwrap(), 777);
    }
}
