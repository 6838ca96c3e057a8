use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicI32, Ordering, fence};
use memmap2::{MmapMut, MmapOptions};
use parking_lot::{Mutex, RwLock};
use crate::core::error::Result;

/// One memory-mapped, fixed-size segment file.
///
/// Writers hand out disjoint byte ranges (reservation happens upstream), so
/// plain pointer copies through `&self` are sound; the only cross-thread
/// publication points are the 4-byte commit markers, which go through
/// release/acquire atomics.
pub struct MappedSegment {
    file: File,
    mmap: MmapMut,
    ptr: *mut u8,
    len: usize,
}

unsafe impl Send for MappedSegment {}
unsafe impl Sync for MappedSegment {}

impl MappedSegment {
    fn create(path: &PathBuf, len: u64) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        // Sparse-extends to the full segment size on first use.
        file.set_len(len)?;
        let mut mmap = unsafe { MmapOptions::new().len(len as usize).map_mut(&file)? };
        let ptr = mmap.as_mut_ptr();
        Ok(MappedSegment {
            file,
            mmap,
            ptr,
            len: len as usize,
        })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn write(&self, offset: usize, src: &[u8]) {
        assert!(offset + src.len() <= self.len, "segment write out of range");
        unsafe {
            std::ptr::copy_nonoverlapping(src.as_ptr(), self.ptr.add(offset), src.len());
        }
    }

    pub fn read(&self, offset: usize, dst: &mut [u8]) {
        assert!(offset + dst.len() <= self.len, "segment read out of range");
        unsafe {
            std::ptr::copy_nonoverlapping(self.ptr.add(offset), dst.as_mut_ptr(), dst.len());
        }
    }

    /// Borrow mapped bytes directly (zero-copy similarity kernels).
    pub fn slice(&self, offset: usize, len: usize) -> &[u8] {
        assert!(offset + len <= self.len, "segment slice out of range");
        unsafe { std::slice::from_raw_parts(self.ptr.add(offset), len) }
    }

    #[inline]
    fn atomic_i32(&self, offset: usize) -> &AtomicI32 {
        assert!(offset + 4 <= self.len, "atomic cell out of range");
        debug_assert!(offset % 4 == 0, "atomic cell must be 4-byte aligned");
        unsafe { &*(self.ptr.add(offset) as *const AtomicI32) }
    }

    pub fn load_i32_acquire(&self, offset: usize) -> i32 {
        self.atomic_i32(offset).load(Ordering::Acquire)
    }

    /// Publish a commit marker; pairs with `load_i32_acquire` on readers.
    pub fn store_i32_release(&self, offset: usize, value: i32) {
        fence(Ordering::Release);
        self.atomic_i32(offset).store(value, Ordering::Release);
    }

    pub fn compare_exchange_i32(&self, offset: usize, current: i32, new: i32) -> bool {
        self.atomic_i32(offset)
            .compare_exchange(current, new, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn flush(&self) -> Result<()> {
        self.mmap.flush()?;
        Ok(())
    }

    pub fn flush_range(&self, offset: usize, len: usize) -> Result<()> {
        self.mmap.flush_range(offset, len.min(self.len - offset))?;
        Ok(())
    }

    pub fn sync_file(&self) -> Result<()> {
        self.file.sync_all()?;
        Ok(())
    }
}

/// A growable sequence of fixed-size mapped segment files addressed by a
/// global 64-bit byte offset. Segment creation is serialized by a lock;
/// lookups of already-created segments take only the read lock.
pub struct PagedFile {
    dir: PathBuf,
    prefix: String,
    suffix: String,
    segment_size: u64,
    segments: RwLock<HashMap<u64, Arc<MappedSegment>>>,
    grow_lock: Mutex<()>,
}

impl PagedFile {
    pub fn open(
        dir: impl Into<PathBuf>,
        prefix: impl Into<String>,
        suffix: impl Into<String>,
        segment_size: u64,
    ) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        assert!(segment_size % 8 == 0, "segment size must be 8-byte aligned");
        Ok(PagedFile {
            dir,
            prefix: prefix.into(),
            suffix: suffix.into(),
            segment_size,
            segments: RwLock::new(HashMap::new()),
            grow_lock: Mutex::new(()),
        })
    }

    pub fn segment_size(&self) -> u64 {
        self.segment_size
    }

    fn segment_path(&self, index: u64) -> PathBuf {
        self.dir
            .join(format!("{}{}{}", self.prefix, index, self.suffix))
    }

    /// The mapped segment covering `global_offset`, creating and mapping the
    /// backing file if needed.
    pub fn ensure_segment(&self, global_offset: u64) -> Result<Arc<MappedSegment>> {
        let index = global_offset / self.segment_size;
        {
            let segments = self.segments.read();
            if let Some(seg) = segments.get(&index) {
                return Ok(Arc::clone(seg));
            }
        }

        let _guard = self.grow_lock.lock();
        // Another writer may have created it while we waited.
        {
            let segments = self.segments.read();
            if let Some(seg) = segments.get(&index) {
                return Ok(Arc::clone(seg));
            }
        }

        let seg = Arc::new(MappedSegment::create(
            &self.segment_path(index),
            self.segment_size,
        )?);
        self.segments.write().insert(index, Arc::clone(&seg));
        Ok(seg)
    }

    /// Whether a segment exists (mapped or on disk) without creating it.
    pub fn has_segment(&self, global_offset: u64) -> bool {
        let index = global_offset / self.segment_size;
        if self.segments.read().contains_key(&index) {
            return true;
        }
        self.segment_path(index).exists()
    }

    /// Write bytes at a global offset, spanning segment boundaries.
    pub fn write_at(&self, global_offset: u64, bytes: &[u8]) -> Result<()> {
        let mut offset = global_offset;
        let mut src = bytes;
        while !src.is_empty() {
            let seg = self.ensure_segment(offset)?;
            let within = (offset % self.segment_size) as usize;
            let n = src.len().min(self.segment_size as usize - within);
            seg.write(within, &src[..n]);
            offset += n as u64;
            src = &src[n..];
        }
        Ok(())
    }

    /// Read bytes at a global offset, spanning segment boundaries.
    pub fn read_at(&self, global_offset: u64, dst: &mut [u8]) -> Result<()> {
        let mut offset = global_offset;
        let mut remaining = dst;
        while !remaining.is_empty() {
            let seg = self.ensure_segment(offset)?;
            let within = (offset % self.segment_size) as usize;
            let n = remaining.len().min(self.segment_size as usize - within);
            let (head, tail) = remaining.split_at_mut(n);
            seg.read(within, head);
            offset += n as u64;
            remaining = tail;
        }
        Ok(())
    }

    pub fn write_i32(&self, global_offset: u64, value: i32) -> Result<()> {
        self.write_at(global_offset, &value.to_le_bytes())
    }

    pub fn read_i32(&self, global_offset: u64) -> Result<i32> {
        let mut buf = [0u8; 4];
        self.read_at(global_offset, &mut buf)?;
        Ok(i32::from_le_bytes(buf))
    }

    pub fn write_i64(&self, global_offset: u64, value: i64) -> Result<()> {
        self.write_at(global_offset, &value.to_le_bytes())
    }

    pub fn read_i64(&self, global_offset: u64) -> Result<i64> {
        let mut buf = [0u8; 8];
        self.read_at(global_offset, &mut buf)?;
        Ok(i64::from_le_bytes(buf))
    }

    /// Acquire-load of a 4-byte commit marker. Markers are 4-byte aligned
    /// and the segment size is a multiple of 8, so a marker never straddles
    /// two segments.
    pub fn load_i32_acquire(&self, global_offset: u64) -> Result<i32> {
        let seg = self.ensure_segment(global_offset)?;
        Ok(seg.load_i32_acquire((global_offset % self.segment_size) as usize))
    }

    pub fn store_i32_release(&self, global_offset: u64, value: i32) -> Result<()> {
        let seg = self.ensure_segment(global_offset)?;
        seg.store_i32_release((global_offset % self.segment_size) as usize, value);
        Ok(())
    }

    pub fn compare_exchange_i32(&self, global_offset: u64, current: i32, new: i32) -> Result<bool> {
        let seg = self.ensure_segment(global_offset)?;
        Ok(seg.compare_exchange_i32((global_offset % self.segment_size) as usize, current, new))
    }

    pub fn flush_range(&self, global_offset: u64, len: usize) -> Result<()> {
        let seg = self.ensure_segment(global_offset)?;
        let within = (global_offset % self.segment_size) as usize;
        seg.flush_range(within, len)
    }

    pub fn flush_all(&self) -> Result<()> {
        let segments = self.segments.read();
        for seg in segments.values() {
            seg.flush()?;
        }
        Ok(())
    }

    pub fn sync_all(&self) -> Result<()> {
        let segments = self.segments.read();
        for seg in segments.values() {
            seg.flush()?;
            seg.sync_file()?;
        }
        Ok(())
    }

    /// Drop and delete every segment wholly below `watermark` (WAL
    /// truncation after a durable checkpoint).
    pub fn remove_segments_below(&self, watermark: u64) -> Result<()> {
        let cutoff = watermark / self.segment_size;
        let mut segments = self.segments.write();
        segments.retain(|index, _| *index >= cutoff);
        for index in 0..cutoff {
            let path = self.segment_path(index);
            if path.exists() {
                std::fs::remove_file(&path)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn write_read_within_segment() {
        let dir = tempdir().unwrap();
        let file = PagedFile::open(dir.path(), "segment-", ".dat", 4096).unwrap();
        file.write_at(100, b"hello paged world").unwrap();
        let mut buf = vec![0u8; 17];
        file.read_at(100, &mut buf).unwrap();
        assert_eq!(&buf, b"hello paged world");
    }

    #[test]
    fn write_read_across_segment_boundary() {
        let dir = tempdir().unwrap();
        let file = PagedFile::open(dir.path(), "segment-", ".dat", 64).unwrap();
        let payload: Vec<u8> = (0..200).map(|i| i as u8).collect();
        file.write_at(40, &payload).unwrap();
        let mut buf = vec![0u8; 200];
        file.read_at(40, &mut buf).unwrap();
        assert_eq!(buf, payload);
        assert!(dir.path().join("segment-0.dat").exists());
        assert!(dir.path().join("segment-3.dat").exists());
    }

    #[test]
    fn reopen_sees_previous_bytes() {
        let dir = tempdir().unwrap();
        {
            let file = PagedFile::open(dir.path(), "segment-", ".dat", 4096).unwrap();
            file.write_i64(8, 0x1122334455667788).unwrap();
            file.flush_all().unwrap();
        }
        let file = PagedFile::open(dir.path(), "segment-", ".dat", 4096).unwrap();
        assert_eq!(file.read_i64(8).unwrap(), 0x1122334455667788);
    }

    #[test]
    fn has_segment_does_not_create() {
        let dir = tempdir().unwrap();
        let file = PagedFile::open(dir.path(), "segment-", ".dat", 4096).unwrap();
        assert!(!file.has_segment(0));
        file.ensure_segment(0).unwrap();
        assert!(file.has_segment(0));
    }

    #[test]
    fn marker_publication() {
        let dir = tempdir().unwrap();
        let file = PagedFile::open(dir.path(), "segment-", ".dat", 4096).unwrap();
        assert_eq!(file.load_i32_acquire(16).unwrap(), 0);
        file.store_i32_release(16, 42).unwrap();
        assert_eq!(file.load_i32_acquire(16).unwrap(), 42);
        assert!(file.compare_exchange_i32(16, 42, 43).unwrap());
        assert!(!file.compare_exchange_i32(16, 42, 44).unwrap());
    }
}
