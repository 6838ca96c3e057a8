use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use crate::core::error::{Error, Result};
use crate::simd::operation::Metric;
use crate::storage::paged_file::PagedFile;

/// Fixed-dimension raw vector store: each page holds `block_size` vectors
/// of `dimensions * 4` bytes. Similarity is computed straight over the
/// mapped pages, no materialization.
pub struct PagedVectorIndex {
    file: PagedFile,
    dimensions: usize,
    block_size: usize,
    count: AtomicU64,
}

impl PagedVectorIndex {
    pub fn open(
        dir: impl Into<PathBuf>,
        dimensions: usize,
        block_size: usize,
        count: u64,
    ) -> Result<Self> {
        let stride = (dimensions * 4) as u64;
        let file = PagedFile::open(
            dir,
            "vector-page-",
            ".dat",
            stride * block_size as u64,
        )?;
        Ok(PagedVectorIndex {
            file,
            dimensions,
            block_size,
            count: AtomicU64::new(count),
        })
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Acquire)
    }

    #[inline]
    fn stride(&self) -> u64 {
        (self.dimensions * 4) as u64
    }

    fn check_id(&self, id: u64) -> Result<()> {
        if id >= self.count() {
            return Err(Error::invalid_input(format!(
                "vector id {} out of range (count {})",
                id,
                self.count()
            )));
        }
        Ok(())
    }

    pub fn add_vector(&self, vector: &[f32]) -> Result<u64> {
        if vector.len() != self.dimensions {
            return Err(Error::invalid_input(format!(
                "vector has {} dimensions, index expects {}",
                vector.len(),
                self.dimensions
            )));
        }
        let id = self.count.fetch_add(1, Ordering::SeqCst);
        let mut bytes = Vec::with_capacity(vector.len() * 4);
        for f in vector {
            bytes.extend_from_slice(&f.to_le_bytes());
        }
        self.file.write_at(id * self.stride(), &bytes)?;
        Ok(id)
    }

    pub fn get_vector(&self, id: u64) -> Result<Vec<f32>> {
        self.check_id(id)?;
        let mut buf = vec![0u8; self.stride() as usize];
        self.file.read_at(id * self.stride(), &mut buf)?;
        Ok(buf
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect())
    }

    /// Mapped bytes of one stored vector. A vector never straddles pages:
    /// the page size is an exact multiple of the stride.
    fn raw(&self, id: u64) -> Result<&[u8]> {
        let offset = id * self.stride();
        let seg = self.file.ensure_segment(offset)?;
        let within = (offset % self.file.segment_size()) as usize;
        // The borrow is tied to the Arc'd segment the PagedFile keeps alive
        // until close; narrow the lifetime through a raw slice read.
        let slice = seg.slice(within, self.stride() as usize);
        Ok(unsafe { std::slice::from_raw_parts(slice.as_ptr(), slice.len()) })
    }

    pub fn similarity_to_query(&self, id: u64, query: &[f32], metric: Metric) -> Result<f32> {
        self.check_id(id)?;
        if query.len() != self.dimensions {
            return Err(Error::invalid_input(format!(
                "query has {} dimensions, index expects {}",
                query.len(),
                self.dimensions
            )));
        }
        Ok(metric.score_raw(self.raw(id)?, query))
    }

    pub fn similarity_pair(&self, a: u64, b: u64, metric: Metric) -> Result<f32> {
        self.check_id(a)?;
        self.check_id(b)?;
        Ok(metric.score_raw_pair(self.raw(a)?, self.raw(b)?))
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
    fn add_and_get() {
        let dir = tempdir().unwrap();
        let index = PagedVectorIndex::open(dir.path(), 3, 4, 0).unwrap();
        let a = index.add_vector(&[1.0, 2.0, 3.0]).unwrap();
        let b = index.add_vector(&[4.0, 5.0, 6.0]).unwrap();
        assert_eq!((a, b), (0, 1));
        assert_eq!(index.get_vector(0).unwrap(), vec![1.0, 2.0, 3.0]);
        assert_eq!(index.get_vector(1).unwrap(), vec![4.0, 5.0, 6.0]);
        assert_eq!(index.count(), 2);
    }

    #[test]
    fn pages_grow_on_demand() {
        let dir = tempdir().unwrap();
        let index = PagedVectorIndex::open(dir.path(), 2, 2, 0).unwrap();
        for i in 0..5 {
            index.add_vector(&[i as f32, -(i as f32)]).unwrap();
        }
        assert!(dir.path().join("vector-page-0.dat").exists());
        assert!(dir.path().join("vector-page-2.dat").exists());
        assert_eq!(index.get_vector(4).unwrap(), vec![4.0, -4.0]);
    }

    #[test]
    fn dimension_mismatch_rejected() {
        let dir = tempdir().unwrap();
        let index = PagedVectorIndex::open(dir.path(), 3, 4, 0).unwrap();
        assert!(index.add_vector(&[1.0]).is_err());
        assert!(index.get_vector(0).is_err());
    }

    #[test]
    fn similarity_over_mapped_pages() {
        let dir = tempdir().unwrap();
        let index = PagedVectorIndex::open(dir.path(), 2, 8, 0).unwrap();
        index.add_vector(&[1.0, 0.0]).unwrap();
        index.add_vector(&[0.0, 1.0]).unwrap();
        index.add_vector(&[1.0, 0.0]).unwrap();

        let s = index
            .similarity_to_query(0, &[1.0, 0.0], Metric::Cosine)
            .unwrap();
        assert!((s - 1.0).abs() < 1e-6);
        let orth = index.similarity_pair(0, 1, Metric::Cosine).unwrap();
        assert!(orth.abs() < 1e-6);
        let same = index.similarity_pair(0, 2, Metric::Cosine).unwrap();
        assert!((same - 1.0).abs() < 1e-6);
    }

    #[test]
    fn reopen_with_count_restores_access() {
        let dir = tempdir().unwrap();
        {
            let index = PagedVectorIndex::open(dir.path(), 2, 4, 0).unwrap();
            index.add_vector(&[7.0, 8.0]).unwrap();
            index.flush().unwrap();
        }
        let index = PagedVectorIndex::open(dir.path(), 2, 4, 1).unwrap();
        assert_eq!(index.get_vector(0).unwrap(), vec![7.0, 8.0]);
    }
}
