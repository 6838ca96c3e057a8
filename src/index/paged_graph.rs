use std::path::PathBuf;
use crate::core::error::{Error, Result};
use crate::storage::paged_file::PagedFile;

/// Adjacency lists for one HNSW layer on mapped pages. Every node owns a
/// fixed slot: `[i64 count][i64 neighbor0] … [i64 neighbor_{maxConns-1}]`
/// (the count is widened to 64 bits to keep the neighbor array 8-byte
/// aligned).
pub struct PagedGraphIndex {
    file: PagedFile,
    max_connections: usize,
    slot_size: u64,
}

impl PagedGraphIndex {
    pub fn open(dir: impl Into<PathBuf>, max_connections: usize, block_size: usize) -> Result<Self> {
        let slot_size = 8 * (1 + max_connections as u64);
        let file = PagedFile::open(
            dir,
            "graph-page-",
            ".dat",
            slot_size * block_size as u64,
        )?;
        Ok(PagedGraphIndex {
            file,
            max_connections,
            slot_size,
        })
    }

    pub fn max_connections(&self) -> usize {
        self.max_connections
    }

    #[inline]
    fn slot(&self, id: u64) -> u64 {
        id * self.slot_size
    }

    /// Overwrite a node's neighbor list.
    pub fn set_connections(&self, id: u64, neighbors: &[i64]) -> Result<()> {
        if neighbors.len() > self.max_connections {
            return Err(Error::invalid_input(format!(
                "{} neighbors exceed the layer capacity of {}",
                neighbors.len(),
                self.max_connections
            )));
        }
        let mut bytes = Vec::with_capacity(8 * (1 + neighbors.len()));
        bytes.extend_from_slice(&(neighbors.len() as i64).to_le_bytes());
        for n in neighbors {
            bytes.extend_from_slice(&n.to_le_bytes());
        }
        self.file.write_at(self.slot(id), &bytes)
    }

    /// Append one neighbor; full slots must be shrunk by the caller first.
    pub fn add_connection(&self, id: u64, neighbor: i64) -> Result<()> {
        let slot = self.slot(id);
        let count = self.file.read_i64(slot)?;
        if count < 0 || count as usize > self.max_connections {
            return Err(Error::corruption(format!(
                "graph slot {} has impossible connection count {}",
                id, count
            )));
        }
        if count as usize == self.max_connections {
            return Err(Error::invalid_input(format!(
                "graph slot {} is full ({} connections)",
                id, count
            )));
        }
        self.file.write_i64(slot + 8 + count as u64 * 8, neighbor)?;
        self.file.write_i64(slot, count + 1)
    }

    pub fn connections(&self, id: u64) -> Result<Vec<i64>> {
        let slot = self.slot(id);
        // Fresh slots read as zero-filled pages: count 0, no neighbors.
        let count = self.file.read_i64(slot)?;
        if count < 0 || count as usize > self.max_connections {
            return Err(Error::corruption(format!(
                "graph slot {} has impossible connection count {}",
                id, count
            )));
        }
        let mut buf = vec![0u8; count as usize * 8];
        self.file.read_at(slot + 8, &mut buf)?;
        Ok(buf
            .chunks_exact(8)
            .map(|c| i64::from_le_bytes(c.try_into().unwrap_or_default()))
            .collect())
    }

    pub fn connection_count(&self, id: u64) -> Result<usize> {
        Ok(self.connections(id)?.len())
    }

    pub fn flush(&self) -> Result<()> {
        self.file.flush_all()
    }
}
