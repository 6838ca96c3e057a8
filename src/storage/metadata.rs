use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::Path;
use crate::core::error::{Error, Result};

/// Small metadata files: two 64-bit offsets guarded by a CRC, replaced
/// atomically (write temp, fsync, rename) so a torn write can never be
/// mistaken for a commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetadataPair {
    pub first: u64,
    pub second: u64,
}

fn checksum(first: u64, second: u64) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&first.to_le_bytes());
    hasher.update(&second.to_le_bytes());
    hasher.finalize()
}

pub fn read_pair(path: &Path) -> Result<Option<MetadataPair>> {
    if !path.exists() {
        return Ok(None);
    }
    let mut file = File::open(path)?;
    let mut buf = [0u8; 20];
    file.read_exact(&mut buf)
        .map_err(|_| Error::corruption(format!("metadata file {} is truncated", path.display())))?;

    let first = u64::from_le_bytes(buf[0..8].try_into().unwrap_or_default());
    let second = u64::from_le_bytes(buf[8..16].try_into().unwrap_or_default());
    let crc = u32::from_le_bytes(buf[16..20].try_into().unwrap_or_default());
    if crc != checksum(first, second) {
        return Err(Error::corruption(format!(
            "metadata file {} fails its checksum",
            path.display()
        )));
    }
    Ok(Some(MetadataPair { first, second }))
}

pub fn write_pair(path: &Path, pair: MetadataPair) -> Result<()> {
    let tmp = path.with_extension("tmp");
    {
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp)?;
        file.write_all(&pair.first.to_le_bytes())?;
        file.write_all(&pair.second.to_le_bytes())?;
        file.write_all(&checksum(pair.first, pair.second).to_le_bytes())?;
        file.sync_all()?;
    }
    std::fs::rename(&tmp, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn round_trip_and_overwrite() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("metadata.dat");
        assert_eq!(read_pair(&path).unwrap(), None);

        write_pair(&path, MetadataPair { first: 10, second: 20 }).unwrap();
        assert_eq!(
            read_pair(&path).unwrap(),
            Some(MetadataPair { first: 10, second: 20 })
        );

        write_pair(&path, MetadataPair { first: 30, second: 40 }).unwrap();
        assert_eq!(
            read_pair(&path).unwrap(),
            Some(MetadataPair { first: 30, second: 40 })
        );
    }

    #[test]
    fn corrupted_metadata_is_detected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("metadata.dat");
        write_pair(&path, MetadataPair { first: 1, second: 2 }).unwrap();
        let mut bytes = std::fs::read(&path).unwrap();
        bytes[3] ^= 0xFF;
        std::fs::write(&path, bytes).unwrap();
        assert!(read_pair(&path).is_err());
    }
}
