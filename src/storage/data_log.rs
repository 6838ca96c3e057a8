use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::{FieldValue, ValueKind};
use crate::storage::paged_file::PagedFile;

/// 256 MB data segments.
pub const DATA_SEGMENT_SIZE: u64 = 256 * 1024 * 1024;

/// Base header: rawSize, valueTypeTag, keyLen.
const BASE_HEADER: usize = 12;

#[inline]
pub fn align_up8(n: u64) -> u64 {
    (n + 7) & !7
}

/// Append-only log of typed entries addressable by their starting offset.
///
/// Writers claim disjoint regions with a single `fetch_add` on `reserved`
/// (the reserve-then-calculate pattern), fill the entry, and only then
/// publish the 4-byte `rawSize` with release ordering. Readers that observe
/// `rawSize > 0` may rely on every other byte of the entry being visible.
pub struct DataLog {
    file: PagedFile,
    reserved: AtomicU64,
    committed: AtomicU64,
}

impl DataLog {
    pub fn open(dir: impl Into<PathBuf>, committed_offset: u64) -> Result<Self> {
        let file = PagedFile::open(dir, "segment-", ".dat", DATA_SEGMENT_SIZE)?;
        let log = DataLog {
            file,
            reserved: AtomicU64::new(committed_offset),
            committed: AtomicU64::new(committed_offset),
        };
        let recovered = log.recover_from(committed_offset);
        log.reserved.store(recovered, Ordering::SeqCst);
        log.committed.store(recovered, Ordering::SeqCst);
        Ok(log)
    }

    /// Walk fully-published entries past the last metadata commit so their
    /// bytes are never handed out to new reservations; the hash index
    /// recovers the matching bindings the same way.
    fn recover_from(&self, mut cursor: u64) -> u64 {
        loop {
            if !self.file.has_segment(cursor) {
                return cursor;
            }
            let Ok(raw_size) = self.file.load_i32_acquire(cursor) else {
                return cursor;
            };
            if raw_size <= 0 {
                return cursor;
            }
            let Ok((_, key_len, extra, payload_offset, value_len)) = self.header_layout(cursor)
            else {
                return cursor;
            };
            let header = BASE_HEADER + extra.len() * 4;
            debug_assert_eq!(
                payload_offset,
                align_up8(cursor + header as u64 + key_len as u64)
            );
            cursor += align_up8((header + key_len + 7 + value_len) as u64);
        }
    }

    pub fn committed_offset(&self) -> u64 {
        self.committed.load(Ordering::Acquire)
    }

    fn encode_payload(value: &FieldValue) -> Result<(Vec<i32>, Vec<u8>)> {
        match value {
            FieldValue::Text(s) => Ok((vec![], s.as_bytes().to_vec())),
            FieldValue::Integer(i) => Ok((vec![], i.to_le_bytes().to_vec())),
            FieldValue::Vector(v) => {
                let mut payload = Vec::with_capacity(v.len() * 4);
                for f in v {
                    payload.extend_from_slice(&f.to_le_bytes());
                }
                Ok((vec![v.len() as i32], payload))
            }
            FieldValue::Matrix(rows) => {
                let cols = rows.first().map(|r| r.len()).unwrap_or(0);
                if rows.iter().any(|r| r.len() != cols) {
                    return Err(Error::invalid_input("matrix rows must all have equal length"));
                }
                let mut payload = Vec::with_capacity(rows.len() * cols * 4);
                for row in rows {
                    for f in row {
                        payload.extend_from_slice(&f.to_le_bytes());
                    }
                }
                Ok((vec![rows.len() as i32, cols as i32], payload))
            }
            FieldValue::Bytes(b) => Ok((vec![], b.clone())),
        }
    }

    /// Append an entry and return its starting offset.
    pub fn append(&self, key: &str, value: &FieldValue) -> Result<u64> {
        let (extra, payload) = Self::encode_payload(value)?;
        let tag = value.kind().tag();
        let key_bytes = key.as_bytes();
        let header = BASE_HEADER + extra.len() * 4;

        // The +7 covers the worst-case alignment gap between key end and
        // payload start; trailing slack inside the reservation is never
        // reused and never counted in rawSize.
        let max_entry = align_up8((header + key_bytes.len() + 7 + payload.len()) as u64);
        let offset = self.reserved.fetch_add(max_entry, Ordering::SeqCst);

        let payload_offset = align_up8(offset + header as u64 + key_bytes.len() as u64);
        let raw_size = (payload_offset - offset) as usize + payload.len();

        // Everything after the rawSize slot, assembled once: tag, keyLen,
        // extra header ints, key bytes, alignment padding, payload.
        let mut body = Vec::with_capacity(raw_size - 4);
        body.extend_from_slice(&tag.to_le_bytes());
        body.extend_from_slice(&(key_bytes.len() as i32).to_le_bytes());
        for e in &extra {
            body.extend_from_slice(&e.to_le_bytes());
        }
        body.extend_from_slice(key_bytes);
        body.resize((payload_offset - offset) as usize - 4, 0);
        body.extend_from_slice(&payload);
        self.file.write_at(offset + 4, &body)?;

        // Publishing rawSize commits the entry.
        self.file.store_i32_release(offset, raw_size as i32)?;
        self.committed.fetch_max(offset + max_entry, Ordering::AcqRel);
        Ok(offset)
    }

    fn header_layout(&self, offset: u64) -> Result<(i32, usize, Vec<i32>, u64, usize)> {
        let raw_size = self.file.load_i32_acquire(offset)?;
        if raw_size <= 0 {
            return Err(Error::corruption(format!(
                "no published entry at offset {}",
                offset
            )));
        }
        let tag = self.file.read_i32(offset + 4)?;
        let kind = ValueKind::from_tag(tag)?;
        let key_len = self.file.read_i32(offset + 8)?;
        if key_len < 0 || key_len as i32 >= raw_size {
            return Err(Error::corruption(format!(
                "impossible key length {} at offset {}",
                key_len, offset
            )));
        }
        let extra_count = match kind {
            ValueKind::Vector => 1,
            ValueKind::Matrix => 2,
            _ => 0,
        };
        let mut extra = Vec::with_capacity(extra_count);
        for i in 0..extra_count {
            extra.push(self.file.read_i32(offset + 12 + i as u64 * 4)?);
        }
        let header = BASE_HEADER + extra_count * 4;
        let payload_offset = align_up8(offset + header as u64 + key_len as u64);
        let value_len = raw_size as i64 - (payload_offset - offset) as i64;
        if value_len < 0 {
            return Err(Error::corruption(format!(
                "entry at offset {} overruns its rawSize",
                offset
            )));
        }
        Ok((tag, key_len as usize, extra, payload_offset, value_len as usize))
    }

    fn decode(&self, tag: i32, extra: &[i32], payload_offset: u64, value_len: usize) -> Result<FieldValue> {
        let kind = ValueKind::from_tag(tag)?;
        match kind {
            ValueKind::Text => {
                let mut buf = vec![0u8; value_len];
                self.file.read_at(payload_offset, &mut buf)?;
                String::from_utf8(buf)
                    .map(FieldValue::Text)
                    .map_err(|_| Error::corruption("string entry holds invalid UTF-8"))
            }
            ValueKind::Integer => {
                if value_len != 4 {
                    return Err(Error::corruption("integer entry payload is not 4 bytes"));
                }
                Ok(FieldValue::Integer(self.file.read_i32(payload_offset)?))
            }
            ValueKind::Vector => {
                let count = extra[0] as usize;
                if value_len != count * 4 {
                    return Err(Error::corruption("float array payload length mismatch"));
                }
                let mut buf = vec![0u8; value_len];
                self.file.read_at(payload_offset, &mut buf)?;
                let floats = buf
                    .chunks_exact(4)
                    .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                    .collect();
                Ok(FieldValue::Vector(floats))
            }
            ValueKind::Matrix => {
                let rows = extra[0] as usize;
                let cols = extra[1] as usize;
                if value_len != rows * cols * 4 {
                    return Err(Error::corruption("float matrix payload length mismatch"));
                }
                let mut buf = vec![0u8; value_len];
                self.file.read_at(payload_offset, &mut buf)?;
                let mut floats = buf
                    .chunks_exact(4)
                    .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]));
                let matrix = (0..rows)
                    .map(|_| (0..cols).map(|_| floats.next().unwrap_or(0.0)).collect())
                    .collect();
                Ok(FieldValue::Matrix(matrix))
            }
            ValueKind::Bytes => {
                let mut buf = vec![0u8; value_len];
                self.file.read_at(payload_offset, &mut buf)?;
                Ok(FieldValue::Bytes(buf))
            }
        }
    }

    /// Read the value at `offset`, requiring the given kind.
    pub fn read_value(&self, offset: u64, expected: ValueKind) -> Result<FieldValue> {
        let (tag, _key_len, extra, payload_offset, value_len) = self.header_layout(offset)?;
        if tag != expected.tag() {
            return Err(Error::new(
                ErrorKind::TypeMismatch,
                format!(
                    "entry at offset {} holds {} but {} was requested",
                    offset,
                    ValueKind::from_tag(tag)?.type_name(),
                    expected.type_name()
                ),
            ));
        }
        self.decode(tag, &extra, payload_offset, value_len)
    }

    /// Read the key and value at `offset`, whatever the kind.
    pub fn read_entry(&self, offset: u64) -> Result<(String, FieldValue)> {
        let (tag, key_len, extra, payload_offset, value_len) = self.header_layout(offset)?;
        let header = BASE_HEADER + extra.len() * 4;
        let mut key_buf = vec![0u8; key_len];
        self.file.read_at(offset + header as u64, &mut key_buf)?;
        let key = String::from_utf8(key_buf)
            .map_err(|_| Error::corruption("entry key holds invalid UTF-8"))?;
        let value = self.decode(tag, &extra, payload_offset, value_len)?;
        Ok((key, value))
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
    fn round_trip_every_type() {
        let dir = tempdir().unwrap();
        let log = DataLog::open(dir.path(), 0).unwrap();

        let values = [
            FieldValue::Text("world".into()),
            FieldValue::Integer(-42),
            FieldValue::Vector(vec![1.0, 2.0, 3.0]),
            FieldValue::Matrix(vec![vec![1.0, 2.0], vec![3.0, 4.0]]),
            FieldValue::Bytes(vec![0, 255, 7]),
        ];
        for (i, v) in values.iter().enumerate() {
            let key = format!("key-{}", i);
            let off = log.append(&key, v).unwrap();
            assert_eq!(&log.read_value(off, v.kind()).unwrap(), v);
            let (k, rv) = log.read_entry(off).unwrap();
            assert_eq!(k, key);
            assert_eq!(&rv, v);
        }
    }

    #[test]
    fn type_mismatch_is_reported() {
        let dir = tempdir().unwrap();
        let log = DataLog::open(dir.path(), 0).unwrap();
        let off = log.append("k", &FieldValue::Text("v".into())).unwrap();
        let err = log.read_value(off, ValueKind::Integer).unwrap_err();
        assert_eq!(err.kind, ErrorKind::TypeMismatch);
    }

    #[test]
    fn ragged_matrix_writes_nothing() {
        let dir = tempdir().unwrap();
        let log = DataLog::open(dir.path(), 0).unwrap();
        let before = log.committed_offset();
        let err = log
            .append("m", &FieldValue::Matrix(vec![vec![1.0], vec![2.0, 3.0]]))
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidInput);
        assert_eq!(log.committed_offset(), before);
    }

    #[test]
    fn float_bit_patterns_survive() {
        let dir = tempdir().unwrap();
        let log = DataLog::open(dir.path(), 0).unwrap();
        let v = FieldValue::Vector(vec![f32::MIN_POSITIVE, -0.0, f32::MAX, 1.5e-30]);
        let off = log.append("bits", &v).unwrap();
        let FieldValue::Vector(read) = log.read_value(off, ValueKind::Vector).unwrap() else {
            panic!("wrong kind");
        };
        let FieldValue::Vector(orig) = v else { unreachable!() };
        let read_bits: Vec<u32> = read.iter().map(|f| f.to_bits()).collect();
        let orig_bits: Vec<u32> = orig.iter().map(|f| f.to_bits()).collect();
        assert_eq!(read_bits, orig_bits);
    }

    #[test]
    fn concurrent_writers_get_disjoint_entries() {
        let dir = tempdir().unwrap();
        let log = DataLog::open(dir.path(), 0).unwrap();
        let threads = 8;
        let per_thread = 50;

        let written: Vec<(String, u64)> = crossbeam::thread::scope(|scope| {
            let mut handles = Vec::new();
            for t in 0..threads {
                let log = &log;
                handles.push(scope.spawn(move |_| {
                    let mut offsets = Vec::new();
                    for i in 0..per_thread {
                        let key = format!("t{}-{}", t, i);
                        let off = log
                            .append(&key, &FieldValue::Text(format!("value-{}-{}", t, i)))
                            .unwrap();
                        offsets.push((key, off));
                    }
                    offsets
                }));
            }
            handles
                .into_iter()
                .flat_map(|handle| handle.join().unwrap())
                .collect()
        })
        .unwrap();

        assert_eq!(written.len(), threads * per_thread);
        let mut expected_committed = 0u64;
        for (key, off) in &written {
            let (k, v) = log.read_entry(*off).unwrap();
            assert_eq!(&k, key);
            let FieldValue::Text(s) = v else { panic!("wrong kind") };
            assert!(s.starts_with("value-"));
            // Every reservation is align8(header + keyLen + 7 + payload).
            expected_committed += align_up8((BASE_HEADER + key.len() + 7 + s.len()) as u64);
        }
        assert_eq!(log.committed_offset(), expected_committed);
    }
}
