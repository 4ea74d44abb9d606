//! Snapshot file format
//!
//! One snapshot is a complete image of the in-memory store:
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │ Header (32 bytes)                            │
//! │   magic "INCS" | version | flags | pad       │
//! │   counter_count u64 | created_at i64         │
//! │   reserved | header_checksum u32             │
//! ├──────────────────────────────────────────────┤
//! │ data_len u64 | data (bincode StoreImage,     │
//! │                      optionally zstd)        │
//! ├──────────────────────────────────────────────┤
//! │ Footer (16 bytes)                            │
//! │   data_checksum u32 | data_size u64 |        │
//! │   footer_checksum u32                        │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! The data checksum covers the uncompressed bytes.

use super::records::{RecordError, StoreImage};
use std::io::{Cursor, Read as IoRead, Write as IoWrite};
use thiserror::Error;

const SNAPSHOT_MAGIC: &[u8; 4] = b"INCS";
const SNAPSHOT_VERSION: u8 = 1;
const HEADER_SIZE: usize = 32;
const FOOTER_SIZE: usize = 16;
const FLAG_COMPRESSED: u8 = 1;

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("checksum mismatch: expected {expected:08x}, got {actual:08x}")]
    ChecksumMismatch { expected: u32, actual: u32 },

    #[error("invalid format: {0}")]
    InvalidFormat(String),

    #[error(transparent)]
    InvalidRecord(#[from] RecordError),
}

/// Compression options for snapshot data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Compression {
    #[default]
    None,
    /// Zstd compression (requires feature)
    #[cfg(feature = "compression")]
    Zstd { level: i32 },
}

#[derive(Debug, Clone)]
struct SnapshotHeader {
    magic: [u8; 4],
    version: u8,
    flags: u8,
    counter_count: u64,
    created_at: i64,
    header_checksum: u32,
}

impl SnapshotHeader {
    fn new(counter_count: u64, created_at: i64, compressed: bool) -> Self {
        let mut header = SnapshotHeader {
            magic: *SNAPSHOT_MAGIC,
            version: SNAPSHOT_VERSION,
            flags: if compressed { FLAG_COMPRESSED } else { 0 },
            counter_count,
            created_at,
            header_checksum: 0,
        };
        header.header_checksum = header.compute_checksum();
        header
    }

    fn compute_checksum(&self) -> u32 {
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&self.magic);
        hasher.update(&[self.version, self.flags]);
        hasher.update(&self.counter_count.to_le_bytes());
        hasher.update(&self.created_at.to_le_bytes());
        hasher.finalize()
    }

    fn write_to<W: IoWrite>(&self, writer: &mut W) -> Result<(), SnapshotError> {
        writer.write_all(&self.magic)?;
        writer.write_all(&[self.version, self.flags])?;
        writer.write_all(&[0u8; 2])?;
        writer.write_all(&self.counter_count.to_le_bytes())?;
        writer.write_all(&self.created_at.to_le_bytes())?;
        writer.write_all(&[0u8; 4])?;
        writer.write_all(&self.header_checksum.to_le_bytes())?;
        Ok(())
    }

    fn read_from<R: IoRead>(reader: &mut R) -> Result<Self, SnapshotError> {
        let mut magic = [0u8; 4];
        let mut pair = [0u8; 2];
        let mut buf8 = [0u8; 8];
        let mut buf4 = [0u8; 4];

        reader.read_exact(&mut magic)?;
        reader.read_exact(&mut pair)?;
        let [version, flags] = pair;
        reader.read_exact(&mut pair)?; // padding
        reader.read_exact(&mut buf8)?;
        let counter_count = u64::from_le_bytes(buf8);
        reader.read_exact(&mut buf8)?;
        let created_at = i64::from_le_bytes(buf8);
        reader.read_exact(&mut buf4)?; // reserved
        reader.read_exact(&mut buf4)?;
        let header_checksum = u32::from_le_bytes(buf4);

        Ok(SnapshotHeader {
            magic,
            version,
            flags,
            counter_count,
            created_at,
            header_checksum,
        })
    }

    fn validate(&self) -> Result<(), SnapshotError> {
        if &self.magic != SNAPSHOT_MAGIC {
            return Err(SnapshotError::InvalidFormat(format!(
                "invalid magic: expected INCS, got {:?}",
                self.magic
            )));
        }
        if self.version != SNAPSHOT_VERSION {
            return Err(SnapshotError::InvalidFormat(format!(
                "unsupported version: {}",
                self.version
            )));
        }
        let expected = self.compute_checksum();
        if self.header_checksum != expected {
            return Err(SnapshotError::ChecksumMismatch {
                expected,
                actual: self.header_checksum,
            });
        }
        Ok(())
    }

    fn is_compressed(&self) -> bool {
        self.flags & FLAG_COMPRESSED != 0
    }
}

#[derive(Debug, Clone)]
struct SnapshotFooter {
    data_checksum: u32,
    data_size: u64,
    footer_checksum: u32,
}

impl SnapshotFooter {
    fn new(data_checksum: u32, data_size: u64) -> Self {
        let mut footer = SnapshotFooter {
            data_checksum,
            data_size,
            footer_checksum: 0,
        };
        footer.footer_checksum = footer.compute_checksum();
        footer
    }

    fn compute_checksum(&self) -> u32 {
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&self.data_checksum.to_le_bytes());
        hasher.update(&self.data_size.to_le_bytes());
        hasher.finalize()
    }

    fn write_to<W: IoWrite>(&self, writer: &mut W) -> Result<(), SnapshotError> {
        writer.write_all(&self.data_checksum.to_le_bytes())?;
        writer.write_all(&self.data_size.to_le_bytes())?;
        writer.write_all(&self.footer_checksum.to_le_bytes())?;
        Ok(())
    }

    fn read_from<R: IoRead>(reader: &mut R) -> Result<Self, SnapshotError> {
        let mut buf4 = [0u8; 4];
        let mut buf8 = [0u8; 8];

        reader.read_exact(&mut buf4)?;
        let data_checksum = u32::from_le_bytes(buf4);
        reader.read_exact(&mut buf8)?;
        let data_size = u64::from_le_bytes(buf8);
        reader.read_exact(&mut buf4)?;
        let footer_checksum = u32::from_le_bytes(buf4);

        let footer = SnapshotFooter {
            data_checksum,
            data_size,
            footer_checksum,
        };
        let expected = footer.compute_checksum();
        if footer_checksum != expected {
            return Err(SnapshotError::ChecksumMismatch {
                expected,
                actual: footer_checksum,
            });
        }
        Ok(footer)
    }
}

/// Encodes store images into snapshot bytes
#[derive(Debug, Clone, Copy, Default)]
pub struct SnapshotWriter {
    compression: Compression,
}

impl SnapshotWriter {
    pub fn new(compression: Compression) -> Self {
        SnapshotWriter { compression }
    }

    pub fn write(&self, image: &StoreImage, created_at: i64) -> Result<Vec<u8>, SnapshotError> {
        let serialized =
            bincode::serialize(image).map_err(|e| SnapshotError::Serialization(e.to_string()))?;

        let (payload, compressed) = match self.compression {
            Compression::None => (serialized.clone(), false),
            #[cfg(feature = "compression")]
            Compression::Zstd { level } => (zstd::encode_all(Cursor::new(&serialized), level)?, true),
        };

        let header = SnapshotHeader::new(image.counters.len() as u64, created_at, compressed);
        let footer = SnapshotFooter::new(crc32fast::hash(&serialized), serialized.len() as u64);

        let mut output = Vec::with_capacity(HEADER_SIZE + 8 + payload.len() + FOOTER_SIZE);
        header.write_to(&mut output)?;
        output.extend_from_slice(&(payload.len() as u64).to_le_bytes());
        output.extend_from_slice(&payload);
        footer.write_to(&mut output)?;
        Ok(output)
    }
}

/// Reads and verifies snapshot bytes
pub struct SnapshotReader<'a> {
    data: &'a [u8],
    header: SnapshotHeader,
}

impl<'a> SnapshotReader<'a> {
    /// Open a snapshot, validating its header
    pub fn open(data: &'a [u8]) -> Result<Self, SnapshotError> {
        if data.len() < HEADER_SIZE + 8 + FOOTER_SIZE {
            return Err(SnapshotError::InvalidFormat("snapshot too small".to_string()));
        }
        let header = SnapshotHeader::read_from(&mut Cursor::new(data))?;
        header.validate()?;
        Ok(SnapshotReader { data, header })
    }

    pub fn counter_count(&self) -> u64 {
        self.header.counter_count
    }

    pub fn created_at(&self) -> i64 {
        self.header.created_at
    }

    pub fn is_compressed(&self) -> bool {
        self.header.is_compressed()
    }

    /// Verify checksums and decode the image
    pub fn load(&self) -> Result<StoreImage, SnapshotError> {
        let mut len_buf = [0u8; 8];
        len_buf.copy_from_slice(&self.data[HEADER_SIZE..HEADER_SIZE + 8]);
        let data_start = HEADER_SIZE + 8;
        let data_end = usize::try_from(u64::from_le_bytes(len_buf))
            .ok()
            .and_then(|len| data_start.checked_add(len))
            .filter(|&end| end.checked_add(FOOTER_SIZE) == Some(self.data.len()))
            .ok_or_else(|| SnapshotError::InvalidFormat("data length does not match file size".into()))?;

        let footer = SnapshotFooter::read_from(&mut Cursor::new(&self.data[data_end..]))?;
        let raw = self.decompress(&self.data[data_start..data_end])?;

        let actual = crc32fast::hash(&raw);
        if actual != footer.data_checksum {
            return Err(SnapshotError::ChecksumMismatch {
                expected: footer.data_checksum,
                actual,
            });
        }
        if raw.len() as u64 != footer.data_size {
            return Err(SnapshotError::InvalidFormat(format!(
                "data size mismatch: expected {}, got {}",
                footer.data_size,
                raw.len()
            )));
        }

        let image: StoreImage =
            bincode::deserialize(&raw).map_err(|e| SnapshotError::Serialization(e.to_string()))?;
        if image.counters.len() as u64 != self.header.counter_count {
            return Err(SnapshotError::InvalidFormat(format!(
                "counter count mismatch: header {}, data {}",
                self.header.counter_count,
                image.counters.len()
            )));
        }
        Ok(image)
    }

    fn decompress(&self, payload: &[u8]) -> Result<Vec<u8>, SnapshotError> {
        if !self.header.is_compressed() {
            return Ok(payload.to_vec());
        }
        #[cfg(feature = "compression")]
        {
            Ok(zstd::decode_all(Cursor::new(payload))?)
        }
        #[cfg(not(feature = "compression"))]
        {
            Err(SnapshotError::InvalidFormat(
                "snapshot is compressed but compression is not enabled".to_string(),
            ))
        }
    }
}

/// Encode in one call
pub fn encode_snapshot(
    image: &StoreImage,
    created_at: i64,
    compression: Compression,
) -> Result<Vec<u8>, SnapshotError> {
    SnapshotWriter::new(compression).write(image, created_at)
}

/// Verify and decode in one call
pub fn decode_snapshot(data: &[u8]) -> Result<StoreImage, SnapshotError> {
    SnapshotReader::open(data)?.load()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregation::{CounterKey, MeterSet, ResolutionLadder, Sample, Timestamp};
    use crate::persistence::records::CounterRecord;
    use std::sync::Arc;

    fn image() -> StoreImage {
        let ladder = Arc::new(ResolutionLadder::default());
        let mut counters = Vec::new();
        for name in ["a", "b", "c"] {
            let mut set = MeterSet::new(Arc::clone(&ladder));
            set.submit(&Sample::new(Timestamp::from_secs(1_700_000_000), 1.0, name));
            counters.push(CounterRecord::from_set(&CounterKey::new("ns", name), &set, 7));
        }
        StoreImage { counters }
    }

    #[test]
    fn test_write_read_roundtrip() {
        let image = image();
        let bytes = encode_snapshot(&image, 1_700_000_001, Compression::None).unwrap();

        let reader = SnapshotReader::open(&bytes).unwrap();
        assert_eq!(reader.counter_count(), 3);
        assert_eq!(reader.created_at(), 1_700_000_001);
        assert!(!reader.is_compressed());
        assert_eq!(reader.load().unwrap(), image);
    }

    #[test]
    fn test_empty_image() {
        let empty = StoreImage { counters: vec![] };
        let bytes = encode_snapshot(&empty, 0, Compression::None).unwrap();
        assert_eq!(decode_snapshot(&bytes).unwrap(), empty);
    }

    #[test]
    fn test_bad_magic() {
        let mut bytes = encode_snapshot(&image(), 0, Compression::None).unwrap();
        bytes[0] = b'X';
        assert!(matches!(
            decode_snapshot(&bytes),
            Err(SnapshotError::InvalidFormat(_))
        ));
    }

    #[test]
    fn test_header_corruption() {
        let mut bytes = encode_snapshot(&image(), 0, Compression::None).unwrap();
        bytes[9] ^= 0xff; // counter_count
        assert!(matches!(
            decode_snapshot(&bytes),
            Err(SnapshotError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_data_corruption() {
        let mut bytes = encode_snapshot(&image(), 0, Compression::None).unwrap();
        let mid = HEADER_SIZE + 8 + 4;
        bytes[mid] ^= 0x55;
        assert!(matches!(
            decode_snapshot(&bytes),
            Err(SnapshotError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_truncated() {
        let bytes = encode_snapshot(&image(), 0, Compression::None).unwrap();
        assert!(decode_snapshot(&bytes[..bytes.len() - 1]).is_err());
        assert!(decode_snapshot(&bytes[..10]).is_err());
        assert!(decode_snapshot(&[]).is_err());
    }

    #[cfg(feature = "compression")]
    #[test]
    fn test_compressed_roundtrip() {
        let image = image();
        let bytes = encode_snapshot(&image, 5, Compression::Zstd { level: 3 }).unwrap();
        let reader = SnapshotReader::open(&bytes).unwrap();
        assert!(reader.is_compressed());
        assert_eq!(reader.load().unwrap(), image);
    }
}
