//! Decoder for the multiplexed stream produced by `BackupRead`.
//!
//! A backup stream is a sequence of records, each made of a fixed
//! `WIN32_STREAM_ID` header, an optional UTF-16LE stream name and a payload:
//!
//! ```text
//! +----------+------------+-----------+-----------+----------------+-----------+
//! | id (u32) | attrs(u32) | size(u64) | name(u32) | name (UTF-16)  | payload   |
//! +----------+------------+-----------+-----------+----------------+-----------+
//! ```
//!
//! `BackupStreamReader` walks the records one at a time. `next()` yields the
//! header of the following record and the payload of the current record is
//! read through the `io::Read` implementation. Unread payload is drained by
//! the next call to `next()`, so every byte of a file's stream is consumed.
//!
//! The stream ends cleanly only at a header boundary; running out of bytes
//! anywhere else is reported as `WintarError::TruncatedStream`.

use crate::error::{Result, WintarError};
use std::fmt;
use std::io::{self, Read};

/// Size of the fixed part of a `WIN32_STREAM_ID`
pub const STREAM_HEADER_LEN: usize = 20;

/// Size of the offset prefix at the start of every sparse block payload
const SPARSE_OFFSET_LEN: u64 = 8;

/// Longest stream name accepted, in bytes. NTFS names are at most 255
/// UTF-16 units; the `:` prefix and `:$DATA` suffix fit well inside this.
const MAX_STREAM_NAME_LEN: u32 = 1024;

/// `STREAM_MODIFIED_WHEN_READ`
pub const STREAM_MODIFIED_WHEN_READ: u32 = 0x1;
/// `STREAM_CONTAINS_SECURITY`
pub const STREAM_CONTAINS_SECURITY: u32 = 0x2;
/// `STREAM_CONTAINS_PROPERTIES`
pub const STREAM_CONTAINS_PROPERTIES: u32 = 0x4;
/// `STREAM_SPARSE_ATTRIBUTE`
pub const STREAM_SPARSE_ATTRIBUTE: u32 = 0x8;

/// Type of a backup stream record (`BACKUP_*` stream ids).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamType {
    /// `BACKUP_DATA`: the primary (unnamed) data stream
    Data,
    /// `BACKUP_EA_DATA`: extended attributes
    EaData,
    /// `BACKUP_SECURITY_DATA`: self-relative security descriptor
    SecurityData,
    /// `BACKUP_ALTERNATE_DATA`: a named alternate data stream
    AlternateData,
    /// `BACKUP_LINK`: hard link information
    Link,
    /// `BACKUP_PROPERTY_DATA`
    PropertyData,
    /// `BACKUP_OBJECT_ID`
    ObjectId,
    /// `BACKUP_REPARSE_DATA`
    ReparseData,
    /// `BACKUP_SPARSE_BLOCK`: one allocated range of a sparse stream
    SparseBlock,
    /// `BACKUP_TXFS_DATA`
    TxfsData,
    /// Any id this decoder does not know
    Other(u32),
}

impl StreamType {
    pub fn from_id(id: u32) -> Self {
        match id {
            1 => StreamType::Data,
            2 => StreamType::EaData,
            3 => StreamType::SecurityData,
            4 => StreamType::AlternateData,
            5 => StreamType::Link,
            6 => StreamType::PropertyData,
            7 => StreamType::ObjectId,
            8 => StreamType::ReparseData,
            9 => StreamType::SparseBlock,
            10 => StreamType::TxfsData,
            other => StreamType::Other(other),
        }
    }

    pub fn id(self) -> u32 {
        match self {
            StreamType::Data => 1,
            StreamType::EaData => 2,
            StreamType::SecurityData => 3,
            StreamType::AlternateData => 4,
            StreamType::Link => 5,
            StreamType::PropertyData => 6,
            StreamType::ObjectId => 7,
            StreamType::ReparseData => 8,
            StreamType::SparseBlock => 9,
            StreamType::TxfsData => 10,
            StreamType::Other(id) => id,
        }
    }
}

impl fmt::Display for StreamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamType::Data => write!(f, "data"),
            StreamType::EaData => write!(f, "extended-attributes"),
            StreamType::SecurityData => write!(f, "security"),
            StreamType::AlternateData => write!(f, "alternate-data"),
            StreamType::Link => write!(f, "link"),
            StreamType::PropertyData => write!(f, "property"),
            StreamType::ObjectId => write!(f, "object-id"),
            StreamType::ReparseData => write!(f, "reparse"),
            StreamType::SparseBlock => write!(f, "sparse-block"),
            StreamType::TxfsData => write!(f, "txfs"),
            StreamType::Other(id) => write!(f, "unknown({})", id),
        }
    }
}

/// Header of one record in a backup stream.
///
/// The record's payload is not part of this value; it is read from the
/// `BackupStreamReader` that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupStreamRecord {
    pub stream_type: StreamType,

    /// `STREAM_*` attribute flags
    pub attributes: u32,

    /// Payload length in bytes (for sparse blocks, excluding the offset prefix)
    pub size: u64,

    /// Stream name, e.g. `:Zone.Identifier:$DATA` for alternate data streams
    pub name: Option<String>,

    /// File offset of a sparse block
    pub sparse_offset: Option<u64>,
}

impl BackupStreamRecord {
    pub fn is_sparse(&self) -> bool {
        self.attributes & STREAM_SPARSE_ATTRIBUTE != 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DecoderState {
    /// Positioned at a record boundary
    Header,
    /// Inside a payload with this many bytes left
    Payload { remaining: u64, size: u64 },
}

/// Forward-only reader over the records of a backup stream.
pub struct BackupStreamReader<R> {
    inner: R,
    state: DecoderState,
}

impl<R: Read> BackupStreamReader<R> {
    pub fn new(inner: R) -> Self {
        BackupStreamReader {
            inner,
            state: DecoderState::Header,
        }
    }

    /// Advance to the next record.
    ///
    /// Any unread payload of the current record is consumed first. Returns
    /// `Ok(None)` when the stream ends exactly at a record boundary.
    pub fn next(&mut self) -> Result<Option<BackupStreamRecord>> {
        self.skip_payload()?;

        // HEADER
        let mut header = [0u8; STREAM_HEADER_LEN];
        let filled = read_fully(&mut self.inner, &mut header)?;
        if filled == 0 {
            return Ok(None);
        }
        if filled < STREAM_HEADER_LEN {
            return Err(WintarError::truncated(
                "stream header",
                STREAM_HEADER_LEN as u64,
                filled as u64,
            ));
        }

        let stream_type = StreamType::from_id(le_u32(&header[0..4]));
        let attributes = le_u32(&header[4..8]);
        let mut size = le_u64(&header[8..16]);
        let name_len = le_u32(&header[16..20]);

        // NAME
        let name = if name_len > 0 {
            if name_len > MAX_STREAM_NAME_LEN {
                return Err(WintarError::malformed(format!(
                    "stream name length {} exceeds {} bytes",
                    name_len, MAX_STREAM_NAME_LEN
                )));
            }
            if name_len % 2 != 0 {
                return Err(WintarError::malformed(format!(
                    "stream name length {} is not a whole number of UTF-16 units",
                    name_len
                )));
            }
            let mut raw = vec![0u8; name_len as usize];
            let filled = read_fully(&mut self.inner, &mut raw)?;
            if filled < raw.len() {
                return Err(WintarError::truncated(
                    "stream name",
                    u64::from(name_len),
                    filled as u64,
                ));
            }
            Some(decode_utf16le(&raw))
        } else {
            None
        };

        // PAYLOAD
        let sparse_offset = if stream_type == StreamType::SparseBlock {
            if size < SPARSE_OFFSET_LEN {
                return Err(WintarError::malformed(format!(
                    "sparse block of {} bytes cannot hold its offset",
                    size
                )));
            }
            let mut raw = [0u8; SPARSE_OFFSET_LEN as usize];
            let filled = read_fully(&mut self.inner, &mut raw)?;
            if filled < raw.len() {
                return Err(WintarError::truncated(
                    "sparse block offset",
                    SPARSE_OFFSET_LEN,
                    filled as u64,
                ));
            }
            size -= SPARSE_OFFSET_LEN;
            Some(le_u64(&raw))
        } else {
            None
        };

        self.state = DecoderState::Payload {
            remaining: size,
            size,
        };

        Ok(Some(BackupStreamRecord {
            stream_type,
            attributes,
            size,
            name,
            sparse_offset,
        }))
    }

    /// Read the rest of the current payload into memory.
    pub fn read_payload(&mut self) -> Result<Vec<u8>> {
        let mut payload = Vec::with_capacity(self.remaining().min(64 * 1024) as usize);
        self.read_to_end(&mut payload)?;
        Ok(payload)
    }

    /// Bytes of the current payload not yet read
    pub fn remaining(&self) -> u64 {
        match self.state {
            DecoderState::Header => 0,
            DecoderState::Payload { remaining, .. } => remaining,
        }
    }

    /// Consume the rest of the current payload.
    pub fn skip_payload(&mut self) -> Result<u64> {
        if self.remaining() == 0 {
            self.state = DecoderState::Header;
            return Ok(0);
        }
        let skipped = io::copy(self, &mut io::sink())?;
        self.state = DecoderState::Header;
        Ok(skipped)
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: Read> Read for BackupStreamReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let (remaining, size) = match self.state {
            DecoderState::Header => return Ok(0),
            DecoderState::Payload { remaining, size } => (remaining, size),
        };
        if remaining == 0 || buf.is_empty() {
            return Ok(0);
        }

        let want = remaining.min(buf.len() as u64) as usize;
        let n = loop {
            match self.inner.read(&mut buf[..want]) {
                Ok(n) => break n,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(err),
            }
        };
        if n == 0 {
            return Err(WintarError::truncated("stream payload", size, size - remaining).into_io());
        }

        self.state = DecoderState::Payload {
            remaining: remaining - n as u64,
            size,
        };
        Ok(n)
    }
}

/// Fill `buf` as far as the reader allows; returns the number of bytes read.
fn read_fully<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err.into()),
        }
    }
    Ok(filled)
}

fn le_u32(bytes: &[u8]) -> u32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&bytes[..4]);
    u32::from_le_bytes(raw)
}

fn le_u64(bytes: &[u8]) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&bytes[..8]);
    u64::from_le_bytes(raw)
}

/// Decode UTF-16LE bytes, replacing unpaired surrogates.
pub(crate) fn decode_utf16le(raw: &[u8]) -> String {
    let units: Vec<u16> = raw
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect();
    String::from_utf16_lossy(&units)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::StreamBuilder;
    use std::io::Cursor;

    #[test]
    fn test_empty_stream_ends_cleanly() {
        let mut reader = BackupStreamReader::new(Cursor::new(Vec::new()));
        assert!(reader.next().unwrap().is_none());
    }

    #[test]
    fn test_single_data_record() {
        let bytes = StreamBuilder::new().data(b"hello world").build();
        let mut reader = BackupStreamReader::new(Cursor::new(bytes));

        let record = reader.next().unwrap().unwrap();
        assert_eq!(record.stream_type, StreamType::Data);
        assert_eq!(record.size, 11);
        assert_eq!(record.name, None);
        assert_eq!(reader.read_payload().unwrap(), b"hello world");

        assert!(reader.next().unwrap().is_none());
    }

    #[test]
    fn test_named_alternate_stream() {
        let bytes = StreamBuilder::new()
            .data(b"main")
            .alternate(":Zone.Identifier:$DATA", b"[ZoneTransfer]")
            .build();
        let mut reader = BackupStreamReader::new(Cursor::new(bytes));

        let first = reader.next().unwrap().unwrap();
        assert_eq!(first.stream_type, StreamType::Data);

        let second = reader.next().unwrap().unwrap();
        assert_eq!(second.stream_type, StreamType::AlternateData);
        assert_eq!(second.name.as_deref(), Some(":Zone.Identifier:$DATA"));
        assert_eq!(reader.read_payload().unwrap(), b"[ZoneTransfer]");
    }

    #[test]
    fn test_unread_payload_is_skipped() {
        let bytes = StreamBuilder::new()
            .security(&[1, 0, 4, 0x80, 0, 0, 0, 0])
            .data(b"content")
            .build();
        let mut reader = BackupStreamReader::new(Cursor::new(bytes));

        let sd = reader.next().unwrap().unwrap();
        assert_eq!(sd.stream_type, StreamType::SecurityData);

        // The descriptor payload is never read.
        let data = reader.next().unwrap().unwrap();
        assert_eq!(data.stream_type, StreamType::Data);
        assert_eq!(reader.read_payload().unwrap(), b"content");
        assert!(reader.next().unwrap().is_none());
    }

    #[test]
    fn test_truncated_payload() {
        // Header claims 100 bytes but only 40 follow.
        let mut bytes = StreamBuilder::new().raw_header(1, 0, 100, 0).build();
        bytes.extend_from_slice(&[0xAA; 40]);
        let mut reader = BackupStreamReader::new(Cursor::new(bytes));

        reader.next().unwrap().unwrap();
        let err = reader.read_payload().unwrap_err();
        assert!(matches!(
            err,
            WintarError::TruncatedStream {
                expected: 100,
                read: 40,
                ..
            }
        ));
    }

    #[test]
    fn test_truncated_payload_detected_when_skipping() {
        let mut bytes = StreamBuilder::new().raw_header(1, 0, 100, 0).build();
        bytes.extend_from_slice(&[0xAA; 40]);
        let mut reader = BackupStreamReader::new(Cursor::new(bytes));

        reader.next().unwrap().unwrap();
        let err = reader.next().unwrap_err();
        assert!(err.is_corrupt_capture());
    }

    #[test]
    fn test_truncated_header() {
        let mut bytes = StreamBuilder::new().data(b"ok").build();
        bytes.extend_from_slice(&[1, 0, 0, 0, 0, 0]);
        let mut reader = BackupStreamReader::new(Cursor::new(bytes));

        reader.next().unwrap().unwrap();
        let err = reader.next().unwrap_err();
        assert!(matches!(
            err,
            WintarError::TruncatedStream {
                section: "stream header",
                read: 6,
                ..
            }
        ));
    }

    #[test]
    fn test_oversized_name_rejected() {
        let bytes = StreamBuilder::new().raw_header(4, 0, 0, u32::MAX - 1).build();
        let mut reader = BackupStreamReader::new(Cursor::new(bytes));

        let err = reader.next().unwrap_err();
        assert!(matches!(err, WintarError::MalformedStream { .. }));
    }

    #[test]
    fn test_truncated_name() {
        let mut bytes = StreamBuilder::new().raw_header(4, 0, 0, 16).build();
        bytes.extend_from_slice(&[b':', 0, b'a', 0]);
        let mut reader = BackupStreamReader::new(Cursor::new(bytes));

        let err = reader.next().unwrap_err();
        assert!(matches!(
            err,
            WintarError::TruncatedStream {
                section: "stream name",
                expected: 16,
                read: 4,
                ..
            }
        ));
    }

    #[test]
    fn test_sparse_block_offset() {
        let bytes = StreamBuilder::new()
            .sparse_data_header()
            .sparse_block(4096, b"abc")
            .sparse_end(8192)
            .build();
        let mut reader = BackupStreamReader::new(Cursor::new(bytes));

        let data = reader.next().unwrap().unwrap();
        assert!(data.is_sparse());

        let block = reader.next().unwrap().unwrap();
        assert_eq!(block.stream_type, StreamType::SparseBlock);
        assert_eq!(block.sparse_offset, Some(4096));
        assert_eq!(block.size, 3);
        assert_eq!(reader.read_payload().unwrap(), b"abc");

        let end = reader.next().unwrap().unwrap();
        assert_eq!(end.sparse_offset, Some(8192));
        assert_eq!(end.size, 0);
    }

    #[test]
    fn test_sparse_block_too_short() {
        let mut bytes = StreamBuilder::new().raw_header(9, 0, 4, 0).build();
        bytes.extend_from_slice(&[0; 4]);
        let mut reader = BackupStreamReader::new(Cursor::new(bytes));

        let err = reader.next().unwrap_err();
        assert!(matches!(err, WintarError::MalformedStream { .. }));
    }

    #[test]
    fn test_unknown_stream_type() {
        let bytes = StreamBuilder::new().record(42, 0, None, b"xyz").build();
        let mut reader = BackupStreamReader::new(Cursor::new(bytes));

        let record = reader.next().unwrap().unwrap();
        assert_eq!(record.stream_type, StreamType::Other(42));
        assert_eq!(record.stream_type.id(), 42);
    }

    #[test]
    fn test_stream_type_ids() {
        for id in 1..=10 {
            assert_eq!(StreamType::from_id(id).id(), id);
        }
    }
}
