//! Capturing one file's backup stream before it is archived.
//!
//! The whole stream is decoded before anything is written: primary data and
//! alternate streams are spooled (memory first, then a temporary file) and
//! small metadata streams are kept in memory. A truncated or malformed
//! stream therefore fails the run before a single byte of the file's entry
//! reaches the archive, and metadata that follows the data stream still
//! makes it into the entry header.

use crate::ea::{decode_extended_attributes, ExtendedAttribute};
use crate::error::{Result, WintarError};
use crate::reparse::{decode_reparse_point, ReparseError, ReparsePoint};
use crate::stream::{BackupStreamReader, StreamType};
use crate::types::StreamLoss;
use std::io::{self, Read, Seek, SeekFrom, Write};
use tempfile::SpooledTempFile;
use tracing::debug;

/// Default in-memory spool size before spilling to a temporary file (8 MiB)
pub const DEFAULT_SPOOL_THRESHOLD: usize = 8 * 1024 * 1024;

/// Options controlling which streams are kept.
#[derive(Debug, Clone)]
pub struct CaptureOptions {
    /// Keep `BACKUP_SECURITY_DATA` records
    pub include_security: bool,

    /// Keep alternate data streams
    pub include_alternate_streams: bool,

    /// Bytes held in memory per spooled stream before using a temp file
    pub spool_threshold: usize,
}

impl Default for CaptureOptions {
    fn default() -> Self {
        CaptureOptions {
            include_security: false,
            include_alternate_streams: true,
            spool_threshold: DEFAULT_SPOOL_THRESHOLD,
        }
    }
}

/// Stream content held until the entry is written.
pub struct SpooledStream {
    len: u64,
    spool: SpooledTempFile,
}

impl SpooledStream {
    fn new(threshold: usize) -> Self {
        SpooledStream {
            len: 0,
            spool: SpooledTempFile::new(threshold),
        }
    }

    /// Copy everything `reader` yields into a new spool.
    pub fn from_reader<R: Read + ?Sized>(reader: &mut R, threshold: usize) -> Result<Self> {
        let mut stream = SpooledStream::new(threshold);
        stream.len = io::copy(reader, &mut stream.spool)?;
        Ok(stream)
    }

    fn append_zeros(&mut self, count: u64) -> Result<()> {
        let written = io::copy(&mut io::repeat(0).take(count), &mut self.spool)?;
        self.len += written;
        Ok(())
    }

    fn append_from<R: Read + ?Sized>(&mut self, reader: &mut R) -> Result<u64> {
        let written = io::copy(reader, &mut self.spool)?;
        self.len += written;
        Ok(written)
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Rewind and hand out exactly `len` bytes.
    pub fn into_reader(mut self) -> Result<impl Read> {
        self.spool.flush()?;
        self.spool.seek(SeekFrom::Start(0))?;
        Ok(self.spool.take(self.len))
    }
}

impl std::fmt::Debug for SpooledStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpooledStream")
            .field("len", &self.len)
            .field("rolled_over", &self.spool.is_rolled())
            .finish()
    }
}

/// A named alternate data stream.
#[derive(Debug)]
pub struct AlternateStream {
    /// Stream name without the leading `:` and the `:$DATA` suffix
    pub name: String,

    pub data: SpooledStream,
}

/// Everything captured from one file's backup stream.
#[derive(Debug, Default)]
pub struct CapturedFile {
    /// Primary data, dense (sparse ranges are zero-filled)
    pub data: Option<SpooledStream>,

    /// Self-relative security descriptor
    pub security_descriptor: Option<Vec<u8>>,

    pub reparse_point: Option<ReparsePoint>,

    pub extended_attributes: Vec<ExtendedAttribute>,

    pub alternate_streams: Vec<AlternateStream>,

    /// Pieces of the stream that have no archive representation
    pub losses: Vec<StreamLoss>,
}

impl CapturedFile {
    /// Length of the primary data, 0 if the stream had none
    pub fn data_len(&self) -> u64 {
        self.data.as_ref().map_or(0, SpooledStream::len)
    }
}

/// Decode and capture every record of a file's backup stream.
///
/// `file_size` is the logical size of the file; it bounds the dense
/// reconstruction of sparse data.
pub fn capture_streams<R: Read>(
    streams: &mut BackupStreamReader<R>,
    file_size: u64,
    options: &CaptureOptions,
) -> Result<CapturedFile> {
    let mut captured = CapturedFile::default();
    let mut skipping_sparse_blocks = false;

    while let Some(record) = streams.next()? {
        match record.stream_type {
            StreamType::Data => {
                if captured.data.is_some() {
                    return Err(WintarError::malformed("more than one primary data stream"));
                }
                let data = if record.is_sparse() {
                    streams.skip_payload()?;
                    capture_sparse(streams, file_size, options.spool_threshold)?
                } else {
                    SpooledStream::from_reader(streams, options.spool_threshold)?
                };
                if data.len() != file_size {
                    debug!(
                        stream_len = data.len(),
                        file_size, "data stream size differs from file size"
                    );
                }
                captured.data = Some(data);
            }

            StreamType::SecurityData => {
                if options.include_security {
                    captured.security_descriptor = Some(streams.read_payload()?);
                }
            }

            StreamType::ReparseData => {
                let buffer = streams.read_payload()?;
                match decode_reparse_point(&buffer) {
                    Ok(rp) => captured.reparse_point = Some(rp),
                    Err(ReparseError::UnsupportedTag(tag)) => {
                        captured
                            .losses
                            .push(StreamLoss::UnsupportedReparseTag { tag });
                    }
                    Err(err) => captured.losses.push(StreamLoss::InvalidReparseData {
                        reason: err.to_string(),
                    }),
                }
            }

            StreamType::EaData => {
                let buffer = streams.read_payload()?;
                match decode_extended_attributes(&buffer) {
                    Ok(eas) => captured.extended_attributes.extend(eas),
                    Err(err) => captured.losses.push(StreamLoss::InvalidExtendedAttributes {
                        reason: err.to_string(),
                    }),
                }
            }

            StreamType::AlternateData => {
                let name = alternate_stream_name(record.name.as_deref().unwrap_or_default());
                if record.is_sparse() {
                    // Sparse blocks for this stream follow; they are consumed below.
                    skipping_sparse_blocks = true;
                    captured
                        .losses
                        .push(StreamLoss::SparseAlternateStream { name });
                } else if options.include_alternate_streams {
                    let data = SpooledStream::from_reader(streams, options.spool_threshold)?;
                    captured.alternate_streams.push(AlternateStream { name, data });
                }
            }

            StreamType::SparseBlock => {
                if !skipping_sparse_blocks {
                    return Err(WintarError::malformed(
                        "sparse block outside of a sparse stream",
                    ));
                }
                if record.size == 0 {
                    skipping_sparse_blocks = false;
                }
            }

            StreamType::Link
            | StreamType::PropertyData
            | StreamType::ObjectId
            | StreamType::TxfsData
            | StreamType::Other(_) => {
                captured.losses.push(StreamLoss::UnsupportedStream {
                    stream: record.stream_type.to_string(),
                });
            }
        }
    }

    if skipping_sparse_blocks {
        return Err(WintarError::truncated("sparse block list", 1, 0));
    }

    Ok(captured)
}

/// Rebuild dense content from the sparse blocks following a sparse data header.
fn capture_sparse<R: Read>(
    streams: &mut BackupStreamReader<R>,
    file_size: u64,
    threshold: usize,
) -> Result<SpooledStream> {
    let mut data = SpooledStream::new(threshold);

    loop {
        let record = streams
            .next()?
            .ok_or_else(|| WintarError::truncated("sparse block list", file_size, data.len()))?;
        if record.stream_type != StreamType::SparseBlock {
            return Err(WintarError::malformed(format!(
                "{} stream inside sparse data",
                record.stream_type
            )));
        }

        let offset = record.sparse_offset.unwrap_or(data.len());
        if offset < data.len() {
            return Err(WintarError::malformed(format!(
                "sparse block at {} goes back from {}",
                offset,
                data.len()
            )));
        }
        if offset.saturating_add(record.size) > file_size {
            return Err(WintarError::malformed(format!(
                "sparse block {}+{} exceeds file size {}",
                offset, record.size, file_size
            )));
        }

        data.append_zeros(offset - data.len())?;
        if record.size == 0 {
            break;
        }
        data.append_from(streams)?;
    }

    data.append_zeros(file_size - data.len())?;
    Ok(data)
}

/// `:name:$DATA` -> `name`
fn alternate_stream_name(raw: &str) -> String {
    let trimmed = raw.strip_suffix(":$DATA").unwrap_or(raw);
    trimmed.strip_prefix(':').unwrap_or(trimmed).to_string()
}
