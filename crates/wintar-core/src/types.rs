//! Core data types for wintar.
//!
//! These types describe what the pipeline learns about a file before it
//! is encoded: its durable identity, the basic metadata snapshot taken on
//! the open handle, and the losses that could not be represented in the
//! archive.

use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
use std::fmt;

/// `FILE_ATTRIBUTE_READONLY`
pub const FILE_ATTRIBUTE_READONLY: u32 = 0x0000_0001;
/// `FILE_ATTRIBUTE_HIDDEN`
pub const FILE_ATTRIBUTE_HIDDEN: u32 = 0x0000_0002;
/// `FILE_ATTRIBUTE_SYSTEM`
pub const FILE_ATTRIBUTE_SYSTEM: u32 = 0x0000_0004;
/// `FILE_ATTRIBUTE_DIRECTORY`
pub const FILE_ATTRIBUTE_DIRECTORY: u32 = 0x0000_0010;
/// `FILE_ATTRIBUTE_ARCHIVE`
pub const FILE_ATTRIBUTE_ARCHIVE: u32 = 0x0000_0020;
/// `FILE_ATTRIBUTE_NORMAL`
pub const FILE_ATTRIBUTE_NORMAL: u32 = 0x0000_0080;
/// `FILE_ATTRIBUTE_SPARSE_FILE`
pub const FILE_ATTRIBUTE_SPARSE_FILE: u32 = 0x0000_0200;
/// `FILE_ATTRIBUTE_REPARSE_POINT`
pub const FILE_ATTRIBUTE_REPARSE_POINT: u32 = 0x0000_0400;
/// `FILE_ATTRIBUTE_COMPRESSED`
pub const FILE_ATTRIBUTE_COMPRESSED: u32 = 0x0000_0800;

/// Durable identity of a filesystem object.
///
/// Two directory entries with the same identity are hardlinks to the same
/// object. The identity is volume-scoped, so the volume serial is part of it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileIdentity {
    /// Serial number of the volume holding the file
    pub volume_serial: u64,

    /// File reference number (NTFS file index) within the volume
    pub file_index: u64,
}

impl FileIdentity {
    pub fn new(volume_serial: u64, file_index: u64) -> Self {
        FileIdentity {
            volume_serial,
            file_index,
        }
    }
}

impl fmt::Display for FileIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08X}:{:016X}", self.volume_serial, self.file_index)
    }
}

/// A raw Windows FILETIME: 100-nanosecond ticks since 1601-01-01 UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct FileTime(pub i64);

impl FileTime {
    /// Ticks between 1601-01-01 and 1970-01-01
    const UNIX_EPOCH_TICKS: i64 = 116_444_736_000_000_000;
    const TICKS_PER_SECOND: i64 = 10_000_000;

    /// Build a FILETIME from Unix seconds and nanoseconds.
    pub fn from_unix(seconds: i64, nanos: u32) -> Self {
        FileTime(
            Self::UNIX_EPOCH_TICKS + seconds * Self::TICKS_PER_SECOND + i64::from(nanos / 100),
        )
    }

    /// Split into Unix seconds and a non-negative nanosecond remainder.
    pub fn to_unix(self) -> (i64, u32) {
        let ticks = self.0 - Self::UNIX_EPOCH_TICKS;
        let seconds = ticks.div_euclid(Self::TICKS_PER_SECOND);
        let nanos = (ticks.rem_euclid(Self::TICKS_PER_SECOND) * 100) as u32;
        (seconds, nanos)
    }

    /// Whole Unix seconds, as stored in a tar header's `mtime` field.
    ///
    /// Sub-second precision is truncated and times before 1970 clamp to 0.
    pub fn unix_seconds_clamped(self) -> u64 {
        self.to_unix().0.max(0) as u64
    }

    pub fn to_datetime(self) -> Option<DateTime<Utc>> {
        let (seconds, nanos) = self.to_unix();
        Utc.timestamp_opt(seconds, nanos).single()
    }

    /// Format as a PAX time value (`seconds[.fraction]`).
    pub fn to_pax(self) -> String {
        let (mut seconds, mut nanos) = self.to_unix();
        if nanos == 0 {
            return seconds.to_string();
        }

        let mut sign = "";
        if seconds < 0 {
            // PAX writes negative times as a signed magnitude.
            sign = "-";
            seconds = -(seconds + 1);
            nanos = 1_000_000_000 - nanos;
        }

        let formatted = format!("{}{}.{:09}", sign, seconds, nanos);
        formatted.trim_end_matches('0').to_string()
    }
}

impl fmt::Display for FileTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_datetime() {
            Some(dt) => write!(f, "{}", dt.to_rfc3339_opts(SecondsFormat::AutoSi, true)),
            None => write!(f, "FILETIME({})", self.0),
        }
    }
}

/// Basic metadata captured once per file from the open handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BasicFileInfo {
    pub creation_time: FileTime,
    pub last_access_time: FileTime,
    pub last_write_time: FileTime,
    pub change_time: FileTime,

    /// `FILE_ATTRIBUTE_*` bitmask
    pub file_attributes: u32,
}

impl BasicFileInfo {
    pub fn is_directory(&self) -> bool {
        self.file_attributes & FILE_ATTRIBUTE_DIRECTORY != 0
    }

    pub fn is_reparse_point(&self) -> bool {
        self.file_attributes & FILE_ATTRIBUTE_REPARSE_POINT != 0
    }

    pub fn is_readonly(&self) -> bool {
        self.file_attributes & FILE_ATTRIBUTE_READONLY != 0
    }

    pub fn is_sparse(&self) -> bool {
        self.file_attributes & FILE_ATTRIBUTE_SPARSE_FILE != 0
    }
}

/// A piece of Windows metadata that the archive could not carry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamLoss {
    /// A backup stream type with no archive representation
    UnsupportedStream { stream: String },

    /// A reparse point whose tag cannot be expressed as a link
    UnsupportedReparseTag { tag: u32 },

    /// Reparse data that could not be parsed
    InvalidReparseData { reason: String },

    /// Extended attribute data that could not be parsed
    InvalidExtendedAttributes { reason: String },

    /// A sparse alternate data stream (its size is unknown up front)
    SparseAlternateStream { name: String },

    /// Primary data attached to an entry written as a symlink
    SymlinkData { size: u64 },

    /// Metadata dropped because the archive format has no extension records
    NoExtensionRecords { what: &'static str },
}

impl fmt::Display for StreamLoss {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamLoss::UnsupportedStream { stream } => {
                write!(f, "{} stream dropped", stream)
            }
            StreamLoss::UnsupportedReparseTag { tag } => {
                write!(f, "reparse point with tag {:#010X} dropped", tag)
            }
            StreamLoss::InvalidReparseData { reason } => {
                write!(f, "invalid reparse data dropped: {}", reason)
            }
            StreamLoss::InvalidExtendedAttributes { reason } => {
                write!(f, "invalid extended attributes dropped: {}", reason)
            }
            StreamLoss::SparseAlternateStream { name } => {
                write!(f, "sparse alternate data stream {} dropped", name)
            }
            StreamLoss::SymlinkData { size } => {
                write!(f, "{} bytes of data on a symlink dropped", size)
            }
            StreamLoss::NoExtensionRecords { what } => {
                write!(f, "{} dropped (format has no extension records)", what)
            }
        }
    }
}

/// A metadata loss tied to the archive entry it happened on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveWarning {
    /// Archive-relative path of the entry
    pub path: String,

    pub loss: StreamLoss,
}

impl ArchiveWarning {
    pub fn new(path: impl Into<String>, loss: StreamLoss) -> Self {
        ArchiveWarning {
            path: path.into(),
            loss,
        }
    }
}

impl fmt::Display for ArchiveWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path, self.loss)
    }
}
