//! Backup source traits.
//!
//! The orchestrator reaches the filesystem only through these traits. The
//! Windows backend implements them with `CreateFileW` and `BackupRead`;
//! tests implement them with synthesized backup streams.
//!
//! ## Handle discipline
//!
//! A `BackupFile` owns an open OS handle. It is released when the value is
//! dropped, which the orchestrator does before moving to the next entry on
//! every path, successful or not.

use crate::error::Result;
use crate::types::{BasicFileInfo, FileIdentity};
use std::io::Read;
use std::path::Path;

/// Something that can open files in backup mode.
pub trait BackupSource {
    type File: BackupFile;

    /// Open an existing file or directory for backup reading.
    ///
    /// Fails with `WintarError::Missing` if the path no longer exists and
    /// `WintarError::Access` for any other failure.
    fn open_for_backup(&self, path: &Path) -> Result<Self::File>;

    /// Backend name, for logging
    fn name(&self) -> &'static str;
}

/// A file opened in backup mode.
pub trait BackupFile {
    /// Timestamps and attributes of the open file.
    fn basic_info(&self) -> Result<BasicFileInfo>;

    /// Volume serial and file reference number of the open file.
    fn identity(&self) -> Result<FileIdentity>;

    /// Logical size of the primary data stream.
    fn size(&self) -> Result<u64>;

    /// The raw backup stream of the file.
    ///
    /// Security descriptors are part of the stream only when
    /// `include_security` is set.
    fn backup_stream(&mut self, include_security: bool) -> Result<Box<dyn Read + '_>>;
}
