//! Stub implementation for non-Windows platforms.
//!
//! This allows the crate to compile on non-Windows platforms,
//! but all operations will fail with an appropriate error.

use crate::error::WinError;
use std::io::Read;
use std::path::Path;
use wintar_core::{BackupFile, BackupSource, BasicFileInfo, FileIdentity, Result, WintarError};

/// Stub backup source for non-Windows platforms.
#[derive(Debug, Default)]
pub struct WindowsBackupSource;

impl WindowsBackupSource {
    /// Create a new stub source.
    pub fn new() -> Self {
        WindowsBackupSource
    }
}

impl BackupSource for WindowsBackupSource {
    type File = UnsupportedFile;

    fn open_for_backup(&self, path: &Path) -> Result<UnsupportedFile> {
        Err(WintarError::access(
            path,
            "open",
            WinError::Unsupported.to_string(),
        ))
    }

    fn name(&self) -> &'static str {
        "windows-stub"
    }
}

/// Never constructed; the stub source cannot open files.
pub enum UnsupportedFile {}

impl BackupFile for UnsupportedFile {
    fn basic_info(&self) -> Result<BasicFileInfo> {
        match *self {}
    }

    fn identity(&self) -> Result<FileIdentity> {
        match *self {}
    }

    fn size(&self) -> Result<u64> {
        match *self {}
    }

    fn backup_stream(&mut self, _include_security: bool) -> Result<Box<dyn Read + '_>> {
        match *self {}
    }
}

/// Stub privilege guard; acquiring always fails.
pub struct PrivilegeGuard {
    _private: (),
}

impl PrivilegeGuard {
    pub fn acquire(names: &[&str]) -> Result<Self> {
        Err(WinError::Unsupported.for_privilege(&names.join(", ")))
    }

    pub fn names(&self) -> &[String] {
        &[]
    }
}

/// Always fails with `WintarError::Privilege` off Windows.
pub fn with_privilege<T, F>(name: &str, f: F) -> Result<T>
where
    F: FnOnce() -> T,
{
    let _guard = PrivilegeGuard::acquire(&[name])?;
    Ok(f())
}
