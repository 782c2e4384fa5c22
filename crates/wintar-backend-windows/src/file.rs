//! Backup-mode file access.
//!
//! Files are opened with `FILE_FLAG_BACKUP_SEMANTICS` (directories open too,
//! and with `SeBackupPrivilege` enabled access checks are bypassed) and
//! `FILE_FLAG_OPEN_REPARSE_POINT` (links are captured, never followed). The
//! share mode admits files other processes hold open for writing or
//! deletion.

use crate::error::WinError;
use crate::winapi_utils::{path_to_wide, SafeHandle};
use std::ffi::c_void;
use std::io::{self, Read};
use std::mem;
use std::path::{Path, PathBuf};
use std::ptr;
use tracing::trace;
use windows::core::PCWSTR;
use windows::Win32::Foundation::BOOL;
use windows::Win32::Storage::FileSystem::{
    BackupRead, CreateFileW, FileBasicInfo, FileStandardInfo, GetFileInformationByHandle,
    GetFileInformationByHandleEx, BY_HANDLE_FILE_INFORMATION, FILE_BASIC_INFO,
    FILE_FLAG_BACKUP_SEMANTICS, FILE_FLAG_OPEN_REPARSE_POINT, FILE_GENERIC_READ,
    FILE_INFO_BY_HANDLE_CLASS, FILE_SHARE_DELETE, FILE_SHARE_READ, FILE_SHARE_WRITE,
    FILE_STANDARD_INFO, OPEN_EXISTING,
};
use wintar_core::{BackupFile, BackupSource, BasicFileInfo, FileIdentity, FileTime, Result};

/// Opens files through the Win32 backup interfaces.
#[derive(Debug, Default)]
pub struct WindowsBackupSource;

impl WindowsBackupSource {
    pub fn new() -> Self {
        WindowsBackupSource
    }
}

impl BackupSource for WindowsBackupSource {
    type File = WindowsBackupFile;

    fn open_for_backup(&self, path: &Path) -> Result<WindowsBackupFile> {
        let wide_path = path_to_wide(path);

        // SAFETY: `wide_path` is NUL-terminated and outlives the call. The
        // returned handle is owned by SafeHandle.
        let handle = unsafe {
            CreateFileW(
                PCWSTR(wide_path.as_ptr()),
                FILE_GENERIC_READ.0,
                FILE_SHARE_READ | FILE_SHARE_WRITE | FILE_SHARE_DELETE,
                None,
                OPEN_EXISTING,
                FILE_FLAG_BACKUP_SEMANTICS | FILE_FLAG_OPEN_REPARSE_POINT,
                None,
            )
        };

        let handle = match handle {
            Ok(h) => SafeHandle::new(h, "CreateFileW"),
            Err(err) => Err(WinError::from_error("CreateFileW", &err)),
        }
        .map_err(|err| err.at(path))?;

        trace!(path = %path.display(), "Opened for backup");
        Ok(WindowsBackupFile {
            handle,
            path: path.to_path_buf(),
        })
    }

    fn name(&self) -> &'static str {
        "windows-backup"
    }
}

/// A file or directory open for backup reading.
pub struct WindowsBackupFile {
    handle: SafeHandle,
    path: PathBuf,
}

impl WindowsBackupFile {
    fn query<T: Default>(&self, class_name: &str, class: FILE_INFO_BY_HANDLE_CLASS) -> Result<T> {
        let mut info = T::default();

        // SAFETY: `info` is a properly sized, writable FILE_*_INFO struct
        // matching `class`.
        unsafe {
            GetFileInformationByHandleEx(
                self.handle.as_raw(),
                class,
                &mut info as *mut T as *mut c_void,
                mem::size_of::<T>() as u32,
            )
        }
        .map_err(|err| {
            WinError::from_error(
                &format!("GetFileInformationByHandleEx({})", class_name),
                &err,
            )
            .at(&self.path)
        })?;

        Ok(info)
    }
}

impl BackupFile for WindowsBackupFile {
    fn basic_info(&self) -> Result<BasicFileInfo> {
        let info: FILE_BASIC_INFO = self.query("FileBasicInfo", FileBasicInfo)?;
        Ok(BasicFileInfo {
            creation_time: FileTime(info.CreationTime),
            last_access_time: FileTime(info.LastAccessTime),
            last_write_time: FileTime(info.LastWriteTime),
            change_time: FileTime(info.ChangeTime),
            file_attributes: info.FileAttributes,
        })
    }

    fn identity(&self) -> Result<FileIdentity> {
        let mut info = BY_HANDLE_FILE_INFORMATION::default();

        // SAFETY: `info` is a writable BY_HANDLE_FILE_INFORMATION.
        unsafe { GetFileInformationByHandle(self.handle.as_raw(), &mut info) }.map_err(|err| {
            WinError::from_error("GetFileInformationByHandle", &err).at(&self.path)
        })?;

        let file_index = (u64::from(info.nFileIndexHigh) << 32) | u64::from(info.nFileIndexLow);
        Ok(FileIdentity::new(
            u64::from(info.dwVolumeSerialNumber),
            file_index,
        ))
    }

    fn size(&self) -> Result<u64> {
        let info: FILE_STANDARD_INFO = self.query("FileStandardInfo", FileStandardInfo)?;
        Ok(info.EndOfFile.max(0) as u64)
    }

    fn backup_stream(&mut self, include_security: bool) -> Result<Box<dyn Read + '_>> {
        Ok(Box::new(BackupFileReader {
            handle: &self.handle,
            path: &self.path,
            include_security,
            context: ptr::null_mut(),
        }))
    }
}

/// `io::Read` over successive `BackupRead` calls on one handle.
///
/// Dropping the reader releases the read context with `bAbort = TRUE`.
pub struct BackupFileReader<'a> {
    handle: &'a SafeHandle,
    path: &'a Path,
    include_security: bool,
    context: *mut c_void,
}

impl Read for BackupFileReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let len = buf.len().min(u32::MAX as usize);
        let mut read = 0u32;

        // SAFETY: the buffer and context pointer are valid for the call; the
        // context is only ever passed back to BackupRead on this handle.
        unsafe {
            BackupRead(
                self.handle.as_raw(),
                &mut buf[..len],
                &mut read,
                BOOL::from(false),
                BOOL::from(self.include_security),
                &mut self.context,
            )
        }
        .map_err(|err| WinError::from_error("BackupRead", &err).at(self.path).into_io())?;

        Ok(read as usize)
    }
}

impl Drop for BackupFileReader<'_> {
    fn drop(&mut self) {
        if self.context.is_null() {
            return;
        }
        let mut read = 0u32;
        unsafe {
            let _ = BackupRead(
                self.handle.as_raw(),
                &mut [],
                &mut read,
                BOOL::from(true),
                BOOL::from(false),
                &mut self.context,
            );
        }
    }
}
