//! # wintar Windows Backend
//!
//! This crate provides the Windows implementation of the `BackupSource`
//! trait. It uses:
//!
//! - **CreateFileW** with backup semantics to open files and directories
//!   without following reparse points
//! - **BackupRead** to read every stream of a file in one pass
//! - **Thread impersonation** to enable `SeBackupPrivilege` for a scope
//!
//! ## Architecture
//!
//! The backend is structured to isolate all Windows API calls and unsafe code:
//!
//! - `file.rs`: Backup-mode open, metadata queries and the `BackupRead` reader
//! - `privilege.rs`: Privilege scope guard
//! - `winapi_utils.rs`: Handle ownership and string conversion
//!
//! ## Permissions
//!
//! Without `SeBackupPrivilege` files are only readable where the ACLs allow
//! it. The privilege is held by the Administrators and Backup Operators
//! groups; the CLI enables it with `--backup`.

#[cfg(windows)]
mod file;
#[cfg(windows)]
mod privilege;
#[cfg(windows)]
mod winapi_utils;

#[cfg(windows)]
pub use file::{BackupFileReader, WindowsBackupFile, WindowsBackupSource};
#[cfg(windows)]
pub use privilege::{with_privilege, PrivilegeGuard};

#[cfg(not(windows))]
mod stub;

#[cfg(not(windows))]
pub use stub::{with_privilege, PrivilegeGuard, UnsupportedFile, WindowsBackupSource};

/// Error types specific to the Windows backend
pub mod error;
pub use error::WinError;

/// Name of the privilege that bypasses file ACLs for reading
pub const SE_BACKUP_NAME: &str = "SeBackupPrivilege";
