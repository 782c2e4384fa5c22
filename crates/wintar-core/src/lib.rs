//! # wintar Core Library
//!
//! This crate turns Windows backup streams into tar archives. It is
//! platform-agnostic: every filesystem access goes through the
//! `BackupSource` trait, which the Windows backend implements on top of
//! `CreateFileW` and `BackupRead`.
//!
//! ## Architecture
//!
//! - **Source** (`source`): Traits for opening files in backup mode
//! - **Stream** (`stream`): Decoder for the `BackupRead` record stream
//! - **Capture** (`capture`): Collects one file's streams before encoding
//! - **Reparse / EA** (`reparse`, `ea`): Decoders for metadata payloads
//! - **Identity** (`identity`): Hardlink detection by file identity
//! - **Encoder** (`encoder`): Tar entries with PAX extension records
//! - **Archive** (`archive`): Tree walk and run orchestration
//! - **Config** (`config`): Configuration management
//!
//! ## Example
//!
//! ```rust,ignore
//! use wintar_core::{build_archive, ArchiveOptions};
//!
//! let source = wintar_backend_windows::WindowsBackupSource::new();
//! let out = std::fs::File::create("backup.tar")?;
//! let (_, summary) = build_archive(&source, "C:\\data".as_ref(), out, &ArchiveOptions::default())?;
//! println!("{} files", summary.files);
//! ```

pub mod archive;
pub mod capture;
pub mod config;
pub mod ea;
pub mod encoder;
pub mod error;
pub mod identity;
pub mod reparse;
pub mod source;
pub mod stream;
pub mod types;

#[cfg(test)]
mod testing;

// Re-export commonly used types
pub use archive::{
    build_archive, build_archive_with_progress, ArchiveOptions, ArchiveProgress, ArchiveSummary,
    LoggingProgress,
};
pub use config::Config;
pub use encoder::{ArchiveFormat, TarEntryEncoder};
pub use error::{Result, WintarError};
pub use source::{BackupFile, BackupSource};
pub use stream::{BackupStreamReader, BackupStreamRecord, StreamType};
pub use types::{ArchiveWarning, BasicFileInfo, FileIdentity, FileTime, StreamLoss};
