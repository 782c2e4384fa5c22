//! Tree walk and archive orchestration.
//!
//! `build_archive` visits the tree under a root in lexical pre-order and
//! runs every entry through open, identity lookup, capture and encode. The
//! run is all-or-nothing: the first error aborts it, the encoder is told to
//! stop without an end-of-archive marker, and the error is returned with
//! the path it happened on. Whatever already reached the sink is not a
//! valid archive.

use crate::capture::{capture_streams, CaptureOptions, DEFAULT_SPOOL_THRESHOLD};
use crate::encoder::{ArchiveFormat, EntryKind, TarEntryEncoder};
use crate::error::{Result, WintarError};
use crate::identity::{IdentityTracker, Recorded};
use crate::source::{BackupFile, BackupSource};
use crate::stream::BackupStreamReader;
use crate::types::ArchiveWarning;
use std::io::Write;
use std::path::{Component, Path};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Options for one archive run.
#[derive(Debug, Clone)]
pub struct ArchiveOptions {
    /// Capture security descriptors
    pub include_security: bool,

    /// Archive alternate data streams
    pub include_alternate_streams: bool,

    /// Emit the root directory itself as `./`
    pub include_root: bool,

    pub format: ArchiveFormat,

    /// In-memory bytes per spooled stream
    pub spool_threshold: usize,
}

impl Default for ArchiveOptions {
    fn default() -> Self {
        ArchiveOptions {
            include_security: false,
            include_alternate_streams: true,
            include_root: false,
            format: ArchiveFormat::Pax,
            spool_threshold: DEFAULT_SPOOL_THRESHOLD,
        }
    }
}

impl ArchiveOptions {
    fn capture_options(&self) -> CaptureOptions {
        CaptureOptions {
            include_security: self.include_security,
            include_alternate_streams: self.include_alternate_streams,
            spool_threshold: self.spool_threshold,
        }
    }
}

/// Counts and warnings from a completed run.
#[derive(Debug, Clone, Default)]
pub struct ArchiveSummary {
    pub files: u64,
    pub directories: u64,
    pub symlinks: u64,
    pub hardlinks: u64,
    pub alternate_streams: u64,

    /// Content bytes written (primary data plus alternate streams)
    pub bytes: u64,

    pub warnings: Vec<ArchiveWarning>,
}

impl ArchiveSummary {
    pub fn entries(&self) -> u64 {
        self.files + self.directories + self.symlinks + self.hardlinks
    }
}

/// Progress reporting for archive runs
pub trait ArchiveProgress {
    /// Called after each entry is written
    fn on_entry(&self, name: &str, summary: &ArchiveSummary);

    /// Called once the end-of-archive marker is written
    fn on_complete(&self, summary: &ArchiveSummary);
}

/// A simple progress reporter that logs to tracing
pub struct LoggingProgress {
    root: String,
}

impl LoggingProgress {
    pub fn new(root: impl Into<String>) -> Self {
        LoggingProgress { root: root.into() }
    }
}

impl ArchiveProgress for LoggingProgress {
    fn on_entry(&self, name: &str, summary: &ArchiveSummary) {
        let entries = summary.entries();
        if entries % 1000 == 0 {
            debug!(
                root = %self.root,
                entries,
                bytes = summary.bytes,
                last = name,
                "Archiving progress"
            );
        }
    }

    fn on_complete(&self, summary: &ArchiveSummary) {
        info!(
            root = %self.root,
            files = summary.files,
            directories = summary.directories,
            symlinks = summary.symlinks,
            hardlinks = summary.hardlinks,
            alternate_streams = summary.alternate_streams,
            bytes = summary.bytes,
            warnings = summary.warnings.len(),
            "Archive complete"
        );
    }
}

/// Archive the tree under `root` into `writer`.
pub fn build_archive<S, W>(
    source: &S,
    root: &Path,
    writer: W,
    options: &ArchiveOptions,
) -> Result<(W, ArchiveSummary)>
where
    S: BackupSource,
    W: Write,
{
    build_archive_with_progress(source, root, writer, options, None)
}

/// Like `build_archive`, reporting to `progress` as entries are written.
pub fn build_archive_with_progress<S, W>(
    source: &S,
    root: &Path,
    writer: W,
    options: &ArchiveOptions,
    progress: Option<&dyn ArchiveProgress>,
) -> Result<(W, ArchiveSummary)>
where
    S: BackupSource,
    W: Write,
{
    info!(
        root = %root.display(),
        backend = source.name(),
        format = %options.format,
        security = options.include_security,
        "Starting archive"
    );
    if !options.format.has_extension_records() {
        warn!(
            format = %options.format,
            "File attributes and creation/access/change times are not archived in this format"
        );
    }

    let mut encoder = TarEntryEncoder::new(writer, options.format);
    let mut run = ArchiveRun {
        source,
        options,
        capture: options.capture_options(),
        tracker: IdentityTracker::new(),
        summary: ArchiveSummary::default(),
        progress,
    };

    if let Err(err) = run.walk(root, &mut encoder) {
        encoder.abort();
        return Err(err);
    }

    let writer = encoder.finish()?;
    if let Some(progress) = progress {
        progress.on_complete(&run.summary);
    }
    Ok((writer, run.summary))
}

struct ArchiveRun<'a, S> {
    source: &'a S,
    options: &'a ArchiveOptions,
    capture: CaptureOptions,
    tracker: IdentityTracker,
    summary: ArchiveSummary,
    progress: Option<&'a dyn ArchiveProgress>,
}

impl<'a, S: BackupSource> ArchiveRun<'a, S> {
    fn walk<W: Write>(&mut self, root: &Path, encoder: &mut TarEntryEncoder<W>) -> Result<()> {
        let walker = WalkDir::new(root).follow_links(false).sort_by_file_name();

        for entry in walker {
            let entry = entry.map_err(|err| walk_error(root, err))?;
            if entry.depth() == 0 {
                if !entry.file_type().is_dir() {
                    return Err(WintarError::Walk {
                        path: root.to_path_buf(),
                        reason: "archive root is not a directory".to_string(),
                    });
                }
                if !self.options.include_root {
                    continue;
                }
            }
            let name = archive_name(root, entry.path());
            self.archive_entry(entry.path(), &name, encoder)?;
            if let Some(progress) = self.progress {
                progress.on_entry(&name, &self.summary);
            }
        }
        Ok(())
    }

    fn archive_entry<W: Write>(
        &mut self,
        path: &Path,
        name: &str,
        encoder: &mut TarEntryEncoder<W>,
    ) -> Result<()> {
        let mut file = self.source.open_for_backup(path)?;
        let info = file.basic_info()?;

        // Directories cannot be hardlinked.
        if !info.is_directory() || info.is_reparse_point() {
            let identity = file.identity()?;
            if let Recorded::Seen(target) = self.tracker.record_or_lookup(identity, name) {
                drop(file);
                debug!(path = name, target = %target, %identity, "Hardlink");
                encoder.write_link(name, &info, &target)?;
                self.summary.hardlinks += 1;
                return Ok(());
            }
        }

        let size = file.size()?;
        let captured = {
            let stream = file.backup_stream(self.options.include_security)?;
            let mut reader = BackupStreamReader::new(stream);
            capture_streams(&mut reader, size, &self.capture).map_err(|err| {
                if err.is_corrupt_capture() {
                    warn!(path = %path.display(), "Backup stream is incomplete, nothing written for this entry");
                }
                err.in_file(path)
            })?
        };
        drop(file);

        let kind = EntryKind::of(&info, &captured);
        // Without extension records alternate streams are dropped, not written.
        let (alternate_streams, alternate_bytes) = if encoder.format().has_extension_records() {
            (
                captured.alternate_streams.len() as u64,
                captured
                    .alternate_streams
                    .iter()
                    .map(|stream| stream.data.len())
                    .sum::<u64>(),
            )
        } else {
            (0, 0)
        };
        let content_bytes = captured.data_len() + alternate_bytes;
        debug!(
            path = name,
            kind = ?kind,
            size = captured.data_len(),
            modified = %info.last_write_time,
            alternate_streams,
            security = captured.security_descriptor.is_some(),
            "Entry"
        );

        let warnings = encoder.write_entry(name, &info, captured)?;
        for warning in &warnings {
            warn!(path = %warning.path, "{}", warning.loss);
        }

        match kind {
            EntryKind::Directory => self.summary.directories += 1,
            EntryKind::Symlink => self.summary.symlinks += 1,
            EntryKind::Regular => self.summary.files += 1,
        }
        self.summary.alternate_streams += alternate_streams;
        self.summary.bytes += content_bytes;
        self.summary.warnings.extend(warnings);
        Ok(())
    }
}

/// Root-relative archive name with `/` separators; the root itself is `.`.
fn archive_name(root: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    let parts: Vec<_> = relative
        .components()
        .filter_map(|component| match component {
            Component::Normal(part) => Some(part.to_string_lossy()),
            _ => None,
        })
        .collect();

    if parts.is_empty() {
        ".".to_string()
    } else {
        parts.join("/")
    }
}

fn walk_error(root: &Path, err: walkdir::Error) -> WintarError {
    let path = err.path().unwrap_or(root).to_path_buf();
    match err.io_error() {
        Some(io) if io.kind() == std::io::ErrorKind::NotFound => WintarError::Missing { path },
        _ => WintarError::Walk {
            path,
            reason: err.to_string(),
        },
    }
}
