//! Create command - archive a directory tree.

use crate::output::OutputSink;
use anyhow::{bail, Context};
use clap::Args;
use std::path::PathBuf;
use std::time::Instant;
use tracing::info;
use wintar_backend_windows::{with_privilege, WindowsBackupSource, SE_BACKUP_NAME};
use wintar_core::{build_archive_with_progress, ArchiveFormat, Config, LoggingProgress};

#[derive(Args, Debug)]
pub struct CreateArgs {
    /// Directory tree to archive
    #[arg(short, long)]
    root: PathBuf,

    /// Output file, or - for stdout
    #[arg(short, long, default_value = "-")]
    out: String,

    /// Enable SeBackupPrivilege to read files regardless of their ACLs
    #[arg(short, long)]
    backup: bool,

    /// Include security descriptors
    #[arg(short, long)]
    security: bool,

    /// Compress the archive with gzip
    #[arg(short = 'z', long)]
    gzip: bool,

    /// gzip compression level (0-9)
    #[arg(long, value_parser = clap::value_parser!(u32).range(0..=9))]
    level: Option<u32>,

    /// Archive format (pax, ustar)
    #[arg(long)]
    format: Option<ArchiveFormat>,

    /// Skip alternate data streams
    #[arg(long)]
    no_alternate_streams: bool,

    /// Add the root directory itself as ./
    #[arg(long)]
    include_root: bool,
}

impl CreateArgs {
    /// Fold command-line flags over the file configuration.
    fn apply(&self, config: &mut Config) {
        config.archive.backup_privilege |= self.backup;
        config.archive.security |= self.security;
        config.archive.include_root |= self.include_root;
        if self.no_alternate_streams {
            config.archive.alternate_streams = false;
        }
        if let Some(format) = self.format {
            config.archive.format = format;
        }
        config.output.gzip |= self.gzip;
        if let Some(level) = self.level {
            config.output.compression_level = level;
        }
    }
}

/// Run the create command.
pub fn run(mut config: Config, args: CreateArgs, quiet: bool) -> anyhow::Result<()> {
    args.apply(&mut config);
    config.validate()?;

    if !args.root.is_dir() {
        bail!("{} is not a directory", args.root.display());
    }

    let options = config.archive_options();
    let gzip = config.output.gzip.then_some(config.output.compression_level);
    let sink = OutputSink::open(&args.out, gzip)?;
    let output_path = sink.path().map(|p| p.to_path_buf());

    let source = WindowsBackupSource::new();
    let progress = LoggingProgress::new(args.root.display().to_string());
    let start = Instant::now();

    let build = || build_archive_with_progress(&source, &args.root, sink, &options, Some(&progress));
    let result = if config.archive.backup_privilege {
        with_privilege(SE_BACKUP_NAME, build).and_then(|inner| inner)
    } else {
        build()
    };

    let (sink, summary) = match result {
        Ok(done) => done,
        Err(err) => {
            if let Some(path) = &output_path {
                eprintln!(
                    "note: {} is incomplete and is not a valid archive",
                    path.display()
                );
            }
            return Err(err).with_context(|| format!("Failed to archive {}", args.root.display()));
        }
    };
    sink.finish().context("Failed to flush archive output")?;

    let elapsed = start.elapsed();
    info!(elapsed_ms = elapsed.as_millis() as u64, "Done");

    if !quiet {
        eprintln!();
        eprintln!("Archive complete!");
        eprintln!("  Files:             {}", summary.files);
        eprintln!("  Directories:       {}", summary.directories);
        eprintln!("  Symlinks:          {}", summary.symlinks);
        eprintln!("  Hardlinks:         {}", summary.hardlinks);
        eprintln!("  Alternate streams: {}", summary.alternate_streams);
        eprintln!("  Content bytes:     {}", summary.bytes);
        eprintln!("  Warnings:          {}", summary.warnings.len());
        eprintln!("  Time:              {:.2}s", elapsed.as_secs_f64());
    }

    Ok(())
}
