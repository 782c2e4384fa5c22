//! # wintar CLI
//!
//! Command-line interface for the wintar backup archiver.
//!
//! ## Commands
//!
//! - `wintar create --root <DIR>` - Archive a directory tree through BackupRead
//! - `wintar config` - Show the effective configuration
//!
//! ## Example Usage
//!
//! ```bash
//! # Archive a tree with ACLs, bypassing file permissions (run as admin)
//! wintar create --root C:\data --out data.tar --backup --security
//!
//! # Compressed archive on stdout
//! wintar create --root C:\data --gzip > data.tar.gz
//! ```

mod commands;
mod output;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::debug;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// wintar - Windows backup-aware tar archiver
#[derive(Parser)]
#[command(name = "wintar")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Verbosity level (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Archive a directory tree
    Create(commands::create::CreateArgs),

    /// Show the effective configuration
    Config {
        /// Write the default configuration file if none exists
        #[arg(long)]
        init: bool,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration first so its log level can apply.
    let config_path = match &cli.config {
        Some(path) => path.clone(),
        None => wintar_core::Config::default_config_path()?,
    };
    let config = wintar_core::Config::load_from(&config_path)?;

    // Setup logging. stdout may carry the archive, so logs go to stderr.
    let log_level = if cli.quiet {
        "error".to_string()
    } else {
        match cli.verbose {
            0 => config.general.log_level.clone(),
            1 => "debug".to_string(),
            _ => "trace".to_string(),
        }
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log_level)))
        .init();

    debug!(path = %config_path.display(), "Configuration loaded");

    // Execute command
    match cli.command {
        Commands::Create(args) => commands::create::run(config, args, cli.quiet),
        Commands::Config { init } => commands::config::run(&config, &config_path, init),
    }
}
