//! Configuration management for wintar.
//!
//! Configuration is stored in TOML format in a platform-appropriate location.
//! Command-line flags override whatever the file sets.

use crate::archive::ArchiveOptions;
use crate::capture::DEFAULT_SPOOL_THRESHOLD;
use crate::encoder::ArchiveFormat;
use crate::error::{Result, WintarError};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Main configuration structure for wintar.
///
/// ## Example Configuration File (wintar.toml)
///
/// ```toml
/// [general]
/// log_level = "info"
///
/// [archive]
/// security = true
/// backup_privilege = true
/// alternate_streams = true
/// include_root = false
/// format = "pax"
/// spool_threshold = 8388608
///
/// [output]
/// gzip = true
/// compression_level = 6
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General settings
    pub general: GeneralConfig,

    /// What gets captured and how entries are written
    pub archive: ArchiveConfig,

    /// Output sink settings
    pub output: OutputConfig,
}

/// General configuration options
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        GeneralConfig {
            log_level: "info".to_string(),
        }
    }
}

/// Archive configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchiveConfig {
    /// Capture security descriptors
    pub security: bool,

    /// Enable SeBackupPrivilege for the run
    pub backup_privilege: bool,

    /// Archive alternate data streams
    pub alternate_streams: bool,

    /// Emit the root directory as `./`
    pub include_root: bool,

    /// Archive format (pax or ustar)
    pub format: ArchiveFormat,

    /// Bytes per stream held in memory before spilling to a temp file
    pub spool_threshold: usize,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        ArchiveConfig {
            security: false,
            backup_privilege: false,
            alternate_streams: true,
            include_root: false,
            format: ArchiveFormat::Pax,
            spool_threshold: DEFAULT_SPOOL_THRESHOLD,
        }
    }
}

/// Output configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Compress the archive with gzip
    pub gzip: bool,

    /// gzip level, 0-9
    pub compression_level: u32,
}

impl Default for OutputConfig {
    fn default() -> Self {
        OutputConfig {
            gzip: false,
            compression_level: 6,
        }
    }
}

impl Config {
    /// Load configuration from the default location.
    ///
    /// Returns default config if no config file exists.
    pub fn load() -> Result<Self> {
        let config_path = Self::default_config_path()?;
        Self::load_from(&config_path)
    }

    /// Load configuration from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!(path = %path.display(), "Config file not found, using defaults");
            return Ok(Config::default());
        }

        info!(path = %path.display(), "Loading configuration");
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;

        Ok(config)
    }

    /// Save configuration to a specific path.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        info!(path = %path.display(), "Saving configuration");
        fs::write(path, self.to_toml()?)?;
        Ok(())
    }

    /// Render as pretty TOML.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| WintarError::Config {
            reason: format!("Failed to serialize config: {}", e),
        })
    }

    /// Get the default configuration file path.
    pub fn default_config_path() -> Result<PathBuf> {
        let dirs = ProjectDirs::from("", "", "wintar").ok_or_else(|| WintarError::Config {
            reason: "Could not determine config directory".to_string(),
        })?;

        Ok(dirs.config_dir().join("wintar.toml"))
    }

    /// Reject values that parse but make no sense.
    pub fn validate(&self) -> Result<()> {
        if self.output.compression_level > 9 {
            return Err(WintarError::Config {
                reason: format!(
                    "compression_level must be 0-9, got {}",
                    self.output.compression_level
                ),
            });
        }
        Ok(())
    }

    /// Archive options described by this configuration.
    pub fn archive_options(&self) -> ArchiveOptions {
        ArchiveOptions {
            include_security: self.archive.security,
            include_alternate_streams: self.archive.alternate_streams,
            include_root: self.archive.include_root,
            format: self.archive.format,
            spool_threshold: self.archive.spool_threshold,
        }
    }
}
