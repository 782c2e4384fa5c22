//! Config command - show the effective configuration.

use std::path::Path;
use wintar_core::Config;

/// Run the config command.
pub fn run(config: &Config, path: &Path, init: bool) -> anyhow::Result<()> {
    if init {
        if path.exists() {
            println!("Configuration already exists at {}", path.display());
        } else {
            Config::default().save_to(path)?;
            println!("Wrote default configuration to {}", path.display());
        }
        return Ok(());
    }

    let state = if path.exists() { "" } else { " (not found, using defaults)" };
    println!("# {}{}", path.display(), state);
    print!("{}", config.to_toml()?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_init_writes_defaults_once() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("wintar.toml");

        run(&Config::default(), &path, true).unwrap();
        assert!(path.exists());

        let mut custom = Config::load_from(&path).unwrap();
        custom.archive.security = true;
        custom.save_to(&path).unwrap();

        run(&Config::default(), &path, true).unwrap();
        assert!(Config::load_from(&path).unwrap().archive.security);
    }

    #[test]
    fn test_show_without_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("wintar.toml");
        run(&Config::default(), &path, false).unwrap();
        assert!(!path.exists());
    }
}
