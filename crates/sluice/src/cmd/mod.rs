//! Command implementations for the Sluice CLI

pub mod serve;
pub mod validate;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use sluice_config::Config;

/// Paths tried, in order, when no `--config` is given
const DEFAULT_CONFIG_PATHS: [&str; 2] = ["configs/sluice.toml", "sluice.toml"];

/// Configuration together with where it came from
#[derive(Debug)]
pub struct LoadedConfig {
    pub config: Config,
    /// File path, or `(default)` when built-in defaults are used
    pub origin: String,
}

/// Load the configuration named on the command line, or the first default
/// path that exists, or the built-in defaults
pub fn load_config(explicit: Option<&Path>) -> Result<LoadedConfig> {
    if let Some(path) = explicit {
        if !path.exists() {
            bail!("config file not found: {}", path.display());
        }
        return read(path);
    }

    for candidate in DEFAULT_CONFIG_PATHS.iter().map(PathBuf::from) {
        if candidate.exists() {
            return read(&candidate);
        }
    }

    Ok(LoadedConfig {
        config: Config::default(),
        origin: "(default)".to_string(),
    })
}

fn read(path: &Path) -> Result<LoadedConfig> {
    let config = Config::from_file(path)
        .with_context(|| format!("failed to load configuration from {}", path.display()))?;
    Ok(LoadedConfig {
        config,
        origin: path.display().to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explicit_path_must_exist() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_config(Some(&dir.path().join("missing.toml"))).unwrap_err();
        assert!(err.to_string().contains("config file not found"));
    }

    #[test]
    fn test_explicit_path_loaded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sluice.toml");
        std::fs::write(&path, "[pipeline]\nname = \"logs\"\n\n[[sinks]]\ntype = \"null\"\n").unwrap();

        let loaded = load_config(Some(&path)).unwrap();
        assert_eq!(loaded.config.pipeline.name, "logs");
        assert_eq!(loaded.origin, path.display().to_string());
    }

    #[test]
    fn test_invalid_file_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.toml");
        std::fs::write(&path, "[pipeline\n").unwrap();

        let err = load_config(Some(&path)).unwrap_err();
        assert!(format!("{err:#}").contains("broken.toml"));
    }
}
