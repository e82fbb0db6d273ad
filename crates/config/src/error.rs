//! Configuration error types
//!
//! Validation errors name the TOML section and key at fault, so a message
//! reads like the line to fix: `[peer_forwarder] local_address is required`.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ConfigError>;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("[{section}] {key} is required")]
    Missing {
        section: &'static str,
        key: &'static str,
    },

    #[error("[{section}] {key}: {reason}")]
    Invalid {
        section: &'static str,
        key: &'static str,
        reason: String,
    },

    /// Every `[[sinks]]` entry is disabled (or none is declared)
    #[error("no sink is enabled, a pipeline needs at least one")]
    NoSinksEnabled,
}

impl ConfigError {
    pub fn missing(section: &'static str, key: &'static str) -> Self {
        Self::Missing { section, key }
    }

    pub fn invalid(section: &'static str, key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            section,
            key,
            reason: reason.into(),
        }
    }

    /// Section and key the error points at, when it points at one
    pub fn location(&self) -> Option<(&'static str, &'static str)> {
        match self {
            Self::Missing { section, key } | Self::Invalid { section, key, .. } => {
                Some((*section, *key))
            }
            _ => None,
        }
    }
}
