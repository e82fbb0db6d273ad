//! `[log]` section: level, format and destination of sluice's own logs
//!
//! ```toml
//! [log]
//! level = "info"
//! format = "json"
//! output = "stderr"
//!
//! # per-crate overrides, appended to the filter
//! [log.targets]
//! sluice_peer = "debug"
//! ```

use std::collections::BTreeMap;

use serde::Deserialize;

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Directive understood by `tracing_subscriber::EnvFilter`
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable lines
    #[default]
    Console,
    /// One JSON object per line, fields flattened from the span context
    Json,
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogOutput {
    #[default]
    Stdout,
    /// Keeps stdout free for the `stdout` sink
    Stderr,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub level: LogLevel,
    pub format: LogFormat,
    pub output: LogOutput,
    /// Level overrides by tracing target, e.g. `sluice_peer = "debug"`
    pub targets: BTreeMap<String, LogLevel>,
}

impl LogConfig {
    /// Full filter string: the base level followed by the per-target overrides
    ///
    /// `base` replaces the configured level when given (a command-line flag).
    pub fn filter_directives(&self, base: Option<&str>) -> String {
        let mut directives = base.unwrap_or(self.level.as_str()).to_string();
        for (target, level) in &self.targets {
            directives.push(',');
            directives.push_str(target);
            directives.push('=');
            directives.push_str(level.as_str());
        }
        directives
    }
}
