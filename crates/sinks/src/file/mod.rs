//! File sink - JSON lines appended to a file
//!
//! The file (and its parent directories) are created on `initialize`. Every
//! batch is written with a single `write_all` followed by a flush, so a
//! batch that returns `Ok` is in the OS page cache.
//!
//! # Example
//!
//! ```toml
//! [[sinks]]
//! type = "file"
//! path = "out/events.jsonl"
//! ```

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use sluice_config::PluginConfig;
use sluice_protocol::{Event, Record};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::registry::SinkFactory;
use crate::{MetricsSnapshot, Sink, SinkError, SinkMetrics, SinkResult};

#[cfg(test)]
#[path = "file_test.rs"]
mod file_test;

/// Configuration for the file sink
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileSinkConfig {
    /// Output file path
    pub path: PathBuf,

    /// Create missing parent directories on initialize
    pub create_dirs: bool,
}

impl FileSinkConfig {
    /// Create a config for the given path
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            create_dirs: true,
        }
    }

    /// Set whether parent directories are created
    #[must_use]
    pub fn with_create_dirs(mut self, create_dirs: bool) -> Self {
        self.create_dirs = create_dirs;
        self
    }
}

impl TryFrom<&PluginConfig> for FileSinkConfig {
    type Error = String;

    fn try_from(config: &PluginConfig) -> Result<Self, Self::Error> {
        let path = config
            .get_path("path")
            .ok_or("file sink requires 'path'")?;

        Ok(Self::new(path).with_create_dirs(config.get_bool("create_dirs").unwrap_or(true)))
    }
}

/// Sink appending JSON lines to a file
pub struct FileSink {
    config: FileSinkConfig,
    file: Mutex<Option<File>>,
    ready: AtomicBool,
    metrics: SinkMetrics,
}

impl FileSink {
    /// Create a new file sink; nothing is opened until `initialize`
    pub fn new(config: FileSinkConfig) -> Self {
        Self {
            config,
            file: Mutex::new(None),
            ready: AtomicBool::new(false),
            metrics: SinkMetrics::new(),
        }
    }

    /// Output file path
    pub fn path(&self) -> &Path {
        &self.config.path
    }
}

#[async_trait]
impl Sink for FileSink {
    fn name(&self) -> &str {
        "file"
    }

    async fn initialize(&self) -> SinkResult<()> {
        let mut file = self.file.lock().await;
        if file.is_some() {
            return Ok(());
        }

        if self.config.create_dirs
            && let Some(parent) = self.config.path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                SinkError::init(format!("cannot create {}: {}", parent.display(), e))
            })?;
        }

        let opened = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.config.path)
            .await
            .map_err(|e| {
                SinkError::init(format!("cannot open {}: {}", self.config.path.display(), e))
            })?;

        *file = Some(opened);
        self.ready.store(true, Ordering::Release);
        tracing::info!(path = %self.config.path.display(), "file sink ready");
        Ok(())
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    async fn output(&self, records: &[Record<Event>]) -> SinkResult<()> {
        self.metrics.batch_received();

        let mut out = Vec::new();
        for record in records {
            out.extend_from_slice(&crate::json_line(record.data()));
        }

        let mut guard = self.file.lock().await;
        let file = guard.as_mut().ok_or_else(|| SinkError::not_ready("file"))?;

        let written = async {
            file.write_all(&out).await?;
            file.flush().await
        }
        .await;

        if let Err(e) = written {
            self.metrics.write_error();
            return Err(SinkError::Io(e));
        }

        self.metrics.flushed();
        self.metrics
            .batch_written(records.len() as u64, out.len() as u64);
        Ok(())
    }

    async fn shutdown(&self) -> SinkResult<()> {
        self.ready.store(false, Ordering::Release);
        if let Some(file) = self.file.lock().await.take() {
            file.sync_all().await?;
        }
        Ok(())
    }

    fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }
}

impl std::fmt::Debug for FileSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileSink")
            .field("config", &self.config)
            .field("ready", &self.is_ready())
            .finish()
    }
}

/// Factory for creating file sinks
#[derive(Debug, Clone, Copy)]
pub struct FileSinkFactory;

impl SinkFactory for FileSinkFactory {
    fn create(&self, config: &PluginConfig) -> SinkResult<Box<dyn Sink>> {
        let file_config = FileSinkConfig::try_from(config).map_err(SinkError::config)?;
        Ok(Box::new(FileSink::new(file_config)))
    }

    fn name(&self) -> &'static str {
        "file"
    }
}
