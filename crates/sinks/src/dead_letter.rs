//! Dead-letter queue
//!
//! Records tagged as failed by a processor, and forwarding batches that ran
//! out of retries, are written here instead of being dropped. Each entry is
//! one JSON line:
//!
//! ```json
//! {"pipeline":"default","stage":"filter","reason":"field 'n' is not numeric","event":{...}}
//! ```

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sluice_protocol::{Event, WireEvent};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::{SinkError, SinkResult};

/// One dead-lettered record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetterEntry {
    /// Pipeline the record belonged to
    pub pipeline: String,
    /// Stage that gave up on the record
    pub stage: String,
    /// Why the record was dead-lettered
    pub reason: String,
    pub event: WireEvent,
}

impl DeadLetterEntry {
    /// Build an entry for an event, taking the reason from its failure tag
    pub fn new(pipeline: impl Into<String>, stage: impl Into<String>, event: &Event) -> Self {
        let reason = event.failure_reason().unwrap_or("unknown").to_string();
        Self::with_reason(pipeline, stage, reason, event)
    }

    /// Build an entry with an explicit reason
    pub fn with_reason(
        pipeline: impl Into<String>,
        stage: impl Into<String>,
        reason: impl Into<String>,
        event: &Event,
    ) -> Self {
        Self {
            pipeline: pipeline.into(),
            stage: stage.into(),
            reason: reason.into(),
            event: WireEvent::from(event),
        }
    }
}

/// Destination for records that cannot be processed or forwarded
#[async_trait]
pub trait DeadLetterQueue: Send + Sync {
    /// Name for logging
    fn name(&self) -> &str;

    /// Persist entries; an error leaves the caller responsible for them
    async fn write(&self, entries: &[DeadLetterEntry]) -> SinkResult<()>;

    /// Total entries written
    fn written(&self) -> u64;
}

/// Dead-letter queue appending JSON lines to a file
///
/// The file and its parent directories are created on first write.
pub struct FileDeadLetterQueue {
    path: PathBuf,
    file: Mutex<Option<File>>,
    written: AtomicU64,
}

impl FileDeadLetterQueue {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            file: Mutex::new(None),
            written: AtomicU64::new(0),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn open(&self) -> SinkResult<File> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        Ok(file)
    }
}

#[async_trait]
impl DeadLetterQueue for FileDeadLetterQueue {
    fn name(&self) -> &str {
        "file"
    }

    async fn write(&self, entries: &[DeadLetterEntry]) -> SinkResult<()> {
        if entries.is_empty() {
            return Ok(());
        }

        let mut out = Vec::new();
        for entry in entries {
            serde_json::to_writer(&mut out, entry)?;
            out.push(b'\n');
        }

        let mut guard = self.file.lock().await;
        if guard.is_none() {
            *guard = Some(self.open().await?);
        }
        let Some(file) = guard.as_mut() else {
            return Err(SinkError::not_ready("dead_letter"));
        };

        if let Err(e) = async {
            file.write_all(&out).await?;
            file.flush().await
        }
        .await
        {
            // reopen on the next write
            *guard = None;
            return Err(SinkError::Io(e));
        }

        self.written
            .fetch_add(entries.len() as u64, Ordering::Relaxed);
        tracing::debug!(
            path = %self.path.display(),
            records = entries.len(),
            "records dead-lettered"
        );
        Ok(())
    }

    fn written(&self) -> u64 {
        self.written.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for FileDeadLetterQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileDeadLetterQueue")
            .field("path", &self.path)
            .field("written", &self.written())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tempfile::TempDir;

    use super::*;

    fn failed_event() -> Event {
        let mut event = Event::from_value("log", json!({"n": "abc"})).unwrap();
        event.tag_failure("field 'n' is not numeric");
        event
    }

    #[test]
    fn test_entry_reason_from_failure_tag() {
        let entry = DeadLetterEntry::new("default", "filter", &failed_event());
        assert_eq!(entry.reason, "field 'n' is not numeric");
        assert_eq!(entry.event.data["n"], "abc");

        let plain = Event::new("log");
        assert_eq!(DeadLetterEntry::new("p", "s", &plain).reason, "unknown");
    }

    #[tokio::test]
    async fn test_file_queue_writes_json_lines() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("dlq/failed.jsonl");
        let dlq = FileDeadLetterQueue::new(&path);

        let entries = vec![
            DeadLetterEntry::new("default", "filter", &failed_event()),
            DeadLetterEntry::with_reason(
                "default",
                "peer_forwarder",
                "retries exhausted",
                &Event::new("span"),
            ),
        ];
        dlq.write(&entries).await.unwrap();
        dlq.write(&[]).await.unwrap();

        assert_eq!(dlq.written(), 2);

        let content = std::fs::read_to_string(&path).unwrap();
        let parsed: Vec<DeadLetterEntry> = content
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(parsed, entries);
        assert_eq!(parsed[1].stage, "peer_forwarder");
    }

    #[tokio::test]
    async fn test_file_queue_unwritable_path() {
        let dir = TempDir::new().unwrap();
        // a regular file where a directory is expected
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, b"x").unwrap();

        let dlq = FileDeadLetterQueue::new(blocker.join("failed.jsonl"));
        let err = dlq
            .write(&[DeadLetterEntry::new("p", "s", &failed_event())])
            .await
            .unwrap_err();
        assert!(matches!(err, SinkError::Io(_)));
        assert_eq!(dlq.written(), 0);
    }
}
