//! Structured event logging.
//!
//! Every entry is emitted immediately as a `tracing` event and, when a sink
//! is attached, buffered for batch delivery. The buffer is flushed once it
//! reaches the configured threshold and at the end of each loop request.
//! Flush failures are logged and dropped: logging never changes control flow.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};

/// Severity of a log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// One structured log record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub component: String,
    pub level: LogLevel,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cost: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

impl LogEntry {
    pub fn new(level: LogLevel, component: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            session_id: None,
            component: component.into(),
            level,
            message: message.into(),
            data: None,
            cost: None,
            duration_ms: None,
        }
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn with_cost(mut self, cost: f64) -> Self {
        self.cost = Some(cost);
        self
    }

    pub fn with_duration_ms(mut self, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }

    /// Emit this entry as a `tracing` event.
    pub fn emit(&self) {
        let session = self.session_id.as_deref().unwrap_or("-");
        let component = self.component.as_str();
        let data = self.data.as_ref().map(|d| d.to_string()).unwrap_or_default();
        match self.level {
            LogLevel::Debug => debug!(session_id = session, component, data = %data, "{}", self.message),
            LogLevel::Info => info!(session_id = session, component, data = %data, "{}", self.message),
            LogLevel::Warn => warn!(session_id = session, component, data = %data, "{}", self.message),
            LogLevel::Error => error!(session_id = session, component, data = %data, "{}", self.message),
        }
    }
}

/// Append-only destination for log batches.
#[async_trait]
pub trait LogSink: Send + Sync {
    async fn write_batch(&self, entries: &[LogEntry]) -> Result<()>;
}

/// Sink that keeps everything in memory.
#[derive(Default)]
pub struct MemoryLogSink {
    entries: Mutex<Vec<LogEntry>>,
}

impl MemoryLogSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn entries(&self) -> Vec<LogEntry> {
        self.entries.lock().await.clone()
    }
}

#[async_trait]
impl LogSink for MemoryLogSink {
    async fn write_batch(&self, entries: &[LogEntry]) -> Result<()> {
        self.entries.lock().await.extend_from_slice(entries);
        Ok(())
    }
}

/// Sink that appends one JSON object per line to a file.
pub struct JsonLinesLogSink {
    path: PathBuf,
}

impl JsonLinesLogSink {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl LogSink for JsonLinesLogSink {
    async fn write_batch(&self, entries: &[LogEntry]) -> Result<()> {
        let mut buf = String::new();
        for entry in entries {
            buf.push_str(&serde_json::to_string(entry)?);
            buf.push('\n');
        }

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| Error::Storage(format!("open {}: {}", self.path.display(), e)))?;
        file.write_all(buf.as_bytes())
            .await
            .map_err(|e| Error::Storage(format!("write {}: {}", self.path.display(), e)))?;
        file.flush()
            .await
            .map_err(|e| Error::Storage(format!("flush {}: {}", self.path.display(), e)))?;
        Ok(())
    }
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Buffered entries that trigger a flush
    pub flush_threshold: usize,
    /// JSON-lines file for structured entries; `None` keeps tracing only
    pub path: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            flush_threshold: 50,
            path: None,
        }
    }
}

/// Buffered structured logger.
pub struct EventLogger {
    sink: Option<Arc<dyn LogSink>>,
    buffer: Mutex<Vec<LogEntry>>,
    flush_threshold: usize,
}

impl EventLogger {
    pub fn new(sink: Arc<dyn LogSink>, flush_threshold: usize) -> Self {
        Self {
            sink: Some(sink),
            buffer: Mutex::new(Vec::new()),
            flush_threshold: flush_threshold.max(1),
        }
    }

    /// Logger that only emits `tracing` events.
    pub fn tracing_only() -> Self {
        Self {
            sink: None,
            buffer: Mutex::new(Vec::new()),
            flush_threshold: 1,
        }
    }

    pub fn from_config(config: &LoggingConfig) -> Self {
        match &config.path {
            Some(path) => Self::new(Arc::new(JsonLinesLogSink::new(path)), config.flush_threshold),
            None => Self::tracing_only(),
        }
    }

    /// Record an entry, flushing if the buffer is full.
    pub async fn log(&self, entry: LogEntry) {
        entry.emit();
        if self.sink.is_none() {
            return;
        }

        let full = {
            let mut buffer = self.buffer.lock().await;
            buffer.push(entry);
            buffer.len() >= self.flush_threshold
        };
        if full {
            self.flush().await;
        }
    }

    pub async fn info(&self, session_id: Option<&str>, component: &str, message: impl Into<String>) {
        self.log(Self::entry(LogLevel::Info, session_id, component, message))
            .await;
    }

    pub async fn warn(&self, session_id: Option<&str>, component: &str, message: impl Into<String>) {
        self.log(Self::entry(LogLevel::Warn, session_id, component, message))
            .await;
    }

    pub async fn error(
        &self,
        session_id: Option<&str>,
        component: &str,
        message: impl Into<String>,
    ) {
        self.log(Self::entry(LogLevel::Error, session_id, component, message))
            .await;
    }

    fn entry(
        level: LogLevel,
        session_id: Option<&str>,
        component: &str,
        message: impl Into<String>,
    ) -> LogEntry {
        let entry = LogEntry::new(level, component, message);
        match session_id {
            Some(id) => entry.with_session(id),
            None => entry,
        }
    }

    /// Deliver buffered entries. Failures drop the batch.
    pub async fn flush(&self) {
        let Some(sink) = &self.sink else {
            return;
        };
        let batch = std::mem::take(&mut *self.buffer.lock().await);
        if batch.is_empty() {
            return;
        }
        if let Err(e) = sink.write_batch(&batch).await {
            warn!(dropped = batch.len(), error = %e, "log flush failed");
        }
    }

    pub async fn buffered_len(&self) -> usize {
        self.buffer.lock().await.len()
    }
}

impl Default for EventLogger {
    fn default() -> Self {
        Self::tracing_only()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_flushes_at_threshold() {
        let sink = Arc::new(MemoryLogSink::new());
        let logger = EventLogger::new(sink.clone(), 3);

        logger.info(Some("s1"), "scorer", "one").await;
        logger.info(Some("s1"), "scorer", "two").await;
        assert!(sink.entries().await.is_empty());
        assert_eq!(logger.buffered_len().await, 2);

        logger.warn(None, "cascade", "three").await;
        let entries = sink.entries().await;
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[2].level, LogLevel::Warn);
        assert_eq!(entries[0].session_id.as_deref(), Some("s1"));
        assert_eq!(logger.buffered_len().await, 0);
    }

    #[tokio::test]
    async fn test_explicit_flush_delivers_partial_batch() {
        let sink = Arc::new(MemoryLogSink::new());
        let logger = EventLogger::new(sink.clone(), 100);
        logger
            .log(
                LogEntry::new(LogLevel::Info, "meta_loop", "turn processed")
                    .with_data(json!({"score": 42}))
                    .with_duration_ms(12),
            )
            .await;
        logger.flush().await;

        let entries = sink.entries().await;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].data, Some(json!({"score": 42})));
        assert_eq!(entries[0].duration_ms, Some(12));
    }

    struct FailingSink;

    #[async_trait]
    impl LogSink for FailingSink {
        async fn write_batch(&self, _entries: &[LogEntry]) -> Result<()> {
            Err(Error::Storage("blob store offline".to_string()))
        }
    }

    #[tokio::test]
    async fn test_flush_failure_is_swallowed() {
        let logger = EventLogger::new(Arc::new(FailingSink), 1);
        logger.error(Some("s"), "cascade", "boom").await;
        logger.flush().await;
        assert_eq!(logger.buffered_len().await, 0);
    }

    #[tokio::test]
    async fn test_json_lines_sink_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.jsonl");
        let sink = JsonLinesLogSink::new(&path);

        let first = LogEntry::new(LogLevel::Info, "meta_loop", "start").with_session("abc");
        let second = LogEntry::new(LogLevel::Debug, "scorer", "heuristic").with_cost(0.001);
        sink.write_batch(&[first.clone()]).await.unwrap();
        sink.write_batch(&[second.clone()]).await.unwrap();

        let content = tokio::fs::read_to_string(&path).await.unwrap();
        let lines: Vec<LogEntry> = content
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines, vec![first, second]);
    }

    #[tokio::test]
    async fn test_tracing_only_never_buffers() {
        let logger = EventLogger::tracing_only();
        logger.info(None, "x", "y").await;
        assert_eq!(logger.buffered_len().await, 0);
    }
}
