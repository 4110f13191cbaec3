//! Optional JSONL access log.
//!
//! One line per handled request. Entries are handed to a dedicated writer
//! thread so request handlers never touch the file themselves.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessEntry {
    pub timestamp: DateTime<Utc>,
    pub request_id: Uuid,
    pub method: String,
    pub path: String,
    /// `api`, `image`, or `none` for the usage fallback.
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upstream: Option<String>,
    pub status: u16,
    pub elapsed_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AccessEntry {
    pub fn new(
        request_id: Uuid,
        method: impl Into<String>,
        path: impl Into<String>,
        kind: impl Into<String>,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            request_id,
            method: method.into(),
            path: path.into(),
            kind: kind.into(),
            upstream: None,
            status: 0,
            elapsed_ms: 0,
            error: None,
        }
    }

    pub fn with_upstream(mut self, url: impl Into<String>) -> Self {
        self.upstream = Some(url.into());
        self
    }

    pub fn with_status(mut self, status: u16, elapsed_ms: u64) -> Self {
        self.status = status;
        self.elapsed_ms = elapsed_ms;
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

enum Command {
    Record(AccessEntry),
    Flush(oneshot::Sender<()>),
}

/// Cloneable handle to an append-only access log file. The writer thread
/// exits once every handle is dropped.
#[derive(Clone)]
pub struct AccessLog {
    tx: mpsc::UnboundedSender<Command>,
}

impl AccessLog {
    pub fn open(file_path: impl AsRef<Path>) -> std::io::Result<Self> {
        let file_path = file_path.as_ref();

        if let Some(parent) = file_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(file_path)?;

        let (tx, rx) = mpsc::unbounded_channel();
        std::thread::Builder::new()
            .name("access-log".to_string())
            .spawn(move || run_writer(rx, BufWriter::new(file)))?;

        Ok(Self { tx })
    }

    /// Queue an entry. Never blocks.
    pub fn record(&self, entry: AccessEntry) {
        let _ = self.tx.send(Command::Record(entry));
    }

    /// Wait until everything recorded so far is on disk.
    pub async fn flush(&self) {
        let (ack, done) = oneshot::channel();
        if self.tx.send(Command::Flush(ack)).is_ok() {
            let _ = done.await;
        }
    }
}

fn run_writer(mut rx: mpsc::UnboundedReceiver<Command>, mut writer: BufWriter<File>) {
    while let Some(command) = rx.blocking_recv() {
        let mut next = Some(command);
        // Drain whatever is queued, then flush once
        while let Some(command) = next.take() {
            match command {
                Command::Record(entry) => {
                    if let Ok(json) = serde_json::to_string(&entry) {
                        let _ = writeln!(writer, "{}", json);
                    }
                }
                Command::Flush(ack) => {
                    let _ = writer.flush();
                    let _ = ack.send(());
                }
            }
            next = rx.try_recv().ok();
        }
        if let Err(e) = writer.flush() {
            tracing::warn!(error = %e, "Failed to flush access log");
        }
    }
}

/// Parse a JSONL access log back into entries, skipping malformed lines.
pub fn read_entries(file_path: impl AsRef<Path>) -> std::io::Result<Vec<AccessEntry>> {
    let content = std::fs::read_to_string(file_path)?;
    Ok(content
        .lines()
        .filter_map(|line| serde_json::from_str(line).ok())
        .collect())
}
