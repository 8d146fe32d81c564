use std::io::Write;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::warn;

/// One line of the structured access log.
#[derive(Debug, Serialize)]
pub struct AccessLogRecord {
    pub method: String,
    pub uri: String,
    pub status: u16,
    pub response_time_ms: u64,
    pub endpoint: Option<String>,
    pub bytes: u64,
}

/// Emits one [`AccessLogRecord`] per dispatched request.
///
/// Writes go through a bounded channel to a dedicated writer task so a slow
/// disk never makes a dispatcher wait on log I/O; the dispatcher only pays
/// for a channel send. When no `access_log` path is configured, `disabled`
/// builds a sink that drops every record without spawning anything.
#[derive(Clone)]
pub struct AccessLogger {
    sender: Option<mpsc::Sender<AccessLogRecord>>,
}

impl AccessLogger {
    pub fn disabled() -> Self {
        Self { sender: None }
    }

    /// Spawns a writer task appending newline-delimited JSON records to
    /// `path`. Returns the logger handle and the writer task's join handle
    /// so the caller can await a clean shutdown after the channel closes.
    pub fn spawn_to_file(path: impl Into<String>) -> (Self, tokio::task::JoinHandle<()>) {
        let path = path.into();
        let (tx, rx) = mpsc::channel(1024);
        let handle = tokio::task::spawn_blocking(move || Self::run_writer(path, rx));
        (Self { sender: Some(tx) }, handle)
    }

    pub fn log(&self, record: AccessLogRecord) {
        let Some(sender) = &self.sender else {
            return;
        };
        if let Err(err) = sender.try_send(record) {
            warn!(%err, "access log channel full or closed, dropping record");
        }
    }

    fn run_writer(path: String, mut rx: mpsc::Receiver<AccessLogRecord>) {
        let file = std::fs::OpenOptions::new().create(true).append(true).open(&path);
        let mut file = match file {
            Ok(f) => f,
            Err(err) => {
                warn!(%err, path, "could not open access log file, disabling access logging");
                while rx.blocking_recv().is_some() {}
                return;
            }
        };
        while let Some(record) = rx.blocking_recv() {
            match serde_json::to_string(&record) {
                Ok(line) => {
                    if let Err(err) = writeln!(file, "{line}") {
                        warn!(%err, "failed writing access log record");
                    }
                }
                Err(err) => warn!(%err, "failed serializing access log record"),
            }
        }
    }
}

pub fn response_time_ms(elapsed: Duration) -> u64 {
    elapsed.as_millis() as u64
}
