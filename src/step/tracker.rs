// src/step/tracker.rs

//! Per-step progress and diagnostics.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{error, info, warn};

use crate::step::ProgressStats;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogKind {
    Info,
    Warning,
    Error,
}

/// One diagnostic entry recorded while converting.
///
/// Entries are serializable because they are produced inside worker
/// processes and shipped back to the parent with each result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub kind: LogKind,
    pub message: String,
    /// Rendered error chain, if the entry was caused by an error.
    pub exception: Option<String>,
    pub details: Option<Value>,
}

/// Owns the counters and the append-only log of one step instance.
#[derive(Debug, Default)]
pub struct Tracker {
    step: String,
    stats: ProgressStats,
    log: Vec<LogEntry>,
}

impl Tracker {
    pub fn new(step: impl Into<String>) -> Self {
        Self {
            step: step.into(),
            stats: ProgressStats::new(),
            log: Vec::new(),
        }
    }

    pub fn step(&self) -> &str {
        &self.step
    }

    pub fn stats(&self) -> &ProgressStats {
        &self.stats
    }

    pub fn log(&self) -> &[LogEntry] {
        &self.log
    }

    /// Move all recorded entries out of the tracker.
    pub fn drain_log(&mut self) -> Vec<LogEntry> {
        std::mem::take(&mut self.log)
    }

    pub fn reset_stats(&mut self) {
        self.stats.reset();
    }

    pub fn set_progress(&mut self, progress: u64) {
        self.stats.progress = progress;
    }

    pub fn log_info(
        &mut self,
        message: impl Into<String>,
        exception: Option<&anyhow::Error>,
        details: Option<Value>,
    ) {
        let message = message.into();
        let exception = exception.map(|e| format!("{e:#}"));
        info!(step = %self.step, exception = ?exception, "{message}");
        self.push(LogKind::Info, message, exception, details);
    }

    pub fn log_warning(
        &mut self,
        message: impl Into<String>,
        exception: Option<&anyhow::Error>,
        details: Option<Value>,
    ) {
        let message = message.into();
        let exception = exception.map(|e| format!("{e:#}"));
        warn!(step = %self.step, exception = ?exception, "{message}");
        self.stats.warning_count += 1;
        self.push(LogKind::Warning, message, exception, details);
    }

    pub fn log_error(
        &mut self,
        message: impl Into<String>,
        exception: Option<&anyhow::Error>,
        details: Option<Value>,
    ) {
        let message = message.into();
        let exception = exception.map(|e| format!("{e:#}"));
        error!(step = %self.step, exception = ?exception, "{message}");
        self.stats.error_count += 1;
        self.push(LogKind::Error, message, exception, details);
    }

    fn push(
        &mut self,
        kind: LogKind,
        message: String,
        exception: Option<String>,
        details: Option<Value>,
    ) {
        self.log.push(LogEntry {
            kind,
            message,
            exception,
            details,
        });
    }
}
