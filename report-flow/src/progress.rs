//! Progress hooks emitted at phase boundaries of a workflow run.
//!
//! The engine never talks to a client connection itself. Whatever keeps the
//! caller informed (a socket, a job table, a log line) implements
//! [`ProgressSink`] and is handed to the [`Context`](crate::Context).

use async_trait::async_trait;
use std::sync::Mutex;
use tracing::{debug, info};

/// A single progress notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    /// Phase boundary with a completion percentage (0-100).
    Progress { percent: u8, status: String },
    /// Liveness ping sent while a task is suspended (e.g. waiting out a rate limit).
    Heartbeat { status: String },
}

#[async_trait]
pub trait ProgressSink: Send + Sync {
    async fn progress(&self, percent: u8, status: &str);

    async fn heartbeat(&self, status: &str) {
        let _ = status;
    }
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopProgress;

#[async_trait]
impl ProgressSink for NoopProgress {
    async fn progress(&self, _percent: u8, _status: &str) {}
}

/// Forwards events to `tracing`.
#[derive(Debug, Default, Clone)]
pub struct TracingProgress {
    run_id: Option<String>,
}

impl TracingProgress {
    pub fn new(run_id: impl Into<String>) -> Self {
        Self {
            run_id: Some(run_id.into()),
        }
    }
}

#[async_trait]
impl ProgressSink for TracingProgress {
    async fn progress(&self, percent: u8, status: &str) {
        let run_id = self.run_id.as_deref().unwrap_or("-");
        info!(run_id, percent, "{}", status);
    }

    async fn heartbeat(&self, status: &str) {
        let run_id = self.run_id.as_deref().unwrap_or("-");
        debug!(run_id, "heartbeat: {}", status);
    }
}

/// Keeps every event in memory, in arrival order.
#[derive(Debug, Default)]
pub struct RecordingProgress {
    events: Mutex<Vec<ProgressEvent>>,
}

impl RecordingProgress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    /// Percentages of the `Progress` events only.
    pub fn percentages(&self) -> Vec<u8> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                ProgressEvent::Progress { percent, .. } => Some(percent),
                ProgressEvent::Heartbeat { .. } => None,
            })
            .collect()
    }

    pub fn heartbeats(&self) -> usize {
        self.events()
            .iter()
            .filter(|event| matches!(event, ProgressEvent::Heartbeat { .. }))
            .count()
    }

    fn push(&self, event: ProgressEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

#[async_trait]
impl ProgressSink for RecordingProgress {
    async fn progress(&self, percent: u8, status: &str) {
        self.push(ProgressEvent::Progress {
            percent,
            status: status.to_string(),
        });
    }

    async fn heartbeat(&self, status: &str) {
        self.push(ProgressEvent::Heartbeat {
            status: status.to_string(),
        });
    }
}
