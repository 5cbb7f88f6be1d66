//! Progress events and the bus that carries them to observers.
//!
//! Delivery is fire-and-forget: `publish` never blocks, events are not
//! buffered for subscribers that arrive later, and a subscriber that dropped
//! its receiver is pruned on the next publish. Each subscriber gets its own
//! unbounded queue, so events published for one stage arrive in order.

use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Provisioning stage that owns an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Toolchain,
    Vcs,
    SourceTree,
    Dependencies,
    Backend,
}

impl Stage {
    pub fn label(&self) -> &'static str {
        match self {
            Stage::Toolchain => "Toolchain",
            Stage::Vcs => "VCS client",
            Stage::SourceTree => "Source tree",
            Stage::Dependencies => "Dependencies",
            Stage::Backend => "Backend",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Downloading,
    Extracting,
    Installing,
    Completed,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub stage: Stage,
    /// 0..=100, `None` when the total is unknown.
    pub percent: Option<u8>,
    pub status: Status,
    pub message: String,
}

impl ProgressEvent {
    pub fn new(stage: Stage, percent: Option<u8>, status: Status, message: impl Into<String>) -> Self {
        Self {
            stage,
            percent: percent.map(|p| p.min(100)),
            status,
            message: message.into(),
        }
    }
}

/// Fan-out channel for [`ProgressEvent`]s. Cheap to clone.
#[derive(Debug, Clone, Default)]
pub struct ProgressBus {
    subscribers: Arc<Mutex<Vec<mpsc::UnboundedSender<ProgressEvent>>>>,
}

impl ProgressBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an observer. Only events published after this call are delivered.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<ProgressEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        if let Ok(mut subs) = self.subscribers.lock() {
            subs.push(tx);
        }
        rx
    }

    pub fn publish(&self, event: ProgressEvent) {
        tracing::trace!(stage = ?event.stage, status = ?event.status, percent = ?event.percent, "{}", event.message);
        if let Ok(mut subs) = self.subscribers.lock() {
            subs.retain(|tx| tx.send(event.clone()).is_ok());
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().map(|s| s.len()).unwrap_or(0)
    }

    /// A publisher bound to one stage.
    pub fn reporter(&self, stage: Stage) -> StageReporter {
        StageReporter {
            bus: self.clone(),
            stage,
        }
    }
}

/// Publishes events for a single stage; the installer owning the stage holds it.
#[derive(Debug, Clone)]
pub struct StageReporter {
    bus: ProgressBus,
    stage: Stage,
}

impl StageReporter {
    pub fn report(&self, percent: Option<u8>, status: Status, message: impl Into<String>) {
        self.bus
            .publish(ProgressEvent::new(self.stage, percent, status, message));
    }

    pub fn downloading(&self, percent: Option<u8>, message: impl Into<String>) {
        self.report(percent, Status::Downloading, message);
    }

    pub fn extracting(&self, percent: u8, message: impl Into<String>) {
        self.report(Some(percent), Status::Extracting, message);
    }

    pub fn installing(&self, percent: u8, message: impl Into<String>) {
        self.report(Some(percent), Status::Installing, message);
    }

    pub fn completed(&self, message: impl Into<String>) {
        self.report(Some(100), Status::Completed, message);
    }

    pub fn error(&self, message: impl Into<String>) {
        self.report(Some(0), Status::Error, message);
    }
}
