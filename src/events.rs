//! Application event channel.
//!
//! Workers publish progress and status through a [`tokio::sync::broadcast`]
//! channel; frontends (CLI progress bar, a future GUI) subscribe and render.
//! Producers never touch consumer-owned state directly.

use std::path::PathBuf;

use tokio::sync::broadcast;

/// Broadcast channel capacity. Events are small and consumers drain fast;
/// a lagged receiver only loses cosmetic progress updates.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Events emitted by the batch runner and the remote orchestrator.
#[derive(Debug, Clone)]
pub enum AppEvent {
    /// Batch-level progress: completed item count out of total
    Progress {
        /// Items finished so far
        done: usize,
        /// Total items in the batch
        total: usize,
    },
    /// Fine-grained progress for a single remote task (sampler steps)
    TaskProgress {
        /// Display name of the item (original file name)
        name: String,
        /// Current step
        value: u32,
        /// Total steps
        max: u32,
    },
    /// Human-readable status line
    Status(String),
    /// An output file landed at its final location
    FileSaved(PathBuf),
    /// A task-level failure that did not stop the batch
    Error(String),
    /// Every task in the current run has completed
    AllDone,
}

/// Shared event bus handed to workers; cheap to clone.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<AppEvent>,
}

impl EventBus {
    /// Create a new bus with the default capacity.
    #[must_use]
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { tx }
    }

    /// Subscribe to events. Each receiver sees every event published after
    /// the call.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<AppEvent> {
        self.tx.subscribe()
    }

    /// Publish an event. Send failures mean nobody is listening, which is
    /// fine for fire-and-forget progress reporting.
    pub fn publish(&self, event: AppEvent) {
        let _ = self.tx.send(event);
    }

    /// Convenience: publish a status line.
    pub fn status<S: Into<String>>(&self, message: S) {
        self.publish(AppEvent::Status(message.into()));
    }

    /// Convenience: publish a task-level error.
    pub fn error<S: Into<String>>(&self, message: S) {
        self.publish(AppEvent::Error(message.into()));
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
