//! Engine callbacks and outbound notifications
//!
//! Engines invoke their callbacks on internal worker threads. Each callback
//! becomes an [`EngineEvent`] pushed through an [`EngineEventSender`], and the
//! orchestrator applies them one at a time on the control thread. What the
//! host sees comes out the other side as [`PlayerEvent`] records.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::debug;

/// Callback delivered by a playback engine
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// Async preparation finished
    Prepared { success: bool },
    /// Buffering progress in percent
    Buffering { percent: i32 },
    /// A seek requested through the gate finished
    SeekCompleted,
    /// End of stream reached
    Completed,
    /// Playback was interrupted by the platform (resource conflict, policy)
    Interrupted { code: i32 },
    /// Asynchronous engine error
    Error { code: i32, message: String },
    /// Subtitle text became active
    SubtitleUpdated { duration: i64, text: String },
}

/// Thread-safe handle engines use to report callbacks
#[derive(Debug, Clone)]
pub struct EngineEventSender {
    tx: mpsc::UnboundedSender<EngineEvent>,
}

impl EngineEventSender {
    /// Create a sender/receiver pair
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<EngineEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Report a callback. Events sent after the session is gone are dropped.
    pub fn send(&self, event: EngineEvent) {
        if let Err(err) = self.tx.send(event) {
            debug!(event = ?err.0, "Dropping engine event for disposed session");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Notification sent to the host application
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum PlayerEvent {
    /// First transition to ready
    Initialized {
        duration: i64,
        width: i32,
        height: i32,
    },

    /// Buffering started
    BufferingStart,

    /// Buffering progress
    BufferingUpdate {
        value: i32,
    },

    /// Buffering finished
    BufferingEnd,

    /// Subtitle text
    SubtitleUpdate {
        duration: i64,
        text: String,
    },

    /// Playback reached the end
    Completed,

    /// Engine error or interruption
    Error {
        code: String,
        message: String,
    },
}

impl PlayerEvent {
    /// Key/value record form, always carrying an `event` key
    pub fn to_record(&self) -> serde_json::Map<String, serde_json::Value> {
        match serde_json::to_value(self) {
            Ok(serde_json::Value::Object(map)) => map,
            _ => serde_json::Map::new(),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, PlayerEvent::Error { .. })
    }
}

/// Outbound notification channel of one playback session
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<PlayerEvent>,
}

impl EventSink {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<PlayerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn emit(&self, event: PlayerEvent) {
        debug!(event = ?event, "Player event");
        if self.tx.send(event).is_err() {
            debug!("No listener for player events");
        }
    }
}
