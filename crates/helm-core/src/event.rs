use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use std::sync::Arc;
use tokio::sync::broadcast;

use crate::surface::Surface;

/// Connection status of a controlled surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceStatus {
    Disconnected,
    Connecting,
    Connected,
    Error,
}

impl std::fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DeviceStatus::Disconnected => "disconnected",
            DeviceStatus::Connecting => "connecting",
            DeviceStatus::Connected => "connected",
            DeviceStatus::Error => "error",
        };
        f.write_str(s)
    }
}

/// Events published for read-only observers (health checks, UIs, tests).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Event {
    // ── Device lifecycle ───────────────────────────────────────
    DeviceStateChanged {
        surface: Surface,
        status: DeviceStatus,
        error: Option<String>,
        at: DateTime<Utc>,
    },

    // ── Conversation lifecycle ─────────────────────────────────
    TurnStarted {
        turn: u32,
    },
    ToolDispatched {
        name: String,
        is_error: bool,
    },
    TurnCompleted {
        turn: u32,
    },
    TurnAborted {
        turn: u32,
        error: String,
    },
}

/// A broadcast-based event bus.
#[derive(Clone)]
pub struct EventBus {
    sender: Arc<broadcast::Sender<Event>>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn publish(&self, event: Event) {
        // No subscribers is fine.
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}
