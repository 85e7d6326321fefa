use chrono::{DateTime, Utc};
use helm_core::DeviceStatus;
use serde::{Deserialize, Serialize};

/// Status record for one controlled surface.
///
/// Only the coordinator writes these; everyone else gets snapshots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceState {
    pub status: DeviceStatus,
    /// When the last transition happened.
    pub last_action: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl Default for DeviceState {
    fn default() -> Self {
        Self {
            status: DeviceStatus::Disconnected,
            last_action: None,
            error: None,
        }
    }
}

impl DeviceState {
    pub fn is_ready(&self) -> bool {
        self.status == DeviceStatus::Connected
    }

    /// Move to `status`. The error text is kept only for `Error`.
    pub(crate) fn transition(&mut self, status: DeviceStatus, error: Option<String>) {
        self.status = status;
        self.error = match status {
            DeviceStatus::Error => error,
            _ => None,
        };
        self.last_action = Some(Utc::now());
    }
}
