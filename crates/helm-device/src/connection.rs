//! Connection collaborators.
//!
//! A [`Connector`] opens and releases the handle the coordinator holds for a
//! surface. The desktop connector only verifies OS permissions; the Appium
//! connector (see [`crate::mobile`]) opens a real driver session.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

use crate::process::run_cmd;
use helm_core::{HelmError, Result, Surface};

/// An open connection to a surface. Owned by the coordinator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionHandle {
    pub surface: Surface,
    pub session_id: String,
    /// Base URL of the automation server, when there is one.
    pub endpoint: Option<String>,
    pub opened_at: DateTime<Utc>,
}

impl ConnectionHandle {
    pub fn new(surface: Surface, session_id: impl Into<String>) -> Self {
        Self {
            surface,
            session_id: session_id.into(),
            endpoint: None,
            opened_at: Utc::now(),
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }
}

/// Opens and releases connections for one surface.
#[async_trait]
pub trait Connector: Send + Sync {
    fn surface(&self) -> Surface;

    async fn connect(&self) -> Result<ConnectionHandle>;

    async fn release(&self, handle: ConnectionHandle) -> Result<()>;

    /// Stop any helper process the connector started.
    async fn shutdown(&self) {}
}

// ── Desktop permissions ────────────────────────────────────────

/// macOS privacy permissions the desktop surface needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permission {
    Accessibility,
    ScreenRecording,
    Automation,
}

impl Permission {
    pub const ALL: [Permission; 3] = [
        Permission::Accessibility,
        Permission::ScreenRecording,
        Permission::Automation,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Permission::Accessibility => "accessibility",
            Permission::ScreenRecording => "screen_recording",
            Permission::Automation => "automation",
        }
    }

    fn service(&self) -> &'static str {
        match self {
            Permission::Accessibility => "com.apple.accessibility",
            Permission::ScreenRecording => "com.apple.screencapture",
            Permission::Automation => "com.apple.automation",
        }
    }

    fn settings_anchor(&self) -> &'static str {
        match self {
            Permission::Accessibility => "Privacy_Accessibility",
            Permission::ScreenRecording => "Privacy_ScreenCapture",
            Permission::Automation => "Privacy_Automation",
        }
    }
}

/// Checks and requests OS permissions.
#[async_trait]
pub trait PermissionProbe: Send + Sync {
    async fn is_granted(&self, permission: Permission) -> bool;

    /// Point the user at the settings pane for `permission`.
    async fn request(&self, permission: Permission);
}

/// Probe backed by `tccutil` and `osascript`.
pub struct TccProbe;

#[async_trait]
impl PermissionProbe for TccProbe {
    async fn is_granted(&self, permission: Permission) -> bool {
        match run_cmd(Surface::Desktop, "tccutil", &["check", permission.service()]).await {
            Ok(out) => out.to_lowercase().contains("granted"),
            Err(_) => false,
        }
    }

    async fn request(&self, permission: Permission) {
        let reveal = format!(
            "tell application \"System Settings\" to reveal anchor \"{}\" of pane id \"com.apple.preference.security\"",
            permission.settings_anchor()
        );
        let args = [
            "-e",
            "tell application \"System Settings\" to activate",
            "-e",
            reveal.as_str(),
        ];
        if let Err(e) = run_cmd(Surface::Desktop, "osascript", &args).await {
            warn!(permission = permission.as_str(), error = %e, "could not open settings pane");
        }
    }
}

/// Connector for the local desktop. Connecting means every permission is
/// granted; the handle then stays open until teardown.
pub struct DesktopConnector {
    probe: Arc<dyn PermissionProbe>,
    request_missing: bool,
}

impl DesktopConnector {
    pub fn new(probe: Arc<dyn PermissionProbe>) -> Self {
        Self {
            probe,
            request_missing: true,
        }
    }

    /// Don't open System Settings when permissions are missing.
    pub fn without_prompts(mut self) -> Self {
        self.request_missing = false;
        self
    }

    pub async fn missing_permissions(&self) -> Vec<Permission> {
        let mut missing = Vec::new();
        for p in Permission::ALL {
            if !self.probe.is_granted(p).await {
                missing.push(p);
            }
        }
        missing
    }
}

#[async_trait]
impl Connector for DesktopConnector {
    fn surface(&self) -> Surface {
        Surface::Desktop
    }

    async fn connect(&self) -> Result<ConnectionHandle> {
        let missing = self.missing_permissions().await;
        if !missing.is_empty() {
            let names: Vec<&str> = missing.iter().map(Permission::as_str).collect();
            warn!(missing = ?names, "desktop permissions missing");
            if self.request_missing {
                for p in &missing {
                    self.probe.request(*p).await;
                }
            }
            return Err(HelmError::connection(
                Surface::Desktop,
                format!("missing permissions: {}", names.join(", ")),
            ));
        }
        info!("desktop control ready");
        Ok(ConnectionHandle::new(
            Surface::Desktop,
            format!("desktop-{}", uuid::Uuid::new_v4().simple()),
        ))
    }

    async fn release(&self, _handle: ConnectionHandle) -> Result<()> {
        Ok(())
    }
}
