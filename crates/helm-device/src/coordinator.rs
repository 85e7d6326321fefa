//! Device readiness and scoped operations.
//!
//! The coordinator owns one [`DeviceState`] and at most one
//! [`ConnectionHandle`] per registered surface. Every state transition for a
//! surface happens while that surface's handle lock is held, which makes the
//! lock the per-surface critical section.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::RwLock;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::connection::{ConnectionHandle, Connector};
use crate::state::DeviceState;
use helm_core::{DeviceStatus, Event, EventBus, HelmError, Surface, ToolError};

/// Why a scoped operation produced no value.
#[derive(Error, Debug)]
pub enum ScopeError {
    /// `ensure_ready` failed; the body never ran.
    #[error("{surface} not ready: {reason}")]
    NotReady { surface: Surface, reason: String },

    /// The deadline passed and the body was dropped.
    #[error("{surface} operation timed out after {secs:.1}s")]
    TimedOut { surface: Surface, secs: f64 },

    /// The body returned an error.
    #[error(transparent)]
    Failed(HelmError),
}

impl From<ScopeError> for HelmError {
    /// Device-side failures become declared tool errors so they render as a
    /// result; anything else stays a fault.
    fn from(e: ScopeError) -> Self {
        match e {
            ScopeError::NotReady { surface, reason } => {
                HelmError::Tool(ToolError::DeviceUnavailable { surface, reason })
            }
            ScopeError::TimedOut { surface, .. } => HelmError::Tool(ToolError::TimedOut { surface }),
            ScopeError::Failed(e) if e.is_transient() => {
                HelmError::Tool(ToolError::Connection(e.to_string()))
            }
            ScopeError::Failed(e) => e,
        }
    }
}

struct SurfaceEntry {
    connector: Arc<dyn Connector>,
    state: RwLock<DeviceState>,
    handle: Mutex<Option<ConnectionHandle>>,
}

/// Gates every physical action behind device readiness.
pub struct DeviceCoordinator {
    entries: HashMap<Surface, SurfaceEntry>,
    events: EventBus,
}

impl DeviceCoordinator {
    /// One entry per connector. A later connector for the same surface
    /// replaces an earlier one.
    pub fn new(connectors: Vec<Arc<dyn Connector>>, events: EventBus) -> Self {
        let entries = connectors
            .into_iter()
            .map(|connector| {
                (
                    connector.surface(),
                    SurfaceEntry {
                        connector,
                        state: RwLock::new(DeviceState::default()),
                        handle: Mutex::new(None),
                    },
                )
            })
            .collect();
        Self { entries, events }
    }

    /// Registered surfaces, in a stable order.
    pub fn surfaces(&self) -> Vec<Surface> {
        let mut s: Vec<Surface> = self.entries.keys().copied().collect();
        s.sort();
        s
    }

    pub fn state(&self, surface: Surface) -> Option<DeviceState> {
        self.entries.get(&surface).map(|e| e.state.read().clone())
    }

    pub fn states(&self) -> Vec<(Surface, DeviceState)> {
        self.surfaces()
            .into_iter()
            .filter_map(|s| self.state(s).map(|st| (s, st)))
            .collect()
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Prepare persistent surfaces. Transient ones connect per operation.
    pub async fn initialize(&self) -> Vec<(Surface, bool)> {
        let mut out = Vec::new();
        for surface in self.surfaces() {
            if surface.is_transient() {
                continue;
            }
            let ready = self.ensure_ready(surface).await;
            out.push((surface, ready));
        }
        info!(surfaces = ?out, "device coordinator initialized");
        out
    }

    /// Connect `surface` unless it is already connected. One attempt only.
    pub async fn ensure_ready(&self, surface: Surface) -> bool {
        let Some(entry) = self.entries.get(&surface) else {
            warn!(%surface, "surface not registered");
            return false;
        };
        let mut handle = entry.handle.lock().await;
        self.connect_locked(surface, entry, &mut handle).await
    }

    /// Run `body` against a ready surface.
    ///
    /// With a `timeout`, the body is dropped at the deadline: nothing it has
    /// not started yet will run, but a primitive already handed to the OS may
    /// still land. Timeouts and body errors record an `Error` transition. On a
    /// transient surface the handle is released exactly once on every path
    /// past a successful connect.
    pub async fn scoped_operation<T, F, Fut>(
        &self,
        surface: Surface,
        timeout: Option<Duration>,
        body: F,
    ) -> Result<T, ScopeError>
    where
        F: FnOnce(ConnectionHandle) -> Fut,
        Fut: Future<Output = helm_core::Result<T>>,
    {
        let Some(entry) = self.entries.get(&surface) else {
            return Err(ScopeError::NotReady {
                surface,
                reason: "surface not registered".into(),
            });
        };

        let mut guard = entry.handle.lock().await;
        if !self.connect_locked(surface, entry, &mut guard).await {
            let reason = entry
                .state
                .read()
                .error
                .clone()
                .unwrap_or_else(|| "connection failed".into());
            return Err(ScopeError::NotReady { surface, reason });
        }
        let Some(handle) = guard.clone() else {
            return Err(ScopeError::NotReady {
                surface,
                reason: "no open connection".into(),
            });
        };

        let outcome = match timeout {
            Some(limit) => match tokio::time::timeout(limit, body(handle)).await {
                Ok(r) => r.map_err(ScopeError::Failed),
                Err(_) => Err(ScopeError::TimedOut {
                    surface,
                    secs: limit.as_secs_f64(),
                }),
            },
            None => body(handle).await.map_err(ScopeError::Failed),
        };

        match &outcome {
            Ok(_) => self.touch(entry),
            Err(ScopeError::TimedOut { secs, .. }) => {
                warn!(%surface, secs, "operation timed out");
                self.set_state(
                    surface,
                    entry,
                    DeviceStatus::Error,
                    Some(format!("operation timed out after {secs:.1}s")),
                );
            }
            Err(e) => {
                warn!(%surface, error = %e, "device operation failed");
                self.set_state(surface, entry, DeviceStatus::Error, Some(e.to_string()));
            }
        }

        if surface.is_transient() {
            self.release_locked(surface, entry, &mut guard).await;
        }

        outcome
    }

    /// Release every open handle and stop helper processes.
    pub async fn teardown(&self) {
        for surface in self.surfaces() {
            let Some(entry) = self.entries.get(&surface) else {
                continue;
            };
            let mut guard = entry.handle.lock().await;
            self.release_locked(surface, entry, &mut guard).await;
            if entry.state.read().status != DeviceStatus::Disconnected {
                self.set_state(surface, entry, DeviceStatus::Disconnected, None);
            }
            entry.connector.shutdown().await;
        }
        info!("device coordinator torn down");
    }

    // ── Internals (callers hold the surface's handle lock) ────────

    async fn connect_locked(
        &self,
        surface: Surface,
        entry: &SurfaceEntry,
        handle: &mut Option<ConnectionHandle>,
    ) -> bool {
        if entry.state.read().is_ready() && handle.is_some() {
            return true;
        }
        // Stale handle from a surface that went into Error.
        if let Some(old) = handle.take()
            && let Err(e) = entry.connector.release(old).await
        {
            debug!(%surface, error = %e, "releasing stale handle failed");
        }

        self.set_state(surface, entry, DeviceStatus::Connecting, None);
        match entry.connector.connect().await {
            Ok(h) => {
                debug!(%surface, session = %h.session_id, "connected");
                *handle = Some(h);
                self.set_state(surface, entry, DeviceStatus::Connected, None);
                true
            }
            Err(e) => {
                warn!(%surface, error = %e, "connect failed");
                *handle = None;
                self.set_state(surface, entry, DeviceStatus::Error, Some(e.to_string()));
                false
            }
        }
    }

    async fn release_locked(
        &self,
        surface: Surface,
        entry: &SurfaceEntry,
        handle: &mut Option<ConnectionHandle>,
    ) {
        let Some(h) = handle.take() else {
            return;
        };
        if let Err(e) = entry.connector.release(h).await {
            warn!(%surface, error = %e, "release failed");
        }
        // A recorded error stays visible until the next connect.
        if entry.state.read().status == DeviceStatus::Connected {
            self.set_state(surface, entry, DeviceStatus::Disconnected, None);
        }
    }

    fn touch(&self, entry: &SurfaceEntry) {
        entry.state.write().last_action = Some(Utc::now());
    }

    fn set_state(
        &self,
        surface: Surface,
        entry: &SurfaceEntry,
        status: DeviceStatus,
        error: Option<String>,
    ) {
        entry.state.write().transition(status, error.clone());
        debug!(%surface, %status, "device state changed");
        self.events.publish(Event::DeviceStateChanged {
            surface,
            status,
            error,
            at: Utc::now(),
        });
    }
}
