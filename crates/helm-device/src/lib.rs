//! # helm-device
//!
//! Device control for the Helm runtime.
//!
//! - [`SafetyValidator`] rejects unsafe positions and text before anything runs
//! - [`RetryPolicy`] retries transient failures with a configurable delay
//! - [`DeviceCoordinator`] owns per-surface state and connection handles and
//!   wraps every physical action in a scoped operation
//! - [`DesktopTool`] and [`MobileTool`] are the tool adapters the model calls
//! - [`ArtifactStore`] keeps captured screenshots until cleanup

pub mod args;
pub mod artifacts;
pub mod connection;
pub mod coordinator;
pub mod desktop;
pub mod mobile;
pub mod process;
pub mod retry;
pub mod safety;
pub mod state;

pub use artifacts::ArtifactStore;
pub use connection::{ConnectionHandle, Connector, DesktopConnector, Permission, PermissionProbe, TccProbe};
pub use coordinator::{DeviceCoordinator, ScopeError};
pub use desktop::{CliclickBackend, DesktopTool, ScreenBackend};
pub use mobile::{AppiumBackend, AppiumConnector, MobileBackend, MobileTool};
pub use retry::{Backoff, RetryPolicy};
pub use safety::SafetyValidator;
pub use state::DeviceState;
