//! # helm-config
//!
//! Configuration for the Helm runtime. Reads `helm.toml`, then applies
//! environment variable overrides, then validates.

pub mod loader;
pub mod schema;

pub use loader::ConfigLoader;
pub use schema::HelmConfig;
pub use schema::{
    AgentConfig, ConfigWarning, LoggingConfig, MobileConfig, Region, RetryConfig, SafetyConfig,
    ScreenConfig, ServicesConfig, StorageConfig, WarningSeverity,
};
