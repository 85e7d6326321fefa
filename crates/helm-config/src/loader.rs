use parking_lot::RwLock;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use crate::schema::HelmConfig;
use helm_core::HelmError;

/// Loads and reloads the Helm configuration.
pub struct ConfigLoader {
    config: Arc<RwLock<HelmConfig>>,
    config_path: PathBuf,
}

impl ConfigLoader {
    /// Resolve the config path: explicit path > HELM_CONFIG env > ~/.helm/helm.toml
    pub fn resolve_path(explicit: Option<&Path>) -> PathBuf {
        if let Some(p) = explicit {
            return p.to_path_buf();
        }
        if let Ok(p) = std::env::var("HELM_CONFIG") {
            return PathBuf::from(p);
        }
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".helm")
            .join("helm.toml")
    }

    /// Load the config from disk, falling back to defaults.
    pub fn load(path: Option<&Path>) -> helm_core::Result<Self> {
        let config_path = Self::resolve_path(path);
        let config = if config_path.exists() {
            info!(?config_path, "loading configuration");
            Self::parse_file(&config_path)?
        } else {
            warn!(?config_path, "config file not found, using defaults");
            HelmConfig::default()
        };

        let config = Self::apply_env_overrides(config);

        match config.validate() {
            Ok(warnings) => {
                for w in &warnings {
                    warn!("{}", w);
                }
            }
            Err(e) => {
                return Err(HelmError::Config(e));
            }
        }

        Ok(Self {
            config: Arc::new(RwLock::new(config)),
            config_path,
        })
    }

    fn parse_file(path: &Path) -> helm_core::Result<HelmConfig> {
        let raw = std::fs::read_to_string(path)?;
        toml::from_str::<HelmConfig>(&raw).map_err(|e| {
            HelmError::Config(format!("failed to parse {}: {}", path.display(), e))
        })
    }

    /// Get a snapshot of the current config.
    pub fn get(&self) -> HelmConfig {
        self.config.read().clone()
    }

    pub fn shared(&self) -> Arc<RwLock<HelmConfig>> {
        Arc::clone(&self.config)
    }

    pub fn path(&self) -> &Path {
        &self.config_path
    }

    /// Apply overrides from the process environment.
    pub fn apply_env_overrides(config: HelmConfig) -> HelmConfig {
        Self::apply_overrides(config, |key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary variable lookup.
    ///
    /// The API key only fills in when the file has none; every other variable
    /// replaces the file value.
    pub fn apply_overrides(
        mut config: HelmConfig,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> HelmConfig {
        if config.services.anthropic_api_key.is_none() {
            if let Some(v) = lookup("ANTHROPIC_API_KEY").filter(|v| !v.is_empty()) {
                config.services.anthropic_api_key = Some(v);
            }
        }
        if let Some(v) = lookup("API_PROVIDER") {
            config.services.api_provider = v;
        }
        if let Some(v) = lookup("HELM_MODEL") {
            config.agent.model = v;
        }
        if let Some(v) = lookup("HELM_LOG_LEVEL") {
            config.logging.level = v;
        }
        if let Some(v) = lookup("SCREEN_WIDTH") {
            match v.parse::<u32>() {
                Ok(w) => config.screen.width = w,
                Err(_) => warn!(value = %v, "ignoring invalid SCREEN_WIDTH"),
            }
        }
        if let Some(v) = lookup("SCREEN_HEIGHT") {
            match v.parse::<u32>() {
                Ok(h) => config.screen.height = h,
                Err(_) => warn!(value = %v, "ignoring invalid SCREEN_HEIGHT"),
            }
        }
        if let Some(v) = lookup("IOS_DEVICE_ID").filter(|v| !v.is_empty()) {
            config.mobile.device_id = Some(v);
            config.mobile.enabled = true;
        }
        config
    }

    /// Reload the config from disk.
    pub fn reload(&self) -> helm_core::Result<()> {
        if !self.config_path.exists() {
            return Err(HelmError::Config(format!(
                "config file not found: {}",
                self.config_path.display()
            )));
        }
        let new_config = Self::apply_env_overrides(Self::parse_file(&self.config_path)?);
        new_config.validate().map_err(HelmError::Config)?;
        *self.config.write() = new_config;
        info!("configuration reloaded");
        Ok(())
    }
}
