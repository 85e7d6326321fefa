//! Runtime assembly: construct, initialize, use, tear down.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::conversation::{ConversationLoop, TurnSummary};
use crate::observer::ConversationObserver;
use crate::prompt::default_system_prompt;
use crate::registry::ToolRegistry;
use helm_config::HelmConfig;
use helm_core::{EventBus, HelmError, Result, Surface};
use helm_device::{
    AppiumBackend, AppiumConnector, ArtifactStore, CliclickBackend, Connector, DesktopConnector,
    DesktopTool, DeviceCoordinator, DeviceState, MobileBackend, MobileTool, ScreenBackend,
    TccProbe,
};
use helm_llm::{AnthropicStream, ModelStream};

/// Everything a session needs, owned in one place.
pub struct Runtime {
    config: HelmConfig,
    events: EventBus,
    coordinator: Arc<DeviceCoordinator>,
    registry: Arc<ToolRegistry>,
    artifacts: Arc<ArtifactStore>,
    conversation: ConversationLoop,
}

/// Assembles a [`Runtime`] from swappable parts.
pub struct RuntimeBuilder {
    config: HelmConfig,
    model: Option<Arc<dyn ModelStream>>,
    desktop: Option<(Arc<dyn Connector>, Arc<dyn ScreenBackend>)>,
    mobile: Option<(Arc<dyn Connector>, Arc<dyn MobileBackend>)>,
    artifacts: Option<Arc<ArtifactStore>>,
}

impl RuntimeBuilder {
    pub fn new(config: HelmConfig) -> Self {
        Self {
            config,
            model: None,
            desktop: None,
            mobile: None,
            artifacts: None,
        }
    }

    pub fn model(mut self, model: Arc<dyn ModelStream>) -> Self {
        self.model = Some(model);
        self
    }

    pub fn desktop(mut self, connector: Arc<dyn Connector>, backend: Arc<dyn ScreenBackend>) -> Self {
        self.desktop = Some((connector, backend));
        self
    }

    pub fn mobile(mut self, connector: Arc<dyn Connector>, backend: Arc<dyn MobileBackend>) -> Self {
        self.mobile = Some((connector, backend));
        self
    }

    pub fn artifacts(mut self, store: Arc<ArtifactStore>) -> Self {
        self.artifacts = Some(store);
        self
    }

    pub fn build(self) -> Result<Runtime> {
        let config = self.config;
        let model = self
            .model
            .ok_or_else(|| HelmError::Config("no model stream configured".into()))?;
        let events = EventBus::default();
        let artifacts = self
            .artifacts
            .unwrap_or_else(|| Arc::new(ArtifactStore::from_config(&config.storage)));

        let mut connectors = Vec::new();
        if let Some((ref c, _)) = self.desktop {
            connectors.push(Arc::clone(c));
        }
        if let Some((ref c, _)) = self.mobile {
            connectors.push(Arc::clone(c));
        }
        let coordinator = Arc::new(DeviceCoordinator::new(connectors, events.clone()));

        let mut registry = ToolRegistry::new().with_events(events.clone());
        if let Some((_, backend)) = self.desktop {
            registry.register(Arc::new(DesktopTool::new(
                backend,
                Arc::clone(&coordinator),
                Arc::clone(&artifacts),
                &config,
            )))?;
        }
        if let Some((_, backend)) = self.mobile {
            registry.register(Arc::new(MobileTool::new(
                backend,
                Arc::clone(&coordinator),
                Arc::clone(&artifacts),
                &config,
            )))?;
        }
        let registry = Arc::new(registry);

        let system_prompt = config
            .agent
            .system_prompt
            .clone()
            .unwrap_or_else(|| default_system_prompt(&registry.specs()));
        let conversation = ConversationLoop::new(
            model,
            Arc::clone(&registry),
            config.agent.clone(),
            system_prompt,
            events.clone(),
        );

        info!(tools = ?registry.names(), "runtime assembled");
        Ok(Runtime {
            config,
            events,
            coordinator,
            registry,
            artifacts,
            conversation,
        })
    }
}

impl Runtime {
    /// Runtime with the real backends: cliclick on the desktop, Appium for
    /// mobile when enabled, and the Anthropic API.
    pub fn new(config: HelmConfig) -> Result<Self> {
        let key = config.services.anthropic_api_key.clone().unwrap_or_default();
        let mut model = AnthropicStream::new(key);
        if let Some(ref url) = config.services.base_url {
            model = model.with_base_url(url.clone());
        }

        let mut builder = RuntimeBuilder::new(config.clone())
            .model(Arc::new(model))
            .desktop(
                Arc::new(DesktopConnector::new(Arc::new(TccProbe))),
                Arc::new(CliclickBackend),
            );
        if config.mobile.enabled {
            builder = builder.mobile(
                Arc::new(AppiumConnector::new(config.mobile.clone())),
                Arc::new(AppiumBackend::new(config.mobile.server_url.clone())),
            );
        }
        builder.build()
    }

    pub fn builder(config: HelmConfig) -> RuntimeBuilder {
        RuntimeBuilder::new(config)
    }

    /// Bring persistent devices up. Returns per-surface readiness.
    pub async fn initialize(&self) -> Vec<(Surface, bool)> {
        let ready = self.coordinator.initialize().await;
        for (surface, ok) in &ready {
            if !*ok {
                let reason = self
                    .coordinator
                    .state(*surface)
                    .and_then(|s| s.error)
                    .unwrap_or_default();
                warn!(%surface, %reason, "device not ready");
            }
        }
        ready
    }

    pub async fn send(
        &mut self,
        text: &str,
        observer: &dyn ConversationObserver,
    ) -> Result<TurnSummary> {
        self.conversation.send(text, observer).await
    }

    /// Release devices and drop expired captures.
    pub async fn teardown(&self) {
        self.coordinator.teardown().await;
        let max_age = Duration::from_secs(self.config.storage.max_artifact_age_secs);
        if let Err(e) = self.artifacts.cleanup_expired(max_age).await {
            warn!(error = %e, "artifact cleanup failed");
        }
        info!("runtime torn down");
    }

    pub fn device_states(&self) -> Vec<(Surface, DeviceState)> {
        self.coordinator.states()
    }

    pub fn conversation(&self) -> &ConversationLoop {
        &self.conversation
    }

    pub fn conversation_mut(&mut self) -> &mut ConversationLoop {
        &mut self.conversation
    }

    pub fn coordinator(&self) -> &Arc<DeviceCoordinator> {
        &self.coordinator
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn config(&self) -> &HelmConfig {
        &self.config
    }
}
