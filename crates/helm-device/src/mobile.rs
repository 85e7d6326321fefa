//! Mobile control through an Appium server (WebDriver W3C protocol).
//!
//! The mobile surface is transient: a driver session is opened for each
//! scoped operation and closed again afterwards.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Map, Value, json};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Child;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::args;
use crate::artifacts::ArtifactStore;
use crate::connection::{ConnectionHandle, Connector};
use crate::coordinator::DeviceCoordinator;
use crate::retry::RetryPolicy;
use crate::safety::SafetyValidator;
use helm_config::{HelmConfig, MobileConfig};
use helm_core::{HelmError, Result, Surface, ToolAdapter, ToolError, ToolResult, ToolSpec};

/// Swipe length when no end position is given.
pub const DEFAULT_SWIPE_DISTANCE: i64 = 300;
pub const DEFAULT_SWIPE_MS: u64 = 300;

fn session_url(handle: &ConnectionHandle, fallback: &str) -> String {
    let base = handle.endpoint.as_deref().unwrap_or(fallback);
    format!("{}/session/{}", base.trim_end_matches('/'), handle.session_id)
}

/// POST a WebDriver command and return its `value`.
async fn webdriver_post(client: &Client, url: &str, body: Value) -> Result<Value> {
    let resp = client
        .post(url)
        .json(&body)
        .send()
        .await
        .map_err(|e| HelmError::connection(Surface::Mobile, e.to_string()))?;
    webdriver_value(resp).await
}

async fn webdriver_value(resp: reqwest::Response) -> Result<Value> {
    let status = resp.status();
    let body: Value = resp
        .json()
        .await
        .map_err(|e| HelmError::backend(Surface::Mobile, format!("invalid response: {e}")))?;
    if !status.is_success() {
        let msg = body["value"]["message"]
            .as_str()
            .unwrap_or("unknown webdriver error");
        return Err(HelmError::backend(
            Surface::Mobile,
            format!("HTTP {status}: {msg}"),
        ));
    }
    Ok(body["value"].clone())
}

// ─── Connector ──────────────────────────────────────────────────

/// Opens Appium driver sessions, starting the server first if asked to.
pub struct AppiumConnector {
    config: MobileConfig,
    client: Client,
    server: Mutex<Option<Child>>,
}

impl AppiumConnector {
    pub fn new(config: MobileConfig) -> Self {
        Self {
            config,
            client: Client::new(),
            server: Mutex::new(None),
        }
    }

    pub fn capabilities(&self) -> Value {
        let mut caps = json!({
            "platformName": self.config.platform,
            "appium:automationName": self.config.automation_name,
            "appium:deviceName": self.config.device_name,
        });
        if let Some(ref udid) = self.config.device_id {
            caps["appium:udid"] = json!(udid);
        }
        caps
    }

    async fn server_responds(&self) -> bool {
        let url = format!("{}/status", self.config.server_url.trim_end_matches('/'));
        matches!(
            self.client.get(url).timeout(Duration::from_secs(2)).send().await,
            Ok(r) if r.status().is_success()
        )
    }

    async fn ensure_server(&self) -> Result<()> {
        if !self.config.spawn_server {
            return Ok(());
        }
        let mut server = self.server.lock().await;
        if let Some(child) = server.as_mut() {
            match child.try_wait() {
                Ok(None) => return Ok(()),
                _ => {
                    warn!("appium server exited, restarting");
                    *server = None;
                }
            }
        }
        if self.server_responds().await {
            debug!(url = %self.config.server_url, "using running appium server");
            return Ok(());
        }

        let child = tokio::process::Command::new("appium")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                HelmError::connection(Surface::Mobile, format!("failed to start appium: {e}"))
            })?;
        info!(pid = ?child.id(), "appium server started");
        *server = Some(child);
        tokio::time::sleep(Duration::from_secs(self.config.server_startup_secs)).await;
        Ok(())
    }
}

#[async_trait]
impl Connector for AppiumConnector {
    fn surface(&self) -> Surface {
        Surface::Mobile
    }

    async fn connect(&self) -> Result<ConnectionHandle> {
        self.ensure_server().await?;
        let base = self.config.server_url.trim_end_matches('/').to_string();
        let body = json!({
            "capabilities": {
                "alwaysMatch": self.capabilities(),
                "firstMatch": [{}],
            }
        });
        let value = webdriver_post(&self.client, &format!("{base}/session"), body)
            .await
            .map_err(|e| match e {
                HelmError::Backend { reason, .. } => HelmError::connection(Surface::Mobile, reason),
                other => other,
            })?;
        let session_id = value["sessionId"].as_str().ok_or_else(|| {
            HelmError::connection(Surface::Mobile, "session response without sessionId")
        })?;
        info!(session = session_id, "mobile session opened");
        Ok(ConnectionHandle::new(Surface::Mobile, session_id).with_endpoint(base))
    }

    async fn release(&self, handle: ConnectionHandle) -> Result<()> {
        let url = session_url(&handle, &self.config.server_url);
        let resp = self
            .client
            .delete(url)
            .send()
            .await
            .map_err(|e| HelmError::connection(Surface::Mobile, e.to_string()))?;
        webdriver_value(resp).await?;
        debug!(session = %handle.session_id, "mobile session closed");
        Ok(())
    }

    async fn shutdown(&self) {
        if let Some(mut child) = self.server.lock().await.take() {
            if let Err(e) = child.kill().await {
                warn!(error = %e, "failed to stop appium server");
            } else {
                info!("appium server stopped");
            }
        }
    }
}

// ─── Backend ────────────────────────────────────────────────────

/// Touch and app-lifecycle primitives, all scoped to an open session.
#[async_trait]
pub trait MobileBackend: Send + Sync {
    async fn tap(&self, session: &ConnectionHandle, x: i64, y: i64) -> Result<()>;
    async fn swipe(
        &self,
        session: &ConnectionHandle,
        from: (i64, i64),
        to: (i64, i64),
        duration_ms: u64,
    ) -> Result<()>;
    async fn type_text(&self, session: &ConnectionHandle, text: &str) -> Result<()>;
    async fn launch_app(&self, session: &ConnectionHandle, app_id: &str) -> Result<()>;
    async fn close_app(&self, session: &ConnectionHandle, app_id: &str) -> Result<()>;
    /// Base64 PNG of the device screen.
    async fn screenshot(&self, session: &ConnectionHandle) -> Result<String>;
}

pub struct AppiumBackend {
    client: Client,
    server_url: String,
}

impl AppiumBackend {
    pub fn new(server_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            server_url: server_url.into(),
        }
    }

    async fn command(&self, session: &ConnectionHandle, path: &str, body: Value) -> Result<Value> {
        let url = format!("{}/{path}", session_url(session, &self.server_url));
        webdriver_post(&self.client, &url, body).await
    }

    async fn pointer(&self, session: &ConnectionHandle, steps: Vec<Value>) -> Result<()> {
        let body = json!({
            "actions": [{
                "type": "pointer",
                "id": "finger1",
                "parameters": { "pointerType": "touch" },
                "actions": steps,
            }]
        });
        self.command(session, "actions", body).await.map(drop)
    }
}

#[async_trait]
impl MobileBackend for AppiumBackend {
    async fn tap(&self, session: &ConnectionHandle, x: i64, y: i64) -> Result<()> {
        self.pointer(
            session,
            vec![
                json!({"type": "pointerMove", "duration": 0, "x": x, "y": y}),
                json!({"type": "pointerDown", "button": 0}),
                json!({"type": "pause", "duration": 100}),
                json!({"type": "pointerUp", "button": 0}),
            ],
        )
        .await
    }

    async fn swipe(
        &self,
        session: &ConnectionHandle,
        from: (i64, i64),
        to: (i64, i64),
        duration_ms: u64,
    ) -> Result<()> {
        self.pointer(
            session,
            vec![
                json!({"type": "pointerMove", "duration": 0, "x": from.0, "y": from.1}),
                json!({"type": "pointerDown", "button": 0}),
                json!({"type": "pointerMove", "duration": duration_ms, "origin": "viewport", "x": to.0, "y": to.1}),
                json!({"type": "pointerUp", "button": 0}),
            ],
        )
        .await
    }

    async fn type_text(&self, session: &ConnectionHandle, text: &str) -> Result<()> {
        let keys: Vec<Value> = text
            .chars()
            .flat_map(|c| {
                let c = c.to_string();
                [
                    json!({"type": "keyDown", "value": c}),
                    json!({"type": "keyUp", "value": c}),
                ]
            })
            .collect();
        let body = json!({
            "actions": [{ "type": "key", "id": "keyboard", "actions": keys }]
        });
        self.command(session, "actions", body).await.map(drop)
    }

    async fn launch_app(&self, session: &ConnectionHandle, app_id: &str) -> Result<()> {
        self.command(session, "appium/device/activate_app", json!({ "bundleId": app_id }))
            .await
            .map(drop)
    }

    async fn close_app(&self, session: &ConnectionHandle, app_id: &str) -> Result<()> {
        self.command(session, "appium/device/terminate_app", json!({ "bundleId": app_id }))
            .await
            .map(drop)
    }

    async fn screenshot(&self, session: &ConnectionHandle) -> Result<String> {
        let url = format!("{}/screenshot", session_url(session, &self.server_url));
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| HelmError::connection(Surface::Mobile, e.to_string()))?;
        let value = webdriver_value(resp).await?;
        value
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| HelmError::backend(Surface::Mobile, "screenshot response was not a string"))
    }
}

// ─── Tool ───────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
enum MobileAction {
    Tap(i64, i64),
    Swipe {
        from: (i64, i64),
        to: (i64, i64),
        duration_ms: u64,
    },
    Type(String),
    Screenshot,
    LaunchApp(String),
    CloseApp(String),
}

impl MobileAction {
    fn parse(action: &str, args: &Map<String, Value>) -> std::result::Result<Self, ToolError> {
        let position = args::position(args, "position")?;
        Ok(match action {
            "tap" => {
                let (x, y) = args::require(position, action, "position")?;
                MobileAction::Tap(x, y)
            }
            "swipe" => {
                let from = args::require(position, action, "position")?;
                let to = args::position(args, "end_position")?
                    .unwrap_or((from.0, from.1.saturating_sub(DEFAULT_SWIPE_DISTANCE)));
                let duration_ms = args::number(args, "duration_ms")?.unwrap_or(DEFAULT_SWIPE_MS);
                MobileAction::Swipe {
                    from,
                    to,
                    duration_ms,
                }
            }
            "type" => MobileAction::Type(
                args::require(args::text(args, "text")?, action, "text")?.to_string(),
            ),
            "screenshot" => MobileAction::Screenshot,
            "launch_app" | "close_app" => {
                let app_id = args::require(args::text(args, "app_id")?, action, "app_id")?;
                if app_id.trim().is_empty() {
                    return Err(ToolError::InvalidArguments("app_id must not be empty".into()));
                }
                if action == "launch_app" {
                    MobileAction::LaunchApp(app_id.to_string())
                } else {
                    MobileAction::CloseApp(app_id.to_string())
                }
            }
            other => {
                return Err(ToolError::UnknownAction {
                    tool: MobileTool::NAME.into(),
                    action: other.into(),
                });
            }
        })
    }
}

/// Tool adapter for the mobile device.
pub struct MobileTool {
    backend: Arc<dyn MobileBackend>,
    coordinator: Arc<DeviceCoordinator>,
    artifacts: Arc<ArtifactStore>,
    safety: SafetyValidator,
    retry: RetryPolicy,
    settle_delay: Duration,
    timeout: Option<Duration>,
}

impl MobileTool {
    pub const NAME: &'static str = "mobile";

    pub fn new(
        backend: Arc<dyn MobileBackend>,
        coordinator: Arc<DeviceCoordinator>,
        artifacts: Arc<ArtifactStore>,
        config: &HelmConfig,
    ) -> Self {
        Self {
            backend,
            coordinator,
            artifacts,
            safety: SafetyValidator::for_touch(&config.safety),
            retry: RetryPolicy::from_config(&config.retry),
            settle_delay: Duration::from_millis(config.screen.settle_delay_ms),
            timeout: Some(Duration::from_secs(config.agent.tool_timeout_secs)).filter(|d| !d.is_zero()),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    fn check(&self, action: &MobileAction) -> std::result::Result<(), ToolError> {
        match action {
            MobileAction::Tap(x, y) => self.safety.validate_position(*x, *y),
            MobileAction::Swipe { from, to, .. } => {
                self.safety.validate_position(from.0, from.1)?;
                self.safety.validate_position(to.0, to.1)
            }
            MobileAction::Type(text) => self.safety.validate_text(text),
            MobileAction::Screenshot | MobileAction::LaunchApp(_) | MobileAction::CloseApp(_) => {
                Ok(())
            }
        }
    }

    async fn perform(&self, session: ConnectionHandle, action: MobileAction) -> Result<ToolResult> {
        let backend = &self.backend;
        let s = &session;
        let output = match &action {
            MobileAction::Tap(x, y) => {
                self.retry.run("mobile.tap", || backend.tap(s, *x, *y)).await?;
                format!("tapped at ({x}, {y})")
            }
            MobileAction::Swipe {
                from,
                to,
                duration_ms,
            } => {
                self.retry
                    .run("mobile.swipe", || backend.swipe(s, *from, *to, *duration_ms))
                    .await?;
                format!("swiped from {from:?} to {to:?}")
            }
            MobileAction::Type(text) => {
                self.retry.run("mobile.type", || backend.type_text(s, text)).await?;
                format!("typed {} characters", text.chars().count())
            }
            MobileAction::LaunchApp(app_id) => {
                self.retry.run("mobile.launch_app", || backend.launch_app(s, app_id)).await?;
                format!("launched {app_id}")
            }
            MobileAction::CloseApp(app_id) => {
                self.retry.run("mobile.close_app", || backend.close_app(s, app_id)).await?;
                format!("closed {app_id}")
            }
            MobileAction::Screenshot => {
                return Ok(self.capture_into(s, ToolResult::default()).await);
            }
        };

        tokio::time::sleep(self.settle_delay).await;
        Ok(self.capture_into(s, ToolResult::output(output)).await)
    }

    async fn capture_into(&self, session: &ConnectionHandle, result: ToolResult) -> ToolResult {
        match self.capture(session).await {
            Ok(image) => result.with_image(image),
            Err(e) => {
                warn!(error = %e, "mobile screenshot failed");
                result.with_error(format!("screenshot failed: {e}"))
            }
        }
    }

    async fn capture(&self, session: &ConnectionHandle) -> Result<String> {
        let backend = &self.backend;
        let data = self
            .retry
            .run("mobile.screenshot", || backend.screenshot(session))
            .await?;
        self.artifacts.store_base64("mobile", &data).await?;
        Ok(data)
    }
}

#[async_trait]
impl ToolAdapter for MobileTool {
    fn describe(&self) -> ToolSpec {
        ToolSpec {
            name: Self::NAME.into(),
            description: "Control the connected mobile device or simulator. Tap and swipe take a \
                          position [x, y]; swipe also takes end_position and duration_ms. Every \
                          action returns a screenshot."
                .into(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "action": {
                        "type": "string",
                        "enum": ["tap", "swipe", "type", "screenshot", "launch_app", "close_app"]
                    },
                    "position": {
                        "type": "array",
                        "items": { "type": "integer" },
                        "minItems": 2,
                        "maxItems": 2
                    },
                    "end_position": {
                        "type": "array",
                        "items": { "type": "integer" },
                        "minItems": 2,
                        "maxItems": 2
                    },
                    "duration_ms": { "type": "integer", "minimum": 0 },
                    "text": { "type": "string" },
                    "app_id": {
                        "type": "string",
                        "description": "Bundle identifier, e.g. com.apple.Preferences"
                    }
                },
                "required": ["action"]
            }),
        }
    }

    fn surface(&self) -> Surface {
        Surface::Mobile
    }

    async fn execute(&self, action: &str, args: &Map<String, Value>) -> Result<ToolResult> {
        let action = MobileAction::parse(action, args)?;
        self.check(&action)?;
        debug!(?action, "mobile action");

        let result = self
            .coordinator
            .scoped_operation(Surface::Mobile, self.timeout, |session| {
                self.perform(session, action)
            })
            .await?;
        info!(summary = %result.summary(), "mobile action done");
        Ok(result)
    }
}
