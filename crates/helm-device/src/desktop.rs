//! Desktop control: mouse, keyboard and screen capture.
//!
//! Every action goes through the same pipeline: safety checks, then a scoped
//! operation on the coordinator, retry around the primitive, a settle delay
//! and finally a screenshot.

use async_trait::async_trait;
use serde_json::{Map, Value, json};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::args;
use crate::artifacts::ArtifactStore;
use crate::coordinator::DeviceCoordinator;
use crate::process::run_cmd;
use crate::retry::RetryPolicy;
use crate::safety::SafetyValidator;
use helm_config::HelmConfig;
use helm_core::{HelmError, Result, Surface, ToolAdapter, ToolError, ToolResult, ToolSpec};

// ─── Backend ────────────────────────────────────────────────────

/// Physical desktop primitives. Coordinates are real screen pixels.
#[async_trait]
pub trait ScreenBackend: Send + Sync {
    async fn click(&self, x: i64, y: i64) -> Result<()>;
    async fn move_to(&self, x: i64, y: i64) -> Result<()>;
    async fn type_text(&self, text: &str) -> Result<()>;
    async fn press_key(&self, key: &str) -> Result<()>;
    async fn cursor_position(&self) -> Result<(i64, i64)>;
    /// Write a PNG of the whole screen to `path`.
    async fn capture(&self, path: &Path) -> Result<()>;
}

/// Backend driving `cliclick` and `screencapture`.
pub struct CliclickBackend;

impl CliclickBackend {
    async fn cliclick(&self, command: &str) -> Result<String> {
        run_cmd(Surface::Desktop, "cliclick", &[command]).await
    }
}

#[async_trait]
impl ScreenBackend for CliclickBackend {
    async fn click(&self, x: i64, y: i64) -> Result<()> {
        self.cliclick(&format!("c:{x},{y}")).await.map(drop)
    }

    async fn move_to(&self, x: i64, y: i64) -> Result<()> {
        self.cliclick(&format!("m:{x},{y}")).await.map(drop)
    }

    async fn type_text(&self, text: &str) -> Result<()> {
        self.cliclick(&format!("t:{text}")).await.map(drop)
    }

    async fn press_key(&self, key: &str) -> Result<()> {
        self.cliclick(&format!("kp:{}", key.to_lowercase())).await.map(drop)
    }

    async fn cursor_position(&self) -> Result<(i64, i64)> {
        let out = self.cliclick("p").await?;
        parse_point(&out).ok_or_else(|| {
            HelmError::backend(Surface::Desktop, format!("unexpected cursor output: {}", out.trim()))
        })
    }

    async fn capture(&self, path: &Path) -> Result<()> {
        let path = path.to_string_lossy();
        run_cmd(Surface::Desktop, "screencapture", &["-x", path.as_ref()])
            .await
            .map(drop)
    }
}

/// Parse "x,y" as printed by `cliclick p`.
fn parse_point(s: &str) -> Option<(i64, i64)> {
    let (x, y) = s.trim().split_once(',')?;
    Some((x.trim().parse().ok()?, y.trim().parse().ok()?))
}

// ─── Actions ────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
enum DesktopAction {
    Click(i64, i64),
    Move(i64, i64),
    Type(String),
    Key(String),
    Screenshot,
    GetPosition,
}

impl DesktopAction {
    fn parse(action: &str, args: &Map<String, Value>) -> std::result::Result<Self, ToolError> {
        let position = args::position(args, "position")?;
        let text = args::text(args, "text")?;
        Ok(match action {
            "click" => {
                let (x, y) = args::require(position, action, "position")?;
                DesktopAction::Click(x, y)
            }
            "move" => {
                let (x, y) = args::require(position, action, "position")?;
                DesktopAction::Move(x, y)
            }
            "type" => DesktopAction::Type(args::require(text, action, "text")?.to_string()),
            "key" => DesktopAction::Key(args::require(text, action, "text")?.to_string()),
            "screenshot" => DesktopAction::Screenshot,
            "get_position" => DesktopAction::GetPosition,
            other => {
                return Err(ToolError::UnknownAction {
                    tool: DesktopTool::NAME.into(),
                    action: other.into(),
                });
            }
        })
    }
}

// ─── Tool ───────────────────────────────────────────────────────

/// Tool adapter for the local desktop.
pub struct DesktopTool {
    backend: Arc<dyn ScreenBackend>,
    coordinator: Arc<DeviceCoordinator>,
    artifacts: Arc<ArtifactStore>,
    safety: SafetyValidator,
    retry: RetryPolicy,
    settle_delay: Duration,
    timeout: Option<Duration>,
    /// Real screen size.
    screen: (u32, u32),
    /// Resolution the model works in, when scaling is on.
    target: Option<(u32, u32)>,
}

impl DesktopTool {
    pub const NAME: &'static str = "desktop";

    pub fn new(
        backend: Arc<dyn ScreenBackend>,
        coordinator: Arc<DeviceCoordinator>,
        artifacts: Arc<ArtifactStore>,
        config: &HelmConfig,
    ) -> Self {
        let screen = (config.screen.width, config.screen.height);
        let target = config.screen.target_resolution();
        // Positions are checked in the space the model works in.
        let (w, h) = target.unwrap_or(screen);
        Self {
            backend,
            coordinator,
            artifacts,
            safety: SafetyValidator::new(w, h, &config.safety),
            retry: RetryPolicy::from_config(&config.retry),
            settle_delay: Duration::from_millis(config.screen.settle_delay_ms),
            timeout: Some(Duration::from_secs(config.agent.tool_timeout_secs)).filter(|d| !d.is_zero()),
            screen,
            target,
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

    /// Map model coordinates onto the real screen. Points inside the model
    /// space stay inside the screen.
    pub fn scale(&self, x: i64, y: i64) -> (i64, i64) {
        match self.target {
            Some((tw, th)) if tw > 0 && th > 0 => {
                let sx = f64::from(self.screen.0) / f64::from(tw);
                let sy = f64::from(self.screen.1) / f64::from(th);
                let max_x = i64::from(self.screen.0).saturating_sub(1).max(0);
                let max_y = i64::from(self.screen.1).saturating_sub(1).max(0);
                (
                    ((x as f64 * sx).round() as i64).min(max_x),
                    ((y as f64 * sy).round() as i64).min(max_y),
                )
            }
            _ => (x, y),
        }
    }

    fn check(&self, action: &DesktopAction) -> std::result::Result<(), ToolError> {
        match action {
            DesktopAction::Click(x, y) | DesktopAction::Move(x, y) => {
                self.safety.validate_position(*x, *y)
            }
            DesktopAction::Type(text) | DesktopAction::Key(text) => self.safety.validate_text(text),
            DesktopAction::Screenshot | DesktopAction::GetPosition => Ok(()),
        }
    }

    async fn perform(&self, action: DesktopAction) -> Result<ToolResult> {
        let backend = &self.backend;
        let output = match &action {
            DesktopAction::Click(x, y) => {
                let (rx, ry) = self.scale(*x, *y);
                self.retry.run("desktop.click", || backend.click(rx, ry)).await?;
                format!("clicked at ({x}, {y})")
            }
            DesktopAction::Move(x, y) => {
                let (rx, ry) = self.scale(*x, *y);
                self.retry.run("desktop.move", || backend.move_to(rx, ry)).await?;
                format!("moved cursor to ({x}, {y})")
            }
            DesktopAction::Type(text) => {
                self.retry.run("desktop.type", || backend.type_text(text)).await?;
                format!("typed {} characters", text.chars().count())
            }
            DesktopAction::Key(key) => {
                self.retry.run("desktop.key", || backend.press_key(key)).await?;
                format!("pressed {key}")
            }
            DesktopAction::Screenshot => {
                return Ok(self.capture_into(ToolResult::default()).await);
            }
            DesktopAction::GetPosition => {
                let (x, y) = self
                    .retry
                    .run("desktop.position", || backend.cursor_position())
                    .await?;
                return Ok(ToolResult::output(format!("{x},{y}")));
            }
        };

        tokio::time::sleep(self.settle_delay).await;
        Ok(self.capture_into(ToolResult::output(output)).await)
    }

    /// Attach a screenshot to `result`. A failed capture is reported on the
    /// result; the action itself already happened.
    async fn capture_into(&self, result: ToolResult) -> ToolResult {
        match self.capture().await {
            Ok(image) => result.with_image(image),
            Err(e) => {
                warn!(error = %e, "desktop screenshot failed");
                result.with_error(format!("screenshot failed: {e}"))
            }
        }
    }

    async fn capture(&self) -> Result<String> {
        let path = self.artifacts.next_path("desktop").await?;
        let backend = &self.backend;
        self.retry
            .run("desktop.capture", || backend.capture(&path))
            .await?;
        self.artifacts.load_base64(&path).await
    }
}

#[async_trait]
impl ToolAdapter for DesktopTool {
    fn describe(&self) -> ToolSpec {
        let (w, h) = self.target.unwrap_or(self.screen);
        ToolSpec {
            name: Self::NAME.into(),
            description: format!(
                "Control the local desktop ({w}x{h}). Clicks and moves take a position [x, y]; \
                 type and key take text. Every action except get_position returns a screenshot."
            ),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "action": {
                        "type": "string",
                        "enum": ["click", "move", "type", "key", "screenshot", "get_position"]
                    },
                    "position": {
                        "type": "array",
                        "items": { "type": "integer" },
                        "minItems": 2,
                        "maxItems": 2,
                        "description": "Screen coordinates [x, y]"
                    },
                    "text": {
                        "type": "string",
                        "description": "Text to type, or key name to press (e.g. return, esc)"
                    }
                },
                "required": ["action"]
            }),
        }
    }

    fn surface(&self) -> Surface {
        Surface::Desktop
    }

    async fn execute(&self, action: &str, args: &Map<String, Value>) -> Result<ToolResult> {
        let action = DesktopAction::parse(action, args)?;
        self.check(&action)?;
        debug!(?action, "desktop action");

        let result = self
            .coordinator
            .scoped_operation(Surface::Desktop, self.timeout, |_handle| self.perform(action))
            .await?;
        info!(summary = %result.summary(), "desktop action done");
        Ok(result)
    }
}
