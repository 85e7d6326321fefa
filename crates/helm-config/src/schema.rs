use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Root configuration, read from `helm.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HelmConfig {
    pub agent: AgentConfig,
    pub screen: ScreenConfig,
    pub mobile: MobileConfig,
    pub retry: RetryConfig,
    pub safety: SafetyConfig,
    pub storage: StorageConfig,
    pub logging: LoggingConfig,
    pub services: ServicesConfig,
}

// ── Agent ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Model identifier sent to the provider.
    pub model: String,
    /// Maximum tokens per model turn.
    pub max_tokens: u32,
    /// Replaces the built-in system prompt when set.
    pub system_prompt: Option<String>,
    /// Maximum model turns per user message before the loop stops.
    pub max_turns: u32,
    /// Deadline for a single device operation, in seconds. 0 = no deadline.
    pub tool_timeout_secs: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            model: "claude-sonnet-4-20250514".into(),
            max_tokens: 4096,
            system_prompt: None,
            max_turns: 10,
            tool_timeout_secs: 30,
        }
    }
}

// ── Screen ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScreenConfig {
    /// Logical screen width in pixels. Positions outside are rejected.
    pub width: u32,
    /// Logical screen height in pixels.
    pub height: u32,
    /// Resolution the model sees: "none", "xga", "wxga" or "fwxga".
    pub scaling_target: String,
    /// Pause between a physical action and the screenshot that follows it.
    pub settle_delay_ms: u64,
}

impl Default for ScreenConfig {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 800,
            scaling_target: "none".into(),
            settle_delay_ms: 500,
        }
    }
}

pub const SCALING_TARGETS: [&str; 4] = ["none", "xga", "wxga", "fwxga"];

impl ScreenConfig {
    /// Resolution of the configured scaling target, if scaling is enabled.
    pub fn target_resolution(&self) -> Option<(u32, u32)> {
        match self.scaling_target.to_ascii_lowercase().as_str() {
            "xga" => Some((1024, 768)),
            "wxga" => Some((1280, 800)),
            "fwxga" => Some((1366, 768)),
            _ => None,
        }
    }
}

// ── Mobile ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MobileConfig {
    /// Register the mobile tool and its connector.
    pub enabled: bool,
    /// Device UDID. None = let the automation server pick.
    pub device_id: Option<String>,
    pub platform: String,
    pub automation_name: String,
    pub device_name: String,
    /// Base URL of the automation server.
    pub server_url: String,
    /// Spawn `appium` on first connect instead of expecting it to be running.
    pub spawn_server: bool,
    /// How long to wait for a spawned server before creating a session.
    pub server_startup_secs: u64,
}

impl Default for MobileConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            device_id: None,
            platform: "iOS".into(),
            automation_name: "XCUITest".into(),
            device_name: "iPhone Simulator".into(),
            server_url: "http://127.0.0.1:4723".into(),
            spawn_server: true,
            server_startup_secs: 5,
        }
    }
}

// ── Retry ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    /// Delay between attempts (the base delay when backoff is exponential).
    pub delay_ms: u64,
    /// "fixed" or "exponential".
    pub backoff: String,
    /// Cap for exponential backoff.
    pub max_delay_ms: Option<u64>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay_ms: 1000,
            backoff: "fixed".into(),
            max_delay_ms: None,
        }
    }
}

// ── Safety ─────────────────────────────────────────────────────

/// A rectangle in screen coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    pub x: i64,
    pub y: i64,
    pub width: i64,
    pub height: i64,
}

impl Region {
    /// Inclusive on every edge.
    pub fn contains(&self, x: i64, y: i64) -> bool {
        self.x <= x && x <= self.x + self.width && self.y <= y && y <= self.y + self.height
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SafetyConfig {
    /// Substrings that make typed text unsafe (matched case-insensitively).
    pub denied_patterns: Vec<String>,
    /// Screen areas that must never be clicked.
    pub sensitive_regions: Vec<Region>,
}

pub const DEFAULT_DENIED_PATTERNS: [&str; 6] = ["sudo", "rm -rf", "mkfs", "dd", ">", "|"];

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            denied_patterns: DEFAULT_DENIED_PATTERNS.iter().map(|s| s.to_string()).collect(),
            sensitive_regions: vec![],
        }
    }
}

// ── Storage ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Where captured screenshots are written.
    pub artifact_dir: PathBuf,
    /// Artifacts older than this are removed by cleanup.
    pub max_artifact_age_secs: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            artifact_dir: dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("/tmp"))
                .join(".helm")
                .join("artifacts"),
            max_artifact_age_secs: 3600,
        }
    }
}

// ── Logging ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    pub level: String,
    /// Output format: "pretty", "json", "compact".
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "pretty".into(),
        }
    }
}

// ── Services ───────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServicesConfig {
    /// Anthropic API key. Falls back to ANTHROPIC_API_KEY.
    pub anthropic_api_key: Option<String>,
    /// Model API provider. Only "anthropic" has a built-in transport.
    pub api_provider: String,
    /// Override for the provider base URL (proxies, gateways).
    pub base_url: Option<String>,
}

impl Default for ServicesConfig {
    fn default() -> Self {
        Self {
            anthropic_api_key: None,
            api_provider: "anthropic".into(),
            base_url: None,
        }
    }
}

// ── Validation ─────────────────────────────────────────────────

/// A single config validation issue.
#[derive(Debug)]
pub struct ConfigWarning {
    pub field: String,
    pub message: String,
    pub severity: WarningSeverity,
    pub hint: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarningSeverity {
    Error,
    Warning,
    Info,
}

impl std::fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let icon = match self.severity {
            WarningSeverity::Error => "❌",
            WarningSeverity::Warning => "⚠️ ",
            WarningSeverity::Info => "💡",
        };
        write!(f, "{} {}: {}", icon, self.field, self.message)?;
        if let Some(ref h) = self.hint {
            write!(f, "\n   ↳ {}", h)?;
        }
        Ok(())
    }
}

impl HelmConfig {
    /// Validate the config and return a list of warnings.
    /// Returns `Err` with all messages joined if any severity is Error.
    pub fn validate(&self) -> Result<Vec<ConfigWarning>, String> {
        let mut warnings = Vec::new();

        // ── Model ───
        if self.agent.model.trim().is_empty() {
            warnings.push(ConfigWarning {
                field: "agent.model".into(),
                message: "model is empty".into(),
                severity: WarningSeverity::Error,
                hint: Some("Set to e.g. 'claude-sonnet-4-20250514'".into()),
            });
        }

        if self.agent.max_tokens == 0 {
            warnings.push(ConfigWarning {
                field: "agent.max_tokens".into(),
                message: "max_tokens is 0, the model won't produce output".into(),
                severity: WarningSeverity::Error,
                hint: Some("Set to e.g. 4096".into()),
            });
        }

        if self.agent.max_turns == 0 {
            warnings.push(ConfigWarning {
                field: "agent.max_turns".into(),
                message: "max_turns is 0, no model turn will run".into(),
                severity: WarningSeverity::Error,
                hint: None,
            });
        }

        // ── API key ───
        if self.services.api_provider != "anthropic" {
            warnings.push(ConfigWarning {
                field: "services.api_provider".into(),
                message: format!("invalid API provider '{}'", self.services.api_provider),
                severity: WarningSeverity::Error,
                hint: Some("Only 'anthropic' has a built-in transport".into()),
            });
        } else if self.services.anthropic_api_key.is_none() {
            warnings.push(ConfigWarning {
                field: "services.anthropic_api_key".into(),
                message: "no API key configured".into(),
                severity: WarningSeverity::Warning,
                hint: Some("Set ANTHROPIC_API_KEY or add it under [services]".into()),
            });
        }

        // ── Screen ───
        if self.screen.width == 0 || self.screen.height == 0 {
            warnings.push(ConfigWarning {
                field: "screen".into(),
                message: "screen dimensions must be positive integers".into(),
                severity: WarningSeverity::Error,
                hint: Some("e.g. width = 1280, height = 800".into()),
            });
        }

        let target = self.screen.scaling_target.to_ascii_lowercase();
        if !SCALING_TARGETS.contains(&target.as_str()) {
            warnings.push(ConfigWarning {
                field: "screen.scaling_target".into(),
                message: format!("unknown scaling target '{}'", self.screen.scaling_target),
                severity: WarningSeverity::Error,
                hint: Some(format!("Valid values: {}", SCALING_TARGETS.join(", "))),
            });
        }

        // ── Retry ───
        if self.retry.max_attempts == 0 {
            warnings.push(ConfigWarning {
                field: "retry.max_attempts".into(),
                message: "max_attempts must be at least 1".into(),
                severity: WarningSeverity::Error,
                hint: None,
            });
        }

        match self.retry.backoff.as_str() {
            "fixed" => {}
            "exponential" => {
                if self.retry.max_delay_ms.is_none() {
                    warnings.push(ConfigWarning {
                        field: "retry.max_delay_ms".into(),
                        message: "exponential backoff without a cap".into(),
                        severity: WarningSeverity::Warning,
                        hint: Some("Set max_delay_ms to bound the wait between attempts".into()),
                    });
                }
            }
            other => {
                warnings.push(ConfigWarning {
                    field: "retry.backoff".into(),
                    message: format!("unknown backoff '{other}'"),
                    severity: WarningSeverity::Error,
                    hint: Some("Valid values: fixed, exponential".into()),
                });
            }
        }

        // ── Safety ───
        if self.safety.denied_patterns.iter().any(|p| p.is_empty()) {
            warnings.push(ConfigWarning {
                field: "safety.denied_patterns".into(),
                message: "empty pattern matches every input".into(),
                severity: WarningSeverity::Error,
                hint: Some("Remove the empty string from the list".into()),
            });
        }

        // ── Mobile ───
        if self.mobile.enabled && self.mobile.device_id.is_none() {
            warnings.push(ConfigWarning {
                field: "mobile.device_id".into(),
                message: "no device id; the automation server picks a device".into(),
                severity: WarningSeverity::Info,
                hint: None,
            });
        }

        // ── Logging ───
        let valid_formats = ["pretty", "json", "compact"];
        if !valid_formats.contains(&self.logging.format.as_str()) {
            warnings.push(ConfigWarning {
                field: "logging.format".into(),
                message: format!("unknown log format '{}'", self.logging.format),
                severity: WarningSeverity::Warning,
                hint: Some(format!("Valid values: {}", valid_formats.join(", "))),
            });
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            warnings.push(ConfigWarning {
                field: "logging.level".into(),
                message: format!("unknown log level '{}'", self.logging.level),
                severity: WarningSeverity::Warning,
                hint: Some(format!("Valid values: {}", valid_levels.join(", "))),
            });
        }

        let errors: Vec<String> = warnings
            .iter()
            .filter(|w| w.severity == WarningSeverity::Error)
            .map(|w| format!("{}: {}", w.field, w.message))
            .collect();

        if !errors.is_empty() {
            return Err(format!("Configuration errors:\n  • {}", errors.join("\n  • ")));
        }

        Ok(warnings)
    }
}
