use thiserror::Error;

use crate::surface::Surface;
use crate::tool::ToolError;

/// Unified error type for the Helm runtime.
///
/// `Tool` carries a declared, user-facing failure that the registry turns into
/// a [`ToolResult`](crate::ToolResult). Every other variant is a fault from the
/// point of view of the tool registry and propagates to the caller.
#[derive(Error, Debug)]
pub enum HelmError {
    // ── Declared tool errors ───────────────────────────────────
    #[error(transparent)]
    Tool(#[from] ToolError),

    // ── Device errors ──────────────────────────────────────────
    #[error("connection failed: {surface}: {reason}")]
    Connection { surface: Surface, reason: String },

    #[error("device backend failed: {surface}: {reason}")]
    Backend { surface: Surface, reason: String },

    #[error("operation timed out: {surface} after {secs:.1}s")]
    Timeout { surface: Surface, secs: f64 },

    // ── LLM errors ─────────────────────────────────────────────
    #[error("llm provider error: {0}")]
    LlmProvider(String),

    #[error("llm rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    // ── Config errors ──────────────────────────────────────────
    #[error("config error: {0}")]
    Config(String),

    // ── Generic wrappers ───────────────────────────────────────
    #[error("unexpected fault: {0}")]
    Unexpected(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl HelmError {
    /// Failures worth another attempt: lost connections and flaky device primitives.
    pub fn is_transient(&self) -> bool {
        matches!(self, HelmError::Connection { .. } | HelmError::Backend { .. })
    }

    /// Whether this is a declared tool error rather than a fault.
    pub fn is_declared(&self) -> bool {
        matches!(self, HelmError::Tool(_))
    }

    pub fn backend(surface: Surface, reason: impl Into<String>) -> Self {
        HelmError::Backend {
            surface,
            reason: reason.into(),
        }
    }

    pub fn connection(surface: Surface, reason: impl Into<String>) -> Self {
        HelmError::Connection {
            surface,
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, HelmError>;
