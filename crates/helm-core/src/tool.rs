use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::surface::Surface;

/// Description of a tool that can be called by the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSpec {
    /// Unique name the model uses to address the tool, e.g. "desktop".
    pub name: String,
    /// Human-readable description for the model.
    pub description: String,
    /// JSON Schema of the input object.
    pub input_schema: Value,
}

/// A request from the model to run a named tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionRequest {
    /// Provider-assigned id used to pair the request with its result.
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub parameters: Map<String, Value>,
}

impl ActionRequest {
    pub fn new(id: impl Into<String>, name: impl Into<String>, parameters: Map<String, Value>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            parameters,
        }
    }

    /// Build a request from an arbitrary JSON value. Non-object inputs become
    /// an empty parameter map.
    pub fn from_value(id: impl Into<String>, name: impl Into<String>, input: Value) -> Self {
        let parameters = match input {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Self::new(id, name, parameters)
    }

    /// The `action` parameter every device tool expects.
    pub fn action(&self) -> Option<&str> {
        self.parameters.get("action").and_then(Value::as_str)
    }
}

/// The outcome of running a tool.
///
/// Values are never mutated after construction; the `with_*` methods consume
/// the value and hand back a new one.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Base64-encoded PNG captured after the action.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    /// Extra system-facing context, e.g. which surface produced the result.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotation: Option<String>,
}

impl ToolResult {
    pub fn output(text: impl Into<String>) -> Self {
        Self {
            output: Some(text.into()),
            ..Default::default()
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            ..Default::default()
        }
    }

    pub fn image(base64_png: impl Into<String>) -> Self {
        Self {
            image: Some(base64_png.into()),
            ..Default::default()
        }
    }

    pub fn with_output(self, text: impl Into<String>) -> Self {
        Self {
            output: Some(text.into()),
            ..self
        }
    }

    pub fn with_error(self, message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            ..self
        }
    }

    pub fn with_image(self, base64_png: impl Into<String>) -> Self {
        Self {
            image: Some(base64_png.into()),
            ..self
        }
    }

    pub fn with_annotation(self, note: impl Into<String>) -> Self {
        Self {
            annotation: Some(note.into()),
            ..self
        }
    }

    /// True when no field carries content. Empty results are not rendered.
    pub fn is_empty(&self) -> bool {
        [&self.output, &self.error, &self.image, &self.annotation]
            .iter()
            .all(|f| f.as_deref().is_none_or(str::is_empty))
    }

    pub fn is_error(&self) -> bool {
        self.error.as_deref().is_some_and(|e| !e.is_empty())
    }

    /// Merge two results: fields missing here are taken from `other`,
    /// annotations are concatenated.
    pub fn combine(self, other: ToolResult) -> Self {
        let annotation = match (self.annotation, other.annotation) {
            (Some(a), Some(b)) => Some(format!("{a}\n{b}")),
            (a, b) => a.or(b),
        };
        Self {
            output: self.output.or(other.output),
            error: self.error.or(other.error),
            image: self.image.or(other.image),
            annotation,
        }
    }

    /// Decode the captured image, if any.
    pub fn image_bytes(&self) -> Option<Vec<u8>> {
        use base64::Engine;
        let data = self.image.as_deref()?;
        base64::engine::general_purpose::STANDARD.decode(data).ok()
    }

    /// Short human-readable rendering for logs and terminals.
    pub fn summary(&self) -> String {
        if let Some(ref e) = self.error {
            return format!("error: {e}");
        }
        let mut parts = Vec::new();
        if let Some(ref o) = self.output {
            parts.push(o.clone());
        }
        if let Some(ref img) = self.image {
            parts.push(format!("[image: {} base64 chars]", img.len()));
        }
        parts.join(" ")
    }
}

/// Declared, user-facing tool failures. These never abort a conversation turn.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ToolError {
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    /// A safety check rejected the input. Never retried.
    #[error("unsafe input: {0}")]
    Unsafe(String),

    #[error("unknown action '{action}' for tool '{tool}'")]
    UnknownAction { tool: String, action: String },

    #[error("{surface} device unavailable: {reason}")]
    DeviceUnavailable { surface: Surface, reason: String },

    #[error("connection error: {0}")]
    Connection(String),

    #[error("{surface} operation timed out")]
    TimedOut { surface: Surface },
}

/// A capability the model can invoke, one per controlled surface.
#[async_trait]
pub trait ToolAdapter: Send + Sync {
    /// Name and input schema advertised to the model.
    fn describe(&self) -> ToolSpec;

    /// The surface this adapter acts on.
    fn surface(&self) -> Surface;

    /// Run `action` with `args`.
    ///
    /// Declared failures come back as `HelmError::Tool`; anything else is an
    /// unexpected fault.
    async fn execute(&self, action: &str, args: &Map<String, Value>) -> crate::Result<ToolResult>;
}
