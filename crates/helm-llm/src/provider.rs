use async_trait::async_trait;
use helm_core::{ActionRequest, ConversationMessage, Result, ToolSpec};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Everything the model needs for one turn.
#[derive(Debug, Clone)]
pub struct StreamRequest {
    pub model: String,
    /// System prompt, sent separately from the history.
    pub system: Option<String>,
    /// Full conversation history so far.
    pub messages: Vec<ConversationMessage>,
    /// Capability list of the registered tools.
    pub tools: Vec<ToolSpec>,
    pub max_tokens: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    EndTurn,
    ToolUse,
    MaxTokens,
    StopSequence,
}

/// One event from a model stream.
#[derive(Debug, Clone)]
pub enum StreamChunk {
    /// Assistant text delta.
    TextDelta(String),
    /// The model wants a tool run.
    ToolUse(ActionRequest),
    /// Usage stats, sent near the end of the stream.
    Usage(Usage),
    /// Stream is done.
    Done(StopReason),
    /// Transport or provider failure mid-stream.
    Error(String),
}

/// Token usage statistics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

impl Usage {
    pub fn total_tokens(&self) -> u32 {
        self.input_tokens + self.output_tokens
    }

    pub fn merge(&mut self, other: &Usage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
    }
}

/// The model collaborator: opens one streamed turn at a time.
#[async_trait]
pub trait ModelStream: Send + Sync {
    /// Human-readable name, e.g. "anthropic".
    fn name(&self) -> &str;

    /// Open a stream for `request`. The receiver closes after `Done` or `Error`.
    async fn open_stream(&self, request: &StreamRequest) -> Result<mpsc::Receiver<StreamChunk>>;
}
