//! Mock model for deterministic testing.
//!
//! Replays scripted turns without making any HTTP calls.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::provider::*;
use helm_core::{ActionRequest, HelmError, Result};

/// A model that streams pre-configured turns.
///
/// # Example
/// ```
/// use helm_llm::mock::MockModel;
/// let model = MockModel::new()
///     .with_tool_use("desktop", serde_json::json!({"action": "screenshot"}))
///     .with_text("Done.");
/// ```
#[derive(Default)]
pub struct MockModel {
    turns: Arc<Mutex<Vec<MockTurn>>>,
    /// Every request received, for assertions in tests.
    requests: Arc<Mutex<Vec<StreamRequest>>>,
}

/// One scripted model turn.
#[derive(Debug, Clone, Default)]
pub struct MockTurn {
    pub text: String,
    pub tool_calls: Vec<ActionRequest>,
    /// Sent as a mid-stream `Error` chunk after the text.
    pub stream_error: Option<String>,
    /// Returned from `open_stream` before anything is streamed.
    pub open_error: Option<String>,
}

impl MockTurn {
    pub fn text(text: &str) -> Self {
        Self {
            text: text.to_string(),
            ..Default::default()
        }
    }

    pub fn with_tool_use(mut self, name: &str, input: serde_json::Value) -> Self {
        self.tool_calls.push(ActionRequest::from_value(
            format!("toolu_{}", uuid::Uuid::new_v4().simple()),
            name,
            input,
        ));
        self
    }
}

impl MockModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a turn that only streams text.
    pub fn with_text(self, text: &str) -> Self {
        self.with_turn(MockTurn::text(text))
    }

    /// Queue a turn that requests a single tool call.
    pub fn with_tool_use(self, name: &str, input: serde_json::Value) -> Self {
        self.with_turn(MockTurn::default().with_tool_use(name, input))
    }

    /// Queue a turn that streams `partial` and then fails mid-stream.
    pub fn with_stream_error(self, partial: &str, error: &str) -> Self {
        self.with_turn(MockTurn {
            text: partial.to_string(),
            stream_error: Some(error.to_string()),
            ..Default::default()
        })
    }

    /// Queue a turn whose stream cannot be opened.
    pub fn with_error(self, error: &str) -> Self {
        self.with_turn(MockTurn {
            open_error: Some(error.to_string()),
            ..Default::default()
        })
    }

    pub fn with_turn(self, turn: MockTurn) -> Self {
        self.turns.lock().push(turn);
        self
    }

    /// Requests received so far.
    pub fn requests(&self) -> Vec<StreamRequest> {
        self.requests.lock().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().len()
    }

    fn next_turn(&self) -> MockTurn {
        let mut turns = self.turns.lock();
        if turns.is_empty() {
            MockTurn::text("(mock: no more scripted turns)")
        } else {
            turns.remove(0)
        }
    }
}

#[async_trait]
impl ModelStream for MockModel {
    fn name(&self) -> &str {
        "mock"
    }

    async fn open_stream(&self, request: &StreamRequest) -> Result<mpsc::Receiver<StreamChunk>> {
        self.requests.lock().push(request.clone());
        let turn = self.next_turn();

        if let Some(err) = turn.open_error {
            return Err(HelmError::LlmProvider(err));
        }

        let (tx, rx) = mpsc::channel(64);
        tokio::spawn(async move {
            // Word-by-word, keeping the separating whitespace.
            let mut rest = turn.text.as_str();
            while !rest.is_empty() {
                let end = rest
                    .char_indices()
                    .skip_while(|(_, c)| c.is_whitespace())
                    .find(|(_, c)| c.is_whitespace())
                    .map(|(i, _)| i)
                    .unwrap_or(rest.len());
                let (word, tail) = rest.split_at(end);
                if tx.send(StreamChunk::TextDelta(word.to_string())).await.is_err() {
                    return;
                }
                rest = tail;
            }

            if let Some(err) = turn.stream_error {
                let _ = tx.send(StreamChunk::Error(err)).await;
                return;
            }

            let stop = if turn.tool_calls.is_empty() {
                StopReason::EndTurn
            } else {
                StopReason::ToolUse
            };
            for call in turn.tool_calls {
                let _ = tx.send(StreamChunk::ToolUse(call)).await;
            }
            let _ = tx
                .send(StreamChunk::Usage(Usage {
                    input_tokens: 100,
                    output_tokens: 50,
                }))
                .await;
            let _ = tx.send(StreamChunk::Done(stop)).await;
        });

        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request() -> StreamRequest {
        StreamRequest {
            model: "mock".into(),
            system: None,
            messages: vec![helm_core::ConversationMessage::user("hi", 0)],
            tools: vec![],
            max_tokens: 100,
        }
    }

    async fn drain(mut rx: mpsc::Receiver<StreamChunk>) -> Vec<StreamChunk> {
        let mut out = Vec::new();
        while let Some(c) = rx.recv().await {
            out.push(c);
        }
        out
    }

    #[tokio::test]
    async fn test_text_is_streamed_in_pieces() {
        let model = MockModel::new().with_text("hello there world");
        let chunks = drain(model.open_stream(&request()).await.unwrap()).await;

        let text: Vec<String> = chunks
            .iter()
            .filter_map(|c| match c {
                StreamChunk::TextDelta(t) => Some(t.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(text.len(), 3);
        assert_eq!(text.concat(), "hello there world");
        assert!(matches!(chunks.last(), Some(StreamChunk::Done(StopReason::EndTurn))));
    }

    #[tokio::test]
    async fn test_tool_use_turn() {
        let model = MockModel::new().with_tool_use("desktop", json!({"action": "screenshot"}));
        let chunks = drain(model.open_stream(&request()).await.unwrap()).await;
        let call = chunks.iter().find_map(|c| match c {
            StreamChunk::ToolUse(call) => Some(call.clone()),
            _ => None,
        });
        let call = call.unwrap();
        assert_eq!(call.name, "desktop");
        assert_eq!(call.action(), Some("screenshot"));
        assert!(matches!(chunks.last(), Some(StreamChunk::Done(StopReason::ToolUse))));
    }

    #[tokio::test]
    async fn test_errors_and_recording() {
        let model = MockModel::new()
            .with_error("boom")
            .with_stream_error("partial", "connection reset");

        assert!(model.open_stream(&request()).await.is_err());

        let chunks = drain(model.open_stream(&request()).await.unwrap()).await;
        assert!(matches!(chunks.last(), Some(StreamChunk::Error(e)) if e == "connection reset"));
        assert_eq!(model.request_count(), 2);
    }

    #[tokio::test]
    async fn test_exhausted_script_falls_back() {
        let model = MockModel::new();
        let chunks = drain(model.open_stream(&request()).await.unwrap()).await;
        assert!(chunks
            .iter()
            .any(|c| matches!(c, StreamChunk::TextDelta(t) if t.contains("mock"))));
    }
}
