use async_trait::async_trait;
use helm_core::{ActionRequest, ConversationMessage, HelmError, MessageContent, Result, Role, ToolResult};
use reqwest::Client;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tracing::debug;

use crate::provider::*;

const API_VERSION: &str = "2023-06-01";

/// Anthropic Messages API, streamed over SSE.
pub struct AnthropicStream {
    client: Client,
    api_key: String,
    base_url: String,
}

/// Assistant blocks and tool results produced by one model turn.
#[derive(Default)]
struct TurnGroup {
    turn: u32,
    assistant: Vec<Value>,
    results: Vec<Value>,
}

impl TurnGroup {
    fn flush_into(self, out: &mut Vec<Value>) {
        if !self.assistant.is_empty() {
            out.push(json!({ "role": "assistant", "content": self.assistant }));
        }
        if !self.results.is_empty() {
            out.push(json!({ "role": "user", "content": self.results }));
        }
    }
}

impl AnthropicStream {
    pub fn new(api_key: String) -> Self {
        Self {
            client: Client::new(),
            api_key,
            base_url: "https://api.anthropic.com/v1".into(),
        }
    }

    pub fn with_base_url(mut self, url: String) -> Self {
        self.base_url = url;
        self
    }

    fn tool_result_block(call: &ActionRequest, result: &ToolResult) -> Value {
        let mut content = Vec::new();
        let text = result
            .error
            .as_deref()
            .or(result.output.as_deref())
            .unwrap_or_default();
        if !text.is_empty() {
            content.push(json!({ "type": "text", "text": text }));
        }
        if let Some(ref note) = result.annotation {
            content.push(json!({ "type": "text", "text": note }));
        }
        if let Some(ref image) = result.image {
            content.push(json!({
                "type": "image",
                "source": { "type": "base64", "media_type": "image/png", "data": image },
            }));
        }
        json!({
            "type": "tool_result",
            "tool_use_id": call.id,
            "content": content,
            "is_error": result.is_error(),
        })
    }

    /// Map the append-only history onto the wire format.
    ///
    /// Assistant text and tool messages of the same turn become one assistant
    /// message (text + tool_use blocks) followed by one user message carrying
    /// the tool_result blocks.
    pub fn build_messages(history: &[ConversationMessage]) -> Vec<Value> {
        let mut out = Vec::new();
        let mut group: Option<TurnGroup> = None;

        for msg in history {
            match (&msg.role, &msg.content) {
                (Role::User, MessageContent::Text { text }) => {
                    if let Some(g) = group.take() {
                        g.flush_into(&mut out);
                    }
                    out.push(json!({ "role": "user", "content": text }));
                }
                (_, content) => {
                    let g = match group.take() {
                        Some(g) if g.turn == msg.turn => g,
                        Some(g) => {
                            g.flush_into(&mut out);
                            TurnGroup {
                                turn: msg.turn,
                                ..Default::default()
                            }
                        }
                        None => TurnGroup {
                            turn: msg.turn,
                            ..Default::default()
                        },
                    };
                    let mut g = g;
                    match content {
                        MessageContent::Text { text } => {
                            // Text goes ahead of the tool_use blocks it preceded.
                            let pos = g
                                .assistant
                                .iter()
                                .take_while(|b| b["type"] == "text")
                                .count();
                            g.assistant.insert(pos, json!({ "type": "text", "text": text }));
                        }
                        MessageContent::ToolResult { call, result } => {
                            g.assistant.push(json!({
                                "type": "tool_use",
                                "id": call.id,
                                "name": call.name,
                                "input": Value::Object(call.parameters.clone()),
                            }));
                            g.results.push(Self::tool_result_block(call, result));
                        }
                    }
                    group = Some(g);
                }
            }
        }
        if let Some(g) = group.take() {
            g.flush_into(&mut out);
        }
        out
    }

    fn build_request_body(&self, request: &StreamRequest) -> Value {
        let mut body = json!({
            "model": &request.model,
            "max_tokens": request.max_tokens,
            "messages": Self::build_messages(&request.messages),
            "stream": true,
        });

        if let Some(ref system) = request.system {
            body["system"] = json!(system);
        }

        if !request.tools.is_empty() {
            let tools: Vec<Value> = request
                .tools
                .iter()
                .map(|t| {
                    json!({
                        "name": t.name,
                        "description": t.description,
                        "input_schema": t.input_schema,
                    })
                })
                .collect();
            body["tools"] = json!(tools);
        }

        body
    }
}

fn parse_stop_reason(s: &str) -> StopReason {
    match s {
        "tool_use" => StopReason::ToolUse,
        "max_tokens" => StopReason::MaxTokens,
        "stop_sequence" => StopReason::StopSequence,
        _ => StopReason::EndTurn,
    }
}

#[async_trait]
impl ModelStream for AnthropicStream {
    fn name(&self) -> &str {
        "anthropic"
    }

    async fn open_stream(&self, request: &StreamRequest) -> Result<mpsc::Receiver<StreamChunk>> {
        if self.api_key.is_empty() {
            return Err(HelmError::LlmProvider("ANTHROPIC_API_KEY not set".into()));
        }

        let body = self.build_request_body(request);
        debug!(model = %request.model, messages = request.messages.len(), "opening Anthropic stream");

        let resp = self
            .client
            .post(format!("{}/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| HelmError::LlmProvider(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            if status.as_u16() == 429 {
                return Err(HelmError::RateLimited {
                    retry_after_secs: 30,
                });
            }
            return Err(HelmError::LlmProvider(format!("HTTP {status}: {text}")));
        }

        let (tx, rx) = mpsc::channel(256);

        tokio::spawn(async move {
            use futures::StreamExt;
            let mut stream = resp.bytes_stream();
            let mut buffer = String::new();
            let mut tool_id = String::new();
            let mut tool_name = String::new();
            let mut tool_input = String::new();
            let mut in_tool_input = false;
            let mut usage = Usage::default();
            let mut stop_reason = StopReason::EndTurn;
            let mut saw_tool_use = false;

            while let Some(chunk) = stream.next().await {
                let bytes = match chunk {
                    Ok(b) => b,
                    Err(e) => {
                        let _ = tx.send(StreamChunk::Error(e.to_string())).await;
                        return;
                    }
                };
                buffer.push_str(&String::from_utf8_lossy(&bytes));

                while let Some(newline) = buffer.find('\n') {
                    let line = buffer[..newline].trim().to_string();
                    buffer.drain(..=newline);

                    let Some(data) = line.strip_prefix("data: ") else {
                        continue;
                    };
                    let Ok(event) = serde_json::from_str::<Value>(data) else {
                        continue;
                    };

                    match event["type"].as_str() {
                        Some("message_start") => {
                            if let Some(it) = event["message"]["usage"]["input_tokens"].as_u64() {
                                usage.input_tokens = it as u32;
                            }
                        }
                        Some("content_block_start") => {
                            let cb = &event["content_block"];
                            if cb["type"] == "tool_use" {
                                tool_id = cb["id"].as_str().unwrap_or_default().to_string();
                                tool_name = cb["name"].as_str().unwrap_or_default().to_string();
                                tool_input.clear();
                                in_tool_input = true;
                            }
                        }
                        Some("content_block_delta") => {
                            let delta = &event["delta"];
                            match delta["type"].as_str() {
                                Some("text_delta") => {
                                    if let Some(text) = delta["text"].as_str() {
                                        let _ = tx.send(StreamChunk::TextDelta(text.to_string())).await;
                                    }
                                }
                                Some("input_json_delta") => {
                                    if let Some(partial) = delta["partial_json"].as_str() {
                                        tool_input.push_str(partial);
                                    }
                                }
                                _ => {}
                            }
                        }
                        Some("content_block_stop") if in_tool_input => {
                            let input: Value = if tool_input.trim().is_empty() {
                                json!({})
                            } else {
                                serde_json::from_str(&tool_input).unwrap_or_default()
                            };
                            let call = ActionRequest::from_value(tool_id.clone(), tool_name.clone(), input);
                            let _ = tx.send(StreamChunk::ToolUse(call)).await;
                            saw_tool_use = true;
                            in_tool_input = false;
                        }
                        Some("message_delta") => {
                            if let Some(sr) = event["delta"]["stop_reason"].as_str() {
                                stop_reason = parse_stop_reason(sr);
                            }
                            if let Some(ot) = event["usage"]["output_tokens"].as_u64() {
                                usage.output_tokens = ot as u32;
                            }
                        }
                        Some("message_stop") => {
                            let _ = tx.send(StreamChunk::Usage(usage.clone())).await;
                            let final_stop = if saw_tool_use {
                                StopReason::ToolUse
                            } else {
                                stop_reason
                            };
                            let _ = tx.send(StreamChunk::Done(final_stop)).await;
                            return;
                        }
                        Some("error") => {
                            let msg = event["error"]["message"].as_str().unwrap_or("unknown error");
                            let _ = tx.send(StreamChunk::Error(msg.to_string())).await;
                            return;
                        }
                        _ => {}
                    }
                }
            }
            let _ = tx.send(StreamChunk::Done(stop_reason)).await;
        });

        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use helm_core::ToolSpec;

    fn call(id: &str) -> ActionRequest {
        ActionRequest::from_value(id, "desktop", json!({"action": "screenshot"}))
    }

    #[test]
    fn test_plain_exchange() {
        let history = vec![
            ConversationMessage::user("hi", 0),
            ConversationMessage::assistant("hello", 0),
        ];
        let wire = AnthropicStream::build_messages(&history);
        assert_eq!(wire.len(), 2);
        assert_eq!(wire[0]["role"], "user");
        assert_eq!(wire[1]["role"], "assistant");
        assert_eq!(wire[1]["content"][0]["text"], "hello");
    }

    #[test]
    fn test_tool_turn_is_grouped() {
        let history = vec![
            ConversationMessage::user("take a screenshot", 0),
            ConversationMessage::tool(call("tu_1"), ToolResult::image("aW1n"), 0),
            ConversationMessage::assistant("Here it is.", 0),
            ConversationMessage::assistant("Looks like a desktop.", 1),
        ];
        let wire = AnthropicStream::build_messages(&history);
        assert_eq!(wire.len(), 4);

        let assistant = &wire[1];
        assert_eq!(assistant["role"], "assistant");
        assert_eq!(assistant["content"][0]["type"], "text");
        assert_eq!(assistant["content"][1]["type"], "tool_use");
        assert_eq!(assistant["content"][1]["id"], "tu_1");

        let results = &wire[2];
        assert_eq!(results["role"], "user");
        assert_eq!(results["content"][0]["type"], "tool_result");
        assert_eq!(results["content"][0]["tool_use_id"], "tu_1");
        assert_eq!(results["content"][0]["content"][0]["type"], "image");
        assert_eq!(results["content"][0]["is_error"], false);

        assert_eq!(wire[3]["role"], "assistant");
    }

    #[test]
    fn test_error_result_is_flagged() {
        let history = vec![
            ConversationMessage::user("type it", 0),
            ConversationMessage::tool(call("tu_9"), ToolResult::failure("unsafe input"), 0),
        ];
        let wire = AnthropicStream::build_messages(&history);
        let block = &wire[2]["content"][0];
        assert_eq!(block["is_error"], true);
        assert_eq!(block["content"][0]["text"], "unsafe input");
    }

    #[test]
    fn test_request_body_includes_tools_and_system() {
        let provider = AnthropicStream::new("key".into());
        let request = StreamRequest {
            model: "claude-test".into(),
            system: Some("be careful".into()),
            messages: vec![ConversationMessage::user("hi", 0)],
            tools: vec![ToolSpec {
                name: "desktop".into(),
                description: "control the desktop".into(),
                input_schema: json!({"type": "object"}),
            }],
            max_tokens: 1024,
        };
        let body = provider.build_request_body(&request);
        assert_eq!(body["stream"], true);
        assert_eq!(body["system"], "be careful");
        assert_eq!(body["tools"][0]["name"], "desktop");
        assert_eq!(body["max_tokens"], 1024);
    }

    #[tokio::test]
    async fn test_missing_key_fails_before_any_request() {
        let provider = AnthropicStream::new(String::new());
        let request = StreamRequest {
            model: "m".into(),
            system: None,
            messages: vec![],
            tools: vec![],
            max_tokens: 1,
        };
        assert!(provider.open_stream(&request).await.is_err());
    }
}
