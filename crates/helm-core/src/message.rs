use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::tool::{ActionRequest, ToolResult};

/// A single entry in the conversation history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationMessage {
    pub id: Uuid,
    pub role: Role,
    pub content: MessageContent,
    /// Index of the model turn this message belongs to. User messages carry
    /// the index of the turn they open.
    pub turn: u32,
    pub timestamp: DateTime<Utc>,
}

/// Who produced a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    Tool,
}

/// Message payload: plain text, or the structured outcome of a tool call.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageContent {
    Text {
        text: String,
    },
    ToolResult {
        /// The request that produced this result.
        call: ActionRequest,
        result: ToolResult,
    },
}

impl ConversationMessage {
    fn new(role: Role, content: MessageContent, turn: u32) -> Self {
        Self {
            id: Uuid::new_v4(),
            role,
            content,
            turn,
            timestamp: Utc::now(),
        }
    }

    pub fn user(text: impl Into<String>, turn: u32) -> Self {
        Self::new(Role::User, MessageContent::Text { text: text.into() }, turn)
    }

    pub fn assistant(text: impl Into<String>, turn: u32) -> Self {
        Self::new(Role::Assistant, MessageContent::Text { text: text.into() }, turn)
    }

    pub fn tool(call: ActionRequest, result: ToolResult, turn: u32) -> Self {
        Self::new(Role::Tool, MessageContent::ToolResult { call, result }, turn)
    }

    /// Text content, or `None` for tool messages.
    pub fn text(&self) -> Option<&str> {
        match &self.content {
            MessageContent::Text { text } => Some(text),
            MessageContent::ToolResult { .. } => None,
        }
    }

    /// Tool result payload, or `None` for text messages.
    pub fn tool_result(&self) -> Option<&ToolResult> {
        match &self.content {
            MessageContent::ToolResult { result, .. } => Some(result),
            MessageContent::Text { .. } => None,
        }
    }
}
