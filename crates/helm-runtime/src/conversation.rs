//! The streaming conversation loop.
//!
//! `send` drives `Idle -> Streaming -> (ToolPending -> Streaming)* -> Idle`.
//! Each model turn is one stream. Tool calls are dispatched as they arrive,
//! so a single turn may run several tools before its stream ends; the loop
//! then opens another turn with the results, until the model stops asking
//! for tools or the turn limit is hit.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::observer::ConversationObserver;
use crate::registry::ToolRegistry;
use helm_config::AgentConfig;
use helm_core::{ConversationMessage, Event, EventBus, HelmError, Result};
use helm_llm::{ModelStream, StreamChunk, StreamRequest};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopPhase {
    Idle,
    Streaming,
    ToolPending,
}

/// What one `send` produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TurnSummary {
    /// Model turns (streams) opened.
    pub turns: u32,
    pub tool_calls: usize,
    /// All assistant text, turns separated by a blank line.
    pub text: String,
}

pub struct ConversationLoop {
    model: Arc<dyn ModelStream>,
    registry: Arc<ToolRegistry>,
    config: AgentConfig,
    system_prompt: String,
    history: Vec<ConversationMessage>,
    phase: LoopPhase,
    /// Turn index handed to the next model turn; never reused.
    next_turn: u32,
    events: EventBus,
}

impl ConversationLoop {
    pub fn new(
        model: Arc<dyn ModelStream>,
        registry: Arc<ToolRegistry>,
        config: AgentConfig,
        system_prompt: String,
        events: EventBus,
    ) -> Self {
        Self {
            model,
            registry,
            config,
            system_prompt,
            history: Vec::new(),
            phase: LoopPhase::Idle,
            next_turn: 0,
            events,
        }
    }

    pub fn phase(&self) -> LoopPhase {
        self.phase
    }

    pub fn history(&self) -> &[ConversationMessage] {
        &self.history
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    /// Forget the conversation so far.
    pub fn clear(&mut self) {
        self.history.clear();
        self.next_turn = 0;
    }

    /// Send a user message and run model turns until the model is done.
    ///
    /// On a fault the history built so far is kept, including any partial
    /// assistant text, the observer's `on_error` is called and the fault is
    /// returned.
    pub async fn send(
        &mut self,
        user_text: &str,
        observer: &dyn ConversationObserver,
    ) -> Result<TurnSummary> {
        self.history
            .push(ConversationMessage::user(user_text, self.next_turn));

        let mut summary = TurnSummary::default();
        let outcome = self.run_turns(observer, &mut summary).await;
        self.phase = LoopPhase::Idle;

        match outcome {
            Ok(()) => {
                info!(
                    turns = summary.turns,
                    tool_calls = summary.tool_calls,
                    "exchange complete"
                );
                Ok(summary)
            }
            Err(e) => {
                warn!(error = %e, history = self.history.len(), "exchange aborted");
                self.events.publish(Event::TurnAborted {
                    turn: self.next_turn.saturating_sub(1),
                    error: e.to_string(),
                });
                observer.on_error(&e);
                Err(e)
            }
        }
    }

    async fn run_turns(
        &mut self,
        observer: &dyn ConversationObserver,
        summary: &mut TurnSummary,
    ) -> Result<()> {
        loop {
            let turn = self.next_turn;
            self.next_turn += 1;
            summary.turns += 1;
            self.events.publish(Event::TurnStarted { turn });

            let (text, calls) = self.stream_turn(turn, observer).await?;
            summary.tool_calls += calls;
            if !text.is_empty() {
                if !summary.text.is_empty() {
                    summary.text.push_str("\n\n");
                }
                summary.text.push_str(&text);
            }
            self.events.publish(Event::TurnCompleted { turn });

            if calls == 0 {
                return Ok(());
            }
            if summary.turns >= self.config.max_turns {
                warn!(max_turns = self.config.max_turns, "turn limit reached");
                return Ok(());
            }
        }
    }

    /// Consume one model stream. Returns the assistant text and the number
    /// of tool calls made.
    async fn stream_turn(
        &mut self,
        turn: u32,
        observer: &dyn ConversationObserver,
    ) -> Result<(String, usize)> {
        self.phase = LoopPhase::Streaming;
        let request = StreamRequest {
            model: self.config.model.clone(),
            system: Some(self.system_prompt.clone()),
            messages: self.history.clone(),
            tools: self.registry.specs(),
            max_tokens: self.config.max_tokens,
        };
        debug!(turn, messages = request.messages.len(), "opening model stream");
        let mut rx = self.model.open_stream(&request).await?;

        let mut text = String::new();
        let mut calls = 0;
        let mut failure: Option<HelmError> = None;

        while let Some(chunk) = rx.recv().await {
            match chunk {
                StreamChunk::TextDelta(delta) => {
                    observer.on_content(&delta);
                    text.push_str(&delta);
                }
                StreamChunk::ToolUse(call) => {
                    self.phase = LoopPhase::ToolPending;
                    observer.on_tool_call(&call);
                    match self.registry.dispatch(&call.name, &call.parameters).await {
                        Ok(result) => {
                            observer.on_tool_result(&call.name, &result);
                            self.history
                                .push(ConversationMessage::tool(call, result, turn));
                            calls += 1;
                        }
                        Err(e) => {
                            failure = Some(e);
                            break;
                        }
                    }
                    self.phase = LoopPhase::Streaming;
                }
                StreamChunk::Usage(usage) => {
                    debug!(
                        input = usage.input_tokens,
                        output = usage.output_tokens,
                        "token usage"
                    );
                }
                StreamChunk::Done(reason) => {
                    debug!(turn, ?reason, "stream done");
                    break;
                }
                StreamChunk::Error(e) => {
                    failure = Some(HelmError::LlmProvider(e));
                    break;
                }
            }
        }

        // Partial text survives a fault too.
        if !text.is_empty() {
            self.history
                .push(ConversationMessage::assistant(text.clone(), turn));
        }
        match failure {
            Some(e) => Err(e),
            None => Ok((text, calls)),
        }
    }
}
