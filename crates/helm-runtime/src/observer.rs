//! Observers for live conversation output.
//!
//! The loop calls observers synchronously on its own task, in stream order.

use helm_core::{ActionRequest, HelmError, ToolResult};
use tokio::sync::mpsc;

pub trait ConversationObserver: Send + Sync {
    /// A text delta from the model.
    fn on_content(&self, _delta: &str) {}

    /// The model asked for a tool; called before dispatch.
    fn on_tool_call(&self, _call: &ActionRequest) {}

    fn on_tool_result(&self, _name: &str, _result: &ToolResult) {}

    /// The exchange was aborted by a fault.
    fn on_error(&self, _error: &HelmError) {}
}

/// Observer that ignores everything.
pub struct NoopObserver;

impl ConversationObserver for NoopObserver {}

/// What a [`ChannelObserver`] forwards.
#[derive(Debug, Clone)]
pub enum ConversationEvent {
    Content(String),
    ToolCall(ActionRequest),
    ToolResult { name: String, result: ToolResult },
    Error(String),
}

/// Hands events to a rendering task over an unbounded channel, preserving order.
pub struct ChannelObserver {
    tx: mpsc::UnboundedSender<ConversationEvent>,
}

impl ChannelObserver {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ConversationEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn forward(&self, event: ConversationEvent) {
        // A closed receiver just means nobody is rendering anymore.
        let _ = self.tx.send(event);
    }
}

impl ConversationObserver for ChannelObserver {
    fn on_content(&self, delta: &str) {
        self.forward(ConversationEvent::Content(delta.to_string()));
    }

    fn on_tool_call(&self, call: &ActionRequest) {
        self.forward(ConversationEvent::ToolCall(call.clone()));
    }

    fn on_tool_result(&self, name: &str, result: &ToolResult) {
        self.forward(ConversationEvent::ToolResult {
            name: name.to_string(),
            result: result.clone(),
        });
    }

    fn on_error(&self, error: &HelmError) {
        self.forward(ConversationEvent::Error(error.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_observer_preserves_order() {
        let (observer, mut rx) = ChannelObserver::new();
        observer.on_content("Hel");
        observer.on_content("lo");
        observer.on_tool_result("desktop", &ToolResult::output("ok"));
        observer.on_error(&HelmError::Unexpected("boom".into()));

        assert!(matches!(rx.try_recv(), Ok(ConversationEvent::Content(t)) if t == "Hel"));
        assert!(matches!(rx.try_recv(), Ok(ConversationEvent::Content(t)) if t == "lo"));
        assert!(matches!(
            rx.try_recv(),
            Ok(ConversationEvent::ToolResult { name, .. }) if name == "desktop"
        ));
        assert!(matches!(rx.try_recv(), Ok(ConversationEvent::Error(e)) if e.contains("boom")));
    }

    #[test]
    fn test_closed_receiver_is_ignored() {
        let (observer, rx) = ChannelObserver::new();
        drop(rx);
        observer.on_content("nobody listening");
    }
}
