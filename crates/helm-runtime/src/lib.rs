//! # helm-runtime
//!
//! Connects the model stream to the device tools: a [`ToolRegistry`] that
//! turns tool calls into results, the streaming [`ConversationLoop`], and the
//! [`Runtime`] that assembles and owns both.

pub mod conversation;
pub mod observer;
pub mod prompt;
pub mod registry;
pub mod runtime;

pub use conversation::{ConversationLoop, LoopPhase, TurnSummary};
pub use observer::{ChannelObserver, ConversationEvent, ConversationObserver, NoopObserver};
pub use prompt::default_system_prompt;
pub use registry::ToolRegistry;
pub use runtime::{Runtime, RuntimeBuilder};
