//! # helm-llm
//!
//! Model streaming for Helm. The conversation loop only sees the
//! [`ModelStream`] trait; [`AnthropicStream`] talks to the Messages API and
//! [`MockModel`] replays scripted turns in tests.

pub mod anthropic;
pub mod mock;
pub mod provider;

pub use anthropic::AnthropicStream;
pub use mock::{MockModel, MockTurn};
pub use provider::{ModelStream, StopReason, StreamChunk, StreamRequest, Usage};
