//! # helm-core
//!
//! Shared vocabulary for the Helm runtime: tool results and errors, the tool
//! adapter contract, conversation messages, surfaces and the event bus.

pub mod error;
pub mod event;
pub mod message;
pub mod surface;
pub mod tool;

pub use error::{HelmError, Result};
pub use event::{DeviceStatus, Event, EventBus};
pub use message::{ConversationMessage, MessageContent, Role};
pub use surface::Surface;
pub use tool::{ActionRequest, ToolAdapter, ToolError, ToolResult, ToolSpec};
