//! Core logic including the agent loop, tool execution, conversation
//! history, long-term memory, etc.
//!
//! The agent consumes a [`ModelProvider`](deep_agent_model::ModelProvider)
//! and reports the progress of every user turn as a sequence of
//! [`TurnSnapshot`]s.

#![deny(missing_docs)]
#![deny(clippy::missing_safety_doc)]

#[macro_use]
extern crate tracing;

mod agent;
pub mod conversation;
mod error;
pub mod memory;
mod model_client;
pub mod snapshot;
pub mod tool;

pub use agent::{Agent, AgentBuilder, Turn};
pub use error::{BuildError, TurnError};
pub use snapshot::{
    AssistantMessage, Message, ToolCall, ToolResultMessage, TurnSnapshot,
    UserMessage,
};
