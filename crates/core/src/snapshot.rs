//! Snapshots of a turn in progress.
//!
//! A turn is reported as a sequence of [`TurnSnapshot`]s. Every snapshot is
//! cumulative: it contains all messages of the turn so far, starting with
//! the user's message. Consumers that only want what is new should compare
//! a snapshot with the ones they have already seen.

use deep_agent_model::ToolCallRequest;
use serde_json::{Map, Value};

use crate::TurnError;

/// An ordered, cumulative view of one turn.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TurnSnapshot {
    /// Messages of the turn, in the order they were produced.
    pub messages: Vec<Message>,
    /// Set on the last snapshot of a turn that ended early.
    pub error: Option<TurnError>,
}

impl TurnSnapshot {
    /// Returns the most recent message.
    #[inline]
    pub fn last_message(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// Returns the content of the last message if it's an assistant
    /// message. For the final snapshot of a turn, this is the answer.
    #[inline]
    pub fn final_answer(&self) -> Option<&str> {
        match self.last_message()? {
            Message::Assistant(msg) => Some(&msg.content),
            Message::User(_) | Message::ToolResult(_) => None,
        }
    }
}

/// A message in a turn.
#[derive(Clone, Debug, PartialEq)]
pub enum Message {
    /// The input that started the turn.
    User(UserMessage),
    /// Text and tool calls from the model.
    Assistant(AssistantMessage),
    /// Output of a tool call.
    ToolResult(ToolResultMessage),
}

/// A user input.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UserMessage {
    /// The input text.
    pub content: String,
}

/// A message from the model. While the model is still streaming, the
/// content grows from one snapshot to the next.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AssistantMessage {
    /// Text content, possibly empty.
    pub content: String,
    /// Tool calls requested by this message so far.
    pub tool_calls: Vec<ToolCall>,
}

/// Output of one tool call.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ToolResultMessage {
    /// Name of the tool that produced the output.
    pub name: String,
    /// The textual output, which is an `Error: ...` text if the tool failed.
    pub content: String,
}

/// A tool call requested by the model.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ToolCall {
    /// Name of the tool.
    pub name: String,
    /// Arguments, in the order the model produced them.
    pub arguments: Map<String, Value>,
}

impl ToolCall {
    /// Renders the arguments as `key=value` pairs joined by commas.
    ///
    /// String values are written as they are, other values in their JSON
    /// form. Nothing is escaped.
    pub fn render_arguments(&self) -> String {
        self.arguments
            .iter()
            .map(|(key, value)| match value {
                Value::String(s) => format!("{key}={s}"),
                other => format!("{key}={other}"),
            })
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl From<&ToolCallRequest> for ToolCall {
    fn from(req: &ToolCallRequest) -> Self {
        let arguments = match &req.arguments {
            Value::Object(map) => map.clone(),
            Value::Null => Map::new(),
            other => {
                let mut map = Map::new();
                map.insert("input".to_owned(), other.clone());
                map
            }
        };
        Self {
            name: req.name.clone(),
            arguments,
        }
    }
}
