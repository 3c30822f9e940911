//! Conversation-related types.

use deep_agent_model::{ModelMessage, ModelRequest, ModelTool};

/// The running history of a conversation, shared by all turns of an agent.
///
/// System instructions are not part of the history, they are prepended
/// when building a request.
#[derive(Clone, Default, Debug)]
pub struct Conversation {
    pub(crate) items: Vec<ModelMessage>,
}

impl Conversation {
    /// Returns the messages in this conversation.
    #[inline]
    pub fn messages(&self) -> &[ModelMessage] {
        &self.items
    }

    /// Returns `true` if nothing has been said yet.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    #[inline]
    pub(crate) fn push(&mut self, msg: ModelMessage) {
        self.items.push(msg);
    }

    pub(crate) fn to_request(
        &self,
        system_prompt: Option<&str>,
        tools: Vec<ModelTool>,
    ) -> ModelRequest {
        let mut messages = Vec::with_capacity(self.items.len() + 1);
        if let Some(prompt) = system_prompt {
            messages.push(ModelMessage::System(prompt.to_owned()));
        }
        messages.extend(self.items.iter().cloned());
        ModelRequest { messages, tools }
    }
}
