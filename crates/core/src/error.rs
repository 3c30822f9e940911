use deep_agent_model::{ErrorKind, ModelProviderError};
use thiserror::Error;

/// An error that prevents an agent from being built.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum BuildError {
    /// Two tools share the same name.
    #[error("tool `{0}` is registered more than once")]
    DuplicateToolName(String),
}

/// An error that ended a turn early.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum TurnError {
    /// The model provider failed, either when sending the request or
    /// while streaming the response.
    #[error("{message}")]
    Model {
        /// The kind reported by the provider.
        kind: ErrorKind,
        /// The provider's error message.
        message: String,
    },
    /// The model kept requesting tools beyond the step limit.
    #[error("no final answer after {0} model steps")]
    StepLimitReached(usize),
    /// The turn task stopped without reporting a result.
    #[error("the agent stopped unexpectedly")]
    Aborted,
}

impl TurnError {
    pub(crate) fn from_model(err: Box<dyn ModelProviderError>) -> Self {
        TurnError::Model {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}
