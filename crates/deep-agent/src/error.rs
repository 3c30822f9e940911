use deep_agent_model::ErrorKind;
use thiserror::Error;

/// Missing or invalid settings. Fatal at startup.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum ConfigurationError {
    /// A required variable is not set, or is empty.
    #[error("{0} environment variable is required")]
    Missing(&'static str),
    /// A variable is set to a value that cannot be used.
    #[error("invalid value for {name}: {reason}")]
    Invalid {
        /// Name of the variable.
        name: &'static str,
        /// What is wrong with the value.
        reason: String,
    },
}

/// The session could not be set up.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum InitializationError {
    /// The Ollama server did not answer.
    #[error("cannot connect to Ollama server at {base_url}: {message}")]
    Unreachable {
        /// The address that was tried.
        base_url: String,
        /// Why the connection failed.
        message: String,
    },
    /// The server answered, but cannot serve the configured model.
    #[error("{message}")]
    Backend {
        /// The kind of the failure reported by the provider.
        kind: ErrorKind,
        /// The provider's error message.
        message: String,
    },
    /// Two tools share the same name.
    #[error("tool `{0}` is registered more than once")]
    DuplicateTool(String),
}

/// The backend reachability check failed.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("Cannot connect to Ollama server at {base_url}: {reason}")]
pub struct ValidationError {
    /// The address that was checked.
    pub base_url: String,
    /// Why the check failed.
    pub reason: String,
}
