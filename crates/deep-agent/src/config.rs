use std::env;
use std::fmt::{self, Display};

use crate::error::ConfigurationError;
use crate::session::SessionConfig;
use crate::tools::{SafeSearch, SearchSettings};

const DEFAULT_MAX_RESULTS: usize = 5;
const DEFAULT_REGION: &str = "us-en";
const PROMPT_PREVIEW_CHARS: usize = 100;

/// Settings read from the environment.
///
/// A `.env` file is loaded by the binary before this is read, values from
/// the process environment take precedence.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
    /// Base URL of the Ollama server, from `OLLAMA_BASE_URL`.
    pub ollama_base_url: String,
    /// Model to chat with, from `OLLAMA_MODEL`.
    pub ollama_model: String,
    /// Whether to attach long-term memory, from `USE_LONGTERM_MEMORY`.
    pub use_longterm_memory: bool,
    /// Replaces the default system prompt, from `CUSTOM_SYSTEM_PROMPT`.
    pub custom_system_prompt: Option<String>,
    /// Defaults for the `web_search` tool.
    pub search: SearchSettings,
}

impl Config {
    /// Reads the configuration from the process environment.
    #[inline]
    pub fn from_env() -> Result<Self, ConfigurationError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Reads the configuration through `lookup`, which returns the value of
    /// a variable if it's set.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigurationError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty =
            |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let required = |name: &'static str| {
            non_empty(name).ok_or(ConfigurationError::Missing(name))
        };

        let ollama_base_url = required("OLLAMA_BASE_URL")?;
        let ollama_model = required("OLLAMA_MODEL")?;
        let use_longterm_memory = lookup("USE_LONGTERM_MEMORY")
            .is_some_and(|v| v.trim().eq_ignore_ascii_case("true"));
        let custom_system_prompt = non_empty("CUSTOM_SYSTEM_PROMPT");

        let max_results = match non_empty("WEB_SEARCH_MAX_RESULTS") {
            Some(value) => parse_max_results(&value)?,
            None => DEFAULT_MAX_RESULTS,
        };
        let region = non_empty("WEB_SEARCH_REGION")
            .unwrap_or_else(|| DEFAULT_REGION.to_owned());
        let safesearch = match non_empty("WEB_SEARCH_SAFESEARCH") {
            Some(value) => value.trim().parse().map_err(|reason| {
                ConfigurationError::Invalid {
                    name: "WEB_SEARCH_SAFESEARCH",
                    reason,
                }
            })?,
            None => SafeSearch::default(),
        };

        Ok(Self {
            ollama_base_url,
            ollama_model,
            use_longterm_memory,
            custom_system_prompt,
            search: SearchSettings {
                max_results,
                region,
                safesearch,
            },
        })
    }

    /// Replaces the model, e.g. with a command line override.
    #[inline]
    pub fn with_model<S: Into<String>>(mut self, model: S) -> Self {
        self.ollama_model = model.into();
        self
    }

    /// Replaces the base URL, e.g. with a command line override.
    #[inline]
    pub fn with_base_url<S: Into<String>>(mut self, base_url: S) -> Self {
        self.ollama_base_url = base_url.into();
        self
    }

    /// Creates the configuration of a session.
    pub fn session_config(&self, show_tools: bool) -> SessionConfig {
        SessionConfig {
            model: self.ollama_model.clone(),
            base_url: self.ollama_base_url.clone(),
            system_prompt: self.custom_system_prompt.clone(),
            use_longterm_memory: self.use_longterm_memory,
            show_tools,
            search: self.search.clone(),
        }
    }
}

fn parse_max_results(value: &str) -> Result<usize, ConfigurationError> {
    let invalid = |reason: String| ConfigurationError::Invalid {
        name: "WEB_SEARCH_MAX_RESULTS",
        reason,
    };
    match value.trim().parse::<usize>() {
        Ok(0) => Err(invalid("must be at least 1".to_owned())),
        Ok(n) => Ok(n),
        Err(err) => Err(invalid(format!("{err}"))),
    }
}

impl Display for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rule = "=".repeat(30);
        writeln!(f, "Deep Agent with Ollama Configuration:")?;
        writeln!(f, "{rule}")?;
        writeln!(f, "Ollama Base URL: {}", self.ollama_base_url)?;
        writeln!(f, "Ollama Model: {}", self.ollama_model)?;
        writeln!(f, "Use Long-term Memory: {}", self.use_longterm_memory)?;
        writeln!(f, "Web Search Max Results: {}", self.search.max_results)?;
        writeln!(f, "Web Search Region: {}", self.search.region)?;
        writeln!(f, "Web Search SafeSearch: {}", self.search.safesearch)?;
        if let Some(prompt) = &self.custom_system_prompt {
            let preview: String =
                prompt.chars().take(PROMPT_PREVIEW_CHARS).collect();
            writeln!(f, "Custom System Prompt: {preview}...")?;
        }
        write!(f, "{rule}")
    }
}
