use std::time::Duration;

const DEFAULT_BASE_URL: &str = "http://localhost:11434";
const DEFAULT_TEMPERATURE: f32 = 0.1;
const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Builder for [`OllamaConfig`].
#[derive(Clone, Debug, PartialEq)]
pub struct OllamaConfigBuilder {
    model: String,
    base_url: Option<String>,
    temperature: Option<f32>,
    probe_timeout: Option<Duration>,
}

impl OllamaConfigBuilder {
    /// Creates a builder for the given model, e.g. `llama3.1:8b`.
    #[inline]
    pub fn with_model<S: Into<String>>(model: S) -> Self {
        Self {
            model: model.into(),
            base_url: None,
            temperature: None,
            probe_timeout: None,
        }
    }

    /// Sets a custom base URL.
    #[inline]
    pub fn with_base_url<S: Into<String>>(mut self, base_url: S) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    /// Sets the sampling temperature.
    #[inline]
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Sets the timeout of the requests used for checking the server.
    #[inline]
    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = Some(timeout);
        self
    }

    /// Builds the configuration.
    #[inline]
    pub fn build(self) -> OllamaConfig {
        let base_url = self
            .base_url
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        OllamaConfig {
            model: self.model,
            base_url: base_url.trim_end_matches('/').to_string(),
            temperature: self.temperature.unwrap_or(DEFAULT_TEMPERATURE),
            probe_timeout: self.probe_timeout.unwrap_or(DEFAULT_PROBE_TIMEOUT),
        }
    }
}

/// Configuration for the Ollama provider.
#[derive(Clone, Debug, PartialEq)]
pub struct OllamaConfig {
    pub(crate) model: String,
    pub(crate) base_url: String,
    pub(crate) temperature: f32,
    pub(crate) probe_timeout: Duration,
}

impl OllamaConfig {
    /// Returns the model name.
    #[inline]
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Returns the base URL, without a trailing slash.
    #[inline]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}
