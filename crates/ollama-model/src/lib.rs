//! A model provider for a local [Ollama](https://ollama.com) server.

#[macro_use]
extern crate tracing;

mod config;
mod io;
mod proto;
mod response;

use std::error::Error as StdError;
use std::fmt::{self, Display};
use std::sync::Arc;

use deep_agent_model::{
    ErrorKind, ModelProvider, ModelProviderError, ModelRequest,
};
use mime::Mime;
use reqwest::{Client, Response, StatusCode, header};

pub use config::{OllamaConfig, OllamaConfigBuilder};
use io::{Chunks, NdJson};
use proto::{ErrorBody, TagsResponse};
use response::OllamaResponse;

/// Error type for [`OllamaProvider`].
#[derive(Debug)]
pub struct Error {
    message: String,
    kind: ErrorKind,
}

impl Error {
    fn new(message: impl Into<String>, kind: ErrorKind) -> Self {
        Self {
            message: message.into(),
            kind,
        }
    }

    fn from_reqwest(err: reqwest::Error) -> Self {
        let kind = if err.is_connect() || err.is_timeout() {
            ErrorKind::Unreachable
        } else {
            ErrorKind::Other
        };
        Self::new(format!("{err}"), kind)
    }

    /// Returns the error message.
    #[inline]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl StdError for Error {}

impl ModelProviderError for Error {
    #[inline]
    fn kind(&self) -> ErrorKind {
        self.kind
    }
}

/// Ollama model provider.
#[derive(Clone, Debug)]
pub struct OllamaProvider {
    client: Client,
    config: Arc<OllamaConfig>,
}

impl OllamaProvider {
    /// Creates a new `OllamaProvider` with the given configuration.
    #[inline]
    pub fn new(config: OllamaConfig) -> Self {
        Self {
            client: Client::new(),
            config: Arc::new(config),
        }
    }

    /// Returns the configuration of this provider.
    #[inline]
    pub fn config(&self) -> &OllamaConfig {
        &self.config
    }

    /// Lists the models available on the server.
    ///
    /// This is also the cheapest way to check whether the server is
    /// reachable at all.
    pub fn list_models(
        &self,
    ) -> impl Future<Output = Result<Vec<String>, Error>> + Send + 'static {
        let resp_fut = self
            .client
            .get(format!("{}{}", self.config.base_url, "/api/tags"))
            .timeout(self.config.probe_timeout)
            .send();

        async move {
            let resp = resp_fut.await.map_err(Error::from_reqwest)?;
            let resp = check_status(resp).await?;
            let tags: TagsResponse = resp.json().await.map_err(|err| {
                Error::new(format!("{err}"), ErrorKind::InvalidResponse)
            })?;
            Ok(tags.models.into_iter().map(|m| m.name).collect())
        }
    }
}

impl ModelProvider for OllamaProvider {
    type Error = Error;
    type Response = OllamaResponse;

    fn send_request(
        &self,
        req: &ModelRequest,
    ) -> impl Future<Output = Result<Self::Response, Self::Error>> + Send + 'static
    {
        let ollama_req = proto::create_request(req, &self.config);
        let resp_fut = self
            .client
            .post(format!("{}{}", self.config.base_url, "/api/chat"))
            .header(header::CONTENT_TYPE, "application/json")
            .json(&ollama_req)
            .send();

        async move {
            let resp = resp_fut.await.map_err(Error::from_reqwest)?;
            let resp = check_status(resp).await?;

            let content_type = resp
                .headers()
                .get(header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok());
            let is_valid_content_type = content_type
                .and_then(|v| v.parse().ok())
                .map(|m: Mime| {
                    matches!(m.subtype().as_str(), "x-ndjson" | "json")
                })
                .unwrap_or(false);
            if !is_valid_content_type {
                return Err(Error::new(
                    format!("Unexpected content type: {content_type:?}"),
                    ErrorKind::InvalidResponse,
                ));
            }

            // Here we got a successful response.
            let chunks = Chunks::from_response(resp);
            Ok(OllamaResponse::from_lines(NdJson::new(chunks)))
        }
    }

    fn probe(
        &self,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send + 'static {
        let models_fut = self.list_models();
        let model = self.config.model.clone();
        async move {
            let models = models_fut.await?;
            if serves_model(&models, &model) {
                return Ok(());
            }
            Err(Error::new(
                format!("model `{model}` is not available on the server"),
                ErrorKind::ModelNotFound,
            ))
        }
    }
}

/// Turns a non-2xx response into an error, preferring the server's
/// message over the bare status line.
async fn check_status(resp: Response) -> Result<Response, Error> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }

    let kind = match status {
        StatusCode::NOT_FOUND => ErrorKind::ModelNotFound,
        StatusCode::TOO_MANY_REQUESTS => ErrorKind::RateLimitExceeded,
        _ => ErrorKind::Other,
    };
    let message = match resp.json::<ErrorBody>().await {
        Ok(body) => body.error,
        Err(_) => format!("server responded with {status}"),
    };
    warn!("request failed with {status}: {message}");
    Err(Error::new(message, kind))
}

/// A model name without a tag refers to its `latest` tag.
fn serves_model(models: &[String], model: &str) -> bool {
    models.iter().any(|name| {
        name == model
            || (!model.contains(':')
                && name.strip_suffix(":latest") == Some(model))
    })
}
