use std::future::poll_fn;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use backoff::ExponentialBackoffBuilder;
use backoff::backoff::Backoff;
use deep_agent_model::{
    ModelProvider, ModelProviderError, ModelRequest, ModelResponse,
    ModelResponseEvent,
};
use tokio::time::sleep;
use tracing::Instrument;

pub type ModelError = Box<dyn ModelProviderError>;
type BoxedFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

const DEFAULT_MAX_ATTEMPTS: u32 = 3;
const DEFAULT_INITIAL_INTERVAL: Duration = Duration::from_millis(500);
const MAX_ELAPSED_TIME: Duration = Duration::from_secs(30);

/// A wrapper around a model provider that provides a type-erased interface
/// for the other modules, and retries requests that failed for transient
/// reasons.
#[derive(Clone)]
pub struct ModelClient {
    provider: Arc<dyn ErasedProvider>,
    max_attempts: u32,
    initial_interval: Duration,
}

impl ModelClient {
    #[inline]
    pub fn new<P: ModelProvider + 'static>(provider: P) -> Self {
        // We have to erase the type `P`, since `ModelClient` doesn't have a
        // generic parameter and we don't want it either.
        Self {
            provider: Arc::new(provider),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            initial_interval: DEFAULT_INITIAL_INTERVAL,
        }
    }

    /// Sets how many times a request is sent at most, and the delay before
    /// the first retry.
    #[inline]
    pub fn set_retry_policy(
        &mut self,
        max_attempts: u32,
        initial_interval: Duration,
    ) {
        self.max_attempts = max_attempts.max(1);
        self.initial_interval = initial_interval;
    }

    /// Sends a request and returns the response stream.
    ///
    /// Only sending is retried. Once the response starts streaming, errors
    /// are returned as they are.
    pub async fn send_request(
        &self,
        req: ModelRequest,
    ) -> Result<ModelStream, ModelError> {
        let mut backoff = ExponentialBackoffBuilder::new()
            .with_initial_interval(self.initial_interval)
            .with_max_elapsed_time(Some(MAX_ELAPSED_TIME))
            .build();
        let mut attempt = 1;

        async move {
            trace!("got a request: {req:?}");
            loop {
                let err = match self.provider.send_request(&req).await {
                    Ok(stream) => return Ok(stream),
                    Err(err) => err,
                };
                if !err.kind().is_transient() || attempt >= self.max_attempts {
                    error!("got an error: {err:?}");
                    return Err(err);
                }
                let Some(delay) = backoff.next_backoff() else {
                    error!("giving up after {attempt} attempts: {err:?}");
                    return Err(err);
                };
                warn!(
                    "attempt {attempt} failed ({err}), retrying in {delay:?}"
                );
                sleep(delay).await;
                attempt += 1;
            }
        }
        .instrument(trace_span!("model client req"))
        .await
    }

    /// Checks whether the backend can serve requests.
    #[inline]
    pub async fn probe(&self) -> Result<(), ModelError> {
        self.provider.probe().await
    }
}

/// A response whose events are being received.
pub struct ModelStream {
    inner: Pin<Box<dyn ErasedResponse>>,
}

impl ModelStream {
    /// Waits for the next event. `None` means the response has completed.
    ///
    /// # Cancel safety
    ///
    /// This method is cancel safe. The response stops streaming further
    /// events when the stream is dropped.
    #[inline]
    pub async fn next_event(
        &mut self,
    ) -> Result<Option<ModelResponseEvent>, ModelError> {
        poll_fn(|cx| self.inner.as_mut().poll_next_event(cx)).await
    }
}

trait ErasedProvider: Send + Sync {
    fn send_request(
        &self,
        req: &ModelRequest,
    ) -> BoxedFuture<Result<ModelStream, ModelError>>;

    fn probe(&self) -> BoxedFuture<Result<(), ModelError>>;
}

impl<P: ModelProvider + 'static> ErasedProvider for P {
    fn send_request(
        &self,
        req: &ModelRequest,
    ) -> BoxedFuture<Result<ModelStream, ModelError>> {
        let fut = ModelProvider::send_request(self, req);
        Box::pin(async move {
            match fut.await {
                Ok(resp) => Ok(ModelStream {
                    inner: Box::pin(resp),
                }),
                Err(err) => Err(Box::new(err) as ModelError),
            }
        })
    }

    fn probe(&self) -> BoxedFuture<Result<(), ModelError>> {
        let fut = ModelProvider::probe(self);
        Box::pin(async move {
            fut.await.map_err(|err| Box::new(err) as ModelError)
        })
    }
}

trait ErasedResponse: Send {
    fn poll_next_event(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Result<Option<ModelResponseEvent>, ModelError>>;
}

impl<R: ModelResponse> ErasedResponse for R {
    #[inline]
    fn poll_next_event(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Result<Option<ModelResponseEvent>, ModelError>> {
        ModelResponse::poll_next_event(self, cx)
            .map_err(|err| Box::new(err) as ModelError)
    }
}

#[cfg(test)]
mod tests {
    use deep_agent_model::{ErrorKind, ModelMessage};
    use deep_agent_test_model::{
        PresetEvent, PresetResponse, TestModelProvider,
    };

    use super::*;

    fn request() -> ModelRequest {
        ModelRequest {
            messages: vec![ModelMessage::User("Hi".to_owned())],
            tools: vec![],
        }
    }

    async fn collect_text(stream: &mut ModelStream) -> String {
        let mut text = String::new();
        while let Some(event) = stream.next_event().await.unwrap() {
            if let ModelResponseEvent::MessageDelta(delta) = event {
                text.push_str(&delta);
            }
        }
        text
    }

    #[tokio::test]
    async fn test_send_request() {
        let model_provider = TestModelProvider::default();
        model_provider.add_response(PresetResponse::with_events([
            PresetEvent::delta("How "),
            PresetEvent::delta("are "),
            PresetEvent::delta("you?"),
        ]));

        let model_client = ModelClient::new(model_provider.clone());
        let mut stream = model_client.send_request(request()).await.unwrap();
        assert_eq!(collect_text(&mut stream).await, "How are you?");
        assert_eq!(model_provider.requests().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_transient_errors() {
        let model_provider = TestModelProvider::default();
        model_provider.add_response(
            PresetResponse::with_events([PresetEvent::delta("Finally")])
                .with_failures(2),
        );

        let model_client = ModelClient::new(model_provider.clone());
        let mut stream = model_client.send_request(request()).await.unwrap();
        assert_eq!(collect_text(&mut stream).await, "Finally");
        assert_eq!(model_provider.requests().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_give_up_after_max_attempts() {
        let model_provider = TestModelProvider::default();
        model_provider.add_response(
            PresetResponse::with_events([PresetEvent::delta("Never")])
                .with_failures(0),
        );

        let mut model_client = ModelClient::new(model_provider.clone());
        model_client.set_retry_policy(2, Duration::from_millis(10));
        let err = model_client.send_request(request()).await.err().unwrap();
        assert_eq!(err.kind(), ErrorKind::RateLimitExceeded);
        assert_eq!(model_provider.requests().len(), 2);
    }

    #[tokio::test]
    async fn test_no_retry_for_other_errors() {
        // An empty script fails with a non-transient error.
        let model_provider = TestModelProvider::default();
        let model_client = ModelClient::new(model_provider.clone());
        let err = model_client.send_request(request()).await.err().unwrap();
        assert_eq!(err.kind(), ErrorKind::Other);
        assert_eq!(model_provider.requests().len(), 1);
    }
}
