//! A local scripted model for testing purpose.

mod preset;

use std::collections::VecDeque;
use std::error::Error as StdError;
use std::fmt::{self, Display, Formatter};
use std::future::ready;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context, Poll, ready};
use std::time::Duration;

use deep_agent_model::{
    ErrorKind, ModelFinishReason, ModelProvider, ModelProviderError,
    ModelRequest, ModelResponse, ModelResponseEvent,
};
use tokio::time::{Sleep, sleep};

pub use preset::*;

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
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
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

pub struct TestModelResponse {
    events: VecDeque<PresetEvent>,
    finish_reason: Option<ModelFinishReason>,
    delay: Duration,
    sleep: Option<Pin<Box<Sleep>>>,
}

impl ModelResponse for TestModelResponse {
    type Error = crate::Error;

    fn poll_next_event(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Result<Option<ModelResponseEvent>, Self::Error>> {
        let this = self.get_mut();
        if this.events.is_empty() && this.finish_reason.is_none() {
            // In case this method is called after completion.
            return Poll::Ready(Ok(None));
        }

        let delay = this.delay;
        let sleep = this.sleep.get_or_insert_with(|| Box::pin(sleep(delay)));
        ready!(sleep.as_mut().poll(cx));
        this.sleep = None;

        let event = match this.events.pop_front() {
            Some(PresetEvent::MessageDelta(delta)) => {
                ModelResponseEvent::MessageDelta(delta)
            }
            Some(PresetEvent::ToolCall(req)) => {
                ModelResponseEvent::ToolCall(req)
            }
            Some(PresetEvent::Fail(message)) => {
                this.events.clear();
                this.finish_reason = None;
                return Poll::Ready(Err(Error::new(
                    message,
                    ErrorKind::InvalidResponse,
                )));
            }
            None => {
                let reason = this.finish_reason.take();
                let event = reason.map(ModelResponseEvent::Completed);
                return Poll::Ready(Ok(event));
            }
        };
        Poll::Ready(Ok(Some(event)))
    }
}

#[derive(Default)]
struct Script {
    responses: VecDeque<PresetResponse>,
    failed_attempts: u64,
    requests: Vec<ModelRequest>,
    unreachable: bool,
}

/// A local scripted model for testing purpose.
///
/// Before sending requests, you need to setup the conversation script, which
/// is how the model should respond to each request. Every successful request
/// consumes the next response in the script. If there are no enough
/// responses in the script, an error will be returned.
///
/// Clones share the same script, so a test can keep a clone around to
/// inspect the requests after handing the provider to an agent.
#[derive(Clone, Default)]
pub struct TestModelProvider {
    script: Arc<Mutex<Script>>,
    delay: Option<Duration>,
}

impl TestModelProvider {
    #[inline]
    pub fn add_response(&self, preset: PresetResponse) {
        self.lock().responses.push_back(preset);
    }

    #[inline]
    pub fn set_delay(&mut self, duration: Duration) {
        self.delay = Some(duration);
    }

    /// Makes every following request and probe fail as if the backend
    /// was down.
    #[inline]
    pub fn set_unreachable(&self) {
        self.lock().unreachable = true;
    }

    /// Returns all requests received so far, including failed ones.
    #[inline]
    pub fn requests(&self) -> Vec<ModelRequest> {
        self.lock().requests.clone()
    }

    /// Returns the number of responses that are not consumed yet.
    #[inline]
    pub fn remaining_responses(&self) -> usize {
        self.lock().responses.len()
    }

    fn lock(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(|err| err.into_inner())
    }

    fn next_response(
        &self,
        req: &ModelRequest,
    ) -> Result<PresetResponse, Error> {
        let mut script = self.lock();
        script.requests.push(req.clone());
        if script.unreachable {
            return Err(Error::new("backend is down", ErrorKind::Unreachable));
        }

        let Some(preset) = script.responses.front() else {
            return Err(Error::new("no enough responses", ErrorKind::Other));
        };
        match preset.failures {
            Some(0) => {
                return Err(Error::new(
                    "always failing",
                    ErrorKind::RateLimitExceeded,
                ));
            }
            Some(failures) if script.failed_attempts < failures => {
                script.failed_attempts += 1;
                return Err(Error::new(
                    "failing on purpose",
                    ErrorKind::RateLimitExceeded,
                ));
            }
            _ => {}
        }

        script.failed_attempts = 0;
        script
            .responses
            .pop_front()
            .ok_or_else(|| Error::new("no enough responses", ErrorKind::Other))
    }
}

impl ModelProvider for TestModelProvider {
    type Error = crate::Error;
    type Response = TestModelResponse;

    fn send_request(
        &self,
        req: &ModelRequest,
    ) -> impl Future<Output = Result<Self::Response, Self::Error>> + Send + 'static
    {
        let delay = self.delay.unwrap_or(Duration::from_millis(1));
        let result = self.next_response(req).map(|preset| {
            let finish_reason = if preset.has_tool_call() {
                ModelFinishReason::ToolCalls
            } else {
                ModelFinishReason::Stop
            };
            TestModelResponse {
                events: preset.events.into(),
                finish_reason: Some(finish_reason),
                delay,
                sleep: None,
            }
        });
        ready(result)
    }

    fn probe(
        &self,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send + 'static {
        let result = if self.lock().unreachable {
            Err(Error::new("backend is down", ErrorKind::Unreachable))
        } else {
            Ok(())
        };
        ready(result)
    }
}

#[cfg(test)]
mod tests {
    use std::future::poll_fn;
    use std::pin::pin;

    use deep_agent_model::{ModelMessage, ModelTool, ToolCallRequest};
    use serde_json::json;

    use super::*;

    async fn collect_response(
        resp: TestModelResponse,
    ) -> Result<(String, Option<ToolCallRequest>), Error> {
        let mut resp = pin!(resp);
        let mut msg = String::new();
        let mut tool_call = None;
        while let Some(event) =
            poll_fn(|cx| resp.as_mut().poll_next_event(cx)).await?
        {
            match event {
                ModelResponseEvent::Completed(_) => {}
                ModelResponseEvent::MessageDelta(delta) => {
                    msg.push_str(&delta);
                }
                ModelResponseEvent::ToolCall(req) => tool_call = Some(req),
            }
        }
        Ok((msg, tool_call))
    }

    fn request(text: &str) -> ModelRequest {
        ModelRequest {
            messages: vec![ModelMessage::User(text.to_owned())],
            tools: vec![ModelTool {
                name: "calculate".to_owned(),
                description: "Evaluates arithmetic".to_owned(),
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "expression": { "type": "string" }
                    }
                }),
            }],
        }
    }

    #[tokio::test]
    async fn test_send_request() {
        let provider = TestModelProvider::default();
        provider.add_response(PresetResponse::with_events([
            PresetEvent::delta("Hello, "),
            PresetEvent::delta("world!"),
        ]));
        provider.add_response(PresetResponse::with_events([
            PresetEvent::delta("Sure, let me "),
            PresetEvent::delta("calculate."),
            PresetEvent::tool_call(
                "call_0",
                "calculate",
                json!({ "expression": "1 + 1" }),
            ),
        ]));

        let resp = provider.send_request(&request("Hi")).await.unwrap();
        let (msg, tool_call) = collect_response(resp).await.unwrap();
        assert_eq!(msg, "Hello, world!");
        assert!(tool_call.is_none());

        let resp = provider.send_request(&request("1 + 1?")).await.unwrap();
        let (msg, tool_call) = collect_response(resp).await.unwrap();
        assert_eq!(msg, "Sure, let me calculate.");
        let tool_call = tool_call.unwrap();
        assert_eq!(tool_call.name, "calculate");
        assert_eq!(tool_call.arguments, json!({ "expression": "1 + 1" }));

        assert_eq!(provider.requests().len(), 2);
        assert_eq!(provider.remaining_responses(), 0);
        assert!(provider.send_request(&request("More?")).await.is_err());
    }

    #[tokio::test]
    async fn test_failures_before_success() {
        let provider = TestModelProvider::default();
        provider.add_response(
            PresetResponse::with_events([PresetEvent::delta("ok")])
                .with_failures(2),
        );

        for _ in 0..2 {
            let err =
                provider.send_request(&request("Hi")).await.err().unwrap();
            assert_eq!(err.kind(), ErrorKind::RateLimitExceeded);
        }
        let resp = provider.send_request(&request("Hi")).await.unwrap();
        assert_eq!(collect_response(resp).await.unwrap().0, "ok");
    }

    #[tokio::test]
    async fn test_fail_mid_stream() {
        let provider = TestModelProvider::default();
        provider.add_response(PresetResponse::with_events([
            PresetEvent::delta("partial"),
            PresetEvent::Fail("connection reset".to_owned()),
        ]));

        let resp = provider.send_request(&request("Hi")).await.unwrap();
        let err = collect_response(resp).await.unwrap_err();
        assert_eq!(err.to_string(), "connection reset");
    }

    #[tokio::test]
    async fn test_unreachable() {
        let provider = TestModelProvider::default();
        assert!(provider.probe().await.is_ok());
        provider.set_unreachable();
        let err = provider.probe().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unreachable);
    }
}
