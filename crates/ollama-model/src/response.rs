use std::collections::VecDeque;
use std::pin::Pin;
use std::task::{Context, Poll, ready};

use deep_agent_model::{
    ErrorKind, ModelFinishReason, ModelResponse, ModelResponseEvent,
};
use pin_project_lite::pin_project;

use crate::Error;
use crate::io::NdJson;
use crate::proto::{self, ChatChunk};

struct PartialState {
    lines: NdJson,
    // Events decoded from one line, in the order they should be delivered.
    // A single line can carry a message delta and several tool calls.
    pending_events: VecDeque<ModelResponseEvent>,
    tool_call_count: usize,
    done: bool,
}

type PinnedFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;
type NextEvent = Result<(Option<ModelResponseEvent>, PartialState), Error>;

pin_project! {
    pub struct OllamaResponse {
        next_event_fut: Option<PinnedFuture<NextEvent>>,
    }
}

impl OllamaResponse {
    #[inline]
    pub fn from_lines(lines: NdJson) -> Self {
        let partial_state = PartialState {
            lines,
            pending_events: Default::default(),
            tool_call_count: 0,
            done: false,
        };
        let next_event_fut = async move { next_event(partial_state).await };
        Self {
            next_event_fut: Some(Box::pin(next_event_fut)),
        }
    }
}

impl ModelResponse for OllamaResponse {
    type Error = crate::Error;

    fn poll_next_event(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Result<Option<ModelResponseEvent>, Self::Error>> {
        let this = self.project();
        let Some(next_event_fut) = this.next_event_fut else {
            return Poll::Ready(Ok(None));
        };
        let (event, partial_state) =
            match ready!(next_event_fut.as_mut().poll(cx)) {
                Ok((Some(event), partial_state)) => (event, partial_state),
                Ok((None, _)) => {
                    *this.next_event_fut = None;
                    return Poll::Ready(Ok(None));
                }
                Err(err) => {
                    *this.next_event_fut = None;
                    return Poll::Ready(Err(err));
                }
            };

        // The stream may still have more data to pull, create a new future for
        // the next event.
        let next_event_fut = async move { next_event(partial_state).await };
        *this.next_event_fut = Some(Box::pin(next_event_fut));

        Poll::Ready(Ok(Some(event)))
    }
}

async fn next_event(
    mut partial_state: PartialState,
) -> Result<(Option<ModelResponseEvent>, PartialState), Error> {
    loop {
        if let Some(event) = partial_state.pending_events.pop_front() {
            return Ok((Some(event), partial_state));
        }
        if partial_state.done {
            return Ok((None, partial_state));
        }

        let line = match partial_state.lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => {
                return Err(Error::new(
                    "response ended before the model finished",
                    ErrorKind::InvalidResponse,
                ));
            }
            Err(err) => {
                return Err(Error::new(format!("{err}"), ErrorKind::Other));
            }
        };
        trace!("got line: {line}");

        let chunk = serde_json::from_str::<ChatChunk>(&line).map_err(|err| {
            Error::new(format!("{err}"), ErrorKind::InvalidResponse)
        })?;
        decode_chunk(&mut partial_state, chunk)?;
    }
}

// The order of events are important. Always emit message delta first, then
// emit tool calls, and finally emit the finish reason if any.
fn decode_chunk(
    partial_state: &mut PartialState,
    chunk: ChatChunk,
) -> Result<(), Error> {
    if let Some(error) = chunk.error {
        return Err(Error::new(error, ErrorKind::Other));
    }

    if let Some(message) = chunk.message {
        if !message.content.is_empty() {
            partial_state
                .pending_events
                .push_back(ModelResponseEvent::MessageDelta(message.content));
        }
        for tool_call in message.tool_calls {
            let req = proto::into_tool_call_request(
                tool_call,
                partial_state.tool_call_count,
            );
            partial_state.tool_call_count += 1;
            partial_state
                .pending_events
                .push_back(ModelResponseEvent::ToolCall(req));
        }
    }

    if chunk.done {
        debug!(
            "model finished, reason: {:?}, tool calls: {}",
            chunk.done_reason, partial_state.tool_call_count
        );
        let finish_reason = if partial_state.tool_call_count > 0 {
            ModelFinishReason::ToolCalls
        } else {
            ModelFinishReason::Stop
        };
        partial_state
            .pending_events
            .push_back(ModelResponseEvent::Completed(finish_reason));
        partial_state.done = true;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::future::poll_fn;
    use std::pin::pin;

    use bytes::Bytes;
    use deep_agent_model::ModelProviderError;
    use serde_json::json;

    use super::*;
    use crate::io::Chunks;

    fn response_from(chunks: Vec<Bytes>) -> OllamaResponse {
        let chunks = Chunks::from_vec_deque(chunks.into());
        OllamaResponse::from_lines(NdJson::new(chunks))
    }

    async fn collect_events(
        resp: OllamaResponse,
    ) -> Result<Vec<ModelResponseEvent>, Error> {
        let mut resp = pin!(resp);
        let mut events = vec![];
        while let Some(event) =
            poll_fn(|cx| resp.as_mut().poll_next_event(cx)).await?
        {
            events.push(event);
        }
        Ok(events)
    }

    #[tokio::test]
    async fn test_simple_events() {
        let resp = response_from(vec![Bytes::from_static(include_bytes!(
            "../fixtures/chat_response.ndjson"
        ))]);
        let events = collect_events(resp).await.unwrap();

        let content: String = events
            .iter()
            .filter_map(|event| match event {
                ModelResponseEvent::MessageDelta(delta) => Some(delta.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(content, "Let me check both.");

        let tool_calls: Vec<_> = events
            .iter()
            .filter_map(|event| match event {
                ModelResponseEvent::ToolCall(req) => Some(req),
                _ => None,
            })
            .collect();
        assert_eq!(tool_calls.len(), 2);
        assert_eq!(tool_calls[0].id, "call_0");
        assert_eq!(tool_calls[0].name, "get_current_time");
        assert_eq!(tool_calls[1].id, "call_1");
        assert_eq!(
            tool_calls[1].arguments,
            json!({ "expression": "2 + 2 * 3" })
        );

        assert_eq!(
            events.last(),
            Some(&ModelResponseEvent::Completed(ModelFinishReason::ToolCalls))
        );
    }

    const HI_LINE: &[u8] = b"{\"message\":\
        {\"role\":\"assistant\",\"content\":\"Hi\"},\"done\":false}\n";

    #[tokio::test]
    async fn test_server_error_line() {
        let resp = response_from(vec![
            Bytes::from_static(HI_LINE),
            Bytes::from_static(b"{\"error\":\"model crashed\"}\n"),
        ]);
        let err = collect_events(resp).await.unwrap_err();
        assert_eq!(err.message(), "model crashed");
        assert_eq!(err.kind(), ErrorKind::Other);
    }

    #[tokio::test]
    async fn test_truncated_stream() {
        let resp = response_from(vec![Bytes::from_static(HI_LINE)]);
        let err = collect_events(resp).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidResponse);
    }
}
