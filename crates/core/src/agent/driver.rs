use std::sync::Arc;

use deep_agent_model::{ModelMessage, ModelResponseEvent, ToolCallRequest};
use tokio::sync::{Mutex, OwnedMutexGuard, mpsc};
use tracing::Instrument;

use super::Shared;
use crate::conversation::Conversation;
use crate::model_client::ModelError;
use crate::snapshot::{
    AssistantMessage, Message, ToolCall, ToolResultMessage, TurnSnapshot,
    UserMessage,
};
use crate::TurnError;

/// Why a turn stopped before its final answer.
enum Stop {
    /// The consumer dropped the turn, nobody is listening anymore.
    Cancelled,
    Failed(TurnError),
}

impl From<ModelError> for Stop {
    #[inline]
    fn from(err: ModelError) -> Self {
        Stop::Failed(TurnError::from_model(err))
    }
}

pub(super) async fn drive_turn(
    shared: Arc<Shared>,
    conversation: Arc<Mutex<Conversation>>,
    input: String,
    tx: mpsc::Sender<TurnSnapshot>,
) {
    let conversation = conversation.lock_owned().await;
    let mut driver = TurnDriver {
        shared,
        conversation,
        snapshot: TurnSnapshot {
            messages: vec![Message::User(UserMessage {
                content: input.clone(),
            })],
            error: None,
        },
        tx,
    };
    driver.conversation.push(ModelMessage::User(input));

    let result = driver.run().instrument(debug_span!("turn")).await;
    match result {
        Ok(()) => trace!("turn completed"),
        Err(Stop::Cancelled) => debug!("turn cancelled by the consumer"),
        Err(Stop::Failed(err)) => {
            warn!("turn failed: {err}");
            driver.snapshot.error = Some(err);
            let snapshot = std::mem::take(&mut driver.snapshot);
            driver.tx.send(snapshot).await.ok();
        }
    }
}

struct TurnDriver {
    shared: Arc<Shared>,
    conversation: OwnedMutexGuard<Conversation>,
    snapshot: TurnSnapshot,
    tx: mpsc::Sender<TurnSnapshot>,
}

impl TurnDriver {
    async fn run(&mut self) -> Result<(), Stop> {
        let max_steps = self.shared.max_steps;
        for step in 1..=max_steps {
            trace!("model step {step}/{max_steps}");
            let tool_calls = self.run_model_step().await?;
            if tool_calls.is_empty() {
                return Ok(());
            }
            self.run_tools(tool_calls).await?;
        }
        Err(Stop::Failed(TurnError::StepLimitReached(max_steps)))
    }

    /// Calls the model once, and returns the tool calls it requested.
    async fn run_model_step(&mut self) -> Result<Vec<ToolCallRequest>, Stop> {
        let request = self.conversation.to_request(
            self.shared.system_prompt.as_deref(),
            self.shared.tool_executor.definitions(),
        );
        let mut stream = self.shared.model_client.send_request(request).await?;

        self.snapshot
            .messages
            .push(Message::Assistant(AssistantMessage::default()));
        let incremental = self.shared.incremental_snapshots;
        let mut content = String::new();
        let mut tool_calls = vec![];
        let mut published = false;
        while let Some(event) = stream.next_event().await? {
            match event {
                ModelResponseEvent::MessageDelta(delta) => {
                    if delta.is_empty() {
                        continue;
                    }
                    content.push_str(&delta);
                    self.current_assistant_message().content.push_str(&delta);
                }
                ModelResponseEvent::ToolCall(req) => {
                    debug!("model requested tool `{}`", req.name);
                    self.current_assistant_message()
                        .tool_calls
                        .push(ToolCall::from(&req));
                    tool_calls.push(req);
                }
                ModelResponseEvent::Completed(reason) => {
                    trace!("model response completed: {reason:?}");
                    break;
                }
            }
            if incremental {
                self.publish().await?;
                published = true;
            }
        }

        self.conversation.push(ModelMessage::Assistant {
            content,
            tool_calls: tool_calls.clone(),
        });
        // An empty reply still ends the turn on an assistant message.
        if !published {
            self.publish().await?;
        }
        Ok(tool_calls)
    }

    /// Runs the requested tools concurrently, and reports their results in
    /// the order they were requested.
    async fn run_tools(
        &mut self,
        tool_calls: Vec<ToolCallRequest>,
    ) -> Result<(), Stop> {
        let running: Vec<_> = tool_calls
            .into_iter()
            .map(|req| self.shared.tool_executor.spawn(req))
            .collect();

        for call in running {
            let result = call.finish().await;
            self.snapshot
                .messages
                .push(Message::ToolResult(ToolResultMessage {
                    name: result.name.clone(),
                    content: result.content.clone(),
                }));
            self.conversation.push(ModelMessage::Tool(result));
            self.publish().await?;
        }
        Ok(())
    }

    fn current_assistant_message(&mut self) -> &mut AssistantMessage {
        match self.snapshot.messages.last_mut() {
            Some(Message::Assistant(msg)) => msg,
            _ => {
                unreachable!("an assistant message is opened before streaming")
            }
        }
    }

    async fn publish(&self) -> Result<(), Stop> {
        self.tx
            .send(self.snapshot.clone())
            .await
            .map_err(|_| Stop::Cancelled)
    }
}
