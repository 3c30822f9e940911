mod builder;
mod driver;

use std::future::poll_fn;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, ready};

use deep_agent_model::ModelProviderError;
use futures_util::Stream;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;

use crate::conversation::Conversation;
use crate::memory::MemoryStore;
use crate::model_client::ModelClient;
use crate::snapshot::TurnSnapshot;
use crate::tool::Executor as ToolExecutor;
use crate::TurnError;
pub use builder::AgentBuilder;

const SNAPSHOT_CHANNEL_CAPACITY: usize = 32;

/// State that every turn of an agent reads but never changes.
struct Shared {
    model_client: ModelClient,
    tool_executor: ToolExecutor,
    system_prompt: Option<String>,
    memory_store: Option<Arc<dyn MemoryStore>>,
    max_steps: usize,
    incremental_snapshots: bool,
}

/// An agent instance, which maintains the conversation history, a model
/// provider and the registered tools.
///
/// Every user input starts a [`Turn`]. Turns of the same agent never
/// overlap: a turn started while another one is running waits for it to
/// finish before calling the model.
pub struct Agent {
    shared: Arc<Shared>,
    conversation: Arc<Mutex<Conversation>>,
}

impl Agent {
    /// Starts a new turn with the given user input.
    ///
    /// Must be called within a tokio runtime. The turn runs in the
    /// background and is aborted when the returned [`Turn`] is dropped.
    pub fn run_turn<S: Into<String>>(&self, input: S) -> Turn {
        let (tx, rx) = mpsc::channel(SNAPSHOT_CHANNEL_CAPACITY);
        let task = tokio::spawn(driver::drive_turn(
            Arc::clone(&self.shared),
            Arc::clone(&self.conversation),
            input.into(),
            tx,
        ));
        Turn {
            rx,
            task: Some(task),
        }
    }

    /// Runs a turn to completion and returns the final answer.
    pub async fn run_turn_blocking<S: Into<String>>(
        &self,
        input: S,
    ) -> Result<String, TurnError> {
        let mut turn = self.run_turn(input);
        let mut last = None;
        while let Some(snapshot) = turn.next().await {
            last = Some(snapshot);
        }

        let snapshot = last.ok_or(TurnError::Aborted)?;
        if let Some(err) = snapshot.error {
            return Err(err);
        }
        Ok(snapshot.final_answer().unwrap_or_default().to_owned())
    }

    /// Checks whether the model backend can serve requests.
    #[inline]
    pub async fn probe(&self) -> Result<(), Box<dyn ModelProviderError>> {
        self.shared.model_client.probe().await
    }

    /// Returns the names of the registered tools, in registration order.
    pub fn tool_names(&self) -> Vec<String> {
        self.shared
            .tool_executor
            .tool_names()
            .map(ToOwned::to_owned)
            .collect()
    }

    /// Returns the long-term memory store, if there is one.
    #[inline]
    pub fn memory_store(&self) -> Option<&Arc<dyn MemoryStore>> {
        self.shared.memory_store.as_ref()
    }

    /// Returns a copy of the conversation history.
    ///
    /// Waits for the running turn, if any, to finish.
    pub async fn conversation(&self) -> Conversation {
        self.conversation.lock().await.clone()
    }
}

/// A turn in progress, which yields cumulative [`TurnSnapshot`]s until the
/// turn ends.
///
/// If the turn ends early, the last snapshot carries the error. Dropping a
/// `Turn` stops the turn, snapshots already received stay valid.
pub struct Turn {
    rx: mpsc::Receiver<TurnSnapshot>,
    task: Option<JoinHandle<()>>,
}

impl Turn {
    /// Waits for the next snapshot. Returns `None` after the last one.
    #[inline]
    pub async fn next(&mut self) -> Option<TurnSnapshot> {
        poll_fn(|cx| self.poll_next_snapshot(cx)).await
    }

    fn poll_next_snapshot(
        &mut self,
        cx: &mut Context<'_>,
    ) -> Poll<Option<TurnSnapshot>> {
        if let Some(snapshot) = ready!(self.rx.poll_recv(cx)) {
            return Poll::Ready(Some(snapshot));
        }

        // The channel is closed, so the driver has returned or unwound.
        let Some(task) = self.task.as_mut() else {
            return Poll::Ready(None);
        };
        let result = ready!(Pin::new(task).poll(cx));
        self.task = None;
        match result {
            Err(err) if err.is_panic() => {
                error!("turn driver panicked");
                Poll::Ready(Some(TurnSnapshot {
                    messages: vec![],
                    error: Some(TurnError::Aborted),
                }))
            }
            _ => Poll::Ready(None),
        }
    }
}

impl Stream for Turn {
    type Item = TurnSnapshot;

    #[inline]
    fn poll_next(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Self::Item>> {
        self.get_mut().poll_next_snapshot(cx)
    }
}

impl Drop for Turn {
    fn drop(&mut self) {
        if let Some(task) = &self.task {
            task.abort();
        }
    }
}
