use std::sync::Arc;
use std::time::Duration;

use deep_agent_model::ModelProvider;
use tokio::sync::Mutex;

use super::{Agent, Shared};
use crate::error::BuildError;
use crate::memory::{MemoryStore, RecallMemoryTool, SaveMemoryTool};
use crate::model_client::ModelClient;
use crate::tool::{AnyTool, Executor as ToolExecutor, Tool, ToolObject};

const DEFAULT_MAX_STEPS: usize = 25;

/// [`Agent`] builder.
pub struct AgentBuilder {
    model_client: ModelClient,
    system_prompt: Option<String>,
    tools: Vec<Box<dyn ToolObject>>,
    memory_store: Option<Arc<dyn MemoryStore>>,
    max_steps: usize,
    incremental_snapshots: bool,
}

impl AgentBuilder {
    /// Creates a new builder with the specified model provider.
    #[inline]
    pub fn with_model_provider<P: ModelProvider + 'static>(
        provider: P,
    ) -> Self {
        Self {
            model_client: ModelClient::new(provider),
            system_prompt: None,
            tools: vec![],
            memory_store: None,
            max_steps: DEFAULT_MAX_STEPS,
            incremental_snapshots: true,
        }
    }

    /// Sets the system instructions sent ahead of the conversation.
    #[inline]
    pub fn with_system_prompt<S: Into<String>>(mut self, prompt: S) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    /// Registers a tool.
    #[inline]
    pub fn with_tool<T: Tool>(mut self, tool: T) -> Self {
        let tool = Box::new(AnyTool(tool));
        self.tools.push(tool);
        self
    }

    /// Attaches a long-term memory store, and registers the `save_memory`
    /// and `recall_memory` tools backed by it.
    pub fn with_memory_store(mut self, store: Arc<dyn MemoryStore>) -> Self {
        self.memory_store = Some(Arc::clone(&store));
        self.with_tool(SaveMemoryTool::new(Arc::clone(&store)))
            .with_tool(RecallMemoryTool::new(store))
    }

    /// Sets how many times the model may be called in one turn.
    #[inline]
    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps.max(1);
        self
    }

    /// Controls whether a snapshot is published for every streamed delta
    /// (the default), or only once a model message is complete.
    #[inline]
    pub fn with_incremental_snapshots(mut self, enabled: bool) -> Self {
        self.incremental_snapshots = enabled;
        self
    }

    /// Sets how often a request failing for a transient reason is sent,
    /// and the delay before the first retry.
    #[inline]
    pub fn with_retry_policy(
        mut self,
        max_attempts: u32,
        initial_interval: Duration,
    ) -> Self {
        self.model_client
            .set_retry_policy(max_attempts, initial_interval);
        self
    }

    /// Builds the agent.
    pub fn build(self) -> Result<Agent, BuildError> {
        let AgentBuilder {
            model_client,
            system_prompt,
            tools,
            memory_store,
            max_steps,
            incremental_snapshots,
        } = self;

        let tool_executor = ToolExecutor::with_tools(tools)?;
        debug!(
            "building agent with tools: {:?}",
            tool_executor.tool_names().collect::<Vec<_>>()
        );
        let shared = Shared {
            model_client,
            tool_executor,
            system_prompt,
            memory_store,
            max_steps,
            incremental_snapshots,
        };
        Ok(Agent {
            shared: Arc::new(shared),
            conversation: Arc::new(Mutex::new(Default::default())),
        })
    }
}
