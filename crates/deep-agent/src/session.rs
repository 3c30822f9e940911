use std::sync::Arc;

use deep_agent_core::memory::InMemoryStore;
use deep_agent_core::tool::Tool;
use deep_agent_core::{Agent, AgentBuilder, BuildError, Turn, TurnError};
use deep_agent_model::{ErrorKind, ModelProvider};
use deep_agent_ollama_model::{OllamaConfigBuilder, OllamaProvider};

use crate::error::InitializationError;
use crate::render::TranscriptRenderer;
use crate::tools::*;

const DEFAULT_SYSTEM_PROMPT: &str = include_str!("./system_prompt.md");
const MEMORY_PROMPT: &str = include_str!("./memory_prompt.md");

type Extension = Box<dyn FnOnce(AgentBuilder) -> AgentBuilder + Send>;

/// Everything needed to start a [`Session`] against an Ollama server.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionConfig {
    /// Model to chat with.
    pub model: String,
    /// Base URL of the Ollama server.
    pub base_url: String,
    /// Replaces the default system prompt.
    pub system_prompt: Option<String>,
    /// Whether to attach long-term memory.
    pub use_longterm_memory: bool,
    /// Whether renderers of this session show tool activity.
    pub show_tools: bool,
    /// Defaults for the `web_search` tool.
    pub search: SearchSettings,
}

/// A session builder.
///
/// See [`Session`].
pub struct SessionBuilder {
    agent_builder: AgentBuilder,
    system_prompt: Option<String>,
    memory: bool,
    show_tools: bool,
    search_provider: Option<Arc<dyn SearchProvider>>,
    search_settings: SearchSettings,
    extensions: Vec<Extension>,
}

impl SessionBuilder {
    /// Creates a session builder with a specified model provider.
    pub fn with_model_provider<M: ModelProvider + 'static>(
        provider: M,
    ) -> Self {
        Self {
            agent_builder: AgentBuilder::with_model_provider(provider),
            system_prompt: None,
            memory: false,
            show_tools: false,
            search_provider: None,
            search_settings: SearchSettings::default(),
            extensions: vec![],
        }
    }

    /// Replaces the default system prompt.
    #[inline]
    pub fn with_system_prompt<S: Into<String>>(mut self, prompt: S) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    /// Enables or disables long-term memory.
    #[inline]
    pub fn with_memory(mut self, enabled: bool) -> Self {
        self.memory = enabled;
        self
    }

    /// Controls whether renderers created by the session show tool
    /// activity.
    #[inline]
    pub fn with_show_tools(mut self, enabled: bool) -> Self {
        self.show_tools = enabled;
        self
    }

    /// Replaces the search backend of the `web_search` tool, which is
    /// [`DuckDuckGo`] by default.
    #[inline]
    pub fn with_search_provider(
        mut self,
        provider: Arc<dyn SearchProvider>,
    ) -> Self {
        self.search_provider = Some(provider);
        self
    }

    /// Sets the defaults of the `web_search` tool.
    #[inline]
    pub fn with_search_settings(mut self, settings: SearchSettings) -> Self {
        self.search_settings = settings;
        self
    }

    /// Registers an extra tool. Extra tools are registered after the
    /// built-in ones and must not reuse their names.
    #[inline]
    pub fn with_tool<T: Tool>(mut self, tool: T) -> Self {
        self.extensions
            .push(Box::new(move |builder| builder.with_tool(tool)));
        self
    }

    /// Builds a new session.
    pub fn build(self) -> Result<Session, InitializationError> {
        let SessionBuilder {
            agent_builder,
            system_prompt,
            memory,
            show_tools,
            search_provider,
            search_settings,
            extensions,
        } = self;

        let search_provider = search_provider
            .unwrap_or_else(|| Arc::new(DuckDuckGo::new()));
        let system_prompt =
            system_prompt.unwrap_or_else(|| default_system_prompt(memory));

        let mut agent_builder = agent_builder
            .with_system_prompt(system_prompt)
            .with_tool(WebSearchTool::new(search_provider, search_settings))
            .with_tool(CurrentTimeTool::new())
            .with_tool(CalculateTool::new());
        if memory {
            agent_builder =
                agent_builder.with_memory_store(Arc::new(InMemoryStore::new()));
        }
        for extension in extensions {
            agent_builder = extension(agent_builder);
        }

        let agent = agent_builder.build().map_err(|err| match err {
            BuildError::DuplicateToolName(name) => {
                InitializationError::DuplicateTool(name)
            }
        })?;
        Ok(Session { agent, show_tools })
    }
}

fn default_system_prompt(memory: bool) -> String {
    let mut prompt = DEFAULT_SYSTEM_PROMPT.trim_end().to_owned();
    if memory {
        prompt.push('\n');
        prompt.push_str(MEMORY_PROMPT.trim_end());
    }
    prompt
}

/// A chat session, like a window that displays messages and has a input box.
///
/// The session holds a fully configured agent that you can use directly, and it
/// is basically a wrapper around [`Agent`].
pub struct Session {
    agent: Agent,
    show_tools: bool,
}

impl Session {
    /// Connects to the Ollama server described by `config` and checks that
    /// it serves the configured model before building the session.
    pub async fn initialize(
        config: &SessionConfig,
    ) -> Result<Self, InitializationError> {
        let ollama_config = OllamaConfigBuilder::with_model(&config.model)
            .with_base_url(&config.base_url)
            .build();
        Self::initialize_with(OllamaProvider::new(ollama_config), config).await
    }

    /// Like [`Session::initialize`], with a custom model provider.
    pub async fn initialize_with<M: ModelProvider + 'static>(
        provider: M,
        config: &SessionConfig,
    ) -> Result<Self, InitializationError> {
        let mut builder = SessionBuilder::with_model_provider(provider)
            .with_memory(config.use_longterm_memory)
            .with_show_tools(config.show_tools)
            .with_search_settings(config.search.clone());
        if let Some(prompt) = &config.system_prompt {
            builder = builder.with_system_prompt(prompt);
        }
        let session = builder.build()?;

        if let Err(err) = session.agent.probe().await {
            warn!("probing {} failed: {err}", config.base_url);
            return Err(match err.kind() {
                ErrorKind::Unreachable => InitializationError::Unreachable {
                    base_url: config.base_url.clone(),
                    message: err.to_string(),
                },
                kind => InitializationError::Backend {
                    kind,
                    message: err.to_string(),
                },
            });
        }

        info!(
            "session initialized with model {} and tools {:?}",
            config.model,
            session.tool_names()
        );
        Ok(session)
    }

    /// Starts a turn. See [`Agent::run_turn`].
    #[inline]
    pub fn run_turn<S: Into<String>>(&self, input: S) -> Turn {
        self.agent.run_turn(input)
    }

    /// Runs a turn to completion and returns the final answer.
    #[inline]
    pub async fn run_turn_blocking<S: Into<String>>(
        &self,
        input: S,
    ) -> Result<String, TurnError> {
        self.agent.run_turn_blocking(input).await
    }

    /// Creates a renderer for one turn, with the session's tool visibility.
    #[inline]
    pub fn renderer(&self) -> TranscriptRenderer {
        TranscriptRenderer::new(self.show_tools)
    }

    /// Returns `true` if tool activity is shown.
    #[inline]
    pub fn show_tools(&self) -> bool {
        self.show_tools
    }

    /// Returns the names of all tools available to the model.
    #[inline]
    pub fn tool_names(&self) -> Vec<String> {
        self.agent.tool_names()
    }

    /// Returns the underlying agent.
    #[inline]
    pub fn agent(&self) -> &Agent {
        &self.agent
    }
}

#[cfg(test)]
mod tests {
    use std::future::ready;

    use deep_agent_core::tool::{Error as ToolError, ToolResult};
    use deep_agent_model::ModelMessage;
    use deep_agent_test_model::{
        PresetEvent, PresetResponse, TestModelProvider,
    };
    use schemars::{JsonSchema, schema_for};
    use serde::Deserialize;
    use serde_json::{Value, json};

    use super::*;
    use crate::render::Fragment;

    struct NoSearch;

    #[async_trait::async_trait]
    impl SearchProvider for NoSearch {
        async fn search(
            &self,
            _query: &SearchQuery,
        ) -> Result<Vec<SearchResult>, SearchError> {
            Ok(vec![])
        }
    }

    #[derive(Deserialize, JsonSchema)]
    struct EchoParameters {
        text: String,
    }

    struct EchoTool {
        name: &'static str,
        parameter_schema: Value,
    }

    impl EchoTool {
        fn named(name: &'static str) -> Self {
            Self {
                name,
                parameter_schema: schema_for!(EchoParameters).to_value(),
            }
        }
    }

    impl Tool for EchoTool {
        type Input = EchoParameters;

        fn name(&self) -> &str {
            self.name
        }

        fn description(&self) -> &str {
            "Echoes the text back."
        }

        fn parameter_schema(&self) -> &Value {
            &self.parameter_schema
        }

        fn execute(
            &self,
            input: Self::Input,
        ) -> impl Future<Output = ToolResult> + Send + 'static {
            ready(Ok::<_, ToolError>(input.text))
        }
    }

    fn builder(provider: &TestModelProvider) -> SessionBuilder {
        SessionBuilder::with_model_provider(provider.clone())
            .with_search_provider(Arc::new(NoSearch))
    }

    fn config() -> SessionConfig {
        SessionConfig {
            model: "llama3.1".to_owned(),
            base_url: "http://localhost:11434".to_owned(),
            system_prompt: None,
            use_longterm_memory: false,
            show_tools: true,
            search: SearchSettings::default(),
        }
    }

    fn system_prompt_of(provider: &TestModelProvider) -> String {
        match provider.requests()[0].messages.first() {
            Some(ModelMessage::System(prompt)) => prompt.clone(),
            other => panic!("expected a system message, got {other:?}"),
        }
    }

    #[test]
    fn test_builtin_tools() {
        let provider = TestModelProvider::default();
        let session = builder(&provider).build().unwrap();
        assert_eq!(
            session.tool_names(),
            ["web_search", "get_current_time", "calculate"]
        );
        assert!(!session.show_tools());
        assert!(session.agent().memory_store().is_none());

        let session = builder(&provider)
            .with_memory(true)
            .with_tool(EchoTool::named("echo"))
            .build()
            .unwrap();
        assert_eq!(
            session.tool_names(),
            [
                "web_search",
                "get_current_time",
                "calculate",
                "save_memory",
                "recall_memory",
                "echo"
            ]
        );
        assert!(session.agent().memory_store().is_some());
    }

    #[test]
    fn test_duplicate_tool() {
        let provider = TestModelProvider::default();
        let result = builder(&provider)
            .with_tool(EchoTool::named("calculate"))
            .build();
        assert!(matches!(
            result,
            Err(InitializationError::DuplicateTool(name)) if name == "calculate"
        ));
    }

    #[tokio::test]
    async fn test_default_prompt() {
        let provider = TestModelProvider::default();
        provider.add_response(PresetResponse::with_events([
            PresetEvent::delta("Hi!"),
        ]));
        let session = builder(&provider).build().unwrap();
        assert_eq!(session.run_turn_blocking("Hello").await.unwrap(), "Hi!");

        let prompt = system_prompt_of(&provider);
        assert!(prompt.contains("get_current_time"));
        assert!(!prompt.contains("save_memory"));

        let provider = TestModelProvider::default();
        provider.add_response(PresetResponse::with_events([
            PresetEvent::delta("Hi!"),
        ]));
        let session = builder(&provider).with_memory(true).build().unwrap();
        session.run_turn_blocking("Hello").await.unwrap();
        assert!(system_prompt_of(&provider).contains("save_memory"));
    }

    #[tokio::test]
    async fn test_custom_prompt() {
        let provider = TestModelProvider::default();
        provider.add_response(PresetResponse::with_events([
            PresetEvent::delta("Arr."),
        ]));
        let session = builder(&provider)
            .with_memory(true)
            .with_system_prompt("Talk like a pirate.")
            .build()
            .unwrap();
        session.run_turn_blocking("Hello").await.unwrap();
        assert_eq!(system_prompt_of(&provider), "Talk like a pirate.");
    }

    #[tokio::test]
    async fn test_calculator_turn() {
        let provider = TestModelProvider::default();
        provider.add_response(PresetResponse::with_events([
            PresetEvent::tool_call(
                "call_0",
                "calculate",
                json!({ "expression": "2 + 2 * 3" }),
            ),
        ]));
        provider.add_response(PresetResponse::with_events([
            PresetEvent::delta("It's 8."),
        ]));
        let session = builder(&provider).build().unwrap();

        let mut renderer = session.renderer();
        let mut turn = session.run_turn("What is 2 + 2 * 3?");
        let mut printed = String::new();
        while let Some(snapshot) = turn.next().await {
            for fragment in renderer.render(&snapshot) {
                printed.push_str(&fragment.to_string());
            }
        }
        // Tools are hidden by default.
        assert_eq!(printed, "It's 8.");

        let requests = provider.requests();
        let tool_output = requests[1].messages.iter().find_map(|msg| match msg {
            ModelMessage::Tool(result) => Some(result.content.clone()),
            _ => None,
        });
        assert_eq!(tool_output.as_deref(), Some("Result: 8"));
    }

    #[tokio::test]
    async fn test_tool_output_shown_before_empty_answer() {
        let provider = TestModelProvider::default();
        provider.add_response(PresetResponse::with_events([
            PresetEvent::tool_call(
                "call_0",
                "calculate",
                json!({ "expression": "6 * 7" }),
            ),
        ]));
        let empty: Vec<PresetEvent> = vec![];
        provider.add_response(PresetResponse::with_events(empty));
        let session = builder(&provider).with_show_tools(true).build().unwrap();

        let mut renderer = session.renderer();
        let mut turn = session.run_turn("What is 6 * 7?");
        let mut fragments = vec![];
        while let Some(snapshot) = turn.next().await {
            fragments.extend(renderer.render(&snapshot));
        }
        assert_eq!(
            fragments,
            [
                Fragment::ToolInvocation {
                    name: "calculate".to_owned(),
                    arguments: "expression=6 * 7".to_owned(),
                },
                Fragment::ToolOutput {
                    name: "calculate".to_owned(),
                    output: "Result: 42".to_owned(),
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_initialize() {
        let provider = TestModelProvider::default();
        let session = Session::initialize_with(provider, &config())
            .await
            .unwrap();
        assert!(session.show_tools());

        let provider = TestModelProvider::default();
        provider.set_unreachable();
        let result = Session::initialize_with(provider, &config()).await;
        assert!(matches!(
            result,
            Err(InitializationError::Unreachable { base_url, .. })
                if base_url == "http://localhost:11434"
        ));
    }
}
