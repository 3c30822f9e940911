use std::collections::HashMap;

use deep_agent_model::{ModelTool, ToolCallRequest, ToolCallResult};
use tokio::task::JoinHandle;
use tracing::Instrument;

use crate::error::BuildError;
use crate::tool::{Error, ToolObject, ToolResult};

/// An executor that handles tool call requests from the model.
pub struct Executor {
    // Registration order is kept so the model always sees the same
    // definitions in the same order.
    tools: Vec<Box<dyn ToolObject>>,
    index: HashMap<String, usize>,
}

impl Executor {
    pub fn with_tools(
        tools: Vec<Box<dyn ToolObject>>,
    ) -> Result<Self, BuildError> {
        let mut index = HashMap::with_capacity(tools.len());
        for (idx, tool) in tools.iter().enumerate() {
            let name = tool.name();
            if index.insert(name.to_owned(), idx).is_some() {
                return Err(BuildError::DuplicateToolName(name.to_owned()));
            }
        }
        Ok(Self { tools, index })
    }

    #[inline]
    pub fn definitions(&self) -> Vec<ModelTool> {
        self.tools.iter().map(|tool| tool.definition()).collect()
    }

    #[inline]
    pub fn tool_names(&self) -> impl Iterator<Item = &str> {
        self.tools.iter().map(|tool| tool.name())
    }

    /// Starts executing the request on its own task.
    ///
    /// Must be called within a tokio runtime.
    pub fn spawn(&self, req: ToolCallRequest) -> RunningToolCall {
        let ToolCallRequest {
            id,
            name,
            arguments,
        } = req;

        let Some(tool) = self.index.get(&name).map(|idx| &self.tools[*idx])
        else {
            warn!("tool not found: {name}");
            let err = Error::not_found()
                .with_reason(format!("tool `{name}` does not exist"));
            return RunningToolCall {
                id,
                name,
                outcome: Outcome::Ready(Err(err)),
            };
        };

        trace!("spawning a tool ({id}) with args: {arguments:?}");
        let fut = tool
            .execute(arguments)
            .instrument(debug_span!("tool execute", tool = %name));
        RunningToolCall {
            id,
            name,
            outcome: Outcome::Running(Some(tokio::spawn(fut))),
        }
    }
}

enum Outcome {
    Running(Option<JoinHandle<ToolResult>>),
    Ready(ToolResult),
}

/// A tool call that has been started. The task is aborted if this is
/// dropped before finishing.
pub struct RunningToolCall {
    id: String,
    name: String,
    outcome: Outcome,
}

impl RunningToolCall {
    /// Waits for the tool and converts its outcome into the text that is
    /// handed back to the model. Failures, including panics inside the
    /// tool, become an `Error: ...` text instead of an error.
    pub async fn finish(mut self) -> ToolCallResult {
        let outcome =
            std::mem::replace(&mut self.outcome, Outcome::Running(None));
        let result = match outcome {
            Outcome::Ready(result) => result,
            Outcome::Running(Some(handle)) => match handle.await {
                Ok(result) => result,
                Err(err) if err.is_panic() => {
                    error!("tool `{}` panicked", self.name);
                    Err(Error::execution_error()
                        .with_reason(format!("tool `{}` crashed", self.name)))
                }
                Err(_) => Err(Error::execution_error().with_reason(format!(
                    "tool `{}` was cancelled",
                    self.name
                ))),
            },
            Outcome::Running(None) => Err(Error::execution_error()),
        };

        let content = match result {
            Ok(output) => output,
            Err(err) => {
                debug!("tool `{}` failed: {err}", self.name);
                format!("Error: {err}")
            }
        };
        ToolCallResult {
            id: std::mem::take(&mut self.id),
            name: std::mem::take(&mut self.name),
            content,
        }
    }
}

impl Drop for RunningToolCall {
    fn drop(&mut self) {
        if let Outcome::Running(Some(handle)) = &self.outcome {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::future::ready;

    use serde::Deserialize;
    use serde_json::{Value, json};

    use super::*;
    use crate::tool::{AnyTool, Tool};

    static EMPTY_SCHEMA: &Value = &Value::Null;

    #[derive(Deserialize)]
    struct EchoInput {
        text: String,
    }

    struct EchoTool;

    impl Tool for EchoTool {
        type Input = EchoInput;

        fn name(&self) -> &str {
            "echo"
        }

        fn description(&self) -> &str {
            "Echoes the text"
        }

        fn parameter_schema(&self) -> &Value {
            EMPTY_SCHEMA
        }

        fn execute(
            &self,
            input: Self::Input,
        ) -> impl Future<Output = ToolResult> + Send + 'static {
            ready(Ok(input.text))
        }
    }

    struct PanickingTool;

    impl Tool for PanickingTool {
        type Input = Value;

        fn name(&self) -> &str {
            "panic"
        }

        fn description(&self) -> &str {
            "Always panics"
        }

        fn parameter_schema(&self) -> &Value {
            EMPTY_SCHEMA
        }

        #[allow(clippy::manual_async_fn)]
        fn execute(
            &self,
            _input: Self::Input,
        ) -> impl Future<Output = ToolResult> + Send + 'static {
            async { panic!("boom") }
        }
    }

    fn executor() -> Executor {
        Executor::with_tools(vec![
            Box::new(AnyTool(EchoTool)),
            Box::new(AnyTool(PanickingTool)),
        ])
        .unwrap()
    }

    fn request(name: &str, arguments: Value) -> ToolCallRequest {
        ToolCallRequest {
            id: "call_0".to_owned(),
            name: name.to_owned(),
            arguments,
        }
    }

    #[test]
    fn test_duplicate_names() {
        let result = Executor::with_tools(vec![
            Box::new(AnyTool(EchoTool)),
            Box::new(AnyTool(EchoTool)),
        ]);
        assert_eq!(
            result.err(),
            Some(BuildError::DuplicateToolName("echo".to_owned()))
        );
    }

    #[test]
    fn test_definitions_keep_order() {
        let names: Vec<_> = executor()
            .definitions()
            .into_iter()
            .map(|tool| tool.name)
            .collect();
        assert_eq!(names, ["echo", "panic"]);
    }

    #[tokio::test]
    async fn test_execute() {
        let executor = executor();
        let result = executor
            .spawn(request("echo", json!({ "text": "hi" })))
            .finish()
            .await;
        assert_eq!(result.id, "call_0");
        assert_eq!(result.name, "echo");
        assert_eq!(result.content, "hi");
    }

    #[tokio::test]
    async fn test_failures_become_text() {
        let executor = executor();

        let result = executor
            .spawn(request("echo", json!({ "wrong": 1 })))
            .finish()
            .await;
        assert!(result.content.starts_with("Error: missing field `text`"));

        let result =
            executor.spawn(request("read_file", json!({}))).finish().await;
        assert_eq!(result.content, "Error: tool `read_file` does not exist");

        let result = executor.spawn(request("panic", json!({}))).finish().await;
        assert_eq!(result.content, "Error: tool `panic` crashed");
    }
}
