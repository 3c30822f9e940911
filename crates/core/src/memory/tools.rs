use std::sync::Arc;

use schemars::{JsonSchema, schema_for};
use serde::Deserialize;
use serde_json::Value;

use super::MemoryStore;
use crate::tool::{Error as ToolError, Tool, ToolResult};

/// Input of [`SaveMemoryTool`].
#[derive(Deserialize, JsonSchema)]
pub struct SaveMemoryParameters {
    #[schemars(
        description = "A short, stable name for the fact, e.g. `user_name`."
    )]
    key: String,
    #[schemars(description = "The fact to remember.")]
    value: String,
}

/// A tool that stores a fact in long-term memory.
pub struct SaveMemoryTool {
    store: Arc<dyn MemoryStore>,
    parameter_schema: Value,
}

impl SaveMemoryTool {
    /// Creates a new tool writing into `store`.
    #[inline]
    pub fn new(store: Arc<dyn MemoryStore>) -> Self {
        Self {
            store,
            parameter_schema: schema_for!(SaveMemoryParameters).to_value(),
        }
    }
}

impl Tool for SaveMemoryTool {
    type Input = SaveMemoryParameters;

    fn name(&self) -> &str {
        "save_memory"
    }

    fn description(&self) -> &str {
        r#"
Saves a fact to long-term memory so it can be recalled in later turns.
Saving under an existing key replaces the old value."#
    }

    fn parameter_schema(&self) -> &Value {
        &self.parameter_schema
    }

    #[allow(clippy::manual_async_fn)]
    fn execute(
        &self,
        input: SaveMemoryParameters,
    ) -> impl Future<Output = ToolResult> + Send + 'static {
        let store = Arc::clone(&self.store);
        async move {
            let key = input.key.trim();
            if key.is_empty() {
                return Err(ToolError::invalid_input()
                    .with_reason("memory key must not be empty"));
            }
            store.put(key, &input.value).await;
            debug!("saved memory `{key}`");
            Ok(format!("Saved memory `{key}`."))
        }
    }
}

/// Input of [`RecallMemoryTool`].
#[derive(Deserialize, JsonSchema)]
pub struct RecallMemoryParameters {
    #[schemars(
        description = "The key to look up. Omit it to list all stored keys."
    )]
    #[serde(default)]
    key: Option<String>,
}

/// A tool that reads facts back from long-term memory.
pub struct RecallMemoryTool {
    store: Arc<dyn MemoryStore>,
    parameter_schema: Value,
}

impl RecallMemoryTool {
    /// Creates a new tool reading from `store`.
    #[inline]
    pub fn new(store: Arc<dyn MemoryStore>) -> Self {
        Self {
            store,
            parameter_schema: schema_for!(RecallMemoryParameters).to_value(),
        }
    }
}

impl Tool for RecallMemoryTool {
    type Input = RecallMemoryParameters;

    fn name(&self) -> &str {
        "recall_memory"
    }

    fn description(&self) -> &str {
        r#"
Recalls a fact from long-term memory by its key.
Without a key, lists the keys of all stored facts."#
    }

    fn parameter_schema(&self) -> &Value {
        &self.parameter_schema
    }

    #[allow(clippy::manual_async_fn)]
    fn execute(
        &self,
        input: RecallMemoryParameters,
    ) -> impl Future<Output = ToolResult> + Send + 'static {
        let store = Arc::clone(&self.store);
        async move {
            let key = input.key.as_deref().map(str::trim).unwrap_or_default();
            if key.is_empty() {
                let keys = store.keys().await;
                if keys.is_empty() {
                    return Ok("No memories stored yet.".to_owned());
                }
                return Ok(format!("Stored memories: {}", keys.join(", ")));
            }

            match store.get(key).await {
                Some(value) => Ok(value),
                None => Err(ToolError::execution_error()
                    .with_reason(format!("no memory stored under `{key}`"))),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::memory::InMemoryStore;
    use crate::tool::ErrorKind;

    fn store() -> Arc<dyn MemoryStore> {
        Arc::new(InMemoryStore::new())
    }

    fn input<T: serde::de::DeserializeOwned>(value: Value) -> T {
        serde_json::from_value(value).unwrap()
    }

    #[tokio::test]
    async fn test_save_then_recall() {
        let store = store();
        let save = SaveMemoryTool::new(Arc::clone(&store));
        let recall = RecallMemoryTool::new(Arc::clone(&store));

        let output = save
            .execute(input(json!({ "key": "city", "value": "Berlin" })))
            .await
            .unwrap();
        assert_eq!(output, "Saved memory `city`.");

        let output = recall.execute(input(json!({ "key": "city" }))).await;
        assert_eq!(output.unwrap(), "Berlin");

        let err = recall
            .execute(input(json!({ "key": "country" })))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ExecutionError);
    }

    #[tokio::test]
    async fn test_recall_lists_keys() {
        let store = store();
        let recall = RecallMemoryTool::new(Arc::clone(&store));
        let output = recall.execute(input(json!({}))).await.unwrap();
        assert_eq!(output, "No memories stored yet.");

        store.put("tea", "green").await;
        store.put("city", "Berlin").await;
        let output = recall.execute(input(json!({}))).await.unwrap();
        assert_eq!(output, "Stored memories: city, tea");
    }

    #[tokio::test]
    async fn test_empty_key() {
        let save = SaveMemoryTool::new(store());
        let err = save
            .execute(input(json!({ "key": "  ", "value": "x" })))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }

    #[test]
    fn test_schema_lists_parameters() {
        let save = SaveMemoryTool::new(store());
        let props = &save.parameter_schema()["properties"];
        assert!(props.get("key").is_some());
        assert!(props.get("value").is_some());
    }
}
