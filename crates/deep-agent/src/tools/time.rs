use std::future::ready;

use chrono::{DateTime, Local, TimeZone};
use deep_agent_core::tool::{Tool, ToolResult};
use schemars::{JsonSchema, schema_for};
use serde::Deserialize;
use serde_json::Value;

/// Input of [`CurrentTimeTool`]. The tool takes no parameters.
#[derive(Deserialize, JsonSchema)]
pub struct CurrentTimeToolParameters {}

/// A tool for reading the local date and time.
pub struct CurrentTimeTool {
    parameter_schema: Value,
}

impl CurrentTimeTool {
    /// Creates a new clock tool.
    #[inline]
    pub fn new() -> Self {
        CurrentTimeTool {
            parameter_schema: schema_for!(CurrentTimeToolParameters).to_value(),
        }
    }
}

impl Default for CurrentTimeTool {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

impl Tool for CurrentTimeTool {
    type Input = CurrentTimeToolParameters;

    fn name(&self) -> &str {
        "get_current_time"
    }

    fn description(&self) -> &str {
        "Gets the current date and time."
    }

    fn parameter_schema(&self) -> &Value {
        &self.parameter_schema
    }

    fn execute(
        &self,
        _input: CurrentTimeToolParameters,
    ) -> impl Future<Output = ToolResult> + Send + 'static {
        ready(Ok(format_time(&Local::now())))
    }
}

fn format_time<Tz: TimeZone>(now: &DateTime<Tz>) -> String
where
    Tz::Offset: std::fmt::Display,
{
    format!("Current time: {}", now.format("%Y-%m-%d %H:%M:%S"))
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use serde_json::json;

    use super::*;

    #[test]
    fn test_format_time() {
        let time = Utc.with_ymd_and_hms(2024, 3, 9, 7, 5, 30).unwrap();
        assert_eq!(format_time(&time), "Current time: 2024-03-09 07:05:30");
    }

    #[tokio::test]
    async fn test_execute() {
        let tool = CurrentTimeTool::new();
        let input: CurrentTimeToolParameters =
            serde_json::from_value(json!({})).unwrap();
        let output = tool.execute(input).await.unwrap();
        let stamp = output.strip_prefix("Current time: ").unwrap();
        assert_eq!(stamp.len(), "2024-03-09 07:05:30".len());
    }
}
