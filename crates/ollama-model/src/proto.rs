use deep_agent_model::{ModelMessage, ModelRequest, ModelTool, ToolCallRequest};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::OllamaConfig;

// ------------------------------
// Types received from the server
// ------------------------------

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub function: FunctionCall,
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct ChunkMessage {
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
}

/// One line of a streamed `/api/chat` response.
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct ChatChunk {
    pub message: Option<ChunkMessage>,
    #[serde(default)]
    pub done: bool,
    pub done_reason: Option<String>,
    pub error: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct LocalModel {
    pub name: String,
}

/// Response of `/api/tags`.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct TagsResponse {
    #[serde(default)]
    pub models: Vec<LocalModel>,
}

/// Body of a non-2xx response.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

// ------------------------
// Types sent to the server
// ------------------------

#[derive(Clone, Debug, PartialEq, Serialize)]
struct FunctionTool {
    name: String,
    description: String,
    parameters: Value,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
struct Tool {
    r#type: &'static str,
    function: FunctionTool,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "role", rename_all = "lowercase")]
pub enum Message {
    System {
        content: String,
    },
    User {
        content: String,
    },
    Assistant {
        content: String,
        #[serde(skip_serializing_if = "Vec::is_empty")]
        tool_calls: Vec<ToolCall>,
    },
    Tool {
        content: String,
        tool_name: String,
    },
}

#[derive(Clone, Debug, PartialEq, Serialize)]
struct Options {
    temperature: f32,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ChatRequest {
    model: String,
    messages: Vec<Message>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<Tool>,
    options: Options,
    stream: bool,
}

// -----------
// Conversions
// -----------

#[inline]
pub fn create_request(
    req: &ModelRequest,
    config: &OllamaConfig,
) -> ChatRequest {
    ChatRequest {
        model: config.model.clone(),
        messages: req.messages.iter().map(create_message).collect(),
        tools: req.tools.iter().map(create_tool).collect(),
        options: Options {
            temperature: config.temperature,
        },
        stream: true,
    }
}

#[inline]
fn create_message(msg: &ModelMessage) -> Message {
    match msg {
        ModelMessage::System(content) => Message::System {
            content: content.clone(),
        },
        ModelMessage::User(content) => Message::User {
            content: content.clone(),
        },
        ModelMessage::Assistant {
            content,
            tool_calls,
        } => Message::Assistant {
            content: content.clone(),
            tool_calls: tool_calls.iter().map(create_tool_call).collect(),
        },
        ModelMessage::Tool(result) => Message::Tool {
            content: result.content.clone(),
            tool_name: result.name.clone(),
        },
    }
}

#[inline]
fn create_tool_call(req: &ToolCallRequest) -> ToolCall {
    ToolCall {
        id: Some(req.id.clone()),
        function: FunctionCall {
            name: req.name.clone(),
            arguments: req.arguments.clone(),
        },
    }
}

#[inline]
fn create_tool(tool: &ModelTool) -> Tool {
    Tool {
        r#type: "function",
        function: FunctionTool {
            name: tool.name.clone(),
            description: tool.description.clone(),
            parameters: tool.parameters.clone(),
        },
    }
}

/// Converts a tool call from the server. Servers that don't assign ids get
/// a positional one, so the result can be matched with the request.
#[inline]
pub fn into_tool_call_request(
    call: ToolCall,
    position: usize,
) -> ToolCallRequest {
    let arguments = match call.function.arguments {
        // Some models send the arguments as an encoded JSON string.
        Value::String(encoded) => serde_json::from_str(&encoded)
            .unwrap_or(Value::String(encoded)),
        Value::Null => Value::Object(Map::new()),
        other => other,
    };
    ToolCallRequest {
        id: call.id.unwrap_or_else(|| format!("call_{position}")),
        name: call.function.name,
        arguments,
    }
}

#[cfg(test)]
mod tests {
    use deep_agent_model::ToolCallResult;
    use serde_json::json;

    use super::*;
    use crate::OllamaConfigBuilder;

    #[test]
    fn test_create_request() {
        let request = ModelRequest {
            messages: vec![
                ModelMessage::System("You are a helpful assistant.".to_owned()),
                ModelMessage::User("What is 2 + 2?".to_owned()),
                ModelMessage::Assistant {
                    content: String::new(),
                    tool_calls: vec![ToolCallRequest {
                        id: "call_0".to_owned(),
                        name: "calculate".to_owned(),
                        arguments: json!({ "expression": "2 + 2" }),
                    }],
                },
                ModelMessage::Tool(ToolCallResult {
                    id: "call_0".to_owned(),
                    name: "calculate".to_owned(),
                    content: "Result: 4".to_owned(),
                }),
            ],
            tools: vec![ModelTool {
                name: "calculate".to_owned(),
                description: "Evaluates arithmetic.".to_owned(),
                parameters: json!({ "type": "object" }),
            }],
        };
        let config = OllamaConfigBuilder::with_model("llama3.1")
            .with_temperature(0.5)
            .build();

        let body = serde_json::to_value(create_request(&request, &config))
            .unwrap();
        let expected = json!({
            "model": "llama3.1",
            "messages": [
                { "role": "system", "content": "You are a helpful assistant." },
                { "role": "user", "content": "What is 2 + 2?" },
                {
                    "role": "assistant",
                    "content": "",
                    "tool_calls": [{
                        "id": "call_0",
                        "function": {
                            "name": "calculate",
                            "arguments": { "expression": "2 + 2" }
                        }
                    }]
                },
                {
                    "role": "tool",
                    "content": "Result: 4",
                    "tool_name": "calculate"
                }
            ],
            "tools": [{
                "type": "function",
                "function": {
                    "name": "calculate",
                    "description": "Evaluates arithmetic.",
                    "parameters": { "type": "object" }
                }
            }],
            "options": { "temperature": 0.5 },
            "stream": true
        });
        assert_eq!(body, expected);
    }

    #[test]
    fn test_tool_call_arguments() {
        let call: ToolCall = serde_json::from_value(json!({
            "function": {
                "name": "web_search",
                "arguments": "{\"query\":\"rust\",\"max_results\":3}"
            }
        }))
        .unwrap();
        let req = into_tool_call_request(call, 2);
        assert_eq!(req.id, "call_2");
        assert_eq!(req.arguments, json!({ "query": "rust", "max_results": 3 }));

        let call: ToolCall = serde_json::from_value(json!({
            "id": "abc",
            "function": { "name": "get_current_time" }
        }))
        .unwrap();
        let req = into_tool_call_request(call, 0);
        assert_eq!(req.id, "abc");
        assert_eq!(req.arguments, json!({}));
    }
}
