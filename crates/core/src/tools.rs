//! Tool execution seam and its MCP-backed implementation.

use anyhow::{Result, anyhow, bail};
use async_trait::async_trait;
use rmcp::{
    model::{CallToolRequestParam, RawContent},
    service::{RoleClient, RunningService},
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::info;

use crate::message::ToolCall;

/// A tool declaration advertised to the provider at connect time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    /// JSON schema of the arguments object.
    pub parameters: Value,
}

/// Executes tool calls requested by the model.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ToolEngine: Send + Sync {
    /// The tools this engine can execute.
    async fn schemas(&self) -> Result<Vec<ToolSchema>>;

    /// Runs one call. An `Err` is reported back to the model as the tool's output.
    async fn execute(&self, call: &ToolCall) -> Result<Value>;
}

/// A tool engine with no tools.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoTools;

#[async_trait]
impl ToolEngine for NoTools {
    async fn schemas(&self) -> Result<Vec<ToolSchema>> {
        Ok(Vec::new())
    }

    async fn execute(&self, call: &ToolCall) -> Result<Value> {
        Err(anyhow!("Unknown tool: '{}'", call.name))
    }
}

/// Adapts an MCP client session to [`ToolEngine`].
pub struct McpToolEngine {
    client: RunningService<RoleClient, ()>,
}

impl McpToolEngine {
    pub fn new(client: RunningService<RoleClient, ()>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ToolEngine for McpToolEngine {
    async fn schemas(&self) -> Result<Vec<ToolSchema>> {
        self.client
            .list_all_tools()
            .await?
            .into_iter()
            .map(|tool| {
                Ok(ToolSchema {
                    name: tool.name.to_string(),
                    description: tool.description.map(|d| d.to_string()).unwrap_or_default(),
                    parameters: serde_json::to_value(&*tool.input_schema)?,
                })
            })
            .collect()
    }

    async fn execute(&self, call: &ToolCall) -> Result<Value> {
        info!(call_id = %call.id, tool = %call.name, "Calling MCP tool.");
        let arguments = match &call.arguments {
            Value::Object(map) => Some(map.clone()),
            Value::Null => None,
            other => bail!("Tool arguments must be a JSON object, got: {}", other),
        };

        let result = self
            .client
            .peer()
            .call_tool(CallToolRequestParam {
                name: call.name.clone().into(),
                arguments,
            })
            .await?;

        let texts: Vec<String> = result
            .content
            .unwrap_or_default()
            .into_iter()
            .filter_map(|annotated| match annotated.raw {
                RawContent::Text(text_content) => Some(text_content.text),
                _ => None,
            })
            .collect();

        if result.is_error == Some(true) {
            bail!("{}", texts.join("\n"));
        }
        if let Some(structured) = result.structured_content {
            return Ok(structured);
        }
        Ok(text_output(texts))
    }
}

/// A single JSON text block is returned as-is; anything else is wrapped.
fn text_output(mut texts: Vec<String>) -> Value {
    if texts.len() == 1 {
        let text = texts.remove(0);
        return serde_json::from_str(&text).unwrap_or_else(|_| json!({ "output": text }));
    }
    json!({ "output": texts.join("\n") })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn no_tools_has_no_schemas_and_rejects_calls() {
        let engine = NoTools;
        assert!(engine.schemas().await.unwrap().is_empty());

        let call = ToolCall {
            id: "1".into(),
            name: "missing".into(),
            arguments: Value::Null,
        };
        let err = engine.execute(&call).await.unwrap_err();
        assert_eq!(err.to_string(), "Unknown tool: 'missing'");
    }

    #[test]
    fn json_text_output_is_passed_through() {
        assert_eq!(
            text_output(vec![r#"{"temp": 21}"#.to_string()]),
            json!({ "temp": 21 })
        );
    }

    #[test]
    fn plain_text_output_is_wrapped() {
        assert_eq!(
            text_output(vec!["sunny".to_string()]),
            json!({ "output": "sunny" })
        );
        assert_eq!(
            text_output(vec!["a".to_string(), "b".to_string()]),
            json!({ "output": "a\nb" })
        );
        assert_eq!(text_output(vec![]), json!({ "output": "" }));
    }
}
