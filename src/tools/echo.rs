use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};

use super::{ToolContext, ToolHandler};
use crate::protocol::{Tool, ToolAnnotations};

/// Echoes its input; needs no downstream access
pub struct Echo;

#[derive(Debug, Deserialize)]
pub struct EchoInput {
    message: String,
}

#[async_trait]
impl ToolHandler for Echo {
    type Input = EchoInput;

    fn definition(&self) -> Tool {
        Tool {
            name: "echo".to_string(),
            title: Some("Echo Tool".to_string()),
            description: Some("Echoes back the provided message".to_string()),
            input_schema: json!({
                "type": "object",
                "properties": {"message": {"type": "string"}},
                "required": ["message"]
            }),
            output_schema: Some(json!({
                "type": "object",
                "properties": {"echo": {"type": "string"}},
                "required": ["echo"]
            })),
            annotations: Some(ToolAnnotations {
                read_only_hint: Some(true),
                open_world_hint: Some(false),
            }),
        }
    }

    async fn run(&self, _ctx: &ToolContext, input: EchoInput) -> crate::Result<Value> {
        Ok(json!({ "echo": format!("Tool echo: {}", input.message) }))
    }
}
