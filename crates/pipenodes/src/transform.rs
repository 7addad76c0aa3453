use async_trait::async_trait;
use pipecore::{Invocable, NodeContext, NodeError, NodeOutput, Parameter, Value, ValueMap};
use piperuntime::{FunctionFactory, FunctionMetadata};
use std::sync::Arc;

/// Parse a JSON string into a value
pub struct JsonParse;

#[async_trait]
impl Invocable for JsonParse {
    fn kind(&self) -> &str {
        "json.parse"
    }

    async fn invoke(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let input = ctx.require_str("json")?;

        let parsed: serde_json::Value = serde_json::from_str(input)
            .map_err(|e| NodeError::ExecutionFailed(format!("JSON parse error: {}", e)))?;

        Ok(NodeOutput::new().with_output("parsed", Value::from(parsed)))
    }
}

pub struct JsonParseFactory;

impl FunctionFactory for JsonParseFactory {
    fn create(&self, _config: &ValueMap) -> Result<Arc<dyn Invocable>, NodeError> {
        Ok(Arc::new(JsonParse))
    }

    fn name(&self) -> &str {
        "json.parse"
    }

    fn metadata(&self) -> FunctionMetadata {
        FunctionMetadata {
            description: "Parse JSON string".to_string(),
            category: "transform".to_string(),
            inputs: vec![Parameter::new("json", "string")],
            outputs: vec![Parameter::new("parsed", "any")],
        }
    }
}

/// Serialize a value to a JSON string; `pretty` in config selects indentation
pub struct JsonStringify;

#[async_trait]
impl Invocable for JsonStringify {
    fn kind(&self) -> &str {
        "json.stringify"
    }

    async fn invoke(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let value = ctx.require_input("value")?;
        let pretty = ctx
            .get_config_or("pretty", Value::Bool(false))
            .as_bool()
            .unwrap_or(false);

        let json_str = if pretty {
            serde_json::to_string_pretty(value)
        } else {
            serde_json::to_string(value)
        }
        .map_err(|e| NodeError::ExecutionFailed(format!("JSON stringify error: {}", e)))?;

        Ok(NodeOutput::new().with_output("json", json_str))
    }
}

pub struct JsonStringifyFactory;

impl FunctionFactory for JsonStringifyFactory {
    fn create(&self, _config: &ValueMap) -> Result<Arc<dyn Invocable>, NodeError> {
        Ok(Arc::new(JsonStringify))
    }

    fn name(&self) -> &str {
        "json.stringify"
    }

    fn metadata(&self) -> FunctionMetadata {
        FunctionMetadata {
            description: "Convert value to JSON string".to_string(),
            category: "transform".to_string(),
            inputs: vec![Parameter::new("value", "any")],
            outputs: vec![Parameter::new("json", "string")],
        }
    }
}
