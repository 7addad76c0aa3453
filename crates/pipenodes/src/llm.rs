use crate::text::render_template;
use async_trait::async_trait;
use pipecore::{Invocable, NodeContext, NodeError, NodeOutput, Parameter, Value, ValueMap};
use piperuntime::{FunctionFactory, FunctionMetadata};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

const OPENAI_API_URL: &str = "https://api.openai.com/v1/chat/completions";

/// Connection settings for an OpenAI-compatible chat completion endpoint.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub api_url: String,
    pub api_key: Option<String>,
    pub model: String,
    pub temperature: f32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_url: OPENAI_API_URL.to_string(),
            api_key: None,
            model: "gpt-4".to_string(),
            temperature: 0.2,
        }
    }
}

impl LlmConfig {
    /// Read `OPENAI_API_URL`, `OPENAI_API_KEY` and `PIPEFLOW_LLM_MODEL`.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            api_url: std::env::var("OPENAI_API_URL").unwrap_or(defaults.api_url),
            api_key: std::env::var("OPENAI_API_KEY").ok(),
            model: std::env::var("PIPEFLOW_LLM_MODEL").unwrap_or(defaults.model),
            temperature: defaults.temperature,
        }
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    temperature: f32,
}

#[derive(Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Deserialize, Debug)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize, Debug)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize, Debug)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Single-turn chat completion.
///
/// The prompt is the `prompt` config entry rendered with the node's inputs;
/// without one, inputs are listed as `name: value` lines. Produces `result`.
/// Config may override `model` and `temperature` per node.
pub struct LlmComplete {
    http: reqwest::Client,
    config: LlmConfig,
}

impl LlmComplete {
    pub fn new(config: LlmConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
        }
    }

    fn build_prompt(ctx: &NodeContext) -> Result<String, NodeError> {
        match ctx.config.get("prompt") {
            Some(Value::String(template)) => render_template(template, &ctx.inputs),
            Some(_) => Err(NodeError::Configuration(
                "prompt must be a string".to_string(),
            )),
            None => Ok(ctx
                .inputs
                .iter()
                .map(|(k, v)| format!("{}: {}", k, v.to_display_string()))
                .collect::<Vec<_>>()
                .join("\n")),
        }
    }
}

#[async_trait]
impl Invocable for LlmComplete {
    fn kind(&self) -> &str {
        "llm.complete"
    }

    async fn invoke(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let prompt = Self::build_prompt(&ctx)?;
        let model_value = ctx.get_config_or("model", Value::from(self.config.model.as_str()));
        let model = model_value.as_str().unwrap_or(&self.config.model);
        let temperature = ctx
            .config
            .get("temperature")
            .and_then(|v| v.as_f64())
            .map(|t| t as f32)
            .unwrap_or(self.config.temperature);

        let body = ChatRequest {
            model,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
            temperature,
        };

        tracing::debug!(node = %ctx.node_id, model, "requesting completion");
        ctx.events.info(format!("Requesting completion from {}", model));

        let mut request = self
            .http
            .post(&self.config.api_url)
            .header("content-type", "application/json")
            .json(&body);
        if let Some(key) = &self.config.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| NodeError::ExecutionFailed(format!("LLM request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(NodeError::ExecutionFailed(format!(
                "LLM endpoint returned {}: {}",
                status, text
            )));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| NodeError::ExecutionFailed(format!("Invalid LLM response: {}", e)))?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| {
                NodeError::ExecutionFailed("LLM response contained no message".to_string())
            })?;

        Ok(NodeOutput::new().with_output("result", content))
    }
}

pub struct LlmCompleteFactory {
    config: LlmConfig,
}

impl LlmCompleteFactory {
    pub fn new(config: LlmConfig) -> Self {
        Self { config }
    }
}

impl FunctionFactory for LlmCompleteFactory {
    fn create(&self, _config: &ValueMap) -> Result<Arc<dyn Invocable>, NodeError> {
        Ok(Arc::new(LlmComplete::new(self.config.clone())))
    }

    fn name(&self) -> &str {
        "llm.complete"
    }

    fn metadata(&self) -> FunctionMetadata {
        FunctionMetadata {
            description: "Chat completion against an OpenAI-compatible endpoint".to_string(),
            category: "ai".to_string(),
            inputs: Vec::new(),
            outputs: vec![Parameter::new("result", "string")],
        }
    }
}
