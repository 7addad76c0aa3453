use async_trait::async_trait;
use pipecore::{Invocable, NodeContext, NodeError, NodeOutput, Parameter, Value, ValueMap};
use piperuntime::{FunctionFactory, FunctionMetadata};
use std::sync::Arc;

/// HTTP request function
///
/// Inputs: `url` (required), `body` (optional). Config: `method` (default
/// GET), `headers` (object of strings).
pub struct HttpRequest {
    client: reqwest::Client,
}

impl HttpRequest {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for HttpRequest {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Invocable for HttpRequest {
    fn kind(&self) -> &str {
        "http.request"
    }

    async fn invoke(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let url = ctx.require_str("url")?;
        let method_value = ctx.get_config_or("method", Value::from("GET"));
        let method = method_value.as_str().unwrap_or("GET").to_uppercase();

        ctx.events.info(format!("{} {}", method, url));

        let mut request = match method.as_str() {
            "GET" => self.client.get(url),
            "POST" => self.client.post(url),
            "PUT" => self.client.put(url),
            "PATCH" => self.client.patch(url),
            "DELETE" => self.client.delete(url),
            _ => {
                return Err(NodeError::Configuration(format!(
                    "Unsupported method: {}",
                    method
                )))
            }
        };

        match ctx.inputs.get("body") {
            None | Some(Value::Null) => {}
            Some(Value::String(text)) => request = request.body(text.clone()),
            Some(other) => request = request.json(&other.to_json()),
        }

        if let Some(Value::Object(headers)) = ctx.config.get("headers") {
            for (key, value) in headers {
                if let Some(val_str) = value.as_str() {
                    request = request.header(key, val_str);
                }
            }
        }

        let response = request
            .send()
            .await
            .map_err(|e| NodeError::ExecutionFailed(format!("HTTP request failed: {}", e)))?;

        let status = response.status().as_u16();
        let headers: ValueMap = response
            .headers()
            .iter()
            .map(|(k, v)| (k.to_string(), Value::from(v.to_str().unwrap_or(""))))
            .collect();

        let body = response
            .text()
            .await
            .map_err(|e| NodeError::ExecutionFailed(format!("Failed to read response: {}", e)))?;

        ctx.events.info(format!("Response status: {}", status));

        Ok(NodeOutput::new()
            .with_output("status", status as u64)
            .with_output("body", body)
            .with_output("headers", headers))
    }
}

pub struct HttpRequestFactory;

impl FunctionFactory for HttpRequestFactory {
    fn create(&self, _config: &ValueMap) -> Result<Arc<dyn Invocable>, NodeError> {
        Ok(Arc::new(HttpRequest::new()))
    }

    fn name(&self) -> &str {
        "http.request"
    }

    fn metadata(&self) -> FunctionMetadata {
        FunctionMetadata {
            description: "Make HTTP requests".to_string(),
            category: "http".to_string(),
            inputs: vec![Parameter::new("url", "string"), Parameter::new("body", "any")],
            outputs: vec![
                Parameter::new("status", "number"),
                Parameter::new("body", "string"),
                Parameter::new("headers", "object"),
            ],
        }
    }
}
