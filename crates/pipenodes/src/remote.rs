use async_trait::async_trait;
use pipecore::{Language, TransformExecutor, TransformationError, Value};
use std::time::Duration;

/// Where and how long to wait for the per-language transform services.
#[derive(Debug, Clone)]
pub struct RemoteTransformConfig {
    /// `{language}` is replaced with `python`, `javascript` or `go`.
    pub url_template: String,
    pub timeout: Duration,
}

impl Default for RemoteTransformConfig {
    fn default() -> Self {
        Self {
            url_template: "http://executor-{language}:8000/transform".to_string(),
            timeout: Duration::from_secs(10),
        }
    }
}

impl RemoteTransformConfig {
    pub fn url_for(&self, language: Language) -> String {
        self.url_template.replace("{language}", language.as_str())
    }
}

/// Runs custom edge transformations by POSTing `{code, input}` to the
/// language's executor and reading `result` back.
pub struct RemoteTransformExecutor {
    client: reqwest::Client,
    config: RemoteTransformConfig,
}

impl RemoteTransformExecutor {
    pub fn new(config: RemoteTransformConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }

    pub fn config(&self) -> &RemoteTransformConfig {
        &self.config
    }

    fn request_error(&self, url: &str, err: reqwest::Error) -> TransformationError {
        if err.is_timeout() {
            TransformationError::Timeout {
                seconds: self.config.timeout.as_secs(),
            }
        } else {
            TransformationError::Request {
                url: url.to_string(),
                message: err.to_string(),
            }
        }
    }
}

impl Default for RemoteTransformExecutor {
    fn default() -> Self {
        Self::new(RemoteTransformConfig::default())
    }
}

#[async_trait]
impl TransformExecutor for RemoteTransformExecutor {
    async fn execute(
        &self,
        language: Language,
        code: &str,
        input: Value,
    ) -> Result<Value, TransformationError> {
        let url = self.config.url_for(language);
        tracing::debug!(%url, %language, "dispatching custom transformation");

        let payload = serde_json::json!({
            "code": code,
            "input": input.to_json(),
        });

        let response = self
            .client
            .post(&url)
            .timeout(self.config.timeout)
            .json(&payload)
            .send()
            .await
            .map_err(|e| self.request_error(&url, e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(%url, status = status.as_u16(), "transform service rejected request");
            return Err(TransformationError::Status {
                url,
                status: status.as_u16(),
                body,
            });
        }

        let body: serde_json::Value = response.json().await.map_err(|e| {
            if e.is_timeout() {
                self.request_error(&url, e)
            } else {
                TransformationError::MalformedResponse(e.to_string())
            }
        })?;

        match body.get("result") {
            Some(result) => Ok(Value::from(result.clone())),
            None => Err(TransformationError::MalformedResponse(format!(
                "response from {} has no 'result' field",
                url
            ))),
        }
    }
}
