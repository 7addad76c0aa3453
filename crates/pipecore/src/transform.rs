use crate::{TransformationError, Value};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Languages a remote transform executor can be addressed by
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Python,
    Javascript,
    Go,
}

impl Language {
    pub fn as_str(&self) -> &'static str {
        match self {
            Language::Python => "python",
            Language::Javascript => "javascript",
            Language::Go => "go",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Value mapping applied when data crosses an edge
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Transformation {
    /// Pass-through
    #[default]
    Default,
    /// Delegated to the remote executor for `language`
    Custom { language: Language, code: String },
}

impl Transformation {
    pub fn identity() -> Self {
        Transformation::Default
    }

    pub fn custom(language: Language, code: impl Into<String>) -> Self {
        Transformation::Custom {
            language,
            code: code.into(),
        }
    }

    pub fn is_identity(&self) -> bool {
        matches!(self, Transformation::Default)
    }

    /// Apply the transformation. Identity never touches the executor.
    pub async fn apply(
        &self,
        value: Value,
        executor: &dyn TransformExecutor,
    ) -> Result<Value, TransformationError> {
        match self {
            Transformation::Default => Ok(value),
            Transformation::Custom { language, code } => {
                tracing::debug!(%language, "dispatching custom transformation");
                executor.execute(*language, code, value).await
            }
        }
    }
}

/// Backend that runs custom transformation code for a language.
#[async_trait]
pub trait TransformExecutor: Send + Sync {
    async fn execute(
        &self,
        language: Language,
        code: &str,
        input: Value,
    ) -> Result<Value, TransformationError>;
}

/// Executor used when no remote backend is wired in; every custom transform fails.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnavailableExecutor;

#[async_trait]
impl TransformExecutor for UnavailableExecutor {
    async fn execute(
        &self,
        language: Language,
        _code: &str,
        _input: Value,
    ) -> Result<Value, TransformationError> {
        Err(TransformationError::Unavailable(language.to_string()))
    }
}
