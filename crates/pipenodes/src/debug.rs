use async_trait::async_trait;
use pipecore::{Invocable, NodeContext, NodeError, NodeOutput, NotificationLevel, Parameter, ValueMap};
use piperuntime::{FunctionFactory, FunctionMetadata};
use std::sync::Arc;

/// Publishes a pipeline notification and passes the rendered `message` on.
///
/// Inputs other than `message` travel as notification metadata, so event
/// subscribers see the values the node was given next to the text.
pub struct DebugLog {
    level: NotificationLevel,
}

impl DebugLog {
    pub fn new(level: NotificationLevel) -> Self {
        Self { level }
    }

    pub fn level(&self) -> NotificationLevel {
        self.level
    }
}

impl Default for DebugLog {
    fn default() -> Self {
        Self::new(NotificationLevel::Info)
    }
}

fn parse_level(name: &str) -> Option<NotificationLevel> {
    match name.to_ascii_lowercase().as_str() {
        "debug" => Some(NotificationLevel::Debug),
        "info" => Some(NotificationLevel::Info),
        "warning" | "warn" => Some(NotificationLevel::Warning),
        "error" => Some(NotificationLevel::Error),
        "critical" => Some(NotificationLevel::Critical),
        _ => None,
    }
}

#[async_trait]
impl Invocable for DebugLog {
    fn kind(&self) -> &str {
        "debug.log"
    }

    async fn invoke(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let mut metadata = ctx.inputs;
        let message = match metadata.remove("message") {
            Some(value) => value.to_display_string(),
            None if metadata.is_empty() => "(no message)".to_string(),
            None => format!("{} input(s) received", metadata.len()),
        };

        match self.level {
            NotificationLevel::Debug => tracing::debug!(node = %ctx.node_id, "{}", message),
            NotificationLevel::Info => tracing::info!(node = %ctx.node_id, "{}", message),
            NotificationLevel::Warning => tracing::warn!(node = %ctx.node_id, "{}", message),
            NotificationLevel::Error | NotificationLevel::Critical => {
                tracing::error!(node = %ctx.node_id, "{}", message)
            }
        }
        ctx.events.notify(self.level, message.clone(), metadata);

        Ok(NodeOutput::new().with_output("message", message))
    }
}

pub struct DebugLogFactory;

impl FunctionFactory for DebugLogFactory {
    fn create(&self, config: &ValueMap) -> Result<Arc<dyn Invocable>, NodeError> {
        let level = match config.get("level") {
            None => NotificationLevel::Info,
            Some(value) => value.as_str().and_then(parse_level).ok_or_else(|| {
                NodeError::Configuration(format!(
                    "debug.log level must be one of debug, info, warning, error, critical; got {}",
                    value.to_display_string()
                ))
            })?,
        };
        Ok(Arc::new(DebugLog::new(level)))
    }

    fn name(&self) -> &str {
        "debug.log"
    }

    fn metadata(&self) -> FunctionMetadata {
        FunctionMetadata {
            description: "Publish a notification at the configured level".to_string(),
            category: "debug".to_string(),
            inputs: vec![Parameter::new("message", "any")],
            outputs: vec![Parameter::new("message", "string")],
        }
    }
}
