use async_trait::async_trait;
use pipecore::{Invocable, NodeContext, NodeError, NodeOutput, Parameter, Value, ValueMap};
use piperuntime::{FunctionFactory, FunctionMetadata};
use std::sync::Arc;
use std::time::Duration;

fn millis(value: &Value) -> Option<u64> {
    value.as_f64().filter(|ms| ms.is_finite() && *ms >= 0.0).map(|ms| ms as u64)
}

/// Holds the pipeline for a while, then forwards its inputs unchanged.
///
/// The wait comes from a `delay_ms` input when one is wired, otherwise from
/// the value fixed in config when the flow was compiled.
pub struct Delay {
    default: Duration,
}

impl Delay {
    pub fn new(default: Duration) -> Self {
        Self { default }
    }
}

#[async_trait]
impl Invocable for Delay {
    fn kind(&self) -> &str {
        "time.delay"
    }

    async fn invoke(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let mut passthrough = ctx.inputs;
        let wait = match passthrough.remove("delay_ms") {
            Some(value) => Duration::from_millis(millis(&value).ok_or_else(|| {
                NodeError::InvalidInputType {
                    field: "delay_ms".to_string(),
                    expected: "non-negative number".to_string(),
                    actual: value.type_name().to_string(),
                }
            })?),
            None => self.default,
        };

        ctx.events
            .progress(0.0, Some(format!("waiting {}ms", wait.as_millis())));
        tokio::time::sleep(wait).await;
        ctx.events.progress(100.0, None);

        Ok(NodeOutput::from(passthrough))
    }
}

pub struct DelayFactory;

impl FunctionFactory for DelayFactory {
    fn create(&self, config: &ValueMap) -> Result<Arc<dyn Invocable>, NodeError> {
        let default = match config.get("delay_ms") {
            None => 1000,
            Some(value) => millis(value).ok_or_else(|| {
                NodeError::Configuration("delay_ms must be a non-negative number".to_string())
            })?,
        };
        Ok(Arc::new(Delay::new(Duration::from_millis(default))))
    }

    fn name(&self) -> &str {
        "time.delay"
    }

    fn metadata(&self) -> FunctionMetadata {
        FunctionMetadata {
            description: "Wait, then forward inputs unchanged".to_string(),
            category: "time".to_string(),
            inputs: vec![Parameter::new("delay_ms", "number")],
            outputs: Vec::new(),
        }
    }
}
