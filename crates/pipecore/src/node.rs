use crate::{events::EventEmitter, NodeError, Value, ValueMap};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Capability behind every node: the opaque body a function definition points at.
///
/// Implementations may block on I/O (remote inference, HTTP). The engine never
/// cancels an invocation once it has started.
#[async_trait]
pub trait Invocable: Send + Sync {
    /// Identifier of the implementation (e.g. "http.request", "llm.complete")
    fn kind(&self) -> &str;

    /// Run the node body with its resolved inputs.
    async fn invoke(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError>;
}

/// Execution context passed to each invocation
#[derive(Clone)]
pub struct NodeContext {
    /// Id of the node inside its flow
    pub node_id: String,

    /// Resolved input values, keyed by parameter name
    pub inputs: ValueMap,

    /// Static configuration attached to the implementation reference
    pub config: ValueMap,

    /// Fire-and-forget notifications
    pub events: EventEmitter,
}

impl NodeContext {
    pub fn new(node_id: impl Into<String>, events: EventEmitter) -> Self {
        Self {
            node_id: node_id.into(),
            inputs: ValueMap::new(),
            config: ValueMap::new(),
            events,
        }
    }

    pub fn with_inputs(mut self, inputs: ValueMap) -> Self {
        self.inputs = inputs;
        self
    }

    pub fn with_config(mut self, config: ValueMap) -> Self {
        self.config = config;
        self
    }

    /// Get required input or return error
    pub fn require_input(&self, name: &str) -> Result<&Value, NodeError> {
        self.inputs
            .get(name)
            .ok_or_else(|| NodeError::MissingInput(name.to_string()))
    }

    /// Get a string input or report the actual type
    pub fn require_str(&self, name: &str) -> Result<&str, NodeError> {
        let value = self.require_input(name)?;
        value.as_str().ok_or_else(|| NodeError::InvalidInputType {
            field: name.to_string(),
            expected: "string".to_string(),
            actual: value.type_name().to_string(),
        })
    }

    pub fn require_config(&self, name: &str) -> Result<&Value, NodeError> {
        self.config
            .get(name)
            .ok_or_else(|| NodeError::Configuration(format!("Missing config: {}", name)))
    }

    pub fn get_config_or(&self, name: &str, default: Value) -> Value {
        self.config.get(name).cloned().unwrap_or(default)
    }
}

/// Named outputs produced by one invocation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeOutput {
    pub outputs: ValueMap,
}

impl NodeOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_output(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.outputs.insert(name.into(), value.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.outputs.is_empty()
    }
}

impl From<ValueMap> for NodeOutput {
    fn from(outputs: ValueMap) -> Self {
        Self { outputs }
    }
}

/// Adapts an in-process closure into an [`Invocable`].
pub struct LocalFunction<F> {
    kind: String,
    func: F,
}

impl<F> LocalFunction<F>
where
    F: Fn(&NodeContext) -> Result<NodeOutput, NodeError> + Send + Sync,
{
    pub fn new(kind: impl Into<String>, func: F) -> Self {
        Self {
            kind: kind.into(),
            func,
        }
    }
}

#[async_trait]
impl<F> Invocable for LocalFunction<F>
where
    F: Fn(&NodeContext) -> Result<NodeOutput, NodeError> + Send + Sync,
{
    fn kind(&self) -> &str {
        &self.kind
    }

    async fn invoke(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        (self.func)(&ctx)
    }
}
