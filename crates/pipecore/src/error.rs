use crate::PipelineStatus;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FlowError {
    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),

    #[error("Node '{node_id}' failed: {source}")]
    NodeExecution {
        node_id: String,
        #[source]
        source: NodeError,
    },

    #[error("Invalid pipeline transition: {from} -> {to}")]
    InvalidTransition {
        from: PipelineStatus,
        to: PipelineStatus,
    },

    #[error("Flow not found: {0}")]
    FlowNotFound(String),

    #[error("Pipeline not found: {0}")]
    PipelineNotFound(String),

    #[error("Execution error: {0}")]
    Execution(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl FlowError {
    /// The node-level cause, when the run failed inside a node step.
    pub fn node_error(&self) -> Option<&NodeError> {
        match self {
            FlowError::NodeExecution { source, .. } => Some(source),
            _ => None,
        }
    }

    pub fn failed_node(&self) -> Option<&str> {
        match self {
            FlowError::NodeExecution { node_id, .. } => Some(node_id),
            _ => None,
        }
    }
}

/// Structural problems found while validating or ordering a flow.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    #[error("Source node '{0}' not found")]
    SourceNodeNotFound(String),

    #[error("Destination node '{0}' not found")]
    DestinationNodeNotFound(String),

    #[error("Output '{output}' not found on node '{node_id}'")]
    OutputNotFound { node_id: String, output: String },

    #[error("Input '{input}' not found on node '{node_id}'")]
    InputNotFound { node_id: String, input: String },

    #[error("Duplicate node id: {0}")]
    DuplicateNode(String),

    #[error("Cycle detected in flow")]
    CycleDetected,

    #[error("Node '{node_id}' uses unknown function '{function}'")]
    UnknownFunction { node_id: String, function: String },

    #[error("Node '{0}' uses the default implementation but none is configured")]
    NoDefaultImplementation(String),

    #[error("Node '{node_id}' has invalid configuration: {message}")]
    InvalidConfiguration { node_id: String, message: String },
}

impl GraphError {
    pub fn is_cycle(&self) -> bool {
        matches!(self, GraphError::CycleDetected)
    }
}

#[derive(Error, Debug, Clone)]
pub enum NodeError {
    #[error("Missing required input: {0}")]
    MissingInput(String),

    #[error("Invalid input type for '{field}': expected {expected}, got {actual}")]
    InvalidInputType {
        field: String,
        expected: String,
        actual: String,
    },

    #[error("Invalid output: {0}")]
    InvalidOutput(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Transformation failed: {0}")]
    Transformation(#[from] TransformationError),
}

/// Failure of a custom edge transformation; always surfaced, never coalesced.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransformationError {
    #[error("request to {url} failed: {message}")]
    Request { url: String, message: String },

    #[error("{url} returned HTTP {status}: {body}")]
    Status { url: String, status: u16, body: String },

    #[error("timed out after {seconds}s")]
    Timeout { seconds: u64 },

    #[error("malformed response: {0}")]
    MalformedResponse(String),

    #[error("no executor available for language '{0}'")]
    Unavailable(String),
}
