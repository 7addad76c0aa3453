//! Core abstractions for the pipeline engine
//!
//! This crate provides the flow data model, the pipeline status/state
//! tracker and the traits every other crate builds on. It performs no I/O.

mod error;
pub mod events;
mod flow;
mod node;
mod pipeline;
mod transform;
mod value;

pub use error::{FlowError, GraphError, NodeError, TransformationError};
pub use events::*;
pub use flow::{
    slot_key, Edge, Flow, FlowId, FunctionDefinition, Implementation, Node, Parameter,
};
pub use node::{Invocable, LocalFunction, NodeContext, NodeOutput};
pub use pipeline::{
    NodeExecutionRecord, PersistHook, Pipeline, PipelineState, PipelineStatus, StatusReport,
};
pub use transform::{Language, Transformation, TransformExecutor, UnavailableExecutor};
pub use value::{Value, ValueMap};

/// Result type for flow operations
pub type Result<T> = std::result::Result<T, FlowError>;
