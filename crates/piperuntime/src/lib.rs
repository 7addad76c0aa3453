//! Pipeline execution runtime
//!
//! This crate provides the engine that compiles flows into step graphs,
//! resolves node inputs, and drives pipelines to completion, plus the
//! function registry and the runtime facade used by the binaries.

mod executor;
mod handle;
mod registry;
mod runtime;

pub use executor::{
    CompiledFlow, ExecutionEngine, ExecutionSummary, InputBinding, InputSource, NodeStep,
    RunOutcome,
};
pub use handle::PipelineHandle;
pub use registry::{FunctionFactory, FunctionMetadata, FunctionRegistry};
pub use runtime::{PipelineRuntime, RuntimeConfig};
