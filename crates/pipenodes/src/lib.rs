//! Standard function library
//!
//! Built-in functions for common operations, the HTTP-backed executor for
//! custom edge transformations, and a JSON snapshot persister.

mod debug;
mod http;
mod llm;
mod persist;
mod remote;
mod text;
mod time;
mod transform;

pub use debug::{DebugLog, DebugLogFactory};
pub use http::{HttpRequest, HttpRequestFactory};
pub use llm::{LlmComplete, LlmCompleteFactory, LlmConfig};
pub use persist::JsonSnapshotPersister;
pub use remote::{RemoteTransformConfig, RemoteTransformExecutor};
pub use text::{render_template, TextFormat, TextFormatFactory};
pub use time::{Delay, DelayFactory};
pub use transform::{JsonParse, JsonParseFactory, JsonStringify, JsonStringifyFactory};

use piperuntime::FunctionRegistry;
use std::sync::Arc;

/// Register all standard functions with a registry
pub fn register_all(registry: &mut FunctionRegistry) {
    registry.register(Arc::new(DebugLogFactory));
    registry.register(Arc::new(DelayFactory));
    registry.register(Arc::new(HttpRequestFactory));
    registry.register(Arc::new(JsonParseFactory));
    registry.register(Arc::new(JsonStringifyFactory));
    registry.register(Arc::new(TextFormatFactory));
    registry.register(Arc::new(LlmCompleteFactory::new(LlmConfig::from_env())));
}

/// Make `llm.complete` the implementation behind `{"kind": "default"}`.
pub fn install_llm_default(registry: &mut FunctionRegistry, config: LlmConfig) {
    registry.set_default(Arc::new(LlmComplete::new(config)));
}
