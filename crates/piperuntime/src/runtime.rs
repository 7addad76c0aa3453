use crate::executor::{CompiledFlow, ExecutionEngine, RunOutcome};
use crate::handle::PipelineHandle;
use crate::registry::FunctionRegistry;
use chrono::Utc;
use pipecore::{
    EventBus, ExecutionEvent, Flow, FlowError, FlowId, PersistHook, Pipeline, StatusReport,
    TransformExecutor, UnavailableExecutor, Value, ValueMap,
};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

struct PipelineEntry {
    flow_id: FlowId,
    handle: PipelineHandle,
}

/// Main runtime: compiled flows, live pipelines, and the engine driving them
pub struct PipelineRuntime {
    registry: Arc<FunctionRegistry>,
    engine: Arc<ExecutionEngine>,
    event_bus: Arc<EventBus>,
    flows: Arc<RwLock<HashMap<FlowId, Arc<CompiledFlow>>>>,
    pipelines: Arc<RwLock<HashMap<String, PipelineEntry>>>,
}

impl PipelineRuntime {
    /// Create a new runtime with default settings and an empty registry
    pub fn new() -> Self {
        Self::with_config(RuntimeConfig::default())
    }

    pub fn with_config(config: RuntimeConfig) -> Self {
        Self::with_registry(Arc::new(FunctionRegistry::new()), config)
    }

    /// Create a runtime around a pre-configured registry. Custom
    /// transformations fail until an executor is attached.
    pub fn with_registry(registry: Arc<FunctionRegistry>, config: RuntimeConfig) -> Self {
        Self::with_parts(registry, Arc::new(UnavailableExecutor), config)
    }

    pub fn with_parts(
        registry: Arc<FunctionRegistry>,
        transforms: Arc<dyn TransformExecutor>,
        config: RuntimeConfig,
    ) -> Self {
        let event_bus = Arc::new(EventBus::new(config.event_buffer_size));
        let engine = Arc::new(ExecutionEngine::new(
            config.max_parallel_nodes,
            transforms,
            event_bus.clone(),
        ));

        Self {
            registry,
            engine,
            event_bus,
            flows: Arc::new(RwLock::new(HashMap::new())),
            pipelines: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn registry(&self) -> &Arc<FunctionRegistry> {
        &self.registry
    }

    pub fn engine(&self) -> &Arc<ExecutionEngine> {
        &self.engine
    }

    /// Validate, order and compile a flow, then keep it for later runs
    pub async fn register_flow(&self, flow: Flow) -> Result<FlowId, FlowError> {
        let compiled = self.engine.compile(Arc::new(flow), &self.registry)?;
        let flow_id = compiled.flow().id;
        tracing::info!(
            "Registered flow {} ({}) with order {:?}",
            compiled.flow().name,
            flow_id,
            compiled.execution_order()
        );
        self.flows.write().await.insert(flow_id, Arc::new(compiled));
        Ok(flow_id)
    }

    pub async fn get_flow(&self, flow_id: FlowId) -> Option<Arc<CompiledFlow>> {
        self.flows.read().await.get(&flow_id).cloned()
    }

    pub async fn list_flows(&self) -> Vec<Arc<Flow>> {
        self.flows
            .read()
            .await
            .values()
            .map(|c| c.flow().clone())
            .collect()
    }

    pub async fn remove_flow(&self, flow_id: FlowId) -> bool {
        self.flows.write().await.remove(&flow_id).is_some()
    }

    /// Create a pipeline for a registered flow with the given injected inputs.
    pub async fn create_pipeline(
        &self,
        flow_id: FlowId,
        inputs: ValueMap,
        persist_hook: Option<Arc<dyn PersistHook>>,
    ) -> Result<PipelineHandle, FlowError> {
        let compiled = self
            .get_flow(flow_id)
            .await
            .ok_or_else(|| FlowError::FlowNotFound(flow_id.to_string()))?;

        let mut pipeline = Pipeline::new(compiled.flow().clone());
        if let Some(hook) = persist_hook {
            pipeline = pipeline.with_shared_persist_hook(hook);
        }
        for (key, value) in inputs {
            pipeline.inject_user_input(key, value);
        }

        let handle = PipelineHandle::new(pipeline);
        tracing::info!("Created pipeline {} for flow {}", handle.id(), flow_id);
        self.pipelines.write().await.insert(
            handle.id().to_string(),
            PipelineEntry {
                flow_id,
                handle: handle.clone(),
            },
        );
        Ok(handle)
    }

    pub async fn get_pipeline(&self, pipeline_id: &str) -> Option<PipelineHandle> {
        self.pipelines
            .read()
            .await
            .get(pipeline_id)
            .map(|e| e.handle.clone())
    }

    pub async fn list_pipelines(&self) -> Vec<PipelineHandle> {
        self.pipelines
            .read()
            .await
            .values()
            .map(|e| e.handle.clone())
            .collect()
    }

    /// Run (or continue) a pipeline until it completes, pauses or fails
    pub async fn run_pipeline(&self, pipeline_id: &str) -> Result<RunOutcome, FlowError> {
        let (flow_id, handle) = {
            let pipelines = self.pipelines.read().await;
            let entry = pipelines
                .get(pipeline_id)
                .ok_or_else(|| FlowError::PipelineNotFound(pipeline_id.to_string()))?;
            (entry.flow_id, entry.handle.clone())
        };
        let compiled = self
            .get_flow(flow_id)
            .await
            .ok_or_else(|| FlowError::FlowNotFound(flow_id.to_string()))?;

        self.engine.run(&compiled, &handle).await
    }

    pub async fn pause_pipeline(&self, pipeline_id: &str) -> Result<(), FlowError> {
        self.require_pipeline(pipeline_id).await?.pause().await?;
        self.event_bus.emit(ExecutionEvent::PipelinePaused {
            pipeline_id: pipeline_id.to_string(),
            timestamp: Utc::now(),
        });
        Ok(())
    }

    /// Flip a paused pipeline back to RUNNING. Call `run_pipeline` to
    /// schedule the remaining nodes.
    pub async fn resume_pipeline(&self, pipeline_id: &str) -> Result<(), FlowError> {
        self.require_pipeline(pipeline_id).await?.resume().await?;
        self.event_bus.emit(ExecutionEvent::PipelineResumed {
            pipeline_id: pipeline_id.to_string(),
            timestamp: Utc::now(),
        });
        Ok(())
    }

    pub async fn inject_input(
        &self,
        pipeline_id: &str,
        key: impl Into<String>,
        value: impl Into<Value>,
    ) -> Result<(), FlowError> {
        self.require_pipeline(pipeline_id)
            .await?
            .inject_user_input(key, value)
            .await;
        Ok(())
    }

    pub async fn pipeline_status(&self, pipeline_id: &str) -> Result<StatusReport, FlowError> {
        Ok(self.require_pipeline(pipeline_id).await?.export_status().await)
    }

    async fn require_pipeline(&self, pipeline_id: &str) -> Result<PipelineHandle, FlowError> {
        self.get_pipeline(pipeline_id)
            .await
            .ok_or_else(|| FlowError::PipelineNotFound(pipeline_id.to_string()))
    }

    /// Subscribe to execution events
    pub fn subscribe_events(&self) -> tokio::sync::broadcast::Receiver<ExecutionEvent> {
        self.event_bus.subscribe()
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.event_bus
    }
}

impl Default for PipelineRuntime {
    fn default() -> Self {
        Self::new()
    }
}

/// Configuration for the runtime
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Upper bound on concurrently running independent steps. 1 runs the
    /// flow strictly in topological order.
    pub max_parallel_nodes: usize,
    pub event_buffer_size: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_parallel_nodes: 1,
            event_buffer_size: 1000,
        }
    }
}
