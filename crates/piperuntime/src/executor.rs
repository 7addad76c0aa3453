use crate::handle::PipelineHandle;
use crate::registry::FunctionRegistry;
use chrono::Utc;
use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use pipecore::{
    slot_key, EventBus, ExecutionEvent, Flow, FlowError, Invocable, Node, NodeContext,
    NodeError, PipelineStatus, TransformExecutor, Transformation, Value, ValueMap,
};
use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

/// Where a node input gets its value from at run time
#[derive(Debug, Clone, PartialEq)]
pub enum InputSource {
    /// Upstream output in pipeline state, passed through the edge's transformation
    Edge {
        state_key: String,
        transformation: Transformation,
    },
    /// Value injected by the caller under `node.param`
    UserInput { key: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct InputBinding {
    pub param: String,
    pub source: InputSource,
}

impl InputBinding {
    /// Edge-provided value first, injected value second. When several edges
    /// target the same input the first declared one is used.
    pub fn for_param(flow: &Flow, node_id: &str, param: &str) -> Self {
        let source = match flow.edge_into(node_id, param) {
            Some(edge) => InputSource::Edge {
                state_key: edge.source_key(),
                transformation: edge.transformation.clone(),
            },
            None => InputSource::UserInput {
                key: slot_key(node_id, param),
            },
        };
        Self {
            param: param.to_string(),
            source,
        }
    }

    async fn resolve(
        &self,
        pipeline: &PipelineHandle,
        transforms: &dyn TransformExecutor,
    ) -> Result<Value, NodeError> {
        match &self.source {
            InputSource::Edge {
                state_key,
                transformation,
            } => {
                // An absent key resolves to Null, not an error.
                let raw = {
                    let guard = pipeline.read().await;
                    guard.state().get(state_key).cloned().unwrap_or(Value::Null)
                };
                Ok(transformation.apply(raw, transforms).await?)
            }
            InputSource::UserInput { key } => pipeline
                .read()
                .await
                .user_input(key)
                .cloned()
                .ok_or_else(|| NodeError::MissingInput(key.clone())),
        }
    }
}

/// One runnable step per node
pub struct NodeStep {
    node: Node,
    invocable: Arc<dyn Invocable>,
    bindings: Vec<InputBinding>,
}

impl NodeStep {
    pub fn node(&self) -> &Node {
        &self.node
    }

    pub fn bindings(&self) -> &[InputBinding] {
        &self.bindings
    }
}

/// A validated flow turned into a dependency graph of steps
pub struct CompiledFlow {
    flow: Arc<Flow>,
    graph: DiGraph<usize, ()>,
    order: Vec<usize>,
    steps: Vec<Arc<NodeStep>>,
}

impl CompiledFlow {
    pub fn flow(&self) -> &Arc<Flow> {
        &self.flow
    }

    /// Topological order of node ids
    pub fn execution_order(&self) -> Vec<&str> {
        self.order
            .iter()
            .map(|&i| self.steps[i].node.id.as_str())
            .collect()
    }

    pub fn step(&self, node_id: &str) -> Option<&NodeStep> {
        self.steps
            .iter()
            .find(|s| s.node.id == node_id)
            .map(|s| s.as_ref())
    }

    /// Steps whose predecessors have all completed, in topological order.
    fn ready_steps(&self, completed: &HashSet<usize>, started: &HashSet<usize>) -> Vec<usize> {
        self.order
            .iter()
            .copied()
            .filter(|idx| !started.contains(idx))
            .filter(|&idx| {
                self.graph
                    .neighbors_directed(NodeIndex::new(idx), Direction::Incoming)
                    .all(|dep| completed.contains(&self.graph[dep]))
            })
            .collect()
    }
}

/// Outcome of a run that did not fail
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    /// Every node succeeded
    Completed(ExecutionSummary),
    /// The pipeline was paused; remaining nodes run on the next `run`
    Paused(ExecutionSummary),
}

impl RunOutcome {
    pub fn summary(&self) -> &ExecutionSummary {
        match self {
            RunOutcome::Completed(summary) | RunOutcome::Paused(summary) => summary,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, RunOutcome::Completed(_))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionSummary {
    pub pipeline_id: String,
    pub completed_nodes: usize,
    pub total_nodes: usize,
    pub duration_ms: u64,
}

/// What a spawned step needs from the engine
#[derive(Clone)]
struct StepEnv {
    pipeline: PipelineHandle,
    transforms: Arc<dyn TransformExecutor>,
    events: Arc<EventBus>,
}

/// Compiles flows into step graphs and drives them against pipelines
pub struct ExecutionEngine {
    max_parallel: usize,
    transforms: Arc<dyn TransformExecutor>,
    event_bus: Arc<EventBus>,
}

impl ExecutionEngine {
    pub fn new(
        max_parallel: usize,
        transforms: Arc<dyn TransformExecutor>,
        event_bus: Arc<EventBus>,
    ) -> Self {
        Self {
            max_parallel: max_parallel.max(1),
            transforms,
            event_bus,
        }
    }

    /// Validate the flow, order it, and build one step per node.
    pub fn compile(
        &self,
        flow: Arc<Flow>,
        registry: &FunctionRegistry,
    ) -> Result<CompiledFlow, FlowError> {
        flow.validate_connections()?;
        let order = flow.execution_indices()?;

        let mut graph = DiGraph::with_capacity(flow.nodes.len(), flow.edges.len());
        for i in 0..flow.nodes.len() {
            graph.add_node(i);
        }
        let index = flow.node_indices()?;
        for edge in &flow.edges {
            // validate_connections guarantees both endpoints exist
            if let (Some(&from), Some(&to)) = (
                index.get(edge.from_node.as_str()),
                index.get(edge.to_node.as_str()),
            ) {
                graph.update_edge(NodeIndex::new(from), NodeIndex::new(to), ());
            }
        }

        let mut steps = Vec::with_capacity(flow.nodes.len());
        for node in &flow.nodes {
            let invocable = registry.resolve(node)?;
            let bindings = node
                .inputs()
                .iter()
                .map(|param| InputBinding::for_param(&flow, &node.id, &param.name))
                .collect();
            steps.push(Arc::new(NodeStep {
                node: node.clone(),
                invocable,
                bindings,
            }));
        }

        tracing::debug!(
            flow = %flow.id,
            nodes = steps.len(),
            edges = graph.edge_count(),
            "compiled flow"
        );

        Ok(CompiledFlow {
            flow,
            graph,
            order,
            steps,
        })
    }

    /// Resolve one input of one node against the pipeline's current state.
    pub async fn resolve_input(
        &self,
        compiled: &CompiledFlow,
        node_id: &str,
        param: &str,
        pipeline: &PipelineHandle,
    ) -> Result<Value, NodeError> {
        InputBinding::for_param(&compiled.flow, node_id, param)
            .resolve(pipeline, self.transforms.as_ref())
            .await
    }

    /// Run every node not yet completed, in dependency order.
    ///
    /// Nodes already SUCCESS in the ledger are skipped, so a paused pipeline
    /// can be resumed by calling `run` again. On the first node failure no
    /// further steps are started; steps already in flight finish and are
    /// recorded, then the failure is returned.
    ///
    /// Runs of the same pipeline are serialized: a `run` issued while another
    /// is live waits for it to return and then picks up whatever is left. If
    /// nothing is left the pipeline is terminal and the call fails with
    /// `InvalidTransition`.
    pub async fn run(
        &self,
        compiled: &CompiledFlow,
        pipeline: &PipelineHandle,
    ) -> Result<RunOutcome, FlowError> {
        if pipeline.is_run_active() {
            tracing::debug!(pipeline = %pipeline.id(), "waiting for the active run to return");
        }
        let _run = pipeline.lock_run().await;
        let start_time = Instant::now();
        let total = compiled.steps.len();

        let mut completed: HashSet<usize> = {
            let mut guard = pipeline.write().await;
            if guard.flow().id != compiled.flow.id {
                return Err(FlowError::Execution(format!(
                    "pipeline {} is bound to flow {}, not {}",
                    guard.id(),
                    guard.flow().id,
                    compiled.flow.id
                )));
            }

            let status = guard.status();
            if status.is_terminal() {
                return Err(FlowError::InvalidTransition {
                    from: status,
                    to: PipelineStatus::Running,
                });
            }

            // With the run lock held, a RUNNING record is a step that was
            // cut off mid-invocation. It is never invoked a second time.
            if let Some(step) = compiled
                .steps
                .iter()
                .find(|s| guard.node_status(&s.node.id) == Some(PipelineStatus::Running))
            {
                return Err(FlowError::Execution(format!(
                    "node {} of pipeline {} was interrupted while running",
                    step.node.id,
                    guard.id()
                )));
            }

            let done: HashSet<usize> = compiled
                .steps
                .iter()
                .enumerate()
                .filter(|(_, s)| guard.node_status(&s.node.id) == Some(PipelineStatus::Success))
                .map(|(i, _)| i)
                .collect();

            if status.is_paused() {
                return Ok(RunOutcome::Paused(self.summary(
                    pipeline,
                    done.len(),
                    total,
                    start_time,
                )));
            }

            guard.start()?;
            done
        };

        self.event_bus.emit(ExecutionEvent::PipelineStarted {
            pipeline_id: pipeline.id().to_string(),
            flow_id: compiled.flow.id,
            timestamp: Utc::now(),
        });
        tracing::info!(
            pipeline = %pipeline.id(),
            flow = %compiled.flow.id,
            remaining = total - completed.len(),
            "starting pipeline run"
        );

        let env = StepEnv {
            pipeline: pipeline.clone(),
            transforms: self.transforms.clone(),
            events: self.event_bus.clone(),
        };
        let mut started = completed.clone();
        let mut running = FuturesUnordered::new();
        let mut failure: Option<FlowError> = None;

        loop {
            if failure.is_none() && !pipeline.is_paused().await {
                for idx in compiled.ready_steps(&completed, &started) {
                    if running.len() >= self.max_parallel {
                        break;
                    }
                    started.insert(idx);
                    let step = compiled.steps[idx].clone();
                    let env = env.clone();
                    running.push(tokio::spawn(async move {
                        let result = execute_step(&step, &env).await;
                        (idx, result)
                    }));
                }
            }

            if running.is_empty() {
                if failure.is_some() || completed.len() == total || pipeline.is_paused().await {
                    break;
                }
                if compiled.ready_steps(&completed, &started).is_empty() {
                    return Err(FlowError::Execution(format!(
                        "no runnable nodes left in pipeline {}",
                        pipeline.id()
                    )));
                }
                continue;
            }

            if let Some(joined) = running.next().await {
                let (idx, result) =
                    joined.map_err(|e| FlowError::Execution(format!("Task join error: {}", e)))?;
                match result {
                    Ok(()) => {
                        completed.insert(idx);
                    }
                    Err(e) => {
                        if failure.is_none() {
                            failure = Some(e);
                        }
                    }
                }
            }
        }

        let status = pipeline.write().await.finish();
        let summary = self.summary(pipeline, completed.len(), total, start_time);

        if let Some(err) = failure {
            tracing::error!(pipeline = %pipeline.id(), "pipeline failed: {}", err);
            self.emit_completed(&summary, status);
            return Err(err);
        }

        if completed.len() < total {
            tracing::info!(
                pipeline = %pipeline.id(),
                completed = completed.len(),
                total,
                "pipeline paused at step boundary"
            );
            return Ok(RunOutcome::Paused(summary));
        }

        tracing::info!(
            pipeline = %pipeline.id(),
            "pipeline completed in {}ms",
            summary.duration_ms
        );
        self.emit_completed(&summary, status);
        Ok(RunOutcome::Completed(summary))
    }

    fn summary(
        &self,
        pipeline: &PipelineHandle,
        completed_nodes: usize,
        total_nodes: usize,
        start_time: Instant,
    ) -> ExecutionSummary {
        ExecutionSummary {
            pipeline_id: pipeline.id().to_string(),
            completed_nodes,
            total_nodes,
            duration_ms: start_time.elapsed().as_millis() as u64,
        }
    }

    fn emit_completed(&self, summary: &ExecutionSummary, status: PipelineStatus) {
        self.event_bus.emit(ExecutionEvent::PipelineCompleted {
            pipeline_id: summary.pipeline_id.clone(),
            status,
            duration_ms: summary.duration_ms,
            timestamp: Utc::now(),
        });
    }
}

/// Run one node: mark RUNNING, resolve, invoke, record the result.
async fn execute_step(step: &NodeStep, env: &StepEnv) -> Result<(), FlowError> {
    let node_id = step.node.id.as_str();
    let pipeline_id = env.pipeline.id().to_string();
    let start = Instant::now();

    env.pipeline
        .write()
        .await
        .update_node_status(node_id, PipelineStatus::Running, None, None, None);
    env.events.emit(ExecutionEvent::NodeStarted {
        pipeline_id: pipeline_id.clone(),
        node_id: node_id.to_string(),
        function: step.node.function.name.clone(),
        timestamp: Utc::now(),
    });
    tracing::debug!(node = %node_id, function = %step.invocable.kind(), "starting node");

    let (inputs, result) = run_body(step, env, &pipeline_id).await;
    let duration_ms = start.elapsed().as_millis() as u64;

    match result {
        Ok(outputs) => {
            env.pipeline.write().await.record_success(
                node_id,
                inputs.unwrap_or_default(),
                outputs.clone(),
            );
            tracing::info!("Node {} completed in {}ms", node_id, duration_ms);
            env.events.emit(ExecutionEvent::NodeCompleted {
                pipeline_id,
                node_id: node_id.to_string(),
                outputs,
                duration_ms,
                timestamp: Utc::now(),
            });
            Ok(())
        }
        Err(e) => {
            let message = e.to_string();
            env.pipeline
                .write()
                .await
                .record_failure(node_id, inputs, message.clone());
            tracing::error!("Node {} failed: {}", node_id, message);
            env.events.emit(ExecutionEvent::NodeFailed {
                pipeline_id,
                node_id: node_id.to_string(),
                error: message,
                timestamp: Utc::now(),
            });
            Err(FlowError::NodeExecution {
                node_id: node_id.to_string(),
                source: e,
            })
        }
    }
}

/// Returns the resolved inputs (if resolution got that far) and the outputs.
async fn run_body(
    step: &NodeStep,
    env: &StepEnv,
    pipeline_id: &str,
) -> (Option<ValueMap>, Result<ValueMap, NodeError>) {
    let function = &step.node.function;

    if function.is_side_effect() {
        // Outputs of side-effect nodes never reach state.
        let result = invoke(step, env, pipeline_id, ValueMap::new())
            .await
            .map(|_| ValueMap::new());
        return (Some(ValueMap::new()), result);
    }

    let mut inputs = ValueMap::new();
    for binding in &step.bindings {
        match binding.resolve(&env.pipeline, env.transforms.as_ref()).await {
            Ok(value) => {
                inputs.insert(binding.param.clone(), value);
            }
            Err(e) => return (None, Err(e)),
        }
    }

    let result = invoke(step, env, pipeline_id, inputs.clone())
        .await
        .and_then(|outputs| check_outputs(&step.node, outputs));
    (Some(inputs), result)
}

async fn invoke(
    step: &NodeStep,
    env: &StepEnv,
    pipeline_id: &str,
    inputs: ValueMap,
) -> Result<ValueMap, NodeError> {
    let config = step
        .node
        .function
        .implementation
        .config()
        .cloned()
        .unwrap_or_default();
    let ctx = NodeContext::new(
        step.node.id.clone(),
        env.events.create_emitter(pipeline_id, &step.node.id),
    )
    .with_inputs(inputs)
    .with_config(config);

    AssertUnwindSafe(step.invocable.invoke(ctx))
        .catch_unwind()
        .await
        .unwrap_or_else(|_| {
            Err(NodeError::ExecutionFailed(
                "node implementation panicked".to_string(),
            ))
        })
        .map(|output| output.outputs)
}

fn check_outputs(node: &Node, outputs: ValueMap) -> Result<ValueMap, NodeError> {
    if outputs.is_empty() && !node.outputs().is_empty() {
        let expected: Vec<&str> = node.outputs().iter().map(|p| p.name.as_str()).collect();
        return Err(NodeError::InvalidOutput(format!(
            "expected outputs [{}], got an empty mapping",
            expected.join(", ")
        )));
    }

    for name in outputs.keys() {
        if !node.function.has_output(name) {
            tracing::warn!(node = %node.id, output = %name, "undeclared output merged into state");
        }
    }

    Ok(outputs)
}
