//! Execution-time envelope around a flow: shared state, injected inputs,
//! per-node ledger, overall status and the persistence hook.

use crate::{slot_key, Flow, FlowError, Value, ValueMap};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineStatus {
    #[default]
    Initialized,
    Running,
    Paused,
    Success,
    Failed,
}

impl PipelineStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelineStatus::Success | PipelineStatus::Failed)
    }

    pub fn is_running(&self) -> bool {
        matches!(self, PipelineStatus::Running)
    }

    pub fn is_paused(&self) -> bool {
        matches!(self, PipelineStatus::Paused)
    }

    pub fn has_failed(&self) -> bool {
        matches!(self, PipelineStatus::Failed)
    }

    pub fn has_succeeded(&self) -> bool {
        matches!(self, PipelineStatus::Success)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineStatus::Initialized => "initialized",
            PipelineStatus::Running => "running",
            PipelineStatus::Paused => "paused",
            PipelineStatus::Success => "success",
            PipelineStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for PipelineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ledger entry for one node within one pipeline run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeExecutionRecord {
    pub status: PipelineStatus,
    pub input_values: ValueMap,
    pub output_values: ValueMap,
    pub error_message: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl NodeExecutionRecord {
    fn new(status: PipelineStatus) -> Self {
        Self {
            status,
            input_values: ValueMap::new(),
            output_values: ValueMap::new(),
            error_message: None,
            started_at: None,
            finished_at: None,
        }
    }
}

/// Accumulating `node.output -> value` store. Entries are only ever added
/// or overwritten, never removed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PipelineState {
    data: ValueMap,
}

impl PipelineState {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    pub fn put(&mut self, key: impl Into<String>, value: Value) {
        self.data.insert(key.into(), value);
    }

    pub fn contains(&self, key: &str) -> bool {
        self.data.contains_key(key)
    }

    /// Write every output of `node_id` under its `node.output` key.
    pub fn merge_outputs(&mut self, node_id: &str, outputs: &ValueMap) {
        for (name, value) in outputs {
            self.put(slot_key(node_id, name), value.clone());
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_map(&self) -> &ValueMap {
        &self.data
    }
}

/// Observer invoked synchronously after every mutation of a pipeline.
///
/// The snapshot passed in is always fully updated. Implementations must not
/// panic; failures are theirs to log.
pub trait PersistHook: Send + Sync {
    fn persist(&self, pipeline: &Pipeline);
}

impl<F> PersistHook for F
where
    F: Fn(&Pipeline) + Send + Sync,
{
    fn persist(&self, pipeline: &Pipeline) {
        self(pipeline)
    }
}

/// Canonical externally visible view of a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusReport {
    pub id: String,
    pub status: PipelineStatus,
    pub started_at: String,
    pub executed_nodes: BTreeMap<String, NodeExecutionRecord>,
    pub required_user_inputs: Vec<String>,
    pub state: ValueMap,
}

#[derive(Clone)]
pub struct Pipeline {
    id: String,
    flow: Arc<Flow>,
    started_at: DateTime<Utc>,
    executed_nodes: BTreeMap<String, NodeExecutionRecord>,
    user_inputs: ValueMap,
    state: PipelineState,
    status: PipelineStatus,
    persist_hook: Option<Arc<dyn PersistHook>>,
}

impl Pipeline {
    pub fn new(flow: Arc<Flow>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            flow,
            started_at: Utc::now(),
            executed_nodes: BTreeMap::new(),
            user_inputs: ValueMap::new(),
            state: PipelineState::default(),
            status: PipelineStatus::Initialized,
            persist_hook: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Register the persistence observer. Done once, before the run starts.
    pub fn with_persist_hook(mut self, hook: impl PersistHook + 'static) -> Self {
        self.persist_hook = Some(Arc::new(hook));
        self
    }

    pub fn with_shared_persist_hook(mut self, hook: Arc<dyn PersistHook>) -> Self {
        self.persist_hook = Some(hook);
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn flow(&self) -> &Arc<Flow> {
        &self.flow
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn status(&self) -> PipelineStatus {
        self.status
    }

    pub fn state(&self) -> &PipelineState {
        &self.state
    }

    pub fn user_inputs(&self) -> &ValueMap {
        &self.user_inputs
    }

    pub fn user_input(&self, key: &str) -> Option<&Value> {
        self.user_inputs.get(key)
    }

    pub fn executed_nodes(&self) -> &BTreeMap<String, NodeExecutionRecord> {
        &self.executed_nodes
    }

    pub fn node_record(&self, node_id: &str) -> Option<&NodeExecutionRecord> {
        self.executed_nodes.get(node_id)
    }

    pub fn node_status(&self, node_id: &str) -> Option<PipelineStatus> {
        self.node_record(node_id).map(|r| r.status)
    }

    /// Upsert the ledger entry for `node_id`, then persist.
    ///
    /// `started_at` is stamped only when entering RUNNING, `finished_at` only
    /// when entering a terminal status. Inputs and outputs are replaced only
    /// when given.
    pub fn update_node_status(
        &mut self,
        node_id: &str,
        status: PipelineStatus,
        inputs: Option<ValueMap>,
        outputs: Option<ValueMap>,
        error: Option<String>,
    ) {
        let now = Utc::now();
        let record = self
            .executed_nodes
            .entry(node_id.to_string())
            .or_insert_with(|| NodeExecutionRecord::new(status));

        record.status = status;
        if let Some(inputs) = inputs {
            record.input_values = inputs;
        }
        if let Some(outputs) = outputs {
            record.output_values = outputs;
        }
        record.error_message = error;
        if status.is_running() {
            record.started_at = Some(now);
            record.finished_at = None;
        } else if status.is_terminal() {
            record.finished_at = Some(now);
        }

        self.persist();
    }

    /// Merge a node's outputs into state and mark it SUCCESS as one mutation,
    /// so the hook never sees outputs without the matching ledger entry.
    pub fn record_success(&mut self, node_id: &str, inputs: ValueMap, outputs: ValueMap) {
        self.state.merge_outputs(node_id, &outputs);
        self.update_node_status(
            node_id,
            PipelineStatus::Success,
            Some(inputs),
            Some(outputs),
            None,
        );
    }

    pub fn record_failure(&mut self, node_id: &str, inputs: Option<ValueMap>, error: String) {
        self.update_node_status(node_id, PipelineStatus::Failed, inputs, None, Some(error));
    }

    /// Enter RUNNING at the start of an engine run.
    pub fn start(&mut self) -> Result<(), FlowError> {
        match self.status {
            PipelineStatus::Initialized | PipelineStatus::Running => {
                self.status = PipelineStatus::Running;
                self.persist();
                Ok(())
            }
            from => Err(FlowError::InvalidTransition {
                from,
                to: PipelineStatus::Running,
            }),
        }
    }

    pub fn pause(&mut self) -> Result<(), FlowError> {
        match self.status {
            PipelineStatus::Initialized | PipelineStatus::Running => {
                self.status = PipelineStatus::Paused;
                self.persist();
                Ok(())
            }
            from => Err(FlowError::InvalidTransition {
                from,
                to: PipelineStatus::Paused,
            }),
        }
    }

    pub fn resume(&mut self) -> Result<(), FlowError> {
        match self.status {
            PipelineStatus::Paused => {
                self.status = PipelineStatus::Running;
                self.persist();
                Ok(())
            }
            from => Err(FlowError::InvalidTransition {
                from,
                to: PipelineStatus::Running,
            }),
        }
    }

    /// Derive the aggregate status from the ledger once no step is in flight.
    ///
    /// Any FAILED node fails the pipeline; every node SUCCESS succeeds it.
    /// Otherwise the status is left as is.
    pub fn finish(&mut self) -> PipelineStatus {
        let derived = if self.executed_nodes.values().any(|r| r.status.has_failed()) {
            Some(PipelineStatus::Failed)
        } else if self.all_nodes_succeeded() {
            Some(PipelineStatus::Success)
        } else {
            None
        };

        if let Some(status) = derived {
            if status != self.status {
                self.status = status;
                self.persist();
            }
        }
        self.status
    }

    pub fn all_nodes_succeeded(&self) -> bool {
        self.flow
            .nodes
            .iter()
            .all(|n| self.node_status(&n.id) == Some(PipelineStatus::Success))
    }

    pub fn inject_user_input(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.user_inputs.insert(key.into(), value.into());
        self.persist();
    }

    /// Inputs no edge supplies; callers provide them via `inject_user_input`.
    pub fn required_inputs(&self) -> Vec<String> {
        self.flow.required_inputs()
    }

    /// Required inputs that have not been injected yet.
    pub fn missing_inputs(&self) -> Vec<String> {
        self.required_inputs()
            .into_iter()
            .filter(|key| !self.user_inputs.contains_key(key))
            .collect()
    }

    pub fn export_status(&self) -> StatusReport {
        StatusReport {
            id: self.id.clone(),
            status: self.status,
            started_at: self.started_at.to_rfc3339(),
            executed_nodes: self.executed_nodes.clone(),
            required_user_inputs: self.required_inputs(),
            state: self.state.as_map().clone(),
        }
    }

    fn persist(&self) {
        if let Some(hook) = &self.persist_hook {
            hook.persist(self);
        }
    }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("id", &self.id)
            .field("flow", &self.flow.id)
            .field("status", &self.status)
            .field("executed_nodes", &self.executed_nodes)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}
