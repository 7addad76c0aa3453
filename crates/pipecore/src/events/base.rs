use crate::{FlowId, PipelineStatus, Value, ValueMap};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Events emitted while a pipeline runs
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ExecutionEvent {
    PipelineStarted {
        pipeline_id: String,
        flow_id: FlowId,
        timestamp: DateTime<Utc>,
    },
    PipelinePaused {
        pipeline_id: String,
        timestamp: DateTime<Utc>,
    },
    PipelineResumed {
        pipeline_id: String,
        timestamp: DateTime<Utc>,
    },
    PipelineCompleted {
        pipeline_id: String,
        status: PipelineStatus,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },
    NodeStarted {
        pipeline_id: String,
        node_id: String,
        function: String,
        timestamp: DateTime<Utc>,
    },
    NodeCompleted {
        pipeline_id: String,
        node_id: String,
        outputs: ValueMap,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },
    NodeFailed {
        pipeline_id: String,
        node_id: String,
        error: String,
        timestamp: DateTime<Utc>,
    },
    NodeEvent {
        pipeline_id: String,
        node_id: String,
        event: NodeEvent,
        timestamp: DateTime<Utc>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationLevel {
    Debug,
    Info,
    Warning,
    Error,
    Critical,
}

/// Events raised from inside a node body
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event_type")]
pub enum NodeEvent {
    Notification {
        level: NotificationLevel,
        message: String,
        #[serde(default)]
        metadata: ValueMap,
    },
    Progress {
        percent: f64,
        message: Option<String>,
    },
    Data {
        port: String,
        value: Value,
    },
}

/// Handle a node uses to send notifications; sends never fail the node.
#[derive(Clone)]
pub struct EventEmitter {
    pipeline_id: String,
    node_id: String,
    sender: broadcast::Sender<ExecutionEvent>,
}

impl EventEmitter {
    pub fn new(
        pipeline_id: impl Into<String>,
        node_id: impl Into<String>,
        sender: broadcast::Sender<ExecutionEvent>,
    ) -> Self {
        Self {
            pipeline_id: pipeline_id.into(),
            node_id: node_id.into(),
            sender,
        }
    }

    pub fn emit(&self, event: NodeEvent) {
        let _ = self.sender.send(ExecutionEvent::NodeEvent {
            pipeline_id: self.pipeline_id.clone(),
            node_id: self.node_id.clone(),
            event,
            timestamp: Utc::now(),
        });
    }

    pub fn notify(&self, level: NotificationLevel, message: impl Into<String>, metadata: ValueMap) {
        self.emit(NodeEvent::Notification {
            level,
            message: message.into(),
            metadata,
        });
    }

    pub fn debug(&self, message: impl Into<String>) {
        self.notify(NotificationLevel::Debug, message, ValueMap::new());
    }

    pub fn info(&self, message: impl Into<String>) {
        self.notify(NotificationLevel::Info, message, ValueMap::new());
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.notify(NotificationLevel::Warning, message, ValueMap::new());
    }

    pub fn error(&self, message: impl Into<String>) {
        self.notify(NotificationLevel::Error, message, ValueMap::new());
    }

    pub fn critical(&self, message: impl Into<String>) {
        self.notify(NotificationLevel::Critical, message, ValueMap::new());
    }

    pub fn progress(&self, percent: f64, message: Option<String>) {
        self.emit(NodeEvent::Progress { percent, message });
    }

    pub fn data(&self, port: impl Into<String>, value: Value) {
        self.emit(NodeEvent::Data {
            port: port.into(),
            value,
        });
    }
}

/// Broadcast bus shared by the engine and every node of a runtime
pub struct EventBus {
    sender: broadcast::Sender<ExecutionEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ExecutionEvent> {
        self.sender.subscribe()
    }

    pub fn emit(&self, event: ExecutionEvent) {
        let _ = self.sender.send(event);
    }

    pub fn create_emitter(&self, pipeline_id: &str, node_id: &str) -> EventEmitter {
        EventEmitter::new(pipeline_id, node_id, self.sender.clone())
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1000)
    }
}
