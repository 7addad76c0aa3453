mod base;

pub use base::{EventBus, EventEmitter, ExecutionEvent, NodeEvent, NotificationLevel};
