use pipecore::{
    Flow, FlowError, FunctionDefinition, Node, Pipeline, PipelineStatus, Value, ValueMap,
};
use std::sync::{Arc, Mutex};

fn two_node_flow() -> Arc<Flow> {
    let mut flow = Flow::new("pipeline");
    flow.add_node(Node::new(
        "a",
        "A",
        FunctionDefinition::new("produce").with_output("y", "int"),
    ));
    flow.add_node(Node::new(
        "b",
        "B",
        FunctionDefinition::new("consume")
            .with_input("z", "int")
            .with_input("scale", "int")
            .with_output("w", "int"),
    ));
    flow.connect("a", "y", "b", "z");
    Arc::new(flow)
}

/// Collects the status seen by the persistence hook on every call.
fn recording_pipeline() -> (Pipeline, Arc<Mutex<Vec<PipelineStatus>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let pipeline = Pipeline::new(two_node_flow()).with_persist_hook(move |p: &Pipeline| {
        sink.lock().unwrap().push(p.status());
    });
    (pipeline, seen)
}

#[test]
fn test_status_predicates() {
    assert!(PipelineStatus::Success.is_terminal());
    assert!(PipelineStatus::Failed.is_terminal());
    assert!(!PipelineStatus::Paused.is_terminal());
    assert!(PipelineStatus::Running.is_running());
    assert!(PipelineStatus::Paused.is_paused());
    assert!(PipelineStatus::Failed.has_failed());
    assert!(PipelineStatus::Success.has_succeeded());
    assert_eq!(
        serde_json::to_string(&PipelineStatus::Initialized).unwrap(),
        "\"initialized\""
    );
}

#[test]
fn test_node_record_timestamps() {
    let (mut pipeline, _) = recording_pipeline();

    pipeline.update_node_status("a", PipelineStatus::Running, None, None, None);
    let running = pipeline.node_record("a").unwrap().clone();
    assert_eq!(running.status, PipelineStatus::Running);
    assert!(running.started_at.is_some());
    assert!(running.finished_at.is_none());

    let mut outputs = ValueMap::new();
    outputs.insert("y".to_string(), Value::from(7));
    pipeline.record_success("a", ValueMap::new(), outputs);

    let done = pipeline.node_record("a").unwrap();
    assert_eq!(done.status, PipelineStatus::Success);
    assert_eq!(done.started_at, running.started_at, "started_at is preserved");
    assert!(done.finished_at.is_some());
    assert_eq!(pipeline.state().get("a.y"), Some(&Value::Number(7.0)));
}

#[test]
fn test_failure_records_error_message() {
    let (mut pipeline, _) = recording_pipeline();

    pipeline.update_node_status("b", PipelineStatus::Running, None, None, None);
    pipeline.record_failure("b", None, "Missing required input: scale".to_string());

    let record = pipeline.node_record("b").unwrap();
    assert_eq!(record.status, PipelineStatus::Failed);
    assert_eq!(
        record.error_message.as_deref(),
        Some("Missing required input: scale")
    );
    assert_eq!(pipeline.finish(), PipelineStatus::Failed);
}

#[test]
fn test_persist_hook_called_after_every_mutation() {
    let (mut pipeline, seen) = recording_pipeline();

    pipeline.start().unwrap();
    pipeline.update_node_status("a", PipelineStatus::Running, None, None, None);
    pipeline.pause().unwrap();
    pipeline.inject_user_input("b.scale", 3);
    pipeline.resume().unwrap();

    assert_eq!(
        *seen.lock().unwrap(),
        vec![
            PipelineStatus::Running,
            PipelineStatus::Running,
            PipelineStatus::Paused,
            PipelineStatus::Paused,
            PipelineStatus::Running,
        ]
    );
}

#[test]
fn test_hook_sees_outputs_together_with_success() {
    let observed = Arc::new(Mutex::new(Vec::new()));
    let sink = observed.clone();
    let mut pipeline = Pipeline::new(two_node_flow()).with_persist_hook(move |p: &Pipeline| {
        sink.lock()
            .unwrap()
            .push((p.node_status("a"), p.state().contains("a.y")));
    });

    let mut outputs = ValueMap::new();
    outputs.insert("y".to_string(), Value::from(1));
    pipeline.record_success("a", ValueMap::new(), outputs);

    assert_eq!(
        *observed.lock().unwrap(),
        vec![(Some(PipelineStatus::Success), true)]
    );
}

#[test]
fn test_invalid_transitions() {
    let (mut pipeline, _) = recording_pipeline();

    assert!(matches!(
        pipeline.resume(),
        Err(FlowError::InvalidTransition {
            from: PipelineStatus::Initialized,
            to: PipelineStatus::Running,
        })
    ));

    pipeline.pause().unwrap();
    assert!(pipeline.start().is_err(), "a paused pipeline must be resumed first");
    pipeline.resume().unwrap();
    assert_eq!(pipeline.status(), PipelineStatus::Running);
}

#[test]
fn test_required_and_missing_inputs() {
    let (mut pipeline, _) = recording_pipeline();

    assert_eq!(pipeline.required_inputs(), vec!["b.scale".to_string()]);
    assert_eq!(pipeline.missing_inputs(), vec!["b.scale".to_string()]);

    pipeline.inject_user_input("b.scale", 2);
    assert_eq!(pipeline.required_inputs(), vec!["b.scale".to_string()]);
    assert!(pipeline.missing_inputs().is_empty());
    assert_eq!(pipeline.user_input("b.scale"), Some(&Value::Number(2.0)));
}

#[test]
fn test_export_status_shape() {
    let (mut pipeline, _) = recording_pipeline();
    pipeline = pipeline.with_id("run-1");
    pipeline.start().unwrap();
    let mut outputs = ValueMap::new();
    outputs.insert("y".to_string(), Value::from(7));
    pipeline.update_node_status("a", PipelineStatus::Running, None, None, None);
    pipeline.record_success("a", ValueMap::new(), outputs);

    let report = pipeline.export_status();
    let json = serde_json::to_value(&report).unwrap();

    assert_eq!(json["id"], "run-1");
    assert_eq!(json["status"], "running");
    assert_eq!(json["state"]["a.y"], 7);
    assert_eq!(json["executed_nodes"]["a"]["status"], "success");
    assert_eq!(json["required_user_inputs"][0], "b.scale");
    assert!(chrono::DateTime::parse_from_rfc3339(&report.started_at).is_ok());
}

#[test]
fn test_finish_derives_success_only_when_all_nodes_succeeded() {
    let (mut pipeline, _) = recording_pipeline();
    pipeline.start().unwrap();

    pipeline.record_success("a", ValueMap::new(), ValueMap::new());
    assert_eq!(pipeline.finish(), PipelineStatus::Running);

    pipeline.record_success("b", ValueMap::new(), ValueMap::new());
    assert_eq!(pipeline.finish(), PipelineStatus::Success);
    assert!(pipeline.pause().is_err());
}
