mod common;

use common::fake_http_server;
use pipecore::{
    Edge, Flow, FunctionDefinition, Language, Node, NodeContext, NodeError, NodeOutput,
    Transformation, TransformExecutor, TransformationError, Value, ValueMap,
};
use pipenodes::{RemoteTransformConfig, RemoteTransformExecutor};
use piperuntime::{FunctionRegistry, PipelineRuntime, RuntimeConfig};
use std::sync::Arc;
use std::time::Duration;

fn executor_for(base: &str, timeout: Duration) -> RemoteTransformExecutor {
    RemoteTransformExecutor::new(RemoteTransformConfig {
        url_template: format!("{}/{{language}}/transform", base),
        timeout,
    })
}

#[test]
fn test_default_config_targets_language_service() {
    let config = RemoteTransformConfig::default();
    assert_eq!(
        config.url_for(Language::Python),
        "http://executor-python:8000/transform"
    );
    assert_eq!(
        config.url_for(Language::Go),
        "http://executor-go:8000/transform"
    );
    assert_eq!(config.timeout, Duration::from_secs(10));
}

#[tokio::test]
async fn test_result_field_is_returned() {
    let (base, mut requests) =
        fake_http_server(200, r#"{"result": {"doubled": 14}}"#, Duration::ZERO).await;
    let executor = executor_for(&base, Duration::from_secs(5));

    let value = executor
        .execute(Language::Python, "result = input * 2", Value::from(7))
        .await
        .unwrap();

    let mut expected = ValueMap::new();
    expected.insert("doubled".to_string(), Value::from(14));
    assert_eq!(value, Value::Object(expected));

    let sent: serde_json::Value = serde_json::from_str(&requests.recv().await.unwrap()).unwrap();
    assert_eq!(sent["code"], "result = input * 2");
    assert_eq!(sent["input"], 7);
}

#[tokio::test]
async fn test_null_result_is_a_value() {
    let (base, _requests) = fake_http_server(200, r#"{"result": null}"#, Duration::ZERO).await;
    let executor = executor_for(&base, Duration::from_secs(5));

    let value = executor
        .execute(Language::Javascript, "null", Value::Null)
        .await
        .unwrap();
    assert!(value.is_null());
}

#[tokio::test]
async fn test_missing_result_is_malformed() {
    let (base, _requests) = fake_http_server(200, r#"{"output": 1}"#, Duration::ZERO).await;
    let executor = executor_for(&base, Duration::from_secs(5));

    let err = executor
        .execute(Language::Go, "", Value::from(1))
        .await
        .unwrap_err();
    assert!(matches!(err, TransformationError::MalformedResponse(_)));
}

#[tokio::test]
async fn test_non_json_body_is_malformed() {
    let (base, _requests) = fake_http_server(200, "not json", Duration::ZERO).await;
    let executor = executor_for(&base, Duration::from_secs(5));

    let err = executor
        .execute(Language::Python, "", Value::Null)
        .await
        .unwrap_err();
    assert!(matches!(err, TransformationError::MalformedResponse(_)));
}

#[tokio::test]
async fn test_error_status_is_reported() {
    let (base, _requests) =
        fake_http_server(500, r#"{"error": "exploded"}"#, Duration::ZERO).await;
    let executor = executor_for(&base, Duration::from_secs(5));

    let err = executor
        .execute(Language::Python, "", Value::Null)
        .await
        .unwrap_err();
    match err {
        TransformationError::Status { url, status, body } => {
            assert_eq!(status, 500);
            assert!(url.ends_with("/python/transform"));
            assert!(body.contains("exploded"));
        }
        other => panic!("expected status error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_slow_service_times_out() {
    let (base, _requests) =
        fake_http_server(200, r#"{"result": 1}"#, Duration::from_secs(3)).await;
    let executor = executor_for(&base, Duration::from_millis(200));

    let err = executor
        .execute(Language::Python, "", Value::Null)
        .await
        .unwrap_err();
    assert!(matches!(err, TransformationError::Timeout { .. }));
}

#[tokio::test]
async fn test_unreachable_service_is_request_error() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let executor = executor_for(&format!("http://{}", addr), Duration::from_secs(2));
    let err = executor
        .execute(Language::Python, "", Value::Null)
        .await
        .unwrap_err();
    assert!(matches!(err, TransformationError::Request { .. }));
}

#[tokio::test]
async fn test_custom_edge_runs_through_remote_executor() {
    let (base, mut requests) = fake_http_server(200, r#"{"result": 10}"#, Duration::ZERO).await;

    let mut registry = FunctionRegistry::new();
    registry.register_fn("emit", |_ctx: &NodeContext| {
        Ok(NodeOutput::new().with_output("y", 5))
    });
    registry.register_fn("inc", |ctx: &NodeContext| {
        let z = ctx
            .require_input("z")?
            .as_f64()
            .ok_or_else(|| NodeError::ExecutionFailed("z is not a number".to_string()))?;
        Ok(NodeOutput::new().with_output("w", z + 1.0))
    });

    let runtime = PipelineRuntime::with_parts(
        Arc::new(registry),
        Arc::new(executor_for(&base, Duration::from_secs(5))),
        RuntimeConfig::default(),
    );

    let mut flow = Flow::new("remote");
    flow.add_node(Node::new(
        "A",
        "Emit",
        FunctionDefinition::new("emit")
            .with_output("y", "number")
            .implemented_by("emit"),
    ));
    flow.add_node(Node::new(
        "B",
        "Inc",
        FunctionDefinition::new("inc")
            .with_input("z", "number")
            .with_output("w", "number")
            .implemented_by("inc"),
    ));
    flow.add_edge(
        Edge::new("A", "y", "B", "z")
            .with_transformation(Transformation::custom(Language::Python, "result = input * 2")),
    );

    let flow_id = runtime.register_flow(flow).await.unwrap();
    let handle = runtime
        .create_pipeline(flow_id, ValueMap::new(), None)
        .await
        .unwrap();
    let outcome = runtime.run_pipeline(handle.id()).await.unwrap();
    assert!(outcome.is_completed());

    let state = handle.read().await.state().clone();
    assert_eq!(state.get("B.w"), Some(&Value::Number(11.0)));

    let sent: serde_json::Value = serde_json::from_str(&requests.recv().await.unwrap()).unwrap();
    assert_eq!(sent["input"], 5);
}
