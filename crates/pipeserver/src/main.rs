use actix_cors::Cors;
use actix_web::{get, post, web, App, HttpResponse, HttpServer, Responder, Result as ActixResult};
use actix_ws::Message;
use pipecore::{Flow, FlowError, PersistHook, Value, ValueMap};
use pipenodes::{JsonSnapshotPersister, RemoteTransformConfig, RemoteTransformExecutor};
use piperuntime::{FunctionRegistry, PipelineRuntime, RunOutcome, RuntimeConfig};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

/// Application state shared across handlers
struct AppState {
    runtime: Arc<PipelineRuntime>,
    /// One writer shared by every pipeline when PIPEFLOW_SNAPSHOT_DIR is set
    persister: Option<Arc<JsonSnapshotPersister>>,
}

impl AppState {
    fn persist_hook(&self) -> Option<Arc<dyn PersistHook>> {
        self.persister
            .clone()
            .map(|persister| persister as Arc<dyn PersistHook>)
    }

    /// Drive a pipeline in the background until it completes, pauses or fails.
    fn spawn_run(&self, pipeline_id: String) {
        let runtime = self.runtime.clone();
        actix_web::rt::spawn(async move {
            match runtime.run_pipeline(&pipeline_id).await {
                Ok(RunOutcome::Completed(summary)) => info!(
                    "Pipeline {} completed: {}/{} nodes",
                    pipeline_id, summary.completed_nodes, summary.total_nodes
                ),
                Ok(RunOutcome::Paused(summary)) => info!(
                    "Pipeline {} paused after {}/{} nodes",
                    pipeline_id, summary.completed_nodes, summary.total_nodes
                ),
                // A resume issued during a live run queues behind it and
                // finds nothing left to do.
                Err(FlowError::InvalidTransition { from, .. }) if from.is_terminal() => info!(
                    "Pipeline {} already finished as {}, nothing to resume",
                    pipeline_id, from
                ),
                Err(e) => error!("Pipeline {} failed: {}", pipeline_id, e),
            }
        });
    }
}

/// Request body for pipeline creation
#[derive(Debug, Default, Deserialize)]
struct CreatePipelineRequest {
    #[serde(default)]
    inputs: ValueMap,
}

/// Request body for injecting one user input
#[derive(Debug, Deserialize)]
struct InjectInputRequest {
    key: String,
    value: Value,
}

#[derive(Debug, Serialize)]
struct FlowResponse {
    id: Uuid,
    execution_order: Vec<String>,
    required_inputs: Vec<String>,
}

#[derive(Debug, Serialize)]
struct PipelineResponse {
    id: String,
    flow_id: Uuid,
    missing_inputs: Vec<String>,
}

/// Error response
#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

fn error_response(err: &FlowError) -> HttpResponse {
    let body = ErrorResponse {
        error: err.to_string(),
    };
    match err {
        FlowError::FlowNotFound(_) | FlowError::PipelineNotFound(_) => {
            HttpResponse::NotFound().json(body)
        }
        FlowError::Graph(_) => HttpResponse::BadRequest().json(body),
        FlowError::InvalidTransition { .. } => HttpResponse::Conflict().json(body),
        _ => HttpResponse::InternalServerError().json(body),
    }
}

/// Health check endpoint
#[get("/health")]
async fn health_check() -> impl Responder {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "service": "pipeflow"
    }))
}

/// List all flows
#[get("/api/flows")]
async fn list_flows(data: web::Data<AppState>) -> ActixResult<impl Responder> {
    let flows = data.runtime.list_flows().await;
    let flow_list: Vec<_> = flows
        .iter()
        .map(|f| {
            serde_json::json!({
                "id": f.id,
                "name": f.name,
                "description": f.description,
                "nodes": f.nodes.len(),
                "edges": f.edges.len(),
            })
        })
        .collect();

    Ok(HttpResponse::Ok().json(flow_list))
}

/// Validate, compile and store a flow
#[post("/api/flows")]
async fn create_flow(
    data: web::Data<AppState>,
    flow: web::Json<Flow>,
) -> ActixResult<impl Responder> {
    let flow = flow.into_inner();
    info!("Creating flow: {} ({})", flow.name, flow.id);

    let flow_id = match data.runtime.register_flow(flow).await {
        Ok(id) => id,
        Err(e) => {
            warn!("Rejected flow: {}", e);
            return Ok(error_response(&e));
        }
    };

    match data.runtime.get_flow(flow_id).await {
        Some(compiled) => Ok(HttpResponse::Created().json(FlowResponse {
            id: flow_id,
            execution_order: compiled
                .execution_order()
                .into_iter()
                .map(String::from)
                .collect(),
            required_inputs: compiled.flow().required_inputs(),
        })),
        None => Ok(error_response(&FlowError::FlowNotFound(flow_id.to_string()))),
    }
}

/// Get a specific flow
#[get("/api/flows/{id}")]
async fn get_flow(
    data: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> ActixResult<impl Responder> {
    let flow_id = path.into_inner();

    match data.runtime.get_flow(flow_id).await {
        Some(compiled) => Ok(HttpResponse::Ok().json(compiled.flow().as_ref())),
        None => Ok(error_response(&FlowError::FlowNotFound(flow_id.to_string()))),
    }
}

/// Delete a flow
#[actix_web::delete("/api/flows/{id}")]
async fn delete_flow(
    data: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> ActixResult<impl Responder> {
    let flow_id = path.into_inner();

    if data.runtime.remove_flow(flow_id).await {
        info!("Deleted flow: {}", flow_id);
        Ok(HttpResponse::Ok().json(serde_json::json!({
            "message": "Flow deleted successfully"
        })))
    } else {
        Ok(error_response(&FlowError::FlowNotFound(flow_id.to_string())))
    }
}

/// Create a pipeline for a flow and start running it
#[post("/api/flows/{id}/pipelines")]
async fn create_pipeline(
    data: web::Data<AppState>,
    path: web::Path<Uuid>,
    req: Option<web::Json<CreatePipelineRequest>>,
) -> ActixResult<impl Responder> {
    let flow_id = path.into_inner();
    let inputs = req.map(|r| r.into_inner().inputs).unwrap_or_default();

    let handle = match data
        .runtime
        .create_pipeline(flow_id, inputs, data.persist_hook())
        .await
    {
        Ok(handle) => handle,
        Err(e) => return Ok(error_response(&e)),
    };

    let missing_inputs = handle.read().await.missing_inputs();
    if !missing_inputs.is_empty() {
        warn!(
            "Pipeline {} starting without inputs: {}",
            handle.id(),
            missing_inputs.join(", ")
        );
    }

    data.spawn_run(handle.id().to_string());

    Ok(HttpResponse::Accepted().json(PipelineResponse {
        id: handle.id().to_string(),
        flow_id,
        missing_inputs,
    }))
}

/// Status report of a pipeline
#[get("/api/pipelines/{id}")]
async fn get_pipeline(
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> ActixResult<impl Responder> {
    match data.runtime.pipeline_status(&path.into_inner()).await {
        Ok(report) => Ok(HttpResponse::Ok().json(report)),
        Err(e) => Ok(error_response(&e)),
    }
}

#[post("/api/pipelines/{id}/pause")]
async fn pause_pipeline(
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> ActixResult<impl Responder> {
    let pipeline_id = path.into_inner();
    match data.runtime.pause_pipeline(&pipeline_id).await {
        Ok(()) => Ok(HttpResponse::Ok().json(serde_json::json!({
            "id": pipeline_id,
            "status": "paused"
        }))),
        Err(e) => Ok(error_response(&e)),
    }
}

/// Resume a paused pipeline and schedule its remaining nodes
#[post("/api/pipelines/{id}/resume")]
async fn resume_pipeline(
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> ActixResult<impl Responder> {
    let pipeline_id = path.into_inner();
    if let Err(e) = data.runtime.resume_pipeline(&pipeline_id).await {
        return Ok(error_response(&e));
    }

    data.spawn_run(pipeline_id.clone());
    Ok(HttpResponse::Accepted().json(serde_json::json!({
        "id": pipeline_id,
        "status": "running"
    })))
}

/// Inject a user input under "node.param"
#[post("/api/pipelines/{id}/inputs")]
async fn inject_input(
    data: web::Data<AppState>,
    path: web::Path<String>,
    req: web::Json<InjectInputRequest>,
) -> ActixResult<impl Responder> {
    let pipeline_id = path.into_inner();
    let InjectInputRequest { key, value } = req.into_inner();

    match data.runtime.inject_input(&pipeline_id, key, value).await {
        Ok(()) => match data.runtime.get_pipeline(&pipeline_id).await {
            Some(handle) => Ok(HttpResponse::Ok().json(serde_json::json!({
                "id": pipeline_id,
                "missing_inputs": handle.read().await.missing_inputs(),
            }))),
            None => Ok(error_response(&FlowError::PipelineNotFound(pipeline_id))),
        },
        Err(e) => Ok(error_response(&e)),
    }
}

/// WebSocket endpoint for real-time events
#[get("/api/events")]
async fn websocket_events(
    req: actix_web::HttpRequest,
    stream: web::Payload,
    data: web::Data<AppState>,
) -> ActixResult<HttpResponse> {
    let (res, mut session, mut msg_stream) = actix_ws::handle(&req, stream)?;

    info!("WebSocket client connected");

    let mut events = data.runtime.subscribe_events();

    actix_web::rt::spawn(async move {
        loop {
            tokio::select! {
                event = events.recv() => {
                    match event {
                        Ok(event) => {
                            if let Ok(json) = serde_json::to_string(&event) {
                                if session.text(json).await.is_err() {
                                    break;
                                }
                            }
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!("WebSocket client lagging, dropped {} events", skipped);
                        }
                        Err(_) => break,
                    }
                }

                Some(Ok(msg)) = msg_stream.recv() => {
                    match msg {
                        Message::Ping(bytes) => {
                            if session.pong(&bytes).await.is_err() {
                                break;
                            }
                        }
                        Message::Close(_) => break,
                        _ => {}
                    }
                }

                else => break,
            }
        }

        info!("WebSocket client disconnected");
        let _ = session.close(None).await;
    });

    Ok(res)
}

/// List available functions
#[get("/api/functions")]
async fn list_functions(data: web::Data<AppState>) -> ActixResult<impl Responder> {
    let registry = data.runtime.registry();

    let functions: Vec<_> = registry
        .list_functions()
        .iter()
        .map(|name| {
            let metadata = registry.get_metadata(name);
            serde_json::json!({
                "name": name,
                "description": metadata.as_ref().map(|m| m.description.clone()).unwrap_or_default(),
                "category": metadata.as_ref().map(|m| m.category.clone()).unwrap_or_default(),
                "inputs": metadata.as_ref().map(|m| m.inputs.clone()).unwrap_or_default(),
                "outputs": metadata.as_ref().map(|m| m.outputs.clone()).unwrap_or_default(),
            })
        })
        .collect();

    Ok(HttpResponse::Ok().json(functions))
}

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("🚀 Starting pipeline server");

    let mut registry = FunctionRegistry::new();
    pipenodes::register_all(&mut registry);
    pipenodes::install_llm_default(&mut registry, pipenodes::LlmConfig::from_env());

    let transform_config = RemoteTransformConfig {
        url_template: std::env::var("PIPEFLOW_TRANSFORM_URL")
            .unwrap_or_else(|_| RemoteTransformConfig::default().url_template),
        timeout: Duration::from_secs(env_or("PIPEFLOW_TRANSFORM_TIMEOUT_SECS", 10)),
    };
    let runtime_config = RuntimeConfig {
        max_parallel_nodes: env_or("PIPEFLOW_MAX_PARALLEL", 1),
        ..RuntimeConfig::default()
    };

    let runtime = PipelineRuntime::with_parts(
        Arc::new(registry),
        Arc::new(RemoteTransformExecutor::new(transform_config)),
        runtime_config,
    );

    info!("✅ Runtime initialized with standard functions");

    let app_state = web::Data::new(AppState {
        runtime: Arc::new(runtime),
        persister: std::env::var("PIPEFLOW_SNAPSHOT_DIR").ok().map(|dir| {
            info!("💾 Writing pipeline snapshots to {}", dir);
            Arc::new(JsonSnapshotPersister::new(PathBuf::from(dir)))
        }),
    });

    let bind_address =
        std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:3000".to_string());

    info!("🌐 Server starting on http://{}", bind_address);

    HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .app_data(app_state.clone())
            .wrap(cors)
            .wrap(actix_web::middleware::Logger::default())
            .service(health_check)
            .service(list_flows)
            .service(create_flow)
            .service(get_flow)
            .service(delete_flow)
            .service(create_pipeline)
            .service(get_pipeline)
            .service(pause_pipeline)
            .service(resume_pipeline)
            .service(inject_input)
            .service(websocket_events)
            .service(list_functions)
    })
    .bind(&bind_address)?
    .run()
    .await?;

    Ok(())
}
