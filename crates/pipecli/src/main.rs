use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use pipecore::{
    ExecutionEvent, Flow, FunctionDefinition, Node, NodeEvent, NotificationLevel, PersistHook,
    Value, ValueMap,
};
use pipenodes::{JsonSnapshotPersister, RemoteTransformConfig, RemoteTransformExecutor};
use piperuntime::{FunctionRegistry, PipelineRuntime, RunOutcome, RuntimeConfig};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "pipeflow")]
#[command(about = "Typed DAG pipeline runner", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct EngineArgs {
    /// Maximum number of independent nodes running at once
    #[arg(long, env = "PIPEFLOW_MAX_PARALLEL", default_value_t = 1)]
    max_parallel: usize,

    /// URL template of the custom transformation service
    #[arg(
        long,
        env = "PIPEFLOW_TRANSFORM_URL",
        default_value = "http://executor-{language}:8000/transform"
    )]
    transform_url: String,

    /// Timeout for one custom transformation call, in seconds
    #[arg(long, env = "PIPEFLOW_TRANSFORM_TIMEOUT_SECS", default_value_t = 10)]
    transform_timeout_secs: u64,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a flow file
    Run {
        /// Path to flow JSON file
        #[arg(short, long)]
        file: PathBuf,

        /// Injected inputs as a JSON object keyed by "node.param"
        #[arg(short, long)]
        input: Option<String>,

        /// Show verbose output
        #[arg(short, long)]
        verbose: bool,

        /// Write a status snapshot to DIR/<pipeline id>.json after every change
        #[arg(long)]
        snapshot_dir: Option<PathBuf>,

        #[command(flatten)]
        engine: EngineArgs,
    },

    /// Validate a flow file and print its execution order
    Validate {
        /// Path to flow JSON file
        file: PathBuf,
    },

    /// List available functions
    Functions,

    /// Create an example flow
    Init {
        /// Output file path
        #[arg(short, long, default_value = "flow.json")]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            file,
            input,
            verbose,
            snapshot_dir,
            engine,
        } => {
            let default_level = if verbose { "debug" } else { "info" };
            tracing_subscriber::fmt()
                .with_env_filter(
                    EnvFilter::try_from_default_env()
                        .unwrap_or_else(|_| EnvFilter::new(default_level)),
                )
                .init();

            run_flow(file, input, snapshot_dir, engine).await?;
        }

        Commands::Validate { file } => {
            validate_flow(file)?;
        }

        Commands::Functions => {
            list_functions();
        }

        Commands::Init { output } => {
            create_example_flow(output)?;
        }
    }

    Ok(())
}

fn load_flow(file: &PathBuf) -> Result<Flow> {
    let flow_json = std::fs::read_to_string(file)
        .with_context(|| format!("reading {}", file.display()))?;
    let flow: Flow = serde_json::from_str(&flow_json)
        .with_context(|| format!("parsing {}", file.display()))?;
    Ok(flow)
}

fn parse_inputs(input: Option<String>) -> Result<ValueMap> {
    let Some(input_str) = input else {
        return Ok(ValueMap::new());
    };
    match serde_json::from_str::<serde_json::Value>(&input_str)? {
        serde_json::Value::Object(obj) => Ok(obj
            .into_iter()
            .map(|(k, v)| (k, Value::from(v)))
            .collect()),
        _ => Err(anyhow::anyhow!("Input must be a JSON object")),
    }
}

fn standard_registry() -> FunctionRegistry {
    let mut registry = FunctionRegistry::new();
    pipenodes::register_all(&mut registry);
    pipenodes::install_llm_default(&mut registry, pipenodes::LlmConfig::from_env());
    registry
}

fn print_event(event: ExecutionEvent) {
    match event {
        ExecutionEvent::PipelineStarted { pipeline_id, .. } => {
            println!("▶️  Pipeline {} started", pipeline_id);
        }
        ExecutionEvent::PipelinePaused { .. } => {
            println!("⏸️  Pipeline paused");
        }
        ExecutionEvent::PipelineResumed { .. } => {
            println!("⏯️  Pipeline resumed");
        }
        ExecutionEvent::NodeStarted {
            node_id, function, ..
        } => {
            println!("  ⚡ Starting node: {} ({})", node_id, function);
        }
        ExecutionEvent::NodeCompleted {
            node_id,
            duration_ms,
            ..
        } => {
            println!("  ✅ Node {} completed in {}ms", node_id, duration_ms);
        }
        ExecutionEvent::NodeFailed { node_id, error, .. } => {
            println!("  ❌ Node {} failed: {}", node_id, error);
        }
        ExecutionEvent::NodeEvent { node_id, event, .. } => match event {
            NodeEvent::Notification { level, message, .. } => {
                let icon = match level {
                    NotificationLevel::Debug => "🔎",
                    NotificationLevel::Info => "ℹ️ ",
                    NotificationLevel::Warning => "⚠️ ",
                    NotificationLevel::Error | NotificationLevel::Critical => "🛑",
                };
                println!("     {} [{}] {}", icon, node_id, message);
            }
            NodeEvent::Progress { percent, message } => {
                if let Some(msg) = message {
                    println!("     📊 [{}] {}% - {}", node_id, percent, msg);
                } else {
                    println!("     📊 [{}] {}%", node_id, percent);
                }
            }
            NodeEvent::Data { port, value } => {
                println!("     📦 [{}] {} = {}", node_id, port, value.to_display_string());
            }
        },
        ExecutionEvent::PipelineCompleted {
            status,
            duration_ms,
            ..
        } => {
            if status.has_succeeded() {
                println!("✨ Pipeline completed successfully in {}ms", duration_ms);
            } else {
                println!("💥 Pipeline {} after {}ms", status, duration_ms);
            }
        }
    }
}

async fn run_flow(
    file: PathBuf,
    input: Option<String>,
    snapshot_dir: Option<PathBuf>,
    engine: EngineArgs,
) -> Result<()> {
    println!("🚀 Loading flow from: {}", file.display());

    let flow = load_flow(&file)?;
    println!("📋 Flow: {}", flow.name);
    println!("   Nodes: {}", flow.nodes.len());
    println!("   Edges: {}", flow.edges.len());
    println!();

    let inputs = parse_inputs(input)?;

    let transforms = RemoteTransformExecutor::new(RemoteTransformConfig {
        url_template: engine.transform_url,
        timeout: Duration::from_secs(engine.transform_timeout_secs),
    });
    let runtime = PipelineRuntime::with_parts(
        Arc::new(standard_registry()),
        Arc::new(transforms),
        RuntimeConfig {
            max_parallel_nodes: engine.max_parallel,
            ..RuntimeConfig::default()
        },
    );

    let mut events = runtime.subscribe_events();
    let event_task = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            print_event(event);
        }
    });

    let flow_id = runtime.register_flow(flow).await?;
    let persister = snapshot_dir.map(|dir| {
        println!("💾 Writing snapshots to {}", dir.display());
        Arc::new(JsonSnapshotPersister::new(dir))
    });
    let hook = persister
        .clone()
        .map(|persister| persister as Arc<dyn PersistHook>);
    let handle = runtime.create_pipeline(flow_id, inputs, hook).await?;

    let missing = handle.read().await.missing_inputs();
    if !missing.is_empty() {
        println!("⚠️  Inputs not provided: {}", missing.join(", "));
    }

    let result = runtime.run_pipeline(handle.id()).await;
    if let Some(persister) = &persister {
        persister.flush().await;
    }

    // Let the event printer drain
    tokio::time::sleep(Duration::from_millis(100)).await;
    event_task.abort();

    let report = handle.export_status().await;
    println!();
    println!("📊 Execution Summary:");
    println!("   Pipeline ID: {}", report.id);
    println!("   Status: {}", report.status);

    match &result {
        Ok(RunOutcome::Completed(summary)) | Ok(RunOutcome::Paused(summary)) => {
            println!(
                "   Completed: {}/{} nodes",
                summary.completed_nodes, summary.total_nodes
            );
        }
        Err(_) => {}
    }

    if !report.state.is_empty() {
        println!();
        println!("📤 State:");
        for (key, value) in &report.state {
            println!("   {}: {}", key, value.to_display_string());
        }
    }

    result?;
    Ok(())
}

fn validate_flow(file: PathBuf) -> Result<()> {
    println!("🔍 Validating flow: {}", file.display());

    let flow = load_flow(&file)?;
    flow.validate_connections()?;
    let order = flow.execution_order()?;

    let registry = standard_registry();
    for node in &flow.nodes {
        registry.resolve(node)?;
    }

    println!("✅ Flow is valid:");
    println!("   Name: {}", flow.name);
    println!("   Nodes: {}", flow.nodes.len());
    println!("   Edges: {}", flow.edges.len());
    println!("   Order: {}", order.join(" → "));

    let required = flow.required_inputs();
    if !required.is_empty() {
        println!("   Required inputs: {}", required.join(", "));
    }

    Ok(())
}

fn list_functions() {
    println!("📦 Available Functions:");
    println!();

    let registry = standard_registry();
    for name in registry.list_functions() {
        if let Some(metadata) = registry.get_metadata(&name) {
            println!("  • {} ({})", name, metadata.category);
            println!("    {}", metadata.description);
        } else {
            println!("  • {}", name);
        }
    }
    println!();
    println!("  Nodes without an implementation use llm.complete.");
}

fn create_example_flow(output: PathBuf) -> Result<()> {
    let mut flow = Flow::new("Example HTTP Flow");
    flow.description = Some("Fetches a page and logs a summary of it".to_string());

    let fetch = flow.add_node(Node::new(
        "fetch",
        "Fetch Data",
        FunctionDefinition::new("fetch")
            .with_input("url", "string")
            .with_output("status", "number")
            .with_output("body", "string")
            .implemented_by("http.request")
            .with_config("method", "GET"),
    ));
    let summary = flow.add_node(Node::new(
        "summary",
        "Summarize",
        FunctionDefinition::new("summary")
            .with_input("status", "number")
            .with_input("body", "string")
            .with_output("text", "string")
            .implemented_by("text.format")
            .with_config("template", "HTTP {status}: {body}"),
    ));
    let log = flow.add_node(Node::new(
        "log",
        "Log Summary",
        FunctionDefinition::new("log")
            .with_input("message", "string")
            .with_output("message", "string")
            .implemented_by("debug.log"),
    ));

    flow.connect(&fetch, "status", &summary, "status");
    flow.connect(&fetch, "body", &summary, "body");
    flow.connect(&summary, "text", &log, "message");

    let json = serde_json::to_string_pretty(&flow)?;
    std::fs::write(&output, json)?;

    println!("✨ Created example flow: {}", output.display());
    println!();
    println!("Run it with:");
    println!(
        "  pipeflow run --file {} --input '{{\"fetch.url\": \"https://api.github.com/zen\"}}'",
        output.display()
    );

    Ok(())
}
