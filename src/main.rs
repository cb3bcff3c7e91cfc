use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use schemaflow::{
    ModelDeclaration, Platform, PlatformConfig, SchemaSynthesizer, WorkflowDefinition, web,
};

#[derive(Parser)]
#[command(name = "schemaflow")]
#[command(about = "Runtime-declared models, generic CRUD and versioned workflows")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the HTTP API
    Serve {
        /// JSON array of model declarations to activate on start
        #[arg(long)]
        models: Option<PathBuf>,
        /// JSON array of workflow definitions to save on start
        #[arg(long)]
        workflows: Option<PathBuf>,
    },
    /// Validate and compile model declarations without activating them
    CheckModels { file: PathBuf },
    /// Run one workflow against an in-memory platform and print the result
    Run {
        workflow: PathBuf,
        #[arg(long)]
        models: PathBuf,
        #[arg(long, default_value = "{}")]
        input: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Command::Serve { models, workflows } => serve(models, workflows).await,
        Command::CheckModels { file } => check_models(&file).await,
        Command::Run {
            workflow,
            models,
            input,
        } => run_workflow(&workflow, &models, &input).await,
    }
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("schemaflow=info,tower_http=info")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("failed to parse {}", path.display()))
}

async fn serve(models: Option<PathBuf>, workflows: Option<PathBuf>) -> Result<()> {
    let config = PlatformConfig::from_env()?;
    let addr = config.bind_addr;
    let platform = Platform::builder().config(config).build().await?;

    if let Some(path) = models {
        let declarations: Vec<ModelDeclaration> = read_json(&path).await?;
        let generation = platform.regenerate(declarations).await?;
        info!(version = generation.version(), "models activated");
    }
    if let Some(path) = workflows {
        let definitions: Vec<WorkflowDefinition> = read_json(&path).await?;
        for definition in definitions {
            let name = definition.workflow_name.clone();
            let (version, saved) = platform
                .workflows()
                .seed_workflow(definition)
                .await
                .with_context(|| format!("failed to save workflow '{}'", name))?;
            info!(workflow = %name, version, saved, "workflow loaded");
        }
    }

    let app = web::router(Arc::new(platform));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    info!(%addr, "listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;
    Ok(())
}

async fn check_models(file: &Path) -> Result<()> {
    let declarations: Vec<ModelDeclaration> = read_json(file).await?;
    let compiled = SchemaSynthesizer::check(&declarations)?;
    for descriptor in &compiled.descriptors {
        println!(
            "{} ({} field(s), key {})",
            descriptor.model_name,
            descriptor.fields.len(),
            descriptor.key_field().name
        );
    }
    Ok(())
}

async fn run_workflow(workflow: &Path, models: &Path, input: &str) -> Result<()> {
    let input: Value = serde_json::from_str(input).context("--input is not valid JSON")?;
    let declarations: Vec<ModelDeclaration> = read_json(models).await?;
    let definition: WorkflowDefinition = read_json(workflow).await?;
    let name = definition.workflow_name.clone();
    if name.trim().is_empty() {
        bail!("{} has no workflowName", workflow.display());
    }

    let platform = Platform::in_memory().await?;
    platform.regenerate(declarations).await?;
    platform.workflows().save_workflow(definition).await?;
    let result = platform.workflows().run(&name, input, Value::Null).await?;
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "unable to install ctrl+c handler");
    }
}
