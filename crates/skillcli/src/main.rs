// crates/skillcli/src/main.rs

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use skillcore::{
    ExecutionEvent, ExecutionStatus, InputMapper, NoopNotifier, RunId, RunStatus, SkillEvent,
    TriggerSource, WorkflowDefinition, WorkflowRun,
};
use skillruntime::{
    validate_definition, DependencyGraph, ExecuteOptions, ExecutionQuery, FileStore, RunFilter,
    RuntimeConfig, SkillFilter, SkillRegistry, SkillRuntime, StepOptions, WorkflowComposer,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "skillflow")]
#[command(about = "Skill orchestration engine CLI", long_about = None)]
struct Cli {
    /// Runtime configuration file (JSON)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Directory holding runs and the execution log
    #[arg(long, global = true, env = "SKILLFLOW_STORE", default_value = ".skillflow")]
    store: PathBuf,

    /// Show debug logs
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a workflow file
    Run {
        /// Path to workflow JSON file
        #[arg(short, long)]
        file: PathBuf,

        /// Trigger payload as JSON string
        #[arg(short, long)]
        input: Option<String>,

        /// Trigger source recorded on the run
        #[arg(short, long, default_value = "manual")]
        source: String,
    },

    /// Resume a paused, interrupted or failed run
    Resume {
        run_id: String,

        /// Workflow file the run was started from
        #[arg(short, long)]
        file: PathBuf,

        /// Approval payload for a paused run, as JSON string
        #[arg(short, long)]
        approval: Option<String>,
    },

    /// Cancel a run that has not finished
    Cancel { run_id: String },

    /// Continue every pending or running run of the given workflows
    Recover {
        /// Workflow files to register before recovering
        #[arg(short, long, required = true)]
        file: Vec<PathBuf>,
    },

    /// Execute a single skill outside any workflow
    Exec {
        skill_id: String,

        /// Skill input as JSON string
        #[arg(short, long)]
        input: Option<String>,

        /// Per-attempt timeout override in milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,
    },

    /// Validate a workflow file
    Validate {
        /// Path to workflow JSON file
        file: PathBuf,
    },

    /// List registered skills
    Skills {
        #[arg(long)]
        category: Option<String>,
    },

    /// List stored runs
    Runs {
        #[arg(short, long)]
        workflow: Option<String>,

        #[arg(long)]
        status: Option<String>,

        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },

    /// Query the execution log
    Executions {
        #[arg(long)]
        skill: Option<String>,

        #[arg(long)]
        status: Option<String>,

        /// Only executions belonging to this run
        #[arg(long)]
        run: Option<String>,

        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },

    /// Show skill and workflow statistics
    Stats,

    /// Create a new example workflow
    Init {
        /// Output file path
        #[arg(short, long, default_value = "workflow.json")]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    match cli.command {
        Commands::Run {
            ref file,
            ref input,
            ref source,
        } => {
            let runtime = open_runtime(&cli).await?;
            run_workflow(&runtime, file, input.as_deref(), source).await?;
        }

        Commands::Resume {
            ref run_id,
            ref file,
            ref approval,
        } => {
            let runtime = open_runtime(&cli).await?;
            resume_run(&runtime, run_id, file, approval.as_deref()).await?;
        }

        Commands::Cancel { ref run_id } => {
            let runtime = open_runtime(&cli).await?;
            let run_id = parse_run_id(run_id)?;
            if runtime.cancel(run_id).await? {
                println!("🛑 Run {} cancelled", run_id);
            } else {
                println!("ℹ️  Run {} already finished", run_id);
            }
        }

        Commands::Recover { ref file } => {
            let runtime = open_runtime(&cli).await?;
            for path in file {
                runtime.register_workflow(load_definition(path)?).await?;
            }
            let runs = runtime.recover().await?;
            println!("♻️  Recovered {} run(s)", runs.len());
            for run in &runs {
                print_run_line(run);
            }
        }

        Commands::Exec {
            ref skill_id,
            ref input,
            timeout_ms,
        } => {
            let runtime = open_runtime(&cli).await?;
            let input = parse_json(input.as_deref())?;
            let mut options = ExecuteOptions::new(TriggerSource::Manual);
            if let Some(ms) = timeout_ms {
                options = options.with_timeout(std::time::Duration::from_millis(ms));
            }
            let record = runtime.execute_skill(skill_id, input, options).await?;
            println!(
                "{} {} attempt {} ({}ms)",
                status_icon(record.status),
                record.skill_id,
                record.attempt,
                record.duration_ms.unwrap_or(0)
            );
            match (&record.output, &record.error) {
                (Some(output), _) => println!("{}", serde_json::to_string_pretty(output)?),
                (None, Some(error)) => println!("   {}: {}", error.kind, error.message),
                (None, None) => {}
            }
        }

        Commands::Validate { ref file } => {
            validate_workflow(file)?;
        }

        Commands::Skills { ref category } => {
            list_skills(category.as_deref())?;
        }

        Commands::Runs {
            ref workflow,
            ref status,
            limit,
        } => {
            let runtime = open_runtime(&cli).await?;
            let mut filter = RunFilter::default().limit(limit);
            if let Some(workflow) = workflow {
                filter = filter.workflow(workflow);
            }
            if let Some(status) = status {
                filter = filter.status(status.parse::<RunStatus>().map_err(|e| anyhow!(e))?);
            }
            let runs = runtime.list_runs(&filter).await?;
            if runs.is_empty() {
                println!("No runs found");
            }
            for run in &runs {
                print_run_line(run);
            }
        }

        Commands::Executions {
            ref skill,
            ref status,
            ref run,
            limit,
        } => {
            let runtime = open_runtime(&cli).await?;
            let mut query = ExecutionQuery::default().limit(limit);
            if let Some(skill) = skill {
                query = query.skill(skill);
            }
            if let Some(status) = status {
                query =
                    query.status(status.parse::<ExecutionStatus>().map_err(|e| anyhow!(e))?);
            }
            if let Some(run) = run {
                query = query.correlation(parse_run_id(run)?);
            }
            for record in runtime.executions(&query).await? {
                println!(
                    "{} {} {} attempt {}{} {}ms {}",
                    status_icon(record.status),
                    record.id,
                    record.skill_id,
                    record.attempt,
                    if record.retried { " (retried)" } else { "" },
                    record.duration_ms.unwrap_or(0),
                    record
                        .error
                        .as_ref()
                        .map(|e| e.message.as_str())
                        .unwrap_or("")
                );
            }
        }

        Commands::Stats => {
            let runtime = open_runtime(&cli).await?;
            print_stats(&runtime).await?;
        }

        Commands::Init { ref output } => {
            create_example_workflow(output)?;
        }
    }

    Ok(())
}

fn builtin_registry() -> Result<SkillRegistry> {
    let mut registry = SkillRegistry::new();
    skillset::register_all(&mut registry)?;
    Ok(registry)
}

async fn open_runtime(cli: &Cli) -> Result<SkillRuntime> {
    let config = match &cli.config {
        Some(path) => RuntimeConfig::load(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => RuntimeConfig::default(),
    };
    let store = FileStore::open(&cli.store)
        .await
        .with_context(|| format!("failed to open store {}", cli.store.display()))?;
    tracing::debug!("Using store at {}", cli.store.display());

    Ok(SkillRuntime::with_store(
        Arc::new(builtin_registry()?),
        config,
        Arc::new(store),
        Arc::new(NoopNotifier),
    ))
}

fn load_definition(path: &Path) -> Result<WorkflowDefinition> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    Ok(serde_json::from_str(&content)?)
}

fn parse_json(raw: Option<&str>) -> Result<Value> {
    match raw {
        Some(raw) => Ok(serde_json::from_str(raw).context("input is not valid JSON")?),
        None => Ok(json!({})),
    }
}

fn parse_run_id(raw: &str) -> Result<RunId> {
    raw.parse::<RunId>()
        .with_context(|| format!("'{}' is not a run id", raw))
}

async fn run_workflow(
    runtime: &SkillRuntime,
    file: &Path,
    input: Option<&str>,
    source: &str,
) -> Result<()> {
    println!("🚀 Loading workflow from: {}", file.display());

    let definition = load_definition(file)?;
    let payload = parse_json(input)?;
    if !payload.is_object() {
        return Err(anyhow!("Input must be a JSON object"));
    }
    let source: TriggerSource = source.parse().map_err(|e: String| anyhow!(e))?;

    println!("📋 Workflow: {}", definition.name);
    println!("   Trigger: {}", definition.trigger);
    println!("   Steps: {}", definition.steps.len());
    println!();

    let name = definition.name.clone();
    runtime.register_workflow(definition).await?;

    let listener = spawn_event_listener(runtime);
    let run = runtime.run_workflow(&name, source, payload).await;
    finish_listener(listener).await;

    print_summary(&run?)
}

async fn resume_run(
    runtime: &SkillRuntime,
    run_id: &str,
    file: &Path,
    approval: Option<&str>,
) -> Result<()> {
    let run_id = parse_run_id(run_id)?;
    let approval = approval
        .map(|raw| serde_json::from_str::<Value>(raw).context("approval is not valid JSON"))
        .transpose()?;

    runtime.register_workflow(load_definition(file)?).await?;
    println!("⏯️  Resuming run {}", run_id);

    let listener = spawn_event_listener(runtime);
    let run = runtime.resume(run_id, approval).await;
    finish_listener(listener).await;

    let run = run?;
    if run.id != run_id {
        println!("   Continued as new run {}", run.id);
    }
    print_summary(&run)
}

fn spawn_event_listener(runtime: &SkillRuntime) -> JoinHandle<()> {
    let mut events = runtime.subscribe_events();

    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                ExecutionEvent::RunStarted { run_id, workflow, .. } => {
                    println!("▶️  Run {} of {} started", run_id, workflow);
                }
                ExecutionEvent::StepStarted { step_key, skill_id, .. } => {
                    println!("  ⚡ Starting step: {} ({})", step_key, skill_id);
                }
                ExecutionEvent::StepCompleted { step_key, duration_ms, .. } => {
                    println!("  ✅ Step {} completed in {}ms", step_key, duration_ms);
                }
                ExecutionEvent::StepFailed {
                    step_key,
                    required,
                    error,
                    ..
                } => {
                    if required {
                        println!("  ❌ Step {} failed: {}", step_key, error);
                    } else {
                        println!("  ⚠️  Optional step {} failed: {}", step_key, error);
                    }
                }
                ExecutionEvent::AttemptFinished {
                    skill_id,
                    attempt,
                    error_kind,
                    will_retry: true,
                    ..
                } => {
                    let kind = error_kind.map(|k| k.to_string()).unwrap_or_default();
                    println!("     🔁 [{}] attempt {} failed ({}), retrying", skill_id, attempt, kind);
                }
                ExecutionEvent::AttemptFinished { .. } => {}
                ExecutionEvent::Skill { skill_id, event, .. } => match event {
                    SkillEvent::Info { message } => {
                        println!("     ℹ️  [{}] {}", skill_id, message);
                    }
                    SkillEvent::Warning { message } => {
                        println!("     ⚠️  [{}] {}", skill_id, message);
                    }
                    SkillEvent::Progress { percent, message } => {
                        if let Some(msg) = message {
                            println!("     📊 [{}] {}% - {}", skill_id, percent, msg);
                        } else {
                            println!("     📊 [{}] {}%", skill_id, percent);
                        }
                    }
                },
                ExecutionEvent::RunPaused { step_key, message, .. } => {
                    println!("⏸️  Paused at {}: {}", step_key, message);
                }
                ExecutionEvent::RunCompleted { duration_ms, .. } => {
                    println!("✨ Run completed successfully in {}ms", duration_ms);
                }
                ExecutionEvent::RunFailed { error, .. } => {
                    println!("💥 Run failed: {}", error);
                }
            }
        }
    })
}

async fn finish_listener(listener: JoinHandle<()>) {
    // Wait for events to finish printing
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    listener.abort();
}

fn print_summary(run: &WorkflowRun) -> Result<()> {
    println!();
    println!("📊 Run Summary:");
    println!("   Run ID: {}", run.id);
    println!("   Status: {}", run.status);
    println!("   Executions: {}", run.executions.len());
    if let Some(ms) = run.duration_ms() {
        println!("   Duration: {}ms", ms);
    }
    if let Some(error) = &run.error {
        println!(
            "   Failed at step {} ({}): {}",
            error.step_key, error.kind, error.message
        );
    }

    if run.status == RunStatus::Paused {
        println!();
        println!("Approve and continue with:");
        println!("  skillflow resume {} --file <workflow.json> --approval '{{}}'", run.id);
    }

    if run.context.len() > 1 {
        println!();
        println!("📤 Context:");
        println!("{}", serde_json::to_string_pretty(&run.context.to_value())?);
    }

    Ok(())
}

fn print_run_line(run: &WorkflowRun) {
    println!(
        "{} {} {} ({}) steps {} created {}",
        run_icon(run.status),
        run.id,
        run.workflow,
        run.status,
        run.steps.len(),
        run.created_at.format("%Y-%m-%d %H:%M:%S")
    );
}

fn run_icon(status: RunStatus) -> &'static str {
    match status {
        RunStatus::Pending => "🕓",
        RunStatus::Running => "⚡",
        RunStatus::Completed => "✅",
        RunStatus::Failed => "❌",
        RunStatus::Paused => "⏸️ ",
    }
}

fn status_icon(status: ExecutionStatus) -> &'static str {
    match status {
        ExecutionStatus::Pending | ExecutionStatus::Running => "⚡",
        ExecutionStatus::Succeeded => "✅",
        ExecutionStatus::Failed => "❌",
        ExecutionStatus::TimedOut => "⏱️ ",
        ExecutionStatus::Cancelled => "🛑",
    }
}

async fn print_stats(runtime: &SkillRuntime) -> Result<()> {
    println!("📈 Skills:");
    for stats in runtime.skill_stats(&ExecutionQuery::default()).await? {
        println!(
            "  • {}: {} invocations, {} attempts, {:.0}% success, avg {:.0}ms, {} units",
            stats.skill_id,
            stats.invocations,
            stats.attempts,
            stats.success_rate * 100.0,
            stats.avg_duration_ms,
            stats.usage_units
        );
    }

    println!();
    println!("📈 Workflows:");
    for stats in runtime.workflow_stats(&RunFilter::default()).await? {
        println!(
            "  • {}: {} runs ({} completed, {} failed, {} paused, {} in progress), {:.0}% success, avg {:.0}ms",
            stats.workflow,
            stats.runs,
            stats.completed,
            stats.failed,
            stats.paused,
            stats.in_progress,
            stats.success_rate * 100.0,
            stats.avg_duration_ms
        );
    }
    Ok(())
}

fn validate_workflow(file: &Path) -> Result<()> {
    println!("🔍 Validating workflow: {}", file.display());

    let definition = load_definition(file)?;
    let registry = builtin_registry()?;
    validate_definition(&definition, &registry)?;

    println!("✅ Workflow is valid:");
    println!("   Name: {}", definition.name);
    println!("   Trigger: {}", definition.trigger);
    println!("   Steps: {}", definition.steps.len());

    println!();
    println!("🧭 Stages:");
    for (i, stage) in definition.stages().iter().enumerate() {
        let keys: Vec<&str> = stage.steps().iter().map(|(_, s)| s.key.as_str()).collect();
        match stage.group() {
            Some(group) => println!("   {}. [{}] {}", i + 1, group, keys.join(", ")),
            None => println!("   {}. {}", i + 1, keys.join(", ")),
        }
    }

    let graph = DependencyGraph::build(&definition);
    println!();
    println!("🔗 Dependencies:");
    for key in graph.execution_order()? {
        let deps = graph.dependencies_of(key);
        if deps.is_empty() {
            println!("   {}", key);
        } else {
            println!("   {} <- {}", key, deps.join(", "));
        }
    }

    Ok(())
}

fn list_skills(category: Option<&str>) -> Result<()> {
    println!("📦 Available Skills:");
    println!();

    let registry = builtin_registry()?;
    let mut filter = SkillFilter::default();
    if let Some(category) = category {
        filter = filter.category(category);
    }

    for descriptor in registry.list(&filter) {
        println!("  • {} ({})", descriptor.id, descriptor.category);
        if !descriptor.description.is_empty() {
            println!("    {}", descriptor.description);
        }
        println!(
            "    timeout {}ms, {} retries{}",
            descriptor.timeout.as_millis(),
            descriptor.retry.max_retries,
            if descriptor.idempotent { ", idempotent" } else { "" }
        );
    }
    Ok(())
}

fn create_example_workflow(output: &Path) -> Result<()> {
    let registry = builtin_registry()?;

    let workflow = WorkflowComposer::new(&registry, "listing-media", "listing.created")
        .description("Prepares media for a new listing and waits for approval before publishing")
        .add_step(
            "debug.echo",
            StepOptions::new().key("listing").input(InputMapper::Trigger),
        )
        .add_step(
            "time.delay",
            StepOptions::new().key("photos").group("media").input(
                InputMapper::fields()
                    .constant("delay_ms", 200)
                    .bind("value", "listing.listing_id"),
            ),
        )
        .add_step(
            "http.request",
            StepOptions::new()
                .key("details")
                .group("media")
                .optional()
                .input(InputMapper::fields().bind("url", "listing.url")),
        )
        .add_pause("review", "Approve the listing media before publishing")
        .add_step(
            "transform.json_stringify",
            StepOptions::new().key("summary").input(
                InputMapper::fields()
                    .bind("value", "photos")
                    .constant("pretty", true),
            ),
        )
        .build()?;

    let json = serde_json::to_string_pretty(&workflow)?;
    std::fs::write(output, json)?;

    println!("✨ Created example workflow: {}", output.display());
    println!();
    println!("Run it with:");
    println!(
        "  skillflow run --file {} --input '{{\"listing_id\": \"L-42\", \"url\": \"https://api.github.com/zen\"}}'",
        output.display()
    );

    Ok(())
}
