//! Command handlers for CLI operations
//!
//! - run: research a question, streaming each new message
//! - history: show the last N runs
//! - replay: show every cycle of a run
//! - secret: manage API keys
//! - doctor: validate configuration and secret availability

use anyhow::{Context, Result};
use serde_json::json;
use std::io::{self, BufRead};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::agent::{
    CycleController, ResearchSettings, ResilientInvoker, RetryPolicy, RunEvent, RunOutcome,
    RunReport, ToolRunner,
};
use crate::cli::SecretAction;
use crate::config::Config;
use crate::db::{Database, RunRepository, RunStatus, RunSummary};
use crate::llm::openai::OpenAIProvider;
use crate::llm::{LLMProvider, Message, Role};
use crate::rate_limiter::RateLimiter;
use crate::secrets::{scrub, SecretCache, SecretManager, SecretSource};
use crate::tools::ToolRegistry;
use sdk::errors::{EngineError, RecapErrorExt};

/// Keychain service name
pub const SECRET_SERVICE: &str = "recap";

/// Capacity of the run event channel
const EVENT_BUFFER: usize = 64;

/// Output format for command results
#[derive(Debug, Clone, Copy)]
pub enum OutputFormat {
    /// Human-readable text output
    Text,
    /// JSON output for machine consumption
    Json,
}

/// Assemble a controller from configuration
///
/// The model provider, tool registry, optional rate limiter and retry policy
/// are all derived from `config`.
pub fn build_controller(
    config: &Config,
    secret_cache: Arc<SecretCache>,
) -> Result<CycleController, EngineError> {
    let provider: Arc<dyn LLMProvider> = Arc::new(OpenAIProvider::new(
        config.model.clone(),
        Arc::clone(&secret_cache),
    ));

    let registry = Arc::new(ToolRegistry::with_web_tools(
        &config.tools,
        &config.model,
        secret_cache,
    ));
    let schemas = registry.resolve(&config.model.tools)?;

    let mut invoker = ResilientInvoker::new(provider, RetryPolicy::from_config(&config.invoker))
        .with_tools(schemas)
        .with_call_timeout(Duration::from_secs(config.model.timeout_secs));
    if config.model.enable_qps_limit {
        invoker = invoker.with_rate_limiter(Arc::new(RateLimiter::new(config.invoker.qps_limit)));
    }

    Ok(CycleController::new(
        invoker,
        ToolRunner::new(registry),
        ResearchSettings::from_config(config),
    ))
}

/// Research a question
///
/// Streaming mode prints every new conversation message once, then the
/// output. Ctrl-C and `timeout_secs` cancel the run. Each completed cycle
/// and the final status are recorded in the run history.
pub async fn handle_run(
    question: String,
    non_streaming: bool,
    timeout_secs: Option<u64>,
    config: &Config,
    format: OutputFormat,
) -> Result<()> {
    let database = Database::new(&config.db_path())
        .await
        .context("Failed to open database")?;
    let runs = database.runs();

    let secret_manager = Arc::new(SecretManager::new(SECRET_SERVICE));
    let secret_cache = Arc::new(SecretCache::new(secret_manager));
    let controller = build_controller(config, secret_cache)?;

    let run_id = uuid::Uuid::new_v4().to_string();
    runs.create_run(&run_id, &question).await?;
    tracing::info!("Run {} started", run_id);

    let cancel = CancellationToken::new();
    let watchers = spawn_cancel_watchers(&cancel, timeout_secs);

    let (tx, rx) = mpsc::channel(EVENT_BUFFER);
    let printer = EventPrinter::new(!non_streaming, format);
    let started = Instant::now();

    let (report, ()) = tokio::join!(
        controller.run_streaming(&question, &cancel, Some(tx)),
        consume_events(rx, &runs, &run_id, printer),
    );

    for watcher in watchers {
        watcher.abort();
    }

    let duration_ms = started.elapsed().as_millis() as i64;
    let report = match report {
        Ok(report) => report,
        Err(e) => {
            let errors = vec![e.to_string()];
            let summary = RunSummary {
                status: RunStatus::Failed,
                provider_used: controller.provider_name(),
                output: None,
                errors: &errors,
                cycles: 0,
                duration_ms,
            };
            finish(&runs, &run_id, summary).await;
            database.close().await.ok();
            return Err(e.into());
        }
    };

    let status = if report.is_success() {
        RunStatus::Completed
    } else {
        RunStatus::Failed
    };
    let errors: Vec<String> = report.state.errors.iter().map(|e| scrub(e)).collect();
    let summary = RunSummary {
        status,
        provider_used: controller.provider_name(),
        output: report.output(),
        errors: &errors,
        cycles: report.state.cycles_completed(),
        duration_ms,
    };
    finish(&runs, &run_id, summary).await;
    database.close().await.ok();

    print_report(&run_id, &report, &errors, duration_ms, format)?;

    match report.outcome {
        RunOutcome::Completed => Ok(()),
        RunOutcome::Aborted(reason) => {
            Err(anyhow::anyhow!("{} ({})", reason, reason.user_hint()))
        }
    }
}

fn spawn_cancel_watchers(
    cancel: &CancellationToken,
    timeout_secs: Option<u64>,
) -> Vec<tokio::task::JoinHandle<()>> {
    let mut watchers = Vec::new();

    let token = cancel.clone();
    watchers.push(tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, cancelling run");
            token.cancel();
        }
    }));

    if let Some(secs) = timeout_secs {
        let token = cancel.clone();
        watchers.push(tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(secs)).await;
            tracing::warn!("Run timed out after {}s", secs);
            token.cancel();
        }));
    }

    watchers
}

async fn consume_events(
    mut rx: mpsc::Receiver<RunEvent>,
    runs: &RunRepository,
    run_id: &str,
    mut printer: EventPrinter,
) {
    while let Some(event) = rx.recv().await {
        for rollout in &event.patch.rollouts {
            if let Err(e) = runs.record_cycle(run_id, rollout).await {
                tracing::warn!("Failed to record cycle {}: {}", rollout.cycle, e);
            }
        }
        printer.print(&event);
    }
}

async fn finish(runs: &RunRepository, run_id: &str, summary: RunSummary<'_>) {
    if let Err(e) = runs.finish_run(run_id, summary).await {
        tracing::warn!("Failed to record run {}: {}", run_id, e);
    }
}

/// Prints each conversation message once as events arrive
struct EventPrinter {
    enabled: bool,
    format: OutputFormat,
    seen: Vec<Message>,
}

impl EventPrinter {
    fn new(enabled: bool, format: OutputFormat) -> Self {
        Self {
            enabled,
            format,
            seen: Vec::new(),
        }
    }

    fn print(&mut self, event: &RunEvent) {
        if !self.enabled {
            return;
        }
        for message in self.unseen(event) {
            match self.format {
                OutputFormat::Text => println!("{}", render_message(&message)),
                OutputFormat::Json => {
                    let line = json!({ "step": event.step, "cycle": event.cycle, "message": message });
                    println!("{}", line);
                }
            }
        }
    }

    /// Messages of the event's conversation not printed before
    fn unseen(&mut self, event: &RunEvent) -> Vec<Message> {
        let Some(messages) = &event.patch.messages else {
            return Vec::new();
        };
        let mut fresh = Vec::new();
        for message in messages {
            if !self.seen.contains(message) {
                self.seen.push(message.clone());
                fresh.push(message.clone());
            }
        }
        fresh
    }
}

/// Human-readable rendering of one message
pub fn render_message(message: &Message) -> String {
    let title = match message.role {
        Role::System => "System Message",
        Role::Human => "Human Message",
        Role::Assistant => "Ai Message",
        Role::Tool => "Tool Message",
    };
    let mut out = format!("{:=^80}\n", format!(" {} ", title));
    if let Some(name) = &message.tool_name {
        out.push_str(&format!("Name: {}\n\n", name));
    }
    out.push_str(&message.content);
    if !message.tool_calls.is_empty() {
        out.push_str("\nTool Calls:");
        for call in &message.tool_calls {
            out.push_str(&format!(
                "\n  {} ({})\n    Args: {}",
                call.name,
                call.id.as_deref().unwrap_or("-"),
                call.arguments
            ));
        }
    }
    out
}

fn print_report(
    run_id: &str,
    report: &RunReport,
    errors: &[String],
    duration_ms: i64,
    format: OutputFormat,
) -> Result<()> {
    match format {
        OutputFormat::Text => match report.output() {
            Some(output) if report.is_success() => {
                println!();
                println!("{}", output);
                println!();
                println!("✓ Run completed");
                println!("  Run ID: {}", run_id);
                println!("  Cycles: {}", report.state.cycles_completed());
                println!("  Steps: {}", report.steps);
                println!("  Duration: {}ms", duration_ms);
            }
            _ => {
                println!("✗ Run failed: {}", run_id);
                for error in errors {
                    println!("  {}", error);
                }
            }
        },
        OutputFormat::Json => {
            let output = json!({
                "status": if report.is_success() { "completed" } else { "failed" },
                "run_id": run_id,
                "output": report.output(),
                "cycles": report.state.cycles_completed(),
                "steps": report.steps,
                "errors": errors,
                "duration_ms": duration_ms
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }
    Ok(())
}

/// Show run history
pub async fn handle_history(limit: usize, config: &Config, format: OutputFormat) -> Result<()> {
    let database = Database::new(&config.db_path())
        .await
        .context("Failed to open database")?;

    let runs = database
        .runs()
        .recent_runs(limit as i64)
        .await
        .context("Failed to fetch run history")?;

    match format {
        OutputFormat::Text => {
            if runs.is_empty() {
                println!("No runs in history");
                return Ok(());
            }

            println!("Run History (last {} runs):", limit);
            println!();

            for run in runs {
                println!("Run ID: {}", run.id);
                println!("  Question: {}", run.question);
                println!("  Status: {:?}", run.status);
                println!("  Cycles: {}", run.cycles);

                if let Some(duration) = run.duration_ms {
                    println!("  Duration: {}ms", duration);
                }

                let created = chrono::DateTime::from_timestamp(run.created_at, 0)
                    .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
                    .unwrap_or_else(|| "Unknown".to_string());
                println!("  Created: {}", created);

                println!();
            }
        }
        OutputFormat::Json => {
            let output = json!({
                "runs": runs,
                "count": runs.len(),
                "limit": limit
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    Ok(())
}

/// Show every cycle of a past run
pub async fn handle_replay(run_id: String, config: &Config, format: OutputFormat) -> Result<()> {
    let database = Database::new(&config.db_path())
        .await
        .context("Failed to open database")?;
    let repo = database.runs();

    let run = repo
        .get_run(&run_id)
        .await
        .context("Failed to fetch run")?
        .ok_or_else(|| anyhow::anyhow!("Run not found: {}", run_id))?;

    let cycles = repo
        .get_cycles(&run_id)
        .await
        .context("Failed to fetch run cycles")?;

    match format {
        OutputFormat::Text => {
            println!("Run Replay: {}", run_id);
            println!();
            println!("Question: {}", run.question);
            println!("Status: {:?}", run.status);

            if let Some(duration) = run.duration_ms {
                println!("Duration: {}ms", duration);
            }

            println!();
            println!("Cycles ({} total):", cycles.len());

            for cycle in &cycles {
                println!();
                println!("--- Cycle {} ---", cycle.cycle);
                for message in &cycle.rollout.messages {
                    println!("{}", render_message(message));
                }
            }

            if !run.errors.is_empty() {
                println!();
                println!("Diagnostics:");
                for error in &run.errors {
                    println!("  {}", error);
                }
            }

            if let Some(output) = &run.output {
                println!();
                println!("Output:");
                println!("{}", output);
            }
        }
        OutputFormat::Json => {
            let output = json!({
                "run": run,
                "cycles": cycles,
                "cycle_count": cycles.len()
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    Ok(())
}

/// Manage secrets in the OS keychain
pub async fn handle_secret(action: SecretAction, format: OutputFormat) -> Result<()> {
    let manager = SecretManager::new(SECRET_SERVICE);

    let (name, result) = match action {
        SecretAction::Set { name, value } => {
            let value = match value {
                Some(value) => value,
                None => {
                    eprintln!("Enter value for '{}':", name);
                    let mut line = String::new();
                    io::stdin()
                        .lock()
                        .read_line(&mut line)
                        .context("Failed to read secret from stdin")?;
                    line.trim().to_string()
                }
            };
            manager.set_secret(&name, &value)?;
            (name, "stored")
        }
        SecretAction::Delete { name } => {
            manager.delete_secret(&name)?;
            (name, "deleted")
        }
        SecretAction::Status { name } => {
            let source = manager.source_of(&name);
            match format {
                OutputFormat::Text => println!("{}: {}", name, source),
                OutputFormat::Json => println!(
                    "{}",
                    json!({ "name": name, "source": source.to_string() })
                ),
            }
            return Ok(());
        }
    };

    match format {
        OutputFormat::Text => println!("✓ Secret '{}' {}", name, result),
        OutputFormat::Json => println!("{}", json!({ "name": name, "result": result })),
    }
    Ok(())
}

/// Run system diagnostics
///
/// Validates the data directory and database, and checks that every secret
/// the configured tools and model need is resolvable.
pub async fn handle_doctor(config: &Config, format: OutputFormat) -> Result<()> {
    let mut issues = Vec::new();
    let mut checks: Vec<(String, String)> = Vec::new();

    // Config is validated when loaded
    checks.push(("Configuration".to_string(), "Valid".to_string()));
    checks.push(("Model".to_string(), config.model.model_name.clone()));

    if config.core.data_dir.exists() {
        checks.push(("Data directory".to_string(), "Exists".to_string()));
    } else {
        checks.push(("Data directory".to_string(), "Missing".to_string()));
        issues.push(format!(
            "Data directory does not exist: {:?}",
            config.core.data_dir
        ));
    }

    match Database::new(&config.db_path()).await {
        Ok(db) => {
            checks.push(("Database connection".to_string(), "OK".to_string()));
            db.close().await.ok();
        }
        Err(e) => {
            checks.push(("Database connection".to_string(), "Failed".to_string()));
            issues.push(format!("Cannot open database: {}", e));
        }
    }

    let manager = SecretManager::new(SECRET_SERVICE);
    for name in required_secrets(config) {
        let source = manager.source_of(&name);
        if source == SecretSource::Missing {
            issues.push(format!(
                "Secret '{}' not found. Set {} or run 'recap secret set {}'.",
                name,
                crate::secrets::env_var_name(&name),
                name
            ));
        }
        checks.push((format!("Secret {}", name), source.to_string()));
    }

    match format {
        OutputFormat::Text => {
            println!("Recap System Diagnostics");
            println!("============================");
            println!();

            println!("System Checks:");
            for (check, status) in &checks {
                println!("  {:<30} {}", format!("{}:", check), status);
            }

            println!();

            if issues.is_empty() {
                println!("✓ All checks passed!");
            } else {
                println!("⚠ Issues found:");
                println!();
                for (i, issue) in issues.iter().enumerate() {
                    println!("  {}. {}", i + 1, issue);
                }
            }
        }
        OutputFormat::Json => {
            let output = json!({
                "checks": checks.iter().map(|(name, status)| {
                    json!({
                        "name": name,
                        "status": status
                    })
                }).collect::<Vec<_>>(),
                "issues": issues,
                "healthy": issues.is_empty()
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    Ok(())
}

/// Secret names a run with this configuration will look up
pub fn required_secrets(config: &Config) -> Vec<String> {
    let mut names = vec![config.model.api_key_name.clone()];

    if config.tools.server_url.is_none() {
        let uses = |tool: &str| config.model.tools.iter().any(|t| t == tool);
        if uses("search") {
            names.push(config.tools.serper_api_key_name.clone());
        }
        if uses("visit") {
            names.push(config.tools.jina_api_key_name.clone());
            if let Some(key) = &config.tools.summarizer.api_key_name {
                names.push(key.clone());
            }
        }
    }

    let mut unique = Vec::new();
    for name in names {
        if !unique.contains(&name) {
            unique.push(name);
        }
    }
    unique
}
