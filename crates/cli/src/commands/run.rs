//! `coact run`: run the agent on one task.

use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, bail};
use clap::Args;
use coact_agent::{Engine, ExecutionContext};
use coact_config::{AppConfig, BackendKind};
use coact_core::event::{EventBus, RunEvent};
use coact_core::{Backend, CategoryRegistry};

use crate::report;

#[derive(Args)]
pub struct RunArgs {
    /// The task to solve ("-" reads it from stdin)
    pub task: String,

    /// Turn budget (defaults to engine.max_turns)
    #[arg(long)]
    pub max_turns: Option<u32>,

    /// Backend: openai or claude-cli
    #[arg(long)]
    pub backend: Option<BackendKind>,

    /// Model name
    #[arg(long)]
    pub model: Option<String>,

    /// Write a markdown report here
    #[arg(long)]
    pub report: Option<PathBuf>,

    /// Write the full trace as JSON here
    #[arg(long)]
    pub json: Option<PathBuf>,

    /// Ask for an up-front plan before the first turn
    #[arg(long)]
    pub plan: bool,
}

pub async fn run(args: RunArgs) -> anyhow::Result<()> {
    let mut config = AppConfig::load().context("Failed to load config")?;
    if let Some(backend) = args.backend {
        config.backend = backend;
    }
    if let Some(model) = args.model {
        config.model = Some(model);
    }
    let max_turns = args.max_turns.unwrap_or(config.engine.max_turns);

    let task = read_task(&args.task)?;
    let (registry, backend) = build_components(&config)?;
    let planning = args.plan || config.engine.planning;

    let bus = Arc::new(EventBus::default());
    let progress = tokio::spawn(print_progress(bus.subscribe()));

    let engine = Engine::new(registry)
        .with_tools(coact_tools::default_registry())
        .with_done_category(config.engine.done_category.clone())
        .with_repetition_threshold(config.engine.repetition_threshold)
        .with_planning(planning)
        .with_event_bus(bus.clone());

    eprintln!(
        "  Backend: {} ({})  Max turns: {max_turns}",
        backend.name(),
        config.effective_model()
    );

    let outcome = engine.run(task, backend.as_ref(), max_turns).await;

    drop(engine);
    drop(bus);
    let _ = progress.await;

    let (ctx, failure) = match outcome {
        Ok(ctx) => (ctx, None),
        Err(e) => {
            let message = e.to_string();
            (e.into_partial(), Some(message))
        }
    };

    print_summary(&ctx);
    write_outputs(&ctx, args.report.as_deref(), args.json.as_deref())?;

    if let Some(message) = failure {
        bail!("{message}");
    }
    Ok(())
}

/// Category catalog and backend for a loaded config.
fn build_components(
    config: &AppConfig,
) -> coact_core::Result<(Arc<CategoryRegistry>, Box<dyn Backend>)> {
    let registry = Arc::new(config.category_registry()?);
    let backend = coact_providers::build_from_config(config)?;
    Ok((registry, backend))
}

fn read_task(arg: &str) -> anyhow::Result<String> {
    let task = if arg == "-" {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("Failed to read task from stdin")?;
        buf
    } else {
        arg.to_string()
    };

    let task = task.trim().to_string();
    if task.is_empty() {
        bail!("task must not be empty");
    }
    Ok(task)
}

/// Live one-line-per-turn progress on stderr.
async fn print_progress(mut rx: tokio::sync::broadcast::Receiver<Arc<RunEvent>>) {
    loop {
        match rx.recv().await {
            Ok(event) => match event.as_ref() {
                RunEvent::PlanGenerated { steps, .. } => {
                    eprintln!("  plan: {steps} step(s)");
                }
                RunEvent::TurnCompleted {
                    turn,
                    category,
                    followed,
                    ..
                } => {
                    let mark = if *followed { "✓" } else { "·" };
                    eprintln!("  turn {turn:>2} {mark} [{category}]");
                }
                RunEvent::ToolExecuted {
                    tool_name, success, ..
                } => {
                    let status = if *success { "ok" } else { "failed" };
                    eprintln!("          ↳ {tool_name}: {status}");
                }
                _ => {}
            },
            Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
            Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
        }
    }
}

fn print_summary(ctx: &ExecutionContext) {
    println!();
    println!("  Steps:      {}", ctx.len());
    if let Some(reason) = ctx.stop_reason() {
        println!("  Stopped:    {reason}");
    }
    println!("  Adherence:  {:.0}%", ctx.adherence_rate() * 100.0);
    if !ctx.plan().is_empty() {
        println!(
            "  Plan:       {} step(s), {:.0}% matched",
            ctx.plan().len(),
            ctx.plan_adherence_rate() * 100.0
        );
    }

    let counts: Vec<String> = ctx
        .category_counts()
        .into_iter()
        .map(|(category, n)| format!("{category}={n}"))
        .collect();
    println!("  Categories: {}", counts.join(", "));

    let total = ctx.total_cost();
    println!(
        "  Tokens:     {} in / {} out  (${:.4})",
        total.tokens_in, total.tokens_out, total.cost_usd
    );
    println!();

    for step in ctx.steps() {
        let tools: Vec<&str> = step.tool_calls.iter().map(|c| c.name.as_str()).collect();
        let tools = if tools.is_empty() {
            String::new()
        } else {
            format!(" → {}", tools.join(", "))
        };
        let rec = if step.had_recommendation() {
            format!(
                " (rec: {}, followed: {})",
                step.recommended.join("/"),
                step.followed
            )
        } else {
            String::new()
        };
        println!("  Turn {:>2}: [{}]{tools}{rec}", step.turn, step.category);
    }

    if let Some(last) = ctx.steps().last()
        && !last.content.is_empty()
    {
        println!();
        println!("{}", last.content);
    }
}

fn write_outputs(
    ctx: &ExecutionContext,
    report_path: Option<&std::path::Path>,
    json_path: Option<&std::path::Path>,
) -> anyhow::Result<()> {
    if let Some(path) = report_path {
        std::fs::write(path, report::render(ctx))
            .with_context(|| format!("Failed to write report to {}", path.display()))?;
        eprintln!("  Report written to {}", path.display());
    }
    if let Some(path) = json_path {
        let json = serde_json::to_string_pretty(ctx)?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write trace to {}", path.display()))?;
        eprintln!("  Trace written to {}", path.display());
    }
    Ok(())
}
