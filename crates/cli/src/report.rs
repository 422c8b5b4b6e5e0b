//! Markdown run report.

use std::collections::BTreeSet;
use std::fmt::Write;

use coact_agent::{ExecutionContext, ToolOutcome};

/// Longest content excerpt shown per step.
const EXCERPT_CHARS: usize = 200;

/// Render a run as a markdown document: step trace, category distribution,
/// transition matrix, adherence, and cost per category.
pub fn render(ctx: &ExecutionContext) -> String {
    let mut out = String::new();
    // Writing to a String cannot fail.
    let _ = write_report(&mut out, ctx);
    out
}

fn write_report(out: &mut String, ctx: &ExecutionContext) -> std::fmt::Result {
    writeln!(out, "# Run Trace")?;
    writeln!(out)?;
    writeln!(out, "**Task**: {}", ctx.task())?;
    writeln!(out, "**Run**: `{}`", ctx.run_id())?;
    writeln!(out, "**Steps**: {}", ctx.len())?;
    if let Some(reason) = ctx.stop_reason() {
        writeln!(out, "**Stopped**: {reason}")?;
    }
    writeln!(out)?;

    write_steps(out, ctx)?;
    write_distribution(out, ctx)?;
    write_transitions(out, ctx)?;

    writeln!(out, "## Adherence")?;
    writeln!(out)?;
    writeln!(
        out,
        "**{:.0}%** of steps with a recommendation followed it.",
        ctx.adherence_rate() * 100.0
    )?;
    writeln!(out)?;

    write_plan(out, ctx)?;
    write_costs(out, ctx)
}

fn write_steps(out: &mut String, ctx: &ExecutionContext) -> std::fmt::Result {
    writeln!(out, "## Steps")?;
    writeln!(out)?;
    for step in ctx.steps() {
        writeln!(out, "### Turn {}: [{}]", step.turn, step.category)?;
        writeln!(out)?;
        if !step.thinking.is_empty() {
            writeln!(out, "**Thinking**: {}", step.thinking)?;
            writeln!(out)?;
        }
        writeln!(out, "**Content**: {}", excerpt(&step.content))?;
        writeln!(out)?;
        for call in &step.tool_calls {
            let (label, text) = match &call.outcome {
                ToolOutcome::Ok { output } => ("Result", output),
                ToolOutcome::Error { message } => ("Error", message),
            };
            writeln!(out, "**Tool**: `{}({})` → {label}: `{text}`", call.name, call.arguments)?;
        }
        if !step.tool_calls.is_empty() {
            writeln!(out)?;
        }
        if let Some(planned) = &step.planned {
            writeln!(out, "**Planned**: {planned}")?;
            writeln!(out)?;
        }
        if step.had_recommendation() {
            writeln!(
                out,
                "**Recommended**: {} | **Followed**: {}",
                step.recommended.join(", "),
                if step.followed { "yes" } else { "no" }
            )?;
            writeln!(out)?;
        }
        writeln!(out, "---")?;
        writeln!(out)?;
    }
    Ok(())
}

fn write_distribution(out: &mut String, ctx: &ExecutionContext) -> std::fmt::Result {
    writeln!(out, "## Category Distribution")?;
    writeln!(out)?;
    writeln!(out, "| Category | Count |")?;
    writeln!(out, "|---|---|")?;
    for (category, count) in ctx.category_counts() {
        writeln!(out, "| {category} | {count} |")?;
    }
    writeln!(out)
}

fn write_transitions(out: &mut String, ctx: &ExecutionContext) -> std::fmt::Result {
    writeln!(out, "## Transition Matrix")?;
    writeln!(out)?;
    let matrix = ctx.transition_matrix();
    if matrix.is_empty() {
        writeln!(out, "No transitions recorded.")?;
        return writeln!(out);
    }

    let names: BTreeSet<&str> = matrix
        .iter()
        .flat_map(|(from, row)| std::iter::once(from.as_str()).chain(row.keys().map(String::as_str)))
        .collect();

    write!(out, "| From \\ To |")?;
    for name in &names {
        write!(out, " {name} |")?;
    }
    writeln!(out)?;
    writeln!(out, "|---|{}", "---|".repeat(names.len()))?;

    for from in &names {
        write!(out, "| {from} |")?;
        for to in &names {
            match matrix.get(*from).and_then(|row| row.get(*to)) {
                Some(count) => write!(out, " {count} |")?,
                None => write!(out, " - |")?,
            }
        }
        writeln!(out)?;
    }
    writeln!(out)
}

fn write_plan(out: &mut String, ctx: &ExecutionContext) -> std::fmt::Result {
    if ctx.plan().is_empty() {
        return Ok(());
    }
    writeln!(out, "## Plan")?;
    writeln!(out)?;
    for (i, entry) in ctx.plan().iter().enumerate() {
        if entry.description.is_empty() {
            writeln!(out, "{}. [{}]", i + 1, entry.category)?;
        } else {
            writeln!(out, "{}. [{}] {}", i + 1, entry.category, entry.description)?;
        }
    }
    writeln!(out)?;
    writeln!(
        out,
        "**Plan adherence**: {:.0}% of steps matched their planned category.",
        ctx.plan_adherence_rate() * 100.0
    )?;
    writeln!(out)
}

fn write_costs(out: &mut String, ctx: &ExecutionContext) -> std::fmt::Result {
    writeln!(out, "## Cost per Category")?;
    writeln!(out)?;
    writeln!(out, "| Category | Steps | Tokens in | Tokens out | Cost (USD) | Duration (ms) |")?;
    writeln!(out, "|---|---|---|---|---|---|")?;
    for (category, stats) in ctx.cost_stats() {
        writeln!(
            out,
            "| {category} | {} | {} | {} | ${:.4} | {} |",
            stats.steps, stats.tokens_in, stats.tokens_out, stats.cost_usd, stats.duration_ms
        )?;
    }
    let total = ctx.total_cost();
    writeln!(
        out,
        "| **Total** | **{}** | **{}** | **{}** | **${:.4}** | **{}** |",
        total.steps, total.tokens_in, total.tokens_out, total.cost_usd, total.duration_ms
    )
}

fn excerpt(text: &str) -> String {
    let mut short: String = text.chars().take(EXCERPT_CHARS).collect();
    if text.chars().count() > EXCERPT_CHARS {
        short.push_str("...");
    }
    short
}
