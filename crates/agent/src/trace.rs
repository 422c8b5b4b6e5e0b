//! Execution trace: one [`TraceStep`] per turn, accumulated in an
//! [`ExecutionContext`], plus analytics derived from it.
//!
//! Analytics are recomputed from the step slice on every call. Nothing
//! derived is cached, so the numbers can never drift from the trace.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use coact_core::backend::PlannedStep;
use coact_telemetry::{CostStats, CostTracker, TurnCost};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Result of one tool invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ToolOutcome {
    Ok { output: String },
    Error { message: String },
}

impl ToolOutcome {
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok { .. })
    }

    /// The output on success, the error message on failure.
    pub fn text(&self) -> &str {
        match self {
            Self::Ok { output } => output,
            Self::Error { message } => message,
        }
    }
}

/// A tool invocation as recorded in the trace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocation {
    pub call_id: String,
    pub name: String,
    #[serde(default)]
    pub arguments: serde_json::Value,
    pub outcome: ToolOutcome,
    #[serde(default)]
    pub duration_ms: u64,
}

/// The record of a single turn.
///
/// `followed` is derived from `category` and `recommended`, both when built
/// and when loaded; a stored value is ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "StoredStep")]
pub struct TraceStep {
    /// Zero-based turn index.
    pub turn: u32,
    /// Self-declared category. May be anything.
    pub category: String,
    #[serde(default)]
    pub thinking: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub tool_calls: Vec<ToolInvocation>,
    /// Suggestions offered before this turn. Empty on the first turn and
    /// after any turn whose category had no registered suggestions.
    #[serde(default)]
    pub recommended: Vec<String>,
    /// `category ∈ recommended`. Always false when nothing was recommended.
    pub followed: bool,
    /// What the plan expected at this position, when the run was planned.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub planned: Option<String>,
    #[serde(default)]
    pub cost: TurnCost,
    pub recorded_at: DateTime<Utc>,
}

/// The serialized form of a [`TraceStep`], without the derived flag.
#[derive(Deserialize)]
struct StoredStep {
    turn: u32,
    category: String,
    #[serde(default)]
    thinking: String,
    #[serde(default)]
    content: String,
    #[serde(default)]
    tool_calls: Vec<ToolInvocation>,
    #[serde(default)]
    recommended: Vec<String>,
    #[serde(default)]
    planned: Option<String>,
    #[serde(default)]
    cost: TurnCost,
    recorded_at: DateTime<Utc>,
}

impl From<StoredStep> for TraceStep {
    fn from(stored: StoredStep) -> Self {
        let mut step = TraceStep::new(stored.turn, stored.category, stored.recommended)
            .with_thinking(stored.thinking)
            .with_content(stored.content)
            .with_tool_calls(stored.tool_calls)
            .with_planned(stored.planned)
            .with_cost(stored.cost);
        step.recorded_at = stored.recorded_at;
        step
    }
}

impl TraceStep {
    pub fn new(turn: u32, category: impl Into<String>, recommended: Vec<String>) -> Self {
        let category = category.into();
        let followed = recommended.iter().any(|r| *r == category);
        Self {
            turn,
            category,
            thinking: String::new(),
            content: String::new(),
            tool_calls: Vec::new(),
            recommended,
            followed,
            planned: None,
            cost: TurnCost::default(),
            recorded_at: Utc::now(),
        }
    }

    pub fn with_thinking(mut self, thinking: impl Into<String>) -> Self {
        self.thinking = thinking.into();
        self
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = content.into();
        self
    }

    pub fn with_tool_calls(mut self, tool_calls: Vec<ToolInvocation>) -> Self {
        self.tool_calls = tool_calls;
        self
    }

    pub fn with_cost(mut self, cost: TurnCost) -> Self {
        self.cost = cost;
        self
    }

    pub fn with_planned(mut self, planned: Option<String>) -> Self {
        self.planned = planned;
        self
    }

    /// Whether the category matches what the plan expected here.
    pub fn matched_plan(&self) -> bool {
        self.planned.as_deref() == Some(self.category.as_str())
    }

    /// Whether this step counts toward the adherence denominator.
    pub fn had_recommendation(&self) -> bool {
        !self.recommended.is_empty()
    }
}

/// Why a run stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// The agent set its completion flag.
    Completed,
    /// The agent declared the done category.
    DoneCategory,
    /// `max_turns` turns were taken.
    TurnBudgetExhausted,
    /// The backend failed; the trace is partial.
    BackendFailed,
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Completed => write!(f, "completed"),
            Self::DoneCategory => write!(f, "done_category"),
            Self::TurnBudgetExhausted => write!(f, "turn_budget_exhausted"),
            Self::BackendFailed => write!(f, "backend_failed"),
        }
    }
}

/// The full state of one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionContext {
    run_id: String,
    task: String,
    steps: Vec<TraceStep>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    plan: Vec<PlannedStep>,
    /// Usage of the plan request, kept apart from per-category cost.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    plan_cost: Option<TurnCost>,
    stop_reason: Option<StopReason>,
    started_at: DateTime<Utc>,
    finished_at: Option<DateTime<Utc>>,
}

impl ExecutionContext {
    /// A fresh, running context with no steps.
    pub fn new(task: impl Into<String>) -> Self {
        Self {
            run_id: Uuid::new_v4().to_string(),
            task: task.into(),
            steps: Vec::new(),
            plan: Vec::new(),
            plan_cost: None,
            stop_reason: None,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    /// Rebuild a finished context from recorded steps (e.g. a stored trace).
    pub fn from_steps(task: impl Into<String>, steps: Vec<TraceStep>, reason: StopReason) -> Self {
        let mut ctx = Self::new(task);
        ctx.steps = steps;
        ctx.finish(reason);
        ctx
    }

    /// Attach the plan a stored trace was run with. Each step's `planned`
    /// is set from the entry at its position.
    pub fn with_plan(mut self, plan: Vec<PlannedStep>) -> Self {
        for (i, step) in self.steps.iter_mut().enumerate() {
            step.planned = plan.get(i).map(|p| p.category.clone());
        }
        self.plan = plan;
        self
    }

    pub(crate) fn set_plan(&mut self, plan: Vec<PlannedStep>, cost: TurnCost) {
        self.plan = plan;
        self.plan_cost = Some(cost);
    }

    pub(crate) fn push(&mut self, step: TraceStep) {
        debug_assert!(!self.is_terminal(), "step appended to a finished run");
        self.steps.push(step);
    }

    /// Mark the run terminal. The first reason wins.
    pub(crate) fn finish(&mut self, reason: StopReason) {
        if self.stop_reason.is_none() {
            self.stop_reason = Some(reason);
            self.finished_at = Some(Utc::now());
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn task(&self) -> &str {
        &self.task
    }

    pub fn steps(&self) -> &[TraceStep] {
        &self.steps
    }

    /// The up-front plan; empty when the run was not planned.
    pub fn plan(&self) -> &[PlannedStep] {
        &self.plan
    }

    pub fn plan_cost(&self) -> Option<&TurnCost> {
        self.plan_cost.as_ref()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn is_terminal(&self) -> bool {
        self.stop_reason.is_some()
    }

    pub fn stop_reason(&self) -> Option<StopReason> {
        self.stop_reason
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.finished_at
    }

    /// Index of the last recorded turn.
    pub fn last_turn(&self) -> Option<u32> {
        self.steps.last().map(|s| s.turn)
    }

    pub fn last_category(&self) -> Option<&str> {
        self.steps.last().map(|s| s.category.as_str())
    }

    // ── Analytics ─────────────────────────────────────────────────────

    /// Occurrences of each category. Values sum to `len()`.
    pub fn category_counts(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for step in &self.steps {
            *counts.entry(step.category.clone()).or_insert(0) += 1;
        }
        counts
    }

    /// `from → to → count` over every consecutive pair of steps.
    /// Entries sum to `len() - 1` (zero for fewer than two steps).
    pub fn transition_matrix(&self) -> BTreeMap<String, BTreeMap<String, usize>> {
        let mut matrix: BTreeMap<String, BTreeMap<String, usize>> = BTreeMap::new();
        for pair in self.steps.windows(2) {
            *matrix
                .entry(pair[0].category.clone())
                .or_default()
                .entry(pair[1].category.clone())
                .or_insert(0) += 1;
        }
        matrix
    }

    /// Followed steps over steps that had a recommendation; 0 when none did.
    pub fn adherence_rate(&self) -> f64 {
        let (followed, eligible) = self
            .steps
            .iter()
            .filter(|s| s.had_recommendation())
            .fold((0usize, 0usize), |(f, e), s| (f + usize::from(s.followed), e + 1));
        if eligible == 0 {
            0.0
        } else {
            followed as f64 / eligible as f64
        }
    }

    /// Steps whose category matched the plan entry at their position, over
    /// all steps. 0 without a plan or without steps.
    pub fn plan_adherence_rate(&self) -> f64 {
        if self.plan.is_empty() || self.steps.is_empty() {
            return 0.0;
        }
        let matched = self.steps.iter().filter(|s| s.matched_plan()).count();
        matched as f64 / self.steps.len() as f64
    }

    /// Cost aggregated per category.
    pub fn cost_stats(&self) -> BTreeMap<String, CostStats> {
        self.cost_tracker().into_stats()
    }

    /// Cost aggregated over the whole run.
    pub fn total_cost(&self) -> CostStats {
        self.cost_tracker().total()
    }

    fn cost_tracker(&self) -> CostTracker {
        self.steps
            .iter()
            .map(|s| (s.category.as_str(), &s.cost))
            .collect()
    }
}
