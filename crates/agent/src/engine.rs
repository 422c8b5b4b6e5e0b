//! The turn loop.
//!
//! Per turn: recommend from the last category, send the turn to the backend,
//! run every requested tool, record a [`TraceStep`], and decide whether to
//! continue. The loop is a two-state machine (running, done) over turns;
//! categories are data, never states.
//!
//! With planning enabled, one plan request precedes the first turn. The plan
//! is shown to the agent turn by turn and scored afterwards; it never
//! replaces the recommendations.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use coact_core::backend::{Backend, RequestedToolCall, TurnRequest, TurnUsage};
use coact_core::category::CategoryRegistry;
use coact_core::error::{BackendError, ToolError};
use coact_core::event::{EventBus, RunEvent};
use coact_core::tool::{Tool, ToolCall, ToolRegistry};
use coact_telemetry::TurnCost;
use futures::future::join_all;
use tracing::{debug, error, info, warn};

use crate::advisor;
use crate::trace::{ExecutionContext, StopReason, ToolInvocation, ToolOutcome, TraceStep};

/// Category that ends a run when the agent declares it.
pub const DEFAULT_DONE_CATEGORY: &str = "done";

/// Consecutive same-category turns before the repetition note is added.
pub const DEFAULT_REPETITION_THRESHOLD: usize = 3;

/// Run-level failure. Only backend failures abort a run.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Backend failed ({}): {source}", describe_last_turn(.last_turn))]
    Backend {
        source: BackendError,
        /// Last turn recorded before the failure, if any.
        last_turn: Option<u32>,
        /// Everything recorded up to the failure.
        partial: Box<ExecutionContext>,
    },
}

fn describe_last_turn(last_turn: &Option<u32>) -> String {
    match last_turn {
        Some(turn) => format!("last completed turn {turn}"),
        None => "no turns completed".to_string(),
    }
}

impl EngineError {
    pub fn last_turn(&self) -> Option<u32> {
        match self {
            Self::Backend { last_turn, .. } => *last_turn,
        }
    }

    pub fn partial(&self) -> &ExecutionContext {
        match self {
            Self::Backend { partial, .. } => partial,
        }
    }

    pub fn into_partial(self) -> ExecutionContext {
        match self {
            Self::Backend { partial, .. } => *partial,
        }
    }
}

/// Drives runs against a backend.
///
/// `run` takes `&self`: the category and tool registries are read-only
/// during runs, so one engine can serve several runs concurrently.
pub struct Engine {
    /// Known categories
    categories: Arc<CategoryRegistry>,

    /// Every tool, always available
    tools: ToolRegistry,

    /// Declaring this category ends the run
    done_category: String,

    /// Repetition note threshold (0 disables)
    repetition_threshold: usize,

    /// Ask for a plan before the first turn
    planning: bool,

    /// Optional sink for run events
    event_bus: Option<Arc<EventBus>>,
}

impl Engine {
    pub fn new(categories: Arc<CategoryRegistry>) -> Self {
        Self {
            categories,
            tools: ToolRegistry::new(),
            done_category: DEFAULT_DONE_CATEGORY.to_string(),
            repetition_threshold: DEFAULT_REPETITION_THRESHOLD,
            planning: false,
            event_bus: None,
        }
    }

    /// Replace the tool registry.
    pub fn with_tools(mut self, tools: ToolRegistry) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_done_category(mut self, name: impl Into<String>) -> Self {
        self.done_category = name.into();
        self
    }

    pub fn with_repetition_threshold(mut self, threshold: usize) -> Self {
        self.repetition_threshold = threshold;
        self
    }

    /// Request an up-front plan before the first turn. Off by default.
    pub fn with_planning(mut self, planning: bool) -> Self {
        self.planning = planning;
        self
    }

    pub fn with_event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(bus);
        self
    }

    /// Register a plain callable as a tool.
    pub fn register_tool<F>(&mut self, name: impl Into<String>, description: impl Into<String>, func: F)
    where
        F: Fn(&serde_json::Map<String, serde_json::Value>) -> Result<String, ToolError>
            + Send
            + Sync
            + 'static,
    {
        self.tools.register_fn(name, description, func);
    }

    /// Register a tool implementation.
    pub fn register(&mut self, tool: Box<dyn Tool>) {
        self.tools.register(tool);
    }

    pub fn categories(&self) -> &CategoryRegistry {
        &self.categories
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    pub fn done_category(&self) -> &str {
        &self.done_category
    }

    /// Execute one run of at most `max_turns` turns.
    ///
    /// Tool failures are recorded in the trace and the run continues. A
    /// backend failure ends the run at once; the error carries the partial
    /// context.
    pub async fn run(
        &self,
        task: impl Into<String>,
        backend: &dyn Backend,
        max_turns: u32,
    ) -> Result<ExecutionContext, EngineError> {
        let mut ctx = ExecutionContext::new(task);

        info!(
            run_id = %ctx.run_id(),
            backend = backend.name(),
            max_turns,
            "Starting run"
        );
        self.publish(RunEvent::RunStarted {
            run_id: ctx.run_id().to_string(),
            task_preview: ctx.task().chars().take(120).collect(),
            max_turns,
            timestamp: Utc::now(),
        });

        if max_turns == 0 {
            return Ok(self.finish(ctx, StopReason::TurnBudgetExhausted));
        }

        if let Err(e) = backend.begin_session(ctx.task()).await {
            return Err(self.abort(ctx, e));
        }

        let guidance =
            advisor::build_system_prompt(&self.categories, &self.tools, &self.done_category);
        let response_schema = advisor::response_schema(&self.categories, &self.tools);
        let tool_definitions = self.tools.definitions();

        if self.planning {
            let planned = self
                .request_plan(&mut ctx, backend, &guidance, &tool_definitions)
                .await;
            if let Err(e) = planned {
                return Err(self.abort(ctx, e));
            }
        }

        for turn in 0..max_turns {
            let recommended = advisor::recommend(&self.categories, ctx.last_category());
            let message = self.turn_message(&ctx, &recommended);

            debug!(run_id = %ctx.run_id(), turn, ?recommended, "Sending turn");

            let request = TurnRequest {
                turn,
                task: ctx.task().to_string(),
                guidance: guidance.clone(),
                message,
                tools: tool_definitions.clone(),
                response_schema: response_schema.clone(),
            };

            let started = Instant::now();
            let response = match backend.respond(request).await {
                Ok(response) => response,
                Err(e) => return Err(self.abort(ctx, e)),
            };

            let tool_calls = self
                .execute_tools(ctx.run_id(), turn, &response.tool_calls)
                .await;

            let cost = turn_cost(&response.usage, started);
            let planned = ctx.plan().get(turn as usize).map(|p| p.category.clone());

            let stop = if response.is_done {
                Some(StopReason::Completed)
            } else if response.category == self.done_category {
                Some(StopReason::DoneCategory)
            } else {
                None
            };

            let step = TraceStep::new(turn, response.category, recommended)
                .with_thinking(response.thinking)
                .with_content(response.content)
                .with_tool_calls(tool_calls)
                .with_planned(planned)
                .with_cost(cost);

            info!(
                run_id = %ctx.run_id(),
                turn,
                category = %step.category,
                followed = step.followed,
                planned = step.planned.as_deref().unwrap_or("-"),
                tools = step.tool_calls.len(),
                done = stop.is_some(),
                "Turn recorded"
            );
            self.publish(RunEvent::TurnCompleted {
                run_id: ctx.run_id().to_string(),
                turn,
                category: step.category.clone(),
                followed: step.followed,
                tokens_used: step.cost.total_tokens(),
                timestamp: Utc::now(),
            });

            ctx.push(step);

            if let Some(reason) = stop {
                return Ok(self.finish(ctx, reason));
            }
        }

        Ok(self.finish(ctx, StopReason::TurnBudgetExhausted))
    }

    /// Send the plan request and store the reply's plan in `ctx`.
    async fn request_plan(
        &self,
        ctx: &mut ExecutionContext,
        backend: &dyn Backend,
        guidance: &str,
        tool_definitions: &[coact_core::tool::ToolDefinition],
    ) -> Result<(), BackendError> {
        let request = TurnRequest {
            turn: 0,
            task: ctx.task().to_string(),
            guidance: guidance.to_string(),
            message: advisor::plan_message(),
            tools: tool_definitions.to_vec(),
            response_schema: advisor::plan_schema(&self.categories),
        };

        let started = Instant::now();
        let response = backend.respond(request).await?;
        let cost = turn_cost(&response.usage, started);

        if response.plan.is_empty() {
            warn!(run_id = %ctx.run_id(), "Plan request returned no steps");
        }
        let categories: Vec<&str> = response.plan.iter().map(|p| p.category.as_str()).collect();
        info!(run_id = %ctx.run_id(), plan = ?categories, "Plan generated");
        self.publish(RunEvent::PlanGenerated {
            run_id: ctx.run_id().to_string(),
            steps: response.plan.len(),
            timestamp: Utc::now(),
        });

        ctx.set_plan(response.plan, cost);
        Ok(())
    }

    /// Recommendation nudge, optional repetition note, plan position, and
    /// the previous turn's tool results.
    fn turn_message(&self, ctx: &ExecutionContext, recommended: &[String]) -> String {
        let mut message = advisor::format_turn_message(ctx.last_category(), recommended);

        if let Some(note) = advisor::repetition_note(ctx.steps(), self.repetition_threshold) {
            message.push(' ');
            message.push_str(&note);
        }

        if let Some(position) = advisor::format_plan_position(ctx.plan(), ctx.len()) {
            message.push('\n');
            message.push_str(&position);
        }

        let previous_calls = ctx
            .steps()
            .last()
            .map(|s| s.tool_calls.as_slice())
            .unwrap_or_default();
        if !previous_calls.is_empty() {
            message.push_str("\n\n## Tool Results\n");
            for call in previous_calls {
                let status = if call.outcome.is_ok() { "ok" } else { "error" };
                message.push_str(&format!(
                    "- {}({}) [{}]: {}\n",
                    call.name,
                    call.arguments,
                    status,
                    call.outcome.text()
                ));
            }
        }

        message
    }

    /// Run every requested tool. Calls within a turn run concurrently; the
    /// returned invocations keep request order.
    async fn execute_tools(
        &self,
        run_id: &str,
        turn: u32,
        requested: &[RequestedToolCall],
    ) -> Vec<ToolInvocation> {
        if requested.is_empty() {
            return Vec::new();
        }

        debug!(run_id, turn, tool_count = requested.len(), "Executing tool calls");

        let calls = requested.iter().enumerate().map(|(i, req)| {
            let call = ToolCall {
                id: req
                    .id
                    .clone()
                    .unwrap_or_else(|| format!("turn{turn}-call{i}")),
                name: req.name.clone(),
                arguments: req.arguments.clone(),
            };
            async move {
                let start = Instant::now();
                let result = self.tools.execute(&call).await;
                let duration_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);

                let outcome = match result {
                    Ok(r) if r.success => ToolOutcome::Ok { output: r.output },
                    Ok(r) => ToolOutcome::Error { message: r.output },
                    Err(e) => {
                        warn!(run_id, turn, tool = %call.name, error = %e, "Tool execution failed");
                        ToolOutcome::Error {
                            message: e.to_string(),
                        }
                    }
                };

                self.publish(RunEvent::ToolExecuted {
                    run_id: run_id.to_string(),
                    turn,
                    tool_name: call.name.clone(),
                    success: outcome.is_ok(),
                    duration_ms,
                    timestamp: Utc::now(),
                });

                ToolInvocation {
                    call_id: call.id,
                    name: call.name,
                    arguments: call.arguments,
                    outcome,
                    duration_ms,
                }
            }
        });

        join_all(calls).await
    }

    fn finish(&self, mut ctx: ExecutionContext, reason: StopReason) -> ExecutionContext {
        ctx.finish(reason);
        info!(
            run_id = %ctx.run_id(),
            steps = ctx.len(),
            reason = %reason,
            adherence = ctx.adherence_rate(),
            "Run finished"
        );
        self.publish(RunEvent::RunFinished {
            run_id: ctx.run_id().to_string(),
            steps: ctx.len(),
            reason: reason.to_string(),
            timestamp: Utc::now(),
        });
        ctx
    }

    fn abort(&self, mut ctx: ExecutionContext, source: BackendError) -> EngineError {
        ctx.finish(StopReason::BackendFailed);
        let last_turn = ctx.last_turn();
        error!(
            run_id = %ctx.run_id(),
            ?last_turn,
            error = %source,
            "Backend failed, aborting run"
        );
        self.publish(RunEvent::RunFailed {
            run_id: ctx.run_id().to_string(),
            last_turn,
            error_message: source.to_string(),
            timestamp: Utc::now(),
        });
        EngineError::Backend {
            source,
            last_turn,
            partial: Box::new(ctx),
        }
    }

    fn publish(&self, event: RunEvent) {
        if let Some(bus) = &self.event_bus {
            bus.publish(event);
        }
    }
}

/// Cost of one backend call. A service-reported duration wins over the
/// wall clock.
fn turn_cost(usage: &TurnUsage, started: Instant) -> TurnCost {
    let duration = usage
        .duration_ms
        .map(Duration::from_millis)
        .unwrap_or_else(|| started.elapsed());
    TurnCost::new(usage.input_tokens, usage.output_tokens, duration).with_cost_usd(usage.cost_usd)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{ScriptedBackend, abc_registry};
    use coact_core::backend::{PlannedStep, TurnResponse};

    fn engine() -> Engine {
        Engine::new(Arc::new(abc_registry()))
    }

    #[tokio::test]
    async fn abac_scenario() {
        let backend = ScriptedBackend::new(vec![
            TurnResponse::new("A", "start"),
            TurnResponse::new("B", "next"),
            TurnResponse::new("A", "again"),
            TurnResponse::new("C", "finish").done(),
        ]);

        let ctx = engine().run("scenario", &backend, 10).await.unwrap();

        assert_eq!(ctx.len(), 4);
        assert_eq!(ctx.stop_reason(), Some(StopReason::Completed));
        let recommended: Vec<_> = ctx.steps().iter().map(|s| s.recommended.clone()).collect();
        assert_eq!(
            recommended,
            vec![
                Vec::<String>::new(),
                vec!["B".to_string()],
                vec!["A".to_string(), "C".to_string()],
                vec!["B".to_string()],
            ]
        );
        let followed: Vec<_> = ctx.steps().iter().map(|s| s.followed).collect();
        assert_eq!(followed, vec![false, true, true, false]);
        assert!((ctx.adherence_rate() - 2.0 / 3.0).abs() < 1e-12);
        assert_eq!(backend.calls(), 4);
    }

    #[tokio::test]
    async fn zero_turn_budget_never_calls_backend() {
        let backend = ScriptedBackend::new(vec![]);
        let ctx = engine().run("nothing", &backend, 0).await.unwrap();
        assert!(ctx.is_empty());
        assert_eq!(ctx.adherence_rate(), 0.0);
        assert_eq!(ctx.stop_reason(), Some(StopReason::TurnBudgetExhausted));
        assert_eq!(backend.calls(), 0);
        assert_eq!(backend.sessions(), 0);
    }

    #[tokio::test]
    async fn turn_budget_stops_the_loop() {
        let backend = ScriptedBackend::new(vec![
            TurnResponse::new("A", ""),
            TurnResponse::new("B", ""),
            TurnResponse::new("A", ""),
        ]);
        let ctx = engine().run("budget", &backend, 2).await.unwrap();
        assert_eq!(ctx.len(), 2);
        assert_eq!(ctx.stop_reason(), Some(StopReason::TurnBudgetExhausted));
        assert_eq!(backend.calls(), 2);
    }

    #[tokio::test]
    async fn done_category_stops_the_loop() {
        let backend = ScriptedBackend::new(vec![
            TurnResponse::new("A", ""),
            TurnResponse::new("done", "final answer"),
            TurnResponse::new("A", "never sent"),
        ]);
        let ctx = engine().run("sentinel", &backend, 10).await.unwrap();
        assert_eq!(ctx.len(), 2);
        assert_eq!(ctx.stop_reason(), Some(StopReason::DoneCategory));

        let custom = ScriptedBackend::new(vec![TurnResponse::new("C", ""), TurnResponse::new("done", "")]);
        let ctx = engine()
            .with_done_category("C")
            .run("custom sentinel", &custom, 10)
            .await
            .unwrap();
        assert_eq!(ctx.len(), 1);
    }

    #[tokio::test]
    async fn unknown_category_gets_no_recommendation() {
        let backend = ScriptedBackend::new(vec![
            TurnResponse::new("A", ""),
            TurnResponse::new("improvise", ""),
            TurnResponse::new("B", "").done(),
        ]);
        let ctx = engine().run("improv", &backend, 10).await.unwrap();
        let steps = ctx.steps();
        assert!(!steps[1].followed);
        assert_eq!(steps[1].recommended, vec!["B"]);
        assert!(steps[2].recommended.is_empty());
        assert!(!steps[2].had_recommendation());
        // Only step 1 had a recommendation and it was not followed.
        assert_eq!(ctx.adherence_rate(), 0.0);
    }

    #[tokio::test]
    async fn failing_tool_is_recorded_and_fed_forward() {
        let mut engine = engine();
        engine.register_tool("boom", "Always fails", |_| {
            Err(ToolError::ExecutionFailed {
                tool_name: "boom".into(),
                reason: "kaboom".into(),
            })
        });
        engine.register_tool("echo", "Echo", |args| {
            Ok(args.get("text").and_then(|v| v.as_str()).unwrap_or("").to_string())
        });

        let backend = ScriptedBackend::new(vec![
            TurnResponse::new("A", "")
                .with_tool_call("boom", serde_json::json!({}))
                .with_tool_call("echo", serde_json::json!({"text": "hi"}))
                .with_tool_call("missing", serde_json::json!({})),
            TurnResponse::new("B", "").done(),
        ]);

        let ctx = engine.run("tools", &backend, 5).await.unwrap();
        assert_eq!(ctx.len(), 2);

        let calls = &ctx.steps()[0].tool_calls;
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[0].name, "boom");
        assert!(!calls[0].outcome.is_ok());
        assert!(calls[0].outcome.text().contains("kaboom"));
        assert_eq!(calls[1].outcome, ToolOutcome::Ok { output: "hi".into() });
        assert!(calls[2].outcome.text().contains("Tool not found"));
        assert_eq!(calls[2].call_id, "turn0-call2");

        let second = &backend.requests()[1].message;
        assert!(second.contains("## Tool Results"));
        assert!(second.contains("boom"));
        assert!(second.contains("kaboom"));
        assert!(second.contains("[ok]: hi"));
    }

    #[tokio::test]
    async fn backend_failure_returns_partial_context() {
        let backend = ScriptedBackend::new(vec![TurnResponse::new("A", ""), TurnResponse::new("B", "")])
            .fail_at(2, BackendError::Network("connection reset".into()));

        let err = engine().run("flaky", &backend, 10).await.unwrap_err();
        assert_eq!(err.last_turn(), Some(1));
        assert!(err.to_string().contains("last completed turn 1"));
        assert!(err.to_string().contains("connection reset"));

        let partial = err.into_partial();
        assert_eq!(partial.len(), 2);
        assert_eq!(partial.stop_reason(), Some(StopReason::BackendFailed));
    }

    #[tokio::test]
    async fn backend_failure_on_first_turn() {
        let backend = ScriptedBackend::new(vec![])
            .fail_at(0, BackendError::AuthenticationFailed("bad key".into()));
        let err = engine().run("denied", &backend, 3).await.unwrap_err();
        assert_eq!(err.last_turn(), None);
        assert!(err.partial().is_empty());
    }

    #[tokio::test]
    async fn requests_carry_guidance_schema_and_all_tools() {
        let mut engine = engine();
        engine.register_tool("calc", "Arithmetic", |_| Ok("0".into()));
        let backend = ScriptedBackend::new(vec![
            TurnResponse::new("A", ""),
            TurnResponse::new("C", "").done(),
        ]);

        engine.run("inspect", &backend, 5).await.unwrap();
        let requests = backend.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].turn, 0);
        assert!(requests[0].message.contains("first turn"));
        assert!(requests[0].guidance.contains("**A**"));
        assert_eq!(requests[0].guidance, requests[1].guidance);
        assert_eq!(requests[1].message, "Your last action was [A]. Recommended next: [B].");
        // Tools are offered regardless of category.
        assert!(requests.iter().all(|r| r.tools.len() == 1));
        assert!(requests[0].response_schema["properties"]["category"].is_object());
    }

    #[tokio::test]
    async fn repetition_note_is_appended() {
        let backend = ScriptedBackend::new(vec![
            TurnResponse::new("A", ""),
            TurnResponse::new("A", ""),
            TurnResponse::new("A", ""),
            TurnResponse::new("C", "").done(),
        ]);
        engine().run("loop", &backend, 10).await.unwrap();
        let requests = backend.requests();
        assert!(!requests[2].message.contains("consecutive"));
        assert!(requests[3].message.contains("3 consecutive [A]"));
    }

    #[tokio::test]
    async fn usage_is_recorded_as_cost() {
        let backend = ScriptedBackend::new(vec![
            TurnResponse::new("A", "").with_usage(100, 20),
            TurnResponse::new("A", "").with_usage(50, 10).done(),
        ]);
        let ctx = engine().run("costly", &backend, 5).await.unwrap();
        let stats = ctx.cost_stats();
        assert_eq!(stats["A"].tokens_in, 150);
        assert_eq!(stats["A"].tokens_out, 30);
        assert_eq!(stats["A"].steps, 2);
    }

    #[tokio::test]
    async fn events_are_published() {
        let bus = Arc::new(EventBus::new(64));
        let mut rx = bus.subscribe();
        let mut engine = engine().with_event_bus(bus);
        engine.register_tool("echo", "", |_| Ok("x".into()));

        let backend = ScriptedBackend::new(vec![
            TurnResponse::new("A", "").with_tool_call("echo", serde_json::json!({})).done(),
        ]);
        engine.run("events", &backend, 3).await.unwrap();

        let mut kinds = Vec::new();
        while let Ok(event) = rx.try_recv() {
            kinds.push(match event.as_ref() {
                RunEvent::RunStarted { .. } => "started",
                RunEvent::PlanGenerated { .. } => "plan",
                RunEvent::ToolExecuted { .. } => "tool",
                RunEvent::TurnCompleted { .. } => "turn",
                RunEvent::RunFinished { .. } => "finished",
                RunEvent::RunFailed { .. } => "failed",
            });
        }
        assert_eq!(kinds, vec!["started", "tool", "turn", "finished"]);
    }

    #[tokio::test]
    async fn each_run_starts_a_fresh_session() {
        let engine = engine();
        let backend = ScriptedBackend::new(vec![
            TurnResponse::new("C", "").done(),
            TurnResponse::new("C", "").done(),
        ]);
        let first = engine.run("one", &backend, 3).await.unwrap();
        let second = engine.run("two", &backend, 3).await.unwrap();
        assert_eq!(backend.sessions(), 2);
        assert_ne!(first.run_id(), second.run_id());
        assert_eq!(second.task(), "two");
        assert_eq!(second.len(), 1);
    }

    fn plan_reply() -> TurnResponse {
        TurnResponse::new("plan", "").with_plan(vec![
            PlannedStep::new("A", "start"),
            PlannedStep::new("B", ""),
            PlannedStep::new("C", ""),
        ])
    }

    #[tokio::test]
    async fn planning_sends_one_plan_request_first() {
        let backend = ScriptedBackend::new(vec![
            plan_reply().with_usage(40, 12),
            TurnResponse::new("A", ""),
            TurnResponse::new("B", ""),
            TurnResponse::new("A", "").done(),
        ]);

        let ctx = engine()
            .with_planning(true)
            .run("planned", &backend, 10)
            .await
            .unwrap();

        assert_eq!(backend.calls(), 4);
        assert_eq!(ctx.len(), 3);

        let requests = backend.requests();
        assert_eq!(requests[0].message, advisor::plan_message());
        assert_eq!(requests[0].response_schema["required"], serde_json::json!(["plan"]));
        assert!(requests[1].response_schema["properties"]["category"].is_object());
        assert_eq!(requests[0].guidance, requests[1].guidance);

        assert!(requests[1].message.contains("first turn"));
        assert!(requests[1].message.ends_with("\nPlan step 1 of 3: [A] start"));
        assert!(requests[2].message.contains("Plan step 2 of 3: [B]"));
        assert!(requests[3].message.contains("Plan step 3 of 3: [C]"));

        let plan: Vec<_> = ctx.plan().iter().map(|p| p.category.as_str()).collect();
        assert_eq!(plan, vec!["A", "B", "C"]);
        assert_eq!(ctx.plan_cost().unwrap().tokens_in, 40);
        // The plan request is not a step and carries no category cost.
        assert_eq!(ctx.total_cost().tokens_in, 0);

        let planned: Vec<_> = ctx.steps().iter().map(|s| s.planned.as_deref()).collect();
        assert_eq!(planned, vec![Some("A"), Some("B"), Some("C")]);
        assert!((ctx.plan_adherence_rate() - 2.0 / 3.0).abs() < 1e-12);
        // Recommendation adherence is scored independently.
        assert_eq!(ctx.adherence_rate(), 1.0);
    }

    #[tokio::test]
    async fn plan_position_disappears_once_plan_is_used_up() {
        let backend = ScriptedBackend::new(vec![
            TurnResponse::new("plan", "").with_plan(vec![PlannedStep::new("A", "")]),
            TurnResponse::new("A", ""),
            TurnResponse::new("B", "").done(),
        ]);
        let ctx = engine()
            .with_planning(true)
            .run("short plan", &backend, 5)
            .await
            .unwrap();
        let requests = backend.requests();
        assert!(requests[1].message.contains("Plan step 1 of 1"));
        assert!(!requests[2].message.contains("Plan step"));
        assert_eq!(ctx.steps()[1].planned, None);
        assert_eq!(ctx.plan_adherence_rate(), 0.5);
    }

    #[tokio::test]
    async fn planning_is_off_by_default() {
        let backend = ScriptedBackend::new(vec![TurnResponse::new("A", "").done()]);
        let ctx = engine().run("unplanned", &backend, 5).await.unwrap();
        assert_eq!(backend.calls(), 1);
        assert!(ctx.plan().is_empty());
        assert!(ctx.plan_cost().is_none());
        assert!(ctx.steps()[0].planned.is_none());
        assert!(!backend.requests()[0].message.contains("Plan step"));
    }

    #[tokio::test]
    async fn zero_turn_budget_skips_the_plan_request() {
        let backend = ScriptedBackend::new(vec![]);
        let ctx = engine().with_planning(true).run("nothing", &backend, 0).await.unwrap();
        assert_eq!(backend.calls(), 0);
        assert!(ctx.plan().is_empty());
    }

    #[tokio::test]
    async fn failed_plan_request_aborts_before_any_turn() {
        let backend = ScriptedBackend::new(vec![])
            .fail_at(0, BackendError::Network("unreachable".into()));
        let err = engine()
            .with_planning(true)
            .run("no plan", &backend, 5)
            .await
            .unwrap_err();
        assert_eq!(err.last_turn(), None);
        assert!(err.partial().is_empty());
        assert_eq!(err.partial().stop_reason(), Some(StopReason::BackendFailed));
        assert_eq!(backend.calls(), 1);
    }

    #[tokio::test]
    async fn plan_event_precedes_turns() {
        let bus = Arc::new(EventBus::new(64));
        let mut rx = bus.subscribe();
        let backend = ScriptedBackend::new(vec![plan_reply(), TurnResponse::new("A", "").done()]);
        engine()
            .with_planning(true)
            .with_event_bus(bus)
            .run("events", &backend, 3)
            .await
            .unwrap();

        let mut plan_steps = None;
        let mut order = Vec::new();
        while let Ok(event) = rx.try_recv() {
            match event.as_ref() {
                RunEvent::PlanGenerated { steps, .. } => {
                    plan_steps = Some(*steps);
                    order.push("plan");
                }
                RunEvent::TurnCompleted { .. } => order.push("turn"),
                _ => {}
            }
        }
        assert_eq!(plan_steps, Some(3));
        assert_eq!(order, vec!["plan", "turn"]);
    }

    #[tokio::test]
    async fn reported_duration_wins_over_wall_clock() {
        let mut reply = TurnResponse::new("A", "").done();
        reply.usage.duration_ms = Some(1234);
        let backend = ScriptedBackend::new(vec![reply]);
        let ctx = engine().run("timed", &backend, 3).await.unwrap();
        assert_eq!(ctx.steps()[0].cost.duration_ms, 1234);
        assert_eq!(ctx.cost_stats()["A"].duration_ms, 1234);
    }
}
