//! Backend driving the `claude` command-line client.
//!
//! One CLI session per run: the first turn creates it with `--session-id`,
//! later turns continue it with `--resume`, so the CLI keeps the history.
//! Output is requested as a JSON envelope whose `result` field holds the
//! agent's structured reply.

use std::path::PathBuf;

use async_trait::async_trait;
use coact_core::backend::{Backend, TurnRequest, TurnResponse, TurnUsage};
use coact_core::error::BackendError;
use serde::Deserialize;
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::reply::{SESSION_PREAMBLE, parse_structured_reply, preview, render_state_prompt};

/// Model used when none is configured.
pub const DEFAULT_MODEL: &str = "haiku";

/// Environment variables stripped from the child so a nested CLI does not
/// think it is running inside another session.
const STRIPPED_ENV: &[&str] = &["CLAUDECODE"];

pub struct ClaudeCliBackend {
    program: PathBuf,
    model: String,
    session: Mutex<Option<CliSession>>,
}

#[derive(Debug, Clone)]
struct CliSession {
    id: String,
    task: String,
    started: bool,
}

impl CliSession {
    fn new(task: &str) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            task: task.to_string(),
            started: false,
        }
    }
}

impl ClaudeCliBackend {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            program: PathBuf::from("claude"),
            model: model.into(),
            session: Mutex::new(None),
        }
    }

    /// Use a different executable (a wrapper script, an absolute path).
    pub fn with_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.program = program.into();
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Id of the current session, if one has been started.
    pub async fn session_id(&self) -> Option<String> {
        self.session.lock().await.as_ref().map(|s| s.id.clone())
    }

    /// Command-line arguments for one turn.
    fn build_args(&self, session: &CliSession, prompt: String) -> Vec<String> {
        let mut args = vec!["--print".to_string()];
        if session.started {
            args.extend(["--resume".to_string(), session.id.clone()]);
        } else {
            args.extend([
                "--model".to_string(),
                self.model.clone(),
                "--session-id".to_string(),
                session.id.clone(),
            ]);
        }
        args.extend(["--output-format".to_string(), "json".to_string()]);
        if !session.started {
            args.extend(["--system-prompt".to_string(), SESSION_PREAMBLE.to_string()]);
        }
        args.push("--dangerously-skip-permissions".to_string());
        args.push(prompt);
        args
    }

    async fn invoke(&self, args: &[String]) -> Result<String, BackendError> {
        let mut command = Command::new(&self.program);
        command.args(args).kill_on_drop(true);
        for key in STRIPPED_ENV {
            command.env_remove(key);
        }

        let output = command.output().await.map_err(|e| {
            BackendError::NotConfigured(format!(
                "could not launch {}: {e}",
                self.program.display()
            ))
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            error!(code = ?output.status.code(), stderr = %preview(&stderr, 500), "claude CLI failed");
            return Err(BackendError::Process {
                code: output.status.code(),
                stderr: preview(&stderr, 500),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl Default for ClaudeCliBackend {
    fn default() -> Self {
        Self::new(DEFAULT_MODEL)
    }
}

#[async_trait]
impl Backend for ClaudeCliBackend {
    fn name(&self) -> &str {
        "claude-cli"
    }

    async fn begin_session(&self, task: &str) -> Result<(), BackendError> {
        let session = CliSession::new(task);
        debug!(session = %session.id, "CLI session reserved");
        *self.session.lock().await = Some(session);
        Ok(())
    }

    async fn respond(&self, request: TurnRequest) -> Result<TurnResponse, BackendError> {
        let mut guard = self.session.lock().await;
        if guard.as_ref().is_some_and(|s| s.task != request.task) {
            *guard = None;
        }
        let session = guard.get_or_insert_with(|| CliSession::new(&request.task));

        let prompt = if session.started {
            render_state_prompt(&request.message, &request.response_schema)
        } else {
            let instructions = format!("{}\n\n{}", request.guidance, request.message);
            format!(
                "{}\n\n---\n\n{}",
                request.task,
                render_state_prompt(&instructions, &request.response_schema)
            )
        };

        let args = self.build_args(session, prompt);
        debug!(session = %session.id, resume = session.started, turn = request.turn, "Invoking claude CLI");

        let stdout = self.invoke(&args).await?;
        session.started = true;

        let envelope = parse_envelope(&stdout)?;
        let mut reply = parse_structured_reply(&envelope.result)?;
        reply.usage = TurnUsage {
            input_tokens: envelope.input_tokens,
            output_tokens: envelope.output_tokens,
            cost_usd: envelope.cost_usd,
            duration_ms: envelope.duration_ms,
        };
        Ok(reply)
    }
}

/// The fields of the CLI's `--output-format json` envelope the backend uses.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Envelope {
    pub result: String,
    pub cost_usd: Option<f64>,
    /// Duration reported by the CLI
    pub duration_ms: Option<u64>,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

#[derive(Deserialize)]
struct RawEnvelope {
    #[serde(default)]
    result: Option<String>,
    #[serde(default, alias = "total_cost_usd")]
    cost_usd: Option<f64>,
    #[serde(default)]
    duration_ms: Option<u64>,
    #[serde(default)]
    usage: Option<RawUsage>,
}

#[derive(Deserialize)]
struct RawUsage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
}

/// Parse the CLI envelope. Output that is not an envelope is taken as the
/// reply text itself; empty output is an error.
pub fn parse_envelope(stdout: &str) -> Result<Envelope, BackendError> {
    let trimmed = stdout.trim();
    if trimmed.is_empty() {
        return Err(BackendError::MalformedResponse(
            "claude CLI produced no output".into(),
        ));
    }

    match serde_json::from_str::<RawEnvelope>(trimmed) {
        Ok(raw) => {
            let usage = raw.usage.unwrap_or(RawUsage {
                input_tokens: 0,
                output_tokens: 0,
            });
            Ok(Envelope {
                result: raw.result.unwrap_or_default(),
                cost_usd: raw.cost_usd,
                duration_ms: raw.duration_ms,
                input_tokens: usage.input_tokens,
                output_tokens: usage.output_tokens,
            })
        }
        Err(e) => {
            warn!(error = %e, output = %preview(trimmed, 200), "Could not parse CLI JSON envelope");
            Ok(Envelope {
                result: trimmed.to_string(),
                ..Envelope::default()
            })
        }
    }
}
