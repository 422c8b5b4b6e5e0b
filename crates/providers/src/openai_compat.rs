//! OpenAI-compatible backend.
//!
//! Works with OpenAI, OpenRouter, Ollama, vLLM and any endpoint exposing
//! `/chat/completions`. Chat-completion services are stateless, so the
//! backend keeps the session history itself: the system prompt carries the
//! guidance, then one user message per turn and the assistant's replies.

use async_trait::async_trait;
use coact_core::backend::{Backend, TurnRequest, TurnResponse, TurnUsage};
use coact_core::error::BackendError;
use coact_core::message::{Conversation, Message, Role};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::reply::{SESSION_PREAMBLE, parse_structured_reply, preview, render_state_prompt};

/// An OpenAI-compatible chat-completions backend.
pub struct OpenAiCompatBackend {
    name: String,
    base_url: String,
    api_key: String,
    model: String,
    temperature: f32,
    max_tokens: Option<u32>,
    client: reqwest::Client,
    session: Mutex<Session>,
}

#[derive(Default)]
struct Session {
    task: String,
    conversation: Conversation,
}

impl OpenAiCompatBackend {
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            model: model.into(),
            temperature: 0.7,
            max_tokens: None,
            client,
            session: Mutex::new(Session::default()),
        }
    }

    /// OpenRouter (convenience constructor).
    pub fn openrouter(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self::new("openrouter", "https://openrouter.ai/api/v1", api_key, model)
    }

    /// OpenAI (convenience constructor).
    pub fn openai(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self::new("openai", "https://api.openai.com/v1", api_key, model)
    }

    /// Ollama (convenience constructor). No key needed.
    pub fn ollama(base_url: Option<&str>, model: impl Into<String>) -> Self {
        Self::new(
            "ollama",
            base_url.unwrap_or("http://localhost:11434/v1"),
            "ollama",
            model,
        )
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Messages in this session so far.
    pub async fn history_len(&self) -> usize {
        self.session.lock().await.conversation.len()
    }

    fn to_api_messages(messages: &[Message]) -> Vec<ApiMessage> {
        messages
            .iter()
            .map(|m| ApiMessage {
                role: match m.role {
                    Role::User => "user".into(),
                    Role::Assistant => "assistant".into(),
                    Role::System => "system".into(),
                },
                content: m.content.clone(),
            })
            .collect()
    }

    fn request_body(&self, messages: &[Message]) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": self.model,
            "messages": Self::to_api_messages(messages),
            "temperature": self.temperature,
            "stream": false,
        });
        if let Some(max_tokens) = self.max_tokens {
            body["max_tokens"] = serde_json::json!(max_tokens);
        }
        body
    }

    async fn complete(&self, messages: &[Message]) -> Result<ApiResponse, BackendError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = self.request_body(messages);

        debug!(backend = %self.name, model = %self.model, messages = messages.len(), "Sending completion request");

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| BackendError::Network(e.to_string()))?;

        let status = response.status().as_u16();

        if status == 429 {
            let retry_after_secs = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok())
                .unwrap_or(5);
            return Err(BackendError::RateLimited { retry_after_secs });
        }

        if status == 401 || status == 403 {
            return Err(BackendError::AuthenticationFailed(
                "Invalid API key or insufficient permissions".into(),
            ));
        }

        if status != 200 {
            let error_body = response.text().await.unwrap_or_default();
            warn!(status, body = %preview(&error_body, 500), "Backend returned error");
            return Err(BackendError::Api {
                status_code: status,
                message: error_body,
            });
        }

        response
            .json()
            .await
            .map_err(|e| BackendError::MalformedResponse(format!("Failed to parse response: {e}")))
    }
}

#[async_trait]
impl Backend for OpenAiCompatBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn begin_session(&self, task: &str) -> Result<(), BackendError> {
        if self.api_key.is_empty() {
            return Err(BackendError::NotConfigured(format!(
                "{} needs an API key (set COACT_API_KEY or api_key in config)",
                self.name
            )));
        }
        let mut session = self.session.lock().await;
        *session = Session {
            task: task.to_string(),
            conversation: Conversation::new(),
        };
        debug!(backend = %self.name, session = %session.conversation.id, "Session started");
        Ok(())
    }

    async fn respond(&self, request: TurnRequest) -> Result<TurnResponse, BackendError> {
        let mut session = self.session.lock().await;

        let state_prompt = render_state_prompt(&request.message, &request.response_schema);
        if session.conversation.is_empty() || session.task != request.task {
            session.task = request.task.clone();
            session.conversation = Conversation::new();
            session.conversation.push(Message::system(format!(
                "{SESSION_PREAMBLE}\n\n{}",
                request.guidance
            )));
            session
                .conversation
                .push(Message::user(format!("{}\n\n---\n\n{state_prompt}", request.task)));
        } else {
            session.conversation.push(Message::user(state_prompt));
        }

        let api_response = self.complete(&session.conversation.messages).await?;

        let content = api_response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| BackendError::MalformedResponse("No choices in response".into()))?;

        session.conversation.push(Message::assistant(content.clone()));

        let mut reply = parse_structured_reply(&content)?;
        reply.usage = api_response
            .usage
            .map(|u| TurnUsage {
                input_tokens: u.prompt_tokens,
                output_tokens: u.completion_tokens,
                cost_usd: u.cost,
                duration_ms: None,
            })
            .unwrap_or_default();

        debug!(
            backend = %self.name,
            turn = request.turn,
            category = %reply.category,
            history = session.conversation.len(),
            "Reply parsed"
        );
        Ok(reply)
    }
}

// ── API wire types ────────────────────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize)]
struct ApiMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    choices: Vec<ApiChoice>,
    #[serde(default)]
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    message: ApiChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ApiChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
    /// OpenRouter reports spend here.
    #[serde(default)]
    cost: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve canned HTTP responses, one per connection, and hand back the
    /// request bodies.
    async fn mock_server(
        responses: Vec<(u16, String)>,
    ) -> (String, tokio::task::JoinHandle<Vec<serde_json::Value>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let handle = tokio::spawn(async move {
            let mut bodies = Vec::new();
            for (status, body) in responses {
                let (mut socket, _) = listener.accept().await.unwrap();
                let mut buf = Vec::new();
                let mut chunk = [0u8; 4096];
                let header_end = loop {
                    let n = socket.read(&mut chunk).await.unwrap();
                    buf.extend_from_slice(&chunk[..n]);
                    if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                        break pos + 4;
                    }
                };
                let headers = String::from_utf8_lossy(&buf[..header_end]).to_lowercase();
                let content_length: usize = headers
                    .lines()
                    .find_map(|l| l.strip_prefix("content-length:"))
                    .map(|v| v.trim().parse().unwrap())
                    .unwrap_or(0);
                while buf.len() < header_end + content_length {
                    let n = socket.read(&mut chunk).await.unwrap();
                    buf.extend_from_slice(&chunk[..n]);
                }
                bodies.push(serde_json::from_slice(&buf[header_end..]).unwrap());

                let reply = format!(
                    "HTTP/1.1 {status} X\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                    body.len()
                );
                socket.write_all(reply.as_bytes()).await.unwrap();
                socket.shutdown().await.unwrap();
            }
            bodies
        });

        (format!("http://{addr}"), handle)
    }

    fn completion(content: &str) -> String {
        serde_json::json!({
            "choices": [{"message": {"role": "assistant", "content": content}}],
            "usage": {"prompt_tokens": 120, "completion_tokens": 30, "total_tokens": 150}
        })
        .to_string()
    }

    fn request(turn: u32, message: &str) -> TurnRequest {
        TurnRequest {
            turn,
            task: "Project salary growth".into(),
            guidance: "## Action Categories".into(),
            message: message.into(),
            tools: Vec::new(),
            response_schema: serde_json::json!({"type": "object", "properties": {}}),
        }
    }

    #[test]
    fn openrouter_constructor() {
        let backend = OpenAiCompatBackend::openrouter("sk-test", "anthropic/claude-sonnet-4");
        assert_eq!(backend.name(), "openrouter");
        assert_eq!(backend.base_url, "https://openrouter.ai/api/v1");
        assert_eq!(backend.model(), "anthropic/claude-sonnet-4");
    }

    #[test]
    fn ollama_constructor() {
        let backend = OpenAiCompatBackend::ollama(None, "llama3");
        assert_eq!(backend.name(), "ollama");
        assert_eq!(backend.base_url, "http://localhost:11434/v1");
    }

    #[test]
    fn request_body_includes_settings() {
        let backend = OpenAiCompatBackend::openai("k", "gpt-4o")
            .with_temperature(0.2)
            .with_max_tokens(512);
        let body = backend.request_body(&[Message::system("guide"), Message::user("go")]);
        assert_eq!(body["model"], "gpt-4o");
        assert_eq!(body["max_tokens"], 512);
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "go");
        assert!((body["temperature"].as_f64().unwrap() - 0.2).abs() < 1e-6);
    }

    #[tokio::test]
    async fn keeps_history_across_turns() {
        let (url, server) = mock_server(vec![
            (200, completion(r#"{"category": "analyze", "content": "look", "is_done": false}"#)),
            (200, completion(r#"{"category": "done", "content": "42", "is_done": true}"#)),
        ])
        .await;

        let backend = OpenAiCompatBackend::new("mock", url, "sk-test", "m");
        backend.begin_session("Project salary growth").await.unwrap();

        let first = backend.respond(request(0, "This is your first turn.")).await.unwrap();
        assert_eq!(first.category, "analyze");
        assert_eq!(first.usage.input_tokens, 120);
        assert_eq!(first.usage.output_tokens, 30);

        let second = backend
            .respond(request(1, "Your last action was [analyze]."))
            .await
            .unwrap();
        assert!(second.is_done);
        assert_eq!(backend.history_len().await, 5);

        let bodies = server.await.unwrap();
        assert_eq!(bodies[0]["messages"].as_array().unwrap().len(), 2);
        let messages = bodies[1]["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[0]["role"], "system");
        assert!(messages[1]["content"].as_str().unwrap().starts_with("Project salary growth"));
        assert_eq!(messages[2]["role"], "assistant");
        assert!(messages[3]["content"].as_str().unwrap().contains("[analyze]"));
    }

    #[tokio::test]
    async fn maps_error_statuses() {
        let (url, _server) = mock_server(vec![
            (401, "{}".into()),
            (429, "{}".into()),
            (500, "boom".into()),
        ])
        .await;
        let backend = OpenAiCompatBackend::new("mock", url, "sk-test", "m");

        let auth = backend.respond(request(0, "a")).await.unwrap_err();
        assert!(matches!(auth, BackendError::AuthenticationFailed(_)));

        let limited = backend.respond(request(0, "b")).await.unwrap_err();
        assert!(matches!(limited, BackendError::RateLimited { retry_after_secs: 5 }));

        let api = backend.respond(request(0, "c")).await.unwrap_err();
        assert!(matches!(api, BackendError::Api { status_code: 500, .. }));
    }

    #[tokio::test]
    async fn prose_reply_is_malformed() {
        let (url, _server) = mock_server(vec![(200, completion("I'd rather not."))]).await;
        let backend = OpenAiCompatBackend::new("mock", url, "sk-test", "m");
        let err = backend.respond(request(0, "go")).await.unwrap_err();
        assert!(matches!(err, BackendError::MalformedResponse(_)));
    }

    #[tokio::test]
    async fn missing_key_fails_session_start() {
        let backend = OpenAiCompatBackend::openrouter("", "m");
        let err = backend.begin_session("task").await.unwrap_err();
        assert!(matches!(err, BackendError::NotConfigured(_)));
    }
}
