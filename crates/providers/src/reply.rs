//! Structured-reply handling shared by text-based backends.
//!
//! Backends that talk to a model through plain text ask for a JSON object
//! matching the turn's response schema and parse whatever comes back.
//! Models wrap JSON in prose or code fences often enough that parsing is
//! deliberately forgiving; only text with no recoverable object fails.

use coact_core::backend::{PlannedStep, RequestedToolCall, TurnResponse};
use coact_core::error::BackendError;
use serde::Deserialize;
use serde_json::Value;

/// Category recorded when a reply omits one.
pub const UNKNOWN_CATEGORY: &str = "unknown";

/// Preamble sent as the system prompt of every session.
pub const SESSION_PREAMBLE: &str = "You are a task-solving agent with soft action guidance. \
At each step you receive recommendations about action types and a JSON schema.\n\
You MUST respond with ONLY a valid JSON object matching the provided schema.\n\
No markdown, no code fences, no explanation outside the JSON.\n\
You self-classify your action type. Recommendations are suggestions, not constraints.";

/// Combine per-turn instructions with the schema and an example object.
pub fn render_state_prompt(instructions: &str, schema: &Value) -> String {
    let schema_text = serde_json::to_string_pretty(schema).unwrap_or_else(|_| schema.to_string());
    let example = example_for(schema);
    let example_text =
        serde_json::to_string_pretty(&example).unwrap_or_else(|_| example.to_string());

    format!(
        "[INSTRUCTIONS]\n{instructions}\n\n\
         [REQUIRED JSON SCHEMA]\n{schema_text}\n\n\
         [EXAMPLE FORMAT]\n{example_text}\n\n\
         Respond with ONLY the JSON object."
    )
}

/// A placeholder object with one entry per schema property.
fn example_for(schema: &Value) -> Value {
    let mut example = serde_json::Map::new();
    if let Some(properties) = schema.get("properties").and_then(Value::as_object) {
        for (key, prop) in properties {
            let value = if let Some(first) = prop.get("enum").and_then(|e| e.get(0)) {
                first.clone()
            } else {
                match prop.get("type").and_then(Value::as_str) {
                    Some("object") => Value::Object(serde_json::Map::new()),
                    Some("array") => Value::Array(Vec::new()),
                    Some("boolean") => Value::Bool(false),
                    _ => Value::String(format!("<{key}>")),
                }
            };
            example.insert(key.clone(), value);
        }
    }
    Value::Object(example)
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawReply {
    category: Option<String>,
    thinking: Option<Value>,
    content: Option<Value>,
    tool_calls: Vec<RawToolCall>,
    is_done: bool,
    plan: Vec<RawPlannedStep>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawPlannedStep {
    #[serde(alias = "action_type")]
    category: Option<String>,
    description: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct RawToolCall {
    #[serde(default)]
    id: Option<String>,
    name: String,
    #[serde(default, alias = "args", alias = "input")]
    arguments: Value,
}

/// Parse an agent reply into a [`TurnResponse`].
///
/// Accepts raw JSON, a fenced ```json block, or the outermost `{...}` span
/// embedded in prose. A missing or blank category becomes
/// [`UNKNOWN_CATEGORY`]. Plan entries without a category are dropped.
/// Usage is left at zero for the caller to fill.
pub fn parse_structured_reply(text: &str) -> Result<TurnResponse, BackendError> {
    let value = extract_json_object(text).ok_or_else(|| {
        BackendError::MalformedResponse(format!(
            "no JSON object in reply: {}",
            preview(text, 200)
        ))
    })?;

    let raw: RawReply = serde_json::from_value(value)
        .map_err(|e| BackendError::MalformedResponse(format!("reply does not fit schema: {e}")))?;

    let category = raw
        .category
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty())
        .unwrap_or_else(|| UNKNOWN_CATEGORY.to_string());

    let mut response = TurnResponse::new(category, value_text(raw.content));
    response.thinking = value_text(raw.thinking);
    response.is_done = raw.is_done;
    response.tool_calls = raw
        .tool_calls
        .into_iter()
        .map(|call| RequestedToolCall {
            id: call.id,
            name: call.name,
            arguments: call.arguments,
        })
        .collect();
    response.plan = raw
        .plan
        .into_iter()
        .filter_map(|entry| {
            let category = entry.category?.trim().to_string();
            (!category.is_empty()).then(|| PlannedStep::new(category, value_text(entry.description)))
        })
        .collect();
    Ok(response)
}

/// Strings pass through; anything else is rendered as JSON.
fn value_text(value: Option<Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s,
        Some(other) => other.to_string(),
    }
}

fn extract_json_object(text: &str) -> Option<Value> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }

    let candidates = [Some(text), fenced_block(text), outer_braces(text)];
    candidates
        .into_iter()
        .flatten()
        .filter_map(|candidate| serde_json::from_str::<Value>(candidate).ok())
        .find(Value::is_object)
}

/// Contents of the first ``` fence, with an optional `json` tag.
fn fenced_block(text: &str) -> Option<&str> {
    let start = text.find("```")? + 3;
    let rest = &text[start..];
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    let end = rest.find("```")?;
    Some(rest[..end].trim())
}

/// From the first `{` to the last `}`.
fn outer_braces(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

pub(crate) fn preview(text: &str, max_chars: usize) -> String {
    let mut out: String = text.chars().take(max_chars).collect();
    if text.chars().count() > max_chars {
        out.push('…');
    }
    out
}
