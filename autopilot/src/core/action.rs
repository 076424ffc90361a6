//! The action protocol spoken between the model and the workspace.
//!
//! Model replies are free text that should contain JSON. This module extracts
//! that JSON, classifies it as a plan or an action batch, and validates every
//! batch entry against `schemas/action.schema.json`. Malformed entries are
//! collected as rejections and never reach execution; the valid remainder of the
//! batch is kept.

use std::sync::LazyLock;

use jsonschema::{Draft, Validator};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

const ACTION_SCHEMA: &str = include_str!("../../schemas/action.schema.json");

const KNOWN_TAGS: [&str; 6] = [
    "read_file",
    "write_file",
    "edit_file",
    "run_command",
    "commit",
    "done",
];

static ACTION_VALIDATOR: LazyLock<Validator> = LazyLock::new(|| {
    let schema: Value = serde_json::from_str(ACTION_SCHEMA).expect("action schema should be JSON");
    jsonschema::options()
        .with_draft(Draft::Draft202012)
        .build(&schema)
        .expect("action schema should compile")
});

static JSON_FENCE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```json\s*(.*?)```").expect("json fence regex"));
static ANY_FENCE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```[A-Za-z0-9_-]*\s*(.*?)```").expect("fence regex"));

/// One operation requested by the model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Action {
    ReadFile {
        path: String,
    },
    WriteFile {
        path: String,
        content: String,
    },
    EditFile {
        path: String,
        search: String,
        replace: String,
    },
    RunCommand {
        command: String,
    },
    Commit {
        message: String,
    },
    Done {
        #[serde(default)]
        summary: String,
    },
    /// A tag outside the protocol vocabulary.
    #[serde(skip)]
    Unknown { tag: String },
}

impl Action {
    /// Parse one batch entry.
    ///
    /// Returns `Ok(Action::Unknown)` for unrecognized tags and `Err` with a
    /// diagnostic for entries that are not objects, lack a tag, or fail the schema.
    pub fn from_value(value: &Value) -> Result<Self, String> {
        let Some(obj) = value.as_object() else {
            return Err("entry is not a JSON object".to_string());
        };
        let Some(tag) = obj.get("action").and_then(Value::as_str) else {
            return Err("missing string field \"action\"".to_string());
        };
        if !KNOWN_TAGS.contains(&tag) {
            return Ok(Self::Unknown {
                tag: tag.to_string(),
            });
        }
        let errors: Vec<String> = ACTION_VALIDATOR
            .iter_errors(value)
            .map(|err| err.to_string())
            .collect();
        if !errors.is_empty() {
            return Err(format!("{tag}: {}", errors.join("; ")));
        }
        serde_json::from_value(value.clone()).map_err(|err| format!("{tag}: {err}"))
    }

    pub fn tag(&self) -> &str {
        match self {
            Self::ReadFile { .. } => "read_file",
            Self::WriteFile { .. } => "write_file",
            Self::EditFile { .. } => "edit_file",
            Self::RunCommand { .. } => "run_command",
            Self::Commit { .. } => "commit",
            Self::Done { .. } => "done",
            Self::Unknown { tag } => tag,
        }
    }
}

/// A batch entry that was discarded before execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejected {
    /// Zero-based position in the model's array.
    pub index: usize,
    pub reason: String,
}

/// The executable part of one model turn, plus what was discarded.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ActionBatch {
    pub actions: Vec<Action>,
    pub rejected: Vec<Rejected>,
}

impl ActionBatch {
    pub fn from_values(values: &[Value]) -> Self {
        let mut batch = Self::default();
        for (index, value) in values.iter().enumerate() {
            match Action::from_value(value) {
                Ok(Action::Unknown { tag }) => batch.rejected.push(Rejected {
                    index,
                    reason: format!("unknown action \"{tag}\""),
                }),
                Ok(action) => batch.actions.push(action),
                Err(reason) => batch.rejected.push(Rejected { index, reason }),
            }
        }
        batch
    }

    pub fn has_valid(&self) -> bool {
        !self.actions.is_empty()
    }

    /// Feedback lines describing the rejected entries.
    pub fn rejection_notes(&self) -> Vec<String> {
        self.rejected
            .iter()
            .map(|r| format!("[error] action #{} rejected: {}", r.index + 1, r.reason))
            .collect()
    }
}

/// The model's initial plan: intent plus files it wants to see.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plan {
    pub summary: String,
    pub files_to_read: Vec<String>,
}

/// Classification of one model reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Plan(Plan),
    Actions(ActionBatch),
    Unparseable { reason: String },
}

/// Classify a raw model reply.
pub fn parse_reply(text: &str) -> Reply {
    if text.trim().is_empty() {
        return Reply::Unparseable {
            reason: "empty response".to_string(),
        };
    }
    let Some(value) = extract_json(text) else {
        return Reply::Unparseable {
            reason: "no JSON found in response".to_string(),
        };
    };
    match &value {
        Value::Array(items) => Reply::Actions(ActionBatch::from_values(items)),
        Value::Object(obj) if obj.contains_key("plan") => Reply::Plan(plan_from(obj)),
        Value::Object(obj) => match obj.get("actions") {
            Some(Value::Array(items)) => Reply::Actions(ActionBatch::from_values(items)),
            _ if obj.contains_key("action") => {
                Reply::Actions(ActionBatch::from_values(std::slice::from_ref(&value)))
            }
            _ => Reply::Unparseable {
                reason: "expected a plan object or an array of actions".to_string(),
            },
        },
        _ => Reply::Unparseable {
            reason: "expected a plan object or an array of actions".to_string(),
        },
    }
}

fn plan_from(obj: &serde_json::Map<String, Value>) -> Plan {
    let summary = match obj.get("plan") {
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => String::new(),
    };
    let files_to_read = obj
        .get("files_to_read")
        .and_then(Value::as_array)
        .map(|files| {
            files
                .iter()
                .filter_map(Value::as_str)
                .map(str::trim)
                .filter(|f| !f.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();
    Plan {
        summary,
        files_to_read,
    }
}

/// Pull a JSON value out of model text.
///
/// Tries, in order: a ```json fence, any fence, the whole text, and finally the
/// widest bracketed span.
pub fn extract_json(text: &str) -> Option<Value> {
    for re in [&*JSON_FENCE_RE, &*ANY_FENCE_RE] {
        if let Some(value) = re
            .captures_iter(text)
            .filter_map(|caps| caps.get(1))
            .find_map(|m| serde_json::from_str(m.as_str().trim()).ok())
        {
            return Some(value);
        }
    }
    if let Ok(value) = serde_json::from_str(text.trim()) {
        return Some(value);
    }
    bracketed_span(text).and_then(|span| serde_json::from_str(span).ok())
}

fn bracketed_span(text: &str) -> Option<&str> {
    let start = text.find(['[', '{'])?;
    let close = if text[start..].starts_with('[') {
        ']'
    } else {
        '}'
    };
    let end = text.rfind(close)?;
    (end > start).then(|| &text[start..=end])
}

/// The JSON Schema describing a single action, as shown to the model.
pub fn action_schema() -> &'static str {
    ACTION_SCHEMA
}
