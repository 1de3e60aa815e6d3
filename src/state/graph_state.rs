// Versioned workflow document for a single story, plus its validator.
//
// Input arrives untyped (deserialized JSON, form data) and is checked field by
// field so that callers get every problem at once, each tagged with the path
// that caused it.

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use thiserror::Error;

use super::diff::StateDiff;

/// Document format written by this crate.
pub const CURRENT_SCHEMA_VERSION: &str = "1.0.0";

/// Routing flag raised when a node gives up on the story.
pub const BLOCKED_FLAG: &str = "blocked";

/// Routing flag raised when the workflow has finished. Excludes `retry` and
/// `blocked`.
pub const COMPLETE_FLAG: &str = "complete";

/// Routing flag asking for the node to be run again.
pub const RETRY_FLAG: &str = "retry";

fn default_schema_version() -> String {
    CURRENT_SCHEMA_VERSION.to_string()
}

/// A failure captured into the document after a node gave up.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorRecord {
    pub node_id: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
    #[serde(default)]
    pub recoverable: bool,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// One audit-trail entry: the diff produced by a single state replacement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiffSnapshot {
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_name: Option<String>,
    pub diff: StateDiff,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Workflow progress for one story.
///
/// Fields this crate does not know about are kept in `extra` so they survive
/// diffing and serialization untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphState {
    #[serde(default = "default_schema_version")]
    pub schema_version: String,
    pub epic_prefix: String,
    pub story_id: String,
    #[serde(default)]
    pub artifact_paths: BTreeMap<String, String>,
    #[serde(default)]
    pub routing_flags: BTreeMap<String, bool>,
    #[serde(default)]
    pub evidence_refs: Vec<String>,
    #[serde(default)]
    pub gate_decisions: BTreeMap<String, String>,
    #[serde(default)]
    pub errors: Vec<ErrorRecord>,
    #[serde(default)]
    pub state_history: Vec<DiffSnapshot>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl GraphState {
    /// Value of a routing flag, `false` when unset.
    pub fn routing_flag(&self, name: &str) -> bool {
        self.routing_flags.get(name).copied().unwrap_or(false)
    }

    pub fn is_blocked(&self) -> bool {
        self.routing_flag(BLOCKED_FLAG)
    }
}

/// A single schema violation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationIssue {
    /// Dot-joined path of the offending field; empty for the document root.
    pub path: String,
    pub message: String,
}

impl ValidationIssue {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.path.is_empty() {
            write!(f, "(root): {}", self.message)
        } else {
            write!(f, "{}: {}", self.path, self.message)
        }
    }
}

/// Structured schema failure carrying every issue found.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("GraphState validation failed: {}", render_issues(.issues))]
pub struct ValidationError {
    pub issues: Vec<ValidationIssue>,
}

impl ValidationError {
    pub fn single(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            issues: vec![ValidationIssue::new(path, message)],
        }
    }

    /// Whether any issue points at `path`.
    pub fn has_issue_at(&self, path: &str) -> bool {
        self.issues.iter().any(|issue| issue.path == path)
    }
}

impl From<serde_json::Error> for ValidationError {
    fn from(err: serde_json::Error) -> Self {
        ValidationError::single("", err.to_string())
    }
}

fn render_issues(issues: &[ValidationIssue]) -> String {
    issues
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Parameters for a brand-new document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitialStateParams {
    pub epic_prefix: String,
    pub story_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema_version: Option<String>,
}

impl InitialStateParams {
    pub fn new(epic_prefix: impl Into<String>, story_id: impl Into<String>) -> Self {
        Self {
            epic_prefix: epic_prefix.into(),
            story_id: story_id.into(),
            schema_version: None,
        }
    }

    pub fn with_schema_version(mut self, version: impl Into<String>) -> Self {
        self.schema_version = Some(version.into());
        self
    }
}

/// Build a fresh document with every optional field defaulted.
///
/// Runs the same checks as [`validate_graph_state`], so an empty prefix, a
/// malformed story id or a prefix/id mismatch are rejected here too.
pub fn create_initial_state(params: InitialStateParams) -> Result<GraphState, ValidationError> {
    let candidate = json!({
        "schemaVersion": params
            .schema_version
            .unwrap_or_else(default_schema_version),
        "epicPrefix": params.epic_prefix,
        "storyId": params.story_id,
    });
    validate_graph_state(&candidate)
}

/// Validate untyped input and apply defaults.
pub fn validate_graph_state(input: &Value) -> Result<GraphState, ValidationError> {
    let Some(object) = input.as_object() else {
        return Err(ValidationError::single(
            "",
            format!("expected object, received {}", value_kind(input)),
        ));
    };

    let mut issues = Vec::new();

    if let Some(version) = object.get("schemaVersion") {
        match version.as_str() {
            Some(v) if v.trim().is_empty() => {
                issues.push(ValidationIssue::new("schemaVersion", "must not be empty"))
            }
            Some(_) => {}
            None => issues.push(type_issue("schemaVersion", "string", version)),
        }
    }

    let epic_prefix = required_string(object, "epicPrefix", &mut issues);
    let story_id = required_string(object, "storyId", &mut issues);

    check_map_of(object, "artifactPaths", "string", Value::is_string, &mut issues);
    check_map_of(object, "routingFlags", "boolean", Value::is_boolean, &mut issues);
    check_complete_excludes(object, &mut issues);
    check_map_of(object, "gateDecisions", "string", Value::is_string, &mut issues);
    check_list_of(object, "evidenceRefs", "string", Value::is_string, &mut issues);
    check_records::<ErrorRecord>(object, "errors", &mut issues);
    check_records::<DiffSnapshot>(object, "stateHistory", &mut issues);

    if let (Some(prefix), Some(id)) = (epic_prefix, story_id) {
        if !story_id_matches_prefix(prefix, id) {
            let message = if id.to_lowercase().starts_with(&prefix.to_lowercase()) {
                format!("storyId '{id}' must be '{prefix}-' followed by a number")
            } else {
                format!("storyId '{id}' does not belong to epicPrefix '{prefix}'")
            };
            issues.push(ValidationIssue::new("storyId", message));
        }
    }

    if !issues.is_empty() {
        return Err(ValidationError { issues });
    }

    serde_json::from_value(input.clone()).map_err(ValidationError::from)
}

/// Non-panicking validation of any serializable input (typed structs, maps,
/// raw JSON values).
pub fn safe_validate_graph_state<T>(input: &T) -> Result<GraphState, ValidationError>
where
    T: Serialize + ?Sized,
{
    let value = serde_json::to_value(input)?;
    validate_graph_state(&value)
}

pub fn is_valid_graph_state<T>(input: &T) -> bool
where
    T: Serialize + ?Sized,
{
    safe_validate_graph_state(input).is_ok()
}

/// `storyId` must be `<epicPrefix>-<digits>`, compared case-insensitively.
pub fn story_id_matches_prefix(epic_prefix: &str, story_id: &str) -> bool {
    let pattern = format!(r"(?i)^{}-\d+$", regex::escape(epic_prefix));
    Regex::new(&pattern)
        .map(|re| re.is_match(story_id))
        .unwrap_or(false)
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn type_issue(path: &str, expected: &str, found: &Value) -> ValidationIssue {
    ValidationIssue::new(
        path,
        format!("expected {expected}, received {}", value_kind(found)),
    )
}

fn required_string<'a>(
    object: &'a Map<String, Value>,
    field: &str,
    issues: &mut Vec<ValidationIssue>,
) -> Option<&'a str> {
    match object.get(field) {
        None => {
            issues.push(ValidationIssue::new(field, "required"));
            None
        }
        Some(Value::String(s)) if s.trim().is_empty() => {
            issues.push(ValidationIssue::new(field, "must not be empty"));
            None
        }
        Some(Value::String(s)) => Some(s.as_str()),
        Some(other) => {
            issues.push(type_issue(field, "string", other));
            None
        }
    }
}

fn check_map_of(
    object: &Map<String, Value>,
    field: &str,
    expected: &str,
    accepts: fn(&Value) -> bool,
    issues: &mut Vec<ValidationIssue>,
) {
    let Some(value) = object.get(field) else {
        return;
    };
    match value.as_object() {
        Some(entries) => {
            for (key, entry) in entries {
                if !accepts(entry) {
                    issues.push(type_issue(&format!("{field}.{key}"), expected, entry));
                }
            }
        }
        None => issues.push(type_issue(field, "object", value)),
    }
}

fn check_complete_excludes(object: &Map<String, Value>, issues: &mut Vec<ValidationIssue>) {
    let Some(flags) = object.get("routingFlags").and_then(Value::as_object) else {
        return;
    };
    let raised = |name: &str| flags.get(name).and_then(Value::as_bool).unwrap_or(false);
    if !raised(COMPLETE_FLAG) {
        return;
    }
    for conflicting in [RETRY_FLAG, BLOCKED_FLAG] {
        if raised(conflicting) {
            issues.push(ValidationIssue::new(
                format!("routingFlags.{conflicting}"),
                format!("cannot be set while '{COMPLETE_FLAG}' is set"),
            ));
        }
    }
}

fn check_list_of(
    object: &Map<String, Value>,
    field: &str,
    expected: &str,
    accepts: fn(&Value) -> bool,
    issues: &mut Vec<ValidationIssue>,
) {
    let Some(value) = object.get(field) else {
        return;
    };
    match value.as_array() {
        Some(items) => {
            for (index, item) in items.iter().enumerate() {
                if !accepts(item) {
                    issues.push(type_issue(&format!("{field}.{index}"), expected, item));
                }
            }
        }
        None => issues.push(type_issue(field, "array", value)),
    }
}

fn check_records<T: DeserializeOwned>(
    object: &Map<String, Value>,
    field: &str,
    issues: &mut Vec<ValidationIssue>,
) {
    let Some(value) = object.get(field) else {
        return;
    };
    match value.as_array() {
        Some(items) => {
            for (index, item) in items.iter().enumerate() {
                if let Err(err) = serde_json::from_value::<T>(item.clone()) {
                    issues.push(ValidationIssue::new(
                        format!("{field}.{index}"),
                        err.to_string(),
                    ));
                }
            }
        }
        None => issues.push(type_issue(field, "array", value)),
    }
}
