// JSON persistence helpers. Every document read back goes through the
// validator; the serialized form has sorted keys.

use serde_json::Value;
use thiserror::Error;

use super::graph_state::{validate_graph_state, GraphState, ValidationError};

#[derive(Debug, Error)]
pub enum StateSerdeError {
    #[error("state JSON could not be parsed: {0}")]
    Syntax(#[from] serde_json::Error),

    #[error(transparent)]
    Schema(#[from] ValidationError),
}

/// Canonical JSON encoding of a document.
pub fn serialize_state(state: &GraphState) -> Result<String, StateSerdeError> {
    let value = serde_json::to_value(state)?;
    Ok(serde_json::to_string(&value)?)
}

/// Same encoding as [`serialize_state`], indented for humans.
pub fn serialize_state_pretty(state: &GraphState) -> Result<String, StateSerdeError> {
    let value = serde_json::to_value(state)?;
    Ok(serde_json::to_string_pretty(&value)?)
}

/// Parse and re-validate a serialized document.
pub fn deserialize_state(json: &str) -> Result<GraphState, StateSerdeError> {
    let value: Value = serde_json::from_str(json)?;
    Ok(validate_graph_state(&value)?)
}

/// Like [`deserialize_state`] but takes raw bytes straight off the wire or
/// disk; invalid UTF-8 is reported as a syntax error instead of panicking.
pub fn safe_deserialize_state(bytes: impl AsRef<[u8]>) -> Result<GraphState, StateSerdeError> {
    let value: Value = serde_json::from_slice(bytes.as_ref())?;
    Ok(validate_graph_state(&value)?)
}

/// Deep copy through the serializer, so the copy passes validation on its own.
pub fn clone_state(state: &GraphState) -> Result<GraphState, StateSerdeError> {
    deserialize_state(&serialize_state(state)?)
}
