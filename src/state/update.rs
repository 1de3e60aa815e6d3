// Copy-on-write replacement of the current document, audited through the diff.

use chrono::Utc;
use serde_json::Map;
use thiserror::Error;
use tracing::{debug, info};

use super::diff::diff_graph_state;
use super::graph_state::{
    validate_graph_state, DiffSnapshot, ErrorRecord, GraphState, ValidationError, BLOCKED_FLAG,
    COMPLETE_FLAG,
};
use crate::retry::NodeRetryExhaustedError;

#[derive(Debug, Error)]
pub enum StateUpdateError {
    #[error(transparent)]
    Invalid(#[from] ValidationError),

    #[error("{field} cannot change during an update ('{before}' -> '{after}')")]
    IdentityChanged {
        field: &'static str,
        before: String,
        after: String,
    },
}

/// Accept `candidate` as the next document.
///
/// The candidate is re-validated on its own, must keep the story identity,
/// and gets one [`DiffSnapshot`] appended when it differs from `current`.
/// Neither input is modified.
pub fn advance_state(
    current: &GraphState,
    candidate: GraphState,
    node_name: Option<&str>,
) -> Result<GraphState, StateUpdateError> {
    let value = serde_json::to_value(&candidate).map_err(ValidationError::from)?;
    let mut next = validate_graph_state(&value)?;

    if next.epic_prefix != current.epic_prefix {
        return Err(StateUpdateError::IdentityChanged {
            field: "epicPrefix",
            before: current.epic_prefix.clone(),
            after: next.epic_prefix,
        });
    }
    if next.story_id != current.story_id {
        return Err(StateUpdateError::IdentityChanged {
            field: "storyId",
            before: current.story_id.clone(),
            after: next.story_id,
        });
    }

    let diff = diff_graph_state(current, &next);
    if !diff.has_changes {
        debug!(story.id = %next.story_id, "State advance produced no changes");
        return Ok(next);
    }

    info!(
        story.id = %next.story_id,
        node.name = node_name,
        total_diffs = diff.total_diffs,
        "State advanced"
    );
    next.state_history.push(DiffSnapshot {
        timestamp: Utc::now(),
        node_name: node_name.map(str::to_string),
        diff,
        extra: Map::new(),
    });
    Ok(next)
}

/// Record a node that gave up: append an [`ErrorRecord`], raise the
/// `blocked` routing flag and drop `complete`, which cannot coexist with it.
pub fn record_node_failure(
    state: &GraphState,
    failure: &NodeRetryExhaustedError,
) -> Result<GraphState, StateUpdateError> {
    let mut candidate = state.clone();
    candidate.errors.push(ErrorRecord {
        node_id: failure.node_name.clone(),
        message: failure.last_error.to_string(),
        code: Some(failure.category().code().to_string()),
        stack: None,
        recoverable: failure.classification.is_retryable,
        timestamp: Utc::now(),
        extra: Map::new(),
    });
    candidate.routing_flags.insert(BLOCKED_FLAG.to_string(), true);
    candidate.routing_flags.remove(COMPLETE_FLAG);

    advance_state(state, candidate, Some(&failure.node_name))
}
