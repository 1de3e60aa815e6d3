// Story workflow document: validation, diffing, persistence helpers and
// audited updates.

pub mod diff;
pub mod graph_state;
pub mod serialize;
pub mod update;

pub use diff::{diff_graph_state, diff_values, DiffEntry, DiffKind, StateDiff};
pub use graph_state::{
    create_initial_state, is_valid_graph_state, safe_validate_graph_state,
    story_id_matches_prefix, validate_graph_state, DiffSnapshot, ErrorRecord, GraphState,
    InitialStateParams, ValidationError, ValidationIssue, BLOCKED_FLAG, COMPLETE_FLAG, CURRENT_SCHEMA_VERSION,
    RETRY_FLAG,
};
pub use serialize::{
    clone_state, deserialize_state, safe_deserialize_state, serialize_state,
    serialize_state_pretty, StateSerdeError,
};
pub use update::{advance_state, record_node_failure, StateUpdateError};
