//! Integration tests for the story state document
//!
//! Covers creation, validation, persistence round trips and the audited
//! update path that ties node failures back into the document.

use serde_json::json;
use std::sync::Arc;

use story_orchestrator::retry::{with_node_retry, InstantSleeper, NodeError, NodeRetryConfig, NodeRetryOptions};
use story_orchestrator::state::{
    advance_state, clone_state, create_initial_state, deserialize_state, diff_graph_state,
    is_valid_graph_state, record_node_failure, safe_deserialize_state, safe_validate_graph_state,
    serialize_state, validate_graph_state, DiffKind, GraphState, InitialStateParams,
    StateSerdeError, CURRENT_SCHEMA_VERSION,
};

fn story() -> GraphState {
    create_initial_state(InitialStateParams::new("wrkf", "wrkf-1010")).unwrap()
}

#[test]
fn test_create_initial_state_contract() {
    assert!(create_initial_state(InitialStateParams::new("wrkf", "glry-1010")).is_err());

    let state = story();
    assert_eq!(state.schema_version, CURRENT_SCHEMA_VERSION);
    assert!(state.artifact_paths.is_empty());
    assert!(state.routing_flags.is_empty());
    assert!(state.evidence_refs.is_empty());
    assert!(state.gate_decisions.is_empty());
    assert!(state.errors.is_empty());
    assert!(state.state_history.is_empty());
}

#[test]
fn test_safe_validation_never_panics_on_odd_input() {
    let inputs = [
        json!(null),
        json!(true),
        json!([{ "epicPrefix": "wrkf" }]),
        json!({ "epicPrefix": 1, "storyId": null }),
        json!({ "epicPrefix": "wrkf", "storyId": "wrkf-1", "artifactPaths": [] }),
        json!({ "epicPrefix": "wrkf", "storyId": "wrkf-1", "stateHistory": [{}] }),
    ];
    for input in inputs {
        assert!(safe_validate_graph_state(&input).is_err(), "{input}");
        assert!(!is_valid_graph_state(&input));
    }
}

#[test]
fn test_validation_reports_every_issue_at_once() {
    let err = validate_graph_state(&json!({
        "schemaVersion": "",
        "epicPrefix": "wrkf",
        "storyId": "wrkf-1010",
        "gateDecisions": { "commitment": true },
    }))
    .unwrap_err();

    assert_eq!(err.issues.len(), 2);
    assert!(err.has_issue_at("schemaVersion"));
    assert!(err.has_issue_at("gateDecisions.commitment"));
}

#[test]
fn test_round_trip_preserves_history_and_extras() {
    let current = story();
    let mut candidate = current.clone();
    candidate
        .artifact_paths
        .insert("storyDoc".to_string(), "plans/wrkf-1010.md".to_string());
    candidate.evidence_refs.push("evidence/seed.json".to_string());
    candidate
        .extra
        .insert("readiness".to_string(), json!({ "score": 92, "blockers": [] }));
    let advanced = advance_state(&current, candidate, Some("seed")).unwrap();

    let json = serialize_state(&advanced).unwrap();
    let restored = deserialize_state(&json).unwrap();

    assert_eq!(restored, advanced);
    assert!(!diff_graph_state(&advanced, &clone_state(&advanced).unwrap()).has_changes);
}

#[test]
fn test_safe_deserialize_separates_syntax_from_schema() {
    assert!(matches!(
        safe_deserialize_state("{\"epicPrefix\":"),
        Err(StateSerdeError::Syntax(_))
    ));
    assert!(matches!(
        safe_deserialize_state(r#"{"epicPrefix":"wrkf"}"#),
        Err(StateSerdeError::Schema(_))
    ));
}

#[test]
fn test_diff_walks_maps_and_replaces_lists() {
    let before = story();
    let mut after = before.clone();
    after.routing_flags.insert("proceed".to_string(), true);
    after.evidence_refs.push("evidence/qa.json".to_string());
    after
        .extra
        .insert("storyDomain".to_string(), json!("workflow"));

    let diff = diff_graph_state(&before, &after);

    assert_eq!(diff.total_diffs, 3);
    let added: Vec<_> = diff.added.iter().map(|e| e.path.as_str()).collect();
    assert_eq!(added, vec!["routingFlags.proceed", "storyDomain"]);
    assert_eq!(diff.changed.len(), 1);
    assert_eq!(diff.changed[0].path, "evidenceRefs");
    assert_eq!(diff.changed[0].kind, DiffKind::Changed);
    assert_eq!(diff.changed[0].new_value, Some(json!(["evidence/qa.json"])));
}

#[tokio::test]
async fn test_exhausted_node_is_recorded_as_blocking_error() {
    let options = NodeRetryOptions::new("fanout-ux", NodeRetryConfig::tool().with_jitter(0.0))
        .with_sleeper(Arc::new(InstantSleeper::new()));

    let failure = with_node_retry(
        || async { Err::<(), _>(NodeError::failure("ETIMEDOUT reading from provider")) },
        &options,
    )
    .await
    .unwrap_err();
    assert_eq!(failure.attempts, 2);

    let state = story();
    let blocked = record_node_failure(&state, &failure).unwrap();

    assert!(blocked.is_blocked());
    let record = &blocked.errors[0];
    assert_eq!(record.node_id, "fanout-ux");
    assert_eq!(record.code.as_deref(), Some("NETWORK_ERROR"));
    assert!(record.recoverable);
    assert_eq!(blocked.state_history.len(), 1);
    assert_eq!(
        blocked.state_history[0].node_name.as_deref(),
        Some("fanout-ux")
    );

    let restored = deserialize_state(&serialize_state(&blocked).unwrap()).unwrap();
    assert_eq!(restored, blocked);
}
