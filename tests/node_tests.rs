//! Integration tests for workflow nodes
//!
//! Chains nodes over one story document the way a workflow graph would and
//! checks what ends up in the audit trail.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use story_orchestrator::node::{create_node, create_simple_node};
use story_orchestrator::retry::{NodeError, NodeRetryConfig};
use story_orchestrator::state::{
    create_initial_state, deserialize_state, serialize_state, GraphState, InitialStateParams,
};

fn initial() -> GraphState {
    create_initial_state(InitialStateParams::new("wrkf", "wrkf-1021")).unwrap()
}

#[tokio::test(start_paused = true)]
async fn test_transient_failure_retries_then_succeeds() {
    let calls = Arc::new(AtomicU32::new(0));
    let counter = calls.clone();
    let node = create_node(
        "fetch-story",
        NodeRetryConfig::default().with_max_attempts(2).with_jitter(0.0),
        move |mut state: GraphState| {
            let call = counter.fetch_add(1, Ordering::SeqCst);
            async move {
                if call == 0 {
                    return Err(NodeError::failure("ECONNRESET"));
                }
                state
                    .artifact_paths
                    .insert("storyDoc".to_string(), "plans/wrkf-1021.md".to_string());
                Ok(Some(state))
            }
        },
    )
    .unwrap();

    let started = tokio::time::Instant::now();
    let next = node.run(&initial()).await.unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert!(started.elapsed() >= std::time::Duration::from_millis(1000));
    assert_eq!(
        next.artifact_paths.get("storyDoc").map(String::as_str),
        Some("plans/wrkf-1021.md")
    );
    assert!(next.errors.is_empty());
}

#[tokio::test]
async fn test_pipeline_history_and_failure_survive_round_trip() {
    let seed = create_simple_node("seed", |mut state: GraphState| async move {
        state.routing_flags.insert("proceed".to_string(), true);
        state.evidence_refs.push("evidence/seed.md".to_string());
        Ok(Some(state))
    })
    .unwrap();
    let review = create_simple_node("review", |_state: GraphState| async move {
        Err::<Option<GraphState>, _>(NodeError::circuit_open("llm-provider"))
    })
    .unwrap();

    let after_seed = seed.run(&initial()).await.unwrap();
    let after_review = review.run(&after_seed).await.unwrap();

    assert!(after_review.is_blocked());
    assert_eq!(after_review.errors.len(), 1);
    assert_eq!(after_review.errors[0].node_id, "review");
    assert_eq!(after_review.errors[0].code.as_deref(), Some("CIRCUIT_OPEN"));

    let nodes: Vec<Option<&str>> = after_review
        .state_history
        .iter()
        .map(|snapshot| snapshot.node_name.as_deref())
        .collect();
    assert_eq!(nodes, vec![Some("seed"), Some("review")]);

    let reloaded = deserialize_state(&serialize_state(&after_review).unwrap()).unwrap();
    assert_eq!(reloaded, after_review);
}
