// Structural diff between two state documents.
//
// Maps are walked key by key; lists and scalars are compared as whole values,
// so appending one evidence ref shows up as a single `changed` entry for
// `evidenceRefs`.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeSet;

use super::graph_state::GraphState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiffKind {
    Changed,
    Added,
    Removed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiffEntry {
    /// Dot-joined key path, e.g. `artifactPaths.storyDoc`.
    pub path: String,
    #[serde(rename = "type")]
    pub kind: DiffKind,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "present_value"
    )]
    pub old_value: Option<Value>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "present_value"
    )]
    pub new_value: Option<Value>,
}

// A present `null` stays `Some(Value::Null)` so snapshots survive a round trip.
fn present_value<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateDiff {
    pub has_changes: bool,
    pub changed: Vec<DiffEntry>,
    pub added: Vec<DiffEntry>,
    pub removed: Vec<DiffEntry>,
    pub total_diffs: usize,
}

impl StateDiff {
    /// All entries, changed first, then added, then removed.
    pub fn entries(&self) -> impl Iterator<Item = &DiffEntry> {
        self.changed
            .iter()
            .chain(self.added.iter())
            .chain(self.removed.iter())
    }

    pub fn touches(&self, path: &str) -> bool {
        self.entries().any(|entry| entry.path == path)
    }

    fn finish(mut self) -> Self {
        self.total_diffs = self.changed.len() + self.added.len() + self.removed.len();
        self.has_changes = self.total_diffs > 0;
        self
    }
}

/// Compare two documents field by field.
pub fn diff_graph_state(before: &GraphState, after: &GraphState) -> StateDiff {
    let before = serde_json::to_value(before).unwrap_or_default();
    let after = serde_json::to_value(after).unwrap_or_default();
    diff_values(&before, &after)
}

/// Compare two arbitrary JSON documents with the same rules as
/// [`diff_graph_state`]. Non-object roots compare as a single value at the
/// empty path.
pub fn diff_values(before: &Value, after: &Value) -> StateDiff {
    let mut diff = StateDiff::default();
    match (before, after) {
        (Value::Object(old), Value::Object(new)) => walk("", old, new, &mut diff),
        (old, new) if old != new => diff.changed.push(changed_entry(String::new(), old, new)),
        _ => {}
    }
    diff.finish()
}

fn walk(prefix: &str, before: &Map<String, Value>, after: &Map<String, Value>, diff: &mut StateDiff) {
    let keys: BTreeSet<&String> = before.keys().chain(after.keys()).collect();

    for key in keys {
        let path = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{prefix}.{key}")
        };

        match (before.get(key), after.get(key)) {
            (None, Some(new)) => diff.added.push(DiffEntry {
                path,
                kind: DiffKind::Added,
                old_value: None,
                new_value: Some(new.clone()),
            }),
            (Some(old), None) => diff.removed.push(DiffEntry {
                path,
                kind: DiffKind::Removed,
                old_value: Some(old.clone()),
                new_value: None,
            }),
            (Some(Value::Object(old)), Some(Value::Object(new))) => walk(&path, old, new, diff),
            (Some(old), Some(new)) => {
                if old != new {
                    diff.changed.push(changed_entry(path, old, new));
                }
            }
            (None, None) => {}
        }
    }
}

fn changed_entry(path: String, old: &Value, new: &Value) -> DiffEntry {
    DiffEntry {
        path,
        kind: DiffKind::Changed,
        old_value: Some(old.clone()),
        new_value: Some(new.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::graph_state::{create_initial_state, InitialStateParams};
    use serde_json::json;

    fn base_state() -> GraphState {
        create_initial_state(InitialStateParams::new("wrkf", "wrkf-1010")).unwrap()
    }

    #[test]
    fn test_identical_states_have_no_changes() {
        let state = base_state();
        let diff = diff_graph_state(&state, &state.clone());

        assert!(!diff.has_changes);
        assert_eq!(diff.total_diffs, 0);
    }

    #[test]
    fn test_nested_map_keys_get_dotted_paths() {
        let before = base_state();
        let mut after = before.clone();
        after
            .artifact_paths
            .insert("storyDoc".to_string(), "plans/wrkf-1010.md".to_string());

        let diff = diff_graph_state(&before, &after);

        assert!(diff.has_changes);
        assert_eq!(diff.added.len(), 1);
        assert_eq!(diff.added[0].path, "artifactPaths.storyDoc");
        assert_eq!(diff.added[0].new_value, Some(json!("plans/wrkf-1010.md")));
        assert_eq!(diff.added[0].old_value, None);
    }

    #[test]
    fn test_list_append_is_one_whole_value_change() {
        let mut before = base_state();
        before.evidence_refs.push("evidence/a.json".to_string());
        let mut after = before.clone();
        after.evidence_refs.push("evidence/b.json".to_string());

        let diff = diff_graph_state(&before, &after);

        assert_eq!(diff.total_diffs, 1);
        assert_eq!(diff.changed[0].path, "evidenceRefs");
        assert_eq!(diff.changed[0].old_value, Some(json!(["evidence/a.json"])));
        assert_eq!(
            diff.changed[0].new_value,
            Some(json!(["evidence/a.json", "evidence/b.json"]))
        );
    }

    #[test]
    fn test_changed_added_and_removed_are_counted() {
        let before = json!({ "a": 1, "b": { "c": true, "d": "x" }, "gone": null });
        let after = json!({ "a": 2, "b": { "c": true, "e": "y" }, "new": [] });

        let diff = diff_values(&before, &after);

        assert_eq!(diff.changed.len(), 1);
        assert_eq!(diff.changed[0].path, "a");
        assert!(diff.touches("b.e"));
        assert!(diff.touches("new"));
        assert!(diff.touches("b.d"));
        assert!(diff.touches("gone"));
        assert_eq!(diff.removed.len(), 2);
        assert_eq!(diff.total_diffs, 5);
        assert!(diff.has_changes);
    }

    #[test]
    fn test_map_replaced_by_scalar_is_a_change() {
        let diff = diff_values(&json!({ "x": { "y": 1 } }), &json!({ "x": 3 }));
        assert_eq!(diff.changed.len(), 1);
        assert_eq!(diff.changed[0].path, "x");
    }

    #[test]
    fn test_null_values_survive_snapshot_round_trip() {
        let diff = diff_values(&json!({ "gone": null }), &json!({}));
        let encoded = serde_json::to_string(&diff).unwrap();
        let decoded: StateDiff = serde_json::from_str(&encoded).unwrap();

        assert_eq!(decoded, diff);
        assert_eq!(decoded.removed[0].old_value, Some(Value::Null));
    }
}
