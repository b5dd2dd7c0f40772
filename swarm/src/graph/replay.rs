//! Determinism utilities: transcript projection, hashing, first-diff.
//!
//! Replay comparison works over canonical bytes, never over parsed
//! structure: two runs are equivalent iff their projected transcripts
//! and final state snapshots hash identically.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::canonical::{canonical_hash, hex_digest, to_canonical_json};
use crate::error::{Error, ResumeError, Result};
use crate::value::Value;

/// One projected event of a workflow run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptEvent {
    /// Position in the run's total order.
    pub sequence: u64,
    /// Event kind (`workflow_started`, `step_completed`, …).
    pub kind: String,
    /// The step the event concerns, when any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step: Option<String>,
    /// Event payload.
    pub payload: Value,
    /// Schema marker carried by every persisted event.
    pub schema_version: String,
}

impl TranscriptEvent {
    fn project(&self) -> Value {
        json!({
            "sequence": self.sequence,
            "kind": self.kind,
            "step": self.step,
            "payload": self.payload,
            "schema_version": self.schema_version,
        })
    }
}

/// Project events into canonical values, refusing cross-version replay.
///
/// # Errors
///
/// [`ResumeError::IncompatibleSchemaVersion`] when any event carries a
/// different schema version.
pub fn project_transcript(
    events: &[TranscriptEvent],
    expected_version: &str,
) -> Result<Vec<Value>> {
    for event in events {
        if event.schema_version != expected_version {
            return Err(Error::from(ResumeError::IncompatibleSchemaVersion {
                expected: expected_version.to_owned(),
                found: event.schema_version.clone(),
            }));
        }
    }
    Ok(events.iter().map(TranscriptEvent::project).collect())
}

/// A stable hash over the canonical projection of `events`.
///
/// # Errors
///
/// See [`project_transcript`].
pub fn transcript_hash(events: &[TranscriptEvent], expected_version: &str) -> Result<String> {
    let projected = project_transcript(events, expected_version)?;
    let mut bytes = Vec::new();
    for value in &projected {
        bytes.extend_from_slice(to_canonical_json(value).as_bytes());
        bytes.push(b'\n');
    }
    Ok(hex_digest(&bytes))
}

/// A stable hash over a final state snapshot.
#[must_use]
pub fn final_state_hash(snapshot: &BTreeMap<String, Value>) -> String {
    let object: Value = Value::Object(
        snapshot
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect(),
    );
    canonical_hash(&object)
}

/// The first divergence between two transcripts.
#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptDiff {
    /// Index of the first divergent event.
    pub index: usize,
    /// The expected event at that index, when present.
    pub expected: Option<TranscriptEvent>,
    /// The actual event at that index, when present.
    pub actual: Option<TranscriptEvent>,
}

/// Find the first divergent event between `expected` and `actual`.
///
/// Returns `None` when the transcripts are identical, including length.
#[must_use]
pub fn first_diff(
    expected: &[TranscriptEvent],
    actual: &[TranscriptEvent],
) -> Option<TranscriptDiff> {
    let longest = expected.len().max(actual.len());
    for index in 0..longest {
        let e = expected.get(index);
        let a = actual.get(index);
        if e != a {
            return Some(TranscriptDiff {
                index,
                expected: e.cloned(),
                actual: a.cloned(),
            });
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::checkpoint::EVENT_SCHEMA_VERSION;

    fn event(sequence: u64, kind: &str, step: Option<&str>) -> TranscriptEvent {
        TranscriptEvent {
            sequence,
            kind: kind.to_owned(),
            step: step.map(str::to_owned),
            payload: json!({"output": "x"}),
            schema_version: EVENT_SCHEMA_VERSION.to_owned(),
        }
    }

    #[test]
    fn identical_transcripts_hash_identically() {
        let a = vec![event(0, "workflow_started", None), event(1, "step_completed", Some("t"))];
        let b = vec![event(0, "workflow_started", None), event(1, "step_completed", Some("t"))];
        assert_eq!(
            transcript_hash(&a, EVENT_SCHEMA_VERSION).expect("hash"),
            transcript_hash(&b, EVENT_SCHEMA_VERSION).expect("hash")
        );
        assert!(first_diff(&a, &b).is_none());
    }

    #[test]
    fn cross_version_replay_is_refused() {
        let mut bad = event(0, "workflow_started", None);
        bad.schema_version = "hsw.v0".to_owned();
        let err = project_transcript(&[bad], EVENT_SCHEMA_VERSION).expect_err("version gate");
        assert!(err.to_string().contains("hsw.v0"));
    }

    #[test]
    fn first_diff_points_at_the_divergence() {
        let a = vec![event(0, "workflow_started", None), event(1, "step_completed", Some("t"))];
        let mut b = a.clone();
        b[1].step = Some("other".to_owned());
        let diff = first_diff(&a, &b).expect("divergent");
        assert_eq!(diff.index, 1);
        assert_eq!(diff.expected.expect("present").step.as_deref(), Some("t"));
    }

    #[test]
    fn length_mismatch_is_a_diff() {
        let a = vec![event(0, "workflow_started", None)];
        let b: Vec<TranscriptEvent> = Vec::new();
        let diff = first_diff(&a, &b).expect("shorter actual");
        assert_eq!(diff.index, 0);
        assert!(diff.actual.is_none());
    }

    #[test]
    fn final_state_hash_is_order_independent() {
        let mut a = BTreeMap::new();
        a.insert("x".to_owned(), json!(1));
        a.insert("y".to_owned(), json!("s"));
        let mut b = BTreeMap::new();
        b.insert("y".to_owned(), json!("s"));
        b.insert("x".to_owned(), json!(1));
        assert_eq!(final_state_hash(&a), final_state_hash(&b));
    }
}
