//! State types for tracking reconciled stages.
//!
//! The state file maps each manifest entry (by logical id) to the remote
//! object it was last reconciled into. Without it a rename would look like a
//! delete plus a create.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::planner::PlanAction;
use crate::remote::StageIdentity;

/// Current version of the state format.
pub const STATE_VERSION: &str = "1.0";

/// Maximum number of history entries kept.
const MAX_HISTORY: usize = 100;

/// The complete reconcile state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcileState {
    /// State format version.
    pub version: String,
    /// Stage records keyed by logical id.
    #[serde(default)]
    pub stages: BTreeMap<String, StageRecord>,
    /// When the state was last updated.
    pub last_updated: DateTime<Utc>,
    /// Recent operations, oldest first.
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
    /// Replaced objects a failed apply did not get to drop.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub retired: Vec<StageIdentity>,
}

/// What is known about one reconciled stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageRecord {
    /// Remote identity, including secret fingerprints.
    pub identity: StageIdentity,
    /// Hash of the desired document last applied.
    pub config_hash: String,
    /// Action of the last successful pass.
    pub last_action: PlanAction,
    /// When the record was last written.
    pub updated_at: DateTime<Utc>,
}

/// One history entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// When the operation ran.
    pub timestamp: DateTime<Utc>,
    /// Operation kind.
    pub operation: StateOperation,
    /// Logical ids involved.
    pub stages: Vec<String>,
    /// Whether every stage succeeded.
    pub success: bool,
    /// Error summary if not.
    #[serde(default)]
    pub error: Option<String>,
}

/// Operation recorded in history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StateOperation {
    /// `stagectl apply`
    Apply,
    /// Removal of stages no longer in the manifest.
    Prune,
    /// `stagectl destroy`
    Destroy,
}

impl Default for ReconcileState {
    fn default() -> Self {
        Self::new()
    }
}

impl ReconcileState {
    /// Creates an empty state.
    #[must_use]
    pub fn new() -> Self {
        Self {
            version: String::from(STATE_VERSION),
            stages: BTreeMap::new(),
            last_updated: Utc::now(),
            history: Vec::new(),
            retired: Vec::new(),
        }
    }

    /// Gets the identity recorded for a logical id.
    #[must_use]
    pub fn identity(&self, logical_id: &str) -> Option<&StageIdentity> {
        self.stages.get(logical_id).map(|r| &r.identity)
    }

    /// Records a successful pass.
    pub fn record(
        &mut self,
        logical_id: &str,
        identity: StageIdentity,
        config_hash: &str,
        action: PlanAction,
    ) {
        let now = Utc::now();
        self.stages.insert(
            logical_id.to_string(),
            StageRecord {
                identity,
                config_hash: config_hash.to_string(),
                last_action: action,
                updated_at: now,
            },
        );
        self.last_updated = now;
    }

    /// Records what a partially applied plan left behind.
    ///
    /// The record follows the stage to `identity`, or is removed when the
    /// stage was dropped. Its config hash is kept so the stage still shows as
    /// edited. Objects the plan did not get to drop are retired.
    pub fn record_partial(
        &mut self,
        logical_id: &str,
        identity: Option<StageIdentity>,
        pending_drops: &[StageIdentity],
        action: PlanAction,
    ) {
        match identity {
            Some(identity) => {
                let config_hash = self
                    .stages
                    .get(logical_id)
                    .map(|r| r.config_hash.clone())
                    .unwrap_or_default();
                self.record(logical_id, identity, &config_hash, action);
            }
            None => {
                self.remove(logical_id);
            }
        }
        for dropped in pending_drops {
            self.retire(dropped.clone());
        }
    }

    /// Remembers a replaced object that still has to be dropped.
    pub fn retire(&mut self, identity: StageIdentity) {
        if !self.retired.iter().any(|r| r.same_object(&identity)) {
            self.retired.push(identity);
            self.last_updated = Utc::now();
        }
    }

    /// Removes a record.
    pub fn remove(&mut self, logical_id: &str) -> Option<StageRecord> {
        let removed = self.stages.remove(logical_id);
        if removed.is_some() {
            self.last_updated = Utc::now();
        }
        removed
    }

    /// Returns logical ids recorded in state but absent from `wanted`.
    #[must_use]
    pub fn orphans<'a>(&'a self, wanted: &[String]) -> Vec<&'a str> {
        self.stages
            .keys()
            .filter(|id| !wanted.contains(id))
            .map(String::as_str)
            .collect()
    }

    /// Adds a history entry, dropping the oldest beyond the limit.
    pub fn add_history(&mut self, entry: HistoryEntry) {
        if self.history.len() >= MAX_HISTORY {
            self.history.remove(0);
        }
        self.history.push(entry);
    }
}

impl HistoryEntry {
    /// Creates a successful history entry.
    #[must_use]
    pub fn new(operation: StateOperation, stages: Vec<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            operation,
            stages,
            success: true,
            error: None,
        }
    }

    /// Creates a failed history entry.
    #[must_use]
    pub fn failed(operation: StateOperation, stages: Vec<String>, error: &str) -> Self {
        Self {
            success: false,
            error: Some(error.to_string()),
            ..Self::new(operation, stages)
        }
    }
}

impl std::fmt::Display for StateOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let op = match self {
            Self::Apply => "apply",
            Self::Prune => "prune",
            Self::Destroy => "destroy",
        };
        write!(f, "{op}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::QualifiedName;

    fn identity() -> StageIdentity {
        StageIdentity::new(String::from("obj-1"), QualifiedName::new("DB", "SC", "ST"))
    }

    #[test]
    fn test_record_and_lookup() {
        let mut state = ReconcileState::new();
        state.record("db.sc.st", identity(), "abc", PlanAction::Create);
        assert_eq!(state.identity("db.sc.st").map(|i| i.object_id.as_str()), Some("obj-1"));
        assert!(state.identity("other").is_none());
    }

    #[test]
    fn test_orphans() {
        let mut state = ReconcileState::new();
        state.record("a", identity(), "h", PlanAction::Create);
        state.record("b", identity(), "h", PlanAction::Create);
        assert_eq!(state.orphans(&[String::from("a")]), vec!["b"]);
    }

    #[test]
    fn test_record_partial_follows_identity() {
        let mut state = ReconcileState::new();
        state.record("st", identity(), "h1", PlanAction::Create);

        let replacement =
            StageIdentity::new(String::from("obj-2"), QualifiedName::new("DB", "SC", "ST_EU"));
        state.record_partial("st", Some(replacement), &[identity()], PlanAction::Replace);
        state.record_partial("st", None, &[identity()], PlanAction::Replace);

        assert!(state.identity("st").is_none());
        assert_eq!(state.retired, vec![identity()]);
    }

    #[test]
    fn test_record_partial_keeps_config_hash() {
        let mut state = ReconcileState::new();
        state.record("st", identity(), "h1", PlanAction::Create);
        let renamed =
            StageIdentity::new(String::from("obj-1"), QualifiedName::new("DB", "SC", "ST_V2"));
        state.record_partial("st", Some(renamed.clone()), &[], PlanAction::Update);

        assert_eq!(state.identity("st"), Some(&renamed));
        assert_eq!(state.stages["st"].config_hash, "h1");
        assert!(state.retired.is_empty());
    }

    #[test]
    fn test_history_is_bounded() {
        let mut state = ReconcileState::new();
        for i in 0..(MAX_HISTORY + 5) {
            state.add_history(HistoryEntry::new(StateOperation::Apply, vec![i.to_string()]));
        }
        assert_eq!(state.history.len(), MAX_HISTORY);
        assert_eq!(state.history[0].stages, vec![String::from("5")]);
    }
}
