//! Replacement policy table.
//!
//! Maps a changed attribute to the way the backend can apply it: in place
//! (`Update`), only by destroying and recreating the stage (`Replace`), or not
//! at all because the engine does not manage it (`NoOp`).

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

use crate::config::StageKind;
use crate::normalize::{BlockPresence, CanonicalValue, Section, paths};

use super::diff::AttributeChange;

/// Classification of a single attribute change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeAction {
    /// Ignorable drift.
    NoOp,
    /// Applied in place with an alter call.
    Update,
    /// Requires drop and create.
    Replace,
}

/// Aggregate decision over every change of one pass.
///
/// Ordered so that the aggregate is the maximum of its inputs: once any
/// change forces a replace, no in-place alter is attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplacementDecision {
    /// Nothing to do.
    NoOp,
    /// Alter in place.
    Update,
    /// Destroy and recreate.
    Replace,
}

/// Declarative mapping from changed attribute to [`ChangeAction`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplacementPolicy {
    /// Whether the backend can move a stage to another database or schema.
    allow_identifier_move: bool,
}

impl Default for ReplacementPolicy {
    fn default() -> Self {
        Self::new()
    }
}

impl ReplacementPolicy {
    /// Creates the default policy (identifier moves allowed).
    #[must_use]
    pub const fn new() -> Self {
        Self {
            allow_identifier_move: true,
        }
    }

    /// Sets whether database/schema moves are applied in place.
    #[must_use]
    pub const fn with_identifier_move(mut self, allow: bool) -> Self {
        self.allow_identifier_move = allow;
        self
    }

    /// Classifies one change.
    #[must_use]
    pub fn classify(&self, kind: StageKind, change: &AttributeChange) -> ChangeAction {
        let path = change.path.as_str();
        match path {
            paths::NAME => ChangeAction::Update,
            paths::DATABASE | paths::SCHEMA => {
                if self.allow_identifier_move {
                    ChangeAction::Update
                } else {
                    ChangeAction::Replace
                }
            }
            paths::STAGE_KIND | paths::URL | paths::ENDPOINT | paths::CREDENTIAL_METHOD => {
                ChangeAction::Replace
            }
            paths::STORAGE_INTEGRATION | paths::CREDENTIALS => ChangeAction::Update,
            paths::USE_PRIVATELINK_ENDPOINT if kind == StageKind::S3 => ChangeAction::Update,
            paths::DIRECTORY => match change.new {
                CanonicalValue::Block(BlockPresence::Empty) => ChangeAction::Replace,
                _ => ChangeAction::Update,
            },
            paths::COMMENT => ChangeAction::Update,
            _ => match change.path.section() {
                Section::Encryption => ChangeAction::Replace,
                Section::Directory | Section::FileFormat => ChangeAction::Update,
                _ => {
                    debug!("No policy for {path} on {kind} stage; treating change as drift");
                    ChangeAction::NoOp
                }
            },
        }
    }
}

impl ReplacementDecision {
    /// Aggregates classified changes: `Replace` wins over `Update`, which wins over `NoOp`.
    #[must_use]
    pub fn aggregate(changes: &[AttributeChange]) -> Self {
        changes
            .iter()
            .map(|c| Self::from(c.action))
            .max()
            .unwrap_or(Self::NoOp)
    }
}

impl From<ChangeAction> for ReplacementDecision {
    fn from(action: ChangeAction) -> Self {
        match action {
            ChangeAction::NoOp => Self::NoOp,
            ChangeAction::Update => Self::Update,
            ChangeAction::Replace => Self::Replace,
        }
    }
}

impl fmt::Display for ChangeAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::NoOp => "no-op",
            Self::Update => "update",
            Self::Replace => "replace",
        };
        write!(f, "{s}")
    }
}

impl fmt::Display for ReplacementDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::NoOp => "no-op",
            Self::Update => "update",
            Self::Replace => "replace",
        };
        write!(f, "{s}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn change(path: &str, old: CanonicalValue, new: CanonicalValue) -> AttributeChange {
        AttributeChange::new(path.into(), old, new)
    }

    fn text(s: &str) -> CanonicalValue {
        CanonicalValue::text(s)
    }

    #[test]
    fn test_policy_table() {
        let policy = ReplacementPolicy::new();
        let cases = [
            (paths::NAME, ChangeAction::Update),
            (paths::DATABASE, ChangeAction::Update),
            (paths::URL, ChangeAction::Replace),
            (paths::ENDPOINT, ChangeAction::Replace),
            (paths::STAGE_KIND, ChangeAction::Replace),
            (paths::CREDENTIAL_METHOD, ChangeAction::Replace),
            (paths::ENCRYPTION_TYPE, ChangeAction::Replace),
            (paths::ENCRYPTION_KMS_KEY_ID, ChangeAction::Replace),
            (paths::DIRECTORY_ENABLE, ChangeAction::Update),
            (paths::DIRECTORY_AUTO_REFRESH, ChangeAction::Update),
            (paths::DIRECTORY_REFRESH_ON_CREATE, ChangeAction::Update),
            (paths::FILE_FORMAT_KIND, ChangeAction::Update),
            ("file_format.csv.skip_header", ChangeAction::Update),
            (paths::COMMENT, ChangeAction::Update),
            (paths::USE_PRIVATELINK_ENDPOINT, ChangeAction::Update),
            (paths::STORAGE_INTEGRATION, ChangeAction::Update),
            (paths::CREDENTIALS, ChangeAction::Update),
            ("owner", ChangeAction::NoOp),
        ];
        for (path, expected) in cases {
            let actual = policy.classify(StageKind::S3, &change(path, text("a"), text("b")));
            assert_eq!(actual, expected, "classification of {path}");
        }
    }

    #[test]
    fn test_identifier_move_disallowed() {
        let policy = ReplacementPolicy::new().with_identifier_move(false);
        let c = change(paths::SCHEMA, text("A"), text("B"));
        assert_eq!(policy.classify(StageKind::Gcs, &c), ChangeAction::Replace);
        let rename = change(paths::NAME, text("A"), text("B"));
        assert_eq!(policy.classify(StageKind::Gcs, &rename), ChangeAction::Update);
    }

    #[test]
    fn test_directory_block_unset_replaces() {
        let policy = ReplacementPolicy::new();
        let unset = change(
            paths::DIRECTORY,
            CanonicalValue::Block(BlockPresence::Present),
            CanonicalValue::Block(BlockPresence::Empty),
        );
        assert_eq!(policy.classify(StageKind::S3, &unset), ChangeAction::Replace);

        let set = change(
            paths::DIRECTORY,
            CanonicalValue::Block(BlockPresence::Empty),
            CanonicalValue::Block(BlockPresence::Present),
        );
        assert_eq!(policy.classify(StageKind::S3, &set), ChangeAction::Update);
    }

    #[test]
    fn test_aggregate_is_monotonic() {
        let mut changes = vec![
            change(paths::COMMENT, text("a"), text("b")).classified(ChangeAction::Update),
            change("owner", text("a"), text("b")).classified(ChangeAction::NoOp),
        ];
        assert_eq!(ReplacementDecision::aggregate(&changes), ReplacementDecision::Update);

        changes.push(change(paths::URL, text("a"), text("b")).classified(ChangeAction::Replace));
        assert_eq!(ReplacementDecision::aggregate(&changes), ReplacementDecision::Replace);
        assert_eq!(ReplacementDecision::aggregate(&[]), ReplacementDecision::NoOp);
    }
}
