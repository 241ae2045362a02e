//! Diff engine for comparing desired vs observed canonical state.
//!
//! The engine walks the union of attribute paths and reports a change only
//! where the values differ under variant-aware equality:
//! - an omitted value equals the backend's documented default
//! - secrets are compared by fingerprint, and only when the observed side has one
//! - a set block equals an observed empty block (its sub-paths carry the difference)
//!
//! Changes come out in canonical path order, so plans are stable across runs.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use tracing::debug;

use crate::config::StageKind;
use crate::normalize::{
    AttributePath, BlockPresence, CanonicalStageView, CanonicalValue, documented_default, paths,
};

use super::policy::{ChangeAction, ReplacementPolicy};

/// Paths carrying the payload of one credential method.
const METHOD_PAYLOAD: &[&str] = &[paths::STORAGE_INTEGRATION, paths::CREDENTIALS];

/// Blocks whose removal is reported as a single change.
const BLOCKS: &[&str] = &[paths::DIRECTORY];

/// One differing attribute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeChange {
    /// Attribute path.
    pub path: AttributePath,
    /// Observed value.
    pub old: CanonicalValue,
    /// Desired value.
    pub new: CanonicalValue,
    /// Policy classification.
    pub action: ChangeAction,
}

/// Engine for computing per-attribute change sets.
#[derive(Debug, Default, Clone, Copy)]
pub struct DiffEngine {
    /// Classification policy.
    policy: ReplacementPolicy,
}

impl AttributeChange {
    /// Creates an unclassified change.
    #[must_use]
    pub const fn new(path: AttributePath, old: CanonicalValue, new: CanonicalValue) -> Self {
        Self {
            path,
            old,
            new,
            action: ChangeAction::NoOp,
        }
    }

    /// Returns the change with the given classification.
    #[must_use]
    pub fn classified(mut self, action: ChangeAction) -> Self {
        self.action = action;
        self
    }

    /// Returns true if the change is not ignorable drift.
    #[must_use]
    pub fn is_actionable(&self) -> bool {
        self.action != ChangeAction::NoOp
    }
}

impl fmt::Display for AttributeChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {} -> {} ({})", self.path, self.old, self.new, self.action)
    }
}

impl DiffEngine {
    /// Creates a diff engine with the default policy.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            policy: ReplacementPolicy::new(),
        }
    }

    /// Creates a diff engine with the given policy.
    #[must_use]
    pub const fn with_policy(policy: ReplacementPolicy) -> Self {
        Self { policy }
    }

    /// Returns the classification policy.
    #[must_use]
    pub const fn policy(&self) -> &ReplacementPolicy {
        &self.policy
    }

    /// Computes the classified changes turning `observed` into `desired`.
    #[must_use]
    pub fn diff(
        &self,
        kind: StageKind,
        desired: &CanonicalStageView,
        observed: &CanonicalStageView,
    ) -> Vec<AttributeChange> {
        let union: BTreeSet<&AttributePath> = desired
            .attributes
            .keys()
            .chain(observed.attributes.keys())
            .collect();

        let mut changes = Vec::new();
        let mut unset_blocks: Vec<&str> = Vec::new();

        for path in union {
            // Paths the desired side does not mention are unmanaged.
            let Some(want) = desired.attributes.get(path) else {
                continue;
            };
            let Some(have) = observed.attributes.get(path) else {
                debug!("{path} not observed; skipping comparison");
                continue;
            };
            if unset_blocks.iter().any(|block| path.is_within(block)) {
                continue;
            }
            if equivalent(kind, path, want, have) {
                continue;
            }
            if BLOCKS.contains(&path.as_str())
                && *want == CanonicalValue::Block(BlockPresence::Empty)
            {
                unset_blocks.push(path.as_str());
            }
            changes.push(AttributeChange::new(path.clone(), have.clone(), want.clone()));
        }

        if changes
            .iter()
            .any(|c| c.path.as_str() == paths::CREDENTIAL_METHOD)
        {
            changes.retain(|c| !METHOD_PAYLOAD.contains(&c.path.as_str()));
        }

        let changes: Vec<AttributeChange> = changes
            .into_iter()
            .map(|c| {
                let action = self.policy.classify(kind, &c);
                c.classified(action)
            })
            .collect();

        debug!("Diff found {} change(s)", changes.len());
        changes
    }
}

/// Variant-aware equality of a desired and an observed value.
fn equivalent(
    kind: StageKind,
    path: &AttributePath,
    desired: &CanonicalValue,
    observed: &CanonicalValue,
) -> bool {
    let default = documented_default(kind, path.as_str());
    let desired = effective(desired, default.as_ref());
    let observed = effective(observed, default.as_ref());

    match (&desired, &observed) {
        (
            CanonicalValue::Block(BlockPresence::Present),
            CanonicalValue::Block(BlockPresence::Empty),
        ) => true,
        (CanonicalValue::Secret(a), CanonicalValue::Secret(b)) => a == b,
        (CanonicalValue::Secret(_), _) | (_, CanonicalValue::Secret(_)) => true,
        (a, b) => a == b,
    }
}

/// Resolves omitted values to the documented default and tri-states to booleans.
fn effective(value: &CanonicalValue, default: Option<&CanonicalValue>) -> CanonicalValue {
    match value {
        CanonicalValue::Unset | CanonicalValue::Tri(crate::config::TriBool::Default) => {
            default.cloned().unwrap_or(CanonicalValue::Unset)
        }
        CanonicalValue::Tri(t) => t.explicit().map_or(CanonicalValue::Unset, CanonicalValue::Bool),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TriBool;
    use crate::normalize::method;

    fn view(kind: StageKind, entries: &[(&str, CanonicalValue)]) -> CanonicalStageView {
        let mut view = CanonicalStageView::new(kind);
        for (path, value) in entries {
            view.insert(path, value.clone());
        }
        view
    }

    fn text(s: &str) -> CanonicalValue {
        CanonicalValue::text(s)
    }

    #[test]
    fn test_identical_views_have_no_changes() {
        let engine = DiffEngine::new();
        let v = view(StageKind::S3, &[(paths::NAME, text("ST")), (paths::URL, text("s3://b/"))]);
        assert!(engine.diff(StageKind::S3, &v, &v).is_empty());
    }

    #[test]
    fn test_unset_equals_documented_default() {
        let engine = DiffEngine::new();
        let desired = view(
            StageKind::S3,
            &[
                (paths::COMMENT, CanonicalValue::Unset),
                (paths::USE_PRIVATELINK_ENDPOINT, CanonicalValue::Tri(TriBool::Default)),
                (paths::ENCRYPTION_TYPE, CanonicalValue::Unset),
            ],
        );
        let observed = view(
            StageKind::S3,
            &[
                (paths::COMMENT, text("")),
                (paths::USE_PRIVATELINK_ENDPOINT, CanonicalValue::Bool(false)),
                (paths::ENCRYPTION_TYPE, text("NONE")),
            ],
        );
        assert!(engine.diff(StageKind::S3, &desired, &observed).is_empty());
    }

    #[test]
    fn test_default_distinct_from_explicit_value() {
        let engine = DiffEngine::new();
        let desired = view(
            StageKind::S3,
            &[(paths::USE_PRIVATELINK_ENDPOINT, CanonicalValue::Tri(TriBool::Default))],
        );
        let observed = view(
            StageKind::S3,
            &[(paths::USE_PRIVATELINK_ENDPOINT, CanonicalValue::Bool(true))],
        );
        let changes = engine.diff(StageKind::S3, &desired, &observed);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].action, ChangeAction::Update);
    }

    #[test]
    fn test_unmanaged_and_unobserved_paths_are_skipped() {
        let engine = DiffEngine::new();
        let desired = view(StageKind::Internal, &[(paths::CREDENTIALS, CanonicalValue::Secret(String::from("fp")))]);
        let observed = view(StageKind::Internal, &[("owner", text("SYSADMIN"))]);
        assert!(engine.diff(StageKind::Internal, &desired, &observed).is_empty());
    }

    #[test]
    fn test_rotated_secret_is_update() {
        let engine = DiffEngine::new();
        let desired = view(StageKind::S3, &[(paths::CREDENTIALS, CanonicalValue::Secret(String::from("new")))]);
        let observed = view(StageKind::S3, &[(paths::CREDENTIALS, CanonicalValue::Secret(String::from("old")))]);
        let changes = engine.diff(StageKind::S3, &desired, &observed);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].action, ChangeAction::Update);
    }

    #[test]
    fn test_method_switch_is_single_change() {
        let engine = DiffEngine::new();
        let desired = view(
            StageKind::S3,
            &[
                (paths::CREDENTIAL_METHOD, text(method::STORAGE_INTEGRATION)),
                (paths::STORAGE_INTEGRATION, text("S3_INT")),
            ],
        );
        let observed = view(
            StageKind::S3,
            &[(paths::CREDENTIAL_METHOD, text(method::CREDENTIALS))],
        );
        let changes = engine.diff(StageKind::S3, &desired, &observed);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].path.as_str(), paths::CREDENTIAL_METHOD);
        assert_eq!(changes[0].action, ChangeAction::Replace);
    }

    #[test]
    fn test_block_present_vs_empty_compares_sub_paths() {
        let engine = DiffEngine::new();
        let desired = view(
            StageKind::S3,
            &[
                (paths::DIRECTORY, CanonicalValue::Block(BlockPresence::Present)),
                (paths::DIRECTORY_ENABLE, CanonicalValue::Bool(true)),
                (paths::DIRECTORY_AUTO_REFRESH, CanonicalValue::Tri(TriBool::False)),
            ],
        );
        let observed = view(
            StageKind::S3,
            &[
                (paths::DIRECTORY, CanonicalValue::Block(BlockPresence::Empty)),
                (paths::DIRECTORY_ENABLE, CanonicalValue::Bool(false)),
                (paths::DIRECTORY_AUTO_REFRESH, CanonicalValue::Bool(false)),
            ],
        );
        let changes = engine.diff(StageKind::S3, &desired, &observed);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].path.as_str(), paths::DIRECTORY_ENABLE);
        assert_eq!(changes[0].action, ChangeAction::Update);
    }

    #[test]
    fn test_block_unset_is_single_replace() {
        let engine = DiffEngine::new();
        let desired = view(
            StageKind::S3,
            &[(paths::DIRECTORY, CanonicalValue::Block(BlockPresence::Empty))],
        );
        let observed = view(
            StageKind::S3,
            &[
                (paths::DIRECTORY, CanonicalValue::Block(BlockPresence::Present)),
                (paths::DIRECTORY_ENABLE, CanonicalValue::Bool(true)),
            ],
        );
        let changes = engine.diff(StageKind::S3, &desired, &observed);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].path.as_str(), paths::DIRECTORY);
        assert_eq!(changes[0].action, ChangeAction::Replace);
    }

    #[test]
    fn test_changes_are_ordered_by_section() {
        let engine = DiffEngine::new();
        let desired = view(
            StageKind::S3,
            &[
                (paths::COMMENT, text("new")),
                (paths::URL, text("s3://new/")),
                (paths::NAME, text("NEW")),
            ],
        );
        let observed = view(
            StageKind::S3,
            &[
                (paths::COMMENT, text("old")),
                (paths::URL, text("s3://old/")),
                (paths::NAME, text("OLD")),
            ],
        );
        let changes = engine.diff(StageKind::S3, &desired, &observed);
        let order: Vec<&str> = changes.iter().map(|c| c.path.as_str()).collect();
        assert_eq!(order, vec![paths::NAME, paths::URL, paths::COMMENT]);
    }
}
