//! Stage plan types and construction.
//!
//! A plan turns a classified change set into the ordered list of remote
//! operations for one stage.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use tracing::warn;

use crate::config::{QualifiedName, ReplaceStrategy};
use crate::normalize::Section;
use crate::remote::StageIdentity;

use super::diff::AttributeChange;
use super::policy::{ChangeAction, ReplacementDecision};

/// Plan for one stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StagePlan {
    /// When the plan was created.
    pub created_at: DateTime<Utc>,
    /// Desired qualified name.
    pub stage: QualifiedName,
    /// Overall action.
    pub action: PlanAction,
    /// Aggregate decision over `changes`.
    pub decision: ReplacementDecision,
    /// Classified changes in canonical order.
    pub changes: Vec<AttributeChange>,
    /// Remote operations in execution order.
    pub operations: Vec<RemoteOperation>,
}

/// Overall action of a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanAction {
    /// The stage does not exist yet.
    Create,
    /// Already converged.
    NoOp,
    /// Alter in place.
    Update,
    /// Destroy and recreate.
    Replace,
}

/// Attributes the backend applies together in one alter call.
///
/// Variants are declared in execution order: the rename goes first so later
/// alters address the stage by its new name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlterGroup {
    /// Name, database, schema.
    Rename,
    /// Storage integration, credentials, private link.
    ExternalParams,
    /// Directory table settings.
    Directory,
    /// File format.
    FileFormat,
    /// Comment.
    Comment,
}

/// One remote call.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum RemoteOperation {
    /// Create the stage from the full desired state.
    Create,
    /// Alter one group of attributes.
    Alter {
        /// Attribute group.
        group: AlterGroup,
        /// Update-classified changes of the group.
        changes: Vec<AttributeChange>,
    },
    /// Drop a stage.
    Drop {
        /// Stage to drop.
        identity: StageIdentity,
    },
}

impl StagePlan {
    /// Creates a plan for a stage that does not exist.
    #[must_use]
    pub fn create(stage: QualifiedName) -> Self {
        Self {
            created_at: Utc::now(),
            stage,
            action: PlanAction::Create,
            decision: ReplacementDecision::Replace,
            changes: Vec::new(),
            operations: vec![RemoteOperation::Create],
        }
    }

    /// Creates a plan from classified changes against an existing stage.
    #[must_use]
    pub fn from_changes(
        stage: QualifiedName,
        current: &StageIdentity,
        changes: Vec<AttributeChange>,
        strategy: ReplaceStrategy,
    ) -> Self {
        let decision = ReplacementDecision::aggregate(&changes);
        let (action, operations) = match decision {
            ReplacementDecision::NoOp => (PlanAction::NoOp, Vec::new()),
            ReplacementDecision::Update => (PlanAction::Update, Self::alter_operations(&changes)),
            ReplacementDecision::Replace => (
                PlanAction::Replace,
                Self::replace_operations(&stage, current, strategy),
            ),
        };

        Self {
            created_at: Utc::now(),
            stage,
            action,
            decision,
            changes,
            operations,
        }
    }

    /// Groups update-classified changes into one alter per group.
    fn alter_operations(changes: &[AttributeChange]) -> Vec<RemoteOperation> {
        let mut groups: BTreeMap<AlterGroup, Vec<AttributeChange>> = BTreeMap::new();
        for change in changes.iter().filter(|c| c.action == ChangeAction::Update) {
            if let Some(group) = AlterGroup::of(change) {
                groups.entry(group).or_default().push(change.clone());
            }
        }
        groups
            .into_iter()
            .map(|(group, changes)| RemoteOperation::Alter { group, changes })
            .collect()
    }

    fn replace_operations(
        stage: &QualifiedName,
        current: &StageIdentity,
        strategy: ReplaceStrategy,
    ) -> Vec<RemoteOperation> {
        let drop = RemoteOperation::Drop {
            identity: current.clone(),
        };
        match strategy {
            ReplaceStrategy::CreateThenDrop if !current.name.same_object(stage) => {
                vec![RemoteOperation::Create, drop]
            }
            ReplaceStrategy::CreateThenDrop => {
                warn!(
                    "Cannot create {stage} before dropping it: names overlap; falling back to drop-then-create"
                );
                vec![drop, RemoteOperation::Create]
            }
            ReplaceStrategy::DropThenCreate => vec![drop, RemoteOperation::Create],
        }
    }

    /// Returns true if the plan issues any remote call.
    #[must_use]
    pub fn has_changes(&self) -> bool {
        !self.operations.is_empty()
    }

    /// Returns the number of alter calls.
    #[must_use]
    pub fn alter_count(&self) -> usize {
        self.operations
            .iter()
            .filter(|op| matches!(op, RemoteOperation::Alter { .. }))
            .count()
    }

    /// Returns the changes that need a remote call.
    #[must_use]
    pub fn actionable_changes(&self) -> Vec<&AttributeChange> {
        self.changes.iter().filter(|c| c.is_actionable()).collect()
    }
}

impl AlterGroup {
    /// Returns the group a change belongs to, if it can be altered in place.
    #[must_use]
    pub fn of(change: &AttributeChange) -> Option<Self> {
        match change.path.section() {
            Section::Identity => Some(Self::Rename),
            Section::Backend | Section::Encryption => Some(Self::ExternalParams),
            Section::Directory => Some(Self::Directory),
            Section::FileFormat => Some(Self::FileFormat),
            Section::Comment => Some(Self::Comment),
            Section::Other => None,
        }
    }
}

impl fmt::Display for PlanAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Create => "create",
            Self::NoOp => "no-op",
            Self::Update => "update",
            Self::Replace => "replace",
        };
        write!(f, "{s}")
    }
}

impl fmt::Display for AlterGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Rename => "rename",
            Self::ExternalParams => "external_params",
            Self::Directory => "directory",
            Self::FileFormat => "file_format",
            Self::Comment => "comment",
        };
        write!(f, "{s}")
    }
}

impl fmt::Display for RemoteOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Create => write!(f, "create"),
            Self::Alter { group, changes } => {
                write!(f, "alter {group} (")?;
                for (i, change) in changes.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", change.path)?;
                }
                write!(f, ")")
            }
            Self::Drop { identity } => write!(f, "drop {identity}"),
        }
    }
}

impl fmt::Display for StagePlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.stage, self.action)?;
        if !self.operations.is_empty() {
            write!(f, " [")?;
            for (i, op) in self.operations.iter().enumerate() {
                if i > 0 {
                    write!(f, "; ")?;
                }
                write!(f, "{op}")?;
            }
            write!(f, "]")?;
        }
        Ok(())
    }
}
