//! Remote object store trait definition.
//!
//! This is the seam between the engine and whatever issues the actual
//! create/alter/drop/describe calls against the warehouse.

use async_trait::async_trait;

use crate::config::{QualifiedName, StageDesiredState};
use crate::error::RemoteResult;
use crate::planner::AttributeChange;

use super::types::{RawStageData, StageIdentity};

/// Remote catalog of stages.
///
/// Every call is at-most-once from the engine's point of view: the engine never
/// retries, and timeouts are the implementation's concern.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RemoteObjectStore: Send + Sync {
    /// Reads the current state of a stage.
    ///
    /// Returns [`RemoteError::NotFound`](crate::error::RemoteError::NotFound)
    /// if no stage has that name.
    async fn describe(&self, name: &QualifiedName) -> RemoteResult<RawStageData>;

    /// Creates a stage from the full desired state.
    async fn create(&self, desired: &StageDesiredState) -> RemoteResult<StageIdentity>;

    /// Applies `changes` to the stage.
    ///
    /// `desired` carries write-only values (secrets) the changes refer to.
    /// All changes of one call are applied atomically.
    async fn alter(
        &self,
        identity: &StageIdentity,
        desired: &StageDesiredState,
        changes: &[AttributeChange],
    ) -> RemoteResult<()>;

    /// Drops a stage.
    async fn drop_stage(&self, identity: &StageIdentity) -> RemoteResult<()>;

    /// Gets the backend type name.
    fn backend_type(&self) -> &'static str;
}
