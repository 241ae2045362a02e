//! State store trait definition.

use async_trait::async_trait;

use super::lock::LockInfo;
use super::types::ReconcileState;
use crate::error::Result;

/// Persistent store for [`ReconcileState`].
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Loads the state.
    ///
    /// Returns `None` if no state exists yet.
    async fn load(&self) -> Result<Option<ReconcileState>>;

    /// Saves the state atomically.
    async fn save(&self, state: &ReconcileState) -> Result<()>;

    /// Acquires the state lock for `operation`.
    ///
    /// An empty `holder` generates one from host and process id.
    async fn acquire_lock(&self, holder: &str, operation: &str) -> Result<LockInfo>;

    /// Releases the lock if `lock_id` still holds it.
    async fn release_lock(&self, lock_id: &str) -> Result<()>;

    /// Removes the lock regardless of who holds it.
    async fn force_unlock(&self) -> Result<Option<LockInfo>>;

    /// Gets current lock information, expired or not.
    async fn get_lock_info(&self) -> Result<Option<LockInfo>>;

    /// Gets the backend type name.
    fn backend_type(&self) -> &'static str;
}
