//! Local file-based state storage backend.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::error::{Result, StageError, StateError};

use super::lock::{LOCK_EXPIRY_SECS, LockInfo, generate_holder_id};
use super::store::StateStore;
use super::types::{ReconcileState, STATE_VERSION};

/// Default state directory name.
pub const STATE_DIR: &str = ".stagectl";

/// State file name.
const STATE_FILE: &str = "state.json";

/// Lock file name.
const LOCK_FILE: &str = "state.lock";

/// Local file-based state store.
#[derive(Debug)]
pub struct LocalStateStore {
    /// Directory holding the state and lock files.
    base_dir: PathBuf,
    state_path: PathBuf,
    lock_path: PathBuf,
}

fn corrupted(message: String) -> StageError {
    StageError::State(StateError::Corrupted { message })
}

fn lock_failed(message: String) -> StageError {
    StageError::State(StateError::LockFailed { message })
}

impl LocalStateStore {
    /// Creates a store under `.stagectl` in the current directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the current directory cannot be determined.
    pub fn new() -> Result<Self> {
        let cwd = std::env::current_dir()
            .map_err(|e| StageError::internal(format!("Cannot determine current directory: {e}")))?;
        Ok(Self::with_base_dir(cwd.join(STATE_DIR)))
    }

    /// Creates a store in a custom directory.
    #[must_use]
    pub fn with_base_dir(base_dir: impl Into<PathBuf>) -> Self {
        let base_dir = base_dir.into();
        Self {
            state_path: base_dir.join(STATE_FILE),
            lock_path: base_dir.join(LOCK_FILE),
            base_dir,
        }
    }

    /// Returns the state file path.
    #[must_use]
    pub fn state_path(&self) -> &Path {
        &self.state_path
    }

    async fn ensure_dir(&self) -> Result<()> {
        if !self.base_dir.exists() {
            debug!("Creating state directory: {}", self.base_dir.display());
            fs::create_dir_all(&self.base_dir).await.map_err(|e| {
                StateError::write(format!("Failed to create state directory: {e}"))
            })?;
        }
        Ok(())
    }

    async fn read_lock_file(&self) -> Result<Option<LockInfo>> {
        if !self.lock_path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&self.lock_path)
            .await
            .map_err(|e| corrupted(format!("Failed to read lock file: {e}")))?;
        let lock = serde_json::from_str(&content)
            .map_err(|e| corrupted(format!("Failed to parse lock file: {e}")))?;
        Ok(Some(lock))
    }

    async fn write_lock_file(&self, lock: &LockInfo) -> Result<()> {
        self.ensure_dir().await?;
        let content = serde_json::to_string_pretty(lock)
            .map_err(|e| StateError::serialization(format!("Failed to serialize lock: {e}")))?;

        let mut file = fs::File::create(&self.lock_path)
            .await
            .map_err(|e| lock_failed(format!("Failed to create lock file: {e}")))?;
        file.write_all(content.as_bytes())
            .await
            .map_err(|e| lock_failed(format!("Failed to write lock file: {e}")))?;
        file.sync_all()
            .await
            .map_err(|e| lock_failed(format!("Failed to sync lock file: {e}")))?;
        Ok(())
    }

    async fn delete_lock_file(&self) -> Result<()> {
        if self.lock_path.exists() {
            fs::remove_file(&self.lock_path)
                .await
                .map_err(|e| lock_failed(format!("Failed to delete lock file: {e}")))?;
        }
        Ok(())
    }
}

#[async_trait]
impl StateStore for LocalStateStore {
    async fn load(&self) -> Result<Option<ReconcileState>> {
        if !self.state_path.exists() {
            debug!("State file does not exist: {}", self.state_path.display());
            return Ok(None);
        }

        info!("Loading state from: {}", self.state_path.display());
        let content = fs::read_to_string(&self.state_path)
            .await
            .map_err(|e| corrupted(format!("Failed to read state file: {e}")))?;
        let state: ReconcileState = serde_json::from_str(&content)
            .map_err(|e| corrupted(format!("Failed to parse state file: {e}")))?;

        if state.version != STATE_VERSION {
            return Err(StageError::State(StateError::VersionMismatch {
                expected: String::from(STATE_VERSION),
                found: state.version,
            }));
        }
        Ok(Some(state))
    }

    async fn save(&self, state: &ReconcileState) -> Result<()> {
        self.ensure_dir().await?;
        info!("Saving state to: {}", self.state_path.display());

        let content = serde_json::to_string_pretty(state)
            .map_err(|e| StateError::serialization(format!("Failed to serialize state: {e}")))?;

        // Write to a temporary file first, then rename for atomicity
        let temp_path = self.state_path.with_extension("tmp");
        let mut file = fs::File::create(&temp_path)
            .await
            .map_err(|e| StateError::write(format!("Failed to create temp state file: {e}")))?;
        file.write_all(content.as_bytes())
            .await
            .map_err(|e| StateError::write(format!("Failed to write state file: {e}")))?;
        file.sync_all()
            .await
            .map_err(|e| StateError::write(format!("Failed to sync state file: {e}")))?;
        fs::rename(&temp_path, &self.state_path)
            .await
            .map_err(|e| StateError::write(format!("Failed to rename state file: {e}")))?;

        debug!("State saved ({} stage(s))", state.stages.len());
        Ok(())
    }

    async fn acquire_lock(&self, holder: &str, operation: &str) -> Result<LockInfo> {
        if let Some(existing) = self.read_lock_file().await? {
            if !existing.is_expired() {
                return Err(StageError::State(StateError::LockedByOther {
                    holder: existing.holder,
                    since: existing.acquired_at.to_rfc3339(),
                }));
            }
            warn!("Taking over expired lock held by {}", existing.holder);
        }

        let holder = if holder.is_empty() {
            generate_holder_id()
        } else {
            holder.to_string()
        };
        let lock = LockInfo::new(&holder).with_operation(operation);
        self.write_lock_file(&lock).await?;

        info!(
            "Acquired state lock {} for {operation} (expires in {LOCK_EXPIRY_SECS}s)",
            lock.lock_id
        );
        Ok(lock)
    }

    async fn release_lock(&self, lock_id: &str) -> Result<()> {
        match self.read_lock_file().await? {
            Some(existing) if existing.lock_id == lock_id => {
                self.delete_lock_file().await?;
                info!("Released state lock: {lock_id}");
            }
            Some(existing) => debug!(
                "Lock ID mismatch: expected {lock_id}, found {}",
                existing.lock_id
            ),
            None => {}
        }
        Ok(())
    }

    async fn force_unlock(&self) -> Result<Option<LockInfo>> {
        let existing = self.read_lock_file().await?;
        if let Some(lock) = &existing {
            warn!("Force-releasing state lock held by {}", lock.holder);
            self.delete_lock_file().await?;
        }
        Ok(existing)
    }

    async fn get_lock_info(&self) -> Result<Option<LockInfo>> {
        self.read_lock_file().await
    }

    fn backend_type(&self) -> &'static str {
        "local"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::QualifiedName;
    use crate::planner::PlanAction;
    use crate::remote::StageIdentity;
    use tempfile::TempDir;

    fn store() -> (LocalStateStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        (LocalStateStore::with_base_dir(temp_dir.path().join("state")), temp_dir)
    }

    #[tokio::test]
    async fn test_save_and_load_identity() {
        let (store, _temp) = store();
        let mut identity =
            StageIdentity::new(String::from("obj-1"), QualifiedName::new("DB", "SC", "ST"));
        identity
            .secret_fingerprints
            .insert(String::from("credentials"), String::from("ab12"));

        let mut state = ReconcileState::new();
        state.record("db.sc.st", identity.clone(), "hash", PlanAction::Create);
        store.save(&state).await.unwrap();

        let loaded = store.load().await.unwrap().unwrap();
        assert_eq!(loaded.identity("db.sc.st"), Some(&identity));
        assert!(!store.state_path().with_extension("tmp").exists());
    }

    #[tokio::test]
    async fn test_load_nonexistent() {
        let (store, _temp) = store();
        assert!(store.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_version_mismatch() {
        let (store, _temp) = store();
        let mut state = ReconcileState::new();
        state.version = String::from("0.1");
        store.save(&state).await.unwrap();

        let err = store.load().await.unwrap_err();
        assert!(matches!(err, StageError::State(StateError::VersionMismatch { .. })));
    }

    #[tokio::test]
    async fn test_lock_conflict_and_release() {
        let (store, _temp) = store();
        let lock = store.acquire_lock("holder-1", "apply").await.unwrap();

        let err = store.acquire_lock("holder-2", "apply").await.unwrap_err();
        assert!(matches!(err, StageError::State(StateError::LockedByOther { .. })));

        store.release_lock("not-mine").await.unwrap();
        assert!(store.get_lock_info().await.unwrap().is_some());

        store.release_lock(&lock.lock_id).await.unwrap();
        assert!(store.get_lock_info().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_force_unlock() {
        let (store, _temp) = store();
        store.acquire_lock("", "apply").await.unwrap();
        let removed = store.force_unlock().await.unwrap().unwrap();
        assert_eq!(removed.operation.as_deref(), Some("apply"));
        assert!(store.force_unlock().await.unwrap().is_none());
    }
}
