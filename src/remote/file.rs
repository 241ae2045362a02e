//! File-backed remote object store.
//!
//! Persists the stage catalog as a JSON document so `stagectl` can be driven
//! end to end on one machine without a warehouse connection.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::config::{QualifiedName, StageDesiredState};
use crate::error::{RemoteError, RemoteResult};
use crate::planner::AttributeChange;

use super::catalog::Catalog;
use super::store::RemoteObjectStore;
use super::types::{RawStageData, StageIdentity};

/// Default catalog file, relative to the working directory.
pub const DEFAULT_CATALOG_PATH: &str = ".stagectl/catalog.json";

/// Remote store persisted to a JSON file.
#[derive(Debug)]
pub struct FileObjectStore {
    path: PathBuf,
    // Serializes read-modify-write cycles within this process.
    guard: Mutex<()>,
}

fn unavailable(action: &str, path: &Path, e: impl std::fmt::Display) -> RemoteError {
    RemoteError::Unavailable {
        message: format!("Failed to {action} {}: {e}", path.display()),
    }
}

impl FileObjectStore {
    /// Creates a store backed by `path`. The file is created on first write.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            guard: Mutex::new(()),
        }
    }

    /// Returns the catalog file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> RemoteResult<Catalog> {
        if !self.path.exists() {
            debug!("Catalog file does not exist yet: {}", self.path.display());
            return Ok(Catalog::new());
        }
        let content = fs::read_to_string(&self.path)
            .await
            .map_err(|e| unavailable("read", &self.path, e))?;
        serde_json::from_str(&content).map_err(|e| unavailable("parse", &self.path, e))
    }

    async fn save(&self, catalog: &Catalog) -> RemoteResult<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)
                    .await
                    .map_err(|e| unavailable("create directory for", &self.path, e))?;
            }
        }

        let content = serde_json::to_string_pretty(catalog)
            .map_err(|e| unavailable("serialize", &self.path, e))?;

        // Write to a temporary file first, then rename for atomicity
        let temp_path = self.path.with_extension("tmp");
        let mut file = fs::File::create(&temp_path)
            .await
            .map_err(|e| unavailable("create", &temp_path, e))?;
        file.write_all(content.as_bytes())
            .await
            .map_err(|e| unavailable("write", &temp_path, e))?;
        file.sync_all()
            .await
            .map_err(|e| unavailable("sync", &temp_path, e))?;
        fs::rename(&temp_path, &self.path)
            .await
            .map_err(|e| unavailable("replace", &self.path, e))?;
        Ok(())
    }

    /// Loads the catalog, applies `f`, and saves it back if `f` succeeded.
    async fn update<T, F>(&self, f: F) -> RemoteResult<T>
    where
        F: FnOnce(&mut Catalog) -> RemoteResult<T>,
    {
        let _guard = self.guard.lock().await;
        let mut catalog = self.load().await?;
        let out = f(&mut catalog)?;
        self.save(&catalog).await?;
        Ok(out)
    }
}

#[async_trait]
impl RemoteObjectStore for FileObjectStore {
    async fn describe(&self, name: &QualifiedName) -> RemoteResult<RawStageData> {
        let _guard = self.guard.lock().await;
        self.load().await?.describe(name)
    }

    async fn create(&self, desired: &StageDesiredState) -> RemoteResult<StageIdentity> {
        let identity = self.update(|catalog| catalog.create(desired)).await?;
        info!("Created stage {identity}");
        Ok(identity)
    }

    async fn alter(
        &self,
        identity: &StageIdentity,
        desired: &StageDesiredState,
        changes: &[AttributeChange],
    ) -> RemoteResult<()> {
        self.update(|catalog| catalog.alter(identity, desired, changes))
            .await?;
        info!("Altered stage {identity} ({} change(s))", changes.len());
        Ok(())
    }

    async fn drop_stage(&self, identity: &StageIdentity) -> RemoteResult<()> {
        self.update(|catalog| catalog.drop_stage(identity)).await?;
        info!("Dropped stage {identity}");
        Ok(())
    }

    fn backend_type(&self) -> &'static str {
        "file"
    }
}
