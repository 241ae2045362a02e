//! Remote object store abstraction and backends.
//!
//! The engine talks to the warehouse only through [`RemoteObjectStore`].
//! Two backends ship with the crate:
//! - [`InMemoryObjectStore`] for tests and dry runs
//! - [`FileObjectStore`] for local end-to-end use

mod catalog;
mod file;
mod memory;
mod store;
mod types;

pub use catalog::{Catalog, CatalogEntry};
pub use file::{DEFAULT_CATALOG_PATH, FileObjectStore};
pub use memory::{CallKind, InMemoryObjectStore, RemoteCall};
pub use store::RemoteObjectStore;
#[cfg(test)]
pub use store::MockRemoteObjectStore;
pub use types::{
    DescribeProperty, RawStageData, ShowStageRow, StageIdentity, decode_list, encode_list, props,
};

use std::path::PathBuf;
use std::sync::Arc;

use crate::config::{RemoteBackend, RemoteConfig};

/// Builds the remote store selected by `config`.
#[must_use]
pub fn create_remote_store(config: &RemoteConfig) -> Arc<dyn RemoteObjectStore> {
    match config.backend {
        RemoteBackend::Memory => Arc::new(InMemoryObjectStore::new()),
        RemoteBackend::File => {
            let path = config
                .path
                .as_ref()
                .map_or_else(|| PathBuf::from(DEFAULT_CATALOG_PATH), PathBuf::from);
            Arc::new(FileObjectStore::new(path))
        }
    }
}
