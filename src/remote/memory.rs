//! In-memory remote object store.
//!
//! Used by tests and by `remote.backend: memory`. Every call is recorded so
//! callers can assert on the exact sequence of remote operations.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::debug;

use crate::config::{QualifiedName, StageDesiredState};
use crate::error::{RemoteError, RemoteResult};
use crate::planner::AttributeChange;

use super::catalog::{Catalog, CatalogEntry};
use super::store::RemoteObjectStore;
use super::types::{RawStageData, StageIdentity};

/// Kind of a recorded remote call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallKind {
    /// `describe`
    Describe,
    /// `create`
    Create,
    /// `alter`
    Alter,
    /// `drop_stage`
    Drop,
}

/// A recorded remote call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteCall {
    /// Call kind.
    pub kind: CallKind,
    /// Stage the call addressed.
    pub stage: String,
    /// Attribute paths of an alter call.
    pub paths: Vec<String>,
}

/// Remote store backed by an in-process [`Catalog`].
#[derive(Debug, Default)]
pub struct InMemoryObjectStore {
    catalog: Mutex<Catalog>,
    calls: Mutex<Vec<RemoteCall>>,
    /// Injected failures: calls of the kind to let through first, then the error.
    failures: Mutex<HashMap<CallKind, (usize, RemoteError)>>,
}

fn locked<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl InMemoryObjectStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns every call made so far, oldest first.
    #[must_use]
    pub fn calls(&self) -> Vec<RemoteCall> {
        locked(&self.calls).clone()
    }

    /// Returns the number of calls of one kind.
    #[must_use]
    pub fn call_count(&self, kind: CallKind) -> usize {
        locked(&self.calls).iter().filter(|c| c.kind == kind).count()
    }

    /// Returns the number of calls that changed the catalog.
    #[must_use]
    pub fn mutation_count(&self) -> usize {
        locked(&self.calls)
            .iter()
            .filter(|c| c.kind != CallKind::Describe)
            .count()
    }

    /// Forgets recorded calls.
    pub fn clear_calls(&self) {
        locked(&self.calls).clear();
    }

    /// Makes the next call of `kind` fail with `error`.
    pub fn fail_next(&self, kind: CallKind, error: RemoteError) {
        self.fail_after(kind, 0, error);
    }

    /// Lets `skip` calls of `kind` through, then fails the next one with `error`.
    pub fn fail_after(&self, kind: CallKind, skip: usize, error: RemoteError) {
        locked(&self.failures).insert(kind, (skip, error));
    }

    /// Returns the number of stages held.
    #[must_use]
    pub fn len(&self) -> usize {
        locked(&self.catalog).len()
    }

    /// Returns true if no stage is held.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        locked(&self.catalog).is_empty()
    }

    /// Deletes a stage out of band, as an operator would by hand.
    pub fn delete_out_of_band(&self, name: &QualifiedName) -> Option<CatalogEntry> {
        locked(&self.catalog).remove(name)
    }

    /// Mutates a stage out of band. Returns false if it does not exist.
    pub fn mutate_out_of_band<F>(&self, name: &QualifiedName, f: F) -> bool
    where
        F: FnOnce(&mut StageDesiredState),
    {
        locked(&self.catalog).mutate(name, f)
    }

    fn record(&self, kind: CallKind, stage: String, paths: Vec<String>) -> RemoteResult<()> {
        locked(&self.calls).push(RemoteCall { kind, stage, paths });
        let mut failures = locked(&self.failures);
        let fire = match failures.get_mut(&kind) {
            Some((skip, _)) if *skip > 0 => {
                *skip -= 1;
                false
            }
            Some(_) => true,
            None => false,
        };
        if !fire {
            return Ok(());
        }
        match failures.remove(&kind) {
            Some((_, err)) => {
                debug!("Injected failure for {kind:?}: {err}");
                Err(err)
            }
            None => Ok(()),
        }
    }
}

#[async_trait]
impl RemoteObjectStore for InMemoryObjectStore {
    async fn describe(&self, name: &QualifiedName) -> RemoteResult<RawStageData> {
        self.record(CallKind::Describe, name.to_string(), Vec::new())?;
        locked(&self.catalog).describe(name)
    }

    async fn create(&self, desired: &StageDesiredState) -> RemoteResult<StageIdentity> {
        self.record(CallKind::Create, desired.qualified_name().to_string(), Vec::new())?;
        locked(&self.catalog).create(desired)
    }

    async fn alter(
        &self,
        identity: &StageIdentity,
        desired: &StageDesiredState,
        changes: &[AttributeChange],
    ) -> RemoteResult<()> {
        let paths = changes.iter().map(|c| c.path.to_string()).collect();
        self.record(CallKind::Alter, identity.name.to_string(), paths)?;
        locked(&self.catalog).alter(identity, desired, changes)
    }

    async fn drop_stage(&self, identity: &StageIdentity) -> RemoteResult<()> {
        self.record(CallKind::Drop, identity.name.to_string(), Vec::new())?;
        locked(&self.catalog).drop_stage(identity)
    }

    fn backend_type(&self) -> &'static str {
        "memory"
    }
}
