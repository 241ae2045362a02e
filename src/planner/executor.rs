//! Plan executor for applying stage plans.
//!
//! Operations run strictly in plan order. The first remote error stops the
//! run; nothing is retried or rolled back, the next planning pass re-reads
//! the remote state instead. When earlier operations already succeeded the
//! error carries the identity they left behind.

use std::time::Instant;
use tracing::{error, info, warn};

use crate::config::StageDesiredState;
use crate::error::{ReconcileError, Result, StageError};
use crate::normalize::Normalizer;
use crate::remote::{RemoteObjectStore, StageIdentity};

use super::plan::{AlterGroup, RemoteOperation, StagePlan};

/// Executor for stage plans.
pub struct PlanExecutor<'a, R: RemoteObjectStore + ?Sized> {
    /// Remote store the operations are issued against.
    store: &'a R,
}

/// Record of one executed operation.
#[derive(Debug, Clone)]
pub struct OperationRecord {
    /// Operation index within the plan.
    pub index: usize,
    /// Human-readable description.
    pub description: String,
    /// Wall time of the remote call.
    pub duration_ms: u128,
}

/// Result of executing a plan.
#[derive(Debug, Clone)]
pub struct ExecutionReport {
    /// Identity of the stage after the plan ran, if one exists.
    pub identity: Option<StageIdentity>,
    /// Executed operations in order.
    pub operations: Vec<OperationRecord>,
}

impl<'a, R: RemoteObjectStore + ?Sized> PlanExecutor<'a, R> {
    /// Creates a new plan executor.
    #[must_use]
    pub const fn new(store: &'a R) -> Self {
        Self { store }
    }

    /// Executes a stage plan.
    ///
    /// `current` is the identity the plan was computed against (`None` for
    /// create plans), carrying the fingerprints of the secrets last applied.
    ///
    /// # Errors
    ///
    /// Returns the error of the first operation unchanged if it fails,
    /// [`ReconcileError::PartiallyApplied`] if a later operation fails, or
    /// [`ReconcileError::Aborted`] if the plan addresses a stage that has no
    /// identity.
    pub async fn execute(
        &self,
        plan: &StagePlan,
        desired: &StageDesiredState,
        current: Option<StageIdentity>,
    ) -> Result<ExecutionReport> {
        info!(
            "Executing plan for {} with {} operation(s)",
            plan.stage,
            plan.operations.len()
        );

        let mut identity = current;
        let mut operations = Vec::with_capacity(plan.operations.len());

        for (index, operation) in plan.operations.iter().enumerate() {
            info!("Executing operation {index}: {operation}");
            let started = Instant::now();

            if let Err(e) = self.execute_operation(operation, desired, &mut identity).await {
                error!("Operation {index} ({operation}) on {} failed: {e}", plan.stage);
                if index == 0 {
                    return Err(e);
                }
                let pending_drops: Vec<StageIdentity> = plan.operations[index..]
                    .iter()
                    .filter_map(|op| match op {
                        RemoteOperation::Drop { identity: target } => Some(target.clone()),
                        _ => None,
                    })
                    .collect();
                warn!(
                    "{} left partially applied ({index} of {} operation(s)); now {}",
                    plan.stage,
                    plan.operations.len(),
                    identity
                        .as_ref()
                        .map_or_else(|| String::from("absent"), ToString::to_string)
                );
                return Err(StageError::Reconcile(ReconcileError::PartiallyApplied {
                    stage: plan.stage.to_string(),
                    action: plan.action,
                    completed: index,
                    total: plan.operations.len(),
                    identity,
                    pending_drops,
                    source: Box::new(e),
                }));
            }

            operations.push(OperationRecord {
                index,
                description: operation.to_string(),
                duration_ms: started.elapsed().as_millis(),
            });
        }

        if let Some(identity) = identity.as_mut() {
            identity.secret_fingerprints = Normalizer::desired(desired).secrets();
        }

        Ok(ExecutionReport {
            identity,
            operations,
        })
    }

    async fn execute_operation(
        &self,
        operation: &RemoteOperation,
        desired: &StageDesiredState,
        identity: &mut Option<StageIdentity>,
    ) -> Result<()> {
        match operation {
            RemoteOperation::Create => {
                let mut created = self.store.create(desired).await?;
                info!("Created stage {created}");
                // Secrets are never reported back; remember what was sent.
                created.secret_fingerprints = Normalizer::desired(desired).secrets();
                *identity = Some(created);
            }
            RemoteOperation::Alter { group, changes } => {
                let Some(current) = identity.as_mut() else {
                    return Err(StageError::Reconcile(ReconcileError::Aborted {
                        reason: format!("cannot alter {group} of a stage that does not exist"),
                    }));
                };
                self.store.alter(current, desired, changes).await?;
                match group {
                    AlterGroup::Rename => current.name = desired.qualified_name(),
                    AlterGroup::ExternalParams => {
                        current.secret_fingerprints = Normalizer::desired(desired).secrets();
                    }
                    AlterGroup::Directory | AlterGroup::FileFormat | AlterGroup::Comment => {}
                }
            }
            RemoteOperation::Drop { identity: target } => {
                self.store.drop_stage(target).await?;
                info!("Dropped stage {target}");
                if identity.as_ref().is_some_and(|id| id.same_object(target)) {
                    *identity = None;
                }
            }
        }
        Ok(())
    }
}
