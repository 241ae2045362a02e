//! Reconciler for converging one stage to its desired state.
//!
//! A pass runs `Planning → Applying → Verifying → Converged`. Any error moves
//! the pass to `Failed` and is returned to the caller unchanged; the engine
//! never retries, and the next pass starts over from a fresh describe.

use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::config::{
    ConfigValidator, QualifiedName, ReconcileConfig, ReplaceStrategy, StageDesiredState,
};
use crate::error::{ConvergenceError, ReconcileError, Result, StageError};
use crate::normalize::{Normalizer, StageObservedState};
use crate::planner::{
    AttributeChange, DiffEngine, PlanAction, PlanExecutor, ReplacementDecision, ReplacementPolicy,
    StagePlan,
};
use crate::remote::{RemoteObjectStore, StageIdentity};

/// Options controlling a reconciliation pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileOptions {
    /// How a replace is carried out.
    pub replace_strategy: ReplaceStrategy,
    /// Whether database/schema moves are applied in place.
    pub allow_identifier_move: bool,
    /// Recreate stages deleted out of band instead of reporting drift.
    pub recreate_missing: bool,
}

impl Default for ReconcileOptions {
    fn default() -> Self {
        Self {
            replace_strategy: ReplaceStrategy::DropThenCreate,
            allow_identifier_move: true,
            recreate_missing: false,
        }
    }
}

impl From<&ReconcileConfig> for ReconcileOptions {
    fn from(config: &ReconcileConfig) -> Self {
        Self {
            replace_strategy: config.replace_strategy,
            allow_identifier_move: config.allow_identifier_move,
            recreate_missing: config.recreate_missing,
        }
    }
}

impl ReconcileOptions {
    /// Sets the replace strategy.
    #[must_use]
    pub const fn with_replace_strategy(mut self, strategy: ReplaceStrategy) -> Self {
        self.replace_strategy = strategy;
        self
    }

    /// Sets whether out-of-band deletions are recreated.
    #[must_use]
    pub const fn with_recreate_missing(mut self, recreate: bool) -> Self {
        self.recreate_missing = recreate;
        self
    }
}

/// Phase of a reconciliation pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconcilePhase {
    /// Validating, describing and diffing.
    Planning,
    /// Issuing remote calls.
    Applying,
    /// Re-describing and diffing after apply.
    Verifying,
    /// Desired and observed state agree.
    Converged,
    /// The pass stopped on an error.
    Failed,
}

impl fmt::Display for ReconcilePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Planning => "planning",
            Self::Applying => "applying",
            Self::Verifying => "verifying",
            Self::Converged => "converged",
            Self::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// Output of the planning phase.
#[derive(Debug, Clone)]
pub struct PlannedStage {
    /// The plan.
    pub plan: StagePlan,
    /// Identity of the remote object the plan was computed against.
    pub current: Option<StageIdentity>,
    /// Observed state the plan was computed against.
    pub observed: Option<StageObservedState>,
}

/// Result of a successful reconciliation pass.
#[derive(Debug, Clone, Serialize)]
pub struct ReconcileOutcome {
    /// Identity of the converged stage, with the fingerprints of the secrets last sent.
    pub identity: StageIdentity,
    /// Observed state after verification.
    pub observed: StageObservedState,
    /// Aggregate decision of the pass.
    pub decision: ReplacementDecision,
    /// The executed plan.
    pub plan: StagePlan,
    /// Final phase (always `Converged`).
    pub phase: ReconcilePhase,
}

/// Drift status of one stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DriftStatus {
    /// Remote matches the manifest.
    InSync,
    /// Remote differs from the manifest.
    Drifted,
    /// The recorded stage was deleted out of band.
    Missing,
    /// The stage has never been created.
    NotCreated,
}

impl fmt::Display for DriftStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::InSync => "in sync",
            Self::Drifted => "drifted",
            Self::Missing => "missing",
            Self::NotCreated => "not created",
        };
        write!(f, "{s}")
    }
}

/// Drift report for one stage.
#[derive(Debug, Clone, Serialize)]
pub struct StageDrift {
    /// Qualified name from the manifest.
    pub stage: String,
    /// Drift status.
    pub status: DriftStatus,
    /// Actionable changes found.
    pub changes: Vec<AttributeChange>,
}

impl StageDrift {
    /// Returns true if the stage needs no action.
    #[must_use]
    pub fn is_converged(&self) -> bool {
        self.status == DriftStatus::InSync
    }
}

/// Reconciler for stages.
pub struct Reconciler<'a, R: RemoteObjectStore + ?Sized> {
    /// Remote store.
    store: &'a R,
    /// Document validator.
    validator: ConfigValidator,
    /// Diff engine.
    diff_engine: DiffEngine,
    /// Options.
    options: ReconcileOptions,
}

impl<'a, R: RemoteObjectStore + ?Sized> Reconciler<'a, R> {
    /// Creates a new reconciler with default options.
    #[must_use]
    pub fn new(store: &'a R) -> Self {
        Self::with_options(store, ReconcileOptions::default())
    }

    /// Creates a new reconciler with explicit options.
    #[must_use]
    pub fn with_options(store: &'a R, options: ReconcileOptions) -> Self {
        let policy =
            ReplacementPolicy::new().with_identifier_move(options.allow_identifier_move);
        Self {
            store,
            validator: ConfigValidator::new(),
            diff_engine: DiffEngine::with_policy(policy),
            options,
        }
    }

    /// Returns the options.
    #[must_use]
    pub const fn options(&self) -> &ReconcileOptions {
        &self.options
    }

    /// Runs the planning phase only.
    ///
    /// # Errors
    ///
    /// Returns [`StageError::Validation`] without any remote call if the
    /// document is invalid, [`ReconcileError::DeletedExternally`] if the
    /// previous identity no longer resolves (unless `recreate_missing`), or
    /// any remote error from `describe`.
    pub async fn plan(
        &self,
        desired: &StageDesiredState,
        previous: Option<&StageIdentity>,
    ) -> Result<PlannedStage> {
        self.plan_with(desired, previous, self.options.recreate_missing)
            .await
    }

    async fn plan_with(
        &self,
        desired: &StageDesiredState,
        previous: Option<&StageIdentity>,
        recreate_missing: bool,
    ) -> Result<PlannedStage> {
        self.validator
            .validate_stage(desired)
            .map_err(StageError::Validation)?;

        let stage = desired.qualified_name();
        let Some(observed) = self.locate(desired, previous, recreate_missing).await? else {
            info!("Stage {stage} does not exist; planning create");
            return Ok(PlannedStage {
                plan: StagePlan::create(stage),
                current: None,
                observed: None,
            });
        };

        let desired_view = Normalizer::desired(desired);
        let changes = self
            .diff_engine
            .diff(desired.kind(), &desired_view, &observed.view);
        let current = observed.identity();
        let plan = StagePlan::from_changes(stage, &current, changes, self.options.replace_strategy);
        info!("Planned {plan}");

        Ok(PlannedStage {
            plan,
            current: Some(current),
            observed: Some(observed),
        })
    }

    /// Finds the remote object the desired stage maps to.
    ///
    /// Returns `None` if a create is needed.
    async fn locate(
        &self,
        desired: &StageDesiredState,
        previous: Option<&StageIdentity>,
        recreate_missing: bool,
    ) -> Result<Option<StageObservedState>> {
        let target = desired.qualified_name();

        let Some(previous) = previous else {
            return self.describe_desired(desired).await;
        };

        let mut found = self.describe_by_identity(previous, &previous.name).await?;
        if found.is_none() && !previous.name.same_object(&target) {
            // A rename may already have been applied by an earlier pass.
            found = self.describe_by_identity(previous, &target).await?;
        }
        if let Some(observed) = found {
            return Ok(Some(observed.with_fingerprints(&previous.secret_fingerprints)));
        }

        if !recreate_missing {
            return Err(StageError::Reconcile(ReconcileError::DeletedExternally {
                stage: previous.name.to_string(),
                object_id: previous.object_id.clone(),
            }));
        }
        warn!("Stage {previous} was deleted out of band; recreating");
        self.describe_desired(desired).await
    }

    /// Describes `name` and keeps the result only if it is the object `identity` refers to.
    async fn describe_by_identity(
        &self,
        identity: &StageIdentity,
        name: &QualifiedName,
    ) -> Result<Option<StageObservedState>> {
        match self.store.describe(name).await {
            Ok(raw) if raw.object_id == identity.object_id => Ok(Some(Normalizer::observed(&raw)?)),
            Ok(raw) => {
                debug!(
                    "{name} is object {} but {} was expected",
                    raw.object_id, identity.object_id
                );
                Ok(None)
            }
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Describes the stage at its desired name, adopting it if it exists.
    async fn describe_desired(
        &self,
        desired: &StageDesiredState,
    ) -> Result<Option<StageObservedState>> {
        match self.store.describe(&desired.qualified_name()).await {
            Ok(raw) => {
                let observed = Normalizer::observed(&raw)?;
                info!("Adopting existing stage {}", observed.identity());
                Ok(Some(observed))
            }
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Runs a full reconciliation pass.
    ///
    /// # Errors
    ///
    /// Returns the planning errors of [`Reconciler::plan`], the first remote
    /// error while applying, or [`StageError::Convergence`] if the stage still
    /// differs after apply.
    pub async fn reconcile(
        &self,
        desired: &StageDesiredState,
        previous: Option<&StageIdentity>,
    ) -> Result<ReconcileOutcome> {
        let stage = desired.qualified_name();
        let mut phase = ReconcilePhase::Planning;
        info!("Reconciling {stage}");

        match self.run(desired, previous, &mut phase).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                error!("{stage}: {phase} -> {}: {e}", ReconcilePhase::Failed);
                Err(e)
            }
        }
    }

    async fn run(
        &self,
        desired: &StageDesiredState,
        previous: Option<&StageIdentity>,
        phase: &mut ReconcilePhase,
    ) -> Result<ReconcileOutcome> {
        let stage = desired.qualified_name();
        let planned = self.plan(desired, previous).await?;

        if planned.plan.action == PlanAction::NoOp {
            let (Some(mut identity), Some(observed)) = (planned.current, planned.observed) else {
                return Err(StageError::internal("no-op plan without an observed stage"));
            };
            advance(&stage.to_string(), phase, ReconcilePhase::Converged);
            if let Some(previous) = previous {
                identity
                    .secret_fingerprints
                    .clone_from(&previous.secret_fingerprints);
            }
            return Ok(ReconcileOutcome {
                identity,
                observed,
                decision: planned.plan.decision,
                plan: planned.plan,
                phase: *phase,
            });
        }

        advance(&stage.to_string(), phase, ReconcilePhase::Applying);
        let current = planned.current.map(|mut current| {
            if let Some(previous) = previous.filter(|p| p.same_object(&current)) {
                current
                    .secret_fingerprints
                    .clone_from(&previous.secret_fingerprints);
            }
            current
        });
        let report = PlanExecutor::new(self.store)
            .execute(&planned.plan, desired, current)
            .await?;
        let Some(identity) = report.identity else {
            return Err(StageError::internal(format!(
                "plan for {stage} finished without a stage"
            )));
        };

        advance(&stage.to_string(), phase, ReconcilePhase::Verifying);
        let observed = self.verify(desired, &identity).await?;

        advance(&stage.to_string(), phase, ReconcilePhase::Converged);
        Ok(ReconcileOutcome {
            identity,
            observed,
            decision: planned.plan.decision,
            plan: planned.plan,
            phase: *phase,
        })
    }

    /// Re-describes the stage and checks that nothing actionable remains.
    async fn verify(
        &self,
        desired: &StageDesiredState,
        identity: &StageIdentity,
    ) -> Result<StageObservedState> {
        let raw = self.store.describe(&identity.name).await?;
        let observed = Normalizer::observed(&raw)?.with_fingerprints(&identity.secret_fingerprints);

        let remaining: Vec<AttributeChange> = self
            .diff_engine
            .diff(desired.kind(), &Normalizer::desired(desired), &observed.view)
            .into_iter()
            .filter(AttributeChange::is_actionable)
            .collect();

        if remaining.is_empty() {
            Ok(observed)
        } else {
            Err(StageError::Convergence(ConvergenceError {
                stage: identity.name.to_string(),
                remaining,
            }))
        }
    }

    /// Reports drift between the manifest and the remote without changing anything.
    ///
    /// # Errors
    ///
    /// Returns validation and remote errors; out-of-band deletion is reported
    /// as [`DriftStatus::Missing`], not as an error.
    pub async fn check_drift(
        &self,
        desired: &StageDesiredState,
        previous: Option<&StageIdentity>,
    ) -> Result<StageDrift> {
        let stage = desired.qualified_name().to_string();
        let planned = match self.plan_with(desired, previous, false).await {
            Ok(planned) => planned,
            Err(e) if e.is_drift() => {
                return Ok(StageDrift {
                    stage,
                    status: DriftStatus::Missing,
                    changes: Vec::new(),
                });
            }
            Err(e) => return Err(e),
        };

        let status = match planned.plan.action {
            PlanAction::Create => DriftStatus::NotCreated,
            PlanAction::NoOp => DriftStatus::InSync,
            PlanAction::Update | PlanAction::Replace => DriftStatus::Drifted,
        };
        let changes = planned
            .plan
            .actionable_changes()
            .into_iter()
            .cloned()
            .collect();
        Ok(StageDrift {
            stage,
            status,
            changes,
        })
    }

    /// Drops a stage by identity.
    ///
    /// Returns false if the stage was already gone.
    ///
    /// # Errors
    ///
    /// Returns any remote error other than `NotFound`.
    pub async fn destroy(&self, identity: &StageIdentity) -> Result<bool> {
        match self.store.drop_stage(identity).await {
            Ok(()) => {
                info!("Destroyed stage {identity}");
                Ok(true)
            }
            Err(e) if e.is_not_found() => {
                warn!("Stage {identity} was already gone");
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// One stage of a batch run.
#[derive(Debug, Clone)]
pub struct BatchItem {
    /// Logical id the stage is tracked under.
    pub logical_id: String,
    /// Desired state.
    pub desired: StageDesiredState,
    /// Identity recorded by the previous run.
    pub previous: Option<StageIdentity>,
}

/// Result of one stage of a batch run.
#[derive(Debug)]
pub struct BatchResult {
    /// Logical id.
    pub logical_id: String,
    /// Desired qualified name.
    pub stage: String,
    /// Outcome of the pass.
    pub result: Result<ReconcileOutcome>,
}

/// Reconciles distinct stages concurrently, at most `parallel` at a time.
///
/// Each stage runs its own sequential pass; passes share nothing but the
/// store. Results come back in input order.
pub async fn reconcile_batch(
    store: Arc<dyn RemoteObjectStore>,
    items: Vec<BatchItem>,
    options: ReconcileOptions,
    parallel: usize,
) -> Vec<BatchResult> {
    let semaphore = Arc::new(Semaphore::new(parallel.max(1)));
    let names: Vec<(String, String)> = items
        .iter()
        .map(|i| (i.logical_id.clone(), i.desired.qualified_name().to_string()))
        .collect();
    let mut tasks = JoinSet::new();

    for (index, item) in items.into_iter().enumerate() {
        let store = Arc::clone(&store);
        let semaphore = Arc::clone(&semaphore);
        tasks.spawn(async move {
            let _permit = semaphore.acquire_owned().await.ok();
            let reconciler = Reconciler::with_options(store.as_ref(), options);
            let result = reconciler
                .reconcile(&item.desired, item.previous.as_ref())
                .await;
            (index, result)
        });
    }

    let mut finished: Vec<Option<Result<ReconcileOutcome>>> =
        std::iter::repeat_with(|| None).take(names.len()).collect();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((index, result)) => finished[index] = Some(result),
            Err(e) => error!("Reconcile task did not complete: {e}"),
        }
    }

    names
        .into_iter()
        .zip(finished)
        .map(|((logical_id, stage), result)| BatchResult {
            result: result.unwrap_or_else(|| {
                Err(StageError::internal(format!("reconcile task for {stage} was lost")))
            }),
            logical_id,
            stage,
        })
        .collect()
}

fn advance(stage: &str, phase: &mut ReconcilePhase, next: ReconcilePhase) {
    info!("{stage}: {phase} -> {next}");
    *phase = next;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RemoteError;
    use crate::remote::MockRemoteObjectStore;

    fn stage() -> StageDesiredState {
        StageDesiredState::internal("db", "sc", "st")
    }

    #[tokio::test]
    async fn test_invalid_document_makes_no_remote_call() {
        let mut store = MockRemoteObjectStore::new();
        store.expect_describe().times(0);
        store.expect_create().times(0);

        let invalid = StageDesiredState::internal("", "sc", "st");
        let err = Reconciler::new(&store)
            .reconcile(&invalid, None)
            .await
            .unwrap_err();
        assert!(matches!(err, StageError::Validation(_)));
    }

    #[tokio::test]
    async fn test_describe_failure_is_not_retried() {
        let mut store = MockRemoteObjectStore::new();
        store.expect_describe().times(1).returning(|_| {
            Err(RemoteError::Unavailable {
                message: String::from("warehouse suspended"),
            })
        });

        let err = Reconciler::new(&store)
            .reconcile(&stage(), None)
            .await
            .unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_missing_previous_identity_is_drift() {
        let mut store = MockRemoteObjectStore::new();
        store
            .expect_describe()
            .returning(|name| Err(RemoteError::not_found(name)));
        store.expect_create().times(0);

        let previous = StageIdentity::new(String::from("gone"), QualifiedName::new("db", "sc", "st"));
        let err = Reconciler::new(&store)
            .reconcile(&stage(), Some(&previous))
            .await
            .unwrap_err();
        assert!(err.is_drift());
    }

    #[tokio::test]
    async fn test_create_failure_fails_the_pass() {
        let mut store = MockRemoteObjectStore::new();
        store
            .expect_describe()
            .times(1)
            .returning(|name| Err(RemoteError::not_found(name)));
        store
            .expect_create()
            .times(1)
            .returning(|_| Err(RemoteError::rejected("create", "insufficient privileges")));

        let err = Reconciler::new(&store)
            .reconcile(&stage(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, StageError::Remote(RemoteError::Rejected { .. })));
    }

    #[tokio::test]
    async fn test_destroy_treats_not_found_as_gone() {
        let mut store = MockRemoteObjectStore::new();
        store
            .expect_drop_stage()
            .returning(|id| Err(RemoteError::not_found(&id.name)));

        let identity = StageIdentity::new(String::from("x"), QualifiedName::new("db", "sc", "st"));
        assert!(!Reconciler::new(&store).destroy(&identity).await.unwrap());
    }
}
