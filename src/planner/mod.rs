//! Planning module for stage changes.
//!
//! This module compares canonical desired and observed views, classifies each
//! difference with the replacement policy, and turns the result into an
//! ordered list of remote operations.

mod diff;
mod executor;
mod plan;
mod policy;

pub use diff::{AttributeChange, DiffEngine};
pub use executor::{ExecutionReport, OperationRecord, PlanExecutor};
pub use plan::{AlterGroup, PlanAction, RemoteOperation, StagePlan};
pub use policy::{ChangeAction, ReplacementDecision, ReplacementPolicy};
