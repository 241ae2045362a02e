// ============================================================================
// Linting
// ============================================================================

#![deny(unsafe_code)]                 // Unsafe code is forbidden
#![warn(missing_docs)]                // All public items must be documented
#![warn(dead_code)]                   // Unused code should be removed
#![deny(non_camel_case_types)]        // Types must follow CamelCase convention

#![warn(unused_imports)]
#![warn(unused_variables)]
#![deny(unused_must_use)]             // Must handle Result and Option explicitly
#![deny(non_snake_case)]
#![deny(non_upper_case_globals)]
#![deny(nonstandard_style)]

// Clippy lints (warnings only)
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::panic)]
#![warn(clippy::print_stdout)]
#![warn(clippy::todo)]
#![warn(clippy::unimplemented)]
#![warn(clippy::unwrap_in_result)]
#![warn(clippy::redundant_clone)]
#![warn(clippy::cognitive_complexity)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used, clippy::panic))]

#![deny(overflowing_literals)]
#![deny(arithmetic_overflow)]

// ============================================================================
// Crate Documentation
// ============================================================================

//! # Stage Reconciler
//!
//! A declarative, idempotent reconciliation engine for data-warehouse stages
//! (named pointers to internal or external cloud storage).
//!
//! ## Overview
//!
//! Given the complete desired state of a stage, the engine:
//!
//! - validates the document before any remote call
//! - reads the stage from the remote catalog and normalizes both sides
//! - diffs attribute by attribute and classifies each change as no-op,
//!   in-place update, or replace
//! - applies the minimal set of remote calls and verifies convergence
//!
//! ## Architecture
//!
//! 1. **Desired State**: one entry of `stagectl.yaml`
//! 2. **Observed State**: `describe` output from a [`remote::RemoteObjectStore`]
//! 3. **Reconciler**: plans, applies and verifies one stage per pass
//!
//! ## Modules
//!
//! - [`config`]: Manifest parsing and validation
//! - [`normalize`]: Canonical views of desired and observed stages
//! - [`planner`]: Diff, replacement policy, plans and their execution
//! - [`reconciler`]: The reconciliation pass and batch runner
//! - [`remote`]: Remote store trait plus in-memory and file backends
//! - [`state`]: Identity state storage
//! - [`cli`]: Command-line interface
//!
//! ## Example
//!
//! ```yaml
//! stages:
//!   - database: analytics
//!     schema: raw
//!     name: landing
//!     storage:
//!       type: s3
//!       url: s3://my-bucket/landing/
//!       storage_integration: s3_int
//!     directory:
//!       enable: true
//! ```

// ============================================================================
// Modules
// ============================================================================

pub mod cli;
pub mod config;
pub mod error;
pub mod normalize;
pub mod planner;
pub mod reconciler;
pub mod remote;
pub mod state;

// ============================================================================
// Re-exports
// ============================================================================

pub use config::{ConfigHasher, ConfigParser, ConfigValidator, StageDesiredState, StageManifest};
pub use error::{Result, StageError};
pub use normalize::{CanonicalStageView, Normalizer, StageObservedState};
pub use planner::{AttributeChange, DiffEngine, ReplacementDecision, StagePlan};
pub use reconciler::{ReconcileOptions, ReconcileOutcome, Reconciler};
pub use remote::{FileObjectStore, InMemoryObjectStore, RemoteObjectStore, StageIdentity};
pub use state::{LocalStateStore, ReconcileState, StateStore};
