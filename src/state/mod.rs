//! State management for reconciled stages.
//!
//! This module persists the identity of every stage the tool has reconciled,
//! keyed by logical id, together with a short operation history and an
//! advisory lock.

mod local;
mod lock;
mod store;
mod types;

pub use local::{LocalStateStore, STATE_DIR};
pub use lock::{LOCK_EXPIRY_SECS, LockInfo, generate_holder_id};
pub use store::StateStore;
pub use types::{HistoryEntry, ReconcileState, STATE_VERSION, StageRecord, StateOperation};
