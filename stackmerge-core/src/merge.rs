//! Three-way merging of emitters.
//!
//! An instance emitter is derived from a parent. [`MergeManager::merge_emitter`]
//! diffs the instance against the parent as it was at the last merge, then
//! applies that diff to a fresh copy of the current parent:
//!
//! 1. [`adapter`] builds read-only snapshots of both emitters.
//! 2. [`diff`] compares them stack by stack, keyed by stable ids.
//! 3. [`apply`] replays the differences onto the parent copy.
//! 4. [`change_id`] reconciles node change ids so untouched nodes keep
//!    their compiled output.
//!
//! Diff and apply failures are collected as messages rather than returned
//! as errors, so that one merge attempt reports every problem.

pub mod adapter;
pub mod apply;
pub mod change_id;
pub mod diff;
pub mod error;
pub mod list_diff;
pub mod manager;
pub mod property_diff;

pub use adapter::{AdapterCache, EmitterAdapter, FunctionAdapter, InputOverrideAdapter, OverrideValue};
pub use apply::ApplyResult;
pub use diff::{DiffSummary, EmitterDiff, ScriptStackDiff, do_input_overrides_match};
pub use error::{DiffSide, MergeError};
pub use manager::{MergeManager, MergeOptions, MergeResult, MergeStatus};
