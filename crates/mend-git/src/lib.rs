//! # mend-git
//!
//! Git integration layer for Mend.
//!
//! Everything the orchestrator knows about the repository flows through
//! this crate: the conflicted-path listing, per-conflict snapshots (diff
//! excerpts, marker counts, recent history), staging, and divergence
//! summaries. Commands run through the [`GitExecutor`] trait so the
//! orchestration layer can be driven against a scripted mock in tests.
//!
//! The collector never caches repository state. The scheduler's
//! trust-but-verify step depends on every read reflecting the live
//! working tree.

mod command;
mod markers;
mod snapshot;

pub use command::{GitCommand, GitExecutor, GitOutput, MockGitExecutor};
pub use markers::{count_markers, has_markers, marker_excerpt};
pub use snapshot::{MergeRefs, RepoSnapshot, SnapshotCollector};
