//! # mend-orchestrator
//!
//! The orchestration engine for Mend.
//!
//! This crate drives a batch of merge conflicts through resolution:
//! - Classification (simple vs complex, effort tier) and strategy
//!   selection (single-agent, planner+executor, parallel analysis)
//! - Concurrency-bounded batch scheduling with retry, escalating context,
//!   trust-but-verify disk re-reads, and fail-fast batch halting
//! - The approval gate that decides every sensitive operation raised by
//!   any worker session, failing closed on anything unparsable
//! - CI triage: mining the verification log for failures, routing each to
//!   the session that touched the relevant file, and compressing
//!   oversized logs through a summarizer session
//!
//! Git access goes through `mend-git` and model access through
//! `mend-agent`; both are trait-backed so the whole engine runs against
//! mocks in tests.

mod approval;
mod classifier;
mod overflow;
mod prompt;
mod review;
mod run;
mod scheduler;
mod strategy;
mod triage;

pub use approval::{ApprovalContext, ApprovalGate, FocusGuard};
pub use classifier::{classify, Classification};
pub use overflow::{prepare_log, prepared_log_bound, PreparedLog};
pub use review::{decode_review, review_schema, ReviewDecision};
pub use run::{Orchestrator, RunReport};
pub use scheduler::Scheduler;
pub use strategy::{select_strategy, AnalysisAngle, ConflictWorker, ResolutionProbe, Strategy};
pub use triage::{
    extract_failures, extract_hints, CiFailure, ProcessVerifyRunner, TriagePipeline,
    TriageReport, VerifyOutput, VerifyRunner,
};
