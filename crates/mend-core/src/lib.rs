//! # mend-core
//!
//! Core types for Mend, an unattended merge-conflict resolution
//! orchestrator.
//!
//! Mend drives a fleet of LLM-backed worker sessions against a batch of
//! git merge conflicts: each conflict is classified, assigned a
//! resolution strategy, and driven through attempt/retry rounds while a
//! supervisory policy session gates anything sensitive. Once every
//! conflict is clear, a verification command runs and its failures are
//! triaged back to the sessions that touched the relevant files.
//!
//! This crate holds the shared vocabulary: conflict snapshots, severity
//! scoring, worker outcomes, model/effort tiers, the unified error type,
//! and repository-level configuration.

mod config;
mod error;
mod types;

pub use config::{
    ClassifierConfig, MendConfig, ModelConfig, SchedulerConfig, StrategyConfig, VerifyConfig,
};
pub use error::{MendError, Result};
pub use types::*;
