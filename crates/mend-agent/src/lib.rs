//! # mend-agent
//!
//! Agent-runtime client and session management for Mend.
//!
//! Worker agents live in long-running conversational sessions owned by an
//! external agent runtime. This crate defines the runtime interface
//! ([`AgentRuntime`]: start, resume, fork, run-turn), an HTTP-backed
//! implementation with rate-limit retry, and the [`SessionManager`] that
//! preserves session affinity per work item and forks new sessions from a
//! shared coordinator context.
//!
//! ## Key pattern
//!
//! Sessions are acquired by composite key (`label` + [`SessionKind`]) and
//! never created twice for the same key: the handle map is the single
//! source of truth, and acquisition is idempotent under concurrency.
//! Sensitive operations raised by any session flow back through the
//! [`ApprovalHandler`] injected into the runtime client at construction.

mod client;
mod mock;
mod runtime;
mod session;
mod types;

pub use client::HttpRuntime;
pub use mock::{MockRuntime, TurnRecord};
pub use runtime::{AgentRuntime, ApprovalHandler, DenyAll};
pub use session::{SessionKey, SessionManager};
pub use types::*;
