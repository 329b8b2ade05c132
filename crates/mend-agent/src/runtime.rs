//! Agent runtime interface
//!
//! The runtime executes prompts inside persistent sessions and raises
//! sensitive operations through the injected [`ApprovalHandler`]. Mend
//! never talks to a model directly; everything goes through this trait so
//! the orchestration layer can run against [`crate::MockRuntime`] in
//! tests.

use async_trait::async_trait;
use mend_core::Result;

use crate::types::{
    ApprovalRequest, ApprovalVerdict, SessionHandle, SessionOptions, TurnOptions, TurnOutput,
};

/// A conversational agent runtime: persistent sessions, one prompt/response
/// round per turn, and forking of an existing session's context.
#[async_trait]
pub trait AgentRuntime: Send + Sync {
    /// Start a fresh session
    async fn start_session(&self, options: SessionOptions) -> Result<SessionHandle>;

    /// Re-attach to an existing session by id
    async fn resume_session(&self, id: &str, options: SessionOptions) -> Result<SessionHandle>;

    /// Create a new session inheriting `parent`'s context up to `at_turn`,
    /// then diverging independently
    async fn fork_session(
        &self,
        parent: &SessionHandle,
        at_turn: usize,
        options: SessionOptions,
    ) -> Result<SessionHandle>;

    /// Run one prompt/response round in a session
    async fn run_turn(
        &self,
        handle: &SessionHandle,
        prompt: &str,
        options: TurnOptions,
    ) -> Result<TurnOutput>;
}

/// Decides sensitive operation requests raised by any session.
///
/// One handler instance is injected into the runtime client at
/// construction; it is invoked for every session the client owns, so
/// implementations must be safe under concurrent calls.
#[async_trait]
pub trait ApprovalHandler: Send + Sync {
    async fn handle_approval(&self, request: ApprovalRequest) -> ApprovalVerdict;
}

/// Default handler that denies everything.
///
/// Used until a real gate is wired in; keeps the fail-closed posture even
/// when construction order goes wrong.
pub struct DenyAll;

#[async_trait]
impl ApprovalHandler for DenyAll {
    async fn handle_approval(&self, request: ApprovalRequest) -> ApprovalVerdict {
        ApprovalVerdict::deny(format!("no approval policy configured for {}", request.operation))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_deny_all() {
        let handler = DenyAll;
        let verdict = handler
            .handle_approval(ApprovalRequest {
                session_id: "s-1".to_string(),
                operation: "shell".to_string(),
                title: "rm -rf target".to_string(),
                metadata: serde_json::Value::Null,
            })
            .await;

        assert_eq!(verdict.decision, crate::types::ApprovalDecision::Deny);
        assert!(verdict.reason.contains("shell"));
    }
}
