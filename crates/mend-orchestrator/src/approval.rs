//! Approval gate
//!
//! Every sensitive operation raised by any worker session lands here. A
//! dedicated policy session decides approve-once / approve-always / deny;
//! the session is a single-owner resource, so decisions serialize behind
//! its lock and one worker's context can never bleed into another's
//! decision. Anything unparsable or errored denies — the gate fails
//! closed.

use mend_agent::{
    AgentRuntime, ApprovalDecision, ApprovalHandler, ApprovalRequest, ApprovalVerdict,
    SessionHandle, SessionId, SessionOptions, TurnOptions, TurnOutput,
};
use mend_core::{EffortTier, Model};
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::prompt::{build_approval_prompt, build_denial_note};

/// The focus a session is working under when it raises approvals.
///
/// Registered before a worker round begins and removed by the guard on
/// every exit path, so a request always sees the context of the session
/// that raised it (not whichever worker ran last).
#[derive(Debug, Clone, Default)]
pub struct ApprovalContext {
    /// Conflict path the session is resolving
    pub path: Option<String>,
    /// Plan text the session is following
    pub plan: Option<String>,
    /// Freeform notes for the policy session
    pub notes: Option<String>,
}

/// Process-wide approval gate shared by all concurrent workers
pub struct ApprovalGate {
    runtime: Arc<dyn AgentRuntime>,
    model: Model,
    /// Policy session, lazily started; the lock doubles as the critical
    /// section around its turns
    policy: tokio::sync::Mutex<Option<SessionHandle>>,
    contexts: std::sync::Mutex<HashMap<SessionId, ApprovalContext>>,
    coordinator: std::sync::Mutex<Option<SessionHandle>>,
}

impl ApprovalGate {
    pub fn new(runtime: Arc<dyn AgentRuntime>, model: Model) -> Self {
        Self {
            runtime,
            model,
            policy: tokio::sync::Mutex::new(None),
            contexts: std::sync::Mutex::new(HashMap::new()),
            coordinator: std::sync::Mutex::new(None),
        }
    }

    /// Register the coordinator session notified on denials
    pub fn set_coordinator(&self, handle: SessionHandle) {
        *self.coordinator.lock().expect("coordinator lock") = Some(handle);
    }

    /// Register `context` as the focus for `session_id` until the returned
    /// guard drops
    pub fn register_focus(
        self: &Arc<Self>,
        session_id: &SessionId,
        context: ApprovalContext,
    ) -> FocusGuard {
        self.contexts
            .lock()
            .expect("contexts lock")
            .insert(session_id.clone(), context);

        FocusGuard {
            gate: Arc::clone(self),
            session_id: session_id.clone(),
        }
    }

    fn focus_for(&self, session_id: &SessionId) -> Option<ApprovalContext> {
        self.contexts
            .lock()
            .expect("contexts lock")
            .get(session_id)
            .cloned()
    }

    async fn decide(&self, request: &ApprovalRequest) -> ApprovalVerdict {
        let context = self.focus_for(&request.session_id);
        let prompt = build_approval_prompt(request, context.as_ref());

        // Critical section: the policy session is not designed for
        // parallel turns.
        let mut policy = self.policy.lock().await;

        if policy.is_none() {
            let options = SessionOptions::new("approval-policy")
                .with_model(self.model)
                .with_effort(EffortTier::Low)
                .with_sandbox(mend_agent::SandboxMode::ReadOnly);

            match self.runtime.start_session(options).await {
                Ok(handle) => {
                    debug!("Started approval policy session {}", handle.id);
                    *policy = Some(handle);
                }
                Err(e) => {
                    warn!("Failed to start approval policy session: {}", e);
                    return ApprovalVerdict::deny("approval policy session unavailable");
                }
            }
        }

        let handle = match policy.as_ref() {
            Some(handle) => handle.clone(),
            None => return ApprovalVerdict::deny("approval policy session unavailable"),
        };

        match self
            .runtime
            .run_turn(&handle, &prompt, TurnOptions::with_schema(approval_schema()))
            .await
        {
            Ok(output) => match decode_approval(&output) {
                Some(verdict) => verdict,
                None => {
                    warn!(
                        "Unparsable approval response for {} ({}); denying",
                        request.operation, request.title
                    );
                    ApprovalVerdict::deny("unparsable policy response")
                }
            },
            Err(e) => {
                warn!("Approval policy turn failed: {}; denying", e);
                ApprovalVerdict::deny(format!("policy session error: {}", e))
            }
        }
    }

    /// Push a short denial note to the coordinator so the shared plan can
    /// adapt. Best-effort: failures are logged and swallowed.
    async fn notify_denial(&self, request: &ApprovalRequest, reason: &str) {
        let coordinator = self.coordinator.lock().expect("coordinator lock").clone();
        let Some(handle) = coordinator else {
            return;
        };

        let note = build_denial_note(request, reason);
        if let Err(e) = self
            .runtime
            .run_turn(&handle, &note, TurnOptions::default())
            .await
        {
            warn!("Failed to push denial note to coordinator: {}", e);
        }
    }
}

#[async_trait::async_trait]
impl ApprovalHandler for ApprovalGate {
    async fn handle_approval(&self, request: ApprovalRequest) -> ApprovalVerdict {
        let verdict = self.decide(&request).await;

        info!(
            "Approval {} for {} ({}): {}",
            verdict.decision, request.operation, request.title, verdict.reason
        );

        if verdict.decision == ApprovalDecision::Deny {
            self.notify_denial(&request, &verdict.reason).await;
        }

        verdict
    }
}

/// Removes a session's registered focus when dropped, so the slot is
/// cleared on every exit path including early returns and errors.
pub struct FocusGuard {
    gate: Arc<ApprovalGate>,
    session_id: SessionId,
}

impl Drop for FocusGuard {
    fn drop(&mut self) {
        self.gate
            .contexts
            .lock()
            .expect("contexts lock")
            .remove(&self.session_id);
    }
}

#[derive(Deserialize)]
struct ApprovalPayload {
    decision: String,
    #[serde(default)]
    reason: Option<String>,
}

/// JSON schema requested for approval turns
fn approval_schema() -> serde_json::Value {
    json!({
        "type": "object",
        "properties": {
            "decision": {
                "type": "string",
                "enum": ["allow_once", "allow_always", "deny"]
            },
            "reason": { "type": "string" }
        },
        "required": ["decision"]
    })
}

/// Decode a policy turn; `None` means unparsable (deny upstream)
fn decode_approval(output: &TurnOutput) -> Option<ApprovalVerdict> {
    let value = output.structured_output.as_ref()?;
    let payload: ApprovalPayload = serde_json::from_value(value.clone()).ok()?;

    let decision = match payload.decision.as_str() {
        "allow_once" => ApprovalDecision::AllowOnce,
        "allow_always" => ApprovalDecision::AllowAlways,
        "deny" => ApprovalDecision::Deny,
        _ => return None,
    };

    Some(ApprovalVerdict {
        decision,
        reason: payload.reason.unwrap_or_default(),
    })
}
