//! HTTP client for the agent runtime service
//!
//! Sessions and turns map onto a small REST surface. A turn may suspend on
//! a sensitive operation; the service then answers `approval_required`,
//! the injected [`ApprovalHandler`] is consulted, and the decision is
//! posted back to continue the same turn. Rate limits and server errors
//! retry with exponential backoff.

use mend_core::{MendError, Result, Usage};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::runtime::{AgentRuntime, ApprovalHandler, DenyAll};
use crate::types::{
    ApprovalRequest, SessionHandle, SessionOptions, TurnOptions, TurnOutput,
};
use async_trait::async_trait;

// Rate limit retry configuration
const MAX_RETRIES: u32 = 5;
const INITIAL_BACKOFF_SECS: u64 = 10;
const MAX_BACKOFF_SECS: u64 = 300;

// Upper bound on approval round-trips within one turn
const MAX_APPROVAL_ROUNDS: u32 = 16;

/// Authentication token for the runtime service, from the environment
fn auth_token() -> Result<String> {
    std::env::var("MEND_RUNTIME_TOKEN")
        .or_else(|_| std::env::var("AGENT_RUNTIME_TOKEN"))
        .map_err(|_| {
            MendError::Runtime(
                "No runtime auth token found. Set MEND_RUNTIME_TOKEN or AGENT_RUNTIME_TOKEN."
                    .to_string(),
            )
        })
}

/// HTTP-backed [`AgentRuntime`] implementation
pub struct HttpRuntime {
    base_url: String,
    token: String,
    approvals: Arc<dyn ApprovalHandler>,
    client: reqwest::Client,
}

impl HttpRuntime {
    /// Create a client against the given service URL
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            token: token.into(),
            approvals: Arc::new(DenyAll),
            client: reqwest::Client::new(),
        }
    }

    /// Create a client with the auth token taken from the environment
    pub fn from_env(base_url: impl Into<String>) -> Result<Self> {
        Ok(Self::new(base_url, auth_token()?))
    }

    /// Inject the approval handler consulted for every sensitive operation
    /// across all sessions this client owns
    pub fn with_approval_handler(mut self, handler: Arc<dyn ApprovalHandler>) -> Self {
        self.approvals = handler;
        self
    }

    /// POST with rate-limit/server-error retry, returning the parsed body
    async fn post_json<B: Serialize, T: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T> {
        let url = format!("{}{}", self.base_url.trim_end_matches('/'), path);

        let mut retries = 0;
        let mut backoff_secs = INITIAL_BACKOFF_SECS;

        loop {
            debug!("POST {} (attempt {})", url, retries + 1);

            let response = self
                .client
                .post(&url)
                .bearer_auth(&self.token)
                .header("x-request-id", uuid::Uuid::new_v4().to_string())
                .json(body)
                .send()
                .await
                .map_err(|e| MendError::Runtime(format!("Failed to send request: {}", e)))?;

            let status = response.status();

            // Rate limit: honor retry-after when present
            if status.as_u16() == 429 {
                retries += 1;
                if retries > MAX_RETRIES {
                    return Err(MendError::Runtime(format!(
                        "Rate limit exceeded after {} retries",
                        MAX_RETRIES
                    )));
                }

                let wait_secs = response
                    .headers()
                    .get("retry-after")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|s| s.parse::<u64>().ok())
                    .unwrap_or(backoff_secs);

                warn!(
                    "Rate limited (429). Waiting {}s before retry {}/{}",
                    wait_secs, retries, MAX_RETRIES
                );

                tokio::time::sleep(Duration::from_secs(wait_secs)).await;
                backoff_secs = (backoff_secs * 2).min(MAX_BACKOFF_SECS);
                continue;
            }

            if !status.is_success() {
                let error_text = response
                    .text()
                    .await
                    .unwrap_or_else(|_| "Unknown".to_string());

                if status.is_server_error() && retries < MAX_RETRIES {
                    retries += 1;
                    warn!(
                        "Server error ({}). Waiting {}s before retry {}/{}",
                        status, backoff_secs, retries, MAX_RETRIES
                    );
                    tokio::time::sleep(Duration::from_secs(backoff_secs)).await;
                    backoff_secs = (backoff_secs * 2).min(MAX_BACKOFF_SECS);
                    continue;
                }

                return Err(MendError::Runtime(format!(
                    "Runtime API error {}: {}",
                    status, error_text
                )));
            }

            return response
                .json()
                .await
                .map_err(|e| MendError::Runtime(format!("Failed to parse response: {}", e)));
        }
    }
}

#[derive(Serialize)]
struct SessionRequest<'a> {
    label: &'a str,
    model: &'a str,
    effort: String,
    sandbox: crate::types::SandboxMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_prompt: Option<&'a str>,
}

impl<'a> SessionRequest<'a> {
    fn from_options(options: &'a SessionOptions) -> Self {
        Self {
            label: &options.label,
            model: options.model.api_name(),
            effort: options.effort.to_string(),
            sandbox: options.sandbox,
            system_prompt: options.system_prompt.as_deref(),
        }
    }
}

#[derive(Serialize)]
struct ForkRequest<'a> {
    at_turn: usize,
    #[serde(flatten)]
    options: SessionRequest<'a>,
}

#[derive(Deserialize)]
struct SessionResponse {
    session_id: String,
}

#[derive(Serialize)]
struct TurnRequest<'a> {
    prompt: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    output_schema: Option<&'a serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    effort: Option<String>,
}

#[derive(Serialize)]
struct ApprovalResponseBody<'a> {
    approval_id: &'a str,
    decision: crate::types::ApprovalDecision,
    reason: &'a str,
}

#[derive(Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
enum TurnResponse {
    Completed {
        final_text: String,
        #[serde(default)]
        structured_output: Option<serde_json::Value>,
        #[serde(default)]
        usage: Usage,
    },
    ApprovalRequired {
        approval_id: String,
        operation: String,
        title: String,
        #[serde(default)]
        metadata: serde_json::Value,
    },
}

#[async_trait]
impl AgentRuntime for HttpRuntime {
    async fn start_session(&self, options: SessionOptions) -> Result<SessionHandle> {
        let response: SessionResponse = self
            .post_json("/v1/sessions", &SessionRequest::from_options(&options))
            .await?;

        debug!("Started session {} ({})", response.session_id, options.label);
        Ok(SessionHandle::new(response.session_id, options.label))
    }

    async fn resume_session(&self, id: &str, options: SessionOptions) -> Result<SessionHandle> {
        let path = format!("/v1/sessions/{}/resume", id);
        let response: SessionResponse = self
            .post_json(&path, &SessionRequest::from_options(&options))
            .await?;

        Ok(SessionHandle::new(response.session_id, options.label))
    }

    async fn fork_session(
        &self,
        parent: &SessionHandle,
        at_turn: usize,
        options: SessionOptions,
    ) -> Result<SessionHandle> {
        let path = format!("/v1/sessions/{}/fork", parent.id);
        let body = ForkRequest {
            at_turn,
            options: SessionRequest::from_options(&options),
        };

        let response: SessionResponse = self
            .post_json(&path, &body)
            .await
            .map_err(|e| MendError::Fork(e.to_string()))?;

        debug!(
            "Forked session {} from {} at turn {}",
            response.session_id, parent.id, at_turn
        );
        Ok(SessionHandle::new(response.session_id, options.label))
    }

    async fn run_turn(
        &self,
        handle: &SessionHandle,
        prompt: &str,
        options: TurnOptions,
    ) -> Result<TurnOutput> {
        let turn_path = format!("/v1/sessions/{}/turns", handle.id);
        let approval_path = format!("/v1/sessions/{}/approvals", handle.id);

        let mut response: TurnResponse = self
            .post_json(
                &turn_path,
                &TurnRequest {
                    prompt,
                    output_schema: options.output_schema.as_ref(),
                    effort: options.effort.map(|e| e.to_string()),
                },
            )
            .await?;

        // A turn can suspend on several sensitive operations in sequence;
        // answer each and continue the same turn.
        let mut rounds = 0;
        loop {
            match response {
                TurnResponse::Completed {
                    final_text,
                    structured_output,
                    usage,
                } => {
                    return Ok(TurnOutput {
                        final_text,
                        structured_output,
                        usage,
                    });
                }
                TurnResponse::ApprovalRequired {
                    approval_id,
                    operation,
                    title,
                    metadata,
                } => {
                    rounds += 1;
                    if rounds > MAX_APPROVAL_ROUNDS {
                        return Err(MendError::Runtime(format!(
                            "Turn exceeded {} approval rounds",
                            MAX_APPROVAL_ROUNDS
                        )));
                    }

                    let verdict = self
                        .approvals
                        .handle_approval(ApprovalRequest {
                            session_id: handle.id.clone(),
                            operation,
                            title,
                            metadata,
                        })
                        .await;

                    response = self
                        .post_json(
                            &approval_path,
                            &ApprovalResponseBody {
                                approval_id: &approval_id,
                                decision: verdict.decision,
                                reason: &verdict.reason,
                            },
                        )
                        .await?;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_env_without_token() {
        std::env::remove_var("MEND_RUNTIME_TOKEN");
        std::env::remove_var("AGENT_RUNTIME_TOKEN");

        assert!(HttpRuntime::from_env("http://localhost:7700").is_err());
    }

    #[test]
    fn test_turn_response_parsing() {
        let completed: TurnResponse = serde_json::from_str(
            r#"{"status": "completed", "final_text": "done", "usage": {"input_tokens": 5, "output_tokens": 2}}"#,
        )
        .unwrap();
        assert!(matches!(completed, TurnResponse::Completed { .. }));

        let approval: TurnResponse = serde_json::from_str(
            r#"{"status": "approval_required", "approval_id": "ap-1", "operation": "shell", "title": "git add"}"#,
        )
        .unwrap();
        assert!(matches!(approval, TurnResponse::ApprovalRequired { .. }));
    }

    #[test]
    fn test_session_request_serialization() {
        let options = SessionOptions::new("worker:a.rs");
        let body = serde_json::to_value(SessionRequest::from_options(&options)).unwrap();

        assert_eq!(body["label"], "worker:a.rs");
        assert_eq!(body["sandbox"], "workspace-write");
        assert!(body.get("system_prompt").is_none());
    }
}
