//! Type definitions for agent-runtime interactions

use mend_core::{EffortTier, Model, Usage};
use serde::{Deserialize, Serialize};

/// Opaque session identifier issued by the agent runtime
pub type SessionId = String;

/// Handle to a live session: the id plus the label it was started under
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionHandle {
    pub id: SessionId,
    pub label: String,
}

impl SessionHandle {
    pub fn new(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
        }
    }
}

/// What concern a session serves; part of the session-affinity key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionKind {
    /// Applies edits to a conflicted file
    Worker,
    /// Produces a strategic plan and reviews executor output
    Planner,
    /// Inspects a failed attempt and writes retry feedback
    Reviewer,
    /// Analyzes one side's intent in the parallel strategy
    Analyst,
    /// Handles a CI failure with no owning worker session
    CiSpecialist,
    /// Approval policy session
    Policy,
    /// Compresses oversized verification logs
    Summarizer,
}

impl std::fmt::Display for SessionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Worker => write!(f, "worker"),
            Self::Planner => write!(f, "planner"),
            Self::Reviewer => write!(f, "reviewer"),
            Self::Analyst => write!(f, "analyst"),
            Self::CiSpecialist => write!(f, "ci_specialist"),
            Self::Policy => write!(f, "policy"),
            Self::Summarizer => write!(f, "summarizer"),
        }
    }
}

/// Filesystem/network access granted to a session's tools
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SandboxMode {
    ReadOnly,
    #[default]
    WorkspaceWrite,
    FullAccess,
}

/// Options for starting, resuming, or forking a session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionOptions {
    /// Human-readable label (also used for session-affinity keys)
    pub label: String,
    pub model: Model,
    pub effort: EffortTier,
    pub sandbox: SandboxMode,
    /// Optional system prompt prepended to the session
    pub system_prompt: Option<String>,
}

impl SessionOptions {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            model: Model::default(),
            effort: EffortTier::default(),
            sandbox: SandboxMode::default(),
            system_prompt: None,
        }
    }

    pub fn with_model(mut self, model: Model) -> Self {
        self.model = model;
        self
    }

    pub fn with_effort(mut self, effort: EffortTier) -> Self {
        self.effort = effort;
        self
    }

    pub fn with_sandbox(mut self, sandbox: SandboxMode) -> Self {
        self.sandbox = sandbox;
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }
}

/// Per-turn options
#[derive(Debug, Clone, Default)]
pub struct TurnOptions {
    /// JSON schema the response must satisfy; the structured output is
    /// still validated by the caller before use
    pub output_schema: Option<serde_json::Value>,
    /// Override the session's effort tier for this turn
    pub effort: Option<EffortTier>,
}

impl TurnOptions {
    pub fn with_schema(schema: serde_json::Value) -> Self {
        Self {
            output_schema: Some(schema),
            effort: None,
        }
    }

    pub fn with_effort(mut self, effort: EffortTier) -> Self {
        self.effort = Some(effort);
        self
    }
}

/// Result of one prompt/response round within a session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnOutput {
    /// The agent's final text
    pub final_text: String,
    /// Schema-constrained output, present only when a schema was requested
    pub structured_output: Option<serde_json::Value>,
    /// Token usage for this turn
    pub usage: Usage,
}

impl TurnOutput {
    pub fn text(final_text: impl Into<String>) -> Self {
        Self {
            final_text: final_text.into(),
            structured_output: None,
            usage: Usage::default(),
        }
    }

    pub fn structured(value: serde_json::Value) -> Self {
        Self {
            final_text: String::new(),
            structured_output: Some(value),
            usage: Usage::default(),
        }
    }
}

/// A sensitive operation raised by some session, awaiting a decision
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalRequest {
    /// Session that raised the request
    pub session_id: SessionId,
    /// Operation kind (e.g. `shell`, `write_file`, `network`)
    pub operation: String,
    /// Short human-readable title
    pub title: String,
    /// Operation-specific details
    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// Three-valued approval decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalDecision {
    /// Approve this request only
    AllowOnce,
    /// Approve this and equivalent future requests from the session
    AllowAlways,
    Deny,
}

impl std::fmt::Display for ApprovalDecision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AllowOnce => write!(f, "allow_once"),
            Self::AllowAlways => write!(f, "allow_always"),
            Self::Deny => write!(f, "deny"),
        }
    }
}

/// Decision plus a short reason, returned to the runtime
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalVerdict {
    pub decision: ApprovalDecision,
    pub reason: String,
}

impl ApprovalVerdict {
    pub fn deny(reason: impl Into<String>) -> Self {
        Self {
            decision: ApprovalDecision::Deny,
            reason: reason.into(),
        }
    }

    pub fn allow_once(reason: impl Into<String>) -> Self {
        Self {
            decision: ApprovalDecision::AllowOnce,
            reason: reason.into(),
        }
    }
}
