//! Session affinity management
//!
//! Each logical work item keeps one conversational session per concern for
//! the whole run, so verification, staging, and retry rounds see the
//! context built up by earlier rounds. The map is the single source of
//! truth: acquiring the same key twice always yields the same handle, even
//! under concurrent acquires.

use mend_core::Result;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::runtime::AgentRuntime;
use crate::types::{SessionHandle, SessionKind, SessionOptions};

/// Composite session-affinity key: a label (usually a conflict path) plus
/// the concern the session serves
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionKey {
    pub label: String,
    pub kind: SessionKind,
}

impl SessionKey {
    pub fn new(label: impl Into<String>, kind: SessionKind) -> Self {
        Self {
            label: label.into(),
            kind,
        }
    }

    pub fn worker(path: &str) -> Self {
        Self::new(path, SessionKind::Worker)
    }

    pub fn planner(path: &str) -> Self {
        Self::new(path, SessionKind::Planner)
    }

    pub fn reviewer(path: &str) -> Self {
        Self::new(path, SessionKind::Reviewer)
    }

    pub fn analyst(path: &str, angle: &str) -> Self {
        Self::new(format!("{}#{}", path, angle), SessionKind::Analyst)
    }

    pub fn ci_specialist(label: &str) -> Self {
        Self::new(label, SessionKind::CiSpecialist)
    }

    /// Session label derived from the key
    pub fn session_label(&self) -> String {
        format!("{}:{}", self.kind, self.label)
    }
}

/// Maps session keys to live handles with idempotent get-or-create.
///
/// When a coordinator session is registered, new sessions fork from it at
/// the recorded turn index so they inherit the shared plan context; a
/// failed fork degrades to a fresh session and never aborts the caller.
pub struct SessionManager<R: AgentRuntime> {
    runtime: Arc<R>,
    sessions: Mutex<HashMap<SessionKey, SessionHandle>>,
    coordinator: std::sync::Mutex<Option<(SessionHandle, usize)>>,
}

impl<R: AgentRuntime> SessionManager<R> {
    pub fn new(runtime: Arc<R>) -> Self {
        Self {
            runtime,
            sessions: Mutex::new(HashMap::new()),
            coordinator: std::sync::Mutex::new(None),
        }
    }

    pub fn runtime(&self) -> &Arc<R> {
        &self.runtime
    }

    /// Register the shared coordinator session; future acquisitions fork
    /// from it at `fork_at_turn`
    pub fn set_coordinator(&self, handle: SessionHandle, fork_at_turn: usize) {
        *self.coordinator.lock().expect("coordinator lock") = Some((handle, fork_at_turn));
    }

    /// The coordinator session, if one was registered
    pub fn coordinator(&self) -> Option<SessionHandle> {
        self.coordinator
            .lock()
            .expect("coordinator lock")
            .as_ref()
            .map(|(h, _)| h.clone())
    }

    /// Return the session for `key`, creating it on first use.
    ///
    /// The map lock is held across creation, so a concurrent acquire of
    /// the same key waits and then observes the created handle instead of
    /// creating a second session.
    pub async fn acquire(&self, key: &SessionKey, options: SessionOptions) -> Result<SessionHandle> {
        let mut sessions = self.sessions.lock().await;

        if let Some(handle) = sessions.get(key) {
            return Ok(handle.clone());
        }

        let parent = self
            .coordinator
            .lock()
            .expect("coordinator lock")
            .clone();

        let handle = match parent {
            Some((parent, at_turn)) => {
                match self
                    .runtime
                    .fork_session(&parent, at_turn, options.clone())
                    .await
                {
                    Ok(handle) => {
                        debug!("Forked session {} for {}", handle.id, key.session_label());
                        handle
                    }
                    Err(e) => {
                        warn!(
                            "Fork from coordinator failed for {} ({}); starting fresh session",
                            key.session_label(),
                            e
                        );
                        self.runtime.start_session(options).await?
                    }
                }
            }
            None => self.runtime.start_session(options).await?,
        };

        sessions.insert(key.clone(), handle.clone());
        Ok(handle)
    }

    /// Look up an existing session without creating one
    pub async fn get(&self, key: &SessionKey) -> Option<SessionHandle> {
        self.sessions.lock().await.get(key).cloned()
    }

    /// Drop the affinity mapping for `key`.
    ///
    /// The runtime session stays alive (lifecycle is external); the next
    /// acquire for this key starts from a clean context.
    pub async fn discard(&self, key: &SessionKey) {
        if self.sessions.lock().await.remove(key).is_some() {
            debug!("Discarded session mapping for {}", key.session_label());
        }
    }
}
