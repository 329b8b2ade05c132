//! Mock agent runtime for testing
//!
//! Turn outputs are scripted against substring keys: when a session runs a
//! turn, the first script whose key appears in the session label or the
//! prompt is consumed (FIFO per key). Unmatched turns get the default
//! output, so tests only script the rounds they care about.

use mend_core::{MendError, Result};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use crate::runtime::AgentRuntime;
use crate::types::{SessionHandle, SessionOptions, TurnOptions, TurnOutput};
use async_trait::async_trait;

/// One recorded prompt/response round
#[derive(Debug, Clone)]
pub struct TurnRecord {
    pub session_id: String,
    pub label: String,
    pub prompt: String,
}

enum ScriptedTurn {
    Output(TurnOutput),
    Error(String),
}

struct Inner {
    scripts: Vec<(String, VecDeque<ScriptedTurn>)>,
    default_output: TurnOutput,
    labels: HashMap<String, String>,
    turns: Vec<TurnRecord>,
    next_id: usize,
    fail_forks: bool,
    fork_count: usize,
    session_count: usize,
}

/// Scriptable in-memory [`AgentRuntime`]
pub struct MockRuntime {
    inner: Mutex<Inner>,
}

impl Default for MockRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl MockRuntime {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                scripts: Vec::new(),
                default_output: TurnOutput::text("ok"),
                labels: HashMap::new(),
                turns: Vec::new(),
                next_id: 0,
                fail_forks: false,
                fork_count: 0,
                session_count: 0,
            }),
        }
    }

    /// Script the next output for turns matching `key` (FIFO per key)
    pub fn with_turn(self, key: &str, output: TurnOutput) -> Self {
        self.push_script(key, ScriptedTurn::Output(output));
        self
    }

    /// Script a runtime error for turns matching `key`
    pub fn with_turn_error(self, key: &str, message: &str) -> Self {
        self.push_script(key, ScriptedTurn::Error(message.to_string()));
        self
    }

    /// Output for turns no script matches
    pub fn with_default(self, output: TurnOutput) -> Self {
        self.inner.lock().expect("mock lock").default_output = output;
        self
    }

    /// Make every fork attempt fail
    pub fn with_failing_forks(self) -> Self {
        self.inner.lock().expect("mock lock").fail_forks = true;
        self
    }

    fn push_script(&self, key: &str, turn: ScriptedTurn) {
        let mut inner = self.inner.lock().expect("mock lock");
        if let Some((_, queue)) = inner.scripts.iter_mut().find(|(k, _)| k == key) {
            queue.push_back(turn);
        } else {
            inner.scripts.push((key.to_string(), VecDeque::from([turn])));
        }
    }

    /// All recorded turns, in order
    pub fn turns(&self) -> Vec<TurnRecord> {
        self.inner.lock().expect("mock lock").turns.clone()
    }

    /// Recorded turns whose label or prompt contains `needle`
    pub fn turn_count_matching(&self, needle: &str) -> usize {
        self.inner
            .lock()
            .expect("mock lock")
            .turns
            .iter()
            .filter(|t| t.label.contains(needle) || t.prompt.contains(needle))
            .count()
    }

    /// Total sessions created (starts + forks)
    pub fn session_count(&self) -> usize {
        self.inner.lock().expect("mock lock").session_count
    }

    /// Sessions created through fork
    pub fn fork_count(&self) -> usize {
        self.inner.lock().expect("mock lock").fork_count
    }

    fn create_session(&self, label: &str) -> SessionHandle {
        let mut inner = self.inner.lock().expect("mock lock");
        let id = format!("mock-{}", inner.next_id);
        inner.next_id += 1;
        inner.session_count += 1;
        inner.labels.insert(id.clone(), label.to_string());
        SessionHandle::new(id, label)
    }
}

#[async_trait]
impl AgentRuntime for MockRuntime {
    async fn start_session(&self, options: SessionOptions) -> Result<SessionHandle> {
        Ok(self.create_session(&options.label))
    }

    async fn resume_session(&self, id: &str, options: SessionOptions) -> Result<SessionHandle> {
        let mut inner = self.inner.lock().expect("mock lock");
        inner
            .labels
            .insert(id.to_string(), options.label.clone());
        Ok(SessionHandle::new(id, options.label))
    }

    async fn fork_session(
        &self,
        parent: &SessionHandle,
        _at_turn: usize,
        options: SessionOptions,
    ) -> Result<SessionHandle> {
        {
            let inner = self.inner.lock().expect("mock lock");
            if inner.fail_forks {
                return Err(MendError::Fork(format!(
                    "mock fork failure from {}",
                    parent.id
                )));
            }
        }

        let handle = self.create_session(&options.label);
        self.inner.lock().expect("mock lock").fork_count += 1;
        Ok(handle)
    }

    async fn run_turn(
        &self,
        handle: &SessionHandle,
        prompt: &str,
        _options: TurnOptions,
    ) -> Result<TurnOutput> {
        let mut inner = self.inner.lock().expect("mock lock");

        let label = inner
            .labels
            .get(&handle.id)
            .cloned()
            .unwrap_or_else(|| handle.label.clone());

        inner.turns.push(TurnRecord {
            session_id: handle.id.clone(),
            label: label.clone(),
            prompt: prompt.to_string(),
        });

        let scripted = inner
            .scripts
            .iter_mut()
            .find(|(key, queue)| {
                !queue.is_empty() && (label.contains(key.as_str()) || prompt.contains(key.as_str()))
            })
            .and_then(|(_, queue)| queue.pop_front());

        match scripted {
            Some(ScriptedTurn::Output(output)) => Ok(output),
            Some(ScriptedTurn::Error(message)) => Err(MendError::Runtime(message)),
            None => Ok(inner.default_output.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_turns_fifo() {
        let runtime = MockRuntime::new()
            .with_turn("review", TurnOutput::text("first"))
            .with_turn("review", TurnOutput::text("second"));

        let handle = runtime
            .start_session(SessionOptions::new("planner:a.rs"))
            .await
            .unwrap();

        let one = runtime
            .run_turn(&handle, "Please review the result", TurnOptions::default())
            .await
            .unwrap();
        let two = runtime
            .run_turn(&handle, "Please review again", TurnOptions::default())
            .await
            .unwrap();
        let three = runtime
            .run_turn(&handle, "Please review once more", TurnOptions::default())
            .await
            .unwrap();

        assert_eq!(one.final_text, "first");
        assert_eq!(two.final_text, "second");
        assert_eq!(three.final_text, "ok"); // default after scripts drain
    }

    #[tokio::test]
    async fn test_label_matching() {
        let runtime = MockRuntime::new().with_turn("worker:a.rs", TurnOutput::text("edited"));

        let handle = runtime
            .start_session(SessionOptions::new("worker:a.rs"))
            .await
            .unwrap();
        let output = runtime
            .run_turn(&handle, "unrelated prompt", TurnOptions::default())
            .await
            .unwrap();

        assert_eq!(output.final_text, "edited");
    }

    #[tokio::test]
    async fn test_turn_error() {
        let runtime = MockRuntime::new().with_turn_error("worker", "runtime exploded");

        let handle = runtime
            .start_session(SessionOptions::new("worker:a.rs"))
            .await
            .unwrap();
        let result = runtime
            .run_turn(&handle, "go", TurnOptions::default())
            .await;

        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_failing_forks() {
        let runtime = MockRuntime::new().with_failing_forks();

        let parent = runtime
            .start_session(SessionOptions::new("coordinator"))
            .await
            .unwrap();
        let result = runtime
            .fork_session(&parent, 1, SessionOptions::new("worker:a.rs"))
            .await;

        assert!(result.is_err());
        assert_eq!(runtime.fork_count(), 0);
    }
}
