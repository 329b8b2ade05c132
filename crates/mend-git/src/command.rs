//! Git command execution abstraction

use async_trait::async_trait;
use mend_core::{MendError, Result};
use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::process::Output;
use std::sync::{Arc, Mutex};
use tokio::process::Command;
use tracing::{debug, instrument};

/// Output from a git command
#[derive(Debug, Clone)]
pub struct GitOutput {
    pub stdout: String,
    pub stderr: String,
    pub success: bool,
}

impl GitOutput {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: String::new(),
            success: true,
        }
    }

    pub fn err(stderr: impl Into<String>) -> Self {
        Self {
            stdout: String::new(),
            stderr: stderr.into(),
            success: false,
        }
    }
}

impl From<Output> for GitOutput {
    fn from(output: Output) -> Self {
        Self {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            success: output.status.success(),
        }
    }
}

/// Trait for executing git commands (allows mocking in tests)
#[async_trait]
pub trait GitExecutor: Send + Sync {
    /// Execute a git command with the given arguments
    async fn exec(&self, args: &[&str]) -> Result<GitOutput>;

    /// Get the repository root
    fn repo_root(&self) -> &PathBuf;
}

/// Real git command executor
#[derive(Clone)]
pub struct GitCommand {
    repo_root: PathBuf,
}

impl GitCommand {
    /// Create a new git command executor for the given repository
    pub fn new(repo_root: impl Into<PathBuf>) -> Self {
        Self {
            repo_root: repo_root.into(),
        }
    }

    /// Auto-detect repository root from current directory
    pub async fn detect() -> Result<Self> {
        let output = Command::new("git")
            .args(["rev-parse", "--show-toplevel"])
            .output()
            .await
            .map_err(|e| MendError::GitCommand(format!("Failed to run git rev-parse: {}", e)))?;

        if !output.status.success() {
            return Err(MendError::NotARepository(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }

        let root = String::from_utf8_lossy(&output.stdout).trim().to_string();
        Ok(Self::new(root))
    }
}

#[async_trait]
impl GitExecutor for GitCommand {
    #[instrument(skip(self), fields(repo = %self.repo_root.display()))]
    async fn exec(&self, args: &[&str]) -> Result<GitOutput> {
        debug!("Executing git {:?}", args);

        let output = Command::new("git")
            .args(args)
            .current_dir(&self.repo_root)
            .output()
            .await
            .map_err(|e| MendError::GitCommand(format!("Failed to execute git: {}", e)))?;

        let git_output = GitOutput::from(output);

        if !git_output.success {
            debug!("git command failed: {}", git_output.stderr);
        }

        Ok(git_output)
    }

    fn repo_root(&self) -> &PathBuf {
        &self.repo_root
    }
}

/// Mock git executor for testing
///
/// Responses are keyed by the joined argument string. Registering the same
/// command twice builds a FIFO sequence; the final entry repeats once the
/// sequence drains, so staging flows can observe state changes
/// (conflicted, then clean) across repeated queries.
#[derive(Clone)]
pub struct MockGitExecutor {
    repo_root: PathBuf,
    responses: Arc<Mutex<HashMap<String, VecDeque<GitOutput>>>>,
}

impl Default for MockGitExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl MockGitExecutor {
    pub fn new() -> Self {
        Self {
            repo_root: PathBuf::from("/mock/repo"),
            responses: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.repo_root = root.into();
        self
    }

    pub fn with_response(self, command: &str, output: GitOutput) -> Self {
        self.responses
            .lock()
            .expect("mock responses lock")
            .entry(command.to_string())
            .or_default()
            .push_back(output);
        self
    }
}

#[async_trait]
impl GitExecutor for MockGitExecutor {
    async fn exec(&self, args: &[&str]) -> Result<GitOutput> {
        let key = args.join(" ");
        let mut responses = self.responses.lock().expect("mock responses lock");

        let queue = responses
            .get_mut(&key)
            .ok_or_else(|| MendError::GitCommand(format!("No mock response for: {}", key)))?;

        let output = if queue.len() > 1 {
            queue.pop_front().expect("non-empty queue")
        } else {
            queue
                .front()
                .cloned()
                .ok_or_else(|| MendError::GitCommand(format!("No mock response for: {}", key)))?
        };

        Ok(output)
    }

    fn repo_root(&self) -> &PathBuf {
        &self.repo_root
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_executor() {
        let executor = MockGitExecutor::new()
            .with_response("status --porcelain", GitOutput::ok("UU src/main.rs"));

        let output = executor.exec(&["status", "--porcelain"]).await.unwrap();
        assert!(output.success);
        assert_eq!(output.stdout, "UU src/main.rs");
    }

    #[tokio::test]
    async fn test_mock_executor_missing_response() {
        let executor = MockGitExecutor::new();
        assert!(executor.exec(&["log"]).await.is_err());
    }

    #[tokio::test]
    async fn test_mock_executor_sequence_then_repeat() {
        let executor = MockGitExecutor::new()
            .with_response("diff --name-only --diff-filter=U", GitOutput::ok("a.rs\n"))
            .with_response("diff --name-only --diff-filter=U", GitOutput::ok(""));

        let first = executor
            .exec(&["diff", "--name-only", "--diff-filter=U"])
            .await
            .unwrap();
        assert_eq!(first.stdout, "a.rs\n");

        // Sequence drained to its last entry, which now repeats
        for _ in 0..2 {
            let next = executor
                .exec(&["diff", "--name-only", "--diff-filter=U"])
                .await
                .unwrap();
            assert_eq!(next.stdout, "");
        }
    }
}
