//! Repository snapshot collection
//!
//! Gathers everything the orchestrator needs to know about a merge in
//! progress: which paths are unmerged, per-file conflict contexts (diff
//! excerpts against the merge base and across sides, marker counts,
//! recent history), and a divergence summary for the two refs.

use mend_core::{ConflictContext, MendError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::{debug, warn};

use crate::command::GitExecutor;
use crate::markers;

/// Longest diff excerpt carried into a conflict context
const DIFF_EXCERPT_MAX: usize = 20_000;

/// Context lines kept around the first marker region
const EXCERPT_RADIUS: usize = 12;

/// Commits of per-path history included in a snapshot
const HISTORY_DEPTH: &str = "5";

/// The two sides of the merge being resolved
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeRefs {
    /// Our side (the checked-out branch)
    pub ours: String,
    /// Their side (the incoming branch)
    pub theirs: String,
}

impl Default for MergeRefs {
    fn default() -> Self {
        Self {
            ours: "HEAD".to_string(),
            theirs: "MERGE_HEAD".to_string(),
        }
    }
}

/// Whole-batch snapshot handed to the orchestrator
#[derive(Debug, Clone)]
pub struct RepoSnapshot {
    pub refs: MergeRefs,
    /// Human-readable divergence summary between the two refs
    pub divergence: Option<String>,
    pub conflicts: Vec<ConflictContext>,
}

/// Collects repository state for the orchestrator.
///
/// Every query hits the repository; nothing is cached. The scheduler's
/// trust-but-verify re-reads rely on that.
pub struct SnapshotCollector<E: GitExecutor> {
    executor: E,
}

impl<E: GitExecutor> SnapshotCollector<E> {
    pub fn new(executor: E) -> Self {
        Self { executor }
    }

    pub fn repo_root(&self) -> &PathBuf {
        self.executor.repo_root()
    }

    /// Paths the index currently reports as unmerged
    pub async fn list_conflicted_paths(&self) -> Result<Vec<String>> {
        let output = self
            .executor
            .exec(&["diff", "--name-only", "--diff-filter=U"])
            .await?;

        if !output.success {
            return Err(MendError::GitCommand(format!(
                "Failed to list conflicted paths: {}",
                output.stderr
            )));
        }

        Ok(output
            .stdout
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect())
    }

    /// Read a file from the working tree, or `None` if it does not exist
    pub async fn read_working_file(&self, path: &str) -> Result<Option<String>> {
        let full = self.executor.repo_root().join(path);
        match tokio::fs::read_to_string(&full).await {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Stage a file, clearing its unmerged index entry
    pub async fn stage_file(&self, path: &str) -> Result<()> {
        let output = self.executor.exec(&["add", "--", path]).await?;

        if !output.success {
            return Err(MendError::GitCommand(format!(
                "Failed to stage {}: {}",
                path, output.stderr
            )));
        }

        Ok(())
    }

    /// Summarize how far two refs have diverged, or `None` if git cannot
    /// relate them
    pub async fn compare_refs(&self, a: &str, b: &str) -> Result<Option<String>> {
        let range = format!("{}...{}", a, b);
        let output = self
            .executor
            .exec(&["rev-list", "--left-right", "--count", &range])
            .await?;

        if !output.success {
            debug!("rev-list failed for {}: {}", range, output.stderr);
            return Ok(None);
        }

        let mut counts = output.stdout.split_whitespace();
        match (counts.next(), counts.next()) {
            (Some(left), Some(right)) => Ok(Some(format!(
                "{} is ahead by {} commits, {} is ahead by {} commits",
                a, left, b, right
            ))),
            _ => Ok(None),
        }
    }

    /// Build a conflict context for every unmerged path
    pub async fn collect_conflicts(&self, refs: &MergeRefs) -> Result<Vec<ConflictContext>> {
        let paths = self.list_conflicted_paths().await?;
        debug!("Collecting contexts for {} conflicted paths", paths.len());

        let base = self.merge_base(refs).await;

        let mut conflicts = Vec::with_capacity(paths.len());
        for path in paths {
            conflicts.push(self.collect_one(&path, refs, base.as_deref()).await?);
        }

        Ok(conflicts)
    }

    /// Collect the whole-batch snapshot
    pub async fn collect_snapshot(&self, refs: MergeRefs) -> Result<RepoSnapshot> {
        let divergence = self.compare_refs(&refs.ours, &refs.theirs).await?;
        let conflicts = self.collect_conflicts(&refs).await?;

        Ok(RepoSnapshot {
            refs,
            divergence,
            conflicts,
        })
    }

    async fn collect_one(
        &self,
        path: &str,
        refs: &MergeRefs,
        base: Option<&str>,
    ) -> Result<ConflictContext> {
        let mut ctx = ConflictContext::new(path);
        ctx.language = language_for_path(path);

        if let Some(content) = self.read_working_file(path).await? {
            ctx.line_count = Some(content.lines().count());
            ctx.marker_count = Some(markers::count_markers(&content));
            ctx.working_excerpt = markers::marker_excerpt(&content, EXCERPT_RADIUS);
        } else {
            warn!("Conflicted path {} missing from working tree", path);
        }

        if let Some(base) = base {
            ctx.diff_base_ours = self.diff_excerpt(base, &refs.ours, path).await;
            ctx.diff_base_theirs = self.diff_excerpt(base, &refs.theirs, path).await;
        }
        ctx.diff_ours_theirs = self.diff_excerpt(&refs.ours, &refs.theirs, path).await;
        ctx.recent_history = self.recent_history(path).await;

        Ok(ctx)
    }

    async fn merge_base(&self, refs: &MergeRefs) -> Option<String> {
        let output = self
            .executor
            .exec(&["merge-base", &refs.ours, &refs.theirs])
            .await
            .ok()?;

        if !output.success {
            debug!("merge-base failed: {}", output.stderr);
            return None;
        }

        let base = output.stdout.trim().to_string();
        (!base.is_empty()).then_some(base)
    }

    async fn diff_excerpt(&self, from: &str, to: &str, path: &str) -> Option<String> {
        let output = self
            .executor
            .exec(&["diff", from, to, "--", path])
            .await
            .ok()?;

        if !output.success || output.stdout.is_empty() {
            return None;
        }

        Some(truncate_excerpt(&output.stdout, DIFF_EXCERPT_MAX))
    }

    async fn recent_history(&self, path: &str) -> Option<String> {
        let output = self
            .executor
            .exec(&["log", "--oneline", "-n", HISTORY_DEPTH, "--", path])
            .await
            .ok()?;

        if !output.success || output.stdout.trim().is_empty() {
            return None;
        }

        Some(output.stdout.trim().to_string())
    }
}

/// Language tag from a path's extension
fn language_for_path(path: &str) -> Option<String> {
    let ext = std::path::Path::new(path).extension()?.to_str()?;
    let lang = match ext {
        "rs" => "rust",
        "py" => "python",
        "js" | "mjs" | "cjs" => "javascript",
        "ts" | "tsx" => "typescript",
        "go" => "go",
        "java" => "java",
        "c" | "h" => "c",
        "cc" | "cpp" | "hpp" => "cpp",
        "rb" => "ruby",
        "toml" => "toml",
        "json" => "json",
        "yml" | "yaml" => "yaml",
        "md" => "markdown",
        "sh" => "shell",
        _ => return None,
    };
    Some(lang.to_string())
}

/// Truncate to `max` bytes without splitting a UTF-8 character
fn truncate_excerpt(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }

    let mut end = max;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    s[..end].to_string()
}
