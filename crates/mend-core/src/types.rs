//! Core type definitions for Mend orchestration

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Line count substituted when a conflict's size is unknown.
///
/// Unknown data must never score as easy, so the sentinels sit far above
/// every classification threshold.
pub const UNKNOWN_LINE_COUNT: usize = 100_000;

/// Marker count substituted when a conflict's marker count is unknown.
pub const UNKNOWN_MARKER_COUNT: usize = 1_000;

/// Everything Mend knows about one conflicted file at snapshot time.
///
/// Collected once per run and read-only afterwards: classification,
/// strategy selection, and prompt construction all consume the same
/// snapshot. Live state (does the file still carry markers, is it still
/// unmerged in the index) is always re-read from disk, never from here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConflictContext {
    /// Repository-relative path (identity of the conflict)
    pub path: String,
    /// Language tag inferred from the file extension
    pub language: Option<String>,
    /// Total line count of the working-tree file
    pub line_count: Option<usize>,
    /// Number of conflict regions (counted by `<<<<<<<` lines)
    pub marker_count: Option<usize>,
    /// Diff excerpt: merge base -> our side
    pub diff_base_ours: Option<String>,
    /// Diff excerpt: merge base -> their side
    pub diff_base_theirs: Option<String>,
    /// Diff excerpt: our side -> their side
    pub diff_ours_theirs: Option<String>,
    /// Working-tree excerpt including the marker regions
    pub working_excerpt: Option<String>,
    /// Recent commit history touching this path
    pub recent_history: Option<String>,
}

impl ConflictContext {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            language: None,
            line_count: None,
            marker_count: None,
            diff_base_ours: None,
            diff_base_theirs: None,
            diff_ours_theirs: None,
            working_excerpt: None,
            recent_history: None,
        }
    }

    /// Length of the longest diff excerpt, if any excerpt was collected
    pub fn longest_diff_len(&self) -> Option<usize> {
        [
            self.diff_base_ours.as_ref(),
            self.diff_base_theirs.as_ref(),
            self.diff_ours_theirs.as_ref(),
        ]
        .into_iter()
        .flatten()
        .map(|d| d.len())
        .max()
    }
}

/// Severity score for a conflict: `line_count + marker_count * weight`.
///
/// This is the single scoring function shared by the classifier and the
/// strategy selector; both must see the same number. Missing fields are
/// substituted with the unknown sentinels so missing data reads as
/// difficult, never as easy.
pub fn severity_score(ctx: &ConflictContext, marker_weight: usize) -> usize {
    let lines = ctx.line_count.unwrap_or(UNKNOWN_LINE_COUNT);
    let markers = ctx.marker_count.unwrap_or(UNKNOWN_MARKER_COUNT);
    lines.saturating_add(markers.saturating_mul(marker_weight))
}

/// Reasoning-effort tier requested from the agent runtime
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EffortTier {
    Low,
    #[default]
    Medium,
    High,
}

impl std::fmt::Display for EffortTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
        }
    }
}

impl std::str::FromStr for EffortTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            _ => Err(format!("Invalid effort tier: {}. Use low, medium, or high.", s)),
        }
    }
}

/// Worker model variants
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Model {
    Opus,
    #[default]
    Sonnet,
    Haiku,
}

impl Model {
    /// Get the API model name
    pub fn api_name(&self) -> &'static str {
        match self {
            Model::Opus => "claude-opus-4-20250514",
            Model::Sonnet => "claude-sonnet-4-5-20250929",
            Model::Haiku => "claude-haiku-3-5-20250929",
        }
    }
}

impl std::fmt::Display for Model {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Model::Opus => write!(f, "opus"),
            Model::Sonnet => write!(f, "sonnet"),
            Model::Haiku => write!(f, "haiku"),
        }
    }
}

impl std::str::FromStr for Model {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "opus" => Ok(Model::Opus),
            "sonnet" => Ok(Model::Sonnet),
            "haiku" => Ok(Model::Haiku),
            _ => Err(format!("Invalid model: {}. Use opus, sonnet, or haiku.", s)),
        }
    }
}

/// Token usage information
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: usize,
    pub output_tokens: usize,
}

impl Usage {
    /// Accumulate another turn's usage into this total
    pub fn add(&mut self, other: &Usage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
    }
}

/// Thread-safe accumulator for token usage across concurrent turns
#[derive(Debug, Default)]
pub struct UsageMeter(std::sync::Mutex<Usage>);

impl UsageMeter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, usage: &Usage) {
        self.0.lock().expect("usage lock").add(usage);
    }

    pub fn total(&self) -> Usage {
        *self.0.lock().expect("usage lock")
    }
}

/// Final disposition of one resolution attempt, derived from disk state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionStatus {
    /// Markers gone and the index no longer reports the path as unmerged
    ResolvedAndStaged,
    /// Markers gone but the index still reports the path as unmerged
    CleanNotStaged,
    /// Markers remain and the file content changed during the attempt
    PersistsWithEdits,
    /// Markers remain and the file was never touched
    PersistsNoEdits,
}

impl ResolutionStatus {
    /// Whether this status counts as a resolved conflict
    pub fn is_resolved(&self) -> bool {
        matches!(self, Self::ResolvedAndStaged)
    }
}

impl std::fmt::Display for ResolutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ResolvedAndStaged => write!(f, "resolved and staged"),
            Self::CleanNotStaged => write!(f, "content clean but not staged"),
            Self::PersistsWithEdits => write!(f, "conflict persists (edits applied)"),
            Self::PersistsNoEdits => write!(f, "conflict persists (no edits)"),
        }
    }
}

/// Result of one completed resolution attempt for one conflict.
///
/// Append-only within a run; the latest outcome per path is authoritative
/// for aggregation and for CI-failure matching.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerOutcome {
    /// Path of the conflicted file
    pub path: String,
    /// Whether the attempt resolved the conflict
    pub success: bool,
    /// Whether the file content differs from the attempt start
    pub changed: bool,
    /// Free-text summary of what happened
    pub summary: String,
    /// Session that owns this conflict's conversational context
    pub session_id: Option<String>,
    /// Error message for attempts that died in the runtime
    pub error: Option<String>,
    /// Disk-derived status label
    pub status: Option<ResolutionStatus>,
    /// When the attempt completed
    pub completed_at: DateTime<Utc>,
}

impl WorkerOutcome {
    pub fn success(path: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            success: true,
            changed: true,
            summary: summary.into(),
            session_id: None,
            error: None,
            status: Some(ResolutionStatus::ResolvedAndStaged),
            completed_at: Utc::now(),
        }
    }

    pub fn failure(path: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            success: false,
            changed: false,
            summary: summary.into(),
            session_id: None,
            error: None,
            status: None,
            completed_at: Utc::now(),
        }
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_status(mut self, status: ResolutionStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_changed(mut self, changed: bool) -> Self {
        self.changed = changed;
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

/// Aggregate report for one scheduled batch
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchReport {
    /// Latest outcome per conflict, in batch order
    pub outcomes: Vec<WorkerOutcome>,
    /// Conflicts resolved and staged
    pub resolved: usize,
    /// Conflicts that persist even though edits were applied
    pub unresolved_with_edits: usize,
    /// Conflicts that persist with no edits at all
    pub unresolved_without_edits: usize,
    /// Whether a still-conflicted file halted the batch
    pub halted: bool,
}

impl BatchReport {
    /// Tally outcome counts from the final per-path outcomes
    pub fn tally(outcomes: Vec<WorkerOutcome>, halted: bool) -> Self {
        let resolved = outcomes.iter().filter(|o| o.success).count();
        let unresolved_with_edits = outcomes
            .iter()
            .filter(|o| !o.success && o.changed)
            .count();
        let unresolved_without_edits = outcomes
            .iter()
            .filter(|o| !o.success && !o.changed)
            .count();

        Self {
            outcomes,
            resolved,
            unresolved_with_edits,
            unresolved_without_edits,
            halted,
        }
    }

    /// Whether every conflict in the batch resolved
    pub fn all_resolved(&self) -> bool {
        self.unresolved_with_edits == 0 && self.unresolved_without_edits == 0 && !self.halted
    }
}
