//! Configuration management for Mend
//!
//! Repository-level settings loaded from `.mend/config.toml`: scheduler
//! bounds, classifier thresholds, strategy toggles, model tiers, and the
//! verification command driven by CI triage.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::{EffortTier, MendError, Model, Result};

/// Repository-level Mend configuration
///
/// Loaded from `.mend/config.toml` in the repo root.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MendConfig {
    /// Batch scheduling bounds
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Simple/complex thresholds and severity weighting
    #[serde(default)]
    pub classifier: ClassifierConfig,

    /// Strategy selection toggles
    #[serde(default)]
    pub strategy: StrategyConfig,

    /// Model tier selection
    #[serde(default)]
    pub models: ModelConfig,

    /// Verification command and triage bounds
    #[serde(default)]
    pub verify: VerifyConfig,
}

/// Batch scheduling bounds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Conflicts processed concurrently within one group
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Resolution attempts per conflict before giving up
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

/// Simple/complex thresholds and severity weighting
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierConfig {
    /// Marker count above which a conflict is complex
    #[serde(default = "default_max_markers")]
    pub max_markers: usize,

    /// Line count above which a conflict is complex
    #[serde(default = "default_max_lines")]
    pub max_lines: usize,

    /// Diff-excerpt length above which a conflict is complex
    #[serde(default = "default_max_diff_chars")]
    pub max_diff_chars: usize,

    /// Weight of one conflict marker in the severity score
    #[serde(default = "default_marker_weight")]
    pub marker_weight: usize,

    /// Severity at or above which effort escalates to high
    #[serde(default = "default_high_severity")]
    pub high_severity: usize,
}

/// Strategy selection toggles
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyConfig {
    /// Use the planner+executor strategy for complex conflicts; when
    /// disabled, complex conflicts fall back to parallel analysis
    #[serde(default = "default_dual_agent")]
    pub dual_agent: bool,

    /// Pin every session to a fixed effort tier (overrides severity and
    /// retry escalation)
    #[serde(default)]
    pub pinned_effort: Option<EffortTier>,
}

/// Model tier selection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Default worker model
    #[serde(default)]
    pub worker: Model,

    /// Model for high-severity conflicts and escalated retries
    #[serde(default = "default_escalation_model")]
    pub escalation: Model,

    /// Cheap model for analysis and log summarization
    #[serde(default = "default_summarizer_model")]
    pub summarizer: Model,
}

/// Verification command and triage bounds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyConfig {
    /// Shell command run after all conflicts clear (e.g. `cargo test`)
    #[serde(default)]
    pub command: Option<String>,

    /// Lines of context kept around each failure keyword hit
    #[serde(default = "default_context_radius")]
    pub context_radius: usize,

    /// Maximum keyword sections extracted from one log
    #[serde(default = "default_max_sections")]
    pub max_sections: usize,

    /// Log size above which the overflow summarizer kicks in
    #[serde(default = "default_log_ceiling_chars")]
    pub log_ceiling_chars: usize,

    /// Tail kept verbatim when a log overflows
    #[serde(default = "default_tail_chars")]
    pub tail_chars: usize,

    /// Character budget handed to the overflow summarizer
    #[serde(default = "default_summary_budget_chars")]
    pub summary_budget_chars: usize,
}

// Default value providers
fn default_concurrency() -> usize {
    4
}

fn default_max_attempts() -> u32 {
    2
}

fn default_max_markers() -> usize {
    6
}

fn default_max_lines() -> usize {
    400
}

fn default_max_diff_chars() -> usize {
    4_000
}

fn default_marker_weight() -> usize {
    50
}

fn default_high_severity() -> usize {
    800
}

fn default_dual_agent() -> bool {
    true
}

fn default_escalation_model() -> Model {
    Model::Opus
}

fn default_summarizer_model() -> Model {
    Model::Haiku
}

fn default_context_radius() -> usize {
    8
}

fn default_max_sections() -> usize {
    12
}

fn default_log_ceiling_chars() -> usize {
    60_000
}

fn default_tail_chars() -> usize {
    20_000
}

fn default_summary_budget_chars() -> usize {
    4_000
}

impl MendConfig {
    /// Load configuration from `.mend/config.toml` or use defaults
    pub fn load_or_default(repo_root: &Path) -> Result<Self> {
        let config_path = repo_root.join(".mend/config.toml");

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            toml::from_str(&content)
                .map_err(|e| MendError::Config(format!("Failed to parse config file: {}", e)))
        } else {
            Ok(Self::default())
        }
    }

    /// Write default configuration to `.mend/config.toml`
    pub fn write_default(repo_root: &Path) -> Result<()> {
        let config_dir = repo_root.join(".mend");
        std::fs::create_dir_all(&config_dir)?;

        let config_path = config_dir.join("config.toml");
        let config = Self::default();
        let content = toml::to_string_pretty(&config)
            .map_err(|e| MendError::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(&config_path, content)?;
        Ok(())
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            max_attempts: default_max_attempts(),
        }
    }
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            max_markers: default_max_markers(),
            max_lines: default_max_lines(),
            max_diff_chars: default_max_diff_chars(),
            marker_weight: default_marker_weight(),
            high_severity: default_high_severity(),
        }
    }
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            dual_agent: default_dual_agent(),
            pinned_effort: None,
        }
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            worker: Model::default(),
            escalation: default_escalation_model(),
            summarizer: default_summarizer_model(),
        }
    }
}

impl Default for VerifyConfig {
    fn default() -> Self {
        Self {
            command: None,
            context_radius: default_context_radius(),
            max_sections: default_max_sections(),
            log_ceiling_chars: default_log_ceiling_chars(),
            tail_chars: default_tail_chars(),
            summary_budget_chars: default_summary_budget_chars(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = MendConfig::default();
        assert_eq!(config.scheduler.concurrency, 4);
        assert_eq!(config.scheduler.max_attempts, 2);
        assert_eq!(config.classifier.max_markers, 6);
        assert_eq!(config.classifier.max_lines, 400);
        assert_eq!(config.classifier.max_diff_chars, 4_000);
        assert!(config.strategy.dual_agent);
        assert!(config.strategy.pinned_effort.is_none());
        assert_eq!(config.models.worker, Model::Sonnet);
        assert_eq!(config.models.escalation, Model::Opus);
        assert!(config.verify.command.is_none());
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config: MendConfig = toml::from_str(
            r#"
[scheduler]
concurrency = 2

[verify]
command = "cargo test"
"#,
        )
        .unwrap();

        assert_eq!(config.scheduler.concurrency, 2);
        assert_eq!(config.scheduler.max_attempts, 2);
        assert_eq!(config.verify.command.as_deref(), Some("cargo test"));
        assert_eq!(config.verify.max_sections, 12);
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = MendConfig::load_or_default(dir.path()).unwrap();
        assert_eq!(config.scheduler.concurrency, 4);
    }

    #[test]
    fn test_write_then_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        MendConfig::write_default(dir.path()).unwrap();

        let config = MendConfig::load_or_default(dir.path()).unwrap();
        assert_eq!(config.classifier.high_severity, 800);
    }

    #[test]
    fn test_pinned_effort_parses() {
        let config: MendConfig = toml::from_str(
            r#"
[strategy]
pinned_effort = "high"
"#,
        )
        .unwrap();
        assert_eq!(config.strategy.pinned_effort, Some(EffortTier::High));
    }
}
