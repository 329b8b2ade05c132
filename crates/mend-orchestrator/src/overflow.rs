//! Oversized-log preparation
//!
//! Verification logs can dwarf any prompt budget. Instead of truncating
//! blindly, the tail (most recent signal) is kept verbatim and everything
//! before it is compressed by a cheap summarizer session under an explicit
//! character budget. The prepared text is bounded, and that bound is what
//! every downstream prompt relies on.

use mend_agent::{
    AgentRuntime, SessionKey, SessionKind, SessionManager, SessionOptions, TurnOptions,
};
use mend_core::{EffortTier, MendConfig, UsageMeter};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::prompt::build_summarizer_prompt;

/// A verification log cut down to its bounded, prompt-ready form
#[derive(Debug, Clone)]
pub struct PreparedLog {
    pub text: String,
    /// Whether the overflow summarizer ran
    pub summarized: bool,
}

/// Hard ceiling on prepared-log size, derived from the configured budgets
pub fn prepared_log_bound(config: &MendConfig) -> usize {
    config.verify.summary_budget_chars + config.verify.tail_chars + 256
}

/// Prepare a log for prompting, summarizing the head when it overflows.
///
/// Summarizer failure degrades to an elision marker; preparation never
/// fails the triage run.
pub async fn prepare_log<R: AgentRuntime>(
    sessions: &Arc<SessionManager<R>>,
    config: &MendConfig,
    usage: &UsageMeter,
    log: &str,
) -> PreparedLog {
    if log.len() <= config.verify.log_ceiling_chars {
        return PreparedLog {
            text: log.to_string(),
            summarized: false,
        };
    }

    let (head, tail) = split_tail(log, config.verify.tail_chars);
    debug!(
        "Log overflow: {} chars total, summarizing {} chars of head",
        log.len(),
        head.len()
    );

    let budget = config.verify.summary_budget_chars;
    let summary = summarize_head(sessions, config, usage, head, budget).await;

    let mut text = format!(
        "=== SUMMARY OF EARLIER OUTPUT ===\n{}\n\n=== LOG TAIL (verbatim) ===\n{}",
        summary, tail
    );
    text.truncate(floor_char_boundary(&text, prepared_log_bound(config)));

    PreparedLog {
        text,
        summarized: true,
    }
}

async fn summarize_head<R: AgentRuntime>(
    sessions: &Arc<SessionManager<R>>,
    config: &MendConfig,
    usage: &UsageMeter,
    head: &str,
    budget: usize,
) -> String {
    let key = SessionKey::new("verification-log", SessionKind::Summarizer);
    let options = SessionOptions::new(key.session_label())
        .with_model(config.models.summarizer)
        .with_effort(EffortTier::Low)
        .with_sandbox(mend_agent::SandboxMode::ReadOnly);

    let fallback = |reason: &str| {
        warn!("Log summarizer unavailable ({}); eliding head", reason);
        format!("[{} characters of earlier output omitted]", head.len())
    };

    let session = match sessions.acquire(&key, options).await {
        Ok(session) => session,
        Err(e) => return fallback(&e.to_string()),
    };

    match sessions
        .runtime()
        .run_turn(
            &session,
            &build_summarizer_prompt(head, budget),
            TurnOptions::default(),
        )
        .await
    {
        Ok(output) => {
            usage.record(&output.usage);
            let mut summary = output.final_text.trim().to_string();
            if summary.is_empty() {
                return fallback("empty summary");
            }
            summary.truncate(floor_char_boundary(&summary, budget));
            summary
        }
        Err(e) => fallback(&e.to_string()),
    }
}

/// Split off the last `tail_chars` of the log, aligned to a line start
fn split_tail(log: &str, tail_chars: usize) -> (&str, &str) {
    if log.len() <= tail_chars {
        return ("", log);
    }

    let mut cut = floor_char_boundary(log, log.len() - tail_chars);
    // Start the tail at the next line boundary so no line is torn in half
    if let Some(newline) = log[cut..].find('\n') {
        cut += newline + 1;
    }

    (&log[..cut], &log[cut..])
}

fn floor_char_boundary(s: &str, mut index: usize) -> usize {
    if index >= s.len() {
        return s.len();
    }
    while index > 0 && !s.is_char_boundary(index) {
        index -= 1;
    }
    index
}

#[cfg(test)]
mod tests {
    use super::*;
    use mend_agent::{MockRuntime, TurnOutput};

    fn setup(runtime: MockRuntime) -> (Arc<SessionManager<MockRuntime>>, Arc<MockRuntime>) {
        let runtime = Arc::new(runtime);
        (Arc::new(SessionManager::new(runtime.clone())), runtime)
    }

    fn small_config() -> MendConfig {
        let mut config = MendConfig::default();
        config.verify.log_ceiling_chars = 200;
        config.verify.tail_chars = 80;
        config.verify.summary_budget_chars = 60;
        config
    }

    #[tokio::test]
    async fn test_small_log_passes_verbatim() {
        let (sessions, runtime) = setup(MockRuntime::new());
        let usage = UsageMeter::new();

        let prepared = prepare_log(&sessions, &small_config(), &usage, "short log").await;

        assert_eq!(prepared.text, "short log");
        assert!(!prepared.summarized);
        assert_eq!(runtime.session_count(), 0);
    }

    #[tokio::test]
    async fn test_overflow_keeps_tail_and_summary() {
        let runtime = MockRuntime::new().with_turn(
            "SUMMARIZE VERIFICATION LOG",
            TurnOutput::text("3 compile errors in src/parser.rs"),
        );
        let (sessions, _runtime) = setup(runtime);
        let usage = UsageMeter::new();
        let config = small_config();

        let mut log = String::new();
        for i in 0..40 {
            log.push_str(&format!("line {} of noisy build output\n", i));
        }
        let tail_line = "error[E0308]: mismatched types in tail";
        log.push_str(tail_line);
        assert!(log.len() > config.verify.log_ceiling_chars);

        let prepared = prepare_log(&sessions, &config, &usage, &log).await;

        assert!(prepared.summarized);
        assert!(prepared.text.contains(tail_line));
        assert!(prepared.text.contains("3 compile errors in src/parser.rs"));
        assert!(prepared.text.len() <= prepared_log_bound(&config));
    }

    #[tokio::test]
    async fn test_summarizer_failure_degrades_to_elision() {
        let runtime = MockRuntime::new().with_turn_error("SUMMARIZE VERIFICATION LOG", "boom");
        let (sessions, _runtime) = setup(runtime);
        let usage = UsageMeter::new();
        let config = small_config();

        let log = "x\n".repeat(300);
        let prepared = prepare_log(&sessions, &config, &usage, &log).await;

        assert!(prepared.summarized);
        assert!(prepared.text.contains("characters of earlier output omitted"));
        assert!(prepared.text.len() <= prepared_log_bound(&config));
    }

    #[test]
    fn test_split_tail_line_aligned() {
        let log = "aaaa\nbbbb\ncccc\ndddd\n";
        let (head, tail) = split_tail(log, 7);

        assert!(tail.starts_with("dddd"));
        assert!(head.ends_with("cccc\n"));
        assert_eq!(format!("{}{}", head, tail), log);
    }

    #[test]
    fn test_split_tail_short_log() {
        let (head, tail) = split_tail("tiny", 100);
        assert_eq!(head, "");
        assert_eq!(tail, "tiny");
    }

    #[test]
    fn test_summary_truncated_to_budget() {
        // Long summaries are clamped, so the bound still holds
        let mut config = small_config();
        config.verify.summary_budget_chars = 10;

        let bound = prepared_log_bound(&config);
        assert_eq!(bound, 10 + config.verify.tail_chars + 256);
    }
}
