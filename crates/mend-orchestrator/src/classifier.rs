//! Conflict classification
//!
//! Pure and side-effect free: the scheduler orders the batch with it and
//! the strategy selector dispatches on it, so both must compute the exact
//! same answer for the same conflict.

use mend_core::{severity_score, ClassifierConfig, ConflictContext, EffortTier};

/// Classification of one conflict for one attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    /// Small, shallow conflict suitable for the single-agent strategy
    pub simple: bool,
    /// Shared severity score (`line_count + marker_count * weight`)
    pub severity: usize,
    /// Reasoning effort requested from worker sessions
    pub effort: EffortTier,
}

/// Classify a conflict for the given attempt number.
///
/// A conflict is simple only when its marker count, line count, and
/// longest diff excerpt are all known and within the configured
/// thresholds; unknown data never counts as simple. Effort escalates to
/// high for severe conflicts and for retries, unless a pinned tier
/// overrides everything.
pub fn classify(
    ctx: &ConflictContext,
    config: &ClassifierConfig,
    attempt: u32,
    pinned: Option<EffortTier>,
) -> Classification {
    let simple = matches!(
        (ctx.marker_count, ctx.line_count, ctx.longest_diff_len()),
        (Some(markers), Some(lines), Some(diff_len))
            if markers <= config.max_markers
                && lines <= config.max_lines
                && diff_len <= config.max_diff_chars
    );

    let severity = severity_score(ctx, config.marker_weight);

    let effort = pinned.unwrap_or({
        if severity >= config.high_severity || attempt > 1 {
            EffortTier::High
        } else {
            EffortTier::Medium
        }
    });

    Classification {
        simple,
        severity,
        effort,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(markers: Option<usize>, lines: Option<usize>, diff_len: Option<usize>) -> ConflictContext {
        let mut c = ConflictContext::new("src/lib.rs");
        c.marker_count = markers;
        c.line_count = lines;
        c.diff_ours_theirs = diff_len.map(|n| "x".repeat(n));
        c
    }

    fn config() -> ClassifierConfig {
        ClassifierConfig::default()
    }

    #[test]
    fn test_simple_at_thresholds() {
        let c = ctx(Some(6), Some(400), Some(4_000));
        assert!(classify(&c, &config(), 1, None).simple);
    }

    #[test]
    fn test_complex_when_any_threshold_exceeded() {
        assert!(!classify(&ctx(Some(7), Some(400), Some(4_000)), &config(), 1, None).simple);
        assert!(!classify(&ctx(Some(6), Some(401), Some(4_000)), &config(), 1, None).simple);
        assert!(!classify(&ctx(Some(6), Some(400), Some(4_001)), &config(), 1, None).simple);
    }

    #[test]
    fn test_missing_data_never_simple() {
        assert!(!classify(&ctx(None, Some(10), Some(100)), &config(), 1, None).simple);
        assert!(!classify(&ctx(Some(1), None, Some(100)), &config(), 1, None).simple);
        assert!(!classify(&ctx(Some(1), Some(10), None), &config(), 1, None).simple);
    }

    #[test]
    fn test_effort_escalates_on_severity() {
        // 400 + 6*50 = 700 < 800
        let c = ctx(Some(6), Some(400), Some(100));
        assert_eq!(classify(&c, &config(), 1, None).effort, EffortTier::Medium);

        // 500 + 6*50 = 800 >= 800
        let c = ctx(Some(6), Some(500), Some(100));
        assert_eq!(classify(&c, &config(), 1, None).effort, EffortTier::High);
    }

    #[test]
    fn test_effort_escalates_on_retry() {
        let c = ctx(Some(1), Some(10), Some(100));
        assert_eq!(classify(&c, &config(), 1, None).effort, EffortTier::Medium);
        assert_eq!(classify(&c, &config(), 2, None).effort, EffortTier::High);
    }

    #[test]
    fn test_pinned_effort_always_wins() {
        let severe = ctx(Some(50), Some(5_000), Some(100));
        let classification = classify(&severe, &config(), 3, Some(EffortTier::Low));
        assert_eq!(classification.effort, EffortTier::Low);
    }

    #[test]
    fn test_severity_matches_shared_function() {
        let c = ctx(Some(4), Some(200), Some(100));
        let classification = classify(&c, &config(), 1, None);
        assert_eq!(
            classification.severity,
            mend_core::severity_score(&c, config().marker_weight)
        );
    }
}
