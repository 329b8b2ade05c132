//! Structured review decisions
//!
//! Review outcomes arrive as schema-constrained structured output. One
//! validating decoder turns them into a tagged enum so every call site
//! pattern-matches exhaustively; anything that fails validation becomes
//! [`ReviewDecision::Malformed`], which callers treat as rejection.

use mend_agent::TurnOutput;
use serde::Deserialize;
use serde_json::json;
use tracing::warn;

/// Decoded review verdict from a supervisory session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReviewDecision {
    /// The resolution is acceptable; stage if clean
    Approved,
    /// Specific problems must be fixed before approval
    NeedsFixes { issues: Vec<String> },
    /// The resolution is wrong; stop and report failure
    Rejected { reason: Option<String> },
    /// The response did not validate against the review schema
    Malformed,
}

#[derive(Deserialize)]
struct ReviewPayload {
    verdict: String,
    #[serde(default)]
    issues: Vec<String>,
    #[serde(default)]
    reason: Option<String>,
}

/// JSON schema requested for review turns
pub fn review_schema() -> serde_json::Value {
    json!({
        "type": "object",
        "properties": {
            "verdict": {
                "type": "string",
                "enum": ["approved", "needs_fixes", "rejected"]
            },
            "issues": {
                "type": "array",
                "items": { "type": "string" }
            },
            "reason": { "type": "string" }
        },
        "required": ["verdict"]
    })
}

/// Decode a review turn's structured output.
///
/// Never defaults to success: a missing or invalid payload is
/// [`ReviewDecision::Malformed`].
pub fn decode_review(output: &TurnOutput) -> ReviewDecision {
    let Some(value) = output.structured_output.as_ref() else {
        warn!("Review turn returned no structured output");
        return ReviewDecision::Malformed;
    };

    let payload: ReviewPayload = match serde_json::from_value(value.clone()) {
        Ok(payload) => payload,
        Err(e) => {
            warn!("Review payload failed validation: {}", e);
            return ReviewDecision::Malformed;
        }
    };

    match payload.verdict.as_str() {
        "approved" => ReviewDecision::Approved,
        "needs_fixes" => ReviewDecision::NeedsFixes {
            issues: payload.issues,
        },
        "rejected" => ReviewDecision::Rejected {
            reason: payload.reason,
        },
        other => {
            warn!("Unknown review verdict: {}", other);
            ReviewDecision::Malformed
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_approved() {
        let output = TurnOutput::structured(json!({"verdict": "approved"}));
        assert_eq!(decode_review(&output), ReviewDecision::Approved);
    }

    #[test]
    fn test_decode_needs_fixes_with_issues() {
        let output = TurnOutput::structured(json!({
            "verdict": "needs_fixes",
            "issues": ["dropped the ours-side null check", "duplicate import"]
        }));

        match decode_review(&output) {
            ReviewDecision::NeedsFixes { issues } => assert_eq!(issues.len(), 2),
            other => panic!("expected NeedsFixes, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_rejected_with_reason() {
        let output = TurnOutput::structured(json!({
            "verdict": "rejected",
            "reason": "both sides were discarded"
        }));

        assert_eq!(
            decode_review(&output),
            ReviewDecision::Rejected {
                reason: Some("both sides were discarded".to_string())
            }
        );
    }

    #[test]
    fn test_missing_structured_output_is_malformed() {
        let output = TurnOutput::text("looks good to me!");
        assert_eq!(decode_review(&output), ReviewDecision::Malformed);
    }

    #[test]
    fn test_unknown_verdict_is_malformed() {
        let output = TurnOutput::structured(json!({"verdict": "maybe"}));
        assert_eq!(decode_review(&output), ReviewDecision::Malformed);
    }

    #[test]
    fn test_wrong_shape_is_malformed() {
        let output = TurnOutput::structured(json!({"verdict": 42}));
        assert_eq!(decode_review(&output), ReviewDecision::Malformed);
    }
}
