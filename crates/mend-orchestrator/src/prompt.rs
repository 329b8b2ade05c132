//! Prompt builders for every session round
//!
//! All prompt text lives here so the resolution protocols stay readable.
//! Builders only assemble context the caller already has; they never touch
//! the repository.

use mend_core::{ConflictContext, WorkerOutcome};
use mend_git::RepoSnapshot;

use crate::approval::ApprovalContext;
use crate::strategy::AnalysisAngle;
use crate::triage::CiFailure;
use mend_agent::ApprovalRequest;

fn push_conflict_context(prompt: &mut String, ctx: &ConflictContext) {
    prompt.push_str(&format!("File: {}\n", ctx.path));
    if let Some(language) = &ctx.language {
        prompt.push_str(&format!("Language: {}\n", language));
    }
    if let (Some(lines), Some(markers)) = (ctx.line_count, ctx.marker_count) {
        prompt.push_str(&format!("{} lines, {} conflict regions\n", lines, markers));
    }
    prompt.push('\n');

    if let Some(excerpt) = &ctx.working_excerpt {
        prompt.push_str("## CONFLICTED CONTENT\n\n```\n");
        prompt.push_str(excerpt);
        prompt.push_str("\n```\n\n");
    }

    if let Some(diff) = &ctx.diff_base_ours {
        prompt.push_str("## OUR SIDE (diff from merge base)\n\n```diff\n");
        prompt.push_str(diff);
        prompt.push_str("\n```\n\n");
    }

    if let Some(diff) = &ctx.diff_base_theirs {
        prompt.push_str("## THEIR SIDE (diff from merge base)\n\n```diff\n");
        prompt.push_str(diff);
        prompt.push_str("\n```\n\n");
    }

    if let Some(diff) = &ctx.diff_ours_theirs {
        prompt.push_str("## SIDES COMPARED\n\n```diff\n");
        prompt.push_str(diff);
        prompt.push_str("\n```\n\n");
    }

    if let Some(history) = &ctx.recent_history {
        prompt.push_str("## RECENT HISTORY\n\n");
        prompt.push_str(history);
        prompt.push_str("\n\n");
    }
}

/// Single-agent resolution round
pub fn build_resolution_prompt(ctx: &ConflictContext, feedback: Option<&str>) -> String {
    let mut prompt = String::new();

    prompt.push_str("# RESOLVE MERGE CONFLICT\n\n");
    push_conflict_context(&mut prompt, ctx);

    if let Some(feedback) = feedback {
        prompt.push_str("## SUPERVISOR GUIDANCE FROM PREVIOUS ATTEMPT\n\n");
        prompt.push_str(feedback);
        prompt.push_str("\n\n");
    }

    prompt.push_str("## OBJECTIVE\n\n");
    prompt.push_str("1. Edit the file to merge both sides' intent\n");
    prompt.push_str("2. Remove every conflict marker\n");
    prompt.push_str("3. Keep the file compiling and consistent with surrounding code\n");
    prompt.push_str("4. Stage the file once it is clean\n");

    prompt
}

/// Verification round after an edit
pub fn build_verification_prompt(path: &str) -> String {
    let mut prompt = String::new();

    prompt.push_str(&format!("# VERIFY RESOLUTION: {}\n\n", path));
    prompt.push_str("Re-open the file and confirm:\n");
    prompt.push_str("- No conflict markers remain (<<<<<<<, =======, >>>>>>>)\n");
    prompt.push_str("- Nothing from either side was silently dropped\n");
    prompt.push_str("- The file parses/compiles on its own\n\n");
    prompt.push_str("Fix anything you find, then summarize what you checked.\n");

    prompt
}

/// Planner round of the dual-agent strategy
pub fn build_plan_prompt(ctx: &ConflictContext) -> String {
    let mut prompt = String::new();

    prompt.push_str("# PLAN A CONFLICT RESOLUTION\n\n");
    push_conflict_context(&mut prompt, ctx);

    prompt.push_str("## OBJECTIVE\n\n");
    prompt.push_str("Produce a short strategic plan for resolving this conflict:\n");
    prompt.push_str("- The intent of each side\n");
    prompt.push_str("- What must be kept from ours and what from theirs\n");
    prompt.push_str("- Ordered steps for the executing agent\n\n");
    prompt.push_str("Do not edit anything yourself; another agent executes the plan.\n");

    prompt
}

/// Executor round of the dual-agent strategy
pub fn build_executor_prompt(ctx: &ConflictContext, plan: &str) -> String {
    let mut prompt = String::new();

    prompt.push_str(&format!("# EXECUTE RESOLUTION PLAN: {}\n\n", ctx.path));
    prompt.push_str("## PLAN FROM SUPERVISOR\n\n");
    prompt.push_str(plan);
    prompt.push_str("\n\n## OBJECTIVE\n\n");
    prompt.push_str("Apply the plan:\n");
    prompt.push_str("1. Edit the file, following the plan's steps in order\n");
    prompt.push_str("2. Remove every conflict marker\n");
    prompt.push_str("3. Stage the file once it is clean\n");

    prompt
}

/// Structured review round of the dual-agent strategy
pub fn build_review_prompt(
    path: &str,
    executor_summary: &str,
    marker_count: usize,
    git_conflicted: bool,
) -> String {
    let mut prompt = String::new();

    prompt.push_str(&format!("# REVIEW RESOLUTION: {}\n\n", path));
    prompt.push_str("## EXECUTOR REPORT\n\n");
    prompt.push_str(executor_summary);
    prompt.push_str("\n\n## DISK STATE\n\n");
    prompt.push_str(&format!("- Conflict markers remaining: {}\n", marker_count));
    prompt.push_str(&format!(
        "- Index still reports the path unmerged: {}\n\n",
        git_conflicted
    ));
    prompt.push_str("## OBJECTIVE\n\n");
    prompt.push_str("Review the resolution against your plan. Respond with a verdict:\n");
    prompt.push_str("- `approved` if the merge preserves both sides' intent\n");
    prompt.push_str("- `needs_fixes` with an itemized `issues` list of concrete problems\n");
    prompt.push_str("- `rejected` with a `reason` if the resolution is unsalvageable\n");

    prompt
}

/// Re-prompt the executor with the review's exact issues
pub fn build_fix_prompt(path: &str, issues: &[String]) -> String {
    let mut prompt = String::new();

    prompt.push_str(&format!("# FIX REVIEW ISSUES: {}\n\n", path));
    prompt.push_str("The supervisor reviewed your resolution and requires fixes:\n\n");
    for (i, issue) in issues.iter().enumerate() {
        prompt.push_str(&format!("{}. {}\n", i + 1, issue));
    }
    prompt.push_str("\nAddress every issue above, keep the file free of conflict markers, and re-stage it.\n");

    prompt
}

/// One angle of the parallel-analysis strategy
pub fn build_analysis_prompt(ctx: &ConflictContext, angle: AnalysisAngle) -> String {
    let mut prompt = String::new();

    prompt.push_str(&format!("# ANALYZE CONFLICT: {}\n\n", ctx.path));
    push_conflict_context(&mut prompt, ctx);

    prompt.push_str("## OBJECTIVE\n\n");
    let focus = match angle {
        AnalysisAngle::Ours => "Explain what OUR side is trying to achieve with its changes",
        AnalysisAngle::Theirs => "Explain what THEIR side is trying to achieve with its changes",
        AnalysisAngle::Overall => {
            "Explain the overall intent: how both sides should combine into one coherent result"
        }
    };
    prompt.push_str(focus);
    prompt.push_str(".\nBe concrete about symbols, behavior, and ordering. Do not edit anything.\n");

    prompt
}

/// Integration round combining the three analyses
pub fn build_integration_prompt(ctx: &ConflictContext, analyses: &[(AnalysisAngle, String)]) -> String {
    let mut prompt = String::new();

    prompt.push_str(&format!("# INTEGRATE CONFLICT RESOLUTION: {}\n\n", ctx.path));
    for (angle, text) in analyses {
        let header = match angle {
            AnalysisAngle::Ours => "## ANALYSIS: OUR SIDE'S INTENT",
            AnalysisAngle::Theirs => "## ANALYSIS: THEIR SIDE'S INTENT",
            AnalysisAngle::Overall => "## ANALYSIS: OVERALL INTENT",
        };
        prompt.push_str(header);
        prompt.push_str("\n\n");
        prompt.push_str(text);
        prompt.push_str("\n\n");
    }

    prompt.push_str("## OBJECTIVE\n\n");
    prompt.push_str("Using all three analyses:\n");
    prompt.push_str("1. Edit the file to a single coherent resolution\n");
    prompt.push_str("2. Remove every conflict marker\n");
    prompt.push_str("3. Stage the file once it is clean\n");

    prompt
}

/// Per-file reviewer inspecting a failed attempt before retry
pub fn build_retry_review_prompt(outcome: &WorkerOutcome) -> String {
    let mut prompt = String::new();

    prompt.push_str(&format!("# INSPECT FAILED ATTEMPT: {}\n\n", outcome.path));
    prompt.push_str("## OUTCOME\n\n");
    prompt.push_str(&format!("- Summary: {}\n", outcome.summary));
    prompt.push_str(&format!("- File content changed: {}\n", outcome.changed));
    if let Some(status) = &outcome.status {
        prompt.push_str(&format!("- Status: {}\n", status));
    }
    if let Some(error) = &outcome.error {
        prompt.push_str(&format!("- Error: {}\n", error));
    }
    prompt.push_str("\n## OBJECTIVE\n\n");
    prompt.push_str(
        "Diagnose why this attempt failed and write short, concrete guidance for the next attempt. \
         If no edits were applied at all, say what likely blocked the worker.\n",
    );

    prompt
}

/// Coordinator batch-plan round over the whole snapshot
pub fn build_batch_plan_prompt(snapshot: &RepoSnapshot) -> String {
    let mut prompt = String::new();

    prompt.push_str("# MERGE RESOLUTION BATCH\n\n");
    prompt.push_str(&format!(
        "Merging {} into {}.\n",
        snapshot.refs.theirs, snapshot.refs.ours
    ));
    if let Some(divergence) = &snapshot.divergence {
        prompt.push_str(&format!("Divergence: {}\n", divergence));
    }
    prompt.push_str(&format!("\n## CONFLICTED FILES ({})\n\n", snapshot.conflicts.len()));
    for ctx in &snapshot.conflicts {
        let markers = ctx
            .marker_count
            .map(|m| m.to_string())
            .unwrap_or_else(|| "?".to_string());
        prompt.push_str(&format!("- {} ({} conflict regions)\n", ctx.path, markers));
    }
    prompt.push_str("\n## OBJECTIVE\n\n");
    prompt.push_str(
        "Write a short shared plan for resolving this batch: cross-file constraints, ordering \
         concerns, and anything a per-file worker must not do unilaterally. Worker sessions are \
         forked from this conversation and inherit the plan.\n",
    );

    prompt
}

/// Policy round deciding one sensitive operation
pub fn build_approval_prompt(request: &ApprovalRequest, context: Option<&ApprovalContext>) -> String {
    let mut prompt = String::new();

    prompt.push_str("# APPROVAL REQUEST\n\n");
    prompt.push_str(&format!("- Operation: {}\n", request.operation));
    prompt.push_str(&format!("- Title: {}\n", request.title));
    if !request.metadata.is_null() {
        prompt.push_str(&format!("- Details: {}\n", request.metadata));
    }

    if let Some(context) = context {
        prompt.push_str("\n## CURRENT FOCUS\n\n");
        if let Some(path) = &context.path {
            prompt.push_str(&format!("- Resolving conflict in: {}\n", path));
        }
        if let Some(plan) = &context.plan {
            prompt.push_str(&format!("- Plan: {}\n", plan));
        }
        if let Some(notes) = &context.notes {
            prompt.push_str(&format!("- Notes: {}\n", notes));
        }
    }

    prompt.push_str("\n## OBJECTIVE\n\n");
    prompt.push_str(
        "Decide whether this operation is necessary for the current focus. Respond with \
         `allow_once`, `allow_always` (only for clearly repetitive safe operations), or `deny`, \
         plus a one-line reason.\n",
    );

    prompt
}

/// Short note pushed to the coordinator after a denial
pub fn build_denial_note(request: &ApprovalRequest, reason: &str) -> String {
    format!(
        "Approval denied for session {}: {} ({}). Reason: {}. \
         Adjust the plan if the worker needs an alternative route.",
        request.session_id, request.operation, request.title, reason
    )
}

/// Remediation round for one extracted CI failure
pub fn build_remediation_prompt(failure: &CiFailure, prepared_log: &str) -> String {
    let mut prompt = String::new();

    prompt.push_str(&format!("# CI FAILURE: {}\n\n", failure.label));
    prompt.push_str("## FAILURE EXCERPT\n\n```\n");
    prompt.push_str(&failure.snippet);
    prompt.push_str("\n```\n\n");

    if !failure.path_hints.is_empty() {
        prompt.push_str("Suspected files:\n");
        for hint in &failure.path_hints {
            prompt.push_str(&format!("- {}\n", hint));
        }
        prompt.push('\n');
    }
    if !failure.test_hints.is_empty() {
        prompt.push_str("Failing tests:\n");
        for hint in &failure.test_hints {
            prompt.push_str(&format!("- {}\n", hint));
        }
        prompt.push('\n');
    }

    prompt.push_str("## FULL VERIFICATION LOG (prepared)\n\n```\n");
    prompt.push_str(prepared_log);
    prompt.push_str("\n```\n\n");
    prompt.push_str("## OBJECTIVE\n\n");
    prompt.push_str(
        "This failure appeared after the merge conflicts you just resolved. Investigate, fix the \
         cause, and re-stage any files you touch.\n",
    );

    prompt
}

/// Fallback round when the log yields no structured failures
pub fn build_broadcast_prompt(prepared_log: &str) -> String {
    let mut prompt = String::new();

    prompt.push_str("# POST-MERGE VERIFICATION FAILED\n\n");
    prompt.push_str(
        "The verification command failed after the merge, but no individual failures could be \
         extracted from its log. Review the log below for anything related to the file you \
         resolved, and fix what you find.\n\n",
    );
    prompt.push_str("```\n");
    prompt.push_str(prepared_log);
    prompt.push_str("\n```\n");

    prompt
}

/// Summarizer round compressing the head of an oversized log
pub fn build_summarizer_prompt(head: &str, budget_chars: usize) -> String {
    let mut prompt = String::new();

    prompt.push_str("# SUMMARIZE VERIFICATION LOG\n\n");
    prompt.push_str(&format!(
        "Summarize the log below in at most {} characters. Keep every error message, failing \
         test name, and file path; drop progress noise and passing output.\n\n",
        budget_chars
    ));
    prompt.push_str("```\n");
    prompt.push_str(head);
    prompt.push_str("\n```\n");

    prompt
}
