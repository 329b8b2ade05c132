//! Resolution strategies
//!
//! One attempt on one conflict runs through exactly one strategy:
//! single-agent for simple conflicts, planner+executor (dual-agent) for
//! complex ones, or parallel analysis when dual-agent mode is disabled.
//! All three converge on the same disk probe: the file is re-read and the
//! index re-listed, and that truth decides the outcome regardless of what
//! any agent reported.

use mend_agent::{
    AgentRuntime, SessionHandle, SessionKey, SessionManager, SessionOptions, TurnOptions,
    TurnOutput,
};
use mend_core::{
    ConflictContext, EffortTier, MendConfig, Model, ResolutionStatus, Result, UsageMeter,
    WorkerOutcome,
};
use mend_git::{count_markers, GitExecutor, SnapshotCollector};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::approval::{ApprovalContext, ApprovalGate};
use crate::classifier::{classify, Classification};
use crate::prompt;
use crate::review::{decode_review, review_schema, ReviewDecision};

/// Which protocol an attempt runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// One session: resolve, verify, stage
    Single,
    /// Planner produces a plan, executor applies it, planner reviews
    Dual,
    /// Three concurrent analyses feed one integration session
    ParallelAnalysis,
}

/// Pick the strategy for a classified conflict
pub fn select_strategy(simple: bool, dual_agent_enabled: bool) -> Strategy {
    if simple {
        Strategy::Single
    } else if dual_agent_enabled {
        Strategy::Dual
    } else {
        Strategy::ParallelAnalysis
    }
}

/// The three analysis perspectives of the parallel strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnalysisAngle {
    Ours,
    Theirs,
    Overall,
}

impl AnalysisAngle {
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Ours => "ours",
            Self::Theirs => "theirs",
            Self::Overall => "overall",
        }
    }
}

/// Live disk state for one conflict: file content, marker count, and
/// whether the index still reports the path unmerged.
///
/// One probe serves both the skip-review decision and the final status
/// labeling; it is only re-taken after something changed state (fixes
/// applied, file staged).
#[derive(Debug, Clone)]
pub struct ResolutionProbe {
    pub marker_count: usize,
    pub git_conflicted: bool,
    pub content: Option<String>,
}

impl ResolutionProbe {
    /// Clean content and a clean index: nothing left to do
    pub fn is_clean(&self) -> bool {
        self.marker_count == 0 && !self.git_conflicted
    }
}

fn changed_since(before: Option<&str>, current: Option<&str>) -> bool {
    match (before, current) {
        (Some(b), Some(c)) => b != c,
        (None, None) => false,
        _ => true,
    }
}

fn status_of(probe: &ResolutionProbe, changed: bool) -> ResolutionStatus {
    if probe.marker_count == 0 {
        if probe.git_conflicted {
            ResolutionStatus::CleanNotStaged
        } else {
            ResolutionStatus::ResolvedAndStaged
        }
    } else if changed {
        ResolutionStatus::PersistsWithEdits
    } else {
        ResolutionStatus::PersistsNoEdits
    }
}

/// Drives one conflict through one attempt of its selected strategy
pub struct ConflictWorker<R: AgentRuntime, E: GitExecutor> {
    runtime: Arc<R>,
    sessions: Arc<SessionManager<R>>,
    gate: Arc<ApprovalGate>,
    collector: Arc<SnapshotCollector<E>>,
    config: Arc<MendConfig>,
    shared_plan: Option<String>,
    usage: Arc<UsageMeter>,
}

impl<R: AgentRuntime, E: GitExecutor> ConflictWorker<R, E> {
    pub fn new(
        runtime: Arc<R>,
        sessions: Arc<SessionManager<R>>,
        gate: Arc<ApprovalGate>,
        collector: Arc<SnapshotCollector<E>>,
        config: Arc<MendConfig>,
        shared_plan: Option<String>,
        usage: Arc<UsageMeter>,
    ) -> Self {
        Self {
            runtime,
            sessions,
            gate,
            collector,
            config,
            shared_plan,
            usage,
        }
    }

    /// Run one resolution attempt. Runtime errors become failed outcomes,
    /// never panics or batch crashes.
    pub async fn resolve(
        &self,
        ctx: &ConflictContext,
        attempt: u32,
        feedback: Option<&str>,
    ) -> WorkerOutcome {
        let classification = classify(
            ctx,
            &self.config.classifier,
            attempt,
            self.config.strategy.pinned_effort,
        );
        let strategy = select_strategy(classification.simple, self.config.strategy.dual_agent);

        info!(
            "Attempt {} for {} using {:?} (severity {}, effort {})",
            attempt, ctx.path, strategy, classification.severity, classification.effort
        );

        let before = self
            .collector
            .read_working_file(&ctx.path)
            .await
            .ok()
            .flatten();

        let result = match strategy {
            Strategy::Single => {
                self.resolve_single(ctx, classification, attempt, feedback, before.as_deref())
                    .await
            }
            Strategy::Dual => {
                self.resolve_dual(ctx, classification, attempt, feedback, before.as_deref())
                    .await
            }
            Strategy::ParallelAnalysis => {
                self.resolve_parallel(ctx, classification, attempt, feedback, before.as_deref())
                    .await
            }
        };

        match result {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!("Attempt {} for {} died in the runtime: {}", attempt, ctx.path, e);
                let current = self
                    .collector
                    .read_working_file(&ctx.path)
                    .await
                    .ok()
                    .flatten();
                WorkerOutcome::failure(&ctx.path, "attempt aborted by runtime error")
                    .with_error(e.to_string())
                    .with_changed(changed_since(before.as_deref(), current.as_deref()))
            }
        }
    }

    /// Reviewer round over a failed outcome, producing feedback for the
    /// next attempt. Failures here degrade to no feedback.
    pub async fn retry_feedback(&self, outcome: &WorkerOutcome) -> Option<String> {
        let key = SessionKey::reviewer(&outcome.path);
        let options = self.session_options(&key, self.config.models.worker, EffortTier::Medium);

        let session = match self.sessions.acquire(&key, options).await {
            Ok(session) => session,
            Err(e) => {
                warn!("Could not acquire reviewer session for {}: {}", outcome.path, e);
                return None;
            }
        };

        match self
            .turn(
                &session,
                &prompt::build_retry_review_prompt(outcome),
                TurnOptions::default(),
            )
            .await
        {
            Ok(output) => {
                let text = output.final_text.trim().to_string();
                (!text.is_empty()).then_some(text)
            }
            Err(e) => {
                warn!("Reviewer round failed for {}: {}", outcome.path, e);
                None
            }
        }
    }

    /// Drop per-conflict session affinity before a retry.
    ///
    /// Strategies other than single-agent start the next attempt from a
    /// clean session (re-grounding instead of compounding a confused
    /// context); single-agent keeps its session and relies on feedback.
    pub async fn discard_for_retry(&self, ctx: &ConflictContext) {
        let classification = classify(
            ctx,
            &self.config.classifier,
            1,
            self.config.strategy.pinned_effort,
        );
        let strategy = select_strategy(classification.simple, self.config.strategy.dual_agent);

        if strategy == Strategy::Single {
            return;
        }

        self.sessions.discard(&SessionKey::worker(&ctx.path)).await;
        self.sessions.discard(&SessionKey::planner(&ctx.path)).await;
        for angle in [AnalysisAngle::Ours, AnalysisAngle::Theirs, AnalysisAngle::Overall] {
            self.sessions
                .discard(&SessionKey::analyst(&ctx.path, angle.tag()))
                .await;
        }
    }

    /// Re-read the file and the conflicted-path listing from disk
    pub async fn probe(&self, path: &str) -> Result<ResolutionProbe> {
        let content = self.collector.read_working_file(path).await?;
        let conflicted = self.collector.list_conflicted_paths().await?;

        Ok(ResolutionProbe {
            marker_count: content.as_deref().map(count_markers).unwrap_or(0),
            git_conflicted: conflicted.iter().any(|p| p == path),
            content,
        })
    }

    async fn resolve_single(
        &self,
        ctx: &ConflictContext,
        classification: Classification,
        attempt: u32,
        feedback: Option<&str>,
        before: Option<&str>,
    ) -> Result<WorkerOutcome> {
        let key = SessionKey::worker(&ctx.path);
        let model = self.model_for(classification, attempt);
        let session = self
            .sessions
            .acquire(&key, self.session_options(&key, model, classification.effort))
            .await?;

        {
            let _focus = self.gate.register_focus(
                &session.id,
                ApprovalContext {
                    path: Some(ctx.path.clone()),
                    plan: self.shared_plan.clone(),
                    notes: None,
                },
            );

            self.turn(
                &session,
                &prompt::build_resolution_prompt(ctx, feedback),
                TurnOptions::default(),
            )
            .await?;

            self.turn(
                &session,
                &prompt::build_verification_prompt(&ctx.path),
                TurnOptions::default(),
            )
            .await?;
        }

        let probe = self.probe(&ctx.path).await?;
        self.finalize(&ctx.path, &session, before, probe, "single-agent resolution")
            .await
    }

    async fn resolve_dual(
        &self,
        ctx: &ConflictContext,
        classification: Classification,
        attempt: u32,
        feedback: Option<&str>,
        before: Option<&str>,
    ) -> Result<WorkerOutcome> {
        let model = self.model_for(classification, attempt);

        let planner_key = SessionKey::planner(&ctx.path);
        let planner = self
            .sessions
            .acquire(
                &planner_key,
                self.session_options(&planner_key, model, classification.effort),
            )
            .await?;

        let plan_output = self
            .turn(&planner, &prompt::build_plan_prompt(ctx), TurnOptions::default())
            .await?;
        let mut plan = plan_output.final_text.trim().to_string();
        if plan.is_empty() {
            plan = "Merge both sides' changes, keeping each side's functional additions."
                .to_string();
        }
        if let Some(feedback) = feedback {
            plan.push_str("\n\nSupervisor guidance from the previous attempt:\n");
            plan.push_str(feedback);
        }

        let worker_key = SessionKey::worker(&ctx.path);
        let executor = self
            .sessions
            .acquire(
                &worker_key,
                self.session_options(&worker_key, model, classification.effort),
            )
            .await?;

        let exec_output = {
            let _focus = self.gate.register_focus(
                &executor.id,
                ApprovalContext {
                    path: Some(ctx.path.clone()),
                    plan: Some(plan.clone()),
                    notes: None,
                },
            );
            self.turn(
                &executor,
                &prompt::build_executor_prompt(ctx, &plan),
                TurnOptions::default(),
            )
            .await?
        };

        let probe = self.probe(&ctx.path).await?;

        // Obviously clean result: do not burn a review round
        if probe.is_clean() {
            debug!("Skipping review for {}: disk already clean", ctx.path);
            return self
                .finalize(&ctx.path, &executor, before, probe, "resolved without review")
                .await;
        }

        let review = decode_review(
            &self
                .turn(
                    &planner,
                    &prompt::build_review_prompt(
                        &ctx.path,
                        exec_output.final_text.trim(),
                        probe.marker_count,
                        probe.git_conflicted,
                    ),
                    TurnOptions::with_schema(review_schema()),
                )
                .await?,
        );

        match review {
            ReviewDecision::Approved => {
                self.finalize(&ctx.path, &executor, before, probe, "approved by review")
                    .await
            }
            ReviewDecision::NeedsFixes { issues } => {
                info!("Review requested {} fixes for {}", issues.len(), ctx.path);

                {
                    let _focus = self.gate.register_focus(
                        &executor.id,
                        ApprovalContext {
                            path: Some(ctx.path.clone()),
                            plan: Some(plan.clone()),
                            notes: Some("applying review fixes".to_string()),
                        },
                    );
                    self.turn(
                        &executor,
                        &prompt::build_fix_prompt(&ctx.path, &issues),
                        TurnOptions::default(),
                    )
                    .await?;
                }

                // Fixes touched disk; one second review, then finalize
                let probe = self.probe(&ctx.path).await?;
                let second = decode_review(
                    &self
                        .turn(
                            &planner,
                            &prompt::build_review_prompt(
                                &ctx.path,
                                "fixes applied per review issues",
                                probe.marker_count,
                                probe.git_conflicted,
                            ),
                            TurnOptions::with_schema(review_schema()),
                        )
                        .await?,
                );

                match second {
                    ReviewDecision::Approved => {
                        self.finalize(&ctx.path, &executor, before, probe, "approved after fixes")
                            .await
                    }
                    other => {
                        warn!("Second review for {} did not approve: {:?}", ctx.path, other);
                        Ok(self.review_failure(
                            &ctx.path,
                            &executor,
                            before,
                            &probe,
                            "review rejected after fixes",
                        ))
                    }
                }
            }
            ReviewDecision::Rejected { reason } => {
                let summary = match reason {
                    Some(reason) => format!("review rejected: {}", reason),
                    None => "review rejected".to_string(),
                };
                Ok(self.review_failure(&ctx.path, &executor, before, &probe, &summary))
            }
            ReviewDecision::Malformed => Ok(self.review_failure(
                &ctx.path,
                &executor,
                before,
                &probe,
                "unparsable review response treated as rejection",
            )),
        }
    }

    async fn resolve_parallel(
        &self,
        ctx: &ConflictContext,
        classification: Classification,
        attempt: u32,
        feedback: Option<&str>,
        before: Option<&str>,
    ) -> Result<WorkerOutcome> {
        let model = self.model_for(classification, attempt);

        let mut analysts = Vec::with_capacity(3);
        for angle in [AnalysisAngle::Ours, AnalysisAngle::Theirs, AnalysisAngle::Overall] {
            let key = SessionKey::analyst(&ctx.path, angle.tag());
            let options = self
                .session_options(&key, model, EffortTier::Low)
                .with_sandbox(mend_agent::SandboxMode::ReadOnly);
            analysts.push((angle, self.sessions.acquire(&key, options).await?));
        }

        let ours_prompt = prompt::build_analysis_prompt(ctx, AnalysisAngle::Ours);
        let theirs_prompt = prompt::build_analysis_prompt(ctx, AnalysisAngle::Theirs);
        let overall_prompt = prompt::build_analysis_prompt(ctx, AnalysisAngle::Overall);
        let (ours, theirs, overall) = tokio::join!(
            self.turn(
                &analysts[0].1,
                &ours_prompt,
                TurnOptions::default(),
            ),
            self.turn(
                &analysts[1].1,
                &theirs_prompt,
                TurnOptions::default(),
            ),
            self.turn(
                &analysts[2].1,
                &overall_prompt,
                TurnOptions::default(),
            ),
        );

        let analyses = vec![
            (AnalysisAngle::Ours, ours?.final_text),
            (AnalysisAngle::Theirs, theirs?.final_text),
            (AnalysisAngle::Overall, overall?.final_text),
        ];

        let mut integration_prompt = prompt::build_integration_prompt(ctx, &analyses);
        if let Some(feedback) = feedback {
            integration_prompt.push_str("\n## SUPERVISOR GUIDANCE FROM PREVIOUS ATTEMPT\n\n");
            integration_prompt.push_str(feedback);
            integration_prompt.push('\n');
        }

        let worker_key = SessionKey::worker(&ctx.path);
        let session = self
            .sessions
            .acquire(
                &worker_key,
                self.session_options(&worker_key, model, classification.effort),
            )
            .await?;

        {
            let _focus = self.gate.register_focus(
                &session.id,
                ApprovalContext {
                    path: Some(ctx.path.clone()),
                    plan: self.shared_plan.clone(),
                    notes: Some("integrating parallel analyses".to_string()),
                },
            );

            self.turn(&session, &integration_prompt, TurnOptions::default())
                .await?;
            self.turn(
                &session,
                &prompt::build_verification_prompt(&ctx.path),
                TurnOptions::default(),
            )
            .await?;
        }

        let probe = self.probe(&ctx.path).await?;
        self.finalize(&ctx.path, &session, before, probe, "parallel-analysis integration")
            .await
    }

    /// Common post-condition: one staging round when content is clean but
    /// the index still flags the path, then a disk-derived outcome.
    async fn finalize(
        &self,
        path: &str,
        session: &SessionHandle,
        before: Option<&str>,
        mut probe: ResolutionProbe,
        summary_prefix: &str,
    ) -> Result<WorkerOutcome> {
        if probe.marker_count == 0 && probe.git_conflicted {
            debug!("Content clean but index unmerged for {}; staging", path);
            match self.collector.stage_file(path).await {
                Ok(()) => probe = self.probe(path).await?,
                Err(e) => warn!("Staging round failed for {}: {}", path, e),
            }
        }

        let changed = changed_since(before, probe.content.as_deref());
        let status = status_of(&probe, changed);
        let summary = format!("{}: {}", summary_prefix, status);

        let outcome = if status.is_resolved() {
            WorkerOutcome::success(path, summary)
        } else {
            WorkerOutcome::failure(path, summary)
        };

        Ok(outcome
            .with_changed(changed)
            .with_status(status)
            .with_session(&session.id))
    }

    /// Failure outcome for a rejection-grade review result
    fn review_failure(
        &self,
        path: &str,
        session: &SessionHandle,
        before: Option<&str>,
        probe: &ResolutionProbe,
        summary: &str,
    ) -> WorkerOutcome {
        let changed = changed_since(before, probe.content.as_deref());
        WorkerOutcome::failure(path, summary)
            .with_changed(changed)
            .with_status(status_of(probe, changed))
            .with_session(&session.id)
    }

    fn model_for(&self, classification: Classification, attempt: u32) -> Model {
        if classification.severity >= self.config.classifier.high_severity || attempt > 1 {
            self.config.models.escalation
        } else {
            self.config.models.worker
        }
    }

    fn session_options(&self, key: &SessionKey, model: Model, effort: EffortTier) -> SessionOptions {
        SessionOptions::new(key.session_label())
            .with_model(model)
            .with_effort(effort)
    }

    async fn turn(
        &self,
        handle: &SessionHandle,
        prompt: &str,
        options: TurnOptions,
    ) -> Result<TurnOutput> {
        let output = self.runtime.run_turn(handle, prompt, options).await?;
        self.usage.record(&output.usage);
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mend_agent::MockRuntime;
    use mend_git::{GitOutput, MockGitExecutor};
    use serde_json::json;

    const LIST_CONFLICTED: &str = "diff --name-only --diff-filter=U";

    fn simple_ctx(path: &str) -> ConflictContext {
        let mut ctx = ConflictContext::new(path);
        ctx.marker_count = Some(1);
        ctx.line_count = Some(20);
        ctx.diff_ours_theirs = Some("-a\n+b".to_string());
        ctx
    }

    fn complex_ctx(path: &str) -> ConflictContext {
        let mut ctx = ConflictContext::new(path);
        ctx.marker_count = Some(12);
        ctx.line_count = Some(900);
        ctx.diff_ours_theirs = Some("x".repeat(8_000));
        ctx
    }

    struct Harness {
        runtime: Arc<MockRuntime>,
        worker: ConflictWorker<MockRuntime, MockGitExecutor>,
        _dir: tempfile::TempDir,
    }

    fn harness(runtime: MockRuntime, git: MockGitExecutor, config: MendConfig) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let git = git.with_root(dir.path());
        let runtime = Arc::new(runtime);
        let sessions = Arc::new(SessionManager::new(runtime.clone()));
        let gate = Arc::new(ApprovalGate::new(runtime.clone(), Model::Sonnet));
        let collector = Arc::new(SnapshotCollector::new(git));

        let worker = ConflictWorker::new(
            runtime.clone(),
            sessions,
            gate,
            collector,
            Arc::new(config),
            None,
            Arc::new(UsageMeter::new()),
        );

        Harness {
            runtime,
            worker,
            _dir: dir,
        }
    }

    fn write_file(h: &Harness, path: &str, content: &str) {
        let full = h._dir.path().join(path);
        if let Some(parent) = full.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(full, content).unwrap();
    }

    #[test]
    fn test_select_strategy() {
        assert_eq!(select_strategy(true, true), Strategy::Single);
        assert_eq!(select_strategy(true, false), Strategy::Single);
        assert_eq!(select_strategy(false, true), Strategy::Dual);
        assert_eq!(select_strategy(false, false), Strategy::ParallelAnalysis);
    }

    #[tokio::test]
    async fn test_single_strategy_resolves_clean_file() {
        let git = MockGitExecutor::new().with_response(LIST_CONFLICTED, GitOutput::ok(""));
        let h = harness(MockRuntime::new(), git, MendConfig::default());
        write_file(&h, "a.rs", "fn main() {}\n");

        let outcome = h.worker.resolve(&simple_ctx("a.rs"), 1, None).await;

        assert!(outcome.success);
        assert_eq!(outcome.status, Some(ResolutionStatus::ResolvedAndStaged));
        assert_eq!(h.runtime.turn_count_matching("RESOLVE MERGE CONFLICT"), 1);
        assert_eq!(h.runtime.turn_count_matching("VERIFY RESOLUTION"), 1);
    }

    #[tokio::test]
    async fn test_single_strategy_stages_clean_unstaged_file() {
        // Index reports conflicted until the staging round runs
        let git = MockGitExecutor::new()
            .with_response(LIST_CONFLICTED, GitOutput::ok("a.rs\n"))
            .with_response(LIST_CONFLICTED, GitOutput::ok(""))
            .with_response("add -- a.rs", GitOutput::ok(""));
        let h = harness(MockRuntime::new(), git, MendConfig::default());
        write_file(&h, "a.rs", "fn main() {}\n");

        let outcome = h.worker.resolve(&simple_ctx("a.rs"), 1, None).await;

        assert!(outcome.success);
        assert_eq!(outcome.status, Some(ResolutionStatus::ResolvedAndStaged));
    }

    #[tokio::test]
    async fn test_single_strategy_detects_persisting_markers() {
        let git = MockGitExecutor::new().with_response(LIST_CONFLICTED, GitOutput::ok("a.rs\n"));
        let h = harness(MockRuntime::new(), git, MendConfig::default());
        write_file(&h, "a.rs", "<<<<<<< HEAD\na\n=======\nb\n>>>>>>> x\n");

        let outcome = h.worker.resolve(&simple_ctx("a.rs"), 1, None).await;

        assert!(!outcome.success);
        assert_eq!(outcome.status, Some(ResolutionStatus::PersistsNoEdits));
    }

    #[tokio::test]
    async fn test_dual_strategy_skips_review_when_disk_clean() {
        let git = MockGitExecutor::new().with_response(LIST_CONFLICTED, GitOutput::ok(""));
        let h = harness(MockRuntime::new(), git, MendConfig::default());
        write_file(&h, "b.rs", "merged\n");

        let outcome = h.worker.resolve(&complex_ctx("b.rs"), 1, None).await;

        assert!(outcome.success);
        assert!(outcome.summary.contains("resolved without review"));
        assert_eq!(h.runtime.turn_count_matching("REVIEW RESOLUTION"), 0);
    }

    #[tokio::test]
    async fn test_dual_strategy_needs_fixes_then_approved() {
        let runtime = MockRuntime::new()
            .with_turn(
                "REVIEW RESOLUTION",
                TurnOutput::structured(json!({
                    "verdict": "needs_fixes",
                    "issues": ["restore the ours-side guard", "remove duplicated import"]
                })),
            )
            .with_turn(
                "REVIEW RESOLUTION",
                TurnOutput::structured(json!({"verdict": "approved"})),
            );

        let git = MockGitExecutor::new()
            .with_response(LIST_CONFLICTED, GitOutput::ok("b.rs\n"))
            .with_response(LIST_CONFLICTED, GitOutput::ok("b.rs\n"))
            .with_response(LIST_CONFLICTED, GitOutput::ok(""))
            .with_response("add -- b.rs", GitOutput::ok(""));

        let h = harness(runtime, git, MendConfig::default());
        write_file(&h, "b.rs", "merged\n");

        let outcome = h.worker.resolve(&complex_ctx("b.rs"), 1, None).await;

        assert!(outcome.success);
        assert!(outcome.summary.contains("approved after fixes"));
        assert_eq!(h.runtime.turn_count_matching("FIX REVIEW ISSUES"), 1);
        assert_eq!(h.runtime.turn_count_matching("REVIEW RESOLUTION"), 2);
    }

    #[tokio::test]
    async fn test_dual_strategy_rejection_fails() {
        let runtime = MockRuntime::new().with_turn(
            "REVIEW RESOLUTION",
            TurnOutput::structured(json!({"verdict": "rejected", "reason": "both sides dropped"})),
        );
        let git = MockGitExecutor::new().with_response(LIST_CONFLICTED, GitOutput::ok("b.rs\n"));

        let h = harness(runtime, git, MendConfig::default());
        write_file(&h, "b.rs", "merged\n");

        let outcome = h.worker.resolve(&complex_ctx("b.rs"), 1, None).await;

        assert!(!outcome.success);
        assert!(outcome.summary.contains("both sides dropped"));
    }

    #[tokio::test]
    async fn test_dual_strategy_malformed_review_is_rejection() {
        // Default mock output carries no structured payload
        let git = MockGitExecutor::new().with_response(LIST_CONFLICTED, GitOutput::ok("b.rs\n"));
        let h = harness(MockRuntime::new(), git, MendConfig::default());
        write_file(&h, "b.rs", "merged\n");

        let outcome = h.worker.resolve(&complex_ctx("b.rs"), 1, None).await;

        assert!(!outcome.success);
        assert!(outcome.summary.contains("unparsable review response"));
    }

    #[tokio::test]
    async fn test_parallel_strategy_runs_three_analyses() {
        let mut config = MendConfig::default();
        config.strategy.dual_agent = false;

        let git = MockGitExecutor::new().with_response(LIST_CONFLICTED, GitOutput::ok(""));
        let h = harness(MockRuntime::new(), git, config);
        write_file(&h, "c.rs", "merged\n");

        let outcome = h.worker.resolve(&complex_ctx("c.rs"), 1, None).await;

        assert!(outcome.success);
        assert_eq!(h.runtime.turn_count_matching("ANALYZE CONFLICT"), 3);
        assert_eq!(h.runtime.turn_count_matching("INTEGRATE CONFLICT RESOLUTION"), 1);
    }

    #[tokio::test]
    async fn test_runtime_error_becomes_failed_outcome() {
        let runtime = MockRuntime::new().with_turn_error("RESOLVE MERGE CONFLICT", "turn exploded");
        let git = MockGitExecutor::new().with_response(LIST_CONFLICTED, GitOutput::ok("a.rs\n"));

        let h = harness(runtime, git, MendConfig::default());
        write_file(&h, "a.rs", "fn main() {}\n");

        let outcome = h.worker.resolve(&simple_ctx("a.rs"), 1, None).await;

        assert!(!outcome.success);
        assert!(outcome.error.as_deref().unwrap().contains("turn exploded"));
    }

    #[tokio::test]
    async fn test_discard_for_retry_keeps_single_agent_session() {
        let git = MockGitExecutor::new().with_response(LIST_CONFLICTED, GitOutput::ok(""));
        let h = harness(MockRuntime::new(), git, MendConfig::default());
        write_file(&h, "a.rs", "fn main() {}\n");

        let ctx = simple_ctx("a.rs");
        h.worker.resolve(&ctx, 1, None).await;
        let sessions_before = h.runtime.session_count();

        h.worker.discard_for_retry(&ctx).await;
        h.worker.resolve(&ctx, 2, None).await;

        // Same worker session reused across attempts
        assert_eq!(h.runtime.session_count(), sessions_before);
    }

    #[tokio::test]
    async fn test_discard_for_retry_resets_dual_agent_sessions() {
        let runtime = MockRuntime::new().with_default(TurnOutput::structured(
            json!({"verdict": "rejected"}),
        ));
        let git = MockGitExecutor::new().with_response(LIST_CONFLICTED, GitOutput::ok("b.rs\n"));

        let h = harness(runtime, git, MendConfig::default());
        write_file(&h, "b.rs", "merged\n");

        let ctx = complex_ctx("b.rs");
        h.worker.resolve(&ctx, 1, None).await;
        let sessions_before = h.runtime.session_count();

        h.worker.discard_for_retry(&ctx).await;
        h.worker.resolve(&ctx, 2, None).await;

        // Planner and worker sessions recreated for the clean attempt
        assert!(h.runtime.session_count() >= sessions_before + 2);
    }
}
