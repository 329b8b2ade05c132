//! Top-level run driver
//!
//! One run: snapshot the repository, establish the coordinator session and
//! its shared batch plan, schedule the conflicts, then (only once every
//! conflict is clear) hand off to CI triage. Per-item problems surface in
//! the report; the only externally observed signal is whether any conflict
//! remained unresolved.

use mend_agent::{AgentRuntime, SessionManager, SessionOptions, TurnOptions};
use mend_core::{BatchReport, EffortTier, MendConfig, Result, Usage, UsageMeter};
use mend_git::{GitExecutor, MergeRefs, RepoSnapshot, SnapshotCollector};
use std::sync::Arc;
use tracing::{info, warn};

use crate::approval::ApprovalGate;
use crate::prompt::build_batch_plan_prompt;
use crate::scheduler::Scheduler;
use crate::strategy::ConflictWorker;
use crate::triage::{TriagePipeline, TriageReport, VerifyRunner};

/// Everything one run produced
#[derive(Debug, Clone)]
pub struct RunReport {
    pub batch: BatchReport,
    /// Present when scheduling left zero conflicts and triage ran
    pub triage: Option<TriageReport>,
    /// Token usage across every turn of the run
    pub usage: Usage,
}

impl RunReport {
    /// Whether the run should exit zero: no conflict left unresolved
    pub fn success(&self) -> bool {
        self.batch.all_resolved()
    }
}

/// Wires the collector, session manager, approval gate, scheduler, and
/// triage pipeline into one run
pub struct Orchestrator<R: AgentRuntime, E: GitExecutor, V: VerifyRunner> {
    config: Arc<MendConfig>,
    runtime: Arc<R>,
    collector: Arc<SnapshotCollector<E>>,
    sessions: Arc<SessionManager<R>>,
    gate: Arc<ApprovalGate>,
    runner: Arc<V>,
    usage: Arc<UsageMeter>,
}

impl<R: AgentRuntime, E: GitExecutor, V: VerifyRunner> Orchestrator<R, E, V> {
    pub fn new(
        config: MendConfig,
        runtime: Arc<R>,
        gate: Arc<ApprovalGate>,
        collector: SnapshotCollector<E>,
        runner: V,
    ) -> Self {
        let sessions = Arc::new(SessionManager::new(runtime.clone()));

        Self {
            config: Arc::new(config),
            runtime,
            collector: Arc::new(collector),
            sessions,
            gate,
            runner: Arc::new(runner),
            usage: Arc::new(UsageMeter::new()),
        }
    }

    /// Resolve the batch and triage the aftermath
    pub async fn run(&self, refs: MergeRefs) -> Result<RunReport> {
        let snapshot = self.collector.collect_snapshot(refs).await?;
        info!(
            "Snapshot collected: {} conflicted paths{}",
            snapshot.conflicts.len(),
            snapshot
                .divergence
                .as_deref()
                .map(|d| format!(" ({})", d))
                .unwrap_or_default()
        );

        let shared_plan = if snapshot.conflicts.is_empty() {
            None
        } else {
            self.establish_coordinator(&snapshot).await
        };

        let worker = ConflictWorker::new(
            self.runtime.clone(),
            self.sessions.clone(),
            self.gate.clone(),
            self.collector.clone(),
            self.config.clone(),
            shared_plan,
            self.usage.clone(),
        );
        let scheduler = Scheduler::new(worker, self.collector.clone(), self.config.clone());
        let batch = scheduler.run_batch(snapshot.conflicts).await;

        let triage = if batch.all_resolved() {
            let pipeline = TriagePipeline::new(
                self.sessions.clone(),
                self.runner.clone(),
                self.config.clone(),
                self.usage.clone(),
            );
            match pipeline.run(&batch.outcomes).await {
                Ok(report) => Some(report),
                Err(e) => {
                    warn!("CI triage failed: {}", e);
                    None
                }
            }
        } else {
            info!("Skipping CI triage: unresolved conflicts remain");
            None
        };

        Ok(RunReport {
            batch,
            triage,
            usage: self.usage.total(),
        })
    }

    /// Start the coordinator session and run the batch-plan turn.
    ///
    /// Worker sessions fork from the coordinator after this turn, so they
    /// inherit the plan; the approval gate reads it too. Any failure here
    /// degrades to running without a coordinator.
    async fn establish_coordinator(&self, snapshot: &RepoSnapshot) -> Option<String> {
        let options = SessionOptions::new("coordinator")
            .with_model(self.config.models.escalation)
            .with_effort(EffortTier::Medium);

        let handle = match self.runtime.start_session(options).await {
            Ok(handle) => handle,
            Err(e) => {
                warn!("Could not start coordinator session: {}; continuing without one", e);
                return None;
            }
        };

        let plan = match self
            .runtime
            .run_turn(
                &handle,
                &build_batch_plan_prompt(snapshot),
                TurnOptions::default(),
            )
            .await
        {
            Ok(output) => {
                self.usage.record(&output.usage);
                let text = output.final_text.trim().to_string();
                (!text.is_empty()).then_some(text)
            }
            Err(e) => {
                warn!("Coordinator plan turn failed: {}", e);
                None
            }
        };

        // Fork point is right after the plan turn
        self.sessions.set_coordinator(handle.clone(), 1);
        self.gate.set_coordinator(handle);

        plan
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::triage::VerifyOutput;
    use async_trait::async_trait;
    use mend_agent::MockRuntime;
    use mend_core::Model;
    use mend_git::{GitOutput, MockGitExecutor};

    const LIST_CONFLICTED: &str = "diff --name-only --diff-filter=U";

    struct StaticRunner {
        log: &'static str,
        success: bool,
    }

    #[async_trait]
    impl VerifyRunner for StaticRunner {
        async fn run(&self, _command: &str) -> Result<VerifyOutput> {
            Ok(VerifyOutput {
                log: self.log.to_string(),
                success: self.success,
            })
        }
    }

    struct Harness {
        runtime: Arc<MockRuntime>,
        orchestrator: Orchestrator<MockRuntime, MockGitExecutor, StaticRunner>,
        _dir: tempfile::TempDir,
    }

    fn harness(
        runtime: MockRuntime,
        git: MockGitExecutor,
        config: MendConfig,
        runner: StaticRunner,
    ) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let git = git.with_root(dir.path());
        let runtime = Arc::new(runtime);
        let gate = Arc::new(ApprovalGate::new(runtime.clone(), Model::Sonnet));
        let collector = SnapshotCollector::new(git);

        Harness {
            runtime: runtime.clone(),
            orchestrator: Orchestrator::new(config, runtime, gate, collector, runner),
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

    /// Git mock for a batch of clean working files: the first conflicted
    /// listing reports the paths, every later one reports none.
    fn git_for(paths: &[&str]) -> MockGitExecutor {
        let mut git = MockGitExecutor::new()
            .with_response(LIST_CONFLICTED, GitOutput::ok(paths.join("\n")))
            .with_response(LIST_CONFLICTED, GitOutput::ok(""))
            .with_response(
                "rev-list --left-right --count HEAD...MERGE_HEAD",
                GitOutput::ok("1\t2\n"),
            )
            .with_response("merge-base HEAD MERGE_HEAD", GitOutput::err("fatal"));

        for path in paths {
            git = git
                .with_response(
                    &format!("diff HEAD MERGE_HEAD -- {}", path),
                    GitOutput::ok("-a\n+b\n"),
                )
                .with_response(
                    &format!("log --oneline -n 5 -- {}", path),
                    GitOutput::ok("abc123 touch\n"),
                );
        }

        git
    }

    #[tokio::test]
    async fn test_two_simple_conflicts_end_to_end() {
        let h = harness(
            MockRuntime::new(),
            git_for(&["a.rs", "b.rs"]),
            MendConfig {
                verify: mend_core::VerifyConfig {
                    command: Some("cargo test".to_string()),
                    ..Default::default()
                },
                ..Default::default()
            },
            StaticRunner {
                log: "all green",
                success: true,
            },
        );
        write_file(&h, "a.rs", "fn a() {}\n");
        write_file(&h, "b.rs", "fn b() {}\n");

        let report = h.orchestrator.run(MergeRefs::default()).await.unwrap();

        assert!(report.success());
        assert_eq!(report.batch.resolved, 2);
        assert_eq!(report.batch.unresolved_with_edits, 0);
        assert_eq!(report.batch.unresolved_without_edits, 0);
        assert!(!report.batch.halted);

        // Verification ran and passed, so no remediation was dispatched
        let triage = report.triage.unwrap();
        assert!(triage.verification_passed);
        assert_eq!(triage.failures, 0);
        assert!(!triage.broadcast);
    }

    #[tokio::test]
    async fn test_coordinator_plan_feeds_workers() {
        let runtime = MockRuntime::new().with_turn(
            "MERGE RESOLUTION BATCH",
            mend_agent::TurnOutput::text("keep the v2 API on both sides"),
        );
        let h = harness(
            runtime,
            git_for(&["a.rs"]),
            MendConfig::default(),
            StaticRunner {
                log: "",
                success: true,
            },
        );
        write_file(&h, "a.rs", "fn a() {}\n");

        let report = h.orchestrator.run(MergeRefs::default()).await.unwrap();

        assert!(report.success());
        // Worker sessions forked from the coordinator context
        assert!(h.runtime.fork_count() >= 1);
        assert_eq!(h.runtime.turn_count_matching("MERGE RESOLUTION BATCH"), 1);
    }

    #[tokio::test]
    async fn test_unresolved_batch_skips_triage_and_fails() {
        let mut config = MendConfig::default();
        config.scheduler.max_attempts = 1;
        config.verify.command = Some("cargo test".to_string());

        let git = git_for(&["a.rs"]);
        let h = harness(
            MockRuntime::new(),
            git,
            config,
            StaticRunner {
                log: "should never run",
                success: false,
            },
        );
        write_file(&h, "a.rs", "<<<<<<< HEAD\na\n=======\nb\n>>>>>>> x\n");

        let report = h.orchestrator.run(MergeRefs::default()).await.unwrap();

        assert!(!report.success());
        assert!(report.triage.is_none());
        assert!(report.batch.halted);
    }

    #[tokio::test]
    async fn test_no_conflicts_still_verifies() {
        let git = MockGitExecutor::new()
            .with_response(LIST_CONFLICTED, GitOutput::ok(""))
            .with_response(
                "rev-list --left-right --count HEAD...MERGE_HEAD",
                GitOutput::ok("0\t0\n"),
            );

        let mut config = MendConfig::default();
        config.verify.command = Some("cargo test".to_string());

        let h = harness(
            MockRuntime::new(),
            git,
            config,
            StaticRunner {
                log: "all green",
                success: true,
            },
        );

        let report = h.orchestrator.run(MergeRefs::default()).await.unwrap();

        assert!(report.success());
        assert_eq!(report.batch.outcomes.len(), 0);
        assert!(report.triage.unwrap().verification_passed);
        // No coordinator session for an empty batch
        assert_eq!(h.runtime.session_count(), 0);
    }
}
