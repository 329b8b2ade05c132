//! Batch scheduler
//!
//! Drives the whole batch: simple conflicts first, fixed-size concurrency
//! groups with a strict barrier between them, bounded retries with
//! reviewer feedback, and a trust-but-verify disk re-read after every
//! group. A file that still shows markers after its group finished halts
//! the batch — later groups were planned assuming earlier resolutions
//! held.

use futures::future::join_all;
use mend_agent::AgentRuntime;
use mend_core::{
    BatchReport, ConflictContext, MendConfig, ResolutionStatus, WorkerOutcome,
};
use mend_git::{count_markers, GitExecutor, SnapshotCollector};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::classifier::classify;
use crate::strategy::ConflictWorker;

/// Concurrency-bounded batch engine over one run's conflicts
pub struct Scheduler<R: AgentRuntime, E: GitExecutor> {
    worker: ConflictWorker<R, E>,
    collector: Arc<SnapshotCollector<E>>,
    config: Arc<MendConfig>,
}

impl<R: AgentRuntime, E: GitExecutor> Scheduler<R, E> {
    pub fn new(
        worker: ConflictWorker<R, E>,
        collector: Arc<SnapshotCollector<E>>,
        config: Arc<MendConfig>,
    ) -> Self {
        Self {
            worker,
            collector,
            config,
        }
    }

    /// Run the batch to completion (or halt) and aggregate outcomes
    pub async fn run_batch(&self, conflicts: Vec<ConflictContext>) -> BatchReport {
        if conflicts.is_empty() {
            return BatchReport::default();
        }

        let pinned = self.config.strategy.pinned_effort;
        let mut ordered = conflicts;
        // Simple before complex across the whole batch; grouping applies
        // to the ordered list, not per class
        ordered.sort_by_key(|ctx| !classify(ctx, &self.config.classifier, 1, pinned).simple);

        let concurrency = self.config.scheduler.concurrency.max(1);
        let mut outcomes: Vec<WorkerOutcome> = Vec::with_capacity(ordered.len());
        let mut halted = false;

        for group in ordered.chunks(concurrency) {
            if halted {
                for ctx in group {
                    outcomes.push(WorkerOutcome::failure(
                        &ctx.path,
                        "not attempted (batch halted before this group)",
                    ));
                }
                continue;
            }

            info!("Starting group of {} conflicts", group.len());
            let mut group_outcomes = join_all(group.iter().map(|ctx| self.drive(ctx))).await;

            // Trust-but-verify: the on-disk truth wins over any self-report
            for (ctx, outcome) in group.iter().zip(group_outcomes.iter_mut()) {
                let markers = self.markers_on_disk(&ctx.path).await;
                if apply_disk_truth(outcome, markers) {
                    halted = true;
                }
            }

            outcomes.append(&mut group_outcomes);

            if halted {
                warn!("Batch halted: a file in the finished group still shows conflict markers");
            }
        }

        let report = BatchReport::tally(outcomes, halted);
        info!(
            "Batch complete: {} resolved, {} unresolved with edits, {} unresolved without edits{}",
            report.resolved,
            report.unresolved_with_edits,
            report.unresolved_without_edits,
            if report.halted { " (halted)" } else { "" }
        );
        report
    }

    /// Attempt/retry loop for one conflict
    async fn drive(&self, ctx: &ConflictContext) -> WorkerOutcome {
        let max_attempts = self.config.scheduler.max_attempts.max(1);

        let mut outcome = self.worker.resolve(ctx, 1, None).await;
        let mut attempt = 1;

        while !outcome.success && attempt < max_attempts {
            let feedback = self.worker.retry_feedback(&outcome).await;
            self.worker.discard_for_retry(ctx).await;

            attempt += 1;
            debug!("Retrying {} (attempt {} of {})", ctx.path, attempt, max_attempts);
            outcome = self.worker.resolve(ctx, attempt, feedback.as_deref()).await;
        }

        outcome
    }

    async fn markers_on_disk(&self, path: &str) -> usize {
        match self.collector.read_working_file(path).await {
            Ok(Some(content)) => count_markers(&content),
            Ok(None) => 0,
            Err(e) => {
                warn!("Disk re-read failed for {}: {}", path, e);
                0
            }
        }
    }
}

/// Reconcile an outcome with the marker count re-read from disk.
///
/// Returns whether the file is still conflicted. A success claim with
/// markers on disk is downgraded to failure; the agent's self-report never
/// outranks the working tree.
fn apply_disk_truth(outcome: &mut WorkerOutcome, markers_on_disk: usize) -> bool {
    if markers_on_disk == 0 {
        return false;
    }

    if outcome.success {
        warn!(
            "Outcome for {} claimed success but disk shows {} markers; downgrading",
            outcome.path, markers_on_disk
        );
        outcome.success = false;
        outcome.status = Some(if outcome.changed {
            ResolutionStatus::PersistsWithEdits
        } else {
            ResolutionStatus::PersistsNoEdits
        });
        outcome.summary = format!(
            "{} (disk re-read found {} conflict markers)",
            outcome.summary, markers_on_disk
        );
    }

    true
}
