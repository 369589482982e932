//! Dependency-aware batch scheduler.
//!
//! One tick runs at most one job, then enqueues its successor after the
//! batch's inter-job delay. The tick loop is stateless: every decision
//! is recomputed from the store, so a lost or duplicated tick cannot
//! corrupt a batch. Jobs within an item run in field order; a job whose
//! prerequisite ended in failure is skipped instead of run.

use std::time::Duration;

use anyhow::Result;
use std::collections::HashMap;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::kernel::deps::ServerDeps;
use crate::kernel::ticks::TickTask;

use super::models::{Batch, BatchStatus, GenerationJob, JobStatus};
use super::processor;

/// How many pending jobs one tick examines when hunting for runnable
/// work.
pub const SCAN_WINDOW: i64 = 50;

/// Execute one scheduler tick for a batch.
pub async fn run_tick(deps: &ServerDeps, batch_id: Uuid) -> Result<()> {
    let Some(batch) = deps.store.find_batch(batch_id).await? else {
        warn!(batch_id = %batch_id, "tick for unknown batch, dropping");
        return Ok(());
    };

    if batch.status.is_terminal() {
        debug!(batch_id = %batch_id, status = ?batch.status, "tick for finished batch, dropping");
        return Ok(());
    }

    // First tick wins the pending -> processing transition; later
    // ticks see zero rows affected and carry on.
    deps.store.mark_batch_processing(batch_id).await?;

    let pending = deps.store.pending_jobs(batch_id, SCAN_WINDOW).await?;

    if pending.is_empty() {
        finalize_if_done(deps, &batch).await?;
        return Ok(());
    }

    let mut item_jobs: HashMap<Uuid, Vec<GenerationJob>> = HashMap::new();
    let mut skipped_any = false;

    for job in &pending {
        if !item_jobs.contains_key(&job.content_item_id) {
            let jobs = deps
                .store
                .jobs_for_item(batch_id, job.content_item_id)
                .await?;
            item_jobs.insert(job.content_item_id, jobs);
        }
        let siblings = &item_jobs[&job.content_item_id];

        match prerequisite_state(job, siblings) {
            PrereqState::Satisfied => {
                processor::process_job(deps, &batch, job).await?;

                let delay = Duration::from_secs(batch.settings.tick_delay_secs);
                deps.ticks.enqueue(TickTask { batch_id }, delay).await?;
                return Ok(());
            }
            PrereqState::Broken(prereq_name) => {
                let reason = format!("prerequisite {prereq_name} failed");
                if deps.store.skip_job(job.id, &reason).await? {
                    info!(job_id = %job.id, field = %job.field_name, reason, "job skipped");
                    skipped_any = true;
                }
            }
            PrereqState::Waiting => {
                // A prerequisite is still in flight (stray tick racing
                // the active one); that tick's successor will pick the
                // job up.
                debug!(job_id = %job.id, "prerequisite in flight, leaving for next tick");
            }
        }
    }

    if skipped_any {
        // The skips may have emptied the batch; re-evaluate right away.
        deps.ticks
            .enqueue(TickTask { batch_id }, Duration::ZERO)
            .await?;
    }

    Ok(())
}

enum PrereqState {
    Satisfied,
    Waiting,
    Broken(&'static str),
}

/// Check a pending job's prerequisites against its item's jobs. A
/// prerequisite field the batch never scheduled counts as satisfied.
fn prerequisite_state(job: &GenerationJob, siblings: &[GenerationJob]) -> PrereqState {
    let Some(field) = job.field() else {
        // Processor will fail it with a proper error message.
        return PrereqState::Satisfied;
    };

    for prereq in field.prerequisites() {
        let Some(sibling) = siblings
            .iter()
            .find(|s| s.field_name == prereq.as_str())
        else {
            continue;
        };

        match sibling.status {
            JobStatus::Completed => {}
            JobStatus::Failed | JobStatus::Skipped => {
                return PrereqState::Broken(prereq.as_str());
            }
            JobStatus::Pending | JobStatus::Processing => return PrereqState::Waiting,
        }
    }

    PrereqState::Satisfied
}

/// CAS the batch into its terminal status once no work remains.
///
/// Callable from any tick or status read; only the winner observes
/// `Some`. Snapshots are left untouched: auto-mode batches are resolved
/// by the client's later score-check call, once recomputed scores have
/// settled.
pub async fn finalize_if_done(deps: &ServerDeps, batch: &Batch) -> Result<Option<BatchStatus>> {
    let counts = deps.store.job_counts(batch.id).await?;
    if counts.pending > 0 || counts.processing > 0 {
        return Ok(None);
    }

    let status = if counts.failed > 0 || counts.skipped > 0 {
        BatchStatus::CompletedWithErrors
    } else {
        BatchStatus::Completed
    };

    if !deps.store.finalize_batch(batch.id, status, None).await? {
        return Ok(None);
    }

    info!(
        batch_id = %batch.id,
        status = ?status,
        completed = counts.completed,
        failed = counts.failed,
        skipped = counts.skipped,
        "batch finalized"
    );

    Ok(Some(status))
}

/// Force-complete batches stuck in `processing` past the liveness
/// timeout (a crashed runner, a lost tick chain). Pending jobs are
/// skipped and jobs orphaned mid-run are failed, so every job is
/// terminal once the batch is.
pub async fn sweep_stuck_batches(deps: &ServerDeps) -> Result<usize> {
    let stuck = deps.store.find_stuck_batches().await?;
    let mut swept = 0;

    for batch in stuck {
        deps.store
            .fail_processing_jobs(batch.id, "batch timed out")
            .await?;
        deps.store
            .skip_all_pending_jobs(batch.id, "batch timed out")
            .await?;

        if deps
            .store
            .finalize_batch(
                batch.id,
                BatchStatus::CompletedWithErrors,
                Some("batch timed out while processing"),
            )
            .await?
        {
            warn!(batch_id = %batch.id, "stuck batch force-completed");
            swept += 1;
        }
    }

    Ok(swept)
}
