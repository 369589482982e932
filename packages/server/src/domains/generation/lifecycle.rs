//! Batch lifecycle: creation, status, results, cancellation.
//!
//! These are the operations the HTTP surface exposes. Status reads are
//! also where lazy finalization happens: a batch whose last job
//! finished while no tick was around to notice gets CASed into its
//! terminal status on the next read.

use std::collections::HashMap;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::types::Json;
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

use crate::kernel::deps::ServerDeps;
use crate::kernel::ticks::TickTask;

use super::fields::select_fields;
use super::models::{BackupMode, Batch, BatchSettings, BatchStatus, GenerationJob, JobStatus};
use super::scheduler;

#[derive(Debug, Error)]
pub enum CreateBatchError {
    #[error("no content items selected")]
    EmptyItems,

    /// One active batch per owner; the conflicting batch is named so
    /// the client can poll or cancel it.
    #[error("another batch is already active")]
    AlreadyActive { batch_id: Uuid },

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateBatchParams {
    pub owner_id: Uuid,
    pub content_item_ids: Vec<Uuid>,
    /// Per-field prompt template overrides, keyed by field name.
    #[serde(default)]
    pub field_prompts: HashMap<String, String>,
    #[serde(default)]
    pub settings: BatchSettings,
}

/// Create a batch and enqueue its first tick.
pub async fn create_batch(deps: &ServerDeps, params: CreateBatchParams) -> Result<Batch, CreateBatchError> {
    // Reap zombie batches first so a crashed run can't block its owner
    // forever.
    scheduler::sweep_stuck_batches(deps).await?;

    let mut seen = std::collections::HashSet::new();
    let item_ids: Vec<Uuid> = params
        .content_item_ids
        .into_iter()
        .filter(|id| seen.insert(*id))
        .collect();
    if item_ids.is_empty() {
        return Err(CreateBatchError::EmptyItems);
    }

    if let Some(active) = deps.store.find_active_batch(params.owner_id).await? {
        return Err(CreateBatchError::AlreadyActive {
            batch_id: active.id,
        });
    }

    let fields = select_fields(params.settings.mode, &params.settings.flags);

    let batch = Batch::builder()
        .owner_id(params.owner_id)
        .content_item_ids(Json(item_ids.clone()))
        .field_prompts(Json(params.field_prompts))
        .settings(Json(params.settings))
        .total_jobs((item_ids.len() * fields.len()) as i32)
        .build();

    let jobs: Vec<GenerationJob> = item_ids
        .iter()
        .flat_map(|&item_id| {
            fields
                .iter()
                .map(move |&field| GenerationJob::new(batch.id, item_id, field))
        })
        .collect();

    deps.store.insert_batch(&batch).await.map_err(CreateBatchError::Internal)?;
    deps.store.insert_jobs(&jobs).await.map_err(CreateBatchError::Internal)?;

    deps.ticks
        .enqueue(
            TickTask { batch_id: batch.id },
            std::time::Duration::ZERO,
        )
        .await
        .map_err(CreateBatchError::Internal)?;

    info!(
        batch_id = %batch.id,
        owner_id = %batch.owner_id,
        items = item_ids.len(),
        jobs = jobs.len(),
        "batch created"
    );

    Ok(batch)
}

/// Progress snapshot served to pollers.
#[derive(Debug, Clone, Serialize)]
pub struct BatchStatusView {
    pub batch_id: Uuid,
    pub status: BatchStatus,
    pub total_jobs: i64,
    pub completed: i64,
    pub failed: i64,
    pub skipped: i64,
    pub pending: i64,
    pub processing: i64,
    /// Finished jobs over total, 0-100.
    pub progress_pct: i64,
    pub current_item_id: Option<Uuid>,
    pub current_field: Option<String>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

pub async fn get_batch_status(deps: &ServerDeps, batch_id: Uuid) -> Result<Option<BatchStatusView>> {
    let Some(mut batch) = deps.store.find_batch(batch_id).await? else {
        return Ok(None);
    };

    // Lazy finalize: if the last job finished and no tick observed it,
    // this read completes the batch.
    if batch.status.is_active() && scheduler::finalize_if_done(deps, &batch).await?.is_some() {
        if let Some(refreshed) = deps.store.find_batch(batch_id).await? {
            batch = refreshed;
        }
    }

    let counts = deps.store.job_counts(batch_id).await?;
    let total = counts.total();
    let progress_pct = if total > 0 {
        counts.finished() * 100 / total
    } else {
        0
    };

    let current = if batch.status == BatchStatus::Processing {
        deps.store.current_processing_job(batch_id).await?
    } else {
        None
    };

    Ok(Some(BatchStatusView {
        batch_id: batch.id,
        status: batch.status,
        total_jobs: total,
        completed: counts.completed,
        failed: counts.failed,
        skipped: counts.skipped,
        pending: counts.pending,
        processing: counts.processing,
        progress_pct,
        current_item_id: current.as_ref().map(|j| j.content_item_id),
        current_field: current.map(|j| j.field_name),
        error_message: batch.error_message.clone(),
        created_at: batch.created_at,
        started_at: batch.started_at,
        completed_at: batch.completed_at,
    }))
}

/// A field that did not complete, with its failure or skip reason.
#[derive(Debug, Clone, Serialize)]
pub struct JobIssue {
    pub field: String,
    pub status: JobStatus,
    pub reason: Option<String>,
}

/// One item's generated values plus its review state.
#[derive(Debug, Clone, Serialize)]
pub struct ItemResults {
    pub content_item_id: Uuid,
    /// Field name to parsed value, for every completed job.
    pub fields: HashMap<String, Value>,
    pub issues: Vec<JobIssue>,
    pub has_backup: bool,
    pub pre_score: Option<i32>,
}

/// The batch's frozen backup policy plus how much review work remains.
#[derive(Debug, Clone, Serialize)]
pub struct BackupReviewState {
    pub enabled: bool,
    pub mode: BackupMode,
    pub threshold: i32,
    /// Items across the batch still holding a snapshot awaiting
    /// approve/restore.
    pub pending_review: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchResults {
    pub batch_id: Uuid,
    pub status: BatchStatus,
    pub items: Vec<ItemResults>,
    pub backup: BackupReviewState,
}

pub async fn get_batch_results(deps: &ServerDeps, batch_id: Uuid) -> Result<Option<BatchResults>> {
    let Some(mut batch) = deps.store.find_batch(batch_id).await? else {
        return Ok(None);
    };

    if batch.status.is_active() && scheduler::finalize_if_done(deps, &batch).await?.is_some() {
        if let Some(refreshed) = deps.store.find_batch(batch_id).await? {
            batch = refreshed;
        }
    }

    let completed = deps.store.completed_jobs_for_batch(batch_id).await?;
    let mut by_item: HashMap<Uuid, HashMap<String, Value>> = HashMap::new();
    for job in completed {
        if let Some(result) = job.result {
            by_item
                .entry(job.content_item_id)
                .or_default()
                .insert(job.field_name, result);
        }
    }

    let mut items = Vec::with_capacity(batch.content_item_ids.len());
    for &item_id in batch.content_item_ids.iter() {
        let backup = deps.store.find_backup(item_id).await?;

        let issues = deps
            .store
            .jobs_for_item(batch_id, item_id)
            .await?
            .into_iter()
            .filter(|job| matches!(job.status, JobStatus::Failed | JobStatus::Skipped))
            .map(|job| JobIssue {
                reason: match job.status {
                    JobStatus::Skipped => job.skip_reason,
                    _ => job.error_message,
                },
                field: job.field_name,
                status: job.status,
            })
            .collect();

        items.push(ItemResults {
            content_item_id: item_id,
            fields: by_item.remove(&item_id).unwrap_or_default(),
            issues,
            has_backup: backup.is_some(),
            pre_score: backup.and_then(|b| b.pre_score),
        });
    }

    let pending_review = deps
        .store
        .count_backups_for_items(&batch.content_item_ids.0)
        .await?;

    Ok(Some(BatchResults {
        batch_id: batch.id,
        status: batch.status,
        items,
        backup: BackupReviewState {
            enabled: batch.settings.backup.enabled,
            mode: batch.settings.backup.mode,
            threshold: batch.settings.backup.restore_threshold,
            pending_review,
        },
    }))
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct CancelOutcome {
    /// False when the batch was already in a terminal status.
    pub cancelled: bool,
    pub skipped_jobs: u64,
}

/// Cancel a batch. Completed work is kept; remaining pending jobs are
/// skipped. Safe to call repeatedly.
pub async fn cancel_batch(deps: &ServerDeps, batch_id: Uuid) -> Result<Option<CancelOutcome>> {
    if deps.store.find_batch(batch_id).await?.is_none() {
        return Ok(None);
    }

    let cancelled = deps.store.cancel_batch(batch_id).await?;
    let skipped_jobs = if cancelled {
        deps.store
            .skip_all_pending_jobs(batch_id, "cancelled by user")
            .await?
    } else {
        0
    };

    if cancelled {
        info!(batch_id = %batch_id, skipped_jobs, "batch cancelled");
    }

    Ok(Some(CancelOutcome {
        cancelled,
        skipped_jobs,
    }))
}

/// The owner's in-flight batch, after reaping any zombie runs.
pub async fn get_active_batch(deps: &ServerDeps, owner_id: Uuid) -> Result<Option<Batch>> {
    scheduler::sweep_stuck_batches(deps).await?;
    deps.store.find_active_batch(owner_id).await
}
