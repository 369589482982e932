//! In-memory [`GenerationStore`] for tests.
//!
//! Mirrors the Postgres implementation's compare-and-swap semantics so
//! the scheduler and processor behave identically against it.

use std::collections::HashMap;
use std::sync::RwLock;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{Duration, Utc};
use serde_json::Value;
use uuid::Uuid;

use crate::domains::generation::models::{
    Batch, BatchStatus, GenerationJob, JobStatus, SeoBackup, STUCK_BATCH_TIMEOUT_MINUTES,
};

use super::{GenerationStore, JobCounts};

#[derive(Default)]
pub struct InMemoryGenerationStore {
    batches: RwLock<HashMap<Uuid, Batch>>,
    jobs: RwLock<HashMap<Uuid, GenerationJob>>,
    backups: RwLock<HashMap<Uuid, SeoBackup>>,
}

impl InMemoryGenerationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rewrite a batch's `started_at`, for stuck-batch tests.
    pub fn backdate_batch_start(&self, batch_id: Uuid, minutes: i64) {
        let mut batches = self.batches.write().unwrap_or_else(|e| e.into_inner());
        if let Some(batch) = batches.get_mut(&batch_id) {
            batch.started_at = Some(Utc::now() - Duration::minutes(minutes));
        }
    }
}

#[async_trait]
impl GenerationStore for InMemoryGenerationStore {
    async fn insert_batch(&self, batch: &Batch) -> Result<()> {
        self.batches
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(batch.id, batch.clone());
        Ok(())
    }

    async fn find_batch(&self, id: Uuid) -> Result<Option<Batch>> {
        Ok(self
            .batches
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&id)
            .cloned())
    }

    async fn find_active_batch(&self, owner_id: Uuid) -> Result<Option<Batch>> {
        let batches = self.batches.read().unwrap_or_else(|e| e.into_inner());
        let mut active: Vec<&Batch> = batches
            .values()
            .filter(|b| b.owner_id == owner_id && b.status.is_active())
            .collect();
        active.sort_by_key(|b| b.created_at);

        Ok(active.last().map(|b| (*b).clone()))
    }

    async fn mark_batch_processing(&self, id: Uuid) -> Result<bool> {
        let mut batches = self.batches.write().unwrap_or_else(|e| e.into_inner());
        match batches.get_mut(&id) {
            Some(batch) if batch.status == BatchStatus::Pending => {
                batch.status = BatchStatus::Processing;
                batch.started_at = Some(Utc::now());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn cancel_batch(&self, id: Uuid) -> Result<bool> {
        let mut batches = self.batches.write().unwrap_or_else(|e| e.into_inner());
        match batches.get_mut(&id) {
            Some(batch) if batch.status.is_active() => {
                batch.status = BatchStatus::Cancelled;
                batch.completed_at = Some(Utc::now());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn finalize_batch(
        &self,
        id: Uuid,
        status: BatchStatus,
        error_message: Option<&str>,
    ) -> Result<bool> {
        let mut batches = self.batches.write().unwrap_or_else(|e| e.into_inner());
        match batches.get_mut(&id) {
            Some(batch) if batch.status.is_active() => {
                batch.status = status;
                batch.error_message = error_message.map(|s| s.to_string());
                batch.completed_at = Some(Utc::now());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn find_stuck_batches(&self) -> Result<Vec<Batch>> {
        let cutoff = Utc::now() - Duration::minutes(STUCK_BATCH_TIMEOUT_MINUTES);
        let batches = self.batches.read().unwrap_or_else(|e| e.into_inner());

        Ok(batches
            .values()
            .filter(|b| {
                b.status == BatchStatus::Processing
                    && b.started_at.map(|t| t < cutoff).unwrap_or(false)
            })
            .cloned()
            .collect())
    }

    async fn increment_completed_jobs(&self, batch_id: Uuid) -> Result<()> {
        let mut batches = self.batches.write().unwrap_or_else(|e| e.into_inner());
        if let Some(batch) = batches.get_mut(&batch_id) {
            batch.completed_jobs += 1;
        }
        Ok(())
    }

    async fn increment_failed_jobs(&self, batch_id: Uuid) -> Result<()> {
        let mut batches = self.batches.write().unwrap_or_else(|e| e.into_inner());
        if let Some(batch) = batches.get_mut(&batch_id) {
            batch.failed_jobs += 1;
        }
        Ok(())
    }

    async fn insert_jobs(&self, jobs: &[GenerationJob]) -> Result<()> {
        let mut map = self.jobs.write().unwrap_or_else(|e| e.into_inner());
        for job in jobs {
            map.insert(job.id, job.clone());
        }
        Ok(())
    }

    async fn find_job(&self, id: Uuid) -> Result<Option<GenerationJob>> {
        Ok(self
            .jobs
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&id)
            .cloned())
    }

    async fn pending_jobs(&self, batch_id: Uuid, limit: i64) -> Result<Vec<GenerationJob>> {
        let jobs = self.jobs.read().unwrap_or_else(|e| e.into_inner());
        let mut pending: Vec<GenerationJob> = jobs
            .values()
            .filter(|j| j.batch_id == batch_id && j.status == JobStatus::Pending)
            .cloned()
            .collect();
        pending.sort_by_key(|j| (j.content_item_id, j.field_order));
        pending.truncate(limit as usize);

        Ok(pending)
    }

    async fn claim_job(&self, id: Uuid) -> Result<bool> {
        let mut jobs = self.jobs.write().unwrap_or_else(|e| e.into_inner());
        match jobs.get_mut(&id) {
            Some(job) if job.status == JobStatus::Pending => {
                job.status = JobStatus::Processing;
                job.started_at = Some(Utc::now());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn complete_job(&self, id: Uuid, result: &Value) -> Result<bool> {
        let mut jobs = self.jobs.write().unwrap_or_else(|e| e.into_inner());
        match jobs.get_mut(&id) {
            Some(job) if job.status == JobStatus::Processing => {
                job.status = JobStatus::Completed;
                job.result = Some(result.clone());
                job.completed_at = Some(Utc::now());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn retry_job(&self, id: Uuid, error: &str) -> Result<bool> {
        let mut jobs = self.jobs.write().unwrap_or_else(|e| e.into_inner());
        match jobs.get_mut(&id) {
            Some(job) if job.status == JobStatus::Processing => {
                job.status = JobStatus::Pending;
                job.retry_count += 1;
                job.error_message = Some(error.to_string());
                job.started_at = None;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn fail_job(&self, id: Uuid, error: &str) -> Result<bool> {
        let mut jobs = self.jobs.write().unwrap_or_else(|e| e.into_inner());
        match jobs.get_mut(&id) {
            Some(job) if job.status == JobStatus::Processing => {
                job.status = JobStatus::Failed;
                job.error_message = Some(error.to_string());
                job.completed_at = Some(Utc::now());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn skip_job(&self, id: Uuid, reason: &str) -> Result<bool> {
        let mut jobs = self.jobs.write().unwrap_or_else(|e| e.into_inner());
        match jobs.get_mut(&id) {
            Some(job) if job.status == JobStatus::Pending => {
                job.status = JobStatus::Skipped;
                job.skip_reason = Some(reason.to_string());
                job.completed_at = Some(Utc::now());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn skip_pending_jobs_for_item(
        &self,
        batch_id: Uuid,
        content_item_id: Uuid,
        reason: &str,
    ) -> Result<u64> {
        let mut jobs = self.jobs.write().unwrap_or_else(|e| e.into_inner());
        let mut skipped = 0;

        for job in jobs.values_mut() {
            if job.batch_id == batch_id
                && job.content_item_id == content_item_id
                && job.status == JobStatus::Pending
            {
                job.status = JobStatus::Skipped;
                job.skip_reason = Some(reason.to_string());
                job.completed_at = Some(Utc::now());
                skipped += 1;
            }
        }

        Ok(skipped)
    }

    async fn skip_all_pending_jobs(&self, batch_id: Uuid, reason: &str) -> Result<u64> {
        let mut jobs = self.jobs.write().unwrap_or_else(|e| e.into_inner());
        let mut skipped = 0;

        for job in jobs.values_mut() {
            if job.batch_id == batch_id && job.status == JobStatus::Pending {
                job.status = JobStatus::Skipped;
                job.skip_reason = Some(reason.to_string());
                job.completed_at = Some(Utc::now());
                skipped += 1;
            }
        }

        Ok(skipped)
    }

    async fn fail_processing_jobs(&self, batch_id: Uuid, error: &str) -> Result<u64> {
        let mut jobs = self.jobs.write().unwrap_or_else(|e| e.into_inner());
        let mut failed = 0;

        for job in jobs.values_mut() {
            if job.batch_id == batch_id && job.status == JobStatus::Processing {
                job.status = JobStatus::Failed;
                job.error_message = Some(error.to_string());
                job.completed_at = Some(Utc::now());
                failed += 1;
            }
        }

        Ok(failed)
    }

    async fn job_counts(&self, batch_id: Uuid) -> Result<JobCounts> {
        let jobs = self.jobs.read().unwrap_or_else(|e| e.into_inner());
        let mut counts = JobCounts::default();

        for job in jobs.values().filter(|j| j.batch_id == batch_id) {
            counts.absorb(job.status, 1);
        }

        Ok(counts)
    }

    async fn current_processing_job(&self, batch_id: Uuid) -> Result<Option<GenerationJob>> {
        let jobs = self.jobs.read().unwrap_or_else(|e| e.into_inner());
        let mut processing: Vec<&GenerationJob> = jobs
            .values()
            .filter(|j| j.batch_id == batch_id && j.status == JobStatus::Processing)
            .collect();
        processing.sort_by_key(|j| j.started_at);

        Ok(processing.first().map(|j| (*j).clone()))
    }

    async fn jobs_for_item(
        &self,
        batch_id: Uuid,
        content_item_id: Uuid,
    ) -> Result<Vec<GenerationJob>> {
        let jobs = self.jobs.read().unwrap_or_else(|e| e.into_inner());
        let mut matched: Vec<GenerationJob> = jobs
            .values()
            .filter(|j| j.batch_id == batch_id && j.content_item_id == content_item_id)
            .cloned()
            .collect();
        matched.sort_by_key(|j| j.field_order);

        Ok(matched)
    }

    async fn unfinished_jobs_for_item(
        &self,
        batch_id: Uuid,
        content_item_id: Uuid,
    ) -> Result<i64> {
        let jobs = self.jobs.read().unwrap_or_else(|e| e.into_inner());
        let count = jobs
            .values()
            .filter(|j| {
                j.batch_id == batch_id
                    && j.content_item_id == content_item_id
                    && !j.status.is_terminal()
            })
            .count();

        Ok(count as i64)
    }

    async fn completed_jobs_for_batch(&self, batch_id: Uuid) -> Result<Vec<GenerationJob>> {
        let jobs = self.jobs.read().unwrap_or_else(|e| e.into_inner());
        let mut completed: Vec<GenerationJob> = jobs
            .values()
            .filter(|j| j.batch_id == batch_id && j.status == JobStatus::Completed)
            .cloned()
            .collect();
        completed.sort_by_key(|j| (j.content_item_id, j.field_order));

        Ok(completed)
    }

    async fn upsert_backup(&self, backup: &SeoBackup) -> Result<()> {
        self.backups
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(backup.content_item_id, backup.clone());
        Ok(())
    }

    async fn find_backup(&self, content_item_id: Uuid) -> Result<Option<SeoBackup>> {
        Ok(self
            .backups
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&content_item_id)
            .cloned())
    }

    async fn delete_backup(&self, content_item_id: Uuid) -> Result<bool> {
        Ok(self
            .backups
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&content_item_id)
            .is_some())
    }

    async fn count_backups_for_items(&self, item_ids: &[Uuid]) -> Result<i64> {
        let backups = self.backups.read().unwrap_or_else(|e| e.into_inner());
        let count = item_ids
            .iter()
            .filter(|id| backups.contains_key(id))
            .count();

        Ok(count as i64)
    }
}
