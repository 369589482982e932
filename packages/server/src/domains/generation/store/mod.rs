//! Persistence surface for batches, jobs, and backups.
//!
//! The scheduler and processor only talk to [`GenerationStore`]; the
//! Postgres implementation backs the server, and an in-memory one backs
//! the integration tests. Every state transition is compare-and-swap:
//! the `bool`/count return says whether this caller won the transition.

mod memory;
mod postgres;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

use super::models::{Batch, BatchStatus, GenerationJob, JobStatus, SeoBackup};

pub use memory::InMemoryGenerationStore;
pub use postgres::PgGenerationStore;

/// Per-status job tallies for one batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JobCounts {
    pub pending: i64,
    pub processing: i64,
    pub completed: i64,
    pub failed: i64,
    pub skipped: i64,
}

impl JobCounts {
    pub fn total(&self) -> i64 {
        self.pending + self.processing + self.completed + self.failed + self.skipped
    }

    /// Jobs in a terminal status.
    pub fn finished(&self) -> i64 {
        self.completed + self.failed + self.skipped
    }

    pub fn absorb(&mut self, status: JobStatus, count: i64) {
        match status {
            JobStatus::Pending => self.pending += count,
            JobStatus::Processing => self.processing += count,
            JobStatus::Completed => self.completed += count,
            JobStatus::Failed => self.failed += count,
            JobStatus::Skipped => self.skipped += count,
        }
    }
}

#[async_trait]
pub trait GenerationStore: Send + Sync {
    // Batches

    async fn insert_batch(&self, batch: &Batch) -> Result<()>;

    async fn find_batch(&self, id: Uuid) -> Result<Option<Batch>>;

    async fn find_active_batch(&self, owner_id: Uuid) -> Result<Option<Batch>>;

    /// CAS pending -> processing.
    async fn mark_batch_processing(&self, id: Uuid) -> Result<bool>;

    /// CAS active -> cancelled.
    async fn cancel_batch(&self, id: Uuid) -> Result<bool>;

    /// CAS active -> the given terminal status.
    async fn finalize_batch(
        &self,
        id: Uuid,
        status: BatchStatus,
        error_message: Option<&str>,
    ) -> Result<bool>;

    /// Batches in `processing` past the liveness timeout.
    async fn find_stuck_batches(&self) -> Result<Vec<Batch>>;

    async fn increment_completed_jobs(&self, batch_id: Uuid) -> Result<()>;

    async fn increment_failed_jobs(&self, batch_id: Uuid) -> Result<()>;

    // Jobs

    async fn insert_jobs(&self, jobs: &[GenerationJob]) -> Result<()>;

    async fn find_job(&self, id: Uuid) -> Result<Option<GenerationJob>>;

    /// Pending jobs in (content item, field order) scan order.
    async fn pending_jobs(&self, batch_id: Uuid, limit: i64) -> Result<Vec<GenerationJob>>;

    /// CAS pending -> processing.
    async fn claim_job(&self, id: Uuid) -> Result<bool>;

    /// CAS processing -> completed.
    async fn complete_job(&self, id: Uuid, result: &Value) -> Result<bool>;

    /// CAS processing -> pending, retry counter bumped.
    async fn retry_job(&self, id: Uuid, error: &str) -> Result<bool>;

    /// CAS processing -> failed.
    async fn fail_job(&self, id: Uuid, error: &str) -> Result<bool>;

    /// CAS pending -> skipped.
    async fn skip_job(&self, id: Uuid, reason: &str) -> Result<bool>;

    async fn skip_pending_jobs_for_item(
        &self,
        batch_id: Uuid,
        content_item_id: Uuid,
        reason: &str,
    ) -> Result<u64>;

    async fn skip_all_pending_jobs(&self, batch_id: Uuid, reason: &str) -> Result<u64>;

    /// Fail every job still in `processing` (orphaned by a dead runner).
    async fn fail_processing_jobs(&self, batch_id: Uuid, error: &str) -> Result<u64>;

    async fn job_counts(&self, batch_id: Uuid) -> Result<JobCounts>;

    async fn current_processing_job(&self, batch_id: Uuid) -> Result<Option<GenerationJob>>;

    async fn jobs_for_item(
        &self,
        batch_id: Uuid,
        content_item_id: Uuid,
    ) -> Result<Vec<GenerationJob>>;

    /// Jobs for the item still pending or processing.
    async fn unfinished_jobs_for_item(
        &self,
        batch_id: Uuid,
        content_item_id: Uuid,
    ) -> Result<i64>;

    async fn completed_jobs_for_batch(&self, batch_id: Uuid) -> Result<Vec<GenerationJob>>;

    // Backups

    async fn upsert_backup(&self, backup: &SeoBackup) -> Result<()>;

    async fn find_backup(&self, content_item_id: Uuid) -> Result<Option<SeoBackup>>;

    /// Delete-if-exists; true when this caller removed the row.
    async fn delete_backup(&self, content_item_id: Uuid) -> Result<bool>;

    async fn count_backups_for_items(&self, item_ids: &[Uuid]) -> Result<i64>;
}
