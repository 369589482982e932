//! Postgres-backed [`GenerationStore`], delegating to the model queries.

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use sqlx::PgPool;
use uuid::Uuid;

use crate::domains::generation::models::{Batch, BatchStatus, GenerationJob, SeoBackup};

use super::{GenerationStore, JobCounts};

#[derive(Clone)]
pub struct PgGenerationStore {
    pool: PgPool,
}

impl PgGenerationStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl GenerationStore for PgGenerationStore {
    async fn insert_batch(&self, batch: &Batch) -> Result<()> {
        batch.insert(&self.pool).await
    }

    async fn find_batch(&self, id: Uuid) -> Result<Option<Batch>> {
        Batch::find_by_id(id, &self.pool).await
    }

    async fn find_active_batch(&self, owner_id: Uuid) -> Result<Option<Batch>> {
        Batch::find_active_for_owner(owner_id, &self.pool).await
    }

    async fn mark_batch_processing(&self, id: Uuid) -> Result<bool> {
        Batch::mark_processing(id, &self.pool).await
    }

    async fn cancel_batch(&self, id: Uuid) -> Result<bool> {
        Batch::mark_cancelled(id, &self.pool).await
    }

    async fn finalize_batch(
        &self,
        id: Uuid,
        status: BatchStatus,
        error_message: Option<&str>,
    ) -> Result<bool> {
        Batch::finalize(id, status, error_message, &self.pool).await
    }

    async fn find_stuck_batches(&self) -> Result<Vec<Batch>> {
        Batch::find_stuck(&self.pool).await
    }

    async fn increment_completed_jobs(&self, batch_id: Uuid) -> Result<()> {
        Batch::increment_completed(batch_id, &self.pool).await
    }

    async fn increment_failed_jobs(&self, batch_id: Uuid) -> Result<()> {
        Batch::increment_failed(batch_id, &self.pool).await
    }

    async fn insert_jobs(&self, jobs: &[GenerationJob]) -> Result<()> {
        GenerationJob::insert_many(jobs, &self.pool).await
    }

    async fn find_job(&self, id: Uuid) -> Result<Option<GenerationJob>> {
        GenerationJob::find_by_id(id, &self.pool).await
    }

    async fn pending_jobs(&self, batch_id: Uuid, limit: i64) -> Result<Vec<GenerationJob>> {
        GenerationJob::find_pending(batch_id, limit, &self.pool).await
    }

    async fn claim_job(&self, id: Uuid) -> Result<bool> {
        GenerationJob::claim(id, &self.pool).await
    }

    async fn complete_job(&self, id: Uuid, result: &Value) -> Result<bool> {
        GenerationJob::complete(id, result, &self.pool).await
    }

    async fn retry_job(&self, id: Uuid, error: &str) -> Result<bool> {
        GenerationJob::retry(id, error, &self.pool).await
    }

    async fn fail_job(&self, id: Uuid, error: &str) -> Result<bool> {
        GenerationJob::fail(id, error, &self.pool).await
    }

    async fn skip_job(&self, id: Uuid, reason: &str) -> Result<bool> {
        GenerationJob::skip(id, reason, &self.pool).await
    }

    async fn skip_pending_jobs_for_item(
        &self,
        batch_id: Uuid,
        content_item_id: Uuid,
        reason: &str,
    ) -> Result<u64> {
        GenerationJob::skip_pending_for_item(batch_id, content_item_id, reason, &self.pool).await
    }

    async fn skip_all_pending_jobs(&self, batch_id: Uuid, reason: &str) -> Result<u64> {
        GenerationJob::skip_all_pending(batch_id, reason, &self.pool).await
    }

    async fn fail_processing_jobs(&self, batch_id: Uuid, error: &str) -> Result<u64> {
        GenerationJob::fail_all_processing(batch_id, error, &self.pool).await
    }

    async fn job_counts(&self, batch_id: Uuid) -> Result<JobCounts> {
        let rows = GenerationJob::counts_by_status(batch_id, &self.pool).await?;

        let mut counts = JobCounts::default();
        for (status, count) in rows {
            counts.absorb(status, count);
        }

        Ok(counts)
    }

    async fn current_processing_job(&self, batch_id: Uuid) -> Result<Option<GenerationJob>> {
        GenerationJob::current_processing(batch_id, &self.pool).await
    }

    async fn jobs_for_item(
        &self,
        batch_id: Uuid,
        content_item_id: Uuid,
    ) -> Result<Vec<GenerationJob>> {
        GenerationJob::find_for_item(batch_id, content_item_id, &self.pool).await
    }

    async fn unfinished_jobs_for_item(
        &self,
        batch_id: Uuid,
        content_item_id: Uuid,
    ) -> Result<i64> {
        GenerationJob::unfinished_count_for_item(batch_id, content_item_id, &self.pool).await
    }

    async fn completed_jobs_for_batch(&self, batch_id: Uuid) -> Result<Vec<GenerationJob>> {
        GenerationJob::find_completed(batch_id, &self.pool).await
    }

    async fn upsert_backup(&self, backup: &SeoBackup) -> Result<()> {
        backup.upsert(&self.pool).await
    }

    async fn find_backup(&self, content_item_id: Uuid) -> Result<Option<SeoBackup>> {
        SeoBackup::find(content_item_id, &self.pool).await
    }

    async fn delete_backup(&self, content_item_id: Uuid) -> Result<bool> {
        SeoBackup::delete(content_item_id, &self.pool).await
    }

    async fn count_backups_for_items(&self, item_ids: &[Uuid]) -> Result<i64> {
        SeoBackup::count_for_items(item_ids, &self.pool).await
    }
}
