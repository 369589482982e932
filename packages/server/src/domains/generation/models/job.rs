//! Generation job model: one (content item, field) unit of work.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::{FromRow, PgPool};
use typed_builder::TypedBuilder;
use uuid::Uuid;

use crate::domains::generation::fields::FieldKind;

/// Transient failures are retried this many times before the job is
/// failed for good.
pub const MAX_RETRIES: i32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, Default)]
#[sqlx(type_name = "generation_job_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    #[default]
    Pending,
    Processing,
    Completed,
    Failed,
    Skipped,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Skipped
        )
    }
}

#[derive(FromRow, Debug, Clone, Serialize, Deserialize, TypedBuilder)]
#[builder(field_defaults(setter(into)))]
pub struct GenerationJob {
    #[builder(default = Uuid::new_v4())]
    pub id: Uuid,

    pub batch_id: Uuid,
    pub content_item_id: Uuid,
    pub field_name: String,
    pub field_order: i32,

    #[builder(default)]
    pub status: JobStatus,
    #[builder(default, setter(strip_option))]
    pub result: Option<Value>,
    #[builder(default, setter(strip_option))]
    pub error_message: Option<String>,
    #[builder(default, setter(strip_option))]
    pub skip_reason: Option<String>,
    #[builder(default = 0)]
    pub retry_count: i32,

    #[builder(default = Utc::now())]
    pub created_at: DateTime<Utc>,
    #[builder(default, setter(strip_option))]
    pub started_at: Option<DateTime<Utc>>,
    #[builder(default, setter(strip_option))]
    pub completed_at: Option<DateTime<Utc>>,
}

const JOB_COLUMNS: &str = "id, batch_id, content_item_id, field_name, field_order, status, \
     result, error_message, skip_reason, retry_count, created_at, started_at, completed_at";

impl GenerationJob {
    pub fn new(batch_id: Uuid, content_item_id: Uuid, field: FieldKind) -> Self {
        Self::builder()
            .batch_id(batch_id)
            .content_item_id(content_item_id)
            .field_name(field.as_str())
            .field_order(field.order())
            .build()
    }

    /// The field this job generates. `None` only for rows written by a
    /// newer schema revision.
    pub fn field(&self) -> Option<FieldKind> {
        FieldKind::parse(&self.field_name)
    }

    pub async fn insert_many(jobs: &[Self], pool: &PgPool) -> Result<()> {
        // Batches stay small enough that row-at-a-time inserts inside
        // one transaction are fine.
        let mut tx = pool.begin().await?;

        for job in jobs {
            sqlx::query(
                r#"
                INSERT INTO generation_jobs (
                    id, batch_id, content_item_id, field_name, field_order,
                    status, result, error_message, skip_reason, retry_count,
                    created_at, started_at, completed_at
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
                "#,
            )
            .bind(job.id)
            .bind(job.batch_id)
            .bind(job.content_item_id)
            .bind(&job.field_name)
            .bind(job.field_order)
            .bind(job.status)
            .bind(&job.result)
            .bind(&job.error_message)
            .bind(&job.skip_reason)
            .bind(job.retry_count)
            .bind(job.created_at)
            .bind(job.started_at)
            .bind(job.completed_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    pub async fn find_by_id(id: Uuid, pool: &PgPool) -> Result<Option<Self>> {
        let job = sqlx::query_as::<_, Self>(&format!(
            "SELECT {JOB_COLUMNS} FROM generation_jobs WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(pool)
        .await?;

        Ok(job)
    }

    /// The batch's pending jobs in scan order, limited to a window.
    pub async fn find_pending(batch_id: Uuid, limit: i64, pool: &PgPool) -> Result<Vec<Self>> {
        let jobs = sqlx::query_as::<_, Self>(&format!(
            r#"
            SELECT {JOB_COLUMNS} FROM generation_jobs
            WHERE batch_id = $1 AND status = 'pending'
            ORDER BY content_item_id, field_order
            LIMIT $2
            "#
        ))
        .bind(batch_id)
        .bind(limit)
        .fetch_all(pool)
        .await?;

        Ok(jobs)
    }

    /// CAS pending -> processing. Returns false when another tick got
    /// there first (or the job was skipped meanwhile).
    pub async fn claim(id: Uuid, pool: &PgPool) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE generation_jobs
            SET status = 'processing', started_at = NOW()
            WHERE id = $1 AND status = 'pending'
            "#,
        )
        .bind(id)
        .execute(pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// CAS processing -> completed, storing the parsed result.
    pub async fn complete(id: Uuid, result: &Value, pool: &PgPool) -> Result<bool> {
        let updated = sqlx::query(
            r#"
            UPDATE generation_jobs
            SET status = 'completed', result = $2, completed_at = NOW()
            WHERE id = $1 AND status = 'processing'
            "#,
        )
        .bind(id)
        .bind(result)
        .execute(pool)
        .await?;

        Ok(updated.rows_affected() > 0)
    }

    /// CAS processing -> pending with the retry counter bumped. The job
    /// re-enters the scheduler's scan on a later tick.
    pub async fn retry(id: Uuid, error: &str, pool: &PgPool) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE generation_jobs
            SET status = 'pending', retry_count = retry_count + 1,
                error_message = $2, started_at = NULL
            WHERE id = $1 AND status = 'processing'
            "#,
        )
        .bind(id)
        .bind(error)
        .execute(pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// CAS processing -> failed (permanent).
    pub async fn fail(id: Uuid, error: &str, pool: &PgPool) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE generation_jobs
            SET status = 'failed', error_message = $2, completed_at = NOW()
            WHERE id = $1 AND status = 'processing'
            "#,
        )
        .bind(id)
        .bind(error)
        .execute(pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// CAS pending -> skipped.
    pub async fn skip(id: Uuid, reason: &str, pool: &PgPool) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE generation_jobs
            SET status = 'skipped', skip_reason = $2, completed_at = NOW()
            WHERE id = $1 AND status = 'pending'
            "#,
        )
        .bind(id)
        .bind(reason)
        .execute(pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Skip every remaining pending job for one item. Used after a
    /// critical field fails permanently.
    pub async fn skip_pending_for_item(
        batch_id: Uuid,
        content_item_id: Uuid,
        reason: &str,
        pool: &PgPool,
    ) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE generation_jobs
            SET status = 'skipped', skip_reason = $3, completed_at = NOW()
            WHERE batch_id = $1 AND content_item_id = $2 AND status = 'pending'
            "#,
        )
        .bind(batch_id)
        .bind(content_item_id)
        .bind(reason)
        .execute(pool)
        .await?;

        Ok(result.rows_affected())
    }

    /// Fail every job the batch still has in `processing`. Used by the
    /// stuck sweep to settle jobs orphaned mid-run by a crashed runner.
    pub async fn fail_all_processing(batch_id: Uuid, error: &str, pool: &PgPool) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE generation_jobs
            SET status = 'failed', error_message = $2, completed_at = NOW()
            WHERE batch_id = $1 AND status = 'processing'
            "#,
        )
        .bind(batch_id)
        .bind(error)
        .execute(pool)
        .await?;

        Ok(result.rows_affected())
    }

    /// Skip every remaining pending job in the batch (cancellation).
    pub async fn skip_all_pending(batch_id: Uuid, reason: &str, pool: &PgPool) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE generation_jobs
            SET status = 'skipped', skip_reason = $2, completed_at = NOW()
            WHERE batch_id = $1 AND status = 'pending'
            "#,
        )
        .bind(batch_id)
        .bind(reason)
        .execute(pool)
        .await?;

        Ok(result.rows_affected())
    }

    pub async fn counts_by_status(
        batch_id: Uuid,
        pool: &PgPool,
    ) -> Result<Vec<(JobStatus, i64)>> {
        let rows = sqlx::query_as::<_, (JobStatus, i64)>(
            r#"
            SELECT status, COUNT(*) FROM generation_jobs
            WHERE batch_id = $1
            GROUP BY status
            "#,
        )
        .bind(batch_id)
        .fetch_all(pool)
        .await?;

        Ok(rows)
    }

    /// The job currently being worked, if any (at most one by design of
    /// the tick loop).
    pub async fn current_processing(batch_id: Uuid, pool: &PgPool) -> Result<Option<Self>> {
        let job = sqlx::query_as::<_, Self>(&format!(
            r#"
            SELECT {JOB_COLUMNS} FROM generation_jobs
            WHERE batch_id = $1 AND status = 'processing'
            ORDER BY started_at
            LIMIT 1
            "#
        ))
        .bind(batch_id)
        .fetch_optional(pool)
        .await?;

        Ok(job)
    }

    pub async fn find_for_item(
        batch_id: Uuid,
        content_item_id: Uuid,
        pool: &PgPool,
    ) -> Result<Vec<Self>> {
        let jobs = sqlx::query_as::<_, Self>(&format!(
            r#"
            SELECT {JOB_COLUMNS} FROM generation_jobs
            WHERE batch_id = $1 AND content_item_id = $2
            ORDER BY field_order
            "#
        ))
        .bind(batch_id)
        .bind(content_item_id)
        .fetch_all(pool)
        .await?;

        Ok(jobs)
    }

    pub async fn unfinished_count_for_item(
        batch_id: Uuid,
        content_item_id: Uuid,
        pool: &PgPool,
    ) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*) FROM generation_jobs
            WHERE batch_id = $1 AND content_item_id = $2
              AND status IN ('pending', 'processing')
            "#,
        )
        .bind(batch_id)
        .bind(content_item_id)
        .fetch_one(pool)
        .await?;

        Ok(count)
    }

    pub async fn find_completed(batch_id: Uuid, pool: &PgPool) -> Result<Vec<Self>> {
        let jobs = sqlx::query_as::<_, Self>(&format!(
            r#"
            SELECT {JOB_COLUMNS} FROM generation_jobs
            WHERE batch_id = $1 AND status = 'completed'
            ORDER BY content_item_id, field_order
            "#
        ))
        .bind(batch_id)
        .fetch_all(pool)
        .await?;

        Ok(jobs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_job_carries_field_metadata() {
        let batch_id = Uuid::new_v4();
        let item_id = Uuid::new_v4();
        let job = GenerationJob::new(batch_id, item_id, FieldKind::Title);

        assert_eq!(job.field_name, "title");
        assert_eq!(job.field_order, FieldKind::Title.order());
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.field(), Some(FieldKind::Title));
    }

    #[test]
    fn terminal_statuses() {
        assert!(!JobStatus::Pending.is_terminal());
        assert!(!JobStatus::Processing.is_terminal());
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(JobStatus::Skipped.is_terminal());
    }
}
