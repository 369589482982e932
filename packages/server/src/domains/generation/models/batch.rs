//! Batch model: one user-initiated bulk generation request.

use std::collections::HashMap;

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::{FromRow, PgPool};
use typed_builder::TypedBuilder;
use uuid::Uuid;

use crate::domains::generation::fields::{FeatureFlags, GenerationMode};

/// How long a batch may sit in `processing` before the sweep
/// force-completes it.
pub const STUCK_BATCH_TIMEOUT_MINUTES: i64 = 30;

// ============================================================================
// Enums
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, Default)]
#[sqlx(type_name = "batch_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    #[default]
    Pending,
    Processing,
    Completed,
    CompletedWithErrors,
    Cancelled,
}

impl BatchStatus {
    /// Whether the batch can still make progress.
    pub fn is_active(&self) -> bool {
        matches!(self, BatchStatus::Pending | BatchStatus::Processing)
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_active()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BackupMode {
    #[default]
    Manual,
    Auto,
}

// ============================================================================
// Frozen settings
// ============================================================================

/// Backup policy captured at batch creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackupPolicy {
    pub enabled: bool,
    pub mode: BackupMode,
    /// Auto mode restores when the post-generation score is `<=` this.
    pub restore_threshold: i32,
}

impl Default for BackupPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            mode: BackupMode::Manual,
            restore_threshold: 80,
        }
    }
}

/// Prompt style modifiers applied on top of the field templates.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StyleModifiers {
    pub tone: Option<String>,
    pub audience: Option<String>,
    pub max_words: Option<u32>,
}

/// AI-engine and policy settings frozen at batch creation.
///
/// Later changes to user settings must not affect an in-flight batch,
/// so the whole snapshot lives on the batch row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchSettings {
    pub engine: String,
    pub model: String,
    /// Named credential reference (an env var) overriding the
    /// deployment's default API key. The key itself is never stored.
    pub api_key_ref: Option<String>,
    pub temperature: f64,
    pub max_tokens: u64,
    /// Inter-job delay in seconds (rate-limit pacing).
    pub tick_delay_secs: u64,
    pub mode: GenerationMode,
    pub flags: FeatureFlags,
    pub style: StyleModifiers,
    pub backup: BackupPolicy,
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            engine: "openai".to_string(),
            model: "gpt-4o".to_string(),
            api_key_ref: None,
            temperature: 0.7,
            max_tokens: 1024,
            tick_delay_secs: 2,
            mode: GenerationMode::default(),
            flags: FeatureFlags::default(),
            style: StyleModifiers::default(),
            backup: BackupPolicy::default(),
        }
    }
}

// ============================================================================
// Batch model
// ============================================================================

#[derive(FromRow, Debug, Clone, Serialize, Deserialize, TypedBuilder)]
#[builder(field_defaults(setter(into)))]
pub struct Batch {
    #[builder(default = Uuid::new_v4())]
    pub id: Uuid,

    pub owner_id: Uuid,
    pub content_item_ids: Json<Vec<Uuid>>,
    pub field_prompts: Json<HashMap<String, String>>,
    pub settings: Json<BatchSettings>,

    #[builder(default = 0)]
    pub total_jobs: i32,
    #[builder(default = 0)]
    pub completed_jobs: i32,
    #[builder(default = 0)]
    pub failed_jobs: i32,

    #[builder(default)]
    pub status: BatchStatus,
    #[builder(default, setter(strip_option))]
    pub error_message: Option<String>,

    #[builder(default = Utc::now())]
    pub created_at: DateTime<Utc>,
    #[builder(default, setter(strip_option))]
    pub started_at: Option<DateTime<Utc>>,
    #[builder(default, setter(strip_option))]
    pub completed_at: Option<DateTime<Utc>>,
}

const BATCH_COLUMNS: &str = "id, owner_id, content_item_ids, field_prompts, settings, \
     total_jobs, completed_jobs, failed_jobs, status, error_message, \
     created_at, started_at, completed_at";

impl Batch {
    pub async fn insert(&self, pool: &PgPool) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO batches (
                id, owner_id, content_item_ids, field_prompts, settings,
                total_jobs, completed_jobs, failed_jobs, status, error_message,
                created_at, started_at, completed_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(self.id)
        .bind(self.owner_id)
        .bind(&self.content_item_ids)
        .bind(&self.field_prompts)
        .bind(&self.settings)
        .bind(self.total_jobs)
        .bind(self.completed_jobs)
        .bind(self.failed_jobs)
        .bind(self.status)
        .bind(&self.error_message)
        .bind(self.created_at)
        .bind(self.started_at)
        .bind(self.completed_at)
        .execute(pool)
        .await?;

        Ok(())
    }

    pub async fn find_by_id(id: Uuid, pool: &PgPool) -> Result<Option<Self>> {
        let batch = sqlx::query_as::<_, Self>(&format!(
            "SELECT {BATCH_COLUMNS} FROM batches WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(pool)
        .await?;

        Ok(batch)
    }

    /// The owner's single in-flight batch, if any.
    pub async fn find_active_for_owner(owner_id: Uuid, pool: &PgPool) -> Result<Option<Self>> {
        let batch = sqlx::query_as::<_, Self>(&format!(
            r#"
            SELECT {BATCH_COLUMNS} FROM batches
            WHERE owner_id = $1 AND status IN ('pending', 'processing')
            ORDER BY created_at DESC
            LIMIT 1
            "#
        ))
        .bind(owner_id)
        .fetch_optional(pool)
        .await?;

        Ok(batch)
    }

    /// CAS pending -> processing, recording `started_at`.
    pub async fn mark_processing(id: Uuid, pool: &PgPool) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE batches
            SET status = 'processing', started_at = NOW()
            WHERE id = $1 AND status = 'pending'
            "#,
        )
        .bind(id)
        .execute(pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// CAS active -> cancelled. Idempotent from the caller's view: a
    /// second cancel simply affects zero rows.
    pub async fn mark_cancelled(id: Uuid, pool: &PgPool) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE batches
            SET status = 'cancelled', completed_at = NOW()
            WHERE id = $1 AND status IN ('pending', 'processing')
            "#,
        )
        .bind(id)
        .execute(pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// CAS active -> terminal. `completed_at` is set exactly once; a
    /// concurrent or repeated finalize affects zero rows.
    pub async fn finalize(
        id: Uuid,
        status: BatchStatus,
        error_message: Option<&str>,
        pool: &PgPool,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE batches
            SET status = $2, error_message = $3, completed_at = NOW()
            WHERE id = $1 AND status IN ('pending', 'processing')
            "#,
        )
        .bind(id)
        .bind(status)
        .bind(error_message)
        .execute(pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Batches stuck in `processing` beyond the liveness timeout.
    pub async fn find_stuck(pool: &PgPool) -> Result<Vec<Self>> {
        let cutoff = Utc::now() - Duration::minutes(STUCK_BATCH_TIMEOUT_MINUTES);

        let batches = sqlx::query_as::<_, Self>(&format!(
            r#"
            SELECT {BATCH_COLUMNS} FROM batches
            WHERE status = 'processing' AND started_at < $1
            "#
        ))
        .bind(cutoff)
        .fetch_all(pool)
        .await?;

        Ok(batches)
    }

    pub async fn increment_completed(id: Uuid, pool: &PgPool) -> Result<()> {
        sqlx::query("UPDATE batches SET completed_jobs = completed_jobs + 1 WHERE id = $1")
            .bind(id)
            .execute(pool)
            .await?;
        Ok(())
    }

    pub async fn increment_failed(id: Uuid, pool: &PgPool) -> Result<()> {
        sqlx::query("UPDATE batches SET failed_jobs = failed_jobs + 1 WHERE id = $1")
            .bind(id)
            .execute(pool)
            .await?;
        Ok(())
    }
}
