//! Pre-generation snapshots of a content item's SEO-relevant fields.
//!
//! Exactly one snapshot per item. Restoring writes every captured
//! field back verbatim, including empty ones.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::kernel::content::{ContentItem, ImageMeta};
use crate::kernel::seo::SeoFields;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImageSnapshot {
    pub image_id: Uuid,
    #[serde(flatten)]
    pub meta: ImageMeta,
}

/// The captured field values. Empty strings are preserved as empty so
/// a restore erases generated content rather than keeping it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SnapshotPayload {
    pub title: String,
    pub slug: String,
    pub short_description: String,
    pub description: String,
    pub focus_keyword: String,
    pub meta_description: String,
    pub tags: Vec<String>,
    pub images: Vec<ImageSnapshot>,
}

impl SnapshotPayload {
    pub fn capture(item: &ContentItem, seo: &SeoFields) -> Self {
        Self {
            title: item.title.clone(),
            slug: item.slug.clone(),
            short_description: item.short_description.clone(),
            description: item.description.clone(),
            focus_keyword: seo.focus_keyword.clone(),
            meta_description: seo.meta_description.clone(),
            tags: item.tags.clone(),
            images: item
                .images
                .iter()
                .map(|img| ImageSnapshot {
                    image_id: img.id,
                    meta: img.meta.clone(),
                })
                .collect(),
        }
    }
}

#[derive(FromRow, Debug, Clone, Serialize, Deserialize)]
pub struct SeoBackup {
    pub content_item_id: Uuid,
    pub payload: Json<SnapshotPayload>,
    /// SEO score at capture time, when the provider could report one.
    pub pre_score: Option<i32>,
    pub captured_at: DateTime<Utc>,
}

impl SeoBackup {
    pub fn new(content_item_id: Uuid, payload: SnapshotPayload, pre_score: Option<i32>) -> Self {
        Self {
            content_item_id,
            payload: Json(payload),
            pre_score,
            captured_at: Utc::now(),
        }
    }

    pub async fn upsert(&self, pool: &PgPool) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO seo_backups (content_item_id, payload, pre_score, captured_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (content_item_id)
            DO UPDATE SET payload = $2, pre_score = $3, captured_at = $4
            "#,
        )
        .bind(self.content_item_id)
        .bind(&self.payload)
        .bind(self.pre_score)
        .bind(self.captured_at)
        .execute(pool)
        .await?;

        Ok(())
    }

    pub async fn find(content_item_id: Uuid, pool: &PgPool) -> Result<Option<Self>> {
        let backup = sqlx::query_as::<_, Self>(
            "SELECT content_item_id, payload, pre_score, captured_at FROM seo_backups WHERE content_item_id = $1",
        )
        .bind(content_item_id)
        .fetch_optional(pool)
        .await?;

        Ok(backup)
    }

    /// Delete-if-exists. The returned flag is the CAS outcome: only the
    /// caller that actually removed the row should act on the snapshot.
    pub async fn delete(content_item_id: Uuid, pool: &PgPool) -> Result<bool> {
        let result = sqlx::query("DELETE FROM seo_backups WHERE content_item_id = $1")
            .bind(content_item_id)
            .execute(pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn count_for_items(item_ids: &[Uuid], pool: &PgPool) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM seo_backups WHERE content_item_id = ANY($1)",
        )
        .bind(item_ids)
        .fetch_one(pool)
        .await?;

        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::content::ItemImage;

    #[test]
    fn capture_preserves_empty_fields() {
        let item = ContentItem {
            id: Uuid::new_v4(),
            title: "Walnut Desk".to_string(),
            slug: "walnut-desk".to_string(),
            short_description: String::new(),
            description: String::new(),
            tags: vec![],
            images: vec![ItemImage {
                id: Uuid::new_v4(),
                meta: ImageMeta::default(),
            }],
        };
        let seo = SeoFields::default();

        let payload = SnapshotPayload::capture(&item, &seo);
        assert_eq!(payload.title, "Walnut Desk");
        assert_eq!(payload.short_description, "");
        assert_eq!(payload.focus_keyword, "");
        assert_eq!(payload.images.len(), 1);
    }

    #[test]
    fn payload_round_trips_through_json() {
        let payload = SnapshotPayload {
            title: "Desk".to_string(),
            tags: vec!["office".to_string()],
            ..SnapshotPayload::default()
        };

        let json = serde_json::to_string(&payload).unwrap();
        let parsed: SnapshotPayload = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, payload);
    }
}
