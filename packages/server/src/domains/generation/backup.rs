//! Snapshot capture, approval, and restore.
//!
//! One snapshot per content item, taken before the first field of a
//! generation run touches it. Approving deletes the snapshot (the
//! generated content is kept); restoring writes every captured value
//! back verbatim and then deletes it. Both use the store's
//! delete-if-exists CAS, so concurrent approve/restore resolves to one
//! winner.

use std::collections::HashMap;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::kernel::deps::ServerDeps;
use crate::kernel::seo::SeoFields;

use super::models::{Batch, SeoBackup, SnapshotPayload};

/// Capture a snapshot for the item unless a fresh one already exists.
///
/// A snapshot older than the batch is stale (left over from an earlier
/// run the user never resolved) and is overwritten.
pub async fn ensure_snapshot(deps: &ServerDeps, batch: &Batch, item_id: Uuid) -> Result<()> {
    if let Some(existing) = deps.store.find_backup(item_id).await? {
        if existing.captured_at >= batch.created_at {
            return Ok(());
        }
        info!(content_item_id = %item_id, "overwriting stale snapshot from earlier run");
    }

    let item = deps
        .content
        .get_item(item_id)
        .await?
        .with_context(|| format!("content item {item_id} not found for snapshot"))?;
    let seo_fields = deps.seo.get_fields(item_id).await?;

    // Best effort: a provider that cannot score yields no pre-score.
    let pre_score = match deps.seo.get_score(item_id).await {
        Ok(score) => score,
        Err(e) => {
            warn!(content_item_id = %item_id, error = %e, "pre-score fetch failed, capturing without");
            None
        }
    };

    let payload = SnapshotPayload::capture(&item, &seo_fields);
    let backup = SeoBackup::new(item_id, payload, pre_score);
    deps.store.upsert_backup(&backup).await?;

    info!(content_item_id = %item_id, pre_score = ?pre_score, "snapshot captured");
    Ok(())
}

/// Keep the generated content and drop the snapshot. Returns false when
/// there was no snapshot to approve.
pub async fn approve_item(deps: &ServerDeps, item_id: Uuid) -> Result<bool> {
    let deleted = deps.store.delete_backup(item_id).await?;
    if deleted {
        info!(content_item_id = %item_id, "snapshot approved and removed");
    }
    Ok(deleted)
}

/// Write the snapshot back to the item and drop it.
///
/// Every captured field is restored verbatim, including empty values,
/// so generated content is fully erased. The snapshot is only deleted
/// after all writes succeed; a failed write leaves it in place for a
/// later retry.
pub async fn restore_item(deps: &ServerDeps, item_id: Uuid) -> Result<bool> {
    let Some(backup) = deps.store.find_backup(item_id).await? else {
        return Ok(false);
    };
    let payload = &backup.payload.0;

    deps.content.set_title(item_id, &payload.title).await?;
    deps.content.set_slug(item_id, &payload.slug).await?;
    deps.content
        .set_short_description(item_id, &payload.short_description)
        .await?;
    deps.content
        .set_description(item_id, &payload.description)
        .await?;
    deps.content.set_tags(item_id, &payload.tags).await?;

    deps.seo
        .set_fields(
            item_id,
            &SeoFields {
                focus_keyword: payload.focus_keyword.clone(),
                meta_description: payload.meta_description.clone(),
            },
        )
        .await?;

    for image in &payload.images {
        deps.content
            .set_image_meta(item_id, image.image_id, &image.meta)
            .await?;
    }

    deps.store.delete_backup(item_id).await?;

    if let Err(e) = deps.seo.refresh_score(item_id).await {
        warn!(content_item_id = %item_id, error = %e, "score refresh after restore failed");
    }

    info!(content_item_id = %item_id, "snapshot restored");
    Ok(true)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BulkOutcome {
    pub restored: usize,
    pub approved: usize,
    /// Items that had no snapshot.
    pub missing: usize,
}

/// Resolve many snapshots in one call: restore the first set, approve
/// the second. Items without a snapshot are counted and skipped rather
/// than treated as errors.
pub async fn bulk_backup_action(
    deps: &ServerDeps,
    restore_ids: &[Uuid],
    approve_ids: &[Uuid],
) -> Result<BulkOutcome> {
    let mut outcome = BulkOutcome::default();

    for &item_id in restore_ids {
        if restore_item(deps, item_id).await? {
            outcome.restored += 1;
        } else {
            outcome.missing += 1;
        }
    }

    for &item_id in approve_ids {
        if approve_item(deps, item_id).await? {
            outcome.approved += 1;
        } else {
            outcome.missing += 1;
        }
    }

    Ok(outcome)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AutoRestoreOutcome {
    pub restored_count: usize,
    pub kept_count: usize,
}

/// Post-batch quality gate for auto backup mode.
///
/// For each item with a snapshot: restore when generation left a
/// critical field failed, or when the item's score is at or below the
/// configured threshold; approve otherwise. `scores` carries settled
/// scores the client recomputed after the batch finished; items missing
/// from the map fall back to the provider's current score. The
/// threshold is clamped to the provider's score ceiling so a 100
/// threshold cannot force restores against a provider that tops out
/// at 95.
pub async fn auto_restore_check(
    deps: &ServerDeps,
    batch: &Batch,
    scores: &HashMap<Uuid, i32>,
) -> Result<AutoRestoreOutcome> {
    let capabilities = deps.seo.capabilities();
    let threshold = batch
        .settings
        .backup
        .restore_threshold
        .min(capabilities.max_score);

    let mut outcome = AutoRestoreOutcome::default();

    for &item_id in batch.content_item_ids.iter() {
        if deps.store.find_backup(item_id).await?.is_none() {
            continue;
        }

        let jobs = deps.store.jobs_for_item(batch.id, item_id).await?;
        let critical_failed = jobs.iter().any(|job| {
            job.status == super::models::JobStatus::Failed
                && job.field().map(|f| f.is_critical()).unwrap_or(false)
        });

        let score = match scores.get(&item_id) {
            Some(&settled) => Some(settled),
            None if capabilities.supports_scoring => deps.seo.get_score(item_id).await?,
            None => None,
        };

        let should_restore =
            critical_failed || score.map(|s| s <= threshold).unwrap_or(false);

        if should_restore {
            info!(
                content_item_id = %item_id,
                score = ?score,
                threshold,
                critical_failed,
                "auto-restore triggered"
            );
            if restore_item(deps, item_id).await? {
                outcome.restored_count += 1;
            }
        } else if approve_item(deps, item_id).await? {
            outcome.kept_count += 1;
        }
    }

    Ok(outcome)
}
