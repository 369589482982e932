//! Field processor: executes one claimed job end to end.
//!
//! A job run is claim, snapshot, prompt, call, parse, persist, record.
//! Transient provider failures reset the job to pending (bounded by
//! [`MAX_RETRIES`]); everything else fails it permanently. A permanent
//! failure on a critical field skips the item's remaining jobs and
//! restores its snapshot immediately.

use std::collections::HashMap;

use anyhow::Result;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::kernel::ai::CompletionRequest;
use crate::kernel::content::{ContentItem, ImageMeta};
use crate::kernel::deps::ServerDeps;

use super::backup;
use super::fields::FieldKind;
use super::models::{Batch, GenerationJob, MAX_RETRIES};
use super::parse::{parse_output, value_as_list};
use super::prompts::{assemble_prompt, default_template, PromptContext};

/// Run one job. The claim is a CAS, so a stray duplicate tick for an
/// already-taken job is a no-op.
pub async fn process_job(deps: &ServerDeps, batch: &Batch, job: &GenerationJob) -> Result<()> {
    if !deps.store.claim_job(job.id).await? {
        debug!(job_id = %job.id, "job already claimed, skipping");
        return Ok(());
    }

    let Some(field) = job.field() else {
        fail_permanently(deps, batch, job, None, "unknown field name").await?;
        return Ok(());
    };

    info!(
        job_id = %job.id,
        batch_id = %batch.id,
        content_item_id = %job.content_item_id,
        field = field.as_str(),
        attempt = job.retry_count + 1,
        "processing job"
    );

    let item = match deps.content.get_item(job.content_item_id).await {
        Ok(Some(item)) => item,
        Ok(None) => {
            // The item was deleted out from under the batch; retrying
            // cannot help.
            fail_permanently(deps, batch, job, Some(field), "content item not found").await?;
            return Ok(());
        }
        Err(e) => {
            handle_transient(deps, batch, job, Some(field), &e.to_string()).await?;
            return Ok(());
        }
    };

    if batch.settings.backup.enabled {
        if let Err(e) = backup::ensure_snapshot(deps, batch, job.content_item_id).await {
            handle_transient(deps, batch, job, Some(field), &format!("snapshot failed: {e}"))
                .await?;
            return Ok(());
        }
    }

    let siblings = sibling_results(deps, batch, job).await?;

    let value = if field.uses_ai() {
        match generate_field(deps, batch, &item, field, &siblings).await {
            Ok(value) => value,
            Err(GenerateError::Transient(message)) => {
                handle_transient(deps, batch, job, Some(field), &message).await?;
                return Ok(());
            }
            Err(GenerateError::Permanent(message)) => {
                fail_permanently(deps, batch, job, Some(field), &message).await?;
                return Ok(());
            }
        }
    } else {
        match write_image_metadata(deps, &item, &siblings).await {
            Ok(value) => value,
            Err(e) => {
                handle_transient(deps, batch, job, Some(field), &e.to_string()).await?;
                return Ok(());
            }
        }
    };

    if field.uses_ai() {
        if let Err(e) = persist_field(deps, job, field, &value).await {
            handle_transient(deps, batch, job, Some(field), &format!("persist failed: {e}"))
                .await?;
            return Ok(());
        }
    }

    deps.store.complete_job(job.id, &value).await?;
    deps.store.increment_completed_jobs(batch.id).await?;

    info!(job_id = %job.id, field = field.as_str(), "job completed");

    finish_item_if_done(deps, batch, job).await?;
    Ok(())
}

enum GenerateError {
    Transient(String),
    Permanent(String),
}

async fn generate_field(
    deps: &ServerDeps,
    batch: &Batch,
    item: &ContentItem,
    field: FieldKind,
    siblings: &HashMap<FieldKind, Value>,
) -> Result<Value, GenerateError> {
    let template = batch
        .field_prompts
        .get(field.as_str())
        .map(|s| s.as_str())
        .unwrap_or_else(|| default_template(field));

    let ctx = PromptContext {
        item,
        results: siblings,
    };
    let prompt = assemble_prompt(template, &ctx, &batch.settings.style);

    let request = CompletionRequest {
        engine: &batch.settings.engine,
        model: &batch.settings.model,
        api_key_ref: batch.settings.api_key_ref.as_deref(),
        prompt: &prompt,
        temperature: batch.settings.temperature,
        max_tokens: batch.settings.max_tokens,
    };

    let raw = deps.ai.complete(&request).await.map_err(|e| {
        if e.is_retryable() {
            GenerateError::Transient(e.to_string())
        } else {
            GenerateError::Permanent(e.to_string())
        }
    })?;

    // A response the parser cannot salvage will not get better on a
    // retry with the same prompt.
    parse_output(field.parse_kind(), &raw)
        .map_err(|e| GenerateError::Permanent(format!("unparseable response: {e}")))
}

/// Write a completed field's value out to the owning system.
///
/// The answer-block fields (FAQ, key features, pros/cons, buying guide)
/// live only on the job result; the storefront renders them from the
/// batch results payload.
async fn persist_field(
    deps: &ServerDeps,
    job: &GenerationJob,
    field: FieldKind,
    value: &Value,
) -> Result<()> {
    let item_id = job.content_item_id;

    match field {
        FieldKind::FocusKeyword => {
            let keyword = value.as_str().unwrap_or_default();
            let mut fields = deps.seo.get_fields(item_id).await?;
            fields.focus_keyword = keyword.to_string();
            deps.seo.set_fields(item_id, &fields).await?;
        }
        FieldKind::Title => {
            let title = value.as_str().unwrap_or_default();
            deps.content.set_title(item_id, title).await?;
            deps.content
                .set_slug(item_id, &crate::kernel::content::slugify(title))
                .await?;
        }
        FieldKind::ShortDescription => {
            deps.content
                .set_short_description(item_id, value.as_str().unwrap_or_default())
                .await?;
        }
        FieldKind::FullDescription => {
            deps.content
                .set_description(item_id, value.as_str().unwrap_or_default())
                .await?;
        }
        FieldKind::MetaDescription => {
            let meta = value.as_str().unwrap_or_default();
            let mut fields = deps.seo.get_fields(item_id).await?;
            fields.meta_description = meta.to_string();
            deps.seo.set_fields(item_id, &fields).await?;
        }
        FieldKind::Tags => {
            deps.content.set_tags(item_id, &value_as_list(value)).await?;
        }
        FieldKind::Faq
        | FieldKind::KeyFeatures
        | FieldKind::ProsCons
        | FieldKind::BuyingGuide
        | FieldKind::ImageMetadata => {}
    }

    Ok(())
}

/// Deterministic rewrite of image alt/title/caption/description from
/// the already-generated values; no AI call involved.
async fn write_image_metadata(
    deps: &ServerDeps,
    item: &ContentItem,
    siblings: &HashMap<FieldKind, Value>,
) -> Result<Value> {
    let title = siblings
        .get(&FieldKind::Title)
        .and_then(|v| v.as_str())
        .unwrap_or(&item.title);
    let keyword = siblings
        .get(&FieldKind::FocusKeyword)
        .and_then(|v| v.as_str())
        .unwrap_or_default();
    let caption = siblings
        .get(&FieldKind::ShortDescription)
        .and_then(|v| v.as_str())
        .unwrap_or(&item.short_description);

    let mut written = Vec::with_capacity(item.images.len());

    for (index, image) in item.images.iter().enumerate() {
        let alt = if item.images.len() > 1 {
            format!("{} - image {}", title, index + 1)
        } else {
            title.to_string()
        };

        let meta = ImageMeta {
            alt,
            title: title.to_string(),
            caption: caption.to_string(),
            description: if keyword.is_empty() {
                title.to_string()
            } else {
                format!("{title} | {keyword}")
            },
        };

        deps.content.set_image_meta(item.id, image.id, &meta).await?;
        written.push(json!({
            "image_id": image.id,
            "alt": meta.alt,
            "title": meta.title,
            "caption": meta.caption,
            "description": meta.description,
        }));
    }

    Ok(json!({ "images": written }))
}

async fn sibling_results(
    deps: &ServerDeps,
    batch: &Batch,
    job: &GenerationJob,
) -> Result<HashMap<FieldKind, Value>> {
    let jobs = deps
        .store
        .jobs_for_item(batch.id, job.content_item_id)
        .await?;

    let mut results = HashMap::new();
    for sibling in jobs {
        if let (Some(field), Some(value)) = (sibling.field(), sibling.result) {
            results.insert(field, value);
        }
    }

    Ok(results)
}

/// Transient failure: reset to pending while retries remain, otherwise
/// fall through to a permanent failure.
async fn handle_transient(
    deps: &ServerDeps,
    batch: &Batch,
    job: &GenerationJob,
    field: Option<FieldKind>,
    message: &str,
) -> Result<()> {
    if job.retry_count < MAX_RETRIES {
        deps.store.retry_job(job.id, message).await?;
        warn!(
            job_id = %job.id,
            attempt = job.retry_count + 1,
            error = message,
            "transient failure, job requeued"
        );
        return Ok(());
    }

    fail_permanently(deps, batch, job, field, message).await
}

async fn fail_permanently(
    deps: &ServerDeps,
    batch: &Batch,
    job: &GenerationJob,
    field: Option<FieldKind>,
    message: &str,
) -> Result<()> {
    deps.store.fail_job(job.id, message).await?;
    deps.store.increment_failed_jobs(batch.id).await?;

    warn!(
        job_id = %job.id,
        content_item_id = %job.content_item_id,
        field = field.map(|f| f.as_str()).unwrap_or(&job.field_name),
        error = message,
        "job failed permanently"
    );

    if field.map(|f| f.is_critical()).unwrap_or(false) {
        let reason = format!("critical field {} failed", job.field_name);
        let skipped = deps
            .store
            .skip_pending_jobs_for_item(batch.id, job.content_item_id, &reason)
            .await?;

        info!(
            content_item_id = %job.content_item_id,
            skipped,
            "critical failure, remaining jobs for item skipped"
        );

        // Don't leave the item half-generated: put the original
        // content back right away instead of waiting for review.
        if batch.settings.backup.enabled {
            match backup::restore_item(deps, job.content_item_id).await {
                Ok(true) => {
                    info!(content_item_id = %job.content_item_id, "item restored after critical failure")
                }
                Ok(false) => {}
                Err(e) => {
                    warn!(
                        content_item_id = %job.content_item_id,
                        error = %e,
                        "restore after critical failure did not complete, snapshot kept"
                    );
                }
            }
        }
    }

    finish_item_if_done(deps, batch, job).await?;
    Ok(())
}

/// When the item's last job reaches a terminal status, ask the SEO
/// provider to recompute its score. Best effort; the provider applies
/// it asynchronously.
async fn finish_item_if_done(deps: &ServerDeps, batch: &Batch, job: &GenerationJob) -> Result<()> {
    let unfinished = deps
        .store
        .unfinished_jobs_for_item(batch.id, job.content_item_id)
        .await?;

    if unfinished == 0 && deps.seo.capabilities().supports_scoring {
        if let Err(e) = deps.seo.refresh_score(job.content_item_id).await {
            warn!(
                content_item_id = %job.content_item_id,
                error = %e,
                "score refresh request failed"
            );
        }
    }

    Ok(())
}
