//! End-to-end pipeline tests against the in-memory store and doubles.
//!
//! Tests drive the scheduler by popping recorded ticks and running them
//! by hand, which makes job ordering fully deterministic.

use std::collections::HashMap;
use std::sync::Arc;

use uuid::Uuid;

use server_core::domains::generation::backup;
use server_core::domains::generation::lifecycle::{self, CreateBatchError, CreateBatchParams};
use server_core::domains::generation::models::{
    BackupMode, BackupPolicy, BatchSettings, BatchStatus, JobStatus,
};
use server_core::domains::generation::scheduler;
use server_core::domains::generation::store::{GenerationStore, InMemoryGenerationStore};
use server_core::kernel::{
    tick_channel, AiError, ContentItem, ImageMeta, InMemoryContentStore, InMemorySeoProvider,
    ItemImage, MockAiEngine, SeoCapabilities, ServerDeps, TestTickScheduler, TickHandler,
    TickRunner, TickScheduler, TickTask,
};

struct Harness {
    deps: ServerDeps,
    store: Arc<InMemoryGenerationStore>,
    ai: Arc<MockAiEngine>,
    content: Arc<InMemoryContentStore>,
    seo: Arc<InMemorySeoProvider>,
    ticks: Arc<TestTickScheduler>,
    owner_id: Uuid,
}

fn harness() -> Harness {
    let store = Arc::new(InMemoryGenerationStore::new());
    let ai = Arc::new(MockAiEngine::new());
    let content = Arc::new(InMemoryContentStore::new());
    let seo = Arc::new(InMemorySeoProvider::new());
    let ticks = Arc::new(TestTickScheduler::new());

    stub_all_fields(&ai);

    let deps = ServerDeps::new(
        store.clone(),
        ai.clone(),
        content.clone(),
        seo.clone(),
        ticks.clone(),
    );

    Harness {
        deps,
        store,
        ai,
        content,
        seo,
        ticks,
        owner_id: Uuid::new_v4(),
    }
}

/// Canned responses matched on distinctive phrases in the default
/// prompt templates.
fn stub_all_fields(ai: &MockAiEngine) {
    ai.stub("focus keyphrase", "walnut desk");
    ai.stub("SEO-optimized product title", "Walnut Desk Pro 120cm");
    ai.stub("short product description", "A compact walnut desk for focused work.");
    ai.stub(
        "detailed product description",
        "The Walnut Desk Pro pairs a solid top with steel legs.\n\nBuilt to last.",
    );
    ai.stub("SEO meta description", "Shop the walnut desk built for home offices.");
    ai.stub("product tags", "desk, walnut, home office");
    ai.stub(
        "frequently asked questions",
        "Q: Is it pre-assembled?\nA: No, assembly takes 20 minutes.\nQ: What is the weight limit?\nA: 80kg.",
    );
    ai.stub("key features", "- Solid walnut top\n- Steel legs\n- Cable tray");
    ai.stub("pros and cons", "Pros:\n- Sturdy\n- Timeless look\nCons:\n- Heavy");
    ai.stub("buying guide", "1. Measure your space\n2. Check the weight limit\n3. Pick a finish");
}

fn sample_item(title: &str) -> ContentItem {
    ContentItem {
        id: Uuid::new_v4(),
        title: title.to_string(),
        slug: "original-slug".to_string(),
        short_description: String::new(),
        description: "An ordinary desk.".to_string(),
        tags: vec!["furniture".to_string()],
        images: vec![ItemImage {
            id: Uuid::new_v4(),
            meta: ImageMeta::default(),
        }],
    }
}

fn params(harness: &Harness, item_ids: Vec<Uuid>, settings: BatchSettings) -> CreateBatchParams {
    CreateBatchParams {
        owner_id: harness.owner_id,
        content_item_ids: item_ids,
        field_prompts: HashMap::new(),
        settings,
    }
}

/// Run ticks until the queue drains.
async fn pump(h: &Harness) {
    while let Some(task) = h.ticks.pop() {
        scheduler::run_tick(&h.deps, task.batch_id).await.unwrap();
    }
}

/// Run at most `n` ticks.
async fn pump_n(h: &Harness, n: usize) {
    for _ in 0..n {
        let Some(task) = h.ticks.pop() else { return };
        scheduler::run_tick(&h.deps, task.batch_id).await.unwrap();
    }
}

#[tokio::test]
async fn production_tick_channel_assembles_into_a_runner() {
    let (scheduler, rx) = tick_channel();
    let seen: Arc<std::sync::Mutex<Vec<Uuid>>> = Arc::new(std::sync::Mutex::new(Vec::new()));

    let seen_for_handler = seen.clone();
    let handler: TickHandler = Arc::new(move |task: TickTask| {
        let seen = seen_for_handler.clone();
        Box::pin(async move {
            seen.lock().unwrap().push(task.batch_id);
            Ok(())
        })
    });

    let runner = TickRunner::new(rx, handler);
    let batch_id = Uuid::new_v4();
    scheduler
        .enqueue(TickTask { batch_id }, std::time::Duration::ZERO)
        .await
        .unwrap();
    drop(scheduler); // Close the channel so the runner exits.

    runner.run().await.unwrap();
    assert_eq!(seen.lock().unwrap().as_slice(), &[batch_id]);
}

#[tokio::test]
async fn full_batch_completes_every_field_in_order() {
    let h = harness();
    let item = sample_item("Old Desk");
    let item_id = item.id;
    h.content.insert_item(item);

    let batch = lifecycle::create_batch(&h.deps, params(&h, vec![item_id], BatchSettings::default()))
        .await
        .unwrap();
    assert_eq!(batch.total_jobs, 11);

    pump(&h).await;

    let finished = h.store.find_batch(batch.id).await.unwrap().unwrap();
    assert_eq!(finished.status, BatchStatus::Completed);

    let counts = h.store.job_counts(batch.id).await.unwrap();
    assert_eq!(counts.completed, 11);
    assert_eq!(counts.failed + counts.skipped + counts.pending + counts.processing, 0);

    // Image metadata is deterministic, so only 10 of 11 jobs prompt.
    assert_eq!(h.ai.call_count(), 10);

    // The focus keyword runs first and feeds the title prompt.
    let prompts = h.ai.prompts();
    assert!(prompts[0].contains("focus keyphrase"));
    assert!(prompts[1].contains("walnut desk"));

    // Side effects landed on the item and the SEO provider.
    let updated = h.content.item(item_id).unwrap();
    assert_eq!(updated.title, "Walnut Desk Pro 120cm");
    assert_eq!(updated.slug, "walnut-desk-pro-120cm");
    assert_eq!(updated.tags, vec!["desk", "walnut", "home office"]);
    assert_eq!(updated.images[0].meta.title, "Walnut Desk Pro 120cm");

    let seo_fields = h.seo.fields_for(item_id);
    assert_eq!(seo_fields.focus_keyword, "walnut desk");
    assert!(!seo_fields.meta_description.is_empty());

    // Item finished, so exactly one score refresh was requested.
    assert_eq!(h.seo.refresh_requests(), vec![item_id]);

    // Manual backup mode leaves the snapshot awaiting review.
    assert!(h.store.find_backup(item_id).await.unwrap().is_some());
}

#[tokio::test]
async fn job_counts_always_reconcile_with_total() {
    let h = harness();
    let items: Vec<Uuid> = (0..3)
        .map(|i| {
            let item = sample_item(&format!("Desk {i}"));
            let id = item.id;
            h.content.insert_item(item);
            id
        })
        .collect();

    let batch = lifecycle::create_batch(&h.deps, params(&h, items, BatchSettings::default()))
        .await
        .unwrap();

    // Mid-flight and at the end, the per-status tallies sum to the
    // batch total.
    for _ in 0..5 {
        pump_n(&h, 1).await;
        let counts = h.store.job_counts(batch.id).await.unwrap();
        assert_eq!(counts.total(), batch.total_jobs as i64);
    }

    pump(&h).await;
    let counts = h.store.job_counts(batch.id).await.unwrap();
    assert_eq!(counts.total(), batch.total_jobs as i64);
    assert_eq!(counts.finished(), batch.total_jobs as i64);
}

#[tokio::test]
async fn second_batch_for_same_owner_is_rejected() {
    let h = harness();
    let item = sample_item("Desk");
    let item_id = item.id;
    h.content.insert_item(item);

    let first = lifecycle::create_batch(&h.deps, params(&h, vec![item_id], BatchSettings::default()))
        .await
        .unwrap();

    let err = lifecycle::create_batch(&h.deps, params(&h, vec![item_id], BatchSettings::default()))
        .await
        .unwrap_err();

    match err {
        CreateBatchError::AlreadyActive { batch_id } => assert_eq!(batch_id, first.id),
        other => panic!("expected AlreadyActive, got {other:?}"),
    }

    // Once the first batch finishes, a new one is accepted.
    pump(&h).await;
    lifecycle::create_batch(&h.deps, params(&h, vec![item_id], BatchSettings::default()))
        .await
        .unwrap();
}

#[tokio::test]
async fn empty_item_selection_is_rejected() {
    let h = harness();
    let err = lifecycle::create_batch(&h.deps, params(&h, vec![], BatchSettings::default()))
        .await
        .unwrap_err();
    assert!(matches!(err, CreateBatchError::EmptyItems));
}

#[tokio::test]
async fn cancellation_keeps_completed_work_and_skips_the_rest() {
    let h = harness();
    let item = sample_item("Desk");
    let item_id = item.id;
    h.content.insert_item(item);

    let batch = lifecycle::create_batch(&h.deps, params(&h, vec![item_id], BatchSettings::default()))
        .await
        .unwrap();

    // Two jobs run, then the user cancels.
    pump_n(&h, 2).await;
    let outcome = lifecycle::cancel_batch(&h.deps, batch.id)
        .await
        .unwrap()
        .unwrap();
    assert!(outcome.cancelled);
    assert_eq!(outcome.skipped_jobs, 9);

    let counts = h.store.job_counts(batch.id).await.unwrap();
    assert_eq!(counts.completed, 2);
    assert_eq!(counts.skipped, 9);

    let cancelled = h.store.find_batch(batch.id).await.unwrap().unwrap();
    assert_eq!(cancelled.status, BatchStatus::Cancelled);

    // A second cancel is a no-op, and stray queued ticks do nothing.
    let again = lifecycle::cancel_batch(&h.deps, batch.id)
        .await
        .unwrap()
        .unwrap();
    assert!(!again.cancelled);
    pump(&h).await;
    let counts = h.store.job_counts(batch.id).await.unwrap();
    assert_eq!(counts.completed, 2);

    // Generated values from completed jobs were kept (focus keyword and
    // title ran before the cancel).
    assert_eq!(h.seo.fields_for(item_id).focus_keyword, "walnut desk");
}

#[tokio::test]
async fn transient_failures_retry_then_succeed() {
    let h = harness();
    let item = sample_item("Desk");
    let item_id = item.id;
    h.content.insert_item(item);

    h.ai
        .fail_when("focus keyphrase", AiError::RateLimit("slow down".into()), 2);

    let batch = lifecycle::create_batch(&h.deps, params(&h, vec![item_id], BatchSettings::default()))
        .await
        .unwrap();
    pump(&h).await;

    let finished = h.store.find_batch(batch.id).await.unwrap().unwrap();
    assert_eq!(finished.status, BatchStatus::Completed);

    let jobs = h.store.jobs_for_item(batch.id, item_id).await.unwrap();
    let focus = jobs.iter().find(|j| j.field_name == "focus_keyword").unwrap();
    assert_eq!(focus.status, JobStatus::Completed);
    assert_eq!(focus.retry_count, 2);
}

#[tokio::test]
async fn retries_are_capped_then_critical_failure_cascades() {
    let h = harness();
    let item = sample_item("Original Desk");
    let item_id = item.id;
    h.content.insert_item(item);

    // Never recovers: 2 retries are allowed, the third attempt fails
    // the job for good.
    h.ai
        .fail_when("focus keyphrase", AiError::Network("down".into()), 10);

    let batch = lifecycle::create_batch(&h.deps, params(&h, vec![item_id], BatchSettings::default()))
        .await
        .unwrap();
    pump(&h).await;

    let finished = h.store.find_batch(batch.id).await.unwrap().unwrap();
    assert_eq!(finished.status, BatchStatus::CompletedWithErrors);

    let counts = h.store.job_counts(batch.id).await.unwrap();
    assert_eq!(counts.failed, 1);
    assert_eq!(counts.skipped, 10);
    assert_eq!(counts.completed, 0);

    let jobs = h.store.jobs_for_item(batch.id, item_id).await.unwrap();
    let focus = jobs.iter().find(|j| j.field_name == "focus_keyword").unwrap();
    assert_eq!(focus.status, JobStatus::Failed);
    assert_eq!(focus.retry_count, 2);

    let skipped = jobs.iter().find(|j| j.field_name == "title").unwrap();
    assert_eq!(
        skipped.skip_reason.as_deref(),
        Some("critical field focus_keyword failed")
    );

    // The critical failure restored the snapshot immediately.
    assert_eq!(h.content.item(item_id).unwrap().title, "Original Desk");
    assert!(h.store.find_backup(item_id).await.unwrap().is_none());
}

#[tokio::test]
async fn critical_title_failure_restores_earlier_generated_fields() {
    let h = harness();
    let item = sample_item("Original Desk");
    let item_id = item.id;
    h.content.insert_item(item);

    // Auth errors are permanent on the first attempt.
    h.ai.fail_when(
        "SEO-optimized product title",
        AiError::Auth("bad key".into()),
        1,
    );

    let batch = lifecycle::create_batch(&h.deps, params(&h, vec![item_id], BatchSettings::default()))
        .await
        .unwrap();
    pump(&h).await;

    let jobs = h.store.jobs_for_item(batch.id, item_id).await.unwrap();
    let focus = jobs.iter().find(|j| j.field_name == "focus_keyword").unwrap();
    let title = jobs.iter().find(|j| j.field_name == "title").unwrap();
    assert_eq!(focus.status, JobStatus::Completed);
    assert_eq!(title.status, JobStatus::Failed);

    // The focus keyword had already been written, but the restore put
    // the original (empty) SEO fields back.
    assert_eq!(h.seo.fields_for(item_id).focus_keyword, "");
    assert_eq!(h.content.item(item_id).unwrap().title, "Original Desk");
}

fn auto_backup_settings(threshold: i32) -> BatchSettings {
    BatchSettings {
        backup: BackupPolicy {
            enabled: true,
            mode: BackupMode::Auto,
            restore_threshold: threshold,
        },
        ..BatchSettings::default()
    }
}

#[tokio::test]
async fn auto_restore_threshold_is_inclusive() {
    let h = harness();

    let scores = [75, 80, 85];
    let item_ids: Vec<Uuid> = scores
        .iter()
        .enumerate()
        .map(|(i, &score)| {
            let item = sample_item(&format!("Original {i}"));
            let id = item.id;
            h.content.insert_item(item);
            h.seo.set_score(id, score);
            id
        })
        .collect();

    let batch = lifecycle::create_batch(&h.deps, params(&h, item_ids.clone(), auto_backup_settings(80)))
        .await
        .unwrap();
    pump(&h).await;

    let finished = h.store.find_batch(batch.id).await.unwrap().unwrap();
    assert_eq!(finished.status, BatchStatus::Completed);

    let outcome = backup::auto_restore_check(&h.deps, &batch, &HashMap::new())
        .await
        .unwrap();
    assert_eq!(outcome.restored_count, 2);
    assert_eq!(outcome.kept_count, 1);

    // 75 and 80 are at or below the threshold: restored. 85 is kept.
    assert_eq!(h.content.item(item_ids[0]).unwrap().title, "Original 0");
    assert_eq!(h.content.item(item_ids[1]).unwrap().title, "Original 1");
    assert_eq!(
        h.content.item(item_ids[2]).unwrap().title,
        "Walnut Desk Pro 120cm"
    );

    // Every snapshot was resolved one way or the other.
    for id in &item_ids {
        assert!(h.store.find_backup(*id).await.unwrap().is_none());
    }
}

#[tokio::test]
async fn auto_restore_threshold_clamps_to_provider_ceiling() {
    let h = harness();
    h.seo.set_capabilities(SeoCapabilities {
        supports_scoring: true,
        max_score: 95,
    });

    let kept = sample_item("Keep Me");
    let restored = sample_item("Restore Me");
    let kept_id = kept.id;
    let restored_id = restored.id;
    h.content.insert_item(kept);
    h.content.insert_item(restored);
    h.seo.set_score(kept_id, 96);
    h.seo.set_score(restored_id, 95);

    // A threshold of 100 would restore everything on a 95-point scale;
    // it clamps to 95.
    let batch = lifecycle::create_batch(
        &h.deps,
        params(&h, vec![kept_id, restored_id], auto_backup_settings(100)),
    )
    .await
    .unwrap();
    pump(&h).await;

    backup::auto_restore_check(&h.deps, &batch, &HashMap::new())
        .await
        .unwrap();

    assert_eq!(
        h.content.item(kept_id).unwrap().title,
        "Walnut Desk Pro 120cm"
    );
    assert_eq!(h.content.item(restored_id).unwrap().title, "Restore Me");
}

#[tokio::test]
async fn finalize_leaves_auto_snapshots_for_settled_scores() {
    let h = harness();
    let item = sample_item("Original Desk");
    let item_id = item.id;
    h.content.insert_item(item);

    // The provider still reports the pre-generation score when the
    // batch finishes; the real score settles later.
    h.seo.set_score(item_id, 90);

    let batch = lifecycle::create_batch(&h.deps, params(&h, vec![item_id], auto_backup_settings(80)))
        .await
        .unwrap();
    pump(&h).await;

    let finished = h.store.find_batch(batch.id).await.unwrap().unwrap();
    assert_eq!(finished.status, BatchStatus::Completed);

    // Finalization must not consume the snapshot against the stale 90.
    assert!(h.store.find_backup(item_id).await.unwrap().is_some());
    assert_eq!(
        h.content.item(item_id).unwrap().title,
        "Walnut Desk Pro 120cm"
    );

    let mut scores = HashMap::new();
    scores.insert(item_id, 70);
    let outcome = backup::auto_restore_check(&h.deps, &batch, &scores)
        .await
        .unwrap();

    assert_eq!(outcome.restored_count, 1);
    assert_eq!(h.content.item(item_id).unwrap().title, "Original Desk");
    assert!(h.store.find_backup(item_id).await.unwrap().is_none());
}

#[tokio::test]
async fn client_supplied_scores_override_the_provider() {
    let h = harness();

    let overridden = sample_item("Original A");
    let fallback = sample_item("Original B");
    let overridden_id = overridden.id;
    let fallback_id = fallback.id;
    h.content.insert_item(overridden);
    h.content.insert_item(fallback);
    h.seo.set_score(overridden_id, 90);
    h.seo.set_score(fallback_id, 90);

    // Manual mode: finalization leaves the snapshots for review.
    let batch = lifecycle::create_batch(
        &h.deps,
        params(&h, vec![overridden_id, fallback_id], BatchSettings::default()),
    )
    .await
    .unwrap();
    pump(&h).await;

    let batch = h.store.find_batch(batch.id).await.unwrap().unwrap();
    let mut scores = HashMap::new();
    scores.insert(overridden_id, 70);

    let outcome = backup::auto_restore_check(&h.deps, &batch, &scores)
        .await
        .unwrap();
    assert_eq!(outcome.restored_count, 1);
    assert_eq!(outcome.kept_count, 1);

    // The settled 70 beat the provider's 90; the item without an
    // override stayed on the provider's passing score.
    assert_eq!(h.content.item(overridden_id).unwrap().title, "Original A");
    assert_eq!(
        h.content.item(fallback_id).unwrap().title,
        "Walnut Desk Pro 120cm"
    );
}

#[tokio::test]
async fn bulk_action_resolves_restores_and_approvals_together() {
    let h = harness();

    let to_restore = sample_item("Original A");
    let to_approve = sample_item("Original B");
    let restore_id = to_restore.id;
    let approve_id = to_approve.id;
    h.content.insert_item(to_restore);
    h.content.insert_item(to_approve);

    lifecycle::create_batch(
        &h.deps,
        params(&h, vec![restore_id, approve_id], BatchSettings::default()),
    )
    .await
    .unwrap();
    pump(&h).await;

    let outcome = backup::bulk_backup_action(
        &h.deps,
        &[restore_id],
        &[approve_id, Uuid::new_v4()],
    )
    .await
    .unwrap();

    assert_eq!(outcome.restored, 1);
    assert_eq!(outcome.approved, 1);
    assert_eq!(outcome.missing, 1);

    assert_eq!(h.content.item(restore_id).unwrap().title, "Original A");
    assert_eq!(
        h.content.item(approve_id).unwrap().title,
        "Walnut Desk Pro 120cm"
    );
    assert!(h.store.find_backup(restore_id).await.unwrap().is_none());
    assert!(h.store.find_backup(approve_id).await.unwrap().is_none());
}

#[tokio::test]
async fn restore_writes_empty_snapshot_fields_back() {
    let h = harness();
    let item = sample_item("Original Desk"); // empty short_description
    let item_id = item.id;
    h.content.insert_item(item);

    let batch = lifecycle::create_batch(&h.deps, params(&h, vec![item_id], BatchSettings::default()))
        .await
        .unwrap();
    pump(&h).await;

    // Generation filled the field in.
    assert!(!h.content.item(item_id).unwrap().short_description.is_empty());

    assert!(backup::restore_item(&h.deps, item_id).await.unwrap());

    let after = h.content.item(item_id).unwrap();
    assert_eq!(after.short_description, "");
    assert_eq!(after.title, "Original Desk");
    assert_eq!(after.slug, "original-slug");

    // Restoring again finds nothing.
    assert!(!backup::restore_item(&h.deps, item_id).await.unwrap());
    let _ = batch;
}

#[tokio::test]
async fn failed_restore_write_keeps_the_snapshot() {
    let h = harness();
    let item = sample_item("Original Desk");
    let item_id = item.id;
    h.content.insert_item(item);

    lifecycle::create_batch(&h.deps, params(&h, vec![item_id], BatchSettings::default()))
        .await
        .unwrap();
    pump(&h).await;

    h.content.set_fail_writes(true);
    assert!(backup::restore_item(&h.deps, item_id).await.is_err());
    assert!(h.store.find_backup(item_id).await.unwrap().is_some());

    h.content.set_fail_writes(false);
    assert!(backup::restore_item(&h.deps, item_id).await.unwrap());
    assert!(h.store.find_backup(item_id).await.unwrap().is_none());
}

#[tokio::test]
async fn approve_keeps_generated_content_and_drops_snapshot() {
    let h = harness();
    let item = sample_item("Original Desk");
    let item_id = item.id;
    h.content.insert_item(item);

    lifecycle::create_batch(&h.deps, params(&h, vec![item_id], BatchSettings::default()))
        .await
        .unwrap();
    pump(&h).await;

    assert!(backup::approve_item(&h.deps, item_id).await.unwrap());
    assert!(!backup::approve_item(&h.deps, item_id).await.unwrap());

    assert_eq!(
        h.content.item(item_id).unwrap().title,
        "Walnut Desk Pro 120cm"
    );
}

#[tokio::test]
async fn status_read_finalizes_a_finished_batch_lazily() {
    let h = harness();
    let item = sample_item("Desk");
    let item_id = item.id;
    h.content.insert_item(item);

    let batch = lifecycle::create_batch(&h.deps, params(&h, vec![item_id], BatchSettings::default()))
        .await
        .unwrap();

    // Run ticks until no pending work remains, then drop the final
    // queued tick to simulate it getting lost.
    loop {
        let counts = h.store.job_counts(batch.id).await.unwrap();
        if counts.pending == 0 && counts.processing == 0 {
            break;
        }
        let task = h.ticks.pop().expect("work remains but no tick queued");
        scheduler::run_tick(&h.deps, task.batch_id).await.unwrap();
    }
    while h.ticks.pop().is_some() {}

    let in_store = h.store.find_batch(batch.id).await.unwrap().unwrap();
    assert_eq!(in_store.status, BatchStatus::Processing);

    let view = lifecycle::get_batch_status(&h.deps, batch.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(view.status, BatchStatus::Completed);
    assert_eq!(view.progress_pct, 100);

    // A second read observes the already-terminal batch unchanged.
    let again = lifecycle::get_batch_status(&h.deps, batch.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(again.status, BatchStatus::Completed);
}

#[tokio::test]
async fn stuck_batch_is_swept_and_stops_blocking_its_owner() {
    let h = harness();
    let item = sample_item("Desk");
    let item_id = item.id;
    h.content.insert_item(item);

    let batch = lifecycle::create_batch(&h.deps, params(&h, vec![item_id], BatchSettings::default()))
        .await
        .unwrap();

    // One job runs, then the tick chain dies.
    pump_n(&h, 1).await;
    while h.ticks.pop().is_some() {}
    h.store.backdate_batch_start(batch.id, 45);

    let active = lifecycle::get_active_batch(&h.deps, h.owner_id)
        .await
        .unwrap();
    assert!(active.is_none());

    let swept = h.store.find_batch(batch.id).await.unwrap().unwrap();
    assert_eq!(swept.status, BatchStatus::CompletedWithErrors);

    let counts = h.store.job_counts(batch.id).await.unwrap();
    assert_eq!(counts.pending, 0);
    assert_eq!(counts.completed, 1);
    assert_eq!(counts.skipped, 10);

    // The owner can start fresh.
    lifecycle::create_batch(&h.deps, params(&h, vec![item_id], BatchSettings::default()))
        .await
        .unwrap();
}

#[tokio::test]
async fn stuck_sweep_fails_jobs_orphaned_in_processing() {
    let h = harness();
    let item = sample_item("Desk");
    let item_id = item.id;
    h.content.insert_item(item);

    let batch = lifecycle::create_batch(&h.deps, params(&h, vec![item_id], BatchSettings::default()))
        .await
        .unwrap();
    pump_n(&h, 1).await;

    // A runner claims the next job, then dies before finishing it.
    let next = h.store.pending_jobs(batch.id, 1).await.unwrap().remove(0);
    assert!(h.store.claim_job(next.id).await.unwrap());
    while h.ticks.pop().is_some() {}
    h.store.backdate_batch_start(batch.id, 45);

    assert!(lifecycle::get_active_batch(&h.deps, h.owner_id)
        .await
        .unwrap()
        .is_none());

    let orphan = h.store.find_job(next.id).await.unwrap().unwrap();
    assert_eq!(orphan.status, JobStatus::Failed);
    assert_eq!(orphan.error_message.as_deref(), Some("batch timed out"));

    // Every job is terminal under the terminal batch.
    let counts = h.store.job_counts(batch.id).await.unwrap();
    assert_eq!(counts.processing, 0);
    assert_eq!(counts.pending, 0);
    assert_eq!(
        counts.completed + counts.failed + counts.skipped,
        counts.total()
    );
    assert_eq!(counts.completed, 1);
    assert_eq!(counts.failed, 1);
}

#[tokio::test]
async fn results_group_fields_per_item_with_review_state() {
    let h = harness();
    let item = sample_item("Desk");
    let item_id = item.id;
    h.content.insert_item(item);

    let batch = lifecycle::create_batch(&h.deps, params(&h, vec![item_id], BatchSettings::default()))
        .await
        .unwrap();
    pump(&h).await;

    let results = lifecycle::get_batch_results(&h.deps, batch.id)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(results.items.len(), 1);
    assert!(results.backup.enabled);
    assert_eq!(results.backup.threshold, 80);
    assert_eq!(results.backup.pending_review, 1);

    let item_results = &results.items[0];
    assert!(item_results.has_backup);
    assert!(item_results.issues.is_empty());
    assert_eq!(item_results.fields.len(), 11);
    assert_eq!(
        item_results.fields["title"].as_str(),
        Some("Walnut Desk Pro 120cm")
    );
    assert!(item_results.fields["faq"].is_array());
    assert!(item_results.fields["pros_cons"]["pros"].is_array());
}

#[tokio::test]
async fn unparseable_output_fails_without_retry() {
    let h = harness();
    let item = sample_item("Desk");
    let item_id = item.id;
    h.content.insert_item(item);

    // Pros/cons output with no recognizable sections cannot be parsed.
    let settings = BatchSettings::default();
    h.ai.stub("pros and cons", "no structure here at all");

    let batch = lifecycle::create_batch(&h.deps, params(&h, vec![item_id], settings))
        .await
        .unwrap();
    pump(&h).await;

    let jobs = h.store.jobs_for_item(batch.id, item_id).await.unwrap();
    let pros_cons = jobs.iter().find(|j| j.field_name == "pros_cons").unwrap();
    assert_eq!(pros_cons.status, JobStatus::Failed);
    assert_eq!(pros_cons.retry_count, 0);
    assert!(pros_cons
        .error_message
        .as_deref()
        .unwrap()
        .contains("unparseable"));

    // Pros/cons is not critical, so the batch still runs to the end.
    let finished = h.store.find_batch(batch.id).await.unwrap().unwrap();
    assert_eq!(finished.status, BatchStatus::CompletedWithErrors);
}
