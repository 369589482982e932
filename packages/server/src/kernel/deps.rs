//! Server dependencies (using traits for testability)
//!
//! This module provides the central dependency container used by the
//! generation domain and the HTTP handlers. All external services sit
//! behind trait abstractions to enable testing.

use std::sync::Arc;

use crate::domains::generation::store::GenerationStore;
use crate::kernel::{AiEngine, ContentStore, SeoFieldProvider, TickScheduler};

/// Dependencies shared by the scheduler, processor, and HTTP handlers.
#[derive(Clone)]
pub struct ServerDeps {
    /// Batch/job/backup store - the single source of truth.
    pub store: Arc<dyn GenerationStore>,
    /// AI engine for all LLM completions.
    pub ai: Arc<dyn AiEngine>,
    /// Content item store (commerce platform products).
    pub content: Arc<dyn ContentStore>,
    /// SEO plugin integration (fields + quality score).
    pub seo: Arc<dyn SeoFieldProvider>,
    /// Delayed scheduler-tick primitive.
    pub ticks: Arc<dyn TickScheduler>,
}

impl ServerDeps {
    pub fn new(
        store: Arc<dyn GenerationStore>,
        ai: Arc<dyn AiEngine>,
        content: Arc<dyn ContentStore>,
        seo: Arc<dyn SeoFieldProvider>,
        ticks: Arc<dyn TickScheduler>,
    ) -> Self {
        Self {
            store,
            ai,
            content,
            seo,
            ticks,
        }
    }
}
