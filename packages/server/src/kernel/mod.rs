//! Kernel module - server infrastructure and capability traits.

pub mod ai;
pub mod content;
pub mod deps;
pub mod seo;
pub mod ticks;

pub use ai::{AiEngine, AiError, CompletionRequest, MockAiEngine, OpenAiEngine, AI_CALL_TIMEOUT};
pub use content::{
    slugify, ContentItem, ContentStore, ImageMeta, InMemoryContentStore, ItemImage,
    RestContentStore,
};
pub use deps::ServerDeps;
pub use seo::{
    InMemorySeoProvider, RestSeoProvider, SeoCapabilities, SeoFieldProvider, SeoFields,
};
pub use ticks::{
    tick_channel, TestTickScheduler, TickHandler, TickRunner, TickScheduler, TickTask,
    TokioTickScheduler,
};
