//! Bulk SEO content generation.
//!
//! A batch expands into per-(item, field) jobs, a self-scheduling tick
//! loop runs them one at a time in dependency order, and the backup
//! layer keeps a pre-generation snapshot per item for review or
//! restore.

pub mod backup;
pub mod fields;
pub mod lifecycle;
pub mod models;
pub mod parse;
pub mod processor;
pub mod prompts;
pub mod scheduler;
pub mod store;
