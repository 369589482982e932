pub mod backup;
pub mod batch;
pub mod job;

pub use backup::{ImageSnapshot, SeoBackup, SnapshotPayload};
pub use batch::{
    BackupMode, BackupPolicy, Batch, BatchSettings, BatchStatus, StyleModifiers,
    STUCK_BATCH_TIMEOUT_MINUTES,
};
pub use job::{GenerationJob, JobStatus, MAX_RETRIES};
