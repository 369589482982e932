// HTTP routes
pub mod backups;
pub mod batches;
pub mod health;

pub use backups::*;
pub use batches::*;
pub use health::*;
