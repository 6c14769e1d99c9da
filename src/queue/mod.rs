//! Upload queue: job store, admission control and retry scheduling.

mod manager;
mod retry;
mod stats;
mod store;

pub use manager::{QueueEvent, QueueOptions, QueueSnapshot, RetryOutcome, UploadQueue};
pub use retry::RetryPolicy;
pub use stats::Stats;
