//! Parallel execution of discovery tasks for a single job.

pub mod pool;
pub mod progress;
pub mod retry;
pub mod runner;

pub use pool::{LaneWork, PoolOutcome, PrimaryLane, WorkerPool};
pub use progress::{Accumulator, CancelCheck, ProgressNudger, ProgressWriter};
pub use retry::{is_retryable, RetryClassifier, RetryPolicy, SignatureClassifier};
pub use runner::TaskRunner;
