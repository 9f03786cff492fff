mod lifecycle;
mod pool;

pub use lifecycle::{JobOutcome, JobProcessor};
pub use pool::WorkerPool;
