//! Concurrent diffing of import records against the target model.

pub mod detector;
pub mod pool;

pub use detector::DiffDetector;
pub use pool::{CancelFlag, DiffWorkerPool, WorkerExit};
