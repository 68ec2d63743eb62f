// Encrypted priority persistence queue.
// Payloads are sealed before they reach memory-at-rest or the durable
// store; drain order is priority then FIFO.

mod core;
mod errors;
pub mod metrics;
mod types;

pub use self::core::PersistenceQueue;
pub use self::errors::{QueueError, QueueResult};
pub use self::metrics::{QueueMetrics, QueueMetricsSnapshot};
pub use self::types::{QueueConfig, QueuedOperation};
