//! Sluice Buffer - Bounded record queue between source and processors
//!
//! # Read / checkpoint protocol
//!
//! ```text
//! let (records, state) = buffer.read(batch_size, timeout).await?;
//! // ... process and deliver records ...
//! buffer.checkpoint(&state)?;   // only after every sink succeeded
//! ```
//!
//! A window that is never checkpointed (worker crashed, sink failed) becomes
//! readable again after the redelivery timeout. Delivery is at-least-once;
//! downstream writes must be idempotent.
//!
//! Invalid checkpoints (unknown, already committed, redelivered, or issued by
//! another buffer) are rejected with `BufferError::InvalidCheckpoint` and
//! leave the buffer untouched.

mod bounded;
mod buffer;
mod error;
mod gated;
mod metrics;

pub use bounded::{
    BoundedBuffer, BufferConfig, DEFAULT_CAPACITY, DEFAULT_REDELIVERY_TIMEOUT, Weigher,
};
pub use buffer::{Buffer, CheckpointState};
pub use error::{BufferError, Result};
pub use gated::{DEFAULT_POLL_INTERVAL, GatedWriter};
pub use metrics::{BufferMetrics, BufferMetricsSnapshot};
