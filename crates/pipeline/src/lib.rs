//! Sluice Pipeline - The engine that moves records from source to sinks
//!
//! # Architecture
//!
//! ```text
//!                 GatedWriter                     workers (N)
//! [Source] ──► breaker ─► [Buffer] ──read──► [stage 0] ─► ... ─► [stage k] ──┬──► [Sink A]
//!                            ▲                    │                          └──► [Sink B]
//!                            └──── checkpoint ◄───┴───── all sinks succeeded
//! ```
//!
//! # Key Design
//!
//! - **At-least-once**: a window is checkpointed only after every sink
//!   accepted the batch; failed windows are redelivered by the buffer
//! - **Arc fan-out**: the processed batch is shared by all sinks, written
//!   concurrently
//! - **Backpressure**: sources write through a breaker-gated writer and
//!   block on a full buffer
//! - **Stateful stages**: processors with identification keys get a peer
//!   forwarder so each key is processed on exactly one node
//! - **Graceful stop**: drain, flush held state, then cancel workers
//!
//! # Example
//!
//! ```ignore
//! use sluice_pipeline::{PipelineBuilder, Plugins};
//!
//! let pipeline = PipelineBuilder::from_config(&config, &Plugins::builtin())?
//!     .with_breaker(breaker)
//!     .build()?;
//!
//! pipeline.start().await?;
//! // ...
//! pipeline.stop().await?;
//! ```

mod builder;
mod error;
mod metrics;
mod pipeline;
mod state;
mod worker;

pub use builder::{
    DEFAULT_BATCH_SIZE, DEFAULT_DRAIN_TIMEOUT, DEFAULT_READ_TIMEOUT, DEFAULT_SHUTDOWN_GRACE,
    DEFAULT_WRITE_TIMEOUT, PipelineBuilder, Plugins,
};
pub use error::{PipelineError, Result};
pub use metrics::{FailureKind, FailureReport, FailureTracker, MetricsSnapshot, PipelineMetrics};
pub use pipeline::Pipeline;
pub use state::PipelineState;
