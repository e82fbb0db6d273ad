//! Sluice Protocol - Core data model for the sluice pipeline engine
//!
//! This crate provides the types that flow through every pipeline stage:
//! - `Record<T>` - Envelope moved between stages
//! - `Event` - JSON-like object with metadata and an acknowledgement handle
//! - `KeyPath` - Slash-separated path addressing nested event values
//! - `AcknowledgementSet` / `EventHandle` - End-to-end delivery tracking
//! - `ForwardRequest` / `ForwardResponse` - Peer wire frames
//!
//! # Design Principles
//!
//! - **Explicit errors**: Missing keys are `EventError::KeyNotFound`, never a sentinel
//! - **Single release**: Every event handle reports its outcome exactly once
//! - **Node-local handles**: Acknowledgement state never crosses the wire

mod ack;
mod error;
mod event;
mod key_path;
mod record;
mod wire;

pub use ack::{
    AckCallback, AcknowledgementManager, AcknowledgementMetrics, AcknowledgementSet, EventHandle,
};
pub use error::{EventError, Result, WireError};
pub use event::{Event, EventMetadata, FAILURE_TAG};
pub use key_path::{KeyPath, SEPARATOR};
pub use record::Record;
pub use wire::{
    FRAME_HEADER_LEN, ForwardRequest, ForwardResponse, MAX_FRAME_SIZE, WireEvent, decode_frame,
    encode_frame,
};

// Re-export bytes for convenience
pub use bytes::{Bytes, BytesMut};
