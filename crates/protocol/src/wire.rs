//! Peer wire format
//!
//! Events forwarded between nodes travel as length-prefixed JSON frames:
//!
//! ```text
//! [4 bytes: length (big-endian)][N bytes: JSON payload]
//! ```
//!
//! A request carries a batch of events for one pipeline stage; the
//! receiving node answers with one response per request.

use std::collections::BTreeSet;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::WireError;
use crate::event::{Event, EventMetadata};

/// Largest frame accepted on either side (16 MiB)
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Length prefix size in bytes
pub const FRAME_HEADER_LEN: usize = 4;

/// Serialized form of an [`Event`]
///
/// The acknowledgement handle is node-local and never crosses the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireEvent {
    pub data: Map<String, Value>,
    pub event_type: String,
    pub time_received: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub tags: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
}

impl From<&Event> for WireEvent {
    fn from(event: &Event) -> Self {
        let metadata = event.metadata();
        Self {
            data: event.data().clone(),
            event_type: metadata.event_type.clone(),
            time_received: metadata.time_received,
            tags: metadata.tags.clone(),
            failure: metadata.failure.clone(),
        }
    }
}

impl From<WireEvent> for Event {
    fn from(wire: WireEvent) -> Self {
        Event::from_parts(
            wire.data,
            EventMetadata {
                event_type: wire.event_type,
                time_received: wire.time_received,
                tags: wire.tags,
                failure: wire.failure,
            },
        )
    }
}

/// Batch of events sent to the peer that owns them
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForwardRequest {
    /// Pipeline the events belong to
    pub pipeline: String,
    /// Processor stage on the receiving node
    pub plugin_id: String,
    pub events: Vec<WireEvent>,
}

/// Reply to a [`ForwardRequest`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ForwardResponse {
    /// The first `records` events were written to the receiver's buffer
    ///
    /// Fewer than were sent means the rest should be sent again.
    Accepted { records: usize },
    /// Nothing was written
    Rejected {
        reason: String,
        /// `false` when resending the same batch cannot succeed
        #[serde(default = "retryable_by_default")]
        retryable: bool,
    },
}

fn retryable_by_default() -> bool {
    true
}

/// Encode a value as one length-prefixed JSON frame
pub fn encode_frame<T: Serialize>(value: &T) -> Result<Bytes, WireError> {
    let payload = serde_json::to_vec(value)?;
    if payload.len() > MAX_FRAME_SIZE {
        return Err(WireError::FrameTooLarge {
            size: payload.len(),
            max: MAX_FRAME_SIZE,
        });
    }

    let mut buf = BytesMut::with_capacity(FRAME_HEADER_LEN + payload.len());
    buf.put_u32(payload.len() as u32);
    buf.put_slice(&payload);
    Ok(buf.freeze())
}

/// Decode one frame from the front of `buf`
///
/// Returns `Ok(None)` when the buffer does not yet hold a complete frame;
/// nothing is consumed in that case.
pub fn decode_frame<T: DeserializeOwned>(buf: &mut BytesMut) -> Result<Option<T>, WireError> {
    if buf.len() < FRAME_HEADER_LEN {
        return Ok(None);
    }

    let len = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
    if len > MAX_FRAME_SIZE {
        return Err(WireError::FrameTooLarge {
            size: len,
            max: MAX_FRAME_SIZE,
        });
    }
    if buf.len() < FRAME_HEADER_LEN + len {
        buf.reserve(FRAME_HEADER_LEN + len - buf.len());
        return Ok(None);
    }

    buf.advance(FRAME_HEADER_LEN);
    let payload = buf.split_to(len);
    Ok(Some(serde_json::from_slice(&payload)?))
}
