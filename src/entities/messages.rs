//! Decode worker message protocol
//!
//! Requests flow control thread → worker over a per-worker channel, events flow
//! worker → control thread over one shared channel. Every message carries the
//! session id (routing) and the session request id (staleness check).
//!
//! Pixel buffers travel by move: a `Render` request may carry the session's
//! staging buffer, and the matching `Frame` event carries it back.

use std::fmt;

use super::frame::PixelBuf;
use super::source::{AnimationInfo, AnimationSource};

/// Identity of a decode session (unique for the engine lifetime)
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s{}", self.0)
    }
}

/// Control thread → worker
#[derive(Debug)]
pub enum WorkerRequest {
    /// Load animation and report frame count / fps
    Load {
        session: SessionId,
        request_id: u64,
        source: AnimationSource,
        width: u32,
        height: u32,
    },
    /// Render one frame. `dest` is moved to the worker when buffer transfer is on.
    Render {
        session: SessionId,
        request_id: u64,
        frame_index: u32,
        dest: Option<PixelBuf>,
    },
    /// Drop the loaded animation for a session
    Release { session: SessionId },
    /// Stop the worker thread
    Shutdown,
}

/// Worker → control thread
#[derive(Debug)]
pub enum WorkerEvent {
    /// One-time readiness signal, sent before any other event
    Ready { worker: usize },
    Loaded {
        session: SessionId,
        request_id: u64,
        info: AnimationInfo,
    },
    Frame {
        session: SessionId,
        request_id: u64,
        frame_index: u32,
        pixels: PixelBuf,
    },
    /// Decoder error. `frame_index` is None for load failures; `returned`
    /// hands back a transferred destination buffer.
    Failed {
        session: SessionId,
        request_id: u64,
        frame_index: Option<u32>,
        reason: String,
        returned: Option<PixelBuf>,
    },
}

/// Where the scheduler posts worker requests.
///
/// Implemented by the threaded [`crate::core::WorkerPool`]; tests use a
/// recording sink to drive the scheduler deterministically.
pub trait RequestSink {
    /// Next worker slot in round-robin order, or None if the pool is empty
    fn assign_worker(&mut self) -> Option<usize>;

    /// Post a request to a worker (fire-and-forget)
    fn send(&mut self, worker: usize, request: WorkerRequest);

    /// Whether render requests move the staging buffer to the worker
    fn transfers_buffers(&self) -> bool;
}
