//! Decode session: one animation decoded at one pixel size
//!
//! **Why**: Every player showing the same sticker at the same size shares one
//! worker assignment, one frame cache and one lookahead queue. Decoding a
//! sticker once for ten chat bubbles is the whole point.
//!
//! **Used by**: Scheduler (owns all sessions, single writer)
//!
//! # States
//!
//! - `Created`: worker assigned, load request sent
//! - `Loaded`: frame count / fps known, queue sized, first frame requested.
//!   Segment redirects re-enter this state with a fresh request id.
//! - `Playing`: at least one frame consumed since the last (re)load
//! - `Failed`: decoder rejected the animation; players never paint
//!
//! There is no terminal state: sessions live until a cache reset.
//!
//! # Request pipeline
//!
//! At most one render request is in flight. Each accepted frame is pushed to
//! the queue and, while the queue needs more, the next index is requested
//! (served straight from the cache when possible). A request id mismatch on
//! arrival means the response belongs to a superseded generation and is
//! dropped.

use std::time::{Duration, Instant};

use log::{debug, trace};

use crate::core::cache_man::CacheManager;
use crate::core::frame_cache::FrameCache;
use crate::core::frame_queue::FrameQueue;
use crate::entities::frame::rgba_len;
use crate::entities::{
    AnimationInfo, AnimationSource, DecodedFrame, PixelBuf, RequestSink, Segment, SessionId,
    SessionKey, WorkerRequest,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Created,
    Loaded,
    Playing,
    Failed,
}

#[derive(Debug)]
pub struct DecodeSession {
    id: SessionId,
    key: SessionKey,
    /// Assigned once at creation, never changes
    worker: usize,
    phase: SessionPhase,
    info: Option<AnimationInfo>,
    frame_interval: Duration,
    last_advance: Option<Instant>,
    /// Current generation; responses tagged with anything else are stale
    request_id: u64,
    /// Next frame index to request once the queue has room
    next_request: Option<u32>,
    in_flight: Option<u32>,
    /// Reusable destination buffer. None while it is lent to the worker.
    staging: Option<PixelBuf>,
    cache: FrameCache,
    queue: FrameQueue,
    reverse: bool,
    /// Segment of the last redirect, cleared once a frame of it is consumed
    redirect: Option<Segment>,
    /// Segment being delivered, cleared once its end frame is consumed
    segment: Option<Segment>,
}

impl DecodeSession {
    pub fn new(id: SessionId, key: SessionKey, worker: usize, divisor: u32, request_id: u64) -> Self {
        let staging = PixelBuf::for_size(key.width, key.height);
        debug!("Session {} created for {} on worker {}", id, key, worker);
        Self {
            id,
            key,
            worker,
            phase: SessionPhase::Created,
            info: None,
            frame_interval: Duration::ZERO,
            last_advance: None,
            request_id,
            next_request: None,
            in_flight: None,
            staging: Some(staging),
            cache: FrameCache::new(divisor),
            queue: FrameQueue::new(1),
            reverse: false,
            redirect: None,
            segment: None,
        }
    }

    /// Load request for this session's worker
    pub fn load_request(&self, source: AnimationSource) -> WorkerRequest {
        WorkerRequest::Load {
            session: self.id,
            request_id: self.request_id,
            source,
            width: self.key.width,
            height: self.key.height,
        }
    }

    // === Accessors ===

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn key(&self) -> &SessionKey {
        &self.key
    }

    pub fn worker(&self) -> usize {
        self.worker
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn info(&self) -> Option<AnimationInfo> {
        self.info
    }

    pub fn is_loaded(&self) -> bool {
        matches!(self.phase, SessionPhase::Loaded | SessionPhase::Playing)
    }

    pub fn frame_interval(&self) -> Duration {
        self.frame_interval
    }

    pub fn last_advance(&self) -> Option<Instant> {
        self.last_advance
    }

    pub fn request_id(&self) -> u64 {
        self.request_id
    }

    pub fn next_request(&self) -> Option<u32> {
        self.next_request
    }

    pub fn in_flight(&self) -> Option<u32> {
        self.in_flight
    }

    pub fn cache(&self) -> &FrameCache {
        &self.cache
    }

    pub fn queue(&self) -> &FrameQueue {
        &self.queue
    }

    pub fn is_reverse(&self) -> bool {
        self.reverse
    }

    /// Segment of a redirect whose frames have not been consumed yet
    pub fn pending_redirect(&self) -> Option<Segment> {
        self.redirect
    }

    fn frame_count(&self) -> u32 {
        self.info.map(|i| i.frame_count).unwrap_or(1).max(1)
    }

    // === Transitions ===

    /// `Created -> Loaded`. `start` is the segment of the first attached
    /// player, if it asked for one before load completed.
    pub fn mark_loaded(&mut self, info: AnimationInfo, now: Instant, start: Option<Segment>) {
        let fps = if info.fps > 0.0 { info.fps } else { 30.0 };
        let info = AnimationInfo {
            frame_count: info.frame_count.max(1),
            fps,
        };
        self.info = Some(info);
        self.frame_interval = Duration::from_secs_f64(1.0 / fps as f64);
        self.last_advance = Some(now);
        self.queue = FrameQueue::for_fps(fps);

        let start = start.map(|s| s.clamped(info.frame_count));
        self.reverse = start.is_some_and(|s| s.is_reverse());
        self.next_request = Some(start.map(|s| s.from).unwrap_or(0));
        self.segment = start;
        self.phase = SessionPhase::Loaded;

        debug!(
            "Session {} loaded: {} frames @ {} fps, queue depth {}",
            self.id,
            info.frame_count,
            fps,
            self.queue.depth()
        );
    }

    /// Re-entrant `Loaded` reset for segment playback: new generation, fresh
    /// queue of the same depth, delivery restarts at `segment.from`.
    pub fn redirect(&mut self, segment: Segment, request_id: u64) {
        let segment = segment.clamped(self.frame_count());
        debug!(
            "Session {} redirected to {}..{} (request {} -> {})",
            self.id, segment.from, segment.to, self.request_id, request_id
        );
        self.request_id = request_id;
        self.queue = FrameQueue::new(self.queue.depth());
        self.reverse = segment.is_reverse();
        self.next_request = Some(segment.from);
        self.in_flight = None;
        self.redirect = Some(segment);
        self.segment = Some(segment);
        if self.phase == SessionPhase::Playing {
            self.phase = SessionPhase::Loaded;
        }
    }

    /// Check a consumed frame against the active segment. Returns true when
    /// a backwards segment just ended and delivery must turn forward again.
    pub fn finish_segment(&mut self, index: u32) -> bool {
        match self.segment {
            Some(segment) if segment.is_end(index) => {
                self.segment = None;
                self.reverse
            }
            _ => false,
        }
    }

    /// Forward delivery after a backwards segment: new generation, fresh
    /// queue, delivery continues after `index`.
    pub fn resume_forward(&mut self, index: u32, request_id: u64) {
        debug!(
            "Session {} resumes forward after {} (request {} -> {})",
            self.id, index, self.request_id, request_id
        );
        self.request_id = request_id;
        self.queue = FrameQueue::new(self.queue.depth());
        self.reverse = false;
        self.next_request = Some(self.step(index));
        self.in_flight = None;
    }

    pub fn mark_failed(&mut self) {
        self.phase = SessionPhase::Failed;
        self.in_flight = None;
    }

    // === Timing ===

    /// Index following `index` in the current play direction (wrapping)
    pub fn step(&self, index: u32) -> u32 {
        let count = self.frame_count();
        if self.reverse {
            if index == 0 { count - 1 } else { (index - 1).min(count - 1) }
        } else {
            (index + 1) % count
        }
    }

    /// Last frame of a pass in the current direction
    pub fn is_final_frame(&self, index: u32) -> bool {
        if self.reverse {
            index == 0
        } else {
            index + 1 >= self.frame_count()
        }
    }

    /// Enough time elapsed since the last advance to show the next frame
    pub fn is_due(&self, now: Instant) -> bool {
        match (self.is_loaded(), self.last_advance) {
            (true, Some(last)) => now.saturating_duration_since(last) >= self.frame_interval,
            _ => false,
        }
    }

    /// Reset the advance clock to `now` quantized down to a frame boundary
    pub fn advance_clock(&mut self, now: Instant) {
        let last = self.last_advance.unwrap_or(now);
        let delta = now.saturating_duration_since(last);
        let interval = self.frame_interval.as_nanos();
        let rem = if interval == 0 { 0 } else { delta.as_nanos() % interval };
        self.last_advance = Some(now - Duration::from_nanos(rem as u64));
    }

    // === Frame pipeline ===

    /// Consume the front frame (driving player only)
    pub fn pop_frame(&mut self) -> Option<DecodedFrame> {
        let frame = self.queue.pop()?;
        self.phase = SessionPhase::Playing;
        self.redirect = None;
        Some(frame)
    }

    /// Fill the queue: serve cached frames directly, otherwise issue one
    /// render request if none is in flight.
    pub fn prefetch(&mut self, sink: &mut dyn RequestSink) {
        if !self.is_loaded() {
            return;
        }
        while self.queue.needs_more() && self.in_flight.is_none() {
            let Some(next) = self.next_request else {
                break;
            };
            if let Some(frame) = self.cache.get(next).cloned() {
                trace!("Session {}: frame {} served from cache", self.id, next);
                self.queue.push(frame);
                self.next_request = Some(self.step(next));
                continue;
            }
            self.send_render(next, sink);
        }
    }

    fn send_render(&mut self, frame_index: u32, sink: &mut dyn RequestSink) {
        let dest = if sink.transfers_buffers() {
            Some(self.take_staging())
        } else {
            None
        };
        trace!(
            "Session {}: request frame {} (request {})",
            self.id, frame_index, self.request_id
        );
        sink.send(
            self.worker,
            WorkerRequest::Render {
                session: self.id,
                request_id: self.request_id,
                frame_index,
                dest,
            },
        );
        self.in_flight = Some(frame_index);
        self.next_request = Some(self.step(frame_index));
    }

    /// Staging buffer for the next request, reallocated if it was not returned
    fn take_staging(&mut self) -> PixelBuf {
        let expected = rgba_len(self.key.width, self.key.height);
        match self.staging.take() {
            Some(buf) if buf.len() == expected => buf,
            _ => {
                trace!("Session {}: allocating staging buffer ({} bytes)", self.id, expected);
                PixelBuf::zeroed(expected)
            }
        }
    }

    fn reclaim(&mut self, buf: PixelBuf) {
        if self.staging.is_none() && buf.len() == rgba_len(self.key.width, self.key.height) {
            self.staging = Some(buf);
        }
    }

    /// Accept a `frame` response. Returns None (and recycles the buffer) if
    /// it belongs to a superseded generation.
    pub fn accept_frame(&mut self, request_id: u64, frame_index: u32, pixels: PixelBuf) -> Option<DecodedFrame> {
        if request_id != self.request_id || !self.is_loaded() {
            trace!(
                "Session {}: dropping stale frame {} (request {} != {})",
                self.id, frame_index, request_id, self.request_id
            );
            self.reclaim(pixels);
            return None;
        }
        if self.in_flight == Some(frame_index) {
            self.in_flight = None;
        }

        let (w, h) = (self.key.width, self.key.height);
        // Staging lent out: copy so the buffer can go back out next request
        let frame = if self.staging.is_none() {
            let frame = pixels.copy_to_frame(frame_index, w, h);
            self.reclaim(pixels);
            frame
        } else {
            pixels.into_frame(frame_index, w, h)
        };
        Some(frame)
    }

    /// Store an accepted frame in cache and queue
    pub fn store_frame(&mut self, frame: &DecodedFrame, manager: &CacheManager) {
        self.cache.offer(self.request_id, frame, manager);
        if !self.queue.push(frame.clone()) {
            trace!("Session {}: queue full, frame {} not queued", self.id, frame.index());
        }
    }

    /// Accept a `failed` response. Returns true if it applied to the current generation.
    pub fn accept_failure(&mut self, request_id: u64, frame_index: Option<u32>, returned: Option<PixelBuf>) -> bool {
        if let Some(buf) = returned {
            self.reclaim(buf);
        }
        if request_id != self.request_id {
            return false;
        }
        match frame_index {
            None => self.mark_failed(),
            Some(idx) => {
                // next_request already points past the failed frame
                if self.in_flight == Some(idx) {
                    self.in_flight = None;
                }
            }
        }
        true
    }

    /// Drop cached frames (cache reset)
    pub fn clear_cache(&mut self, manager: &CacheManager) {
        self.cache.clear(manager);
    }
}
