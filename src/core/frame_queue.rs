//! Bounded lookahead queue of decoded frames waiting to be painted
//!
//! Depth is a few hundred milliseconds of playback (fps / 4): enough to ride
//! out one late tick and one worker round-trip, small enough that segment
//! jumps and loop restarts take effect almost immediately.

use std::collections::VecDeque;

use crate::entities::DecodedFrame;

#[derive(Debug)]
pub struct FrameQueue {
    frames: VecDeque<DecodedFrame>,
    depth: usize,
}

impl FrameQueue {
    pub fn new(depth: usize) -> Self {
        let depth = depth.max(1);
        Self {
            frames: VecDeque::with_capacity(depth),
            depth,
        }
    }

    /// Queue sized for a frame rate (fps / 4, rounded, at least 1)
    pub fn for_fps(fps: f32) -> Self {
        Self::new(Self::depth_for_fps(fps))
    }

    pub fn depth_for_fps(fps: f32) -> usize {
        ((fps / 4.0).round() as usize).max(1)
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// True while below target depth
    pub fn needs_more(&self) -> bool {
        self.frames.len() < self.depth
    }

    /// Append a frame. Refuses (returns false) when already at depth.
    pub fn push(&mut self, frame: DecodedFrame) -> bool {
        if !self.needs_more() {
            return false;
        }
        self.frames.push_back(frame);
        true
    }

    /// Oldest frame without removing it
    pub fn peek(&self) -> Option<&DecodedFrame> {
        self.frames.front()
    }

    /// Remove and return the oldest frame
    pub fn pop(&mut self) -> Option<DecodedFrame> {
        self.frames.pop_front()
    }

    /// Frame indices in queue order (diagnostics, tests)
    pub fn indices(&self) -> Vec<u32> {
        self.frames.iter().map(|f| f.index()).collect()
    }
}
