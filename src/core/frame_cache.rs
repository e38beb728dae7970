//! Per-session sparse frame cache
//!
//! Structure: HashMap<u32, DecodedFrame> (frame_idx -> frame)
//!
//! Retention rule, applied to every decoded frame:
//! - frame 0 is always kept (instant first paint for newly attached players)
//! - any other frame is kept when `(request_id + frame_idx) % divisor != 0`
//!   and the global [`CacheManager`] budget is not exhausted
//!
//! With the default divisor of 3 about two thirds of decoded frames stay
//! resident, shifting with each request generation.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use log::trace;

use crate::core::cache_man::CacheManager;
use crate::entities::DecodedFrame;

/// Default caching retention divisor
pub const DEFAULT_CACHING_DIVISOR: u32 = 3;

/// Cache statistics for monitoring decode-avoidance
#[derive(Debug, Default)]
pub struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
}

impl CacheStats {
    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn hit_rate(&self) -> f64 {
        let total = self.hits() + self.misses();
        if total == 0 { 0.0 } else { self.hits() as f64 / total as f64 }
    }
}

#[derive(Debug)]
pub struct FrameCache {
    frames: HashMap<u32, DecodedFrame>,
    divisor: u32,
    stats: CacheStats,
}

impl FrameCache {
    /// Create an empty cache. A divisor of 0 is treated as 1 (keep frame 0 only).
    pub fn new(divisor: u32) -> Self {
        Self {
            frames: HashMap::new(),
            divisor: divisor.max(1),
            stats: CacheStats::default(),
        }
    }

    pub fn divisor(&self) -> u32 {
        self.divisor
    }

    /// Retention rule (memory budget aside)
    pub fn should_retain(&self, request_id: u64, frame_idx: u32) -> bool {
        frame_idx == 0 || (request_id.wrapping_add(frame_idx as u64)) % self.divisor as u64 != 0
    }

    /// Offer a freshly decoded frame. Returns true if it was retained.
    pub fn offer(&mut self, request_id: u64, frame: &DecodedFrame, manager: &CacheManager) -> bool {
        let idx = frame.index();
        if self.frames.contains_key(&idx) || !self.should_retain(request_id, idx) {
            return false;
        }
        if idx != 0 && manager.check_memory_limit() {
            trace!("Frame {} not cached: memory limit", idx);
            return false;
        }
        manager.add_memory(frame.mem());
        self.frames.insert(idx, frame.clone());
        true
    }

    /// Look up a frame, recording hit/miss
    pub fn get(&self, frame_idx: u32) -> Option<&DecodedFrame> {
        let result = self.frames.get(&frame_idx);
        if result.is_some() {
            self.stats.record_hit();
        } else {
            self.stats.record_miss();
        }
        result
    }

    /// Check presence without touching statistics
    pub fn contains(&self, frame_idx: u32) -> bool {
        self.frames.contains_key(&frame_idx)
    }

    pub fn first_frame(&self) -> Option<&DecodedFrame> {
        self.frames.get(&0)
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Bytes held by cached pixels
    pub fn mem(&self) -> usize {
        self.frames.values().map(|f| f.mem()).sum()
    }

    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    /// Drop every frame and return their bytes to the manager
    pub fn clear(&mut self, manager: &CacheManager) {
        manager.free_memory(self.mem());
        self.frames.clear();
    }
}
