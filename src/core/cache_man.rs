//! Global memory accounting for decoded-frame caches
//!
//! **Why**: Every decode session owns its own sparse frame cache. Sessions are
//! never destroyed by unmount, so their caches need one shared budget to stay
//! bounded on machines with many distinct stickers.
//!
//! **Used by**: Scheduler (owns one), FrameCache (reports inserts/frees)

use log::{debug, info};
use std::sync::atomic::{AtomicUsize, Ordering};
use sysinfo::System;

/// Global cache memory manager
///
/// Tracks bytes held across all frame caches. While over the limit, caches
/// stop retaining new frames (frame 0 is exempt).
#[derive(Debug)]
pub struct CacheManager {
    /// Atomically tracked memory usage (bytes)
    memory_usage: AtomicUsize,
    /// Maximum allowed memory (bytes)
    max_memory_bytes: AtomicUsize,
}

impl CacheManager {
    /// Create cache manager with a limit derived from available memory
    ///
    /// # Arguments
    ///
    /// * `mem_fraction` - Fraction of available memory (0.0-1.0, e.g. 0.25 = 25%)
    /// * `reserve_gb` - Reserve memory for the rest of the app (GB)
    pub fn new(mem_fraction: f64, reserve_gb: f64) -> Self {
        let max_memory_bytes = Self::compute_limit(mem_fraction, reserve_gb);
        info!(
            "CacheManager init: limit={} MB ({}% of available after {} GB reserve)",
            max_memory_bytes / 1024 / 1024,
            (mem_fraction * 100.0) as u32,
            reserve_gb
        );
        Self::with_limit(max_memory_bytes)
    }

    /// Create cache manager with a fixed byte limit
    pub fn with_limit(max_memory_bytes: usize) -> Self {
        Self {
            memory_usage: AtomicUsize::new(0),
            max_memory_bytes: AtomicUsize::new(max_memory_bytes),
        }
    }

    /// No limit (tests, embedders doing their own accounting)
    pub fn unbounded() -> Self {
        Self::with_limit(usize::MAX)
    }

    fn compute_limit(mem_fraction: f64, reserve_gb: f64) -> usize {
        let mut sys = System::new();
        sys.refresh_memory();

        let available = sys.available_memory() as usize;
        let reserve = (reserve_gb * 1024.0 * 1024.0 * 1024.0) as usize;
        let usable = available.saturating_sub(reserve);
        (usable as f64 * mem_fraction.clamp(0.0, 1.0)) as usize
    }

    /// Check if memory limit exceeded
    pub fn check_memory_limit(&self) -> bool {
        self.memory_usage.load(Ordering::Relaxed) > self.max_memory_bytes.load(Ordering::Relaxed)
    }

    /// Get memory statistics (usage, limit)
    pub fn mem(&self) -> (usize, usize) {
        let usage = self.memory_usage.load(Ordering::Relaxed);
        let limit = self.max_memory_bytes.load(Ordering::Relaxed);
        (usage, limit)
    }

    /// Get memory usage percentage (0.0-1.0)
    pub fn mem_usage_fraction(&self) -> f64 {
        let (usage, limit) = self.mem();
        if limit == 0 {
            0.0
        } else {
            usage as f64 / limit as f64
        }
    }

    /// Add memory usage
    pub fn add_memory(&self, bytes: usize) {
        let new_usage = self.memory_usage.fetch_add(bytes, Ordering::Relaxed) + bytes;
        let limit = self.max_memory_bytes.load(Ordering::Relaxed);
        if new_usage > limit {
            debug!(
                "Frame cache memory limit exceeded: {} MB / {} MB",
                new_usage / 1024 / 1024,
                limit / 1024 / 1024
            );
        }
    }

    /// Free memory usage (saturating subtraction to prevent underflow)
    pub fn free_memory(&self, bytes: usize) {
        loop {
            let current = self.memory_usage.load(Ordering::Relaxed);
            let new_val = current.saturating_sub(bytes);
            if self
                .memory_usage
                .compare_exchange_weak(current, new_val, Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
            {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_manager_creation() {
        let manager = CacheManager::new(0.5, 1.0);
        let (usage, _limit) = manager.mem();
        assert_eq!(usage, 0);
    }

    #[test]
    fn test_memory_tracking() {
        let manager = CacheManager::unbounded();

        manager.add_memory(1024 * 1024); // 1 MB
        let (usage, _) = manager.mem();
        assert_eq!(usage, 1024 * 1024);

        manager.free_memory(512 * 1024); // Free 0.5 MB
        let (usage, _) = manager.mem();
        assert_eq!(usage, 512 * 1024);

        manager.free_memory(10 * 1024 * 1024);
        assert_eq!(manager.mem().0, 0);
    }

    #[test]
    fn test_limit_check() {
        let manager = CacheManager::with_limit(1000);
        manager.add_memory(1000);
        assert!(!manager.check_memory_limit());
        manager.add_memory(1);
        assert!(manager.check_memory_limit());
        assert!(manager.mem_usage_fraction() > 1.0);
    }
}
