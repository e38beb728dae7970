//! Engine settings (`stickerplay.json`) and path helpers

use std::path::Path;

use anyhow::{Context, Result};
use log::{debug, warn};
use serde::{Deserialize, Serialize};

pub use crate::paths::{config_file, data_file, ensure_dirs, PathConfig};

/// Settings file name, resolved through [`PathConfig`]
pub const CONFIG_FILE: &str = "stickerplay.json";

/// Tunables of the playback engine. Every field is optional in the file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Decode threads in the pool
    pub worker_count: usize,
    /// Default cache retention divisor for sessions
    pub caching_divisor: u32,
    pub device_scale: f32,
    /// Upper bound applied to `device_scale` when sizing sessions
    pub max_device_scale: f32,
    /// A paint within this window keeps the fast cadence
    pub active_window_ms: u64,
    /// Short timer used when repaint-synchronized callbacks are unavailable
    pub fallback_frame_ms: u64,
    /// Back-off timer when nothing painted recently
    pub idle_interval_ms: u64,
    pub viewport_recheck_ms: u64,
    /// How long `initialize` waits for every worker to report ready
    pub ready_timeout_ms: u64,
    /// Lend staging buffers to workers instead of copying fresh ones
    pub transfer_buffers: bool,
    pub repaint_sync: bool,
    /// Fraction of available memory the frame caches may hold
    pub cache_mem_fraction: f64,
    /// Memory kept free for the rest of the system
    pub cache_reserve_gb: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            worker_count: crate::core::workers::DEFAULT_WORKER_COUNT,
            caching_divisor: crate::core::frame_cache::DEFAULT_CACHING_DIVISOR,
            device_scale: 1.0,
            max_device_scale: 2.0,
            active_window_ms: 100,
            fallback_frame_ms: 16,
            idle_interval_ms: 500,
            viewport_recheck_ms: 1000,
            ready_timeout_ms: 5000,
            transfer_buffers: true,
            repaint_sync: false,
            cache_mem_fraction: 0.25,
            cache_reserve_gb: 1.0,
        }
    }
}

impl EngineConfig {
    /// Read settings from `path`, falling back to defaults if it does not exist
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!("No settings at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings: {}", path.display()))?;
        let config: Self = serde_json::from_str(&json)
            .with_context(|| format!("Failed to parse settings: {}", path.display()))?;
        Ok(config.sanitized())
    }

    /// Read `stickerplay.json` from the resolved config directory
    pub fn load_from(paths: &PathConfig) -> Result<Self> {
        Self::load(&config_file(CONFIG_FILE, paths))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self).context("Failed to serialize settings")?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write settings: {}", path.display()))
    }

    /// Clamp out-of-range values
    pub fn sanitized(mut self) -> Self {
        if self.worker_count == 0 {
            warn!("worker_count 0 is invalid, using 1");
            self.worker_count = 1;
        }
        self.caching_divisor = self.caching_divisor.max(1);
        if !(self.max_device_scale >= 1.0) {
            self.max_device_scale = 1.0;
        }
        if !(self.device_scale > 0.0) {
            self.device_scale = 1.0;
        }
        if !(self.cache_mem_fraction > 0.0 && self.cache_mem_fraction <= 1.0) {
            warn!("cache_mem_fraction {} out of range, using default", self.cache_mem_fraction);
            self.cache_mem_fraction = Self::default().cache_mem_fraction;
        }
        self.cache_reserve_gb = self.cache_reserve_gb.max(0.0);
        self.fallback_frame_ms = self.fallback_frame_ms.max(1);
        self.idle_interval_ms = self.idle_interval_ms.max(1);
        self
    }
}
