//! Host capability check
//!
//! Checked once when the engine is created. If any required primitive is
//! missing, every mount is refused with [`EngineError::Unsupported`] and the
//! caller is expected to show a static preview instead.

use log::{debug, warn};

use crate::config::EngineConfig;
use crate::entities::{DecoderFactory, PixelBuf};
use crate::error::EngineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    /// Background threads can be spawned
    pub parallel_workers: bool,
    /// Decoder factory produced a decoder
    pub decoder_available: bool,
    /// Raw RGBA buffers can be allocated
    pub raw_pixel_buffers: bool,
    /// Destination buffers are lent to workers instead of copied back
    pub buffer_transfer: bool,
    /// Host offers a repaint-synchronized callback
    pub repaint_sync: bool,
}

impl Capabilities {
    /// Check the current process
    pub fn detect(config: &EngineConfig, factory: &DecoderFactory) -> Self {
        let parallel_workers = num_cpus::get() >= 1 && spawn_test_thread();
        let decoder_available = match factory() {
            Ok(_) => true,
            Err(e) => {
                warn!("Decoder unavailable: {:#}", e);
                false
            }
        };
        let raw_pixel_buffers = PixelBuf::for_size(1, 1).len() == 4;

        let caps = Self {
            parallel_workers,
            decoder_available,
            raw_pixel_buffers,
            buffer_transfer: config.transfer_buffers,
            repaint_sync: config.repaint_sync,
        };
        debug!("Capabilities: {:?}", caps);
        caps
    }

    /// Everything required for animated playback is present
    pub fn is_supported(&self) -> bool {
        self.parallel_workers && self.decoder_available && self.raw_pixel_buffers
    }

    /// `Ok` if supported, otherwise the first missing primitive
    pub fn require(&self) -> Result<(), EngineError> {
        let missing = if !self.parallel_workers {
            "parallel workers"
        } else if !self.decoder_available {
            "animation decoder"
        } else if !self.raw_pixel_buffers {
            "raw pixel buffers"
        } else {
            return Ok(());
        };
        Err(EngineError::Unsupported(missing.to_string()))
    }
}

fn spawn_test_thread() -> bool {
    std::thread::Builder::new()
        .name("stickerplay-check".into())
        .spawn(|| ())
        .map(|h| h.join().is_ok())
        .unwrap_or(false)
}
