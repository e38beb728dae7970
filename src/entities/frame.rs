//! Raw RGBA pixel buffers moving between the control thread and decode workers
//!
//! **Why**: Workers and the scheduler never share memory. A buffer is either
//! owned by the session (staging, waiting for the next request), owned by a
//! worker (being rendered into), or frozen into a [`DecodedFrame`] that the
//! cache, the queue and every painted surface share read-only.
//!
//! # Ownership
//!
//! - `PixelBuf`: move-only, no `Clone`. Sending it in a request moves it out of
//!   the session; the worker moves it back inside the response. A buffer that
//!   is "in flight" simply does not exist on the caller side, so there is no
//!   detached/zero-length state to recover from.
//! - `DecodedFrame`: immutable, cheap to clone (`Arc<[u8]>`).

use std::fmt;
use std::sync::Arc;

/// Bytes per RGBA pixel
pub const BYTES_PER_PIXEL: usize = 4;

/// Byte length of an RGBA buffer for the given size
pub fn rgba_len(width: u32, height: u32) -> usize {
    width as usize * height as usize * BYTES_PER_PIXEL
}

/// Move-only RGBA pixel buffer
pub struct PixelBuf {
    data: Vec<u8>,
}

impl PixelBuf {
    /// Allocate a zero-filled buffer of `len` bytes
    pub fn zeroed(len: usize) -> Self {
        Self { data: vec![0u8; len] }
    }

    /// Allocate a zero-filled buffer sized for `width`×`height` RGBA
    pub fn for_size(width: u32, height: u32) -> Self {
        Self::zeroed(rgba_len(width, height))
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Freeze into a shared frame without copying (buffer is consumed)
    pub fn into_frame(self, index: u32, width: u32, height: u32) -> DecodedFrame {
        DecodedFrame {
            index,
            width,
            height,
            pixels: Arc::from(self.data.into_boxed_slice()),
        }
    }

    /// Copy contents into a shared frame, keeping the buffer for reuse
    pub fn copy_to_frame(&self, index: u32, width: u32, height: u32) -> DecodedFrame {
        DecodedFrame {
            index,
            width,
            height,
            pixels: Arc::from(self.data.as_slice()),
        }
    }
}

impl fmt::Debug for PixelBuf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PixelBuf").field("len", &self.data.len()).finish()
    }
}

/// Decoded frame shared between cache, queue and surfaces
#[derive(Clone)]
pub struct DecodedFrame {
    index: u32,
    width: u32,
    height: u32,
    pixels: Arc<[u8]>,
}

impl DecodedFrame {
    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// Memory held by the pixel data (bytes)
    pub fn mem(&self) -> usize {
        self.pixels.len()
    }

    /// True if both frames share the same pixel allocation
    pub fn same_pixels(&self, other: &DecodedFrame) -> bool {
        Arc::ptr_eq(&self.pixels, &other.pixels)
    }
}

impl fmt::Debug for DecodedFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecodedFrame")
            .field("index", &self.index)
            .field("size", &format_args!("{}x{}", self.width, self.height))
            .finish()
    }
}
