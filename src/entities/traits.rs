//! Abstract traits for the engine's external collaborators.
//!
//! The engine never decodes vector data itself and never touches a real
//! display. Decoders and output surfaces are plugged in through these traits,
//! so `core` stays independent of any renderer or UI toolkit.

use std::sync::Arc;

use super::frame::DecodedFrame;
use super::source::{AnimationInfo, AnimationSource};

/// One decoder instance, hosted by exactly one decode worker.
///
/// A worker serves many sessions, so `load` returns a separate animation
/// handle per session.
pub trait AnimationDecoder {
    fn load(
        &mut self,
        source: &AnimationSource,
        width: u32,
        height: u32,
    ) -> anyhow::Result<Box<dyn LoadedAnimation>>;
}

/// Animation loaded at a fixed pixel size
pub trait LoadedAnimation {
    fn info(&self) -> AnimationInfo;

    /// Render `frame_index` as RGBA into `dest` (exactly width×height×4 bytes)
    fn render(&mut self, frame_index: u32, dest: &mut [u8]) -> anyhow::Result<()>;
}

/// Builds one decoder per worker. Called on the worker thread.
pub type DecoderFactory =
    Arc<dyn Fn() -> anyhow::Result<Box<dyn AnimationDecoder>> + Send + Sync + 'static>;

/// Output surface of one mounted player (canvas, texture, terminal cell...)
pub trait Surface {
    fn paint(&mut self, frame: &DecodedFrame);

    /// Bounding-rect visibility test. Queried at most once per viewport
    /// recheck interval.
    fn is_in_viewport(&self) -> bool {
        true
    }
}

/// Surface that drops every frame (headless players)
#[derive(Debug, Default)]
pub struct NullSurface;

impl Surface for NullSurface {
    fn paint(&mut self, _frame: &DecodedFrame) {}
}
