//! Preview decoder: Lottie JSON metadata + deterministic color field
//!
//! Reads only the animation header (`fr`, `ip`, `op`, `w`, `h`, `nm`) and paints
//! every frame as a solid color that drifts with the frame index. Good enough
//! for headless runs, benchmarks and tests; real vector decoders plug in
//! through [`AnimationDecoder`].

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use super::source::{AnimationInfo, AnimationSource};
use super::traits::{AnimationDecoder, LoadedAnimation};

/// Subset of the Lottie root object we care about
#[derive(Debug, Clone, Deserialize)]
struct LottieHeader {
    #[serde(default)]
    nm: Option<String>,
    #[serde(default)]
    ip: f32,
    op: f32,
    fr: f32,
    #[serde(default)]
    w: u32,
    #[serde(default)]
    h: u32,
}

#[derive(Debug, Default)]
pub struct SwatchDecoder;

impl SwatchDecoder {
    pub fn new() -> Self {
        Self
    }
}

impl AnimationDecoder for SwatchDecoder {
    fn load(
        &mut self,
        source: &AnimationSource,
        width: u32,
        height: u32,
    ) -> Result<Box<dyn LoadedAnimation>> {
        let json = match source {
            AnimationSource::File(path) => std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read animation: {}", path.display()))?,
            AnimationSource::Inline { data, .. } => data.to_string(),
        };
        let header: LottieHeader = serde_json::from_str(&json)
            .with_context(|| format!("Invalid Lottie JSON: {}", source.reference()))?;

        if !(header.fr > 0.0) {
            bail!("Invalid frame rate {} in {}", header.fr, source.reference());
        }
        let frame_count = (header.op - header.ip).round();
        if frame_count < 1.0 {
            bail!("Animation {} has no frames (ip={}, op={})", source.reference(), header.ip, header.op);
        }

        let seed = name_seed(header.nm.as_deref().unwrap_or(&source.reference()));
        log::trace!(
            "Swatch load: {} native {}x{} -> {}x{}, {} frames @ {} fps",
            source.reference(),
            header.w,
            header.h,
            width,
            height,
            frame_count,
            header.fr
        );

        Ok(Box::new(Swatch {
            info: AnimationInfo {
                frame_count: frame_count as u32,
                fps: header.fr,
            },
            width,
            height,
            seed,
        }))
    }
}

struct Swatch {
    info: AnimationInfo,
    width: u32,
    height: u32,
    seed: [u8; 3],
}

impl LoadedAnimation for Swatch {
    fn info(&self) -> AnimationInfo {
        self.info
    }

    fn render(&mut self, frame_index: u32, dest: &mut [u8]) -> Result<()> {
        if frame_index >= self.info.frame_count {
            bail!("Frame {} out of range (0..{})", frame_index, self.info.frame_count);
        }
        let expected = self.width as usize * self.height as usize * 4;
        if dest.len() != expected {
            bail!("Destination is {} bytes, expected {}", dest.len(), expected);
        }

        let phase = (frame_index as u64 * 255 / self.info.frame_count.max(1) as u64) as u8;
        let rgba = [
            self.seed[0].wrapping_add(phase),
            self.seed[1],
            self.seed[2].wrapping_sub(phase),
            255,
        ];
        for px in dest.chunks_exact_mut(4) {
            px.copy_from_slice(&rgba);
        }
        Ok(())
    }
}

/// FNV-1a folded into an RGB triple
fn name_seed(name: &str) -> [u8; 3] {
    let mut hash: u32 = 0x811c9dc5;
    for b in name.bytes() {
        hash ^= b as u32;
        hash = hash.wrapping_mul(0x01000193);
    }
    [(hash >> 16) as u8, (hash >> 8) as u8, hash as u8]
}
