//! Animation identity: where an animation comes from and at what pixel size it is decoded.

use std::fmt;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::path::PathBuf;
use std::sync::Arc;

/// Animation description handed to the decoder
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AnimationSource {
    /// File on disk (or any reference the decoder knows how to resolve)
    File(PathBuf),
    /// Inline animation data, identified by a caller-chosen name
    Inline { name: String, data: Arc<str> },
}

impl AnimationSource {
    pub fn inline(name: impl Into<String>, data: impl Into<Arc<str>>) -> Self {
        AnimationSource::Inline {
            name: name.into(),
            data: data.into(),
        }
    }

    /// Stable reference string used as part of the session key. Inline
    /// sources include a content hash so equal names never alias.
    pub fn reference(&self) -> String {
        match self {
            AnimationSource::File(path) => path.display().to_string(),
            AnimationSource::Inline { name, data } => {
                let mut hasher = DefaultHasher::new();
                data.hash(&mut hasher);
                format!("inline:{}#{}:{:016x}", name, data.len(), hasher.finish())
            }
        }
    }
}

impl From<PathBuf> for AnimationSource {
    fn from(path: PathBuf) -> Self {
        AnimationSource::File(path)
    }
}

impl From<&str> for AnimationSource {
    fn from(path: &str) -> Self {
        AnimationSource::File(PathBuf::from(path))
    }
}

/// Decode session key: one animation at one pixel size
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SessionKey {
    pub reference: String,
    pub width: u32,
    pub height: u32,
}

impl SessionKey {
    pub fn new(source: &AnimationSource, width: u32, height: u32) -> Self {
        Self {
            reference: source.reference(),
            width,
            height,
        }
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}x{}", self.reference, self.width, self.height)
    }
}

/// Metadata reported by the decoder after load
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AnimationInfo {
    pub frame_count: u32,
    pub fps: f32,
}

/// Playback segment bounds (inclusive). `from > to` plays backwards.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Segment {
    pub from: u32,
    pub to: u32,
}

impl Segment {
    pub fn new(from: u32, to: u32) -> Self {
        Self { from, to }
    }

    pub fn is_reverse(&self) -> bool {
        self.from > self.to
    }

    /// Index lies between the bounds (inclusive, either direction)
    pub fn contains(&self, index: u32) -> bool {
        let (lo, hi) = if self.is_reverse() { (self.to, self.from) } else { (self.from, self.to) };
        (lo..=hi).contains(&index)
    }

    /// `index` is the end frame, or playback already left the segment
    /// because the end frame was skipped
    pub fn is_end(&self, index: u32) -> bool {
        index == self.to || !self.contains(index)
    }

    /// Clamp both bounds to the last valid frame index
    pub fn clamped(self, frame_count: u32) -> Self {
        let last = frame_count.saturating_sub(1);
        Self {
            from: self.from.min(last),
            to: self.to.min(last),
        }
    }
}
