//! Mounted player: one on-screen instance of an animation
//!
//! **Architecture**: Player does NOT own frames or timing. It holds UI-facing
//! state (paused, loop, segment, viewport membership) plus its output surface,
//! and points at a decode session by key. The scheduler decides when it
//! paints and hands it the frame.
//!
//! **Used by**: Scheduler (owns all players, single writer)
//!
//! # Paint eligibility
//!
//! A player paints on a tick only if it is not paused, is inside its viewport
//! (or overrides the test), and the host has focus unless the player opted
//! out of that check. The very first frame ignores all three so a paused or
//! off-screen sticker still shows a still image.

use std::fmt;

use log::trace;

use crate::entities::{AnimationSource, DecodedFrame, Segment, SessionKey, Surface};

/// Monotonic player id, unique per mount
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PlayerId(pub u64);

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "p{}", self.0)
    }
}

/// Viewport membership test
pub enum ViewportTest {
    /// Ask the surface for its bounding-rect visibility
    Surface,
    /// Always treated as visible
    AlwaysVisible,
    /// Caller-supplied predicate
    Custom(Box<dyn Fn() -> bool>),
}

impl fmt::Debug for ViewportTest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ViewportTest::Surface => write!(f, "Surface"),
            ViewportTest::AlwaysVisible => write!(f, "AlwaysVisible"),
            ViewportTest::Custom(_) => write!(f, "Custom(..)"),
        }
    }
}

/// Options recognized by `mount`
#[derive(Debug)]
pub struct MountOptions {
    pub source: AnimationSource,
    /// Display size in logical pixels (scaled by device scale on mount)
    pub width: f32,
    pub height: f32,
    pub autoplay: bool,
    pub looping: bool,
    pub play_without_focus: bool,
    pub viewport: ViewportTest,
    /// Session retention divisor; engine default when None
    pub caching_divisor: Option<u32>,
    /// Segment to start with
    pub segment: Option<Segment>,
}

impl MountOptions {
    pub fn new(source: impl Into<AnimationSource>, width: f32, height: f32) -> Self {
        Self {
            source: source.into(),
            width,
            height,
            autoplay: true,
            looping: true,
            play_without_focus: false,
            viewport: ViewportTest::Surface,
            caching_divisor: None,
            segment: None,
        }
    }

    pub fn autoplay(mut self, autoplay: bool) -> Self {
        self.autoplay = autoplay;
        self
    }

    pub fn looping(mut self, looping: bool) -> Self {
        self.looping = looping;
        self
    }

    pub fn play_without_focus(mut self, enabled: bool) -> Self {
        self.play_without_focus = enabled;
        self
    }

    pub fn viewport(mut self, viewport: ViewportTest) -> Self {
        self.viewport = viewport;
        self
    }

    pub fn caching_divisor(mut self, divisor: u32) -> Self {
        self.caching_divisor = Some(divisor);
        self
    }

    pub fn segment(mut self, from: u32, to: u32) -> Self {
        self.segment = Some(Segment::new(from, to));
        self
    }
}

/// What a paint produced (turned into events by the scheduler)
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PaintOutcome {
    pub first_frame: bool,
    pub loop_complete: bool,
}

pub struct Player {
    id: PlayerId,
    key: SessionKey,
    source: AnimationSource,
    divisor: u32,
    surface: Box<dyn Surface>,
    paused: bool,
    looping: bool,
    play_without_focus: bool,
    viewport: ViewportTest,
    segment: Option<Segment>,
    in_viewport: bool,
    painted_first_frame: bool,
    last_painted: Option<u32>,
}

impl fmt::Debug for Player {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Player")
            .field("id", &self.id)
            .field("key", &self.key)
            .field("paused", &self.paused)
            .field("looping", &self.looping)
            .field("segment", &self.segment)
            .field("in_viewport", &self.in_viewport)
            .field("last_painted", &self.last_painted)
            .finish()
    }
}

impl Player {
    pub fn new(
        id: PlayerId,
        key: SessionKey,
        divisor: u32,
        surface: Box<dyn Surface>,
        options: MountOptions,
    ) -> Self {
        let mut player = Self {
            id,
            key,
            source: options.source,
            divisor,
            surface,
            paused: !options.autoplay,
            looping: options.looping,
            play_without_focus: options.play_without_focus,
            viewport: options.viewport,
            segment: options.segment,
            in_viewport: true,
            painted_first_frame: false,
            last_painted: None,
        };
        player.refresh_viewport();
        player
    }

    // === Accessors ===

    pub fn id(&self) -> PlayerId {
        self.id
    }

    pub fn key(&self) -> &SessionKey {
        &self.key
    }

    pub fn source(&self) -> &AnimationSource {
        &self.source
    }

    pub fn divisor(&self) -> u32 {
        self.divisor
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn segment(&self) -> Option<Segment> {
        self.segment
    }

    pub fn in_viewport(&self) -> bool {
        self.in_viewport
    }

    pub fn has_painted_first_frame(&self) -> bool {
        self.painted_first_frame
    }

    pub fn last_painted(&self) -> Option<u32> {
        self.last_painted
    }

    // === Controls ===

    pub fn play(&mut self) {
        self.paused = false;
    }

    pub fn pause(&mut self) {
        self.paused = true;
    }

    pub fn set_looping(&mut self, looping: bool) {
        self.looping = looping;
    }

    pub fn set_segment(&mut self, segment: Segment) {
        self.segment = Some(segment);
        self.paused = false;
    }

    /// Fit a segment requested before load to the real frame count
    pub fn clamp_segment(&mut self, frame_count: u32) {
        self.segment = self.segment.map(|s| s.clamped(frame_count));
    }

    /// Re-run the viewport test (bounding-rect query or predicate)
    pub fn refresh_viewport(&mut self) {
        self.in_viewport = match &self.viewport {
            ViewportTest::Surface => self.surface.is_in_viewport(),
            ViewportTest::AlwaysVisible => true,
            ViewportTest::Custom(test) => test(),
        };
    }

    /// Eligible to paint on a tick
    pub fn can_paint(&self, focused: bool) -> bool {
        !self.paused && self.in_viewport && (focused || self.play_without_focus)
    }

    /// Paint a frame consumed by the scheduler. `is_final` marks the last
    /// frame of a pass in the session's direction.
    pub fn paint(&mut self, frame: &DecodedFrame, is_final: bool) -> PaintOutcome {
        let idx = frame.index();
        if self.segment.is_some_and(|s| s.is_end(idx) && s.to != idx) {
            // End frame was skipped; stay on the last frame shown
            trace!("Player {} passed segment end at {}", self.id, idx);
            self.segment = None;
            self.paused = true;
            return PaintOutcome {
                first_frame: false,
                loop_complete: true,
            };
        }
        self.surface.paint(frame);
        self.last_painted = Some(idx);

        let mut outcome = PaintOutcome {
            first_frame: !self.painted_first_frame,
            loop_complete: false,
        };
        self.painted_first_frame = true;

        if self.segment.is_some_and(|s| s.to == idx) {
            trace!("Player {} reached segment end at {}", self.id, idx);
            self.segment = None;
            self.paused = true;
            outcome.loop_complete = true;
        } else if is_final {
            outcome.loop_complete = true;
            if !self.looping {
                trace!("Player {} finished at frame {}", self.id, idx);
                self.paused = true;
            }
        }
        outcome
    }

    /// Paint a still first frame if nothing was painted yet. Returns true if painted.
    pub fn paint_first(&mut self, frame: &DecodedFrame) -> bool {
        if self.painted_first_frame {
            return false;
        }
        self.surface.paint(frame);
        self.last_painted = Some(frame.index());
        self.painted_first_frame = true;
        true
    }
}
