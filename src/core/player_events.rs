//! Player lifecycle events.

use super::player::PlayerId;

/// First frame painted on the player's surface
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FirstFrameEvent {
    pub player: PlayerId,
}

/// A full pass completed: last frame of a non-looping pass, each lap of a
/// looping one, or the end of a segment.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LoopCompleteEvent {
    pub player: PlayerId,
    pub frame: u32,
}
