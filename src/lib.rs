//! stickerplay - animated sticker playback engine
//!
//! Decodes many animations on a small worker pool, shares decoded frames
//! between every on-screen player of the same animation and size, and drives
//! all of them from a single scheduler tick.

// Core engine (workers, sessions, players, scheduler)
pub mod core;

pub mod cli;
pub mod config;
pub mod entities;
pub mod error;
pub mod paths;

// Re-export commonly used types from core
pub use core::engine::Engine;
pub use core::event_bus::{downcast_event, BoxedEvent, EventBus, SubscriptionId};
pub use core::player::{MountOptions, PlayerId, ViewportTest};
pub use core::player_events::{FirstFrameEvent, LoopCompleteEvent};
pub use core::scheduler::NextTick;

// Re-export entities
pub use config::EngineConfig;
pub use entities::{AnimationDecoder, AnimationSource, DecodedFrame, LoadedAnimation, Surface};
pub use error::EngineError;
