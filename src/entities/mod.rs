//! Entities module - plain data and collaborator traits shared by the engine
//!
//! Nothing here owns threads or schedules work; `core` builds on these types:
//! - `frame`: move-only pixel buffers and shared decoded frames
//! - `source`: animation sources, session keys, segments
//! - `messages`: decode worker request/event protocol
//! - `traits`: decoder and surface seams
//! - `swatch`: built-in preview decoder for Lottie JSON metadata

pub mod frame;
pub mod messages;
pub mod source;
pub mod swatch;
pub mod traits;

pub use frame::{DecodedFrame, PixelBuf};
pub use messages::{RequestSink, SessionId, WorkerEvent, WorkerRequest};
pub use source::{AnimationInfo, AnimationSource, Segment, SessionKey};
pub use swatch::SwatchDecoder;
pub use traits::{AnimationDecoder, DecoderFactory, LoadedAnimation, NullSurface, Surface};
