//! Core engine modules - workers, cache, queue, sessions, players, scheduler
//!
//! These modules form the playback engine, independent of any UI toolkit.

pub mod cache_man;
pub mod capability;
pub mod engine;
pub mod event_bus;
pub mod frame_cache;
pub mod frame_queue;
pub mod player;
pub mod player_events;
pub mod scheduler;
pub mod session;
pub mod workers;

// Re-exports for convenience
pub use cache_man::CacheManager;
pub use capability::Capabilities;
pub use engine::Engine;
pub use event_bus::{EventBus, SubscriptionId};
pub use frame_cache::{CacheStats, FrameCache};
pub use frame_queue::FrameQueue;
pub use player::{MountOptions, Player, PlayerId, ViewportTest};
pub use player_events::{FirstFrameEvent, LoopCompleteEvent};
pub use scheduler::{NextTick, Scheduler, SchedulerConfig};
pub use session::{DecodeSession, SessionPhase};
pub use workers::{PoolReadiness, WorkerPool};
