//! Engine facade: worker pool + scheduler + capability gate
//!
//! The host owns one [`Engine`] on its UI thread and drives it with
//! [`Engine::tick`] (or the blocking [`Engine::run_for`]). Worker events are
//! pumped into the scheduler at the start of every tick.
//!
//! Pool lifecycle:
//! - `Idle`: nothing spawned yet; the first mount starts the pool lazily
//! - `Running`: workers spawned (readiness may still be pending)
//! - `Terminated`: after [`Engine::shutdown`]; mounts fail with
//!   [`EngineError::ShutDown`] until [`Engine::initialize`] is called again

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, info, trace};

use crate::config::EngineConfig;
use crate::core::cache_man::CacheManager;
use crate::core::capability::Capabilities;
use crate::core::event_bus::{EventBus, SubscriptionId};
use crate::core::player::{MountOptions, Player, PlayerId};
use crate::core::player_events::{FirstFrameEvent, LoopCompleteEvent};
use crate::core::scheduler::{NextTick, Scheduler, SchedulerConfig};
use crate::core::workers::{PoolReadiness, WorkerPool};
use crate::entities::{AnimationDecoder, DecoderFactory, Surface, SwatchDecoder};
use crate::error::EngineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PoolState {
    Idle,
    Running,
    Terminated,
}

pub struct Engine {
    config: EngineConfig,
    factory: DecoderFactory,
    capabilities: Capabilities,
    pool: WorkerPool,
    pool_state: PoolState,
    scheduler: Scheduler,
    /// Per-player callbacks, dropped on unmount
    subscriptions: HashMap<PlayerId, Vec<SubscriptionId>>,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("capabilities", &self.capabilities)
            .field("pool", &self.pool)
            .field("pool_state", &self.pool_state)
            .field("players", &self.scheduler.player_count())
            .field("sessions", &self.scheduler.session_count())
            .finish()
    }
}

impl Engine {
    pub fn new(config: EngineConfig, factory: DecoderFactory) -> Self {
        let config = config.sanitized();
        let capabilities = Capabilities::detect(&config, &factory);
        let cache_manager = Arc::new(CacheManager::new(config.cache_mem_fraction, config.cache_reserve_gb));
        let scheduler = Scheduler::new(SchedulerConfig::from(&config), cache_manager, EventBus::new());
        let pool = WorkerPool::new(capabilities.buffer_transfer);
        Self {
            config,
            factory,
            capabilities,
            pool,
            pool_state: PoolState::Idle,
            scheduler,
            subscriptions: HashMap::new(),
        }
    }

    /// Engine backed by the built-in preview decoder
    pub fn with_swatch(config: EngineConfig) -> Self {
        let factory: DecoderFactory = Arc::new(|| -> anyhow::Result<Box<dyn AnimationDecoder>> {
            Ok(Box::new(SwatchDecoder::new()))
        });
        Self::new(config, factory)
    }

    // === Queries ===

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    /// Capability check result
    pub fn is_supported(&self) -> bool {
        self.capabilities.is_supported()
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn player(&self, id: PlayerId) -> Option<&Player> {
        self.scheduler.player(id)
    }

    pub fn events(&self) -> &EventBus {
        self.scheduler.events()
    }

    pub fn cache_manager(&self) -> &Arc<CacheManager> {
        self.scheduler.cache_manager()
    }

    pub fn worker_count(&self) -> usize {
        self.pool.len()
    }

    /// Readiness latch of the running pool; clones may be waited on from any thread
    pub fn readiness(&self) -> Option<PoolReadiness> {
        self.pool.readiness()
    }

    // === Global lifecycle ===

    /// Start the pool (if needed) and wait until every worker reported ready.
    /// Idempotent; also revives a pool after `shutdown`.
    pub fn initialize(&mut self) -> Result<(), EngineError> {
        self.capabilities.require()?;
        let readiness = self.start_pool();
        let timeout = Duration::from_millis(self.config.ready_timeout_ms);
        if readiness.wait(timeout) {
            Ok(())
        } else {
            let (ready, expected) = readiness.progress();
            Err(EngineError::WorkerStartup { ready, expected })
        }
    }

    fn start_pool(&mut self) -> PoolReadiness {
        let readiness = self.pool.initialize(self.config.worker_count, &self.factory);
        if self.pool_state != PoolState::Running {
            debug!("Pool state {:?} -> Running", self.pool_state);
            self.pool_state = PoolState::Running;
        }
        readiness
    }

    /// Terminate all workers and forget every player and session
    pub fn shutdown(&mut self) {
        self.pool.terminate();
        for (_, subs) in self.subscriptions.drain() {
            for sub in subs {
                self.scheduler.events().unsubscribe(sub);
            }
        }
        self.scheduler.clear();
        self.pool_state = PoolState::Terminated;
        info!("Engine shut down");
    }

    /// Drop every decode session and its cached frames
    pub fn reset_cache(&mut self) {
        self.scheduler.reset_cache(&mut self.pool);
    }

    // === Player API ===

    /// Mount a player. Returns immediately; painting happens on later ticks.
    pub fn mount(&mut self, surface: Box<dyn Surface>, options: MountOptions) -> Result<PlayerId, EngineError> {
        self.capabilities.require()?;
        match self.pool_state {
            PoolState::Terminated => return Err(EngineError::ShutDown),
            PoolState::Idle => {
                self.start_pool();
            }
            PoolState::Running => {}
        }
        self.scheduler.mount(surface, options, &mut self.pool)
    }

    /// Unmount a player and drop its callbacks. The session stays cached.
    pub fn unmount(&mut self, id: PlayerId) -> bool {
        if let Some(subs) = self.subscriptions.remove(&id) {
            for sub in subs {
                self.scheduler.events().unsubscribe(sub);
            }
        }
        self.scheduler.unmount(id)
    }

    pub fn play(&mut self, id: PlayerId) {
        self.scheduler.play(id);
    }

    pub fn pause(&mut self, id: PlayerId) {
        self.scheduler.pause(id);
    }

    pub fn is_paused(&self, id: PlayerId) -> bool {
        self.scheduler.is_paused(id)
    }

    pub fn set_looping(&mut self, id: PlayerId, looping: bool) {
        self.scheduler.set_looping(id, looping);
    }

    /// Play frames `from..=to` (backwards if `from > to`), then pause
    pub fn play_segment(&mut self, id: PlayerId, from: u32, to: u32) {
        self.scheduler.play_segment(id, from, to, &mut self.pool);
    }

    /// Callback for the player's first painted frame
    pub fn on_first_frame<F>(&mut self, id: PlayerId, callback: F) -> SubscriptionId
    where
        F: Fn(&FirstFrameEvent) + Send + Sync + 'static,
    {
        let sub = self.scheduler.events().subscribe::<FirstFrameEvent, _>(move |e| {
            if e.player == id {
                callback(e);
            }
        });
        self.subscriptions.entry(id).or_default().push(sub);
        sub
    }

    /// Callback for every completed pass (loop lap, final frame, segment end)
    pub fn on_loop_complete<F>(&mut self, id: PlayerId, callback: F) -> SubscriptionId
    where
        F: Fn(&LoopCompleteEvent) + Send + Sync + 'static,
    {
        let sub = self.scheduler.events().subscribe::<LoopCompleteEvent, _>(move |e| {
            if e.player == id {
                callback(e);
            }
        });
        self.subscriptions.entry(id).or_default().push(sub);
        sub
    }

    // === Host inputs ===

    pub fn set_focused(&mut self, focused: bool) {
        self.scheduler.set_focused(focused);
    }

    /// New device scale applies to players mounted afterwards
    pub fn set_device_scale(&mut self, scale: f32) {
        self.scheduler.set_device_scale(scale);
    }

    /// Host layout changed: re-run viewport tests on the next tick
    pub fn invalidate_viewports(&mut self) {
        self.scheduler.invalidate_viewports();
    }

    // === Driver ===

    /// Apply all pending worker events. Returns how many were handled.
    pub fn pump(&mut self) -> usize {
        let mut handled = 0;
        while let Some(event) = self.pool.try_recv() {
            self.scheduler.handle_event(event, Instant::now(), &mut self.pool);
            handled += 1;
        }
        handled
    }

    /// Pump worker events, then run one scheduler tick
    pub fn tick(&mut self) -> NextTick {
        self.pump();
        self.scheduler.tick(Instant::now(), &mut self.pool)
    }

    /// Drive the loop on the calling thread for `duration`, sleeping on the
    /// worker event channel between ticks. Returns early once the loop stops.
    /// Returns the number of ticks run.
    pub fn run_for(&mut self, duration: Duration) -> usize {
        let deadline = Instant::now() + duration;
        let mut ticks = 0;
        loop {
            let next = self.tick();
            ticks += 1;
            let wait = match next {
                NextTick::Stop => {
                    trace!("run_for: loop stopped after {} ticks", ticks);
                    return ticks;
                }
                // Headless: no display refresh, use the short timer
                NextTick::Repaint => Duration::from_millis(self.config.fallback_frame_ms),
                NextTick::After(d) => d,
            };
            let wake = (Instant::now() + wait).min(deadline);
            loop {
                let now = Instant::now();
                if now >= wake {
                    break;
                }
                match self.pool.recv_timeout(wake - now) {
                    Some(event) => self.scheduler.handle_event(event, Instant::now(), &mut self.pool),
                    None => break,
                }
            }
            if Instant::now() >= deadline {
                return ticks;
            }
        }
    }
}
