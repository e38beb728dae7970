//! Render scheduler: the single control-thread loop driving every player
//!
//! **Why**: Hundreds of stickers can be on screen at once. Instead of one timer
//! per sticker, one tick walks every decode session, advances those that are
//! due, paints their frame to every player sharing it and keeps the lookahead
//! queues topped up.
//!
//! **Architecture**: Scheduler owns the player table and the session table
//! and is the only writer of both. Worker requests go out through a
//! [`RequestSink`]; worker events come back through [`Scheduler::handle_event`].
//! Time is always passed in, so the loop is fully deterministic under test.
//!
//! # Tick
//!
//! For every session key with live players:
//! 1. Skip unless `now - last_advance >= frame_interval`
//! 2. Eligible players = not paused, in viewport, focus (or opted out)
//! 3. Driving player = lowest id among eligible; none eligible -> no advance
//! 4. Driver pops the front frame; every eligible player paints it
//! 5. Clock is reset to `now` quantized to the frame interval, queue refilled
//!
//! # Cadence
//!
//! - painted within `active_window`: next display refresh (or a short timer)
//! - idle: long timer
//! - no players: loop stops, restarts on the next mount
//!
//! Viewport membership is re-evaluated for all players at most once per
//! `viewport_recheck` (shared timestamp, not per player).

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use indexmap::IndexMap;
use log::{debug, info, trace, warn};

use crate::config::EngineConfig;
use crate::core::cache_man::CacheManager;
use crate::core::event_bus::EventBus;
use crate::core::player::{MountOptions, PaintOutcome, Player, PlayerId};
use crate::core::player_events::{FirstFrameEvent, LoopCompleteEvent};
use crate::core::session::{DecodeSession, SessionPhase};
use crate::entities::{
    AnimationInfo, AnimationSource, PixelBuf, RequestSink, Segment, SessionId, SessionKey,
    Surface, WorkerEvent, WorkerRequest,
};
use crate::error::EngineError;

/// When the host should call `tick` next
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextTick {
    /// Next display refresh (repaint-synchronized callback)
    Repaint,
    /// Plain timer
    After(Duration),
    /// No players: loop stopped until the next mount
    Stop,
}

/// Timing knobs of the loop (from [`EngineConfig`])
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub caching_divisor: u32,
    pub device_scale: f32,
    pub max_device_scale: f32,
    pub active_window: Duration,
    pub fallback_frame: Duration,
    pub idle_interval: Duration,
    pub viewport_recheck: Duration,
    pub repaint_sync: bool,
}

impl From<&EngineConfig> for SchedulerConfig {
    fn from(config: &EngineConfig) -> Self {
        Self {
            caching_divisor: config.caching_divisor.max(1),
            device_scale: config.device_scale,
            max_device_scale: config.max_device_scale,
            active_window: Duration::from_millis(config.active_window_ms),
            fallback_frame: Duration::from_millis(config.fallback_frame_ms),
            idle_interval: Duration::from_millis(config.idle_interval_ms),
            viewport_recheck: Duration::from_millis(config.viewport_recheck_ms),
            repaint_sync: config.repaint_sync,
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self::from(&EngineConfig::default())
    }
}

#[derive(Debug)]
pub struct Scheduler {
    config: SchedulerConfig,
    players: BTreeMap<PlayerId, Player>,
    /// Sessions in creation order
    sessions: IndexMap<SessionId, DecodeSession>,
    keys: HashMap<SessionKey, SessionId>,
    next_player_id: u64,
    next_session_id: u64,
    next_request_id: u64,
    focused: bool,
    running: bool,
    last_paint: Option<Instant>,
    last_viewport_check: Option<Instant>,
    events: EventBus,
    cache_manager: Arc<CacheManager>,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig, cache_manager: Arc<CacheManager>, events: EventBus) -> Self {
        Self {
            config,
            players: BTreeMap::new(),
            sessions: IndexMap::new(),
            keys: HashMap::new(),
            next_player_id: 1,
            next_session_id: 1,
            next_request_id: 1,
            focused: true,
            running: false,
            last_paint: None,
            last_viewport_check: None,
            events,
            cache_manager,
        }
    }

    // === Queries ===

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn cache_manager(&self) -> &Arc<CacheManager> {
        &self.cache_manager
    }

    /// Loop is live (at least one player since the last stop)
    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn player(&self, id: PlayerId) -> Option<&Player> {
        self.players.get(&id)
    }

    pub fn player_count(&self) -> usize {
        self.players.len()
    }

    pub fn players(&self) -> impl Iterator<Item = &Player> {
        self.players.values()
    }

    pub fn session(&self, key: &SessionKey) -> Option<&DecodeSession> {
        self.keys.get(key).and_then(|id| self.sessions.get(id))
    }

    /// Session a player is attached to
    pub fn session_of(&self, id: PlayerId) -> Option<&DecodeSession> {
        self.players.get(&id).and_then(|p| self.session(p.key()))
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn sessions(&self) -> impl Iterator<Item = &DecodeSession> {
        self.sessions.values()
    }

    // === Host inputs ===

    pub fn set_focused(&mut self, focused: bool) {
        self.focused = focused;
    }

    pub fn set_device_scale(&mut self, scale: f32) {
        self.config.device_scale = scale;
    }

    /// Force the next tick to re-run every viewport test
    pub fn invalidate_viewports(&mut self) {
        self.last_viewport_check = None;
    }

    /// Logical size -> decode size in pixels (device scale capped)
    pub fn pixel_size(&self, width: f32, height: f32) -> (u32, u32) {
        let scale = self
            .config
            .device_scale
            .min(self.config.max_device_scale)
            .max(f32::MIN_POSITIVE);
        let px = |v: f32| ((v * scale).round() as u32).max(1);
        (px(width), px(height))
    }

    // === Player lifecycle ===

    /// Register a player; create or join its session. Paints cached frame 0
    /// immediately when the session already has it.
    pub fn mount(
        &mut self,
        surface: Box<dyn Surface>,
        options: MountOptions,
        sink: &mut dyn RequestSink,
    ) -> Result<PlayerId, EngineError> {
        if !(options.width > 0.0 && options.height > 0.0) {
            return Err(EngineError::InvalidOptions(format!(
                "size must be positive, got {}x{}",
                options.width, options.height
            )));
        }
        let (width, height) = self.pixel_size(options.width, options.height);
        let key = SessionKey::new(&options.source, width, height);
        let divisor = options.caching_divisor.unwrap_or(self.config.caching_divisor).max(1);

        let id = PlayerId(self.next_player_id);
        self.next_player_id += 1;

        let source = options.source.clone();
        let mut player = Player::new(id, key.clone(), divisor, surface, options);
        let session_id = self.ensure_session(&key, &source, divisor, sink);

        // Fast path: shared session already decoded frame 0
        let mut first = false;
        if let Some(frame) = session_id
            .and_then(|sid| self.sessions.get(&sid))
            .and_then(|s| s.cache().first_frame())
        {
            first = player.paint_first(frame);
        }

        debug!("Player {} mounted on {} (first frame cached: {})", id, key, first);
        let segment = player.segment();
        self.players.insert(id, player);
        if first {
            self.events.emit(FirstFrameEvent { player: id });
        }
        // A loaded session is mid-playback: restart it at the segment start
        let loaded = session_id
            .and_then(|sid| self.sessions.get(&sid))
            .is_some_and(|s| s.is_loaded());
        if let (Some(segment), true) = (segment, loaded) {
            self.play_segment(id, segment.from, segment.to, sink);
        }
        if !self.running {
            info!("Render loop started");
        }
        self.running = true;
        Ok(id)
    }

    /// Deregister a player. Its session and cache stay for reuse.
    pub fn unmount(&mut self, id: PlayerId) -> bool {
        let removed = self.players.remove(&id).is_some();
        if removed {
            debug!("Player {} unmounted ({} left)", id, self.players.len());
        }
        removed
    }

    pub fn play(&mut self, id: PlayerId) {
        if let Some(p) = self.players.get_mut(&id) {
            p.play();
        }
    }

    pub fn pause(&mut self, id: PlayerId) {
        if let Some(p) = self.players.get_mut(&id) {
            p.pause();
        }
    }

    /// Missing players count as paused
    pub fn is_paused(&self, id: PlayerId) -> bool {
        self.players.get(&id).map(|p| p.is_paused()).unwrap_or(true)
    }

    pub fn has_painted_first_frame(&self, id: PlayerId) -> bool {
        self.players.get(&id).is_some_and(|p| p.has_painted_first_frame())
    }

    pub fn set_looping(&mut self, id: PlayerId, looping: bool) {
        if let Some(p) = self.players.get_mut(&id) {
            p.set_looping(looping);
        }
    }

    /// Play `[from, to]` on one player. If the session is already loaded its
    /// queue is discarded and delivery restarts at `from`; repeating the same
    /// call before any frame of it was consumed is a no-op.
    pub fn play_segment(&mut self, id: PlayerId, from: u32, to: u32, sink: &mut dyn RequestSink) {
        let Some(player) = self.players.get_mut(&id) else {
            return;
        };
        let key = player.key().clone();
        let session = self.keys.get(&key).and_then(|sid| self.sessions.get_mut(sid));

        let segment = match session.as_ref().and_then(|s| s.info()) {
            Some(info) => Segment::new(from, to).clamped(info.frame_count),
            None => Segment::new(from, to),
        };
        player.set_segment(segment);

        let Some(session) = session else {
            return;
        };
        if !session.is_loaded() {
            // Applied as start frame when the load completes
            return;
        }
        if session.pending_redirect() == Some(segment) {
            trace!("Player {}: segment {}..{} already pending", id, segment.from, segment.to);
            return;
        }
        let request_id = self.next_request_id;
        self.next_request_id += 1;
        session.redirect(segment, request_id);
        session.prefetch(sink);
    }

    // === Sessions ===

    fn ensure_session(
        &mut self,
        key: &SessionKey,
        source: &AnimationSource,
        divisor: u32,
        sink: &mut dyn RequestSink,
    ) -> Option<SessionId> {
        if let Some(&sid) = self.keys.get(key) {
            return Some(sid);
        }
        let Some(worker) = sink.assign_worker() else {
            warn!("No decode worker available for {}", key);
            return None;
        };
        let sid = SessionId(self.next_session_id);
        self.next_session_id += 1;
        let request_id = self.next_request_id;
        self.next_request_id += 1;

        let session = DecodeSession::new(sid, key.clone(), worker, divisor, request_id);
        sink.send(worker, session.load_request(source.clone()));
        self.sessions.insert(sid, session);
        self.keys.insert(key.clone(), sid);
        Some(sid)
    }

    /// Drop every session and its cache. Live players re-create their
    /// sessions on the next tick.
    pub fn reset_cache(&mut self, sink: &mut dyn RequestSink) {
        let count = self.sessions.len();
        for (sid, mut session) in self.sessions.drain(..) {
            session.clear_cache(&self.cache_manager);
            sink.send(session.worker(), WorkerRequest::Release { session: sid });
        }
        self.keys.clear();
        info!("Frame cache reset: {} sessions dropped", count);
    }

    /// Forget all players and sessions without talking to workers (pool shutdown)
    pub fn clear(&mut self) {
        for session in self.sessions.values_mut() {
            session.clear_cache(&self.cache_manager);
        }
        self.sessions.clear();
        self.keys.clear();
        self.players.clear();
        self.running = false;
        self.last_paint = None;
        self.last_viewport_check = None;
    }

    // === Worker events ===

    /// Apply one worker event. Events for vanished sessions or superseded
    /// request ids are dropped silently.
    pub fn handle_event(&mut self, event: WorkerEvent, now: Instant, sink: &mut dyn RequestSink) {
        match event {
            WorkerEvent::Ready { worker } => trace!("Worker {} ready", worker),
            WorkerEvent::Loaded { session, request_id, info } => {
                self.on_loaded(session, request_id, info, now, sink)
            }
            WorkerEvent::Frame { session, request_id, frame_index, pixels } => {
                self.on_frame(session, request_id, frame_index, pixels, sink)
            }
            WorkerEvent::Failed { session, request_id, frame_index, reason, returned } => {
                self.on_failed(session, request_id, frame_index, reason, returned, sink)
            }
        }
    }

    fn on_loaded(
        &mut self,
        sid: SessionId,
        request_id: u64,
        info: AnimationInfo,
        now: Instant,
        sink: &mut dyn RequestSink,
    ) {
        let Some(session) = self.sessions.get_mut(&sid) else {
            trace!("Loaded for unknown session {}", sid);
            return;
        };
        if session.phase() != SessionPhase::Created || request_id != session.request_id() {
            trace!("Stale load response for {}", sid);
            return;
        }
        // Start frame from the first attached player that asked for a segment
        let start = self
            .players
            .values()
            .find(|p| p.key() == session.key())
            .and_then(|p| p.segment());
        session.mark_loaded(info, now, start);
        session.prefetch(sink);
        for player in self.players.values_mut().filter(|p| p.key() == session.key()) {
            player.clamp_segment(info.frame_count);
        }
    }

    fn on_frame(
        &mut self,
        sid: SessionId,
        request_id: u64,
        frame_index: u32,
        pixels: PixelBuf,
        sink: &mut dyn RequestSink,
    ) {
        let Some(session) = self.sessions.get_mut(&sid) else {
            trace!("Frame {} for unknown session {}", frame_index, sid);
            return;
        };
        let Some(frame) = session.accept_frame(request_id, frame_index, pixels) else {
            return;
        };
        session.store_frame(&frame, &self.cache_manager);
        session.prefetch(sink);

        // Players still waiting for anything to show get this frame now
        let key = session.key();
        let mut first = Vec::new();
        for player in self.players.values_mut().filter(|p| p.key() == key) {
            if player.paint_first(&frame) {
                first.push(player.id());
            }
        }
        for id in first {
            self.events.emit(FirstFrameEvent { player: id });
        }
    }

    fn on_failed(
        &mut self,
        sid: SessionId,
        request_id: u64,
        frame_index: Option<u32>,
        reason: String,
        returned: Option<PixelBuf>,
        sink: &mut dyn RequestSink,
    ) {
        let Some(session) = self.sessions.get_mut(&sid) else {
            return;
        };
        if !session.accept_failure(request_id, frame_index, returned) {
            return;
        }
        match frame_index {
            None => warn!("Session {} ({}) failed to load: {}", sid, session.key(), reason),
            Some(idx) => {
                warn!("Session {}: frame {} failed: {}", sid, idx, reason);
                // Move on to the frame after the failed one
                session.prefetch(sink);
            }
        }
    }

    // === Main loop ===

    /// Run one tick at `now`. Returns when the host should tick again.
    pub fn tick(&mut self, now: Instant, sink: &mut dyn RequestSink) -> NextTick {
        if self.players.is_empty() {
            if self.running {
                info!("Render loop stopped: no players");
            }
            self.running = false;
            return NextTick::Stop;
        }
        self.running = true;

        let recheck = self
            .last_viewport_check
            .is_none_or(|last| now.saturating_duration_since(last) > self.config.viewport_recheck);
        if recheck {
            for player in self.players.values_mut() {
                player.refresh_viewport();
            }
            self.last_viewport_check = Some(now);
        }

        // Group players by key, lowest id first (BTreeMap order)
        let mut groups: IndexMap<SessionKey, Vec<PlayerId>> = IndexMap::new();
        for player in self.players.values() {
            groups.entry(player.key().clone()).or_default().push(player.id());
        }

        for (key, ids) in groups {
            let sid = match self.keys.get(&key) {
                Some(&sid) => sid,
                None => {
                    // Session dropped by a cache reset
                    let Some(player) = self.players.get(&ids[0]) else {
                        continue;
                    };
                    let (source, divisor) = (player.source().clone(), player.divisor());
                    match self.ensure_session(&key, &source, divisor, sink) {
                        Some(sid) => sid,
                        None => continue,
                    }
                }
            };
            self.advance_session(sid, &ids, now, sink);
        }

        self.next_tick(now)
    }

    fn advance_session(&mut self, sid: SessionId, ids: &[PlayerId], now: Instant, sink: &mut dyn RequestSink) {
        let Some(session) = self.sessions.get_mut(&sid) else {
            return;
        };
        if !session.is_due(now) {
            return;
        }

        let focused = self.focused;
        let eligible: Vec<PlayerId> = ids
            .iter()
            .copied()
            .filter(|id| self.players.get(id).is_some_and(|p| p.can_paint(focused)))
            .collect();
        let Some(&driver) = eligible.first() else {
            return;
        };

        let Some(frame) = session.pop_frame() else {
            // Starved: make sure a request is on its way
            session.prefetch(sink);
            return;
        };
        let is_final = session.is_final_frame(frame.index());
        trace!("Session {}: driver {} pops frame {}", sid, driver, frame.index());

        if session.finish_segment(frame.index()) {
            let request_id = self.next_request_id;
            self.next_request_id += 1;
            session.resume_forward(frame.index(), request_id);
        }
        session.advance_clock(now);
        session.prefetch(sink);

        let mut outcomes: Vec<(PlayerId, PaintOutcome)> = Vec::with_capacity(eligible.len());
        for id in &eligible {
            if let Some(player) = self.players.get_mut(id) {
                outcomes.push((*id, player.paint(&frame, is_final)));
            }
        }
        self.last_paint = Some(now);

        for (id, outcome) in outcomes {
            if outcome.first_frame {
                self.events.emit(FirstFrameEvent { player: id });
            }
            if outcome.loop_complete {
                self.events.emit(LoopCompleteEvent { player: id, frame: frame.index() });
            }
        }
    }

    /// Cadence for the next tick
    pub fn next_tick(&self, now: Instant) -> NextTick {
        if self.players.is_empty() {
            return NextTick::Stop;
        }
        let active = self
            .last_paint
            .is_some_and(|t| now.saturating_duration_since(t) <= self.config.active_window);
        if !active {
            NextTick::After(self.config.idle_interval)
        } else if self.config.repaint_sync {
            NextTick::Repaint
        } else {
            NextTick::After(self.config.fallback_frame)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::event_bus::downcast_event;
    use crate::core::player::ViewportTest;
    use crate::entities::DecodedFrame;
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;

    const MS: Duration = Duration::from_millis(1);

    /// Pending render request captured by the sink
    #[derive(Debug, Clone, Copy, PartialEq)]
    struct Render {
        session: SessionId,
        request_id: u64,
        frame_index: u32,
    }

    /// Deterministic stand-in for the worker pool
    #[derive(Default)]
    struct Sink {
        workers: usize,
        next: usize,
        loads: Vec<(usize, SessionId, u64)>,
        renders: Vec<Render>,
        releases: Vec<SessionId>,
    }

    impl Sink {
        fn new(workers: usize) -> Self {
            Self { workers, ..Default::default() }
        }

        fn renders_for(&self, session: SessionId) -> Vec<u32> {
            self.renders.iter().filter(|r| r.session == session).map(|r| r.frame_index).collect()
        }
    }

    impl RequestSink for Sink {
        fn assign_worker(&mut self) -> Option<usize> {
            let w = self.next % self.workers;
            self.next += 1;
            Some(w)
        }

        fn send(&mut self, worker: usize, request: WorkerRequest) {
            match request {
                WorkerRequest::Load { session, request_id, .. } => {
                    self.loads.push((worker, session, request_id))
                }
                WorkerRequest::Render { session, request_id, frame_index, .. } => {
                    self.renders.push(Render { session, request_id, frame_index })
                }
                WorkerRequest::Release { session } => self.releases.push(session),
                WorkerRequest::Shutdown => {}
            }
        }

        fn transfers_buffers(&self) -> bool {
            false
        }
    }

    #[derive(Default)]
    struct SurfaceLog {
        painted: RefCell<Vec<DecodedFrame>>,
        visible: Cell<bool>,
        viewport_queries: Cell<u32>,
    }

    impl SurfaceLog {
        fn indices(&self) -> Vec<u32> {
            self.painted.borrow().iter().map(|f| f.index()).collect()
        }
    }

    struct TestSurface(Rc<SurfaceLog>);

    impl Surface for TestSurface {
        fn paint(&mut self, frame: &DecodedFrame) {
            self.0.painted.borrow_mut().push(frame.clone());
        }
        fn is_in_viewport(&self) -> bool {
            self.0.viewport_queries.set(self.0.viewport_queries.get() + 1);
            self.0.visible.get()
        }
    }

    fn surface() -> (Box<dyn Surface>, Rc<SurfaceLog>) {
        let log = Rc::new(SurfaceLog::default());
        log.visible.set(true);
        (Box::new(TestSurface(Rc::clone(&log))), log)
    }

    fn scheduler() -> Scheduler {
        Scheduler::new(SchedulerConfig::default(), Arc::new(CacheManager::unbounded()), EventBus::new())
    }

    const SIZE: f32 = 16.0;

    fn pixels() -> PixelBuf {
        PixelBuf::for_size(SIZE as u32, SIZE as u32)
    }

    fn sticker(name: &str) -> MountOptions {
        MountOptions::new(name, SIZE, SIZE)
    }

    fn load(sched: &mut Scheduler, sink: &mut Sink, sid: SessionId, info: AnimationInfo, now: Instant) {
        let request_id = sink.loads.iter().find(|l| l.1 == sid).map(|l| l.2).unwrap();
        sched.handle_event(WorkerEvent::Loaded { session: sid, request_id, info }, now, sink);
    }

    /// Answer render requests one at a time (oldest first) until none are left
    fn serve(sched: &mut Scheduler, sink: &mut Sink, now: Instant) {
        while !sink.renders.is_empty() {
            let r = sink.renders.remove(0);
            deliver(sched, sink, r, now);
        }
    }

    fn deliver(sched: &mut Scheduler, sink: &mut Sink, r: Render, now: Instant) {
        sched.handle_event(
            WorkerEvent::Frame {
                session: r.session,
                request_id: r.request_id,
                frame_index: r.frame_index,
                pixels: pixels(),
            },
            now,
            sink,
        );
    }

    fn loop_completes(sched: &Scheduler) -> Vec<LoopCompleteEvent> {
        sched
            .events()
            .poll()
            .iter()
            .filter_map(|e| downcast_event::<LoopCompleteEvent>(e).cloned())
            .collect()
    }

    const INFO: AnimationInfo = AnimationInfo { frame_count: 60, fps: 30.0 };

    #[test]
    fn test_single_pass_non_looping() {
        let mut sched = scheduler();
        let mut sink = Sink::new(4);
        let t0 = Instant::now();
        let (s, log) = surface();
        let id = sched.mount(s, sticker("sticker.json").looping(false), &mut sink).unwrap();
        let sid = sched.session_of(id).unwrap().id();
        load(&mut sched, &mut sink, sid, INFO, t0);

        let mut now = t0;
        for _ in 0..200 {
            serve(&mut sched, &mut sink, now);
            now += 34 * MS;
            sched.tick(now, &mut sink);
            if sched.is_paused(id) {
                break;
            }
        }

        assert!(sched.is_paused(id));
        assert_eq!(sched.player(id).unwrap().last_painted(), Some(59));
        let completes = loop_completes(&sched);
        assert_eq!(completes, vec![LoopCompleteEvent { player: id, frame: 59 }]);

        // frame 0 painted on arrival, then 0..=59 in order by the loop
        let painted = log.indices();
        assert_eq!(painted[0], 0);
        assert_eq!(&painted[1..], &(0..60).collect::<Vec<_>>()[..]);

        // paused: further ticks paint nothing
        for _ in 0..5 {
            serve(&mut sched, &mut sink, now);
            now += 34 * MS;
            sched.tick(now, &mut sink);
        }
        assert_eq!(log.indices().len(), 61);
        assert!(loop_completes(&sched).is_empty());
    }

    #[test]
    fn test_looping_fires_per_lap() {
        let mut sched = scheduler();
        let mut sink = Sink::new(1);
        let t0 = Instant::now();
        let (s, _log) = surface();
        let id = sched.mount(s, sticker("loop.json"), &mut sink).unwrap();
        let sid = sched.session_of(id).unwrap().id();
        load(&mut sched, &mut sink, sid, AnimationInfo { frame_count: 10, fps: 30.0 }, t0);

        let mut now = t0;
        for _ in 0..25 {
            serve(&mut sched, &mut sink, now);
            now += 34 * MS;
            sched.tick(now, &mut sink);
        }
        // 25 frames consumed: 0..9, 0..9, 0..4
        assert_eq!(loop_completes(&sched).len(), 2);
        assert!(!sched.is_paused(id));
    }

    #[test]
    fn test_joiners_before_load_share_one_request() {
        let mut sched = scheduler();
        let mut sink = Sink::new(4);
        let t0 = Instant::now();
        let (sa, _) = surface();
        let (sb, _) = surface();
        let a = sched.mount(sa, sticker("sticker.json"), &mut sink).unwrap();
        let b = sched.mount(sb, sticker("sticker.json"), &mut sink).unwrap();

        assert_eq!(sched.session_count(), 1);
        assert_eq!(sink.loads.len(), 1);
        let sid = sched.session_of(a).unwrap().id();
        assert_eq!(sched.session_of(b).unwrap().id(), sid);

        load(&mut sched, &mut sink, sid, INFO, t0);
        assert_eq!(sink.renders_for(sid), vec![0]);
    }

    #[test]
    fn test_shared_session_paints_identical_pixels() {
        let mut sched = scheduler();
        let mut sink = Sink::new(4);
        let t0 = Instant::now();
        let (sa, log_a) = surface();
        let (sb, log_b) = surface();
        let a = sched.mount(sa, sticker("sticker.json"), &mut sink).unwrap();
        sched.mount(sb, sticker("sticker.json"), &mut sink).unwrap();
        let sid = sched.session_of(a).unwrap().id();
        load(&mut sched, &mut sink, sid, INFO, t0);

        let mut now = t0;
        for _ in 0..10 {
            serve(&mut sched, &mut sink, now);
            now += 34 * MS;
            sched.tick(now, &mut sink);
        }

        let pa = log_a.painted.borrow();
        let pb = log_b.painted.borrow();
        assert_eq!(pa.len(), pb.len());
        assert!(pa.len() > 1);
        for (fa, fb) in pa.iter().zip(pb.iter()) {
            assert_eq!(fa.index(), fb.index());
            assert!(fa.same_pixels(fb));
        }
    }

    #[test]
    fn test_lowest_id_drives_single_pop_per_tick() {
        let mut sched = scheduler();
        let mut sink = Sink::new(4);
        let t0 = Instant::now();
        let ids: Vec<_> = (0..3)
            .map(|_| sched.mount(surface().0, sticker("sticker.json"), &mut sink).unwrap())
            .collect();
        let sid = sched.session_of(ids[0]).unwrap().id();
        load(&mut sched, &mut sink, sid, INFO, t0);
        serve(&mut sched, &mut sink, t0);
        let before = sched.session_of(ids[0]).unwrap().queue().len();

        // lowest id paused: next one drives, still one pop
        sched.pause(ids[0]);
        sched.tick(t0 + 34 * MS, &mut sink);
        let session = sched.session_of(ids[0]).unwrap();
        assert_eq!(session.queue().len(), before - 1);
        assert_eq!(sched.player(ids[1]).unwrap().last_painted(), Some(0));
        assert_eq!(sched.player(ids[2]).unwrap().last_painted(), Some(0));
    }

    #[test]
    fn test_segment_discards_queue() {
        let mut sched = scheduler();
        let mut sink = Sink::new(4);
        let t0 = Instant::now();
        let (s, _) = surface();
        let id = sched.mount(s, sticker("sticker.json"), &mut sink).unwrap();
        let sid = sched.session_of(id).unwrap().id();
        load(&mut sched, &mut sink, sid, INFO, t0);

        // fill 0..7 (depth 8), frame 8 pending
        serve(&mut sched, &mut sink, t0);
        assert_eq!(sched.session_of(id).unwrap().queue().indices(), (0..8).collect::<Vec<_>>());

        // consume 0..4; the first pop requests 8
        let mut now = t0;
        for _ in 0..5 {
            now += 34 * MS;
            sched.tick(now, &mut sink);
        }
        assert_eq!(sink.renders.len(), 1);
        let r8 = sink.renders.remove(0);
        assert_eq!(r8.frame_index, 8);
        deliver(&mut sched, &mut sink, r8, now);

        let session = sched.session_of(id).unwrap();
        assert_eq!(session.queue().indices(), vec![5, 6, 7, 8]);
        let r9 = sink.renders.remove(0);
        assert_eq!(r9.frame_index, 9);

        sched.play_segment(id, 10, 20, &mut sink);
        let session = sched.session_of(id).unwrap();
        assert!(session.queue().is_empty());
        let next = sink.renders.last().copied().unwrap();
        assert_eq!(next.frame_index, 10);
        assert_ne!(next.request_id, r9.request_id);

        // stale frame 9 arrives late and is dropped
        deliver(&mut sched, &mut sink, r9, now);
        let session = sched.session_of(id).unwrap();
        assert!(session.queue().is_empty());
        assert_eq!(session.in_flight(), Some(10));
    }

    #[test]
    fn test_segment_idempotent_and_pauses_at_end() {
        let mut sched = scheduler();
        let mut sink = Sink::new(4);
        let t0 = Instant::now();
        let (s, log) = surface();
        let id = sched.mount(s, sticker("sticker.json"), &mut sink).unwrap();
        let sid = sched.session_of(id).unwrap().id();
        load(&mut sched, &mut sink, sid, INFO, t0);
        serve(&mut sched, &mut sink, t0);

        sched.play_segment(id, 10, 14, &mut sink);
        let first = sink.renders.clone();
        let next_after_first = sched.session_of(id).unwrap().next_request();
        sched.play_segment(id, 10, 14, &mut sink);
        assert_eq!(sink.renders, first);
        assert_eq!(sched.session_of(id).unwrap().next_request(), next_after_first);
        assert_eq!(first.last().map(|r| r.frame_index), Some(10));

        let mut now = t0;
        for _ in 0..10 {
            serve(&mut sched, &mut sink, now);
            now += 34 * MS;
            sched.tick(now, &mut sink);
        }
        assert!(sched.is_paused(id));
        assert_eq!(sched.player(id).unwrap().last_painted(), Some(14));
        let painted = log.indices();
        assert_eq!(&painted[painted.len() - 5..], &[10, 11, 12, 13, 14]);
    }

    #[test]
    fn test_reverse_segment() {
        let mut sched = scheduler();
        let mut sink = Sink::new(1);
        let t0 = Instant::now();
        let (s, log) = surface();
        let id = sched.mount(s, sticker("sticker.json").segment(5, 2), &mut sink).unwrap();
        let sid = sched.session_of(id).unwrap().id();
        load(&mut sched, &mut sink, sid, INFO, t0);
        assert_eq!(sink.renders_for(sid), vec![5]);

        let mut now = t0;
        for _ in 0..8 {
            serve(&mut sched, &mut sink, now);
            now += 34 * MS;
            sched.tick(now, &mut sink);
        }
        // first paint on arrival, then the loop
        assert_eq!(log.indices(), vec![5, 5, 4, 3, 2]);
        assert!(sched.is_paused(id));
    }

    #[test]
    fn test_segment_before_load_clamped() {
        let mut sched = scheduler();
        let mut sink = Sink::new(1);
        let t0 = Instant::now();
        let (s, log) = surface();
        let id = sched.mount(s, sticker("sticker.json").segment(50, 500), &mut sink).unwrap();
        let sid = sched.session_of(id).unwrap().id();
        load(&mut sched, &mut sink, sid, INFO, t0);
        assert_eq!(sched.player(id).unwrap().segment(), Some(Segment::new(50, 59)));

        let mut now = t0;
        for _ in 0..15 {
            serve(&mut sched, &mut sink, now);
            now += 34 * MS;
            sched.tick(now, &mut sink);
        }
        assert!(sched.is_paused(id));
        assert_eq!(log.indices().last(), Some(&59));
        assert_eq!(loop_completes(&sched).len(), 1);
    }

    #[test]
    fn test_sharers_play_forward_after_reverse_segment() {
        let mut sched = scheduler();
        let mut sink = Sink::new(1);
        let t0 = Instant::now();
        let (sa, log_a) = surface();
        let (sb, log_b) = surface();
        let a = sched.mount(sa, sticker("sticker.json"), &mut sink).unwrap();
        let b = sched.mount(sb, sticker("sticker.json"), &mut sink).unwrap();
        let sid = sched.session_of(a).unwrap().id();
        load(&mut sched, &mut sink, sid, INFO, t0);

        let mut now = t0;
        for _ in 0..3 {
            serve(&mut sched, &mut sink, now);
            now += 34 * MS;
            sched.tick(now, &mut sink);
        }

        sched.play_segment(a, 5, 2, &mut sink);
        for _ in 0..10 {
            serve(&mut sched, &mut sink, now);
            now += 34 * MS;
            sched.tick(now, &mut sink);
            if sched.is_paused(a) {
                break;
            }
        }
        assert!(sched.is_paused(a));
        assert_eq!(log_a.indices().last(), Some(&2));
        assert!(!sched.session_of(a).unwrap().is_reverse());

        sched.play(a);
        let a_before = log_a.indices().len();
        for _ in 0..6 {
            serve(&mut sched, &mut sink, now);
            now += 34 * MS;
            sched.tick(now, &mut sink);
        }
        let painted_b = log_b.indices();
        assert_eq!(&painted_b[painted_b.len() - 6..], &[3, 4, 5, 6, 7, 8]);
        assert_eq!(&log_a.indices()[a_before..], &[3, 4, 5, 6, 7, 8]);
        assert!(!sched.is_paused(b));
    }

    #[test]
    fn test_failed_segment_end_still_pauses() {
        let mut sched = scheduler();
        let mut sink = Sink::new(1);
        let t0 = Instant::now();
        let (s, log) = surface();
        let id = sched.mount(s, sticker("sticker.json"), &mut sink).unwrap();
        let sid = sched.session_of(id).unwrap().id();
        load(&mut sched, &mut sink, sid, INFO, t0);
        serve(&mut sched, &mut sink, t0);

        sched.play_segment(id, 10, 12, &mut sink);
        let mut now = t0;
        for _ in 0..10 {
            while !sink.renders.is_empty() {
                let r = sink.renders.remove(0);
                if r.frame_index == 12 {
                    let failed = WorkerEvent::Failed {
                        session: r.session,
                        request_id: r.request_id,
                        frame_index: Some(12),
                        reason: "corrupt frame".into(),
                        returned: None,
                    };
                    sched.handle_event(failed, now, &mut sink);
                } else {
                    deliver(&mut sched, &mut sink, r, now);
                }
            }
            now += 34 * MS;
            sched.tick(now, &mut sink);
        }
        assert_eq!(log.indices(), vec![0, 10, 11]);
        assert!(sched.is_paused(id));
        assert_eq!(loop_completes(&sched).len(), 1);
    }

    #[test]
    fn test_mount_with_segment_on_loaded_session() {
        let mut sched = scheduler();
        let mut sink = Sink::new(1);
        let t0 = Instant::now();
        let (sa, _) = surface();
        let a = sched.mount(sa, sticker("sticker.json"), &mut sink).unwrap();
        let sid = sched.session_of(a).unwrap().id();
        load(&mut sched, &mut sink, sid, INFO, t0);
        serve(&mut sched, &mut sink, t0);

        let (sb, _) = surface();
        let b = sched.mount(sb, sticker("sticker.json").segment(20, 22), &mut sink).unwrap();
        let session = sched.session_of(b).unwrap();
        assert_eq!(session.in_flight(), Some(20));
        assert!(session.queue().is_empty());
        assert_eq!(sched.player(b).unwrap().segment(), Some(Segment::new(20, 22)));
    }

    #[test]
    fn test_unmount_keeps_session_for_reuse() {
        let mut sched = scheduler();
        let mut sink = Sink::new(4);
        let t0 = Instant::now();
        let (s, _) = surface();
        let a = sched.mount(s, sticker("sticker.json"), &mut sink).unwrap();
        let sid = sched.session_of(a).unwrap().id();
        load(&mut sched, &mut sink, sid, INFO, t0);
        serve(&mut sched, &mut sink, t0);

        assert!(sched.unmount(a));
        assert_eq!(sched.tick(t0 + 34 * MS, &mut sink), NextTick::Stop);
        assert!(!sched.is_running());
        let key = SessionKey::new(&AnimationSource::from("sticker.json"), 16, 16);
        assert!(sched.session(&key).unwrap().cache().first_frame().is_some());

        let (s, log) = surface();
        let b = sched.mount(s, sticker("sticker.json"), &mut sink).unwrap();
        assert!(sched.is_running());
        assert!(sched.has_painted_first_frame(b));
        assert_eq!(log.indices(), vec![0]);
        assert_eq!(sink.loads.len(), 1);
        assert_eq!(sched.session_of(b).unwrap().id(), sid);
    }

    #[test]
    fn test_invisible_key_stops_consuming() {
        let mut sched = scheduler();
        let mut sink = Sink::new(4);
        let t0 = Instant::now();
        let (s1, log1) = surface();
        let (s2, log2) = surface();
        let p1 = sched.mount(s1, sticker("one.json"), &mut sink).unwrap();
        let p2 = sched.mount(s2, sticker("two.json"), &mut sink).unwrap();
        let sid1 = sched.session_of(p1).unwrap().id();
        let sid2 = sched.session_of(p2).unwrap().id();
        load(&mut sched, &mut sink, sid1, INFO, t0);
        load(&mut sched, &mut sink, sid2, INFO, t0);
        serve(&mut sched, &mut sink, t0);

        log1.visible.set(false);
        let queries_at_mount = log1.viewport_queries.get();

        let mut now = t0;
        let end = t0 + Duration::from_millis(2500);
        while now < end {
            now += 34 * MS;
            sched.tick(now, &mut sink);
            serve(&mut sched, &mut sink, now);
        }

        // key 1: only the arrival paint, queue untouched
        assert_eq!(log1.indices(), vec![0]);
        assert_eq!(sched.session_of(p1).unwrap().queue().indices(), (0..8).collect::<Vec<_>>());
        // key 2 kept going
        assert!(log2.indices().len() > 60);

        // rechecks at 34ms, 1054ms, 2074ms
        let rechecks = log1.viewport_queries.get() - queries_at_mount;
        assert_eq!(rechecks, 3);
    }

    #[test]
    fn test_viewport_override_and_focus() {
        let mut sched = scheduler();
        let mut sink = Sink::new(1);
        let t0 = Instant::now();
        let (s, log) = surface();
        log.visible.set(false);
        let id = sched
            .mount(s, sticker("a.json").viewport(ViewportTest::AlwaysVisible), &mut sink)
            .unwrap();
        let sid = sched.session_of(id).unwrap().id();
        load(&mut sched, &mut sink, sid, INFO, t0);
        serve(&mut sched, &mut sink, t0);

        sched.set_focused(false);
        sched.tick(t0 + 34 * MS, &mut sink);
        assert_eq!(log.indices(), vec![0]); // only arrival paint

        sched.set_focused(true);
        sched.tick(t0 + 68 * MS, &mut sink);
        assert_eq!(log.indices(), vec![0, 0]);
        assert_eq!(log.viewport_queries.get(), 0);
    }

    #[test]
    fn test_not_due_before_interval() {
        let mut sched = scheduler();
        let mut sink = Sink::new(1);
        let t0 = Instant::now();
        let (s, log) = surface();
        let id = sched.mount(s, sticker("a.json"), &mut sink).unwrap();
        let sid = sched.session_of(id).unwrap().id();
        load(&mut sched, &mut sink, sid, INFO, t0);
        serve(&mut sched, &mut sink, t0);

        sched.tick(t0 + 20 * MS, &mut sink);
        assert_eq!(log.indices().len(), 1);
        sched.tick(t0 + 40 * MS, &mut sink);
        assert_eq!(log.indices().len(), 2);
    }

    #[test]
    fn test_cadence() {
        let mut sched = scheduler();
        let mut sink = Sink::new(1);
        let t0 = Instant::now();
        assert_eq!(sched.tick(t0, &mut sink), NextTick::Stop);

        let (s, _) = surface();
        let id = sched.mount(s, sticker("a.json"), &mut sink).unwrap();
        // loaded but nothing painted yet: idle
        assert_eq!(sched.tick(t0, &mut sink), NextTick::After(Duration::from_millis(500)));

        let sid = sched.session_of(id).unwrap().id();
        load(&mut sched, &mut sink, sid, INFO, t0);
        serve(&mut sched, &mut sink, t0);
        assert_eq!(sched.tick(t0 + 34 * MS, &mut sink), NextTick::After(Duration::from_millis(16)));

        sched.config.repaint_sync = true;
        assert_eq!(sched.next_tick(t0 + 100 * MS), NextTick::Repaint);
        assert_eq!(sched.next_tick(t0 + 200 * MS), NextTick::After(Duration::from_millis(500)));
    }

    #[test]
    fn test_cache_keeps_first_frame_after_load() {
        for divisor in [1, 2, 3, 5] {
            let mut sched = scheduler();
            let mut sink = Sink::new(1);
            let t0 = Instant::now();
            let (s, _) = surface();
            let id = sched
                .mount(s, sticker("a.json").caching_divisor(divisor), &mut sink)
                .unwrap();
            let sid = sched.session_of(id).unwrap().id();
            load(&mut sched, &mut sink, sid, INFO, t0);
            serve(&mut sched, &mut sink, t0);
            let session = sched.session_of(id).unwrap();
            assert_eq!(session.cache().divisor(), divisor);
            assert!(session.cache().first_frame().is_some());
        }
    }

    #[test]
    fn test_reset_cache_recreates_sessions() {
        let mut sched = scheduler();
        let mut sink = Sink::new(2);
        let t0 = Instant::now();
        let (s, _) = surface();
        let id = sched.mount(s, sticker("a.json"), &mut sink).unwrap();
        let sid = sched.session_of(id).unwrap().id();
        load(&mut sched, &mut sink, sid, INFO, t0);
        serve(&mut sched, &mut sink, t0);
        assert!(sched.cache_manager().mem().0 > 0);

        sched.reset_cache(&mut sink);
        assert_eq!(sched.session_count(), 0);
        assert_eq!(sink.releases, vec![sid]);
        assert_eq!(sched.cache_manager().mem().0, 0);

        // late frame of the dropped session is ignored
        deliver(&mut sched, &mut sink, Render { session: sid, request_id: 1, frame_index: 3 }, t0);

        sched.tick(t0 + 34 * MS, &mut sink);
        assert_eq!(sink.loads.len(), 2);
        assert_ne!(sched.session_of(id).unwrap().id(), sid);
    }

    #[test]
    fn test_failed_load_absorbed() {
        let mut sched = scheduler();
        let mut sink = Sink::new(1);
        let t0 = Instant::now();
        let (sa, log_a) = surface();
        let (sb, log_b) = surface();
        let a = sched.mount(sa, sticker("broken.json"), &mut sink).unwrap();
        let b = sched.mount(sb, sticker("fine.json"), &mut sink).unwrap();
        let sid_a = sched.session_of(a).unwrap().id();
        let sid_b = sched.session_of(b).unwrap().id();

        let request_id = sink.loads[0].2;
        sched.handle_event(
            WorkerEvent::Failed {
                session: sid_a,
                request_id,
                frame_index: None,
                reason: "bad json".into(),
                returned: None,
            },
            t0,
            &mut sink,
        );
        load(&mut sched, &mut sink, sid_b, INFO, t0);
        serve(&mut sched, &mut sink, t0);
        sched.tick(t0 + 34 * MS, &mut sink);

        assert_eq!(sched.session_of(a).unwrap().phase(), SessionPhase::Failed);
        assert!(log_a.indices().is_empty());
        assert_eq!(log_b.indices(), vec![0, 0]);
    }

    #[test]
    fn test_device_scale_capped() {
        let mut sched = scheduler();
        sched.set_device_scale(3.0);
        assert_eq!(sched.pixel_size(100.0, 50.0), (200, 100));
        sched.set_device_scale(1.5);
        assert_eq!(sched.pixel_size(100.0, 50.0), (150, 75));
    }

    #[test]
    fn test_invalid_size_rejected() {
        let mut sched = scheduler();
        let mut sink = Sink::new(1);
        let (s, _) = surface();
        let err = sched.mount(s, MountOptions::new("a.json", 0.0, 10.0), &mut sink).unwrap_err();
        assert!(matches!(err, EngineError::InvalidOptions(_)));
        assert!(!sched.is_running());
    }
}
