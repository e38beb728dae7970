//! Decode worker pool: fixed set of threads, one decoder instance each
//!
//! Each worker owns a decoder built by the [`DecoderFactory`] on its own
//! thread, a private request channel, and the animations it has loaded for
//! the sessions assigned to it. Nothing is shared between workers; every
//! response goes back over one event channel drained by the control thread.
//!
//! - Sessions are assigned round-robin and stay on their worker for life
//! - A worker signals readiness exactly once, before handling any request
//! - Requests sent before readiness simply wait in the channel
//!
//! Buffer ownership: a `Render` request may carry the session's staging buffer;
//! the worker renders into it and moves it back inside the `Frame` event.

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use log::{error, info, trace, warn};
use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use crate::entities::frame::rgba_len;
use crate::entities::{
    DecoderFactory, LoadedAnimation, PixelBuf, RequestSink, SessionId, WorkerEvent, WorkerRequest,
};

/// Default number of decode workers
pub const DEFAULT_WORKER_COUNT: usize = 4;

#[derive(Debug)]
struct ReadyState {
    ready: usize,
    expected: usize,
}

/// Shared readiness latch of one pool generation.
///
/// Cloneable; any number of threads may wait on it and all of them resolve
/// once every worker has signaled ready.
#[derive(Clone, Debug)]
pub struct PoolReadiness {
    inner: Arc<(Mutex<ReadyState>, Condvar)>,
}

impl PoolReadiness {
    fn new(expected: usize) -> Self {
        Self {
            inner: Arc::new((Mutex::new(ReadyState { ready: 0, expected }), Condvar::new())),
        }
    }

    fn signal(&self) {
        let (lock, cvar) = &*self.inner;
        let mut state = lock.lock().unwrap_or_else(|e| e.into_inner());
        state.ready += 1;
        if state.ready >= state.expected {
            cvar.notify_all();
        }
    }

    /// (ready, expected)
    pub fn progress(&self) -> (usize, usize) {
        let state = self.inner.0.lock().unwrap_or_else(|e| e.into_inner());
        (state.ready, state.expected)
    }

    pub fn is_ready(&self) -> bool {
        let (ready, expected) = self.progress();
        ready >= expected
    }

    /// Block until every worker is ready or the timeout passes. Returns readiness.
    pub fn wait(&self, timeout: Duration) -> bool {
        let (lock, cvar) = &*self.inner;
        let guard = lock.lock().unwrap_or_else(|e| e.into_inner());
        let (state, _) = cvar
            .wait_timeout_while(guard, timeout, |s| s.ready < s.expected)
            .unwrap_or_else(|e| e.into_inner());
        state.ready >= state.expected
    }
}

/// Handle to one worker thread
struct DecodeWorker {
    requests: Sender<WorkerRequest>,
    handle: Option<thread::JoinHandle<()>>,
}

impl DecodeWorker {
    fn spawn(
        index: usize,
        factory: DecoderFactory,
        events: Sender<WorkerEvent>,
        readiness: PoolReadiness,
    ) -> std::io::Result<Self> {
        let (tx, rx) = unbounded::<WorkerRequest>();
        let handle = thread::Builder::new()
            .name(format!("stickerplay-decode-{}", index))
            .spawn(move || run_worker(index, factory, rx, events, readiness))?;
        Ok(Self {
            requests: tx,
            handle: Some(handle),
        })
    }
}

/// Loaded animation hosted by a worker for one session
struct Hosted {
    animation: Box<dyn LoadedAnimation>,
    len: usize,
}

fn run_worker(
    index: usize,
    factory: DecoderFactory,
    requests: Receiver<WorkerRequest>,
    events: Sender<WorkerEvent>,
    readiness: PoolReadiness,
) {
    let mut decoder = match factory() {
        Ok(decoder) => decoder,
        Err(e) => {
            // Never signals ready: sessions on this slot stall
            error!("Decode worker {} failed to start: {:#}", index, e);
            return;
        }
    };
    let mut hosted: HashMap<SessionId, Hosted> = HashMap::new();

    readiness.signal();
    if events.send(WorkerEvent::Ready { worker: index }).is_err() {
        return;
    }
    trace!("Decode worker {} ready", index);

    while let Ok(request) = requests.recv() {
        let event = match request {
            WorkerRequest::Load { session, request_id, source, width, height } => {
                match decoder.load(&source, width, height) {
                    Ok(animation) => {
                        let info = animation.info();
                        hosted.insert(session, Hosted { animation, len: rgba_len(width, height) });
                        Some(WorkerEvent::Loaded { session, request_id, info })
                    }
                    Err(e) => Some(WorkerEvent::Failed {
                        session,
                        request_id,
                        frame_index: None,
                        reason: format!("{:#}", e),
                        returned: None,
                    }),
                }
            }
            WorkerRequest::Render { session, request_id, frame_index, dest } => {
                Some(render(&mut hosted, session, request_id, frame_index, dest))
            }
            WorkerRequest::Release { session } => {
                hosted.remove(&session);
                None
            }
            WorkerRequest::Shutdown => break,
        };
        if let Some(event) = event {
            if events.send(event).is_err() {
                break;
            }
        }
    }
    trace!("Decode worker {} stopped", index);
}

fn render(
    hosted: &mut HashMap<SessionId, Hosted>,
    session: SessionId,
    request_id: u64,
    frame_index: u32,
    dest: Option<PixelBuf>,
) -> WorkerEvent {
    let Some(entry) = hosted.get_mut(&session) else {
        return WorkerEvent::Failed {
            session,
            request_id,
            frame_index: Some(frame_index),
            reason: format!("session {} not loaded on this worker", session),
            returned: dest,
        };
    };
    // No destination (transfer off) or wrong size: render into a fresh buffer
    let mut pixels = match dest {
        Some(buf) if buf.len() == entry.len => buf,
        _ => PixelBuf::zeroed(entry.len),
    };
    match entry.animation.render(frame_index, pixels.as_mut_slice()) {
        Ok(()) => WorkerEvent::Frame { session, request_id, frame_index, pixels },
        Err(e) => WorkerEvent::Failed {
            session,
            request_id,
            frame_index: Some(frame_index),
            reason: format!("{:#}", e),
            returned: Some(pixels),
        },
    }
}

/// Fixed-size pool of decode workers
pub struct WorkerPool {
    workers: Vec<DecodeWorker>,
    next: usize,
    events_tx: Sender<WorkerEvent>,
    events_rx: Receiver<WorkerEvent>,
    readiness: Option<PoolReadiness>,
    transfer: bool,
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("workers", &self.workers.len())
            .field("next", &self.next)
            .field("readiness", &self.readiness.as_ref().map(|r| r.progress()))
            .field("transfer", &self.transfer)
            .finish()
    }
}

impl WorkerPool {
    /// Create an empty pool. `transfer` moves staging buffers to workers
    /// instead of having workers allocate a fresh buffer per frame.
    pub fn new(transfer: bool) -> Self {
        let (events_tx, events_rx) = unbounded();
        Self {
            workers: Vec::new(),
            next: 0,
            events_tx,
            events_rx,
            readiness: None,
            transfer,
        }
    }

    /// Spin up `count` workers. Idempotent: a running pool returns its
    /// existing readiness latch.
    pub fn initialize(&mut self, count: usize, factory: &DecoderFactory) -> PoolReadiness {
        if let Some(readiness) = &self.readiness {
            return readiness.clone();
        }
        let count = count.max(1);
        let readiness = PoolReadiness::new(count);
        for index in 0..count {
            match DecodeWorker::spawn(
                index,
                Arc::clone(factory),
                self.events_tx.clone(),
                readiness.clone(),
            ) {
                Ok(worker) => self.workers.push(worker),
                Err(e) => error!("Failed to spawn decode worker {}: {}", index, e),
            }
        }
        info!(
            "Decode pool started: {} workers (buffer transfer: {})",
            self.workers.len(),
            self.transfer
        );
        self.next = 0;
        self.readiness = Some(readiness.clone());
        readiness
    }

    pub fn is_initialized(&self) -> bool {
        self.readiness.is_some()
    }

    pub fn readiness(&self) -> Option<PoolReadiness> {
        self.readiness.clone()
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Next worker in round-robin order (wrapping)
    pub fn assign_next(&mut self) -> Option<usize> {
        if self.workers.is_empty() {
            return None;
        }
        let index = self.next % self.workers.len();
        self.next = (index + 1) % self.workers.len();
        Some(index)
    }

    /// Post a request (fire-and-forget). Missing slots are a silent no-op.
    pub fn post(&self, worker: usize, request: WorkerRequest) {
        match self.workers.get(worker) {
            Some(w) => {
                if w.requests.send(request).is_err() {
                    warn!("Decode worker {} is gone, request dropped", worker);
                }
            }
            None => trace!("No decode worker {}, request dropped", worker),
        }
    }

    /// Next pending event without blocking
    pub fn try_recv(&self) -> Option<WorkerEvent> {
        self.events_rx.try_recv().ok()
    }

    /// Wait up to `timeout` for the next event
    pub fn recv_timeout(&self, timeout: Duration) -> Option<WorkerEvent> {
        match self.events_rx.recv_timeout(timeout) {
            Ok(event) => Some(event),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Dispose all workers and clear readiness
    pub fn terminate(&mut self) {
        if self.workers.is_empty() && self.readiness.is_none() {
            return;
        }
        let num_threads = self.workers.len();
        trace!("Decode pool shutting down ({} threads)...", num_threads);

        for worker in &self.workers {
            let _ = worker.requests.send(WorkerRequest::Shutdown);
        }

        // Wait with timeout (500ms total for all threads)
        let deadline = Instant::now() + Duration::from_millis(500);
        for mut worker in std::mem::take(&mut self.workers) {
            let Some(handle) = worker.handle.take() else {
                continue;
            };
            while !handle.is_finished() {
                if Instant::now() >= deadline {
                    trace!("Shutdown timeout reached, detaching remaining workers");
                    break;
                }
                thread::sleep(Duration::from_millis(1));
            }
            if handle.is_finished() {
                let _ = handle.join();
            }
        }

        // Responses of the old generation belong to sessions that no longer exist
        while self.events_rx.try_recv().is_ok() {}
        self.readiness = None;
        self.next = 0;
        info!("Decode pool stopped ({} workers)", num_threads);
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.terminate();
    }
}

impl RequestSink for WorkerPool {
    fn assign_worker(&mut self) -> Option<usize> {
        self.assign_next()
    }

    fn send(&mut self, worker: usize, request: WorkerRequest) {
        self.post(worker, request);
    }

    fn transfers_buffers(&self) -> bool {
        self.transfer
    }
}
