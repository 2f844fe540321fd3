//! Playback engine orchestration
//!
//! Coordinates the track queue, URL cache, slot pool, resolver, and player
//! processes. While one track plays, the engine speculatively resolves and
//! pre-buffers the next queue head in a paused player process, so a track
//! transition is a sub-second unpause instead of a resolve-then-buffer wait.
//!
//! All state transitions run on one dispatch loop fed by an event channel;
//! every mutation happens under the core lock. The only deliberately blocking
//! call on that loop is the bounded resume dispatch on a slot's control
//! channel.

use crate::config::Config;
use crate::error::{Error, Result};
use crate::events::{EngineEvent, JobId, PlayerEvent, ProcessToken};
use crate::playback::cache::UrlCache;
use crate::playback::queue::TrackQueue;
use crate::playback::slot::{ResolveJob, SlotPool, SlotState, SLOT_COUNT};
use crate::player::process::{MpvLauncher, PlayerLauncher, PlayerProcess};
use crate::resolver::{MediaResolver, YtDlpResolver};
use crate::track::TrackDescriptor;
use chrono::Utc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Instant;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// What drives the audio for the current track.
enum PlaybackSource {
    /// A promoted slot; its process stays owned by the slot.
    Slot(usize),
    /// A directly launched (cold path) process, owned here.
    Direct(Box<dyn PlayerProcess>),
}

/// The track currently producing (or about to produce) audio.
struct CurrentPlayback {
    track: TrackDescriptor,
    token: ProcessToken,
    source: PlaybackSource,
    started_at: Instant,
}

/// Cold-path resolve in flight; completing it establishes current playback.
struct ColdJob {
    id: JobId,
    track: TrackDescriptor,
    handle: JoinHandle<()>,
}

/// All mutable scheduling state, guarded by one lock.
struct EngineCore {
    queue: TrackQueue,
    cache: UrlCache,
    slots: SlotPool,
    current: Option<CurrentPlayback>,
    /// A play request deferred until an in-flight prefetch for the same
    /// track resolves. At most one outstanding.
    pending_wait: Option<TrackDescriptor>,
    cold_job: Option<ColdJob>,
}

impl EngineCore {
    fn new() -> Self {
        Self {
            queue: TrackQueue::new(),
            cache: UrlCache::new(),
            slots: SlotPool::new(),
            current: None,
            pending_wait: None,
            cold_job: None,
        }
    }
}

struct EngineShared {
    core: Mutex<EngineCore>,
    events_tx: mpsc::UnboundedSender<EngineEvent>,
    /// Receiver parked here until `start()` claims it.
    events_rx: StdMutex<Option<mpsc::UnboundedReceiver<EngineEvent>>>,
    observer_tx: broadcast::Sender<PlayerEvent>,
    resolver: Arc<dyn MediaResolver>,
    launcher: Arc<dyn PlayerLauncher>,
    next_id: AtomicU64,
}

/// Speculative prefetch and instant-switch playback scheduler.
///
/// Cheaply cloneable handle; all clones share one scheduling core.
#[derive(Clone)]
pub struct PlaybackEngine {
    shared: Arc<EngineShared>,
}

/// Point-in-time view of the scheduler, for status display and tests.
#[derive(Debug, Clone)]
pub struct EngineSnapshot {
    pub queue_len: usize,
    pub current: Option<TrackDescriptor>,
    pub pending_wait: Option<TrackDescriptor>,
    pub slots: Vec<SlotSnapshot>,
}

#[derive(Debug, Clone)]
pub struct SlotSnapshot {
    pub state: SlotState,
    pub track: Option<TrackDescriptor>,
}

impl PlaybackEngine {
    /// Create an engine with the production resolver and player launcher.
    pub fn new(config: &Config) -> Self {
        Self::with_parts(
            Arc::new(YtDlpResolver::new(config.resolver.clone())),
            Arc::new(MpvLauncher::new(config.player.clone())),
        )
    }

    /// Create an engine over explicit resolver and launcher implementations.
    pub fn with_parts(resolver: Arc<dyn MediaResolver>, launcher: Arc<dyn PlayerLauncher>) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (observer_tx, _) = broadcast::channel(64);

        Self {
            shared: Arc::new(EngineShared {
                core: Mutex::new(EngineCore::new()),
                events_tx,
                events_rx: StdMutex::new(Some(events_rx)),
                observer_tx,
                resolver,
                launcher,
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Start the dispatch loop. Call once.
    pub fn start(&self) -> Result<()> {
        let mut rx = {
            let mut guard = self
                .shared
                .events_rx
                .lock()
                .map_err(|_| Error::Internal("event receiver lock poisoned".to_string()))?;
            guard
                .take()
                .ok_or_else(|| Error::InvalidState("engine already started".to_string()))?
        };

        let engine = self.clone();
        tokio::spawn(async move {
            info!("Playback engine started");
            while let Some(event) = rx.recv().await {
                engine.dispatch(event).await;
            }
            debug!("Engine event channel closed");
        });

        Ok(())
    }

    /// Subscribe to observer-facing playback events.
    pub fn subscribe(&self) -> broadcast::Receiver<PlayerEvent> {
        self.shared.observer_tx.subscribe()
    }

    /// Append a track to the pending queue. If something is already playing,
    /// this may immediately start a speculative prefetch of the queue head.
    pub async fn enqueue(&self, track: TrackDescriptor) {
        let mut core = self.shared.core.lock().await;
        info!("Enqueued {}", track);
        core.queue.enqueue(track);
        self.emit(PlayerEvent::QueueChanged {
            remaining: core.queue.len(),
        });
        if core.current.is_some() {
            self.prefetch_head(&mut core);
        }
    }

    /// Dequeue the head and play it. No-op on an empty queue unless nothing
    /// is playing, in which case the idle state is announced.
    pub async fn play_next(&self) {
        let mut core = self.shared.core.lock().await;
        match core.queue.dequeue_front() {
            Some(track) => {
                self.emit(PlayerEvent::QueueChanged {
                    remaining: core.queue.len(),
                });
                self.request_play(&mut core, track).await;
            }
            None => {
                if core.current.is_none() {
                    self.emit(PlayerEvent::Idle);
                }
            }
        }
    }

    /// Remove the pending track at `index`.
    pub async fn remove_queued(&self, index: usize) -> Option<TrackDescriptor> {
        let mut core = self.shared.core.lock().await;
        let removed = core.queue.remove_at(index);
        if removed.is_some() {
            self.emit(PlayerEvent::QueueChanged {
                remaining: core.queue.len(),
            });
        }
        removed
    }

    /// Drop all pending tracks and every speculative resource backing them.
    /// Current playback, including a cold-path launch still resolving, is
    /// left untouched.
    pub async fn clear_queue(&self) {
        let mut core = self.shared.core.lock().await;
        info!("Clearing queue");
        core.queue.clear();
        core.cache.clear();
        core.pending_wait = None;

        let playing_slot = core.current.as_ref().and_then(|c| match c.source {
            PlaybackSource::Slot(idx) => Some(idx),
            PlaybackSource::Direct(_) => None,
        });
        for idx in 0..SLOT_COUNT {
            if Some(idx) != playing_slot {
                self.release_slot(&mut core, idx).await;
            }
        }

        self.emit(PlayerEvent::QueueChanged { remaining: 0 });
    }

    /// Stop playback and all speculative work. The pending queue is kept.
    pub async fn stop_all(&self) {
        let mut core = self.shared.core.lock().await;
        info!("Stopping all playback");
        self.abort_cold_job(&mut core);
        self.stop_current(&mut core).await;
        for idx in 0..SLOT_COUNT {
            self.release_slot(&mut core, idx).await;
        }
        core.pending_wait = None;
        self.emit(PlayerEvent::Idle);
    }

    /// Point-in-time view of queue, slots, and current playback.
    pub async fn snapshot(&self) -> EngineSnapshot {
        let core = self.shared.core.lock().await;
        EngineSnapshot {
            queue_len: core.queue.len(),
            current: core.current.as_ref().map(|c| c.track.clone()),
            pending_wait: core.pending_wait.clone(),
            slots: core
                .slots
                .iter()
                .map(|(_, s)| SlotSnapshot {
                    state: s.state(),
                    track: s.track().cloned(),
                })
                .collect(),
        }
    }

    // ---- event dispatch ----------------------------------------------------

    async fn dispatch(&self, event: EngineEvent) {
        let mut core = self.shared.core.lock().await;
        match event {
            EngineEvent::ResolveFinished { job, link, result } => {
                self.on_resolve_finished(&mut core, job, link, result).await;
            }
            EngineEvent::PlayerStarted { slot, token } => {
                self.on_player_started(&mut core, slot, token).await;
            }
            EngineEvent::PlayerStartFailed { slot, token } => {
                self.on_player_start_failed(&mut core, slot, token).await;
            }
            EngineEvent::PlaybackBegan { token } => {
                if let Some(current) = core.current.as_ref().filter(|c| c.token == token) {
                    self.emit(PlayerEvent::PlaybackBegan {
                        track: current.track.clone(),
                    });
                }
            }
            EngineEvent::Progress {
                token,
                position_secs,
                duration_secs,
            } => {
                if let Some(current) = core.current.as_ref().filter(|c| c.token == token) {
                    self.emit(PlayerEvent::Progress {
                        track: current.track.clone(),
                        position_secs,
                        duration_secs,
                    });
                }
            }
            EngineEvent::ProcessExited { token } => {
                self.on_process_exited(&mut core, token).await;
            }
        }
    }

    /// The play-request protocol. Four steps, each a fallback for the one
    /// before it: instant switch on a ready slot, wait on an in-flight
    /// prefetch, cold path, then speculative prefetch of the new queue head.
    async fn request_play(&self, core: &mut EngineCore, track: TrackDescriptor) {
        // A new request supersedes any previously deferred one; step 2 below
        // re-records a wait when this request itself must defer.
        if let Some(stale) = core.pending_wait.take() {
            debug!("Superseding deferred request for {}", stale.link);
        }

        // Step 1: a ready slot for this link means instant switch.
        if let Some(idx) = core.slots.find(&[SlotState::Ready], &track.link) {
            self.abort_cold_job(core);
            self.stop_current(core).await;

            let resumed = match core.slots.get_mut(idx).and_then(|s| s.process_mut()) {
                Some(process) => process.resume().await,
                None => Err(Error::InvalidState(
                    "ready slot missing its process".to_string(),
                )),
            };

            match resumed {
                Ok(()) => match self.promote_slot(core, idx, &track) {
                    Ok(()) => {
                        info!("Instant switch to {} (slot {})", track.link, idx);
                        self.emit(PlayerEvent::TrackStarted {
                            track,
                            timestamp: Utc::now(),
                        });
                        self.prefetch_head(core);
                        return;
                    }
                    Err(e) => {
                        warn!("Promotion of slot {} failed: {}", idx, e);
                        self.release_slot(core, idx).await;
                    }
                },
                Err(e) => {
                    warn!("Resume failed for {} (slot {}): {}", track.link, idx, e);
                    self.release_slot(core, idx).await;
                }
            }
            // Fall through to the cold path.
        }

        // Step 2: a prefetch for this link is in flight; wait for it.
        if core
            .slots
            .find(&[SlotState::Prefetching, SlotState::Buffering], &track.link)
            .is_some()
        {
            self.abort_cold_job(core);
            self.stop_current(core).await;
            debug!("Deferring play of {} until its prefetch completes", track.link);
            core.pending_wait = Some(track.clone());
            self.emit(PlayerEvent::Loading { track });
            return;
        }

        // Step 3: cold path. A resolve already in flight for this exact link
        // is reused rather than duplicated.
        if core
            .cold_job
            .as_ref()
            .is_some_and(|j| j.track.link == track.link)
        {
            debug!("Resolve already in flight for {}", track.link);
            return;
        }
        self.abort_cold_job(core);
        self.stop_current(core).await;

        // Speculative resolves for other tracks are superseded by this
        // request; players already buffering are left alone.
        let stale: Vec<usize> = core
            .slots
            .iter()
            .filter(|(_, s)| {
                s.state() == SlotState::Prefetching
                    && s.track().is_some_and(|t| t.link != track.link)
            })
            .map(|(idx, _)| idx)
            .collect();
        for idx in stale {
            self.release_slot(core, idx).await;
        }

        if let Some(url) = core.cache.take(&track.link) {
            debug!("Cache hit for {}", track.link);
            self.launch_direct_current(core, track, url).await;
            return;
        }

        let job = self.next_id();
        let handle = self.spawn_resolve(job, track.link.clone());
        core.cold_job = Some(ColdJob {
            id: job,
            track: track.clone(),
            handle,
        });
        self.emit(PlayerEvent::Loading { track });
    }

    async fn on_resolve_finished(
        &self,
        core: &mut EngineCore,
        job: JobId,
        link: String,
        result: std::result::Result<String, String>,
    ) {
        // Every successful resolution is cached; entries for tracks that are
        // no longer wanted stay available for a later cold path and are
        // dropped on queue-clear.
        if let Ok(url) = &result {
            core.cache.put(link.clone(), url.clone());
        }

        if core.cold_job.as_ref().is_some_and(|j| j.id == job) {
            if let Some(cold) = core.cold_job.take() {
                match result {
                    Ok(_) => {
                        if let Some(url) = core.cache.take(&link) {
                            self.launch_direct_current(core, cold.track, url).await;
                        }
                    }
                    Err(reason) => {
                        error!("Resolution failed for {}: {}", link, reason);
                        self.emit(PlayerEvent::PlaybackError {
                            message: format!("could not resolve {}: {}", cold.track.title, reason),
                            timestamp: Utc::now(),
                        });
                        self.emit(PlayerEvent::Idle);
                    }
                }
            }
            return;
        }

        // Speculative prefetch completion.
        let Some(idx) = core
            .slots
            .iter()
            .find_map(|(i, s)| (s.job_id() == Some(job)).then_some(i))
        else {
            debug!("Stale resolve completion for job {} ({})", job, link);
            return;
        };
        let Some(slot_track) = core.slots.get(idx).and_then(|s| s.track()).cloned() else {
            return;
        };

        // A play request arrived while this prefetch was in flight; serve it
        // now, cache-assisted if the resolve succeeded.
        if core
            .pending_wait
            .as_ref()
            .is_some_and(|t| t.link == slot_track.link)
        {
            if let Some(waiting) = core.pending_wait.take() {
                debug!("Prefetch for waiting request {} completed", waiting.link);
                self.release_slot(core, idx).await;
                self.request_play(core, waiting).await;
            }
            return;
        }

        match result {
            Ok(url) if core.queue.head().is_some_and(|h| h.link == slot_track.link) => {
                core.cache.take(&slot_track.link);
                let token = self.next_id();
                match self
                    .shared
                    .launcher
                    .launch_buffered(&url, idx, token, self.shared.events_tx.clone())
                    .await
                {
                    Ok(process) => {
                        if let Some(slot) = core.slots.get_mut(idx) {
                            if let Err(e) = slot.begin_buffering(process) {
                                warn!("Slot {} refused buffering: {}", idx, e);
                            } else {
                                debug!("Buffering {} in slot {} (paused)", slot_track.link, idx);
                            }
                        }
                    }
                    Err(e) => {
                        warn!("Buffered launch failed for {}: {}", slot_track.link, e);
                        self.release_slot(core, idx).await;
                    }
                }
            }
            Ok(_) => {
                // No longer the queue head; the cached URL keeps the work.
                debug!("Prefetched {} is stale, releasing slot {}", slot_track.link, idx);
                self.release_slot(core, idx).await;
            }
            Err(reason) => {
                warn!("Prefetch failed for {}: {}", slot_track.link, reason);
                self.release_slot(core, idx).await;
            }
        }
    }

    async fn on_player_started(&self, core: &mut EngineCore, idx: usize, token: ProcessToken) {
        let live = core
            .slots
            .get(idx)
            .is_some_and(|s| s.token() == Some(token) && s.state() == SlotState::Buffering);
        if !live {
            debug!("Stale player-started for slot {} (token {})", idx, token);
            return;
        }

        if let Some(slot) = core.slots.get_mut(idx) {
            if let Err(e) = slot.mark_ready() {
                warn!("Slot {} refused ready: {}", idx, e);
                return;
            }
        }
        debug!("Slot {} ready for instant switch", idx);

        // The wait may have been registered while this slot was buffering.
        let waiting = core
            .pending_wait
            .as_ref()
            .zip(core.slots.get(idx).and_then(|s| s.track()))
            .is_some_and(|(w, t)| w.link == t.link);
        if waiting {
            if let Some(track) = core.pending_wait.take() {
                self.request_play(core, track).await;
            }
        }
    }

    async fn on_player_start_failed(&self, core: &mut EngineCore, idx: usize, token: ProcessToken) {
        let live = core.slots.get(idx).is_some_and(|s| s.token() == Some(token));
        if !live {
            return;
        }

        let track = core.slots.get(idx).and_then(|s| s.track()).cloned();
        warn!("Buffered player in slot {} never became reachable", idx);
        self.release_slot(core, idx).await;

        if let Some(track) = track {
            if core.pending_wait.as_ref().is_some_and(|t| t.link == track.link) {
                core.pending_wait = None;
                self.request_play(core, track).await;
            }
        }
    }

    /// A player process exited: natural end-of-track and abnormal death are
    /// treated identically (advance the queue). Deliberate stops detach the
    /// exit notification first and never arrive here.
    async fn on_process_exited(&self, core: &mut EngineCore, token: ProcessToken) {
        if core.current.as_ref().is_some_and(|c| c.token == token) {
            if let Some(current) = core.current.take() {
                info!(
                    "Playback finished: {} (after {:?})",
                    current.track.title,
                    current.started_at.elapsed()
                );
                self.emit(PlayerEvent::TrackFinished {
                    track: current.track,
                    timestamp: Utc::now(),
                });
                if let PlaybackSource::Slot(idx) = current.source {
                    self.release_slot(core, idx).await;
                }
            }

            match core.queue.dequeue_front() {
                Some(next) => {
                    self.emit(PlayerEvent::QueueChanged {
                        remaining: core.queue.len(),
                    });
                    self.request_play(core, next).await;
                }
                None => self.emit(PlayerEvent::Idle),
            }
            return;
        }

        if let Some(idx) = core.slots.find_by_token(token) {
            warn!("Buffered player in slot {} exited prematurely", idx);
            let track = core.slots.get(idx).and_then(|s| s.track()).cloned();
            self.release_slot(core, idx).await;
            if let Some(track) = track {
                if core.pending_wait.as_ref().is_some_and(|t| t.link == track.link) {
                    core.pending_wait = None;
                    self.request_play(core, track).await;
                }
            }
            return;
        }

        debug!("Stale process exit (token {})", token);
    }

    // ---- helpers -----------------------------------------------------------

    fn next_id(&self) -> u64 {
        self.shared.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn emit(&self, event: PlayerEvent) {
        // No receivers is fine; observers are optional.
        let _ = self.shared.observer_tx.send(event);
    }

    fn spawn_resolve(&self, job: JobId, link: String) -> JoinHandle<()> {
        let resolver = Arc::clone(&self.shared.resolver);
        let events = self.shared.events_tx.clone();
        tokio::spawn(async move {
            debug!("Resolve job {} started for {}", job, link);
            let result = resolver.resolve(&link).await.map_err(|e| e.to_string());
            let _ = events.send(EngineEvent::ResolveFinished { job, link, result });
        })
    }

    /// Speculatively resolve and pre-buffer the queue head, if there is one,
    /// nothing already covers it, and a free slot exists. Idempotent.
    fn prefetch_head(&self, core: &mut EngineCore) {
        if core.current.is_none() {
            return;
        }
        let Some(head) = core.queue.head().cloned() else {
            return;
        };
        if core
            .slots
            .find(
                &[SlotState::Prefetching, SlotState::Buffering, SlotState::Ready],
                &head.link,
            )
            .is_some()
        {
            return;
        }
        let Some(idx) = core.slots.acquire_free() else {
            return;
        };

        let job = self.next_id();
        let handle = self.spawn_resolve(job, head.link.clone());
        if let Some(slot) = core.slots.get_mut(idx) {
            match slot.begin_prefetch(head.clone(), ResolveJob::new(job, handle)) {
                Ok(()) => debug!("Prefetching {} in slot {}", head.link, idx),
                Err(e) => warn!("Slot {} refused prefetch: {}", idx, e),
            }
        }
    }

    /// Launch an unpaused player on `url` as current playback (cold path),
    /// then prefetch the new queue head.
    async fn launch_direct_current(
        &self,
        core: &mut EngineCore,
        track: TrackDescriptor,
        url: String,
    ) {
        let token = self.next_id();
        match self
            .shared
            .launcher
            .launch_direct(&url, token, self.shared.events_tx.clone())
            .await
        {
            Ok(process) => {
                info!("Direct launch of {}", track.link);
                core.current = Some(CurrentPlayback {
                    track: track.clone(),
                    token,
                    source: PlaybackSource::Direct(process),
                    started_at: Instant::now(),
                });
                self.emit(PlayerEvent::TrackStarted {
                    track,
                    timestamp: Utc::now(),
                });
                self.prefetch_head(core);
            }
            Err(e) => {
                error!("Player launch failed for {}: {}", track.link, e);
                self.emit(PlayerEvent::PlaybackError {
                    message: format!("could not start player for {}: {}", track.title, e),
                    timestamp: Utc::now(),
                });
                self.emit(PlayerEvent::Idle);
            }
        }
    }

    /// Ready -> Playing for slot `idx`, installing it as current playback.
    fn promote_slot(&self, core: &mut EngineCore, idx: usize, track: &TrackDescriptor) -> Result<()> {
        let slot = core
            .slots
            .get_mut(idx)
            .ok_or_else(|| Error::Internal(format!("no slot {}", idx)))?;
        slot.promote()?;
        let token = slot
            .token()
            .ok_or_else(|| Error::InvalidState("playing slot missing its process".to_string()))?;
        core.current = Some(CurrentPlayback {
            track: track.clone(),
            token,
            source: PlaybackSource::Slot(idx),
            started_at: Instant::now(),
        });
        Ok(())
    }

    /// Stop whatever is audible now and announce its end. Leaves slots other
    /// than the current one, the queue, and any cold job untouched.
    async fn stop_current(&self, core: &mut EngineCore) {
        if let Some(current) = core.current.take() {
            info!("Stopping playback of {}", current.track.title);
            self.emit(PlayerEvent::TrackFinished {
                track: current.track,
                timestamp: Utc::now(),
            });
            match current.source {
                PlaybackSource::Slot(idx) => self.release_slot(core, idx).await,
                PlaybackSource::Direct(mut process) => process.shutdown().await,
            }
        }
    }

    /// Return slot `idx` to free: abort its resolve job, shut down its
    /// process. The shutdown detaches exit notification before terminating.
    async fn release_slot(&self, core: &mut EngineCore, idx: usize) {
        if let Some(slot) = core.slots.get_mut(idx) {
            if let Some(mut process) = slot.release() {
                process.shutdown().await;
            }
        }
    }

    fn abort_cold_job(&self, core: &mut EngineCore) {
        if let Some(job) = core.cold_job.take() {
            debug!("Aborting cold resolve job {} for {}", job.id, job.track.link);
            job.handle.abort();
        }
    }
}
