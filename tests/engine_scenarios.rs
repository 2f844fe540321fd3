//! End-to-end scheduling scenarios against fake resolver and launcher.
//!
//! The fakes record every resolver invocation, launch, resume, and shutdown,
//! and let tests gate resolutions or inject process exits, so the full
//! prefetch / instant-switch / cold-path protocol can be driven without any
//! external tools.

use async_trait::async_trait;
use segue::error::{Error, Result};
use segue::events::{EngineEvent, ProcessToken};
use segue::playback::engine::EngineSnapshot;
use segue::playback::SlotState;
use segue::player::{PlayerLauncher, PlayerProcess};
use segue::resolver::MediaResolver;
use segue::{PlaybackEngine, TrackDescriptor};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, Notify};

// ---- fakes -----------------------------------------------------------------

#[derive(Default)]
struct FakeResolver {
    calls: Mutex<Vec<String>>,
    gates: Mutex<HashMap<String, Arc<Notify>>>,
    failing: Mutex<HashSet<String>>,
}

impl FakeResolver {
    fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make resolutions of `link` block until `release` is called.
    fn gate(&self, link: &str) {
        self.gates
            .lock()
            .unwrap()
            .insert(link.to_string(), Arc::new(Notify::new()));
    }

    fn release(&self, link: &str) {
        if let Some(gate) = self.gates.lock().unwrap().get(link) {
            gate.notify_one();
        }
    }

    fn fail(&self, link: &str) {
        self.failing.lock().unwrap().insert(link.to_string());
    }

    fn calls_for(&self, link: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|l| *l == link).count()
    }

    fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl MediaResolver for FakeResolver {
    async fn resolve(&self, link: &str) -> Result<String> {
        self.calls.lock().unwrap().push(link.to_string());
        let gate = self.gates.lock().unwrap().get(link).cloned();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        if self.failing.lock().unwrap().contains(link) {
            Err(Error::Resolve(format!("refused: {}", link)))
        } else {
            Ok(format!("https://cdn.test/{}", link))
        }
    }
}

#[derive(Debug, Clone)]
struct LaunchRecord {
    token: ProcessToken,
    url: String,
    /// None for direct launches.
    slot: Option<usize>,
}

struct LauncherState {
    launches: Vec<LaunchRecord>,
    resumed: Vec<ProcessToken>,
    shutdowns: Vec<ProcessToken>,
    senders: HashMap<ProcessToken, mpsc::UnboundedSender<EngineEvent>>,
    resume_fail: bool,
    /// Emit `PlayerStarted` immediately on buffered launch.
    auto_ready: bool,
}

struct FakeLauncher {
    state: Mutex<LauncherState>,
}

impl FakeLauncher {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(LauncherState {
                launches: Vec::new(),
                resumed: Vec::new(),
                shutdowns: Vec::new(),
                senders: HashMap::new(),
                resume_fail: false,
                auto_ready: true,
            }),
        })
    }

    fn set_resume_fail(&self, fail: bool) {
        self.state.lock().unwrap().resume_fail = fail;
    }

    fn launches(&self) -> Vec<LaunchRecord> {
        self.state.lock().unwrap().launches.clone()
    }

    fn resumed(&self) -> Vec<ProcessToken> {
        self.state.lock().unwrap().resumed.clone()
    }

    fn shutdowns(&self) -> Vec<ProcessToken> {
        self.state.lock().unwrap().shutdowns.clone()
    }

    /// Simulate the watched process exiting (end of track or crash).
    fn emit_process_exited(&self, token: ProcessToken) {
        let sender = self.state.lock().unwrap().senders.get(&token).cloned();
        if let Some(sender) = sender {
            let _ = sender.send(EngineEvent::ProcessExited { token });
        }
    }

    fn record_launch(
        self: &Arc<Self>,
        url: &str,
        slot: Option<usize>,
        token: ProcessToken,
        events: mpsc::UnboundedSender<EngineEvent>,
    ) -> Box<dyn PlayerProcess> {
        let mut state = self.state.lock().unwrap();
        state.launches.push(LaunchRecord {
            token,
            url: url.to_string(),
            slot,
        });
        state.senders.insert(token, events.clone());
        if let Some(slot) = slot {
            if state.auto_ready {
                let _ = events.send(EngineEvent::PlayerStarted { slot, token });
            }
        }
        Box::new(FakeProcess {
            token,
            launcher: Arc::clone(self),
        })
    }
}

/// Launcher handle handed to the engine; keeps the Arc so fake processes can
/// report back into the shared state.
struct ArcLauncher(Arc<FakeLauncher>);

#[async_trait]
impl PlayerLauncher for ArcLauncher {
    async fn launch_direct(
        &self,
        url: &str,
        token: ProcessToken,
        events: mpsc::UnboundedSender<EngineEvent>,
    ) -> Result<Box<dyn PlayerProcess>> {
        Ok(self.0.record_launch(url, None, token, events))
    }

    async fn launch_buffered(
        &self,
        url: &str,
        slot: usize,
        token: ProcessToken,
        events: mpsc::UnboundedSender<EngineEvent>,
    ) -> Result<Box<dyn PlayerProcess>> {
        Ok(self.0.record_launch(url, Some(slot), token, events))
    }
}

struct FakeProcess {
    token: ProcessToken,
    launcher: Arc<FakeLauncher>,
}

#[async_trait]
impl PlayerProcess for FakeProcess {
    async fn resume(&mut self) -> Result<()> {
        let mut state = self.launcher.state.lock().unwrap();
        if state.resume_fail {
            Err(Error::Channel("resume refused".to_string()))
        } else {
            state.resumed.push(self.token);
            Ok(())
        }
    }

    async fn shutdown(&mut self) {
        self.launcher.state.lock().unwrap().shutdowns.push(self.token);
    }

    fn token(&self) -> ProcessToken {
        self.token
    }
}

// ---- harness ---------------------------------------------------------------

fn build_engine() -> (PlaybackEngine, Arc<FakeResolver>, Arc<FakeLauncher>) {
    let resolver = FakeResolver::new();
    let launcher = FakeLauncher::new();
    let engine = PlaybackEngine::with_parts(
        Arc::clone(&resolver) as Arc<dyn MediaResolver>,
        Arc::new(ArcLauncher(Arc::clone(&launcher))),
    );
    engine.start().unwrap();
    (engine, resolver, launcher)
}

fn track(link: &str) -> TrackDescriptor {
    TrackDescriptor::from_link(link)
}

/// Poll snapshots until `pred` holds; panic with the last snapshot if not.
async fn wait_snapshot(
    engine: &PlaybackEngine,
    pred: impl Fn(&EngineSnapshot) -> bool,
) -> EngineSnapshot {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        let snap = engine.snapshot().await;
        if pred(&snap) {
            return snap;
        }
        if tokio::time::Instant::now() > deadline {
            panic!("condition not reached in time; last snapshot: {:?}", snap);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

async fn wait_until(pred: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !pred() {
        if tokio::time::Instant::now() > deadline {
            panic!("condition not reached in time");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

fn assert_invariants(snap: &EngineSnapshot) {
    let playing = snap
        .slots
        .iter()
        .filter(|s| s.state == SlotState::Playing)
        .count();
    assert!(playing <= 1, "more than one playing slot: {:?}", snap);
    for slot in &snap.slots {
        assert_eq!(
            slot.state == SlotState::Free,
            slot.track.is_none(),
            "free/track invariant violated: {:?}",
            snap
        );
    }
}

fn current_link(snap: &EngineSnapshot) -> Option<&str> {
    snap.current.as_ref().map(|t| t.link.as_str())
}

// ---- scenarios -------------------------------------------------------------

#[tokio::test]
async fn stop_all_on_empty_queue_reaches_idle() {
    let (engine, resolver, _launcher) = build_engine();

    engine.play_next().await;
    engine.stop_all().await;

    let snap = engine.snapshot().await;
    assert!(snap.current.is_none());
    assert_eq!(snap.queue_len, 0);
    assert!(snap.slots.iter().all(|s| s.state == SlotState::Free));
    assert_eq!(resolver.total_calls(), 0);
    assert_invariants(&snap);
}

#[tokio::test]
async fn instant_switch_uses_no_resolver_on_transition() {
    let (engine, resolver, launcher) = build_engine();

    engine.enqueue(track("A")).await;
    engine.enqueue(track("B")).await;
    engine.play_next().await;

    // A plays via the cold path, then B is prefetched and its slot becomes
    // ready while A is still audible.
    let snap = wait_snapshot(&engine, |s| {
        current_link(s) == Some("A")
            && s.slots
                .iter()
                .any(|slot| slot.state == SlotState::Ready)
    })
    .await;
    assert_invariants(&snap);
    assert_eq!(resolver.calls_for("A"), 1);
    assert_eq!(resolver.calls_for("B"), 1);

    let launches = launcher.launches();
    assert_eq!(launches.len(), 2);
    let token_a = launches[0].token;
    let token_b = launches[1].token;
    assert!(launches[0].slot.is_none());
    assert!(launches[1].slot.is_some());

    // A finishes naturally; B must be promoted by resume alone.
    launcher.emit_process_exited(token_a);
    let snap = wait_snapshot(&engine, |s| current_link(s) == Some("B")).await;
    assert_invariants(&snap);
    assert!(snap
        .slots
        .iter()
        .any(|slot| slot.state == SlotState::Playing));

    assert_eq!(launcher.resumed(), vec![token_b]);
    assert_eq!(resolver.calls_for("B"), 1, "transition must not re-resolve");
    assert_eq!(launcher.launches().len(), 2, "no new launch on instant switch");
}

#[tokio::test]
async fn duplicate_play_request_does_not_double_resolve() {
    let (engine, resolver, _launcher) = build_engine();
    resolver.gate("A");

    engine.enqueue(track("A")).await;
    engine.play_next().await;
    wait_until(|| resolver.calls_for("A") == 1).await;

    // Ask for the same track again while its cold resolve is still pending.
    engine.enqueue(track("A")).await;
    engine.play_next().await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(resolver.calls_for("A"), 1);

    resolver.release("A");
    let snap = wait_snapshot(&engine, |s| current_link(s) == Some("A")).await;
    assert_invariants(&snap);
    assert_eq!(resolver.calls_for("A"), 1);
}

#[tokio::test]
async fn prefetch_of_head_is_idempotent() {
    let (engine, resolver, launcher) = build_engine();
    resolver.gate("B");

    engine.enqueue(track("A")).await;
    engine.play_next().await;
    wait_snapshot(&engine, |s| current_link(s) == Some("A")).await;

    engine.enqueue(track("B")).await;
    wait_until(|| resolver.calls_for("B") == 1).await;

    // Another enqueue re-examines the head; no second job may start for B.
    engine.enqueue(track("C")).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(resolver.calls_for("B"), 1);

    resolver.release("B");
    wait_until(|| launcher.launches().len() == 2).await;
    assert_eq!(resolver.calls_for("B"), 1);
}

#[tokio::test]
async fn queue_clear_frees_prefetching_slot_but_not_playing() {
    let (engine, resolver, launcher) = build_engine();
    resolver.gate("B");

    engine.enqueue(track("A")).await;
    engine.play_next().await;
    wait_snapshot(&engine, |s| current_link(s) == Some("A")).await;

    engine.enqueue(track("B")).await;
    let snap = wait_snapshot(&engine, |s| {
        s.slots.iter().any(|slot| slot.state == SlotState::Prefetching)
    })
    .await;
    assert_invariants(&snap);

    let launches_before = launcher.launches().len();
    engine.clear_queue().await;

    let snap = engine.snapshot().await;
    assert_eq!(current_link(&snap), Some("A"), "playing track must survive");
    assert_eq!(snap.queue_len, 0);
    assert!(snap.slots.iter().all(|s| s.state == SlotState::Free));
    assert_invariants(&snap);

    // The gated resolve was aborted; releasing the gate must change nothing.
    resolver.release("B");
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(launcher.launches().len(), launches_before);
    assert_eq!(current_link(&engine.snapshot().await), Some("A"));
}

#[tokio::test]
async fn resume_failure_falls_back_to_cold_path() {
    let (engine, resolver, launcher) = build_engine();

    engine.enqueue(track("A")).await;
    engine.enqueue(track("B")).await;
    engine.play_next().await;
    wait_snapshot(&engine, |s| {
        current_link(s) == Some("A") && s.slots.iter().any(|slot| slot.state == SlotState::Ready)
    })
    .await;

    launcher.set_resume_fail(true);
    let token_a = launcher.launches()[0].token;
    let token_b = launcher.launches()[1].token;
    launcher.emit_process_exited(token_a);

    // The unresumable buffered player is discarded and B is re-resolved and
    // launched directly.
    let snap = wait_snapshot(&engine, |s| {
        current_link(s) == Some("B") && s.slots.iter().all(|slot| slot.state == SlotState::Free)
    })
    .await;
    assert_invariants(&snap);
    assert_eq!(resolver.calls_for("B"), 2);
    assert!(launcher.shutdowns().contains(&token_b));

    let launches = launcher.launches();
    assert_eq!(launches.len(), 3);
    assert!(launches[2].slot.is_none(), "fallback must be a direct launch");
}

#[tokio::test]
async fn finish_during_prefetch_defers_then_plays_from_cache() {
    let (engine, resolver, launcher) = build_engine();
    resolver.gate("B");

    engine.enqueue(track("A")).await;
    engine.play_next().await;
    wait_snapshot(&engine, |s| current_link(s) == Some("A")).await;

    engine.enqueue(track("B")).await;
    wait_snapshot(&engine, |s| {
        s.slots.iter().any(|slot| slot.state == SlotState::Prefetching)
    })
    .await;

    // A ends while B is still resolving: the request waits on the prefetch.
    let token_a = launcher.launches()[0].token;
    launcher.emit_process_exited(token_a);
    let snap = wait_snapshot(&engine, |s| {
        s.pending_wait.as_ref().is_some_and(|t| t.link == "B")
    })
    .await;
    assert!(snap.current.is_none());

    // Resolution lands; the waiting request is served from the cached URL
    // with no second resolver call.
    resolver.release("B");
    let snap = wait_snapshot(&engine, |s| current_link(s) == Some("B")).await;
    assert_invariants(&snap);
    assert!(snap.pending_wait.is_none());
    assert_eq!(resolver.calls_for("B"), 1);
}

#[tokio::test]
async fn resolution_failure_reports_error_and_stays_ready() {
    let (engine, resolver, launcher) = build_engine();
    resolver.fail("A");

    let mut events = engine.subscribe();
    engine.enqueue(track("A")).await;
    engine.play_next().await;

    let mut saw_error = false;
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !saw_error && tokio::time::Instant::now() < deadline {
        match tokio::time::timeout(Duration::from_millis(100), events.recv()).await {
            Ok(Ok(segue::PlayerEvent::PlaybackError { message, .. })) => {
                assert!(message.contains("A"));
                saw_error = true;
            }
            Ok(Ok(_)) => {}
            _ => {}
        }
    }
    assert!(saw_error, "expected a playback error event");
    assert!(launcher.launches().is_empty());

    // The scheduler must still serve the next request.
    engine.enqueue(track("B")).await;
    engine.play_next().await;
    let snap = wait_snapshot(&engine, |s| current_link(s) == Some("B")).await;
    assert_invariants(&snap);
}

#[tokio::test]
async fn natural_finish_with_empty_queue_goes_idle() {
    let (engine, resolver, launcher) = build_engine();

    engine.enqueue(track("A")).await;
    engine.play_next().await;
    wait_snapshot(&engine, |s| current_link(s) == Some("A")).await;
    assert_eq!(resolver.calls_for("A"), 1);

    let token_a = launcher.launches()[0].token;
    launcher.emit_process_exited(token_a);

    let snap = wait_snapshot(&engine, |s| s.current.is_none()).await;
    assert_eq!(snap.queue_len, 0);
    assert!(snap.slots.iter().all(|s| s.state == SlotState::Free));
    assert_invariants(&snap);
}

#[tokio::test]
async fn superseded_deferred_request_does_not_steal_playback() {
    let (engine, resolver, launcher) = build_engine();
    resolver.gate("T");

    engine.enqueue(track("A")).await;
    engine.play_next().await;
    wait_snapshot(&engine, |s| current_link(s) == Some("A")).await;

    // A ends while T is still resolving: the request for T is deferred.
    engine.enqueue(track("T")).await;
    wait_until(|| resolver.calls_for("T") == 1).await;
    let token_a = launcher.launches()[0].token;
    launcher.emit_process_exited(token_a);
    wait_snapshot(&engine, |s| {
        s.pending_wait.as_ref().is_some_and(|t| t.link == "T")
    })
    .await;

    // The user plays U instead; the deferred request for T is superseded.
    engine.enqueue(track("U")).await;
    engine.play_next().await;
    let snap = wait_snapshot(&engine, |s| current_link(s) == Some("U")).await;
    assert!(snap.pending_wait.is_none());

    // T is queued again and its speculative resolve completes. That may only
    // pre-buffer a slot; U keeps playing.
    engine.enqueue(track("T")).await;
    wait_until(|| resolver.calls_for("T") == 2).await;
    resolver.release("T");
    let snap = wait_snapshot(&engine, |s| {
        s.slots.iter().any(|slot| slot.state == SlotState::Ready)
    })
    .await;
    assert_eq!(current_link(&snap), Some("U"));
    assert_invariants(&snap);
    assert!(launcher.resumed().is_empty());
}

#[tokio::test]
async fn new_request_supersedes_other_prefetch_on_cold_path() {
    let (engine, resolver, launcher) = build_engine();
    resolver.gate("B");

    engine.enqueue(track("A")).await;
    engine.play_next().await;
    wait_snapshot(&engine, |s| current_link(s) == Some("A")).await;

    engine.enqueue(track("B")).await;
    wait_until(|| resolver.calls_for("B") == 1).await;

    // Jump the queue with a track nothing covers: B's speculative resolve is
    // superseded and C goes cold.
    engine.enqueue(track("C")).await;
    engine.remove_queued(0).await; // drop B from the queue
    engine.play_next().await;

    let snap = wait_snapshot(&engine, |s| current_link(s) == Some("C")).await;
    assert_invariants(&snap);
    assert_eq!(resolver.calls_for("C"), 1);

    // B's job was aborted with its slot.
    resolver.release("B");
    tokio::time::sleep(Duration::from_millis(50)).await;
    let snap = engine.snapshot().await;
    assert_eq!(current_link(&snap), Some("C"));
    assert!(launcher.launches().iter().all(|l| !l.url.ends_with("/B")));
}
