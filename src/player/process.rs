//! Player process launching and lifecycle
//!
//! Two launch modes:
//! - **Direct**: audio-only player started unpaused on a resolved URL; no
//!   control channel. Used on the cold path.
//! - **Buffered**: audio-only player started paused and bound to a per-slot
//!   control socket, so it pre-buffers while another track plays and can be
//!   unpaused in under a second.
//!
//! Each launched process is watched by a monitor task that reports exit as an
//! engine event. Deliberate stops go through `shutdown`, which detaches the
//! exit notification before terminating the process so a stop never looks
//! like an end-of-track.

use crate::config::PlayerConfig;
use crate::error::{Error, Result};
use crate::events::{EngineEvent, ProcessToken};
use crate::player::ipc::ControlChannel;
use crate::status::{parse_status_line, StatusUpdate};
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Base arguments for every player launch: audio only, no OSD bar, verbose
/// enough status output for progress parsing.
const PLAYER_BASE_ARGS: &[&str] = &["--no-video", "--term-osd-bar=no", "--msg-level=all=status"];

/// How long to wait for a terminated process to actually exit.
const SHUTDOWN_WAIT: Duration = Duration::from_secs(1);

/// Interval between control-socket reachability probes.
const PROBE_INTERVAL: Duration = Duration::from_millis(100);

/// Per-probe connect bound.
const PROBE_CONNECT_TIMEOUT: Duration = Duration::from_millis(250);

/// Window within which a paused player must expose its control socket.
const READY_PROBE_WINDOW: Duration = Duration::from_secs(10);

/// Cap on one accumulated status line; anything longer is truncated.
const MAX_STATUS_LINE: usize = 4096;

/// Handle to one launched player process.
#[async_trait]
pub trait PlayerProcess: Send {
    /// Unpause via the slot's control channel. Fails on direct players.
    async fn resume(&mut self) -> Result<()>;

    /// Detach the exit notification, then terminate the process. Safe to call
    /// after the process has already exited.
    async fn shutdown(&mut self);

    fn token(&self) -> ProcessToken;
}

/// Launches player processes. Trait seam so tests can substitute a fake.
#[async_trait]
pub trait PlayerLauncher: Send + Sync {
    /// Launch an unpaused player on `url`. Progress and exit are reported as
    /// engine events tagged with `token`.
    async fn launch_direct(
        &self,
        url: &str,
        token: ProcessToken,
        events: mpsc::UnboundedSender<EngineEvent>,
    ) -> Result<Box<dyn PlayerProcess>>;

    /// Launch a paused player on `url` bound to the slot's control socket.
    /// Emits `PlayerStarted { slot, .. }` once the socket is reachable, or
    /// `PlayerStartFailed` if it never becomes so.
    async fn launch_buffered(
        &self,
        url: &str,
        slot: usize,
        token: ProcessToken,
        events: mpsc::UnboundedSender<EngineEvent>,
    ) -> Result<Box<dyn PlayerProcess>>;
}

/// Production launcher shelling out to mpv.
pub struct MpvLauncher {
    config: PlayerConfig,
}

impl MpvLauncher {
    pub fn new(config: PlayerConfig) -> Self {
        Self { config }
    }

    /// Per-slot control socket path, unique per launch so a dying process
    /// cannot collide with its successor.
    fn socket_path(&self, slot: usize, token: ProcessToken) -> PathBuf {
        self.config
            .ipc_dir()
            .join(format!("segue-{}-s{}-{}.sock", std::process::id(), slot, token))
    }

    fn spawn_player(&self, extra_args: &[String], url: &str) -> Result<Child> {
        let mut cmd = Command::new(&self.config.bin);
        cmd.args(PLAYER_BASE_ARGS)
            .args(extra_args)
            .arg(url)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        cmd.spawn()
            .map_err(|e| Error::Player(format!("failed to launch {}: {}", self.config.bin, e)))
    }
}

#[async_trait]
impl PlayerLauncher for MpvLauncher {
    async fn launch_direct(
        &self,
        url: &str,
        token: ProcessToken,
        events: mpsc::UnboundedSender<EngineEvent>,
    ) -> Result<Box<dyn PlayerProcess>> {
        let mut child = self.spawn_player(&[], url)?;
        debug!("Launched direct player (token {})", token);

        attach_status_readers(&mut child, token, &events);
        let ctl = spawn_monitor(child, token, events, None);

        Ok(Box::new(MpvProcess {
            token,
            ctl,
            channel: None,
        }))
    }

    async fn launch_buffered(
        &self,
        url: &str,
        slot: usize,
        token: ProcessToken,
        events: mpsc::UnboundedSender<EngineEvent>,
    ) -> Result<Box<dyn PlayerProcess>> {
        let socket_path = self.socket_path(slot, token);
        let extra = vec![
            "--pause".to_string(),
            format!("--input-ipc-server={}", socket_path.display()),
        ];

        let mut child = self.spawn_player(&extra, url)?;
        debug!(
            "Launched buffered player for slot {} (token {}, socket {:?})",
            slot, token, socket_path
        );

        attach_status_readers(&mut child, token, &events);
        let ctl = spawn_monitor(child, token, events.clone(), Some(socket_path.clone()));

        // Reachability probe: the slot is promotable once the control socket
        // accepts a connection.
        let probe = ControlChannel::new(socket_path.clone(), PROBE_CONNECT_TIMEOUT);
        tokio::spawn(async move {
            let deadline = tokio::time::Instant::now() + READY_PROBE_WINDOW;
            loop {
                if probe.probe().await {
                    let _ = events.send(EngineEvent::PlayerStarted { slot, token });
                    return;
                }
                if tokio::time::Instant::now() >= deadline {
                    warn!("Control socket for slot {} never became reachable", slot);
                    let _ = events.send(EngineEvent::PlayerStartFailed { slot, token });
                    return;
                }
                tokio::time::sleep(PROBE_INTERVAL).await;
            }
        });

        Ok(Box::new(MpvProcess {
            token,
            ctl,
            channel: Some(ControlChannel::new(socket_path, self.config.resume_timeout())),
        }))
    }
}

/// Handle to a launched mpv process.
struct MpvProcess {
    token: ProcessToken,
    /// Termination request channel into the monitor task.
    ctl: mpsc::Sender<()>,
    /// Control channel; present only for buffered launches.
    channel: Option<ControlChannel>,
}

#[async_trait]
impl PlayerProcess for MpvProcess {
    async fn resume(&mut self) -> Result<()> {
        match &self.channel {
            Some(channel) => channel.resume().await,
            None => Err(Error::InvalidState(
                "direct player has no control channel".to_string(),
            )),
        }
    }

    async fn shutdown(&mut self) {
        // Monitor gone means the process already exited; nothing to do.
        let _ = self.ctl.send(()).await;
    }

    fn token(&self) -> ProcessToken {
        self.token
    }
}

/// Watch one child process. Natural exit emits `ProcessExited`; a termination
/// request detaches that notification first, then kills the process, so
/// deliberate stops never fire stale continuations.
fn spawn_monitor(
    mut child: Child,
    token: ProcessToken,
    events: mpsc::UnboundedSender<EngineEvent>,
    socket_path: Option<PathBuf>,
) -> mpsc::Sender<()> {
    let (ctl_tx, mut ctl_rx) = mpsc::channel::<()>(1);

    tokio::spawn(async move {
        tokio::select! {
            status = child.wait() => {
                debug!("Player process exited (token {}): {:?}", token, status);
                let _ = events.send(EngineEvent::ProcessExited { token });
            }
            _ = ctl_rx.recv() => {
                let _ = child.start_kill();
                let _ = tokio::time::timeout(SHUTDOWN_WAIT, child.wait()).await;
                debug!("Player process terminated (token {})", token);
            }
        }

        if let Some(path) = socket_path {
            let _ = tokio::fs::remove_file(path).await;
        }
    });

    ctl_tx
}

fn attach_status_readers(
    child: &mut Child,
    token: ProcessToken,
    events: &mpsc::UnboundedSender<EngineEvent>,
) {
    if let Some(stdout) = child.stdout.take() {
        spawn_status_reader(stdout, token, events.clone());
    }
    if let Some(stderr) = child.stderr.take() {
        spawn_status_reader(stderr, token, events.clone());
    }
}

/// Read one diagnostic stream, splitting on both carriage returns and
/// newlines (the player redraws its status line with `\r`), and translate
/// recognized lines into engine events.
fn spawn_status_reader(
    stream: impl AsyncRead + Unpin + Send + 'static,
    token: ProcessToken,
    events: mpsc::UnboundedSender<EngineEvent>,
) {
    tokio::spawn(async move {
        let mut reader = BufReader::new(stream);
        let mut line = Vec::new();
        let mut chunk = [0u8; 1024];
        let mut began = false;

        loop {
            let n = match reader.read(&mut chunk).await {
                Ok(0) | Err(_) => break,
                Ok(n) => n,
            };

            for &byte in &chunk[..n] {
                if byte != b'\n' && byte != b'\r' {
                    if line.len() < MAX_STATUS_LINE {
                        line.push(byte);
                    }
                    continue;
                }
                if line.is_empty() {
                    continue;
                }
                let text = String::from_utf8_lossy(&line).into_owned();
                line.clear();

                match parse_status_line(&text) {
                    Some(StatusUpdate::Progress {
                        position_secs,
                        duration_secs,
                    }) => {
                        if !began {
                            began = true;
                            let _ = events.send(EngineEvent::PlaybackBegan { token });
                        }
                        let _ = events.send(EngineEvent::Progress {
                            token,
                            position_secs,
                            duration_secs,
                        });
                    }
                    Some(StatusUpdate::Error { line }) => {
                        warn!("Player (token {}): {}", token, line);
                    }
                    None => {}
                }
            }
        }
    });
}
