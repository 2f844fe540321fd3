//! Per-slot player control channel
//!
//! A buffered slot's player process is started paused and bound to a local
//! Unix socket. The channel speaks the player's line-delimited JSON command
//! protocol; the only command this scheduler ever sends is "set the pause
//! property to false". Delivery is connect + write; no response is awaited.
//!
//! The resume dispatch is the one deliberately blocking call in the control
//! loop, bounded by the configured timeout (~1s).

use crate::error::{Error, Result};
use serde_json::json;
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::UnixStream;
use tracing::debug;

/// Local IPC endpoint for remotely resuming a paused player process.
#[derive(Debug, Clone)]
pub struct ControlChannel {
    socket_path: PathBuf,
    timeout: Duration,
}

impl ControlChannel {
    pub fn new(socket_path: PathBuf, timeout: Duration) -> Self {
        Self {
            socket_path,
            timeout,
        }
    }

    /// Send the resume command: one line-delimited JSON message setting the
    /// pause property to false. Success is connect + write succeeding within
    /// the bound; the player sends no acknowledgement we care about.
    pub async fn resume(&self) -> Result<()> {
        let dispatch = async {
            let mut stream = UnixStream::connect(&self.socket_path).await?;
            let mut line = json!({"command": ["set_property", "pause", false]}).to_string();
            line.push('\n');
            stream.write_all(line.as_bytes()).await?;
            stream.flush().await?;
            Ok::<(), std::io::Error>(())
        };

        tokio::time::timeout(self.timeout, dispatch)
            .await
            .map_err(|_| {
                Error::Channel(format!(
                    "resume timed out after {:?} on {:?}",
                    self.timeout, self.socket_path
                ))
            })?
            .map_err(|e| Error::Channel(format!("resume failed on {:?}: {}", self.socket_path, e)))?;

        debug!("Resume dispatched on {:?}", self.socket_path);
        Ok(())
    }

    /// Probe whether the socket accepts a connection yet. Used to detect the
    /// moment a paused player process becomes remotely controllable.
    pub async fn probe(&self) -> bool {
        match tokio::time::timeout(self.timeout, UnixStream::connect(&self.socket_path)).await {
            Ok(Ok(_stream)) => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::UnixListener;

    #[tokio::test]
    async fn test_resume_fails_on_missing_socket() {
        let dir = tempfile::tempdir().unwrap();
        let channel = ControlChannel::new(dir.path().join("absent.sock"), Duration::from_millis(200));

        let err = channel.resume().await.unwrap_err();
        assert!(matches!(err, Error::Channel(_)));
    }

    #[tokio::test]
    async fn test_probe_reports_reachability() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("player.sock");

        let channel = ControlChannel::new(path.clone(), Duration::from_millis(200));
        assert!(!channel.probe().await);

        let _listener = UnixListener::bind(&path).unwrap();
        assert!(channel.probe().await);
    }

    #[tokio::test]
    async fn test_resume_writes_pause_command() {
        use tokio::io::AsyncBufReadExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("player.sock");
        let listener = UnixListener::bind(&path).unwrap();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut lines = tokio::io::BufReader::new(stream).lines();
            lines.next_line().await.unwrap().unwrap()
        });

        let channel = ControlChannel::new(path, Duration::from_millis(500));
        channel.resume().await.unwrap();

        let line = server.await.unwrap();
        let msg: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(msg["command"][0], "set_property");
        assert_eq!(msg["command"][1], "pause");
        assert_eq!(msg["command"][2], false);
    }
}
