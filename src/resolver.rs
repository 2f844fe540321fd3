//! Stream URL resolution
//!
//! Wraps one external-tool invocation per call behind the `MediaResolver`
//! trait. The trait seam lets the engine run against a fake resolver in
//! tests; the production implementation shells out to a yt-dlp style tool
//! requesting best-audio format and URL-only output.
//!
//! The tool carries its own bounded socket timeout and retry count (from
//! configuration); the resolver applies one outer deadline over the whole
//! invocation and never retries on its own.

use crate::config::ResolverConfig;
use crate::error::{Error, Result};
use crate::status::contains_error_keyword;
use async_trait::async_trait;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, warn};

/// Resolves a track link to a directly playable stream URL.
#[async_trait]
pub trait MediaResolver: Send + Sync {
    /// Resolve `link` to a stream URL.
    ///
    /// One external invocation per call; cancellation is the caller's job
    /// (abort the task driving this future).
    async fn resolve(&self, link: &str) -> Result<String>;
}

/// Production resolver shelling out to yt-dlp.
pub struct YtDlpResolver {
    config: ResolverConfig,
}

impl YtDlpResolver {
    pub fn new(config: ResolverConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl MediaResolver for YtDlpResolver {
    async fn resolve(&self, link: &str) -> Result<String> {
        let mut cmd = Command::new(&self.config.bin);
        cmd.arg("-f")
            .arg("bestaudio")
            .arg("-g")
            .arg("--socket-timeout")
            .arg(self.config.socket_timeout_secs.to_string())
            .arg("--retries")
            .arg(self.config.retries.to_string())
            .arg("--fragment-retries")
            .arg(self.config.fragment_retries.to_string());

        if let Some(cookies) = &self.config.cookies {
            cmd.arg("--cookies").arg(cookies);
        }

        cmd.arg(link)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!("Resolving stream URL for {}", link);

        let output = tokio::time::timeout(self.config.job_timeout(), cmd.output())
            .await
            .map_err(|_| Error::Resolve(format!("resolver timed out for {}", link)))?
            .map_err(|e| Error::Resolve(format!("failed to launch {}: {}", self.config.bin, e)))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);

        let url = classify_output(output.status.success(), &stdout, &stderr)?;
        debug!("Resolved {} -> {}", link, url);
        Ok(url)
    }
}

/// Classify one finished invocation: a stdout line carrying a URL scheme
/// prefix is success; everything else (non-zero exit, error keywords on
/// stderr, empty output) is failure.
fn classify_output(exit_ok: bool, stdout: &str, stderr: &str) -> Result<String> {
    let error_line = stderr.lines().find(|l| contains_error_keyword(l));

    if !exit_ok {
        let detail = error_line.unwrap_or("resolver exited with failure").trim();
        return Err(Error::Resolve(detail.to_string()));
    }

    if let Some(line) = error_line {
        warn!("Resolver reported: {}", line.trim());
        return Err(Error::Resolve(line.trim().to_string()));
    }

    stdout
        .lines()
        .map(str::trim)
        .find(|l| is_stream_url(l))
        .map(str::to_string)
        .ok_or_else(|| Error::Resolve("resolver produced no stream URL".to_string()))
}

/// A playable stream URL begins with a URL scheme prefix.
fn is_stream_url(line: &str) -> bool {
    line.starts_with("http://") || line.starts_with("https://")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_success() {
        let url = classify_output(true, "https://cdn.example/stream?e=1\n", "").unwrap();
        assert_eq!(url, "https://cdn.example/stream?e=1");
    }

    #[test]
    fn test_classify_skips_noise_before_url() {
        let url = classify_output(
            true,
            "[youtube] extracting\nhttps://cdn.example/a\n",
            "[debug] ignored\n",
        )
        .unwrap();
        assert_eq!(url, "https://cdn.example/a");
    }

    #[test]
    fn test_classify_nonzero_exit_is_failure() {
        let err = classify_output(false, "", "ERROR: video unavailable\n").unwrap_err();
        assert!(err.to_string().contains("video unavailable"));
    }

    #[test]
    fn test_classify_stderr_keyword_is_failure() {
        // Bot-detection refusals can arrive with a zero exit code.
        let err = classify_output(
            true,
            "https://cdn.example/a\n",
            "Sign in to confirm you're not a bot\n",
        );
        assert!(err.is_err());
    }

    #[test]
    fn test_classify_empty_output_is_failure() {
        assert!(classify_output(true, "", "").is_err());
    }

    #[test]
    fn test_is_stream_url() {
        assert!(is_stream_url("https://cdn.example/a"));
        assert!(is_stream_url("http://cdn.example/a"));
        assert!(!is_stream_url("ftp://cdn.example/a"));
        assert!(!is_stream_url("WARNING: something"));
    }
}
