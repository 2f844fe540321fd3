//! Configuration management for segue
//!
//! Configuration is a TOML file merged with command-line overrides; every
//! setting has a built-in default so the player runs with no file at all.
//!
//! Settings priority:
//! 1. Command-line arguments
//! 2. TOML configuration file
//! 3. Built-in defaults (code constants)

use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

/// Complete application configuration.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    /// Stream URL resolver tool settings
    #[serde(default)]
    pub resolver: ResolverConfig,

    /// Player process settings
    #[serde(default)]
    pub player: PlayerConfig,

    /// Logging settings
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Settings for the external URL-resolution tool.
#[derive(Debug, Clone, Deserialize)]
pub struct ResolverConfig {
    /// Resolver binary name or path
    #[serde(default = "default_resolver_bin")]
    pub bin: String,

    /// Socket timeout passed to the tool, in seconds
    #[serde(default = "default_socket_timeout_secs")]
    pub socket_timeout_secs: u64,

    /// Download retries passed to the tool
    #[serde(default = "default_retries")]
    pub retries: u32,

    /// Fragment retries passed to the tool
    #[serde(default = "default_retries")]
    pub fragment_retries: u32,

    /// Optional authentication-cookie file forwarded to the tool
    #[serde(default)]
    pub cookies: Option<PathBuf>,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            bin: default_resolver_bin(),
            socket_timeout_secs: default_socket_timeout_secs(),
            retries: default_retries(),
            fragment_retries: default_retries(),
            cookies: None,
        }
    }
}

impl ResolverConfig {
    /// Overall deadline for one resolver invocation.
    ///
    /// The tool applies its own socket timeout per attempt; the outer bound
    /// covers all attempts plus process startup slack.
    pub fn job_timeout(&self) -> Duration {
        let attempts = u64::from(self.retries) + 1;
        Duration::from_secs(self.socket_timeout_secs * attempts + 5)
    }
}

/// Settings for the external player tool.
#[derive(Debug, Clone, Deserialize)]
pub struct PlayerConfig {
    /// Player binary name or path
    #[serde(default = "default_player_bin")]
    pub bin: String,

    /// Directory for per-slot control sockets; system temp dir if unset
    #[serde(default)]
    pub ipc_dir: Option<PathBuf>,

    /// Bound on the resume-command dispatch (connect + write), in milliseconds
    #[serde(default = "default_resume_timeout_ms")]
    pub resume_timeout_ms: u64,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            bin: default_player_bin(),
            ipc_dir: None,
            resume_timeout_ms: default_resume_timeout_ms(),
        }
    }
}

impl PlayerConfig {
    /// Directory where per-slot control sockets are created.
    pub fn ipc_dir(&self) -> PathBuf {
        self.ipc_dir.clone().unwrap_or_else(std::env::temp_dir)
    }

    /// Resume dispatch bound as a Duration.
    pub fn resume_timeout(&self) -> Duration {
        Duration::from_millis(self.resume_timeout_ms)
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_resolver_bin() -> String {
    "yt-dlp".to_string()
}

fn default_socket_timeout_secs() -> u64 {
    10
}

fn default_retries() -> u32 {
    1
}

fn default_player_bin() -> String {
    "mpv".to_string()
}

fn default_resume_timeout_ms() -> u64 {
    1000
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Command-line configuration overrides.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub resolver_bin: Option<String>,
    pub player_bin: Option<String>,
    pub cookies: Option<PathBuf>,
}

impl Config {
    /// Load configuration from an optional TOML file, applying CLI overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub async fn load(toml_path: Option<&Path>, overrides: ConfigOverrides) -> Result<Self> {
        let mut config = match toml_path {
            Some(path) => {
                let toml_str = tokio::fs::read_to_string(path).await.map_err(|e| {
                    Error::Config(format!("failed to read config file {:?}: {}", path, e))
                })?;
                let config: Config = toml::from_str(&toml_str)
                    .map_err(|e| Error::Config(format!("failed to parse TOML: {}", e)))?;
                info!("Loaded configuration from {:?}", path);
                config
            }
            None => Config::default(),
        };

        if let Some(bin) = overrides.resolver_bin {
            config.resolver.bin = bin;
        }
        if let Some(bin) = overrides.player_bin {
            config.player.bin = bin;
        }
        if let Some(cookies) = overrides.cookies {
            config.resolver.cookies = Some(cookies);
        }

        Ok(config)
    }
}
