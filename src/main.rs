//! segue - Main entry point
//!
//! Command-line front end for the playback scheduler: enqueue the given
//! track links, start playing, and print playback events until the queue
//! drains or the process is interrupted.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use segue::config::{Config, ConfigOverrides};
use segue::{PlaybackEngine, PlayerEvent, TrackDescriptor};

/// Command-line arguments for segue
#[derive(Parser, Debug)]
#[command(name = "segue")]
#[command(about = "Gapless-feeling playback of network-resolved media")]
#[command(version)]
struct Args {
    /// Track links to enqueue and play, in order
    #[arg(required = true)]
    links: Vec<String>,

    /// Path to a TOML configuration file
    #[arg(short, long, env = "SEGUE_CONFIG")]
    config: Option<PathBuf>,

    /// Resolver binary to use (overrides configuration)
    #[arg(long)]
    resolver_bin: Option<String>,

    /// Player binary to use (overrides configuration)
    #[arg(long)]
    player_bin: Option<String>,

    /// Authentication-cookie file forwarded to the resolver
    #[arg(long)]
    cookies: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "segue=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let overrides = ConfigOverrides {
        resolver_bin: args.resolver_bin,
        player_bin: args.player_bin,
        cookies: args.cookies,
    };
    let config = Config::load(args.config.as_deref(), overrides)
        .await
        .context("Failed to load configuration")?;

    info!(
        "Starting segue (resolver: {}, player: {})",
        config.resolver.bin, config.player.bin
    );

    let engine = PlaybackEngine::new(&config);
    let mut events = engine.subscribe();
    engine.start().context("Failed to start playback engine")?;

    for link in &args.links {
        engine.enqueue(TrackDescriptor::from_link(link)).await;
    }
    engine.play_next().await;

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(PlayerEvent::TrackStarted { track, .. }) => {
                    println!("Playing: {}", track);
                }
                Ok(PlayerEvent::Loading { track }) => {
                    println!("Loading: {}", track);
                }
                Ok(PlayerEvent::Progress { track, position_secs, duration_secs }) => {
                    print!(
                        "\r{} {} / {}",
                        track.title,
                        segue::status::format_timestamp(position_secs),
                        segue::status::format_timestamp(duration_secs)
                    );
                    let _ = std::io::Write::flush(&mut std::io::stdout());
                }
                Ok(PlayerEvent::TrackFinished { track, .. }) => {
                    println!("\nFinished: {}", track.title);
                }
                Ok(PlayerEvent::PlaybackError { message, .. }) => {
                    eprintln!("\nError: {}", message);
                }
                Ok(PlayerEvent::Idle) => {
                    info!("Queue drained");
                    break;
                }
                Ok(_) => {}
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    info!("Dropped {} playback events", skipped);
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            },
            _ = shutdown_signal() => {
                println!();
                engine.stop_all().await;
                break;
            }
        }
    }

    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
