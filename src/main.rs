//! TTS Socket Server - streams synthesized speech to remote clients over TCP.
//!
//! Clients send a line of text and receive the synthesized audio as raw
//! native-endian `f32` PCM chunks, followed by an `END_OF_AUDIO` marker.
//! Any number of clients can connect at once; each is served by its own
//! task and may send further requests on the same socket.

mod config;
mod protocol;
mod server;
mod tts;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::time::LocalTime;

use config::ServerConfig;
use server::Server;
use tts::{KokoroSynthesizer, Synthesizer};

/// How long open connections get to finish after a shutdown signal.
const GRACEFUL_TIMEOUT: Duration = Duration::from_millis(500);

/// How long the runtime waits for in-flight blocking synthesis on exit.
/// Engine calls cannot be interrupted, so whatever is still running after
/// this is abandoned with the process.
const BLOCKING_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(2);

/// Wait for shutdown signal (Ctrl+C or SIGTERM), then cancel `shutdown`.
async fn wait_for_shutdown(shutdown: CancellationToken) {
    tokio::select! {
        _ = signal::ctrl_c() => {
            info!("🛑 Received Ctrl+C, shutting down...");
        }
        _ = sigterm() => {
            info!("🛑 Received SIGTERM, shutting down...");
        }
    }

    shutdown.cancel();
}

#[cfg(unix)]
async fn sigterm() {
    match signal::unix::signal(signal::unix::SignalKind::terminate()) {
        Ok(mut sigterm) => {
            sigterm.recv().await;
        }
        Err(e) => {
            warn!("Failed to register SIGTERM handler: {}", e);
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn sigterm() {
    std::future::pending::<()>().await;
}

fn main() -> Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread().enable_all().build()?;
    let result = runtime.block_on(run());
    shut_down(runtime);
    result
}

/// Stop the runtime without waiting forever on `spawn_blocking` work.
fn shut_down(runtime: tokio::runtime::Runtime) {
    runtime.shutdown_timeout(BLOCKING_SHUTDOWN_TIMEOUT);
}

async fn run() -> Result<()> {
    // Parse command line arguments
    let config = ServerConfig::from_args();

    // Respect RUST_LOG env var, fallback to verbose flag, default to info
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(if config.verbose { "debug" } else { "info" }));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_timer(LocalTime::new(time::macros::format_description!("[hour]:[minute]:[second]")))
        .init();

    info!("🎤 TTS Socket Server v{}", env!("CARGO_PKG_VERSION"));

    if let Err(e) = config.validate() {
        error!("❌ Configuration error: {}", e);
        std::process::exit(1);
    }
    config.log_config();

    // The synthesizer is built once and shared by every connection
    let synthesizer = KokoroSynthesizer::new(&config)?;
    info!("TTS sample rate: {} Hz", synthesizer.sample_rate());
    let synthesizer: Arc<dyn Synthesizer> = Arc::new(synthesizer);

    if config.skip_warm_up {
        debug!("Skipping warm-up");
    } else {
        let warm_up = Arc::clone(&synthesizer);
        let text = config.warm_up_text.clone();
        if let Err(e) = tokio::task::spawn_blocking(move || warm_up.warm_up(&text)).await? {
            error!("❌ Warm-up failed: {}", e);
            std::process::exit(1);
        }
    }

    let server = match Server::bind(&config.listen_addr(), synthesizer, config.stream_settings(), config.admission_policy()).await {
        Ok(server) => server,
        Err(e) => {
            error!("❌ {:#}", e);
            std::process::exit(1);
        }
    };

    let shutdown = CancellationToken::new();
    let tracker = TaskTracker::new();

    let accept_loop = tokio::spawn(server.run(shutdown.clone(), tracker.clone()));

    wait_for_shutdown(shutdown).await;

    if let Err(e) = accept_loop.await {
        warn!("Accept loop ended abnormally: {}", e);
    }

    // Give open connections a moment to notice the shutdown and close their sockets
    tracker.close();
    tokio::select! {
        _ = tracker.wait() => {
            debug!("All connections closed gracefully");
        }
        _ = tokio::time::sleep(GRACEFUL_TIMEOUT) => {
            debug!("{} connection(s) didn't finish in time", tracker.len());
        }
    }

    info!("✅ TTS socket server stopped");
    Ok(())
}
