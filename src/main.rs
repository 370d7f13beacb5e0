//! fingertype-daemon: Background daemon for camera-based gesture typing
//!
//! The user points at an on-screen keyboard drawn over the mirrored camera
//! image and types a key by holding the index fingertip on it. The daemon
//! provides:
//! - Capture sessions running the typing loop on a dedicated thread
//! - Dwell-based key selection and word/sentence assembly
//! - IPC server for session control and text notifications
//!
//! Cameras and hand-landmark models plug in through `VisionBackend`. With
//! `FINGERTYPE_TRACE` set the daemon replays a recorded fingertip trace.

mod capture;
mod config;
mod dwell;
mod error;
mod events;
mod ipc;
mod keyboard;
mod lifecycle;
mod render;
mod text;

use std::sync::{Arc, Mutex, PoisonError};

use anyhow::Result;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::capture::{NoCameraBackend, ScriptedBackend, SessionManager, VisionBackend};
use crate::config::Config;
use crate::events::{ChannelSink, EngineFeeds};
use crate::ipc::Server;
use crate::lifecycle::ShutdownSignal;

/// How far a push subscriber may fall behind on text and session events
const NOTIFICATION_CAPACITY: usize = 1024;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "fingertype-daemon starting");

    // Load configuration
    let config = Config::load()?;
    config.ensure_dirs()?;
    config.engine.validate()?;
    info!(?config.socket_path, ?config.data_dir, "configuration loaded");

    // Create shutdown signal handler
    let mut shutdown = ShutdownSignal::new();

    let backend: Arc<dyn VisionBackend> = match &config.trace_path {
        Some(path) => {
            info!(?path, "replaying fingertip trace");
            Arc::new(ScriptedBackend::from_file(path)?)
        }
        None => {
            warn!("no vision backend available, sessions cannot start");
            Arc::new(NoCameraBackend)
        }
    };

    // Capture thread -> IPC server and subscribers
    let (sink, feeds) = ChannelSink::new(NOTIFICATION_CAPACITY);
    let notifications = sink.notifications();

    let sessions = Arc::new(Mutex::new(SessionManager::new(
        config.engine.clone(),
        backend,
        Arc::new(sink),
    )));

    let server = Server::new(&config.socket_path, Arc::clone(&sessions), notifications)?;

    if config.autostart {
        let sessions = Arc::clone(&sessions);
        let started = tokio::task::spawn_blocking(move || {
            sessions
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .start(None)
        })
        .await?;
        match started {
            Ok(camera_index) => info!(camera_index, "autostarted session"),
            Err(e) => error!(error = %e, "autostart failed"),
        }
    }

    info!("daemon initialized, entering main loop");

    // Main event loop
    tokio::select! {
        // Run the IPC server (accepts client connections)
        result = server.run() => {
            if let Err(e) = result {
                error!(?e, "IPC server error");
            }
        }

        // Fold engine events into the daemon status
        _ = forward_engine_events(&server, feeds) => {
            info!("engine event handler exited");
        }

        // Wait for shutdown signal
        _ = shutdown.wait() => {
            info!("shutdown signal received");
        }
    }

    // Cleanup
    info!("shutting down...");

    let stopped = tokio::task::spawn_blocking(move || {
        sessions.lock().unwrap_or_else(PoisonError::into_inner).stop()
    })
    .await?;
    if stopped {
        info!("capture session stopped");
    }
    server.shutdown().await;

    info!("fingertype-daemon stopped");

    Ok(())
}

/// Feed every update and the latest frame to the server until the engine
/// side goes away
async fn forward_engine_events(server: &Server, mut feeds: EngineFeeds) {
    loop {
        tokio::select! {
            update = feeds.updates.recv() => match update {
                Some(event) => server.record_event(&event).await,
                None => break,
            },
            changed = feeds.frames.changed() => {
                if changed.is_err() {
                    break;
                }
                let latest = feeds.frames.borrow_and_update().clone();
                if let Some(frame) = latest {
                    server.record_frame(&frame).await;
                }
            }
        }
    }
}
