//! Camera discovery and session lifecycle
//!
//! At most one session runs at a time; starting a new one stops the old one.

use std::sync::Arc;

use tracing::info;

use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::events::EventSink;

use super::{CaptureSession, VisionBackend};

pub struct SessionManager {
    config: EngineConfig,
    backend: Arc<dyn VisionBackend>,
    sink: Arc<dyn EventSink>,
    session: Option<CaptureSession>,
}

impl SessionManager {
    pub fn new(
        config: EngineConfig,
        backend: Arc<dyn VisionBackend>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            config,
            backend,
            sink,
            session: None,
        }
    }

    /// Indices among `0..probe_count` whose camera opens
    pub fn available_cameras(&self) -> Vec<u32> {
        (0..self.config.probe_count)
            .filter(|&index| {
                // The running session holds its camera open
                self.current_camera() == Some(index) || self.backend.probe(index)
            })
            .collect()
    }

    /// Start a session on `camera_index`, or the configured default.
    ///
    /// Any running session is stopped first. Returns the camera in use.
    pub fn start(&mut self, camera_index: Option<u32>) -> EngineResult<u32> {
        let index = camera_index.unwrap_or(self.config.camera_index);
        self.config.validate()?;
        if index >= self.config.probe_count {
            return Err(EngineError::Configuration(format!(
                "camera index {} is outside the probed range 0..{}",
                index, self.config.probe_count
            )));
        }

        self.stop();

        if !self.backend.probe(index) {
            return Err(EngineError::Configuration(format!(
                "camera {} is not available",
                index
            )));
        }

        let session = CaptureSession::start(
            index,
            self.config.clone(),
            Arc::clone(&self.backend),
            Arc::clone(&self.sink),
        )?;
        info!(camera_index = index, "session started");
        self.session = Some(session);
        Ok(index)
    }

    /// Stop the running session, if any, and wait for it to release the
    /// camera. Returns whether a session was stopped.
    pub fn stop(&mut self) -> bool {
        match self.session.take() {
            Some(mut session) => {
                session.stop();
                info!(camera_index = session.camera_index(), "session stopped");
                true
            }
            None => false,
        }
    }

    /// Whether a session is still capturing; a session that ended on its
    /// own (device error) counts as not running
    pub fn is_running(&self) -> bool {
        self.session.as_ref().is_some_and(CaptureSession::is_running)
    }

    pub fn current_camera(&self) -> Option<u32> {
        self.session
            .as_ref()
            .filter(|s| s.is_running())
            .map(CaptureSession::camera_index)
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        self.stop();
    }
}
