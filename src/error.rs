//! Engine error taxonomy
//!
//! Device errors end a session, processing errors abandon a single frame,
//! configuration errors are rejected before a session starts.

use serde::{Deserialize, Serialize};

/// Machine-readable error category sent to consumers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The camera could not be opened
    CameraOpen,
    /// A frame could not be read from an open camera
    FrameRead,
    /// Hit-testing, detection, text assembly or rendering failed
    Processing,
    /// Invalid settings or camera index
    Configuration,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::CameraOpen => write!(f, "camera_open"),
            ErrorKind::FrameRead => write!(f, "frame_read"),
            ErrorKind::Processing => write!(f, "processing"),
            ErrorKind::Configuration => write!(f, "configuration"),
        }
    }
}

/// Errors produced by the gesture engine
#[derive(Debug, Clone, thiserror::Error)]
pub enum EngineError {
    #[error("failed to open camera {index}: {reason}")]
    CameraOpen { index: u32, reason: String },

    #[error("failed to read frame from camera: {0}")]
    FrameRead(String),

    #[error("frame processing failed: {0}")]
    Processing(String),

    #[error("invalid configuration: {0}")]
    Configuration(String),

    #[error("failed to spawn capture thread: {0}")]
    ThreadSpawn(String),
}

impl EngineError {
    /// Category reported to event consumers
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::CameraOpen { .. } => ErrorKind::CameraOpen,
            EngineError::FrameRead(_) => ErrorKind::FrameRead,
            EngineError::Processing(_) => ErrorKind::Processing,
            EngineError::Configuration(_) => ErrorKind::Configuration,
            // The worker never ran, so the device was never acquired
            EngineError::ThreadSpawn(_) => ErrorKind::CameraOpen,
        }
    }

    /// Whether this error ends the session
    pub fn is_fatal(&self) -> bool {
        !matches!(self, EngineError::Processing(_))
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
