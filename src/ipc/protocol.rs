//! IPC message protocol definitions
//!
//! All messages are JSON-encoded, prefixed with a 4-byte little-endian length.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::events::{EngineEvent, ErrorEvent, TextEvent};
use crate::keyboard::Point;

/// Requests from UI to daemon
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    /// Request current daemon status
    GetStatus,

    /// List camera indices that can be opened
    ListCameras,

    /// Start typing from a camera; the configured default when omitted
    StartSession {
        #[serde(default)]
        camera_index: Option<u32>,
    },

    /// Stop the running session and release the camera
    StopSession,

    /// Text typed so far
    GetTranscript,

    /// Write the typed text to a file
    SaveTranscript { path: PathBuf },

    ClearTranscript,

    /// Ping to check connectivity
    Ping,

    /// Turn this connection into a notification stream
    Subscribe,
}

/// Responses from daemon to UI
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    /// Current daemon status
    Status(DaemonStatus),

    Cameras { indices: Vec<u32> },

    SessionStarted { camera_index: u32 },

    SessionStopped { was_running: bool },

    Transcript { text: String },

    Saved { path: PathBuf },

    Cleared,

    /// Pong response to ping
    Pong,

    /// Subscription confirmed
    Subscribed,

    /// Error response
    Error { code: String, message: String },
}

impl Response {
    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        Response::Error {
            code: code.into(),
            message: message.into(),
        }
    }
}

/// Push notification from daemon to UI (for subscribed clients)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notification {
    SessionStarted { camera_index: u32 },
    SessionStopped { camera_index: u32, frames: u64 },
    Text { event: TextEvent },
    Error { error: ErrorEvent },
}

impl Notification {
    /// Frames are not forwarded over the socket
    pub fn from_event(event: &EngineEvent) -> Option<Self> {
        match event {
            EngineEvent::SessionStarted { camera_index } => Some(Notification::SessionStarted {
                camera_index: *camera_index,
            }),
            EngineEvent::SessionStopped {
                camera_index,
                frames,
            } => Some(Notification::SessionStopped {
                camera_index: *camera_index,
                frames: *frames,
            }),
            EngineEvent::Text(event) => Some(Notification::Text {
                event: event.clone(),
            }),
            EngineEvent::Error(error) => Some(Notification::Error {
                error: error.clone(),
            }),
            EngineEvent::Frame(_) => None,
        }
    }
}

/// Full daemon status snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DaemonStatus {
    /// Daemon version
    pub version: String,

    /// Whether a capture session is running
    pub running: bool,

    /// Camera of the running session
    pub camera_index: Option<u32>,

    /// Frames processed since the daemon started
    pub frames_processed: u64,

    /// Size of the latest frame of the running session
    pub frame_size: Option<(u32, u32)>,

    /// Fingertip in the latest frame, in frame pixels
    pub fingertip: Option<Point>,

    /// Uptime in seconds
    pub uptime_secs: u64,

    /// Most recent engine error
    pub last_error: Option<ErrorEvent>,
}

impl Default for DaemonStatus {
    fn default() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            running: false,
            camera_index: None,
            frames_processed: 0,
            frame_size: None,
            fingertip: None,
            uptime_secs: 0,
            last_error: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_request_serialization() {
        let req = Request::StartSession {
            camera_index: Some(1),
        };
        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains("start_session"));
        assert!(json.contains("camera_index"));
    }

    #[test]
    fn test_start_without_camera() {
        let req: Request = serde_json::from_str(r#"{"type":"start_session"}"#).unwrap();
        assert_eq!(req, Request::StartSession { camera_index: None });
    }

    #[test]
    fn test_response_serialization() {
        let resp = Response::Status(DaemonStatus::default());
        let json = serde_json::to_string(&resp).unwrap();
        assert!(json.contains("status"));
    }

    #[test]
    fn test_notification_nests_event() {
        let note = Notification::from_event(&EngineEvent::Text(TextEvent::Character { ch: 'a' }))
            .unwrap();
        let json = serde_json::to_string(&note).unwrap();
        assert_eq!(json, r#"{"type":"text","event":{"type":"character","ch":"a"}}"#);

        let back: Notification = serde_json::from_str(&json).unwrap();
        assert_eq!(back, note);
    }

    #[test]
    fn test_error_notification() {
        let note = Notification::from_event(&EngineEvent::Error(ErrorEvent {
            kind: ErrorKind::FrameRead,
            message: "gone".into(),
            fatal: true,
        }))
        .unwrap();
        let json = serde_json::to_string(&note).unwrap();
        assert!(json.contains("frame_read"));
    }
}
