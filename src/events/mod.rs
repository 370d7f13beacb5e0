//! Events published by the capture loop
//!
//! The engine never calls into a UI. Everything it produces goes out through
//! an [`EventSink`], one direction only.

use std::sync::Arc;
use std::time::Instant;

use image::RgbImage;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc, watch};

use crate::error::{EngineError, ErrorKind};
use crate::keyboard::Point;

/// Literal token sent for a backspace keystroke
pub const BACKSPACE_TOKEN: &str = "backspace";

/// Text produced by the assembler
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TextEvent {
    /// A printable key was appended to the current word
    Character { ch: char },

    /// The last character of the current word was removed
    Backspace,

    /// A word was committed followed by a space
    Space,

    /// The line was finished and the sentence buffer cleared
    Newline,

    /// The current word was moved into the sentence
    WordCommitted { word: String },

    /// The sentence was rewritten (last word deleted)
    SentenceUpdated { sentence: String },
}

impl TextEvent {
    /// Keystroke token as a single string: the character, `"backspace"`,
    /// `" "` or `"\n"`. Word and sentence updates carry their text.
    pub fn token(&self) -> String {
        match self {
            TextEvent::Character { ch } => ch.to_string(),
            TextEvent::Backspace => BACKSPACE_TOKEN.to_string(),
            TextEvent::Space => " ".to_string(),
            TextEvent::Newline => "\n".to_string(),
            TextEvent::WordCommitted { word } => word.clone(),
            TextEvent::SentenceUpdated { sentence } => sentence.clone(),
        }
    }
}

impl std::fmt::Display for TextEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TextEvent::Character { ch } => write!(f, "CHARACTER ({:?})", ch),
            TextEvent::Backspace => write!(f, "BACKSPACE"),
            TextEvent::Space => write!(f, "SPACE"),
            TextEvent::Newline => write!(f, "NEWLINE"),
            TextEvent::WordCommitted { word } => write!(f, "WORD_COMMITTED ({:?})", word),
            TextEvent::SentenceUpdated { sentence } => {
                write!(f, "SENTENCE_UPDATED ({:?})", sentence)
            }
        }
    }
}

/// Error report for consumers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorEvent {
    pub kind: ErrorKind,
    pub message: String,
    /// The session ended because of this error
    pub fatal: bool,
}

impl ErrorEvent {
    /// Report for `err`; processing errors become fatal once escalated
    pub fn from_error(err: &EngineError, fatal: bool) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
            fatal,
        }
    }
}

/// One annotated frame ready for display
#[derive(Debug, Clone)]
pub struct RenderedFrame {
    /// 1-based position of the frame within its session
    pub index: u64,
    pub image: Arc<RgbImage>,
    /// Fingertip position in frame pixels, when a hand was seen
    pub fingertip: Option<Point>,
    pub captured_at: Instant,
}

/// Everything the capture loop publishes
#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// Camera and detector are open
    SessionStarted {
        camera_index: u32,
    },
    Frame(RenderedFrame),
    Text(TextEvent),
    Error(ErrorEvent),
    /// The capture thread has exited and released the camera
    SessionStopped {
        camera_index: u32,
        frames: u64,
    },
}

/// Receiver side of the engine boundary
pub trait EventSink: Send + Sync + 'static {
    /// Deliver an event; must not block the capture thread
    fn emit(&self, event: EngineEvent);
}

/// Sink used by the daemon.
///
/// Text, error and session events are never dropped: they go to an
/// unbounded update queue and to the subscriber broadcast. Frames only
/// replace the latest one, so a slow consumer skips frames instead of text.
pub struct ChannelSink {
    updates: mpsc::UnboundedSender<EngineEvent>,
    notifications: broadcast::Sender<EngineEvent>,
    frames: watch::Sender<Option<RenderedFrame>>,
}

/// Consumer ends of a [`ChannelSink`]
pub struct EngineFeeds {
    pub updates: mpsc::UnboundedReceiver<EngineEvent>,
    pub frames: watch::Receiver<Option<RenderedFrame>>,
}

impl ChannelSink {
    /// `capacity` bounds how far a notification subscriber may fall behind
    pub fn new(capacity: usize) -> (Self, EngineFeeds) {
        let (updates_tx, updates_rx) = mpsc::unbounded_channel();
        let (notifications, _) = broadcast::channel(capacity);
        let (frames_tx, frames_rx) = watch::channel(None);
        let sink = Self {
            updates: updates_tx,
            notifications,
            frames: frames_tx,
        };
        let feeds = EngineFeeds {
            updates: updates_rx,
            frames: frames_rx,
        };
        (sink, feeds)
    }

    /// Broadcast of every non-frame event, for push subscribers
    pub fn notifications(&self) -> broadcast::Sender<EngineEvent> {
        self.notifications.clone()
    }
}

impl EventSink for ChannelSink {
    fn emit(&self, event: EngineEvent) {
        match event {
            EngineEvent::Frame(frame) => {
                self.frames.send_replace(Some(frame));
            }
            event => {
                // No subscribers is fine; the loop keeps running
                let _ = self.notifications.send(event.clone());
                let _ = self.updates.send(event);
            }
        }
    }
}

impl EventSink for std::sync::mpsc::Sender<EngineEvent> {
    fn emit(&self, event: EngineEvent) {
        let _ = self.send(event);
    }
}
