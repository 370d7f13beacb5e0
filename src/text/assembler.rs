//! Keystroke to word/sentence assembly

use std::time::{Duration, Instant};

use tracing::debug;

use crate::events::TextEvent;
use crate::keyboard::{KeyAction, KeySpec};

/// Text state of one session
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TextBuffer {
    /// Characters typed since the last commit
    pub current_word: String,
    /// Committed words of the current line
    pub sentence: String,
    /// Time of the last printable key
    pub last_edit_at: Option<Instant>,
}

/// Consumes confirmed keys and the inactivity timer
#[derive(Debug, Clone)]
pub struct TextAssembler {
    buffer: TextBuffer,
    word_timeout: Duration,
}

impl TextAssembler {
    pub fn new(word_timeout: Duration) -> Self {
        Self {
            buffer: TextBuffer::default(),
            word_timeout,
        }
    }

    pub fn buffer(&self) -> &TextBuffer {
        &self.buffer
    }

    pub fn current_word(&self) -> &str {
        &self.buffer.current_word
    }

    pub fn sentence(&self) -> &str {
        &self.buffer.sentence
    }

    /// Apply a confirmed key
    pub fn apply(&mut self, key: &KeySpec, now: Instant) -> Vec<TextEvent> {
        let mut events = Vec::new();

        match key.action() {
            KeyAction::Insert(ch) => {
                self.buffer.current_word.push(ch);
                self.buffer.last_edit_at = Some(now);
                events.push(TextEvent::Character { ch });
            }
            KeyAction::Space => {
                if let Some(word) = self.commit_word() {
                    self.buffer.sentence.push(' ');
                    events.push(TextEvent::WordCommitted { word });
                    events.push(TextEvent::Space);
                }
            }
            KeyAction::Enter => {
                if let Some(word) = self.commit_word() {
                    events.push(TextEvent::WordCommitted { word });
                }
                events.push(TextEvent::Newline);
                self.buffer.sentence.clear();
            }
            KeyAction::Backspace => {
                if self.buffer.current_word.pop().is_some() {
                    events.push(TextEvent::Backspace);
                } else if !self.buffer.sentence.is_empty() {
                    let mut words: Vec<&str> = self.buffer.sentence.split_whitespace().collect();
                    words.pop();
                    self.buffer.sentence = words.join(" ");
                    events.push(TextEvent::SentenceUpdated {
                        sentence: self.buffer.sentence.clone(),
                    });
                }
            }
        }

        debug!(
            key = %key,
            word = %self.buffer.current_word,
            sentence = %self.buffer.sentence,
            "key applied"
        );
        events
    }

    /// Commit an abandoned word once the inactivity window has passed
    pub fn check_inactivity(&mut self, now: Instant) -> Vec<TextEvent> {
        let expired = self
            .buffer
            .last_edit_at
            .map(|t| now.saturating_duration_since(t) > self.word_timeout)
            .unwrap_or(false);

        if !expired {
            return Vec::new();
        }

        match self.commit_word() {
            Some(word) => {
                debug!(word = %word, "word committed after inactivity");
                vec![TextEvent::WordCommitted { word }]
            }
            None => Vec::new(),
        }
    }

    /// Move the current word into the sentence, single-space separated
    fn commit_word(&mut self) -> Option<String> {
        if self.buffer.current_word.is_empty() {
            return None;
        }

        let word = std::mem::take(&mut self.buffer.current_word);
        let sentence = &mut self.buffer.sentence;
        if !sentence.is_empty() && !sentence.ends_with(char::is_whitespace) {
            sentence.push(' ');
        }
        sentence.push_str(&word);
        self.buffer.last_edit_at = None;
        Some(word)
    }
}
