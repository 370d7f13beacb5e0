//! Consumer-side copy of the typed text
//!
//! Rebuilt purely from [`TextEvent`]s, so any listener can show or save what
//! the user typed without touching engine state.

use std::path::Path;

use anyhow::{Context, Result};

use crate::events::TextEvent;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Transcript {
    /// Lines finished with ENTER
    lines: Vec<String>,
    sentence: String,
    word: String,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&mut self, event: &TextEvent) {
        match event {
            TextEvent::Character { ch } => self.word.push(*ch),
            TextEvent::Backspace => {
                self.word.pop();
            }
            TextEvent::WordCommitted { word } => {
                if !self.sentence.is_empty() && !self.sentence.ends_with(char::is_whitespace) {
                    self.sentence.push(' ');
                }
                self.sentence.push_str(word);
                self.word.clear();
            }
            TextEvent::Space => self.sentence.push(' '),
            TextEvent::Newline => {
                let line = std::mem::take(&mut self.sentence);
                self.lines.push(line.trim_end().to_string());
            }
            TextEvent::SentenceUpdated { sentence } => self.sentence = sentence.clone(),
        }
    }

    /// Full text: finished lines, then the live sentence and word
    pub fn text(&self) -> String {
        let mut text = String::new();
        for line in &self.lines {
            text.push_str(line);
            text.push('\n');
        }
        text.push_str(&self.sentence);
        text.push_str(&self.word);
        text
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty() && self.sentence.is_empty() && self.word.is_empty()
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// Write the text to `path` as UTF-8
    pub fn save(&self, path: &Path) -> Result<()> {
        std::fs::write(path, self.text())
            .with_context(|| format!("failed to write transcript to {}", path.display()))
    }
}
