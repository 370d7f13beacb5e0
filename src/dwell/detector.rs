//! Dwell state machine implementation
//!
//! Driven once per frame with the key under the fingertip (if any) and the
//! frame's capture time.

use std::time::{Duration, Instant};

use tracing::debug;

use crate::keyboard::KeySpec;

/// Tracking state for the key under the fingertip
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum DwellState {
    /// No key is being held
    #[default]
    Idle,
    /// `key` has been held since `since` but not long enough
    Candidate { key: KeySpec, since: Instant },
    /// `key` was held past the threshold and has been emitted
    Confirmed { key: KeySpec, since: Instant },
}

impl DwellState {
    /// The key currently being held, if any
    pub fn key(&self) -> Option<&KeySpec> {
        match self {
            DwellState::Idle => None,
            DwellState::Candidate { key, .. } | DwellState::Confirmed { key, .. } => Some(key),
        }
    }
}

impl std::fmt::Display for DwellState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DwellState::Idle => write!(f, "Idle"),
            DwellState::Candidate { key, .. } => write!(f, "Candidate({})", key),
            DwellState::Confirmed { key, .. } => write!(f, "Confirmed({})", key),
        }
    }
}

/// How the overlay should paint the held key
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Highlight {
    /// Fraction of the dwell threshold elapsed, in [0, 1)
    InProgress(f32),
    Confirmed,
}

/// Debouncer turning a noisy stream of hits into single keystrokes
#[derive(Debug, Clone)]
pub struct DwellDetector {
    threshold: Duration,
    state: DwellState,
}

impl DwellDetector {
    pub fn new(threshold: Duration) -> Self {
        Self {
            threshold,
            state: DwellState::Idle,
        }
    }

    pub fn state(&self) -> &DwellState {
        &self.state
    }

    /// Feed one frame's hit-test result.
    ///
    /// Returns the key exactly once per landing, on the first frame where
    /// it has been held for at least the threshold.
    pub fn observe(&mut self, hit: Option<&KeySpec>, now: Instant) -> Option<KeySpec> {
        let Some(hit) = hit else {
            self.transition_to(DwellState::Idle);
            return None;
        };

        let held_since = match &self.state {
            DwellState::Candidate { key, since } if key == hit => Some(*since),
            // Already emitted; wait for release
            DwellState::Confirmed { key, .. } if key == hit => return None,
            _ => None,
        };

        match held_since {
            Some(since) if now.saturating_duration_since(since) >= self.threshold => {
                self.transition_to(DwellState::Confirmed {
                    key: hit.clone(),
                    since,
                });
                Some(hit.clone())
            }
            Some(_) => None,
            None => {
                self.transition_to(DwellState::Candidate {
                    key: hit.clone(),
                    since: now,
                });
                None
            }
        }
    }

    /// Highlight for the held key at time `now`
    pub fn highlight(&self, now: Instant) -> Option<(&KeySpec, Highlight)> {
        match &self.state {
            DwellState::Idle => None,
            DwellState::Candidate { key, since } => {
                let held = now.saturating_duration_since(*since).as_secs_f32();
                let ratio = (held / self.threshold.as_secs_f32()).min(1.0);
                Some((key, Highlight::InProgress(ratio)))
            }
            DwellState::Confirmed { key, .. } => Some((key, Highlight::Confirmed)),
        }
    }

    /// Drop any held key
    pub fn reset(&mut self) {
        self.transition_to(DwellState::Idle);
    }

    fn transition_to(&mut self, new_state: DwellState) {
        if new_state != self.state {
            debug!(from = %self.state, to = %new_state, "dwell transition");
            self.state = new_state;
        }
    }
}
