//! Dwell-time debouncing
//!
//! A key is accepted only after the fingertip has rested on it for the whole
//! dwell threshold. Three states:
//! - Idle: no key under the fingertip
//! - Candidate: a key is being held, timer running
//! - Confirmed: the held key has been emitted and is waiting for release

mod detector;

pub use detector::{DwellDetector, Highlight};
