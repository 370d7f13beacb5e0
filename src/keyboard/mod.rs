//! Virtual keyboard model
//!
//! The layout is a static grid of keys; geometry is derived per frame size
//! and hit-testing maps a fingertip pixel to the key under it.

mod layout;

pub use hit_test::{hit_test, Point, KEY_INSET};
pub use layout::{KeyAction, KeyRect, KeySpec, KeyboardLayout};
