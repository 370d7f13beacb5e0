//! Keyboard overlay painted onto camera frames

mod font;
mod overlay;

pub use overlay::{draw_fingertip, draw_keyboard, draw_text_panel};
