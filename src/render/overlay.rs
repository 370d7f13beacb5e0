//! Overlay drawing on RGB frames

use image::{Rgb, RgbImage};

use crate::dwell::Highlight;
use crate::keyboard::{KeyRect, KeySpec, Point, KEY_INSET};

use super::font::{self, GLYPH_SIZE};

/// Outline of keys nobody is touching
pub const IDLE_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
/// Key held past the dwell threshold
pub const CONFIRMED_COLOR: Rgb<u8> = Rgb([255, 0, 0]);
pub const FINGERTIP_COLOR: Rgb<u8> = Rgb([255, 0, 0]);
pub const TEXT_COLOR: Rgb<u8> = Rgb([255, 255, 255]);

const OUTLINE_THICKNESS: i32 = 2;
const FINGERTIP_RADIUS: i32 = 5;
/// Label offset from the key's left and bottom edges
const LABEL_MARGIN: i32 = 10;
const PANEL_SCALE: u32 = 2;
const PANEL_LEFT: i32 = 10;
const PANEL_LINE_HEIGHT: i32 = 30;

/// Outline colour for a key: green fading towards black while the dwell
/// timer runs, red once confirmed
pub fn key_color(highlight: Option<Highlight>) -> Rgb<u8> {
    match highlight {
        None => IDLE_COLOR,
        Some(Highlight::InProgress(ratio)) => {
            let green = (255.0 * (1.0 - ratio.clamp(0.0, 1.0))) as u8;
            Rgb([0, green, 0])
        }
        Some(Highlight::Confirmed) => CONFIRMED_COLOR,
    }
}

/// Outline and label every key; the held key (if any) is coloured by its
/// progress
pub fn draw_keyboard(
    frame: &mut RgbImage,
    rects: &[KeyRect],
    held: Option<(&KeySpec, Highlight)>,
) {
    for kr in rects {
        let highlight = held
            .filter(|(key, _)| *key == &kr.key)
            .map(|(_, highlight)| highlight);
        let color = key_color(highlight);

        let left = kr.rect.x;
        let top = kr.rect.y;
        let right = kr.rect.right() - KEY_INSET;
        let bottom = kr.rect.bottom() - KEY_INSET;
        for t in 0..OUTLINE_THICKNESS {
            hline(frame, left, right, top + t, color);
            hline(frame, left, right, bottom - t, color);
            vline(frame, left + t, top, bottom, color);
            vline(frame, right - t, top, bottom, color);
        }

        let scale = label_scale(kr.rect.height);
        let label_top = kr.rect.bottom() - LABEL_MARGIN - (GLYPH_SIZE * scale) as i32;
        font::draw_text(frame, left + LABEL_MARGIN, label_top, kr.key.symbol(), color, scale);
    }
}

/// Glyph scale for labels: about a third of the key height
fn label_scale(key_height: i32) -> u32 {
    (key_height / (3 * GLYPH_SIZE as i32)).max(1) as u32
}

/// Live word and sentence in the top-left corner; empty lines are skipped
pub fn draw_text_panel(frame: &mut RgbImage, word: &str, sentence: &str) {
    let lines = [("word: ", word), ("sentence: ", sentence)];
    let mut top = PANEL_LEFT;
    for (label, text) in lines {
        if text.is_empty() {
            continue;
        }
        font::draw_text(frame, PANEL_LEFT, top, label, TEXT_COLOR, PANEL_SCALE);
        let x = PANEL_LEFT + font::text_width(label, PANEL_SCALE);
        font::draw_text(frame, x, top, text, TEXT_COLOR, PANEL_SCALE);
        top += PANEL_LINE_HEIGHT;
    }
}

/// Filled dot at the fingertip
pub fn draw_fingertip(frame: &mut RgbImage, point: Point) {
    let r = FINGERTIP_RADIUS;
    for dy in -r..=r {
        for dx in -r..=r {
            if dx * dx + dy * dy <= r * r {
                put(frame, point.x + dx, point.y + dy, FINGERTIP_COLOR);
            }
        }
    }
}

fn hline(frame: &mut RgbImage, x0: i32, x1: i32, y: i32, color: Rgb<u8>) {
    for x in x0..=x1 {
        put(frame, x, y, color);
    }
}

fn vline(frame: &mut RgbImage, x: i32, y0: i32, y1: i32, color: Rgb<u8>) {
    for y in y0..=y1 {
        put(frame, x, y, color);
    }
}

/// Set a pixel, ignoring anything outside the frame
fn put(frame: &mut RgbImage, x: i32, y: i32, color: Rgb<u8>) {
    if x < 0 || y < 0 {
        return;
    }
    let (x, y) = (x as u32, y as u32);
    if x < frame.width() && y < frame.height() {
        frame.put_pixel(x, y, color);
    }
}
