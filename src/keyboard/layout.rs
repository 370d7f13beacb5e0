//! Key table and frame-relative geometry

use crate::error::{EngineError, EngineResult};

use super::hit_test::Rect;

/// Symbol of the space key
pub const SPACE: &str = "SE";
/// Symbol of the enter key
pub const ENTER: &str = "ET";
/// Symbol of the backspace key
pub const BACKSPACE: &str = "BC";

/// Keys per row the frame width is divided into
const GRID_COLUMNS: u32 = 12;
/// Extra row heights reserved above the keyboard block
const SPARE_ROWS: u32 = 4;
/// Gap between the keyboard block and the bottom of the frame
const BOTTOM_MARGIN: i32 = 20;

const DEFAULT_ROWS: &[&[&str]] = &[
    &["1", "2", "3", "4", "5", "6", "7", "8", "9", "0"],
    &["q", "w", "e", "r", "t", "y", "u", "i", "o", "p"],
    &["a", "s", "d", "f", "g", "h", "j", "k", "l"],
    &["z", "x", "c", "v", "b", "n", "m"],
    &["(", ")", "\"", "'", SPACE, ENTER, BACKSPACE],
];

/// What pressing a key does to the text
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyAction {
    /// Append a printable character to the current word
    Insert(char),
    Space,
    Enter,
    Backspace,
}

/// One key of the layout
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KeySpec {
    symbol: String,
    row: usize,
    column: usize,
    width: u32,
}

impl KeySpec {
    /// Build a key; special keys are double width.
    ///
    /// Printable keys must be exactly one character.
    pub fn new(symbol: &str, row: usize, column: usize) -> EngineResult<Self> {
        let width = match symbol {
            SPACE | ENTER | BACKSPACE => 2,
            _ if symbol.chars().count() == 1 => 1,
            _ => {
                return Err(EngineError::Configuration(format!(
                    "key symbol {:?} must be a single character or one of {}, {}, {}",
                    symbol, SPACE, ENTER, BACKSPACE
                )))
            }
        };

        Ok(Self {
            symbol: symbol.to_string(),
            row,
            column,
            width,
        })
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn row(&self) -> usize {
        self.row
    }

    pub fn column(&self) -> usize {
        self.column
    }

    /// Width multiplier in grid units
    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn action(&self) -> KeyAction {
        match self.symbol.as_str() {
            SPACE => KeyAction::Space,
            ENTER => KeyAction::Enter,
            BACKSPACE => KeyAction::Backspace,
            other => KeyAction::Insert(other.chars().next().unwrap_or(' ')),
        }
    }
}

impl std::fmt::Display for KeySpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.symbol)
    }
}

/// A key together with its absolute rectangle in a frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyRect {
    pub key: KeySpec,
    pub rect: Rect,
}

/// Ordered rows of keys
///
/// Row-major order is both the drawing order and the hit-test order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyboardLayout {
    rows: Vec<Vec<KeySpec>>,
}

impl Default for KeyboardLayout {
    fn default() -> Self {
        // The built-in table only holds valid symbols
        Self::from_rows(DEFAULT_ROWS).unwrap_or_else(|_| Self { rows: Vec::new() })
    }
}

impl KeyboardLayout {
    /// Build a layout from rows of symbols; every symbol must be unique
    pub fn from_rows(rows: &[&[&str]]) -> EngineResult<Self> {
        let rows = rows
            .iter()
            .enumerate()
            .map(|(r, row)| {
                row.iter()
                    .enumerate()
                    .map(|(c, symbol)| KeySpec::new(symbol, r, c))
                    .collect::<EngineResult<Vec<_>>>()
            })
            .collect::<EngineResult<Vec<_>>>()?;

        let layout = Self { rows };
        // Lookup by symbol returns the first match only
        if let Some(dup) = layout.keys().find(|k| layout.key(k.symbol()) != Some(*k)) {
            return Err(EngineError::Configuration(format!(
                "key {} appears more than once in the layout",
                dup
            )));
        }
        Ok(layout)
    }

    pub fn rows(&self) -> &[Vec<KeySpec>] {
        &self.rows
    }

    /// All keys in row-major order
    pub fn keys(&self) -> impl Iterator<Item = &KeySpec> {
        self.rows.iter().flatten()
    }

    /// Find a key by its symbol
    pub fn key(&self, symbol: &str) -> Option<&KeySpec> {
        self.keys().find(|k| k.symbol() == symbol)
    }

    /// Absolute key rectangles for a frame of the given size.
    ///
    /// The keyboard block sits at the bottom of the frame; each row is
    /// centred horizontally and keys advance by their width multiplier, so
    /// rectangles never overlap.
    pub fn rectangles_for(&self, frame_width: u32, frame_height: u32) -> Vec<KeyRect> {
        let row_count = self.rows.len() as u32;
        let key_height = (frame_height / (row_count + SPARE_ROWS)) as i32;
        let key_width = (frame_width / GRID_COLUMNS) as i32;
        let top = frame_height as i32 - row_count as i32 * key_height - BOTTOM_MARGIN;

        let mut rects = Vec::with_capacity(self.keys().count());
        for row in self.rows() {
            let units: u32 = row.iter().map(KeySpec::width).sum();
            let mut x = (frame_width as i32 - units as i32 * key_width) / 2;

            for key in row {
                let y = top + key.row() as i32 * key_height;
                let width = key.width() as i32 * key_width;
                rects.push(KeyRect {
                    key: key.clone(),
                    rect: Rect::new(x, y, width, key_height),
                });
                x += width;
            }
        }

        rects
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_layout_table() {
        let layout = KeyboardLayout::default();
        assert_eq!(layout.rows().len(), 5);
        assert_eq!(layout.keys().count(), 43);
        assert_eq!(layout.rows()[0][0].symbol(), "1");
        assert_eq!(layout.rows()[4][6].symbol(), BACKSPACE);
    }

    #[test]
    fn test_special_keys_are_double_width() {
        let layout = KeyboardLayout::default();
        assert_eq!(layout.key(SPACE).unwrap().width(), 2);
        assert_eq!(layout.key(ENTER).unwrap().action(), KeyAction::Enter);
        assert_eq!(layout.key("q").unwrap().width(), 1);
        assert_eq!(layout.key("q").unwrap().action(), KeyAction::Insert('q'));
    }

    #[test]
    fn test_rejects_multi_char_symbols() {
        let result = KeyboardLayout::from_rows(&[&["ab"]]);
        assert!(matches!(result, Err(EngineError::Configuration(_))));
    }

    #[test]
    fn test_rejects_duplicate_symbols() {
        let result = KeyboardLayout::from_rows(&[&["a", "b"], &["c", "a"]]);
        assert!(matches!(result, Err(EngineError::Configuration(_))));
        assert!(KeyboardLayout::from_rows(&[&["a", "b"], &["c", "d"]]).is_ok());
    }

    #[test]
    fn test_geometry_for_720p() {
        let layout = KeyboardLayout::default();
        let rects = layout.rectangles_for(1280, 720);
        assert_eq!(rects.len(), 43);

        // 720 / 9 = 80 px rows, 1280 / 12 = 106 px keys
        let first = &rects[0];
        assert_eq!(first.key.symbol(), "1");
        assert_eq!(first.rect, Rect::new((1280 - 1060) / 2, 720 - 400 - 20, 106, 80));

        let space = rects.iter().find(|r| r.key.symbol() == SPACE).unwrap();
        assert_eq!(space.rect.width, 212);
        assert_eq!(space.rect.y, 300 + 4 * 80);
    }

    #[test]
    fn test_rectangles_do_not_overlap() {
        let rects = KeyboardLayout::default().rectangles_for(1280, 720);
        for (i, a) in rects.iter().enumerate() {
            for b in &rects[i + 1..] {
                let disjoint = a.rect.right() <= b.rect.x
                    || b.rect.right() <= a.rect.x
                    || a.rect.bottom() <= b.rect.y
                    || b.rect.bottom() <= a.rect.y;
                assert!(disjoint, "{} overlaps {}", a.key, b.key);
            }
        }
    }

    #[test]
    fn test_geometry_is_deterministic() {
        let layout = KeyboardLayout::default();
        assert_eq!(layout.rectangles_for(640, 480), layout.rectangles_for(640, 480));
    }
}
