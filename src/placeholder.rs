//! §4.A Placeholder encoder.
//!
//! Renders `(image_id, placement_id, rectangle)` into the exact byte sequence
//! a Kitty-protocol terminal interprets as virtual placements: an SGR prefix
//! carrying the id as foreground (and placement id as underline) color,
//! followed by the placeholder code point and up to three combining
//! diacritics per cell.
//!
//! The diacritic table and per-cell loop are generalized from the teacher's
//! `protocol/kitty.rs::render`/`DIACRITICS`.

use std::fmt::Write;

use crate::error::{Error, Result};

/// Default Unicode placeholder code point.
pub const DEFAULT_PLACEHOLDER: char = '\u{10EEEE}';

/// From <https://sw.kovidgoyal.net/kitty/_downloads/1792bad15b12979994cd6ecc54c967a6/rowcolumn-diacritics.txt>
pub static DIACRITICS: [char; 297] = [
    '\u{305}', '\u{30D}', '\u{30E}', '\u{310}', '\u{312}', '\u{33D}', '\u{33E}', '\u{33F}',
    '\u{346}', '\u{34A}', '\u{34B}', '\u{34C}', '\u{350}', '\u{351}', '\u{352}', '\u{357}',
    '\u{35B}', '\u{363}', '\u{364}', '\u{365}', '\u{366}', '\u{367}', '\u{368}', '\u{369}',
    '\u{36A}', '\u{36B}', '\u{36C}', '\u{36D}', '\u{36E}', '\u{36F}', '\u{483}', '\u{484}',
    '\u{485}', '\u{486}', '\u{487}', '\u{592}', '\u{593}', '\u{594}', '\u{595}', '\u{597}',
    '\u{598}', '\u{599}', '\u{59C}', '\u{59D}', '\u{59E}', '\u{59F}', '\u{5A0}', '\u{5A1}',
    '\u{5A8}', '\u{5A9}', '\u{5AB}', '\u{5AC}', '\u{5AF}', '\u{5C4}', '\u{610}', '\u{611}',
    '\u{612}', '\u{613}', '\u{614}', '\u{615}', '\u{616}', '\u{617}', '\u{657}', '\u{658}',
    '\u{659}', '\u{65A}', '\u{65B}', '\u{65D}', '\u{65E}', '\u{6D6}', '\u{6D7}', '\u{6D8}',
    '\u{6D9}', '\u{6DA}', '\u{6DB}', '\u{6DC}', '\u{6DF}', '\u{6E0}', '\u{6E1}', '\u{6E2}',
    '\u{6E4}', '\u{6E7}', '\u{6E8}', '\u{6EB}', '\u{6EC}', '\u{730}', '\u{732}', '\u{733}',
    '\u{735}', '\u{736}', '\u{73A}', '\u{73D}', '\u{73F}', '\u{740}', '\u{741}', '\u{743}',
    '\u{745}', '\u{747}', '\u{749}', '\u{74A}', '\u{7EB}', '\u{7EC}', '\u{7ED}', '\u{7EE}',
    '\u{7EF}', '\u{7F0}', '\u{7F1}', '\u{7F3}', '\u{816}', '\u{817}', '\u{818}', '\u{819}',
    '\u{81B}', '\u{81C}', '\u{81D}', '\u{81E}', '\u{81F}', '\u{820}', '\u{821}', '\u{822}',
    '\u{823}', '\u{825}', '\u{826}', '\u{827}', '\u{829}', '\u{82A}', '\u{82B}', '\u{82C}',
    '\u{82D}', '\u{951}', '\u{953}', '\u{954}', '\u{F82}', '\u{F83}', '\u{F86}', '\u{F87}',
    '\u{135D}', '\u{135E}', '\u{135F}', '\u{17DD}', '\u{193A}', '\u{1A17}', '\u{1A75}',
    '\u{1A76}', '\u{1A77}', '\u{1A78}', '\u{1A79}', '\u{1A7A}', '\u{1A7B}', '\u{1A7C}',
    '\u{1B6B}', '\u{1B6D}', '\u{1B6E}', '\u{1B6F}', '\u{1B70}', '\u{1B71}', '\u{1B72}',
    '\u{1B73}', '\u{1CD0}', '\u{1CD1}', '\u{1CD2}', '\u{1CDA}', '\u{1CDB}', '\u{1CE0}',
    '\u{1DC0}', '\u{1DC1}', '\u{1DC3}', '\u{1DC4}', '\u{1DC5}', '\u{1DC6}', '\u{1DC7}',
    '\u{1DC8}', '\u{1DC9}', '\u{1DCB}', '\u{1DCC}', '\u{1DD1}', '\u{1DD2}', '\u{1DD3}',
    '\u{1DD4}', '\u{1DD5}', '\u{1DD6}', '\u{1DD7}', '\u{1DD8}', '\u{1DD9}', '\u{1DDA}',
    '\u{1DDB}', '\u{1DDC}', '\u{1DDD}', '\u{1DDE}', '\u{1DDF}', '\u{1DE0}', '\u{1DE1}',
    '\u{1DE2}', '\u{1DE3}', '\u{1DE4}', '\u{1DE5}', '\u{1DE6}', '\u{1DFE}', '\u{20D0}',
    '\u{20D1}', '\u{20D4}', '\u{20D5}', '\u{20D6}', '\u{20D7}', '\u{20DB}', '\u{20DC}',
    '\u{20E1}', '\u{20E7}', '\u{20E9}', '\u{20F0}', '\u{2CEF}', '\u{2CF0}', '\u{2CF1}',
    '\u{2DE0}', '\u{2DE1}', '\u{2DE2}', '\u{2DE3}', '\u{2DE4}', '\u{2DE5}', '\u{2DE6}',
    '\u{2DE7}', '\u{2DE8}', '\u{2DE9}', '\u{2DEA}', '\u{2DEB}', '\u{2DEC}', '\u{2DED}',
    '\u{2DEE}', '\u{2DEF}', '\u{2DF0}', '\u{2DF1}', '\u{2DF2}', '\u{2DF3}', '\u{2DF4}',
    '\u{2DF5}', '\u{2DF6}', '\u{2DF7}', '\u{2DF8}', '\u{2DF9}', '\u{2DFA}', '\u{2DFB}',
    '\u{2DFC}', '\u{2DFD}', '\u{2DFE}', '\u{2DFF}', '\u{A66F}', '\u{A67C}', '\u{A67D}',
    '\u{A6F0}', '\u{A6F1}', '\u{A8E0}', '\u{A8E1}', '\u{A8E2}', '\u{A8E3}', '\u{A8E4}',
    '\u{A8E5}', '\u{A8E6}', '\u{A8E7}', '\u{A8E8}', '\u{A8E9}', '\u{A8EA}', '\u{A8EB}',
    '\u{A8EC}', '\u{A8ED}', '\u{A8EE}', '\u{A8EF}', '\u{A8F0}', '\u{A8F1}', '\u{AAB0}',
    '\u{AAB2}', '\u{AAB3}', '\u{AAB7}', '\u{AAB8}', '\u{AABE}', '\u{AABF}', '\u{AAC1}',
    '\u{FE20}', '\u{FE21}', '\u{FE22}', '\u{FE23}', '\u{FE24}', '\u{FE25}', '\u{FE26}',
    '\u{10A0F}', '\u{10A38}', '\u{1D185}', '\u{1D186}', '\u{1D187}', '\u{1D188}', '\u{1D189}',
    '\u{1D1AA}', '\u{1D1AB}', '\u{1D1AC}', '\u{1D1AD}', '\u{1D242}', '\u{1D243}', '\u{1D244}',
];

/// Diacritic table size; `end_row` must not exceed it (spec §4.A "Limits").
pub const MAX_ROW: usize = DIACRITICS.len();

#[inline]
fn diacritic(idx: u32) -> Option<char> {
    DIACRITICS.get(idx as usize).copied()
}

/// How many combining marks to emit per cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DiacriticLevel {
    None,
    Row,
    RowCol,
    RowCol4thByte,
    RowCol4thByteIfNonzero,
}

/// The two diacritic-level knobs: one for a row's first column, one for the
/// rest, plus the two independent 256-color SGR toggles (spec §4.A). The
/// image id defaults to allowing the compact 256-color form; the placement
/// id defaults to the full 24-bit underline color, matching upstream's
/// `allow_256colors_for_image_id=True` / `allow_256colors_for_placement_id=False`.
#[derive(Debug, Clone, Copy)]
pub struct PlaceholderMode {
    pub first_col_level: DiacriticLevel,
    pub rest_level: DiacriticLevel,
    pub allow_256colors_for_image_id: bool,
    pub allow_256colors_for_placement_id: bool,
}

impl PlaceholderMode {
    /// Construct a mode, rejecting a first-column level below `Row` (spec
    /// §4.A "Diacritic level policy").
    pub fn new(first_col_level: DiacriticLevel, rest_level: DiacriticLevel) -> Result<Self> {
        if first_col_level < DiacriticLevel::Row {
            return Err(Error::InvalidGeometry(
                "first column diacritic level must be at least Row".into(),
            ));
        }
        Ok(Self {
            first_col_level,
            rest_level,
            allow_256colors_for_image_id: true,
            allow_256colors_for_placement_id: false,
        })
    }
}

/// `get_mode(image_id, fewer_diacritics) -> PlaceholderMode` (spec §4.A).
pub fn get_mode(image_id: u32, fewer_diacritics: bool) -> PlaceholderMode {
    let fourth_byte_nonzero = (image_id >> 24) != 0;
    let full = if fourth_byte_nonzero {
        DiacriticLevel::RowCol4thByte
    } else {
        DiacriticLevel::RowCol4thByteIfNonzero
    };
    let (first_col_level, rest_level) = if fewer_diacritics {
        (DiacriticLevel::Row, DiacriticLevel::None)
    } else {
        (full, full)
    };
    PlaceholderMode {
        first_col_level,
        rest_level,
        allow_256colors_for_image_id: true,
        allow_256colors_for_placement_id: false,
    }
}

/// A rectangle of cells to paint, in terminal-cell coordinates.
#[derive(Debug, Clone, Copy)]
pub struct PlaceRect {
    pub start_col: i32,
    pub start_row: i32,
    pub end_col: i32,
    pub end_row: i32,
}

impl PlaceRect {
    fn validate(&self) -> Result<()> {
        if self.start_col < 0
            || self.start_row < 0
            || self.start_col >= self.end_col
            || self.start_row >= self.end_row
        {
            return Err(Error::InvalidGeometry(format!(
                "invalid rectangle: start=({},{}) end=({},{})",
                self.start_col, self.start_row, self.end_col, self.end_row
            )));
        }
        if self.end_row as usize > MAX_ROW {
            return Err(Error::InvalidGeometry(format!(
                "end_row {} exceeds diacritic table size {}",
                self.end_row, MAX_ROW
            )));
        }
        Ok(())
    }
}

fn sgr_color(layer: u8, id: u32, use_256: bool) -> String {
    if use_256 && id <= 0xFF {
        format!("\x1b[{layer};5;{id}m")
    } else {
        let [_, r, g, b] = id.to_be_bytes();
        format!("\x1b[{layer};2;{r};{g};{b}m")
    }
}

fn level_for(level: DiacriticLevel, fourth_byte: u32) -> DiacriticLevel {
    match level {
        DiacriticLevel::RowCol4thByteIfNonzero if fourth_byte != 0 => {
            DiacriticLevel::RowCol4thByte
        }
        DiacriticLevel::RowCol4thByteIfNonzero => DiacriticLevel::RowCol,
        other => other,
    }
}

fn push_diacritics(out: &mut String, level: DiacriticLevel, row: u32, col: u32, fourth_byte: u32) {
    let level = level_for(level, fourth_byte);
    if level >= DiacriticLevel::Row {
        if let Some(d) = diacritic(row) {
            out.push(d);
        }
    }
    if level >= DiacriticLevel::RowCol {
        if let Some(d) = diacritic(col) {
            out.push(d);
        }
    }
    if level >= DiacriticLevel::RowCol4thByte {
        if let Some(d) = diacritic(fourth_byte) {
            out.push(d);
        }
    }
}

/// Render `(image_id, placement_id, rect)` to `out` (spec §4.A).
///
/// `formatting` enables the SGR color prefixes; `use_line_feeds` terminates
/// each row with `\n` instead of a cursor-right/absolute move; `absolute_pos`
/// switches separators to absolute cursor positioning anchored at
/// `(start_col, start_row)` of the rectangle.
#[allow(clippy::too_many_arguments)]
pub fn encode_to_stream(
    out: &mut String,
    image_id: u32,
    placement_id: u32,
    rect: PlaceRect,
    mode: PlaceholderMode,
    formatting: bool,
    use_line_feeds: bool,
    absolute_pos: bool,
) -> Result<()> {
    rect.validate()?;
    let fourth_byte = image_id >> 24;

    if formatting {
        out.push_str(&sgr_color(38, image_id, mode.allow_256colors_for_image_id));
        if placement_id != 0 {
            out.push_str(&sgr_color(58, placement_id, mode.allow_256colors_for_placement_id));
        }
    }

    let width = (rect.end_col - rect.start_col) as u32;
    for row in rect.start_row as u32..rect.end_row as u32 {
        for col in rect.start_col as u32..rect.start_col as u32 + width {
            out.push(DEFAULT_PLACEHOLDER);
            let level = if col == rect.start_col as u32 {
                mode.first_col_level
            } else {
                mode.rest_level
            };
            push_diacritics(out, level, row, col, fourth_byte);

            if !use_line_feeds && col + 1 < rect.start_col as u32 + width {
                if absolute_pos {
                    write!(out, "\x1b[{};{}H", row + 1, col + 2).unwrap();
                } else {
                    write!(out, "\x1b[1C").unwrap();
                }
            }
        }
        if use_line_feeds {
            out.push('\n');
        } else if absolute_pos {
            write!(out, "\x1b[{};{}H", row + 2, rect.start_col + 1).unwrap();
        } else {
            write!(out, "\x1b[1E\x1b[{}C", rect.start_col).unwrap();
        }
    }

    if formatting {
        out.push_str("\x1b[39;59m");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idempotent_encoding() {
        let rect = PlaceRect {
            start_col: 0,
            start_row: 0,
            end_col: 2,
            end_row: 2,
        };
        let mode = get_mode(0x0100002A, false);
        let mut a = String::new();
        let mut b = String::new();
        encode_to_stream(&mut a, 0x0100002A, 0, rect, mode, true, false, false).unwrap();
        encode_to_stream(&mut b, 0x0100002A, 0, rect, mode, true, false, false).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn single_cell_exact_bytes() {
        // spec §8 E6: image_id = 0x01_00_00_2A (4th byte=1, low byte=42)
        let rect = PlaceRect {
            start_col: 0,
            start_row: 0,
            end_col: 1,
            end_row: 1,
        };
        let mode = get_mode(0x0100002A, false);
        let mut out = String::new();
        encode_to_stream(&mut out, 0x0100002A, 0, rect, mode, true, false, false).unwrap();

        assert!(out.starts_with("\x1b[38;2;0;0;42m"));
        assert!(out.contains(DEFAULT_PLACEHOLDER));
        assert!(out.ends_with("\x1b[39;59m"));

        let row0 = DIACRITICS[0];
        let col0 = DIACRITICS[0];
        let fourth = DIACRITICS[1];
        let expected_marks = format!("{DEFAULT_PLACEHOLDER}{row0}{col0}{fourth}");
        assert!(out.contains(&expected_marks));
    }

    #[test]
    fn placement_id_defaults_to_24bit_color_even_when_small() {
        // image_id=42 (<=0xFF) gets the compact 256-color form by default,
        // but placement_id=7 (<=0xFF too) must still get the 24-bit form
        // since allow_256colors_for_placement_id defaults to false.
        let rect = PlaceRect {
            start_col: 0,
            start_row: 0,
            end_col: 1,
            end_row: 1,
        };
        let mode = get_mode(42, false);
        let mut out = String::new();
        encode_to_stream(&mut out, 42, 7, rect, mode, true, false, false).unwrap();

        assert!(out.starts_with("\x1b[38;5;42m"));
        assert!(out.contains("\x1b[58;2;0;0;7m"));
    }

    #[test]
    fn rejects_invalid_rectangle() {
        let rect = PlaceRect {
            start_col: 2,
            start_row: 0,
            end_col: 1,
            end_row: 1,
        };
        let mode = get_mode(1, false);
        let mut out = String::new();
        let err = encode_to_stream(&mut out, 1, 0, rect, mode, true, false, false).unwrap_err();
        assert!(matches!(err, Error::InvalidGeometry(_)));
    }

    #[test]
    fn rejects_first_col_level_below_row() {
        let err = PlaceholderMode::new(DiacriticLevel::None, DiacriticLevel::None).unwrap_err();
        assert!(matches!(err, Error::InvalidGeometry(_)));
    }

    #[test]
    fn rejects_end_row_over_table_size() {
        let rect = PlaceRect {
            start_col: 0,
            start_row: 0,
            end_col: 1,
            end_row: (MAX_ROW + 1) as i32,
        };
        let mode = get_mode(1, false);
        let mut out = String::new();
        let err = encode_to_stream(&mut out, 1, 0, rect, mode, true, false, false).unwrap_err();
        assert!(matches!(err, Error::InvalidGeometry(_)));
    }
}
