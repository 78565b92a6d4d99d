//! §4.F geometry/fit: choose `(cols, rows)` for an image given its pixel
//! size, the terminal's cell size, and caps, preserving aspect ratio.
//!
//! Grounded on `examples/original_source/ikup/ikup_terminal.py`'s
//! `get_optimal_cols_and_rows` (precedence of explicit cols/rows over
//! auto-computed ones, clip-then-recompute order) and the teacher's
//! `src/lib.rs::resize_pixels`/`needs_resize` for the aspect-preserving
//! ceil-division idiom ("Ripped from image-rs").

use crate::error::{Error, Result};
use crate::placeholder::MAX_ROW;

/// Inputs to [`fit`] (spec §4.F).
#[derive(Debug, Clone, Copy)]
pub struct FitInput {
    pub width_px: f64,
    pub height_px: f64,
    pub cell_w: f64,
    pub cell_h: f64,
    pub cols: Option<u32>,
    pub rows: Option<u32>,
    pub max_cols: u32,
    pub max_rows: u32,
    pub scale: f64,
    pub global_scale: f64,
}

fn ceil_div_f64(a: f64, b: f64) -> u32 {
    (a / b).ceil().max(1.0) as u32
}

/// `(cols, rows)` preserving aspect ratio, spec §4.F steps 1-6.
///
/// `max_rows` is further clamped to 297, the size of the combining-diacritic
/// table (`crate::placeholder::MAX_ROW`): a placeholder can never paint more
/// rows than that regardless of what the caller requests.
pub fn fit(input: FitInput) -> Result<(u32, u32)> {
    if let Some(c) = input.cols {
        if c == 0 {
            return Err(Error::InvalidGeometry("cols must be positive".into()));
        }
    }
    if let Some(r) = input.rows {
        if r == 0 {
            return Err(Error::InvalidGeometry("rows must be positive".into()));
        }
    }
    if input.max_cols == 0 || input.max_rows == 0 {
        return Err(Error::InvalidGeometry("max_cols/max_rows must be positive".into()));
    }
    if input.cell_w <= 0.0 || input.cell_h <= 0.0 {
        return Err(Error::InvalidGeometry("cell size must be positive".into()));
    }

    let max_rows = input.max_rows.min(MAX_ROW as u32);

    if let (Some(c), Some(r)) = (input.cols, input.rows) {
        return Ok((c.min(input.max_cols).max(1), r.min(max_rows).max(1)));
    }

    let effective_scale = input.global_scale * input.scale;
    let w = input.width_px * effective_scale;
    let h = input.height_px * effective_scale;

    let cols_auto = input.cols.is_none();
    let rows_auto = input.rows.is_none();

    let (mut cols, mut rows) = match (input.cols, input.rows) {
        (None, None) => (ceil_div_f64(w, input.cell_w), ceil_div_f64(h, input.cell_h)),
        (None, Some(r)) => {
            let c = ((r as f64 * input.cell_h * w) / (h * input.cell_w)).ceil().max(1.0) as u32;
            (c, r)
        }
        (Some(c), None) => {
            let r = ((c as f64 * input.cell_w * h) / (w * input.cell_h)).ceil().max(1.0) as u32;
            (c, r)
        }
        (Some(_), Some(_)) => unreachable!("handled above"),
    };

    if cols_auto && cols > input.max_cols {
        cols = input.max_cols;
        rows = ((cols as f64 * input.cell_w * h) / (w * input.cell_h)).ceil().max(1.0) as u32;
    }
    if rows_auto && rows > max_rows {
        rows = max_rows;
        cols = ((rows as f64 * input.cell_h * w) / (h * input.cell_w)).ceil().max(1.0) as u32;
    }

    cols = cols.clamp(1, input.max_cols);
    rows = rows.clamp(1, max_rows);
    Ok((cols, rows))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> FitInput {
        FitInput {
            width_px: 800.0,
            height_px: 600.0,
            cell_w: 8.0,
            cell_h: 16.0,
            cols: None,
            rows: None,
            max_cols: 80,
            max_rows: 24,
            scale: 1.0,
            global_scale: 1.0,
        }
    }

    #[test]
    fn both_explicit_dims_are_just_clamped() {
        let (c, r) = fit(FitInput {
            cols: Some(10),
            rows: Some(5),
            ..base()
        })
        .unwrap();
        assert_eq!((c, r), (10, 5));
    }

    #[test]
    fn auto_both_preserves_aspect() {
        let (c, r) = fit(base()).unwrap();
        // 800/8 = 100 cols, 600/16 = 37.5 -> 38 rows, both clipped to caps.
        assert_eq!(c, 80);
        assert!(r <= 24);
    }

    #[test]
    fn rows_over_297_are_clamped_to_diacritic_table_size() {
        let (_, r) = fit(FitInput {
            max_rows: 10_000,
            height_px: 1_000_000.0,
            ..base()
        })
        .unwrap();
        assert!(r <= MAX_ROW as u32);
    }

    #[test]
    fn rejects_zero_cols() {
        let err = fit(FitInput {
            cols: Some(0),
            ..base()
        })
        .unwrap_err();
        assert!(matches!(err, Error::InvalidGeometry(_)));
    }
}
