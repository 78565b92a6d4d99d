//! §4.C byte-budget optimizer: "largest image fitting a byte budget."
//!
//! Ported in meaning from `examples/original_source/ikup/image_optimizer.py`
//! (`optimize_image_to_size`, `_get_coefficients`, `convert_image`).

use image::ImageFormat;

use crate::error::Result;
use crate::image_codec::{self, ImageHandle};

/// A converted artifact: encoded bytes, the resulting dimensions, and a
/// quality estimate (`dst_area / src_area`, spec §4.C "Quality").
pub struct ConvertedImage {
    pub bytes: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub quality: f64,
}

/// `convert_image(image, format, width, height)`.
pub fn convert_image(
    handle: &ImageHandle,
    format: ImageFormat,
    width: u32,
    height: u32,
) -> Result<ConvertedImage> {
    let src_area = (handle.width() as u64 * handle.height() as u64).max(1);
    let resized = image_codec::resize(handle, width, height);
    let bytes = image_codec::encode(&resized, format)?;
    let dst_area = resized.width() as u64 * resized.height() as u64;
    Ok(ConvertedImage {
        width: resized.width(),
        height: resized.height(),
        quality: (dst_area as f64 / src_area as f64).clamp(0.0, 1.0),
        bytes,
    })
}

/// Fit `area = a * size_bytes + b` from samples sorted by proximity to the
/// target, preferring the two freshest points with distinct sizes.
fn get_coefficients(area_to_size: &[(u64, u64)]) -> (f64, f64) {
    let Some(&(_, s1)) = area_to_size.first() else {
        return (2.0, 0.0);
    };
    if s1 == 0 {
        return (2.0, 0.0);
    }
    let (f1, s1) = area_to_size[0];
    let mut f2 = 0.0;
    let mut s2 = 0.0;
    for &(f2_cand, s2_cand) in &area_to_size[1..] {
        if s2_cand != s1 {
            f2 = f2_cand as f64;
            s2 = s2_cand as f64;
            break;
        }
    }
    let f1 = f1 as f64;
    let s1 = s1 as f64;
    if s1 == s2 {
        return (2.0, 0.0);
    }
    let a = (f1 - f2) / (s1 - s2);
    let b = f1 - a * s1;
    (a, b)
}

/// `optimize_image_to_size(image, format, max_size_bytes, tolerance,
/// samples)` (spec §4.C "Byte-budget mode").
pub fn optimize_image_to_size(
    handle: &ImageHandle,
    format: ImageFormat,
    max_size_bytes: u64,
    tolerance: f64,
    samples: &[(u32, u32, u64)],
) -> Result<ConvertedImage> {
    if handle.width() <= 1 || handle.height() <= 1 {
        return convert_image(handle, format, 1, 1);
    }

    let original_area = handle.width() as u64 * handle.height() as u64;
    let mut area_to_size: Vec<(u64, u64)> = samples
        .iter()
        .map(|&(w, h, s)| (w as u64 * h as u64, s))
        .collect();
    area_to_size.sort_by_key(|&(_, s)| (s as i64 - max_size_bytes as i64).unsigned_abs());

    let mut best: Option<ConvertedImage> = None;
    let mut best_size: i64 = -1;
    let mut best_dims = (0u32, 0u32);

    let mut best_exceed_dims = (handle.width() + 1, handle.height() + 1);
    let mut best_exceed_size = f64::INFINITY;

    for _iteration in 0..6 {
        let (a, b) = get_coefficients(&area_to_size);
        let target_size = max_size_bytes as f64 * (1.0 - tolerance / 2.0);
        let target_area = (a * target_size + b).max(0.0);

        let side_scale = (target_area / original_area as f64).sqrt();
        let mut new_width = ((handle.width() as f64 * side_scale + 0.5) as u32)
            .clamp(1, handle.width());
        let mut new_height = ((handle.height() as f64 * side_scale + 0.5) as u32)
            .clamp(1, handle.height());

        let too_small = best
            .as_ref()
            .is_some_and(|b| new_width <= b.width && new_height <= b.height);
        let too_large = new_width >= best_exceed_dims.0 && new_height >= best_exceed_dims.1;
        if too_small || too_large {
            new_width = ((best_dims.0 as f64 + best_exceed_dims.0 as f64) / 2.0 + 0.5) as u32;
            new_height = ((best_dims.1 as f64 + best_exceed_dims.1 as f64) / 2.0 + 0.5) as u32;
            new_width = new_width.clamp(1, handle.width());
            new_height = new_height.clamp(1, handle.height());
        }

        let cur = convert_image(handle, format, new_width, new_height)?;
        let cur_size = cur.bytes.len() as u64;
        area_to_size.insert(0, (new_width as u64 * new_height as u64, cur_size));

        if cur_size > max_size_bytes && cur.width == 1 && cur.height == 1 {
            return Ok(cur);
        }

        if cur_size <= max_size_bytes {
            if cur.width == handle.width() && cur.height == handle.height() {
                return Ok(cur);
            }
            if cur_size as f64 >= max_size_bytes as f64 * (1.0 - tolerance) {
                return Ok(cur);
            }
            if cur_size as i64 > best_size {
                best_size = cur_size as i64;
                best_dims = (cur.width, cur.height);
                best = Some(cur);
            }
        } else {
            if (cur_size as f64) < best_exceed_size {
                best_exceed_size = cur_size as f64;
                best_exceed_dims = (new_width, new_height);
            }
        }
    }

    match best {
        Some(b) => Ok(b),
        None => convert_image(handle, format, 1, 1),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, ImageBuffer, Rgb};

    fn solid(w: u32, h: u32) -> ImageHandle {
        let image: DynamicImage = ImageBuffer::from_pixel(w, h, Rgb::<u8>([200, 30, 30])).into();
        ImageHandle { image }
    }

    #[test]
    fn never_upscales() {
        let handle = solid(50, 50);
        let result =
            optimize_image_to_size(&handle, ImageFormat::Png, 1_000_000, 0.2, &[]).unwrap();
        assert!(result.width <= 50 && result.height <= 50);
    }

    #[test]
    fn tiny_image_is_returned_as_one_by_one() {
        let handle = solid(1, 1);
        let result = optimize_image_to_size(&handle, ImageFormat::Png, 10, 0.2, &[]).unwrap();
        assert_eq!((result.width, result.height), (1, 1));
    }

    #[test]
    fn result_respects_budget_or_is_minimal() {
        let handle = solid(400, 400);
        let result = optimize_image_to_size(&handle, ImageFormat::Png, 5_000, 0.2, &[]).unwrap();
        assert!(result.bytes.len() as u64 <= 5_000 || (result.width == 1 && result.height == 1));
    }
}
