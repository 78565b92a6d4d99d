//! Decoder/encoder interface (spec §9 "From PIL").
//!
//! The core treats the image library as an interface:
//! `decode(path) -> ImageHandle{width, height, format, mode}`,
//! `resize(handle, w, h) -> ImageHandle`, `encode(handle, format) -> bytes`,
//! `apply_exif_orientation(handle) -> ImageHandle`, `real_size(handle) ->
//! (w, h)`. Backed by the `image` crate, exactly as the teacher's
//! `protocol/kitty.rs` and `lib.rs` already use it.

use std::path::Path;

use image::{DynamicImage, ImageFormat};

use crate::error::Result;

/// An in-memory decoded image plus the metadata the core needs.
pub struct ImageHandle {
    pub image: DynamicImage,
}

impl ImageHandle {
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

pub fn decode(path: &Path) -> Result<ImageHandle> {
    let bytes = std::fs::read(path)?;
    decode_bytes(&bytes)
}

pub fn decode_bytes(bytes: &[u8]) -> Result<ImageHandle> {
    let image = image::load_from_memory(bytes)?;
    Ok(ImageHandle { image })
}

/// Resize to exact `(w, h)`, no aspect preservation (the caller has already
/// decided the target dimensions; see [`crate::geometry`] and
/// [`crate::cache::optimizer`]).
pub fn resize(handle: &ImageHandle, w: u32, h: u32) -> ImageHandle {
    if (w, h) == (handle.width(), handle.height()) {
        return ImageHandle {
            image: handle.image.clone(),
        };
    }
    ImageHandle {
        image: handle
            .image
            .resize_exact(w.max(1), h.max(1), image::imageops::FilterType::Lanczos3),
    }
}

pub fn encode(handle: &ImageHandle, format: ImageFormat) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    let image = match format {
        ImageFormat::Jpeg if handle.image.color().has_alpha() => {
            // JPEG has no alpha channel; flatten onto black, matching the
            // upstream `image_optimizer.py::convert_image`'s background
            // compositing for RGBA/LA/P sources.
            DynamicImage::ImageRgb8(handle.image.to_rgb8())
        }
        _ => handle.image.clone(),
    };
    image.write_to(&mut std::io::Cursor::new(&mut out), format)?;
    Ok(out)
}

pub fn format_from_name(name: &str) -> Option<ImageFormat> {
    match name.to_ascii_uppercase().as_str() {
        "PNG" => Some(ImageFormat::Png),
        "JPEG" | "JPG" => Some(ImageFormat::Jpeg),
        "GIF" => Some(ImageFormat::Gif),
        "WEBP" => Some(ImageFormat::WebP),
        _ => None,
    }
}

/// Best-effort EXIF `Orientation` (tag `0x0112`) reader for JPEG. The
/// example pack carries no EXIF-parsing crate, so this scans the raw APP1
/// segment directly rather than pulling in a new dependency for one field
/// (see DESIGN.md).
pub fn exif_orientation(bytes: &[u8]) -> u16 {
    const DEFAULT: u16 = 1;
    if bytes.len() < 4 || bytes[0..2] != [0xFF, 0xD8] {
        return DEFAULT;
    }
    let mut pos = 2;
    while pos + 4 <= bytes.len() {
        if bytes[pos] != 0xFF {
            break;
        }
        let marker = bytes[pos + 1];
        let seg_len = u16::from_be_bytes([bytes[pos + 2], bytes[pos + 3]]) as usize;
        if marker == 0xE1 && pos + 4 + 6 <= bytes.len() && &bytes[pos + 4..pos + 10] == b"Exif\0\0" {
            if let Some(o) = parse_exif_orientation(&bytes[pos + 10..(pos + 2 + seg_len).min(bytes.len())]) {
                return o;
            }
        }
        if marker == 0xDA {
            break; // start of scan, no more APPn segments precede pixel data
        }
        pos += 2 + seg_len;
    }
    DEFAULT
}

fn parse_exif_orientation(tiff: &[u8]) -> Option<u16> {
    if tiff.len() < 8 {
        return None;
    }
    let little_endian = &tiff[0..2] == b"II";
    let read_u16 = |b: &[u8]| -> u16 {
        if little_endian {
            u16::from_le_bytes([b[0], b[1]])
        } else {
            u16::from_be_bytes([b[0], b[1]])
        }
    };
    let read_u32 = |b: &[u8]| -> u32 {
        if little_endian {
            u32::from_le_bytes([b[0], b[1], b[2], b[3]])
        } else {
            u32::from_be_bytes([b[0], b[1], b[2], b[3]])
        }
    };
    let ifd0_offset = read_u32(&tiff[4..8]) as usize;
    if ifd0_offset + 2 > tiff.len() {
        return None;
    }
    let entry_count = read_u16(&tiff[ifd0_offset..ifd0_offset + 2]) as usize;
    let entries_start = ifd0_offset + 2;
    for i in 0..entry_count {
        let entry_off = entries_start + i * 12;
        if entry_off + 12 > tiff.len() {
            break;
        }
        let tag = read_u16(&tiff[entry_off..entry_off + 2]);
        if tag == 0x0112 {
            let value = read_u16(&tiff[entry_off + 8..entry_off + 10]);
            return Some(value);
        }
    }
    None
}

/// `real_size(handle) -> (w, h)`: swaps axes for EXIF orientations 5-8,
/// matching `ikup/utils.py::get_real_image_size`.
pub fn real_size(width: u32, height: u32, orientation: u16) -> (u32, u32) {
    if (5..=8).contains(&orientation) {
        (height, width)
    } else {
        (width, height)
    }
}

/// `apply_exif_orientation(handle) -> ImageHandle`, matching
/// `image_optimizer.py::transpose_image_maybe`.
pub fn apply_exif_orientation(handle: ImageHandle, orientation: u16) -> ImageHandle {
    let image = match orientation {
        2 => handle.image.fliph(),
        3 => handle.image.rotate180(),
        4 => handle.image.flipv(),
        5 => handle.image.rotate90().fliph(),
        6 => handle.image.rotate90(),
        7 => handle.image.rotate270().fliph(),
        8 => handle.image.rotate270(),
        _ => handle.image,
    };
    ImageHandle { image }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn real_size_swaps_for_rotated_orientations() {
        assert_eq!(real_size(100, 50, 1), (100, 50));
        assert_eq!(real_size(100, 50, 6), (50, 100));
        assert_eq!(real_size(100, 50, 8), (50, 100));
    }

    #[test]
    fn exif_orientation_defaults_to_one_for_non_jpeg() {
        assert_eq!(exif_orientation(b"not a jpeg"), 1);
    }
}
