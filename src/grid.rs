//! Positional reference grid drawn over screenshots.
//!
//! Oracles get a dot every `pitch` pixels so they can talk about screen
//! positions. Pure pixel math, no I/O.

use std::io::Cursor;

use image::{DynamicImage, ImageFormat, Rgba, RgbaImage, imageops::FilterType};

use crate::error::CaptureError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GridSpec {
    /// Distance between markers in pixels, both axes.
    pub pitch: u32,
    /// Marker radius in pixels.
    pub radius: u32,
    pub color: Rgba<u8>,
}

impl Default for GridSpec {
    fn default() -> Self {
        Self {
            pitch: 100,
            radius: 5,
            color: Rgba([0, 255, 0, 255]),
        }
    }
}

/// Draw a filled marker at every grid intersection, starting at (0, 0).
pub fn annotate(image: &mut RgbaImage, spec: &GridSpec) {
    if spec.pitch == 0 {
        return;
    }
    let (width, height) = image.dimensions();
    let r = spec.radius as i64;

    for cy in (0..height).step_by(spec.pitch as usize) {
        for cx in (0..width).step_by(spec.pitch as usize) {
            for dy in -r..=r {
                for dx in -r..=r {
                    if dx * dx + dy * dy > r * r {
                        continue;
                    }
                    let x = cx as i64 + dx;
                    let y = cy as i64 + dy;
                    if x < 0 || y < 0 || x >= width as i64 || y >= height as i64 {
                        continue;
                    }
                    image.put_pixel(x as u32, y as u32, spec.color);
                }
            }
        }
    }
}

/// Decode a capture, optionally resize it, draw the grid and re-encode as PNG.
///
/// Returns the PNG bytes with the final width and height.
pub fn annotate_png(
    raw: &[u8],
    spec: &GridSpec,
    resize_to: Option<(u32, u32)>,
) -> Result<(Vec<u8>, u32, u32), CaptureError> {
    let decoded =
        image::load_from_memory(raw).map_err(|e| CaptureError::Decode(e.to_string()))?;
    let decoded = match resize_to {
        Some((w, h)) if (w, h) != (decoded.width(), decoded.height()) && w > 0 && h > 0 => {
            decoded.resize_exact(w, h, FilterType::Triangle)
        }
        _ => decoded,
    };

    let mut rgba = decoded.to_rgba8();
    annotate(&mut rgba, spec);
    let (width, height) = rgba.dimensions();

    let mut png = Cursor::new(Vec::new());
    DynamicImage::ImageRgba8(rgba)
        .write_to(&mut png, ImageFormat::Png)
        .map_err(|e| CaptureError::Decode(e.to_string()))?;
    Ok((png.into_inner(), width, height))
}
