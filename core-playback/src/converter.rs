//! # Frame Converter
//!
//! Turns a decoded [`VideoFrame`] in its native pixel format into a
//! top-left-origin RGBA [`PixelBuffer`], optionally rescaled.
//!
//! ## Sizing Rules
//!
//! | Requested `(w, h)` | Output |
//! |--------------------|--------|
//! | both > 0 | exactly `w x h` (aspect ratio not preserved) |
//! | one is 0 | missing side derived from the source aspect, rounded to the nearest even integer |
//! | both 0, or any < 0 | `InvalidDimensions` |
//!
//! YUV input is converted with BT.601 limited-range coefficients. Formats
//! without alpha get an opaque alpha channel. Scaling uses a bilinear
//! (`Triangle`) filter.

use crate::error::{PlaybackError, Result};
use crate::traits::{PixelFormat, Plane, VideoFrame};
use bridge_traits::render::{PixelBuffer, BYTES_PER_PIXEL};
use image::imageops::{self, FilterType};
use image::RgbaImage;
use tracing::trace;

/// Resolve the output size for a `width` x `height` request.
pub fn target_size(src_width: u32, src_height: u32, width: i64, height: i64) -> Result<(u32, u32)> {
    let invalid = || PlaybackError::InvalidDimensions { width, height };

    if width < 0 || height < 0 || (width == 0 && height == 0) {
        return Err(invalid());
    }
    if width > u32::MAX as i64 || height > u32::MAX as i64 {
        return Err(invalid());
    }
    if width > 0 && height > 0 {
        return Ok((width as u32, height as u32));
    }
    if src_width == 0 || src_height == 0 {
        return Err(invalid());
    }

    let aspect = src_width as f64 / src_height as f64;
    if width == 0 {
        Ok((round_even(height as f64 * aspect), height as u32))
    } else {
        Ok((width as u32, round_even(width as f64 / aspect)))
    }
}

/// Nearest even integer, never below 2.
fn round_even(value: f64) -> u32 {
    let even = (value / 2.0).round() * 2.0;
    even.clamp(2.0, u32::MAX as f64) as u32
}

/// Convert `frame` to RGBA at the size resolved by [`target_size`].
pub fn convert(frame: &VideoFrame, width: i64, height: i64) -> Result<PixelBuffer> {
    let (out_w, out_h) = target_size(frame.width, frame.height, width, height)?;
    let rgba = to_rgba(frame)?;

    let image = RgbaImage::from_raw(frame.width, frame.height, rgba).ok_or_else(|| {
        PlaybackError::Internal("RGBA buffer does not match frame size".to_string())
    })?;

    let scaled = if (out_w, out_h) == (frame.width, frame.height) {
        image
    } else {
        trace!(
            from_w = frame.width,
            from_h = frame.height,
            to_w = out_w,
            to_h = out_h,
            "Scaling frame"
        );
        imageops::resize(&image, out_w, out_h, FilterType::Triangle)
    };

    Ok(PixelBuffer::new(out_w, out_h, scaled.into_raw())?)
}

/// Convert at native size.
pub fn convert_native(frame: &VideoFrame) -> Result<PixelBuffer> {
    convert(frame, frame.width as i64, frame.height as i64)
}

// ============================================================================
// Pixel Format Conversion
// ============================================================================

fn to_rgba(frame: &VideoFrame) -> Result<Vec<u8>> {
    let (w, h) = (frame.width as usize, frame.height as usize);
    if w == 0 || h == 0 {
        return Err(PlaybackError::DecodeFailure("empty video frame".to_string()));
    }
    if frame.planes.len() < frame.format.plane_count() {
        return Err(PlaybackError::DecodeFailure(format!(
            "{:?} frame carries {} planes",
            frame.format,
            frame.planes.len()
        )));
    }

    let mut out = vec![0u8; w * h * BYTES_PER_PIXEL];
    let planes = &frame.planes;

    match frame.format {
        PixelFormat::Yuv420p => yuv_planar(&mut out, w, h, planes, 2, 2)?,
        PixelFormat::Yuv422p => yuv_planar(&mut out, w, h, planes, 2, 1)?,
        PixelFormat::Yuv444p => yuv_planar(&mut out, w, h, planes, 1, 1)?,
        PixelFormat::Nv12 => {
            let y_plane = checked_plane(&planes[0], w, h, "Y")?;
            let uv_plane = checked_plane(&planes[1], w.div_ceil(2) * 2, h.div_ceil(2), "UV")?;
            for row in 0..h {
                for col in 0..w {
                    let y = y_plane.data[row * y_plane.stride + col];
                    let uv = (row / 2) * uv_plane.stride + (col / 2) * 2;
                    let (u, v) = (uv_plane.data[uv], uv_plane.data[uv + 1]);
                    write_px(&mut out, row * w + col, yuv_to_rgb(y, u, v));
                }
            }
        }
        PixelFormat::Rgb24 => {
            let plane = checked_plane(&planes[0], w * 3, h, "RGB")?;
            for row in 0..h {
                for col in 0..w {
                    let i = row * plane.stride + col * 3;
                    let px = &plane.data[i..i + 3];
                    write_px(&mut out, row * w + col, [px[0], px[1], px[2]]);
                }
            }
        }
        PixelFormat::Rgba | PixelFormat::Bgra => {
            let plane = checked_plane(&planes[0], w * 4, h, "RGBA")?;
            let swap = frame.format == PixelFormat::Bgra;
            for row in 0..h {
                let src = &plane.data[row * plane.stride..row * plane.stride + w * 4];
                let dst = &mut out[row * w * 4..(row + 1) * w * 4];
                dst.copy_from_slice(src);
                if swap {
                    for px in dst.chunks_exact_mut(4) {
                        px.swap(0, 2);
                    }
                }
            }
        }
        PixelFormat::Gray8 => {
            let plane = checked_plane(&planes[0], w, h, "gray")?;
            for row in 0..h {
                for col in 0..w {
                    let g = plane.data[row * plane.stride + col];
                    write_px(&mut out, row * w + col, [g, g, g]);
                }
            }
        }
    }

    Ok(out)
}

fn yuv_planar(
    out: &mut [u8],
    w: usize,
    h: usize,
    planes: &[Plane],
    x_sub: usize,
    y_sub: usize,
) -> Result<()> {
    let (cw, ch) = (w.div_ceil(x_sub), h.div_ceil(y_sub));
    let y_plane = checked_plane(&planes[0], w, h, "Y")?;
    let u_plane = checked_plane(&planes[1], cw, ch, "U")?;
    let v_plane = checked_plane(&planes[2], cw, ch, "V")?;

    for row in 0..h {
        let crow = row / y_sub;
        for col in 0..w {
            let ccol = col / x_sub;
            let y = y_plane.data[row * y_plane.stride + col];
            let u = u_plane.data[crow * u_plane.stride + ccol];
            let v = v_plane.data[crow * v_plane.stride + ccol];
            write_px(out, row * w + col, yuv_to_rgb(y, u, v));
        }
    }
    Ok(())
}

/// Reject planes too short for `rows` rows of `row_bytes` at their stride.
fn checked_plane<'a>(plane: &'a Plane, row_bytes: usize, rows: usize, name: &str) -> Result<&'a Plane> {
    let needed = plane.stride.saturating_mul(rows.saturating_sub(1)) + row_bytes;
    if plane.stride < row_bytes || plane.data.len() < needed {
        return Err(PlaybackError::DecodeFailure(format!(
            "{} plane too short: {} bytes, stride {}, need {}",
            name,
            plane.data.len(),
            plane.stride,
            needed
        )));
    }
    Ok(plane)
}

#[inline]
fn write_px(out: &mut [u8], index: usize, rgb: [u8; 3]) {
    let o = index * BYTES_PER_PIXEL;
    out[o] = rgb[0];
    out[o + 1] = rgb[1];
    out[o + 2] = rgb[2];
    out[o + 3] = 255;
}

/// BT.601 limited range, integer arithmetic.
#[inline]
fn yuv_to_rgb(y: u8, u: u8, v: u8) -> [u8; 3] {
    let c = y as i32 - 16;
    let d = u as i32 - 128;
    let e = v as i32 - 128;

    let r = (298 * c + 409 * e + 128) >> 8;
    let g = (298 * c - 100 * d - 208 * e + 128) >> 8;
    let b = (298 * c + 516 * d + 128) >> 8;

    [clamp_u8(r), clamp_u8(g), clamp_u8(b)]
}

#[inline]
fn clamp_u8(value: i32) -> u8 {
    value.clamp(0, 255) as u8
}
