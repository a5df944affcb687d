use image::{imageops, imageops::FilterType, ImageBuffer, Luma};
use ndarray::{Array2, Array3, ArrayView2, ArrayView3, Axis};
use nshare::AsNdarray2;

use crate::errors::{CellposeError, Result};

/// Bilinear resize of one `(Y, X)` plane.
///
/// `imageops` clamps float pixels to `[0, 1]`, so the plane is mapped into
/// that range first and mapped back afterwards. The triangle filter only
/// takes convex combinations, which keeps the round trip exact.
pub fn resize_plane(plane: ArrayView2<f32>, height: usize, width: usize) -> Result<Array2<f32>> {
    let (h, w) = plane.dim();
    if (h, w) == (height, width) {
        return Ok(plane.to_owned());
    }
    if h == 0 || w == 0 || height == 0 || width == 0 {
        return Err(CellposeError::model(
            "plane resize",
            format!("cannot resize {h}x{w} plane to {height}x{width}"),
        ));
    }

    let (min, max) = plane
        .iter()
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        });
    let span = if max > min { max - min } else { 1.0 };

    let raw: Vec<f32> = plane.iter().map(|&v| (v - min) / span).collect();
    let buffer = ImageBuffer::<Luma<f32>, Vec<f32>>::from_raw(w as u32, h as u32, raw)
        .ok_or_else(|| CellposeError::model("plane resize", "plane buffer size mismatch"))?;

    let resized = imageops::resize(&buffer, width as u32, height as u32, FilterType::Triangle);
    Ok(resized.as_ndarray2().mapv(|v| v * span + min))
}

/// Resize every channel of a `(C, Y, X)` tensor.
pub fn resize_channels(
    tensor: ArrayView3<f32>,
    height: usize,
    width: usize,
) -> Result<Array3<f32>> {
    let mut out = Array3::<f32>::zeros((tensor.len_of(Axis(0)), height, width));
    for (src, mut dst) in tensor.outer_iter().zip(out.outer_iter_mut()) {
        dst.assign(&resize_plane(src, height, width)?);
    }
    Ok(out)
}

/// Target size of a `(height, width)` image scaled by `rescale`, never below one pixel.
pub fn scaled_size(height: usize, width: usize, rescale: f32) -> (usize, usize) {
    let scale = |n: usize| ((n as f32 * rescale).round() as usize).max(1);
    (scale(height), scale(width))
}
