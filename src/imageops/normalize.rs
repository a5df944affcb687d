use ndarray::{Array2, ArrayView2};
use num_traits::{Float, ToPrimitive};

/// Value below which `q` (in `[0, 1]`) of the samples fall, nearest-rank.
pub fn percentile<T: Float>(values: &[T], q: f64) -> Option<T> {
    if values.is_empty() {
        return None;
    }
    let mut sorted: Vec<T> = values.iter().copied().filter(|v| !v.is_nan()).collect();
    if sorted.is_empty() {
        return None;
    }
    let rank = (q.clamp(0.0, 1.0) * (sorted.len() - 1) as f64).round() as usize;
    let (_, value, _) = sorted.select_nth_unstable_by(rank, |a, b| {
        a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal)
    });
    Some(*value)
}

/// Map the 1st percentile to 0 and the 99th to 1. A flat plane maps to 0.
pub fn normalize99(plane: ArrayView2<f32>) -> Array2<f32> {
    let values: Vec<f32> = plane.iter().copied().collect();
    let (Some(low), Some(high)) = (percentile(&values, 0.01), percentile(&values, 0.99)) else {
        return Array2::zeros(plane.raw_dim());
    };
    let span = high - low;
    if span <= f32::EPSILON {
        return Array2::zeros(plane.raw_dim());
    }
    plane.mapv(|v| (v - low) / span)
}

/// Convert any decoded sample buffer to `f32`.
pub fn to_f32<T: ToPrimitive>(samples: Vec<T>) -> Vec<f32> {
    samples
        .into_iter()
        .map(|v| v.to_f32().unwrap_or(0.0))
        .collect()
}
