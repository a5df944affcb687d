use image::{GrayImage, Luma};
use imageproc::region_labelling::{connected_components, Connectivity};
use ndarray::ArrayView2;

const FOREGROUND_THRESHOLD: f32 = 0.5;

/// Median equivalent-circle diameter of the 4-connected foreground objects in
/// a probability map, or `None` when there is no foreground.
pub fn estimate_diameter(probability: ArrayView2<f32>) -> Option<f32> {
    let mut areas = component_areas(probability);
    if areas.is_empty() {
        return None;
    }
    let mid = areas.len() / 2;
    areas.select_nth_unstable(mid);
    let median = areas[mid] as f32;
    Some(2.0 * (median / std::f32::consts::PI).sqrt())
}

/// Pixel count of every labelled component, in label order.
fn component_areas(probability: ArrayView2<f32>) -> Vec<usize> {
    let (height, width) = probability.dim();
    let mask = GrayImage::from_fn(width as u32, height as u32, |x, y| {
        Luma([u8::from(
            probability[[y as usize, x as usize]] > FOREGROUND_THRESHOLD,
        )])
    });
    let labels = connected_components(&mask, Connectivity::Four, Luma([0u8]));

    let mut areas: Vec<usize> = Vec::new();
    for &Luma([label]) in labels.pixels() {
        if label == 0 {
            continue;
        }
        let index = label as usize - 1;
        if index >= areas.len() {
            areas.resize(index + 1, 0);
        }
        areas[index] += 1;
    }
    areas
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{s, Array2};

    #[test]
    fn test_empty_map() {
        let prob = Array2::<f32>::zeros((8, 8));
        assert_eq!(estimate_diameter(prob.view()), None);
    }

    #[test]
    fn test_separate_squares() {
        let mut prob = Array2::<f32>::zeros((32, 32));
        prob.slice_mut(s![0..4, 0..4]).fill(1.0);
        prob.slice_mut(s![10..14, 10..14]).fill(1.0);
        prob.slice_mut(s![20..24, 20..24]).fill(1.0);

        assert_eq!(component_areas(prob.view()), vec![16, 16, 16]);
        let diameter = estimate_diameter(prob.view()).unwrap();
        assert!((diameter - 2.0 * (16.0 / std::f32::consts::PI).sqrt()).abs() < 1e-4);
    }

    #[test]
    fn test_diagonal_pixels_are_separate() {
        let mut prob = Array2::<f32>::zeros((3, 3));
        prob[[0, 0]] = 0.9;
        prob[[1, 1]] = 0.9;
        assert_eq!(component_areas(prob.view()).len(), 2);
    }

    #[test]
    fn test_non_square_map() {
        let mut prob = Array2::<f32>::zeros((4, 10));
        prob.slice_mut(s![1..3, 2..9]).fill(0.8);
        assert_eq!(component_areas(prob.view()), vec![14]);
    }
}
