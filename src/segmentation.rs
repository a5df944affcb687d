use std::path::Path;

use ndarray::{stack, ArrayD, Axis};
use tracing::debug;

use crate::errors::{CellposeError, Result};
use crate::traits::{CellSegmentationModel, Segmentation};

/// Segment a squeezed image.
///
/// Rank 2 is evaluated once. Rank 3 and 4 are evaluated per index of the
/// last axis and the results stacked on a new leading axis; a rank-4 image
/// has its axes 2 and 3 swapped first, so the slices run over what was
/// axis 2.
pub fn segment_image<M: CellSegmentationModel>(
    model: &M,
    path: &Path,
    image: ArrayD<f32>,
    diameter: Option<f32>,
    rescale: Option<f32>,
) -> Result<Segmentation> {
    match image.ndim() {
        2 => model.eval(image.view(), diameter, rescale),
        3 | 4 => {
            let mut image = image;
            if image.ndim() == 4 {
                image.swap_axes(2, 3);
            }
            segment_slices(model, path, &image, diameter, rescale)
        }
        rank => Err(CellposeError::UnsupportedRank {
            path: path.to_path_buf(),
            rank,
        }),
    }
}

fn segment_slices<M: CellSegmentationModel>(
    model: &M,
    path: &Path,
    image: &ArrayD<f32>,
    diameter: Option<f32>,
    rescale: Option<f32>,
) -> Result<Segmentation> {
    let last = Axis(image.ndim() - 1);
    let slices = image.len_of(last);
    if slices == 0 {
        return Err(CellposeError::UnsupportedRank {
            path: path.to_path_buf(),
            rank: image.ndim(),
        });
    }

    let mut locations = Vec::with_capacity(slices);
    let mut probabilities = Vec::with_capacity(slices);
    for (index, plane) in image.axis_iter(last).enumerate() {
        debug!(path = %path.display(), slice = index, of = slices, "evaluating slice");
        let result = model.eval(plane, diameter, rescale)?;
        locations.push(result.location);
        probabilities.push(result.probability);
    }

    let location_views: Vec<_> = locations.iter().map(|a| a.view()).collect();
    let probability_views: Vec<_> = probabilities.iter().map(|a| a.view()).collect();
    Ok(Segmentation {
        location: stack(Axis(0), &location_views)?,
        probability: stack(Axis(0), &probability_views)?,
    })
}
