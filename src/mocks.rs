use std::cell::RefCell;

use ndarray::{ArrayD, ArrayViewD, IxDyn};

use crate::errors::Result;
use crate::traits::{CellSegmentationModel, Segmentation};

/// Test double for the segmentation network.
///
/// Returns zero flows and a constant probability shaped like the plane, and
/// records every call so tests can check what the loop passed in.
#[derive(Debug)]
pub struct MockCellposeModel {
    pub diam_mean: f32,
    calls: RefCell<Vec<MockCall>>,
}

#[derive(Debug, Clone)]
struct MockCall {
    shape: Vec<usize>,
    mean: f32,
    diameter: Option<f32>,
    rescale: Option<f32>,
}

impl MockCellposeModel {
    pub fn new() -> Self {
        Self {
            diam_mean: 30.0,
            calls: RefCell::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.borrow().len()
    }

    pub fn seen_shapes(&self) -> Vec<Vec<usize>> {
        self.calls.borrow().iter().map(|c| c.shape.clone()).collect()
    }

    pub fn seen_means(&self) -> Vec<f32> {
        self.calls.borrow().iter().map(|c| c.mean).collect()
    }

    pub fn seen_arguments(&self) -> Vec<(Option<f32>, Option<f32>)> {
        self.calls
            .borrow()
            .iter()
            .map(|c| (c.diameter, c.rescale))
            .collect()
    }
}

impl CellSegmentationModel for MockCellposeModel {
    fn eval(
        &self,
        image: ArrayViewD<f32>,
        diameter: Option<f32>,
        rescale: Option<f32>,
    ) -> Result<Segmentation> {
        self.calls.borrow_mut().push(MockCall {
            shape: image.shape().to_vec(),
            mean: image.mean().unwrap_or(0.0),
            diameter,
            rescale,
        });

        let (height, width) = (image.shape()[0], image.shape()[1]);
        Ok(Segmentation {
            location: ArrayD::zeros(IxDyn(&[height, width, 2])),
            probability: ArrayD::from_elem(IxDyn(&[height, width]), 0.5),
        })
    }

    fn diam_mean(&self) -> f32 {
        self.diam_mean
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_model_eval() -> Result<()> {
        let mock = MockCellposeModel::new();
        let image = ArrayD::<f32>::from_elem(IxDyn(&[10, 12]), 2.0);

        let result = mock.eval(image.view(), Some(30.0), None)?;
        assert_eq!(result.location.shape(), &[10, 12, 2]);
        assert_eq!(result.probability.shape(), &[10, 12]);
        assert_eq!(mock.calls(), 1);
        assert_eq!(mock.seen_means(), vec![2.0]);
        assert_eq!(mock.seen_arguments(), vec![(Some(30.0), None)]);
        assert_eq!(mock.diam_mean(), 30.0);
        Ok(())
    }
}
