use crate::errors::Result;
use ndarray::{ArrayD, ArrayViewD};

/// Per-image segmentation output.
///
/// For a single 2D evaluation `location` is `(Y, X, 2)` and `probability` is
/// `(Y, X)`. Stacked volumetric results gain a leading slice axis.
#[derive(Debug, Clone)]
pub struct Segmentation {
    pub location: ArrayD<f32>,
    pub probability: ArrayD<f32>,
}

/// Abstraction over the pretrained segmentation network.
///
/// Keeps the per-image loop testable without ONNX Runtime.
pub trait CellSegmentationModel {
    /// Evaluate one plane, `(Y, X)` or `(Y, X, C)`.
    ///
    /// `rescale` wins over `diameter`; with neither the diameter is
    /// estimated from the image.
    fn eval(
        &self,
        image: ArrayViewD<f32>,
        diameter: Option<f32>,
        rescale: Option<f32>,
    ) -> Result<Segmentation>;

    /// Object diameter the weights were trained at.
    fn diam_mean(&self) -> f32;
}

impl<M: CellSegmentationModel + ?Sized> CellSegmentationModel for &M {
    fn eval(
        &self,
        image: ArrayViewD<f32>,
        diameter: Option<f32>,
        rescale: Option<f32>,
    ) -> Result<Segmentation> {
        (**self).eval(image, diameter, rescale)
    }

    fn diam_mean(&self) -> f32 {
        (**self).diam_mean()
    }
}
