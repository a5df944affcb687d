use std::{
    fmt,
    path::{Path, PathBuf},
};

use crate::{
    device::Device,
    errors::{CellposeError, Result},
    imageops::{
        estimate_diameter,
        normalize::normalize99,
        padding::{crop, pad_to_alignment},
        resize::{resize_channels, scaled_size},
        sigmoid,
    },
    traits::{CellSegmentationModel, Segmentation},
};
use ndarray::prelude::*;
use ort::value::TensorRef;
use ort::{
    execution_providers::{CUDAExecutionProvider, TensorRTExecutionProvider},
    session::{builder::SessionBuilder, Session},
};
use parking_lot::Mutex;
use tracing::{debug, info};

/// Diameter assumed for custom weights that do not record their own.
pub const DEFAULT_DIAM_MEAN: f32 = 30.0;

/// ONNX custom-metadata key holding the training diameter.
const DIAM_MEAN_KEY: &str = "diam_mean";

/// Network outputs: dY flow, dX flow, cell-probability logit.
const OUTPUT_CHANNELS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuiltinModel {
    Cyto,
    Nuclei,
}

impl BuiltinModel {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "cyto" => Some(Self::Cyto),
            "nuclei" => Some(Self::Nuclei),
            _ => None,
        }
    }

    pub const fn name(&self) -> &'static str {
        match self {
            Self::Cyto => "cyto",
            Self::Nuclei => "nuclei",
        }
    }

    pub const fn diam_mean(&self) -> f32 {
        match self {
            Self::Cyto => 30.0,
            Self::Nuclei => 17.0,
        }
    }

    pub fn weights_path(&self, model_dir: &Path) -> PathBuf {
        model_dir.join(format!("{}.onnx", self.name()))
    }
}

/// Where the weights of a run come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelSource {
    Builtin(BuiltinModel),
    Custom(PathBuf),
}

impl ModelSource {
    /// A recognised preset name wins, then an existing path. Without any
    /// identifier the `cyto` preset is used.
    pub fn resolve(identifier: Option<&str>) -> Result<Self> {
        let Some(identifier) = identifier else {
            return Ok(Self::Builtin(BuiltinModel::Cyto));
        };

        if let Some(builtin) = BuiltinModel::from_name(identifier) {
            return Ok(Self::Builtin(builtin));
        }

        let path = Path::new(identifier);
        if !identifier.is_empty() && path.exists() {
            Ok(Self::Custom(path.to_path_buf()))
        } else {
            Err(CellposeError::ModelNotFound {
                identifier: identifier.to_string(),
            })
        }
    }
}

impl fmt::Display for ModelSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Builtin(builtin) => write!(f, "built-in `{}`", builtin.name()),
            Self::Custom(path) => write!(f, "custom `{}`", path.display()),
        }
    }
}

/// `diam_mean / diameter`, only defined for an explicit diameter.
pub fn rescale_factor(diam_mean: f32, diameter: Option<f32>) -> Option<f32> {
    diameter.filter(|d| *d > 0.0).map(|d| diam_mean / d)
}

/// Cellpose network exported to ONNX, run through ONNX Runtime.
pub struct CellposeNet {
    diam_mean: f32,
    input_name: String,
    output_name: String,
    session: Mutex<Session>,
}

impl CellposeNet {
    pub fn new(weights: &Path, device: Device, fallback_diam_mean: f32) -> Result<Self> {
        let builder = SessionBuilder::new()
            .map_err(|e| CellposeError::model("session builder init", e.to_string()))?;

        let builder = match device {
            Device::Cuda { device_id } => builder
                .with_execution_providers([
                    TensorRTExecutionProvider::default()
                        .with_device_id(device_id)
                        .build(),
                    CUDAExecutionProvider::default()
                        .with_device_id(device_id)
                        .build(),
                ])
                .map_err(|e| CellposeError::model("execution provider setup", e.to_string()))?,
            Device::Cpu => builder,
        };

        let session = builder
            .with_memory_pattern(true)
            .map_err(|e| CellposeError::model("memory pattern setup", e.to_string()))?
            .commit_from_file(weights)
            .map_err(|e| {
                CellposeError::model(
                    format!("loading model file: {}", weights.display()),
                    e.to_string(),
                )
            })?;

        let input_name = session
            .inputs
            .first()
            .map(|input| input.name.clone())
            .ok_or_else(|| CellposeError::model("model input lookup", "model has no inputs"))?;
        let output_name = session
            .outputs
            .first()
            .map(|output| output.name.clone())
            .ok_or_else(|| CellposeError::model("model output lookup", "model has no outputs"))?;

        let diam_mean = session
            .metadata()
            .ok()
            .and_then(|metadata| metadata.custom(DIAM_MEAN_KEY).ok().flatten())
            .and_then(|value| value.trim().parse::<f32>().ok())
            .filter(|value| *value > 0.0)
            .unwrap_or(fallback_diam_mean);

        debug!(%input_name, %output_name, diam_mean, "model session ready");

        Ok(Self {
            diam_mean,
            input_name,
            output_name,
            session: Mutex::new(session),
        })
    }

    /// Raw forward pass on a `(N, 2, Y, X)` tensor.
    pub fn predict(&self, tensor: ArrayView4<f32>) -> Result<Array4<f32>> {
        let mut binding = self.session.lock();
        let outputs = binding.run(ort::inputs![
            self.input_name.as_str() => TensorRef::from_array_view(&tensor.as_standard_layout())?
        ])?;
        Ok(outputs[self.output_name.as_str()]
            .try_extract_array::<f32>()?
            .into_dimensionality::<Ix4>()?
            .to_owned())
    }

    /// Flows `(2, Y, X)` and probabilities `(Y, X)` at the input's own size,
    /// with the network run at `rescale` times that size.
    fn run_scaled(
        &self,
        input: ArrayView3<f32>,
        rescale: f32,
    ) -> Result<(Array3<f32>, Array2<f32>)> {
        if !rescale.is_finite() || rescale <= 0.0 {
            return Err(CellposeError::model(
                "rescale",
                format!("invalid rescale factor {rescale}"),
            ));
        }

        let (_, height, width) = input.dim();
        let (scaled_height, scaled_width) = scaled_size(height, width, rescale);
        let scaled = resize_channels(input, scaled_height, scaled_width)?;
        let (padded, pad) = pad_to_alignment(scaled.view());

        let output = self.predict(padded.view().insert_axis(Axis(0)))?;
        let output = output.index_axis_move(Axis(0), 0);
        let (channels, out_height, out_width) = output.dim();
        let (_, padded_height, padded_width) = padded.dim();
        if channels < OUTPUT_CHANNELS || (out_height, out_width) != (padded_height, padded_width) {
            return Err(CellposeError::model(
                "output shape check",
                format!(
                    "expected at least {OUTPUT_CHANNELS}x{padded_height}x{padded_width}, \
                     got {channels}x{out_height}x{out_width}"
                ),
            ));
        }

        let cropped = crop(output.slice(s![..OUTPUT_CHANNELS, .., ..]), pad);
        let restored = resize_channels(cropped.view(), height, width)?;

        let flows = restored.slice(s![..2, .., ..]).to_owned();
        let probability = restored.index_axis(Axis(0), 2).mapv(sigmoid);
        Ok((flows, probability))
    }
}

impl CellSegmentationModel for CellposeNet {
    fn eval(
        &self,
        image: ArrayViewD<f32>,
        diameter: Option<f32>,
        rescale: Option<f32>,
    ) -> Result<Segmentation> {
        let input = network_input(image)?;

        let rescale = match rescale.or_else(|| rescale_factor(self.diam_mean, diameter)) {
            Some(rescale) => rescale,
            None => {
                let (_, probability) = self.run_scaled(input.view(), 1.0)?;
                let estimate = estimate_diameter(probability.view());
                debug!(?estimate, "estimated diameter");
                estimate
                    .and_then(|d| rescale_factor(self.diam_mean, Some(d)))
                    .unwrap_or(1.0)
            }
        };

        let (flows, probability) = self.run_scaled(input.view(), rescale)?;
        let location = flows
            .permuted_axes([1, 2, 0])
            .as_standard_layout()
            .into_owned();

        Ok(Segmentation {
            location: location.into_dyn(),
            probability: probability.into_dyn(),
        })
    }

    fn diam_mean(&self) -> f32 {
        self.diam_mean
    }
}

/// Normalised two-channel `(2, Y, X)` network input from a `(Y, X)` or
/// `(Y, X, C)` plane. A missing second channel is left at zero.
pub fn network_input(image: ArrayViewD<f32>) -> Result<Array3<f32>> {
    match image.ndim() {
        2 => {
            let plane = image.into_dimensionality::<Ix2>()?;
            let (height, width) = plane.dim();
            let mut input = Array3::<f32>::zeros((2, height, width));
            input.index_axis_mut(Axis(0), 0).assign(&normalize99(plane));
            Ok(input)
        }
        3 => {
            let planes = image.into_dimensionality::<Ix3>()?;
            let (height, width, channels) = planes.dim();
            let mut input = Array3::<f32>::zeros((2, height, width));
            for channel in 0..channels.min(2) {
                input
                    .index_axis_mut(Axis(0), channel)
                    .assign(&normalize99(planes.index_axis(Axis(2), channel)));
            }
            Ok(input)
        }
        rank => Err(CellposeError::model(
            "network input",
            format!("expected a 2D plane with optional channels, got rank {rank}"),
        )),
    }
}

/// The network selected for a run, plus the rescale factor of the custom path.
pub struct LoadedModel {
    net: CellposeNet,
    rescale: Option<f32>,
}

impl LoadedModel {
    pub fn load(
        source: ModelSource,
        model_dir: &Path,
        device: Device,
        diameter: Option<f32>,
    ) -> Result<Self> {
        let (net, rescale) = match &source {
            ModelSource::Builtin(builtin) => {
                let weights = builtin.weights_path(model_dir);
                if !weights.is_file() {
                    return Err(CellposeError::ModelNotFound {
                        identifier: weights.display().to_string(),
                    });
                }
                let net = CellposeNet::new(&weights, device, builtin.diam_mean())?;
                (net, None)
            }
            ModelSource::Custom(path) => {
                let net = CellposeNet::new(path, device, DEFAULT_DIAM_MEAN)?;
                let rescale = rescale_factor(net.diam_mean(), diameter);
                (net, rescale)
            }
        };

        info!(model = %source, ?rescale, "model loaded");
        Ok(Self { net, rescale })
    }

    pub const fn rescale(&self) -> Option<f32> {
        self.rescale
    }
}

impl CellSegmentationModel for LoadedModel {
    fn eval(
        &self,
        image: ArrayViewD<f32>,
        diameter: Option<f32>,
        rescale: Option<f32>,
    ) -> Result<Segmentation> {
        self.net.eval(image, diameter, rescale)
    }

    fn diam_mean(&self) -> f32 {
        self.net.diam_mean()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_builtin_names() {
        assert_eq!(BuiltinModel::from_name("cyto"), Some(BuiltinModel::Cyto));
        assert_eq!(BuiltinModel::from_name("nuclei"), Some(BuiltinModel::Nuclei));
        assert_eq!(BuiltinModel::from_name("cyto2"), None);
        assert_eq!(BuiltinModel::from_name(""), None);
        assert_eq!(
            BuiltinModel::Nuclei.weights_path(Path::new("/models")),
            PathBuf::from("/models/nuclei.onnx")
        );
    }

    #[test]
    fn test_resolve_model_source() {
        let temp_dir = TempDir::new().unwrap();
        let weights = temp_dir.path().join("custom.onnx");
        fs::write(&weights, b"weights").unwrap();

        assert_eq!(
            ModelSource::resolve(None).unwrap(),
            ModelSource::Builtin(BuiltinModel::Cyto)
        );
        assert_eq!(
            ModelSource::resolve(Some("nuclei")).unwrap(),
            ModelSource::Builtin(BuiltinModel::Nuclei)
        );
        assert_eq!(
            ModelSource::resolve(Some(weights.to_str().unwrap())).unwrap(),
            ModelSource::Custom(weights.clone())
        );

        let missing = temp_dir.path().join("missing.onnx");
        let err = ModelSource::resolve(Some(missing.to_str().unwrap())).unwrap_err();
        assert!(matches!(err, CellposeError::ModelNotFound { .. }));
        assert!(matches!(
            ModelSource::resolve(Some("")),
            Err(CellposeError::ModelNotFound { .. })
        ));
    }

    #[test]
    fn test_missing_builtin_weights() {
        let temp_dir = TempDir::new().unwrap();
        let result = LoadedModel::load(
            ModelSource::Builtin(BuiltinModel::Cyto),
            temp_dir.path(),
            Device::Cpu,
            Some(30.0),
        );
        assert!(matches!(result, Err(CellposeError::ModelNotFound { .. })));
    }

    #[test]
    fn test_rescale_factor() {
        assert_eq!(rescale_factor(30.0, Some(15.0)), Some(2.0));
        assert_eq!(rescale_factor(17.0, None), None);
        assert_eq!(rescale_factor(30.0, Some(0.0)), None);
    }

    #[test]
    fn test_network_input_gray() {
        let image = Array::from_shape_fn((4, 6), |(y, x)| (y * 6 + x) as f32).into_dyn();
        let input = network_input(image.view()).unwrap();
        assert_eq!(input.dim(), (2, 4, 6));
        assert!(input.index_axis(Axis(0), 1).iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_network_input_channels() {
        let image = Array::from_shape_fn((4, 6, 3), |(y, x, c)| (c * 100 + y * 6 + x) as f32)
            .into_dyn();
        let input = network_input(image.view()).unwrap();
        assert_eq!(input.dim(), (2, 4, 6));
        assert!(input.index_axis(Axis(0), 1).iter().any(|&v| v != 0.0));

        let volume = Array4::<f32>::zeros((2, 2, 2, 2)).into_dyn();
        assert!(network_input(volume.view()).is_err());
    }
}
