use clap::Parser;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::device::Device;
use crate::errors::{CellposeError, Result};

/// Conventional subdirectory of an image collection holding the images.
pub const IMAGES_SUBDIR: &str = "images";

#[derive(Parser, Clone, Debug)]
#[command(version, about = "Cellpose parameters", long_about = None)]
pub struct Config {
    /// Diameter; 0 estimates the diameter of each image
    #[arg(long, default_value_t = 30.0, value_parser = check_diameter)]
    pub diameter: f32,

    /// Input image collection to be processed by this plugin
    #[arg(long = "inpDir", value_parser = check_input_dir)]
    pub inp_dir: PathBuf,

    /// Select the model based on structure you want to segment cyto/nuclei
    #[arg(long = "pretrained_model")]
    pub pretrained_model: Option<String>,

    /// Path to custom pretrained model
    #[arg(long = "cpretrained_model")]
    pub cpretrained_model: Option<PathBuf>,

    /// Output collection
    #[arg(long = "outDir")]
    pub out_dir: PathBuf,

    /// Directory holding the built-in `<name>.onnx` weights
    #[arg(long = "modelDir", env = "CELLPOSE_LOCAL_MODELS_PATH")]
    pub model_dir: Option<PathBuf>,

    #[arg(long = "device_id", default_value_t = 0)]
    pub device_id: i32,

    #[arg(long = "no_progress")]
    pub no_progress: bool,
}

/// Immutable settings for one run, derived once from [`Config`].
#[derive(Clone, Debug)]
pub struct RunConfig {
    /// `None` asks the model to estimate the diameter of every image.
    pub diameter: Option<f32>,
    pub scan_dir: PathBuf,
    pub out_dir: PathBuf,
    /// Custom model path when given, otherwise the built-in name.
    pub model_identifier: Option<String>,
    pub model_dir: PathBuf,
    pub device: Device,
    pub show_progress: bool,
}

impl Config {
    pub fn resolve(self) -> Result<RunConfig> {
        let device = Device::resolve(self.device_id);
        self.resolve_with_device(device)
    }

    /// Same as [`Config::resolve`] with the device already chosen.
    pub fn resolve_with_device(self, device: Device) -> Result<RunConfig> {
        if !self.diameter.is_finite() || self.diameter < 0.0 {
            return Err(CellposeError::Configuration {
                message: format!("diameter must be a non-negative number, got {}", self.diameter),
            });
        }
        if !self.inp_dir.is_dir() {
            return Err(CellposeError::Configuration {
                message: format!("input directory does not exist: {}", self.inp_dir.display()),
            });
        }

        info!("diameter = {}", self.diameter);
        let scan_dir = resolve_scan_dir(&self.inp_dir);
        info!("inpDir = {}", scan_dir.display());
        info!("pretrained_model = {:?}", self.pretrained_model);
        info!("outDir = {}", self.out_dir.display());

        let diameter = if self.diameter == 0.0 {
            info!("Estimating diameter for each image");
            None
        } else {
            info!("Using diameter {:.2} for all images", self.diameter);
            Some(self.diameter)
        };

        let model_identifier = match self.cpretrained_model {
            Some(path) => {
                info!("Running model in path {}", path.display());
                Some(path.to_string_lossy().into_owned())
            }
            None => self.pretrained_model,
        };

        let model_dir = self.model_dir.unwrap_or_else(default_model_dir);
        info!(accelerated = device.is_accelerated(), "Using {}", device);

        Ok(RunConfig {
            diameter,
            scan_dir,
            out_dir: self.out_dir,
            model_identifier,
            model_dir,
            device,
            show_progress: !self.no_progress,
        })
    }
}

/// Switch to `<inp_dir>/images` when the collection uses that layout.
pub fn resolve_scan_dir(inp_dir: &Path) -> PathBuf {
    let images = inp_dir.join(IMAGES_SUBDIR);
    if images.is_dir() {
        images
    } else {
        inp_dir.to_path_buf()
    }
}

fn default_model_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".cellpose")
        .join("models")
}

fn check_diameter(s: &str) -> std::result::Result<f32, String> {
    let diameter: f32 = s.parse().map_err(|e| format!("{s} is not a number: {e}"))?;
    if diameter.is_finite() && diameter >= 0.0 {
        Ok(diameter)
    } else {
        Err(format!("{s} is not a valid diameter; use 0 to estimate it"))
    }
}

fn check_input_dir(s: &str) -> std::result::Result<PathBuf, String> {
    let path = PathBuf::from(s);
    if path.is_dir() {
        Ok(path)
    } else {
        Err(format!("{} does not exist or is not a directory", s))
    }
}
