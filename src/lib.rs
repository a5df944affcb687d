pub mod config;
pub mod device;
pub mod errors;
pub mod imageops;
pub mod model;
pub mod reader;
pub mod segmentation;
pub mod traits;
pub mod writer;

pub mod mocks;

use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use tracing::info;
use walkdir::WalkDir;

pub use config::{Config, RunConfig};
pub use device::Device;
pub use errors::{CellposeError, Result};
pub use model::{BuiltinModel, LoadedModel, ModelSource};
pub use traits::*;
pub use writer::ResultWriter;

/// Full suffix chain of the files the plugin picks up.
pub const INPUT_SUFFIX: &str = ".ome.tif";

/// Drives one run: every eligible file of the scan directory is decoded,
/// segmented and written to the output store, one after another.
pub struct CellposeRunner<M: CellSegmentationModel> {
    model: M,
    config: RunConfig,
    rescale: Option<f32>,
}

impl<M: CellSegmentationModel> CellposeRunner<M> {
    pub const fn new(model: M, config: RunConfig, rescale: Option<f32>) -> Self {
        Self {
            model,
            config,
            rescale,
        }
    }

    /// Returns the number of images written.
    pub fn process_directory(&self) -> Result<usize> {
        let image_files = collect_input_files(&self.config.scan_dir)?;
        let mut writer = ResultWriter::create(&self.config.out_dir)?;

        if image_files.is_empty() {
            info!("No {} files found in {}", INPUT_SUFFIX, self.config.scan_dir.display());
            return Ok(0);
        }

        let pb = if self.config.show_progress {
            ProgressBar::new(image_files.len() as u64)
        } else {
            ProgressBar::hidden()
        };
        pb.set_style(
            ProgressStyle::default_bar()
                .template(
                    "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})",
                )
                .map_err(|e| CellposeError::Configuration {
                    message: e.to_string(),
                })?
                .progress_chars("#>-"),
        );

        for input_file in &image_files {
            self.process_single_image(input_file, &mut writer)?;
            pb.inc(1);
        }

        pb.finish_and_clear();
        info!(
            "Processed {} images into {}",
            writer.groups_written(),
            writer.path().display()
        );
        Ok(writer.groups_written())
    }

    fn process_single_image(&self, input_file: &Path, writer: &mut ResultWriter) -> Result<()> {
        let name = input_file
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| CellposeError::Configuration {
                message: format!("file name is not valid UTF-8: {}", input_file.display()),
            })?;
        info!("Processing image {}", name);

        let image = reader::read(input_file)?;
        let metadata = image.metadata.clone();
        let result = segmentation::segment_image(
            &self.model,
            input_file,
            image.squeeze(),
            self.config.diameter,
            self.rescale,
        )?;

        writer.write(name, &result, &metadata)
    }
}

impl CellposeRunner<LoadedModel> {
    /// Resolve and load the configured ONNX model. Fails before any image or
    /// store is touched when the model cannot be found.
    pub fn with_onnx_model(config: RunConfig) -> Result<Self> {
        let source = ModelSource::resolve(config.model_identifier.as_deref())?;
        let model = LoadedModel::load(source, &config.model_dir, config.device, config.diameter)?;
        let rescale = model.rescale();
        Ok(Self::new(model, config, rescale))
    }
}

/// Resolve the model, then process the collection.
pub fn run(config: RunConfig) -> Result<usize> {
    info!("Initializing ...");
    CellposeRunner::with_onnx_model(config)?.process_directory()
}

/// Everything after the first dot of the file name, with leading dots
/// ignored, e.g. `.ome.tif` for `cells.ome.tif`.
pub fn full_suffix(file_name: &str) -> &str {
    if file_name.ends_with('.') {
        return "";
    }
    let stem = file_name.trim_start_matches('.');
    stem.find('.').map_or("", |i| &stem[i..])
}

/// Regular files directly under `dir` whose full suffix is [`INPUT_SUFFIX`],
/// sorted by name.
pub fn collect_input_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut image_files = Vec::new();

    for entry in WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
    {
        let entry = entry.map_err(|e| CellposeError::FileSystem {
            path: dir.to_path_buf(),
            operation: "list input directory".to_string(),
            source: e.into(),
        })?;
        let path = entry.path();
        let eligible = entry
            .file_name()
            .to_str()
            .is_some_and(|name| full_suffix(name) == INPUT_SUFFIX);
        if eligible && path.is_file() {
            image_files.push(path.to_path_buf());
        }
    }

    Ok(image_files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_full_suffix() {
        let test_cases = vec![
            ("cells.ome.tif", ".ome.tif"),
            ("cells.tif", ".tif"),
            ("cells.ome.tiff", ".ome.tiff"),
            ("a.b.ome.tif", ".b.ome.tif"),
            (".hidden.ome.tif", ".ome.tif"),
            ("cells", ""),
            ("cells.", ""),
        ];

        for (filename, expected) in test_cases {
            assert_eq!(full_suffix(filename), expected, "suffix of {filename}");
        }
    }

    #[test]
    fn test_collect_input_files() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let dir = temp_dir.path();
        for name in ["b.ome.tif", "a.ome.tif", "c.tif", "d.ome.tiff", "e.x.ome.tif"] {
            fs::write(dir.join(name), b"")?;
        }
        fs::create_dir(dir.join("nested.ome.tif"))?;
        fs::create_dir(dir.join("sub"))?;
        fs::write(dir.join("sub").join("f.ome.tif"), b"")?;

        let files = collect_input_files(dir)?;
        assert_eq!(files, vec![dir.join("a.ome.tif"), dir.join("b.ome.tif")]);
        Ok(())
    }
}
