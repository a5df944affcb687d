use std::{
    fmt::Display,
    fs,
    path::{Path, PathBuf},
    sync::Arc,
};

use ndarray::ArrayD;
use serde_json::{Map, Value};
use tracing::{debug, info};
use zarrs::{
    array::{ArrayBuilder, DataType, FillValue},
    filesystem::FilesystemStore,
    group::GroupBuilder,
};

use crate::errors::{CellposeError, Result};
use crate::traits::Segmentation;

pub const STORE_NAME: &str = "location.zarr";
pub const LOCATION_ARRAY: &str = "pixel_location";
/// Literal array name, misspelling included.
pub const PROBABILITY_ARRAY: &str = "probablity";
pub const METADATA_ATTRIBUTE: &str = "metadata";

fn store_error<E: Display>(operation: &str) -> impl FnOnce(E) -> CellposeError + '_ {
    move |e| CellposeError::store(operation, e.to_string())
}

/// Path of the output store inside `out_dir`.
pub fn store_path(out_dir: &Path) -> PathBuf {
    out_dir.join(STORE_NAME)
}

/// Append-only writer for `<outDir>/location.zarr`.
///
/// One child group per image, holding the location and probability arrays
/// and the image metadata as an attribute.
pub struct ResultWriter {
    path: PathBuf,
    store: Arc<FilesystemStore>,
    groups_written: usize,
}

impl ResultWriter {
    /// Create a fresh store. An existing store is never touched.
    pub fn create(out_dir: &Path) -> Result<Self> {
        let path = store_path(out_dir);
        if path.exists() {
            return Err(CellposeError::OutputExists { path });
        }

        fs::create_dir_all(&path).map_err(|e| CellposeError::FileSystem {
            path: path.clone(),
            operation: "create output store".to_string(),
            source: e,
        })?;

        let store =
            FilesystemStore::new(&path).map_err(store_error("open filesystem store"))?;
        let store = Arc::new(store);
        GroupBuilder::new()
            .build(store.clone(), "/")
            .map_err(store_error("create root group"))?
            .store_metadata()
            .map_err(store_error("write root group metadata"))?;

        info!(path = %path.display(), "created output store");
        Ok(Self {
            path,
            store,
            groups_written: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub const fn groups_written(&self) -> usize {
        self.groups_written
    }

    /// Write the result of one image under a group named `name`.
    pub fn write(&mut self, name: &str, segmentation: &Segmentation, metadata: &str) -> Result<()> {
        let group_path = format!("/{name}");

        let mut attributes = Map::new();
        attributes.insert(
            METADATA_ATTRIBUTE.to_string(),
            Value::String(metadata.to_string()),
        );
        GroupBuilder::new()
            .attributes(attributes)
            .build(self.store.clone(), &group_path)
            .map_err(store_error("create image group"))?
            .store_metadata()
            .map_err(store_error("write image group metadata"))?;

        self.write_array(&format!("{group_path}/{LOCATION_ARRAY}"), &segmentation.location)?;
        self.write_array(
            &format!("{group_path}/{PROBABILITY_ARRAY}"),
            &segmentation.probability,
        )?;

        self.groups_written += 1;
        debug!(group = %group_path, "wrote segmentation");
        Ok(())
    }

    /// Single-chunk float32 array sized exactly to `data`.
    fn write_array(&self, array_path: &str, data: &ArrayD<f32>) -> Result<()> {
        let shape: Vec<u64> = data.shape().iter().map(|&d| d as u64).collect();
        let chunk_shape: Vec<u64> = shape.iter().map(|&d| d.max(1)).collect();

        let array = ArrayBuilder::new(
            shape,
            DataType::Float32,
            chunk_shape.try_into().map_err(store_error("chunk grid"))?,
            FillValue::from(0.0f32),
        )
        .build(self.store.clone(), array_path)
        .map_err(store_error("create array"))?;
        array
            .store_metadata()
            .map_err(store_error("write array metadata"))?;

        let origin = vec![0u64; data.ndim()];
        array
            .store_array_subset_ndarray(&origin, data.clone())
            .map_err(store_error("write array data"))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::IxDyn;
    use tempfile::TempDir;
    use zarrs::{array::Array, group::Group};

    fn segmentation(location: &[usize], probability: &[usize]) -> Segmentation {
        Segmentation {
            location: ArrayD::from_elem(IxDyn(location), 1.5),
            probability: ArrayD::from_elem(IxDyn(probability), 0.25),
        }
    }

    #[test]
    fn test_write_group() {
        let temp_dir = TempDir::new().unwrap();
        let mut writer = ResultWriter::create(temp_dir.path()).unwrap();
        writer
            .write("a.ome.tif", &segmentation(&[6, 4, 2], &[6, 4]), "<OME/>")
            .unwrap();
        assert_eq!(writer.groups_written(), 1);

        let store = Arc::new(FilesystemStore::new(store_path(temp_dir.path())).unwrap());
        let group = Group::open(store.clone(), "/a.ome.tif").unwrap();
        assert_eq!(
            group.attributes().get(METADATA_ATTRIBUTE),
            Some(&Value::String("<OME/>".to_string()))
        );

        let location = Array::open(store.clone(), "/a.ome.tif/pixel_location").unwrap();
        assert_eq!(location.shape(), &[6, 4, 2]);
        let probability = Array::open(store.clone(), "/a.ome.tif/probablity").unwrap();
        assert_eq!(probability.shape(), &[6, 4]);

        let values = probability
            .retrieve_array_subset_ndarray::<f32>(&probability.subset_all())
            .unwrap();
        assert!(values.iter().all(|&v| v == 0.25));
    }

    #[test]
    fn test_existing_store_is_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let existing = store_path(temp_dir.path());
        fs::create_dir_all(&existing).unwrap();
        fs::write(existing.join("marker"), b"keep").unwrap();

        let err = ResultWriter::create(temp_dir.path()).err().unwrap();
        assert!(matches!(err, CellposeError::OutputExists { .. }));
        assert_eq!(fs::read_dir(&existing).unwrap().count(), 1);
        assert_eq!(fs::read(existing.join("marker")).unwrap(), b"keep");
    }
}
