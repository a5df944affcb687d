use std::path::PathBuf;
use thiserror::Error;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Structured error types for the segmentation plugin.
///
/// `ModelNotFound` and `OutputExists` are the two failures the runner reports
/// and then stops on without treating the run as crashed. Everything else is
/// fatal and propagates out of `main`.
#[derive(Error, Debug)]
pub enum CellposeError {
    #[error("Model path missing or incorrect: {identifier}")]
    ModelNotFound { identifier: String },

    #[error("Output store already exists: {path:?}")]
    OutputExists { path: PathBuf },

    #[error("Unsupported image rank {rank} after squeezing (file: {path:?}); expected 2, 3 or 4")]
    UnsupportedRank { path: PathBuf, rank: usize },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Filesystem error: {operation} failed for {path:?}")]
    FileSystem {
        path: PathBuf,
        operation: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Image decode error: {operation} failed (file: {path:?})")]
    ImageDecode {
        path: PathBuf,
        operation: String,
        #[source]
        source: BoxError,
    },

    #[error("Model error: {operation} failed")]
    Model {
        operation: String,
        #[source]
        source: BoxError,
    },

    #[error("Store error: {operation} failed")]
    Store {
        operation: String,
        #[source]
        source: BoxError,
    },
}

pub type Result<T> = std::result::Result<T, CellposeError>;

impl CellposeError {
    pub(crate) fn model<E>(operation: impl Into<String>, source: E) -> Self
    where
        E: Into<BoxError>,
    {
        Self::Model {
            operation: operation.into(),
            source: source.into(),
        }
    }

    pub(crate) fn store<E>(operation: impl Into<String>, source: E) -> Self
    where
        E: Into<BoxError>,
    {
        Self::Store {
            operation: operation.into(),
            source: source.into(),
        }
    }

    /// The two failures that end the run quietly rather than as a crash.
    pub const fn is_reported_abort(&self) -> bool {
        matches!(self, Self::ModelNotFound { .. } | Self::OutputExists { .. })
    }
}

/// Convert I/O errors to filesystem errors.
///
/// Code that knows the path and operation should build
/// `CellposeError::FileSystem` directly instead of relying on this fallback.
impl From<std::io::Error> for CellposeError {
    fn from(err: std::io::Error) -> Self {
        Self::FileSystem {
            path: PathBuf::from("unknown"),
            operation: "unknown".to_string(),
            source: err,
        }
    }
}

/// Convert ONNX Runtime errors to model errors.
impl From<ort::Error> for CellposeError {
    fn from(err: ort::Error) -> Self {
        Self::model("ort operation", err)
    }
}

/// Shape errors come out of tensor reshaping around inference and stacking,
/// so they are reported as model errors.
impl From<ndarray::ShapeError> for CellposeError {
    fn from(err: ndarray::ShapeError) -> Self {
        Self::model("tensor shape conversion", err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reported_aborts() {
        let not_found = CellposeError::ModelNotFound {
            identifier: "missing.onnx".to_string(),
        };
        let exists = CellposeError::OutputExists {
            path: PathBuf::from("out/location.zarr"),
        };
        let rank = CellposeError::UnsupportedRank {
            path: PathBuf::from("x.ome.tif"),
            rank: 1,
        };

        assert!(not_found.is_reported_abort());
        assert!(exists.is_reported_abort());
        assert!(!rank.is_reported_abort());
    }

    #[test]
    fn test_display_messages() {
        let err = CellposeError::ModelNotFound {
            identifier: "weights.onnx".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Model path missing or incorrect: weights.onnx"
        );

        let err = CellposeError::UnsupportedRank {
            path: PathBuf::from("a.ome.tif"),
            rank: 5,
        };
        assert!(err.to_string().contains("rank 5"));
    }
}
