use std::fmt;

use ort::execution_providers::{CUDAExecutionProvider, ExecutionProvider};
use tracing::debug;

/// Compute device for every model invocation of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Device {
    Cuda { device_id: i32 },
    Cpu,
}

impl Device {
    /// Check for accelerated compute once; a failed check falls back to CPU.
    pub fn resolve(device_id: i32) -> Self {
        match CUDAExecutionProvider::default().is_available() {
            Ok(true) => Self::Cuda { device_id },
            Ok(false) => Self::Cpu,
            Err(e) => {
                debug!(error = %e, "CUDA availability check failed");
                Self::Cpu
            }
        }
    }

    pub const fn is_accelerated(&self) -> bool {
        matches!(self, Self::Cuda { .. })
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cuda { device_id } => write!(f, "GPU (cuda:{device_id})"),
            Self::Cpu => write!(f, "CPU"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(Device::Cpu.to_string(), "CPU");
        assert_eq!(Device::Cuda { device_id: 1 }.to_string(), "GPU (cuda:1)");
        assert!(!Device::Cpu.is_accelerated());
        assert!(Device::Cuda { device_id: 0 }.is_accelerated());
    }
}
