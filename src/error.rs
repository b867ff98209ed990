use std::path::PathBuf;
use thiserror::Error;

/// Per-device failures. These are logged and the affected device or action
/// is skipped; they never abort the run. Fatal setup failures (bad usage,
/// unopenable archive, missing tool binaries) travel as `anyhow` errors
/// instead and exit the process.
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("property query for {device} failed: {reason}")]
    Query { device: String, reason: String },

    #[error("failed to mount {device}: {reason}")]
    Mount { device: String, reason: String },

    #[error("malformed device descriptor {path}: {reason}")]
    Parse { path: PathBuf, reason: String },

    #[error("failed to unmount {device}: {reason}")]
    Unmount { device: String, reason: String },

    #[error("failed to eject {device}: {reason}")]
    Eject { device: String, reason: String },
}
