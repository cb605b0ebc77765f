//! Error types of the capture loop.
//!
use common::protocol::Facing;

/// Failure to acquire a camera stream. Fatal to `start`.
#[derive(Debug, thiserror::Error)]
pub enum MediaAccessError {
    #[error("no camera available for facing mode {0}")]
    NoDevice(Facing),
    #[error("permission denied opening {device}")]
    PermissionDenied { device: String },
    #[error("failed to open {device}: {source}")]
    Io {
        device: String,
        #[source]
        source: std::io::Error,
    },
    #[error("unable to configure {device}: {reason}")]
    Config { device: String, reason: String },
    #[error("media task failed: {0}")]
    Task(String),
}

impl MediaAccessError {
    /// Classify an I/O error raised while opening `device`.
    pub fn from_io(device: &str, facing: Facing, err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => MediaAccessError::NoDevice(facing),
            std::io::ErrorKind::PermissionDenied => MediaAccessError::PermissionDenied {
                device: device.to_owned(),
            },
            _ => MediaAccessError::Io {
                device: device.to_owned(),
                source: err,
            },
        }
    }
}

/// Failure to load a model or to run it on a frame. Recovered per tick.
#[derive(Debug, thiserror::Error)]
pub enum InferenceError {
    #[error("failed to load model: {0}")]
    Load(String),
    #[error("inference failed: {0}")]
    Run(String),
    #[error("inference task did not complete")]
    Task,
}
