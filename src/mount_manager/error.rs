use std::path::PathBuf;
use thiserror::Error;

/// Error of mount or unmount operation.
#[derive(Error, Clone, Debug, PartialEq, Eq)]
pub enum MountManagerError {
    /// Invalid configuration, e.g. unknown profile name.
    #[error("configuration error: {message}")]
    Config { message: String },

    /// Failed to read partition table or mount table.
    #[error("failed to discover partitions on {path}: {message}")]
    Discovery { path: PathBuf, message: String },

    /// Partitions do not satisfy profile requirements.
    #[error("{profile} profile requires exactly {expected} partition(s), found {found}")]
    Validation {
        profile: &'static str,
        expected: usize,
        found: usize,
    },

    /// NBD helper failed to attach the image.
    #[error("failed to attach {image} to {device}: {output}")]
    Attach {
        image: PathBuf,
        device: PathBuf,
        output: String,
    },

    /// NBD helper failed to disconnect the device.
    #[error("failed to disconnect NBD device {device}: {output}")]
    Detach { device: PathBuf, output: String },

    /// Every existing NBD device is busy.
    #[error("no free NBD devices found (checked {checked} device(s) in {dev_dir})")]
    NoFreeDevice { dev_dir: PathBuf, checked: u32 },

    /// Mounted filesystem does not have the expected structure.
    #[error("{path} does not exist in mounted root filesystem")]
    Layout { path: PathBuf },

    #[error("failed to mount {device} to {target}: {message}")]
    Mount {
        device: String,
        target: PathBuf,
        message: String,
    },

    #[error("failed to unmount {target}: {message}")]
    Unmount { target: PathBuf, message: String },

    /// Failed to create mount point.
    #[error("failed to create directory {path}: {message}")]
    Directory { path: PathBuf, message: String },
}

impl MountManagerError {
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub fn discovery<P: Into<PathBuf>, S: Into<String>>(path: P, message: S) -> Self {
        Self::Discovery {
            path: path.into(),
            message: message.into(),
        }
    }
}
