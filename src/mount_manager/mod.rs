//! Partition mount manager.
//!
//! Mounting goes through the following stages:
//! 1. image file is attached as NBD device (block devices are used as they are)
//! 2. partition table is read with `sfdisk`
//! 3. bound [`MountProfile`] validates partitions and mounts them
//!
//! Unmounting is delegated to the profile, which recovers mounted partitions from the mount table.
//! If any of them belongs to NBD device, the device is disconnected afterwards.

use log::{debug, info, warn};
use std::ffi::OsStr;
use std::fs;
use std::os::unix::fs::DirBuilderExt as _;
use std::path::{Path, PathBuf};

use crate::utils::CommandRunner;

mod error;
mod mount_state;
mod nbd;
mod partition;
mod profile;
#[cfg(test)]
mod testing;

pub use error::MountManagerError;
pub use nbd::{controller_device, NbdController};
pub use partition::Partition;
pub use profile::{MountProfile, ProfileKind};

/// Mount manager options.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MountOpts {
    /// Block device or image file. Not required for unmounting.
    pub source: Option<PathBuf>,

    /// Mount root.
    pub target_dir: PathBuf,

    /// Image format passed to `qemu-nbd`.
    pub format: Option<String>,

    /// NBD device to use instead of searching for a free one.
    pub nbd_device: Option<PathBuf>,

    /// Name of mount profile.
    pub profile: String,
}

/// Mounts and unmounts partitions of a device under target directory.
pub struct MountManager {
    source: Option<PathBuf>,
    target_dir: PathBuf,
    format: Option<String>,
    nbd_device_explicit: Option<PathBuf>,

    /// Attached NBD device. Set only while the device is attached by this manager
    /// or recovered from mount state.
    nbd_device: Option<PathBuf>,

    /// Result of the latest discovery.
    partitions: Vec<Partition>,

    profile: ProfileKind,
    nbd: NbdController,
    runner: Box<dyn CommandRunner>,
}

impl MountManager {
    /// Create new manager.
    ///
    /// # Errors
    ///
    /// - Returns [`MountManagerError::Config`] if profile name is unknown.
    pub fn new(opts: MountOpts, runner: Box<dyn CommandRunner>) -> Result<Self, MountManagerError> {
        let profile = opts.profile.parse::<ProfileKind>()?;
        Ok(Self {
            source: opts.source,
            target_dir: opts.target_dir,
            format: opts.format,
            nbd_device_explicit: opts.nbd_device,
            nbd_device: None,
            partitions: Vec::new(),
            profile,
            nbd: NbdController::default(),
            runner,
        })
    }

    /// Use custom NBD device locations.
    pub fn with_nbd_controller(mut self, nbd: NbdController) -> Self {
        self.nbd = nbd;
        self
    }

    pub fn target_dir(&self) -> &Path {
        &self.target_dir
    }

    pub fn profile_name(&self) -> &'static str {
        self.profile.name()
    }

    /// Partitions found by the latest discovery.
    pub fn partitions(&self) -> &[Partition] {
        &self.partitions
    }

    /// Attached NBD device.
    pub fn nbd_device(&self) -> Option<&Path> {
        self.nbd_device.as_deref()
    }

    /// Device to read partitions from: attached NBD device or source device.
    pub fn active_device(&self) -> Option<&Path> {
        self.nbd_device.as_deref().or(self.source.as_deref())
    }

    fn is_image_file(&self) -> bool {
        self.source
            .as_ref()
            .and_then(|source| fs::metadata(source).ok())
            .is_some_and(|metadata| metadata.is_file())
    }

    /// Mount partitions of the source device.
    pub fn mount(&mut self) -> Result<(), MountManagerError> {
        let source = self
            .source
            .clone()
            .ok_or_else(|| MountManagerError::config("no source device specified"))?;

        if self.is_image_file() {
            let device = self.nbd.attach(
                self.runner.as_ref(),
                &source,
                self.nbd_device_explicit.as_deref(),
                self.format.as_deref(),
            )?;
            self.nbd_device = Some(device);
        }

        let device = self.active_device().unwrap_or(source.as_path()).to_path_buf();
        self.partitions = partition::read_partition_table(self.runner.as_ref(), &device)?;
        info!(
            "discovered {} partition(s) on {}",
            self.partitions.len(),
            device.display()
        );
        if self.partitions.is_empty() {
            info!("no partitions found on {}", device.display());
            return Ok(());
        }

        let profile = self.profile.handler();
        let partitions = self.partitions.clone();
        profile.validate(&partitions)?;
        profile.mount(self, &partitions)
    }

    /// Unmount partitions under target directory and disconnect NBD device if there was one.
    pub fn unmount(&mut self) -> Result<(), MountManagerError> {
        self.partitions.clear();
        self.profile.handler().unmount(self)?;

        self.extract_nbd_device();
        if let Some(device) = self.nbd_device.clone() {
            match self.nbd.detach(self.runner.as_ref(), &device) {
                Ok(()) => self.nbd_device = None,
                // Filesystems are unmounted already, leftover NBD connection is not an error
                Err(err) => warn!("NBD device is left attached: {}", err),
            }
        }
        Ok(())
    }

    /// Set NBD device from recovered partitions.
    fn extract_nbd_device(&mut self) {
        if self.nbd_device.is_some() {
            return;
        }
        if let Some(device) = self
            .partitions
            .iter()
            .find_map(|partition| controller_device(&partition.device))
        {
            info!("detected NBD device {}", device);
            self.nbd_device = Some(PathBuf::from(device));
        }
    }

    /// Recover partitions mounted at `partition<N>` subdirectories of target directory.
    pub fn discover_mounted_partitions(&mut self) -> Result<(), MountManagerError> {
        self.partitions = mount_state::mounted_partitions(self.runner.as_ref(), &self.target_dir)?;
        info!("discovered {} mounted partition(s)", self.partitions.len());
        Ok(())
    }

    /// Device mounted exactly at `path`.
    pub fn find_mounted_device(&self, path: &Path) -> Result<Option<String>, MountManagerError> {
        mount_state::mounted_device(self.runner.as_ref(), path)
    }

    /// Record recovered partition.
    pub fn add_partition(&mut self, device: String, number: u32) {
        debug!("found {} mounted as partition {}", device, number);
        self.partitions.push(Partition::recovered(device, number));
    }

    /// Create directory with all its parents (mode 0755).
    pub fn create_dir(&self, path: &Path) -> Result<(), MountManagerError> {
        fs::DirBuilder::new()
            .recursive(true)
            .mode(0o755)
            .create(path)
            .map_err(|e| MountManagerError::Directory {
                path: path.to_path_buf(),
                message: e.to_string(),
            })
    }

    /// Remove empty directory. Failure is only logged.
    pub fn remove_dir(&self, path: &Path) {
        match fs::remove_dir(path) {
            Ok(()) => debug!("removed directory {}", path.display()),
            Err(err) => warn!("failed to remove directory {}: {}", path.display(), err),
        }
    }

    /// Mount device to directory.
    pub fn mount_device(&self, device: &str, target: &Path) -> Result<(), MountManagerError> {
        let mount_error = |message: String| MountManagerError::Mount {
            device: device.to_string(),
            target: target.to_path_buf(),
            message,
        };
        let output = self
            .runner
            .run(&[OsStr::new("mount"), OsStr::new(device), target.as_os_str()])
            .map_err(|e| mount_error(format!("{:#}", e)))?;
        if output.success() {
            Ok(())
        } else {
            Err(mount_error(format!(
                "mount failed with {}: {}",
                output.status(),
                output.combined()
            )))
        }
    }

    /// Unmount filesystem mounted at directory.
    pub fn unmount_dir(&self, target: &Path) -> Result<(), MountManagerError> {
        let unmount_error = |message: String| MountManagerError::Unmount {
            target: target.to_path_buf(),
            message,
        };
        let output = self
            .runner
            .run(&[OsStr::new("umount"), target.as_os_str()])
            .map_err(|e| unmount_error(format!("{:#}", e)))?;
        if output.success() {
            Ok(())
        } else {
            Err(unmount_error(format!(
                "umount failed with {}: {}",
                output.status(),
                output.combined()
            )))
        }
    }
}
