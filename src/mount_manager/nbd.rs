//! Network block device handling with `qemu-nbd`.

use log::{debug, info, trace, warn};
use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};

use crate::utils::CommandRunner;

use super::MountManagerError as Error;

const QEMU_NBD: &str = "qemu-nbd";

/// Attaches image files as `/dev/nbdN` devices.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NbdController {
    /// Directory with device nodes.
    dev_dir: PathBuf,

    /// Directory with per-device sysfs entries. `<sysfs_dir>/nbdN/pid` exists while device is in use.
    sysfs_dir: PathBuf,
}

impl Default for NbdController {
    fn default() -> Self {
        Self::new("/dev", "/sys/class/block")
    }
}

impl NbdController {
    pub fn new<P: Into<PathBuf>, Q: Into<PathBuf>>(dev_dir: P, sysfs_dir: Q) -> Self {
        Self {
            dev_dir: dev_dir.into(),
            sysfs_dir: sysfs_dir.into(),
        }
    }

    /// Find first NBD device which is not in use.
    ///
    /// Devices are checked starting from `nbd0`. Scanning stops at the first missing device node.
    pub fn find_free_device(&self) -> Result<PathBuf, Error> {
        let mut index = 0u32;
        loop {
            let name = format!("nbd{}", index);
            let device = self.dev_dir.join(&name);
            if !device.exists() {
                return Err(Error::NoFreeDevice {
                    dev_dir: self.dev_dir.clone(),
                    checked: index,
                });
            }
            if self.sysfs_dir.join(&name).join("pid").exists() {
                trace!("{} is in use", device.display());
                index += 1;
                continue;
            }
            return Ok(device);
        }
    }

    /// Connect image to NBD device.
    ///
    /// If `device` is not specified, a free one is found with [`Self::find_free_device`].
    pub fn attach(
        &self,
        runner: &dyn CommandRunner,
        image: &Path,
        device: Option<&Path>,
        format: Option<&str>,
    ) -> Result<PathBuf, Error> {
        let device = match device {
            Some(device) => {
                info!("using explicitly specified NBD device {}", device.display());
                device.to_path_buf()
            }
            None => {
                let device = self.find_free_device()?;
                info!("using discovered NBD device {}", device.display());
                device
            }
        };

        let mut connect = OsString::from("--connect=");
        connect.push(&device);
        let mut command = vec![OsStr::new(QEMU_NBD), connect.as_os_str()];
        let format_arg = format.map(|format| format!("--format={}", format));
        if let Some(format_arg) = &format_arg {
            command.push(OsStr::new(format_arg));
        }
        command.push(image.as_os_str());

        let attach_error = |output: String| Error::Attach {
            image: image.to_path_buf(),
            device: device.clone(),
            output,
        };
        let output = runner
            .run(&command)
            .map_err(|e| attach_error(format!("{:#}", e)))?;
        if !output.success() {
            return Err(attach_error(format!(
                "{} failed with {}: {}",
                QEMU_NBD,
                output.status(),
                output.combined()
            )));
        }

        info!("attached {} to {}", image.display(), device.display());
        Ok(device)
    }

    /// Disconnect NBD device.
    ///
    /// Failure is logged as a warning before being returned.
    pub fn detach(&self, runner: &dyn CommandRunner, device: &Path) -> Result<(), Error> {
        let result = runner
            .run(&[
                OsStr::new(QEMU_NBD),
                OsStr::new("--disconnect"),
                device.as_os_str(),
            ])
            .map_err(|e| format!("{:#}", e))
            .and_then(|output| {
                if output.success() {
                    Ok(())
                } else {
                    Err(format!(
                        "{} failed with {}: {}",
                        QEMU_NBD,
                        output.status(),
                        output.combined()
                    ))
                }
            });

        match result {
            Ok(()) => {
                info!("disconnected NBD device {}", device.display());
                Ok(())
            }
            Err(output) => {
                let err = Error::Detach {
                    device: device.to_path_buf(),
                    output,
                };
                warn!("{}", err);
                Err(err)
            }
        }
    }
}

/// Get NBD device from its partition device, e.g. `/dev/nbd1p1` -> `/dev/nbd1`.
///
/// Returns `None` for devices which are not NBD devices.
pub fn controller_device(partition_device: &str) -> Option<String> {
    let (dir, name) = partition_device.rsplit_once('/')?;
    if dir != "/dev" {
        return None;
    }
    let rest = name.strip_prefix("nbd")?;
    let (index, part) = match rest.split_once('p') {
        Some((index, part)) => (index, Some(part)),
        None => (rest, None),
    };
    let is_number = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());
    if !is_number(index) || part.is_some_and(|part| !is_number(part)) {
        return None;
    }
    let device = format!("{}/nbd{}", dir, index);
    debug!("{} belongs to NBD device {}", partition_device, device);
    Some(device)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mount_manager::testing::{fake_nbd_controller, FakeRunner};
    use anyhow::Result;
    use tempdir::TempDir;

    fn fake_nbd_tree(devices: &[bool]) -> Result<(TempDir, NbdController)> {
        let tmp = TempDir::new("nbd-tests")?;
        let (nbd, _) = fake_nbd_controller(tmp.path(), devices)?;
        Ok((tmp, nbd))
    }

    #[test]
    fn test_find_free_device_skips_busy() -> Result<()> {
        let (tmp, nbd) = fake_nbd_tree(&[true, false])?;
        assert_eq!(nbd.find_free_device()?, tmp.path().join("dev/nbd1"));
        Ok(())
    }

    #[test]
    fn test_find_free_device_first() -> Result<()> {
        let (tmp, nbd) = fake_nbd_tree(&[false, false, true])?;
        assert_eq!(nbd.find_free_device()?, tmp.path().join("dev/nbd0"));
        Ok(())
    }

    #[test]
    fn test_find_free_device_all_busy() -> Result<()> {
        let (_tmp, nbd) = fake_nbd_tree(&[true, true, true])?;
        let err = nbd.find_free_device().unwrap_err();
        assert!(matches!(err, Error::NoFreeDevice { checked: 3, .. }));
        Ok(())
    }

    #[test]
    fn test_find_free_device_no_devices() -> Result<()> {
        let (_tmp, nbd) = fake_nbd_tree(&[])?;
        let err = nbd.find_free_device().unwrap_err();
        assert!(matches!(err, Error::NoFreeDevice { checked: 0, .. }));
        Ok(())
    }

    #[test]
    fn test_attach_discovered() -> Result<()> {
        let (tmp, nbd) = fake_nbd_tree(&[true, false])?;
        let runner = FakeRunner::new();
        let device = nbd.attach(&runner, Path::new("/images/disk.qcow2"), None, Some("qcow2"))?;
        let expected = tmp.path().join("dev/nbd1");
        assert_eq!(device, expected);
        assert_eq!(
            runner.calls(),
            vec![vec![
                "qemu-nbd".to_string(),
                format!("--connect={}", expected.display()),
                "--format=qcow2".to_string(),
                "/images/disk.qcow2".to_string(),
            ]]
        );
        Ok(())
    }

    #[test]
    fn test_attach_explicit() -> Result<()> {
        // Explicit device is used verbatim, no scanning happens
        let nbd = NbdController::new("/pmount/no/dev", "/pmount/no/sys");
        let runner = FakeRunner::new();
        let device = nbd.attach(
            &runner,
            Path::new("disk.img"),
            Some(Path::new("/dev/nbd7")),
            None,
        )?;
        assert_eq!(device, PathBuf::from("/dev/nbd7"));
        assert_eq!(
            runner.calls(),
            vec![vec!["qemu-nbd", "--connect=/dev/nbd7", "disk.img"]]
        );
        Ok(())
    }

    #[test]
    fn test_attach_failure() {
        let nbd = NbdController::default();
        let runner = FakeRunner::new();
        runner.fail_on("qemu-nbd", "disk.img");
        let err = nbd
            .attach(&runner, Path::new("disk.img"), Some(Path::new("/dev/nbd3")), None)
            .unwrap_err();
        match err {
            Error::Attach { device, output, .. } => {
                assert_eq!(device, PathBuf::from("/dev/nbd3"));
                assert!(output.contains("injected failure"));
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_detach() {
        let nbd = NbdController::default();
        let runner = FakeRunner::new();
        nbd.detach(&runner, Path::new("/dev/nbd2"))
            .expect("detach must succeed");
        assert_eq!(
            runner.calls(),
            vec![vec!["qemu-nbd", "--disconnect", "/dev/nbd2"]]
        );

        runner.fail_on("qemu-nbd", "--disconnect");
        let err = nbd.detach(&runner, Path::new("/dev/nbd2")).unwrap_err();
        assert!(matches!(err, Error::Detach { .. }));
    }

    #[test]
    fn test_controller_device() {
        assert_eq!(controller_device("/dev/nbd1p1"), Some("/dev/nbd1".to_string()));
        assert_eq!(controller_device("/dev/nbd12p3"), Some("/dev/nbd12".to_string()));
        assert_eq!(controller_device("/dev/nbd0"), Some("/dev/nbd0".to_string()));
        assert_eq!(controller_device("/dev/sda1"), None);
        assert_eq!(controller_device("/dev/mmcblk0p1"), None);
        assert_eq!(controller_device("/dev/nbdp1"), None);
        assert_eq!(controller_device("/dev/nbd1p"), None);
        assert_eq!(controller_device("tmpfs"), None);
    }
}
