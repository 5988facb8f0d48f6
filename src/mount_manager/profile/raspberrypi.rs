use log::{info, warn};
use std::path::{Path, PathBuf};

use super::{expect_partitions, Error, MountManager, MountProfile, Partition};

/// Mounts Raspberry Pi OS image:
/// - partition 2 (root) on target directory
/// - partition 1 (boot) on `<target>/boot/firmware`
///
/// Unmounting goes in reverse order.
#[derive(Clone, Copy, Debug, Default)]
pub struct RaspberryPiProfile;

impl RaspberryPiProfile {
    fn boot_dir(target_dir: &Path) -> PathBuf {
        target_dir.join("boot").join("firmware")
    }

    /// Unmount root partition after failed mount.
    fn rollback(mm: &MountManager) {
        if let Err(err) = mm.unmount_dir(mm.target_dir()) {
            warn!("rollback failed: {}", err);
        }
    }
}

impl MountProfile for RaspberryPiProfile {
    fn name(&self) -> &'static str {
        "raspberrypi"
    }

    fn validate(&self, partitions: &[Partition]) -> Result<(), Error> {
        expect_partitions(self.name(), partitions, 2)
    }

    fn mount(&self, mm: &MountManager, partitions: &[Partition]) -> Result<(), Error> {
        // Partitions come in table order
        let [boot, root] = partitions else {
            return expect_partitions(self.name(), partitions, 2);
        };

        let target_dir = mm.target_dir();
        mm.create_dir(target_dir)?;

        mm.mount_device(&root.device, target_dir)?;
        info!("mounted {} to {}", root, target_dir.display());

        let boot_dir = Self::boot_dir(target_dir);
        if !boot_dir.exists() {
            Self::rollback(mm);
            return Err(Error::Layout { path: boot_dir });
        }

        if let Err(err) = mm.mount_device(&boot.device, &boot_dir) {
            Self::rollback(mm);
            return Err(err);
        }
        info!("mounted {} to {}", boot, boot_dir.display());
        Ok(())
    }

    fn unmount(&self, mm: &mut MountManager) -> Result<(), Error> {
        let target_dir = mm.target_dir().to_path_buf();
        let boot_dir = Self::boot_dir(&target_dir);

        for (dir, number) in [(&boot_dir, 1), (&target_dir, 2)] {
            match mm.find_mounted_device(dir) {
                Ok(Some(device)) => mm.add_partition(device, number),
                Ok(None) => {}
                Err(err) => warn!("{}", err),
            }
        }

        match mm.unmount_dir(&boot_dir) {
            Ok(()) => info!("unmounted {}", boot_dir.display()),
            Err(err) => warn!("{}", err),
        }

        mm.unmount_dir(&target_dir)?;
        info!("unmounted {}", target_dir.display());
        Ok(())
    }
}
