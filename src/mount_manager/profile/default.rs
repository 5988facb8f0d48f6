use log::{info, warn};

use super::{Error, MountManager, MountProfile, Partition};

/// Mounts every partition to its own `partition<N>` subdirectory.
///
/// Failure to mount or unmount one partition doesn't stop processing of the others.
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultProfile;

impl MountProfile for DefaultProfile {
    fn name(&self) -> &'static str {
        "default"
    }

    fn validate(&self, _partitions: &[Partition]) -> Result<(), Error> {
        Ok(())
    }

    fn mount(&self, mm: &MountManager, partitions: &[Partition]) -> Result<(), Error> {
        mm.create_dir(mm.target_dir())?;
        for partition in partitions {
            mm.create_dir(&partition.dir(mm.target_dir()))?;
        }

        for partition in partitions {
            let dir = partition.dir(mm.target_dir());
            match mm.mount_device(&partition.device, &dir) {
                Ok(()) => info!("mounted {} to {}", partition, dir.display()),
                Err(err) => warn!("{}", err),
            }
        }
        Ok(())
    }

    fn unmount(&self, mm: &mut MountManager) -> Result<(), Error> {
        mm.discover_mounted_partitions()?;

        let target_dir = mm.target_dir().to_path_buf();
        for partition in mm.partitions() {
            let dir = partition.dir(&target_dir);
            match mm.unmount_dir(&dir) {
                Ok(()) => info!("unmounted {}", dir.display()),
                Err(err) => warn!("{}", err),
            }
        }

        // Directory which is still a mount point is not empty and won't be removed.
        for partition in mm.partitions() {
            mm.remove_dir(&partition.dir(&target_dir));
        }
        Ok(())
    }
}
