use log::info;

use super::{expect_partitions, Error, MountManager, MountProfile, Partition};

/// Mounts the only partition directly on target directory.
#[derive(Clone, Copy, Debug, Default)]
pub struct SingleProfile;

impl MountProfile for SingleProfile {
    fn name(&self) -> &'static str {
        "single"
    }

    fn validate(&self, partitions: &[Partition]) -> Result<(), Error> {
        expect_partitions(self.name(), partitions, 1)
    }

    fn mount(&self, mm: &MountManager, partitions: &[Partition]) -> Result<(), Error> {
        let [partition] = partitions else {
            return expect_partitions(self.name(), partitions, 1);
        };
        mm.create_dir(mm.target_dir())?;
        mm.mount_device(&partition.device, mm.target_dir())?;
        info!("mounted {} to {}", partition, mm.target_dir().display());
        Ok(())
    }

    fn unmount(&self, mm: &mut MountManager) -> Result<(), Error> {
        let target_dir = mm.target_dir().to_path_buf();
        if let Some(device) = mm.find_mounted_device(&target_dir)? {
            mm.add_partition(device, 1);
        }
        mm.unmount_dir(&target_dir)?;
        info!("unmounted {}", target_dir.display());
        Ok(())
    }
}
