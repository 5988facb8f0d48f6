//! Mount profiles.
//!
//! Profile decides where and in what order partitions are mounted.

use std::fmt;
use std::str::FromStr;

use super::{MountManager, MountManagerError as Error, Partition};

mod default;
mod raspberrypi;
mod single;

pub use default::DefaultProfile;
pub use raspberrypi::RaspberryPiProfile;
pub use single::SingleProfile;

/// Mount strategy.
pub trait MountProfile {
    /// Profile name.
    fn name(&self) -> &'static str;

    /// Check if the discovered partitions meet the profile's requirements.
    fn validate(&self, partitions: &[Partition]) -> Result<(), Error>;

    /// Mount validated partitions.
    fn mount(&self, mm: &MountManager, partitions: &[Partition]) -> Result<(), Error>;

    /// Find mounted partitions, unmount them and clean up.
    ///
    /// Recovered partitions are recorded in `mm`.
    fn unmount(&self, mm: &mut MountManager) -> Result<(), Error>;
}

/// Available profiles.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ProfileKind {
    /// Every partition goes to its own `partition<N>` subdirectory.
    #[default]
    Default,

    /// The only partition is mounted on target directory.
    Single,

    /// Raspberry Pi OS image: root partition on target, boot partition on `boot/firmware`.
    RaspberryPi,
}

impl ProfileKind {
    pub const ALL: [Self; 3] = [Self::Default, Self::Single, Self::RaspberryPi];

    /// Profile implementation.
    pub fn handler(self) -> &'static dyn MountProfile {
        match self {
            Self::Default => &DefaultProfile,
            Self::Single => &SingleProfile,
            Self::RaspberryPi => &RaspberryPiProfile,
        }
    }

    pub fn name(self) -> &'static str {
        self.handler().name()
    }
}

impl fmt::Display for ProfileKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ProfileKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.name() == s)
            .ok_or_else(|| {
                let valid = Self::ALL.map(Self::name).join(", ");
                Error::config(format!(
                    "unknown mount profile: {} (valid options: {})",
                    s, valid
                ))
            })
    }
}

/// Fail if number of partitions is not `expected`.
fn expect_partitions(
    profile: &'static str,
    partitions: &[Partition],
    expected: usize,
) -> Result<(), Error> {
    if partitions.len() == expected {
        Ok(())
    } else {
        Err(Error::Validation {
            profile,
            expected,
            found: partitions.len(),
        })
    }
}
