//! Partition table reading.
//!
//! Partition tables are read with `sfdisk --json`.

use log::debug;
use serde::Deserialize;
use std::ffi::OsStr;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::utils::CommandRunner;

use super::MountManagerError as Error;

/// Size reported for partitions recovered from mount state.
pub const UNKNOWN_SIZE: &str = "unknown";

/// Prefix of per-partition mount directories (`partition1`, `partition2` etc.).
pub const PARTITION_DIR_PREFIX: &str = "partition";

const KIB: u64 = 1024;
const MIB: u64 = 1024 * KIB;
const GIB: u64 = 1024 * MIB;

/// Partition discovered on a device or recovered from mount state.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Partition {
    /// Device node, e.g. `/dev/sda1`.
    pub device: String,

    /// 1-based position in partition table.
    pub number: u32,

    /// Human-readable size, see [`format_size`].
    pub size: String,
}

impl Partition {
    /// Partition found in mount table. Its size is unknown.
    pub fn recovered<S: Into<String>>(device: S, number: u32) -> Self {
        Self {
            device: device.into(),
            number,
            size: UNKNOWN_SIZE.to_string(),
        }
    }

    /// Mount directory of this partition under `target_dir`.
    pub fn dir(&self, target_dir: &Path) -> PathBuf {
        partition_dir(target_dir, self.number)
    }
}

impl fmt::Display for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.device, self.size)
    }
}

/// Path to `partition<N>` directory.
pub fn partition_dir(target_dir: &Path, number: u32) -> PathBuf {
    target_dir.join(format!("{}{}", PARTITION_DIR_PREFIX, number))
}

/// Parse partition number from `partition<N>` directory name.
///
/// `N` must be a positive integer without leading zeros.
pub fn partition_number(dir_name: &str) -> Option<u32> {
    let digits = dir_name.strip_prefix(PARTITION_DIR_PREFIX)?;
    if digits.is_empty() || digits.starts_with('0') || !digits.bytes().all(|b| b.is_ascii_digit())
    {
        return None;
    }
    digits.parse().ok()
}

/// Format size in bytes as `1.5G`, `200.0M` or `512K`.
pub fn format_size(bytes: u64) -> String {
    if bytes >= GIB {
        format!("{:.1}G", bytes as f64 / GIB as f64)
    } else if bytes >= MIB {
        format!("{:.1}M", bytes as f64 / MIB as f64)
    } else {
        format!("{}K", bytes / KIB)
    }
}

#[derive(Clone, Debug, Deserialize)]
struct SfdiskOutput {
    #[serde(rename = "partitiontable")]
    partition_table: SfdiskPartitionTable,
}

#[derive(Clone, Debug, Deserialize)]
struct SfdiskPartitionTable {
    #[serde(default)]
    label: String,
    #[serde(default)]
    device: String,
    #[serde(rename = "sectorsize")]
    sector_size: u64,
    #[serde(default)]
    partitions: Vec<SfdiskPartition>,
}

#[derive(Clone, Debug, Deserialize)]
struct SfdiskPartition {
    node: String,
    /// Size in sectors.
    size: u64,
}

/// Parse `sfdisk --json` output into partitions numbered in table order.
pub fn parse_partition_table(json: &str) -> Result<Vec<Partition>, serde_json::Error> {
    let output: SfdiskOutput = serde_json::from_str(json)?;
    let table = output.partition_table;
    debug!(
        "partition table of {}: label {}, sector size {}",
        table.device, table.label, table.sector_size
    );
    Ok(table
        .partitions
        .into_iter()
        .zip(1..)
        .map(|(part, number)| Partition {
            device: part.node,
            number,
            size: format_size(part.size.saturating_mul(table.sector_size)),
        })
        .collect())
}

/// Read partition table of the device.
pub fn read_partition_table(
    runner: &dyn CommandRunner,
    device: &Path,
) -> Result<Vec<Partition>, Error> {
    let output = runner
        .run(&[OsStr::new("sfdisk"), OsStr::new("--json"), device.as_os_str()])
        .map_err(|e| Error::discovery(device, format!("{:#}", e)))?;
    if !output.success() {
        return Err(Error::discovery(
            device,
            format!("sfdisk failed with {}: {}", output.status(), output.combined()),
        ));
    }
    parse_partition_table(&output.stdout).map_err(|e| {
        Error::discovery(device, format!("failed to parse sfdisk output: {}", e))
    })
}
