//! Recovery of mount state with `findmnt`.

use log::{debug, trace, warn};
use serde::Deserialize;
use std::ffi::OsStr;
use std::fs;
use std::io;
use std::path::Path;

use crate::utils::{CommandOutput, CommandRunner};

use super::partition::{partition_number, Partition};
use super::MountManagerError as Error;

#[derive(Debug, Deserialize)]
struct FindmntOutput {
    #[serde(default)]
    filesystems: Vec<FindmntFilesystem>,
}

#[derive(Debug, Deserialize)]
struct FindmntFilesystem {
    source: String,
}

/// Parse `findmnt --json` output returning source of the first filesystem.
fn parse_findmnt(json: &str) -> Result<Option<String>, serde_json::Error> {
    if json.trim().is_empty() {
        return Ok(None);
    }
    let output: FindmntOutput = serde_json::from_str(json)?;
    Ok(output.filesystems.into_iter().next().map(|fs| fs.source))
}

fn query_mount_table(runner: &dyn CommandRunner, path: &Path) -> Result<CommandOutput, Error> {
    runner
        .run(&[
            OsStr::new("findmnt"),
            OsStr::new("--json"),
            OsStr::new("--mountpoint"),
            path.as_os_str(),
        ])
        .map_err(|e| Error::discovery(path, format!("{:#}", e)))
}

/// Device mounted exactly at `path`, if any.
pub fn mounted_device(runner: &dyn CommandRunner, path: &Path) -> Result<Option<String>, Error> {
    let output = query_mount_table(runner, path)?;
    // findmnt exits with non-zero code when nothing is mounted
    if !output.success() {
        trace!("nothing is mounted at {}", path.display());
        return Ok(None);
    }
    parse_findmnt(&output.stdout)
        .map_err(|e| Error::discovery(path, format!("failed to parse findmnt output: {}", e)))
}

/// Find partitions mounted at `partition<N>` subdirectories of `target_dir`.
///
/// Directories which are not mount points are skipped. Result is sorted by partition number.
pub fn mounted_partitions(
    runner: &dyn CommandRunner,
    target_dir: &Path,
) -> Result<Vec<Partition>, Error> {
    let entries = match fs::read_dir(target_dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            debug!("{} does not exist, nothing is mounted", target_dir.display());
            return Ok(Vec::new());
        }
        Err(err) => {
            return Err(Error::discovery(
                target_dir,
                format!("failed to read target directory: {}", err),
            ))
        }
    };

    let mut partitions = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| {
            Error::discovery(target_dir, format!("failed to read target directory: {}", e))
        })?;
        let Some(number) = entry.file_name().to_str().and_then(partition_number) else {
            continue;
        };
        if !entry.file_type().is_ok_and(|t| t.is_dir()) {
            continue;
        }

        let path = entry.path();
        let output = query_mount_table(runner, &path)?;
        if !output.success() {
            trace!("{} is not mounted, skipping", path.display());
            continue;
        }
        match parse_findmnt(&output.stdout) {
            Ok(Some(device)) => partitions.push(Partition::recovered(device, number)),
            Ok(None) => trace!("{} is not mounted, skipping", path.display()),
            Err(err) => warn!(
                "failed to parse findmnt output for {}: {}",
                path.display(),
                err
            ),
        }
    }
    partitions.sort_by_key(|part| part.number);

    debug!(
        "discovered {} mounted partition(s) in {}",
        partitions.len(),
        target_dir.display()
    );
    Ok(partitions)
}
