//! Test doubles for external commands.

use anyhow::{bail, Result};
use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use crate::utils::{CommandOutput, CommandRunner};

use super::{MountManager, MountManagerError, MountOpts, NbdController};

#[derive(Debug, Default)]
struct FakeState {
    /// `sfdisk` output by device.
    partition_tables: HashMap<String, String>,

    /// Mount point -> source device.
    mounts: BTreeMap<PathBuf, String>,

    /// Raw `findmnt` stdout by mount point, takes precedence over `mounts`.
    findmnt_outputs: HashMap<PathBuf, String>,

    /// (program, argument) pairs which make a command fail.
    failures: Vec<(String, String)>,

    calls: Vec<Vec<String>>,
}

/// In-memory model of `sfdisk`, `findmnt`, `mount`, `umount` and `qemu-nbd`.
///
/// Clones share state, so a test can keep one clone while the manager owns another.
#[derive(Clone, Debug, Default)]
pub struct FakeRunner {
    state: Rc<RefCell<FakeState>>,
}

impl FakeRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_partition_table(&self, device: &str, json: &str) {
        self.state
            .borrow_mut()
            .partition_tables
            .insert(device.to_string(), json.to_string());
    }

    pub fn set_mounted<P: AsRef<Path>, S: Into<String>>(&self, target: P, source: S) {
        self.state
            .borrow_mut()
            .mounts
            .insert(target.as_ref().to_path_buf(), source.into());
    }

    pub fn set_findmnt_output<P: AsRef<Path>>(&self, target: P, stdout: &str) {
        self.state
            .borrow_mut()
            .findmnt_outputs
            .insert(target.as_ref().to_path_buf(), stdout.to_string());
    }

    /// Make every `program` call containing `argument` fail.
    pub fn fail_on(&self, program: &str, argument: &str) {
        self.state
            .borrow_mut()
            .failures
            .push((program.to_string(), argument.to_string()));
    }

    pub fn mount_table(&self) -> BTreeMap<PathBuf, String> {
        self.state.borrow().mounts.clone()
    }

    pub fn calls(&self) -> Vec<Vec<String>> {
        self.state.borrow().calls.clone()
    }
}

impl CommandRunner for FakeRunner {
    fn run(&self, command: &[&OsStr]) -> Result<CommandOutput> {
        let args = command
            .iter()
            .map(|arg| arg.to_string_lossy().to_string())
            .collect::<Vec<_>>();
        let mut state = self.state.borrow_mut();
        state.calls.push(args.clone());

        let Some((program, rest)) = args.split_first() else {
            bail!("empty command");
        };
        let injected = state
            .failures
            .iter()
            .any(|(p, a)| p == program && rest.contains(a));
        if injected {
            return Ok(CommandOutput::failed(1, "injected failure"));
        }

        let output = match (program.as_str(), rest) {
            ("sfdisk", [_, device]) => match state.partition_tables.get(device) {
                Some(json) => CommandOutput::ok(json.clone()),
                None => CommandOutput::failed(
                    1,
                    format!("sfdisk: {} does not contain a recognized partition table", device),
                ),
            },
            ("findmnt", [_, _, target]) => {
                let target = PathBuf::from(target);
                if let Some(stdout) = state.findmnt_outputs.get(&target) {
                    CommandOutput::ok(stdout.clone())
                } else if let Some(source) = state.mounts.get(&target) {
                    let json = serde_json::json!({
                        "filesystems": [{
                            "target": target,
                            "source": source,
                            "fstype": "ext4",
                            "options": "rw,relatime",
                        }]
                    });
                    CommandOutput::ok(json.to_string())
                } else {
                    CommandOutput::failed(1, "")
                }
            }
            ("mount", [device, target]) => {
                let target = PathBuf::from(target);
                if state.mounts.contains_key(&target) {
                    CommandOutput::failed(32, format!("mount: {} already mounted", target.display()))
                } else {
                    state.mounts.insert(target, device.clone());
                    CommandOutput::ok("")
                }
            }
            ("umount", [target]) => match state.mounts.remove(&PathBuf::from(target)) {
                Some(_) => CommandOutput::ok(""),
                None => CommandOutput::failed(32, format!("umount: {}: not mounted.", target)),
            },
            ("qemu-nbd", _) => CommandOutput::ok(""),
            _ => bail!("unexpected command: {:?}", args),
        };
        Ok(output)
    }
}

/// `sfdisk --json` output with given sector size and (node, size in sectors) partitions.
pub fn sfdisk_json(sector_size: u64, partitions: &[(&str, u64)]) -> String {
    let partitions = partitions
        .iter()
        .scan(2048, |start, (node, size)| {
            let part = serde_json::json!({
                "node": node,
                "start": *start,
                "size": size,
                "type": "83",
            });
            *start += size;
            Some(part)
        })
        .collect::<Vec<_>>();
    serde_json::json!({
        "partitiontable": {
            "label": "dos",
            "id": "0x12345678",
            "device": "/dev/fake",
            "unit": "sectors",
            "sectorsize": sector_size,
            "partitions": partitions,
        }
    })
    .to_string()
}

/// Fake `/dev` and sysfs trees in `root` with NBD devices. `true` marks a busy device.
///
/// Returns controller for the trees and the fake `/dev` directory.
pub fn fake_nbd_controller(root: &Path, busy: &[bool]) -> Result<(NbdController, PathBuf)> {
    let dev_dir = root.join("dev");
    let sysfs_dir = root.join("sys");
    fs::create_dir_all(&dev_dir)?;
    fs::create_dir_all(&sysfs_dir)?;
    for (index, busy) in busy.iter().enumerate() {
        fs::write(dev_dir.join(format!("nbd{}", index)), b"")?;
        let entry = sysfs_dir.join(format!("nbd{}", index));
        fs::create_dir_all(&entry)?;
        if *busy {
            fs::write(entry.join("pid"), b"4242\n")?;
        }
    }
    Ok((NbdController::new(&dev_dir, sysfs_dir), dev_dir))
}

/// Manager using `runner` with NBD device locations which don't exist.
pub fn manager(
    runner: &FakeRunner,
    source: Option<&str>,
    target_dir: &Path,
    profile: &str,
) -> Result<MountManager, MountManagerError> {
    let opts = MountOpts {
        source: source.map(PathBuf::from),
        target_dir: target_dir.to_path_buf(),
        format: None,
        nbd_device: None,
        profile: profile.to_string(),
    };
    Ok(MountManager::new(opts, Box::new(runner.clone()))?
        .with_nbd_controller(NbdController::new("/pmount-test/dev", "/pmount-test/sys")))
}
