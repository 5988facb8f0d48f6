use anyhow::{bail, Context as _};
use clap::{CommandFactory as _, Parser as _, ValueHint};
use clap_complete::Shell;
use log::{error, info, LevelFilter};
use std::io;
use std::path::PathBuf;
use std::process::ExitCode;

mod mount_manager;
mod utils;
mod version;

use mount_manager::{MountManager, MountOpts};
use utils::SystemCommandRunner;
use version::get_long_version;

const EXAMPLES: &str = "\
Examples:
  pmount /dev/sdb /mnt/usb
  pmount disk.img /mnt/image
  pmount --format qcow2 disk.qcow2 /mnt/image
  pmount --nbd-device /dev/nbd2 disk.img /mnt/image
  pmount --profile single single-partition.img /mnt/image
  pmount --profile raspberrypi raspios.img /mnt/rpi
  pmount --unmount --profile single /mnt/image
  pmount --unmount /mnt/usb";

/// Mount all partitions of a block device or disk image.
#[derive(Clone, Debug, clap::Parser)]
#[command(
    version,
    long_version = get_long_version(),
    about,
    override_usage = "pmount [OPTIONS] <DEVICE_OR_IMAGE> <TARGET_DIR>\n       pmount --unmount [OPTIONS] <TARGET_DIR>",
    after_help = EXAMPLES
)]
pub struct Cli {
    /// Unmount partitions and clean up.
    #[arg(short, long, visible_alias = "umount")]
    unmount: bool,

    /// Image format for qemu-nbd (e.g., qcow2, raw, vmdk).
    #[arg(short, long, env = "PMOUNT_FORMAT", value_name = "FORMAT")]
    format: Option<String>,

    /// NBD device to use (e.g., /dev/nbd1). By default the first free one is used.
    #[arg(
        short = 'd',
        long,
        env = "PMOUNT_NBD_DEVICE",
        value_name = "DEVICE",
        value_hint = ValueHint::FilePath
    )]
    nbd_device: Option<PathBuf>,

    /// Mount profile to use (default, single, raspberrypi).
    #[arg(
        short,
        long,
        env = "PMOUNT_PROFILE",
        value_name = "PROFILE",
        default_value = "default"
    )]
    profile: String,

    /// Increase logging verbosity. Can be passed multiple times.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Generate shell completion script and exit.
    #[arg(long, value_name = "SHELL", conflicts_with_all = ["paths", "unmount"])]
    generate_completion: Option<Shell>,

    /// Device or image and target directory. Only target directory with --unmount.
    #[arg(value_name = "PATH", value_hint = ValueHint::AnyPath)]
    paths: Vec<PathBuf>,
}

impl Cli {
    fn log_level(&self) -> LevelFilter {
        match self.verbose {
            0 => LevelFilter::Info,
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    }

    /// Run the command.
    pub fn run(&self) -> anyhow::Result<()> {
        if let Some(shell) = self.generate_completion {
            clap_complete::generate(shell, &mut Cli::command(), "pmount", &mut io::stdout());
            return Ok(());
        }

        let opts = MountOpts::try_from(self)?;

        if !nix::unistd::Uid::effective().is_root() {
            bail!("this program must be run as root");
        }

        let mut manager = MountManager::new(opts, Box::new(SystemCommandRunner))?;
        info!("using {} profile", manager.profile_name());
        if self.unmount {
            manager
                .unmount()
                .with_context(|| format!("failed to unmount {}", manager.target_dir().display()))
        } else {
            manager
                .mount()
                .with_context(|| format!("failed to mount to {}", manager.target_dir().display()))?;
            if let Some(device) = manager.nbd_device() {
                info!("image is attached to {}", device.display());
            }
            Ok(())
        }
    }
}

impl TryFrom<&Cli> for MountOpts {
    type Error = clap::Error;

    fn try_from(cli: &Cli) -> Result<Self, Self::Error> {
        let usage_error = |message: &str| {
            Cli::command().error(clap::error::ErrorKind::WrongNumberOfValues, message)
        };
        let (source, target_dir) = match (cli.unmount, cli.paths.as_slice()) {
            (true, [target_dir]) => (None, target_dir.clone()),
            (true, _) => {
                return Err(usage_error(
                    "--unmount requires exactly one argument (target directory)",
                ))
            }
            (false, [source, target_dir]) => (Some(source.clone()), target_dir.clone()),
            (false, _) => {
                return Err(usage_error(
                    "mount requires exactly two arguments (device and target directory)",
                ))
            }
        };
        Ok(MountOpts {
            source,
            target_dir,
            format: cli.format.clone(),
            nbd_device: cli.nbd_device.clone(),
            profile: cli.profile.clone(),
        })
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    env_logger::Builder::new()
        .filter_level(cli.log_level())
        .parse_default_env()
        .init();

    match cli.run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => match err.downcast_ref::<clap::Error>() {
            Some(usage) => usage.exit(),
            None => {
                error!("{:#}", err);
                ExitCode::FAILURE
            }
        },
    }
}
