use std::fs;
use std::sync::Arc;

use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use tracing::{info, warn};
use uuid::Uuid;

use super::TargetFilesystem;
use crate::error::RsimgstrapError;
use crate::executor::{CommandExecutor, CommandSpec, check_call};
use crate::fsutil::ensure_directory;

const ROOT_FS_TYPE: &str = "ext4";
const ROOT_FS_LABEL: &str = "root";

/// Returns the path of partition `number` on `device`.
///
/// Devices whose name ends in a digit (`loop0`, `nvme0n1`) take a `p`
/// separator; others (`sda`, `vdb`) take the number directly.
pub fn partition_path(device: &Utf8Path, number: u32) -> Utf8PathBuf {
    let separator = if device.as_str().ends_with(|c: char| c.is_ascii_digit()) {
        "p"
    } else {
        ""
    };
    Utf8PathBuf::from(format!("{}{}{}", device, separator, number))
}

/// Partitions a block device with a single bootable ext4 root partition.
///
/// The partition is mounted below the system temp directory in a directory
/// named after the filesystem UUID, which is also used for `/etc/fstab`.
pub struct BlockDeviceTarget {
    device: Utf8PathBuf,
    partition: Utf8PathBuf,
    fs_uuid: Uuid,
    mountpoint: Option<Utf8PathBuf>,
    executor: Arc<dyn CommandExecutor>,
}

impl BlockDeviceTarget {
    pub fn new(device: &Utf8Path, executor: Arc<dyn CommandExecutor>) -> Self {
        Self {
            device: device.to_owned(),
            partition: partition_path(device, 1),
            fs_uuid: Uuid::new_v4(),
            mountpoint: None,
            executor,
        }
    }

    /// UUID given to the root filesystem.
    pub fn fs_uuid(&self) -> Uuid {
        self.fs_uuid
    }

    fn run(&self, command: &str, args: &[&str]) -> Result<()> {
        let spec = CommandSpec::new(command, args.iter().map(|a| a.to_string()).collect());
        check_call(self.executor.as_ref(), &spec)
    }

    fn mountpoint_path(&self) -> Result<Utf8PathBuf> {
        let tmp = Utf8PathBuf::from_path_buf(std::env::temp_dir()).map_err(|p| {
            RsimgstrapError::Validation(format!(
                "temporary directory is not valid UTF-8: {}",
                p.display()
            ))
        })?;
        Ok(tmp.join(format!("rsimgstrap-{}", self.fs_uuid)))
    }
}

impl TargetFilesystem for BlockDeviceTarget {
    fn describe(&self) -> String {
        format!("block device {}", self.device)
    }

    fn required_commands(&self) -> Vec<String> {
        ["parted", "partprobe", "mkfs.ext4", "mount", "umount"]
            .iter()
            .map(|c| c.to_string())
            .collect()
    }

    fn prepare(&mut self) -> Result<Utf8PathBuf> {
        let device = self.device.as_str();
        info!("partitioning {}", device);
        self.run(
            "parted",
            &[
                "--script",
                device,
                "mklabel",
                "msdos",
                "mkpart",
                "primary",
                ROOT_FS_TYPE,
                "1MiB",
                "100%",
                "set",
                "1",
                "boot",
                "on",
            ],
        )
        .with_context(|| format!("failed to partition {}", device))?;
        self.run("partprobe", &[device])?;

        let uuid = self.fs_uuid.to_string();
        info!("creating {} filesystem {} on {}", ROOT_FS_TYPE, uuid, self.partition);
        self.run(
            "mkfs.ext4",
            &["-F", "-L", ROOT_FS_LABEL, "-U", uuid.as_str(), self.partition.as_str()],
        )
        .with_context(|| format!("failed to format {}", self.partition))?;

        let mountpoint = self.mountpoint_path()?;
        if !self.executor.is_dry_run() {
            ensure_directory(&mountpoint)?;
        }
        self.run("mount", &[self.partition.as_str(), mountpoint.as_str()])
            .with_context(|| format!("failed to mount {}", self.partition))?;
        self.mountpoint = Some(mountpoint.clone());
        Ok(mountpoint)
    }

    fn drive(&self) -> Option<&Utf8Path> {
        Some(&self.device)
    }

    fn root_partition(&self) -> Option<&Utf8Path> {
        Some(&self.partition)
    }

    fn fstab_entries(&self) -> Vec<String> {
        vec![format!(
            "UUID={} / {} defaults 0 1",
            self.fs_uuid, ROOT_FS_TYPE
        )]
    }

    fn finalize(&mut self) -> Result<()> {
        let Some(mountpoint) = self.mountpoint.take() else {
            return Ok(());
        };
        self.run("umount", &[mountpoint.as_str()])
            .with_context(|| format!("failed to unmount {}", mountpoint))?;
        if !self.executor.is_dry_run()
            && let Err(e) = fs::remove_dir(&mountpoint)
        {
            warn!("failed to remove mount point {}: {}", mountpoint, e);
        }
        Ok(())
    }
}
