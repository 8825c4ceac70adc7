//! Physical bootloader installation.

use anyhow::Result;
use camino::Utf8Path;

use crate::distro::{Architecture, BootloaderApproach, DistroStrategy};
use crate::error::RsimgstrapError;
use crate::fsutil::path_in_root;
use crate::isolation::chroot_command;

const BIOS_TARGET: &str = "i386-pc";
const EFI_DIRECTORY: &str = "/boot/efi";

/// Rejects approaches the target or architecture cannot support.
///
/// Runs before any mutation so an impossible combination fails fast.
pub fn validate_approach(
    approach: BootloaderApproach,
    architecture: Architecture,
    has_drive: bool,
) -> Result<(), RsimgstrapError> {
    if approach.is_bios() && !architecture.supports_bios_boot() {
        return Err(RsimgstrapError::Validation(format!(
            "bootloader approach {} requires BIOS boot, which {} does not support",
            approach, architecture
        )));
    }
    if approach.is_bios() && !has_drive {
        return Err(RsimgstrapError::Validation(format!(
            "bootloader approach {} requires a block device target",
            approach
        )));
    }
    Ok(())
}

/// Fails unless the kernel and initramfs the bootloader will reference exist.
pub fn verify_boot_artifacts(
    mountpoint: &Utf8Path,
    strategy: &dyn DistroStrategy,
) -> Result<(), RsimgstrapError> {
    for artifact in [strategy.get_vmlinuz_path(), strategy.get_initramfs_path()] {
        let path = path_in_root(mountpoint, artifact);
        // symlink_metadata: /boot/vmlinuz is commonly a symlink to a versioned image
        if std::fs::symlink_metadata(&path).is_err() {
            return Err(RsimgstrapError::Validation(format!(
                "boot artifact {} was not created in {}",
                artifact, mountpoint
            )));
        }
    }
    Ok(())
}

/// Everything needed to build the `grub2-install` invocation.
#[derive(Debug, Clone, Copy)]
pub struct GrubInstall<'a> {
    pub mountpoint: &'a Utf8Path,
    pub architecture: Architecture,
    /// `grub2-install` on the host.
    pub host_command: &'a str,
    /// `grub2-install` inside the target.
    pub chroot_command: &'a str,
    pub drive: Option<&'a Utf8Path>,
    pub partition: Option<&'a Utf8Path>,
}

impl GrubInstall<'_> {
    fn device(&self, approach: BootloaderApproach) -> Result<&Utf8Path, RsimgstrapError> {
        let device = match approach {
            BootloaderApproach::HostGrub2Drive | BootloaderApproach::ChrootGrub2Drive => self.drive,
            _ => self.partition,
        };
        device.ok_or_else(|| {
            RsimgstrapError::Validation(format!(
                "bootloader approach {} requires a block device target",
                approach
            ))
        })
    }

    /// Returns the argument vector installing the bootloader, or `None` for
    /// [`BootloaderApproach::None`].
    pub fn argv(&self, approach: BootloaderApproach) -> Result<Option<Vec<String>>> {
        let bios_target = format!("--target={}", BIOS_TARGET);
        let argv = match approach {
            BootloaderApproach::None => return Ok(None),
            BootloaderApproach::HostGrub2Drive | BootloaderApproach::HostGrub2Device => {
                let mut argv = vec![
                    self.host_command.to_string(),
                    bios_target,
                    format!("--boot-directory={}", path_in_root(self.mountpoint, "/boot")),
                ];
                if approach == BootloaderApproach::HostGrub2Device {
                    argv.push("--force".to_string());
                }
                argv.push(self.device(approach)?.to_string());
                argv
            }
            BootloaderApproach::ChrootGrub2Drive | BootloaderApproach::ChrootGrub2Device => {
                let mut inner = vec![self.chroot_command.to_string(), bios_target];
                if approach == BootloaderApproach::ChrootGrub2Device {
                    inner.push("--force".to_string());
                }
                inner.push(self.device(approach)?.to_string());
                chroot_command(self.mountpoint, &inner)
            }
            BootloaderApproach::ChrootGrub2Uefi => {
                let inner = [
                    self.chroot_command.to_string(),
                    format!("--target={}", self.architecture.grub_efi_target()),
                    format!("--efi-directory={}", EFI_DIRECTORY),
                    "--removable".to_string(),
                ];
                chroot_command(self.mountpoint, &inner)
            }
        };
        Ok(Some(argv))
    }
}
