//! Distribution strategies.
//!
//! A [`DistroStrategy`] encapsulates everything distribution specific about
//! an image build: how the root filesystem is populated, how packages, the
//! kernel and the bootloader are installed, and which services autostart.
//! The engine drives every strategy through the same phase sequence and never
//! branches on which distribution it is building.

mod config;
pub mod gentoo;

use std::fmt;
use std::sync::Arc;

use anyhow::Result;
use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};

use crate::environment::Environment;
use crate::error::RsimgstrapError;
use crate::executor::CommandExecutor;
use crate::messenger::Messenger;

pub use config::{DistroConfig, DistroKind};

/// Target CPU architecture of the image.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Architecture {
    #[default]
    Amd64,
    Arm64,
}

impl Architecture {
    /// GRUB platform name for UEFI installs (`--target=<name>`).
    pub fn grub_efi_target(self) -> &'static str {
        match self {
            Self::Amd64 => "x86_64-efi",
            Self::Arm64 => "arm64-efi",
        }
    }

    /// Whether a legacy BIOS (`i386-pc`) bootloader can boot this architecture.
    pub fn supports_bios_boot(self) -> bool {
        matches!(self, Self::Amd64)
    }
}

/// How the bootloader is physically installed onto the image.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, EnumIter,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum BootloaderApproach {
    /// Host `grub2-install` onto the whole drive.
    HostGrub2Drive,
    /// Host `grub2-install --force` onto the root partition.
    HostGrub2Device,
    /// In-chroot `grub2-install` onto the whole drive.
    ChrootGrub2Drive,
    /// In-chroot `grub2-install --force` onto the root partition.
    ChrootGrub2Device,
    /// In-chroot `grub2-install` for removable UEFI media.
    ChrootGrub2Uefi,
    /// No bootloader; only kernel and initramfs are installed.
    None,
}

impl BootloaderApproach {
    /// Returns true for approaches that write a BIOS boot sector.
    pub fn is_bios(self) -> bool {
        matches!(
            self,
            Self::HostGrub2Drive
                | Self::HostGrub2Device
                | Self::ChrootGrub2Drive
                | Self::ChrootGrub2Device
        )
    }

    /// Returns true when `grub2-install` runs on the host rather than in the chroot.
    pub fn runs_on_host(self) -> bool {
        matches!(self, Self::HostGrub2Drive | Self::HostGrub2Device)
    }
}

/// Bootloader selection from a profile: `auto` or an explicit approach.
///
/// `auto` defers to [`DistroStrategy::select_bootloader`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub enum BootloaderChoice {
    #[default]
    Auto,
    Explicit(BootloaderApproach),
}

impl BootloaderChoice {
    /// Resolves the choice against the strategy's preferred approach.
    pub fn resolve(self, strategy: &dyn DistroStrategy) -> BootloaderApproach {
        match self {
            Self::Auto => strategy.select_bootloader(),
            Self::Explicit(approach) => approach,
        }
    }
}

impl TryFrom<String> for BootloaderChoice {
    type Error = RsimgstrapError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        if value == "auto" {
            return Ok(Self::Auto);
        }
        value.parse::<BootloaderApproach>().map(Self::Explicit).map_err(|_| {
            RsimgstrapError::Validation(format!(
                "unknown bootloader approach '{}' (expected 'auto' or one of: {})",
                value,
                <BootloaderApproach as strum::IntoEnumIterator>::iter()
                    .map(|a| a.to_string())
                    .collect::<Vec<_>>()
                    .join(", ")
            ))
        })
    }
}

impl fmt::Display for BootloaderChoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Auto => f.write_str("auto"),
            Self::Explicit(approach) => fmt::Display::fmt(approach, f),
        }
    }
}

/// Outcome of an optional strategy phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseOutcome {
    /// The strategy did work for this phase.
    Performed,
    /// The distribution needs nothing here.
    NoOp,
}

/// Run-wide collaborators and settings handed to a strategy at construction.
#[derive(Clone)]
pub struct StrategyContext {
    pub messenger: Arc<dyn Messenger>,
    pub executor: Arc<dyn CommandExecutor>,
    /// Absolute directory for downloaded artifacts.
    pub cache_dir: Utf8PathBuf,
    /// Absolute path of the host resolv.conf to copy into the target.
    pub resolv_conf: Utf8PathBuf,
    /// Parallelism for package builds.
    pub jobs: u32,
}

/// Distribution specific behavior driven by the engine.
///
/// Every operation that touches the target takes the absolute mount point of
/// the image's root filesystem. Operations that run commands inside the
/// chroot also take the environment overlay to apply; implementations must
/// not mutate it and derive new mappings with [`Environment::merged`].
pub trait DistroStrategy: Send + Sync {
    /// Unique key used in profiles (e.g. `gentoo`).
    fn key(&self) -> &'static str;

    fn name_short(&self) -> &'static str;

    fn name_long(&self) -> &'static str;

    /// The bootloader approach used when a profile says `auto`.
    fn select_bootloader(&self) -> BootloaderApproach;

    /// Populates an empty root filesystem at `mountpoint`.
    fn run_root_population(&self, mountpoint: &Utf8Path, architecture: Architecture)
    -> Result<()>;

    /// Creates package manager configuration and readies the package database.
    fn prepare_installation_of_packages(&self, mountpoint: &Utf8Path, env: &Environment)
    -> Result<()>;

    fn install_kernel(&self, mountpoint: &Utf8Path, env: &Environment) -> Result<()>;

    fn generate_initramfs_from_inside_chroot(
        &self,
        mountpoint: &Utf8Path,
        env: &Environment,
    ) -> Result<()>;

    /// In-target path of the initramfs produced by
    /// [`generate_initramfs_from_inside_chroot`](Self::generate_initramfs_from_inside_chroot).
    fn get_initramfs_path(&self) -> &'static str;

    /// In-target path of the kernel image installed by [`install_kernel`](Self::install_kernel).
    fn get_vmlinuz_path(&self) -> &'static str;

    fn ensure_chroot_has_grub2_installed(&self, mountpoint: &Utf8Path, env: &Environment)
    -> Result<()>;

    fn generate_grub_cfg_from_inside_chroot(
        &self,
        mountpoint: &Utf8Path,
        env: &Environment,
    ) -> Result<()>;

    /// Name of the `grub2-install` binary inside the target.
    fn get_chroot_command_grub2_install(&self) -> &'static str;

    fn install_sshd(&self, mountpoint: &Utf8Path, env: &Environment) -> Result<()>;

    fn install_sudo(&self, mountpoint: &Utf8Path, env: &Environment) -> Result<()>;

    fn install_cloud_init_and_friends(&self, mountpoint: &Utf8Path, env: &Environment)
    -> Result<()>;

    /// Permits or forbids services starting as a side effect of package installation.
    fn allow_autostart_of_services(&self, mountpoint: &Utf8Path, allow: bool)
    -> Result<PhaseOutcome>;

    fn make_openstack_services_autostart(
        &self,
        mountpoint: &Utf8Path,
        env: &Environment,
    ) -> Result<PhaseOutcome>;

    /// Writes network configuration. `use_mtu` is tri-state: `None` leaves
    /// the distribution default.
    fn create_network_configuration(
        &self,
        mountpoint: &Utf8Path,
        use_mtu: Option<bool>,
    ) -> Result<PhaseOutcome>;

    fn perform_in_chroot_shipping_clean_up(
        &self,
        mountpoint: &Utf8Path,
        env: &Environment,
    ) -> Result<PhaseOutcome>;

    fn perform_post_chroot_clean_up(&self, mountpoint: &Utf8Path) -> Result<PhaseOutcome>;

    /// Host binaries this strategy needs; checked before anything is written.
    fn get_commands_to_check_for(&self) -> Vec<String>;

    /// In-target path of the cloud-init datasource configuration file.
    fn get_cloud_init_datasource_cfg_path(&self) -> &'static str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bootloader_approach_uses_kebab_case() {
        assert_eq!(BootloaderApproach::HostGrub2Drive.to_string(), "host-grub2-drive");
        assert_eq!(
            "chroot-grub2-uefi".parse::<BootloaderApproach>().unwrap(),
            BootloaderApproach::ChrootGrub2Uefi
        );
    }

    #[test]
    fn bootloader_choice_parses_auto_and_explicit() {
        let auto: BootloaderChoice = serde_yaml::from_str("auto").unwrap();
        assert_eq!(auto, BootloaderChoice::Auto);

        let explicit: BootloaderChoice = serde_yaml::from_str("chroot-grub2-device").unwrap();
        assert_eq!(explicit, BootloaderChoice::Explicit(BootloaderApproach::ChrootGrub2Device));

        let none: BootloaderChoice = serde_yaml::from_str("none").unwrap();
        assert_eq!(none, BootloaderChoice::Explicit(BootloaderApproach::None));
    }

    #[test]
    fn bootloader_choice_rejects_unknown_value() {
        let err = serde_yaml::from_str::<BootloaderChoice>("lilo").unwrap_err();
        assert!(err.to_string().contains("unknown bootloader approach"));
    }

    #[test]
    fn only_amd64_supports_bios_boot() {
        assert!(Architecture::Amd64.supports_bios_boot());
        assert!(!Architecture::Arm64.supports_bios_boot());
        assert_eq!(Architecture::Arm64.grub_efi_target(), "arm64-efi");
    }

    #[test]
    fn bios_and_host_classification() {
        assert!(BootloaderApproach::ChrootGrub2Device.is_bios());
        assert!(!BootloaderApproach::ChrootGrub2Uefi.is_bios());
        assert!(!BootloaderApproach::None.is_bios());
        assert!(BootloaderApproach::HostGrub2Device.runs_on_host());
        assert!(!BootloaderApproach::ChrootGrub2Drive.runs_on_host());
    }
}
