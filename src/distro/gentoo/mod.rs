//! Gentoo strategy.
//!
//! Populates the root from a stage3 tarball, builds a vanilla kernel from
//! source and installs everything else with `emerge` inside the chroot.

pub mod portage;

use std::fs;
use std::sync::Arc;

use anyhow::{Context, Result};
use camino::Utf8Path;
use serde::Deserialize;
use time::Date;
use time::macros::format_description;
use tracing::{debug, info};
use url::Url;

use self::portage::{PACKAGE_KEYWORDS_DIR, PACKAGE_USE_DIR, PortageConfig};
use super::{Architecture, BootloaderApproach, DistroStrategy, PhaseOutcome, StrategyContext};
use crate::bootstrap::stage3::parse_build_id;
use crate::bootstrap::{RootPopulator, Stage3Populator, Stage3Source};
use crate::environment::Environment;
use crate::error::RsimgstrapError;
use crate::executor::CommandExecutor;
use crate::fsutil::{copy_file, ensure_directory, path_in_root};
use crate::isolation::chroot::{COMMAND_CHROOT, Chroot};
use crate::messenger::Messenger;

/// Default Gentoo distfiles mirror.
pub const DEFAULT_MIRROR_URL: &str = "https://distfiles.gentoo.org/";

const DEFAULT_MAX_AGE_DAYS: u32 = 14;

const KERNEL_PACKAGE: &str = "sys-kernel/vanilla-sources";
const KERNEL_SOURCE_DIR: &str = "/usr/src/linux";

/// Services started at boot on an OpenStack-style cloud image.
const AUTOSTART_SERVICES: &[&str] = &[
    "sshd",
    "cloud-init-local",
    "cloud-init",
    "cloud-config",
    "cloud-final",
];

/// Directories emptied after leaving the chroot; build leftovers only.
const POST_CHROOT_CLEAN_DIRS: &[&str] = &["/var/cache/distfiles", "/var/tmp/portage"];

fn default_mirror_url() -> String {
    DEFAULT_MIRROR_URL.to_string()
}

fn default_max_age_days() -> u32 {
    DEFAULT_MAX_AGE_DAYS
}

/// Configuration for Gentoo images.
#[derive(Debug, Clone, Deserialize)]
pub struct GentooConfig {
    /// Mirror to download stage3 and snapshots from
    #[serde(default = "default_mirror_url")]
    pub mirror_url: String,
    /// Reject a resolved stage3 release older than this many days
    #[serde(default = "default_max_age_days")]
    pub max_age_days: u32,
    /// Pinned stage3 build id (e.g. `20240101T170309Z`)
    #[serde(default)]
    pub stage3: Option<String>,
    /// Pinned repository snapshot date (`YYYY-MM-DD`)
    #[serde(default)]
    pub repository_date: Option<String>,
}

impl Default for GentooConfig {
    fn default() -> Self {
        Self {
            mirror_url: default_mirror_url(),
            max_age_days: default_max_age_days(),
            stage3: None,
            repository_date: None,
        }
    }
}

impl GentooConfig {
    fn parse_mirror_url(&self) -> Result<Url, RsimgstrapError> {
        let url = Url::parse(&self.mirror_url).map_err(|e| {
            RsimgstrapError::Validation(format!("invalid mirror_url '{}': {}", self.mirror_url, e))
        })?;
        match url.scheme() {
            "http" | "https" | "ftp" => Ok(url),
            scheme => Err(RsimgstrapError::Validation(format!(
                "mirror_url scheme must be http, https or ftp, got '{}'",
                scheme
            ))),
        }
    }

    pub fn validate(&self) -> Result<(), RsimgstrapError> {
        self.parse_mirror_url()?;

        if let Some(stage3) = &self.stage3 {
            parse_build_id(stage3)?;
        }

        if let Some(date) = &self.repository_date {
            Date::parse(date, format_description!("[year]-[month]-[day]")).map_err(|e| {
                RsimgstrapError::Validation(format!(
                    "repository_date must be a YYYY-MM-DD calendar date, got '{}': {}",
                    date, e
                ))
            })?;
        }

        Ok(())
    }
}

/// Gentoo implementation of [`DistroStrategy`].
pub struct GentooStrategy {
    messenger: Arc<dyn Messenger>,
    executor: Arc<dyn CommandExecutor>,
    jobs: u32,
    populator: Box<dyn RootPopulator>,
}

impl GentooStrategy {
    /// Creates the strategy with a [`Stage3Populator`] for root population.
    pub fn new(cfg: &GentooConfig, ctx: &StrategyContext) -> Result<Self> {
        let source = Stage3Source {
            mirror_url: cfg.parse_mirror_url()?,
            max_age_days: cfg.max_age_days,
            stage3: cfg.stage3.clone(),
            repository_date: cfg.repository_date.clone(),
        };
        let populator = Stage3Populator::new(
            Arc::clone(&ctx.executor),
            Arc::clone(&ctx.messenger),
            &ctx.cache_dir,
            &ctx.resolv_conf,
            source,
        );
        Ok(Self::with_populator(ctx, Box::new(populator)))
    }

    /// Creates the strategy with a custom root populator.
    pub fn with_populator(ctx: &StrategyContext, populator: Box<dyn RootPopulator>) -> Self {
        Self {
            messenger: Arc::clone(&ctx.messenger),
            executor: Arc::clone(&ctx.executor),
            jobs: ctx.jobs,
            populator,
        }
    }

    fn chroot(&self, mountpoint: &Utf8Path) -> Chroot {
        Chroot::new(mountpoint, Arc::clone(&self.executor))
    }

    fn portage(&self, mountpoint: &Utf8Path) -> PortageConfig {
        PortageConfig::new(mountpoint, self.executor.is_dry_run())
    }

    /// The in-chroot `emerge` command line for `atoms`.
    pub fn emerge_command(&self, atoms: &[&str]) -> Vec<String> {
        let mut command: Vec<String> = [
            "emerge",
            "--ignore-default-opts",
            "--tree",
            "--verbose",
            "--jobs",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        command.push(self.jobs.to_string());
        command.extend(atoms.iter().map(|a| a.to_string()));
        command
    }

    /// Environment for build-heavy commands: `env` plus `MAKEOPTS`.
    pub fn build_environment(&self, env: &Environment) -> Environment {
        env.merged([("MAKEOPTS", format!("-j{}", self.jobs))])
    }

    fn install_package_atoms(
        &self,
        mountpoint: &Utf8Path,
        env: &Environment,
        atoms: &[&str],
    ) -> Result<()> {
        let build_env = self.build_environment(env);
        self.chroot(mountpoint)
            .check_call(&self.emerge_command(atoms), &build_env)
            .with_context(|| format!("failed to emerge {}", atoms.join(" ")))
    }

    fn make_in_kernel_tree(
        &self,
        mountpoint: &Utf8Path,
        env: &Environment,
        targets: &[&str],
    ) -> Result<()> {
        let mut command = vec!["make", "-C", KERNEL_SOURCE_DIR];
        command.extend_from_slice(targets);
        self.chroot(mountpoint).check_call(&command, env)
    }

    fn empty_directory(path: &Utf8Path) -> Result<(), RsimgstrapError> {
        let entries = match fs::read_dir(path) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(RsimgstrapError::io(format!("failed to read {}", path), e)),
        };
        for entry in entries {
            let entry =
                entry.map_err(|e| RsimgstrapError::io(format!("failed to read {}", path), e))?;
            let entry_path = entry.path();
            let file_type = entry.file_type().map_err(|e| {
                RsimgstrapError::io(format!("failed to stat {}", entry_path.display()), e)
            })?;
            let removed = if file_type.is_dir() {
                fs::remove_dir_all(&entry_path)
            } else {
                fs::remove_file(&entry_path)
            };
            removed.map_err(|e| {
                RsimgstrapError::io(format!("failed to remove {}", entry_path.display()), e)
            })?;
        }
        Ok(())
    }
}

impl DistroStrategy for GentooStrategy {
    fn key(&self) -> &'static str {
        "gentoo"
    }

    fn name_short(&self) -> &'static str {
        "Gentoo"
    }

    fn name_long(&self) -> &'static str {
        "Gentoo Linux"
    }

    fn select_bootloader(&self) -> BootloaderApproach {
        BootloaderApproach::HostGrub2Drive
    }

    fn run_root_population(
        &self,
        mountpoint: &Utf8Path,
        architecture: Architecture,
    ) -> Result<()> {
        self.messenger.info(&format!(
            "Bootstrapping {} into \"{}\" using {}...",
            self.name_short(),
            mountpoint,
            self.populator.name()
        ));
        self.populator.populate(mountpoint, architecture)
    }

    fn prepare_installation_of_packages(
        &self,
        mountpoint: &Utf8Path,
        env: &Environment,
    ) -> Result<()> {
        if !self.executor.is_dry_run() {
            for dir in [PACKAGE_KEYWORDS_DIR, PACKAGE_USE_DIR] {
                ensure_directory(&path_in_root(mountpoint, dir))?;
            }
        }
        self.chroot(mountpoint)
            .check_call(&["eselect", "news", "read", "--quiet", "all"], env)
    }

    fn install_kernel(&self, mountpoint: &Utf8Path, env: &Environment) -> Result<()> {
        self.messenger.info("Installing kernel...");
        let portage = self.portage(mountpoint);
        portage.set_package_keywords(KERNEL_PACKAGE, "**")?;
        portage.set_package_use_flags(KERNEL_PACKAGE, "symlink")?;
        self.install_package_atoms(mountpoint, env, &[KERNEL_PACKAGE])?;

        self.make_in_kernel_tree(mountpoint, env, &["defconfig"])?;
        if !self.executor.is_dry_run() {
            let config = path_in_root(mountpoint, KERNEL_SOURCE_DIR).join(".config");
            copy_file(&config, &config.with_file_name(".config.defconfig"))?;
        }
        let jobs = format!("-j{}", self.jobs);
        self.make_in_kernel_tree(mountpoint, env, &[jobs.as_str()])?;
        self.make_in_kernel_tree(mountpoint, env, &["modules_install", "install"])
    }

    fn generate_initramfs_from_inside_chroot(
        &self,
        mountpoint: &Utf8Path,
        env: &Environment,
    ) -> Result<()> {
        self.messenger.info("Generating initramfs...");
        self.portage(mountpoint).set_package_keywords("sys-kernel/dracut", "**")?;
        self.install_package_atoms(mountpoint, env, &["sys-kernel/dracut"])?;
        self.chroot(mountpoint)
            .check_call(&["dracut", self.get_initramfs_path()], env)
    }

    fn get_initramfs_path(&self) -> &'static str {
        "/boot/initramfs.img"
    }

    fn get_vmlinuz_path(&self) -> &'static str {
        "/boot/vmlinuz"
    }

    fn ensure_chroot_has_grub2_installed(
        &self,
        mountpoint: &Utf8Path,
        env: &Environment,
    ) -> Result<()> {
        self.portage(mountpoint).set_package_use_flags("sys-boot/grub", "grub_platforms_pc")?;
        self.install_package_atoms(mountpoint, env, &["sys-boot/grub:2"])
    }

    fn generate_grub_cfg_from_inside_chroot(
        &self,
        mountpoint: &Utf8Path,
        env: &Environment,
    ) -> Result<()> {
        self.chroot(mountpoint)
            .check_call(&["grub2-mkconfig", "-o", "/boot/grub/grub.cfg"], env)
    }

    fn get_chroot_command_grub2_install(&self) -> &'static str {
        "grub2-install"
    }

    fn install_sshd(&self, mountpoint: &Utf8Path, env: &Environment) -> Result<()> {
        self.install_package_atoms(mountpoint, env, &["net-misc/openssh"])
    }

    fn install_sudo(&self, mountpoint: &Utf8Path, env: &Environment) -> Result<()> {
        self.install_package_atoms(mountpoint, env, &["app-admin/sudo"])
    }

    fn install_cloud_init_and_friends(
        &self,
        mountpoint: &Utf8Path,
        env: &Environment,
    ) -> Result<()> {
        self.install_package_atoms(mountpoint, env, &["app-emulation/cloud-init"])
    }

    fn allow_autostart_of_services(
        &self,
        _mountpoint: &Utf8Path,
        _allow: bool,
    ) -> Result<PhaseOutcome> {
        // OpenRC does not start services from within package installs.
        Ok(PhaseOutcome::NoOp)
    }

    fn make_openstack_services_autostart(
        &self,
        mountpoint: &Utf8Path,
        env: &Environment,
    ) -> Result<PhaseOutcome> {
        let chroot = self.chroot(mountpoint);
        for service in AUTOSTART_SERVICES {
            chroot.check_call(&["rc-update", "add", *service], env)?;
        }
        Ok(PhaseOutcome::Performed)
    }

    fn create_network_configuration(
        &self,
        _mountpoint: &Utf8Path,
        _use_mtu: Option<bool>,
    ) -> Result<PhaseOutcome> {
        Ok(PhaseOutcome::NoOp)
    }

    fn perform_in_chroot_shipping_clean_up(
        &self,
        _mountpoint: &Utf8Path,
        _env: &Environment,
    ) -> Result<PhaseOutcome> {
        Ok(PhaseOutcome::NoOp)
    }

    fn perform_post_chroot_clean_up(&self, mountpoint: &Utf8Path) -> Result<PhaseOutcome> {
        for dir in POST_CHROOT_CLEAN_DIRS {
            let path = path_in_root(mountpoint, dir);
            if self.executor.is_dry_run() {
                info!("would empty {}", path);
                continue;
            }
            debug!("emptying {}", path);
            Self::empty_directory(&path)?;
        }
        Ok(PhaseOutcome::Performed)
    }

    fn get_commands_to_check_for(&self) -> Vec<String> {
        let mut commands = vec![COMMAND_CHROOT.to_string()];
        commands.extend(self.populator.required_commands());
        commands
    }

    fn get_cloud_init_datasource_cfg_path(&self) -> &'static str {
        "/etc/cloud/cloud.cfg.d/90_datasource.cfg"
    }
}
