//! Bootstrap engine.
//!
//! The [`Engine`] drives a [`DistroStrategy`] through a fixed sequence of
//! [`Phase`]s against a [`TargetFilesystem`]. Each phase assumes the previous
//! one succeeded; the first failure aborts the build with the phase name as
//! context. There is no rollback: on error the chroot API mounts are released
//! and the target is left as-is for inspection.

mod bootloader;
mod context;
pub mod preflight;
mod resolv_conf;
mod system_files;

use std::sync::Arc;

use anyhow::{Context, Result};
use camino::Utf8PathBuf;
use strum::{Display, EnumIter};
use tracing::{error, info, warn};

use crate::distro::{
    Architecture, BootloaderApproach, BootloaderChoice, DistroStrategy, PhaseOutcome,
};
use crate::environment::Environment;
use crate::executor::{CommandExecutor, CommandSpec, check_call};
use crate::isolation::{ChrootMounts, MountPreset};
use crate::messenger::Messenger;
use crate::target::TargetFilesystem;

pub use bootloader::{GrubInstall, validate_approach, verify_boot_artifacts};
pub use context::BuildContext;
pub use resolv_conf::ResolvConfInjection;
pub use system_files::{render_datasource_config, render_fstab};

/// Default `grub2-install` binary on the host.
pub const DEFAULT_HOST_GRUB2_INSTALL: &str = "grub2-install";

/// The build phases, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumIter)]
#[strum(serialize_all = "kebab-case")]
pub enum Phase {
    Preflight,
    PrepareTarget,
    InjectResolvConf,
    PopulateRoot,
    PreparePackages,
    Kernel,
    Bootloader,
    Packages,
    Services,
    Cleanup,
    Finalize,
}

/// Run-wide settings of the engine.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub architecture: Architecture,
    pub bootloader: BootloaderChoice,
    pub hostname: String,
    /// Absolute directory for downloaded artifacts.
    pub cache_dir: Utf8PathBuf,
    /// Absolute path of the host resolv.conf.
    pub resolv_conf: Utf8PathBuf,
    pub mounts: MountPreset,
    pub use_mtu: Option<bool>,
    pub host_grub2_install: String,
    pub cloud_init_datasources: Vec<String>,
}

fn run_phase<T>(phase: Phase, f: impl FnOnce() -> Result<T>) -> Result<T> {
    info!("phase {}", phase);
    f().with_context(|| format!("{} phase failed", phase))
}

/// Drives a distro strategy through the image build.
pub struct Engine<'a> {
    strategy: &'a dyn DistroStrategy,
    target: Box<dyn TargetFilesystem>,
    executor: Arc<dyn CommandExecutor>,
    messenger: Arc<dyn Messenger>,
    options: EngineOptions,
}

impl<'a> Engine<'a> {
    pub fn new(
        strategy: &'a dyn DistroStrategy,
        target: Box<dyn TargetFilesystem>,
        executor: Arc<dyn CommandExecutor>,
        messenger: Arc<dyn Messenger>,
        options: EngineOptions,
    ) -> Self {
        Self {
            strategy,
            target,
            executor,
            messenger,
            options,
        }
    }

    /// Host binaries the whole build needs with `approach`.
    pub fn required_commands(&self, approach: BootloaderApproach) -> Vec<String> {
        let mut commands = self.strategy.get_commands_to_check_for();
        commands.extend(self.target.required_commands());
        commands.extend(self.options.mounts.required_commands());
        if approach.runs_on_host() {
            commands.push(self.options.host_grub2_install.clone());
        }
        commands
    }

    fn log_outcome(&self, what: &str, outcome: PhaseOutcome) {
        if outcome == PhaseOutcome::NoOp {
            info!("{}: nothing to do for {}", what, self.strategy.name_short());
        }
    }

    /// Runs every phase in order.
    pub fn run(&mut self) -> Result<()> {
        let dry_run = self.executor.is_dry_run();
        let approach = self.options.bootloader.resolve(self.strategy);
        validate_approach(
            approach,
            self.options.architecture,
            self.target.drive().is_some(),
        )?;
        self.messenger.info(&format!(
            "Building {} image in {} (bootloader: {})...",
            self.strategy.name_long(),
            self.target.describe(),
            approach
        ));

        run_phase(Phase::Preflight, || {
            if dry_run {
                warn!("dry run: skipping host dependency check");
                return Ok(());
            }
            preflight::check_commands(&self.required_commands(approach))?;
            Ok(())
        })?;

        let mountpoint = run_phase(Phase::PrepareTarget, || self.target.prepare())?;
        let ctx = BuildContext {
            mountpoint,
            cache_dir: self.options.cache_dir.clone(),
            architecture: self.options.architecture,
            bootloader: approach,
            env: Environment::for_chroot(),
            resolv_conf: self.options.resolv_conf.clone(),
            dry_run,
        };

        let resolv_conf = run_phase(Phase::InjectResolvConf, || {
            Ok(ResolvConfInjection::inject(
                &ctx.resolv_conf,
                &ctx.mountpoint,
                ctx.dry_run,
            )?)
        })?;

        let mut mounts = ChrootMounts::new(
            &ctx.mountpoint,
            self.options.mounts.to_entries(),
            Arc::clone(&self.executor),
        );
        self.build(&ctx, &mut mounts)?;
        self.cleanup(&ctx, mounts, resolv_conf);

        run_phase(Phase::Finalize, || self.target.finalize())?;
        self.messenger.info("Done.");
        Ok(())
    }

    fn build(&self, ctx: &BuildContext, mounts: &mut ChrootMounts) -> Result<()> {
        let strategy = self.strategy;
        let mnt = ctx.mountpoint.as_path();
        let env = &ctx.env;

        run_phase(Phase::PopulateRoot, || {
            strategy.run_root_population(mnt, ctx.architecture)?;
            mounts.mount()?;
            self.log_outcome(
                "disabling service autostart",
                strategy.allow_autostart_of_services(mnt, false)?,
            );
            Ok(())
        })?;

        run_phase(Phase::PreparePackages, || {
            strategy.prepare_installation_of_packages(mnt, env)
        })?;

        run_phase(Phase::Kernel, || {
            strategy.install_kernel(mnt, env)?;
            strategy.generate_initramfs_from_inside_chroot(mnt, env)
        })?;

        run_phase(Phase::Bootloader, || self.install_bootloader(ctx))?;

        run_phase(Phase::Packages, || {
            strategy.install_sshd(mnt, env)?;
            strategy.install_sudo(mnt, env)?;
            strategy.install_cloud_init_and_friends(mnt, env)?;
            let datasources = render_datasource_config(&self.options.cloud_init_datasources)?;
            system_files::write_target_file(
                mnt,
                strategy.get_cloud_init_datasource_cfg_path(),
                &datasources,
                ctx.dry_run,
            )?;
            Ok(())
        })?;

        run_phase(Phase::Services, || {
            self.log_outcome(
                "enabling service autostart",
                strategy.allow_autostart_of_services(mnt, true)?,
            );
            self.log_outcome(
                "service autostart",
                strategy.make_openstack_services_autostart(mnt, env)?,
            );
            self.log_outcome(
                "network configuration",
                strategy.create_network_configuration(mnt, self.options.use_mtu)?,
            );
            system_files::write_target_file(
                mnt,
                "/etc/hostname",
                &format!("{}\n", self.options.hostname),
                ctx.dry_run,
            )?;
            let fstab = self.target.fstab_entries();
            if !fstab.is_empty() {
                let content = render_fstab(&fstab);
                system_files::write_target_file(mnt, "/etc/fstab", &content, ctx.dry_run)?;
            }
            Ok(())
        })
    }

    fn install_bootloader(&self, ctx: &BuildContext) -> Result<()> {
        if ctx.bootloader == BootloaderApproach::None {
            info!("bootloader approach is none, leaving kernel and initramfs only");
            return Ok(());
        }
        let strategy = self.strategy;
        let mnt = ctx.mountpoint.as_path();

        if !ctx.dry_run {
            verify_boot_artifacts(mnt, strategy)?;
        }
        strategy.ensure_chroot_has_grub2_installed(mnt, &ctx.env)?;
        strategy.generate_grub_cfg_from_inside_chroot(mnt, &ctx.env)?;

        let grub = GrubInstall {
            mountpoint: mnt,
            architecture: ctx.architecture,
            host_command: &self.options.host_grub2_install,
            chroot_command: strategy.get_chroot_command_grub2_install(),
            drive: self.target.drive(),
            partition: self.target.root_partition(),
        };
        if let Some(argv) = grub.argv(ctx.bootloader)? {
            self.messenger
                .info(&format!("Installing bootloader ({})...", ctx.bootloader));
            let mut spec = CommandSpec::from_argv(&argv)?;
            if !ctx.bootloader.runs_on_host() {
                spec = spec.with_environment(&ctx.env);
            }
            check_call(self.executor.as_ref(), &spec)?;
        }
        Ok(())
    }

    /// Best-effort teardown; failures are logged and the run continues.
    fn cleanup(
        &self,
        ctx: &BuildContext,
        mut mounts: ChrootMounts,
        resolv_conf: ResolvConfInjection,
    ) {
        info!("phase {}", Phase::Cleanup);
        let strategy = self.strategy;
        let mnt = ctx.mountpoint.as_path();

        match strategy.perform_in_chroot_shipping_clean_up(mnt, &ctx.env) {
            Ok(outcome) => self.log_outcome("in-chroot clean up", outcome),
            Err(e) => error!("in-chroot clean up failed: {:#}", e),
        }
        if let Err(e) = mounts.unmount() {
            error!("failed to unmount chroot filesystems: {:#}", e);
        }
        if let Err(e) = resolv_conf.restore() {
            error!("failed to restore resolv.conf: {:#}", e);
        }
        match strategy.perform_post_chroot_clean_up(mnt) {
            Ok(outcome) => self.log_outcome("post-chroot clean up", outcome),
            Err(e) => error!("post-chroot clean up failed: {:#}", e),
        }
    }
}
