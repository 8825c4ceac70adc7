use std::os::unix::process::ExitStatusExt;
use std::process::ExitStatus;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use camino::{Utf8Path, Utf8PathBuf};
use rsimgstrap::distro::{
    Architecture, BootloaderApproach, BootloaderChoice, DistroStrategy, PhaseOutcome,
};
use rsimgstrap::engine::EngineOptions;
use rsimgstrap::environment::Environment;
use rsimgstrap::executor::{CommandExecutor, CommandSpec, ExecutionResult};
use rsimgstrap::isolation::{Chroot, MountPreset};

/// Executor that records every spec instead of running it.
///
/// A command whose argument vector contains `fail_on` exits with status 1.
#[derive(Default)]
pub struct RecordingExecutor {
    pub calls: Mutex<Vec<CommandSpec>>,
    pub fail_on: Option<String>,
    pub dry_run: bool,
}

impl RecordingExecutor {
    #[allow(dead_code)]
    pub fn new() -> Self {
        Self::default()
    }

    #[allow(dead_code)]
    pub fn dry_run() -> Self {
        Self {
            dry_run: true,
            ..Self::default()
        }
    }

    #[allow(dead_code)]
    pub fn failing_on(arg: &str) -> Self {
        Self {
            fail_on: Some(arg.to_string()),
            ..Self::default()
        }
    }

    /// Recorded argument vectors, command first.
    #[allow(dead_code)]
    pub fn argvs(&self) -> Vec<Vec<String>> {
        self.calls.lock().unwrap().iter().map(CommandSpec::argv).collect()
    }

    /// Commands run through `chroot`, without the `chroot <mountpoint>` prefix.
    #[allow(dead_code)]
    pub fn chroot_commands(&self) -> Vec<String> {
        self.argvs()
            .into_iter()
            .filter(|argv| argv[0] == "chroot")
            .map(|argv| argv[2..].join(" "))
            .collect()
    }
}

impl CommandExecutor for RecordingExecutor {
    fn execute(&self, spec: &CommandSpec) -> Result<ExecutionResult> {
        self.calls.lock().unwrap().push(spec.clone());
        let failing = self
            .fail_on
            .as_ref()
            .is_some_and(|needle| spec.argv().iter().any(|arg| arg == needle));
        let status = if failing {
            Some(ExitStatus::from_raw(1 << 8))
        } else if self.dry_run {
            None
        } else {
            Some(ExitStatus::from_raw(0))
        };
        Ok(ExecutionResult { status })
    }

    fn is_dry_run(&self) -> bool {
        self.dry_run
    }
}

/// Strategy that records each operation by name.
///
/// Operations receiving an environment also run `chroot <mountpoint> <name>`
/// through the executor, so a failing executor can stop the build at them.
#[allow(dead_code)]
pub struct FakeStrategy {
    calls: Mutex<Vec<&'static str>>,
    executor: Arc<dyn CommandExecutor>,
    pub required_commands: Vec<String>,
    pub bootloader: BootloaderApproach,
}

impl FakeStrategy {
    #[allow(dead_code)]
    pub fn new(executor: Arc<dyn CommandExecutor>) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            executor,
            required_commands: Vec::new(),
            bootloader: BootloaderApproach::ChrootGrub2Uefi,
        }
    }

    #[allow(dead_code)]
    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, name: &'static str) {
        self.calls.lock().unwrap().push(name);
    }

    fn run_in_chroot(
        &self,
        name: &'static str,
        mountpoint: &Utf8Path,
        env: &Environment,
    ) -> Result<()> {
        self.record(name);
        Chroot::new(mountpoint, Arc::clone(&self.executor)).check_call(&[name], env)
    }

    fn touch(&self, mountpoint: &Utf8Path, absolute: &str) -> Result<()> {
        if self.executor.is_dry_run() {
            return Ok(());
        }
        let path = mountpoint.join(absolute.trim_start_matches('/'));
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, "")?;
        Ok(())
    }
}

impl DistroStrategy for FakeStrategy {
    fn key(&self) -> &'static str {
        "fake"
    }

    fn name_short(&self) -> &'static str {
        "Fake"
    }

    fn name_long(&self) -> &'static str {
        "Fake Linux"
    }

    fn select_bootloader(&self) -> BootloaderApproach {
        self.bootloader
    }

    fn run_root_population(
        &self,
        _mountpoint: &Utf8Path,
        _architecture: Architecture,
    ) -> Result<()> {
        self.record("run_root_population");
        Ok(())
    }

    fn prepare_installation_of_packages(
        &self,
        mountpoint: &Utf8Path,
        env: &Environment,
    ) -> Result<()> {
        self.run_in_chroot("prepare_installation_of_packages", mountpoint, env)
    }

    fn install_kernel(&self, mountpoint: &Utf8Path, env: &Environment) -> Result<()> {
        self.run_in_chroot("install_kernel", mountpoint, env)?;
        self.touch(mountpoint, self.get_vmlinuz_path())
    }

    fn generate_initramfs_from_inside_chroot(
        &self,
        mountpoint: &Utf8Path,
        env: &Environment,
    ) -> Result<()> {
        self.run_in_chroot("generate_initramfs_from_inside_chroot", mountpoint, env)?;
        self.touch(mountpoint, self.get_initramfs_path())
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
        self.run_in_chroot("ensure_chroot_has_grub2_installed", mountpoint, env)
    }

    fn generate_grub_cfg_from_inside_chroot(
        &self,
        mountpoint: &Utf8Path,
        env: &Environment,
    ) -> Result<()> {
        self.run_in_chroot("generate_grub_cfg_from_inside_chroot", mountpoint, env)
    }

    fn get_chroot_command_grub2_install(&self) -> &'static str {
        "grub-install"
    }

    fn install_sshd(&self, mountpoint: &Utf8Path, env: &Environment) -> Result<()> {
        self.run_in_chroot("install_sshd", mountpoint, env)
    }

    fn install_sudo(&self, mountpoint: &Utf8Path, env: &Environment) -> Result<()> {
        self.run_in_chroot("install_sudo", mountpoint, env)
    }

    fn install_cloud_init_and_friends(
        &self,
        mountpoint: &Utf8Path,
        env: &Environment,
    ) -> Result<()> {
        self.run_in_chroot("install_cloud_init_and_friends", mountpoint, env)
    }

    fn allow_autostart_of_services(
        &self,
        _mountpoint: &Utf8Path,
        allow: bool,
    ) -> Result<PhaseOutcome> {
        self.record(if allow {
            "allow_autostart_of_services(true)"
        } else {
            "allow_autostart_of_services(false)"
        });
        Ok(PhaseOutcome::NoOp)
    }

    fn make_openstack_services_autostart(
        &self,
        mountpoint: &Utf8Path,
        env: &Environment,
    ) -> Result<PhaseOutcome> {
        self.run_in_chroot("make_openstack_services_autostart", mountpoint, env)?;
        Ok(PhaseOutcome::Performed)
    }

    fn create_network_configuration(
        &self,
        _mountpoint: &Utf8Path,
        _use_mtu: Option<bool>,
    ) -> Result<PhaseOutcome> {
        self.record("create_network_configuration");
        Ok(PhaseOutcome::NoOp)
    }

    fn perform_in_chroot_shipping_clean_up(
        &self,
        mountpoint: &Utf8Path,
        env: &Environment,
    ) -> Result<PhaseOutcome> {
        self.run_in_chroot("perform_in_chroot_shipping_clean_up", mountpoint, env)?;
        Ok(PhaseOutcome::Performed)
    }

    fn perform_post_chroot_clean_up(&self, _mountpoint: &Utf8Path) -> Result<PhaseOutcome> {
        self.record("perform_post_chroot_clean_up");
        Ok(PhaseOutcome::NoOp)
    }

    fn get_commands_to_check_for(&self) -> Vec<String> {
        self.required_commands.clone()
    }

    fn get_cloud_init_datasource_cfg_path(&self) -> &'static str {
        "/etc/cloud/cloud.cfg.d/90_datasource.cfg"
    }
}

/// Creates a temporary directory with a UTF-8 path.
#[allow(dead_code)]
pub fn utf8_tempdir() -> (tempfile::TempDir, Utf8PathBuf) {
    let dir = tempfile::tempdir().expect("failed to create temp dir");
    let path = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).expect("utf-8 path");
    (dir, path)
}

/// Engine options for tests, with a host resolv.conf written into `dir`.
#[allow(dead_code)]
pub fn engine_options(dir: &Utf8Path, bootloader: BootloaderChoice) -> EngineOptions {
    let resolv_conf = dir.join("host-resolv.conf");
    std::fs::write(&resolv_conf, "nameserver 192.0.2.53\n").expect("write resolv.conf");
    EngineOptions {
        architecture: Architecture::Amd64,
        bootloader,
        hostname: "test-image".to_string(),
        cache_dir: dir.join("cache"),
        resolv_conf,
        mounts: MountPreset::None,
        use_mtu: None,
        host_grub2_install: "grub2-install".to_string(),
        cloud_init_datasources: vec!["ConfigDrive".to_string(), "None".to_string()],
    }
}

/// Writes `yaml` to a temporary profile file and loads it.
#[allow(dead_code)]
pub fn load_profile_from_yaml(yaml: &str) -> Result<rsimgstrap::config::Profile> {
    let (_guard, dir) = utf8_tempdir();
    let path = dir.join("profile.yml");
    std::fs::write(&path, yaml)?;
    Ok(rsimgstrap::config::load_profile(&path)?)
}
