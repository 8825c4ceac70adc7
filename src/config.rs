//! YAML profile loading and validation.

use std::fs::File;
use std::io::BufReader;
use std::sync::LazyLock;

use camino::{Utf8Path, Utf8PathBuf};
use regex::Regex;
use serde::Deserialize;
use tracing::debug;

use crate::distro::{Architecture, BootloaderApproach, BootloaderChoice, DistroConfig};
use crate::engine::{DEFAULT_HOST_GRUB2_INSTALL, EngineOptions};
use crate::error::RsimgstrapError;
use crate::fsutil::absolute;
use crate::isolation::MountPreset;
use crate::target::TargetConfig;

const HOSTNAME_LABEL: &str = r"[A-Za-z0-9]([A-Za-z0-9-]{0,61}[A-Za-z0-9])?";

static HOSTNAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"^{HOSTNAME_LABEL}(\.{HOSTNAME_LABEL})*$"))
        .unwrap_or_else(|e| panic!("invalid hostname regex: {e}"))
});

const MAX_HOSTNAME_LEN: usize = 253;

fn default_hostname() -> String {
    "localhost".to_string()
}

fn default_cache_dir() -> Utf8PathBuf {
    Utf8PathBuf::from("cache")
}

fn default_resolv_conf() -> Utf8PathBuf {
    Utf8PathBuf::from("/etc/resolv.conf")
}

fn default_jobs() -> u32 {
    2
}

fn default_host_grub2_install() -> String {
    DEFAULT_HOST_GRUB2_INSTALL.to_string()
}

fn default_datasources() -> Vec<String> {
    ["ConfigDrive", "Ec2", "None"].iter().map(|s| s.to_string()).collect()
}

/// Cloud-init settings written into the image.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CloudInitConfig {
    /// Datasources cloud-init probes, in order
    #[serde(default = "default_datasources")]
    pub datasources: Vec<String>,
}

impl Default for CloudInitConfig {
    fn default() -> Self {
        Self {
            datasources: default_datasources(),
        }
    }
}

/// An image build profile.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Profile {
    /// Directory of the profile file; relative paths are resolved against it.
    #[serde(skip)]
    pub dir: Utf8PathBuf,
    pub distro: DistroConfig,
    pub target: TargetConfig,
    #[serde(default)]
    pub architecture: Architecture,
    #[serde(default)]
    pub bootloader: BootloaderChoice,
    #[serde(default = "default_hostname")]
    pub hostname: String,
    #[serde(default = "default_cache_dir")]
    pub cache_dir: Utf8PathBuf,
    #[serde(default = "default_resolv_conf")]
    pub resolv_conf: Utf8PathBuf,
    /// Parallel build jobs inside the chroot
    #[serde(default = "default_jobs")]
    pub jobs: u32,
    /// Whether network configuration should honour the DHCP MTU; unset keeps the default
    #[serde(default)]
    pub use_mtu: Option<bool>,
    #[serde(default)]
    pub mounts: MountPreset,
    #[serde(default = "default_host_grub2_install")]
    pub host_grub2_install: String,
    #[serde(default)]
    pub cloud_init: CloudInitConfig,
}

impl Profile {
    fn resolve_paths(&mut self) {
        let dir = self.dir.clone();
        let resolve = |path: &mut Utf8PathBuf| {
            if path.is_relative() {
                *path = dir.join(&*path);
            }
        };
        resolve(&mut self.cache_dir);
        resolve(&mut self.resolv_conf);
        match &mut self.target {
            TargetConfig::Directory { path } => resolve(path),
            TargetConfig::Device { device } => resolve(device),
        }
    }

    /// Validates the profile without touching the host.
    pub fn validate(&self) -> Result<(), RsimgstrapError> {
        if self.hostname.is_empty() {
            return Err(RsimgstrapError::Validation("hostname must not be empty".to_string()));
        }
        if self.hostname.len() > MAX_HOSTNAME_LEN || !HOSTNAME_RE.is_match(&self.hostname) {
            return Err(RsimgstrapError::Validation(format!(
                "hostname '{}' is not a valid host name",
                self.hostname
            )));
        }
        if self.jobs == 0 {
            return Err(RsimgstrapError::Validation("jobs must be at least 1".to_string()));
        }
        if self.host_grub2_install.trim().is_empty() {
            return Err(RsimgstrapError::Validation(
                "host_grub2_install must not be empty".to_string(),
            ));
        }
        if self.cloud_init.datasources.is_empty() {
            return Err(RsimgstrapError::Validation(
                "cloud_init.datasources must list at least one datasource".to_string(),
            ));
        }
        if let Some(empty) = self.cloud_init.datasources.iter().position(|d| d.trim().is_empty()) {
            return Err(RsimgstrapError::Validation(format!(
                "cloud_init.datasources[{}] must not be empty",
                empty
            )));
        }

        if let BootloaderChoice::Explicit(approach) = self.bootloader {
            self.validate_bootloader(approach)?;
        }

        self.distro.validate()
    }

    fn validate_bootloader(&self, approach: BootloaderApproach) -> Result<(), RsimgstrapError> {
        if approach.is_bios() && !self.architecture.supports_bios_boot() {
            return Err(RsimgstrapError::Validation(format!(
                "bootloader {} is BIOS only and cannot boot {}",
                approach, self.architecture
            )));
        }
        if approach.is_bios() && !self.target.has_block_device() {
            return Err(RsimgstrapError::Validation(format!(
                "bootloader {} requires a device target",
                approach
            )));
        }
        Ok(())
    }

    /// Engine settings derived from this profile.
    pub fn engine_options(&self) -> EngineOptions {
        EngineOptions {
            architecture: self.architecture,
            bootloader: self.bootloader,
            hostname: self.hostname.clone(),
            cache_dir: self.cache_dir.clone(),
            resolv_conf: self.resolv_conf.clone(),
            mounts: self.mounts,
            use_mtu: self.use_mtu,
            host_grub2_install: self.host_grub2_install.clone(),
            cloud_init_datasources: self.cloud_init.datasources.clone(),
        }
    }
}

/// Loads a profile from `path` and resolves relative paths against its directory.
pub fn load_profile(path: &Utf8Path) -> Result<Profile, RsimgstrapError> {
    let file = File::open(path)
        .map_err(|e| RsimgstrapError::io(format!("failed to load file: {}", path), e))?;
    let reader = BufReader::new(file);
    let mut profile: Profile = serde_yaml::from_reader(reader)
        .map_err(|e| RsimgstrapError::Config(format!("failed to parse yaml {}: {}", path, e)))?;

    let parent = match path.parent() {
        Some(parent) if !parent.as_str().is_empty() => parent,
        _ => Utf8Path::new("."),
    };
    profile.dir = absolute(parent)?;
    profile.resolve_paths();
    debug!("loaded profile from {}", path);
    Ok(profile)
}
