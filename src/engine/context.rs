use camino::Utf8PathBuf;

use crate::distro::{Architecture, BootloaderApproach};
use crate::environment::Environment;

/// Mutable state of a single build, owned by the engine.
///
/// Created once the target filesystem is mounted; never persisted.
#[derive(Debug, Clone)]
pub struct BuildContext {
    /// Absolute mount point of the image root.
    pub mountpoint: Utf8PathBuf,
    /// Absolute directory for downloaded artifacts.
    pub cache_dir: Utf8PathBuf,
    pub architecture: Architecture,
    /// Bootloader approach after resolving `auto`.
    pub bootloader: BootloaderApproach,
    /// Environment applied to every chrooted command.
    pub env: Environment,
    /// Host resolv.conf copied into the target while building.
    pub resolv_conf: Utf8PathBuf,
    pub dry_run: bool,
}
