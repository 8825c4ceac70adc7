//! Target filesystems.
//!
//! A [`TargetFilesystem`] produces the directory the image root is built in.
//! [`DirectoryTarget`] uses a plain directory; [`BlockDeviceTarget`]
//! partitions and formats a block device and mounts its root partition.

use anyhow::Result;
use camino::{Utf8Path, Utf8PathBuf};
use serde::Deserialize;

mod block_device;
mod directory;

pub use block_device::BlockDeviceTarget;
pub use directory::DirectoryTarget;

/// Trait for target filesystem implementations.
pub trait TargetFilesystem: Send + Sync {
    /// Human-readable description for logging (e.g. `block device /dev/loop0`).
    fn describe(&self) -> String;

    /// Host binaries needed by [`prepare`](Self::prepare) and [`finalize`](Self::finalize).
    fn required_commands(&self) -> Vec<String>;

    /// Creates and mounts the target, returning the absolute mount point.
    fn prepare(&mut self) -> Result<Utf8PathBuf>;

    /// The whole drive the image lives on, if any.
    fn drive(&self) -> Option<&Utf8Path>;

    /// The root partition, if any.
    fn root_partition(&self) -> Option<&Utf8Path>;

    /// `/etc/fstab` lines describing the target, empty when there is nothing to mount.
    fn fstab_entries(&self) -> Vec<String>;

    /// Unmounts the target and releases anything [`prepare`](Self::prepare) acquired.
    fn finalize(&mut self) -> Result<()>;
}

/// Target section of a profile.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TargetConfig {
    /// Build into a plain directory
    Directory {
        /// Directory the root is built in
        path: Utf8PathBuf,
    },
    /// Partition, format and mount a block device
    Device {
        /// Block device (e.g. `/dev/loop0`)
        device: Utf8PathBuf,
    },
}

impl TargetConfig {
    /// Returns true when the target has a block device for a bootloader.
    pub fn has_block_device(&self) -> bool {
        matches!(self, TargetConfig::Device { .. })
    }
}
