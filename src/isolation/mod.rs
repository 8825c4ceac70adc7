//! Isolation of in-target commands.
//!
//! Every command that must run inside the image is re-entered through
//! `chroot` ([`Chroot`]), with kernel API filesystems made available by
//! [`ChrootMounts`] for the duration of the build.

pub mod chroot;
pub mod mount;

pub use chroot::{COMMAND_CHROOT, Chroot, chroot_command};
pub use mount::{ChrootMounts, MountEntry, MountPreset};
