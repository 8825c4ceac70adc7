//! Chroot command wrapper.

use std::sync::Arc;

use anyhow::Result;
use camino::{Utf8Path, Utf8PathBuf};

use crate::environment::Environment;
use crate::executor::{CommandExecutor, CommandSpec, check_call};

/// Command used to enter the target root.
pub const COMMAND_CHROOT: &str = "chroot";

/// Builds the argument vector that runs `command` inside `mountpoint`.
///
/// The result is always `chroot`, the mount point, then `command` unchanged.
pub fn chroot_command<S: AsRef<str>>(mountpoint: &Utf8Path, command: &[S]) -> Vec<String> {
    let mut argv = Vec::with_capacity(command.len() + 2);
    argv.push(COMMAND_CHROOT.to_string());
    argv.push(mountpoint.to_string());
    argv.extend(command.iter().map(|arg| arg.as_ref().to_string()));
    argv
}

/// Runs commands inside a target root through a shared executor.
///
/// This is the simplest isolation mechanism: the standard `chroot` command
/// switches the root directory before executing each command. There is no
/// state to set up or tear down; API filesystems are handled separately by
/// [`ChrootMounts`](super::ChrootMounts).
#[derive(Clone)]
pub struct Chroot {
    mountpoint: Utf8PathBuf,
    executor: Arc<dyn CommandExecutor>,
}

impl Chroot {
    pub fn new(mountpoint: &Utf8Path, executor: Arc<dyn CommandExecutor>) -> Self {
        Self {
            mountpoint: mountpoint.to_owned(),
            executor,
        }
    }

    /// Returns the spec for running `command` in the chroot with `env` applied.
    pub fn spec<S: AsRef<str>>(&self, command: &[S], env: &Environment) -> CommandSpec {
        let argv = chroot_command(&self.mountpoint, command);
        CommandSpec::new(COMMAND_CHROOT, argv[1..].to_vec()).with_environment(env)
    }

    /// Runs `command` in the chroot and fails on any unsuccessful exit.
    pub fn check_call<S: AsRef<str>>(&self, command: &[S], env: &Environment) -> Result<()> {
        check_call(self.executor.as_ref(), &self.spec(command, env))
    }
}
