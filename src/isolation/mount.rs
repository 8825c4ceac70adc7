//! API filesystem mounts for the chroot.
//!
//! This module provides [`ChrootMounts`], an RAII guard that mounts kernel
//! pseudo filesystems (`/proc`, `/sys`, `/dev`, `/dev/pts`) into the target
//! root so that package managers, `grub2-install` and friends work inside the
//! chroot. Mounts are set up in order and torn down in reverse order, with
//! guaranteed cleanup via `Drop`.

use std::fs;
use std::sync::Arc;

use anyhow::Result;
use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use strum::Display;
use tracing::info;

use crate::error::RsimgstrapError;
use crate::executor::{CommandExecutor, CommandSpec, check_call};
use crate::fsutil::{ensure_directory, path_in_root};

/// A single filesystem mount inside the target root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountEntry {
    /// Device, pseudo filesystem name, or host path for bind mounts.
    pub source: String,
    /// Absolute path inside the target root.
    pub target: Utf8PathBuf,
    /// Filesystem type passed with `-t`, if any.
    pub fstype: Option<String>,
    /// Mount options passed with `-o`, if any. `bind` selects a bind mount.
    pub options: Vec<String>,
}

impl MountEntry {
    fn new(source: &str, target: &str, fstype: Option<&str>, options: &[&str]) -> Self {
        Self {
            source: source.to_string(),
            target: target.into(),
            fstype: fstype.map(str::to_string),
            options: options.iter().map(|o| o.to_string()).collect(),
        }
    }

    /// Returns true if this entry is a bind mount.
    pub fn is_bind_mount(&self) -> bool {
        self.options.iter().any(|o| o == "bind" || o == "rbind")
    }

    fn absolute_target(&self, root: &Utf8Path) -> Utf8PathBuf {
        path_in_root(root, self.target.as_str())
    }

    /// Builds the `mount` invocation for this entry below `root`.
    pub fn build_mount_spec(&self, root: &Utf8Path) -> CommandSpec {
        let mut args = Vec::new();
        if let Some(fstype) = &self.fstype {
            args.push("-t".to_string());
            args.push(fstype.clone());
        }
        if !self.options.is_empty() {
            args.push("-o".to_string());
            args.push(self.options.join(","));
        }
        args.push(self.source.clone());
        args.push(self.absolute_target(root).to_string());
        CommandSpec::new("mount", args)
    }

    /// Builds the `umount` invocation for this entry below `root`.
    pub fn build_umount_spec(&self, root: &Utf8Path) -> CommandSpec {
        CommandSpec::new("umount", vec![self.absolute_target(root).to_string()])
    }
}

/// Predefined sets of chroot mounts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum MountPreset {
    /// `/proc`, `/sys`, `/dev` (bind) and `/dev/pts`, in that order.
    #[default]
    Recommends,
    /// No mounts; in-chroot tools run without API filesystems.
    None,
}

impl MountPreset {
    /// Expands the preset into mount entries, parents before children.
    pub fn to_entries(self) -> Vec<MountEntry> {
        match self {
            Self::Recommends => vec![
                MountEntry::new("proc", "/proc", Some("proc"), &[]),
                MountEntry::new("sysfs", "/sys", Some("sysfs"), &[]),
                MountEntry::new("/dev", "/dev", None, &["bind"]),
                MountEntry::new("devpts", "/dev/pts", Some("devpts"), &[]),
            ],
            Self::None => Vec::new(),
        }
    }

    /// Host commands needed to apply this preset.
    pub fn required_commands(self) -> Vec<String> {
        match self {
            Self::Recommends => vec!["mount".to_string(), "umount".to_string()],
            Self::None => Vec::new(),
        }
    }
}

/// Validates that no existing component of the target path within root is a symlink.
///
/// A populated root is untrusted input: a symlinked `/dev` would otherwise
/// redirect a mount onto the host filesystem.
fn validate_no_symlinks(root: &Utf8Path, target: &Utf8Path) -> Result<()> {
    let relative = target.strip_prefix("/").unwrap_or(target);
    let mut current = root.to_path_buf();

    for component in relative.components() {
        current.push(component);
        match fs::symlink_metadata(&current) {
            Ok(metadata) if metadata.file_type().is_symlink() => {
                return Err(RsimgstrapError::Isolation(format!(
                    "symlink detected at {} in mount target path {}",
                    current, target,
                ))
                .into());
            }
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => break,
            Err(e) => {
                return Err(RsimgstrapError::io(
                    format!("failed to check mount target path component: {}", current),
                    e,
                )
                .into());
            }
        }
    }

    Ok(())
}

/// RAII guard for API filesystem mounts within the target root.
pub struct ChrootMounts {
    root: Utf8PathBuf,
    entries: Vec<MountEntry>,
    mounted: Vec<bool>,
    executor: Arc<dyn CommandExecutor>,
    torn_down: bool,
}

impl ChrootMounts {
    /// Creates a new guard. No mounts are performed until [`mount()`](Self::mount).
    pub fn new(
        root: &Utf8Path,
        entries: Vec<MountEntry>,
        executor: Arc<dyn CommandExecutor>,
    ) -> Self {
        let mounted = vec![false; entries.len()];
        Self {
            root: root.to_owned(),
            entries,
            mounted,
            executor,
            torn_down: false,
        }
    }

    fn mounted_count(&self) -> usize {
        self.mounted.iter().filter(|&&m| m).count()
    }

    /// Mounts all entries in order.
    ///
    /// Creates mount point directories as needed (skipped in dry-run mode).
    /// On failure, unmounts any entries that were already mounted.
    pub fn mount(&mut self) -> Result<()> {
        if self.entries.is_empty() {
            return Ok(());
        }

        info!("mounting {} filesystem(s) in {}", self.entries.len(), self.root);
        let dry_run = self.executor.is_dry_run();

        for i in 0..self.entries.len() {
            let entry = &self.entries[i];
            if !dry_run {
                let target = entry.absolute_target(&self.root);
                let prepared = validate_no_symlinks(&self.root, &entry.target)
                    .and_then(|()| ensure_directory(&target).map_err(anyhow::Error::from));
                if let Err(e) = prepared {
                    return Err(self.cleanup_after_error(e));
                }
            }

            info!("mounting {} on {}", entry.source, entry.target);
            let spec = entry.build_mount_spec(&self.root);
            match check_call(self.executor.as_ref(), &spec) {
                Ok(()) => self.mounted[i] = true,
                Err(e) => return Err(self.cleanup_after_error(e)),
            }
        }

        Ok(())
    }

    fn cleanup_after_error(&mut self, error: anyhow::Error) -> anyhow::Error {
        if let Err(unmount_err) = self.unmount_internal() {
            tracing::error!("failed to unmount filesystems during cleanup: {}", unmount_err);
        }
        error
    }

    /// Unmounts all mounted entries in reverse order.
    ///
    /// Idempotent after a successful unmount. Every entry is attempted even
    /// when an earlier one fails; failures are reported together.
    pub fn unmount(&mut self) -> Result<()> {
        if self.torn_down {
            return Ok(());
        }
        let result = self.unmount_internal();
        if result.is_ok() {
            self.torn_down = true;
        }
        result
    }

    fn unmount_internal(&mut self) -> Result<()> {
        let count = self.mounted_count();
        if count == 0 {
            return Ok(());
        }

        info!("unmounting {} filesystem(s) from {}", count, self.root);

        let mut errors = Vec::new();
        for i in (0..self.entries.len()).rev() {
            if !self.mounted[i] {
                continue;
            }
            let entry = &self.entries[i];
            let spec = entry.build_umount_spec(&self.root);
            match check_call(self.executor.as_ref(), &spec) {
                Ok(()) => self.mounted[i] = false,
                Err(e) => errors.push(format!("umount {} failed: {}", entry.target, e)),
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(RsimgstrapError::Isolation(format!(
                "failed to unmount {} filesystem(s): {}",
                errors.len(),
                errors.join("; ")
            ))
            .into())
        }
    }
}

impl Drop for ChrootMounts {
    fn drop(&mut self) {
        if !self.torn_down
            && self.mounted.iter().any(|&m| m)
            && let Err(e) = self.unmount()
        {
            tracing::error!(
                "failed to unmount {} filesystem(s) during cleanup: {}. \
                Manual cleanup may be required: findmnt | grep {}",
                self.mounted_count(),
                e,
                self.root
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::ExecutionResult;
    use std::os::unix::process::ExitStatusExt;
    use std::process::ExitStatus;
    use std::sync::Mutex;

    #[derive(Default)]
    struct MockMountExecutor {
        calls: Mutex<Vec<Vec<String>>>,
        fail_on_calls: Vec<usize>,
        dry_run: bool,
    }

    impl MockMountExecutor {
        fn failing_on(calls: Vec<usize>) -> Self {
            Self {
                fail_on_calls: calls,
                ..Self::default()
            }
        }

        fn calls(&self) -> Vec<Vec<String>> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl CommandExecutor for MockMountExecutor {
        fn execute(&self, spec: &CommandSpec) -> Result<ExecutionResult> {
            let mut calls = self.calls.lock().unwrap();
            let index = calls.len();
            calls.push(spec.argv());
            let code = if self.fail_on_calls.contains(&index) { 1 } else { 0 };
            Ok(ExecutionResult {
                status: Some(ExitStatus::from_raw(code << 8)),
            })
        }

        fn is_dry_run(&self) -> bool {
            self.dry_run
        }
    }

    fn tempdir_utf8() -> (tempfile::TempDir, Utf8PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        (dir, path)
    }

    #[test]
    fn recommends_preset_orders_parents_first() {
        let entries = MountPreset::Recommends.to_entries();
        let targets: Vec<&str> = entries.iter().map(|e| e.target.as_str()).collect();
        assert_eq!(targets, vec!["/proc", "/sys", "/dev", "/dev/pts"]);
        assert!(entries[2].is_bind_mount());
        assert!(MountPreset::None.to_entries().is_empty());
    }

    #[test]
    fn mount_spec_includes_type_and_options() {
        let entry = MountEntry::new("/dev", "/dev", None, &["bind"]);
        let spec = entry.build_mount_spec(Utf8Path::new("/mnt/target"));
        assert_eq!(spec.argv(), vec!["mount", "-o", "bind", "/dev", "/mnt/target/dev"]);

        let entry = MountEntry::new("proc", "/proc", Some("proc"), &[]);
        let spec = entry.build_mount_spec(Utf8Path::new("/mnt/target"));
        assert_eq!(spec.argv(), vec!["mount", "-t", "proc", "proc", "/mnt/target/proc"]);
    }

    #[test]
    fn mount_and_unmount_in_reverse_order() {
        let executor = Arc::new(MockMountExecutor::default());
        let (_guard, root) = tempdir_utf8();

        let mut mounts =
            ChrootMounts::new(&root, MountPreset::Recommends.to_entries(), executor.clone());
        mounts.mount().unwrap();
        mounts.unmount().unwrap();

        let calls = executor.calls();
        assert_eq!(calls.len(), 8);
        assert!(calls[..4].iter().all(|c| c[0] == "mount"));
        assert!(calls[4..].iter().all(|c| c[0] == "umount"));
        assert!(calls[4][1].ends_with("/dev/pts"));
        assert!(calls[7][1].ends_with("/proc"));
        assert!(root.join("dev/pts").is_dir());
    }

    #[test]
    fn mount_failure_unmounts_already_mounted_entries() {
        let executor = Arc::new(MockMountExecutor::failing_on(vec![1]));
        let (_guard, root) = tempdir_utf8();

        let mut mounts =
            ChrootMounts::new(&root, MountPreset::Recommends.to_entries(), executor.clone());
        let err = mounts.mount().unwrap_err();
        assert!(err.to_string().contains("command execution failed"));

        let calls = executor.calls();
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[2][0], "umount");
        assert!(calls[2][1].ends_with("/proc"));
    }

    #[test]
    fn drop_triggers_unmount() {
        let executor = Arc::new(MockMountExecutor::default());
        let (_guard, root) = tempdir_utf8();
        {
            let mut mounts =
                ChrootMounts::new(&root, MountPreset::Recommends.to_entries(), executor.clone());
            mounts.mount().unwrap();
        }
        assert_eq!(executor.calls().len(), 8);
    }

    #[test]
    fn unmount_is_idempotent() {
        let executor = Arc::new(MockMountExecutor::default());
        let (_guard, root) = tempdir_utf8();
        let mut mounts =
            ChrootMounts::new(&root, MountPreset::Recommends.to_entries(), executor.clone());
        mounts.mount().unwrap();
        mounts.unmount().unwrap();
        mounts.unmount().unwrap();
        assert_eq!(executor.calls().len(), 8);
    }

    #[test]
    fn unmount_failure_attempts_every_entry() {
        let executor = Arc::new(MockMountExecutor::failing_on(vec![4]));
        let (_guard, root) = tempdir_utf8();
        let mut mounts =
            ChrootMounts::new(&root, MountPreset::Recommends.to_entries(), executor.clone());
        mounts.mount().unwrap();

        let err = mounts.unmount().unwrap_err();
        assert!(err.to_string().contains("failed to unmount 1 filesystem(s)"));
        assert_eq!(executor.calls().len(), 8);
        assert!(!mounts.torn_down);
    }

    #[test]
    fn dry_run_skips_directory_creation() {
        let executor = Arc::new(MockMountExecutor {
            dry_run: true,
            ..MockMountExecutor::default()
        });
        let mut mounts = ChrootMounts::new(
            Utf8Path::new("/nonexistent/target"),
            MountPreset::Recommends.to_entries(),
            executor.clone(),
        );
        mounts.mount().unwrap();
        mounts.unmount().unwrap();
        assert_eq!(executor.calls().len(), 8);
    }

    #[cfg(unix)]
    #[test]
    fn symlinked_target_is_rejected() {
        let executor = Arc::new(MockMountExecutor::default());
        let (_guard, root) = tempdir_utf8();
        std::os::unix::fs::symlink("/", root.join("proc")).unwrap();

        let mut mounts =
            ChrootMounts::new(&root, MountPreset::Recommends.to_entries(), executor.clone());
        let err = mounts.mount().unwrap_err();
        assert!(err.to_string().contains("symlink detected"));
        assert!(executor.calls().is_empty());
    }
}
