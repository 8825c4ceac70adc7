use std::sync::Arc;

use anyhow::Result;
use camino::{Utf8Path, Utf8PathBuf};
use tracing::info;

use super::TargetFilesystem;
use crate::executor::CommandExecutor;
use crate::fsutil::{absolute, ensure_directory};

/// Builds the image root in a plain directory.
///
/// Nothing is mounted, so bootloader approaches that need a drive cannot be
/// used with this target.
pub struct DirectoryTarget {
    path: Utf8PathBuf,
    executor: Arc<dyn CommandExecutor>,
}

impl DirectoryTarget {
    pub fn new(path: &Utf8Path, executor: Arc<dyn CommandExecutor>) -> Self {
        Self {
            path: path.to_owned(),
            executor,
        }
    }
}

impl TargetFilesystem for DirectoryTarget {
    fn describe(&self) -> String {
        format!("directory {}", self.path)
    }

    fn required_commands(&self) -> Vec<String> {
        Vec::new()
    }

    fn prepare(&mut self) -> Result<Utf8PathBuf> {
        let path = absolute(&self.path)?;
        if self.executor.is_dry_run() {
            info!("would create directory {}", path);
        } else {
            ensure_directory(&path)?;
        }
        Ok(path)
    }

    fn drive(&self) -> Option<&Utf8Path> {
        None
    }

    fn root_partition(&self) -> Option<&Utf8Path> {
        None
    }

    fn fstab_entries(&self) -> Vec<String> {
        Vec::new()
    }

    fn finalize(&mut self) -> Result<()> {
        Ok(())
    }
}
