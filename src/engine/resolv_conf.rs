//! Temporary resolv.conf inside the target.
//!
//! Name resolution inside the chroot needs the host's resolver
//! configuration while packages are downloaded. The host file is copied
//! into `<mountpoint>/etc/resolv.conf` for the duration of the build, and
//! whatever was there before is moved aside and put back on restore.

use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use tracing::{debug, info};

use crate::error::RsimgstrapError;
use crate::fsutil::{ensure_directory, ensure_real_directory, path_in_root, replace_file};

const BACKUP_SUFFIX: &str = ".rsimgstrap-orig";

/// An injected resolv.conf, restored with [`restore`](Self::restore).
#[derive(Debug)]
pub struct ResolvConfInjection {
    path: Utf8PathBuf,
    backup: Option<Utf8PathBuf>,
    dry_run: bool,
}

impl ResolvConfInjection {
    /// Copies `source` to `<mountpoint>/etc/resolv.conf`, backing up an existing file.
    pub fn inject(
        source: &Utf8Path,
        mountpoint: &Utf8Path,
        dry_run: bool,
    ) -> Result<Self, RsimgstrapError> {
        let etc = path_in_root(mountpoint, "/etc");
        let path = etc.join("resolv.conf");
        if dry_run {
            info!("would copy {} to {}", source, path);
            return Ok(Self {
                path,
                backup: None,
                dry_run,
            });
        }

        ensure_directory(&etc)?;
        ensure_real_directory(&etc)?;

        let backup = if fs::symlink_metadata(&path).is_ok() {
            let backup = Utf8PathBuf::from(format!("{}{}", path, BACKUP_SUFFIX));
            debug!("moving existing {} to {}", path, backup);
            fs::rename(&path, &backup).map_err(|e| {
                RsimgstrapError::io(format!("failed to back up {}", path), e)
            })?;
            Some(backup)
        } else {
            None
        };

        replace_file(source, &path)?;
        info!("copied {} to {}", source, path);
        Ok(Self {
            path,
            backup,
            dry_run,
        })
    }

    /// Removes the injected file and puts any backup back in place.
    pub fn restore(self) -> Result<(), RsimgstrapError> {
        if self.dry_run {
            info!("would restore {}", self.path);
            return Ok(());
        }

        match fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(RsimgstrapError::io(format!("failed to remove {}", self.path), e));
            }
        }
        if let Some(backup) = &self.backup {
            fs::rename(backup, &self.path).map_err(|e| {
                RsimgstrapError::io(format!("failed to restore {} from {}", self.path, backup), e)
            })?;
        }
        debug!("restored {}", self.path);
        Ok(())
    }
}
