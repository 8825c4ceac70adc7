//! Portage per-package configuration files.
//!
//! Use flags and keywords are declared one file per package below
//! `/etc/portage/package.use` and `/etc/portage/package.keywords`. The file
//! name is the package name with every `/` replaced by `--`, and each write
//! replaces the whole file.

use camino::{Utf8Path, Utf8PathBuf};
use tracing::{debug, info};

use crate::error::RsimgstrapError;
use crate::fsutil::{path_in_root, write_file};

/// In-target directory holding per-package use flags.
pub const PACKAGE_USE_DIR: &str = "/etc/portage/package.use";
/// In-target directory holding per-package keywords.
pub const PACKAGE_KEYWORDS_DIR: &str = "/etc/portage/package.keywords";

const GENERATED_HEADER: &str = "# generated by rsimgstrap";

/// Returns the file name used for `package` (e.g. `sys-boot--grub`).
pub fn package_file_name(package: &str) -> String {
    package.replace('/', "--")
}

/// Renders the content of a per-package file.
pub fn render_declaration(package: &str, value: &str) -> String {
    format!("{}\n{} {}\n", GENERATED_HEADER, package, value)
}

/// Writer for per-package Portage declarations inside a target root.
#[derive(Debug, Clone)]
pub struct PortageConfig {
    root: Utf8PathBuf,
    dry_run: bool,
}

impl PortageConfig {
    pub fn new(root: &Utf8Path, dry_run: bool) -> Self {
        Self {
            root: root.to_owned(),
            dry_run,
        }
    }

    /// Path of the declaration file for `package` below `dir`.
    pub fn declaration_path(&self, dir: &str, package: &str) -> Utf8PathBuf {
        path_in_root(&self.root, dir).join(package_file_name(package))
    }

    /// Declares use flags for `package`.
    pub fn set_package_use_flags(&self, package: &str, flags: &str) -> Result<(), RsimgstrapError> {
        self.write(PACKAGE_USE_DIR, package, flags)
    }

    /// Declares keywords for `package`.
    pub fn set_package_keywords(
        &self,
        package: &str,
        keywords: &str,
    ) -> Result<(), RsimgstrapError> {
        self.write(PACKAGE_KEYWORDS_DIR, package, keywords)
    }

    fn write(&self, dir: &str, package: &str, value: &str) -> Result<(), RsimgstrapError> {
        let path = self.declaration_path(dir, package);
        let content = render_declaration(package, value);
        if self.dry_run {
            info!("would write {}: {}", path, content.lines().last().unwrap_or_default());
            return Ok(());
        }
        debug!("writing {}", path);
        write_file(&path, &content)
    }
}
