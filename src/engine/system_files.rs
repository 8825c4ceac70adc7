//! Small configuration files written directly into the target.

use camino::Utf8Path;
use serde::Serialize;
use tracing::info;

use crate::error::RsimgstrapError;
use crate::fsutil::{ensure_directory, path_in_root, write_file};

const GENERATED_HEADER: &str = "# generated by rsimgstrap";

/// Cloud-init datasource selection, rendered as YAML.
#[derive(Debug, Serialize)]
struct DatasourceConfig<'a> {
    datasource_list: &'a [String],
}

/// Renders the cloud-init datasource configuration.
pub fn render_datasource_config(datasources: &[String]) -> Result<String, RsimgstrapError> {
    let yaml = serde_yaml::to_string(&DatasourceConfig {
        datasource_list: datasources,
    })
    .map_err(|e| RsimgstrapError::Config(format!("failed to render datasource config: {}", e)))?;
    Ok(format!("{}\n{}", GENERATED_HEADER, yaml))
}

/// Renders `/etc/fstab` from `entries`.
pub fn render_fstab(entries: &[String]) -> String {
    let mut content = format!("{}\n", GENERATED_HEADER);
    for entry in entries {
        content.push_str(entry);
        content.push('\n');
    }
    content
}

/// Writes `content` to the in-target path `absolute`, creating parent directories.
pub fn write_target_file(
    mountpoint: &Utf8Path,
    absolute: &str,
    content: &str,
    dry_run: bool,
) -> Result<(), RsimgstrapError> {
    let path = path_in_root(mountpoint, absolute);
    if dry_run {
        info!("would write {}", path);
        return Ok(());
    }
    if let Some(parent) = path.parent() {
        ensure_directory(parent)?;
    }
    write_file(&path, content)?;
    info!("wrote {}", path);
    Ok(())
}
