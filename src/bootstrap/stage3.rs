//! Gentoo stage3 root population.
//!
//! Downloads a stage3 tarball and a Portage repository snapshot from a
//! Gentoo mirror into the cache directory, then unpacks both into the
//! target root. The stage3 release is either pinned by build id or resolved
//! from the mirror's `latest-stage3-<arch>-openrc.txt` index; a resolved
//! release older than `max_age_days` is rejected as a stale mirror.

use std::fs;
use std::sync::{Arc, LazyLock, OnceLock};

use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use regex::Regex;
use time::macros::format_description;
use time::{Date, OffsetDateTime, PrimitiveDateTime};
use tracing::{debug, info};
use url::Url;

use super::{CommandArgsBuilder, FlagValueStyle, RootPopulator};
use crate::distro::Architecture;
use crate::error::RsimgstrapError;
use crate::executor::{CommandExecutor, CommandSpec, check_call};
use crate::fsutil::{ensure_directory, ensure_real_directory, path_in_root, replace_file};
use crate::messenger::Messenger;

const COMMAND_CURL: &str = "curl";
const COMMAND_TAR: &str = "tar";

/// In-target location of the Gentoo ebuild repository.
pub const REPOSITORY_PATH: &str = "/var/db/repos/gentoo";

const PARTIAL_SUFFIX: &str = ".part";

/// Entry line of a `latest-stage3-*.txt` index: `<id>/<file> <size>`.
static INDEX_ENTRY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d{8}T\d{6}Z)/(stage3-\S+\.tar\.\w+)\s+\d+\s*$")
        .unwrap_or_else(|e| panic!("invalid index regex: {e}"))
});

/// Where stage3 and snapshot artifacts come from.
#[derive(Debug, Clone)]
pub struct Stage3Source {
    pub mirror_url: Url,
    /// Maximum age of a resolved (non-pinned) stage3 release.
    pub max_age_days: u32,
    /// Pinned stage3 build id; resolved from the mirror index when absent.
    pub stage3: Option<String>,
    /// Pinned repository snapshot date (`YYYY-MM-DD`); latest when absent.
    pub repository_date: Option<String>,
}

/// A concrete stage3 tarball on the mirror.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stage3Release {
    pub build_id: String,
    pub file_name: String,
}

impl Stage3Release {
    /// Release for a pinned build id.
    pub fn pinned(architecture: Architecture, build_id: &str) -> Self {
        Self {
            build_id: build_id.to_string(),
            file_name: format!("stage3-{}-openrc-{}.tar.xz", architecture, build_id),
        }
    }
}

/// Parses the first release entry of a `latest-stage3-*.txt` index.
///
/// Comment lines and PGP armor around the entry are ignored.
pub fn parse_latest_index(content: &str) -> Result<Stage3Release, RsimgstrapError> {
    content
        .lines()
        .find_map(|line| INDEX_ENTRY_RE.captures(line.trim_end()))
        .map(|caps| Stage3Release {
            build_id: caps[1].to_string(),
            file_name: caps[2].to_string(),
        })
        .ok_or_else(|| {
            RsimgstrapError::Validation("no stage3 release entry found in mirror index".to_string())
        })
}

/// Parses the UTC timestamp of a build id such as `20240101T170309Z`.
pub fn parse_build_id(build_id: &str) -> Result<PrimitiveDateTime, RsimgstrapError> {
    PrimitiveDateTime::parse(
        build_id,
        format_description!("[year][month][day]T[hour][minute][second]Z"),
    )
    .map_err(|e| {
        RsimgstrapError::Validation(format!(
            "stage3 must be a build id like 20240101T170309Z, got '{}': {}",
            build_id, e
        ))
    })
}

/// Returns the age in days of `release` on `today`.
pub fn release_age_days(release: &Stage3Release, today: Date) -> Result<i64, RsimgstrapError> {
    let released = parse_build_id(&release.build_id)?.date();
    Ok((today - released).whole_days())
}

/// Converts `YYYY-MM-DD` into the `YYYYMMDD` form used in snapshot names.
pub fn snapshot_name(repository_date: Option<&str>) -> String {
    match repository_date {
        Some(date) => format!("portage-{}.tar.xz", date.replace('-', "")),
        None => "portage-latest.tar.xz".to_string(),
    }
}

/// Root populator that unpacks a Gentoo stage3 and repository snapshot.
pub struct Stage3Populator {
    executor: Arc<dyn CommandExecutor>,
    messenger: Arc<dyn Messenger>,
    cache_dir: Utf8PathBuf,
    resolv_conf: Utf8PathBuf,
    source: Stage3Source,
    release: OnceLock<Stage3Release>,
}

impl Stage3Populator {
    pub fn new(
        executor: Arc<dyn CommandExecutor>,
        messenger: Arc<dyn Messenger>,
        cache_dir: &Utf8Path,
        resolv_conf: &Utf8Path,
        source: Stage3Source,
    ) -> Self {
        Self {
            executor,
            messenger,
            cache_dir: cache_dir.to_owned(),
            resolv_conf: resolv_conf.to_owned(),
            source,
            release: OnceLock::new(),
        }
    }

    fn mirror_base(&self) -> &str {
        self.source.mirror_url.as_str().trim_end_matches('/')
    }

    fn autobuilds_url(&self, architecture: Architecture) -> String {
        format!("{}/releases/{}/autobuilds", self.mirror_base(), architecture)
    }

    fn snapshot_url(&self) -> String {
        format!(
            "{}/snapshots/{}",
            self.mirror_base(),
            snapshot_name(self.source.repository_date.as_deref())
        )
    }

    /// Builds `curl --fail --location --output <dest> <url>`.
    pub fn download_spec(url: &str, destination: &Utf8Path) -> CommandSpec {
        let mut args = CommandArgsBuilder::new();
        args.push_flag("--fail");
        args.push_flag("--location");
        args.push_flag("--silent");
        args.push_flag("--show-error");
        args.push_flag_value("--output", destination.as_str(), FlagValueStyle::Separate);
        args.push_arg(url);
        CommandSpec::new(COMMAND_CURL, args.into_args())
    }

    /// Builds the `tar` invocation unpacking `archive` into `directory`.
    pub fn unpack_spec(
        archive: &Utf8Path,
        directory: &Utf8Path,
        strip_components: Option<u32>,
    ) -> CommandSpec {
        let mut args = CommandArgsBuilder::new();
        args.push_flag("--extract");
        args.push_flag("--preserve-permissions");
        args.push_flag_value("--xattrs-include", "*.*", FlagValueStyle::Equals);
        args.push_flag("--numeric-owner");
        args.push_flag_opt("--strip-components", strip_components, FlagValueStyle::Equals);
        args.push_flag_value("--file", archive.as_str(), FlagValueStyle::Separate);
        args.push_flag_value("--directory", directory.as_str(), FlagValueStyle::Separate);
        CommandSpec::new(COMMAND_TAR, args.into_args())
    }

    /// Downloads `url` to `<destination>.part` and renames it into place, so
    /// an interrupted transfer never leaves a truncated `destination`.
    fn download(&self, url: &str, destination: &Utf8Path) -> Result<()> {
        info!("downloading {}", url);
        let partial = Utf8PathBuf::from(format!("{}{}", destination, PARTIAL_SUFFIX));
        check_call(self.executor.as_ref(), &Self::download_spec(url, &partial))
            .with_context(|| format!("failed to download {}", url))?;
        if !self.executor.is_dry_run() {
            fs::rename(&partial, destination).map_err(|e| {
                RsimgstrapError::io(format!("failed to move {} to {}", partial, destination), e)
            })?;
        }
        Ok(())
    }

    fn download_cached(&self, url: &str, destination: &Utf8Path) -> Result<()> {
        if destination.is_file() {
            info!("using cached {}", destination);
            return Ok(());
        }
        self.download(url, destination)
    }

    /// Returns the release to install, resolving and memoizing it on first use.
    pub fn release(&self, architecture: Architecture) -> Result<Stage3Release> {
        if let Some(release) = self.release.get() {
            return Ok(release.clone());
        }
        let release = self.resolve_release(architecture)?;
        Ok(self.release.get_or_init(|| release).clone())
    }

    fn resolve_release(&self, architecture: Architecture) -> Result<Stage3Release> {
        if let Some(build_id) = &self.source.stage3 {
            debug!("using pinned stage3 build {}", build_id);
            return Ok(Stage3Release::pinned(architecture, build_id));
        }

        let index_name = format!("latest-stage3-{}-openrc.txt", architecture);
        let index_path = self.cache_dir.join(&index_name);
        let index_url = format!("{}/{}", self.autobuilds_url(architecture), index_name);
        self.download(&index_url, &index_path)?;

        if self.executor.is_dry_run() {
            self.messenger
                .warn("dry run: stage3 release not resolved, showing placeholder build id");
            return Ok(Stage3Release::pinned(architecture, "latest"));
        }

        let content = fs::read_to_string(&index_path)
            .map_err(|e| RsimgstrapError::io(format!("failed to read {}", index_path), e))?;
        let release = parse_latest_index(&content)?;

        let age = release_age_days(&release, OffsetDateTime::now_utc().date())?;
        if age > i64::from(self.source.max_age_days) {
            return Err(RsimgstrapError::Validation(format!(
                "latest stage3 release {} is {} days old, over max_age_days={} (stale mirror?)",
                release.build_id, age, self.source.max_age_days
            ))
            .into());
        }
        info!("resolved stage3 release {} ({} days old)", release.build_id, age);
        Ok(release)
    }
}

impl RootPopulator for Stage3Populator {
    fn name(&self) -> &str {
        "stage3"
    }

    fn required_commands(&self) -> Vec<String> {
        vec![COMMAND_CURL.to_string(), COMMAND_TAR.to_string()]
    }

    fn populate(&self, mountpoint: &Utf8Path, architecture: Architecture) -> Result<()> {
        let dry_run = self.executor.is_dry_run();
        if !dry_run {
            ensure_directory(&self.cache_dir)?;
        }

        let release = self.release(architecture)?;
        self.messenger.info(&format!(
            "Unpacking stage3 {} into \"{}\"...",
            release.build_id, mountpoint
        ));
        let tarball = self.cache_dir.join(&release.file_name);
        self.download_cached(
            &format!(
                "{}/{}/{}",
                self.autobuilds_url(architecture),
                release.build_id,
                release.file_name
            ),
            &tarball,
        )?;
        check_call(self.executor.as_ref(), &Self::unpack_spec(&tarball, mountpoint, None))
            .context("failed to unpack stage3 tarball")?;

        let snapshot = self
            .cache_dir
            .join(snapshot_name(self.source.repository_date.as_deref()));
        if self.source.repository_date.is_some() {
            self.download_cached(&self.snapshot_url(), &snapshot)?;
        } else {
            self.download(&self.snapshot_url(), &snapshot)?;
        }
        let repository = path_in_root(mountpoint, REPOSITORY_PATH);
        if !dry_run {
            ensure_directory(&repository)?;
        }
        self.messenger.info("Unpacking Portage repository snapshot...");
        check_call(self.executor.as_ref(), &Self::unpack_spec(&snapshot, &repository, Some(1)))
            .context("failed to unpack repository snapshot")?;

        // The stage3 ships its own /etc; resolution inside the chroot needs the host's.
        if !dry_run {
            let etc = path_in_root(mountpoint, "/etc");
            ensure_directory(&etc)?;
            ensure_real_directory(&etc)?;
            replace_file(&self.resolv_conf, &etc.join("resolv.conf"))?;
        }

        Ok(())
    }
}
