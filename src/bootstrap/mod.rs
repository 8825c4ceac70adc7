//! Root filesystem population.
//!
//! This module provides the trait and implementation for filling an empty
//! root filesystem with a distribution's base system (e.g. unpacking a
//! Gentoo stage3 tarball).

use anyhow::Result;
use camino::Utf8Path;

use crate::distro::Architecture;

mod args;
pub mod stage3;

pub use args::{CommandArgsBuilder, FlagValueStyle};
pub use stage3::{Stage3Populator, Stage3Release, Stage3Source};

/// Trait for root population implementations.
///
/// Each populator downloads and unpacks whatever its distribution uses as a
/// base system. Implementations must be `Send + Sync` so strategies holding
/// them can be shared.
pub trait RootPopulator: Send + Sync {
    /// Returns the name of this populator for logging.
    fn name(&self) -> &str;

    /// Host binaries needed by [`populate`](Self::populate).
    fn required_commands(&self) -> Vec<String>;

    /// Populates the root filesystem mounted at `mountpoint`.
    fn populate(&self, mountpoint: &Utf8Path, architecture: Architecture) -> Result<()>;
}
