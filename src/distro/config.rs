//! Distribution configuration enum.

use anyhow::Result;
use serde::Deserialize;
use strum::{Display, EnumIter, IntoEnumIterator};

use super::gentoo::{GentooConfig, GentooStrategy};
use super::{DistroStrategy, StrategyContext};
use crate::error::RsimgstrapError;

/// Distribution configuration.
///
/// This enum represents the distributions an image can be built from.
/// The `type` field in YAML determines which variant is used.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum DistroConfig {
    /// Gentoo, populated from a stage3 tarball
    Gentoo(GentooConfig),
}

impl DistroConfig {
    pub fn kind(&self) -> DistroKind {
        match self {
            DistroConfig::Gentoo(_) => DistroKind::Gentoo,
        }
    }

    /// Constructs the strategy for this distribution.
    pub fn as_strategy(&self, ctx: &StrategyContext) -> Result<Box<dyn DistroStrategy>> {
        match self {
            DistroConfig::Gentoo(cfg) => Ok(Box::new(GentooStrategy::new(cfg, ctx)?)),
        }
    }

    pub fn validate(&self) -> Result<(), RsimgstrapError> {
        match self {
            DistroConfig::Gentoo(cfg) => cfg.validate(),
        }
    }
}

/// Every supported distribution, for listing and shell completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumIter)]
#[strum(serialize_all = "lowercase")]
pub enum DistroKind {
    Gentoo,
}

impl DistroKind {
    /// Profile key, identical to the `type` tag of [`DistroConfig`].
    pub fn key(self) -> String {
        self.to_string()
    }

    pub fn name_long(self) -> &'static str {
        match self {
            DistroKind::Gentoo => "Gentoo Linux",
        }
    }

    pub fn all() -> Vec<DistroKind> {
        DistroKind::iter().collect()
    }
}
