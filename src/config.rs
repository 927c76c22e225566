//! Build configuration.

use crate::error::ConfigError;
use crate::hotspot::BASE_SIZE;
use crate::pipeline::DEFAULT_CONCURRENCY;
use crate::rasterizer::DEFAULT_RENDER_TIMEOUT;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;

/// Which backend renders the slices.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum RasterizerKind {
    #[default]
    Inkscape,
    Resvg,
}

impl fmt::Display for RasterizerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RasterizerKind::Inkscape => write!(f, "inkscape"),
            RasterizerKind::Resvg => write!(f, "resvg"),
        }
    }
}

/// Settings for building cursor themes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildConfig {
    /// Cursor sizes to render; 24 is the hotspot base size.
    pub sizes: Vec<u32>,
    /// Prefix applied to every rendered slice filename.
    pub prefix: String,
    /// Maximum number of renders in flight.
    pub concurrency: usize,
    /// Bound on a single render.
    #[serde(with = "duration_secs")]
    pub render_timeout: Duration,
    pub rasterizer: RasterizerKind,
    /// Program used by the inkscape backend.
    pub inkscape: PathBuf,
    /// Program that compiles hotspot files into X11 cursors.
    pub xcursorgen: PathBuf,
    /// Directory scanned for theme `.svg` files.
    pub themes_dir: PathBuf,
    pub build_root: PathBuf,
    pub dist_root: PathBuf,
    /// Keep the build directory after a successful build.
    pub keep_tmp: bool,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            sizes: vec![BASE_SIZE],
            prefix: String::new(),
            concurrency: DEFAULT_CONCURRENCY,
            render_timeout: DEFAULT_RENDER_TIMEOUT,
            rasterizer: RasterizerKind::default(),
            inkscape: PathBuf::from("inkscape"),
            xcursorgen: PathBuf::from("xcursorgen"),
            themes_dir: PathBuf::from("./themes"),
            build_root: PathBuf::from("./build"),
            dist_root: PathBuf::from("./dist"),
            keep_tmp: false,
        }
    }
}

impl BuildConfig {
    /// Checks the configuration and removes duplicate sizes, keeping the
    /// first occurrence of each.
    pub fn validate(&mut self) -> Result<(), ConfigError> {
        if self.sizes.is_empty() {
            return Err(ConfigError::NoSizes);
        }
        if let Some(&size) = self.sizes.iter().find(|&&s| s == 0) {
            return Err(ConfigError::InvalidSize(size));
        }
        if self.concurrency == 0 {
            return Err(ConfigError::ZeroConcurrency);
        }
        if self.render_timeout.is_zero() {
            return Err(ConfigError::ZeroTimeout);
        }

        let mut seen = Vec::with_capacity(self.sizes.len());
        self.sizes.retain(|size| {
            if seen.contains(size) {
                false
            } else {
                seen.push(*size);
                true
            }
        });

        if !self.sizes.contains(&BASE_SIZE) {
            warn!(
                "Size {} is not in {:?}; symlink directives are only produced at that size",
                BASE_SIZE, self.sizes
            );
        }
        Ok(())
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}
