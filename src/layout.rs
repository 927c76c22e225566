//! Build and distribution directory layout for one theme.

use regex::Regex;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

static UNSAFE_DIR_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^A-Za-z0-9_-]").expect("directory name pattern is valid"));

/// Working copy of the source document inside the build directory.
pub const SOURCE_FILE: &str = "cursors.svg";
pub const PNGS_DIR: &str = "pngs";
pub const HOTSPOTS_DIR: &str = "hotspots";
pub const CURSORS_DIR: &str = "cursors";

/// Turns a theme name into a directory name: `"Mein Shadowed"` -> `"Mein-Shadowed"`.
pub fn theme_dir_name(theme_name: &str) -> String {
    UNSAFE_DIR_CHARS.replace_all(theme_name, "-").into_owned()
}

/// Where everything for one theme is read from and written to.
///
/// ```text
/// <build_root>/<theme>/cursors.svg
/// <build_root>/<theme>/pngs/<size>/<prefix><slice>.png
/// <build_root>/<theme>/hotspots/<cursor>.cursor
/// <dist_root>/<theme>/cursors/<cursor>
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThemeLayout {
    pub name: String,
    pub build: PathBuf,
    pub dist: PathBuf,
}

impl ThemeLayout {
    pub fn new(build_root: &Path, dist_root: &Path, theme_name: &str) -> Self {
        let dir = theme_dir_name(theme_name);
        Self {
            name: theme_name.to_string(),
            build: build_root.join(&dir),
            dist: dist_root.join(&dir),
        }
    }

    /// Shared source document every render job reads.
    pub fn export_source(&self) -> PathBuf {
        self.build.join(SOURCE_FILE)
    }

    pub fn pngs_dir(&self, size: u32) -> PathBuf {
        self.build.join(PNGS_DIR).join(size.to_string())
    }

    pub fn export_file(&self, slice_name: &str, size: u32, prefix: &str) -> PathBuf {
        self.pngs_dir(size).join(format!("{}{}.png", prefix, slice_name))
    }

    pub fn hotspots_dir(&self) -> PathBuf {
        self.build.join(HOTSPOTS_DIR)
    }

    pub fn hotspots_file(&self, cursor_name: &str) -> PathBuf {
        self.hotspots_dir().join(format!("{}.cursor", cursor_name))
    }

    pub fn cursors_dir(&self) -> PathBuf {
        self.dist.join(CURSORS_DIR)
    }

    pub fn cursor_file(&self, cursor_name: &str) -> PathBuf {
        self.cursors_dir().join(cursor_name)
    }

    /// Removes build and dist trees left by a previous run.
    pub fn clean(&self) -> io::Result<()> {
        for dir in [&self.build, &self.dist] {
            match fs::remove_dir_all(dir) {
                Err(e) if e.kind() != io::ErrorKind::NotFound => return Err(e),
                _ => {}
            }
        }
        Ok(())
    }

    /// Creates per-size image directories and the hotspots directory, and
    /// copies `source` to [`ThemeLayout::export_source`].
    pub fn prepare(&self, sizes: &[u32], source: &Path) -> io::Result<()> {
        for &size in sizes {
            fs::create_dir_all(self.pngs_dir(size))?;
        }
        fs::create_dir_all(self.hotspots_dir())?;
        fs::copy(source, self.export_source())?;
        Ok(())
    }
}
