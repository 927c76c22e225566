//! Hotspot extrapolation and per-cursor hotspot files.
//!
//! Hotspots are authored once, at [`BASE_SIZE`], and scaled to every other
//! rendered size. Each cursor gets one `<cursor>.cursor` file listing one
//! line per rendered image, in the format `xcursorgen` reads:
//!
//! ```text
//! <size> <x> <y> <image path> [<delay>]
//! ```

use dashmap::DashMap;
use std::cmp::Ordering;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::debug;

/// Size at which hotspots and symlinks are authored.
pub const BASE_SIZE: u32 = 24;

/// Trailing token on lines for numbered animation frames.
pub const FRAME_PRIORITY: &str = "60";

/// Scales a base-size hotspot to `size`.
///
/// Identity at [`BASE_SIZE`]. Otherwise each coordinate is
/// `x * size / BASE_SIZE`, rounded half to even (`1.5 -> 2`, `4.5 -> 4`).
/// The division is exact integer arithmetic, so no float drift can move a
/// coordinate across a rounding boundary. Results outside `i32` saturate.
pub fn extrapolate(base: (i32, i32), size: u32) -> (i32, i32) {
    if size == BASE_SIZE {
        return base;
    }
    (scale(base.0, size), scale(base.1, size))
}

fn scale(value: i32, size: u32) -> i32 {
    let numerator = i64::from(value) * i64::from(size);
    let denominator = i64::from(BASE_SIZE);
    let quotient = numerator.div_euclid(denominator);
    let twice_remainder = 2 * numerator.rem_euclid(denominator);

    let rounded = match twice_remainder.cmp(&denominator) {
        Ordering::Less => quotient,
        Ordering::Greater => quotient + 1,
        Ordering::Equal if quotient % 2 == 0 => quotient,
        Ordering::Equal => quotient + 1,
    };
    i32::try_from(rounded).unwrap_or(if rounded < 0 { i32::MIN } else { i32::MAX })
}

/// One line of a hotspot file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HotspotLine {
    pub size: u32,
    pub x: i32,
    pub y: i32,
    pub file_path: PathBuf,
    pub priority: Option<&'static str>,
}

impl fmt::Display for HotspotLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {}",
            self.size,
            self.x,
            self.y,
            self.file_path.display()
        )?;
        if let Some(priority) = self.priority {
            write!(f, " {}", priority)?;
        }
        Ok(())
    }
}

/// Append-only hotspot files, one per cursor name.
///
/// Appends to the same cursor are serialized; appends to different cursors
/// proceed in parallel.
pub struct HotspotFiles {
    dir: PathBuf,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl HotspotFiles {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            locks: DashMap::new(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the hotspot file for `cursor_name`.
    pub fn path_for(&self, cursor_name: &str) -> PathBuf {
        self.dir.join(format!("{}.cursor", cursor_name))
    }

    /// Appends `line` to the cursor's hotspot file, creating it if absent.
    ///
    /// # Returns
    ///
    /// The path of the file written.
    pub async fn append(&self, cursor_name: &str, line: &HotspotLine) -> std::io::Result<PathBuf> {
        let lock = self
            .locks
            .entry(cursor_name.to_string())
            .or_default()
            .value()
            .clone();
        let _guard = lock.lock().await;

        let path = self.path_for(cursor_name);
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        file.write_all(format!("{}\n", line).as_bytes()).await?;
        file.flush().await?;

        debug!("Wrote hotspot \"{}\" to {}", line, path.display());
        Ok(path)
    }
}

/// Sorts a hotspot file in place by size, then by the rest of the line.
pub fn sort_hotspot_file(path: &Path) -> std::io::Result<()> {
    let content = std::fs::read_to_string(path)?;
    let mut lines: Vec<&str> = content.lines().filter(|l| !l.trim().is_empty()).collect();
    lines.sort_by_key(|line| {
        let (size, rest) = line.split_once(" ").unwrap_or((*line, ""));
        (size.parse::<u32>().unwrap_or(u32::MAX), rest.to_string())
    });

    let mut sorted = lines.join("\n");
    sorted.push('\n');
    std::fs::write(path, sorted)
}
