//! Slice records and the names derived from them.

use crate::error::SliceError;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::LazyLock;

/// Trailing `-<digits>` animation frame suffix.
static FRAME_SUFFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"-[0-9]+$").expect("frame suffix pattern is valid"));

/// Axis-aligned rectangle in document coordinates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
}

impl Rect {
    pub fn new(x1: f64, y1: f64, x2: f64, y2: f64) -> Self {
        Self { x1, y1, x2, y2 }
    }

    /// Builds a rectangle from its origin and extent.
    pub fn from_origin_size(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self::new(x, y, x + width, y + height)
    }

    pub fn width(&self) -> f64 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f64 {
        self.y2 - self.y1
    }
}

/// A named rectangular region of the source document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Slice {
    pub rect: Rect,
    pub name: String,
    /// Raw `"x y"` hotspot at the base size.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hotspot: Option<String>,
    /// Raw space separated alias names.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub symlinks: Option<String>,
}

impl Slice {
    pub fn new(rect: Rect, name: impl Into<String>) -> Self {
        Self {
            rect,
            name: name.into(),
            hotspot: None,
            symlinks: None,
        }
    }

    pub fn with_hotspot(mut self, hotspot: impl Into<String>) -> Self {
        self.hotspot = Some(hotspot.into());
        self
    }

    pub fn with_symlinks(mut self, symlinks: impl Into<String>) -> Self {
        self.symlinks = Some(symlinks.into());
        self
    }

    /// Parses the raw hotspot attribute.
    ///
    /// Returns `Ok(None)` when the slice declares no hotspot.
    ///
    /// # Errors
    ///
    /// [`SliceError::InvalidHotspot`] unless the value is exactly two integers.
    pub fn hotspot_coordinates(&self) -> Result<Option<(i32, i32)>, SliceError> {
        let Some(raw) = self.hotspot.as_deref() else {
            return Ok(None);
        };

        let invalid = || SliceError::InvalidHotspot {
            name: self.name.clone(),
            value: raw.to_string(),
        };

        let mut tokens = raw.split_whitespace();
        let (Some(x), Some(y), None) = (tokens.next(), tokens.next(), tokens.next()) else {
            return Err(invalid());
        };
        let x = x.parse::<i32>().map_err(|_| invalid())?;
        let y = y.parse::<i32>().map_err(|_| invalid())?;
        Ok(Some((x, y)))
    }

    /// Alias names declared by the slice; empty when none.
    pub fn aliases(&self) -> Vec<String> {
        self.symlinks
            .as_deref()
            .map(|s| s.split_whitespace().map(str::to_string).collect())
            .unwrap_or_default()
    }

    /// Logical cursor this slice belongs to.
    pub fn cursor_name(&self) -> &str {
        cursor_name(&self.name)
    }

    /// Whether this slice is one numbered frame of an animated cursor.
    pub fn is_frame(&self) -> bool {
        self.cursor_name() != self.name
    }
}

/// Strips a trailing `-<digits>` frame suffix: `"wait-05"` becomes `"wait"`.
pub fn cursor_name(slice_name: &str) -> &str {
    match FRAME_SUFFIX.find(slice_name) {
        Some(m) => &slice_name[..m.start()],
        None => slice_name,
    }
}

/// Alias names that should resolve to a rendered cursor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymlinkDirective {
    pub source: String,
    pub aliases: Vec<String>,
}

impl SymlinkDirective {
    /// Parses `"<source> <alias> <alias>..."`.
    pub fn parse(line: &str) -> Option<Self> {
        let mut tokens = line.split_whitespace();
        let source = tokens.next()?.to_string();
        let aliases: Vec<String> = tokens.map(str::to_string).collect();
        if aliases.is_empty() {
            return None;
        }
        Some(Self { source, aliases })
    }
}

impl fmt::Display for SymlinkDirective {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.source, self.aliases.join(" "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cursor_name_strips_frame_suffix() {
        assert_eq!(cursor_name("wait-05"), "wait");
        assert_eq!(cursor_name("pointer"), "pointer");
        assert_eq!(cursor_name("progress-1-12"), "progress-1");
        assert_eq!(cursor_name("top-left"), "top-left");
        assert_eq!(cursor_name("size-"), "size-");
    }

    #[test]
    fn test_hotspot_coordinates() {
        let slice = Slice::new(Rect::default(), "pointer").with_hotspot(" 4  7 ");
        assert_eq!(slice.hotspot_coordinates().unwrap(), Some((4, 7)));

        let none = Slice::new(Rect::default(), "pointer");
        assert_eq!(none.hotspot_coordinates().unwrap(), None);

        for bad in ["4", "4 7 9", "4.5 7", "a b"] {
            let slice = Slice::new(Rect::default(), "pointer").with_hotspot(bad);
            assert!(matches!(
                slice.hotspot_coordinates(),
                Err(SliceError::InvalidHotspot { .. })
            ));
        }
    }

    #[test]
    fn test_frame_detection() {
        assert!(Slice::new(Rect::default(), "wait-01").is_frame());
        assert!(!Slice::new(Rect::default(), "wait").is_frame());
    }

    #[test]
    fn test_symlink_directive_format() {
        let directive = SymlinkDirective {
            source: "pointer".to_string(),
            aliases: vec!["default".to_string(), "left_ptr".to_string()],
        };
        assert_eq!(directive.to_string(), "pointer default left_ptr");
        assert_eq!(SymlinkDirective::parse("pointer default left_ptr"), Some(directive));
        assert_eq!(SymlinkDirective::parse("pointer"), None);
    }

    #[test]
    fn test_rect_extent() {
        let rect = Rect::from_origin_size(10.0, 20.0, 24.0, 32.0);
        assert_eq!(rect.x2, 34.0);
        assert_eq!(rect.height(), 32.0);
    }
}
