//! Error types for slice extraction, rendering and configuration.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Guidance shown when a well-formed document contains no slices.
pub const NO_SLICES_GUIDANCE: &str = "\
No slices were found in this SVG file. Add a layer labelled \"slices\" and draw
rectangles on it covering the areas that should be saved as slices. Making the
rectangles translucent helps while drawing them.

Name each slice through the \"id\" attribute (Inkscape's XML editor, Ctrl+Shift+X);
that name is reflected in the slice filenames. Use the same editor to set the
optional \"hotspot\" (\"x y\" at size 24) and \"symlinks\" (space separated alias
names) attributes.

Remember to HIDE the slices layer before exporting, so the rectangles themselves
are not drawn in the rendered images.";

/// Errors raised while scanning a document for slices.
///
/// All of these abort extraction before any rendering starts.
#[derive(Debug, Error)]
pub enum SliceError {
    #[error(
        "coordinate `{value}` in attribute `{attribute}` of <{element}> [line {line}, col {column}] \
         has unrecognised units; only px, pt, cm, mm, in and % are supported"
    )]
    UnsupportedUnit {
        value: String,
        attribute: String,
        element: String,
        line: usize,
        column: usize,
    },

    #[error("slice <{element}> at [line {line}, col {column}] has no `id` attribute")]
    MissingIdentifier {
        element: String,
        line: usize,
        column: usize,
    },

    #[error("slice `{name}` is declared again at [line {line}, col {column}]; slice ids must be unique")]
    DuplicateIdentifier {
        name: String,
        line: usize,
        column: usize,
    },

    #[error("slice `{name}` has negative `{attribute}` {value} [line {line}, col {column}]")]
    NegativeDimension {
        name: String,
        attribute: String,
        value: f64,
        line: usize,
        column: usize,
    },

    #[error("slice `{name}` is missing the required `{attribute}` attribute")]
    MissingAttribute { name: String, attribute: String },

    #[error("slice `{name}` has malformed hotspot `{value}`; expected two integers such as \"4 7\"")]
    InvalidHotspot { name: String, value: String },

    #[error("error parsing SVG document: {message} [line {line}, col {column}]")]
    DocumentParse {
        message: String,
        line: usize,
        column: usize,
    },

    #[error("{}", NO_SLICES_GUIDANCE)]
    NoSlicesFound,

    #[error("IO error when reading `{}`", .0.display())]
    Io(PathBuf, #[source] std::io::Error),
}

/// Errors raised by a single render job.
///
/// Only [`RenderError::DestinationExists`] is recoverable; everything else
/// stops the pipeline.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("export file `{}` already exists", .0.display())]
    DestinationExists(PathBuf),

    #[error("failed to claim export file `{}`", path.display())]
    ClaimDestination {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("rasterizer failed to render slice `{region}` at size {size}: {reason} (command: {command})")]
    RenderFailed {
        region: String,
        size: u32,
        command: String,
        reason: String,
    },

    #[error("rasterizer timed out after {timeout:?} rendering slice `{region}` at size {size}")]
    RenderTimeout {
        region: String,
        size: u32,
        timeout: Duration,
    },

    #[error("slice `{name}` has malformed hotspot `{value}`")]
    InvalidHotspot { name: String, value: String },

    #[error("failed to append to hotspots file `{}`", path.display())]
    HotspotWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("render worker panicked: {0}")]
    WorkerPanicked(String),
}

impl RenderError {
    /// Whether this error must halt the whole pipeline run.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, RenderError::DestinationExists(_))
    }
}

/// Invalid build configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("at least one cursor size is required")]
    NoSizes,

    #[error("cursor sizes must be positive, got {0}")]
    InvalidSize(u32),

    #[error("concurrency must be at least 1")]
    ZeroConcurrency,

    #[error("render timeout must be greater than zero")]
    ZeroTimeout,
}
