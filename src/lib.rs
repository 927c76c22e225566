//! Cursor Slicer Library
//!
//! Turns an Inkscape SVG holding every cursor of a theme into per-size PNG
//! slices, hotspot files and an installable X11 cursor theme.
//!
//! ## Module Overview
//!
//! - `units`: SVG coordinate parsing
//! - `slice`: Slice rectangles, names and symlink directives
//! - `extract`: Streaming extraction of slices from the "slices" layer
//! - `hotspot`: Hotspot scaling and per-cursor hotspot files
//! - `rasterizer`: Rendering backends (Inkscape subprocess, in-process resvg)
//! - `job`: One slice rendered at one size
//! - `pipeline`: Bounded-concurrency scheduler for the job matrix
//! - `layout`: Build and distribution directory layout
//! - `theme`: Cursor compilation, theme files and symlinks
//! - `config`: Build configuration
//! - `telemetry`: OpenTelemetry integration and structured logging
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use cursor_slicer::{
//!     extract::extract_slices,
//!     layout::ThemeLayout,
//!     pipeline::Scheduler,
//!     rasterizer::ResvgRasterizer,
//! };
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let svg = std::fs::read_to_string("themes/Default.svg")?;
//!     let document = extract_slices(&svg)?;
//!
//!     let layout = Arc::new(ThemeLayout::new(Path::new("build"), Path::new("dist"), "Default"));
//!     layout.prepare(&[24, 32], Path::new("themes/Default.svg"))?;
//!
//!     let mut scheduler = Scheduler::new(Arc::new(ResvgRasterizer::default()), layout, 4);
//!     let report = scheduler.run(document.slices, &[24, 32], "").await?;
//!     println!("rendered {} images", report.rendered);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod extract;
pub mod hotspot;
pub mod job;
pub mod layout;
pub mod pipeline;
pub mod rasterizer;
pub mod slice;
pub mod telemetry;
pub mod theme;
pub mod units;
