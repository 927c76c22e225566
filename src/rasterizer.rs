//! Rasterizer backends that turn one slice of the source document into a PNG.
//!
//! Two backends are provided:
//!
//! - [`InkscapeRasterizer`] runs the `inkscape` CLI once per image, exporting
//!   the object selected by the slice id. This matches what the artwork
//!   looks like in Inkscape exactly.
//! - [`ResvgRasterizer`] renders the slice rectangle in-process with resvg,
//!   without any external program.

use crate::error::RenderError;
use crate::slice::Rect;
use async_trait::async_trait;
use dashmap::DashMap;
use resvg::tiny_skia;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Default bound on a single render.
pub const DEFAULT_RENDER_TIMEOUT: Duration = Duration::from_secs(120);

/// Everything a backend needs to render one slice at one size.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderRequest {
    /// Output width and height in pixels.
    pub size: u32,
    /// Id of the slice rectangle in the source document.
    pub region_id: String,
    /// Slice rectangle in document coordinates.
    pub region: Rect,
    /// PNG file to write.
    pub output: PathBuf,
    /// Source SVG document.
    pub source: PathBuf,
}

/// Renders a region of an SVG document to a square PNG.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Rasterizer: Send + Sync {
    /// Renders `request.region_id` at `request.size` into `request.output`.
    ///
    /// # Errors
    ///
    /// - [`RenderError::RenderFailed`] if the backend fails or writes nothing
    /// - [`RenderError::RenderTimeout`] if the render exceeds the backend's bound
    async fn render(&self, request: &RenderRequest) -> Result<(), RenderError>;

    /// Short backend name for logs.
    fn name(&self) -> &'static str;
}

/// Renders through the `inkscape` command line.
///
/// Equivalent to:
///
/// ```text
/// inkscape -w 32 -h 32 -i wait-05 -o build/pngs/32/wait-05.png --export-type=png build/cursors.svg
/// ```
#[derive(Debug, Clone)]
pub struct InkscapeRasterizer {
    program: PathBuf,
    timeout: Duration,
}

impl InkscapeRasterizer {
    pub fn new(program: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            timeout,
        }
    }

    fn args(request: &RenderRequest) -> Vec<OsString> {
        let size = request.size.to_string();
        vec![
            "-w".into(),
            size.clone().into(),
            "-h".into(),
            size.into(),
            "-i".into(),
            request.region_id.clone().into(),
            "-o".into(),
            request.output.clone().into_os_string(),
            "--export-type=png".into(),
            request.source.clone().into_os_string(),
        ]
    }

    fn command_line(&self, args: &[OsString]) -> String {
        let mut line = self.program.display().to_string();
        for arg in args {
            line.push(' ');
            line.push_str(&arg.to_string_lossy());
        }
        line
    }
}

impl Default for InkscapeRasterizer {
    fn default() -> Self {
        Self::new("inkscape", DEFAULT_RENDER_TIMEOUT)
    }
}

#[async_trait]
impl Rasterizer for InkscapeRasterizer {
    async fn render(&self, request: &RenderRequest) -> Result<(), RenderError> {
        let args = Self::args(request);
        let command = self.command_line(&args);
        let failed = |reason: String| RenderError::RenderFailed {
            region: request.region_id.clone(),
            size: request.size,
            command: command.clone(),
            reason,
        };

        debug!("Running: {}", command);

        let child = tokio::process::Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();

        let output = match tokio::time::timeout(self.timeout, child).await {
            Err(_) => {
                return Err(RenderError::RenderTimeout {
                    region: request.region_id.clone(),
                    size: request.size,
                    timeout: self.timeout,
                })
            }
            Ok(Err(e)) => return Err(failed(format!("could not start rasterizer: {}", e))),
            Ok(Ok(output)) => output,
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let last_line = stderr.lines().last().unwrap_or("").trim();
            return Err(failed(format!("{} {}", output.status, last_line)));
        }

        ensure_written(&request.output).map_err(failed)
    }

    fn name(&self) -> &'static str {
        "inkscape"
    }
}

/// Renders the slice rectangle in-process with resvg.
///
/// The slice rectangle is mapped onto an `N x N` pixmap. Source documents
/// are read once and cached for the lifetime of the rasterizer.
pub struct ResvgRasterizer {
    timeout: Duration,
    sources: DashMap<PathBuf, Arc<Vec<u8>>>,
}

impl ResvgRasterizer {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            sources: DashMap::new(),
        }
    }

    fn source_bytes(&self, path: &Path) -> std::io::Result<Arc<Vec<u8>>> {
        if let Some(bytes) = self.sources.get(path) {
            return Ok(bytes.value().clone());
        }
        let bytes = Arc::new(std::fs::read(path)?);
        self.sources.insert(path.to_path_buf(), bytes.clone());
        Ok(bytes)
    }
}

impl Default for ResvgRasterizer {
    fn default() -> Self {
        Self::new(DEFAULT_RENDER_TIMEOUT)
    }
}

#[async_trait]
impl Rasterizer for ResvgRasterizer {
    async fn render(&self, request: &RenderRequest) -> Result<(), RenderError> {
        let failed = |reason: String| RenderError::RenderFailed {
            region: request.region_id.clone(),
            size: request.size,
            command: format!("resvg {}", request.source.display()),
            reason,
        };

        let data = self
            .source_bytes(&request.source)
            .map_err(|e| failed(format!("failed to read source: {}", e)))?;
        let job = request.clone();
        let task = tokio::task::spawn_blocking(move || render_region(&data, &job));

        match tokio::time::timeout(self.timeout, task).await {
            Err(_) => Err(RenderError::RenderTimeout {
                region: request.region_id.clone(),
                size: request.size,
                timeout: self.timeout,
            }),
            Ok(Err(join_error)) => Err(failed(format!("render task failed: {}", join_error))),
            Ok(Ok(result)) => result.map_err(failed),
        }
    }

    fn name(&self) -> &'static str {
        "resvg"
    }
}

fn render_region(data: &[u8], request: &RenderRequest) -> Result<(), String> {
    let region = request.region;
    if region.width() <= 0.0 || region.height() <= 0.0 {
        return Err(format!(
            "invalid slice dimensions: {}x{}",
            region.width(),
            region.height()
        ));
    }

    let tree = usvg::Tree::from_data(data, &usvg::Options::default())
        .map_err(|e| format!("failed to parse SVG: {}", e))?;

    let mut pixmap = tiny_skia::Pixmap::new(request.size, request.size)
        .ok_or_else(|| format!("invalid pixmap size {}", request.size))?;

    // Slice rectangles are in user units; usvg has already applied the root
    // viewBox, so undo it before mapping the rectangle onto the pixmap.
    let to_user = user_space_transform(data, tree.size())?
        .invert()
        .ok_or_else(|| "document viewBox transform is not invertible".to_string())?;

    let sx = request.size as f32 / region.width() as f32;
    let sy = request.size as f32 / region.height() as f32;
    let transform = tiny_skia::Transform::from_row(
        sx,
        0.0,
        0.0,
        sy,
        -(region.x1 as f32) * sx,
        -(region.y1 as f32) * sy,
    )
    .pre_concat(to_user);
    resvg::render(&tree, transform, &mut pixmap.as_mut());

    pixmap
        .save_png(&request.output)
        .map_err(|e| format!("failed to write {}: {}", request.output.display(), e))?;

    info!(
        "Rendered {} at {}px to {}",
        request.region_id,
        request.size,
        request.output.display()
    );
    Ok(())
}

/// Transform from document user units to the pixel space of a parsed tree
/// of `size`, following the root `viewBox` and `preserveAspectRatio`.
///
/// Identity when the root has no usable `viewBox`.
fn user_space_transform(data: &[u8], size: usvg::Size) -> Result<tiny_skia::Transform, String> {
    let text = std::str::from_utf8(data).map_err(|e| format!("source is not UTF-8: {}", e))?;
    let options = usvg::roxmltree::ParsingOptions {
        allow_dtd: true,
        ..Default::default()
    };
    let document = usvg::roxmltree::Document::parse_with_options(text, options)
        .map_err(|e| format!("failed to parse SVG: {}", e))?;
    let root = document.root_element();

    let view_box: Vec<f32> = root
        .attribute("viewBox")
        .map(|v| {
            v.split(|c: char| c.is_whitespace() || c == ',')
                .filter(|t| !t.is_empty())
                .filter_map(|t| t.parse().ok())
                .collect()
        })
        .unwrap_or_default();
    let [vx, vy, vw, vh] = view_box[..] else {
        return Ok(tiny_skia::Transform::identity());
    };
    if !(vw > 0.0 && vh > 0.0) {
        return Ok(tiny_skia::Transform::identity());
    }

    let sx = size.width() / vw;
    let sy = size.height() / vh;
    let aspect = root.attribute("preserveAspectRatio").unwrap_or("");
    let mut tokens = aspect.split_whitespace().filter(|t| *t != "defer");
    let align = tokens.next().unwrap_or("xMidYMid");
    let slice = tokens.next() == Some("slice");

    if align == "none" {
        return Ok(tiny_skia::Transform::from_row(sx, 0.0, 0.0, sy, -vx * sx, -vy * sy));
    }

    let scale = if slice { sx.max(sy) } else { sx.min(sy) };
    let factor = |min: &str, max: &str| {
        if align.contains(min) {
            0.0
        } else if align.contains(max) {
            1.0
        } else {
            0.5
        }
    };
    let tx = -vx * scale + (size.width() - vw * scale) * factor("xMin", "xMax");
    let ty = -vy * scale + (size.height() - vh * scale) * factor("YMin", "YMax");
    Ok(tiny_skia::Transform::from_row(scale, 0.0, 0.0, scale, tx, ty))
}

fn ensure_written(output: &Path) -> Result<(), String> {
    match std::fs::metadata(output) {
        Ok(meta) if meta.len() > 0 => Ok(()),
        Ok(_) => Err(format!("rasterizer wrote an empty file {}", output.display())),
        Err(_) => Err(format!("rasterizer produced no file at {}", output.display())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn request(dir: &Path, source: &Path, region: Rect) -> RenderRequest {
        RenderRequest {
            size: 24,
            region_id: "pointer".to_string(),
            region,
            output: dir.join("pointer.png"),
            source: source.to_path_buf(),
        }
    }

    fn write_source(dir: &Path) -> PathBuf {
        let source = dir.join("cursors.svg");
        std::fs::write(
            &source,
            r#"<svg xmlns="http://www.w3.org/2000/svg" width="96" height="48">
                <rect x="24" y="0" width="24" height="24" fill="red"/>
            </svg>"#,
        )
        .unwrap();
        source
    }

    #[test]
    fn test_inkscape_arguments() {
        let req = RenderRequest {
            size: 32,
            region_id: "wait-05".to_string(),
            region: Rect::default(),
            output: PathBuf::from("out/32/wait-05.png"),
            source: PathBuf::from("build/cursors.svg"),
        };
        let rasterizer = InkscapeRasterizer::default();
        let args = InkscapeRasterizer::args(&req);

        assert_eq!(
            rasterizer.command_line(&args),
            "inkscape -w 32 -h 32 -i wait-05 -o out/32/wait-05.png --export-type=png build/cursors.svg"
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_inkscape_nonzero_exit_is_render_failed() {
        let dir = TempDir::new().unwrap();
        let req = request(dir.path(), Path::new("missing.svg"), Rect::default());
        let rasterizer = InkscapeRasterizer::new("false", Duration::from_secs(5));

        let result = rasterizer.render(&req).await;
        assert!(matches!(result, Err(RenderError::RenderFailed { .. })));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_inkscape_success_without_output_is_render_failed() {
        let dir = TempDir::new().unwrap();
        let req = request(dir.path(), Path::new("missing.svg"), Rect::default());
        let rasterizer = InkscapeRasterizer::new("true", Duration::from_secs(5));

        match rasterizer.render(&req).await {
            Err(RenderError::RenderFailed { reason, .. }) => {
                assert!(reason.contains("produced no file"))
            }
            other => panic!("expected RenderFailed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_missing_program_is_render_failed() {
        let dir = TempDir::new().unwrap();
        let req = request(dir.path(), Path::new("missing.svg"), Rect::default());
        let rasterizer =
            InkscapeRasterizer::new("definitely-not-an-installed-rasterizer", Duration::from_secs(5));

        assert!(matches!(
            rasterizer.render(&req).await,
            Err(RenderError::RenderFailed { .. })
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_slow_rasterizer_times_out() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let script = dir.path().join("slow-inkscape");
        std::fs::write(&script, "#!/bin/sh\nsleep 5\n").unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let req = request(dir.path(), Path::new("missing.svg"), Rect::default());
        let rasterizer = InkscapeRasterizer::new(&script, Duration::from_millis(100));

        assert!(matches!(
            rasterizer.render(&req).await,
            Err(RenderError::RenderTimeout { size: 24, .. })
        ));
    }

    #[tokio::test]
    async fn test_resvg_renders_region() {
        let dir = TempDir::new().unwrap();
        let source = write_source(dir.path());
        let req = request(dir.path(), &source, Rect::new(24.0, 0.0, 48.0, 24.0));

        ResvgRasterizer::default().render(&req).await.unwrap();

        let pixmap = tiny_skia::Pixmap::load_png(&req.output).unwrap();
        assert_eq!(pixmap.width(), 24);
        let center = pixmap.pixel(12, 12).unwrap();
        assert_eq!((center.red(), center.alpha()), (255, 255));
    }

    #[tokio::test]
    async fn test_resvg_maps_user_units_through_view_box() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("cursors.svg");
        std::fs::write(
            &source,
            r#"<svg xmlns="http://www.w3.org/2000/svg" width="96mm" height="48mm" viewBox="0 0 96 48">
                <rect x="24" y="0" width="24" height="24" fill="red"/>
            </svg>"#,
        )
        .unwrap();
        let req = request(dir.path(), &source, Rect::new(24.0, 0.0, 48.0, 24.0));

        ResvgRasterizer::default().render(&req).await.unwrap();

        let pixmap = tiny_skia::Pixmap::load_png(&req.output).unwrap();
        let center = pixmap.pixel(12, 12).unwrap();
        assert_eq!((center.red(), center.alpha()), (255, 255));
        let corner = pixmap.pixel(1, 1).unwrap();
        assert_eq!(corner.alpha(), 255);
    }

    #[test]
    fn test_user_space_transform_honours_aspect_ratio() {
        let size = usvg::Size::from_wh(200.0, 100.0).unwrap();

        let plain = br#"<svg xmlns="http://www.w3.org/2000/svg" width="200" height="100"/>"#;
        assert_eq!(
            user_space_transform(plain, size).unwrap(),
            tiny_skia::Transform::identity()
        );

        let centered =
            br#"<svg xmlns="http://www.w3.org/2000/svg" width="200" height="100" viewBox="0 0 50 50"/>"#;
        assert_eq!(
            user_space_transform(centered, size).unwrap(),
            tiny_skia::Transform::from_row(2.0, 0.0, 0.0, 2.0, 50.0, 0.0)
        );

        let stretched = br#"<svg xmlns="http://www.w3.org/2000/svg" width="200" height="100"
            viewBox="10 0 50 50" preserveAspectRatio="none"/>"#;
        assert_eq!(
            user_space_transform(stretched, size).unwrap(),
            tiny_skia::Transform::from_row(4.0, 0.0, 0.0, 2.0, -40.0, 0.0)
        );
    }

    #[tokio::test]
    async fn test_resvg_rejects_empty_region() {
        let dir = TempDir::new().unwrap();
        let source = write_source(dir.path());
        let req = request(dir.path(), &source, Rect::new(10.0, 10.0, 10.0, 20.0));

        assert!(matches!(
            ResvgRasterizer::default().render(&req).await,
            Err(RenderError::RenderFailed { .. })
        ));
    }
}
