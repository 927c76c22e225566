//! Cursor Slicer
//!
//! Builds X11 cursor themes from Inkscape SVG sources.
//!
//! ## Commands
//!
//! - `build`: render, compile and install every theme under the themes directory
//! - `slices`: print the slices found in one SVG as JSON
//!
//! ## Configuration
//!
//! Settings come from an optional JSON file (`--config`), then from flags or
//! their environment variables:
//! - `CURSOR_SIZES`: Comma separated sizes (default: 24)
//! - `WORKER_CONCURRENCY`: Number of concurrent renders (default: 4)
//! - `RENDER_TIMEOUT_SECS`: Bound on a single render (default: 120)
//! - `CURSOR_RASTERIZER`: `inkscape` or `resvg` (default: inkscape)
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP collector endpoint
//! - `RUST_LOG`: Log level (default: info)

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use cursor_slicer::config::{BuildConfig, RasterizerKind};
use cursor_slicer::extract::extract_slices_from_file;
use cursor_slicer::pipeline::ProgressReporter;
use cursor_slicer::rasterizer::{InkscapeRasterizer, Rasterizer, ResvgRasterizer};
use cursor_slicer::telemetry;
use cursor_slicer::theme::{discover_themes, ThemeBuilder, XcursorCompiler};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "cursor-slicer", version, about = "Build X11 cursor themes from SVG sources")]
struct Cli {
    /// Log at debug level unless RUST_LOG is set.
    #[arg(long, global = true)]
    debug: bool,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Build cursor themes.
    Build(BuildArgs),
    /// Print the slices of an SVG document as JSON.
    Slices {
        /// Source SVG document.
        svg: PathBuf,
    },
}

#[derive(Debug, Args)]
struct BuildArgs {
    /// Theme sources to build; defaults to every SVG in the themes directory.
    themes: Vec<PathBuf>,

    /// JSON configuration file; flags override its values.
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long, env = "CURSOR_SIZES", value_delimiter = ',')]
    sizes: Option<Vec<u32>>,

    /// Prefix for rendered slice filenames.
    #[arg(long)]
    prefix: Option<String>,

    #[arg(long, env = "WORKER_CONCURRENCY")]
    concurrency: Option<usize>,

    #[arg(long, env = "CURSOR_RASTERIZER", value_enum)]
    rasterizer: Option<RasterizerKind>,

    /// Seconds allowed for a single render.
    #[arg(long, env = "RENDER_TIMEOUT_SECS")]
    render_timeout: Option<u64>,

    #[arg(long)]
    themes_dir: Option<PathBuf>,

    #[arg(long)]
    build_root: Option<PathBuf>,

    #[arg(long)]
    dist_root: Option<PathBuf>,

    /// Keep the build directory after a successful build.
    #[arg(long)]
    keep_tmp: bool,

    /// Write the build reports to this file as JSON.
    #[arg(long)]
    report: Option<PathBuf>,
}

impl BuildArgs {
    fn into_config(self) -> Result<(BuildConfig, Vec<PathBuf>, Option<PathBuf>)> {
        let mut config = match &self.config {
            Some(path) => {
                let raw = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read config {}", path.display()))?;
                serde_json::from_str(&raw)
                    .with_context(|| format!("Failed to parse config {}", path.display()))?
            }
            None => BuildConfig::default(),
        };

        if let Some(sizes) = self.sizes {
            config.sizes = sizes;
        }
        if let Some(prefix) = self.prefix {
            config.prefix = prefix;
        }
        if let Some(concurrency) = self.concurrency {
            config.concurrency = concurrency;
        }
        if let Some(rasterizer) = self.rasterizer {
            config.rasterizer = rasterizer;
        }
        if let Some(secs) = self.render_timeout {
            config.render_timeout = Duration::from_secs(secs);
        }
        if let Some(dir) = self.themes_dir {
            config.themes_dir = dir;
        }
        if let Some(dir) = self.build_root {
            config.build_root = dir;
        }
        if let Some(dir) = self.dist_root {
            config.dist_root = dir;
        }
        config.keep_tmp |= self.keep_tmp;

        config.validate().context("Invalid configuration")?;
        Ok((config, self.themes, self.report))
    }
}

/// Drives an indicatif bar from pipeline progress.
struct BarProgress(ProgressBar);

impl ProgressReporter for BarProgress {
    fn job_finished(&self, completed: usize, total: usize) {
        self.0.set_length(total as u64);
        self.0.set_position(completed as u64);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let default_level = if cli.debug { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_level.into()),
        )
        .with(cli.json_logs.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!cli.json_logs).then(|| tracing_subscriber::fmt::layer()))
        .init();

    // Initialize OpenTelemetry
    if let Err(e) = telemetry::init_telemetry() {
        warn!("Failed to initialize telemetry: {}", e);
    }

    let result = match cli.command {
        Command::Build(args) => build(args).await,
        Command::Slices { svg } => print_slices(&svg),
    };

    telemetry::shutdown_telemetry();
    result
}

fn print_slices(svg: &Path) -> Result<()> {
    let document = extract_slices_from_file(svg)?;
    println!("{}", serde_json::to_string_pretty(&document)?);
    Ok(())
}

async fn build(args: BuildArgs) -> Result<()> {
    let (config, themes, report_path) = args.into_config()?;

    info!(
        "Configuration: sizes={:?}, concurrency={}, rasterizer={}",
        config.sizes, config.concurrency, config.rasterizer
    );

    let rasterizer: Arc<dyn Rasterizer> = match config.rasterizer {
        RasterizerKind::Inkscape => {
            which::which(&config.inkscape).with_context(|| {
                format!("{} not found; install Inkscape or use --rasterizer resvg", config.inkscape.display())
            })?;
            Arc::new(InkscapeRasterizer::new(&config.inkscape, config.render_timeout))
        }
        RasterizerKind::Resvg => Arc::new(ResvgRasterizer::new(config.render_timeout)),
    };
    let xcursorgen = which::which(&config.xcursorgen)
        .with_context(|| format!("{} not found; install xcursorgen", config.xcursorgen.display()))?;
    let compiler = Arc::new(XcursorCompiler::new(xcursorgen, config.render_timeout));

    let themes = if themes.is_empty() {
        discover_themes(&config.themes_dir)?
    } else {
        themes
    };
    if themes.is_empty() {
        warn!("No theme sources found in {}", config.themes_dir.display());
        return Ok(());
    }

    let bar = ProgressBar::new(0);
    bar.set_style(
        ProgressStyle::with_template("{prefix} [{bar:40}] {pos}/{len}")
            .context("Invalid progress template")?
            .progress_chars("=> "),
    );

    let builder = ThemeBuilder::new(config, rasterizer, compiler)
        .with_reporter(Arc::new(BarProgress(bar.clone())));

    let mut reports = Vec::with_capacity(themes.len());
    for source in &themes {
        bar.reset();
        bar.set_prefix(
            source
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default(),
        );
        let report = builder.build(source).await;
        bar.finish_and_clear();
        reports.push(report?);
    }

    if let Some(path) = report_path {
        let json = serde_json::to_string_pretty(&reports)?;
        std::fs::write(&path, json)
            .with_context(|| format!("Failed to write report {}", path.display()))?;
        info!("Build report written to {}", path.display());
    }

    Ok(())
}
