//! Theme assembly: from a source SVG to an installable X11 cursor theme.
//!
//! For each theme this:
//! 1. prepares a fresh build directory with a working copy of the source
//! 2. extracts the slices and renders them at every size
//! 3. writes `cursor.theme` and `index.theme`
//! 4. sorts each hotspot file and compiles it into a cursor
//! 5. creates alias symlinks next to the compiled cursors

use crate::config::BuildConfig;
use crate::extract::extract_slices_from_file;
use crate::hotspot::sort_hotspot_file;
use crate::layout::ThemeLayout;
use crate::pipeline::{LogProgress, PipelineReport, ProgressReporter, Scheduler};
use crate::rasterizer::Rasterizer;
use crate::slice::SymlinkDirective;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Compiles a sorted hotspot file into a cursor file.
#[async_trait]
pub trait CursorCompiler: Send + Sync {
    async fn compile(&self, hotspots: &Path, output: &Path) -> Result<()>;
}

/// Runs `xcursorgen <hotspots> <output>`.
#[derive(Debug, Clone)]
pub struct XcursorCompiler {
    program: PathBuf,
    timeout: Duration,
}

impl XcursorCompiler {
    pub fn new(program: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            timeout,
        }
    }
}

#[async_trait]
impl CursorCompiler for XcursorCompiler {
    async fn compile(&self, hotspots: &Path, output: &Path) -> Result<()> {
        let command = format!(
            "{} {} {}",
            self.program.display(),
            hotspots.display(),
            output.display()
        );

        let run = tokio::process::Command::new(&self.program)
            .arg(hotspots)
            .arg(output)
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();

        let result = tokio::time::timeout(self.timeout, run)
            .await
            .with_context(|| format!("Timed out after {:?}: {}", self.timeout, command))?
            .with_context(|| format!("Failed to run: {}", command))?;

        if !result.status.success() {
            anyhow::bail!(
                "Command failed with {}: {} ({})",
                result.status,
                command,
                String::from_utf8_lossy(&result.stderr).trim()
            );
        }
        Ok(())
    }
}

/// Outcome of building one theme.
#[derive(Debug, Clone, Serialize)]
pub struct ThemeReport {
    pub name: String,
    pub dist: PathBuf,
    pub pipeline: PipelineReport,
    /// Cursor names compiled successfully.
    pub cursors: Vec<String>,
    /// Cursor names whose compilation failed.
    pub failed_cursors: Vec<String>,
    pub symlinks_created: usize,
}

/// Builds cursor themes from source SVGs.
pub struct ThemeBuilder {
    config: BuildConfig,
    rasterizer: Arc<dyn Rasterizer>,
    compiler: Arc<dyn CursorCompiler>,
    reporter: Arc<dyn ProgressReporter>,
}

impl ThemeBuilder {
    pub fn new(
        config: BuildConfig,
        rasterizer: Arc<dyn Rasterizer>,
        compiler: Arc<dyn CursorCompiler>,
    ) -> Self {
        Self {
            config,
            rasterizer,
            compiler,
            reporter: Arc::new(LogProgress),
        }
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn ProgressReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn layout_for(&self, theme_name: &str) -> ThemeLayout {
        ThemeLayout::new(&self.config.build_root, &self.config.dist_root, theme_name)
    }

    /// Builds the theme for one source SVG.
    ///
    /// The theme name is the file stem of `source`.
    ///
    /// # Errors
    ///
    /// Extraction errors, fatal render errors and filesystem errors. Failed
    /// cursor compilations and existing symlinks are logged, not returned.
    pub async fn build(&self, source: &Path) -> Result<ThemeReport> {
        let theme_name = source
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .with_context(|| format!("Invalid theme source path {}", source.display()))?;
        let layout = Arc::new(self.layout_for(&theme_name));

        info!("Starting generating the \"{}\" cursor theme", theme_name);

        {
            let layout = layout.clone();
            let sizes = self.config.sizes.clone();
            let source = source.to_path_buf();
            let theme = theme_name.clone();
            blocking(move || {
                layout
                    .clean()
                    .with_context(|| format!("Failed to remove old assets of {}", theme))?;
                layout
                    .prepare(&sizes, &source)
                    .with_context(|| format!("Failed to prepare {}", layout.build.display()))
            })
            .await?;
        }

        let export_source = layout.export_source();
        let document = blocking(move || Ok(extract_slices_from_file(&export_source)?))
            .await
            .with_context(|| format!("Failed to extract slices from {}", source.display()))?;
        info!(
            "Parsing SVG successful: {} slices found",
            document.slices.len()
        );

        let mut scheduler = Scheduler::new(
            self.rasterizer.clone(),
            layout.clone(),
            self.config.concurrency,
        )
        .with_reporter(self.reporter.clone());
        let pipeline = scheduler
            .run(document.slices, &self.config.sizes, &self.config.prefix)
            .await
            .with_context(|| format!("ABORTED: rendering the \"{}\" theme failed", theme_name))?;

        tokio::fs::create_dir_all(layout.cursors_dir())
            .await
            .with_context(|| format!("Failed to create {}", layout.cursors_dir().display()))?;
        {
            let dist = layout.dist.clone();
            let theme = theme_name.clone();
            blocking(move || {
                write_theme_files(&dist, &theme).context("Failed to write theme files")
            })
            .await?;
        }

        let (cursors, failed_cursors) = self.compile_cursors(&layout).await?;
        let symlinks_created = {
            let layout = layout.clone();
            let symlinks = pipeline.symlinks.clone();
            blocking(move || Ok(create_symlinks(&layout, &symlinks))).await?
        };

        if !self.config.keep_tmp {
            info!("Removing the build directory {}", layout.build.display());
            tokio::fs::remove_dir_all(&layout.build)
                .await
                .with_context(|| format!("Failed to remove {}", layout.build.display()))?;
        }

        info!("Finished generating the \"{}\" cursor theme", theme_name);
        Ok(ThemeReport {
            name: theme_name,
            dist: layout.dist.clone(),
            pipeline,
            cursors,
            failed_cursors,
            symlinks_created,
        })
    }

    /// Sorts and compiles every hotspot file of the theme.
    async fn compile_cursors(&self, layout: &ThemeLayout) -> Result<(Vec<String>, Vec<String>)> {
        let mut compiled = Vec::new();
        let mut failed = Vec::new();

        let dir = layout.hotspots_dir();
        for hotspots in blocking(move || hotspot_files(&dir)).await? {
            let Some(cursor_name) = hotspots.file_stem().map(|s| s.to_string_lossy().into_owned())
            else {
                continue;
            };

            {
                let hotspots = hotspots.clone();
                blocking(move || {
                    sort_hotspot_file(&hotspots)
                        .with_context(|| format!("Failed to sort {}", hotspots.display()))
                })
                .await?;
            }

            info!("Creating the cursor file for {}", cursor_name);
            match self
                .compiler
                .compile(&hotspots, &layout.cursor_file(&cursor_name))
                .await
            {
                Ok(()) => compiled.push(cursor_name),
                Err(e) => {
                    error!("Generating the {} X11 cursor file failed: {:#}", cursor_name, e);
                    failed.push(cursor_name);
                }
            }
        }
        Ok((compiled, failed))
    }
}

/// Runs filesystem work on the blocking pool.
async fn blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .context("Filesystem task panicked")?
}

/// `*.cursor` files in `dir`, sorted by name.
fn hotspot_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = fs::read_dir(dir)
        .with_context(|| format!("Failed to read {}", dir.display()))?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_file() && p.extension().is_some_and(|ext| ext == "cursor"))
        .collect();
    files.sort();
    Ok(files)
}

/// Theme `.svg` sources in `dir`, sorted by name.
pub fn discover_themes(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut themes: Vec<PathBuf> = fs::read_dir(dir)
        .with_context(|| format!("Failed to read themes directory {}", dir.display()))?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| {
            p.is_file()
                && p.extension()
                    .is_some_and(|ext| ext.to_string_lossy().eq_ignore_ascii_case("svg"))
        })
        .collect();
    themes.sort();
    Ok(themes)
}

/// Writes `cursor.theme` and an identical `index.theme` into `dist`.
pub fn write_theme_files(dist: &Path, theme_name: &str) -> io::Result<()> {
    let content = format!(
        "[Icon Theme]\nName={name}\nComment=Made using {pkg}\nInherits={name}\n",
        name = theme_name,
        pkg = env!("CARGO_PKG_NAME"),
    );
    fs::write(dist.join("cursor.theme"), &content)?;
    fs::write(dist.join("index.theme"), &content)?;
    Ok(())
}

/// Creates alias symlinks in the cursors directory.
///
/// Each alias points at the directive's source cursor by relative name.
/// Existing aliases are logged and left alone.
///
/// # Returns
///
/// The number of links created.
pub fn create_symlinks(layout: &ThemeLayout, directives: &[SymlinkDirective]) -> usize {
    let mut created = 0;
    for directive in directives {
        for alias in &directive.aliases {
            let link = layout.cursor_file(alias);
            info!("Creating symlink {} pointing to {}", link.display(), directive.source);
            match link_cursor(&directive.source, &link) {
                Ok(()) => created += 1,
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                    warn!("File {} already exists", link.display());
                }
                Err(e) => error!("Failed to create symlink {}: {}", link.display(), e),
            }
        }
    }
    created
}

#[cfg(unix)]
fn link_cursor(source: &str, link: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(source, link)
}

#[cfg(not(unix))]
fn link_cursor(source: &str, link: &Path) -> io::Result<()> {
    if link.exists() {
        return Err(io::Error::from(io::ErrorKind::AlreadyExists));
    }
    let target = link.with_file_name(source);
    fs::copy(target, link).map(|_| ())
}
