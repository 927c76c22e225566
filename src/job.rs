//! Render jobs: one slice rendered at one size.

use crate::error::RenderError;
use crate::hotspot::{extrapolate, HotspotFiles, HotspotLine, BASE_SIZE, FRAME_PRIORITY};
use crate::layout::ThemeLayout;
use crate::rasterizer::{Rasterizer, RenderRequest};
use crate::slice::{Slice, SymlinkDirective};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Renders one slice at one size and records its hotspot.
#[derive(Debug, Clone)]
pub struct RenderJob {
    pub slice: Arc<Slice>,
    pub size: u32,
    pub prefix: Arc<str>,
    pub layout: Arc<ThemeLayout>,
}

/// What a successful job produced.
#[derive(Debug, Clone, PartialEq)]
pub struct JobOutput {
    pub export_file: PathBuf,
    pub hotspot: Option<HotspotLine>,
    pub symlink: Option<SymlinkDirective>,
}

impl RenderJob {
    pub fn new(slice: Arc<Slice>, size: u32, prefix: Arc<str>, layout: Arc<ThemeLayout>) -> Self {
        Self {
            slice,
            size,
            prefix,
            layout,
        }
    }

    /// Stable identifier used in logs and reports: `<slice>@<size>`.
    pub fn id(&self) -> String {
        format!("{}@{}", self.slice.name, self.size)
    }

    pub fn export_file(&self) -> PathBuf {
        self.layout
            .export_file(&self.slice.name, self.size, &self.prefix)
    }

    /// Runs the job.
    ///
    /// 1. Claims the export file, refusing to overwrite an existing one
    /// 2. Renders the slice through `rasterizer`
    /// 3. Appends the scaled hotspot to the cursor's hotspot file
    /// 4. Emits the slice's symlink directive at the base size
    ///
    /// # Errors
    ///
    /// - [`RenderError::DestinationExists`] (recoverable) if the image exists
    /// - claim, rasterizer and hotspot write errors (fatal)
    pub async fn execute(
        &self,
        rasterizer: &dyn Rasterizer,
        hotspots: &HotspotFiles,
    ) -> Result<JobOutput, RenderError> {
        let export_file = self.export_file();
        self.claim(&export_file).await?;

        info!("Saving slice as {}", export_file.display());
        let request = RenderRequest {
            size: self.size,
            region_id: self.slice.name.clone(),
            region: self.slice.rect,
            output: export_file.clone(),
            source: self.layout.export_source(),
        };
        if let Err(e) = rasterizer.render(&request).await {
            if let Err(remove) = tokio::fs::remove_file(&export_file).await {
                debug!("Could not remove {}: {}", export_file.display(), remove);
            }
            return Err(e);
        }

        let cursor_name = self.slice.cursor_name();
        let hotspot = match self.hotspot_line(&export_file)? {
            Some(line) => {
                hotspots
                    .append(cursor_name, &line)
                    .await
                    .map_err(|source| RenderError::HotspotWrite {
                        path: hotspots.path_for(cursor_name),
                        source,
                    })?;
                Some(line)
            }
            None => None,
        };

        Ok(JobOutput {
            export_file,
            hotspot,
            symlink: self.symlink_directive(),
        })
    }

    /// Creates an empty export file so no other job can render to the same
    /// path. The rasterizer overwrites it.
    async fn claim(&self, export_file: &Path) -> Result<(), RenderError> {
        match tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(export_file)
            .await
        {
            Ok(_) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                Err(RenderError::DestinationExists(export_file.to_path_buf()))
            }
            Err(source) => Err(RenderError::ClaimDestination {
                path: export_file.to_path_buf(),
                source,
            }),
        }
    }

    /// Hotspot line for this size, if the slice declares a hotspot.
    pub fn hotspot_line(&self, export_file: &Path) -> Result<Option<HotspotLine>, RenderError> {
        let base = self
            .slice
            .hotspot_coordinates()
            .map_err(|_| RenderError::InvalidHotspot {
                name: self.slice.name.clone(),
                value: self.slice.hotspot.clone().unwrap_or_default(),
            })?;

        Ok(base.map(|base| {
            let (x, y) = extrapolate(base, self.size);
            HotspotLine {
                size: self.size,
                x,
                y,
                file_path: export_file.to_path_buf(),
                priority: self.slice.is_frame().then_some(FRAME_PRIORITY),
            }
        }))
    }

    /// Symlink directive, only at the base size and only with aliases.
    pub fn symlink_directive(&self) -> Option<SymlinkDirective> {
        if self.size != BASE_SIZE {
            return None;
        }
        let aliases = self.slice.aliases();
        if aliases.is_empty() {
            return None;
        }
        Some(SymlinkDirective {
            source: self.slice.cursor_name().to_string(),
            aliases,
        })
    }
}

/// Lifecycle state of a render job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Rendering,
    Complete,
    Skipped,
    Failed,
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Queued => write!(f, "queued"),
            JobStatus::Rendering => write!(f, "rendering"),
            JobStatus::Complete => write!(f, "complete"),
            JobStatus::Skipped => write!(f, "skipped"),
            JobStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Status and timing of one job, for logs and telemetry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobReport {
    pub job_id: String,
    pub slice: String,
    pub size: u32,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub error: Option<String>,
}

impl JobReport {
    pub fn new(job: &RenderJob) -> Self {
        let now = Utc::now();
        Self {
            job_id: job.id(),
            slice: job.slice.name.clone(),
            size: job.size,
            status: JobStatus::Queued,
            created_at: now,
            updated_at: now,
            error: None,
        }
    }

    pub fn start_rendering(&mut self) {
        self.status = JobStatus::Rendering;
        self.updated_at = Utc::now();
    }

    pub fn mark_complete(&mut self) {
        self.status = JobStatus::Complete;
        self.updated_at = Utc::now();
        self.error = None;
    }

    pub fn mark_skipped(&mut self, reason: String) {
        self.status = JobStatus::Skipped;
        self.updated_at = Utc::now();
        self.error = Some(reason);
    }

    pub fn mark_failed(&mut self, error: String) {
        self.status = JobStatus::Failed;
        self.updated_at = Utc::now();
        self.error = Some(error);
    }

    /// Records the outcome of [`RenderJob::execute`].
    pub fn record<T>(&mut self, result: &Result<T, RenderError>) {
        match result {
            Ok(_) => self.mark_complete(),
            Err(e) if !e.is_fatal() => self.mark_skipped(e.to_string()),
            Err(e) => self.mark_failed(e.to_string()),
        }
    }

    pub fn processing_duration_ms(&self) -> Option<i64> {
        match self.status {
            JobStatus::Queued | JobStatus::Rendering => None,
            _ => Some(
                self.updated_at
                    .signed_duration_since(self.created_at)
                    .num_milliseconds(),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rasterizer::MockRasterizer;
    use crate::slice::Rect;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn job(root: &std::path::Path, slice: Slice, size: u32) -> RenderJob {
        let layout = ThemeLayout::new(&root.join("build"), &root.join("dist"), "test");
        std::fs::create_dir_all(layout.pngs_dir(size)).unwrap();
        std::fs::create_dir_all(layout.hotspots_dir()).unwrap();
        RenderJob::new(Arc::new(slice), size, Arc::from(""), Arc::new(layout))
    }

    fn writing_rasterizer() -> MockRasterizer {
        let mut mock = MockRasterizer::new();
        mock.expect_render().returning(|req| {
            std::fs::write(&req.output, b"png").unwrap();
            Ok(())
        });
        mock
    }

    #[tokio::test]
    async fn test_frame_hotspot_gets_priority_suffix() {
        let root = TempDir::new().unwrap();
        let slice = Slice::new(Rect::new(0.0, 0.0, 24.0, 24.0), "wait-05").with_hotspot("10 10");
        let job = job(root.path(), slice, 48);
        let hotspots = HotspotFiles::new(job.layout.hotspots_dir());

        let output = job.execute(&writing_rasterizer(), &hotspots).await.unwrap();

        let expected = format!("48 20 20 {} 60\n", output.export_file.display());
        assert_eq!(
            std::fs::read_to_string(job.layout.hotspots_file("wait")).unwrap(),
            expected
        );
        assert_eq!(output.symlink, None);
    }

    #[tokio::test]
    async fn test_standalone_cursor_has_no_priority_and_emits_symlink_at_base() {
        let root = TempDir::new().unwrap();
        let slice = Slice::new(Rect::new(0.0, 0.0, 24.0, 24.0), "pointer")
            .with_hotspot("3 4")
            .with_symlinks("default left_ptr");
        let job = job(root.path(), slice, 24);
        let hotspots = HotspotFiles::new(job.layout.hotspots_dir());

        let output = job.execute(&writing_rasterizer(), &hotspots).await.unwrap();

        assert_eq!(
            output.hotspot.map(|l| l.to_string()),
            Some(format!("24 3 4 {}", output.export_file.display()))
        );
        assert_eq!(
            output.symlink.map(|s| s.to_string()),
            Some("pointer default left_ptr".to_string())
        );
    }

    #[tokio::test]
    async fn test_existing_destination_skips_render() {
        let root = TempDir::new().unwrap();
        let job = job(root.path(), Slice::new(Rect::default(), "pointer"), 32);
        std::fs::write(job.export_file(), b"old").unwrap();
        let hotspots = HotspotFiles::new(job.layout.hotspots_dir());

        let mut mock = MockRasterizer::new();
        mock.expect_render().never();

        let result = job.execute(&mock, &hotspots).await;
        assert!(matches!(result, Err(RenderError::DestinationExists(_))));
    }

    #[tokio::test]
    async fn test_concurrent_jobs_for_one_file_render_once() {
        let root = TempDir::new().unwrap();
        let slice = Slice::new(Rect::default(), "pointer").with_hotspot("1 1");
        let first = job(root.path(), slice.clone(), 24);
        let second = job(root.path(), slice.with_hotspot("9 9"), 24);
        let hotspots = HotspotFiles::new(first.layout.hotspots_dir());
        let rasterizer = writing_rasterizer();

        let (a, b) = tokio::join!(
            first.execute(&rasterizer, &hotspots),
            second.execute(&rasterizer, &hotspots)
        );

        let skipped = [&a, &b]
            .iter()
            .filter(|r| matches!(r, Err(RenderError::DestinationExists(_))))
            .count();
        assert_eq!(skipped, 1);
        assert!(a.is_ok() || b.is_ok());
        let lines = std::fs::read_to_string(first.layout.hotspots_file("pointer")).unwrap();
        assert_eq!(lines.lines().count(), 1);
    }

    #[tokio::test]
    async fn test_unwritable_destination_is_fatal() {
        let root = TempDir::new().unwrap();
        let layout = ThemeLayout::new(&root.path().join("build"), &root.path().join("dist"), "test");
        let job = RenderJob::new(
            Arc::new(Slice::new(Rect::default(), "pointer")),
            32,
            Arc::from(""),
            Arc::new(layout),
        );
        let hotspots = HotspotFiles::new(job.layout.hotspots_dir());

        let mut mock = MockRasterizer::new();
        mock.expect_render().never();

        let err = job.execute(&mock, &hotspots).await.unwrap_err();
        assert!(matches!(err, RenderError::ClaimDestination { .. }));
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_render_failure_writes_no_hotspot() {
        let root = TempDir::new().unwrap();
        let slice = Slice::new(Rect::default(), "pointer").with_hotspot("1 1");
        let job = job(root.path(), slice, 32);
        let hotspots = HotspotFiles::new(job.layout.hotspots_dir());

        let mut mock = MockRasterizer::new();
        mock.expect_render().returning(|req| {
            Err(RenderError::RenderFailed {
                region: req.region_id.clone(),
                size: req.size,
                command: "mock".to_string(),
                reason: "exit status: 1".to_string(),
            })
        });

        let result = job.execute(&mock, &hotspots).await;
        assert!(matches!(result, Err(RenderError::RenderFailed { .. })));
        assert!(!job.layout.hotspots_file("pointer").exists());
        assert!(!job.export_file().exists());
    }

    #[test]
    fn test_symlinks_only_at_base_size() {
        let root = TempDir::new().unwrap();
        let slice = Slice::new(Rect::default(), "text").with_symlinks("xterm ibeam");
        assert!(job(root.path(), slice.clone(), 24).symlink_directive().is_some());
        assert!(job(root.path(), slice, 32).symlink_directive().is_none());
    }

    #[test]
    fn test_job_report_transitions() {
        let root = TempDir::new().unwrap();
        let job = job(root.path(), Slice::new(Rect::default(), "pointer"), 24);
        let mut report = JobReport::new(&job);

        assert_eq!(report.job_id, "pointer@24");
        assert_eq!(report.status, JobStatus::Queued);
        assert!(report.processing_duration_ms().is_none());

        report.start_rendering();
        report.record::<()>(&Err(RenderError::DestinationExists(PathBuf::from("x.png"))));
        assert_eq!(report.status, JobStatus::Skipped);
        assert!(report.processing_duration_ms().is_some());

        report.record(&Ok(()));
        assert_eq!(report.status, JobStatus::Complete);
        assert!(report.error.is_none());
    }
}
