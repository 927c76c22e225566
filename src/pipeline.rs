//! Bounded-concurrency scheduler for the slice × size job matrix.
//!
//! ## Lifecycle
//!
//! ```text
//! Idle -> Dispatching -> Draining -> Done
//!                             \----> Failed
//! ```
//!
//! Jobs are dispatched in `(size, slice)` order, at most `concurrency` at a
//! time. The first fatal error stops dispatch of jobs that have not started;
//! jobs already running are allowed to finish, then the error is returned.

use crate::error::RenderError;
use crate::hotspot::HotspotFiles;
use crate::job::{JobOutput, JobReport, RenderJob};
use crate::layout::ThemeLayout;
use crate::rasterizer::Rasterizer;
use crate::slice::{Slice, SymlinkDirective};
use crate::telemetry;
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Default number of jobs rendered at once.
pub const DEFAULT_CONCURRENCY: usize = 4;

/// Receives progress updates as jobs finish.
pub trait ProgressReporter: Send + Sync {
    /// Called once per finished job, successful or not.
    fn job_finished(&self, completed: usize, total: usize);
}

/// Logs progress at debug level.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogProgress;

impl ProgressReporter for LogProgress {
    fn job_finished(&self, completed: usize, total: usize) {
        debug!(completed, total, "Render progress");
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineState {
    Idle,
    Dispatching,
    Draining,
    Done,
    Failed,
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PipelineState::Idle => "idle",
            PipelineState::Dispatching => "dispatching",
            PipelineState::Draining => "draining",
            PipelineState::Done => "done",
            PipelineState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Summary of a successful run.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineReport {
    pub run_id: Uuid,
    pub total_jobs: usize,
    pub dispatched: usize,
    pub rendered: usize,
    /// Export files that already existed and were left untouched.
    pub skipped: Vec<PathBuf>,
    /// Symlink directives in job completion order.
    pub symlinks: Vec<SymlinkDirective>,
    pub duration_ms: u128,
}

/// Message sent by each finished job.
struct JobEvent {
    report: JobReport,
    result: Result<JobOutput, RenderError>,
}

/// Runs render jobs on a bounded worker pool.
pub struct Scheduler {
    rasterizer: Arc<dyn Rasterizer>,
    layout: Arc<ThemeLayout>,
    concurrency: usize,
    reporter: Arc<dyn ProgressReporter>,
    state: PipelineState,
}

impl Scheduler {
    /// Creates a scheduler rendering into `layout` with at most
    /// `concurrency` jobs in flight.
    pub fn new(rasterizer: Arc<dyn Rasterizer>, layout: Arc<ThemeLayout>, concurrency: usize) -> Self {
        Self {
            rasterizer,
            layout,
            concurrency: concurrency.max(1),
            reporter: Arc::new(LogProgress),
            state: PipelineState::Idle,
        }
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn ProgressReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    fn transition(&mut self, next: PipelineState) {
        debug!("Pipeline state: {} -> {}", self.state, next);
        self.state = next;
    }

    /// Builds the job matrix in `(size, slice)` order.
    pub fn jobs(&self, slices: &[Arc<Slice>], sizes: &[u32], prefix: &str) -> Vec<RenderJob> {
        let prefix: Arc<str> = Arc::from(prefix);
        sizes
            .iter()
            .flat_map(|&size| {
                slices.iter().map({
                    let prefix = prefix.clone();
                    move |slice| {
                        RenderJob::new(slice.clone(), size, prefix.clone(), self.layout.clone())
                    }
                })
            })
            .collect()
    }

    /// Renders every slice at every size.
    ///
    /// # Returns
    ///
    /// A report whose `symlinks` lists the directives produced by
    /// base-size jobs, in completion order.
    ///
    /// # Errors
    ///
    /// The first fatal [`RenderError`]. Directives collected so far are
    /// discarded; files already rendered stay on disk.
    pub async fn run(
        &mut self,
        slices: Vec<Slice>,
        sizes: &[u32],
        prefix: &str,
    ) -> Result<PipelineReport, RenderError> {
        let started = Instant::now();
        let run_id = Uuid::new_v4();
        let slices: Vec<Arc<Slice>> = slices.into_iter().map(Arc::new).collect();
        let jobs = self.jobs(&slices, sizes, prefix);
        let total = jobs.len();

        info!(
            "Starting render run: run_id={}, slices={}, sizes={:?}, jobs={}, concurrency={}, rasterizer={}",
            run_id,
            slices.len(),
            sizes,
            total,
            self.concurrency,
            self.rasterizer.name()
        );

        self.transition(PipelineState::Dispatching);

        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let cancel = CancellationToken::new();
        let completed = Arc::new(AtomicUsize::new(0));
        let hotspots = Arc::new(HotspotFiles::new(self.layout.hotspots_dir()));
        let (tx, mut rx) = mpsc::unbounded_channel::<JobEvent>();
        let mut tasks = JoinSet::new();
        let mut dispatched = 0usize;

        for job in jobs {
            let permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                permit = semaphore.clone().acquire_owned() => permit,
            };
            let Ok(permit) = permit else { break };
            if cancel.is_cancelled() {
                break;
            }

            dispatched += 1;
            let rasterizer = self.rasterizer.clone();
            let reporter = self.reporter.clone();
            let hotspots = hotspots.clone();
            let cancel = cancel.clone();
            let completed = completed.clone();
            let tx = tx.clone();

            tasks.spawn(async move {
                let mut report = JobReport::new(&job);
                report.start_rendering();

                let result = job.execute(rasterizer.as_ref(), &hotspots).await;
                report.record(&result);
                telemetry::record_job_telemetry(&report);

                if let Err(e) = &result {
                    if e.is_fatal() {
                        cancel.cancel();
                    }
                }

                let done = completed.fetch_add(1, Ordering::SeqCst) + 1;
                reporter.job_finished(done, total);
                let _ = tx.send(JobEvent { report, result });
                drop(permit);
            });
        }
        drop(tx);

        self.transition(PipelineState::Draining);
        if dispatched < total {
            warn!(
                "Stopped dispatching after a fatal error: dispatched={}, total={}",
                dispatched, total
            );
        }

        let mut first_error: Option<RenderError> = None;
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!("Render task aborted: {}", e);
                cancel.cancel();
                first_error.get_or_insert(RenderError::WorkerPanicked(e.to_string()));
            }
        }

        let mut rendered = 0usize;
        let mut skipped = Vec::new();
        let mut symlinks = Vec::new();
        while let Some(event) = rx.recv().await {
            match event.result {
                Ok(output) => {
                    rendered += 1;
                    symlinks.extend(output.symlink);
                }
                Err(RenderError::DestinationExists(path)) => {
                    warn!("Export file {} already exists, skipped", path.display());
                    skipped.push(path);
                }
                Err(e) => {
                    error!("Job failed: job_id={}, error={}", event.report.job_id, e);
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
            }
        }

        if let Some(e) = first_error {
            self.transition(PipelineState::Failed);
            return Err(e);
        }

        self.transition(PipelineState::Done);
        let report = PipelineReport {
            run_id,
            total_jobs: total,
            dispatched,
            rendered,
            skipped,
            symlinks,
            duration_ms: started.elapsed().as_millis(),
        };
        telemetry::record_pipeline_telemetry(&report);
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rasterizer::MockRasterizer;
    use crate::slice::Rect;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::AtomicUsize;
    use tempfile::TempDir;

    fn layout(root: &std::path::Path, sizes: &[u32]) -> Arc<ThemeLayout> {
        let layout = ThemeLayout::new(&root.join("build"), &root.join("dist"), "test");
        for &size in sizes {
            std::fs::create_dir_all(layout.pngs_dir(size)).unwrap();
        }
        std::fs::create_dir_all(layout.hotspots_dir()).unwrap();
        Arc::new(layout)
    }

    fn slices(names: &[&str]) -> Vec<Slice> {
        names
            .iter()
            .map(|n| Slice::new(Rect::new(0.0, 0.0, 24.0, 24.0), *n))
            .collect()
    }

    fn mock_rasterizer(fail_on_call: Option<usize>, calls: Arc<AtomicUsize>) -> MockRasterizer {
        let mut mock = MockRasterizer::new();
        mock.expect_name().return_const("mock");
        mock.expect_render().returning(move |req| {
            let call = calls.fetch_add(1, Ordering::SeqCst) + 1;
            if Some(call) == fail_on_call {
                return Err(RenderError::RenderFailed {
                    region: req.region_id.clone(),
                    size: req.size,
                    command: "mock".to_string(),
                    reason: "exit status: 1".to_string(),
                });
            }
            std::fs::write(&req.output, b"png").unwrap();
            Ok(())
        });
        mock
    }

    #[test]
    fn test_job_matrix_is_size_major() {
        let root = TempDir::new().unwrap();
        let scheduler = Scheduler::new(
            Arc::new(MockRasterizer::new()),
            layout(root.path(), &[]),
            DEFAULT_CONCURRENCY,
        );
        let slices: Vec<Arc<Slice>> = slices(&["a", "b"]).into_iter().map(Arc::new).collect();

        let ids: Vec<String> = scheduler
            .jobs(&slices, &[24, 32], "")
            .iter()
            .map(RenderJob::id)
            .collect();
        assert_eq!(ids, vec!["a@24", "b@24", "a@32", "b@32"]);
    }

    #[tokio::test]
    async fn test_run_collects_symlinks_at_base_size_only() {
        let root = TempDir::new().unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let mut scheduler = Scheduler::new(
            Arc::new(mock_rasterizer(None, calls.clone())),
            layout(root.path(), &[24, 32]),
            2,
        );
        let slices = vec![Slice::new(Rect::new(0.0, 0.0, 24.0, 24.0), "pointer").with_symlinks("a b")];

        let report = scheduler.run(slices, &[24, 32], "").await.unwrap();

        assert_eq!(scheduler.state(), PipelineState::Done);
        assert_eq!(report.rendered, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(
            report.symlinks.iter().map(|s| s.to_string()).collect::<Vec<_>>(),
            vec!["pointer a b"]
        );
    }

    #[tokio::test]
    async fn test_fatal_error_halts_dispatch() {
        let root = TempDir::new().unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let mut scheduler = Scheduler::new(
            Arc::new(mock_rasterizer(Some(2), calls.clone())),
            layout(root.path(), &[24]),
            1,
        );

        let result = scheduler.run(slices(&["one", "two", "three"]), &[24], "").await;

        assert!(matches!(result, Err(RenderError::RenderFailed { .. })));
        assert_eq!(scheduler.state(), PipelineState::Failed);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_progress_counts_every_job() {
        struct Recorder(std::sync::Mutex<Vec<(usize, usize)>>);
        impl ProgressReporter for Recorder {
            fn job_finished(&self, completed: usize, total: usize) {
                self.0.lock().unwrap().push((completed, total));
            }
        }

        let root = TempDir::new().unwrap();
        let recorder = Arc::new(Recorder(std::sync::Mutex::new(Vec::new())));
        let mut scheduler = Scheduler::new(
            Arc::new(mock_rasterizer(None, Arc::new(AtomicUsize::new(0)))),
            layout(root.path(), &[24, 48]),
            3,
        )
        .with_reporter(recorder.clone());

        scheduler.run(slices(&["a", "b", "c"]), &[24, 48], "").await.unwrap();

        let mut seen = recorder.0.lock().unwrap().clone();
        seen.sort();
        assert_eq!(seen, (1..=6).map(|n| (n, 6)).collect::<Vec<_>>());
    }
}
