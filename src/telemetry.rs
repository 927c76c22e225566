//! Telemetry and structured logging for render runs.

use crate::job::{JobReport, JobStatus};
use crate::pipeline::PipelineReport;
use opentelemetry::trace::{Span, Tracer};
use opentelemetry::{global, KeyValue};
use tracing::{info, warn};

const TRACER_NAME: &str = "cursor-slicer";

/// Renders slower than this are logged as warnings.
const SLOW_RENDER_MS: i64 = 5000;

/// Records telemetry for a finished render job.
///
/// Emits an OpenTelemetry span and a structured log line. Recorded:
/// - Job duration (ms)
/// - Final status
/// - Error message, if the job failed or was skipped
pub fn record_job_telemetry(job: &JobReport) {
    let tracer = global::tracer(TRACER_NAME);
    let mut span = tracer.start("render_job");

    span.set_attribute(KeyValue::new("job_id", job.job_id.clone()));
    span.set_attribute(KeyValue::new("slice", job.slice.clone()));
    span.set_attribute(KeyValue::new("size", job.size as i64));
    span.set_attribute(KeyValue::new("status", job.status.to_string()));

    if let Some(duration_ms) = job.processing_duration_ms() {
        span.set_attribute(KeyValue::new("duration_ms", duration_ms));

        info!(
            job_id = %job.job_id,
            duration_ms = duration_ms,
            status = %job.status,
            "Render job finished"
        );

        if duration_ms > SLOW_RENDER_MS {
            warn!(
                job_id = %job.job_id,
                duration_ms = duration_ms,
                "Render exceeded performance threshold ({}ms)",
                SLOW_RENDER_MS
            );
        }
    }

    if matches!(job.status, JobStatus::Failed | JobStatus::Skipped) {
        if let Some(ref error) = job.error {
            span.set_attribute(KeyValue::new("error", error.clone()));
        }
    }

    span.end();
}

/// Records a summary span for a completed run.
pub fn record_pipeline_telemetry(report: &PipelineReport) {
    let tracer = global::tracer(TRACER_NAME);
    let mut span = tracer.start("render_pipeline");

    span.set_attribute(KeyValue::new("run_id", report.run_id.to_string()));
    span.set_attribute(KeyValue::new("total_jobs", report.total_jobs as i64));
    span.set_attribute(KeyValue::new("rendered", report.rendered as i64));
    span.set_attribute(KeyValue::new("skipped", report.skipped.len() as i64));
    span.set_attribute(KeyValue::new("symlinks", report.symlinks.len() as i64));
    span.set_attribute(KeyValue::new("duration_ms", report.duration_ms as i64));
    span.end();

    info!(
        run_id = %report.run_id,
        rendered = report.rendered,
        skipped = report.skipped.len(),
        duration_ms = report.duration_ms as u64,
        "Render run complete"
    );
}

/// Initializes OpenTelemetry with an OTLP exporter.
///
/// Does nothing unless `OTEL_EXPORTER_OTLP_ENDPOINT` is set. Must be called
/// from within a Tokio runtime. Reads:
/// - `OTEL_EXPORTER_OTLP_ENDPOINT` - Collector endpoint
/// - `OTEL_SERVICE_NAME` - Service name (default: cursor-slicer)
///
/// # Returns
///
/// `Ok(true)` if an exporter was installed, `Ok(false)` if telemetry is not
/// configured.
pub fn init_telemetry() -> Result<bool, Box<dyn std::error::Error>> {
    use opentelemetry_otlp::WithExportConfig;
    use opentelemetry_sdk::trace::Config;

    let Ok(endpoint) = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT") else {
        return Ok(false);
    };

    let service_name =
        std::env::var("OTEL_SERVICE_NAME").unwrap_or_else(|_| TRACER_NAME.to_string());

    let tracer = opentelemetry_otlp::new_pipeline()
        .tracing()
        .with_exporter(
            opentelemetry_otlp::new_exporter()
                .tonic()
                .with_endpoint(&endpoint),
        )
        .with_trace_config(Config::default().with_resource(
            opentelemetry_sdk::Resource::new(vec![
                KeyValue::new("service.name", service_name),
                KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
            ]),
        ))
        .install_batch(opentelemetry_sdk::runtime::Tokio)?;

    if let Some(provider) = tracer.provider() {
        global::set_tracer_provider(provider);
    }

    info!("Telemetry initialized: endpoint={}", endpoint);
    Ok(true)
}

/// Flushes pending spans before exit.
pub fn shutdown_telemetry() {
    global::shutdown_tracer_provider();
}
