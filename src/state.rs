//! # Application State
//!
//! Shared state handed to every request handler: configuration, request
//! metrics, and the transcription services (project store, job registry,
//! engine, export archive). Mutable pieces sit behind `Arc<RwLock<_>>` so
//! concurrent handlers read without blocking each other; the job registry
//! keeps its own finer-grained lock internally.

use crate::config::AppConfig;
use crate::export::ExportArchive;
use crate::store::ProjectStore;
use crate::transcription::{JobRegistry, TermCorrector, Transcriber, WhisperEngine};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use std::time::Instant;

/// Shared application state, cheap to clone per worker.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<RwLock<AppConfig>>,
    pub metrics: Arc<RwLock<AppMetrics>>,
    pub start_time: Instant,
    pub store: Arc<ProjectStore>,
    pub archive: Arc<ExportArchive>,
    pub transcriber: Arc<Transcriber>,
}

/// Request counters collected across all handlers.
#[derive(Debug, Default)]
pub struct AppMetrics {
    pub request_count: u64,
    pub error_count: u64,
    pub jobs_started: u64,
    pub jobs_failed: u64,
    pub jobs_cancelled: u64,
    /// Per-endpoint statistics keyed by "METHOD /path".
    pub endpoint_metrics: HashMap<String, EndpointMetric>,
}

/// Statistics for a single endpoint.
#[derive(Debug, Default, Clone)]
pub struct EndpointMetric {
    pub request_count: u64,
    pub total_duration_ms: u64,
    pub error_count: u64,
}

impl EndpointMetric {
    pub fn average_duration_ms(&self) -> f64 {
        if self.request_count > 0 {
            self.total_duration_ms as f64 / self.request_count as f64
        } else {
            0.0
        }
    }

    pub fn error_rate(&self) -> f64 {
        if self.request_count > 0 {
            self.error_count as f64 / self.request_count as f64
        } else {
            0.0
        }
    }
}

impl AppState {
    /// Wire up the full service graph from a validated configuration.
    pub fn new(config: AppConfig) -> Self {
        let store = Arc::new(ProjectStore::new(PathBuf::from(&config.storage.uploads_dir)));
        let archive = Arc::new(ExportArchive::new(PathBuf::from(&config.storage.exports_dir)));
        let registry = Arc::new(JobRegistry::new());
        let engine = WhisperEngine::new(
            config.engine.clone(),
            PathBuf::from(&config.storage.work_dir),
        );
        let transcriber = Arc::new(Transcriber::new(
            registry,
            engine,
            store.clone(),
            archive.clone(),
            TermCorrector::pali(),
        ));

        Self {
            config: Arc::new(RwLock::new(config)),
            metrics: Arc::new(RwLock::new(AppMetrics::default())),
            start_time: Instant::now(),
            store,
            archive,
            transcriber,
        }
    }

    /// Snapshot of the current configuration.
    pub fn get_config(&self) -> AppConfig {
        self.config.read().unwrap().clone()
    }

    pub fn increment_request_count(&self) {
        self.metrics.write().unwrap().request_count += 1;
    }

    pub fn increment_error_count(&self) {
        self.metrics.write().unwrap().error_count += 1;
    }

    pub fn record_job_started(&self) {
        self.metrics.write().unwrap().jobs_started += 1;
    }

    pub fn record_job_failed(&self) {
        self.metrics.write().unwrap().jobs_failed += 1;
    }

    pub fn record_job_cancelled(&self) {
        self.metrics.write().unwrap().jobs_cancelled += 1;
    }

    /// Fold one finished request into the per-endpoint statistics.
    pub fn record_endpoint_request(&self, endpoint: &str, duration_ms: u64, is_error: bool) {
        let mut metrics = self.metrics.write().unwrap();
        let endpoint_metric = metrics.endpoint_metrics.entry(endpoint.to_string()).or_default();
        endpoint_metric.request_count += 1;
        endpoint_metric.total_duration_ms += duration_ms;
        if is_error {
            endpoint_metric.error_count += 1;
        }
    }

    /// Consistent copy of the metrics for serialization.
    pub fn get_metrics_snapshot(&self) -> AppMetrics {
        let metrics = self.metrics.read().unwrap();
        AppMetrics {
            request_count: metrics.request_count,
            error_count: metrics.error_count,
            jobs_started: metrics.jobs_started,
            jobs_failed: metrics.jobs_failed,
            jobs_cancelled: metrics.jobs_cancelled,
            endpoint_metrics: metrics.endpoint_metrics.clone(),
        }
    }

    /// Number of jobs currently holding a child process.
    pub fn active_jobs(&self) -> usize {
        self.transcriber.registry().active_count()
    }

    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}
