//! # Application State Management
//!
//! This module holds the state shared by every HTTP request handler: the
//! configuration, the loaded recognition model, the transcoder, and the
//! request metrics.
//!
//! ## Key Rust Concepts:
//!
//! ### Arc (Atomically Reference Counted)
//! - **Purpose**: Lets every actix worker hold the same model and config
//! - **Memory safety**: The model is dropped when the last reference goes away
//! - **Immutability**: `Arc<T>` only hands out `&T`, so the model and config
//!   cannot change after startup
//!
//! ### RwLock (Reader-Writer Lock)
//! - **Purpose**: Only the metrics change while the server runs
//! - **Poisoning**: A panic while holding the lock poisons it; metrics are
//!   plain counters, so we keep using the data instead of failing requests
//!
//! ## What is NOT shared:
//! Temporary files and recognition sessions belong to a single request and
//! never live here.

use crate::audio::Transcoder;
use crate::config::AppConfig;
use crate::transcription::AcousticModel;
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Instant;

/// The application state that's shared across all HTTP request handlers.
///
/// ## Rust Concepts:
/// - **#[derive(Clone)]**: Cloning copies the `Arc` pointers, not the data
/// - **Arc<dyn AcousticModel>**: Any backend, chosen at startup
#[derive(Clone)]
pub struct AppState {
    /// Configuration loaded at startup (read-only)
    pub config: Arc<AppConfig>,

    /// The process-wide recognition model (read-only)
    pub model: Arc<dyn AcousticModel>,

    /// External converter built from `config.transcoder`
    pub transcoder: Transcoder,

    /// Performance metrics, updated by every request
    pub metrics: Arc<RwLock<AppMetrics>>,

    /// When the server started
    pub start_time: Instant,
}

/// Counters collected across all HTTP requests.
#[derive(Debug, Default, Clone)]
pub struct AppMetrics {
    /// Total number of HTTP requests processed since server start
    pub request_count: u64,

    /// Total number of error responses since server start
    pub error_count: u64,

    /// Transcriptions currently in flight
    pub active_transcriptions: u32,

    /// Successful transcriptions since server start
    pub completed_transcriptions: u64,

    /// Key: endpoint name (e.g., "POST /stt")
    pub endpoint_metrics: HashMap<String, EndpointMetric>,
}

/// Performance metrics for a specific API endpoint.
#[derive(Debug, Default, Clone)]
pub struct EndpointMetric {
    pub request_count: u64,
    pub total_duration_ms: u64,
    pub error_count: u64,
}

impl AppState {
    /// Create the state from a validated config and a loaded model.
    pub fn new(config: AppConfig, model: Arc<dyn AcousticModel>) -> Self {
        let transcoder = Transcoder::new(&config.transcoder);
        Self {
            config: Arc::new(config),
            model,
            transcoder,
            metrics: Arc::new(RwLock::new(AppMetrics::default())),
            start_time: Instant::now(),
        }
    }

    fn metrics_read(&self) -> RwLockReadGuard<'_, AppMetrics> {
        self.metrics.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn metrics_write(&self) -> RwLockWriteGuard<'_, AppMetrics> {
        self.metrics.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Called by the metrics middleware for every request.
    pub fn increment_request_count(&self) {
        self.metrics_write().request_count += 1;
    }

    /// Called for every 4xx or 5xx response.
    pub fn increment_error_count(&self) {
        self.metrics_write().error_count += 1;
    }

    /// Record one request against `endpoint` (e.g. "POST /stt").
    ///
    /// ## HashMap operations:
    /// The first time we see an endpoint, `.entry().or_default()` creates a
    /// zeroed `EndpointMetric`; later requests update it in place.
    pub fn record_endpoint_request(&self, endpoint: &str, duration_ms: u64, is_error: bool) {
        let mut metrics = self.metrics_write();
        let endpoint_metric = metrics.endpoint_metrics.entry(endpoint.to_string()).or_default();

        endpoint_metric.request_count += 1;
        endpoint_metric.total_duration_ms += duration_ms;

        if is_error {
            endpoint_metric.error_count += 1;
        }
    }

    /// Mark a transcription as started. The counter goes back down when the
    /// returned guard is dropped, even if the request future is cancelled.
    pub fn begin_transcription(&self) -> ActiveTranscription {
        self.metrics_write().active_transcriptions += 1;
        ActiveTranscription {
            metrics: self.metrics.clone(),
            completed: false,
        }
    }

    /// Get a copy of the current metrics so no lock is held while responding.
    pub fn get_metrics_snapshot(&self) -> AppMetrics {
        self.metrics_read().clone()
    }

    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

/// Guard for one in-flight transcription.
///
/// ## Rust Concepts:
/// - **Drop**: the decrement lives in `drop`, so every exit path (`?`,
///   early return, cancellation) releases the slot
pub struct ActiveTranscription {
    metrics: Arc<RwLock<AppMetrics>>,
    completed: bool,
}

impl ActiveTranscription {
    /// Count this transcription as successful when it finishes.
    pub fn complete(mut self) {
        self.completed = true;
    }
}

impl Drop for ActiveTranscription {
    fn drop(&mut self) {
        let mut metrics = self
            .metrics
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        metrics.active_transcriptions = metrics.active_transcriptions.saturating_sub(1);
        if self.completed {
            metrics.completed_transcriptions += 1;
        }
    }
}

impl EndpointMetric {
    /// Average = Total Duration ÷ Number of Requests
    pub fn average_duration_ms(&self) -> f64 {
        if self.request_count > 0 {
            self.total_duration_ms as f64 / self.request_count as f64
        } else {
            0.0
        }
    }

    /// Error Rate = Number of Errors ÷ Total Requests (0.0 to 1.0)
    pub fn error_rate(&self) -> f64 {
        if self.request_count > 0 {
            self.error_count as f64 / self.request_count as f64
        } else {
            0.0
        }
    }
}
