//! # Application State Management
//!
//! Shared state accessed by every HTTP request handler and the live-session
//! socket: the runtime configuration, request metrics, the voice studio
//! (personas + synthesis gallery) and the session registry.
//!
//! ## Thread Safety Pattern:
//! `Arc<RwLock<T>>` for everything mutable - many readers or one writer at a
//! time, clones released quickly so locks are never held across awaits.

use crate::config::AppConfig;
use crate::remote::VoiceStudio;
use crate::session::registry::SessionRegistry;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Instant;

/// The main application state shared across all request handlers.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration (can be updated at runtime)
    pub config: Arc<RwLock<AppConfig>>,

    /// Performance metrics (updated by the middleware on every request)
    pub metrics: Arc<RwLock<AppMetrics>>,

    /// When the server started (never changes)
    pub start_time: Instant,

    /// Persona vault and synthesis gallery
    studio: Arc<VoiceStudio>,

    /// Live sessions currently hosted by this process
    registry: Arc<SessionRegistry>,
}

/// Performance metrics collected across all HTTP requests.
///
/// ## Why these metrics matter:
/// - **request_count / error_count**: load and reliability monitoring
/// - **active_sessions**: how many live conversations this process is hosting
/// - **endpoint_metrics**: per-endpoint latency and error statistics
#[derive(Debug, Default)]
pub struct AppMetrics {
    /// Total number of HTTP requests processed since server start
    pub request_count: u64,

    /// Total number of errors encountered since server start
    pub error_count: u64,

    /// Current number of live conversation sessions
    pub active_sessions: u32,

    /// Detailed metrics per endpoint key ("GET /api/v1/health")
    pub endpoint_metrics: HashMap<String, EndpointMetric>,
}

/// Detailed performance metrics for a specific API endpoint.
#[derive(Debug, Default, Clone)]
pub struct EndpointMetric {
    pub request_count: u64,
    pub total_duration_ms: u64,
    pub error_count: u64,
}

impl AppState {
    pub fn new(config: AppConfig, studio: Arc<VoiceStudio>, registry: Arc<SessionRegistry>) -> Self {
        Self {
            config: Arc::new(RwLock::new(config)),
            metrics: Arc::new(RwLock::new(AppMetrics::default())),
            start_time: Instant::now(),
            studio,
            registry,
        }
    }

    /// Get a copy of the current configuration.
    ///
    /// Cloning releases the read lock immediately; AppConfig is cheap to
    /// clone.
    pub fn get_config(&self) -> AppConfig {
        self.config.read().unwrap().clone()
    }

    /// Replace the configuration after validating it.
    pub fn update_config(&self, new_config: AppConfig) -> Result<(), String> {
        match new_config.validate() {
            Ok(_) => {
                *self.config.write().unwrap() = new_config;
                Ok(())
            }
            Err(e) => Err(e.to_string()),
        }
    }

    pub fn studio(&self) -> Arc<VoiceStudio> {
        Arc::clone(&self.studio)
    }

    pub fn registry(&self) -> Arc<SessionRegistry> {
        Arc::clone(&self.registry)
    }

    /// Increment the total request counter (called by middleware for every request).
    pub fn increment_request_count(&self) {
        let mut metrics = self.metrics.write().unwrap();
        metrics.request_count += 1;
    }

    /// Increment the total error counter (called when any request fails).
    pub fn increment_error_count(&self) {
        let mut metrics = self.metrics.write().unwrap();
        metrics.error_count += 1;
    }

    /// Record detailed metrics for a specific endpoint.
    pub fn record_endpoint_request(&self, endpoint: &str, duration_ms: u64, is_error: bool) {
        let mut metrics = self.metrics.write().unwrap();
        let endpoint_metric = metrics.endpoint_metrics.entry(endpoint.to_string()).or_default();
        endpoint_metric.request_count += 1;
        endpoint_metric.total_duration_ms += duration_ms;
        if is_error {
            endpoint_metric.error_count += 1;
        }
    }

    /// A live session opened (dashboard socket established it).
    pub fn increment_active_sessions(&self) {
        let mut metrics = self.metrics.write().unwrap();
        metrics.active_sessions += 1;
    }

    /// A live session closed.
    ///
    /// Guarded against underflow: close paths can race on teardown.
    pub fn decrement_active_sessions(&self) {
        let mut metrics = self.metrics.write().unwrap();
        if metrics.active_sessions > 0 {
            metrics.active_sessions -= 1;
        }
    }

    /// Snapshot of the current metrics for the /metrics endpoint.
    ///
    /// Cloned so no lock is held while the HTTP response is serialized.
    pub fn get_metrics_snapshot(&self) -> AppMetrics {
        let metrics = self.metrics.read().unwrap();
        AppMetrics {
            request_count: metrics.request_count,
            error_count: metrics.error_count,
            active_sessions: metrics.active_sessions,
            endpoint_metrics: metrics.endpoint_metrics.clone(),
        }
    }

    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

impl EndpointMetric {
    /// Average = total duration / request count; 0.0 before any request.
    pub fn average_duration_ms(&self) -> f64 {
        if self.request_count > 0 {
            self.total_duration_ms as f64 / self.request_count as f64
        } else {
            0.0
        }
    }

    /// Error rate in [0.0, 1.0]; 0.0 before any request.
    pub fn error_rate(&self) -> f64 {
        if self.request_count > 0 {
            self.error_count as f64 / self.request_count as f64
        } else {
            0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::{RemoteVoiceClient, VoiceStudio};

    fn test_state() -> AppState {
        let config = AppConfig::default();
        let client = RemoteVoiceClient::new(&config.remote).unwrap();
        let synthesizer = RemoteVoiceClient::new(&config.remote).unwrap();
        let studio = Arc::new(VoiceStudio::new(Box::new(client), Box::new(synthesizer)));
        let registry = Arc::new(SessionRegistry::new(
            config.performance.max_concurrent_sessions,
        ));
        AppState::new(config, studio, registry)
    }

    #[test]
    fn test_request_and_error_counters() {
        let state = test_state();
        state.increment_request_count();
        state.increment_request_count();
        state.increment_error_count();

        let snapshot = state.get_metrics_snapshot();
        assert_eq!(snapshot.request_count, 2);
        assert_eq!(snapshot.error_count, 1);
    }

    #[test]
    fn test_session_gauge_never_underflows() {
        let state = test_state();
        state.decrement_active_sessions();
        assert_eq!(state.get_metrics_snapshot().active_sessions, 0);

        state.increment_active_sessions();
        state.increment_active_sessions();
        state.decrement_active_sessions();
        assert_eq!(state.get_metrics_snapshot().active_sessions, 1);
    }

    #[test]
    fn test_endpoint_metrics() {
        let state = test_state();
        state.record_endpoint_request("GET /api/v1/health", 10, false);
        state.record_endpoint_request("GET /api/v1/health", 30, true);

        let snapshot = state.get_metrics_snapshot();
        let metric = &snapshot.endpoint_metrics["GET /api/v1/health"];
        assert_eq!(metric.request_count, 2);
        assert_eq!(metric.average_duration_ms(), 20.0);
        assert_eq!(metric.error_rate(), 0.5);
    }

    #[test]
    fn test_config_update_requires_validity() {
        let state = test_state();
        let mut bad = state.get_config();
        bad.server.port = 0;
        assert!(state.update_config(bad).is_err());

        let mut good = state.get_config();
        good.server.port = 9000;
        assert!(state.update_config(good).is_ok());
        assert_eq!(state.get_config().server.port, 9000);
    }
}
