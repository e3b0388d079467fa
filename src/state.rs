//! # Application State Management
//!
//! Shared state handed to every HTTP handler and WebSocket actor.
//!
//! ## Key Rust Concepts:
//!
//! ### Arc<RwLock<T>> Pattern
//! - **Arc**: many handlers hold a reference to the same data
//! - **RwLock**: many readers or one writer at a time
//! - Used for the runtime-editable config and the request metrics
//!
//! ### Handles instead of locks
//! The live session is not behind a lock at all. It is owned by its own
//! task (`LiveSessionController::run`) and handlers talk to it through a
//! cloneable `ControllerHandle`, which is just two channel ends.

use crate::config::AppConfig;
use crate::live::ControllerHandle;
use crate::live::SessionConfig;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Instant;

/// The main application state shared across all HTTP request handlers.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration (can be updated at runtime; applies at the next session start)
    pub config: Arc<RwLock<AppConfig>>,

    /// Request and session metrics
    pub metrics: Arc<RwLock<AppMetrics>>,

    /// Handle to the live session controller task
    pub live: ControllerHandle,

    /// When the server started
    pub start_time: Instant,
}

/// Metrics collected across all HTTP requests and live sessions.
///
/// - **request_count** / **error_count**: totals since start
/// - **sessions_started**: start requests accepted by the controller
/// - **sessions_rejected**: start requests refused because a session was running
/// - **endpoint_metrics**: per-route statistics keyed by `"METHOD /pattern"`
#[derive(Debug, Default, Clone)]
pub struct AppMetrics {
    pub request_count: u64,
    pub error_count: u64,
    pub sessions_started: u64,
    pub sessions_rejected: u64,
    pub endpoint_metrics: HashMap<String, EndpointMetric>,
}

/// Performance metrics for one route.
#[derive(Debug, Default, Clone)]
pub struct EndpointMetric {
    pub request_count: u64,
    pub total_duration_ms: u64,
    pub error_count: u64,
}

impl AppState {
    pub fn new(config: AppConfig, live: ControllerHandle) -> Self {
        Self {
            config: Arc::new(RwLock::new(config)),
            metrics: Arc::new(RwLock::new(AppMetrics::default())),
            live,
            start_time: Instant::now(),
        }
    }

    /// Get a copy of the current configuration.
    ///
    /// Cloning releases the lock immediately so other handlers aren't blocked.
    pub fn get_config(&self) -> AppConfig {
        self.config
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Snapshot of the settings a new live session should use.
    pub fn session_config(&self) -> SessionConfig {
        let config = self.config.read().unwrap_or_else(PoisonError::into_inner);
        SessionConfig::from(&*config)
    }

    /// Replace the configuration after validating it.
    pub fn update_config(&self, new_config: AppConfig) -> Result<(), String> {
        new_config.validate().map_err(|e| e.to_string())?;
        *self.config.write().unwrap_or_else(PoisonError::into_inner) = new_config;
        Ok(())
    }

    fn with_metrics<R>(&self, f: impl FnOnce(&mut AppMetrics) -> R) -> R {
        let mut metrics = self.metrics.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut metrics)
    }

    pub fn increment_request_count(&self) {
        self.with_metrics(|m| m.request_count += 1);
    }

    pub fn increment_error_count(&self) {
        self.with_metrics(|m| m.error_count += 1);
    }

    /// Record one session start request and whether the controller accepted it.
    pub fn record_session_start(&self, accepted: bool) {
        self.with_metrics(|m| {
            if accepted {
                m.sessions_started += 1;
            } else {
                m.sessions_rejected += 1;
            }
        });
    }

    /// Record detailed metrics for a specific endpoint.
    pub fn record_endpoint_request(&self, endpoint: &str, duration_ms: u64, is_error: bool) {
        self.with_metrics(|m| {
            let endpoint_metric = m.endpoint_metrics.entry(endpoint.to_string()).or_default();
            endpoint_metric.request_count += 1;
            endpoint_metric.total_duration_ms += duration_ms;
            if is_error {
                endpoint_metric.error_count += 1;
            }
        });
    }

    /// Consistent copy of the metrics, taken under one read lock.
    pub fn get_metrics_snapshot(&self) -> AppMetrics {
        self.metrics
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

impl AppMetrics {
    pub fn error_rate(&self) -> f64 {
        if self.request_count > 0 {
            self.error_count as f64 / self.request_count as f64
        } else {
            0.0
        }
    }
}

impl EndpointMetric {
    /// Average = total duration ÷ number of requests
    pub fn average_duration_ms(&self) -> f64 {
        if self.request_count > 0 {
            self.total_duration_ms as f64 / self.request_count as f64
        } else {
            0.0
        }
    }

    /// Fraction of failed requests (0.0 to 1.0).
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
    use crate::live::LiveSessionController;
    use crate::testing::{FakeConnector, FakePlatform, Probe};

    fn state() -> AppState {
        let probe = Probe::shared();
        let handle = LiveSessionController::new(
            Arc::new(FakePlatform::new(probe.clone())),
            Arc::new(FakeConnector::new(probe)),
        )
        .spawn();
        AppState::new(AppConfig::default(), handle)
    }

    #[tokio::test]
    async fn test_endpoint_metrics() {
        let state = state();
        state.record_endpoint_request("GET /health", 10, false);
        state.record_endpoint_request("GET /health", 30, true);

        let metrics = state.get_metrics_snapshot();
        let health = &metrics.endpoint_metrics["GET /health"];
        assert_eq!(health.request_count, 2);
        assert_eq!(health.average_duration_ms(), 20.0);
        assert_eq!(health.error_rate(), 0.5);
    }

    #[tokio::test]
    async fn test_session_start_counters() {
        let state = state();
        state.record_session_start(true);
        state.record_session_start(false);
        state.record_session_start(true);

        let metrics = state.get_metrics_snapshot();
        assert_eq!(metrics.sessions_started, 2);
        assert_eq!(metrics.sessions_rejected, 1);
    }

    #[tokio::test]
    async fn test_update_config_rejects_invalid() {
        let state = state();
        let mut config = state.get_config();
        config.audio.capture_window = 0;
        assert!(state.update_config(config).is_err());
        assert_eq!(state.get_config().audio.capture_window, 4096);
    }
}
