//! Request middleware: per-request log lines and per-route metrics.
//!
//! Both read the shared `AppState` from app data and do nothing when it is absent.

pub mod logging;
pub mod metrics;

pub use logging::RequestLogging;
pub use metrics::MetricsMiddleware;
