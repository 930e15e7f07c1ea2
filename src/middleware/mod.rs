//! Request middleware: request ids and logging, plus per-endpoint metrics.

pub mod logging;
pub mod metrics;

pub use logging::{RequestId, RequestLogging};
pub use metrics::MetricsMiddleware;
