//! # Observability
//!
//! - **Structured Logging**: pretty or JSON `tracing` output
//! - **Prometheus Metrics**: peer, message and write counters for `/metrics`

mod logging;
mod metrics;

pub use logging::{init_logging, LogFormat};
pub use metrics::{Direction, MessageLabels, MetricsState, WriteLabels};
