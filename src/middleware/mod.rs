//! # HTTP Middleware
//!
//! - **logging**: start/finish log lines for every request, tagged with a request id
//! - **metrics**: request counters and per-route timings in [`AppState`](crate::state::AppState)

pub mod logging;
pub mod metrics;

pub use logging::RequestLogging;
pub use metrics::MetricsMiddleware;
