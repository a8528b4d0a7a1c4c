//! API layer
//!
//! HTTP handlers for:
//! - Auto-login (issue, redeem, launch link)
//! - Metrics (Prometheus)

mod autologin;
pub mod metrics;

pub use autologin::autologin_router;
pub use metrics::metrics_router;
