//! # Observability
//!
//! - `metrics`: Prometheus metrics collection
//! - `server`: `/metrics` and probe endpoints

pub mod metrics;
pub mod server;
