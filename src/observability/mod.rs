//! Observability infrastructure.
//!
//! Provides:
//! - Structured logging via tracing
//! - OpenTelemetry metrics for the queue and batch execution

pub mod metrics;
pub mod tracing;
