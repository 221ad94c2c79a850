//! Lightweight in-process metrics.
//!
//! Counters, gauges, and histograms are atomics behind `DashMap`s and render
//! to Prometheus text format on demand (`ControllerMetrics::render`).

pub mod metrics;

pub use metrics::ControllerMetrics;
