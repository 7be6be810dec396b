//! Infrastructure layer
//!
//! This module contains configuration, logging, metrics and the HTTP
//! health probe.

mod config;
mod logging;
mod metrics;
mod probe;

pub use config::{CONFIG_ENV, Config, ConfigError, DEFAULT_CONFIG_FILE};
pub use logging::init_logging;
pub use metrics::{BuildMetrics, MetricsCollector};
pub use probe::{HealthProbe, ProbeAttempt, ProbeError, ProbePolicy, ProbeReport, ProbeStatus};
