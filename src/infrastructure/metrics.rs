//! Metrics collection
//!
//! Provides metrics for build executions.

use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Metrics for one build
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuildMetrics {
    /// Build id
    pub build_id: String,

    /// Manifest name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manifest: Option<String>,

    /// Wall-clock duration of the build
    #[serde(with = "millis")]
    pub duration: Duration,

    /// Number of planned stages
    pub stage_count: usize,

    /// Number of stages built successfully
    pub successful_stages: usize,

    /// Number of stages that failed
    pub failed_stages: usize,

    /// Number of stages never started
    pub skipped_stages: usize,

    /// Number of waves that were started
    pub waves_run: usize,
}

impl BuildMetrics {
    /// Returns true if every planned stage was built
    pub fn is_complete(&self) -> bool {
        self.successful_stages == self.stage_count
    }
}

mod millis {
    use serde::Serializer;
    use std::time::Duration;

    #[allow(clippy::cast_possible_truncation)]
    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }
}

/// Metrics collector for build executions
#[derive(Debug, Clone)]
pub struct MetricsCollector {
    /// Collected metrics keyed by build id
    metrics: Arc<RwLock<HashMap<String, BuildMetrics>>>,
}

impl MetricsCollector {
    /// Creates a new metrics collector
    #[must_use]
    pub fn new() -> Self {
        Self {
            metrics: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Records metrics for a build
    pub fn record(&self, metrics: BuildMetrics) {
        tracing::debug!(
            build_id = %metrics.build_id,
            duration_ms = metrics.duration.as_millis(),
            successful = metrics.successful_stages,
            failed = metrics.failed_stages,
            skipped = metrics.skipped_stages,
            "Recorded build metrics"
        );
        self.metrics.write().insert(metrics.build_id.clone(), metrics);
    }

    /// Gets metrics for a specific build
    #[must_use]
    pub fn get(&self, build_id: &str) -> Option<BuildMetrics> {
        self.metrics.read().get(build_id).cloned()
    }

    /// Gets all recorded metrics
    #[must_use]
    pub fn get_all(&self) -> Vec<BuildMetrics> {
        self.metrics.read().values().cloned().collect()
    }

    /// Share of recorded builds where every stage succeeded
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn success_rate(&self) -> Option<f64> {
        let metrics = self.metrics.read();
        if metrics.is_empty() {
            return None;
        }
        let complete = metrics.values().filter(|m| m.is_complete()).count();
        Some(complete as f64 / metrics.len() as f64)
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}
