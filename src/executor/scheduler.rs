//! Wave-by-wave build execution
//!
//! Stages of one wave build concurrently, bounded by a semaphore. A wave
//! with a failed stage is allowed to finish; no later wave starts.

use super::plan::BuildPlan;
use super::traits::{ImageBuilder, StageBuildRequest};
use crate::infrastructure::{BuildMetrics, MetricsCollector};
use crate::manifest::{ManifestError, ManifestResult, StageResult};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use uuid::Uuid;

/// Default number of stages building at once
pub const DEFAULT_MAX_PARALLEL: usize = 4;

/// Settings for a [`BuildExecutor`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutorConfig {
    /// Upper bound on concurrently building stages
    pub max_parallel: usize,
    /// Repository part of image tags (`<prefix>:<stage>`)
    pub tag_prefix: String,
    /// Build context directory
    pub context_dir: PathBuf,
    /// Build argument values overriding manifest defaults
    pub build_args: BTreeMap<String, String>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_parallel: DEFAULT_MAX_PARALLEL,
            tag_prefix: "stageline".to_string(),
            context_dir: PathBuf::from("."),
            build_args: BTreeMap::new(),
        }
    }
}

/// Outcome of one planned stage
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageOutcome {
    /// Stage name
    pub stage: String,
    /// Build result
    pub result: StageResult,
    /// Time spent building, zero when skipped
    pub duration_ms: u64,
    /// Image tag, set when the stage was built
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    /// Image id reported by the builder
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_id: Option<String>,
    /// Failure message
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StageOutcome {
    fn skipped(stage: &str) -> Self {
        Self {
            stage: stage.to_string(),
            result: StageResult::Skipped,
            duration_ms: 0,
            tag: None,
            image_id: None,
            error: None,
        }
    }
}

/// Result of executing a plan
#[derive(Debug, Clone, Serialize)]
pub struct BuildReport {
    /// Unique id of this build
    pub build_id: Uuid,
    /// Manifest name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manifest: Option<String>,
    /// Builder backend name
    pub builder: String,
    /// Overall result: failure if any stage failed
    pub result: StageResult,
    /// Per-stage outcomes in plan order
    pub stages: Vec<StageOutcome>,
    /// Wall-clock duration
    pub duration_ms: u64,
}

impl BuildReport {
    /// Returns true if every planned stage was built
    pub fn is_success(&self) -> bool {
        self.result.is_success()
    }

    /// Outcome of `stage`
    pub fn outcome(&self, stage: &str) -> Option<&StageOutcome> {
        self.stages.iter().find(|o| o.stage == stage)
    }

    /// Stages with the given result
    pub fn stages_with(&self, result: StageResult) -> Vec<&str> {
        self.stages
            .iter()
            .filter(|o| o.result == result)
            .map(|o| o.stage.as_str())
            .collect()
    }
}

/// Runs build plans against an [`ImageBuilder`]
pub struct BuildExecutor {
    builder: Arc<dyn ImageBuilder>,
    config: ExecutorConfig,
    metrics: MetricsCollector,
}

impl BuildExecutor {
    /// Creates an executor with default settings
    pub fn new(builder: Arc<dyn ImageBuilder>) -> Self {
        Self::with_config(builder, ExecutorConfig::default())
    }

    /// Creates an executor with the given settings
    pub fn with_config(builder: Arc<dyn ImageBuilder>, config: ExecutorConfig) -> Self {
        Self {
            builder,
            config,
            metrics: MetricsCollector::new(),
        }
    }

    /// Records metrics into a shared collector
    #[must_use]
    pub fn with_metrics(mut self, metrics: MetricsCollector) -> Self {
        self.metrics = metrics;
        self
    }

    /// Settings of this executor
    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Collector receiving one entry per build
    pub fn metrics(&self) -> &MetricsCollector {
        &self.metrics
    }

    /// Tag given to `stage`
    pub fn tag_for(&self, stage: &str) -> String {
        format!("{}:{stage}", self.config.tag_prefix)
    }

    /// Builds every stage of `plan`, wave by wave
    ///
    /// # Errors
    ///
    /// Returns [`ManifestError::BuilderUnavailable`] when the builder reports
    /// itself unhealthy. Stage failures are reported in the [`BuildReport`].
    pub async fn execute(&self, plan: &BuildPlan) -> ManifestResult<BuildReport> {
        let health = self.builder.health_check().await;
        if !health.is_operational() {
            return Err(ManifestError::BuilderUnavailable(format!(
                "{}: {health:?}",
                self.builder.name()
            )));
        }

        let build_id = Uuid::new_v4();
        let started = Instant::now();
        let permits = if self.builder.capabilities().supports_parallel {
            self.config.max_parallel.max(1)
        } else {
            1
        };
        let semaphore = Arc::new(Semaphore::new(permits));
        let mut build_args = plan.build_args.clone();
        build_args.extend(self.config.build_args.clone());

        tracing::info!(
            build_id = %build_id,
            builder = %self.builder.name(),
            stages = plan.stage_count(),
            waves = plan.waves.len(),
            permits,
            "Starting build"
        );

        let mut outcomes: HashMap<String, StageOutcome> = HashMap::new();
        let mut waves_run = 0;

        for (index, wave) in plan.waves.iter().enumerate() {
            if outcomes.values().any(|o| o.result.is_failure()) {
                tracing::warn!(wave = index, "Skipping wave after failure");
                for stage in wave {
                    outcomes.insert(stage.clone(), StageOutcome::skipped(stage));
                }
                continue;
            }

            waves_run += 1;
            tracing::info!(wave = index, stages = ?wave, "Starting wave");

            let mut tasks = JoinSet::new();
            for stage in wave {
                let request = StageBuildRequest {
                    build_id: build_id.to_string(),
                    stage: stage.clone(),
                    dockerfile: plan.dockerfile.clone(),
                    context_dir: self.config.context_dir.clone(),
                    tag: self.tag_for(stage),
                    digest: plan.digest(stage).unwrap_or_default().to_string(),
                    build_args: build_args.clone(),
                };
                let builder = Arc::clone(&self.builder);
                let semaphore = Arc::clone(&semaphore);
                tasks.spawn(async move { build_one(builder, semaphore, request).await });
            }

            let mut finished = Vec::new();
            while let Some(joined) = tasks.join_next().await {
                match joined {
                    Ok(outcome) => finished.push(outcome),
                    Err(e) => tracing::error!(error = %e, "Stage task aborted"),
                }
            }
            for stage in wave {
                if !finished.iter().any(|o| &o.stage == stage) {
                    finished.push(StageOutcome {
                        error: Some("build task aborted".to_string()),
                        result: StageResult::Failure,
                        ..StageOutcome::skipped(stage)
                    });
                }
            }
            for outcome in finished {
                outcomes.insert(outcome.stage.clone(), outcome);
            }
        }

        let stages: Vec<StageOutcome> = plan
            .stages
            .iter()
            .map(|stage| {
                outcomes
                    .remove(stage)
                    .unwrap_or_else(|| StageOutcome::skipped(stage))
            })
            .collect();

        let count = |result: StageResult| stages.iter().filter(|o| o.result == result).count();
        let failed = count(StageResult::Failure);
        let duration = started.elapsed();

        self.metrics.record(BuildMetrics {
            build_id: build_id.to_string(),
            manifest: plan.manifest.clone(),
            duration,
            stage_count: stages.len(),
            successful_stages: count(StageResult::Success),
            failed_stages: failed,
            skipped_stages: count(StageResult::Skipped),
            waves_run,
        });

        let result = if failed > 0 {
            StageResult::Failure
        } else {
            StageResult::Success
        };
        tracing::info!(build_id = %build_id, result = %result, duration_ms = duration.as_millis(), "Build finished");

        Ok(BuildReport {
            build_id,
            manifest: plan.manifest.clone(),
            builder: self.builder.name().to_string(),
            result,
            stages,
            duration_ms: millis(duration),
        })
    }
}

async fn build_one(
    builder: Arc<dyn ImageBuilder>,
    semaphore: Arc<Semaphore>,
    request: StageBuildRequest,
) -> StageOutcome {
    let _permit = semaphore.acquire_owned().await;
    let started = Instant::now();
    tracing::info!(stage = %request.stage, tag = %request.tag, "Building stage");

    let result = builder.build_stage(&request).await;
    let duration_ms = millis(started.elapsed());

    match result {
        Ok(output) => {
            tracing::info!(stage = %request.stage, duration_ms, "Stage built");
            StageOutcome {
                stage: request.stage,
                result: StageResult::Success,
                duration_ms,
                tag: Some(output.tag),
                image_id: output.image_id,
                error: None,
            }
        }
        Err(e) => {
            tracing::error!(stage = %request.stage, error = %e, "Stage failed");
            StageOutcome {
                stage: request.stage,
                result: StageResult::Failure,
                duration_ms,
                tag: None,
                image_id: None,
                error: Some(e.to_string()),
            }
        }
    }
}

#[allow(clippy::cast_possible_truncation)]
fn millis(duration: Duration) -> u64 {
    duration.as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::DryRunBuilder;
    use crate::manifest::{Manifest, Stage};
    use crate::presets::claude_flow;

    fn executor(builder: Arc<DryRunBuilder>, max_parallel: usize) -> BuildExecutor {
        BuildExecutor::with_config(
            builder,
            ExecutorConfig {
                max_parallel,
                tag_prefix: "claude-flow".to_string(),
                ..ExecutorConfig::default()
            },
        )
    }

    /// Four independent stages in one wave
    fn fan_out() -> Manifest {
        Manifest::builder()
            .name("fan-out")
            .stages(
                ["a", "b", "c", "d"]
                    .into_iter()
                    .map(|name| Stage::from_image(name, "alpine:3.20"))
                    .collect(),
            )
            .build_unchecked()
    }

    #[tokio::test]
    async fn test_builds_waves_in_order() {
        let builder = Arc::new(DryRunBuilder::new());
        let plan = BuildPlan::new(&claude_flow(), &["production".to_string()]).unwrap();
        let report = executor(Arc::clone(&builder), 4).execute(&plan).await.unwrap();

        assert!(report.is_success());
        assert_eq!(
            builder.built_stages(),
            vec!["base", "dependencies", "development", "production"]
        );
        let production = report.outcome("production").unwrap();
        assert_eq!(production.tag.as_deref(), Some("claude-flow:production"));
        assert!(builder.requests().iter().all(|r| r.build_id == report.build_id.to_string()));
    }

    #[tokio::test]
    async fn test_failure_skips_later_waves() {
        let builder = Arc::new(DryRunBuilder::new().fail_stage("dependencies"));
        let plan = BuildPlan::new(&claude_flow(), &[]).unwrap();
        let report = executor(Arc::clone(&builder), 4).execute(&plan).await.unwrap();

        assert_eq!(report.result, StageResult::Failure);
        assert_eq!(report.stages_with(StageResult::Success), vec!["base"]);
        assert_eq!(report.stages_with(StageResult::Failure), vec!["dependencies"]);
        assert_eq!(
            report.stages_with(StageResult::Skipped),
            vec!["development", "testing", "production", "swarm-integration"]
        );
        let failed = report.outcome("dependencies").unwrap();
        assert!(failed.error.as_deref().unwrap().contains("exit code 1"));
        assert_eq!(builder.built_stages(), vec!["base", "dependencies"]);
    }

    #[tokio::test]
    async fn test_failing_wave_finishes_its_other_stages() {
        let builder = Arc::new(DryRunBuilder::new().fail_stage("testing"));
        let plan = BuildPlan::new(&claude_flow(), &[]).unwrap();
        let report = executor(Arc::clone(&builder), 4).execute(&plan).await.unwrap();

        assert_eq!(report.outcome("testing").unwrap().result, StageResult::Failure);
        assert_eq!(report.outcome("production").unwrap().result, StageResult::Success);
        assert_eq!(
            report.outcome("swarm-integration").unwrap().result,
            StageResult::Success
        );
    }

    #[tokio::test]
    async fn test_wave_runs_in_parallel() {
        let builder = Arc::new(DryRunBuilder::new().with_delay(Duration::from_millis(50)));
        let plan = BuildPlan::new(&fan_out(), &[]).unwrap();
        let report = executor(Arc::clone(&builder), 4).execute(&plan).await.unwrap();

        assert!(report.is_success());
        assert_eq!(builder.peak_concurrency(), 4);
    }

    #[tokio::test]
    async fn test_max_parallel_bounds_concurrency() {
        let builder = Arc::new(DryRunBuilder::new().with_delay(Duration::from_millis(20)));
        let plan = BuildPlan::new(&fan_out(), &[]).unwrap();
        executor(Arc::clone(&builder), 2).execute(&plan).await.unwrap();

        assert!(builder.peak_concurrency() <= 2);
        assert_eq!(builder.built_stages().len(), 4);
    }

    #[tokio::test]
    async fn test_sequential_builder_gets_one_build_at_a_time() {
        let builder = Arc::new(
            DryRunBuilder::new()
                .sequential()
                .with_delay(Duration::from_millis(20)),
        );
        let plan = BuildPlan::new(&fan_out(), &[]).unwrap();
        let report = executor(Arc::clone(&builder), 4).execute(&plan).await.unwrap();

        assert!(report.is_success());
        assert_eq!(builder.peak_concurrency(), 1);
        assert_eq!(builder.built_stages().len(), 4);
    }

    #[tokio::test]
    async fn test_records_metrics() {
        let builder = Arc::new(DryRunBuilder::new().fail_stage("development"));
        let plan = BuildPlan::new(&claude_flow(), &["testing".to_string()]).unwrap();
        let executor = executor(builder, 4);
        let report = executor.execute(&plan).await.unwrap();

        let metrics = executor.metrics().get(&report.build_id.to_string()).unwrap();
        assert_eq!(metrics.stage_count, 4);
        assert_eq!(metrics.successful_stages, 2);
        assert_eq!(metrics.failed_stages, 1);
        assert_eq!(metrics.skipped_stages, 1);
        assert_eq!(metrics.waves_run, 3);
        assert_eq!(metrics.manifest.as_deref(), Some("claude-flow"));
    }

    #[tokio::test]
    async fn test_config_build_args_override_defaults() {
        let manifest = Manifest::builder()
            .arg("NODE_VERSION", Some("20".to_string()))
            .stage(Stage::from_image("base", "node:${NODE_VERSION}-alpine"))
            .build_unchecked();
        let builder = Arc::new(DryRunBuilder::new());
        let config = ExecutorConfig {
            build_args: BTreeMap::from([("NODE_VERSION".to_string(), "22".to_string())]),
            ..ExecutorConfig::default()
        };
        let plan = BuildPlan::new(&manifest, &[]).unwrap();
        BuildExecutor::with_config(Arc::clone(&builder) as Arc<dyn ImageBuilder>, config)
            .execute(&plan)
            .await
            .unwrap();

        let requests = builder.requests();
        assert_eq!(requests[0].build_args.get("NODE_VERSION").map(String::as_str), Some("22"));
        assert_eq!(requests[0].tag, "stageline:base");
    }
}
