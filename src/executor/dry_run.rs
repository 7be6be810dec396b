//! Recording builder for plans and tests

use super::traits::{
    BuilderCapabilities, HealthStatus, ImageBuilder, StageBuildOutput, StageBuildRequest,
};
use crate::manifest::ManifestError;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Builder that records requests instead of building images
///
/// Stages registered with [`fail_stage`](Self::fail_stage) fail with a
/// non-zero exit code.
#[derive(Debug, Default)]
pub struct DryRunBuilder {
    requests: Mutex<Vec<StageBuildRequest>>,
    failing: HashSet<String>,
    delay: Option<Duration>,
    sequential: bool,
    running: AtomicUsize,
    peak: AtomicUsize,
}

impl DryRunBuilder {
    /// Creates a builder where every stage succeeds immediately
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes `stage` fail
    #[must_use]
    pub fn fail_stage(mut self, stage: impl Into<String>) -> Self {
        self.failing.insert(stage.into());
        self
    }

    /// Makes every build take `delay`
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Reports no support for concurrent builds
    #[must_use]
    pub fn sequential(mut self) -> Self {
        self.sequential = true;
        self
    }

    /// Requests received so far, in arrival order
    pub fn requests(&self) -> Vec<StageBuildRequest> {
        self.requests.lock().clone()
    }

    /// Stage names received so far, in arrival order
    pub fn built_stages(&self) -> Vec<String> {
        self.requests.lock().iter().map(|r| r.stage.clone()).collect()
    }

    /// Highest number of builds that were in flight at once
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ImageBuilder for DryRunBuilder {
    fn name(&self) -> &str {
        "dry-run"
    }

    async fn build_stage(
        &self,
        request: &StageBuildRequest,
    ) -> Result<StageBuildOutput, ManifestError> {
        self.requests.lock().push(request.clone());

        let running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(running, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.running.fetch_sub(1, Ordering::SeqCst);

        tracing::info!(stage = %request.stage, tag = %request.tag, "Dry run: stage not built");

        if self.failing.contains(&request.stage) {
            return Err(ManifestError::CommandFailed {
                code: 1,
                stderr: format!("dry run failure for stage '{}'", request.stage),
            });
        }

        Ok(StageBuildOutput {
            tag: request.tag.clone(),
            image_id: None,
        })
    }

    fn capabilities(&self) -> BuilderCapabilities {
        BuilderCapabilities {
            produces_images: false,
            supports_platforms: true,
            supports_cache: false,
            supports_parallel: !self.sequential,
        }
    }

    async fn health_check(&self) -> HealthStatus {
        HealthStatus::Healthy
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::path::PathBuf;

    fn request(stage: &str) -> StageBuildRequest {
        StageBuildRequest {
            build_id: "b".into(),
            stage: stage.into(),
            dockerfile: String::new(),
            context_dir: PathBuf::from("."),
            tag: format!("demo:{stage}"),
            digest: String::new(),
            build_args: BTreeMap::new(),
        }
    }

    #[tokio::test]
    async fn test_records_requests() {
        let builder = DryRunBuilder::new();
        let output = builder.build_stage(&request("base")).await.unwrap();
        assert_eq!(output.tag, "demo:base");
        assert_eq!(builder.built_stages(), vec!["base"]);
        assert!(!builder.capabilities().produces_images);
    }

    #[tokio::test]
    async fn test_configured_failure() {
        let builder = DryRunBuilder::new().fail_stage("testing");
        assert!(builder.build_stage(&request("base")).await.is_ok());
        let err = builder.build_stage(&request("testing")).await.unwrap_err();
        assert!(matches!(err, ManifestError::CommandFailed { code: 1, .. }));
        assert_eq!(builder.requests().len(), 2);
    }
}
