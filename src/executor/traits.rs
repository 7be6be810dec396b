//! Image builder traits
//!
//! This module defines the seam between build scheduling and the tool that
//! actually produces stage images.

use crate::manifest::ManifestError;
use async_trait::async_trait;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Builds one stage of a manifest into a tagged image
#[async_trait]
#[allow(clippy::missing_errors_doc)]
pub trait ImageBuilder: Send + Sync {
    /// Short backend name used in logs
    fn name(&self) -> &str;

    /// Builds the stage named in `request`
    async fn build_stage(
        &self,
        request: &StageBuildRequest,
    ) -> Result<StageBuildOutput, ManifestError>;

    /// Returns the capabilities of this builder
    fn capabilities(&self) -> BuilderCapabilities;

    /// Checks whether the backend can be used
    async fn health_check(&self) -> HealthStatus;
}

/// Everything a builder needs for one stage
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageBuildRequest {
    /// Build this stage belongs to
    pub build_id: String,
    /// Stage to build (`--target`)
    pub stage: String,
    /// Dockerfile text containing the stage and its dependencies
    #[serde(skip)]
    pub dockerfile: String,
    /// Build context directory
    pub context_dir: PathBuf,
    /// Image tag to apply
    pub tag: String,
    /// Stage fingerprint
    pub digest: String,
    /// Values for build arguments
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub build_args: BTreeMap<String, String>,
}

/// Result of a successful stage build
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StageBuildOutput {
    /// Tag applied to the image
    pub tag: String,
    /// Image id reported by the builder
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_id: Option<String>,
}

/// Capabilities of a builder
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(clippy::struct_excessive_bools)]
pub struct BuilderCapabilities {
    /// Produces real images
    pub produces_images: bool,

    /// Honors `--platform` on `FROM`
    pub supports_platforms: bool,

    /// Reuses layers from earlier builds
    pub supports_cache: bool,

    /// Several stages may build at the same time
    pub supports_parallel: bool,
}

impl Default for BuilderCapabilities {
    fn default() -> Self {
        Self {
            produces_images: true,
            supports_platforms: true,
            supports_cache: true,
            supports_parallel: true,
        }
    }
}

/// Health status of a builder
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthStatus {
    /// Builder is healthy
    Healthy,

    /// Builder works with reduced features
    Degraded {
        /// Reason for degradation
        reason: String,
    },

    /// Builder cannot be used
    Unhealthy {
        /// Reason for being unhealthy
        reason: String,
    },
}

impl HealthStatus {
    /// Returns true if builder is healthy or degraded
    #[must_use]
    pub fn is_operational(&self) -> bool {
        !matches!(self, Self::Unhealthy { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_health_status_operational() {
        assert!(HealthStatus::Healthy.is_operational());
        assert!(
            HealthStatus::Degraded {
                reason: "no buildx".into()
            }
            .is_operational()
        );
        assert!(
            !HealthStatus::Unhealthy {
                reason: "daemon down".into()
            }
            .is_operational()
        );
    }

    #[test]
    fn test_request_serialization_skips_dockerfile() {
        let request = StageBuildRequest {
            build_id: "b1".into(),
            stage: "base".into(),
            dockerfile: "FROM alpine AS base\n".into(),
            context_dir: PathBuf::from("."),
            tag: "demo:base".into(),
            digest: "sha256:00".into(),
            build_args: BTreeMap::new(),
        };
        let json = serde_json::to_value(&request).unwrap();
        assert!(json.get("dockerfile").is_none());
        assert_eq!(json["tag"], "demo:base");
    }
}
