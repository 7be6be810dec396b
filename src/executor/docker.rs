//! Docker CLI builder
//!
//! Pipes the planned Dockerfile to `docker build -f -` and selects the stage
//! with `--target`.

use super::traits::{
    BuilderCapabilities, HealthStatus, ImageBuilder, StageBuildOutput, StageBuildRequest,
};
use crate::manifest::ManifestError;
use async_trait::async_trait;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// Label carrying the stage digest on built images
pub const DIGEST_LABEL: &str = "org.stageline.digest";

/// Lines of builder stderr kept in error messages
const STDERR_TAIL_LINES: usize = 20;

/// Builds stages with the `docker` command line (or a compatible binary)
#[derive(Debug, Clone)]
pub struct DockerCliBuilder {
    binary: String,
    extra_args: Vec<String>,
}

impl DockerCliBuilder {
    /// Creates a builder using `docker` from `PATH`
    #[must_use]
    pub fn new() -> Self {
        Self::with_binary("docker")
    }

    /// Creates a builder using another binary (`podman`, a full path, ...)
    #[must_use]
    pub fn with_binary(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            extra_args: Vec::new(),
        }
    }

    /// Appends an argument passed to every `build` call
    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.extra_args.push(arg.into());
        self
    }

    /// Binary this builder runs
    pub fn binary(&self) -> &str {
        &self.binary
    }

    /// Arguments of the `build` invocation for `request`
    pub fn build_args(&self, request: &StageBuildRequest) -> Vec<String> {
        let mut args = vec![
            "build".to_string(),
            "--target".to_string(),
            request.stage.clone(),
            "-t".to_string(),
            request.tag.clone(),
            "--label".to_string(),
            format!("{DIGEST_LABEL}={}", request.digest),
        ];
        for (name, value) in &request.build_args {
            args.push("--build-arg".to_string());
            args.push(format!("{name}={value}"));
        }
        args.extend(self.extra_args.iter().cloned());
        args.push("-f".to_string());
        args.push("-".to_string());
        args.push(request.context_dir.to_string_lossy().into_owned());
        args
    }
}

impl Default for DockerCliBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ImageBuilder for DockerCliBuilder {
    fn name(&self) -> &str {
        &self.binary
    }

    async fn build_stage(
        &self,
        request: &StageBuildRequest,
    ) -> Result<StageBuildOutput, ManifestError> {
        let args = self.build_args(request);
        tracing::debug!(binary = %self.binary, args = ?args, "Running image build");

        let mut child = Command::new(&self.binary)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ManifestError::BuilderUnavailable(format!("{}: {e}", self.binary)))?;

        if let Some(mut stdin) = child.stdin.take() {
            // A builder that exits early closes the pipe; its exit status tells why.
            if let Err(e) = stdin.write_all(request.dockerfile.as_bytes()).await {
                tracing::warn!(stage = %request.stage, error = %e, "Could not send Dockerfile to builder");
            }
            drop(stdin);
        }

        let output = child.wait_with_output().await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let lines: Vec<&str> = stderr.lines().collect();
            let tail = lines[lines.len().saturating_sub(STDERR_TAIL_LINES)..].join("\n");
            return Err(ManifestError::CommandFailed {
                code: output.status.code().unwrap_or(-1),
                stderr: tail,
            });
        }

        let image_id = image_id_from_output(&String::from_utf8_lossy(&output.stdout))
            .or_else(|| image_id_from_output(&String::from_utf8_lossy(&output.stderr)));

        Ok(StageBuildOutput {
            tag: request.tag.clone(),
            image_id,
        })
    }

    fn capabilities(&self) -> BuilderCapabilities {
        BuilderCapabilities::default()
    }

    async fn health_check(&self) -> HealthStatus {
        let output = Command::new(&self.binary)
            .args(["version", "--format", "{{.Server.Version}}"])
            .stdin(Stdio::null())
            .output()
            .await;

        match output {
            Ok(output) if output.status.success() => {
                let version = String::from_utf8_lossy(&output.stdout);
                tracing::debug!(binary = %self.binary, version = %version.trim(), "Builder available");
                HealthStatus::Healthy
            }
            Ok(output) => HealthStatus::Unhealthy {
                reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            },
            Err(e) => HealthStatus::Unhealthy {
                reason: format!("{}: {e}", self.binary),
            },
        }
    }
}

/// Finds the image id in classic (`Successfully built`) or BuildKit
/// (`writing image sha256:...`) output
fn image_id_from_output(output: &str) -> Option<String> {
    output.lines().rev().find_map(|line| {
        if let Some(rest) = line.trim().strip_prefix("Successfully built ") {
            return Some(rest.trim().to_string());
        }
        let start = line.find("writing image sha256:")?;
        let id = line[start + "writing image ".len()..]
            .split_whitespace()
            .next()?;
        Some(id.to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::path::PathBuf;

    fn request() -> StageBuildRequest {
        StageBuildRequest {
            build_id: "build-1".into(),
            stage: "production".into(),
            dockerfile: "FROM alpine AS production\n".into(),
            context_dir: PathBuf::from("/src/app"),
            tag: "claude-flow:production".into(),
            digest: "sha256:abc".into(),
            build_args: BTreeMap::from([("NODE_VERSION".to_string(), "20".to_string())]),
        }
    }

    #[test]
    fn test_build_args_layout() {
        let builder = DockerCliBuilder::new().arg("--pull");
        assert_eq!(
            builder.build_args(&request()),
            vec![
                "build",
                "--target",
                "production",
                "-t",
                "claude-flow:production",
                "--label",
                "org.stageline.digest=sha256:abc",
                "--build-arg",
                "NODE_VERSION=20",
                "--pull",
                "-f",
                "-",
                "/src/app",
            ]
        );
    }

    #[test]
    fn test_image_id_from_output() {
        assert_eq!(
            image_id_from_output("Step 3/3 : CMD x\nSuccessfully built 4f2a9c1b7d3e\n"),
            Some("4f2a9c1b7d3e".to_string())
        );
        assert_eq!(
            image_id_from_output("#8 writing image sha256:9d1f00aa done\n#8 naming to docker.io/library/x done"),
            Some("sha256:9d1f00aa".to_string())
        );
        assert_eq!(image_id_from_output("nothing here"), None);
    }

    #[tokio::test]
    async fn test_missing_binary_is_unavailable() {
        let builder = DockerCliBuilder::with_binary("/nonexistent/stageline-docker");
        let err = builder.build_stage(&request()).await.unwrap_err();
        assert!(matches!(err, ManifestError::BuilderUnavailable(_)));
        assert!(!builder.health_check().await.is_operational());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failing_build_reports_exit_code() {
        let builder = DockerCliBuilder::with_binary("false");
        let err = builder.build_stage(&request()).await.unwrap_err();
        assert!(matches!(err, ManifestError::CommandFailed { code: 1, .. }));
    }
}
