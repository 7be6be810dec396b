//! `stageline probe` - Poll a health endpoint
//!
//! The endpoint and policy come from `--url`, or from the effective health
//! check of a manifest stage. Flags override individual policy values.

use anyhow::{Context, Result};
use stageline::HealthProbe;
use stageline::infrastructure::{ProbePolicy, ProbeReport};
use stageline::manifest::parse_duration;
use std::fmt::Write as _;
use std::path::PathBuf;
use std::time::Duration;

/// What to probe
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeTarget {
    /// An explicit URL with the default policy
    Url(String),
    /// The health check of `stage` in the manifest at `file`
    Stage {
        /// Manifest file
        file: PathBuf,
        /// Stage name
        stage: String,
    },
}

/// Policy values given on the command line
#[derive(Debug, Clone, Default)]
pub struct PolicyOverrides {
    pub interval: Option<String>,
    pub timeout: Option<String>,
    pub retries: Option<u32>,
    pub start_period: Option<String>,
}

impl PolicyOverrides {
    fn apply(&self, mut policy: ProbePolicy) -> Result<ProbePolicy> {
        if let Some(interval) = &self.interval {
            policy.interval = positive("interval", interval)?;
        }
        if let Some(timeout) = &self.timeout {
            policy.timeout = positive("timeout", timeout)?;
        }
        if let Some(retries) = self.retries {
            policy.retries = retries;
        }
        if let Some(start_period) = &self.start_period {
            policy.start_period = parse_duration(start_period)
                .map_err(|e| anyhow::anyhow!("Invalid start period '{start_period}': {e}"))?;
        }
        Ok(policy)
    }
}

fn positive(name: &str, text: &str) -> Result<Duration> {
    let duration =
        parse_duration(text).map_err(|e| anyhow::anyhow!("Invalid {name} '{text}': {e}"))?;
    if duration.is_zero() {
        anyhow::bail!("Invalid {name} '{text}': must be positive");
    }
    Ok(duration)
}

/// Builds the probe a target describes
pub fn resolve_probe(target: &ProbeTarget, overrides: &PolicyOverrides) -> Result<HealthProbe> {
    let probe = match target {
        ProbeTarget::Url(url) => HealthProbe::new(url)?,
        ProbeTarget::Stage { file, stage } => {
            let manifest = super::load_manifest(file)?;
            let resolved = manifest
                .resolve(stage)
                .with_context(|| format!("Stage '{stage}' not found in {}", file.display()))?;
            let check = resolved
                .healthcheck
                .with_context(|| format!("Stage '{stage}' has no health check"))?;
            HealthProbe::from_healthcheck(&check)?.with_context(|| {
                format!("Health check of stage '{stage}' does not name an HTTP endpoint")
            })?
        }
    };

    let policy = overrides.apply(probe.policy())?;
    Ok(probe.with_policy(policy))
}

/// Runs a probe to completion
pub fn probe(target: &ProbeTarget, overrides: &PolicyOverrides) -> Result<ProbeReport> {
    let probe = resolve_probe(target, overrides)?;
    tracing::info!(url = %probe.url(), policy = ?probe.policy(), "Probing endpoint");

    let runtime = tokio::runtime::Runtime::new().context("Failed to start async runtime")?;
    Ok(runtime.block_on(probe.run())?)
}

/// Formats a report as one line per attempt and a verdict
pub fn format_report(report: &ProbeReport) -> String {
    let mut output = String::new();

    for (index, attempt) in report.attempts.iter().enumerate() {
        let _ = write!(output, "attempt {} at {}ms: ", index + 1, attempt.at_ms);
        match (attempt.status, &attempt.error) {
            (Some(status), _) => {
                let _ = write!(output, "HTTP {status}");
            }
            (None, Some(error)) => output.push_str(error),
            (None, None) => output.push_str("no answer"),
        }
        if !attempt.is_success() && !attempt.counted {
            output.push_str(" (start period)");
        }
        output.push('\n');
    }

    let verdict = if report.is_healthy() { "healthy" } else { "unhealthy" };
    let _ = writeln!(
        output,
        "{} is {verdict} after {} attempt(s)",
        report.url,
        report.attempts.len()
    );
    output
}
