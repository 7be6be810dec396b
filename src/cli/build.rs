//! `stageline build` - Build stages wave by wave
//!
//! ## Usage
//!
//! ```bash
//! stageline build Dockerfile --target production --build-arg NODE_ENV=production
//! # Exit code 0: every planned stage was built
//! # Exit code 1: a stage failed, or the build could not start
//! ```

use anyhow::{Context, Result};
use stageline::executor::ExecutorConfig;
use stageline::manifest::{is_valid_variable_name, short_digest};
use stageline::{
    BuildExecutor, BuildPlan, BuildReport, DockerCliBuilder, DryRunBuilder, ImageBuilder, Manifest,
    StageResult,
};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::PathBuf;
use std::sync::Arc;

/// Settings of one build run
#[derive(Debug, Clone)]
pub struct BuildOptions {
    /// Stages to build; every leaf when empty
    pub targets: Vec<String>,
    /// Build context directory
    pub context_dir: PathBuf,
    /// Image repository for tags
    pub tag_prefix: String,
    /// Maximum number of stages building at once
    pub max_parallel: usize,
    /// Build arguments overriding manifest defaults
    pub build_args: BTreeMap<String, String>,
    /// Record requests instead of invoking the image builder
    pub dry_run: bool,
    /// Image build binary
    pub docker_binary: String,
}

/// Parses repeated `NAME=value` flags
///
/// A bare `NAME` takes an empty value.
pub fn parse_build_args(args: &[String]) -> Result<BTreeMap<String, String>> {
    let mut parsed = BTreeMap::new();
    for arg in args {
        let (name, value) = arg.split_once('=').unwrap_or((arg.as_str(), ""));
        if !is_valid_variable_name(name) {
            anyhow::bail!("Invalid build argument '{arg}': expected NAME=value");
        }
        parsed.insert(name.to_string(), value.to_string());
    }
    Ok(parsed)
}

/// Plans and executes a build
pub fn run_build(manifest: &Manifest, options: &BuildOptions) -> Result<BuildReport> {
    let plan = BuildPlan::new(manifest, &options.targets).context("Cannot plan build")?;

    let builder: Arc<dyn ImageBuilder> = if options.dry_run {
        Arc::new(DryRunBuilder::new())
    } else {
        Arc::new(DockerCliBuilder::with_binary(&options.docker_binary))
    };

    let executor = BuildExecutor::with_config(
        builder,
        ExecutorConfig {
            max_parallel: options.max_parallel,
            tag_prefix: options.tag_prefix.clone(),
            context_dir: options.context_dir.clone(),
            build_args: options.build_args.clone(),
        },
    );

    let runtime = tokio::runtime::Runtime::new().context("Failed to start async runtime")?;
    let report = runtime
        .block_on(executor.execute(&plan))
        .context("Build could not start")?;
    Ok(report)
}

/// Formats a report as one line per stage and a summary
pub fn format_report(report: &BuildReport) -> String {
    let mut output = String::new();
    let width = report.stages.iter().map(|o| o.stage.len()).max().unwrap_or(0);

    for outcome in &report.stages {
        let _ = write!(output, "{:<7} {:<width$}", outcome.result.to_string(), outcome.stage);
        match outcome.result {
            StageResult::Success => {
                let _ = write!(output, "  {}ms", outcome.duration_ms);
                if let Some(tag) = &outcome.tag {
                    let _ = write!(output, "  {tag}");
                }
                if let Some(image_id) = &outcome.image_id {
                    let _ = write!(output, "  {}", short_digest(image_id));
                }
            }
            StageResult::Failure => {
                if let Some(error) = &outcome.error {
                    let first = error.lines().next().unwrap_or_default();
                    let _ = write!(output, "  {first}");
                }
            }
            StageResult::Skipped => {}
        }
        output.push('\n');
    }

    let _ = writeln!(
        output,
        "\nBuild {} {} in {}ms ({} built, {} failed, {} skipped)",
        report.build_id,
        report.result,
        report.duration_ms,
        report.stages_with(StageResult::Success).len(),
        report.stages_with(StageResult::Failure).len(),
        report.stages_with(StageResult::Skipped).len(),
    );
    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use stageline::presets::claude_flow;

    fn options(targets: &[&str]) -> BuildOptions {
        BuildOptions {
            targets: targets.iter().map(|t| (*t).to_string()).collect(),
            context_dir: PathBuf::from("."),
            tag_prefix: "claude-flow".to_string(),
            max_parallel: 2,
            build_args: BTreeMap::new(),
            dry_run: true,
            docker_binary: "docker".to_string(),
        }
    }

    #[test]
    fn test_parse_build_args() {
        let args = parse_build_args(&[
            "NODE_ENV=production".to_string(),
            "EMPTY".to_string(),
            "URL=http://x?a=b".to_string(),
        ])
        .unwrap();
        assert_eq!(args["NODE_ENV"], "production");
        assert_eq!(args["EMPTY"], "");
        assert_eq!(args["URL"], "http://x?a=b");
        assert!(parse_build_args(&["1BAD=x".to_string()]).is_err());
        assert!(parse_build_args(&["=x".to_string()]).is_err());
    }

    #[test]
    fn test_dry_run_build_of_production() {
        let report = run_build(&claude_flow(), &options(&["production"])).unwrap();
        assert!(report.is_success());
        assert_eq!(report.builder, "dry-run");
        assert_eq!(report.stages.len(), 4);
        assert_eq!(
            report.outcome("production").and_then(|o| o.tag.as_deref()),
            Some("claude-flow:production")
        );
    }

    #[test]
    fn test_run_build_unknown_target() {
        let err = run_build(&claude_flow(), &options(&["staging"])).unwrap_err();
        assert!(format!("{err:#}").contains("staging"));
    }

    #[test]
    fn test_format_report() {
        let report = run_build(&claude_flow(), &options(&["testing"])).unwrap();
        let text = format_report(&report);
        assert!(text.lines().next().unwrap().starts_with("SUCCESS base"));
        assert!(text.contains("claude-flow:testing"));
        assert!(text.contains("(4 built, 0 failed, 0 skipped)"));
    }
}
