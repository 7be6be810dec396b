//! CLI tools for stageline
//!
//! Provides commands over manifest files:
//! - `check`: Load and validate a manifest
//! - `lint`: Analyze a manifest for best practices
//! - `doc`: Generate documentation and stage graphs
//! - `export`: Convert between Dockerfile, YAML and JSON
//! - `plan`: Show build waves and digests
//! - `build`: Build stages wave by wave
//! - `probe`: Poll a health endpoint
//! - `init`: Write the claude-flow manifest
//! - `completions`: Generate shell completions

pub mod build;
pub mod check;
pub mod completions;
pub mod doc;
pub mod export;
pub mod init;
pub mod lint;
pub mod plan;
pub mod probe;

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use stageline::Manifest;
use stageline::infrastructure::{Config, init_logging};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

/// CLI arguments for stageline
#[derive(Parser, Debug)]
#[command(name = "stageline")]
#[command(author, version, about = "Staged container-build manifests", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Load and validate a manifest
    Check {
        /// Manifest file (Dockerfile, YAML or JSON)
        file: PathBuf,
    },

    /// Analyze a manifest for best practices
    Lint {
        /// Manifest file to lint
        file: PathBuf,
        /// Output format
        #[arg(short, long, value_enum)]
        format: Option<LintFormat>,
        /// Minimum severity to show
        #[arg(short, long, value_enum)]
        severity: Option<LintSeverityArg>,
        /// Show suggestions
        #[arg(long)]
        suggestions: bool,
    },

    /// Generate documentation for a manifest
    Doc {
        /// Manifest file to document
        file: PathBuf,
        /// Output file (stdout if not specified)
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Output format
        #[arg(short, long, value_enum)]
        format: Option<DocFormatArg>,
    },

    /// Convert a manifest to another format
    Export {
        /// Manifest file to export
        file: PathBuf,
        /// Export format
        #[arg(short, long, value_enum)]
        format: FormatArg,
        /// Keep only the stages these targets need
        #[arg(short, long = "target")]
        targets: Vec<String>,
        /// Output file (stdout if not specified)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Show the build waves for some targets
    Plan {
        /// Manifest file to plan
        file: PathBuf,
        /// Stages to build (every leaf stage if none)
        #[arg(short, long = "target")]
        targets: Vec<String>,
        /// Output format
        #[arg(short, long, value_enum)]
        format: Option<PlanFormatArg>,
    },

    /// Build stages wave by wave
    Build {
        /// Manifest file to build
        file: PathBuf,
        /// Stages to build (every leaf stage if none)
        #[arg(short, long = "target")]
        targets: Vec<String>,
        /// Build context directory
        #[arg(short, long)]
        context: Option<PathBuf>,
        /// Image repository for tags (`<prefix>:<stage>`)
        #[arg(long)]
        tag_prefix: Option<String>,
        /// Maximum number of stages building at once
        #[arg(long)]
        max_parallel: Option<usize>,
        /// Build argument (`NAME=value`), repeatable
        #[arg(long = "build-arg")]
        build_args: Vec<String>,
        /// Record the build without running the image builder
        #[arg(long)]
        dry_run: bool,
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Poll a health endpoint with the health check policy
    Probe {
        /// URL to probe
        #[arg(long, conflicts_with_all = ["file", "stage"])]
        url: Option<String>,
        /// Manifest whose stage health check names the URL
        #[arg(long, requires = "stage")]
        file: Option<PathBuf>,
        /// Stage whose health check to use
        #[arg(long, requires = "file")]
        stage: Option<String>,
        /// Time between attempts (e.g. `30s`)
        #[arg(long)]
        interval: Option<String>,
        /// Time allowed per attempt
        #[arg(long)]
        timeout: Option<String>,
        /// Consecutive failures before unhealthy
        #[arg(long)]
        retries: Option<u32>,
        /// Grace period in which failures do not count
        #[arg(long)]
        start_period: Option<String>,
    },

    /// Write the claude-flow manifest
    Init {
        /// Output format
        #[arg(short, long, value_enum, default_value = "dockerfile")]
        format: InitFormatArg,
        /// Output file (stdout if not specified)
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Where the swarm stage registers its MCP server
        #[arg(long)]
        mcp_config: Option<String>,
        /// Overwrite an existing output file
        #[arg(long)]
        force: bool,
    },

    /// Generate shell completions
    Completions {
        /// Shell type
        #[arg(value_enum)]
        shell: ShellArg,
        /// Output file (stdout if not specified)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum LintFormat {
    Text,
    Json,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum LintSeverityArg {
    Info,
    Warning,
    Error,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum DocFormatArg {
    Markdown,
    Mermaid,
    Json,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum FormatArg {
    Dockerfile,
    Yaml,
    Json,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum PlanFormatArg {
    Text,
    Json,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum InitFormatArg {
    Dockerfile,
    Yaml,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum ShellArg {
    Bash,
    Zsh,
    Fish,
    PowerShell,
    Elvish,
}

/// Build the CLI command for completion generation
pub fn build_cli() -> clap::Command {
    Args::command()
}

/// Reads a manifest file with CLI-friendly errors
pub fn load_manifest(file: &Path) -> Result<Manifest> {
    if !file.exists() {
        anyhow::bail!("Manifest file not found: {}", file.display());
    }
    stageline::load_file(file).with_context(|| format!("Failed to load {}", file.display()))
}

/// Writes command output to `output`, or stdout when `None`
pub fn emit(text: &str, output: Option<&Path>) -> Result<()> {
    match output {
        Some(path) => {
            std::fs::write(path, text)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            tracing::info!(path = %path.display(), "Output written");
        }
        None => {
            if text.ends_with('\n') {
                print!("{text}");
            } else {
                println!("{text}");
            }
        }
    }
    Ok(())
}

/// Parse and execute CLI arguments
pub fn run() -> Result<ExitCode> {
    let args = Args::parse();
    let config = Config::load().context("Failed to load configuration")?;
    if let Some(level) = &config.log_level {
        init_logging(level);
    }

    match args.command {
        Command::Check { file } => {
            let summary = check::check_manifest(&file)?;
            println!("{summary}");
        }
        Command::Lint {
            file,
            format,
            severity,
            suggestions,
        } => {
            let lint_config = lint::LintConfig {
                min_severity: match severity {
                    Some(LintSeverityArg::Info) | None => lint::LintSeverity::Info,
                    Some(LintSeverityArg::Warning) => lint::LintSeverity::Warning,
                    Some(LintSeverityArg::Error) => lint::LintSeverity::Error,
                },
                show_suggestions: suggestions,
                format: match format {
                    Some(LintFormat::Json) => lint::OutputFormat::Json,
                    Some(LintFormat::Text) | None => lint::OutputFormat::Text,
                },
            };

            let manifest = load_manifest(&file)?;
            let messages = lint::lint_manifest(&manifest, &lint_config);
            println!("{}", lint::format_lint_messages(&messages, &lint_config));
            if lint::has_errors(&messages) {
                return Ok(ExitCode::FAILURE);
            }
        }
        Command::Doc {
            file,
            output,
            format,
        } => {
            let doc_format = match format {
                Some(DocFormatArg::Json) => doc::DocFormat::Json,
                Some(DocFormatArg::Mermaid) => doc::DocFormat::Mermaid,
                Some(DocFormatArg::Markdown) | None => doc::DocFormat::Markdown,
            };
            let manifest = load_manifest(&file)?;
            let documentation = doc::generate_doc(&manifest, doc_format)?;
            emit(&documentation, output.as_deref())?;
        }
        Command::Export {
            file,
            format,
            targets,
            output,
        } => {
            let manifest = load_manifest(&file)?;
            let exported = export::export_manifest(&manifest, format.into(), &targets)?;
            emit(&exported, output.as_deref())?;
        }
        Command::Plan {
            file,
            targets,
            format,
        } => {
            let manifest = load_manifest(&file)?;
            let plan = stageline::BuildPlan::new(&manifest, &targets)
                .with_context(|| format!("Cannot plan {}", file.display()))?;
            let rendered = match format {
                Some(PlanFormatArg::Json) => serde_json::to_string_pretty(&plan)?,
                Some(PlanFormatArg::Text) | None => plan::format_plan(&plan),
            };
            emit(&rendered, None)?;
        }
        Command::Build {
            file,
            targets,
            context,
            tag_prefix,
            max_parallel,
            build_args,
            dry_run,
            json,
        } => {
            let manifest = load_manifest(&file)?;
            let options = build::BuildOptions {
                targets,
                context_dir: context.unwrap_or_else(|| config.context_dir.clone()),
                tag_prefix: tag_prefix
                    .or_else(|| config.tag_prefix.clone())
                    .or_else(|| manifest.name.clone())
                    .unwrap_or_else(|| "stageline".to_string()),
                max_parallel: max_parallel.unwrap_or(config.max_parallel),
                build_args: build::parse_build_args(&build_args)?,
                dry_run,
                docker_binary: config.docker_binary.clone(),
            };
            let report = build::run_build(&manifest, &options)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print!("{}", build::format_report(&report));
            }
            if !report.is_success() {
                return Ok(ExitCode::FAILURE);
            }
        }
        Command::Probe {
            url,
            file,
            stage,
            interval,
            timeout,
            retries,
            start_period,
        } => {
            let target = match (url, file, stage) {
                (Some(url), _, _) => probe::ProbeTarget::Url(url),
                (None, Some(file), Some(stage)) => probe::ProbeTarget::Stage { file, stage },
                _ => anyhow::bail!("Either --url or --file with --stage is required"),
            };
            let overrides = probe::PolicyOverrides {
                interval,
                timeout,
                retries,
                start_period,
            };
            let report = probe::probe(&target, &overrides)?;
            print!("{}", probe::format_report(&report));
            if !report.is_healthy() {
                return Ok(ExitCode::FAILURE);
            }
        }
        Command::Init {
            format,
            output,
            mcp_config,
            force,
        } => {
            let format = match format {
                InitFormatArg::Dockerfile => stageline::ManifestFormat::Dockerfile,
                InitFormatArg::Yaml => stageline::ManifestFormat::Yaml,
            };
            let text = init::render_preset(format, mcp_config.as_deref())?;
            if let Some(path) = &output {
                init::ensure_writable(path, force)?;
            }
            emit(&text, output.as_deref())?;
        }
        Command::Completions { shell, output } => {
            use clap_complete::Shell;

            let shell_enum = match shell {
                ShellArg::Bash => Shell::Bash,
                ShellArg::Zsh => Shell::Zsh,
                ShellArg::Fish => Shell::Fish,
                ShellArg::PowerShell => Shell::PowerShell,
                ShellArg::Elvish => Shell::Elvish,
            };

            let completions = completions::generate_completions(shell_enum)?;
            emit(&completions, output.as_deref())?;
        }
    }

    Ok(ExitCode::SUCCESS)
}

impl From<FormatArg> for stageline::ManifestFormat {
    fn from(format: FormatArg) -> Self {
        match format {
            FormatArg::Dockerfile => Self::Dockerfile,
            FormatArg::Yaml => Self::Yaml,
            FormatArg::Json => Self::Json,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_definition_is_consistent() {
        build_cli().debug_assert();
    }

    #[test]
    fn test_parse_build_command() {
        let args = Args::try_parse_from([
            "stageline",
            "build",
            "Dockerfile",
            "--target",
            "production",
            "-t",
            "testing",
            "--max-parallel",
            "2",
            "--dry-run",
        ])
        .unwrap();
        let Command::Build {
            targets,
            max_parallel,
            dry_run,
            ..
        } = args.command
        else {
            panic!("expected build");
        };
        assert_eq!(targets, vec!["production", "testing"]);
        assert_eq!(max_parallel, Some(2));
        assert!(dry_run);
    }

    #[test]
    fn test_probe_url_conflicts_with_file() {
        let result = Args::try_parse_from([
            "stageline",
            "probe",
            "--url",
            "http://localhost:3000/health",
            "--file",
            "Dockerfile",
            "--stage",
            "production",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_load_manifest_missing_file() {
        let err = load_manifest(Path::new("/nonexistent/Dockerfile")).unwrap_err();
        assert!(err.to_string().contains("not found"));
    }
}
