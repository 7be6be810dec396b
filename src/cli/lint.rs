//! `stageline lint` - Analyze manifests for best practices

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use stageline::manifest::{ViolationKind, audit};
use stageline::{BaseRef, Instruction, Manifest, StageGraph};
use std::fmt::Write as _;

static SECRET_NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(password|passwd|secret|token|api_?key|private_?key|credentials?)")
        .expect("static regex")
});

static PACKAGE_INSTALL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(apk add|apt-get install|apt install|yum install|dnf install)\b")
        .expect("static regex")
});

static DEPENDENCY_INSTALL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(npm (ci|install|i)|yarn( install)?|pnpm install)(\s|$)").expect("static regex")
});

static DOWNLOAD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:^|[;&|(]\s*)(curl|wget)\s").expect("static regex"));

/// One finding
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LintMessage {
    /// Rule code (`SL001` ...)
    pub code: String,
    /// What is wrong
    pub message: String,
    /// Stage the finding belongs to
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,
    /// How bad it is
    pub severity: LintSeverity,
    /// How to fix it
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
}

impl LintMessage {
    fn new(code: &str, severity: LintSeverity, stage: &str, message: String) -> Self {
        Self {
            code: code.to_string(),
            message,
            stage: Some(stage.to_string()),
            severity,
            suggestion: None,
        }
    }

    fn suggest(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }
}

/// Severity of a finding, ordered from least to most severe
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LintSeverity {
    /// Worth knowing
    Info,
    /// Probably a mistake
    Warning,
    /// Must be fixed
    Error,
}

impl std::fmt::Display for LintSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LintSeverity::Info => write!(f, "info"),
            LintSeverity::Warning => write!(f, "warning"),
            LintSeverity::Error => write!(f, "error"),
        }
    }
}

/// Settings for a lint run
#[derive(Debug)]
pub struct LintConfig {
    /// Findings below this severity are dropped
    pub min_severity: LintSeverity,
    /// Print suggestions in text output
    pub show_suggestions: bool,
    /// Output format
    pub format: OutputFormat,
}

impl Default for LintConfig {
    fn default() -> Self {
        Self {
            min_severity: LintSeverity::Info,
            show_suggestions: false,
            format: OutputFormat::Text,
        }
    }
}

/// Lint output format
#[derive(Debug, Clone, Copy)]
pub enum OutputFormat {
    /// One finding per line
    Text,
    /// JSON array
    Json,
}

/// Runs every rule against `manifest`
pub fn lint_manifest(manifest: &Manifest, config: &LintConfig) -> Vec<LintMessage> {
    let mut messages = Vec::new();

    messages.extend(check_base_image_tags(manifest));
    messages.extend(check_package_cache(manifest));
    messages.extend(check_root_user(manifest));
    messages.extend(check_health_checks(manifest));
    messages.extend(check_secrets(manifest));
    messages.extend(check_production_dependencies(manifest));
    messages.extend(check_download_retry(manifest));
    messages.extend(check_promotion(manifest));
    messages.extend(check_unreferenced_stages(manifest));

    messages.retain(|msg| msg.severity >= config.min_severity);
    tracing::debug!(findings = messages.len(), "Lint finished");
    messages
}

/// Returns true if any finding is an error
pub fn has_errors(messages: &[LintMessage]) -> bool {
    messages.iter().any(|m| m.severity == LintSeverity::Error)
}

fn run_commands(instructions: &[Instruction]) -> impl Iterator<Item = &str> {
    instructions.iter().filter_map(|i| match i {
        Instruction::Run { command } => Some(command.as_str()),
        _ => None,
    })
}

fn check_base_image_tags(manifest: &Manifest) -> Vec<LintMessage> {
    let mut messages = Vec::new();

    for stage in &manifest.stages {
        let BaseRef::Image(image) = &stage.from else {
            continue;
        };
        if image == "scratch" || image.contains('@') {
            continue;
        }
        let name = image.rsplit('/').next().unwrap_or(image);
        let tag = name.split_once(':').map(|(_, tag)| tag);
        if tag.is_none_or(|tag| tag == "latest") {
            messages.push(
                LintMessage::new(
                    "SL001",
                    LintSeverity::Warning,
                    &stage.name,
                    format!("Base image '{image}' is not pinned to a version"),
                )
                .suggest("Use an explicit tag such as node:20-alpine, or a digest"),
            );
        }
    }

    messages
}

fn check_package_cache(manifest: &Manifest) -> Vec<LintMessage> {
    let mut messages = Vec::new();

    for stage in &manifest.stages {
        for command in run_commands(&stage.instructions) {
            let Some(found) = PACKAGE_INSTALL.find(command) else {
                continue;
            };
            let purged = command.contains("--no-cache")
                || command.contains("rm -rf /var/cache/apk")
                || command.contains("rm -rf /var/lib/apt/lists")
                || command.contains("clean all");
            if !purged {
                messages.push(
                    LintMessage::new(
                        "SL002",
                        LintSeverity::Warning,
                        &stage.name,
                        format!("'{}' leaves the package cache in the layer", found.as_str()),
                    )
                    .suggest(
                        "Use apk add --no-cache, or remove the package lists in the same RUN",
                    ),
                );
            }
        }
    }

    messages
}

fn check_root_user(manifest: &Manifest) -> Vec<LintMessage> {
    manifest
        .deployable_stages()
        .filter_map(|stage| manifest.resolve(&stage.name))
        .filter(stageline::manifest::ResolvedStage::runs_as_root)
        .map(|resolved| {
            LintMessage::new(
                "SL003",
                LintSeverity::Error,
                &resolved.name,
                "Deployable stage runs as root".to_string(),
            )
            .suggest("Create an unprivileged user and switch to it with USER")
        })
        .collect()
}

fn check_health_checks(manifest: &Manifest) -> Vec<LintMessage> {
    manifest
        .deployable_stages()
        .filter_map(|stage| manifest.resolve(&stage.name))
        .filter(|resolved| resolved.healthcheck.is_none())
        .map(|resolved| {
            LintMessage::new(
                "SL004",
                LintSeverity::Warning,
                &resolved.name,
                "Deployable stage has no health check".to_string(),
            )
            .suggest("Add HEALTHCHECK CMD curl -f http://localhost:<port>/health || exit 1")
        })
        .collect()
}

fn check_secrets(manifest: &Manifest) -> Vec<LintMessage> {
    let mut messages = Vec::new();

    let global = manifest
        .args
        .iter()
        .filter_map(|arg| arg.default.as_deref().map(|value| (arg.name.as_str(), value)));
    for (name, value) in global {
        if SECRET_NAME.is_match(name) && !value.is_empty() {
            messages.push(secret_message("(global)", "ARG", name));
        }
    }

    for stage in &manifest.stages {
        for instruction in &stage.instructions {
            let (kind, name, value) = match instruction {
                Instruction::Env { key, value } => ("ENV", key, value.as_str()),
                Instruction::Arg {
                    name,
                    default: Some(value),
                } => ("ARG", name, value.as_str()),
                _ => continue,
            };
            if SECRET_NAME.is_match(name) && !value.is_empty() && !value.starts_with('$') {
                messages.push(secret_message(&stage.name, kind, name));
            }
        }
    }

    messages
}

fn secret_message(stage: &str, kind: &str, name: &str) -> LintMessage {
    LintMessage::new(
        "SL005",
        LintSeverity::Error,
        stage,
        format!("{kind} {name} looks like a hard-coded secret"),
    )
    .suggest("Pass secrets at runtime or with a build secret mount, not in image layers")
}

fn check_production_dependencies(manifest: &Manifest) -> Vec<LintMessage> {
    let mut messages = Vec::new();

    for stage in manifest.deployable_stages() {
        for command in run_commands(&stage.instructions) {
            let Some(found) = DEPENDENCY_INSTALL.find(command) else {
                continue;
            };
            let production_only = ["--omit=dev", "--only=production", "--production", "--prod"]
                .iter()
                .any(|flag| command.contains(flag));
            if !production_only {
                messages.push(
                    LintMessage::new(
                        "SL006",
                        LintSeverity::Warning,
                        &stage.name,
                        format!(
                            "'{}' installs development dependencies into a deployable stage",
                            found.as_str().trim()
                        ),
                    )
                    .suggest("Use npm ci --omit=dev, or copy a production tree from another stage"),
                );
            }
        }
    }

    messages
}

fn check_download_retry(manifest: &Manifest) -> Vec<LintMessage> {
    let mut messages = Vec::new();

    for stage in &manifest.stages {
        for command in run_commands(&stage.instructions) {
            for capture in DOWNLOAD.captures_iter(command) {
                let tool = &capture[1];
                let retried = match tool {
                    "curl" => command.contains("--retry"),
                    _ => command.contains("--tries"),
                };
                if !retried {
                    messages.push(
                        LintMessage::new(
                            "SL007",
                            LintSeverity::Info,
                            &stage.name,
                            format!("Network download with {tool} without retry"),
                        )
                        .suggest("Add curl --retry 3 or wget --tries=3"),
                    );
                    break;
                }
            }
        }
    }

    messages
}

fn check_promotion(manifest: &Manifest) -> Vec<LintMessage> {
    audit(manifest)
        .into_iter()
        .map(|violation| {
            let suggestion = match violation.kind {
                ViolationKind::DevelopmentArtifact => {
                    "Copy a runtime artifact instead, such as a production-only dependency tree"
                }
                ViolationKind::SourcePromoted => {
                    "Copy build output from a build stage, or list the path as promotable context"
                }
                ViolationKind::InheritsDevelopment => {
                    "Start the deployable stage from a clean image and copy artifacts into it"
                }
            };
            LintMessage::new(
                "SL008",
                LintSeverity::Error,
                &violation.stage,
                violation.to_string(),
            )
            .suggest(suggestion)
        })
        .collect()
}

fn check_unreferenced_stages(manifest: &Manifest) -> Vec<LintMessage> {
    let graph = StageGraph::new(manifest);
    manifest
        .stages
        .iter()
        .filter(|stage| !stage.deployable && graph.dependents(&stage.name).is_empty())
        .map(|stage| {
            LintMessage::new(
                "SL009",
                LintSeverity::Info,
                &stage.name,
                "Stage is not deployable and nothing copies from it; it is only built as an explicit target"
                    .to_string(),
            )
        })
        .collect()
}

/// Formats findings for output
pub fn format_lint_messages(messages: &[LintMessage], config: &LintConfig) -> String {
    match config.format {
        OutputFormat::Text => {
            if messages.is_empty() {
                return "No lint issues found.".to_string();
            }
            let mut output = String::new();
            for msg in messages {
                let _ = write!(output, "{} [{}]", msg.code, msg.severity);
                if let Some(stage) = &msg.stage {
                    let _ = write!(output, " stage '{stage}'");
                }
                let _ = writeln!(output, ": {}", msg.message);
                if config.show_suggestions {
                    if let Some(suggestion) = &msg.suggestion {
                        let _ = writeln!(output, "  suggestion: {suggestion}");
                    }
                }
            }
            output.trim_end().to_string()
        }
        OutputFormat::Json => {
            serde_json::to_string_pretty(messages).unwrap_or_else(|_| "[]".to_string())
        }
    }
}
