//! Stage types for manifest definition
//!
//! This module defines stage types and their builder pattern.

#![allow(clippy::must_use_candidate, clippy::return_self_not_must_use)]

use super::Validate;
use super::environment::{Environment, is_valid_variable_name};
use super::errors::ValidationError;
use super::healthcheck::HealthCheck;
use super::instruction::{CommandForm, Instruction, SourceRef};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Maximum length of a stage name
pub const MAX_STAGE_NAME_LEN: usize = 64;

static STAGE_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z0-9][a-z0-9_.-]*$").expect("static regex"));

/// What a stage starts from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "SourceRef", into = "SourceRef")]
pub enum BaseRef {
    /// An external image reference
    Image(String),
    /// The filesystem of an earlier stage
    Stage(String),
}

impl BaseRef {
    /// Creates an image base
    pub fn image(reference: impl Into<String>) -> Self {
        Self::Image(reference.into())
    }

    /// Creates a stage base
    pub fn stage(name: impl Into<String>) -> Self {
        Self::Stage(name.into())
    }

    /// Returns the parent stage name for stage bases
    pub fn stage_name(&self) -> Option<&str> {
        match self {
            Self::Stage(name) => Some(name),
            Self::Image(_) => None,
        }
    }
}

impl fmt::Display for BaseRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Image(reference) | Self::Stage(reference) => write!(f, "{reference}"),
        }
    }
}

impl TryFrom<SourceRef> for BaseRef {
    type Error = String;

    fn try_from(repr: SourceRef) -> Result<Self, Self::Error> {
        match (repr.stage, repr.image) {
            (Some(_), Some(_)) => Err("stage base needs either `stage` or `image`, not both".into()),
            (Some(stage), None) => Ok(Self::Stage(stage)),
            (None, Some(image)) => Ok(Self::Image(image)),
            (None, None) => Err("stage base needs a `stage` or an `image`".into()),
        }
    }
}

impl From<BaseRef> for SourceRef {
    fn from(base: BaseRef) -> Self {
        match base {
            BaseRef::Image(image) => Self {
                stage: None,
                image: Some(image),
            },
            BaseRef::Stage(stage) => Self {
                stage: Some(stage),
                image: None,
            },
        }
    }
}

/// Transport protocol of an exposed port
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// TCP (default)
    #[default]
    Tcp,
    /// UDP
    Udp,
}

/// A port declared for the container runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "PortRepr", into = "String")]
pub struct Port {
    /// Port number
    pub number: u16,
    /// Whether the port is UDP
    pub udp: bool,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum PortRepr {
    Number(u16),
    Text(String),
}

impl Port {
    /// Creates a TCP port
    pub fn tcp(number: u16) -> Self {
        Self { number, udp: false }
    }

    /// Creates a UDP port
    pub fn udp(number: u16) -> Self {
        Self { number, udp: true }
    }

    /// Returns the protocol of this port
    pub fn protocol(&self) -> Protocol {
        if self.udp { Protocol::Udp } else { Protocol::Tcp }
    }
}

impl std::str::FromStr for Port {
    type Err = String;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let (number, proto) = text.split_once('/').unwrap_or((text, "tcp"));
        let number: u16 = number
            .trim()
            .parse()
            .map_err(|_| format!("invalid port '{text}'"))?;
        match proto.to_ascii_lowercase().as_str() {
            "tcp" => Ok(Self::tcp(number)),
            "udp" => Ok(Self::udp(number)),
            other => Err(format!("unknown protocol '{other}' in port '{text}'")),
        }
    }
}

impl TryFrom<PortRepr> for Port {
    type Error = String;

    fn try_from(repr: PortRepr) -> Result<Self, Self::Error> {
        match repr {
            PortRepr::Number(number) => Ok(Self::tcp(number)),
            PortRepr::Text(text) => text.parse(),
        }
    }
}

impl From<Port> for String {
    fn from(port: Port) -> Self {
        port.to_string()
    }
}

impl fmt::Display for Port {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.udp {
            write!(f, "{}/udp", self.number)
        } else {
            write!(f, "{}", self.number)
        }
    }
}

/// Whether an artifact may end up in a deployable image
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactScope {
    /// Needed at runtime
    #[default]
    Runtime,
    /// Only needed to build or test (sources, dev dependencies)
    Development,
}

/// A path produced inside a stage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    /// Absolute path inside the stage filesystem
    pub path: String,
    /// Promotion scope
    #[serde(default)]
    pub scope: ArtifactScope,
}

impl Artifact {
    /// Creates a runtime artifact
    pub fn runtime(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            scope: ArtifactScope::Runtime,
        }
    }

    /// Creates a development-only artifact
    pub fn development(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            scope: ArtifactScope::Development,
        }
    }

    /// Returns true if `path` is this artifact or lies inside it
    pub fn covers(&self, path: &str) -> bool {
        let own = self.path.trim_end_matches('/');
        let path = path.trim_end_matches('/');
        path == own || path.strip_prefix(own).is_some_and(|rest| rest.starts_with('/'))
    }

    /// Returns true if this artifact lies strictly inside the absolute `path`
    ///
    /// `*` and `?` in `path` match within one segment, as in `COPY` sources.
    pub fn lies_within(&self, path: &str) -> bool {
        let own = self.path.trim_end_matches('/');
        let path = path.trim_end_matches('/');
        if path.is_empty() {
            return !own.is_empty();
        }
        if !path.contains(['*', '?']) {
            return own.strip_prefix(path).is_some_and(|rest| rest.starts_with('/'));
        }
        let body = regex::escape(path)
            .replace(r"\*", "[^/]*")
            .replace(r"\?", "[^/]");
        Regex::new(&format!("^{body}/")).is_ok_and(|pattern| pattern.is_match(own))
    }
}

/// A stage in a manifest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stage {
    /// Stage name
    pub name: String,

    /// Image or earlier stage this stage starts from
    pub from: BaseRef,

    /// Target platform of the base image
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub platform: Option<String>,

    /// Human description
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub description: Option<String>,

    /// Ordered build instructions
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub instructions: Vec<Instruction>,

    /// Ports declared for the container runtime
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub expose: Vec<Port>,

    /// Health check handed to the container runtime
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub healthcheck: Option<HealthCheck>,

    /// Container entrypoint
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub entrypoint: Option<CommandForm>,

    /// Default container command
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub cmd: Option<CommandForm>,

    /// Paths this stage produces, with their promotion scope
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub artifacts: Vec<Artifact>,

    /// Whether this stage is meant for long-lived deployment
    #[serde(skip_serializing_if = "std::ops::Not::not", default)]
    pub deployable: bool,
}

impl Validate for Stage {
    type Error = ValidationError;

    fn validate(&self) -> Result<(), Self::Error> {
        validate_stage_name(&self.name)?;

        match &self.from {
            BaseRef::Image(reference) if reference.trim().is_empty() => {
                return Err(ValidationError::EmptyImage {
                    stage: self.name.clone(),
                });
            }
            BaseRef::Stage(parent) if parent.trim().is_empty() => {
                return Err(ValidationError::EmptyImage {
                    stage: self.name.clone(),
                });
            }
            _ => {}
        }

        for port in &self.expose {
            if port.number == 0 {
                return Err(ValidationError::InvalidPort {
                    stage: self.name.clone(),
                    port: 0,
                });
            }
        }

        for instruction in &self.instructions {
            self.validate_instruction(instruction)?;
        }

        if let Some(check) = &self.healthcheck {
            check.validate()?;
        }

        Ok(())
    }
}

impl Stage {
    /// Creates a new stage
    pub fn new(name: impl Into<String>, from: BaseRef) -> Self {
        Self {
            name: name.into(),
            from,
            platform: None,
            description: None,
            instructions: Vec::new(),
            expose: Vec::new(),
            healthcheck: None,
            entrypoint: None,
            cmd: None,
            artifacts: Vec::new(),
            deployable: false,
        }
    }

    /// Creates a stage starting from an external image
    pub fn from_image(name: impl Into<String>, image: impl Into<String>) -> Self {
        Self::new(name, BaseRef::image(image))
    }

    /// Creates a stage deriving from an earlier stage
    pub fn from_stage(name: impl Into<String>, parent: impl Into<String>) -> Self {
        Self::new(name, BaseRef::stage(parent))
    }

    /// Creates a new stage builder
    pub fn builder(name: impl Into<String>, from: BaseRef) -> StageBuilder {
        StageBuilder::new(name, from)
    }

    /// Sets the instructions of this stage
    pub fn with_instructions(mut self, instructions: Vec<Instruction>) -> Self {
        self.instructions = instructions;
        self
    }

    /// Sets the default command
    pub fn with_cmd(mut self, cmd: CommandForm) -> Self {
        self.cmd = Some(cmd);
        self
    }

    /// Sets the health check
    pub fn with_healthcheck(mut self, check: HealthCheck) -> Self {
        self.healthcheck = Some(check);
        self
    }

    /// Stages this stage depends on, parent first, without duplicates
    pub fn references(&self) -> Vec<&str> {
        let mut refs: Vec<&str> = Vec::new();
        let parent = self.from.stage_name();
        let copies = self.instructions.iter().filter_map(Instruction::copy_stage);
        for name in parent.into_iter().chain(copies) {
            if !refs.contains(&name) {
                refs.push(name);
            }
        }
        refs
    }

    /// Environment set by this stage's own `ENV` instructions
    pub fn env(&self) -> Environment {
        self.instructions
            .iter()
            .fold(Environment::new(), |env, instruction| match instruction {
                Instruction::Env { key, value } => env.set(key, value),
                _ => env,
            })
    }

    /// Returns the declared artifact containing `path`, most specific first
    pub fn artifact_for(&self, path: &str) -> Option<&Artifact> {
        self.artifacts
            .iter()
            .filter(|artifact| artifact.covers(path))
            .max_by_key(|artifact| artifact.path.len())
    }

    fn validate_instruction(&self, instruction: &Instruction) -> Result<(), ValidationError> {
        let empty = |kind: &str| ValidationError::EmptyInstruction {
            stage: self.name.clone(),
            kind: kind.to_string(),
        };

        match instruction {
            Instruction::Run { command } if command.trim().is_empty() => Err(empty("RUN")),
            Instruction::Copy { sources, dest, .. }
                if sources.is_empty() || dest.trim().is_empty() =>
            {
                Err(empty("COPY"))
            }
            Instruction::Env { key, .. } if !is_valid_variable_name(key) => {
                Err(ValidationError::InvalidVariableName { name: key.clone() })
            }
            Instruction::Arg { name, .. } if !is_valid_variable_name(name) => {
                Err(ValidationError::InvalidVariableName { name: name.clone() })
            }
            Instruction::Workdir { path } if path.trim().is_empty() => Err(empty("WORKDIR")),
            Instruction::User { user } if user.trim().is_empty() => Err(empty("USER")),
            Instruction::WriteFile { path, .. } if path.trim().is_empty() => {
                Err(empty("write_file"))
            }
            _ => Ok(()),
        }
    }
}

/// Checks a stage name against the naming rules
///
/// # Errors
///
/// Returns the first rule the name breaks.
pub fn validate_stage_name(name: &str) -> Result<(), ValidationError> {
    if name.is_empty() {
        return Err(ValidationError::EmptyName);
    }
    if name.len() > MAX_STAGE_NAME_LEN {
        return Err(ValidationError::NameTooLong {
            max: MAX_STAGE_NAME_LEN,
            len: name.len(),
        });
    }
    if !STAGE_NAME.is_match(name) {
        return Err(ValidationError::InvalidNameChars {
            name: name.to_string(),
        });
    }
    Ok(())
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Stage({} <- {}): {} instructions",
            self.name,
            self.from,
            self.instructions.len()
        )
    }
}

/// Builder for creating stages
pub struct StageBuilder {
    stage: Stage,
}

impl StageBuilder {
    /// Creates a new stage builder
    pub fn new(name: impl Into<String>, from: BaseRef) -> Self {
        Self {
            stage: Stage::new(name, from),
        }
    }

    /// Sets the description
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.stage.description = Some(description.into());
        self
    }

    /// Sets the base image platform
    pub fn platform(mut self, platform: impl Into<String>) -> Self {
        self.stage.platform = Some(platform.into());
        self
    }

    /// Adds an instruction
    pub fn instruction(mut self, instruction: Instruction) -> Self {
        self.stage.instructions.push(instruction);
        self
    }

    /// Adds multiple instructions
    pub fn instructions(mut self, mut instructions: Vec<Instruction>) -> Self {
        self.stage.instructions.append(&mut instructions);
        self
    }

    /// Adds a `RUN` instruction
    pub fn run(self, command: impl Into<String>) -> Self {
        self.instruction(Instruction::run(command))
    }

    /// Adds an `ENV` instruction
    pub fn env(self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.instruction(Instruction::env(key, value))
    }

    /// Exposes a TCP port
    pub fn expose(mut self, port: u16) -> Self {
        self.stage.expose.push(Port::tcp(port));
        self
    }

    /// Sets the health check
    pub fn healthcheck(mut self, check: HealthCheck) -> Self {
        self.stage.healthcheck = Some(check);
        self
    }

    /// Sets the entrypoint
    pub fn entrypoint(mut self, entrypoint: CommandForm) -> Self {
        self.stage.entrypoint = Some(entrypoint);
        self
    }

    /// Sets the default command
    pub fn cmd(mut self, cmd: CommandForm) -> Self {
        self.stage.cmd = Some(cmd);
        self
    }

    /// Declares an artifact
    pub fn artifact(mut self, artifact: Artifact) -> Self {
        self.stage.artifacts.push(artifact);
        self
    }

    /// Marks the stage as deployable
    pub fn deployable(mut self) -> Self {
        self.stage.deployable = true;
        self
    }

    /// Builds the stage
    #[allow(clippy::missing_errors_doc)]
    pub fn build(self) -> Result<Stage, ValidationError> {
        self.stage.validate()?;
        Ok(self.stage)
    }

    /// Builds the stage without validation (for internal use)
    #[must_use]
    pub fn build_unchecked(self) -> Stage {
        self.stage
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_creation() {
        let stage = Stage::from_image("base", "node:20-alpine");

        assert_eq!(stage.name, "base");
        assert_eq!(stage.from, BaseRef::image("node:20-alpine"));
        assert!(stage.instructions.is_empty());
        assert!(stage.healthcheck.is_none());
        assert!(!stage.deployable);
    }

    #[test]
    fn test_stage_without_instructions_is_valid() {
        let stage = Stage::from_image("runtime", "alpine:3.20");
        assert!(stage.validate().is_ok());
    }

    #[test]
    fn test_stage_validation_empty_name() {
        let stage = Stage::from_image("", "alpine:3.20");
        assert_eq!(stage.validate(), Err(ValidationError::EmptyName));
    }

    #[test]
    fn test_stage_validation_name_too_long() {
        let stage = Stage::from_image("a".repeat(65), "alpine:3.20");
        assert!(matches!(
            stage.validate(),
            Err(ValidationError::NameTooLong { max: 64, len: 65 })
        ));
    }

    #[test]
    fn test_stage_validation_uppercase_name() {
        let stage = Stage::from_image("Build", "alpine:3.20");
        assert!(matches!(
            stage.validate(),
            Err(ValidationError::InvalidNameChars { .. })
        ));
    }

    #[test]
    fn test_stage_validation_empty_image() {
        let stage = Stage::from_image("base", " ");
        assert!(matches!(
            stage.validate(),
            Err(ValidationError::EmptyImage { .. })
        ));
    }

    #[test]
    fn test_stage_validation_empty_run() {
        let stage = Stage::from_image("base", "alpine").with_instructions(vec![Instruction::run("")]);
        assert!(matches!(
            stage.validate(),
            Err(ValidationError::EmptyInstruction { ref kind, .. }) if kind == "RUN"
        ));
    }

    #[test]
    fn test_stage_validation_bad_env_name() {
        let stage = Stage::from_image("base", "alpine")
            .with_instructions(vec![Instruction::env("NODE-ENV", "production")]);
        assert!(matches!(
            stage.validate(),
            Err(ValidationError::InvalidVariableName { .. })
        ));
    }

    #[test]
    fn test_stage_validation_port_zero() {
        let stage = StageBuilder::new("web", BaseRef::image("nginx:1.27"))
            .expose(0)
            .build();
        assert!(matches!(stage, Err(ValidationError::InvalidPort { port: 0, .. })));
    }

    #[test]
    fn test_references_parent_first_deduplicated() {
        let stage = Stage::from_stage("development", "base").with_instructions(vec![
            Instruction::copy_from("dependencies", ["/app/node_modules"], "./node_modules"),
            Instruction::copy_from("base", ["/usr/bin/deno"], "/usr/local/bin/"),
            Instruction::copy_from("dependencies", ["/app/package.json"], "./"),
        ]);
        assert_eq!(stage.references(), vec!["base", "dependencies"]);
    }

    #[test]
    fn test_stage_env_collects_env_instructions() {
        let stage = Stage::from_image("base", "alpine").with_instructions(vec![
            Instruction::env("NODE_ENV", "development"),
            Instruction::run("true"),
            Instruction::env("NODE_ENV", "test"),
        ]);
        assert_eq!(stage.env().get("NODE_ENV").map(String::as_str), Some("test"));
    }

    #[test]
    fn test_artifact_covers() {
        let artifact = Artifact::development("/app/node_modules");
        assert!(artifact.covers("/app/node_modules"));
        assert!(artifact.covers("/app/node_modules/"));
        assert!(artifact.covers("/app/node_modules/jest"));
        assert!(!artifact.covers("/app/node_modules_prod"));
        assert!(!artifact.covers("/app"));
    }

    #[test]
    fn test_artifact_lies_within() {
        let artifact = Artifact::development("/app/node_modules");
        assert!(artifact.lies_within("/app"));
        assert!(artifact.lies_within("/app/"));
        assert!(artifact.lies_within("/"));
        assert!(artifact.lies_within("/ap?"));
        assert!(artifact.lies_within("/*"));
        assert!(!artifact.lies_within("/app/node_modules"));
        assert!(!artifact.lies_within("/ap"));
        assert!(!artifact.lies_within("/app/package*.json"));
    }

    #[test]
    fn test_artifact_for_prefers_most_specific() {
        let stage = StageBuilder::new("development", BaseRef::stage("base"))
            .artifact(Artifact::development("/app"))
            .artifact(Artifact::runtime("/app/dist"))
            .build_unchecked();
        assert_eq!(
            stage.artifact_for("/app/dist/cli").map(|a| a.scope),
            Some(ArtifactScope::Runtime)
        );
        assert_eq!(
            stage.artifact_for("/app/src").map(|a| a.scope),
            Some(ArtifactScope::Development)
        );
        assert!(stage.artifact_for("/usr/bin").is_none());
    }

    #[test]
    fn test_port_parse_and_display() {
        assert_eq!("3000".parse::<Port>(), Ok(Port::tcp(3000)));
        assert_eq!("53/udp".parse::<Port>(), Ok(Port::udp(53)));
        assert!("http".parse::<Port>().is_err());
        assert!("80/sctp".parse::<Port>().is_err());
        assert_eq!(Port::udp(53).to_string(), "53/udp");
        assert_eq!(Port::tcp(8080).protocol(), Protocol::Tcp);
    }

    #[test]
    fn test_port_serde_accepts_numbers_and_strings() {
        let ports: Vec<Port> = serde_yaml::from_str("[3000, \"53/udp\"]").unwrap();
        assert_eq!(ports, vec![Port::tcp(3000), Port::udp(53)]);
        assert_eq!(serde_json::to_string(&Port::tcp(3000)).unwrap(), "\"3000\"");
    }

    #[test]
    fn test_base_ref_serde() {
        let base: BaseRef = serde_yaml::from_str("stage: base").unwrap();
        assert_eq!(base, BaseRef::stage("base"));
        let base: BaseRef = serde_yaml::from_str("image: node:20-alpine").unwrap();
        assert_eq!(base, BaseRef::image("node:20-alpine"));
        assert!(serde_yaml::from_str::<BaseRef>("{}").is_err());
    }

    #[test]
    fn test_stage_display() {
        let stage = Stage::from_stage("testing", "development")
            .with_instructions(vec![Instruction::run("npm test")]);
        assert_eq!(stage.to_string(), "Stage(testing <- development): 1 instructions");
    }

    #[test]
    fn test_stage_builder() {
        let stage = StageBuilder::new("production", BaseRef::image("node:20-alpine"))
            .description("runtime image")
            .run("apk add --no-cache curl")
            .env("NODE_ENV", "production")
            .expose(3000)
            .healthcheck(HealthCheck::http("http://localhost:3000/health"))
            .cmd(CommandForm::exec(["node", "dist/cli/main.js", "start"]))
            .deployable()
            .build()
            .unwrap();

        assert_eq!(stage.instructions.len(), 2);
        assert_eq!(stage.expose, vec![Port::tcp(3000)]);
        assert!(stage.deployable);
        assert!(stage.healthcheck.is_some());
    }
}
