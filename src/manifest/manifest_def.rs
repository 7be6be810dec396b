//! Manifest definition and builder

#![allow(clippy::must_use_candidate, clippy::return_self_not_must_use)]

use crate::manifest::environment::{Environment, is_valid_variable_name};
use crate::manifest::errors::{ManifestError, ValidationError};
use crate::manifest::graph::StageGraph;
use crate::manifest::healthcheck::HealthCheck;
use crate::manifest::instruction::{CommandForm, Instruction};
use crate::manifest::stage::{BaseRef, Port, Stage};
use crate::manifest::types::Validate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;

/// A build argument declared before the first stage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildArg {
    /// Argument name
    pub name: String,
    /// Default value
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub default: Option<String>,
}

/// A staged build manifest: ordered stages forming a DAG
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    /// Manifest name
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub name: Option<String>,

    /// Human description
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub description: Option<String>,

    /// Global build arguments
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub args: Vec<BuildArg>,

    /// Stages in declaration order
    pub stages: Vec<Stage>,

    /// Build-context paths allowed to be copied into deployable stages
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub promotable_context: Vec<String>,
}

impl Validate for Manifest {
    type Error = ValidationError;

    fn validate(&self) -> Result<(), Self::Error> {
        if self.stages.is_empty() {
            return Err(ValidationError::EmptyManifest);
        }

        for arg in &self.args {
            if !is_valid_variable_name(&arg.name) {
                return Err(ValidationError::InvalidVariableName {
                    name: arg.name.clone(),
                });
            }
        }

        self.check_single_line_values()?;

        let mut positions: HashMap<&str, usize> = HashMap::new();
        for (index, stage) in self.stages.iter().enumerate() {
            stage.validate()?;
            if positions.insert(stage.name.as_str(), index).is_some() {
                return Err(ValidationError::DuplicateStage {
                    name: stage.name.clone(),
                });
            }
        }

        for stage in &self.stages {
            for reference in stage.references() {
                if !positions.contains_key(reference) {
                    return Err(ValidationError::UnknownStage {
                        stage: stage.name.clone(),
                        reference: reference.to_string(),
                    });
                }
            }
        }

        if let Some(cycle) = StageGraph::new(self).find_cycle() {
            return Err(ValidationError::CyclicReference { cycle });
        }

        // Acyclic is not enough: references must also point backward.
        for (index, stage) in self.stages.iter().enumerate() {
            for reference in stage.references() {
                if positions[reference] >= index {
                    return Err(ValidationError::ForwardReference {
                        stage: stage.name.clone(),
                        reference: reference.to_string(),
                    });
                }
            }
        }

        Ok(())
    }
}

/// Effective settings of a stage after folding its parent chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedStage {
    /// Stage name
    pub name: String,
    /// Stage names from the root stage down to this one
    pub chain: Vec<String>,
    /// External image at the root of the chain
    pub image: String,
    /// Effective environment
    pub env: Environment,
    /// Effective working directory
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workdir: Option<String>,
    /// Effective user
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    /// Exposed ports, accumulated along the chain
    pub ports: BTreeSet<Port>,
    /// Effective health check (`None` when absent or disabled)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub healthcheck: Option<HealthCheck>,
    /// Effective entrypoint
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entrypoint: Option<CommandForm>,
    /// Effective command
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cmd: Option<CommandForm>,
}

impl ResolvedStage {
    /// Returns true if the container process runs as root
    pub fn runs_as_root(&self) -> bool {
        self.user
            .as_deref()
            .is_none_or(|user| matches!(user.split(':').next(), Some("root" | "0")))
    }
}

impl Manifest {
    /// Creates a new manifest builder
    pub fn builder() -> ManifestBuilder {
        ManifestBuilder::new()
    }

    /// Returns manifest name
    pub fn name(&self) -> Option<&String> {
        self.name.as_ref()
    }

    /// Returns number of stages
    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    /// Looks up a stage by name
    pub fn stage(&self, name: &str) -> Option<&Stage> {
        self.stages.iter().find(|stage| stage.name == name)
    }

    /// Returns the declaration index of a stage
    pub fn stage_index(&self, name: &str) -> Option<usize> {
        self.stages.iter().position(|stage| stage.name == name)
    }

    /// The stage built when no target is given (the last one)
    pub fn default_target(&self) -> Option<&Stage> {
        self.stages.last()
    }

    /// Stages marked deployable
    pub fn deployable_stages(&self) -> impl Iterator<Item = &Stage> {
        self.stages.iter().filter(|stage| stage.deployable)
    }

    /// Rejects `ENV`, `ARG` and `LABEL` values containing line breaks
    ///
    /// A Dockerfile cannot carry such values, so they would not survive
    /// rendering.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::MultilineValue`] for the first offending value.
    pub fn check_single_line_values(&self) -> Result<(), ValidationError> {
        let multiline = |text: &str| text.contains(['\n', '\r']);
        let error = |stage: &str, key: &str| ValidationError::MultilineValue {
            stage: stage.to_string(),
            key: key.to_string(),
        };

        for arg in &self.args {
            if arg.default.as_deref().is_some_and(multiline) {
                return Err(error("(global)", &arg.name));
            }
        }

        for stage in &self.stages {
            for instruction in &stage.instructions {
                let offending = match instruction {
                    Instruction::Env { key, value } if multiline(value) => Some(key),
                    Instruction::Arg {
                        name,
                        default: Some(value),
                    } if multiline(value) => Some(name),
                    Instruction::Label { key, value } if multiline(key) || multiline(value) => {
                        Some(key)
                    }
                    _ => None,
                };
                if let Some(key) = offending {
                    return Err(error(&stage.name, key));
                }
            }
        }
        Ok(())
    }

    /// Folds the parent chain of `name` into its effective settings
    pub fn resolve(&self, name: &str) -> Option<ResolvedStage> {
        let mut chain: Vec<&Stage> = Vec::new();
        let mut seen = HashSet::new();
        let mut current = self.stage(name)?;
        loop {
            if !seen.insert(current.name.as_str()) {
                break;
            }
            chain.push(current);
            match current.from.stage_name().and_then(|parent| self.stage(parent)) {
                Some(parent) => current = parent,
                None => break,
            }
        }
        chain.reverse();

        let root = chain.first()?;
        let image = match &root.from {
            BaseRef::Image(image) => image.clone(),
            BaseRef::Stage(missing) => missing.clone(),
        };

        let mut resolved = ResolvedStage {
            name: name.to_string(),
            chain: chain.iter().map(|stage| stage.name.clone()).collect(),
            image,
            env: Environment::new(),
            workdir: None,
            user: None,
            ports: BTreeSet::new(),
            healthcheck: None,
            entrypoint: None,
            cmd: None,
        };

        for stage in chain {
            for instruction in &stage.instructions {
                match instruction {
                    Instruction::Env { key, value } => {
                        let value = resolved.env.resolve(value);
                        resolved.env.insert(key, value);
                    }
                    Instruction::Workdir { path } => {
                        let path = resolved.env.resolve(path);
                        resolved.workdir = Some(join_workdir(resolved.workdir.as_deref(), &path));
                    }
                    Instruction::User { user } => resolved.user = Some(user.clone()),
                    _ => {}
                }
            }
            resolved.ports.extend(stage.expose.iter().copied());
            if let Some(check) = &stage.healthcheck {
                resolved.healthcheck = (!check.is_disabled()).then(|| check.clone());
            }
            if let Some(entrypoint) = &stage.entrypoint {
                resolved.entrypoint = Some(entrypoint.clone());
                // a new entrypoint drops the inherited command
                resolved.cmd = None;
            }
            if let Some(cmd) = &stage.cmd {
                resolved.cmd = Some(cmd.clone());
            }
        }

        Some(resolved)
    }

    /// Keeps only the stages needed to build `targets`, in declaration order
    ///
    /// # Errors
    ///
    /// Returns [`ManifestError::UnknownTarget`] for a target that is not a stage.
    pub fn prune_to(&self, targets: &[String]) -> Result<Manifest, ManifestError> {
        let graph = StageGraph::new(self);
        let keep = graph.closure(targets)?;
        let keep: HashSet<&str> = keep.iter().map(String::as_str).collect();

        Ok(Manifest {
            stages: self
                .stages
                .iter()
                .filter(|stage| keep.contains(stage.name.as_str()))
                .cloned()
                .collect(),
            ..self.clone()
        })
    }
}

fn join_workdir(current: Option<&str>, path: &str) -> String {
    match current {
        Some(base) if !path.starts_with('/') => {
            format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches("./"))
        }
        _ => path.to_string(),
    }
}

impl fmt::Display for Manifest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Manifest({}): {} stages",
            self.name.as_deref().unwrap_or("unnamed"),
            self.stages.len()
        )
    }
}

/// Builder for creating manifests
#[derive(Debug, Clone)]
pub struct ManifestBuilder {
    manifest: Manifest,
}

impl ManifestBuilder {
    /// Creates a new manifest builder
    pub fn new() -> Self {
        Self {
            manifest: Manifest {
                name: None,
                description: None,
                args: Vec::new(),
                stages: Vec::new(),
                promotable_context: Vec::new(),
            },
        }
    }

    /// Sets manifest name
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.manifest.name = Some(name.into());
        self
    }

    /// Sets manifest description
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.manifest.description = Some(description.into());
        self
    }

    /// Declares a global build argument
    pub fn arg(mut self, name: impl Into<String>, default: Option<String>) -> Self {
        self.manifest.args.push(BuildArg {
            name: name.into(),
            default,
        });
        self
    }

    /// Adds a stage to manifest
    pub fn stage(mut self, stage: Stage) -> Self {
        self.manifest.stages.push(stage);
        self
    }

    /// Adds multiple stages to manifest
    pub fn stages(mut self, mut stages: Vec<Stage>) -> Self {
        self.manifest.stages.append(&mut stages);
        self
    }

    /// Allows a build-context path to be promoted into deployable stages
    pub fn promotable_context(mut self, path: impl Into<String>) -> Self {
        self.manifest.promotable_context.push(path.into());
        self
    }

    /// Builds manifest
    #[allow(clippy::missing_errors_doc)]
    pub fn build(self) -> Result<Manifest, ValidationError> {
        self.manifest.validate()?;
        Ok(self.manifest)
    }

    /// Builds manifest without validation (for internal use)
    #[must_use]
    pub fn build_unchecked(self) -> Manifest {
        self.manifest
    }
}

impl Default for ManifestBuilder {
    fn default() -> Self {
        Self::new()
    }
}
