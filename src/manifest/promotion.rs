//! Artifact promotion audit
//!
//! Deployable stages must only receive runtime artifacts. A copy of a
//! development-scoped artifact, an unlisted copy from the build context or a
//! base stage that already carries either of those is reported.

use super::instruction::{CopySource, Instruction};
use super::manifest_def::Manifest;
use super::stage::{Artifact, ArtifactScope, Stage};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// Kind of promotion problem
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    /// A development-scoped artifact is copied from another stage
    DevelopmentArtifact,
    /// Build-context files outside the allow-list are copied in
    SourcePromoted,
    /// The stage derives from a stage carrying development files
    InheritsDevelopment,
}

/// A promotion problem found in a deployable stage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromotionViolation {
    /// Deployable stage
    pub stage: String,
    /// What went wrong
    pub kind: ViolationKind,
    /// Stage the offending files come from (`None` for the build context)
    pub source: Option<String>,
    /// Offending path
    pub path: String,
}

impl fmt::Display for PromotionViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            ViolationKind::DevelopmentArtifact => write!(
                f,
                "deployable stage '{}' copies development artifact '{}' from '{}'",
                self.stage,
                self.path,
                self.source.as_deref().unwrap_or("?")
            ),
            ViolationKind::SourcePromoted => write!(
                f,
                "deployable stage '{}' copies '{}' from the build context",
                self.stage, self.path
            ),
            ViolationKind::InheritsDevelopment => write!(
                f,
                "deployable stage '{}' derives from '{}', which carries '{}'",
                self.stage,
                self.source.as_deref().unwrap_or("?"),
                self.path
            ),
        }
    }
}

/// Checks every deployable stage of `manifest`
pub fn audit(manifest: &Manifest) -> Vec<PromotionViolation> {
    let allow = ContextAllowList::new(&manifest.promotable_context);
    let mut violations = Vec::new();

    for stage in manifest.deployable_stages() {
        for instruction in &stage.instructions {
            let Instruction::Copy { from, sources, .. } = instruction else {
                continue;
            };
            match from {
                CopySource::Stage(origin) => {
                    for path in sources {
                        if development_artifact_copied(manifest, origin, &absolute(path)).is_some() {
                            violations.push(PromotionViolation {
                                stage: stage.name.clone(),
                                kind: ViolationKind::DevelopmentArtifact,
                                source: Some(origin.clone()),
                                path: path.clone(),
                            });
                        }
                    }
                }
                CopySource::Context => {
                    for path in sources.iter().filter(|path| !allow.permits(path)) {
                        violations.push(PromotionViolation {
                            stage: stage.name.clone(),
                            kind: ViolationKind::SourcePromoted,
                            source: None,
                            path: path.clone(),
                        });
                    }
                }
                CopySource::Image(_) => {}
            }
        }

        if let Some(parent) = stage.from.stage_name() {
            if let Some(path) = development_payload(manifest, parent, &allow) {
                violations.push(PromotionViolation {
                    stage: stage.name.clone(),
                    kind: ViolationKind::InheritsDevelopment,
                    source: Some(parent.to_string()),
                    path,
                });
            }
        }
    }

    violations
}

/// Walks `start` and its parents, child first
fn parent_chain<'a>(manifest: &'a Manifest, start: &str) -> Vec<&'a Stage> {
    let mut chain = Vec::new();
    let mut seen = HashSet::new();
    let mut next = manifest.stage(start);
    while let Some(stage) = next {
        if !seen.insert(stage.name.as_str()) {
            break;
        }
        chain.push(stage);
        next = stage.from.stage_name().and_then(|parent| manifest.stage(parent));
    }
    chain
}

/// Finds a development artifact that copying `path` out of `stage` would carry
///
/// The declaration covering `path` wins when one exists. A development
/// artifact nested inside `path` is carried along regardless.
fn development_artifact_copied<'a>(
    manifest: &'a Manifest,
    stage: &str,
    path: &str,
) -> Option<&'a Artifact> {
    let chain = parent_chain(manifest, stage);
    let covering = chain.iter().find_map(|stage| stage.artifact_for(path));
    if let Some(artifact) = covering {
        if artifact.scope == ArtifactScope::Development {
            return Some(artifact);
        }
    }
    chain
        .iter()
        .flat_map(|stage| &stage.artifacts)
        .find(|artifact| artifact.scope == ArtifactScope::Development && artifact.lies_within(path))
}

/// First development file a stage chain carries, if any
fn development_payload(manifest: &Manifest, stage: &str, allow: &ContextAllowList) -> Option<String> {
    for stage in parent_chain(manifest, stage) {
        if let Some(artifact) = stage
            .artifacts
            .iter()
            .find(|artifact| artifact.scope == ArtifactScope::Development)
        {
            return Some(artifact.path.clone());
        }
        for instruction in &stage.instructions {
            if let Instruction::Copy {
                from: CopySource::Context,
                sources,
                ..
            } = instruction
            {
                if let Some(path) = sources.iter().find(|path| !allow.permits(path)) {
                    return Some(path.clone());
                }
            }
        }
    }
    None
}

/// Build-context paths allowed into deployable stages (`*` matches within a segment)
struct ContextAllowList {
    patterns: Vec<Regex>,
}

impl ContextAllowList {
    fn new(entries: &[String]) -> Self {
        let patterns = entries
            .iter()
            .filter_map(|entry| {
                let entry = normalize(entry);
                let body = regex::escape(entry).replace(r"\*", "[^/]*");
                Regex::new(&format!("^{body}(/.*)?$")).ok()
            })
            .collect();
        Self { patterns }
    }

    fn permits(&self, path: &str) -> bool {
        let path = normalize(path);
        self.patterns.iter().any(|pattern| pattern.is_match(path))
    }
}

/// Stage-copy sources resolve against the root of the source stage
fn absolute(source: &str) -> String {
    let mut path = source;
    while let Some(rest) = path.strip_prefix("./") {
        path = rest;
    }
    if path == "." {
        path = "";
    }
    let path = path.trim_end_matches('/');
    if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    }
}

fn normalize(path: &str) -> &str {
    let path = path.strip_prefix("./").unwrap_or(path);
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() { path } else { trimmed }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::stage::{BaseRef, StageBuilder};

    fn manifest_with(production: Stage, allow: &[&str]) -> Manifest {
        let mut builder = Manifest::builder()
            .stage(
                StageBuilder::new("deps", BaseRef::image("node:20-alpine"))
                    .run("npm ci --omit=dev && cp -R node_modules /tmp/prod_node_modules")
                    .run("npm ci")
                    .artifact(Artifact::runtime("/tmp/prod_node_modules"))
                    .artifact(Artifact::development("/app/node_modules"))
                    .build_unchecked(),
            )
            .stage(
                StageBuilder::new("dev", BaseRef::stage("deps"))
                    .instruction(Instruction::copy(["."], "."))
                    .run("npm run build")
                    .artifact(Artifact::development("/app"))
                    .artifact(Artifact::runtime("/app/dist"))
                    .build_unchecked(),
            )
            .stage(production);
        for path in allow {
            builder = builder.promotable_context(*path);
        }
        builder.build_unchecked()
    }

    #[test]
    fn test_runtime_artifacts_are_clean() {
        let production = StageBuilder::new("prod", BaseRef::image("node:20-alpine"))
            .instruction(Instruction::copy_from("deps", ["/tmp/prod_node_modules"], "./node_modules"))
            .instruction(Instruction::copy_from("dev", ["/app/dist"], "./dist"))
            .deployable()
            .build_unchecked();
        assert!(audit(&manifest_with(production, &[])).is_empty());
    }

    #[test]
    fn test_full_node_modules_flagged() {
        let production = StageBuilder::new("prod", BaseRef::image("node:20-alpine"))
            .instruction(Instruction::copy_from("deps", ["/app/node_modules"], "./node_modules"))
            .deployable()
            .build_unchecked();
        let violations = audit(&manifest_with(production, &[]));
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].kind, ViolationKind::DevelopmentArtifact);
        assert_eq!(violations[0].source.as_deref(), Some("deps"));
    }

    #[test]
    fn test_artifact_found_in_parent_stage() {
        let production = StageBuilder::new("prod", BaseRef::image("node:20-alpine"))
            .instruction(Instruction::copy_from("dev", ["/tmp/prod_node_modules"], "./node_modules"))
            .deployable()
            .build_unchecked();
        assert!(audit(&manifest_with(production, &[])).is_empty());

        let production = StageBuilder::new("prod", BaseRef::image("node:20-alpine"))
            .instruction(Instruction::copy_from("dev", ["/app/node_modules/jest"], "./jest"))
            .deployable()
            .build_unchecked();
        let violations = audit(&manifest_with(production, &[]));
        assert_eq!(violations[0].kind, ViolationKind::DevelopmentArtifact);
    }

    #[test]
    fn test_context_copy_needs_allow_list() {
        let production = StageBuilder::new("prod", BaseRef::image("node:20-alpine"))
            .instruction(Instruction::copy(["package*.json", "src/"], "./"))
            .deployable()
            .build_unchecked();

        let violations = audit(&manifest_with(production.clone(), &["package*.json"]));
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].kind, ViolationKind::SourcePromoted);
        assert_eq!(violations[0].path, "src/");

        assert!(audit(&manifest_with(production, &["package*.json", "src"])).is_empty());
    }

    #[test]
    fn test_deriving_from_development_stage_flagged() {
        let production = StageBuilder::new("prod", BaseRef::stage("dev"))
            .deployable()
            .build_unchecked();
        let violations = audit(&manifest_with(production, &[]));
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].kind, ViolationKind::InheritsDevelopment);
        assert!(violations[0].to_string().contains("derives from 'dev'"));
    }

    #[test]
    fn test_absolute_source_paths() {
        assert_eq!(absolute("/app/dist/"), "/app/dist");
        assert_eq!(absolute("app/src"), "/app/src");
        assert_eq!(absolute("./app"), "/app");
        assert_eq!(absolute("."), "/");
        assert_eq!(absolute("/"), "/");
    }

    #[test]
    fn test_directories_holding_development_artifacts_flagged() {
        let copies = [
            Instruction::copy_from("dependencies", ["/app"], "/app"),
            Instruction::copy_from("development", ["/"], "/dev-root"),
            Instruction::copy_from("development", ["app/src"], "./src"),
            Instruction::copy_from("dependencies", ["/ap*"], "/app"),
        ];
        assert!(audit(&crate::presets::claude_flow()).is_empty());

        for copy in copies {
            let mut manifest = crate::presets::claude_flow();
            let production = manifest
                .stages
                .iter_mut()
                .find(|stage| stage.name == "production")
                .unwrap();
            production.instructions.push(copy.clone());

            let violations = audit(&manifest);
            assert_eq!(violations.len(), 1, "{copy:?}");
            assert_eq!(violations[0].kind, ViolationKind::DevelopmentArtifact);
            let Instruction::Copy { sources, .. } = &copy else {
                unreachable!()
            };
            assert_eq!(violations[0].path, sources[0]);
        }
    }

    #[test]
    fn test_non_deployable_stages_not_audited() {
        let testing = StageBuilder::new("test", BaseRef::stage("dev"))
            .instruction(Instruction::copy_from("deps", ["/app/node_modules"], "./node_modules"))
            .build_unchecked();
        assert!(audit(&manifest_with(testing, &[])).is_empty());
    }
}
