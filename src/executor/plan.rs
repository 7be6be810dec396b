//! Build plans
//!
//! A plan fixes which stages a build needs, in which waves they run and the
//! digest each one is expected to have.

use crate::dockerfile;
use crate::manifest::{
    Manifest, ManifestError, ManifestResult, StageGraph, Validate, stage_digests,
};
use serde::Serialize;
use std::collections::BTreeMap;

/// Stages to build for a set of targets, grouped into waves
#[derive(Debug, Clone, Serialize)]
pub struct BuildPlan {
    /// Manifest name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manifest: Option<String>,

    /// Requested targets; the graph leaves when none were requested
    pub targets: Vec<String>,

    /// Every stage the targets need, in declaration order
    pub stages: Vec<String>,

    /// Stages grouped so that each wave depends only on earlier waves
    pub waves: Vec<Vec<String>>,

    /// Digest of every planned stage
    pub digests: BTreeMap<String, String>,

    /// Build argument defaults declared by the manifest
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub build_args: BTreeMap<String, String>,

    /// Dockerfile holding exactly the planned stages
    #[serde(skip)]
    pub dockerfile: String,
}

impl BuildPlan {
    /// Plans a build of `targets`; an empty slice plans every stage
    ///
    /// # Errors
    ///
    /// Fails when the manifest is invalid or a target is not one of its stages.
    pub fn new(manifest: &Manifest, targets: &[String]) -> ManifestResult<Self> {
        manifest.validate().map_err(ManifestError::Validation)?;

        let graph = StageGraph::new(manifest);
        let targets: Vec<String> = if targets.is_empty() {
            graph.leaves().into_iter().map(str::to_string).collect()
        } else {
            targets.to_vec()
        };

        let pruned = manifest.prune_to(&targets)?;
        let stages: Vec<String> = pruned.stages.iter().map(|s| s.name.clone()).collect();
        let waves = graph.waves(&targets)?;

        let mut digests = stage_digests(manifest);
        digests.retain(|name, _| stages.contains(name));

        let build_args = manifest
            .args
            .iter()
            .filter_map(|arg| arg.default.clone().map(|value| (arg.name.clone(), value)))
            .collect();

        tracing::debug!(
            targets = ?targets,
            stages = stages.len(),
            waves = waves.len(),
            "Planned build"
        );

        Ok(Self {
            manifest: manifest.name.clone(),
            targets,
            stages,
            waves,
            digests,
            build_args,
            dockerfile: dockerfile::render(&pruned),
        })
    }

    /// Number of planned stages
    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    /// Returns true if `stage` is part of the plan
    pub fn contains(&self, stage: &str) -> bool {
        self.stages.iter().any(|s| s == stage)
    }

    /// Digest planned for `stage`
    pub fn digest(&self, stage: &str) -> Option<&str> {
        self.digests.get(stage).map(String::as_str)
    }
}
