//! Content digests for stages
//!
//! A stage digest covers its base (image reference or parent digest), the
//! digests of the stages it copies from and its canonical definition. Stages
//! built on an image also cover the global `ARG` defaults, which can appear
//! in the image reference. Names and descriptions are not part of the digest.

use super::healthcheck::HealthCheck;
use super::instruction::{CommandForm, Instruction};
use super::manifest_def::Manifest;
use super::stage::{BaseRef, Port, Stage};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

#[derive(Serialize)]
struct CanonicalStage<'a> {
    platform: &'a Option<String>,
    instructions: &'a [Instruction],
    expose: &'a [Port],
    healthcheck: &'a Option<HealthCheck>,
    entrypoint: &'a Option<CommandForm>,
    cmd: &'a Option<CommandForm>,
}

impl<'a> From<&'a Stage> for CanonicalStage<'a> {
    fn from(stage: &'a Stage) -> Self {
        Self {
            platform: &stage.platform,
            instructions: &stage.instructions,
            expose: &stage.expose,
            healthcheck: &stage.healthcheck,
            entrypoint: &stage.entrypoint,
            cmd: &stage.cmd,
        }
    }
}

/// Computes a `sha256:<hex>` digest for every stage, keyed by stage name
///
/// Stages are processed in declaration order, so an upstream change moves
/// every downstream digest. References to stages that are not declared
/// earlier are hashed by name.
pub fn stage_digests(manifest: &Manifest) -> BTreeMap<String, String> {
    let mut digests: BTreeMap<String, String> = BTreeMap::new();

    for stage in &manifest.stages {
        let mut hasher = Sha256::new();

        match &stage.from {
            BaseRef::Image(image) => {
                hasher.update(format!("image:{image}\n"));
                for arg in &manifest.args {
                    match &arg.default {
                        Some(default) => hasher.update(format!("arg:{}={default}\n", arg.name)),
                        None => hasher.update(format!("arg:{}\n", arg.name)),
                    }
                }
            }
            BaseRef::Stage(parent) => {
                let parent = digests.get(parent).map_or(parent.as_str(), String::as_str);
                hasher.update(format!("stage:{parent}\n"));
            }
        }

        let parent_count = usize::from(stage.from.stage_name().is_some());
        for reference in stage.references().into_iter().skip(parent_count) {
            let upstream = digests.get(reference).map_or(reference, String::as_str);
            hasher.update(format!("copy:{upstream}\n"));
        }

        // serde_json writes struct fields in declaration order
        let canonical = serde_json::to_vec(&CanonicalStage::from(stage)).unwrap_or_default();
        hasher.update(&canonical);

        let digest = format!("sha256:{}", hex::encode(hasher.finalize()));
        tracing::trace!(stage = %stage.name, digest = %digest, "Computed stage digest");
        digests.insert(stage.name.clone(), digest);
    }

    digests
}

/// Returns the first 12 hex characters of a digest, as image tools print them
pub fn short_digest(digest: &str) -> &str {
    let hash = digest.split_once(':').map_or(digest, |(_, hash)| hash);
    &hash[..hash.len().min(12)]
}
