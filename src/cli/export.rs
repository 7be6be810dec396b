//! `stageline export` - Convert manifests between Dockerfile, YAML and JSON

use anyhow::{Context, Result};
use stageline::{Manifest, ManifestFormat};

/// Serializes `manifest` as `format`, keeping only what `targets` need
///
/// An empty `targets` slice exports every stage.
pub fn export_manifest(
    manifest: &Manifest,
    format: ManifestFormat,
    targets: &[String],
) -> Result<String> {
    let pruned;
    let manifest = if targets.is_empty() {
        manifest
    } else {
        pruned = manifest
            .prune_to(targets)
            .context("Cannot select export targets")?;
        &pruned
    };

    tracing::debug!(%format, stages = manifest.stage_count(), "Exporting manifest");
    stageline::loader::to_string(manifest, format)
        .with_context(|| format!("Failed to export manifest as {format}"))
}
