//! `stageline init` - Write the claude-flow manifest

use anyhow::{Context, Result};
use stageline::ManifestFormat;
use stageline::presets::{ClaudeFlowOptions, claude_flow_with};
use std::path::Path;

/// Serializes the claude-flow preset
///
/// `mcp_config` moves the MCP registration written by the swarm stage.
pub fn render_preset(format: ManifestFormat, mcp_config: Option<&str>) -> Result<String> {
    let mut options = ClaudeFlowOptions::default();
    if let Some(path) = mcp_config {
        if !path.starts_with('/') {
            anyhow::bail!("MCP config path must be absolute: {path}");
        }
        options.mcp_config_path = path.to_string();
    }

    let manifest = claude_flow_with(&options);
    stageline::loader::to_string(&manifest, format)
        .with_context(|| format!("Failed to render preset as {format}"))
}

/// Refuses to overwrite an existing file unless `force` is set
pub fn ensure_writable(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        anyhow::bail!(
            "{} already exists (use --force to overwrite)",
            path.display()
        );
    }
    Ok(())
}
