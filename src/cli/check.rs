//! `stageline check` - Load and validate a manifest
//!
//! ## Usage
//!
//! ```bash
//! stageline check <Dockerfile|manifest.yaml|manifest.json>
//! # Exit code 0: manifest is valid
//! # Exit code 1: load or validation error
//! ```

use anyhow::{Context, Result};
use stageline::{StageGraph, Validate};
use std::fmt;
use std::path::Path;

/// What a successful check found
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckSummary {
    /// Manifest name
    pub name: Option<String>,
    /// Number of stages
    pub stages: usize,
    /// Number of build waves
    pub waves: usize,
    /// Deployable stage names
    pub deployable: Vec<String>,
}

impl fmt::Display for CheckSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "OK: {} ({} stages, {} waves",
            self.name.as_deref().unwrap_or("unnamed manifest"),
            self.stages,
            self.waves
        )?;
        if !self.deployable.is_empty() {
            write!(f, ", deployable: {}", self.deployable.join(", "))?;
        }
        write!(f, ")")
    }
}

/// Validate a manifest file
///
/// Loads the file in the format its name implies and runs full structural
/// validation, including reference cycles and ordering.
pub fn check_manifest(file: &Path) -> Result<CheckSummary> {
    tracing::debug!(file = %file.display(), "Validating manifest");

    let manifest = super::load_manifest(file)?;
    manifest
        .validate()
        .with_context(|| format!("Manifest validation failed for: {}", file.display()))?;

    let waves = StageGraph::new(&manifest)
        .waves(&[])
        .context("Cannot order stages")?;

    tracing::info!(file = %file.display(), stages = manifest.stage_count(), "Manifest is valid");

    Ok(CheckSummary {
        name: manifest.name.clone(),
        stages: manifest.stage_count(),
        waves: waves.len(),
        deployable: manifest
            .deployable_stages()
            .map(|stage| stage.name.clone())
            .collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_check_valid_dockerfile() {
        let temp_dir = TempDir::new().unwrap();
        let file_path = temp_dir.path().join("Dockerfile");
        let text = stageline::dockerfile::render(&stageline::presets::claude_flow());
        fs::write(&file_path, text).unwrap();

        let summary = check_manifest(&file_path).unwrap();
        assert_eq!(summary.name.as_deref(), Some("claude-flow"));
        assert_eq!(summary.stages, 6);
        assert_eq!(summary.waves, 4);
        assert_eq!(summary.deployable, vec!["production"]);
        assert_eq!(
            summary.to_string(),
            "OK: claude-flow (6 stages, 4 waves, deployable: production)"
        );
    }

    #[test]
    fn test_check_rejects_copy_from_later_stage() {
        let temp_dir = TempDir::new().unwrap();
        let file_path = temp_dir.path().join("Dockerfile");
        fs::write(
            &file_path,
            "FROM alpine:3.20 AS base\nCOPY --from=app /out /app\n\nFROM alpine:3.20 AS app\n",
        )
        .unwrap();

        let err = check_manifest(&file_path).unwrap_err();
        assert!(format!("{err:#}").contains("not declared before it"));
    }

    #[test]
    fn test_check_nonexistent_file() {
        let result = check_manifest(Path::new("/nonexistent/Dockerfile"));
        assert!(result.unwrap_err().to_string().contains("not found"));
    }
}
