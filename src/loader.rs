//! Reading and writing manifest files
//!
//! The format follows the file name: Dockerfiles (`Dockerfile`,
//! `Dockerfile.*`, `*.Dockerfile`, `*.dockerfile`), YAML (`.yaml`, `.yml`)
//! and JSON (`.json`).

use crate::dockerfile;
use crate::manifest::{Manifest, ManifestError, ManifestResult};
use std::fmt;
use std::fs;
use std::path::Path;

/// On-disk manifest format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManifestFormat {
    /// Dockerfile with `# @` annotations
    Dockerfile,
    /// YAML document of the manifest model
    Yaml,
    /// JSON document of the manifest model
    Json,
}

impl ManifestFormat {
    /// Guesses the format from a file name
    pub fn detect(path: &Path) -> Option<Self> {
        let file_name = path.file_name()?.to_str()?;
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);

        match extension.as_deref() {
            Some("yaml" | "yml") => return Some(Self::Yaml),
            Some("json") => return Some(Self::Json),
            Some("dockerfile") => return Some(Self::Dockerfile),
            _ => {}
        }

        (file_name == "Dockerfile" || file_name.starts_with("Dockerfile."))
            .then_some(Self::Dockerfile)
    }

    /// Conventional file extension
    pub fn extension(self) -> &'static str {
        match self {
            Self::Dockerfile => "Dockerfile",
            Self::Yaml => "yaml",
            Self::Json => "json",
        }
    }
}

impl fmt::Display for ManifestFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Dockerfile => write!(f, "dockerfile"),
            Self::Yaml => write!(f, "yaml"),
            Self::Json => write!(f, "json"),
        }
    }
}

/// Parses manifest text in the given format
///
/// The result is not validated.
///
/// # Errors
///
/// Returns a parse or serialization error for malformed input.
pub fn load_str(text: &str, format: ManifestFormat) -> ManifestResult<Manifest> {
    match format {
        ManifestFormat::Dockerfile => dockerfile::parse(text),
        ManifestFormat::Yaml => Ok(serde_yaml::from_str(text)?),
        ManifestFormat::Json => Ok(serde_json::from_str(text)?),
    }
}

/// Reads a manifest file, detecting the format from its name
///
/// Files with an unrecognized name are read as Dockerfiles.
///
/// # Errors
///
/// Returns an IO error when the file cannot be read, otherwise see [`load_str`].
pub fn load_file(path: &Path) -> ManifestResult<Manifest> {
    let format = ManifestFormat::detect(path).unwrap_or_else(|| {
        tracing::debug!(path = %path.display(), "unknown manifest extension, reading as Dockerfile");
        ManifestFormat::Dockerfile
    });
    let text = fs::read_to_string(path)
        .map_err(|e| ManifestError::Io(format!("{}: {e}", path.display())))?;

    tracing::debug!(path = %path.display(), %format, "loading manifest");
    load_str(&text, format)
}

/// Serializes a manifest in the given format
///
/// # Errors
///
/// Returns a serialization error if the model cannot be encoded, and a
/// validation error when a Dockerfile cannot hold one of its values.
pub fn to_string(manifest: &Manifest, format: ManifestFormat) -> ManifestResult<String> {
    match format {
        ManifestFormat::Dockerfile => {
            manifest.check_single_line_values()?;
            Ok(dockerfile::render(manifest))
        }
        ManifestFormat::Yaml => Ok(serde_yaml::to_string(manifest)?),
        ManifestFormat::Json => {
            let mut json = serde_json::to_string_pretty(manifest)?;
            json.push('\n');
            Ok(json)
        }
    }
}

/// Writes a manifest to `path` in the given format
///
/// # Errors
///
/// Returns an IO error when the file cannot be written.
pub fn save_file(manifest: &Manifest, path: &Path, format: ManifestFormat) -> ManifestResult<()> {
    let text = to_string(manifest, format)?;
    fs::write(path, text).map_err(|e| ManifestError::Io(format!("{}: {e}", path.display())))?;
    tracing::info!(path = %path.display(), %format, "manifest written");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::{
        Artifact, BaseRef, CommandForm, HealthCheck, Instruction, Port, Validate, ValidationError,
    };
    use crate::presets::claude_flow;
    use tempfile::TempDir;

    #[test]
    fn test_detect_format() {
        let cases = [
            ("Dockerfile", Some(ManifestFormat::Dockerfile)),
            ("build/Dockerfile.prod", Some(ManifestFormat::Dockerfile)),
            ("api.Dockerfile", Some(ManifestFormat::Dockerfile)),
            ("api.dockerfile", Some(ManifestFormat::Dockerfile)),
            ("stages.yaml", Some(ManifestFormat::Yaml)),
            ("stages.YML", Some(ManifestFormat::Yaml)),
            ("stages.json", Some(ManifestFormat::Json)),
            ("notes.txt", None),
        ];
        for (name, expected) in cases {
            assert_eq!(ManifestFormat::detect(Path::new(name)), expected, "{name}");
        }
    }

    #[test]
    fn test_save_and_load_every_format() {
        let dir = TempDir::new().unwrap();
        let manifest = claude_flow();

        for format in [ManifestFormat::Yaml, ManifestFormat::Json] {
            let path = dir.path().join(format!("stageline.{}", format.extension()));
            save_file(&manifest, &path, format).unwrap();
            assert_eq!(load_file(&path).unwrap(), manifest, "{format}");
        }

        let path = dir.path().join("Dockerfile");
        save_file(&manifest, &path, ManifestFormat::Dockerfile).unwrap();
        let loaded = load_file(&path).unwrap();
        assert!(loaded.validate().is_ok());
        assert_eq!(loaded.stage_count(), manifest.stage_count());
    }

    /// The preset with file writes replaced by the `RUN` lines they render as
    fn preset_as_written() -> Manifest {
        let mut manifest = claude_flow();
        for stage in &mut manifest.stages {
            for instruction in &mut stage.instructions {
                if matches!(instruction, Instruction::WriteFile { .. }) {
                    let line = dockerfile::render_instruction(instruction);
                    *instruction = Instruction::run(line.trim_start_matches("RUN "));
                }
            }
        }
        manifest
    }

    #[test]
    fn test_dockerfile_keeps_preset_structure() {
        let text = to_string(&claude_flow(), ManifestFormat::Dockerfile).unwrap();
        let loaded = load_str(&text, ManifestFormat::Dockerfile).unwrap();

        let production = loaded.stage("production").unwrap();
        assert_eq!(production.from, BaseRef::image("node:20-alpine"));
        assert!(production.deployable);
        assert_eq!(production.references(), vec!["dependencies", "development"]);
        assert_eq!(production.expose, vec![Port::tcp(3000)]);
        assert_eq!(
            production.healthcheck.as_ref().and_then(HealthCheck::endpoint).as_deref(),
            Some("http://localhost:3000/health")
        );
        assert_eq!(
            production.cmd,
            Some(CommandForm::exec(["node", "dist/cli/main.js", "start"]))
        );
        assert_eq!(
            loaded.stage("dependencies").unwrap().artifacts,
            vec![
                Artifact::runtime("/tmp/prod_node_modules"),
                Artifact::development("/app/node_modules"),
            ]
        );
        assert_eq!(loaded.stage("testing").unwrap().from, BaseRef::stage("development"));
        for (original, read) in claude_flow().stages.iter().zip(&loaded.stages) {
            assert_eq!(read.name, original.name);
            assert_eq!(read.description, original.description, "{}", original.name);
        }

        pretty_assertions::assert_eq!(loaded, preset_as_written());
    }

    #[test]
    fn test_multiline_value_not_written_as_dockerfile() {
        let manifest = Manifest::builder()
            .stage(
                crate::manifest::Stage::from_image("base", "alpine").with_instructions(vec![
                    Instruction::label("org.example.notes", "first\nsecond"),
                ]),
            )
            .build_unchecked();

        let err = to_string(&manifest, ManifestFormat::Dockerfile).unwrap_err();
        assert!(matches!(
            err,
            ManifestError::Validation(ValidationError::MultilineValue { ref key, .. })
                if key == "org.example.notes"
        ));
        assert!(to_string(&manifest, ManifestFormat::Yaml).is_ok());
    }

    #[test]
    fn test_load_missing_file() {
        let err = load_file(Path::new("/nonexistent/Dockerfile")).unwrap_err();
        assert!(matches!(err, ManifestError::Io(ref message) if message.contains("/nonexistent/Dockerfile")));
    }

    #[test]
    fn test_load_yaml_manifest() {
        let yaml = r#"
name: demo
stages:
  - name: base
    from: {image: "alpine:3.20"}
    instructions:
      - {type: run, command: "apk add --no-cache curl"}
  - name: app
    from: {stage: base}
    cmd: [curl, --version]
"#;
        let manifest = load_str(yaml, ManifestFormat::Yaml).unwrap();
        assert!(manifest.validate().is_ok());
        assert_eq!(manifest.stage("app").unwrap().references(), vec!["base"]);
    }

    #[test]
    fn test_load_malformed_json() {
        let err = load_str("{\"stages\": 3}", ManifestFormat::Json).unwrap_err();
        assert!(matches!(err, ManifestError::Serialization(_)));
    }
}
