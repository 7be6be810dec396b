//! `stageline doc` - Generate documentation and stage graphs

use anyhow::Result;
use serde::Serialize;
use stageline::manifest::{ArtifactScope, CommandForm, short_digest, stage_digests};
use stageline::{BaseRef, Manifest, StageGraph};
use std::collections::BTreeMap;
use std::fmt::Write as _;

#[derive(Debug, Clone, Default, Serialize)]
pub struct ManifestDoc {
    pub name: Option<String>,
    pub description: Option<String>,
    pub args: Vec<ArgDoc>,
    pub stages: Vec<StageDoc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ArgDoc {
    pub name: String,
    pub default: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StageDoc {
    pub name: String,
    pub description: Option<String>,
    pub from: String,
    pub depends_on: Vec<String>,
    pub dependents: Vec<String>,
    pub digest: String,
    pub ports: Vec<String>,
    pub cmd: Option<String>,
    pub artifacts: Vec<ArtifactDoc>,
    pub deployable: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ArtifactDoc {
    pub path: String,
    pub scope: ArtifactScope,
}

#[derive(Debug, Clone, Copy)]
pub enum DocFormat {
    Markdown,
    Mermaid,
    Json,
}

pub fn generate_doc(manifest: &Manifest, format: DocFormat) -> Result<String> {
    let doc = collect_doc(manifest);

    match format {
        DocFormat::Markdown => Ok(render_markdown(&doc, manifest)),
        DocFormat::Mermaid => Ok(render_mermaid(manifest)),
        DocFormat::Json => Ok(serde_json::to_string_pretty(&doc)?),
    }
}

fn collect_doc(manifest: &Manifest) -> ManifestDoc {
    let graph = StageGraph::new(manifest);
    let digests = stage_digests(manifest);

    let stages = manifest
        .stages
        .iter()
        .map(|stage| {
            let resolved = manifest.resolve(&stage.name);
            StageDoc {
                name: stage.name.clone(),
                description: stage.description.clone(),
                from: stage.from.to_string(),
                depends_on: graph
                    .dependencies(&stage.name)
                    .unwrap_or_default()
                    .into_iter()
                    .map(str::to_string)
                    .collect(),
                dependents: graph
                    .dependents(&stage.name)
                    .into_iter()
                    .map(str::to_string)
                    .collect(),
                digest: digests.get(&stage.name).cloned().unwrap_or_default(),
                ports: resolved
                    .as_ref()
                    .map(|r| r.ports.iter().map(ToString::to_string).collect())
                    .unwrap_or_default(),
                cmd: resolved.and_then(|r| r.cmd).map(|cmd| command_text(&cmd)),
                artifacts: stage
                    .artifacts
                    .iter()
                    .map(|artifact| ArtifactDoc {
                        path: artifact.path.clone(),
                        scope: artifact.scope,
                    })
                    .collect(),
                deployable: stage.deployable,
            }
        })
        .collect();

    ManifestDoc {
        name: manifest.name.clone(),
        description: manifest.description.clone(),
        args: manifest
            .args
            .iter()
            .map(|arg| ArgDoc {
                name: arg.name.clone(),
                default: arg.default.clone(),
            })
            .collect(),
        stages,
    }
}

fn command_text(cmd: &CommandForm) -> String {
    match cmd {
        CommandForm::Shell(command) => command.clone(),
        CommandForm::Exec(args) => args.join(" "),
    }
}

fn render_markdown(doc: &ManifestDoc, manifest: &Manifest) -> String {
    let mut output = String::new();

    let _ = writeln!(
        output,
        "# {}\n",
        doc.name.as_deref().unwrap_or("Build Manifest")
    );

    if let Some(desc) = &doc.description {
        let _ = writeln!(output, "{desc}\n");
    }

    if !doc.args.is_empty() {
        output.push_str("## Build Arguments\n\n");
        for arg in &doc.args {
            match &arg.default {
                Some(default) => {
                    let _ = writeln!(output, "- `{}` (default `{default}`)", arg.name);
                }
                None => {
                    let _ = writeln!(output, "- `{}`", arg.name);
                }
            }
        }
        output.push('\n');
    }

    output.push_str("## Stages\n\n");
    for stage in &doc.stages {
        let marker = if stage.deployable { " (deployable)" } else { "" };
        let _ = writeln!(output, "### {}{marker}\n", stage.name);

        if let Some(desc) = &stage.description {
            let _ = writeln!(output, "{desc}\n");
        }

        let _ = writeln!(output, "- **From**: `{}`", stage.from);
        if !stage.depends_on.is_empty() {
            let _ = writeln!(output, "- **Depends on**: {}", stage.depends_on.join(", "));
        }
        if !stage.dependents.is_empty() {
            let _ = writeln!(output, "- **Used by**: {}", stage.dependents.join(", "));
        }
        if !stage.ports.is_empty() {
            let _ = writeln!(output, "- **Ports**: {}", stage.ports.join(", "));
        }
        if let Some(cmd) = &stage.cmd {
            let _ = writeln!(output, "- **Command**: `{cmd}`");
        }
        if !stage.artifacts.is_empty() {
            let artifacts: Vec<String> = stage
                .artifacts
                .iter()
                .map(|a| {
                    let scope = match a.scope {
                        ArtifactScope::Runtime => "runtime",
                        ArtifactScope::Development => "development",
                    };
                    format!("`{}` ({scope})", a.path)
                })
                .collect();
            let _ = writeln!(output, "- **Artifacts**: {}", artifacts.join(", "));
        }
        let _ = writeln!(output, "- **Digest**: `{}`\n", short_digest(&stage.digest));
    }

    output.push_str("## Build Graph\n\n```mermaid\n");
    output.push_str(&render_mermaid(manifest));
    output.push_str("```\n");

    output
}

/// Renders the stage graph as a Mermaid flowchart
///
/// Solid edges are parent stages, dotted edges are `COPY --from`.
fn render_mermaid(manifest: &Manifest) -> String {
    let mut output = String::from("graph TD\n");
    let mut images: BTreeMap<&str, String> = BTreeMap::new();

    for stage in &manifest.stages {
        let shape = if stage.deployable {
            format!("{}[[\"{}\"]]", node_id(&stage.name), stage.name)
        } else {
            format!("{}[\"{}\"]", node_id(&stage.name), stage.name)
        };
        let _ = writeln!(output, "    {shape}");
    }

    for stage in &manifest.stages {
        let target = node_id(&stage.name);
        match &stage.from {
            BaseRef::Stage(parent) => {
                let _ = writeln!(output, "    {} --> {target}", node_id(parent));
            }
            BaseRef::Image(image) => {
                let next = format!("image{}", images.len());
                let id = images.entry(image.as_str()).or_insert(next).clone();
                let _ = writeln!(output, "    {id}([\"{image}\"]) --> {target}");
            }
        }

        let mut copied: Vec<&str> = stage
            .instructions
            .iter()
            .filter_map(|i| i.copy_stage())
            .collect();
        copied.dedup();
        for source in copied {
            if manifest.stage(source).is_some() {
                let _ = writeln!(output, "    {} -.->|copy| {target}", node_id(source));
            }
        }
    }

    output
}

fn node_id(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use stageline::presets::claude_flow;

    #[test]
    fn test_markdown_lists_every_stage() {
        let markdown = generate_doc(&claude_flow(), DocFormat::Markdown).unwrap();
        assert!(markdown.starts_with("# claude-flow\n"));
        for name in ["base", "dependencies", "development", "testing", "swarm-integration"] {
            assert!(markdown.contains(&format!("### {name}\n")), "{name}");
        }
        assert!(markdown.contains("### production (deployable)"));
        assert!(markdown.contains("- **Ports**: 3000"));
        assert!(markdown.contains("```mermaid\ngraph TD\n"));
    }

    #[test]
    fn test_mermaid_edges() {
        let mermaid = generate_doc(&claude_flow(), DocFormat::Mermaid).unwrap();
        assert!(mermaid.starts_with("graph TD\n"));
        assert!(mermaid.contains("    base --> development\n"));
        assert!(mermaid.contains("    development --> testing\n"));
        assert!(mermaid.contains("    dependencies -.->|copy| production\n"));
        assert!(mermaid.contains("    base -.->|copy| swarm_integration\n"));
        assert!(mermaid.contains("production[[\"production\"]]"));
        assert_eq!(mermaid.matches("([\"node:20-alpine\"])").count(), 2);
        assert!(mermaid.contains("    image0([\"node:20-alpine\"]) --> base\n"));
        assert!(mermaid.contains("    image0([\"node:20-alpine\"]) --> production\n"));
    }

    #[test]
    fn test_json_doc_has_dependencies() {
        let json = generate_doc(&claude_flow(), DocFormat::Json).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["name"], "claude-flow");
        let production = value["stages"]
            .as_array()
            .unwrap()
            .iter()
            .find(|s| s["name"] == "production")
            .unwrap();
        assert_eq!(production["deployable"], true);
        let depends: Vec<&str> = production["depends_on"]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(|v| v.as_str())
            .collect();
        assert!(depends.contains(&"dependencies"));
        assert!(depends.contains(&"development"));
        assert!(production["digest"].as_str().unwrap().starts_with("sha256:"));
    }
}
