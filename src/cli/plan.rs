//! `stageline plan` - Show build waves and digests

use stageline::BuildPlan;
use stageline::manifest::short_digest;
use std::fmt::Write as _;

/// Formats a plan as one block per wave
///
/// ```text
/// Plan for claude-flow: production (4 stages, 4 waves)
///
/// wave 1
///   base          3f1c9a0b2d4e
/// ```
pub fn format_plan(plan: &BuildPlan) -> String {
    let mut output = String::new();
    let width = plan.stages.iter().map(String::len).max().unwrap_or(0);

    let _ = writeln!(
        output,
        "Plan for {}: {} ({} stages, {} waves)",
        plan.manifest.as_deref().unwrap_or("manifest"),
        plan.targets.join(", "),
        plan.stage_count(),
        plan.waves.len()
    );

    for (index, wave) in plan.waves.iter().enumerate() {
        let _ = writeln!(output, "\nwave {}", index + 1);
        for stage in wave {
            let digest = plan.digest(stage).map(short_digest).unwrap_or("-");
            let _ = writeln!(output, "  {stage:<width$}  {digest}");
        }
    }

    if !plan.build_args.is_empty() {
        output.push_str("\nbuild args\n");
        for (name, value) in &plan.build_args {
            let _ = writeln!(output, "  {name}={value}");
        }
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use stageline::presets::claude_flow;

    #[test]
    fn test_format_production_plan() {
        let plan = BuildPlan::new(&claude_flow(), &["production".to_string()]).unwrap();
        let text = format_plan(&plan);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "Plan for claude-flow: production (4 stages, 4 waves)");
        assert_eq!(lines[1], "");
        assert_eq!(lines[2], "wave 1");
        assert!(lines[3].starts_with("  base          "));
        assert_eq!(lines[3].trim_start().split_whitespace().nth(1).map(str::len), Some(12));
        assert!(text.contains("\nwave 4\n  production    "));
        assert!(!text.contains("testing"));
    }

    #[test]
    fn test_format_shows_build_args() {
        let manifest = stageline::Manifest::builder()
            .arg("NODE_VERSION", Some("20".to_string()))
            .stage(stageline::Stage::from_image("app", "node:20-alpine"))
            .build()
            .unwrap();
        let plan = BuildPlan::new(&manifest, &[]).unwrap();
        assert!(format_plan(&plan).ends_with("build args\n  NODE_VERSION=20\n"));
    }
}
