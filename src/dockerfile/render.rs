//! Dockerfile writer

use crate::manifest::{
    ArtifactScope, BaseRef, CopySource, HealthCheck, Instruction, Manifest, Stage, format_duration,
};
use std::fmt::Write as _;

/// Renders a manifest as a Dockerfile
///
/// Metadata without Dockerfile syntax is written as `# @` annotations that
/// [`parse`](super::parse) reads back and the container builder ignores.
pub fn render(manifest: &Manifest) -> String {
    let mut out = String::new();

    if let Some(name) = &manifest.name {
        let _ = writeln!(out, "# @name {name}");
    }
    if let Some(description) = &manifest.description {
        let _ = writeln!(out, "# @description {}", description.replace('\n', " "));
    }
    for path in &manifest.promotable_context {
        let _ = writeln!(out, "# @promote {path}");
    }
    for arg in &manifest.args {
        let declaration = Instruction::arg(&arg.name, arg.default.clone());
        let _ = writeln!(out, "{}", render_instruction(&declaration));
    }

    for stage in &manifest.stages {
        if !out.is_empty() {
            out.push('\n');
        }
        render_stage(&mut out, stage);
    }

    out
}

fn render_stage(out: &mut String, stage: &Stage) {
    if let Some(description) = &stage.description {
        for line in description.lines() {
            let _ = writeln!(out, "# {line}");
        }
    }

    let platform = stage
        .platform
        .as_ref()
        .map(|p| format!("--platform={p} "))
        .unwrap_or_default();
    let base = match &stage.from {
        BaseRef::Image(image) | BaseRef::Stage(image) => image,
    };
    let _ = writeln!(out, "FROM {platform}{base} AS {}", stage.name);

    if stage.deployable {
        out.push_str("# @deployable\n");
    }
    for artifact in &stage.artifacts {
        let scope = match artifact.scope {
            ArtifactScope::Runtime => "runtime",
            ArtifactScope::Development => "development",
        };
        let _ = writeln!(out, "# @artifact {scope} {}", artifact.path);
    }

    for instruction in &stage.instructions {
        let _ = writeln!(out, "{}", render_instruction(instruction));
    }

    if !stage.expose.is_empty() {
        let ports: Vec<String> = stage.expose.iter().map(ToString::to_string).collect();
        let _ = writeln!(out, "EXPOSE {}", ports.join(" "));
    }
    if let Some(check) = &stage.healthcheck {
        let _ = writeln!(out, "{}", render_healthcheck(check));
    }
    if let Some(entrypoint) = &stage.entrypoint {
        let _ = writeln!(out, "ENTRYPOINT {entrypoint}");
    }
    if let Some(cmd) = &stage.cmd {
        let _ = writeln!(out, "CMD {cmd}");
    }
}

fn render_healthcheck(check: &HealthCheck) -> String {
    let Some(test) = &check.test else {
        return "HEALTHCHECK NONE".to_string();
    };
    format!(
        "HEALTHCHECK --interval={} --timeout={} --start-period={} --retries={} \\\n    CMD {}",
        format_duration(check.interval),
        format_duration(check.timeout),
        format_duration(check.start_period),
        check.retries,
        test
    )
}

/// Renders one instruction as a Dockerfile line
pub fn render_instruction(instruction: &Instruction) -> String {
    match instruction {
        Instruction::Run { command } => format!("RUN {}", shell_lines(command)),
        Instruction::Copy {
            from,
            sources,
            dest,
            chown,
        } => {
            let mut line = String::from("COPY ");
            match from {
                CopySource::Context => {}
                CopySource::Stage(name) | CopySource::Image(name) => {
                    let _ = write!(line, "--from={name} ");
                }
            }
            if let Some(owner) = chown {
                let _ = write!(line, "--chown={owner} ");
            }
            let mut paths = sources.clone();
            paths.push(dest.clone());
            if paths.iter().any(|p| p.chars().any(char::is_whitespace)) {
                line.push_str(&serde_json::to_string(&paths).unwrap_or_default());
            } else {
                line.push_str(&paths.join(" "));
            }
            line
        }
        Instruction::Env { key, value } => format!("ENV {key}={}", quote_value(value)),
        Instruction::Arg { name, default } => match default {
            Some(value) => format!("ARG {name}={}", quote_value(value)),
            None => format!("ARG {name}"),
        },
        Instruction::Label { key, value } => {
            format!("LABEL {}={}", quote_value(key), quote_value(value))
        }
        Instruction::Workdir { path } => format!("WORKDIR {path}"),
        Instruction::User { user } => format!("USER {user}"),
        Instruction::WriteFile { path, contents } => write_file_command(path, contents),
        Instruction::Other { keyword, args } => format!("{keyword} {}", shell_lines(args)),
    }
}

/// `RUN` line creating `path` with `contents`
fn write_file_command(path: &str, contents: &str) -> String {
    let format = contents
        .replace('\\', "\\\\")
        .replace('%', "%%")
        .replace('\n', "\\n");
    let target = shell_words::quote(path);
    match path.rsplit_once('/') {
        Some((dir, _)) if !dir.is_empty() => format!(
            "RUN mkdir -p {} && printf {} > {target}",
            shell_words::quote(dir),
            shell_words::quote(&format)
        ),
        _ => format!("RUN printf {} > {target}", shell_words::quote(&format)),
    }
}

/// Double-quotes values the Dockerfile word splitter would otherwise break up
fn quote_value(value: &str) -> String {
    let plain = !value.is_empty()
        && !value
            .chars()
            .any(|c| c.is_whitespace() || matches!(c, '"' | '\'' | '\\'));
    if plain {
        value.to_string()
    } else {
        let escaped = value.replace('\\', "\\\\").replace('"', "\\\"");
        format!("\"{}\"", escaped.replace('\n', "\\n"))
    }
}

/// Joins a multi-line script into one continued instruction
///
/// Each line stays a separate command: a `;` is added unless the line already
/// ends in an operator, an opening keyword or an explicit continuation.
/// Blank and comment lines are dropped since the builder discards them.
fn shell_lines(text: &str) -> String {
    let lines: Vec<&str> = text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .collect();

    let mut out = String::new();
    for (index, line) in lines.iter().enumerate() {
        let continued = line.strip_suffix('\\').map(str::trim_end);
        if index + 1 == lines.len() {
            out.push_str(continued.unwrap_or(line));
            break;
        }
        match continued {
            Some(piece) => out.push_str(piece),
            None if continues_command(line) => out.push_str(line),
            None => {
                out.push_str(line);
                out.push(';');
            }
        }
        out.push_str(" \\\n    ");
    }
    out
}

fn continues_command(line: &str) -> bool {
    const OPENERS: [&str; 4] = ["then", "do", "else", "in"];
    line.ends_with([';', '&', '|', '(', '{'])
        || line
            .rsplit(char::is_whitespace)
            .next()
            .is_some_and(|word| OPENERS.contains(&word))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dockerfile::parse;
    use crate::manifest::{Artifact, CommandForm, StageBuilder};
    use pretty_assertions::assert_eq;

    fn sample() -> Manifest {
        Manifest::builder()
            .name("sample")
            .arg("NODE_VERSION", Some("20".to_string()))
            .stage(
                StageBuilder::new("base", BaseRef::image("node:20-alpine"))
                    .description("Shared tooling")
                    .instruction(Instruction::workdir("/app"))
                    .instruction(Instruction::copy(["package*.json"], "./"))
                    .build_unchecked(),
            )
            .stage(
                StageBuilder::new("runtime", BaseRef::stage("base"))
                    .instruction(
                        Instruction::copy_from("base", ["/app/package.json"], "./")
                            .with_chown("node:node"),
                    )
                    .env("DEBUG", "claude-flow:*")
                    .env("GREETING", "hello world")
                    .instruction(Instruction::user("node"))
                    .expose(3000)
                    .healthcheck(HealthCheck::http("http://localhost:3000/health"))
                    .cmd(CommandForm::exec(["node", "server.js"]))
                    .artifact(Artifact::runtime("/app"))
                    .deployable()
                    .build_unchecked(),
            )
            .build_unchecked()
    }

    #[test]
    fn test_render_sample() {
        let expected = "\
# @name sample
ARG NODE_VERSION=20

# Shared tooling
FROM node:20-alpine AS base
WORKDIR /app
COPY package*.json ./

FROM base AS runtime
# @deployable
# @artifact runtime /app
COPY --from=base --chown=node:node /app/package.json ./
ENV DEBUG=claude-flow:*
ENV GREETING=\"hello world\"
USER node
EXPOSE 3000
HEALTHCHECK --interval=30s --timeout=10s --start-period=5s --retries=3 \\
    CMD curl -f http://localhost:3000/health || exit 1
CMD [\"node\", \"server.js\"]
";
        assert_eq!(render(&sample()), expected);
    }

    #[test]
    fn test_render_parse_keeps_manifest() {
        let manifest = sample();
        let parsed = parse(&render(&manifest)).unwrap();
        assert_eq!(parsed, manifest);
    }

    #[test]
    fn test_write_file_renders_as_run() {
        let line = render_instruction(&Instruction::write_file(
            "/root/.config/claude/mcp.json",
            "{\n  \"a\": 1\n}",
        ));
        assert_eq!(
            line,
            r#"RUN mkdir -p /root/.config/claude && printf '{\n  "a": 1\n}' > /root/.config/claude/mcp.json"#
        );
    }

    #[test]
    fn test_copy_paths_with_spaces_use_json() {
        let line = render_instruction(&Instruction::copy(["my file.txt"], "/srv/"));
        assert_eq!(line, r#"COPY ["my file.txt","/srv/"]"#);
    }

    #[test]
    fn test_disabled_healthcheck() {
        assert_eq!(render_healthcheck(&HealthCheck::disabled()), "HEALTHCHECK NONE");
    }

    #[test]
    fn test_multiline_run_keeps_commands_apart() {
        let run = Instruction::run("apk add --no-cache curl\nrm -rf /tmp/x");
        assert_eq!(
            render_instruction(&run),
            "RUN apk add --no-cache curl; \\\n    rm -rf /tmp/x"
        );

        let manifest = Manifest::builder()
            .stage(
                StageBuilder::new("base", BaseRef::image("alpine:3.20"))
                    .instruction(run)
                    .build_unchecked(),
            )
            .build_unchecked();
        let parsed = parse(&render(&manifest)).unwrap();
        let Instruction::Run { command } = &parsed.stages[0].instructions[0] else {
            panic!("expected RUN");
        };
        assert_eq!(command, "apk add --no-cache curl;     rm -rf /tmp/x");
        assert_eq!(command.split(';').count(), 2);
    }

    #[test]
    fn test_multiline_run_respects_operators() {
        let script = "npm ci &&\n  npm run build\n\n# cleanup\nif [ -d dist ]; then\n  echo ok\nfi";
        assert_eq!(
            shell_lines(script),
            "npm ci && \\\n    \
               npm run build; \\\n    \
             if [ -d dist ]; then \\\n    \
               echo ok; \\\n    \
             fi"
        );
        assert_eq!(shell_lines("make \\\nall"), "make \\\n    all");
    }

    #[test]
    fn test_quote_value() {
        assert_eq!(quote_value("production"), "production");
        assert_eq!(quote_value(""), "\"\"");
        assert_eq!(quote_value(r#"say "hi""#), r#""say \"hi\"""#);
    }
}
