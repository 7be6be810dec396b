//! Dockerfile reader
//!
//! Turns Dockerfile text into a [`Manifest`]. Stage references in `FROM` and
//! `COPY --from` are resolved to stage names. Comment lines starting with `@`
//! carry metadata Dockerfile syntax has no place for (artifacts, the
//! deployable flag, the promotion allow-list).

use crate::manifest::{
    Artifact, ArtifactScope, BaseRef, BuildArg, CommandForm, CopySource, HealthCheck, Instruction,
    Manifest, ManifestError, Port, Stage, parse_duration,
};

/// Parses Dockerfile text into a manifest
///
/// The result is not validated; call [`Validate::validate`](crate::manifest::Validate)
/// to check references and names.
///
/// # Errors
///
/// Returns [`ManifestError::Parse`] with the 1-based line of the offending
/// instruction.
pub fn parse(text: &str) -> Result<Manifest, ManifestError> {
    let (escape, skip) = parser_directives(text)?;
    let (lines, trailing) = logical_lines(text, escape, skip);

    let names = stage_names(&lines)?;
    let mut manifest = Manifest::builder().build_unchecked();

    for logical in &lines {
        let (keyword, rest) = split_first_word(&logical.text);
        let keyword = keyword.to_ascii_uppercase();
        let line = logical.line;

        let (pragmas, notes) = split_comments(&logical.comments);

        if keyword == "FROM" {
            apply_pragmas(&mut manifest, &pragmas, line);
            let from = parse_from(rest, line)?;
            let index = manifest.stages.len();
            let base = match stage_ref(&from.image, &names[..index]) {
                Some(parent) => BaseRef::Stage(parent),
                None => BaseRef::Image(from.image),
            };
            let mut stage = Stage::new(names[index].clone(), base);
            stage.platform = from.platform;
            if !notes.is_empty() {
                stage.description = Some(notes.join(" "));
            }
            tracing::debug!(stage = %stage.name, line, "Parsed FROM");
            manifest.stages.push(stage);
            continue;
        }

        apply_pragmas(&mut manifest, &pragmas, line);

        let Some(stage) = manifest.stages.last_mut() else {
            if keyword == "ARG" {
                for (name, default) in parse_arg_pairs(rest, line)? {
                    manifest.args.push(BuildArg { name, default });
                }
                continue;
            }
            return Err(parse_error(line, format!("{keyword} before the first FROM")));
        };

        match keyword.as_str() {
            "RUN" => stage.instructions.push(parse_run(rest, line)?),
            "COPY" => stage.instructions.push(parse_copy(rest, line, &names)?),
            "ENV" => {
                for (key, value) in parse_pairs("ENV", rest, line)? {
                    stage.instructions.push(Instruction::Env { key, value });
                }
            }
            "LABEL" => {
                for (key, value) in parse_pairs("LABEL", rest, line)? {
                    stage.instructions.push(Instruction::Label { key, value });
                }
            }
            "ARG" => {
                for (name, default) in parse_arg_pairs(rest, line)? {
                    stage.instructions.push(Instruction::Arg { name, default });
                }
            }
            "WORKDIR" => stage.instructions.push(Instruction::Workdir {
                path: required(rest, "WORKDIR requires a path", line)?,
            }),
            "USER" => stage.instructions.push(Instruction::User {
                user: required(rest, "USER requires a user name", line)?,
            }),
            "EXPOSE" => stage.expose.extend(parse_expose(rest, line)?),
            "HEALTHCHECK" => stage.healthcheck = Some(parse_healthcheck(rest, line)?),
            "CMD" => stage.cmd = Some(command_form(&required(rest, "CMD requires a command", line)?)),
            "ENTRYPOINT" => {
                stage.entrypoint = Some(command_form(&required(
                    rest,
                    "ENTRYPOINT requires a command",
                    line,
                )?));
            }
            "ADD" | "VOLUME" | "SHELL" | "STOPSIGNAL" | "ONBUILD" | "MAINTAINER" => {
                stage.instructions.push(Instruction::Other {
                    keyword: keyword.clone(),
                    args: rest.to_string(),
                });
            }
            _ => return Err(parse_error(line, format!("unknown instruction '{keyword}'"))),
        }
    }

    let last_line = text.lines().count().max(1);
    let (pragmas, _) = split_comments(&trailing);
    apply_pragmas(&mut manifest, &pragmas, last_line);

    if manifest.stages.is_empty() {
        return Err(parse_error(last_line, "no FROM instruction found"));
    }

    Ok(manifest)
}

/// One instruction after joining continuation lines
#[derive(Debug, Clone, PartialEq, Eq)]
struct LogicalLine {
    /// Line the instruction starts on
    line: usize,
    text: String,
    /// Comment block directly above the instruction
    comments: Vec<String>,
}

/// Reads leading parser directives; returns the escape character and the
/// number of lines they occupy
fn parser_directives(text: &str) -> Result<(char, usize), ManifestError> {
    let mut escape = '\\';
    let mut consumed = 0;

    for (index, raw) in text.lines().enumerate() {
        let Some(body) = raw.trim().strip_prefix('#') else {
            break;
        };
        let Some((key, value)) = body.split_once('=') else {
            break;
        };
        let key = key.trim();
        if key.is_empty() || !key.chars().all(|c| c.is_ascii_alphabetic()) {
            break;
        }
        if key.eq_ignore_ascii_case("escape") {
            escape = match value.trim() {
                "\\" => '\\',
                "`" => '`',
                other => {
                    return Err(parse_error(
                        index + 1,
                        format!("invalid escape directive '{other}', expected '\\' or '`'"),
                    ));
                }
            };
        }
        consumed = index + 1;
    }

    Ok((escape, consumed))
}

/// Splits text into logical lines; also returns comments after the last instruction
fn logical_lines(text: &str, escape: char, skip: usize) -> (Vec<LogicalLine>, Vec<String>) {
    let mut lines = Vec::new();
    let mut comments = Vec::new();
    let mut current: Option<(usize, String)> = None;

    for (index, raw) in text.lines().enumerate().skip(skip) {
        let trimmed = raw.trim();

        if current.is_none() {
            if trimmed.is_empty() {
                // a blank line detaches notes but keeps annotations
                comments.retain(|comment: &String| comment.starts_with('@'));
                continue;
            }
            if let Some(comment) = trimmed.strip_prefix('#') {
                comments.push(comment.trim().to_string());
                continue;
            }
        } else if trimmed.is_empty() || trimmed.starts_with('#') {
            // blank and comment lines inside a continuation are dropped
            continue;
        }

        let body = raw.trim_end();
        let (piece, continued) = match body.strip_suffix(escape) {
            Some(piece) => (piece, true),
            None => (body, false),
        };

        match current.as_mut() {
            Some((_, buffer)) => buffer.push_str(piece),
            None => current = Some((index + 1, piece.to_string())),
        }

        if !continued {
            if let Some((line, buffer)) = current.take() {
                lines.push(LogicalLine {
                    line,
                    text: buffer.trim().to_string(),
                    comments: std::mem::take(&mut comments),
                });
            }
        }
    }

    // a dangling continuation still counts as an instruction
    if let Some((line, buffer)) = current {
        lines.push(LogicalLine {
            line,
            text: buffer.trim().to_string(),
            comments: std::mem::take(&mut comments),
        });
    }

    (lines, comments)
}

/// Separates `@` metadata comments from plain notes
fn split_comments(comments: &[String]) -> (Vec<&str>, Vec<&str>) {
    comments
        .iter()
        .map(String::as_str)
        .filter(|comment| !comment.is_empty())
        .partition(|comment| comment.starts_with('@'))
}

fn apply_pragmas(manifest: &mut Manifest, pragmas: &[&str], line: usize) {
    for pragma in pragmas {
        let (key, value) = split_first_word(&pragma[1..]);
        match (key, manifest.stages.last_mut()) {
            ("name", _) if !value.is_empty() => manifest.name = Some(value.to_string()),
            ("description", _) if !value.is_empty() => {
                manifest.description = Some(value.to_string());
            }
            ("promote", _) if !value.is_empty() => {
                manifest.promotable_context.push(value.to_string());
            }
            ("deployable", Some(stage)) => stage.deployable = true,
            ("artifact", Some(stage)) => {
                let (scope, path) = split_first_word(value);
                let scope = match scope {
                    "runtime" => Some(ArtifactScope::Runtime),
                    "development" => Some(ArtifactScope::Development),
                    _ => None,
                };
                match scope {
                    Some(scope) if !path.is_empty() => stage.artifacts.push(Artifact {
                        path: path.to_string(),
                        scope,
                    }),
                    _ => tracing::warn!(line, pragma, "Malformed artifact annotation, ignoring"),
                }
            }
            _ => tracing::warn!(line, pragma, "Unknown or misplaced annotation, ignoring"),
        }
    }
}

/// Split a string into the first word and the rest
fn split_first_word(s: &str) -> (&str, &str) {
    let s = s.trim();
    match s.find(char::is_whitespace) {
        Some(pos) => (&s[..pos], s[pos..].trim_start()),
        None => (s, ""),
    }
}

fn parse_error(line: usize, message: impl Into<String>) -> ManifestError {
    ManifestError::Parse {
        line,
        message: message.into(),
    }
}

fn required(rest: &str, message: &str, line: usize) -> Result<String, ManifestError> {
    if rest.trim().is_empty() {
        Err(parse_error(line, message))
    } else {
        Ok(rest.trim().to_string())
    }
}

#[derive(Debug, PartialEq, Eq)]
struct FromLine {
    platform: Option<String>,
    image: String,
    alias: Option<String>,
}

fn parse_from(rest: &str, line: usize) -> Result<FromLine, ManifestError> {
    let mut platform = None;
    let mut words = Vec::new();
    for word in rest.split_whitespace() {
        if let Some(flag) = word.strip_prefix("--") {
            match flag.split_once('=') {
                Some(("platform", value)) => platform = Some(value.to_string()),
                _ => return Err(parse_error(line, format!("unsupported FROM option '{word}'"))),
            }
        } else {
            words.push(word);
        }
    }

    match words.as_slice() {
        [image] => Ok(FromLine {
            platform,
            image: (*image).to_string(),
            alias: None,
        }),
        [image, as_kw, alias] if as_kw.eq_ignore_ascii_case("AS") => Ok(FromLine {
            platform,
            image: (*image).to_string(),
            alias: Some(alias.to_ascii_lowercase()),
        }),
        [] => Err(parse_error(line, "FROM requires an image")),
        _ => Err(parse_error(line, "expected FROM [--platform=<p>] <image> [AS <name>]")),
    }
}

/// Stage names in declaration order; unnamed stages are named by index
fn stage_names(lines: &[LogicalLine]) -> Result<Vec<String>, ManifestError> {
    let mut names = Vec::new();
    for logical in lines {
        let (keyword, rest) = split_first_word(&logical.text);
        if keyword.eq_ignore_ascii_case("FROM") {
            let from = parse_from(rest, logical.line)?;
            let index = names.len();
            names.push(from.alias.unwrap_or_else(|| index.to_string()));
        }
    }
    Ok(names)
}

/// Resolves a stage name (case-insensitive) or numeric index against `known`
fn stage_ref(reference: &str, known: &[String]) -> Option<String> {
    let lowered = reference.to_ascii_lowercase();
    if known.contains(&lowered) {
        return Some(lowered);
    }
    reference
        .parse::<usize>()
        .ok()
        .and_then(|index| known.get(index).cloned())
}

/// Exec form when the text is a JSON string array, shell form otherwise
fn command_form(rest: &str) -> CommandForm {
    if rest.starts_with('[') {
        if let Ok(args) = serde_json::from_str::<Vec<String>>(rest) {
            return CommandForm::Exec(args);
        }
    }
    CommandForm::Shell(rest.to_string())
}

fn parse_run(rest: &str, line: usize) -> Result<Instruction, ManifestError> {
    let rest = required(rest, "RUN requires a command", line)?;
    let command = match command_form(&rest) {
        CommandForm::Exec(args) => shell_words::join(args),
        CommandForm::Shell(command) => command,
    };
    Ok(Instruction::Run { command })
}

fn parse_copy(rest: &str, line: usize, names: &[String]) -> Result<Instruction, ManifestError> {
    let mut from = CopySource::Context;
    let mut chown = None;
    let mut remaining = rest.trim();

    while let Some(flag) = remaining.strip_prefix("--") {
        let (word, after) = split_first_word(flag);
        match word.split_once('=') {
            Some(("from", source)) => {
                from = match stage_ref(source, names) {
                    Some(stage) => CopySource::Stage(stage),
                    None => CopySource::Image(source.to_string()),
                };
            }
            Some(("chown", owner)) => chown = Some(owner.to_string()),
            _ => {
                tracing::debug!(line, flag = word, "COPY option kept verbatim");
                return Ok(Instruction::Other {
                    keyword: "COPY".to_string(),
                    args: rest.trim().to_string(),
                });
            }
        }
        remaining = after;
    }

    let mut paths: Vec<String> = if remaining.starts_with('[') {
        serde_json::from_str(remaining)
            .map_err(|e| parse_error(line, format!("invalid JSON array in COPY: {e}")))?
    } else {
        remaining.split_whitespace().map(str::to_string).collect()
    };

    if paths.len() < 2 {
        return Err(parse_error(line, "COPY requires at least one source and a destination"));
    }
    let dest = paths.pop().unwrap_or_default();

    Ok(Instruction::Copy {
        from,
        sources: paths,
        dest,
        chown,
    })
}

/// `KEY=value ...` pairs, or the legacy `KEY value` form
fn parse_pairs(keyword: &str, rest: &str, line: usize) -> Result<Vec<(String, String)>, ManifestError> {
    let rest = required(rest, &format!("{keyword} requires a key and a value"), line)?;
    let (first, legacy_value) = split_first_word(&rest);

    if !first.contains('=') {
        if legacy_value.is_empty() {
            return Err(parse_error(line, format!("{keyword} {first} is missing a value")));
        }
        return Ok(vec![(unquote(first), legacy_value.to_string())]);
    }

    let words = shell_words::split(&rest)
        .map_err(|e| parse_error(line, format!("{keyword}: {e}")))?;
    words
        .into_iter()
        .map(|word| match word.split_once('=') {
            Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
            _ => Err(parse_error(line, format!("{keyword}: expected KEY=value, got '{word}'"))),
        })
        .collect()
}

fn parse_arg_pairs(rest: &str, line: usize) -> Result<Vec<(String, Option<String>)>, ManifestError> {
    let rest = required(rest, "ARG requires a name", line)?;
    let words = shell_words::split(&rest).map_err(|e| parse_error(line, format!("ARG: {e}")))?;
    Ok(words
        .into_iter()
        .map(|word| match word.split_once('=') {
            Some((name, default)) => (name.to_string(), Some(default.to_string())),
            None => (word, None),
        })
        .collect())
}

fn parse_expose(rest: &str, line: usize) -> Result<Vec<Port>, ManifestError> {
    let rest = required(rest, "EXPOSE requires a port", line)?;
    rest.split_whitespace()
        .map(|word| word.parse::<Port>().map_err(|e| parse_error(line, e)))
        .collect()
}

fn parse_healthcheck(rest: &str, line: usize) -> Result<HealthCheck, ManifestError> {
    let mut rest = required(rest, "HEALTHCHECK requires CMD <command> or NONE", line)?;
    if rest.eq_ignore_ascii_case("NONE") {
        return Ok(HealthCheck::disabled());
    }

    let mut check = HealthCheck::default();
    while rest.starts_with("--") {
        let (word, after) = split_first_word(&rest);
        let (name, value) = word[2..]
            .split_once('=')
            .ok_or_else(|| parse_error(line, format!("HEALTHCHECK option '{word}' needs a value")))?;
        let duration = || parse_duration(value).map_err(|e| parse_error(line, e));
        match name {
            "interval" => check.interval = duration()?,
            "timeout" => check.timeout = duration()?,
            "start-period" => check.start_period = duration()?,
            "start-interval" => {}
            "retries" => {
                check.retries = value
                    .parse()
                    .map_err(|_| parse_error(line, format!("invalid HEALTHCHECK retries '{value}'")))?;
            }
            other => {
                return Err(parse_error(line, format!("unknown HEALTHCHECK option '--{other}'")));
            }
        }
        rest = after.to_string();
    }

    let (keyword, command) = split_first_word(&rest);
    if !keyword.eq_ignore_ascii_case("CMD") || command.is_empty() {
        return Err(parse_error(line, "HEALTHCHECK requires CMD <command> or NONE"));
    }
    check.test = Some(command_form(command));
    Ok(check)
}

/// Remove surrounding quotes from a string
fn unquote(s: &str) -> String {
    let s = s.trim();
    if s.len() >= 2
        && ((s.starts_with('"') && s.ends_with('"')) || (s.starts_with('\'') && s.ends_with('\'')))
    {
        s[1..s.len() - 1].to_string()
    } else {
        s.to_string()
    }
}
