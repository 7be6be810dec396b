//! Instruction types for stage definitions
//!
//! Each instruction produces one layer of the stage filesystem, in order.

#![allow(clippy::must_use_candidate, clippy::return_self_not_must_use)]

use serde::{Deserialize, Serialize};
use std::fmt;

/// A process command in exec (`["npm", "test"]`) or shell (`npm test`) form
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CommandForm {
    /// Argument vector executed directly
    Exec(Vec<String>),
    /// Command line run through `/bin/sh -c`
    Shell(String),
}

impl CommandForm {
    /// Creates an exec-form command
    pub fn exec<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Exec(args.into_iter().map(Into::into).collect())
    }

    /// Creates a shell-form command
    pub fn shell(command: impl Into<String>) -> Self {
        Self::Shell(command.into())
    }

    /// Returns true if there is nothing to run
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Exec(args) => args.is_empty() || args.iter().all(|a| a.trim().is_empty()),
            Self::Shell(command) => command.trim().is_empty(),
        }
    }

    /// Returns the argument vector the runtime would execute
    pub fn argv(&self) -> Vec<String> {
        match self {
            Self::Exec(args) => args.clone(),
            Self::Shell(command) => vec!["/bin/sh".to_string(), "-c".to_string(), command.clone()],
        }
    }
}

impl fmt::Display for CommandForm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exec(args) => {
                let json = serde_json::to_string(args).map_err(|_| fmt::Error)?;
                write!(f, "{}", json.replace("\",\"", "\", \""))
            }
            Self::Shell(command) => write!(f, "{command}"),
        }
    }
}

/// Where a `COPY` instruction takes its files from
///
/// Serialized as `{stage: <name>}`, `{image: <ref>}` or `{}` for the build context.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "SourceRef", into = "SourceRef")]
pub enum CopySource {
    /// The build context (source tree)
    #[default]
    Context,
    /// The filesystem of an earlier stage
    Stage(String),
    /// An external image
    Image(String),
}

impl CopySource {
    /// Returns the stage name for stage sources
    pub fn stage(&self) -> Option<&str> {
        match self {
            Self::Stage(name) => Some(name),
            _ => None,
        }
    }

    /// Returns true for build-context copies
    pub fn is_context(&self) -> bool {
        matches!(self, Self::Context)
    }
}

/// Map form shared by copy sources and stage bases
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct SourceRef {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub(crate) stage: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub(crate) image: Option<String>,
}

impl From<SourceRef> for CopySource {
    fn from(repr: SourceRef) -> Self {
        match (repr.stage, repr.image) {
            (Some(stage), _) => Self::Stage(stage),
            (None, Some(image)) => Self::Image(image),
            (None, None) => Self::Context,
        }
    }
}

impl From<CopySource> for SourceRef {
    fn from(source: CopySource) -> Self {
        match source {
            CopySource::Context => Self::default(),
            CopySource::Stage(stage) => Self {
                stage: Some(stage),
                image: None,
            },
            CopySource::Image(image) => Self {
                stage: None,
                image: Some(image),
            },
        }
    }
}

/// A single build instruction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Instruction {
    /// Run a shell command
    Run {
        /// Command line
        command: String,
    },

    /// Copy files into the stage
    Copy {
        /// Origin of the files
        #[serde(default, skip_serializing_if = "CopySource::is_context")]
        from: CopySource,
        /// Source paths or globs
        sources: Vec<String>,
        /// Destination path
        dest: String,
        /// Owner for the copied files (`user:group`)
        #[serde(skip_serializing_if = "Option::is_none", default)]
        chown: Option<String>,
    },

    /// Set an environment variable
    Env {
        /// Variable name
        key: String,
        /// Variable value
        value: String,
    },

    /// Declare a build argument
    Arg {
        /// Argument name
        name: String,
        /// Default value
        #[serde(skip_serializing_if = "Option::is_none", default)]
        default: Option<String>,
    },

    /// Add image metadata
    Label {
        /// Label key
        key: String,
        /// Label value
        value: String,
    },

    /// Change the working directory
    Workdir {
        /// Directory path
        path: String,
    },

    /// Switch the user for later instructions and the container process
    User {
        /// User name or uid, optionally with group
        user: String,
    },

    /// Write fixed contents to a file
    #[serde(rename = "write_file")]
    WriteFile {
        /// Absolute file path
        path: String,
        /// File contents
        contents: String,
    },

    /// Any other instruction, kept verbatim
    Other {
        /// Upper-case keyword
        keyword: String,
        /// Raw arguments
        args: String,
    },
}

impl Instruction {
    /// Creates a run instruction
    pub fn run(command: impl Into<String>) -> Self {
        Self::Run {
            command: command.into(),
        }
    }

    /// Creates a copy from the build context
    pub fn copy<I, S>(sources: I, dest: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Copy {
            from: CopySource::Context,
            sources: sources.into_iter().map(Into::into).collect(),
            dest: dest.into(),
            chown: None,
        }
    }

    /// Creates a copy from an earlier stage
    pub fn copy_from<I, S>(stage: impl Into<String>, sources: I, dest: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Copy {
            from: CopySource::Stage(stage.into()),
            sources: sources.into_iter().map(Into::into).collect(),
            dest: dest.into(),
            chown: None,
        }
    }

    /// Creates an environment instruction
    pub fn env(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self::Env {
            key: key.into(),
            value: value.into(),
        }
    }

    /// Creates a build argument declaration
    pub fn arg(name: impl Into<String>, default: Option<String>) -> Self {
        Self::Arg {
            name: name.into(),
            default,
        }
    }

    /// Creates a label instruction
    pub fn label(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self::Label {
            key: key.into(),
            value: value.into(),
        }
    }

    /// Creates a workdir instruction
    pub fn workdir(path: impl Into<String>) -> Self {
        Self::Workdir { path: path.into() }
    }

    /// Creates a user instruction
    pub fn user(user: impl Into<String>) -> Self {
        Self::User { user: user.into() }
    }

    /// Creates a write-file instruction
    pub fn write_file(path: impl Into<String>, contents: impl Into<String>) -> Self {
        Self::WriteFile {
            path: path.into(),
            contents: contents.into(),
        }
    }

    /// Sets the owner of a copy instruction; other instructions are unchanged
    pub fn with_chown(mut self, owner: impl Into<String>) -> Self {
        if let Self::Copy { chown, .. } = &mut self {
            *chown = Some(owner.into());
        }
        self
    }

    /// Returns the Dockerfile keyword of this instruction
    pub fn keyword(&self) -> &str {
        match self {
            Self::Run { .. } | Self::WriteFile { .. } => "RUN",
            Self::Copy { .. } => "COPY",
            Self::Env { .. } => "ENV",
            Self::Arg { .. } => "ARG",
            Self::Label { .. } => "LABEL",
            Self::Workdir { .. } => "WORKDIR",
            Self::User { .. } => "USER",
            Self::Other { keyword, .. } => keyword,
        }
    }

    /// Returns the stage this instruction copies from, if any
    pub fn copy_stage(&self) -> Option<&str> {
        match self {
            Self::Copy { from, .. } => from.stage(),
            _ => None,
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Run { command } => write!(f, "RUN {command}"),
            Self::Copy {
                from,
                sources,
                dest,
                ..
            } => {
                let origin = match from {
                    CopySource::Context => String::new(),
                    CopySource::Stage(name) | CopySource::Image(name) => format!("--from={name} "),
                };
                write!(f, "COPY {origin}{} {dest}", sources.join(" "))
            }
            Self::Env { key, value } => write!(f, "ENV {key}={value}"),
            Self::Arg { name, default } => match default {
                Some(value) => write!(f, "ARG {name}={value}"),
                None => write!(f, "ARG {name}"),
            },
            Self::Label { key, value } => write!(f, "LABEL {key}={value}"),
            Self::Workdir { path } => write!(f, "WORKDIR {path}"),
            Self::User { user } => write!(f, "USER {user}"),
            Self::WriteFile { path, .. } => write!(f, "RUN <write {path}>"),
            Self::Other { keyword, args } => write!(f, "{keyword} {args}"),
        }
    }
}
