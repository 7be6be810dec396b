//! Error types for the manifest domain

use thiserror::Error;

/// Errors that can occur while loading, planning or building a manifest
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ManifestError {
    /// Validation failed with specified reason
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// Manifest source could not be parsed
    #[error("Parse error at line {line}: {message}")]
    Parse {
        /// 1-based line number of the offending instruction.
        line: usize,
        /// Description of the problem.
        message: String,
    },

    /// Stage build failed
    #[error("Stage '{stage}' failed: {error}")]
    StageFailed {
        /// Name of the stage that failed.
        stage: String,
        /// Error message describing the failure.
        error: String,
    },

    /// Command execution failed
    #[error("Command failed with exit code {code}: {stderr}")]
    CommandFailed {
        /// Exit code returned by the command.
        code: i32,
        /// Standard error output from the command.
        stderr: String,
    },

    /// Timeout exceeded
    #[error("Timeout after {duration:?}")]
    Timeout {
        /// Duration before timeout.
        duration: std::time::Duration,
    },

    /// Requested build target is not a stage of the manifest
    #[error("Unknown target stage: '{0}'")]
    UnknownTarget(String),

    /// Image builder backend cannot be used
    #[error("Builder unavailable: {0}")]
    BuilderUnavailable(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// IO error occurred
    #[error("IO error: {0}")]
    Io(String),
}

impl From<std::io::Error> for ManifestError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for ManifestError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for ManifestError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Validation errors for manifest components
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Name cannot be empty
    #[error("Name cannot be empty")]
    EmptyName,

    /// Name too long
    #[error("Name too long: max {max} characters, got {len}")]
    NameTooLong {
        /// Maximum allowed length.
        max: usize,
        /// Actual length of the name.
        len: usize,
    },

    /// Invalid characters in name
    #[error("Invalid characters in name: '{name}'")]
    InvalidNameChars {
        /// The invalid name.
        name: String,
    },

    /// Manifest must have at least one stage
    #[error("Manifest must have at least one stage")]
    EmptyManifest,

    /// Two stages share a name
    #[error("Duplicate stage name: '{name}'")]
    DuplicateStage {
        /// The repeated name.
        name: String,
    },

    /// Stage refers to a stage that does not exist
    #[error("Stage '{stage}' references unknown stage '{reference}'")]
    UnknownStage {
        /// Referencing stage.
        stage: String,
        /// Missing stage.
        reference: String,
    },

    /// Stage refers to itself or to a stage declared after it
    #[error("Stage '{stage}' references '{reference}', which is not declared before it")]
    ForwardReference {
        /// Referencing stage.
        stage: String,
        /// Stage declared at or after the referencing stage.
        reference: String,
    },

    /// Stage references form a loop
    #[error("Cyclic stage references: {}", cycle.join(" -> "))]
    CyclicReference {
        /// Stage names along the loop, first name repeated at the end.
        cycle: Vec<String>,
    },

    /// Stage base image is empty
    #[error("Stage '{stage}' has an empty base image")]
    EmptyImage {
        /// Offending stage.
        stage: String,
    },

    /// Port zero cannot be exposed
    #[error("Stage '{stage}' exposes invalid port {port}")]
    InvalidPort {
        /// Offending stage.
        stage: String,
        /// The port.
        port: u16,
    },

    /// Environment or argument name is not a valid identifier
    #[error("Invalid variable name: '{name}'")]
    InvalidVariableName {
        /// The invalid name.
        name: String,
    },

    /// Instruction has no content
    #[error("Stage '{stage}' has an empty {kind} instruction")]
    EmptyInstruction {
        /// Offending stage.
        stage: String,
        /// Instruction keyword.
        kind: String,
    },

    /// Health check timing is invalid
    #[error("Invalid health check: {0}")]
    InvalidHealthCheck(String),

    /// `ENV`, `ARG` or `LABEL` value spans several lines
    #[error("Stage '{stage}': value of '{key}' contains a line break")]
    MultilineValue {
        /// Offending stage, `(global)` for global arguments.
        stage: String,
        /// Variable, argument or label name.
        key: String,
    },
}
