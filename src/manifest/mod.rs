//! Manifest domain types and logic

pub mod environment;
pub mod errors;
pub mod fingerprint;
pub mod graph;
pub mod healthcheck;
pub mod instruction;
pub mod manifest_def;
pub mod mcp;
pub mod promotion;
pub mod stage;
pub mod types;


// Re-export public types from submodules
pub use environment::{Environment, is_valid_variable_name};
pub use errors::{ManifestError, ValidationError};
pub use fingerprint::{short_digest, stage_digests};
pub use graph::StageGraph;
pub use healthcheck::{HealthCheck, format_duration, parse_duration};
pub use instruction::{CommandForm, CopySource, Instruction};
pub use manifest_def::{BuildArg, Manifest, ManifestBuilder, ResolvedStage};
pub use mcp::{DEFAULT_MCP_CONFIG_PATH, McpRegistration, McpServer};
pub use promotion::{PromotionViolation, ViolationKind, audit};
pub use stage::{
    Artifact, ArtifactScope, BaseRef, MAX_STAGE_NAME_LEN, Port, Protocol, Stage, StageBuilder,
    validate_stage_name,
};
pub use types::{ManifestResult, StageResult, Validate};
