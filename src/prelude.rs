//! Prelude module for common imports

// Re-export macros
pub use crate::{copy, exec, instructions, manifest, run, set_env, stage};

// Re-export manifest types
pub use crate::manifest::{
    Artifact, ArtifactScope, BaseRef, BuildArg, CommandForm, CopySource, Environment,
    HealthCheck, Instruction, Manifest, ManifestBuilder, ManifestError, ManifestResult,
    McpRegistration, McpServer, Port, PromotionViolation, ResolvedStage, Stage, StageBuilder,
    StageGraph, StageResult, Validate, ValidationError, ViolationKind, audit, stage_digests,
};

// Re-export execution types
pub use crate::executor::{
    BuildExecutor, BuildPlan, BuildReport, DockerCliBuilder, DryRunBuilder, ExecutorConfig,
    ImageBuilder, StageOutcome,
};
