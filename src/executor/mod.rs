//! Build execution layer
//!
//! This module plans builds, schedules stage waves and defines the
//! [`ImageBuilder`] seam with its Docker CLI and dry-run implementations.

mod docker;
mod dry_run;
mod plan;
mod scheduler;
mod traits;

pub use docker::{DIGEST_LABEL, DockerCliBuilder};
pub use dry_run::DryRunBuilder;
pub use plan::BuildPlan;
pub use scheduler::{
    BuildExecutor, BuildReport, DEFAULT_MAX_PARALLEL, ExecutorConfig, StageOutcome,
};
pub use traits::{
    BuilderCapabilities, HealthStatus, ImageBuilder, StageBuildOutput, StageBuildRequest,
};
