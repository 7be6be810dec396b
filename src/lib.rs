//! # Stageline - staged container builds as typed manifests
//!
//! Stageline models a multi-stage container build as an ordered set of named
//! stages forming a DAG. Each stage starts from an image or an earlier stage,
//! runs its instructions and may promote selected artifacts from other
//! stages. On top of the model it offers:
//!
//! - **Validation**: names, references, cycles and forward references
//! - **Graph queries**: dependencies, closures and parallel build waves
//! - **Promotion audit**: keeps development artifacts out of deployable stages
//! - **Fingerprints**: content digests that move when an upstream stage changes
//! - **Dockerfile codec**: parse and render with `# @` metadata annotations
//! - **Build execution**: wave-by-wave builds through an [`executor::ImageBuilder`]
//! - **Health probing**: the container-runtime health check policy over HTTP
//!
//! ## Quick Start
//!
//! ```
//! use stageline::prelude::*;
//!
//! let manifest = stageline::presets::claude_flow();
//! assert!(manifest.validate().is_ok());
//!
//! let plan = BuildPlan::new(&manifest, &["production".to_string()]).unwrap();
//! assert_eq!(plan.waves.len(), 4);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

mod macros;

pub mod dockerfile;
pub mod executor;
pub mod infrastructure;
pub mod loader;
pub mod manifest;
pub mod presets;

// Prelude module for common imports
pub mod prelude;

// Re-export commonly used types
pub use executor::{
    BuildExecutor, BuildPlan, BuildReport, DockerCliBuilder, DryRunBuilder, ImageBuilder,
};
pub use infrastructure::{Config, HealthProbe, MetricsCollector};
pub use loader::{ManifestFormat, load_file, load_str};
pub use manifest::{
    Artifact, BaseRef, HealthCheck, Instruction, Manifest, ManifestBuilder, ManifestError, Stage,
    StageBuilder, StageGraph, StageResult, Validate, ValidationError,
};

/// Version of the stageline crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
