//! stageline - CLI for staged container-build manifests
//!
//! ## Commands
//!
//! - `stageline check` - Load and validate a manifest
//! - `stageline lint` - Analyze a manifest for best practices
//! - `stageline doc` - Generate documentation and stage graphs
//! - `stageline export` - Convert between Dockerfile, YAML and JSON
//! - `stageline plan` - Show the build waves for some targets
//! - `stageline build` - Build stages wave by wave
//! - `stageline probe` - Poll a health endpoint
//! - `stageline init` - Write the claude-flow manifest
//! - `stageline completions` - Generate shell completions
//!
//! ## Quick Start
//!
//! ```bash
//! # Start from the claude-flow build
//! stageline init -o Dockerfile
//!
//! # Check for best practices
//! stageline lint Dockerfile --severity warning
//!
//! # Build only what production needs
//! stageline build Dockerfile --target production --tag-prefix claude-flow
//!
//! # Wait for the running container
//! stageline probe --file Dockerfile --stage production
//! ```

use std::process::ExitCode;

mod cli;

fn main() -> ExitCode {
    // Initialize tracing for debugging
    if std::env::var("STAGELINE_DEBUG").is_ok() {
        stageline::infrastructure::init_logging("debug");
    }

    // Run the CLI
    match cli::run() {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e}");
            if std::env::var("STAGELINE_VERBOSE").is_ok() {
                eprintln!("{e:?}");
            }
            ExitCode::FAILURE
        }
    }
}
