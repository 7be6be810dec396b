//! Dockerfile reader and writer
//!
//! Stage metadata that Dockerfiles cannot express (artifacts, deployability,
//! promotable context paths) travels in `# @` annotation comments.

mod parser;
mod render;

pub use parser::parse;
pub use render::{render, render_instruction};
