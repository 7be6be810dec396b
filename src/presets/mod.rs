//! Built-in manifests

pub mod claude_flow;

pub use claude_flow::{APP_PORT, ClaudeFlowOptions, NODE_IMAGE, claude_flow, claude_flow_with};

use crate::manifest::Manifest;

/// Names accepted by [`by_name`]
pub const PRESET_NAMES: &[&str] = &["claude-flow"];

/// Looks up a built-in manifest by name
pub fn by_name(name: &str) -> Option<Manifest> {
    match name {
        "claude-flow" => Some(claude_flow()),
        _ => None,
    }
}
