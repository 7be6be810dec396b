//! MCP server registration file
//!
//! The registration is plain JSON consumed by the agent runtime:
//! `{"mcpServers": {"<name>": {"command": ..., "args": [...]}}}`.

#![allow(clippy::must_use_candidate, clippy::return_self_not_must_use)]

use super::errors::ManifestError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::collections::BTreeMap;

/// Default location of the registration inside an image
pub const DEFAULT_MCP_CONFIG_PATH: &str = "/root/.config/claude/mcp.json";

/// Command used to start one MCP server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct McpServer {
    /// Executable
    pub command: String,
    /// Arguments
    #[serde(default)]
    pub args: Vec<String>,
}

impl McpServer {
    /// Creates a server entry
    pub fn new<I, S>(command: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            command: command.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }
}

/// Set of registered MCP servers
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct McpRegistration {
    /// Servers by name
    #[serde(rename = "mcpServers", default)]
    pub servers: BTreeMap<String, McpServer>,
}

impl McpRegistration {
    /// Creates an empty registration
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a server
    pub fn with_server(mut self, name: impl Into<String>, server: McpServer) -> Self {
        self.servers.insert(name.into(), server);
        self
    }

    /// The `ruv-swarm` server started through `npx`
    pub fn ruv_swarm() -> Self {
        Self::new().with_server("ruv-swarm", McpServer::new("npx", ["ruv-swarm", "mcp", "start"]))
    }

    /// Serializes to compact JSON
    ///
    /// # Errors
    ///
    /// Returns a serialization error if JSON encoding fails.
    pub fn to_json(&self) -> Result<String, ManifestError> {
        Ok(serde_json::to_string(self)?)
    }

    /// The registration as a JSON value
    pub fn to_value(&self) -> Value {
        let servers: Map<String, Value> = self
            .servers
            .iter()
            .map(|(name, server)| {
                let entry = json!({ "command": server.command, "args": server.args });
                (name.clone(), entry)
            })
            .collect();
        json!({ "mcpServers": servers })
    }

    /// Serializes to indented JSON
    pub fn to_json_pretty(&self) -> String {
        format!("{:#}", self.to_value())
    }

    /// Parses a registration file
    ///
    /// # Errors
    ///
    /// Returns a serialization error for malformed JSON.
    pub fn from_json(text: &str) -> Result<Self, ManifestError> {
        Ok(serde_json::from_str(text)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ruv_swarm_registration_shape() {
        let json = McpRegistration::ruv_swarm().to_json().unwrap();
        assert_eq!(
            json,
            r#"{"mcpServers":{"ruv-swarm":{"command":"npx","args":["ruv-swarm","mcp","start"]}}}"#
        );
    }

    #[test]
    fn test_pretty_json_reads_back() {
        let registration = McpRegistration::ruv_swarm()
            .with_server("files", McpServer::new("mcp-files", ["--root", "/app"]));
        let text = registration.to_json_pretty();
        assert!(text.lines().count() > 1);
        assert_eq!(McpRegistration::from_json(&text).unwrap(), registration);
        assert_eq!(
            serde_json::from_str::<Value>(&text).unwrap(),
            serde_json::to_value(&registration).unwrap()
        );
    }

    #[test]
    fn test_parse_registration() {
        let text = r#"{"mcpServers": {"files": {"command": "mcp-files"}}}"#;
        let registration = McpRegistration::from_json(text).unwrap();
        assert_eq!(registration.servers["files"].command, "mcp-files");
        assert!(registration.servers["files"].args.is_empty());
        assert!(McpRegistration::from_json("[]").is_err());
    }
}
