//! The claude-flow multi-stage build
//!
//! Six stages over one Node base image:
//!
//! ```text
//! base ──> dependencies ──┐
//!   │                     v
//!   └──────────────> development ──> testing
//!                         │     └──> swarm-integration (also copies deno from base)
//!                         v
//! node image ──────> production (copies from dependencies and development)
//! ```
//!
//! Only `production` is deployable. It receives the production dependency
//! tree and the build output, nothing else.

use crate::manifest::{
    Artifact, BaseRef, DEFAULT_MCP_CONFIG_PATH, HealthCheck, Instruction, Manifest,
    McpRegistration, Stage, StageBuilder,
};
use crate::{copy, exec, instructions, run, set_env};

/// Node image every root stage starts from
pub const NODE_IMAGE: &str = "node:20-alpine";

/// Application port inside the containers
pub const APP_PORT: u16 = 3000;

/// Tunables of the claude-flow preset
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaudeFlowOptions {
    /// Base image for `base` and `production`
    pub node_image: String,
    /// Where the swarm stage writes the MCP registration
    pub mcp_config_path: String,
    /// Health endpoint probed inside the container
    pub health_url: String,
}

impl Default for ClaudeFlowOptions {
    fn default() -> Self {
        Self {
            node_image: NODE_IMAGE.to_string(),
            mcp_config_path: DEFAULT_MCP_CONFIG_PATH.to_string(),
            health_url: format!("http://localhost:{APP_PORT}/health"),
        }
    }
}

/// The claude-flow manifest with default options
pub fn claude_flow() -> Manifest {
    claude_flow_with(&ClaudeFlowOptions::default())
}

/// The claude-flow manifest
pub fn claude_flow_with(options: &ClaudeFlowOptions) -> Manifest {
    let health = HealthCheck::http(&options.health_url);

    Manifest::builder()
        .name("claude-flow")
        .description("Multi-stage build for claude-flow: development, testing, production and swarm integration images")
        .stage(base(options))
        .stage(dependencies())
        .stage(development(health.clone()))
        .stage(testing())
        .stage(production(options, health))
        .stage(swarm_integration(options))
        .build_unchecked()
}

fn base(options: &ClaudeFlowOptions) -> Stage {
    StageBuilder::new("base", BaseRef::image(&options.node_image))
        .description("System packages and package manifests shared by every Node stage")
        .instructions(instructions![
            run!(
                "apk add --no-cache git python3 py3-pip make g++ sqlite bash curl deno \
                 && rm -rf /var/cache/apk/*"
            ),
            Instruction::workdir("/app"),
            copy!(["package*.json", "tsconfig*.json"] => "./"),
        ])
        .artifact(Artifact::runtime("/usr/bin/deno"))
        .build_unchecked()
}

fn dependencies() -> Stage {
    StageBuilder::new("dependencies", BaseRef::stage("base"))
        .description("Production-only dependency tree set aside, then the full tree")
        .run("npm ci --omit=dev && cp -R node_modules /tmp/prod_node_modules")
        .run("npm ci")
        .artifact(Artifact::runtime("/tmp/prod_node_modules"))
        .artifact(Artifact::development("/app/node_modules"))
        .build_unchecked()
}

fn development(health: HealthCheck) -> Stage {
    StageBuilder::new("development", BaseRef::stage("base"))
        .description("Full dependencies and sources, built, running the dev server")
        .instructions(instructions![
            copy!(from = "dependencies", ["/app/node_modules"] => "./node_modules"),
            copy!(["."] => "."),
            run!("mkdir -p logs data .claude-flow"),
            run!("npm run build"),
            ..set_env!(NODE_ENV = "development", DEBUG = "claude-flow:*", PORT = "3000"),
        ])
        .expose(APP_PORT)
        .expose(3001)
        .expose(8080)
        .healthcheck(health)
        .cmd(exec!("npm", "run", "dev"))
        .artifact(Artifact::development("/app"))
        .artifact(Artifact::runtime("/app/dist"))
        .artifact(Artifact::runtime("/app/bin"))
        .build_unchecked()
}

fn testing() -> Stage {
    StageBuilder::new("testing", BaseRef::stage("development"))
        .description("Test tooling and result directories on top of the development image")
        .instructions(instructions![
            copy!(["jest.config.js"] => "./"),
            run!("npm install --no-save jest ts-jest @types/jest"),
            run!("mkdir -p test-results coverage"),
            ..set_env!(NODE_ENV = "test", CI = "true"),
        ])
        .cmd(exec!("npm", "test"))
        .artifact(Artifact::development("/app/test-results"))
        .artifact(Artifact::development("/app/coverage"))
        .build_unchecked()
}

fn production(options: &ClaudeFlowOptions, health: HealthCheck) -> Stage {
    const OWNER: &str = "claude:claude";

    StageBuilder::new("production", BaseRef::image(&options.node_image))
        .description("Runtime packages, production dependencies and build output under a non-root user")
        .instructions(instructions![
            run!("apk add --no-cache sqlite bash curl && rm -rf /var/cache/apk/*"),
            run!("addgroup -g 1001 -S claude && adduser -S claude -u 1001 -G claude"),
            Instruction::workdir("/app"),
            copy!(from = "dependencies", chown = OWNER, ["/tmp/prod_node_modules"] => "./node_modules"),
            copy!(from = "dependencies", chown = OWNER, ["/app/package*.json"] => "./"),
            copy!(from = "development", chown = OWNER, ["/app/dist"] => "./dist"),
            copy!(from = "development", chown = OWNER, ["/app/bin"] => "./bin"),
            run!("mkdir -p logs data .claude-flow && chown -R claude:claude /app"),
            Instruction::user("claude"),
            ..set_env!(NODE_ENV = "production", PORT = "3000"),
        ])
        .expose(APP_PORT)
        .healthcheck(health)
        .cmd(exec!("node", "dist/cli/main.js", "start"))
        .deployable()
        .build_unchecked()
}

fn swarm_integration(options: &ClaudeFlowOptions) -> Stage {
    let registration = McpRegistration::ruv_swarm().to_json_pretty();

    StageBuilder::new("swarm-integration", BaseRef::stage("development"))
        .description("Development image with ruv-swarm installed and registered as an MCP server")
        .instructions(instructions![
            copy!(from = "base", ["/usr/bin/deno"] => "/usr/local/bin/deno"),
            run!("npm install -g ruv-swarm"),
            Instruction::write_file(&options.mcp_config_path, registration),
            ..set_env!(SWARM_MODE = "true", MCP_ENABLED = "true"),
        ])
        .cmd(exec!("npm", "run", "test:swarm"))
        .build_unchecked()
}
