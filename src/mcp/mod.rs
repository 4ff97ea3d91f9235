use clap::Command;

mod server;
mod tools;

pub use server::MCPServer;

use crate::config::{self, Config};

/// Create the `mcp` subcommand.
pub fn command() -> Command {
    config::common_args(Command::new("mcp").about("Run the Genie MCP server on stdio"))
}

pub async fn run(config: Config) -> anyhow::Result<()> {
    let server = MCPServer::new(&config)?;
    server.run_stdio().await
}
