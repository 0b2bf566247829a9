//! Run a coding-agent tool session in a sandboxed container.

use anyhow::{Context, Result};
use colored::Colorize;

use crate::config::{Config, NetworkMode};
use crate::session::Session;
use crate::tool::ToolRegistry;

pub async fn run(
    tool_name: Option<String>,
    network: Option<NetworkMode>,
    prompt_args: Vec<String>,
) -> Result<()> {
    let cwd = std::env::current_dir().context("Failed to get current directory")?;
    let mut config = Config::load(&cwd)?;

    if let Some(mode) = network {
        config.network.mode = mode;
    }

    let registry = ToolRegistry::builtin();
    let tool_name = tool_name.unwrap_or_else(|| config.tool.name.clone());
    let tool = registry.get(&tool_name)?.clone();

    let mut session = Session::create(config, tool, &cwd).await?;
    println!(
        "{} Session {} starting",
        "▶".green(),
        session.container_name().bold()
    );

    let output = session.run(&prompt_args).await?;
    print!("{output}");

    println!("{} Session finished", "✓".green());
    Ok(())
}
