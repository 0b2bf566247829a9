//! Show the effective session configuration.
//!
//! Formatting is pure so it can be asserted on directly.

use anyhow::{Context, Result};
use colored::Colorize;
use std::fmt::Write;

use crate::config::{Config, NetworkMode};

/// Format the effective configuration as a displayable string
pub fn format_status(config: &Config) -> String {
    let mut out = String::new();

    writeln!(&mut out, "{}", "Warden configuration".bold()).unwrap();
    writeln!(&mut out, "  Tool:    {}", config.tool.name).unwrap();
    writeln!(&mut out, "  Image:   {}", config.sandbox.image).unwrap();
    writeln!(&mut out, "  Network: {}", config.network.mode).unwrap();

    match config.network.mode {
        NetworkMode::Open => {}
        NetworkMode::Restricted => {
            if config.network.block_private_networks {
                writeln!(&mut out, "    Blocking private networks (RFC1918)").unwrap();
            }
            if config.network.block_metadata_endpoint {
                writeln!(&mut out, "    Blocking cloud metadata endpoints").unwrap();
            }
        }
        NetworkMode::Allowlist => {
            writeln!(
                &mut out,
                "    Allowed domains ({}):",
                config.network.allowed_domains.len()
            )
            .unwrap();
            for domain in &config.network.allowed_domains {
                writeln!(&mut out, "      {domain}").unwrap();
            }
            if config.network.refresh_interval_minutes > 0 {
                writeln!(
                    &mut out,
                    "    IP refresh every {} minutes",
                    config.network.refresh_interval_minutes
                )
                .unwrap();
            } else {
                writeln!(&mut out, "    IP refresh disabled").unwrap();
            }
        }
    }

    out
}

pub async fn run() -> Result<()> {
    let cwd = std::env::current_dir().context("Failed to get current directory")?;
    let config = Config::load(&cwd)?;
    print!("{}", format_status(&config));
    Ok(())
}
