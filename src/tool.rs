//! Coding-agent tool registry.
//!
//! A tool is the CLI the session runs inside the container. The
//! registry is an explicit table handed to the session at construction
//! time rather than a process-wide singleton, so tests and embedders
//! can register their own entries.

use anyhow::Result;
use std::collections::BTreeMap;

/// Command-line builder for one coding-agent CLI.
#[derive(Debug, Clone)]
pub struct Tool {
    pub name: String,
    pub binary: String,
    pub base_args: Vec<String>,
}

impl Tool {
    pub fn new(name: &str, binary: &str, base_args: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            binary: binary.to_string(),
            base_args: base_args.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Builds the full in-container invocation.
    pub fn command(&self, extra_args: &[String]) -> Vec<String> {
        let mut cmd = vec![self.binary.clone()];
        cmd.extend(self.base_args.iter().cloned());
        cmd.extend(extra_args.iter().cloned());
        cmd
    }
}

/// Lookup table of supported tools.
#[derive(Debug, Clone, Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Tool>,
}

impl ToolRegistry {
    /// The registry with the built-in tools.
    pub fn builtin() -> Self {
        let mut registry = Self::default();
        registry.register(Tool::new(
            "claude",
            "claude",
            &["-p", "--dangerously-skip-permissions"],
        ));
        registry
    }

    pub fn register(&mut self, tool: Tool) {
        self.tools.insert(tool.name.clone(), tool);
    }

    pub fn get(&self, name: &str) -> Result<&Tool> {
        self.tools.get(name).ok_or_else(|| {
            anyhow::anyhow!(
                "Unknown tool: '{name}'. Supported: {}",
                self.supported().join(", ")
            )
        })
    }

    /// Sorted list of registered tool names.
    pub fn supported(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }
}
