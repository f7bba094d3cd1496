//! Linux bridges via `brctl`.

use crate::error::{NetError, Result};
use serde::Serialize;
use std::path::PathBuf;
use tokio::process::Command;
use xenprobe_common::run_tool;

/// Attempts made by [`Brctl::create_numbered`] before giving up.
const CREATE_ATTEMPTS: usize = 5;

/// One row group of `brctl show`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Bridge {
    pub name: String,
    pub id: String,
    /// Spanning tree protocol enabled
    pub stp: bool,
    /// Attached interfaces in table order
    pub interfaces: Vec<String>,
}

/// Parse the output of `brctl show`.
///
/// The header line is discarded. A line starting with whitespace continues
/// the previous declaration with one more interface. Blank lines are
/// rejected wherever they appear.
///
/// Bridge names must be unique within the table, and so must the interfaces
/// of one bridge. A repeated name fails the parse with its line number.
pub fn parse_bridge_table(text: &str) -> Result<Vec<Bridge>> {
    let mut bridges: Vec<Bridge> = Vec::new();

    for (idx, line) in text.lines().enumerate().skip(1) {
        let number = idx + 1;

        if line.trim().is_empty() {
            return Err(NetError::parse(number, line, "unexpected empty line"));
        }

        if line.starts_with(char::is_whitespace) {
            let bridge = bridges.last_mut().ok_or_else(|| {
                NetError::parse(number, line, "no bridge declaration before interface spec")
            })?;
            push_interface(bridge, line.trim(), number, line)?;
            continue;
        }

        let fields: Vec<&str> = line.split_whitespace().collect();
        let (name, id, stp, first) = match fields.as_slice() {
            &[name, id, stp] => (name, id, stp, None),
            &[name, id, stp, iface] => (name, id, stp, Some(iface)),
            _ => {
                return Err(NetError::parse(
                    number,
                    line,
                    "not a valid brctl bridge declaration",
                ))
            }
        };

        if bridges.iter().any(|b| b.name == name) {
            return Err(NetError::parse(number, line, "duplicate bridge name"));
        }

        let mut bridge = Bridge {
            name: name.to_string(),
            id: id.to_string(),
            stp: stp == "yes",
            interfaces: Vec::new(),
        };
        if let Some(iface) = first {
            push_interface(&mut bridge, iface, number, line)?;
        }
        bridges.push(bridge);
    }

    Ok(bridges)
}

fn push_interface(bridge: &mut Bridge, iface: &str, number: usize, line: &str) -> Result<()> {
    if bridge.interfaces.iter().any(|i| i == iface) {
        return Err(NetError::parse(number, line, "duplicate interface"));
    }
    bridge.interfaces.push(iface.to_string());
    Ok(())
}

/// Wrapper around the `brctl` tool.
#[derive(Debug, Clone)]
pub struct Brctl {
    program: PathBuf,
}

impl Default for Brctl {
    fn default() -> Self {
        Self::new()
    }
}

impl Brctl {
    pub fn new() -> Self {
        Self::with_program("brctl")
    }

    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn command(&self, args: &[&str]) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(args);
        cmd
    }

    /// List all bridges.
    pub async fn show(&self) -> Result<Vec<Bridge>> {
        let output = run_tool(&mut self.command(&["show"])).await?;
        parse_bridge_table(&output.stdout)
    }

    /// Create a bridge.
    pub async fn add(&self, name: &str) -> Result<()> {
        tracing::info!(bridge = %name, "Creating bridge");
        run_tool(&mut self.command(&["addbr", name])).await?;
        Ok(())
    }

    /// Delete a bridge. The bridge must be down.
    pub async fn delete(&self, name: &str) -> Result<()> {
        tracing::info!(bridge = %name, "Deleting bridge");
        run_tool(&mut self.command(&["delbr", name])).await?;
        Ok(())
    }

    /// Create a bridge named `<prefix><n>` with the lowest free `n`.
    ///
    /// Another process may grab the same name between listing and creating,
    /// so the whole step is retried a few times.
    pub async fn create_numbered(&self, prefix: &str) -> Result<String> {
        let mut last_err = None;

        for attempt in 1..=CREATE_ATTEMPTS {
            let bridges = self.show().await?;
            let name = lowest_free_name(prefix, &bridges);

            match self.add(&name).await {
                Ok(()) => return Ok(name),
                Err(e) => {
                    tracing::warn!(bridge = %name, attempt, error = %e, "Bridge creation failed");
                    last_err = Some(e);
                }
            }
        }

        Err(last_err.unwrap_or_else(|| {
            NetError::Config(format!("could not create a bridge with prefix {prefix}"))
        }))
    }
}

fn lowest_free_name(prefix: &str, bridges: &[Bridge]) -> String {
    (0u32..)
        .map(|n| format!("{prefix}{n}"))
        .find(|candidate| bridges.iter().all(|b| &b.name != candidate))
        .unwrap_or_else(|| prefix.to_string())
}
