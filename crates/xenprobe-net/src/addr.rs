//! Interface addresses and link state via `ip`.

use crate::error::{NetError, Result};
use ipnetwork::Ipv4Network;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::net::Ipv4Addr;
use std::path::PathBuf;
use tokio::process::Command;
use xenprobe_common::run_tool;

static DECLARATION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d+: (\S+):").expect("valid declaration regex"));
static INET_PREFIX: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s+inet ").expect("valid regex"));
static INET: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s+inet (\S+) (?:brd \S+ )?scope (\S+) (?:.*\s)?(\S+)\s*$")
        .expect("valid inet regex")
});

/// One `inet` line of `ip addr show`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AddressRecord {
    /// Interface label printed at the end of the line
    pub interface: String,
    pub ip: Ipv4Addr,
    /// Network the address belongs to, host bits cleared
    pub network: Ipv4Network,
    /// Scope keyword (`host`, `link`, `global`)
    pub scope: String,
}

/// An interface declaration and the IPv4 addresses listed under it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InterfaceAddresses {
    pub name: String,
    pub addresses: Vec<AddressRecord>,
}

/// Parse the output of `ip addr show`.
///
/// Lines starting with a non-whitespace character declare an interface.
/// Indented `inet` lines add an address to the current interface; every
/// other indented line (`link/…`, `inet6`, lifetimes) is ignored.
pub fn parse_addr_show(text: &str) -> Result<Vec<InterfaceAddresses>> {
    let mut interfaces: Vec<InterfaceAddresses> = Vec::new();

    for (idx, line) in text.lines().enumerate() {
        let number = idx + 1;

        if INET_PREFIX.is_match(line) {
            let current = interfaces.last_mut().ok_or_else(|| {
                NetError::parse(number, line, "no device declaration before inet")
            })?;
            let record =
                parse_inet_line(line).map_err(|reason| NetError::parse(number, line, reason))?;
            current.addresses.push(record);
        } else if line.starts_with(|c: char| !c.is_whitespace()) {
            let caps = DECLARATION
                .captures(line)
                .ok_or_else(|| NetError::parse(number, line, "invalid device declaration"))?;
            interfaces.push(InterfaceAddresses {
                name: caps[1].to_string(),
                addresses: Vec::new(),
            });
        }
    }

    Ok(interfaces)
}

fn parse_inet_line(line: &str) -> std::result::Result<AddressRecord, String> {
    let caps = INET
        .captures(line)
        .ok_or_else(|| "invalid inet line".to_string())?;
    let cidr: Ipv4Network = caps[1]
        .parse()
        .map_err(|e| format!("invalid cidr: {e}"))?;

    let network = Ipv4Network::new(cidr.network(), cidr.prefix())
        .map_err(|e| format!("invalid cidr: {e}"))?;

    Ok(AddressRecord {
        interface: caps[3].to_string(),
        ip: cidr.ip(),
        network,
        scope: caps[2].to_string(),
    })
}

/// Wrapper around the `ip` tool.
#[derive(Debug, Clone)]
pub struct IpTool {
    program: PathBuf,
}

impl Default for IpTool {
    fn default() -> Self {
        Self::new()
    }
}

impl IpTool {
    pub fn new() -> Self {
        Self::with_program("ip")
    }

    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Bring an interface down.
    pub async fn link_down(&self, iface: &str) -> Result<()> {
        tracing::debug!(iface = %iface, "Setting link down");
        let mut cmd = Command::new(&self.program);
        cmd.args(["link", "set", "dev", iface, "down"]);
        run_tool(&mut cmd).await?;
        Ok(())
    }

    /// List interfaces and their IPv4 addresses.
    pub async fn addr_show(&self) -> Result<Vec<InterfaceAddresses>> {
        let mut cmd = Command::new(&self.program);
        cmd.args(["addr", "show"]);
        let output = run_tool(&mut cmd).await?;
        parse_addr_show(&output.stdout)
    }
}
