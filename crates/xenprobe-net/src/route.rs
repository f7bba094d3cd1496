//! IPv4 routing table via `route -n -4`.

use crate::error::{NetError, Result};
use ipnetwork::Ipv4Network;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::net::Ipv4Addr;
use std::path::PathBuf;
use tokio::process::Command;
use xenprobe_common::run_tool;

static ROUTE_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\S+)\s+(\S+)\s+(\S+)\s+.*?(\S+)$").expect("valid route regex")
});

/// Header lines printed before the table rows.
const HEADER_LINES: usize = 2;

/// One row of the numeric routing table.
///
/// Fields are kept as printed; [`RouteRecord::network`] interprets them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RouteRecord {
    pub destination: String,
    pub gateway: String,
    pub netmask: String,
    /// Outgoing interface
    pub interface: String,
}

impl RouteRecord {
    /// Destination and netmask as a network.
    pub fn network(&self) -> Result<Ipv4Network> {
        let destination: Ipv4Addr = self.destination.parse().map_err(|e| {
            NetError::Config(format!("invalid route destination {}: {e}", self.destination))
        })?;
        let netmask: Ipv4Addr = self.netmask.parse().map_err(|e| {
            NetError::Config(format!("invalid route netmask {}: {e}", self.netmask))
        })?;
        Ok(Ipv4Network::with_netmask(destination, netmask)?)
    }

    /// Parsed gateway, `None` for directly connected networks (`0.0.0.0`).
    pub fn gateway(&self) -> Option<Ipv4Addr> {
        self.gateway
            .parse::<Ipv4Addr>()
            .ok()
            .filter(|gw| !gw.is_unspecified())
    }
}

/// Parse the output of `route -n -4`.
///
/// The first two lines are headers and are skipped without inspection, so
/// input shorter than that yields no routes.
pub fn parse_route_table(text: &str) -> Result<Vec<RouteRecord>> {
    text.lines()
        .enumerate()
        .skip(HEADER_LINES)
        .map(|(idx, line)| {
            let caps = ROUTE_LINE
                .captures(line)
                .ok_or_else(|| NetError::parse(idx + 1, line, "invalid route line"))?;
            Ok(RouteRecord {
                destination: caps[1].to_string(),
                gateway: caps[2].to_string(),
                netmask: caps[3].to_string(),
                interface: caps[4].to_string(),
            })
        })
        .collect()
}

/// Wrapper around the legacy `route` tool.
#[derive(Debug, Clone)]
pub struct RouteTool {
    program: PathBuf,
}

impl Default for RouteTool {
    fn default() -> Self {
        Self::new()
    }
}

impl RouteTool {
    pub fn new() -> Self {
        Self::with_program("route")
    }

    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Dump the IPv4 routing table.
    pub async fn ipv4_routes(&self) -> Result<Vec<RouteRecord>> {
        let mut cmd = Command::new(&self.program);
        cmd.args(["-n", "-4"]);
        let output = run_tool(&mut cmd).await?;
        parse_route_table(&output.stdout)
    }
}
