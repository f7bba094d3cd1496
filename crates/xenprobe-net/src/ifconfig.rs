//! Legacy address assignment via `ifconfig`.

use crate::error::Result;
use std::net::Ipv4Addr;
use std::path::PathBuf;
use tokio::process::Command;
use xenprobe_common::run_tool;

/// Wrapper around the `ifconfig` tool.
#[derive(Debug, Clone)]
pub struct Ifconfig {
    program: PathBuf,
}

impl Default for Ifconfig {
    fn default() -> Self {
        Self::new()
    }
}

impl Ifconfig {
    pub fn new() -> Self {
        Self::with_program("ifconfig")
    }

    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn set_address_command(&self, iface: &str, ip: Ipv4Addr, netmask: Ipv4Addr) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.arg(iface)
            .arg(ip.to_string())
            .arg("netmask")
            .arg(netmask.to_string());
        cmd
    }

    /// Assign `ip`/`netmask` to `iface`. This also brings the interface up.
    pub async fn set_address(&self, iface: &str, ip: Ipv4Addr, netmask: Ipv4Addr) -> Result<()> {
        tracing::info!(iface = %iface, %ip, %netmask, "Assigning address");
        run_tool(&mut self.set_address_command(iface, ip, netmask)).await?;
        Ok(())
    }
}
