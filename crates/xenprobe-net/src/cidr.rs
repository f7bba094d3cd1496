//! Address planning for the network tests.

use crate::error::{NetError, Result};
use ipnetwork::Ipv4Network;
use std::net::Ipv4Addr;

/// Addressing for a host bridge and one guest on a small test network.
///
/// The host takes the first address after the network address and the
/// guest the second, so the network needs room for at least two hosts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TestNetwork {
    /// The network with host bits cleared
    pub network: Ipv4Network,
    /// Address assigned to the host bridge
    pub host: Ipv4Addr,
    /// Address the unikernel configures
    pub guest: Ipv4Addr,
}

impl TestNetwork {
    /// Network used when no override is configured.
    pub const DEFAULT_CIDR: &'static str = "10.123.123.0/30";

    /// Plan addresses inside `cidr`.
    ///
    /// Host bits in the given address are ignored: `172.16.5.77/24` plans
    /// `172.16.5.1` and `172.16.5.2`.
    ///
    /// # Errors
    /// Fails if the CIDR does not parse or its prefix is longer than /30.
    pub fn from_cidr(cidr: &str) -> Result<Self> {
        let given: Ipv4Network = cidr.parse()?;
        if given.prefix() > 30 {
            return Err(NetError::Config(format!(
                "invalid mask size: {} (the network needs room for 2 hosts, use /30 or shorter)",
                given.prefix()
            )));
        }
        let network = Ipv4Network::new(given.network(), given.prefix())?;

        let host = network
            .nth(1)
            .ok_or_else(|| NetError::Config(format!("no host address in {network}")))?;
        let guest = network
            .nth(2)
            .ok_or_else(|| NetError::Config(format!("no guest address in {network}")))?;
        Ok(Self {
            network,
            host,
            guest,
        })
    }

    pub fn netmask(&self) -> Ipv4Addr {
        self.network.mask()
    }
}
