//! # xenprobe-net
//!
//! Host-side network plumbing for unikernel network tests.
//!
//! Each external tool gets a thin async wrapper and a pure parser for its
//! text output:
//!
//! | Tool | Wrapper | Parser |
//! |------|---------|--------|
//! | `brctl show` | [`Brctl`] | [`parse_bridge_table`] |
//! | `ip addr show` | [`IpTool`] | [`parse_addr_show`] |
//! | `route -n -4` | [`RouteTool`] | [`parse_route_table`] |
//! | `ping` | [`EchoProbe`] | [`parse_probe_output`] |
//! | `ifconfig` | [`Ifconfig`] | |
//!
//! Parsers never return partial results: the first malformed line fails the
//! whole parse with its line number.

mod addr;
mod bridge;
mod cidr;
mod error;
mod ifconfig;
mod probe;
mod route;

pub use addr::{parse_addr_show, AddressRecord, InterfaceAddresses, IpTool};
pub use bridge::{parse_bridge_table, Bridge, Brctl};
pub use cidr::TestNetwork;
pub use ipnetwork::Ipv4Network;
pub use error::{NetError, Result};
pub use ifconfig::Ifconfig;
pub use probe::{parse_probe_line, parse_probe_output, EchoProbe, ProbeReply};
pub use route::{parse_route_table, RouteRecord, RouteTool};
