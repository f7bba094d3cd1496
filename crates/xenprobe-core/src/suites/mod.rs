//! Concrete unikernel tests.
//!
//! - [`ConsoleTest`]: boot, watch the console and the domain state, check
//!   the output. The `hello_world`, `sleep_and_time` and `read_from_console`
//!   tests are instances of it.
//! - [`PingTest`]: put the unikernel on a host bridge and ping it once its
//!   network is up.
//! - [`PingAddressTest`]: the unikernel pings the host instead; wraps a
//!   [`PingTest`] for everything but build, run and check.
//!
//! Every test gets its collaborators from a [`TestEnv`].

mod console;
mod network;

pub use console::{
    check_hello_world, check_read_from_console, check_sleep_and_time, ConsoleTest, OutputCheck,
};
pub use network::{check_ping_replies, check_reply_sequence, PingAddressTest, PingTest};

use crate::builder::Builder;
use std::path::PathBuf;
use std::sync::Arc;
use xenprobe_net::{Brctl, Ifconfig, IpTool};
use xenprobe_xen::DomainController;

/// Package root used when none is configured.
pub const DEFAULT_PACKAGE_ROOT: &str = "github.com/unigornel/unigornel/integration_tests/tests";

/// Bridge name prefix used when none is configured.
pub const DEFAULT_BRIDGE_PREFIX: &str = "xenprobe";

/// Collaborators shared by every test of a batch.
#[derive(Clone)]
pub struct TestEnv {
    pub controller: Arc<dyn DomainController>,
    pub builder: Arc<dyn Builder>,
    /// Package path the test packages live under
    pub package_root: String,
    pub network: NetworkEnv,
}

impl TestEnv {
    /// Environment with default network tooling.
    pub fn new(controller: Arc<dyn DomainController>, builder: Arc<dyn Builder>) -> Self {
        Self {
            controller,
            builder,
            package_root: DEFAULT_PACKAGE_ROOT.to_string(),
            network: NetworkEnv::default(),
        }
    }

    pub fn package_root(mut self, root: impl Into<String>) -> Self {
        self.package_root = root.into();
        self
    }

    pub fn network(mut self, network: NetworkEnv) -> Self {
        self.network = network;
        self
    }

    /// Package reference below the package root.
    pub fn package(&self, parts: &[&str]) -> String {
        let mut package = self.package_root.trim_end_matches('/').to_string();
        for part in parts {
            package.push('/');
            package.push_str(part);
        }
        package
    }
}

/// Host-side network configuration for the network tests.
#[derive(Debug, Clone)]
pub struct NetworkEnv {
    /// Test network in CIDR notation; `None` uses the default network
    pub cidr: Option<String>,
    pub bridge_prefix: String,
    pub brctl: Brctl,
    pub ip: IpTool,
    pub ifconfig: Ifconfig,
    /// Echo probe program
    pub ping: PathBuf,
}

impl Default for NetworkEnv {
    fn default() -> Self {
        Self {
            cidr: None,
            bridge_prefix: DEFAULT_BRIDGE_PREFIX.to_string(),
            brctl: Brctl::new(),
            ip: IpTool::new(),
            ifconfig: Ifconfig::new(),
            ping: PathBuf::from("ping"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::CommandBuilder;
    use xenprobe_xen::Xl;

    #[test]
    fn test_package_joins_below_root() {
        let env = TestEnv::new(Arc::new(Xl::new()), Arc::new(CommandBuilder::new()))
            .package_root("example.com/tests/");
        assert_eq!(
            env.package(&["helloworld", "simple"]),
            "example.com/tests/helloworld/simple"
        );
        assert_eq!(env.package(&[]), "example.com/tests");
    }

    #[test]
    fn test_default_network_env() {
        let network = NetworkEnv::default();
        assert!(network.cidr.is_none());
        assert_eq!(network.bridge_prefix, "xenprobe");
        assert_eq!(network.ping, PathBuf::from("ping"));
    }
}
