//! Driver configuration.
//!
//! Configuration is loaded from environment variables with sensible defaults.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use xenprobe_core::{
    CommandBuilder, NetworkEnv, TestEnv, DEFAULT_BRIDGE_PREFIX, DEFAULT_PACKAGE_ROOT,
};
use xenprobe_net::TestNetwork;
use xenprobe_xen::Xl;

/// Linux limits interface names to 15 bytes; leave room for the bridge number.
const MAX_BRIDGE_PREFIX_LEN: usize = 12;

/// Configuration for a test batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverConfig {
    /// Hypervisor toolstack binary.
    pub xl: PathBuf,

    /// Unikernel toolchain binary.
    pub builder: PathBuf,

    /// Package path the test packages live under.
    pub package_root: String,

    /// Network for the ping tests; `None` means the default network.
    pub ping_network: Option<String>,

    /// Prefix for the bridges the network tests create.
    pub bridge_prefix: String,
}

/// Configuration validation error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid XENPROBE_PING_NETWORK '{cidr}': {reason}")]
    InvalidNetwork { cidr: String, reason: String },

    #[error("bridge prefix must not be empty")]
    EmptyBridgePrefix,

    #[error("bridge prefix '{0}' is longer than {max} characters", max = MAX_BRIDGE_PREFIX_LEN)]
    BridgePrefixTooLong(String),

    #[error("package root must not be empty")]
    EmptyPackageRoot,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            xl: PathBuf::from("xl"),
            builder: PathBuf::from("unigornel"),
            package_root: DEFAULT_PACKAGE_ROOT.to_string(),
            ping_network: None,
            bridge_prefix: DEFAULT_BRIDGE_PREFIX.to_string(),
        }
    }
}

impl DriverConfig {
    /// Load configuration from environment variables.
    ///
    /// | Variable | Default |
    /// |----------|---------|
    /// | `XENPROBE_XL` | `xl` |
    /// | `XENPROBE_BUILDER` | `unigornel` |
    /// | `XENPROBE_PACKAGE_ROOT` | `github.com/unigornel/unigornel/integration_tests/tests` |
    /// | `XENPROBE_PING_NETWORK` | `10.123.123.0/30` |
    /// | `XENPROBE_BRIDGE_PREFIX` | `xenprobe` |
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through `lookup`. Empty values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let default = Self::default();
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        Self {
            xl: var("XENPROBE_XL").map(PathBuf::from).unwrap_or(default.xl),
            builder: var("XENPROBE_BUILDER")
                .map(PathBuf::from)
                .unwrap_or(default.builder),
            package_root: var("XENPROBE_PACKAGE_ROOT").unwrap_or(default.package_root),
            ping_network: var("XENPROBE_PING_NETWORK"),
            bridge_prefix: var("XENPROBE_BRIDGE_PREFIX").unwrap_or(default.bridge_prefix),
        }
    }

    /// Check values that would only fail deep inside a test.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(cidr) = &self.ping_network {
            TestNetwork::from_cidr(cidr).map_err(|e| ConfigError::InvalidNetwork {
                cidr: cidr.clone(),
                reason: e.to_string(),
            })?;
        }

        if self.bridge_prefix.is_empty() {
            return Err(ConfigError::EmptyBridgePrefix);
        }
        if self.bridge_prefix.len() > MAX_BRIDGE_PREFIX_LEN {
            return Err(ConfigError::BridgePrefixTooLong(self.bridge_prefix.clone()));
        }

        if self.package_root.trim_matches('/').is_empty() {
            return Err(ConfigError::EmptyPackageRoot);
        }

        Ok(())
    }

    /// Validate configuration but only log warnings instead of failing.
    ///
    /// Missing tools are reported here too; each test fails on its own when
    /// it needs one.
    pub fn validate_warn(&self) {
        if let Err(e) = self.validate() {
            tracing::warn!(error = %e, "Invalid configuration");
        }

        for program in [&self.xl, &self.builder] {
            if find_program(program).is_none() {
                tracing::warn!("Program not found: {:?}", program);
            }
        }
    }

    /// Collaborators for the test catalog.
    pub fn test_env(&self) -> TestEnv {
        let network = NetworkEnv {
            cidr: self.ping_network.clone(),
            bridge_prefix: self.bridge_prefix.clone(),
            ..NetworkEnv::default()
        };

        TestEnv::new(
            Arc::new(Xl::with_program(&self.xl)),
            Arc::new(CommandBuilder::with_program(&self.builder)),
        )
        .package_root(self.package_root.clone())
        .network(network)
    }
}

/// Resolve `program` the way `execvp` does: a name containing a slash is
/// taken as a path, a bare name is searched in each `PATH` entry in order.
fn find_program(program: &Path) -> Option<PathBuf> {
    if program.components().count() > 1 {
        return program.exists().then(|| program.to_path_buf());
    }

    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path)
        .map(|dir| dir.join(program))
        .find(|candidate| candidate.is_file())
}
