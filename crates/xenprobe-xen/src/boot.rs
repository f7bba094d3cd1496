//! Boot specification and the xl domain configuration it renders to.

use crate::error::{Result, XenError};
use std::fmt::Write as _;
use std::path::PathBuf;

/// What the hypervisor does with a domain that crashed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OnCrash {
    /// Keep the crashed domain around so its state can be inspected
    #[default]
    Preserve,
    /// Destroy the domain
    Destroy,
    /// Restart the domain
    Restart,
}

impl OnCrash {
    /// Value used in the xl configuration file.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Preserve => "preserve",
            Self::Destroy => "destroy",
            Self::Restart => "restart",
        }
    }
}

/// Everything needed to boot one unikernel as a domain.
///
/// A boot spec is consumed once by
/// [`DomainController::create_paused`](crate::DomainController::create_paused).
///
/// # Example
///
/// ```
/// use xenprobe_xen::{BootSpec, OnCrash};
///
/// let spec = BootSpec::new("/tmp/ping.xen", "ping")
///     .memory_mib(256)
///     .on_crash(OnCrash::Preserve)
///     .bridge("xenprobe0");
/// assert!(spec.render_config().contains("vif = ['bridge=xenprobe0']"));
/// ```
#[derive(Debug, Clone)]
pub struct BootSpec {
    /// Path to the unikernel binary
    pub binary: PathBuf,
    /// Memory size in MiB
    pub memory_mib: u32,
    /// Domain name
    pub name: String,
    /// Crash policy
    pub on_crash: OnCrash,
    /// Raw virtual interface list, e.g. `['bridge=xenbr0']`
    pub vif: Option<String>,
}

impl Default for BootSpec {
    fn default() -> Self {
        Self {
            binary: PathBuf::new(),
            memory_mib: 256,
            name: "unikernel".into(),
            on_crash: OnCrash::Preserve,
            vif: None,
        }
    }
}

impl BootSpec {
    /// Create a spec for `binary` named `name` with default resources.
    pub fn new(binary: impl Into<PathBuf>, name: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            name: name.into(),
            ..Default::default()
        }
    }

    /// Set the memory size in MiB.
    pub fn memory_mib(mut self, mib: u32) -> Self {
        self.memory_mib = mib;
        self
    }

    /// Set the crash policy.
    pub fn on_crash(mut self, policy: OnCrash) -> Self {
        self.on_crash = policy;
        self
    }

    /// Attach one network interface to the given host bridge.
    pub fn bridge(mut self, bridge: &str) -> Self {
        self.vif = Some(format!("['bridge={bridge}']"));
        self
    }

    /// Set the raw virtual interface descriptor.
    pub fn vif(mut self, vif: impl Into<String>) -> Self {
        self.vif = Some(vif.into());
        self
    }

    /// Validate the spec.
    ///
    /// # Errors
    /// Returns an error if the binary path or name is empty, the name
    /// contains characters that cannot appear in the config file, or the
    /// memory size is zero.
    pub fn validate(&self) -> Result<()> {
        if self.binary.as_os_str().is_empty() {
            return Err(XenError::Config("binary path is required".into()));
        }
        if self.name.is_empty() {
            return Err(XenError::Config("name is required".into()));
        }
        if self.name.contains(['"', '\n']) || self.name.split_whitespace().count() != 1 {
            return Err(XenError::Config(format!(
                "name must be a single word without quotes, got '{}'",
                self.name
            )));
        }
        if self.memory_mib == 0 {
            return Err(XenError::Config("memory_mib must be > 0".into()));
        }
        Ok(())
    }

    /// Render the xl domain configuration.
    pub fn render_config(&self) -> String {
        let mut out = String::new();
        // Writing into a String cannot fail
        let _ = writeln!(out, "kernel = \"{}\"", self.binary.display());
        let _ = writeln!(out, "memory = {}", self.memory_mib);
        let _ = writeln!(out, "name = \"{}\"", self.name);
        let _ = writeln!(out, "on_crash = \"{}\"", self.on_crash.as_str());
        if let Some(vif) = &self.vif {
            let _ = writeln!(out, "vif = {vif}");
        }
        out
    }
}
