//! Domain lifecycle control.

use crate::boot::BootSpec;
use crate::console::Console;
use crate::domain::{parse_listing, Domain};
use crate::error::{Result, XenError};
use async_trait::async_trait;
use std::io::Write;
use std::path::PathBuf;
use tokio::process::Command;
use xenprobe_common::run_tool;

/// Lifecycle operations on hypervisor domains.
///
/// Implemented by [`Xl`] for real hosts. Everything above this trait only
/// sees domain snapshots and console handles.
#[async_trait]
pub trait DomainController: Send + Sync {
    /// Create a domain from `spec` without starting its vCPUs.
    ///
    /// The domain name is made unique before creation, so the returned
    /// domain's name differs from `spec.name`.
    ///
    /// # Errors
    /// Fails if the create command fails or if no domain with the generated
    /// name exists afterwards.
    async fn create_paused(&self, spec: &BootSpec) -> Result<Domain>;

    /// Start a paused domain.
    async fn unpause(&self, domain: &Domain) -> Result<()>;

    /// Destroy a domain. The toolstack's exit code decides whether
    /// destroying an already gone domain is an error.
    async fn destroy(&self, domain: &Domain) -> Result<()>;

    /// Attach to the domain's console.
    fn console(&self, domain: &Domain) -> Result<Console>;

    /// List all domains.
    async fn list(&self) -> Result<Vec<Domain>>;

    /// Refresh a snapshot by id. `None` means the domain no longer exists.
    async fn update(&self, domain: &Domain) -> Result<Option<Domain>> {
        Ok(self.list().await?.into_iter().find(|d| d.id == domain.id))
    }

    /// Look a domain up by name.
    async fn find_by_name(&self, name: &str) -> Result<Option<Domain>> {
        Ok(self.list().await?.into_iter().find(|d| d.name == name))
    }
}

/// [`DomainController`] backed by the `xl` command line tool.
#[derive(Debug, Clone)]
pub struct Xl {
    program: PathBuf,
    prefix_args: Vec<String>,
}

impl Default for Xl {
    fn default() -> Self {
        Self::new()
    }
}

impl Xl {
    /// Use `xl` from `PATH`.
    pub fn new() -> Self {
        Self::with_program("xl")
    }

    /// Use a specific xl binary.
    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            prefix_args: Vec::new(),
        }
    }

    /// Arguments placed before every subcommand.
    ///
    /// Useful for wrappers, e.g. program `sudo` with prefix `["xl"]`.
    pub fn prefix_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.prefix_args = args.into_iter().map(Into::into).collect();
        self
    }

    fn command<I, S>(&self, args: I) -> Command
    where
        I: IntoIterator<Item = S>,
        S: AsRef<std::ffi::OsStr>,
    {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.prefix_args).args(args);
        cmd
    }
}

#[async_trait]
impl DomainController for Xl {
    async fn create_paused(&self, spec: &BootSpec) -> Result<Domain> {
        spec.validate()?;

        let mut file = tempfile::Builder::new()
            .prefix(&format!("kernel-{}-", spec.name))
            .tempfile()?;
        let name = file
            .path()
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| XenError::Config("temporary config file has no name".into()))?;

        let mut unique = spec.clone();
        unique.name = name;
        file.write_all(unique.render_config().as_bytes())?;
        file.flush()?;

        tracing::info!(
            name = %unique.name,
            binary = %unique.binary.display(),
            memory_mib = unique.memory_mib,
            "Creating paused domain"
        );
        let path = file.path().to_path_buf();
        let mut cmd = self.command([
            std::ffi::OsStr::new("create"),
            std::ffi::OsStr::new("-f"),
            path.as_os_str(),
            std::ffi::OsStr::new("-p"),
        ]);
        let output = run_tool(&mut cmd).await?;
        tracing::debug!(output = %output.combined().trim(), "xl create finished");

        // The config file is only needed by the create command.
        drop(file);

        let domain = self.find_by_name(&unique.name).await?.ok_or_else(|| {
            XenError::Lifecycle(format!(
                "could not create the paused kernel: no domain named {}",
                unique.name
            ))
        })?;
        tracing::info!(id = domain.id, name = %domain.name, state = %domain.state, "Domain created");
        Ok(domain)
    }

    async fn unpause(&self, domain: &Domain) -> Result<()> {
        tracing::info!(id = domain.id, "Unpausing domain");
        run_tool(&mut self.command(["unpause", domain.id.to_string().as_str()])).await?;
        Ok(())
    }

    async fn destroy(&self, domain: &Domain) -> Result<()> {
        tracing::info!(id = domain.id, name = %domain.name, "Destroying domain");
        run_tool(&mut self.command(["destroy", domain.id.to_string().as_str()])).await?;
        Ok(())
    }

    fn console(&self, domain: &Domain) -> Result<Console> {
        Console::spawn(domain.id, self.command(["console", domain.id.to_string().as_str()]))
    }

    async fn list(&self) -> Result<Vec<Domain>> {
        let output = run_tool(&mut self.command(["list"])).await?;
        parse_listing(&output.stdout)
    }
}
