//! Tests that put the unikernel on a host bridge.

use super::TestEnv;
use crate::coordinator::{Readiness, RunCoordinator, RunOutcome};
use crate::error::{CoreError, Result};
use crate::sink::OutputSink;
use crate::stage::{CleanStatus, Test};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use xenprobe_net::{EchoProbe, ProbeReply, TestNetwork};
use xenprobe_xen::{BootSpec, Domain, OnCrash};

const CATEGORY: &str = "network";

const PING_TIMEOUT: Duration = Duration::from_secs(10);
const PING_ADDRESS_WINDOW: Duration = Duration::from_secs(5);
const EXPECTED_REPLIES: usize = 10;
const MIN_GUEST_REPLIES: u32 = 4;

static NETWORK_READY: Lazy<Regex> =
    Lazy::new(|| Regex::new("network.*ready").expect("valid readiness regex"));

static GUEST_REPLY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"got.*reply\D*(\d+)").expect("valid reply regex"));

const NETWORK_INFO: &str = "ENVIRONMENT:
    XENPROBE_PING_NETWORK
        The network in CIDR style to use (default: 10.123.123.0/30).
        The network must have room for at least 2 hosts (<=/30).
";

/// Ping the unikernel from the host over a fresh bridge.
///
/// The host end of the bridge gets the first address of the test network,
/// the unikernel the second one, baked in at build time.
pub struct PingTest {
    env: TestEnv,
    package: String,

    network: Option<TestNetwork>,
    unikernel: Option<PathBuf>,
    bridge: Option<String>,
    domain: Option<Domain>,
    replies: Vec<ProbeReply>,
}

impl PingTest {
    pub fn new(env: TestEnv) -> Self {
        let package = env.package(&["network", "ping"]);
        Self {
            env,
            package,
            network: None,
            unikernel: None,
            bridge: None,
            domain: None,
            replies: Vec::new(),
        }
    }

    /// Replies collected by the last run, in sequence order.
    pub fn replies(&self) -> &[ProbeReply] {
        &self.replies
    }

    /// Resolve the test network from the environment.
    fn plan_network(&mut self, out: &OutputSink) -> Result<TestNetwork> {
        let cidr = match &self.env.network.cidr {
            Some(cidr) => {
                out.progress(format!("using network from XENPROBE_PING_NETWORK: {cidr}"));
                cidr.as_str()
            }
            None => {
                out.warning(format!(
                    "using default network (collisions may fail the test): {}",
                    TestNetwork::DEFAULT_CIDR
                ));
                TestNetwork::DEFAULT_CIDR
            }
        };

        let network = TestNetwork::from_cidr(cidr)?;
        tracing::debug!(network = %network.network, host = %network.host, guest = %network.guest, "Planned test network");
        self.network = Some(network);
        Ok(network)
    }

    fn planned_network(&self) -> Result<TestNetwork> {
        self.network
            .ok_or_else(|| CoreError::Config("test network was not planned".into()))
    }

    async fn build_image(
        &mut self,
        out: &OutputSink,
        name: &str,
        package: &str,
        ldflags: String,
    ) -> Result<()> {
        let extra = ["--ldflags".to_string(), ldflags];
        let image = self.env.builder.build(name, package, &extra, out).await?;
        self.unikernel = Some(image);
        Ok(())
    }

    /// Create a bridge, address its host end and create the domain paused
    /// with a VIF on the bridge.
    async fn setup_for(&mut self, out: &OutputSink, name: &str) -> Result<()> {
        let network = self.planned_network()?;
        let image = self
            .unikernel
            .clone()
            .ok_or_else(|| CoreError::Config(format!("{name}: no unikernel was built")))?;
        let net = &self.env.network;

        out.progress("creating a bridge");
        let bridge = net.brctl.create_numbered(&net.bridge_prefix).await?;
        out.progress(format!("using bridge {bridge}"));
        self.bridge = Some(bridge.clone());

        out.progress(format!(
            "using ip address {} netmask {}",
            network.host,
            network.netmask()
        ));
        net.ifconfig
            .set_address(&bridge, network.host, network.netmask())
            .await?;

        let spec = BootSpec::new(image, name)
            .memory_mib(256)
            .on_crash(OnCrash::Preserve)
            .bridge(&bridge);
        out.progress("creating paused kernel");
        let domain = self.env.controller.create_paused(&spec).await?;
        out.progress(format!("domain created: {} ({})", domain.name, domain.id));
        self.domain = Some(domain);
        Ok(())
    }

    fn domain(&self) -> Result<Domain> {
        self.domain
            .clone()
            .ok_or_else(|| CoreError::Lifecycle("no domain was created".into()))
    }

    /// Release image, domain and bridge. Every resource is attempted; the
    /// first error is returned.
    async fn clean_resources(&mut self, out: &OutputSink) -> Result<()> {
        let mut first: Option<CoreError> = None;

        if let Some(image) = self.unikernel.take() {
            out.progress(format!("removing {}", image.display()));
            if let Err(e) = std::fs::remove_file(&image) {
                tracing::warn!(image = %image.display(), error = %e, "Failed to remove unikernel");
            }
        }

        if let Some(domain) = self.domain.take() {
            out.progress(format!("destroying domain {}", domain.id));
            if let Err(e) = self.env.controller.destroy(&domain).await {
                tracing::warn!(domain_id = domain.id, error = %e, "Failed to destroy domain");
                first.get_or_insert(e.into());
            }
        }

        if let Some(bridge) = self.bridge.take() {
            out.progress(format!("removing bridge {bridge}"));
            let removed = match self.env.network.ip.link_down(&bridge).await {
                Ok(()) => self.env.network.brctl.delete(&bridge).await,
                Err(e) => Err(e),
            };
            if let Err(e) = removed {
                tracing::warn!(bridge = %bridge, error = %e, "Failed to remove bridge");
                first.get_or_insert(e.into());
            }
        }

        match first {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn holds(&self) -> bool {
        self.unikernel.is_some() || self.bridge.is_some() || self.domain.is_some()
    }
}

#[async_trait]
impl Test for PingTest {
    fn name(&self) -> &str {
        "ping"
    }

    fn category(&self) -> &str {
        CATEGORY
    }

    fn info(&self) -> &str {
        NETWORK_INFO
    }

    async fn build(&mut self, out: &OutputSink) -> Result<()> {
        let network = self.plan_network(out)?;
        let package = self.package.clone();
        let ldflags = format!("-X main.ipAddress={}", network.guest);
        self.build_image(out, "ping", &package, ldflags).await
    }

    async fn setup(&mut self, out: &OutputSink) -> Result<()> {
        self.setup_for(out, "ping").await
    }

    async fn run(&mut self, out: &OutputSink) -> Result<()> {
        let network = self.planned_network()?;
        let domain = self.domain()?;

        out.progress("attaching to the console");
        let console = self.env.controller.console(&domain)?;
        let probe = EchoProbe::new(network.guest.to_string())
            .program(self.env.network.ping.clone())
            .count(EXPECTED_REPLIES as u32);

        let report = RunCoordinator::new(Arc::clone(&self.env.controller), domain)
            .timeout(PING_TIMEOUT)
            .readiness(Readiness::echo(NETWORK_READY.clone(), &probe))
            .run(console, out)
            .await?;

        match report.outcome {
            RunOutcome::ConsoleExited => {
                Err(CoreError::Lifecycle("console unexpectedly exited".into()))
            }
            RunOutcome::TimedOut => Err(CoreError::Timeout(PING_TIMEOUT)),
            RunOutcome::PollFailed(e) => Err(e),
            RunOutcome::DomainExited(state) => {
                tracing::info!(state = %state, "Domain exited before the probe finished");
                Ok(())
            }
            RunOutcome::Probed(replies) => {
                self.replies = replies?;
                Ok(())
            }
        }
    }

    async fn check(&mut self, _out: &OutputSink) -> Result<()> {
        check_ping_replies(&self.replies)
    }

    async fn clean(&mut self, out: &OutputSink, _status: CleanStatus) -> Result<()> {
        self.clean_resources(out).await
    }

    fn holds_resources(&self) -> bool {
        self.holds()
    }
}

/// The unikernel pings the host end of the bridge and logs every reply.
///
/// Shares network planning, setup and cleanup with [`PingTest`].
pub struct PingAddressTest {
    base: PingTest,
    package: String,
    window: Duration,
    output: String,
}

impl PingAddressTest {
    pub fn new(env: TestEnv) -> Self {
        let package = env.package(&["network", "ping_address"]);
        Self {
            base: PingTest::new(env),
            package,
            window: PING_ADDRESS_WINDOW,
            output: String::new(),
        }
    }

    /// How long the console is captured.
    pub fn window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }
}

#[async_trait]
impl Test for PingAddressTest {
    fn name(&self) -> &str {
        "ping_address"
    }

    fn category(&self) -> &str {
        self.base.category()
    }

    fn info(&self) -> &str {
        self.base.info()
    }

    async fn build(&mut self, out: &OutputSink) -> Result<()> {
        let network = self.base.plan_network(out)?;
        let ldflags = format!(
            "-X main.ipAddress={} -X main.ipNetmask={} -X main.ipDestination={}",
            network.guest,
            network.netmask(),
            network.host
        );
        self.base
            .build_image(out, "ping_address", &self.package, ldflags)
            .await
    }

    async fn setup(&mut self, out: &OutputSink) -> Result<()> {
        self.base.setup_for(out, "ping_address").await
    }

    async fn run(&mut self, out: &OutputSink) -> Result<()> {
        let domain = self.base.domain()?;

        out.progress("attaching to the console");
        let console = self.base.env.controller.console(&domain)?;
        let report = RunCoordinator::new(Arc::clone(&self.base.env.controller), domain)
            .without_state_poll()
            .timeout(self.window)
            .run(console, out)
            .await?;

        self.output = report.transcript;
        match report.outcome {
            RunOutcome::ConsoleExited => {
                Err(CoreError::Lifecycle("console exited unexpectedly".into()))
            }
            _ => Ok(()),
        }
    }

    async fn check(&mut self, _out: &OutputSink) -> Result<()> {
        check_reply_sequence(&self.output)
    }

    async fn clean(&mut self, out: &OutputSink, status: CleanStatus) -> Result<()> {
        self.base.clean(out, status).await
    }

    fn holds_resources(&self) -> bool {
        self.base.holds_resources()
    }
}

// ============================================================================
// Checks
// ============================================================================

/// At least 10 replies and none of them an error.
pub fn check_ping_replies(replies: &[ProbeReply]) -> Result<()> {
    if replies.len() < EXPECTED_REPLIES {
        return Err(CoreError::Assertion(format!(
            "expected {EXPECTED_REPLIES} responses, got {}",
            replies.len()
        )));
    }

    if let Some(reply) = replies.iter().find(|r| !r.is_success()) {
        return Err(CoreError::Assertion(format!(
            "ping error for echo request {}: {}",
            reply.seq,
            reply.error.as_deref().unwrap_or("no reply")
        )));
    }
    Ok(())
}

/// Replies logged by the unikernel are numbered 1, 2, 3, ... and there are
/// at least 4 of them.
pub fn check_reply_sequence(output: &str) -> Result<()> {
    let mut expected = 1u32;
    for line in output.lines() {
        let Some(caps) = GUEST_REPLY.captures(line) else {
            continue;
        };
        let seq: u32 = caps[1]
            .parse()
            .map_err(|e| CoreError::Assertion(format!("invalid sequence '{}': {e}", &caps[1])))?;
        if seq != expected {
            return Err(CoreError::Assertion(format!(
                "expected sequence {expected}, got {seq}"
            )));
        }
        expected += 1;
    }

    let matches = expected - 1;
    if matches < MIN_GUEST_REPLIES {
        return Err(CoreError::Assertion(format!(
            "expected at least {MIN_GUEST_REPLIES} matches, got {matches}"
        )));
    }
    Ok(())
}
