//! End-to-end tests for the test suites.
//!
//! The scripted tests drive whole tests through [`StageRunner`] with an
//! in-process domain controller, a fake toolchain and shell stand-ins for
//! the network tools. The console is a real child process.
//!
//! The real-Xen test requires a Xen dom0 with `xl` on `PATH` and a built
//! hello world unikernel:
//!
//! Run with: `XENPROBE_KERNEL=/path/to/kernel cargo test -p xenprobe-core -- --ignored`

use async_trait::async_trait;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::process::Command;
use xenprobe_core::{
    Builder, ConsoleTest, CoreError, NetworkEnv, OutputSink, PingAddressTest, PingTest,
    StageRunner, TestEnv,
};
use xenprobe_net::{Brctl, Ifconfig, IpTool};
use xenprobe_xen::{BootSpec, Console, Domain, DomainController, DomainState, XenError};

// ============================================================================
// Fakes
// ============================================================================

/// Domain controller keeping one domain in memory.
struct ScriptedXen {
    /// Shell script run as the console
    console: String,
    /// State the domain enters once unpaused
    after_unpause: DomainState,
    domains: Mutex<Vec<Domain>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedXen {
    fn new(console: &str, after_unpause: DomainState) -> Arc<Self> {
        Arc::new(Self {
            console: console.to_string(),
            after_unpause,
            domains: Mutex::new(Vec::new()),
            calls: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl DomainController for ScriptedXen {
    async fn create_paused(&self, spec: &BootSpec) -> xenprobe_xen::Result<Domain> {
        self.record(format!("create {}", spec.name));
        let domain = Domain {
            id: 3,
            name: format!("kernel-{}-abc123", spec.name),
            memory: 256,
            vcpus: 1,
            state: DomainState::PAUSED,
            time: 0.0,
        };
        self.domains.lock().unwrap().push(domain.clone());
        Ok(domain)
    }

    async fn unpause(&self, domain: &Domain) -> xenprobe_xen::Result<()> {
        self.record(format!("unpause {}", domain.id));
        for d in self.domains.lock().unwrap().iter_mut() {
            d.state = self.after_unpause;
        }
        Ok(())
    }

    async fn destroy(&self, domain: &Domain) -> xenprobe_xen::Result<()> {
        self.record(format!("destroy {}", domain.id));
        let mut domains = self.domains.lock().unwrap();
        let before = domains.len();
        domains.retain(|d| d.id != domain.id);
        if domains.len() == before {
            return Err(XenError::Lifecycle(format!("no domain {}", domain.id)));
        }
        Ok(())
    }

    fn console(&self, domain: &Domain) -> xenprobe_xen::Result<Console> {
        self.record(format!("console {}", domain.id));
        let mut cmd = Command::new("sh");
        cmd.args(["-c", self.console.as_str()]);
        Console::spawn(domain.id, cmd)
    }

    async fn list(&self) -> xenprobe_xen::Result<Vec<Domain>> {
        Ok(self.domains.lock().unwrap().clone())
    }
}

/// Builder that writes a placeholder image, or fails.
struct FakeBuilder {
    dir: PathBuf,
    fail: bool,
    builds: Mutex<Vec<(String, Vec<String>)>>,
}

impl FakeBuilder {
    fn new(dir: &Path) -> Arc<Self> {
        Arc::new(Self {
            dir: dir.to_path_buf(),
            fail: false,
            builds: Mutex::new(Vec::new()),
        })
    }

    fn failing(dir: &Path) -> Arc<Self> {
        Arc::new(Self {
            dir: dir.to_path_buf(),
            fail: true,
            builds: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl Builder for FakeBuilder {
    async fn build(
        &self,
        name: &str,
        package: &str,
        extra: &[String],
        out: &OutputSink,
    ) -> xenprobe_core::Result<PathBuf> {
        self.builds
            .lock()
            .unwrap()
            .push((package.to_string(), extra.to_vec()));
        if self.fail {
            return Err(CoreError::Config(format!("cannot build {package}")));
        }
        let image = self.dir.join(format!("{name}.xen"));
        std::fs::write(&image, b"unikernel")?;
        out.progress(format!("building {} to {}", name, image.display()));
        Ok(image)
    }
}

fn env(xen: Arc<ScriptedXen>, builder: Arc<FakeBuilder>) -> TestEnv {
    TestEnv::new(xen, builder).package_root("example.com/tests")
}

// ============================================================================
// Console tests
// ============================================================================

#[tokio::test]
async fn test_hello_world_passes() {
    let dir = TempDir::new().unwrap();
    let xen = ScriptedXen::new("echo 'Hello World!'; sleep 30", DomainState::SHUTDOWN);
    let builder = FakeBuilder::new(dir.path());
    let mut test = ConsoleTest::hello_world(env(xen.clone(), builder.clone()));

    let result = StageRunner::quiet().run(&mut test).await;

    assert!(result.passed(), "unexpected error: {:?}", result.error);
    assert_eq!(result.name, "hello_world");
    assert_eq!(result.category, "console");
    assert!(result.output.contains("Hello World!\n"));
    assert!(result.output.contains("[+] successfully ran test"));
    assert_eq!(
        xen.calls(),
        vec!["create hello_world", "console 3", "unpause 3", "destroy 3"]
    );
    assert_eq!(
        builder.builds.lock().unwrap()[0].0,
        "example.com/tests/helloworld/simple"
    );
    assert!(!dir.path().join("hello_world.xen").exists());
}

#[tokio::test]
async fn test_check_failure_still_destroys() {
    let dir = TempDir::new().unwrap();
    let xen = ScriptedXen::new("echo 'Goodbye'; sleep 30", DomainState::SHUTDOWN);
    let mut test = ConsoleTest::hello_world(env(xen.clone(), FakeBuilder::new(dir.path())));

    let result = StageRunner::quiet().run(&mut test).await;

    let err = result.error.expect("check must fail");
    assert!(matches!(err, CoreError::Assertion(_)));
    assert!(result.output.contains("[-] check error:"));
    assert_eq!(xen.calls().last().map(String::as_str), Some("destroy 3"));
}

#[tokio::test]
async fn test_timeout_without_permission_fails() {
    let dir = TempDir::new().unwrap();
    let xen = ScriptedXen::new("echo booting; sleep 30", DomainState::RUNNING);
    let mut test = ConsoleTest::hello_world(env(xen.clone(), FakeBuilder::new(dir.path())))
        .timeout(Duration::from_millis(500));

    let result = StageRunner::quiet().run(&mut test).await;

    assert!(matches!(result.error, Some(CoreError::Timeout(_))));
    assert_eq!(xen.calls().last().map(String::as_str), Some("destroy 3"));
}

#[tokio::test]
async fn test_shutdown_without_permission_fails() {
    let dir = TempDir::new().unwrap();
    let xen = ScriptedXen::new("echo 'Hello World!'; sleep 30", DomainState::SHUTDOWN);
    let mut test = ConsoleTest::new(
        env(xen.clone(), FakeBuilder::new(dir.path())),
        "strict",
        "example.com/tests/strict",
    );

    let result = StageRunner::quiet().run(&mut test).await;

    let err = result.error.expect("shutdown is not allowed");
    assert_eq!(err.to_string(), "domain shutdown");
}

#[tokio::test]
async fn test_read_from_console_feeds_stdin() {
    let dir = TempDir::new().unwrap();
    let xen = ScriptedXen::new(
        "printf \"Hello, what's your name? \"; read name; echo \"Hello, $name\"; sleep 30",
        DomainState::SHUTDOWN,
    );
    let mut test = ConsoleTest::read_from_console(env(xen, FakeBuilder::new(dir.path())));

    let result = StageRunner::quiet().run(&mut test).await;

    assert!(result.passed(), "unexpected error: {:?}", result.error);
    assert!(result
        .output
        .contains("Hello, what's your name? Hello, Unigornel"));
}

#[tokio::test]
async fn test_build_failure_skips_domain() {
    let dir = TempDir::new().unwrap();
    let xen = ScriptedXen::new("sleep 30", DomainState::SHUTDOWN);
    let mut test = ConsoleTest::hello_world(env(xen.clone(), FakeBuilder::failing(dir.path())));

    let result = StageRunner::quiet().run(&mut test).await;

    assert!(result
        .error
        .unwrap()
        .to_string()
        .contains("cannot build example.com/tests/helloworld/simple"));
    assert!(xen.calls().is_empty());
}

// ============================================================================
// Network tests
// ============================================================================

const BRCTL: &str = r#"
echo "brctl $*" >> "$(dirname "$0")/calls"
if [ "$1" = show ]; then
  printf 'bridge name\tbridge id\t\tSTP enabled\tinterfaces\n'
  printf 'xenprobe0\t\t8000.000000000000\tno\t\tvif1.0\n'
fi
"#;

const IP: &str = r#"
echo "ip $*" >> "$(dirname "$0")/calls"
"#;

const IFCONFIG: &str = r#"
echo "ifconfig $*" >> "$(dirname "$0")/calls"
"#;

const PING: &str = r#"
echo "ping $*" >> "$(dirname "$0")/calls"
echo "PING $7 ($7) 56(84) bytes of data."
i=1
while [ $i -le 10 ]; do
  echo "64 bytes from $7: icmp_seq=$i ttl=64 time=0.0$i ms"
  i=$((i + 1))
done
"#;

fn script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{body}")).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

fn fake_network(dir: &Path) -> NetworkEnv {
    NetworkEnv {
        cidr: Some("10.99.0.0/24".into()),
        bridge_prefix: "xenprobe".into(),
        brctl: Brctl::with_program(script(dir, "brctl", BRCTL)),
        ip: IpTool::with_program(script(dir, "ip", IP)),
        ifconfig: Ifconfig::with_program(script(dir, "ifconfig", IFCONFIG)),
        ping: script(dir, "ping", PING),
    }
}

fn tool_calls(dir: &Path) -> Vec<String> {
    std::fs::read_to_string(dir.join("calls"))
        .unwrap_or_default()
        .lines()
        .map(str::to_string)
        .collect()
}

#[tokio::test]
async fn test_ping_over_fresh_bridge() {
    let dir = TempDir::new().unwrap();
    let network = fake_network(dir.path());
    let xen = ScriptedXen::new(
        "echo '[+] using IP address 10.99.0.2'; echo '[+] network is ready'; sleep 30",
        DomainState::RUNNING,
    );
    let builder = FakeBuilder::new(dir.path());
    let mut test = PingTest::new(env(xen.clone(), builder.clone()).network(network));

    let result = StageRunner::quiet().run(&mut test).await;

    assert!(result.passed(), "unexpected error: {:?}", result.error);
    assert_eq!(test.replies().len(), 10);
    assert!(result.output.contains("[+] unikernel network is ready"));
    assert!(result.output.contains("[+] using network from XENPROBE_PING_NETWORK: 10.99.0.0/24"));

    let (package, extra) = builder.builds.lock().unwrap()[0].clone();
    assert_eq!(package, "example.com/tests/network/ping");
    assert_eq!(extra, vec!["--ldflags", "-X main.ipAddress=10.99.0.2"]);

    assert_eq!(
        tool_calls(dir.path()),
        vec![
            "brctl show",
            "brctl addbr xenprobe1",
            "ifconfig xenprobe1 10.99.0.1 netmask 255.255.255.0",
            "ping -c 10 -i 0.5 -W 1 10.99.0.2",
            "ip link set dev xenprobe1 down",
            "brctl delbr xenprobe1",
        ]
    );
    assert_eq!(xen.calls().last().map(String::as_str), Some("destroy 3"));
}

#[tokio::test]
async fn test_ping_console_exit_fails_and_cleans() {
    let dir = TempDir::new().unwrap();
    let network = fake_network(dir.path());
    let xen = ScriptedXen::new("echo 'panic: no network'", DomainState::RUNNING);
    let mut test = PingTest::new(env(xen.clone(), FakeBuilder::new(dir.path())).network(network));

    let result = StageRunner::quiet().run(&mut test).await;

    assert_eq!(result.error.unwrap().to_string(), "console unexpectedly exited");
    let calls = tool_calls(dir.path());
    assert!(!calls.iter().any(|c| c.starts_with("ping")));
    assert_eq!(calls.last().map(String::as_str), Some("brctl delbr xenprobe1"));
}

#[tokio::test]
async fn test_invalid_network_fails_build() {
    let dir = TempDir::new().unwrap();
    let mut network = fake_network(dir.path());
    network.cidr = Some("10.99.0.0/31".into());
    let xen = ScriptedXen::new("sleep 30", DomainState::RUNNING);
    let builder = FakeBuilder::new(dir.path());
    let mut test = PingTest::new(env(xen.clone(), builder.clone()).network(network));

    let result = StageRunner::quiet().run(&mut test).await;

    assert!(result
        .error
        .unwrap()
        .to_string()
        .contains("invalid mask size: 31"));
    assert!(builder.builds.lock().unwrap().is_empty());
    assert!(tool_calls(dir.path()).is_empty());
}

#[tokio::test]
async fn test_ping_address_checks_guest_replies() {
    let dir = TempDir::new().unwrap();
    let network = fake_network(dir.path());
    let xen = ScriptedXen::new(
        "i=1; while [ $i -le 6 ]; do echo \"[+] got ping reply seq $i\"; i=$((i + 1)); done; sleep 30",
        DomainState::RUNNING,
    );
    let builder = FakeBuilder::new(dir.path());
    let mut test = PingAddressTest::new(env(xen.clone(), builder.clone()).network(network))
        .window(Duration::from_millis(500));

    let result = StageRunner::quiet().run(&mut test).await;

    assert!(result.passed(), "unexpected error: {:?}", result.error);
    let (package, extra) = builder.builds.lock().unwrap()[0].clone();
    assert_eq!(package, "example.com/tests/network/ping_address");
    assert_eq!(
        extra[1],
        "-X main.ipAddress=10.99.0.2 -X main.ipNetmask=255.255.255.0 -X main.ipDestination=10.99.0.1"
    );
    assert_eq!(xen.calls()[0], "create ping_address");
    assert_eq!(
        tool_calls(dir.path()).last().map(String::as_str),
        Some("brctl delbr xenprobe1")
    );
}

// ============================================================================
// Real hypervisor
// ============================================================================

/// Builder handing out a prebuilt image.
struct Prebuilt(PathBuf);

#[async_trait]
impl Builder for Prebuilt {
    async fn build(
        &self,
        _name: &str,
        _package: &str,
        _extra: &[String],
        _out: &OutputSink,
    ) -> xenprobe_core::Result<PathBuf> {
        // The test removes its image on clean; hand out a copy.
        let copy = std::env::temp_dir().join("xenprobe-prebuilt.xen");
        std::fs::copy(&self.0, &copy)?;
        Ok(copy)
    }
}

#[tokio::test]
#[ignore = "requires Xen dom0 + xl + unikernel image"]
async fn test_hello_world_on_xen() {
    let Ok(kernel) = std::env::var("XENPROBE_KERNEL") else {
        eprintln!("Skipping test: set XENPROBE_KERNEL to a hello world unikernel");
        return;
    };

    let env = TestEnv::new(
        Arc::new(xenprobe_xen::Xl::new()),
        Arc::new(Prebuilt(PathBuf::from(kernel))),
    );
    let mut test = ConsoleTest::hello_world(env);
    let result = StageRunner::new().run(&mut test).await;

    assert!(result.passed(), "hello_world failed: {:?}", result.error);
}
