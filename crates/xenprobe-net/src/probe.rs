//! ICMP echo probes via `ping`.

use crate::error::{NetError, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;
use tokio::process::Command;
use xenprobe_common::run_tool;

static REPLY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"icmp_seq=(\d+) ttl=(\d+) time=(.*)$").expect("valid reply regex")
});
static FAILURE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"icmp_seq=(\d+) (.*)$").expect("valid failure regex"));

/// Outcome of one echo request.
///
/// A reply carries `ttl` and `time`; a failure carries only `error`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProbeReply {
    pub seq: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ttl: Option<u32>,
    /// Round trip time as printed, e.g. `0.047 ms`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ProbeReply {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Parse a single line of `ping` output.
///
/// Returns `Ok(None)` for lines that are neither a reply nor a failure,
/// such as the banner and the statistics block.
pub fn parse_probe_line(line: &str) -> std::result::Result<Option<ProbeReply>, String> {
    if let Some(caps) = REPLY.captures(line) {
        return Ok(Some(ProbeReply {
            seq: parse_number(&caps[1], "icmp_seq")?,
            ttl: Some(parse_number(&caps[2], "ttl")?),
            time: Some(caps[3].to_string()),
            error: None,
        }));
    }

    if let Some(caps) = FAILURE.captures(line) {
        return Ok(Some(ProbeReply {
            seq: parse_number(&caps[1], "icmp_seq")?,
            ttl: None,
            time: None,
            error: Some(caps[2].to_string()),
        }));
    }

    Ok(None)
}

fn parse_number(text: &str, field: &str) -> std::result::Result<u32, String> {
    text.parse()
        .map_err(|e| format!("invalid {field} '{text}': {e}"))
}

/// Parse the full output of `ping`, keeping replies in output order.
pub fn parse_probe_output(text: &str) -> Result<Vec<ProbeReply>> {
    let mut replies = Vec::new();
    for (idx, line) in text.lines().enumerate() {
        let parsed =
            parse_probe_line(line).map_err(|reason| NetError::parse(idx + 1, line, reason))?;
        replies.extend(parsed);
    }
    Ok(replies)
}

/// An echo probe of `count` requests against one host.
#[derive(Debug, Clone)]
pub struct EchoProbe {
    program: PathBuf,
    host: String,
    count: u32,
    interval: Duration,
    wait: Duration,
}

impl EchoProbe {
    /// Ten requests, half a second apart, one second reply timeout.
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            program: PathBuf::from("ping"),
            host: host.into(),
            count: 10,
            interval: Duration::from_millis(500),
            wait: Duration::from_secs(1),
        }
    }

    pub fn program(mut self, program: impl Into<PathBuf>) -> Self {
        self.program = program.into();
        self
    }

    pub fn count(mut self, count: u32) -> Self {
        self.count = count;
        self
    }

    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Per-request reply timeout. `ping` only accepts whole seconds here, so
    /// the value is rounded up.
    pub fn wait(mut self, wait: Duration) -> Self {
        self.wait = wait;
        self
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn expected_replies(&self) -> u32 {
        self.count
    }

    /// The command line for this probe, ready to be spawned.
    pub fn command(&self) -> Command {
        let mut wait_secs = self.wait.as_secs();
        if self.wait.subsec_nanos() > 0 || wait_secs == 0 {
            wait_secs += 1;
        }

        let mut cmd = Command::new(&self.program);
        cmd.arg("-c")
            .arg(self.count.to_string())
            .arg("-i")
            .arg(self.interval.as_secs_f64().to_string())
            .arg("-W")
            .arg(wait_secs.to_string())
            .arg(&self.host);
        cmd
    }

    /// Run the probe to completion and parse its output.
    pub async fn run(&self) -> Result<Vec<ProbeReply>> {
        tracing::info!(host = %self.host, count = self.count, "Probing host");
        let output = run_tool(&mut self.command()).await?;
        parse_probe_output(&output.stdout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PING_OUTPUT: &str = "\
PING 127.0.0.1 (127.0.0.1) 56(84) bytes of data.
64 bytes from 127.0.0.1: icmp_seq=1 ttl=64 time=0.047 ms
64 bytes from 127.0.0.1: icmp_seq=2 ttl=64 time=0.047 ms
From 127.0.0.1 icmp_seq=3 Destination Host Unreachable
64 bytes from 127.0.0.1: icmp_seq=4 ttl=64 time=0.055 ms

--- 127.0.0.1 ping statistics ---
10 packets transmitted, 10 received, 0% packet loss, time 4499ms
rtt min/avg/max/mdev = 0.044/0.057/0.072/0.010 ms
";

    fn reply(seq: u32, time: &str) -> ProbeReply {
        ProbeReply {
            seq,
            ttl: Some(64),
            time: Some(time.into()),
            error: None,
        }
    }

    #[test]
    fn test_parse_probe_output() {
        let replies = parse_probe_output(PING_OUTPUT).unwrap();
        assert_eq!(
            replies,
            vec![
                reply(1, "0.047 ms"),
                reply(2, "0.047 ms"),
                ProbeReply {
                    seq: 3,
                    ttl: None,
                    time: None,
                    error: Some("Destination Host Unreachable".into()),
                },
                reply(4, "0.055 ms"),
            ]
        );
        assert!(!replies[2].is_success());
        assert_eq!(replies.iter().filter(|r| r.is_success()).count(), 3);
    }

    #[test]
    fn test_parse_probe_line_skips_banner() {
        assert_eq!(
            parse_probe_line("PING 10.0.0.2 (10.0.0.2) 56(84) bytes of data.").unwrap(),
            None
        );
        assert_eq!(parse_probe_line("").unwrap(), None);
    }

    #[test]
    fn test_parse_probe_line_overflow() {
        let err = parse_probe_output("From 10.0.0.1 icmp_seq=99999999999 Timeout\n").unwrap_err();
        assert!(matches!(err, NetError::Parse { line: 1, .. }));
    }

    #[test]
    fn test_command_line() {
        let cmd = EchoProbe::new("10.123.123.2").command();
        assert_eq!(
            xenprobe_common::describe(&cmd),
            "ping -c 10 -i 0.5 -W 1 10.123.123.2"
        );

        let cmd = EchoProbe::new("10.0.0.2")
            .count(3)
            .interval(Duration::from_secs(1))
            .wait(Duration::from_millis(1500))
            .command();
        assert_eq!(xenprobe_common::describe(&cmd), "ping -c 3 -i 1 -W 2 10.0.0.2");
    }

    #[tokio::test]
    async fn test_run_reports_tool_failure() {
        let err = EchoProbe::new("10.0.0.2")
            .program("false")
            .run()
            .await
            .unwrap_err();
        assert!(matches!(err, NetError::Tool(_)));
    }
}
