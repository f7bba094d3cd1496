//! Test output capture.
//!
//! Every stage writes through an [`OutputSink`]. A single [`OutputCollector`]
//! owns the per-test buffer and mirrors each chunk to stdout, so the sink can
//! be cloned into watcher tasks without sharing a lock.

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Cloneable writer for test output.
#[derive(Debug, Clone)]
pub struct OutputSink {
    tx: mpsc::UnboundedSender<String>,
}

impl OutputSink {
    /// Create a sink and the collector that receives its output.
    ///
    /// With `echo` set, the collector also prints everything to stdout.
    pub fn channel(echo: bool) -> (Self, OutputCollector) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self { tx },
            OutputCollector {
                rx,
                echo,
                buffer: String::new(),
            },
        )
    }

    /// Write raw text.
    pub fn write(&self, text: impl Into<String>) {
        // The collector only goes away after the test finished.
        let _ = self.tx.send(text.into());
    }

    /// Write one line.
    pub fn line(&self, text: impl AsRef<str>) {
        let text = text.as_ref();
        let mut line = String::with_capacity(text.len() + 1);
        line.push_str(text);
        line.push('\n');
        self.write(line);
    }

    /// Write a `[+]` progress line.
    pub fn progress(&self, text: impl AsRef<str>) {
        self.line(format!("[+] {}", text.as_ref()));
    }

    /// Write a `[*]` warning line.
    pub fn warning(&self, text: impl AsRef<str>) {
        self.line(format!("[*] warning: {}", text.as_ref()));
    }

    /// Write a `[-]` error line.
    pub fn failure(&self, text: impl AsRef<str>) {
        self.line(format!("[-] {}", text.as_ref()));
    }
}

/// Receiving side of an [`OutputSink`].
#[derive(Debug)]
pub struct OutputCollector {
    rx: mpsc::UnboundedReceiver<String>,
    echo: bool,
    buffer: String,
}

impl OutputCollector {
    /// Collect output until every sink is dropped or `stop` fires.
    ///
    /// Output already queued when `stop` fires is still collected.
    pub async fn collect(mut self, stop: CancellationToken) -> String {
        loop {
            tokio::select! {
                biased;
                chunk = self.rx.recv() => match chunk {
                    Some(chunk) => self.push(chunk),
                    None => break,
                },
                _ = stop.cancelled() => {
                    while let Ok(chunk) = self.rx.try_recv() {
                        self.push(chunk);
                    }
                    break;
                }
            }
        }
        self.buffer
    }

    fn push(&mut self, chunk: String) {
        if self.echo {
            print!("{chunk}");
        }
        self.buffer.push_str(&chunk);
    }
}
