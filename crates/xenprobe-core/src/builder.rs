//! Producing unikernel images.

use crate::error::Result;
use crate::sink::OutputSink;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use xenprobe_common::{describe, ToolError};

/// Builds a unikernel from a package reference.
#[async_trait]
pub trait Builder: Send + Sync {
    /// Build `package` and return the path of the image.
    ///
    /// The caller owns the returned file and removes it when done. `name`
    /// only labels progress output and temporary file names.
    async fn build(
        &self,
        name: &str,
        package: &str,
        extra: &[String],
        out: &OutputSink,
    ) -> Result<PathBuf>;
}

/// Builder that shells out to the unikernel toolchain:
/// `<program> build -x -a -o <image> <package> [extra...]`.
#[derive(Debug, Clone)]
pub struct CommandBuilder {
    program: PathBuf,
}

impl Default for CommandBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandBuilder {
    /// Builder using `unigornel` from `PATH`.
    pub fn new() -> Self {
        Self::with_program("unigornel")
    }

    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn command(&self, image: &Path, package: &str, extra: &[String]) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(["build", "-x", "-a", "-o"])
            .arg(image)
            .arg(package)
            .args(extra);
        cmd
    }
}

#[async_trait]
impl Builder for CommandBuilder {
    async fn build(
        &self,
        name: &str,
        package: &str,
        extra: &[String],
        out: &OutputSink,
    ) -> Result<PathBuf> {
        let image = tempfile::Builder::new()
            .prefix(&format!("xenprobe-{name}-"))
            .tempfile()?
            .into_temp_path()
            .keep()
            .map_err(|e| e.error)?;

        out.progress(format!("building {} to {}", name, image.display()));
        let mut cmd = self.command(&image, package, extra);
        tracing::debug!(command = %describe(&cmd), "Building unikernel");

        match stream_to_sink(&mut cmd, out).await {
            Ok(()) => {
                tracing::info!(unikernel = %name, image = %image.display(), "Unikernel built");
                Ok(image)
            }
            Err(e) => {
                if let Err(remove) = std::fs::remove_file(&image) {
                    tracing::warn!(image = %image.display(), error = %remove, "Failed to remove image");
                }
                Err(e)
            }
        }
    }
}

/// Run `cmd`, forwarding every output line to `out` as it arrives.
async fn stream_to_sink(cmd: &mut Command, out: &OutputSink) -> Result<()> {
    let program = cmd.as_std().get_program().to_string_lossy().into_owned();
    let mut child = cmd
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| ToolError::Spawn {
            program: program.clone(),
            source,
        })?;

    let (stdout, stderr) = tokio::join!(
        forward_lines(child.stdout.take(), out),
        forward_lines(child.stderr.take(), out),
    );
    let status = child.wait().await?;
    if status.success() {
        return Ok(());
    }

    let combined = format!("{stdout}{stderr}");
    let message = match combined.trim() {
        "" => format!("exited with {status}"),
        text => text.to_string(),
    };
    Err(ToolError::Failed {
        program,
        status: status.code(),
        message,
    }
    .into())
}

async fn forward_lines(stream: Option<impl AsyncRead + Unpin>, out: &OutputSink) -> String {
    let mut seen = String::new();
    let Some(stream) = stream else {
        return seen;
    };
    let mut lines = BufReader::new(stream).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                out.line(&line);
                seen.push_str(&line);
                seen.push('\n');
            }
            Ok(None) => break,
            Err(e) => {
                tracing::warn!(error = %e, "Reading build output failed");
                break;
            }
        }
    }
    seen
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use tokio_util::sync::CancellationToken;

    /// Write an executable shell script standing in for the toolchain.
    fn fake_toolchain(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join("unigornel");
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    async fn build_with(
        builder: &CommandBuilder,
        extra: &[String],
    ) -> (Result<PathBuf>, String) {
        let (out, collector) = OutputSink::channel(false);
        let result = builder
            .build("hello_world", "example.com/tests/helloworld", extra, &out)
            .await;
        drop(out);
        (result, collector.collect(CancellationToken::new()).await)
    }

    #[test]
    fn test_command_line() {
        let builder = CommandBuilder::new();
        let cmd = builder.command(
            Path::new("/tmp/image"),
            "example.com/tests/network/ping",
            &["--ldflags".into(), "-X main.ipAddress=10.0.0.2".into()],
        );
        assert_eq!(
            describe(&cmd),
            "unigornel build -x -a -o /tmp/image example.com/tests/network/ping --ldflags -X main.ipAddress=10.0.0.2"
        );
    }

    #[tokio::test]
    async fn test_build_streams_output_and_keeps_image() {
        let dir = tempfile::tempdir().unwrap();
        // $5 is the -o target, $6 the package.
        let program = fake_toolchain(dir.path(), "echo \"compiling $6\"; echo kernel > \"$5\"");
        let builder = CommandBuilder::with_program(program);

        let (result, output) = build_with(&builder, &[]).await;
        let image = result.unwrap();

        assert_eq!(std::fs::read_to_string(&image).unwrap(), "kernel\n");
        assert!(output.starts_with("[+] building hello_world to "));
        assert!(output.contains("compiling example.com/tests/helloworld\n"));
        std::fs::remove_file(image).unwrap();
    }

    #[tokio::test]
    async fn test_failed_build_removes_image() {
        let dir = tempfile::tempdir().unwrap();
        let program = fake_toolchain(dir.path(), "echo 'cannot find package' >&2; exit 1");
        let builder = CommandBuilder::with_program(program);

        let (result, output) = build_with(&builder, &[]).await;
        let err = result.unwrap_err();

        assert!(err.to_string().contains("cannot find package"));
        let image = output
            .lines()
            .next()
            .and_then(|l| l.strip_prefix("[+] building hello_world to "))
            .unwrap();
        assert!(!Path::new(image).exists());
    }

    #[tokio::test]
    async fn test_missing_toolchain() {
        let builder = CommandBuilder::with_program("/nonexistent/unigornel");
        let (result, _) = build_with(&builder, &[]).await;
        assert!(result.unwrap_err().to_string().contains("failed to spawn"));
    }
}
