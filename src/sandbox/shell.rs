//! Shell command execution for `run_command`.
//!
//! - Runs through `sh -c` with stdin closed
//! - Hard wall-clock timeout; on unix the command runs in its own process
//!   group and the whole group is killed on expiry or cancellation
//! - stdout/stderr each capped, excess drained and discarded
//! - Privilege escalation and known destructive patterns rejected up front

use std::collections::HashSet;
use std::path::Path;
use std::process::Stdio;
use std::sync::LazyLock;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;

use crate::error::SandboxError;
use crate::sandbox::ToolOutput;

/// Commands that are always blocked.
static BLOCKED_COMMANDS: LazyLock<Vec<&'static str>> = LazyLock::new(|| {
    vec![
        "rm -rf /",
        "rm -rf /*",
        "rm -rf ~",
        ":(){ :|:& };:", // Fork bomb
        "dd if=/dev/zero",
        "mkfs",
        "chmod -r 777 /",
        "> /dev/sda",
        "curl | sh",
        "wget | sh",
        "curl | bash",
        "wget | bash",
    ]
});

/// Programs that run something with elevated privileges.
static ELEVATION_PROGRAMS: LazyLock<HashSet<&'static str>> =
    LazyLock::new(|| HashSet::from(["sudo", "doas", "su", "pkexec", "runas"]));

/// Whether any word in the command starts a privileged program.
pub fn requires_elevation(command: &str) -> bool {
    command
        .split(|c: char| c.is_whitespace() || matches!(c, ';' | '&' | '|' | '(' | ')' | '`'))
        .filter(|w| !w.is_empty())
        .map(|w| w.rsplit('/').next().unwrap_or(w))
        .any(|w| ELEVATION_PROGRAMS.contains(w))
}

fn blocked_reason(command: &str) -> Option<&'static str> {
    let normalized = command.to_lowercase();
    if BLOCKED_COMMANDS.iter().any(|b| normalized.contains(b)) {
        return Some("command contains a blocked pattern");
    }
    if requires_elevation(&normalized) {
        return Some("command requests elevated privileges");
    }
    None
}

/// Bytes kept up to a cap; everything past it is counted and dropped.
struct CappedBuffer {
    data: Vec<u8>,
    cap: usize,
    total: usize,
}

impl CappedBuffer {
    fn new(cap: usize) -> Self {
        Self {
            data: Vec::new(),
            cap,
            total: 0,
        }
    }

    fn push(&mut self, chunk: &[u8]) {
        self.total += chunk.len();
        let room = self.cap.saturating_sub(self.data.len());
        self.data.extend_from_slice(&chunk[..chunk.len().min(room)]);
    }

    fn truncated(&self) -> bool {
        self.total > self.cap
    }

    fn text(&self) -> String {
        String::from_utf8_lossy(&self.data).into_owned()
    }
}

async fn drain<R: AsyncRead + Unpin>(
    reader: Option<R>,
    buf: &mut CappedBuffer,
) -> std::io::Result<()> {
    let Some(mut reader) = reader else {
        return Ok(());
    };
    let mut chunk = [0u8; 8192];
    loop {
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            return Ok(());
        }
        buf.push(&chunk[..n]);
    }
}

fn combine(stdout: &CappedBuffer, stderr: &CappedBuffer) -> String {
    let out = stdout.text();
    let err = stderr.text();
    if err.is_empty() {
        out
    } else if out.is_empty() {
        err
    } else {
        format!("{out}\n\n--- stderr ---\n{err}")
    }
}

/// Kills the command's process group when dropped, unless disarmed.
///
/// Dropping happens on timeout, on I/O failure, and when the enclosing
/// future is cancelled mid-run, so nothing the command started outlives it.
struct GroupKill {
    pgid: Option<u32>,
}

impl GroupKill {
    fn new(pgid: Option<u32>) -> Self {
        Self { pgid }
    }

    fn disarm(&mut self) {
        self.pgid = None;
    }

    fn kill_now(&mut self) {
        if let Some(pgid) = self.pgid.take() {
            kill_group(pgid);
        }
    }
}

impl Drop for GroupKill {
    fn drop(&mut self) {
        self.kill_now();
    }
}

#[cfg(unix)]
fn kill_group(pgid: u32) {
    let status = std::process::Command::new("kill")
        .args(["-KILL", "--", &format!("-{pgid}")])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status();
    if let Err(e) = status {
        tracing::warn!(pgid, error = %e, "Failed to kill process group");
    }
}

#[cfg(not(unix))]
fn kill_group(_pgid: u32) {}

/// Truncate command for error messages.
fn truncate_for_error(s: &str) -> String {
    if s.chars().count() <= 100 {
        s.to_string()
    } else {
        format!("{}...", s.chars().take(100).collect::<String>())
    }
}

pub(crate) async fn run(
    command: &str,
    workdir: Option<&Path>,
    timeout: Duration,
    max_output: usize,
) -> Result<ToolOutput, SandboxError> {
    if command.trim().is_empty() {
        return Err(SandboxError::CommandExecution {
            command: String::new(),
            reason: "command is empty".to_string(),
            partial_output: String::new(),
        });
    }

    if let Some(reason) = blocked_reason(command) {
        tracing::warn!(command = %truncate_for_error(command), reason, "Rejected command");
        return Err(SandboxError::CommandExecution {
            command: truncate_for_error(command),
            reason: reason.to_string(),
            partial_output: String::new(),
        });
    }

    let mut cmd = if cfg!(target_os = "windows") {
        let mut c = Command::new("cmd");
        c.args(["/C", command]);
        c
    } else {
        let mut c = Command::new("sh");
        c.args(["-c", command]);
        c
    };
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(dir) = workdir {
        cmd.current_dir(dir);
    }
    #[cfg(unix)]
    cmd.process_group(0);

    tracing::debug!(command = %truncate_for_error(command), ?timeout, "Running command");

    let mut child = cmd.spawn().map_err(|e| SandboxError::CommandExecution {
        command: truncate_for_error(command),
        reason: format!("failed to spawn: {e}"),
        partial_output: String::new(),
    })?;
    let mut group = GroupKill::new(child.id());

    let mut stdout = child.stdout.take();
    let mut stderr = child.stderr.take();
    let mut out_buf = CappedBuffer::new(max_output);
    let mut err_buf = CappedBuffer::new(max_output);

    let waited = tokio::time::timeout(timeout, async {
        let (out, err, status) = tokio::join!(
            drain(stdout.as_mut(), &mut out_buf),
            drain(stderr.as_mut(), &mut err_buf),
            child.wait()
        );
        out?;
        err?;
        status
    })
    .await;

    match waited {
        Ok(Ok(status)) => {
            group.disarm();
            Ok(ToolOutput {
                content: combine(&out_buf, &err_buf),
                exit_code: status.code(),
                truncated: out_buf.truncated() || err_buf.truncated(),
            })
        }
        Ok(Err(e)) => Err(SandboxError::CommandExecution {
            command: truncate_for_error(command),
            reason: e.to_string(),
            partial_output: combine(&out_buf, &err_buf),
        }),
        Err(_) => {
            group.kill_now();
            let _ = child.kill().await;
            tracing::warn!(command = %truncate_for_error(command), ?timeout, "Command timed out");
            Err(SandboxError::CommandTimeout {
                command: truncate_for_error(command),
                timeout,
                partial_output: combine(&out_buf, &err_buf),
            })
        }
    }
}
