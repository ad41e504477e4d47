//! Shell command execution utilities.
//!
//! Every argument that originates from a watched resource is passed through
//! [`shellquote`] before it reaches `/bin/sh`, so resource names and addresses
//! cannot inject commands.
//!
//! # Example
//!
//! ```ignore
//! use kube_pat_common::shell::{self, IPTABLES_CMD, shellquote};
//!
//! let cmd = format!("{} -t nat -L {} -n", IPTABLES_CMD, shellquote("PREROUTING"));
//! let rules = shell::exec_or_throw(&cmd).await?;
//! ```

use once_cell::sync::Lazy;
use regex::Regex;
use std::process::Stdio;
use tokio::process::Command;

use crate::error::{PatError, PatResult};

/// Path to the `iptables` command for NAT rules.
pub const IPTABLES_CMD: &str = "/sbin/iptables";

/// Matches: $, `, ", \, and newline
static SHELL_ESCAPE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"([$`"\\\n])"#).expect("Invalid regex pattern"));

/// Quotes a string for safe use in shell commands.
///
/// The string is wrapped in double quotes and every character that keeps a
/// special meaning inside double quotes is escaped.
///
/// ```
/// use kube_pat_common::shell::shellquote;
///
/// assert_eq!(shellquote("simple"), "\"simple\"");
/// assert_eq!(shellquote("with$var"), "\"with\\$var\"");
/// ```
pub fn shellquote(s: &str) -> String {
    let escaped = SHELL_ESCAPE_RE.replace_all(s, r"\$1");
    format!("\"{}\"", escaped)
}

/// Result of a shell command execution.
#[derive(Debug, Clone)]
pub struct ExecResult {
    /// The exit code of the command (0 = success).
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ExecResult {
    /// Returns true if the command succeeded (exit code 0).
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Returns the combined output (stdout + stderr) for error messages.
    pub fn combined_output(&self) -> String {
        if self.stderr.is_empty() {
            self.stdout.clone()
        } else if self.stdout.is_empty() {
            self.stderr.clone()
        } else {
            format!("{}\n{}", self.stdout, self.stderr)
        }
    }
}

/// Executes a shell command through `/bin/sh -c`.
///
/// A non-zero exit status is not an error here; only a failure to spawn the
/// shell is.
pub async fn exec(cmd: &str) -> PatResult<ExecResult> {
    tracing::debug!(command = %cmd, "Executing shell command");

    let output = Command::new("/bin/sh")
        .arg("-c")
        .arg(cmd)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(|e| PatError::ShellExec {
            command: cmd.to_string(),
            source: e,
        })?;

    let result = ExecResult {
        exit_code: output.status.code().unwrap_or(-1),
        stdout: String::from_utf8_lossy(&output.stdout).trim().to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
    };

    if result.success() {
        tracing::trace!(command = %cmd, "Command succeeded");
    } else {
        tracing::debug!(
            command = %cmd,
            exit_code = result.exit_code,
            stderr = %result.stderr,
            "Command returned non-zero"
        );
    }

    Ok(result)
}

/// Executes a shell command and returns its stdout, failing on non-zero exit.
pub async fn exec_or_throw(cmd: &str) -> PatResult<String> {
    let result = exec(cmd).await?;
    if result.success() {
        Ok(result.stdout)
    } else {
        Err(PatError::ShellCommandFailed {
            command: cmd.to_string(),
            exit_code: result.exit_code,
            output: result.combined_output(),
        })
    }
}
