//! Shell command execution with captured streams
//!
//! Every install family funnels its package-manager and script invocations
//! through [`invoke`]. Commands run under `bash -c` with their output pumped
//! to this process's stdout/stderr, re-encoded as UTF-8 so exotic child
//! output cannot poison the build log.

use std::io::{Read, Write};
use std::process::{Command, Stdio};
use std::thread;
use tracing::info;

use crate::errors::{CommandError, HostError, Result};

/// Options controlling a single [`invoke`] call
#[derive(Debug, Clone)]
pub struct InvokeOptions {
    /// Turn a non-zero exit status into [`CommandError::Failed`]
    pub raise_on_failure: bool,
    /// Force `HISTFILE=/dev/null` so interactive bash does not pollute the image
    pub clean_history: bool,
    /// Extra environment entries for the child
    pub envs: Vec<(String, String)>,
}

impl Default for InvokeOptions {
    fn default() -> Self {
        Self {
            raise_on_failure: true,
            clean_history: true,
            envs: Vec::new(),
        }
    }
}

/// Fail unless the process holds root privileges
pub fn check_root_privileges() -> Result<()> {
    if !crate::host::has_root_privileges() {
        return Err(HostError::PermissionDenied {
            message: "You need to run this command with sudo or as root.".to_string(),
        }
        .into());
    }
    Ok(())
}

/// Run a command string in the shell and return its exit status
///
/// Requires root. Child stdout/stderr are streamed to this process's
/// stdout/stderr as they arrive.
pub fn invoke(command: &str, options: &InvokeOptions) -> Result<i32> {
    check_root_privileges()?;

    info!("running: {}", command);

    let mut cmd = Command::new("bash");
    cmd.arg("-c").arg(command);
    if options.clean_history {
        cmd.env("HISTFILE", "/dev/null");
    }
    for (name, value) in &options.envs {
        cmd.env(name, value);
    }
    cmd.stdin(Stdio::inherit())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let mut child = cmd.spawn().map_err(|e| CommandError::Spawn {
        command: command.to_string(),
        source: e,
    })?;

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    let stdout_pump = thread::spawn(move || {
        if let Some(stream) = stdout {
            pump(stream, std::io::stdout());
        }
    });
    let stderr_pump = thread::spawn(move || {
        if let Some(stream) = stderr {
            pump(stream, std::io::stderr());
        }
    });

    let status = child.wait().map_err(|e| CommandError::Spawn {
        command: command.to_string(),
        source: e,
    })?;

    let _ = stdout_pump.join();
    let _ = stderr_pump.join();

    let code = status.code().unwrap_or(-1);
    if options.raise_on_failure && code != 0 {
        return Err(CommandError::Failed {
            command: command.to_string(),
            code,
        }
        .into());
    }

    Ok(code)
}

/// Copy child output to our own stream, lossily re-encoded as UTF-8
fn pump<R: Read, W: Write>(mut reader: R, mut writer: W) {
    let mut buf = [0u8; 8192];
    loop {
        match reader.read(&mut buf) {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                let text = String::from_utf8_lossy(&buf[..n]);
                if writer.write_all(text.as_bytes()).is_err() {
                    break;
                }
                let _ = writer.flush();
            }
        }
    }
}
