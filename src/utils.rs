//! External command execution.

use anyhow::{anyhow, Context, Result};
use log::trace;
use std::ffi::OsStr;
use std::io::{BufRead, BufReader};
use std::process::{Command, Stdio};
use std::sync::mpsc;
use std::thread;

/// Result of an external command which was run to completion.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code. `None` if the process was terminated by a signal.
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    /// Successful output with given stdout.
    #[cfg(test)]
    pub fn ok<S: Into<String>>(stdout: S) -> Self {
        Self {
            code: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    /// Failed output with given exit code and stderr.
    #[cfg(test)]
    pub fn failed<S: Into<String>>(code: i32, stderr: S) -> Self {
        Self {
            code: Some(code),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Stdout and stderr joined together, for diagnostics.
    pub fn combined(&self) -> String {
        match (self.stdout.trim(), self.stderr.trim()) {
            ("", stderr) => stderr.to_string(),
            (stdout, "") => stdout.to_string(),
            (stdout, stderr) => format!("{}\n{}", stdout, stderr),
        }
    }

    /// Human-readable exit status.
    pub fn status(&self) -> String {
        match self.code {
            Some(code) => format!("exit status {}", code),
            None => "termination by signal".to_string(),
        }
    }
}

/// Capability to run external commands.
///
/// `command[0]` is the program, the rest are its arguments.
/// `Err` means the command could not be run at all. Non-zero exit is reported
/// through [`CommandOutput::code`].
pub trait CommandRunner {
    fn run(&self, command: &[&OsStr]) -> Result<CommandOutput>;
}

/// Runs commands on the host system.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemCommandRunner;

impl CommandRunner for SystemCommandRunner {
    fn run(&self, command: &[&OsStr]) -> Result<CommandOutput> {
        let (program, args) = command
            .split_first()
            .ok_or_else(|| anyhow!("empty command"))?;
        let program_name = program.to_string_lossy().to_string();

        trace!(
            "running command: '{} {}'",
            program_name,
            args.iter()
                .map(|arg| arg.to_string_lossy())
                .collect::<Vec<_>>()
                .join(" ")
        );

        let executable =
            which::which(program).with_context(|| format!("`{}` not found", program_name))?;

        let mut child = Command::new(executable)
            .args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("failed to spawn child process for `{}`", program_name))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow!("failed to capture stdout of `{}`", program_name))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| anyhow!("failed to capture stderr of `{}`", program_name))?;

        // Child blocks on a full pipe, so both are drained concurrently
        let (stdout_tx, stdout_rx) = mpsc::channel::<String>();
        let (stderr_tx, stderr_rx) = mpsc::channel::<String>();
        let stdout_log_target = program_name.clone();
        let stderr_log_target = program_name.clone();

        let stdout_thread = thread::spawn(move || {
            BufReader::new(stdout)
                .lines()
                .map_while(Result::ok)
                .for_each(|line| {
                    trace!(target: stdout_log_target.as_str(), "{}", line);
                    let _ = stdout_tx.send(line);
                });
        });

        let stderr_thread = thread::spawn(move || {
            BufReader::new(stderr)
                .lines()
                .map_while(Result::ok)
                .for_each(|line| {
                    trace!(target: stderr_log_target.as_str(), "{}", line);
                    let _ = stderr_tx.send(line);
                });
        });

        let exit_status = child.wait().with_context(|| {
            format!(
                "attempted to wait for child process `{}` which is not running",
                program_name
            )
        })?;

        stdout_thread
            .join()
            .map_err(|_| anyhow!("stdout reader of `{}` panicked", program_name))?;
        stderr_thread
            .join()
            .map_err(|_| anyhow!("stderr reader of `{}` panicked", program_name))?;

        Ok(CommandOutput {
            code: exit_status.code(),
            stdout: stdout_rx.into_iter().collect::<Vec<String>>().join("\n"),
            stderr: stderr_rx.into_iter().collect::<Vec<String>>().join("\n"),
        })
    }
}
