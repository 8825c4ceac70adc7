//! Real command executor implementation.
//!
//! This module provides [`RealCommandExecutor`], which executes commands
//! using `std::process::Command` with real-time output streaming.

use std::process::{Child, Command, Stdio};
use std::thread;
use std::thread::JoinHandle;

use anyhow::Result;
use which::which;

use super::pipe::{LineForwarder, OutputStream, panic_message};
use super::{CommandExecutor, CommandSpec, ExecutionResult, format_command_args};
use crate::error::RsimgstrapError;

/// Builds an `Execution` error for failures that happen around the child process.
fn internal_failure(spec: &CommandSpec, status: String) -> anyhow::Error {
    RsimgstrapError::Execution {
        argv: spec.argv(),
        env: spec.env.clone(),
        status,
        code: None,
    }
    .into()
}

/// Cleans up a child process and its associated reader threads.
///
/// This function kills the child process, waits for it to terminate,
/// and joins all reader threads to prevent resource leaks.
///
/// Called from error paths in [`RealCommandExecutor::execute()`] to ensure
/// proper cleanup when thread spawning or process waiting fails.
fn cleanup_child_process<I>(child: &mut Child, handles: I)
where
    I: IntoIterator<Item = JoinHandle<usize>>,
{
    let pid = child.id();
    if let Err(e) = child.kill() {
        tracing::debug!(pid = pid, "kill returned error (process may have already exited): {}", e);
    }
    if let Err(e) = child.wait() {
        tracing::warn!(pid = pid, "failed to wait for child process after kill: {}", e);
    }
    for handle in handles {
        if let Err(e) = handle.join() {
            tracing::warn!("reader thread panicked during cleanup: {}", panic_message(&*e));
        }
    }
}

/// Command executor that runs actual system commands.
///
/// When `dry_run` is true, commands are logged but not executed,
/// and `execute()` returns `Ok(ExecutionResult { status: None })`.
pub struct RealCommandExecutor {
    pub dry_run: bool,
}

impl CommandExecutor for RealCommandExecutor {
    fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    fn execute(&self, spec: &CommandSpec) -> Result<ExecutionResult> {
        if self.dry_run {
            tracing::info!("dry run: {}", format_command_args(&spec.argv()));
            return Ok(ExecutionResult { status: None });
        }

        let cmd = which(&spec.command).map_err(|_| RsimgstrapError::CommandNotFound {
            command: spec.command.clone(),
        })?;
        tracing::trace!("command found: {}: {}", spec.command, cmd.to_string_lossy());

        let mut command = Command::new(cmd);
        command.args(&spec.args);

        for (key, value) in &spec.env {
            command.env(key, value);
        }

        command.stdout(Stdio::piped());
        command.stderr(Stdio::piped());

        let mut child = command
            .spawn()
            .map_err(|e| internal_failure(spec, format!("failed to spawn: {}", e)))?;

        tracing::trace!("spawned command: {}: pid={}", spec.command, child.id());

        let stdout_pipe = child.stdout.take();
        let stderr_pipe = child.stderr.take();

        // Read both stdout and stderr in separate threads with panic error propagation
        let stdout_forwarder = LineForwarder::new(&spec.command, OutputStream::Stdout);
        let stderr_forwarder = LineForwarder::new(&spec.command, OutputStream::Stderr);

        let stdout_handle = match thread::Builder::new()
            .name("stdout-reader".to_string())
            .spawn(move || stdout_forwarder.forward(stdout_pipe))
        {
            Ok(handle) => handle,
            Err(e) => {
                cleanup_child_process(&mut child, []);
                return Err(internal_failure(
                    spec,
                    format!("failed to spawn stdout reader thread: {}", e),
                ));
            }
        };

        let stderr_handle = match thread::Builder::new()
            .name("stderr-reader".to_string())
            .spawn(move || stderr_forwarder.forward(stderr_pipe))
        {
            Ok(handle) => handle,
            Err(e) => {
                // Clean up by killing the child process and joining the stdout thread
                cleanup_child_process(&mut child, [stdout_handle]);
                return Err(internal_failure(
                    spec,
                    format!("failed to spawn stderr reader thread: {}", e),
                ));
            }
        };

        // Wait for the child process to complete
        let status = match child.wait() {
            Ok(s) => s,
            Err(e) => {
                // If waiting fails, the process might still be running.
                // Kill it and clean up threads to prevent resource leaks.
                cleanup_child_process(&mut child, [stdout_handle, stderr_handle]);
                return Err(internal_failure(spec, format!("failed to wait for command: {}", e)));
            }
        };

        // Wait for reader threads to complete (with error propagation on panic)
        let mut panicked_streams = Vec::new();
        let handles = [
            (OutputStream::Stdout, stdout_handle),
            (OutputStream::Stderr, stderr_handle),
        ];
        for (stream, handle) in handles {
            match handle.join() {
                Ok(lines) => {
                    tracing::trace!("{}: forwarded {} {} line(s)", spec.command, lines, stream)
                }
                Err(e) => {
                    let msg = panic_message(&*e);
                    tracing::error!(stream = %stream, panic = msg, "reader thread panicked");
                    panicked_streams.push(format!("{}: {}", stream, msg));
                }
            }
        }

        if !panicked_streams.is_empty() {
            return Err(internal_failure(
                spec,
                format!(
                    "reader thread(s) panicked during command execution: {}",
                    panicked_streams.join(", ")
                ),
            ));
        }

        tracing::trace!("executed command: {}: success={}", spec.command, status.success());

        Ok(ExecutionResult {
            status: Some(status),
        })
    }
}
