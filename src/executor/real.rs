//! Real command executor implementation.
//!
//! This module provides [`RealCommandExecutor`], which executes commands
//! using `std::process::Command` while streaming their output into the log.

use std::process::{Child, Command, Stdio};
use std::thread;
use std::thread::JoinHandle;

use anyhow::{Context, Result};
use which::which;

use super::pipe::{StreamType, panic_message, read_pipe_to_log};
use super::{CommandExecutor, CommandSpec, ExecutionResult, format_command_args};
use crate::error::CustomizeError;

/// Kills a child process and joins its reader threads.
///
/// Called from the error paths of [`RealCommandExecutor::execute()`] so that
/// a failed thread spawn or wait does not leak the child or the readers.
fn cleanup_child_process<I>(child: &mut Child, handles: I)
where
    I: IntoIterator<Item = JoinHandle<()>>,
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

impl RealCommandExecutor {
    /// Resolves the program and argument list, applying privilege escalation.
    fn resolve_argv(spec: &CommandSpec) -> (String, Vec<String>) {
        match spec.privilege {
            Some(method) => method.wrap(&spec.command, &spec.args),
            None => (spec.command.clone(), spec.args.clone()),
        }
    }
}

impl CommandExecutor for RealCommandExecutor {
    fn execute(&self, spec: &CommandSpec) -> Result<ExecutionResult> {
        let (program, args) = Self::resolve_argv(spec);
        let command_line = {
            let mut argv = vec![program.clone()];
            argv.extend(args.iter().cloned());
            format_command_args(&argv)
        };

        if self.dry_run {
            tracing::info!("dry run: {}", command_line);
            return Ok(ExecutionResult { status: None });
        }

        let cmd = which(&program).map_err(|_| CustomizeError::CommandNotFound {
            command: program.clone(),
        })?;
        tracing::trace!("command found: {}: {}", program, cmd.to_string_lossy());

        let mut command = Command::new(cmd);
        command.args(&args);

        if let Some(ref cwd) = spec.cwd {
            command.current_dir(cwd);
        }

        for (key, value) in &spec.env {
            command.env(key, value);
        }

        command.stdin(Stdio::null());
        command.stdout(Stdio::piped());
        command.stderr(Stdio::piped());

        let mut child = command
            .spawn()
            .with_context(|| format!("failed to spawn command {}", command_line))?;

        tracing::debug!("spawned command: {}: pid={}", command_line, child.id());

        let stdout_pipe = child.stdout.take();
        let stderr_pipe = child.stderr.take();

        let stdout_handle = match thread::Builder::new()
            .name("stdout-reader".to_string())
            .spawn(move || read_pipe_to_log(stdout_pipe, StreamType::Stdout))
        {
            Ok(handle) => handle,
            Err(e) => {
                cleanup_child_process(&mut child, []);
                return Err(CustomizeError::Execution {
                    command: command_line,
                    status: format!("failed to spawn stdout reader thread: {}", e),
                }
                .into());
            }
        };

        let stderr_handle = match thread::Builder::new()
            .name("stderr-reader".to_string())
            .spawn(move || read_pipe_to_log(stderr_pipe, StreamType::Stderr))
        {
            Ok(handle) => handle,
            Err(e) => {
                cleanup_child_process(&mut child, [stdout_handle]);
                return Err(CustomizeError::Execution {
                    command: command_line,
                    status: format!("failed to spawn stderr reader thread: {}", e),
                }
                .into());
            }
        };

        let status = match child.wait() {
            Ok(s) => s,
            Err(e) => {
                cleanup_child_process(&mut child, [stdout_handle, stderr_handle]);
                return Err(CustomizeError::Execution {
                    command: command_line,
                    status: format!("failed to wait for command: {}", e),
                }
                .into());
            }
        };

        let mut panicked_streams = Vec::new();
        for (name, handle) in [("stdout", stdout_handle), ("stderr", stderr_handle)] {
            if let Err(e) = handle.join() {
                let msg = panic_message(&*e);
                tracing::error!(stream = name, panic = msg, "reader thread panicked");
                panicked_streams.push(format!("{}: {}", name, msg));
            }
        }

        if !panicked_streams.is_empty() {
            return Err(CustomizeError::Execution {
                command: command_line,
                status: format!(
                    "reader thread(s) panicked during command execution: {}",
                    panicked_streams.join(", ")
                ),
            }
            .into());
        }

        tracing::debug!("executed command: {}: {}", command_line, status);

        Ok(ExecutionResult {
            status: Some(status),
        })
    }
}
