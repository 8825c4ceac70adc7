//! Command execution abstraction for rsimgstrap.
//!
//! This module provides:
//! - [`CommandSpec`]: Specification for commands to execute
//! - [`ExecutionResult`]: Result of command execution
//! - [`CommandExecutor`]: Trait for command execution strategies
//! - [`RealCommandExecutor`]: Production implementation using `std::process::Command`
//! - [`check_call`]: Runs a spec and turns any unsuccessful exit into a typed error

mod pipe;
mod real;

use std::process::ExitStatus;

use anyhow::Result;

use crate::environment::Environment;
use crate::error::RsimgstrapError;

pub use real::RealCommandExecutor;

/// Formats string arguments into a space-separated, debug-quoted string.
///
/// Used by error messages and dry-run output to consistently format
/// command arguments (e.g., `"chroot" "/mnt/target" "emerge"`).
pub(crate) fn format_command_args(args: &[String]) -> String {
    args.iter()
        .map(|a| format!("{:?}", a))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Specification for a command to be executed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    /// The command to execute (e.g., "chroot")
    pub command: String,
    /// Command arguments
    pub args: Vec<String>,
    /// Environment variables to set (in addition to inherited environment)
    pub env: Vec<(String, String)>,
}

impl CommandSpec {
    /// Creates a new CommandSpec with command and args
    #[must_use]
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
            env: Vec::new(),
        }
    }

    /// Creates a CommandSpec from a full argument vector (command first).
    ///
    /// Returns a validation error for an empty vector.
    pub fn from_argv(argv: &[String]) -> Result<Self, RsimgstrapError> {
        match argv.split_first() {
            Some((command, args)) => Ok(Self::new(command.clone(), args.to_vec())),
            None => Err(RsimgstrapError::Validation(
                "command vector must not be empty".to_string(),
            )),
        }
    }

    /// Adds an environment variable
    #[must_use]
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Adds multiple environment variables.
    #[must_use]
    pub fn with_envs<I, K, V>(mut self, envs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.env
            .extend(envs.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Adds every variable of an [`Environment`] overlay.
    #[must_use]
    pub fn with_environment(self, env: &Environment) -> Self {
        self.with_envs(env.iter())
    }

    /// Returns the full argument vector, command first.
    pub fn argv(&self) -> Vec<String> {
        let mut argv = Vec::with_capacity(self.args.len() + 1);
        argv.push(self.command.clone());
        argv.extend(self.args.iter().cloned());
        argv
    }
}

/// Result of command execution
#[derive(Debug)]
pub struct ExecutionResult {
    /// Exit status of the command (None in dry-run mode)
    pub status: Option<ExitStatus>,
}

impl ExecutionResult {
    /// Returns true if the command executed successfully.
    ///
    /// In dry-run mode (status is None), this always returns true.
    pub fn success(&self) -> bool {
        self.status.is_none_or(|s| s.success())
    }

    /// Returns the exit code if available
    pub fn code(&self) -> Option<i32> {
        self.status.and_then(|s| s.code())
    }
}

/// Trait for command execution.
///
/// Implementations must be `Send + Sync` so the executor can be shared as
/// `Arc<dyn CommandExecutor>` between the engine, the strategy and the
/// target filesystem of a run.
pub trait CommandExecutor: Send + Sync {
    /// Executes a command with the given specification.
    fn execute(&self, spec: &CommandSpec) -> Result<ExecutionResult>;

    /// Returns true when commands are only logged, not run.
    ///
    /// Code that writes into the target tree directly (without a command)
    /// consults this to stay side-effect free during a dry run.
    fn is_dry_run(&self) -> bool {
        false
    }
}

/// Executes `spec` and fails unless the command succeeded.
///
/// Handles three cases:
/// - Non-zero exit status: returns `Execution` error with the status and code
/// - No exit status outside dry-run mode: returns `Execution` error
/// - Success, or dry-run with no status: returns `Ok(())`
pub fn check_call(executor: &dyn CommandExecutor, spec: &CommandSpec) -> Result<()> {
    tracing::debug!("running: {}", format_command_args(&spec.argv()));
    let result = executor.execute(spec)?;
    match result.status {
        Some(status) if !status.success() => Err(RsimgstrapError::Execution {
            argv: spec.argv(),
            env: spec.env.clone(),
            status: status.to_string(),
            code: status.code(),
        }
        .into()),
        None if !executor.is_dry_run() => Err(RsimgstrapError::Execution {
            argv: spec.argv(),
            env: spec.env.clone(),
            status: "process exited without status (possibly killed by signal)".to_string(),
            code: None,
        }
        .into()),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::process::ExitStatusExt;

    struct FixedExecutor {
        status: Option<ExitStatus>,
        dry_run: bool,
    }

    impl CommandExecutor for FixedExecutor {
        fn execute(&self, _spec: &CommandSpec) -> Result<ExecutionResult> {
            Ok(ExecutionResult {
                status: self.status,
            })
        }

        fn is_dry_run(&self) -> bool {
            self.dry_run
        }
    }

    fn spec() -> CommandSpec {
        CommandSpec::new("emerge", vec!["app-admin/sudo".to_string()]).with_env("MAKEOPTS", "-j2")
    }

    #[test]
    fn check_call_success_returns_ok() {
        let executor = FixedExecutor {
            status: Some(ExitStatus::from_raw(0)),
            dry_run: false,
        };
        assert!(check_call(&executor, &spec()).is_ok());
    }

    #[test]
    fn check_call_nonzero_exit_carries_argv_env_and_code() {
        let executor = FixedExecutor {
            status: Some(ExitStatus::from_raw(3 << 8)),
            dry_run: false,
        };
        let err = check_call(&executor, &spec()).unwrap_err();
        match err.downcast_ref::<RsimgstrapError>() {
            Some(RsimgstrapError::Execution {
                argv, env, code, ..
            }) => {
                assert_eq!(argv, &vec!["emerge".to_string(), "app-admin/sudo".to_string()]);
                assert_eq!(env, &vec![("MAKEOPTS".to_string(), "-j2".to_string())]);
                assert_eq!(*code, Some(3));
            }
            other => panic!("expected Execution error, got: {:?}", other),
        }
    }

    #[test]
    fn check_call_missing_status_fails_outside_dry_run() {
        let executor = FixedExecutor {
            status: None,
            dry_run: false,
        };
        let err = check_call(&executor, &spec()).unwrap_err();
        assert!(err.to_string().contains("killed by signal"));
    }

    #[test]
    fn check_call_missing_status_is_ok_in_dry_run() {
        let executor = FixedExecutor {
            status: None,
            dry_run: true,
        };
        assert!(check_call(&executor, &spec()).is_ok());
    }

    #[test]
    fn from_argv_splits_command_and_args() {
        let argv = vec!["chroot".to_string(), "/mnt".to_string(), "ls".to_string()];
        let spec = CommandSpec::from_argv(&argv).unwrap();
        assert_eq!(spec.command, "chroot");
        assert_eq!(spec.args, vec!["/mnt", "ls"]);
        assert_eq!(spec.argv(), argv);
    }

    #[test]
    fn from_argv_rejects_empty_vector() {
        assert!(matches!(
            CommandSpec::from_argv(&[]),
            Err(RsimgstrapError::Validation(_))
        ));
    }

    #[test]
    fn format_command_args_quotes_each_argument() {
        let args = vec!["grub2-mkconfig".to_string(), "-o".to_string()];
        assert_eq!(format_command_args(&args), "\"grub2-mkconfig\" \"-o\"");
    }
}
