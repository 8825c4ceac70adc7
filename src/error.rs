//! Domain-specific error types for rsimgstrap.
//!
//! This module defines `RsimgstrapError`, a `thiserror`-based enum that
//! provides typed error variants for the failure modes of an image build.
//! Public API functions return `Result<T, RsimgstrapError>` for programmatic
//! error handling, while trait boundaries (strategies, executors, target
//! filesystems) use `anyhow::Result` so that phase context can be layered on.
//!
//! `RsimgstrapError` implements `Into<anyhow::Error>`, so the `?` operator
//! converts it automatically, and `anyhow::Error::downcast_ref` recovers the
//! typed variant through any amount of added context.

use std::io;

use crate::executor::format_command_args;

/// Formats an IO error kind into a human-readable message.
///
/// Provides consistent, user-friendly messages for common IO error kinds
/// (e.g., "I/O error: not found") instead of the OS-level messages
/// (e.g., "No such file or directory (os error 2)"). For unrecognized
/// error kinds, falls back to including the OS-level error message.
pub(crate) fn io_error_kind_message(err: &io::Error) -> String {
    match err.kind() {
        io::ErrorKind::NotFound => "I/O error: not found".to_string(),
        io::ErrorKind::PermissionDenied => "I/O error: permission denied".to_string(),
        io::ErrorKind::IsADirectory => "I/O error: is a directory".to_string(),
        io::ErrorKind::AlreadyExists => "I/O error: already exists".to_string(),
        _ => format!("I/O error: {}", err),
    }
}

/// Formats an environment overlay as `KEY=value` pairs.
fn format_env(env: &[(String, String)]) -> String {
    if env.is_empty() {
        return "(inherited)".to_string();
    }
    env.iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(" ")
}

fn join_commands(commands: &[String]) -> String {
    commands.join(", ")
}

/// Domain-specific error type for rsimgstrap.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum RsimgstrapError {
    /// A validation constraint was violated.
    #[error("validation error: {0}")]
    Validation(String),

    /// One or more external binaries required by the build are absent from `PATH`.
    ///
    /// Raised by the pre-flight check, before anything is written.
    #[error("missing dependency: command(s) not found in PATH: {}", join_commands(.commands))]
    MissingDependency {
        /// Every command that could not be located.
        commands: Vec<String>,
    },

    /// A single command could not be located when it was about to be executed.
    #[error("command not found in PATH: {command}")]
    CommandNotFound {
        /// The command name that was looked up.
        command: String,
    },

    /// An external command failed (non-zero exit, spawn failure, wait failure, etc.).
    #[error(
        "command execution failed: {}: {status} (env: {})",
        format_command_args(.argv),
        format_env(.env)
    )]
    Execution {
        /// Full argument vector, command name first.
        argv: Vec<String>,
        /// Environment overlay the command was started with.
        env: Vec<(String, String)>,
        /// Human-readable reason: exit status, signal, or internal failure.
        status: String,
        /// Exit code, when the process exited normally.
        code: Option<i32>,
    },

    /// A chroot mount operation failed.
    #[error("isolation error: {0}")]
    Isolation(String),

    /// A profile could not be loaded or parsed.
    #[error("configuration error: {0}")]
    Config(String),

    /// An I/O operation failed with contextual information.
    #[error("{context}: {message}")]
    Io {
        /// What was being done when the error occurred (usually includes a path).
        context: String,
        /// Description derived from [`io_error_kind_message`].
        message: String,
        /// The underlying I/O error, preserved for programmatic inspection.
        #[source]
        source: std::io::Error,
    },
}

impl RsimgstrapError {
    /// Creates an `Io` variant with the `message` field derived from `source`.
    pub(crate) fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            message: io_error_kind_message(&source),
            source,
        }
    }

    /// Returns the exit code carried by an `Execution` error, if any.
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            Self::Execution { code, .. } => *code,
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_display() {
        let err = RsimgstrapError::Validation("hostname must not be empty".to_string());
        assert_eq!(err.to_string(), "validation error: hostname must not be empty");
    }

    #[test]
    fn test_missing_dependency_display_lists_all_commands() {
        let err = RsimgstrapError::MissingDependency {
            commands: vec!["curl".to_string(), "parted".to_string()],
        };
        assert_eq!(
            err.to_string(),
            "missing dependency: command(s) not found in PATH: curl, parted"
        );
    }

    #[test]
    fn test_execution_display_includes_argv_and_env() {
        let err = RsimgstrapError::Execution {
            argv: vec![
                "chroot".to_string(),
                "/mnt/target".to_string(),
                "emerge".to_string(),
            ],
            env: vec![("MAKEOPTS".to_string(), "-j2".to_string())],
            status: "exit status: 1".to_string(),
            code: Some(1),
        };
        let display = err.to_string();
        assert!(display.starts_with("command execution failed:"));
        assert!(display.contains("\"chroot\" \"/mnt/target\" \"emerge\""));
        assert!(display.contains("exit status: 1"));
        assert!(display.contains("MAKEOPTS=-j2"));
        assert_eq!(err.exit_code(), Some(1));
    }

    #[test]
    fn test_execution_display_without_env() {
        let err = RsimgstrapError::Execution {
            argv: vec!["tar".to_string()],
            env: vec![],
            status: "exit status: 2".to_string(),
            code: Some(2),
        };
        assert!(err.to_string().contains("(env: (inherited))"));
    }

    #[test]
    fn test_command_not_found_display() {
        let err = RsimgstrapError::CommandNotFound {
            command: "grub2-install".to_string(),
        };
        assert_eq!(err.to_string(), "command not found in PATH: grub2-install");
        assert_eq!(err.exit_code(), None);
    }

    #[test]
    fn test_io_display() {
        let source = io::Error::new(io::ErrorKind::NotFound, "entity not found");
        let err = RsimgstrapError::io("/etc/resolv.conf", source);
        assert_eq!(err.to_string(), "/etc/resolv.conf: I/O error: not found");
    }

    #[test]
    fn test_io_source_preserved() {
        let source = io::Error::new(io::ErrorKind::PermissionDenied, "access denied");
        let err = RsimgstrapError::io("/mnt/target/etc", source);
        match &err {
            RsimgstrapError::Io { source, .. } => {
                assert_eq!(source.kind(), io::ErrorKind::PermissionDenied);
            }
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_io_error_kind_message_other() {
        let err = io::Error::new(io::ErrorKind::ConnectionRefused, "connection refused");
        assert!(io_error_kind_message(&err).starts_with("I/O error: "));
    }

    #[test]
    fn test_into_anyhow_error_survives_context() {
        let err = RsimgstrapError::Validation("test".to_string());
        let anyhow_err: anyhow::Error = anyhow::Error::from(err).context("kernel phase failed");
        let downcast = anyhow_err.downcast_ref::<RsimgstrapError>();
        assert!(matches!(downcast, Some(RsimgstrapError::Validation(_))));
    }
}
