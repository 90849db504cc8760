//! Domain-specific error types for imgcustomizer.
//!
//! This module defines `CustomizeError`, a `thiserror`-based enum that
//! provides typed error variants for the failure modes of an image
//! customization run. Public API functions return
//! `Result<T, CustomizeError>` for programmatic error handling, while trait
//! boundaries and the pipeline use `anyhow::Result` with added context.
//!
//! `CustomizeError` implements `Into<anyhow::Error>`, so the `?` operator
//! converts it automatically, and `downcast_ref` still finds it after
//! `.context(...)` has been attached.

use std::io;

/// Formats an IO error kind into a human-readable message.
///
/// Provides consistent messages for common IO error kinds
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

/// Domain-specific error type for imgcustomizer.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum CustomizeError {
    /// A mount or unmount could not be performed.
    #[error("mount error: {0}")]
    Mount(String),

    /// A file could not be copied into the image.
    #[error("file copy failed: {context}: {message}")]
    FileCopy {
        /// Source and destination of the failed copy.
        context: String,
        /// Human-readable description derived from `source`.
        message: String,
        #[source]
        source: io::Error,
    },

    /// A customization script exited non-zero or could not be launched.
    #[error("script execution failed: {script}: {status}")]
    ScriptExecution {
        /// Script path as configured (relative to the config directory).
        script: String,
        /// Exit status or launch failure description.
        status: String,
    },

    /// The package-management collaborator failed.
    #[error("package operation failed: {0}")]
    PackageOperation(String),

    /// A configuration file inside the image (hostname, resolv.conf) could not be written.
    #[error("config write failed: {context}: {message}")]
    ConfigWrite {
        /// What was being written.
        context: String,
        /// Human-readable description derived from `source`.
        message: String,
        #[source]
        source: io::Error,
    },

    /// A command execution failed (non-zero exit, spawn failure, wait failure, thread panic, etc.).
    #[error("command execution failed: {command}: {status}")]
    Execution {
        /// The command that was executed.
        command: String,
        /// Exit code, signal information, or a description of the internal error.
        status: String,
    },

    /// The command could not be found in `PATH`.
    #[error("command not found in PATH: {command}")]
    CommandNotFound {
        /// The command name that was looked up.
        command: String,
    },

    /// A chroot or root-redirection operation failed.
    #[error("isolation error: {0}")]
    Isolation(String),

    /// A validation constraint was violated.
    #[error("validation error: {0}")]
    Validation(String),

    /// A configuration file could not be loaded or parsed.
    #[error("configuration error: {0}")]
    Config(String),

    /// A blob storage transfer failed.
    #[error("storage error: {0}")]
    Storage(String),

    /// An I/O operation failed with contextual information.
    #[error("{context}: {message}")]
    Io {
        /// What was being done when the error occurred.
        context: String,
        /// Human-readable description derived from [`io_error_kind_message`].
        message: String,
        #[source]
        source: io::Error,
    },
}

impl CustomizeError {
    /// Creates an `Io` variant with the `message` derived from `source`.
    pub(crate) fn io(context: impl Into<String>, source: io::Error) -> Self {
        Self::Io {
            context: context.into(),
            message: io_error_kind_message(&source),
            source,
        }
    }

    /// Creates a `FileCopy` variant with the `message` derived from `source`.
    pub(crate) fn file_copy(context: impl Into<String>, source: io::Error) -> Self {
        Self::FileCopy {
            context: context.into(),
            message: io_error_kind_message(&source),
            source,
        }
    }

    /// Creates a `ConfigWrite` variant with the `message` derived from `source`.
    pub(crate) fn config_write(context: impl Into<String>, source: io::Error) -> Self {
        Self::ConfigWrite {
            context: context.into(),
            message: io_error_kind_message(&source),
            source,
        }
    }

    /// Creates an `Execution` variant from a command line and status description.
    pub(crate) fn execution(command: &[String], status: impl Into<String>) -> Self {
        Self::Execution {
            command: crate::executor::format_command_args(command),
            status: status.into(),
        }
    }
}
