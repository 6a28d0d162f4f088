//! Error types for tollgate.

use std::path::PathBuf;

use thiserror::Error;

/// Top-level error type.
///
/// Hook failures are deliberately absent: a hook exiting non-zero is an
/// outcome reported per hook, not an error that aborts its siblings.
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Malformed configuration. Fatal: nothing executes.
    ///
    /// YAML that does not parse lands here too, tagged with the file
    /// name, rather than in a bare decode error.
    #[error("configuration error: {0}")]
    Config(String),

    #[error("config file not found: {0}")]
    ConfigNotFound(PathBuf),

    /// Environment provisioning failed. Fatal for that hook only.
    #[error("failed to provision environment for hook '{hook}': {message}")]
    EnvProvision { hook: String, message: String },

    #[error("git {command} failed: {message}")]
    Git { command: String, message: String },

    #[error("not inside a git repository")]
    NotAGitRepo,

    #[error("could not acquire store lock at {path}: {message}")]
    StoreLock { path: PathBuf, message: String },

    #[error("home directory not found")]
    HomeDirNotFound,
}

impl Error {
    /// Build a configuration error from anything printable.
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    /// Build a git error for the given subcommand.
    pub fn git(command: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Git {
            command: command.into(),
            message: message.into(),
        }
    }

    /// Build a provisioning error scoped to one hook.
    pub fn provision(hook: impl Into<String>, message: impl Into<String>) -> Self {
        Error::EnvProvision {
            hook: hook.into(),
            message: message.into(),
        }
    }
}

/// Process exit codes for the `run` command.
pub mod exit {
    /// Every hook passed.
    pub const OK: i32 = 0;
    /// At least one hook failed, errored, or modified files.
    pub const FAILURE: i32 = 1;
    /// The run was aborted by Ctrl-C.
    pub const INTERRUPTED: i32 = 130;
}
