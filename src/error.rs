use std::path::PathBuf;

use thiserror::Error;

/// Failures of the scan agent. `ProbeFailed` stays local to one cycle
/// (logged, domain skipped); the rest bubble to the cycle scheduler or to
/// process exit.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("no configuration file at {0}, run the configurator first")]
    ConfigurationAbsent(PathBuf),

    #[error("configuration file is invalid: {0}")]
    ConfigurationInvalid(String),

    #[error("no credential stored for user '{0}', rerun the configurator")]
    CredentialMissing(String),

    #[error("credential vault unavailable: {0}")]
    VaultUnavailable(#[from] keyring::Error),

    #[error("cannot reach the inventory server: {0}")]
    ConnectionFailed(String),

    #[error("probe failed: {0}")]
    ProbeFailed(String),

    #[error("server rejected the published inventory: {0}")]
    PublishFailed(String),

    #[error("another scan agent (pid {0}) already owns the instance lock")]
    LockConflict(u32),

    #[error("configuration cancelled by the operator")]
    ConfigurationCancelled,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, AgentError>;

impl AgentError {
    /// Exit code for `main`. Duplicate-instance detection is a graceful
    /// outcome, everything else listed here is a fatal initialization error.
    pub fn exit_code(&self) -> i32 {
        match self {
            AgentError::LockConflict(_) => 0,
            _ => 1,
        }
    }
}
