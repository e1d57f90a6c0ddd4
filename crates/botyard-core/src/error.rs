//! The error kinds surfaced by the install pipeline and the supervisor.
//!
//! Adapter and registry failures (subprocess output, SQL errors, filesystem
//! errnos) are folded into one of these kinds at the component boundary and
//! carried only as a human-readable `reason`.

use std::time::Duration;

/// A classified install or lifecycle failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BotError {
    #[error("Max {max} bots allowed")]
    QuotaExceeded { max: usize },

    #[error("a bot named {name:?} already exists")]
    DuplicateName { name: String },

    #[error("invalid bot name {name:?}: {reason}")]
    InvalidName { name: String, reason: String },

    #[error("invalid bot bundle: {reason}")]
    InvalidBotBundle { reason: String },

    #[error("failed to install bot {name:?}: {reason}")]
    InstallFailed { name: String, reason: String },

    #[error("bot {name:?} not found")]
    NotFound { name: String },

    #[error("bot {name:?} is already running")]
    AlreadyRunning { name: String },

    #[error("failed to start bot {name:?}: {reason}")]
    StartFailed { name: String, reason: String },

    #[error("failed to stop bot {name:?}: {reason}")]
    StopFailed { name: String, reason: String },

    #[error("failed to delete bot {name:?}: {reason}")]
    DeleteFailed { name: String, reason: String },

    #[error("{operation} timed out after {}s", after.as_secs_f64())]
    Timeout { operation: String, after: Duration },

    /// The registry or runner could not be queried for a read-only request.
    #[error("service unavailable: {reason}")]
    Unavailable { reason: String },
}

impl BotError {
    /// Stable snake_case identifier for this kind, used in API responses.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::QuotaExceeded { .. } => "quota_exceeded",
            Self::DuplicateName { .. } => "duplicate_name",
            Self::InvalidName { .. } => "invalid_name",
            Self::InvalidBotBundle { .. } => "invalid_bot_bundle",
            Self::InstallFailed { .. } => "install_failed",
            Self::NotFound { .. } => "not_found",
            Self::AlreadyRunning { .. } => "already_running",
            Self::StartFailed { .. } => "start_failed",
            Self::StopFailed { .. } => "stop_failed",
            Self::DeleteFailed { .. } => "delete_failed",
            Self::Timeout { .. } => "timeout",
            Self::Unavailable { .. } => "unavailable",
        }
    }

    /// Whether repeating the same call unchanged is safe.
    ///
    /// Stop and delete are idempotent, and a failed or timed-out start never
    /// records partial state, so those are always retryable. `AlreadyRunning`
    /// means the desired state already holds. Quota, naming and bundle errors
    /// will fail identically until the caller changes something.
    pub fn retry_safe(&self) -> bool {
        match self {
            Self::QuotaExceeded { .. }
            | Self::DuplicateName { .. }
            | Self::InvalidName { .. }
            | Self::InvalidBotBundle { .. }
            | Self::NotFound { .. } => false,
            Self::InstallFailed { .. }
            | Self::AlreadyRunning { .. }
            | Self::StartFailed { .. }
            | Self::StopFailed { .. }
            | Self::DeleteFailed { .. }
            | Self::Timeout { .. }
            | Self::Unavailable { .. } => true,
        }
    }

    pub(crate) fn not_found(name: &str) -> Self {
        Self::NotFound {
            name: name.to_owned(),
        }
    }

    pub(crate) fn unavailable(reason: impl std::fmt::Display) -> Self {
        Self::Unavailable {
            reason: reason.to_string(),
        }
    }

    pub(crate) fn install_failed(name: &str, reason: impl std::fmt::Display) -> Self {
        Self::InstallFailed {
            name: name.to_owned(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn start_failed(name: &str, reason: impl std::fmt::Display) -> Self {
        Self::StartFailed {
            name: name.to_owned(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn stop_failed(name: &str, reason: impl std::fmt::Display) -> Self {
        Self::StopFailed {
            name: name.to_owned(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn delete_failed(name: &str, reason: impl std::fmt::Display) -> Self {
        Self::DeleteFailed {
            name: name.to_owned(),
            reason: reason.to_string(),
        }
    }
}
