//! Error types and handling for the call engine
//!
//! This module defines the error enum used by the orchestration layer and
//! the closed taxonomy of call-termination reasons.
//!
//! # Error Philosophy
//!
//! Call-flow failures are never surfaced as `Err` values. A dial that no
//! backend can route returns `false`; a call that fails after setup ends
//! with a `CallCleared` (or `CallMissed`) event carrying a
//! [`ClearedReason`]. The [`CoreError`] enum exists for genuine API misuse
//! and configuration problems only: unknown call ids, duplicate manager
//! registration, malformed configuration values, and so on.

use thiserror::Error;
use uuid::Uuid;

/// Result type alias for call-engine operations
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors raised by the orchestration layer
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// Call registry errors
    #[error("call not found: {call_id}")]
    CallNotFound { call_id: Uuid },

    #[error("call already registered: {call_id}")]
    CallAlreadyRegistered { call_id: Uuid },

    /// Manager registry errors
    #[error("no manager registered for protocol: {protocol}")]
    ManagerNotFound { protocol: String },

    #[error("manager already registered for protocol: {protocol}")]
    ManagerAlreadyRegistered { protocol: String },

    /// Lifecycle errors
    #[error("call core is not running")]
    NotRunning,

    #[error("call core is already running")]
    AlreadyRunning,

    /// Configuration errors
    #[error("invalid configuration: {field} - {reason}")]
    InvalidConfiguration { field: String, reason: String },

    #[error("unknown configuration key: {key}")]
    UnknownConfigurationKey { key: String },

    #[error("invalid codec entry: {entry}")]
    InvalidCodecEntry { entry: String },

    /// Generic errors
    #[error("internal error: {message}")]
    InternalError { message: String },
}

impl CoreError {
    /// Create an invalid configuration error
    pub fn invalid_configuration(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidConfiguration {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Create an invalid codec entry error
    pub fn invalid_codec_entry(entry: impl Into<String>) -> Self {
        Self::InvalidCodecEntry { entry: entry.into() }
    }

    /// Create an internal error
    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::InternalError { message: message.into() }
    }

    /// Coarse error category, useful for metrics and log grouping
    pub fn category(&self) -> &'static str {
        match self {
            CoreError::CallNotFound { .. } | CoreError::CallAlreadyRegistered { .. } => "call",
            CoreError::ManagerNotFound { .. } | CoreError::ManagerAlreadyRegistered { .. } => {
                "manager"
            }
            CoreError::NotRunning | CoreError::AlreadyRunning => "lifecycle",
            CoreError::InvalidConfiguration { .. }
            | CoreError::UnknownConfigurationKey { .. }
            | CoreError::InvalidCodecEntry { .. } => "configuration",
            CoreError::InternalError { .. } => "internal",
        }
    }
}

/// Why a call terminated
///
/// A closed taxonomy instead of free-text reason strings, so subscribers
/// can match on the cause while UIs render the `Display` text verbatim.
/// Protocol backends that need to surface an arbitrary stack-specific
/// message use the `Other` escape hatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClearedReason {
    /// The local user ended or cancelled the call
    LocalHangup,
    /// The remote party rejected or ended the call
    RemoteReject,
    /// The call was not answered within the configured delay
    Timeout,
    /// Transport or network failure
    NetworkFailure,
    /// The call was forwarded to another party
    Forwarded,
    /// Backend-specific reason, surfaced verbatim
    Other(String),
}

impl std::fmt::Display for ClearedReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClearedReason::LocalHangup => write!(f, "cancelled by user"),
            ClearedReason::RemoteReject => write!(f, "rejected by remote party"),
            ClearedReason::Timeout => write!(f, "no answer"),
            ClearedReason::NetworkFailure => write!(f, "network failure"),
            ClearedReason::Forwarded => write!(f, "call forwarded"),
            ClearedReason::Other(detail) => write!(f, "{}", detail),
        }
    }
}
