//! Structured error types for Nudge
//!
//! Every failure a turn can run into maps onto one of four classes. Only
//! `StoreUnavailable` is meant to abort a turn; the others are recovered
//! into a reply (or silently dropped for system-origin events).

use thiserror::Error;

use crate::store::StorageError;
use crate::transport::TransportError;

/// Primary error type for Nudge operations
#[derive(Error, Debug)]
pub enum NudgeError {
    // =========================================================================
    // Command Errors
    // =========================================================================
    /// A keyword was given without its required argument, or an event
    /// payload did not match its schema
    #[error("malformed command: {message}")]
    MalformedCommand { message: String, usage: &'static str },

    // =========================================================================
    // Registry Errors
    // =========================================================================
    /// Username has no registry entry
    #[error("unknown user: {username}")]
    UnknownUser { username: String },

    // =========================================================================
    // Delivery Errors
    // =========================================================================
    /// The stored session could not be resumed, or the resumed send failed
    #[error("delivery to {username} failed: {reason}")]
    DeliveryFailed { username: String, reason: String },

    // =========================================================================
    // Storage Errors
    // =========================================================================
    /// Registry store load, save or commit failed
    #[error("registry store unavailable: {0}")]
    StoreUnavailable(#[from] StorageError),
}

impl NudgeError {
    pub fn malformed(message: impl Into<String>, usage: &'static str) -> Self {
        Self::MalformedCommand {
            message: message.into(),
            usage,
        }
    }

    pub fn unknown_user(username: impl Into<String>) -> Self {
        Self::UnknownUser {
            username: username.into(),
        }
    }

    pub fn delivery_failed(username: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::DeliveryFailed {
            username: username.into(),
            reason: reason.into(),
        }
    }

    /// Whether the error should end up in the requesting turn's reply
    /// rather than failing the turn
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Self::StoreUnavailable(_))
    }

    /// Get a user-friendly error message
    pub fn user_message(&self) -> String {
        match self {
            Self::MalformedCommand { usage, .. } => format!("Usage: {}", usage),
            Self::UnknownUser { username } => {
                format!("User '{}' is not registered. Ask them to send 'reg {}' first.", username, username)
            }
            Self::DeliveryFailed { username, reason } => {
                format!("Could not deliver to '{}': {}", username, reason)
            }
            Self::StoreUnavailable(_) => {
                "The registry is temporarily unavailable. Please try again later.".to_string()
            }
        }
    }
}

impl From<(String, TransportError)> for NudgeError {
    fn from((username, err): (String, TransportError)) -> Self {
        Self::DeliveryFailed {
            username,
            reason: err.to_string(),
        }
    }
}

/// Result type alias using NudgeError
pub type Result<T> = std::result::Result<T, NudgeError>;
