//! Error types for the pac-e2e harness.

use std::time::Duration;
use thiserror::Error;

use crate::provider::ProviderKind;

/// Top-level error type for harness operations.
#[derive(Error, Debug)]
pub enum Error {
    /// One or more required environment variables are unset or empty.
    #[error("missing required environment variables: {}", .0.join(", "))]
    MissingEnv(Vec<String>),

    /// Malformed configuration input.
    #[error("configuration error: {0}")]
    Config(String),

    /// The provider rejected the configured credentials.
    #[error("{provider} authentication failed: {reason}")]
    Auth { provider: ProviderKind, reason: String },

    /// A provider API call failed.
    #[error("{provider} {operation} failed: {reason}")]
    Provider {
        provider: ProviderKind,
        operation: &'static str,
        /// HTTP status, when the request reached the provider.
        status: Option<u16>,
        reason: String,
    },

    /// A cluster API call failed.
    #[error("cluster {operation} on {object} failed: {reason}")]
    Cluster {
        operation: &'static str,
        object: String,
        reason: String,
    },

    /// Observation did not conclude within its bound.
    #[error("observation timed out after {0:?}")]
    Timeout(Duration),

    /// IO error while loading fixtures or configuration.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Returns true for errors raised before any resource could exist.
    pub fn is_setup(&self) -> bool {
        matches!(
            self,
            Error::MissingEnv(_) | Error::Config(_) | Error::Auth { .. }
        )
    }

    /// HTTP status of a failed provider call, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Error::Provider { status, .. } => *status,
            _ => None,
        }
    }
}

/// Result type alias for harness operations.
pub type Result<T> = std::result::Result<T, Error>;
