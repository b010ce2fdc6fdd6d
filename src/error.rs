//! Error types for the donation flow.

use crate::client::ClientError;
use thiserror::Error;

/// Result type alias for coordinator operations
pub type Result<T> = std::result::Result<T, DonationError>;

/// What went wrong talking to the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Transport,
    Timeout,
    Decode,
    Unauthorized,
    NotFound,
    Server,
}

/// Errors surfaced to callers of the coordinator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DonationError {
    /// No shopper identity is available
    #[error("no user identity available")]
    InvalidUser,

    /// The transaction cannot be acted on as asked
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// A directory or submission request failed
    #[error("service failure ({kind:?}): {message}")]
    Service {
        kind: FailureKind,
        message: String,
        /// HTTP-like status for server failures.
        status: Option<u16>,
    },

    /// A begin request is already outstanding
    #[error("a transaction is already being started")]
    BeginInProgress,

    /// A redemption for the current transaction is already outstanding
    #[error("redemption already in progress")]
    RedemptionInProgress,
}

impl DonationError {
    pub(crate) fn invalid_configuration(message: impl Into<String>) -> Self {
        DonationError::InvalidConfiguration(message.into())
    }

    /// Whether repeating the same call may succeed.
    ///
    /// Transport hiccups, timeouts and 5xx responses are worth retrying; bad
    /// payloads, auth failures and caller mistakes are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            DonationError::Service { kind, status, .. } => match kind {
                FailureKind::Transport | FailureKind::Timeout => true,
                FailureKind::Server => status.map(|s| s >= 500).unwrap_or(true),
                FailureKind::Decode | FailureKind::Unauthorized | FailureKind::NotFound => false,
            },
            DonationError::BeginInProgress | DonationError::RedemptionInProgress => true,
            DonationError::InvalidUser | DonationError::InvalidConfiguration(_) => false,
        }
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            DonationError::Service { kind, .. } => Some(*kind),
            _ => None,
        }
    }
}

/// Errors from the checkout replay tool.
#[derive(Error, Debug)]
pub enum ReplayError {
    /// Failed to open or read an input file
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// CSV parsing error
    #[error("CSV parsing error: {0}")]
    Csv(#[from] csv::Error),

    /// Invalid directory record
    #[error("Invalid directory record at row {row}: {message}")]
    InvalidRecord { row: usize, message: String },

    /// Invalid SDK settings
    #[error("Configuration error: {0}")]
    Config(#[from] DonationError),

    /// Missing input file arguments
    #[error("Missing input file argument. Usage: donation-kit <directory.csv> <checkout.csv>")]
    MissingArgument,
}

impl From<ClientError> for DonationError {
    fn from(error: ClientError) -> Self {
        let message = error.to_string();
        let (kind, status) = match error {
            ClientError::Transport(_) => (FailureKind::Transport, None),
            ClientError::Timeout => (FailureKind::Timeout, None),
            ClientError::Decode(_) => (FailureKind::Decode, None),
            ClientError::Unauthorized => (FailureKind::Unauthorized, Some(401)),
            ClientError::NotFound(_) => (FailureKind::NotFound, Some(404)),
            ClientError::Server { status, .. } => (FailureKind::Server, Some(status)),
        };
        DonationError::Service {
            kind,
            message,
            status,
        }
    }
}
