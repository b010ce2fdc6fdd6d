//! Collaborators the coordinator reaches the backend through.
//!
//! Transport, serialization and identity linking live behind these traits; the
//! coordinator only sees their results.

use crate::nonprofit::StoreNonprofits;
use crate::transaction::{Redemption, TransactionId};
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

/// Attribute key carrying the shopper's email when registering a user.
pub const USER_EMAIL_KEY: &str = "user_email";

/// Shopper identity as known to the backend.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UserId(pub String);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Failures reported by collaborator implementations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    /// Connection refused, reset, DNS failure.
    #[error("transport error: {0}")]
    Transport(String),

    #[error("request timed out")]
    Timeout,

    /// Response body could not be decoded.
    #[error("malformed response: {0}")]
    Decode(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("server error {status}: {message}")]
    Server { status: u16, message: String },
}

/// Directory answer for one store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryListing {
    pub store_nonprofits: StoreNonprofits,
    /// Whether the store offers cause matching.
    pub can_match: bool,
}

/// Looks up the nonprofits eligible at a store.
#[async_trait]
pub trait DirectoryClient: Send + Sync {
    async fn fetch_eligible_nonprofits(
        &self,
        store_id: &str,
    ) -> std::result::Result<DirectoryListing, ClientError>;
}

/// Registers and cancels redemptions server-side.
#[async_trait]
pub trait SubmissionClient: Send + Sync {
    async fn redeem(
        &self,
        redemption: &Redemption,
    ) -> std::result::Result<TransactionId, ClientError>;

    async fn cancel(&self, id: TransactionId) -> std::result::Result<(), ClientError>;
}

/// Process-wide shopper identity.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    fn current_user_id(&self) -> Option<UserId>;

    /// Links identity attributes (e.g. an email) to a user. Callers treat this as
    /// best effort.
    async fn register(
        &self,
        user_id: Option<UserId>,
        attributes: HashMap<String, String>,
    ) -> std::result::Result<(), ClientError>;
}
