//! In-memory collaborators.
//!
//! Back the replay tool and tests. Nothing here talks to a network; directory
//! listings are inserted up front and redemptions get sequential ids.
//!
//! # Thread Safety
//!
//! State sits behind `RwLock`s. A poisoned lock is reported as a transport
//! failure rather than a panic.

use crate::client::{
    ClientError, DirectoryClient, DirectoryListing, IdentityProvider, SubmissionClient, UserId,
};
use crate::nonprofit::StoreId;
use crate::transaction::{Redemption, TransactionId};
use async_trait::async_trait;
use log::warn;
use std::collections::HashMap;
use std::sync::RwLock;

fn lock_error(context: &str) -> ClientError {
    ClientError::Transport(format!("in-memory lock poisoned during {}", context))
}

/// Directory answering from a fixed set of store listings.
#[derive(Default)]
pub struct InMemoryDirectory {
    listings: RwLock<HashMap<StoreId, DirectoryListing>>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces the listing for the listing's store.
    ///
    /// Listings without a store descriptor cannot be looked up and are ignored.
    pub fn insert(&self, listing: DirectoryListing) {
        let Some(store_id) = listing.store_nonprofits.store.as_ref().map(|s| s.id.clone()) else {
            return;
        };
        match self.listings.write() {
            Ok(mut listings) => {
                listings.insert(store_id, listing);
            }
            Err(_) => warn!("{}; listing for store {} dropped", lock_error("insert"), store_id),
        }
    }

    pub fn len(&self) -> usize {
        self.listings.read().map(|l| l.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl DirectoryClient for InMemoryDirectory {
    async fn fetch_eligible_nonprofits(
        &self,
        store_id: &str,
    ) -> Result<DirectoryListing, ClientError> {
        let listings = self.listings.read().map_err(|_| lock_error("fetch"))?;
        listings
            .get(store_id)
            .cloned()
            .ok_or_else(|| ClientError::NotFound(format!("store {}", store_id)))
    }
}

/// A redemption accepted by [`InMemorySubmissions`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedRedemption {
    pub id: TransactionId,
    pub redemption: Redemption,
}

#[derive(Default)]
struct Ledger {
    next_id: u64,
    redemptions: Vec<RecordedRedemption>,
    cancelled: Vec<TransactionId>,
}

/// Submission backend keeping every redemption in memory.
#[derive(Default)]
pub struct InMemorySubmissions {
    ledger: RwLock<Ledger>,
}

impl InMemorySubmissions {
    pub fn new() -> Self {
        Self::default()
    }

    /// All accepted redemptions, in submission order.
    pub fn redemptions(&self) -> Vec<RecordedRedemption> {
        self.ledger
            .read()
            .map(|l| l.redemptions.clone())
            .unwrap_or_default()
    }

    /// Redemptions that have not been cancelled.
    pub fn active(&self) -> Vec<RecordedRedemption> {
        self.ledger
            .read()
            .map(|l| {
                l.redemptions
                    .iter()
                    .filter(|r| !l.cancelled.contains(&r.id))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn cancelled(&self) -> Vec<TransactionId> {
        self.ledger
            .read()
            .map(|l| l.cancelled.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl SubmissionClient for InMemorySubmissions {
    async fn redeem(&self, redemption: &Redemption) -> Result<TransactionId, ClientError> {
        let mut ledger = self.ledger.write().map_err(|_| lock_error("redeem"))?;
        ledger.next_id += 1;
        let id = TransactionId(ledger.next_id);
        ledger.redemptions.push(RecordedRedemption {
            id,
            redemption: redemption.clone(),
        });
        Ok(id)
    }

    async fn cancel(&self, id: TransactionId) -> Result<(), ClientError> {
        let mut ledger = self.ledger.write().map_err(|_| lock_error("cancel"))?;
        if !ledger.redemptions.iter().any(|r| r.id == id) {
            return Err(ClientError::NotFound(format!("transaction {}", id)));
        }
        if !ledger.cancelled.contains(&id) {
            ledger.cancelled.push(id);
        }
        Ok(())
    }
}

/// Identity provider with a fixed user that records registrations.
#[derive(Default)]
pub struct StaticIdentity {
    user_id: Option<UserId>,
    registrations: RwLock<Vec<HashMap<String, String>>>,
}

impl StaticIdentity {
    pub fn new(user_id: Option<&str>) -> Self {
        StaticIdentity {
            user_id: user_id.map(|id| UserId(id.to_string())),
            registrations: RwLock::new(Vec::new()),
        }
    }

    /// Attribute sets passed to `register`, oldest first.
    pub fn registrations(&self) -> Vec<HashMap<String, String>> {
        self.registrations
            .read()
            .map(|r| r.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl IdentityProvider for StaticIdentity {
    fn current_user_id(&self) -> Option<UserId> {
        self.user_id.clone()
    }

    async fn register(
        &self,
        _user_id: Option<UserId>,
        attributes: HashMap<String, String>,
    ) -> Result<(), ClientError> {
        let mut registrations = self
            .registrations
            .write()
            .map_err(|_| lock_error("register"))?;
        registrations.push(attributes);
        Ok(())
    }
}
