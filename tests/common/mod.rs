//! Shared collaborator mocks for the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use donation_kit::{
    Amount, ClientError, DirectoryClient, DirectoryListing, IdentityProvider, Nonprofit,
    Redemption, SdkConfig, Store, StoreNonprofits, SubmissionClient, TransactionCoordinator,
    TransactionId, UserId,
};
use std::collections::{HashMap, VecDeque};
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

pub fn amt(s: &str) -> Amount {
    Amount::from_str(s).unwrap()
}

pub fn nonprofit(id: u32) -> Nonprofit {
    Nonprofit::new(id, format!("Nonprofit {}", id))
}

/// Listing for `store_id` with nonprofits `ids` and an optional last nonprofit.
pub fn listing(store_id: &str, ids: &[u32], last: Option<u32>, can_match: bool) -> DirectoryListing {
    let mut store_nonprofits =
        StoreNonprofits::new(Store::new(store_id), ids.iter().map(|&id| nonprofit(id)).collect());
    store_nonprofits.last_nonprofit = last.map(nonprofit);
    DirectoryListing {
        store_nonprofits,
        can_match,
    }
}

/// Directory that counts lookups, fails on demand and can hold requests open.
#[derive(Default)]
pub struct MockDirectory {
    listings: Mutex<HashMap<String, DirectoryListing>>,
    failure: Mutex<Option<ClientError>>,
    gate: Mutex<Option<Arc<Notify>>>,
    calls: AtomicUsize,
}

impl MockDirectory {
    pub fn with(listing: DirectoryListing) -> Self {
        let directory = MockDirectory::default();
        directory.add(listing);
        directory
    }

    pub fn add(&self, listing: DirectoryListing) {
        let id = listing
            .store_nonprofits
            .store
            .as_ref()
            .map(|s| s.id.clone())
            .unwrap_or_default();
        self.listings.lock().unwrap().insert(id, listing);
    }

    /// Every lookup fails with `error` until cleared.
    pub fn fail_with(&self, error: Option<ClientError>) {
        *self.failure.lock().unwrap() = error;
    }

    /// Lookups wait for a notification on the returned handle before answering.
    pub fn gate(&self) -> Arc<Notify> {
        let notify = Arc::new(Notify::new());
        *self.gate.lock().unwrap() = Some(Arc::clone(&notify));
        notify
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DirectoryClient for MockDirectory {
    async fn fetch_eligible_nonprofits(
        &self,
        store_id: &str,
    ) -> Result<DirectoryListing, ClientError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let gate = self.gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        if let Some(error) = self.failure.lock().unwrap().clone() {
            return Err(error);
        }
        self.listings
            .lock()
            .unwrap()
            .get(store_id)
            .cloned()
            .ok_or_else(|| ClientError::NotFound(store_id.to_string()))
    }
}

/// Submission backend that records requests and replays scripted outcomes.
///
/// Without a scripted outcome a redemption succeeds with an id equal to the
/// call count.
#[derive(Default)]
pub struct MockSubmission {
    outcomes: Mutex<VecDeque<Result<TransactionId, ClientError>>>,
    requests: Mutex<Vec<Redemption>>,
    cancelled: Mutex<Vec<TransactionId>>,
    gate: Mutex<Option<Arc<Notify>>>,
}

impl MockSubmission {
    pub fn push_outcome(&self, outcome: Result<TransactionId, ClientError>) {
        self.outcomes.lock().unwrap().push_back(outcome);
    }

    pub fn gate(&self) -> Arc<Notify> {
        let notify = Arc::new(Notify::new());
        *self.gate.lock().unwrap() = Some(Arc::clone(&notify));
        notify
    }

    pub fn requests(&self) -> Vec<Redemption> {
        self.requests.lock().unwrap().clone()
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn cancelled(&self) -> Vec<TransactionId> {
        self.cancelled.lock().unwrap().clone()
    }
}

#[async_trait]
impl SubmissionClient for MockSubmission {
    async fn redeem(&self, redemption: &Redemption) -> Result<TransactionId, ClientError> {
        let call = {
            let mut requests = self.requests.lock().unwrap();
            requests.push(redemption.clone());
            requests.len() as u64
        };
        let gate = self.gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        self.outcomes
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Ok(TransactionId(call)))
    }

    async fn cancel(&self, id: TransactionId) -> Result<(), ClientError> {
        self.cancelled.lock().unwrap().push(id);
        Ok(())
    }
}

/// Identity with an optional user whose registration can be made to fail.
#[derive(Default)]
pub struct MockIdentity {
    user: Option<UserId>,
    fail_register: bool,
    registrations: Mutex<Vec<HashMap<String, String>>>,
}

impl MockIdentity {
    pub fn user(id: &str) -> Self {
        MockIdentity {
            user: Some(UserId(id.to_string())),
            ..MockIdentity::default()
        }
    }

    pub fn anonymous() -> Self {
        MockIdentity::default()
    }

    pub fn failing_registration(mut self) -> Self {
        self.fail_register = true;
        self
    }

    pub fn registrations(&self) -> Vec<HashMap<String, String>> {
        self.registrations.lock().unwrap().clone()
    }
}

#[async_trait]
impl IdentityProvider for MockIdentity {
    fn current_user_id(&self) -> Option<UserId> {
        self.user.clone()
    }

    async fn register(
        &self,
        _user_id: Option<UserId>,
        attributes: HashMap<String, String>,
    ) -> Result<(), ClientError> {
        self.registrations.lock().unwrap().push(attributes);
        if self.fail_register {
            return Err(ClientError::Server {
                status: 500,
                message: "registration down".to_string(),
            });
        }
        Ok(())
    }
}

/// A coordinator wired to mocks, with handles to inspect them.
pub struct Harness {
    pub coordinator: TransactionCoordinator,
    pub identity: Arc<MockIdentity>,
    pub directory: Arc<MockDirectory>,
    pub submission: Arc<MockSubmission>,
}

impl Harness {
    pub fn new(directory: MockDirectory) -> Self {
        Harness::with(SdkConfig::default(), MockIdentity::user("shopper-1"), directory)
    }

    pub fn with(config: SdkConfig, identity: MockIdentity, directory: MockDirectory) -> Self {
        let identity = Arc::new(identity);
        let directory = Arc::new(directory);
        let submission = Arc::new(MockSubmission::default());
        let coordinator = TransactionCoordinator::new(
            config,
            Arc::clone(&identity) as Arc<dyn IdentityProvider>,
            Arc::clone(&directory) as Arc<dyn DirectoryClient>,
            Arc::clone(&submission) as Arc<dyn SubmissionClient>,
        );
        Harness {
            coordinator,
            identity,
            directory,
            submission,
        }
    }
}
