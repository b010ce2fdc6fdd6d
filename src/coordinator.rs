//! Transaction lifecycle coordinator.
//!
//! Owns the single current-transaction slot, performs every directory and
//! submission round-trip of the donation flow and publishes each state change to
//! subscribers. All state lives behind one mutex that is only ever held inside
//! short synchronous sections, never across an `.await`; each network completion
//! re-enters a section and checks the transaction key before applying anything.

use crate::amount::Amount;
use crate::client::{
    DirectoryClient, DirectoryListing, IdentityProvider, SubmissionClient, USER_EMAIL_KEY,
};
use crate::config::SdkConfig;
use crate::error::{DonationError, Result};
use crate::nonprofit::NonprofitId;
use crate::transaction::{Redemption, Transaction, TransactionId, TransactionKey, ViewKind};
use log::{debug, info, warn};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::runtime::Handle;
use tokio::sync::watch;

/// Where the flow stands, derived from the current slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// No current transaction.
    Idle,
    /// A begin request is outstanding.
    Fetching,
    /// A transaction exists and nothing has been picked explicitly.
    Ready,
    /// The shopper actively picked a nonprofit.
    NonprofitChosen,
    /// A redemption request is outstanding.
    Redeeming,
    /// The current transaction was redeemed.
    Redeemed,
}

/// What subscribers see after every change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowSnapshot {
    pub phase: Phase,
    pub transaction: Option<Transaction>,
}

#[derive(Debug, Default)]
struct FlowState {
    current: Option<Transaction>,
    fetching: bool,
    next_key: u64,
    /// Bumped whenever the flow is torn down; an outstanding begin started under
    /// an older epoch must not install its transaction.
    epoch: u64,
}

impl FlowState {
    fn allocate_key(&mut self) -> TransactionKey {
        self.next_key += 1;
        TransactionKey(self.next_key)
    }

    /// The current transaction, if it is the one identified by `key`.
    fn current_mut(&mut self, key: TransactionKey) -> Result<&mut Transaction> {
        match self.current.as_mut() {
            Some(tx) if tx.key() == key => Ok(tx),
            Some(tx) => Err(DonationError::invalid_configuration(format!(
                "transaction {} is no longer current (current is {})",
                key,
                tx.key()
            ))),
            None => Err(DonationError::invalid_configuration(format!(
                "no current transaction (asked for {})",
                key
            ))),
        }
    }

    /// Drops the slot and any outstanding begin.
    fn reset(&mut self) -> Option<Transaction> {
        self.epoch += 1;
        self.fetching = false;
        self.current.take()
    }

    fn phase(&self) -> Phase {
        if self.fetching {
            return Phase::Fetching;
        }
        match &self.current {
            None => Phase::Idle,
            Some(tx) if tx.is_redeemed() => Phase::Redeemed,
            Some(tx) if tx.redemption_in_flight() => Phase::Redeeming,
            Some(tx) if tx.chosen_nonprofit().is_some() => Phase::NonprofitChosen,
            Some(_) => Phase::Ready,
        }
    }

    fn snapshot(&self) -> FlowSnapshot {
        FlowSnapshot {
            phase: self.phase(),
            transaction: self.current.clone(),
        }
    }
}

struct Inner {
    config: SdkConfig,
    identity: Arc<dyn IdentityProvider>,
    directory: Arc<dyn DirectoryClient>,
    submission: Arc<dyn SubmissionClient>,
    state: Mutex<FlowState>,
    updates: watch::Sender<FlowSnapshot>,
}

/// Coordinates one donation transaction per checkout.
///
/// Create one per SDK session and hand clones to whatever needs the flow; all
/// clones share the same slot. The presentation layer reads snapshots through
/// [`current`](Self::current) or [`subscribe`](Self::subscribe) and drives the
/// flow through the async operations.
///
/// # Sequencing
///
/// - A second begin while one is outstanding is rejected with
///   [`DonationError::BeginInProgress`].
/// - A second redeem while one is outstanding is rejected with
///   [`DonationError::RedemptionInProgress`]; a redeem of an already redeemed
///   transaction returns it unchanged without contacting the backend.
/// - A completion for a transaction that has since been replaced is not applied.
/// - A begin outstanding across [`shutdown`](Self::shutdown) or
///   [`cancel_current`](Self::cancel_current) fails and leaves the slot empty.
#[derive(Clone)]
pub struct TransactionCoordinator {
    inner: Arc<Inner>,
}

enum RedeemStep {
    AlreadyRedeemed(Transaction),
    Submit(Redemption, Transaction),
}

impl TransactionCoordinator {
    pub fn new(
        config: SdkConfig,
        identity: Arc<dyn IdentityProvider>,
        directory: Arc<dyn DirectoryClient>,
        submission: Arc<dyn SubmissionClient>,
    ) -> Self {
        let (updates, _) = watch::channel(FlowState::default().snapshot());
        TransactionCoordinator {
            inner: Arc::new(Inner {
                config,
                identity,
                directory,
                submission,
                state: Mutex::new(FlowState::default()),
                updates,
            }),
        }
    }

    pub fn config(&self) -> &SdkConfig {
        &self.inner.config
    }

    /// Starts a transaction for a checkout at `store_id`.
    ///
    /// With `user_email`, identity registration is kicked off in the background
    /// once a user is known; its outcome does not affect the transaction. With `force_match` in
    /// the staging environment, matching is offered regardless of the store.
    ///
    /// Returns the screen to open: [`ViewKind::Widget`] when the shopper has a
    /// nonprofit from a previous visit, else [`ViewKind::FullChooser`]. On failure
    /// the current slot is left as it was.
    pub async fn begin_transaction(
        &self,
        store_id: &str,
        cart_amount: Amount,
        force_match: bool,
        user_email: Option<&str>,
    ) -> Result<ViewKind> {
        let transaction = self
            .start_transaction(store_id, cart_amount, force_match, false, user_email)
            .await?;
        Ok(transaction.view_kind())
    }

    /// Starts a transaction before the cart amount is known.
    ///
    /// The transaction carries the configured placeholder amount and cannot be
    /// redeemed until [`reconcile_amount`](Self::reconcile_amount) supplies the
    /// real one.
    pub async fn begin_proxy_transaction(&self, store_id: &str) -> Result<Transaction> {
        let amount = self.inner.config.proxy_amount;
        self.start_transaction(store_id, amount, false, true, None)
            .await
    }

    /// Replaces a proxy transaction with one carrying the real cart amount.
    ///
    /// The replacement gets a new key; the shopper's choice and match opt-in carry
    /// over.
    pub fn reconcile_amount(&self, key: TransactionKey, cart_amount: Amount) -> Result<Transaction> {
        if cart_amount.is_negative() {
            return Err(DonationError::invalid_configuration(format!(
                "cart amount {} is negative",
                cart_amount
            )));
        }
        self.with_state(|state| {
            let proxy = state.current_mut(key)?;
            if !proxy.is_proxy() {
                return Err(DonationError::invalid_configuration(format!(
                    "transaction {} is not a proxy",
                    key
                )));
            }
            if proxy.redemption_in_flight() {
                return Err(DonationError::RedemptionInProgress);
            }
            let proxy = proxy.clone();
            let reconciled = proxy.reconciled(state.allocate_key(), cart_amount);
            debug!(
                "Reconciled proxy {} as {} with amount {}",
                key,
                reconciled.key(),
                cart_amount
            );
            state.current = Some(reconciled.clone());
            Ok(reconciled)
        })
    }

    /// Records the shopper's explicit pick.
    ///
    /// Picking the same nonprofit again is a no-op; picking a different one once a
    /// choice exists is rejected.
    pub fn choose_nonprofit(
        &self,
        key: TransactionKey,
        nonprofit_id: NonprofitId,
    ) -> Result<Transaction> {
        self.with_state(|state| {
            let tx = state.current_mut(key)?;
            Self::ensure_open(tx)?;

            match tx.chosen_nonprofit() {
                Some(chosen) if chosen.id == nonprofit_id => return Ok(tx.clone()),
                Some(chosen) => {
                    warn!(
                        "Transaction {}: nonprofit {} already chosen, rejecting {}",
                        key, chosen.id, nonprofit_id
                    );
                    return Err(DonationError::invalid_configuration(format!(
                        "nonprofit {} already chosen",
                        chosen.id
                    )));
                }
                None => {}
            }

            let listing = tx.store_nonprofits();
            let nonprofit = listing
                .find(nonprofit_id)
                .or(listing.last_nonprofit.as_ref().filter(|n| n.id == nonprofit_id))
                .cloned()
                .ok_or_else(|| {
                    DonationError::invalid_configuration(format!(
                        "nonprofit {} is not eligible for this store",
                        nonprofit_id
                    ))
                })?;

            tx.choose(nonprofit);
            debug!("Transaction {}: chose nonprofit {}", key, nonprofit_id);
            Ok(tx.clone())
        })
    }

    /// Records the shopper's match opt-in. It only takes effect if the store
    /// offers matching.
    pub fn set_user_did_match(&self, key: TransactionKey, did_match: bool) -> Result<Transaction> {
        self.with_state(|state| {
            let tx = state.current_mut(key)?;
            Self::ensure_open(tx)?;
            tx.set_user_did_match(did_match);
            if did_match && !tx.can_match() {
                debug!(
                    "Transaction {}: match opt-in recorded but store does not match",
                    key
                );
            }
            Ok(tx.clone())
        })
    }

    /// Redeems the transaction identified by `key`.
    ///
    /// Submits the chosen nonprofit, else the inherited last nonprofit. Redeeming
    /// an already redeemed transaction returns it without a second submission. On
    /// failure the transaction stays unredeemed so the caller may retry.
    pub async fn redeem(&self, key: TransactionKey) -> Result<Transaction> {
        let step = self.with_state(|state| {
            let tx = state.current_mut(key)?;
            if tx.is_redeemed() {
                return Ok(RedeemStep::AlreadyRedeemed(tx.clone()));
            }
            if tx.redemption_in_flight() {
                return Err(DonationError::RedemptionInProgress);
            }
            if tx.is_proxy() {
                return Err(DonationError::invalid_configuration(format!(
                    "proxy transaction {} must be reconciled before redemption",
                    key
                )));
            }
            let request = Redemption::for_transaction(tx).ok_or_else(|| {
                DonationError::invalid_configuration(format!(
                    "transaction {} has no nonprofit or store to redeem",
                    key
                ))
            })?;
            tx.set_redemption_in_flight(true);
            Ok(RedeemStep::Submit(request, tx.clone()))
        });

        let (request, mut submitted) = match step {
            Ok(RedeemStep::AlreadyRedeemed(tx)) => {
                debug!("Transaction {} already redeemed, not resubmitting", key);
                return Ok(tx);
            }
            Ok(RedeemStep::Submit(request, tx)) => (request, tx),
            Err(e) => {
                warn!("Transaction {}: redeem rejected: {}", key, e);
                return Err(e);
            }
        };

        debug!(
            "Transaction {}: redeeming nonprofit {} at store {} for {} (matched: {})",
            key, request.nonprofit_id, request.store_id, request.cart_amount, request.matched
        );
        let mut pending = PendingRequest::redeem(self, key);
        let response = self.inner.submission.redeem(&request).await;

        let outcome = self.with_state(|state| {
            let current = match state.current_mut(key) {
                Ok(tx) => tx,
                Err(_) => {
                    warn!(
                        "Transaction {}: redemption completed after the transaction was replaced, not applying",
                        key
                    );
                    return response
                        .map(|id| {
                            submitted.mark_redeemed(id);
                            submitted
                        })
                        .map_err(DonationError::from);
                }
            };

            match response {
                Ok(id) => {
                    current.mark_redeemed(id);
                    info!(
                        "Transaction {} redeemed as {} for nonprofit {}",
                        key, id, request.nonprofit_id
                    );
                    Ok(current.clone())
                }
                Err(e) => {
                    current.set_redemption_in_flight(false);
                    warn!("Transaction {}: redemption failed: {}", key, e);
                    Err(DonationError::from(e))
                }
            }
        });
        pending.disarm();
        outcome
    }

    /// Redeems whatever transaction is current.
    pub async fn redeem_current(&self) -> Result<Transaction> {
        let key = self.current_key()?;
        self.redeem(key).await
    }

    /// Cancels a redeemed transaction on the backend. Local state is untouched.
    pub async fn cancel_transaction(&self, id: TransactionId) -> Result<()> {
        debug!("Cancelling transaction {}", id);
        self.inner.submission.cancel(id).await.map_err(|e| {
            warn!("Cancelling transaction {} failed: {}", id, e);
            DonationError::from(e)
        })
    }

    /// Backs out of the current transaction.
    ///
    /// A redeemed transaction is cancelled on the backend first and only cleared
    /// once that succeeds; an unredeemed one is just dropped.
    pub async fn cancel_current(&self) -> Result<()> {
        let current = self.current().ok_or_else(|| {
            DonationError::invalid_configuration("no current transaction to cancel")
        })?;
        if current.redemption_in_flight() {
            return Err(DonationError::RedemptionInProgress);
        }
        if let Some(id) = current.id() {
            self.cancel_transaction(id).await?;
        }
        self.with_state(|state| {
            if state.current.as_ref().map(Transaction::key) == Some(current.key()) {
                state.reset();
                debug!("Transaction {} cleared", current.key());
            }
        });
        Ok(())
    }

    /// Snapshot of the current transaction.
    pub fn current(&self) -> Option<Transaction> {
        self.lock().current.clone()
    }

    pub fn phase(&self) -> Phase {
        self.lock().phase()
    }

    /// Receives a snapshot after every change of the flow.
    pub fn subscribe(&self) -> watch::Receiver<FlowSnapshot> {
        self.inner.updates.subscribe()
    }

    /// Drops the current transaction and any outstanding begin. Completions still
    /// in flight are discarded when they arrive.
    pub fn shutdown(&self) {
        self.with_state(|state| {
            if let Some(tx) = state.reset() {
                debug!("Shutdown discarded transaction {}", tx.key());
            }
        });
    }

    fn current_key(&self) -> Result<TransactionKey> {
        self.lock()
            .current
            .as_ref()
            .map(Transaction::key)
            .ok_or_else(|| DonationError::invalid_configuration("no current transaction"))
    }

    async fn start_transaction(
        &self,
        store_id: &str,
        cart_amount: Amount,
        force_match: bool,
        proxy: bool,
        user_email: Option<&str>,
    ) -> Result<Transaction> {
        if self.inner.identity.current_user_id().is_none() {
            warn!("Store {}: cannot begin transaction without a user", store_id);
            return Err(DonationError::InvalidUser);
        }
        if let Some(email) = user_email {
            self.register_email(email);
        }

        let epoch = self.with_state(|state| {
            if state.fetching {
                return Err(DonationError::BeginInProgress);
            }
            state.fetching = true;
            Ok(state.epoch)
        })
        .map_err(|e| {
            warn!("Store {}: begin rejected: {}", store_id, e);
            e
        })?;

        debug!("Store {}: fetching eligible nonprofits", store_id);
        let mut pending = PendingRequest::begin(self, epoch);
        let response = self.inner.directory.fetch_eligible_nonprofits(store_id).await;

        let outcome = self.with_state(|state| {
            if state.epoch != epoch {
                warn!(
                    "Store {}: directory answered after the flow was torn down, not applying",
                    store_id
                );
                return Err(DonationError::invalid_configuration(format!(
                    "begin at store {} was abandoned by shutdown or cancel",
                    store_id
                )));
            }
            state.fetching = false;
            let listing = response.map_err(|e| {
                warn!("Store {}: directory lookup failed: {}", store_id, e);
                DonationError::from(e)
            })?;
            let transaction = self.build_transaction(state, listing, cart_amount, force_match, proxy);
            if let Some(previous) = state.current.replace(transaction.clone()) {
                debug!(
                    "Transaction {} replaced by {}",
                    previous.key(),
                    transaction.key()
                );
            }
            debug!(
                "Store {}: transaction {} ready with {} nonprofits (can match: {}, proxy: {})",
                store_id,
                transaction.key(),
                transaction.store_nonprofits().nonprofits.len(),
                transaction.can_match(),
                proxy
            );
            Ok(transaction)
        });
        pending.disarm();
        outcome
    }

    fn build_transaction(
        &self,
        state: &mut FlowState,
        listing: DirectoryListing,
        cart_amount: Amount,
        force_match: bool,
        proxy: bool,
    ) -> Transaction {
        let forced = force_match && self.inner.config.environment.is_staging();
        let can_match = listing.can_match || forced;
        let transaction = Transaction::new(
            state.allocate_key(),
            listing.store_nonprofits,
            cart_amount,
            can_match,
        );
        if proxy {
            transaction.into_proxy()
        } else {
            transaction
        }
    }

    fn ensure_open(tx: &Transaction) -> Result<()> {
        if tx.redemption_in_flight() {
            return Err(DonationError::RedemptionInProgress);
        }
        if tx.is_redeemed() {
            return Err(DonationError::invalid_configuration(format!(
                "transaction {} is already redeemed",
                tx.key()
            )));
        }
        Ok(())
    }

    /// Fire-and-forget identity linking. Skipped when no Tokio runtime is
    /// available to run it on.
    fn register_email(&self, email: &str) {
        let Ok(handle) = Handle::try_current() else {
            warn!("No Tokio runtime for user registration, skipping it");
            return;
        };
        let identity = Arc::clone(&self.inner.identity);
        let user_id = identity.current_user_id();
        let attributes = HashMap::from([(USER_EMAIL_KEY.to_string(), email.to_string())]);
        handle.spawn(async move {
            match identity.register(user_id, attributes).await {
                Ok(()) => debug!("User registration completed"),
                Err(e) => warn!("User registration failed, continuing: {}", e),
            }
        });
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FlowState> {
        // Every section leaves the state consistent before it can panic.
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Runs `f` on the state and publishes the resulting snapshot if it changed.
    fn with_state<R>(&self, f: impl FnOnce(&mut FlowState) -> R) -> R {
        let mut state = self.lock();
        let result = f(&mut state);
        let snapshot = state.snapshot();
        self.inner.updates.send_if_modified(|published| {
            if *published == snapshot {
                false
            } else {
                *published = snapshot;
                true
            }
        });
        result
    }
}

/// Undoes the in-flight marker of a request whose future is dropped before it
/// completes, so the flow does not stay stuck in `Fetching` or `Redeeming`.
struct PendingRequest<'a> {
    coordinator: &'a TransactionCoordinator,
    kind: PendingKind,
    armed: bool,
}

enum PendingKind {
    Begin { epoch: u64 },
    Redeem(TransactionKey),
}

impl<'a> PendingRequest<'a> {
    fn begin(coordinator: &'a TransactionCoordinator, epoch: u64) -> Self {
        PendingRequest {
            coordinator,
            kind: PendingKind::Begin { epoch },
            armed: true,
        }
    }

    fn redeem(coordinator: &'a TransactionCoordinator, key: TransactionKey) -> Self {
        PendingRequest {
            coordinator,
            kind: PendingKind::Redeem(key),
            armed: true,
        }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for PendingRequest<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        match self.kind {
            PendingKind::Begin { epoch } => {
                warn!("Begin abandoned before the directory answered");
                self.coordinator.with_state(|state| {
                    if state.epoch == epoch {
                        state.fetching = false;
                    }
                });
            }
            PendingKind::Redeem(key) => {
                warn!("Transaction {}: redemption abandoned, outcome unknown", key);
                self.coordinator.with_state(|state| {
                    if let Ok(tx) = state.current_mut(key) {
                        tx.set_redemption_in_flight(false);
                    }
                });
            }
        }
    }
}
