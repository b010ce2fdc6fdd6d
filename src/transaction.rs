//! The donation-in-progress entity and the redemption request built from it.

use crate::amount::Amount;
use crate::nonprofit::{Nonprofit, NonprofitId, StoreId, StoreNonprofits};
use std::fmt;

/// Slot every redemption is submitted in. Only single-nonprofit redemption exists.
pub const REDEMPTION_POSITION: u8 = 1;

/// Coordinator-local identity of a transaction, assigned at creation.
///
/// Completions compare keys before touching the current transaction, so a
/// response for a transaction that has since been replaced is never applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TransactionKey(pub(crate) u64);

impl fmt::Display for TransactionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Backend-assigned identifier of a redeemed transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TransactionId(pub u64);

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which screen the presentation layer should open for a new transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewKind {
    /// The shopper has to pick a nonprofit.
    FullChooser,
    /// The shopper has a remembered nonprofit; show the compact widget.
    Widget,
}

/// One donation offer tied to one checkout.
///
/// # Invariants
///
/// - `amount` never changes after creation
/// - `chosen_nonprofit` is set at most once
/// - `is_redeemed` goes from `false` to `true` exactly once
/// - `match_amount()` is zero unless `can_match && user_did_match`
///
/// Only the coordinator mutates a transaction; everything handed out is a clone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    key: TransactionKey,
    store_nonprofits: StoreNonprofits,
    amount: Amount,
    chosen_nonprofit: Option<Nonprofit>,
    can_match: bool,
    user_did_match: bool,
    id: Option<TransactionId>,
    is_redeemed: bool,
    redemption_in_flight: bool,
    is_proxy: bool,
}

impl Transaction {
    pub(crate) fn new(
        key: TransactionKey,
        store_nonprofits: StoreNonprofits,
        amount: Amount,
        can_match: bool,
    ) -> Self {
        Transaction {
            key,
            store_nonprofits,
            amount,
            chosen_nonprofit: None,
            can_match,
            user_did_match: false,
            id: None,
            is_redeemed: false,
            redemption_in_flight: false,
            is_proxy: false,
        }
    }

    pub(crate) fn into_proxy(mut self) -> Self {
        self.is_proxy = true;
        self
    }

    /// Builds the transaction that replaces a proxy once the real cart amount is
    /// known. Everything the shopper already did carries over.
    pub(crate) fn reconciled(&self, key: TransactionKey, amount: Amount) -> Self {
        Transaction {
            key,
            amount,
            is_proxy: false,
            ..self.clone()
        }
    }

    pub fn key(&self) -> TransactionKey {
        self.key
    }

    pub fn store_nonprofits(&self) -> &StoreNonprofits {
        &self.store_nonprofits
    }

    pub fn store_id(&self) -> Option<&StoreId> {
        self.store_nonprofits.store.as_ref().map(|s| &s.id)
    }

    pub fn amount(&self) -> Amount {
        self.amount
    }

    pub fn chosen_nonprofit(&self) -> Option<&Nonprofit> {
        self.chosen_nonprofit.as_ref()
    }

    pub fn can_match(&self) -> bool {
        self.can_match
    }

    pub fn user_did_match(&self) -> bool {
        self.user_did_match
    }

    pub fn id(&self) -> Option<TransactionId> {
        self.id
    }

    pub fn is_redeemed(&self) -> bool {
        self.is_redeemed
    }

    pub fn redemption_in_flight(&self) -> bool {
        self.redemption_in_flight
    }

    /// `true` while the cart amount is a placeholder awaiting reconciliation.
    pub fn is_proxy(&self) -> bool {
        self.is_proxy
    }

    /// The nonprofit a redemption would go to: the shopper's explicit choice,
    /// else the one inherited from their last visit.
    pub fn active_nonprofit(&self) -> Option<&Nonprofit> {
        self.chosen_nonprofit
            .as_ref()
            .or(self.store_nonprofits.last_nonprofit.as_ref())
    }

    /// Screen to open for this transaction.
    pub fn view_kind(&self) -> ViewKind {
        if self.store_nonprofits.last_nonprofit.is_some() {
            ViewKind::Widget
        } else {
            ViewKind::FullChooser
        }
    }

    /// Matching is applied only when the store offers it and the shopper opted in.
    pub fn matched(&self) -> bool {
        self.can_match && self.user_did_match
    }

    /// The store's donation for this cart.
    pub fn donation_amount(&self) -> Amount {
        let percent = self
            .store_nonprofits
            .store
            .as_ref()
            .map(|s| s.donation_percent())
            .unwrap_or_default();
        self.amount.percent_of(percent)
    }

    /// Matched donation: one-to-one with the store's donation when matching
    /// applies, zero otherwise.
    pub fn match_amount(&self) -> Amount {
        if self.matched() {
            self.donation_amount()
        } else {
            Amount::ZERO
        }
    }

    pub(crate) fn choose(&mut self, nonprofit: Nonprofit) {
        self.chosen_nonprofit = Some(nonprofit);
    }

    pub(crate) fn set_user_did_match(&mut self, did_match: bool) {
        self.user_did_match = did_match;
    }

    pub(crate) fn set_redemption_in_flight(&mut self, in_flight: bool) {
        self.redemption_in_flight = in_flight;
    }

    pub(crate) fn mark_redeemed(&mut self, id: TransactionId) {
        self.id = Some(id);
        self.is_redeemed = true;
        self.redemption_in_flight = false;
    }
}

/// Everything the submission client needs to register a redemption.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Redemption {
    pub nonprofit_id: NonprofitId,
    pub store_id: StoreId,
    pub cart_amount: Amount,
    pub matched: bool,
    pub match_amount: Amount,
    pub position: u8,
}

impl Redemption {
    /// Builds the request for `transaction`, or `None` when it has no store
    /// descriptor or no nonprofit to redeem.
    pub fn for_transaction(transaction: &Transaction) -> Option<Self> {
        let nonprofit = transaction.active_nonprofit()?;
        let store_id = transaction.store_id()?;
        Some(Redemption {
            nonprofit_id: nonprofit.id,
            store_id: store_id.clone(),
            cart_amount: transaction.amount(),
            matched: transaction.matched(),
            match_amount: transaction.match_amount(),
            position: REDEMPTION_POSITION,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nonprofit::Store;
    use rust_decimal::Decimal;
    use std::str::FromStr;

    fn listing(last: Option<Nonprofit>) -> StoreNonprofits {
        let mut store = Store::new("S1");
        store.percent = Some(Decimal::new(10, 2));
        let listing = StoreNonprofits::new(
            store,
            vec![Nonprofit::new(1, "Food Bank"), Nonprofit::new(2, "Shelter")],
        );
        match last {
            Some(np) => listing.with_last_nonprofit(np),
            None => listing,
        }
    }

    fn transaction(last: Option<Nonprofit>, can_match: bool) -> Transaction {
        Transaction::new(
            TransactionKey(1),
            listing(last),
            Amount::from_str("42.50").unwrap(),
            can_match,
        )
    }

    #[test]
    fn test_new_transaction_is_unredeemed() {
        let tx = transaction(None, false);
        assert!(!tx.is_redeemed());
        assert!(tx.id().is_none());
        assert!(tx.chosen_nonprofit().is_none());
        assert_eq!(tx.view_kind(), ViewKind::FullChooser);
    }

    #[test]
    fn test_chosen_overrides_last_nonprofit() {
        let mut tx = transaction(Some(Nonprofit::new(1, "Food Bank")), false);
        assert_eq!(tx.active_nonprofit().map(|n| n.id), Some(1));
        assert_eq!(tx.view_kind(), ViewKind::Widget);

        tx.choose(Nonprofit::new(2, "Shelter"));
        assert_eq!(tx.active_nonprofit().map(|n| n.id), Some(2));
    }

    #[test]
    fn test_match_amount_requires_store_support() {
        let mut tx = transaction(None, false);
        tx.set_user_did_match(true);
        assert!(!tx.matched());
        assert!(tx.match_amount().is_zero());

        let mut tx = transaction(None, true);
        assert!(tx.match_amount().is_zero());
        tx.set_user_did_match(true);
        assert_eq!(tx.match_amount().to_string(), "4.25");
    }

    #[test]
    fn test_redemption_needs_a_nonprofit() {
        let tx = transaction(None, false);
        assert!(Redemption::for_transaction(&tx).is_none());

        let mut tx = transaction(None, false);
        tx.choose(Nonprofit::new(2, "Shelter"));
        let request = Redemption::for_transaction(&tx).unwrap();
        assert_eq!(request.nonprofit_id, 2);
        assert_eq!(request.store_id, "S1");
        assert_eq!(request.cart_amount.to_string(), "42.50");
        assert!(!request.matched);
        assert_eq!(request.position, REDEMPTION_POSITION);
    }

    #[test]
    fn test_redemption_needs_a_store() {
        let mut listing = listing(Some(Nonprofit::new(1, "Food Bank")));
        listing.store = None;
        let tx = Transaction::new(TransactionKey(1), listing, Amount::ZERO, false);
        assert!(Redemption::for_transaction(&tx).is_none());
    }

    #[test]
    fn test_reconciled_keeps_shopper_state() {
        let mut proxy = transaction(None, true).into_proxy();
        proxy.choose(Nonprofit::new(1, "Food Bank"));
        proxy.set_user_did_match(true);

        let real = proxy.reconciled(TransactionKey(2), Amount::from_str("10").unwrap());
        assert!(!real.is_proxy());
        assert_eq!(real.key(), TransactionKey(2));
        assert_eq!(real.amount().to_string(), "10.00");
        assert_eq!(real.chosen_nonprofit().map(|n| n.id), Some(1));
        assert!(real.user_did_match());
    }

    #[test]
    fn test_mark_redeemed() {
        let mut tx = transaction(None, false);
        tx.set_redemption_in_flight(true);
        tx.mark_redeemed(TransactionId(77));
        assert!(tx.is_redeemed());
        assert!(!tx.redemption_in_flight());
        assert_eq!(tx.id(), Some(TransactionId(77)));
    }
}
