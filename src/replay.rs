//! Checkout replay: drives the coordinator from CSV input.
//!
//! A directory CSV seeds an in-memory directory, then a checkout CSV is replayed
//! event by event against the coordinator, the way a host app would call it.
//! Invalid checkout rows and rejected operations are logged and skipped.

use crate::amount::Amount;
use crate::client::{DirectoryListing, SubmissionClient};
use crate::config::SdkConfig;
use crate::coordinator::TransactionCoordinator;
use crate::error::{DonationError, ReplayError};
use crate::memory::{InMemoryDirectory, InMemorySubmissions, StaticIdentity};
use crate::nonprofit::{Nonprofit, NonprofitId, Store, StoreId, StoreNonprofits};
use crate::transaction::TransactionKey;
use csv::{ReaderBuilder, Trim};
use log::{debug, warn};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::io::{Read, Write};
use std::str::FromStr;
use std::sync::Arc;

/// One row of the directory CSV.
///
/// Store columns repeat on every row of that store. A row with no `nonprofit`
/// only declares the store.
#[derive(Debug, Deserialize)]
pub struct DirectoryRecord {
    pub store: String,
    pub percent: Option<String>,
    pub can_match: Option<bool>,
    pub nonprofit: Option<NonprofitId>,
    pub name: Option<String>,
    pub cause: Option<String>,
    pub total: Option<String>,
    pub target: Option<String>,
    /// Marks the shopper's nonprofit from a previous visit.
    pub last: Option<bool>,
}

impl DirectoryRecord {
    fn nonprofit(&self, row: usize) -> Result<Option<Nonprofit>, ReplayError> {
        let Some(id) = self.nonprofit else {
            return Ok(None);
        };
        let mut nonprofit = Nonprofit::new(id, self.name.clone().unwrap_or_default());
        nonprofit.cause = self.cause.clone().filter(|c| !c.is_empty());
        nonprofit.total_donations = parse_amount(self.total.as_deref(), row)?;
        nonprofit.target_donations = parse_amount(self.target.as_deref(), row)?;
        Ok(Some(nonprofit))
    }

    fn percent(&self, row: usize) -> Result<Option<Decimal>, ReplayError> {
        match self.percent.as_deref().map(str::trim) {
            None | Some("") => Ok(None),
            Some(raw) => Decimal::from_str(raw)
                .map(Some)
                .map_err(|e| ReplayError::InvalidRecord {
                    row,
                    message: format!("percent '{}': {}", raw, e),
                }),
        }
    }
}

fn parse_amount(raw: Option<&str>, row: usize) -> Result<Amount, ReplayError> {
    match raw.map(str::trim) {
        None | Some("") => Ok(Amount::ZERO),
        Some(raw) => Amount::from_str(raw).map_err(|e| ReplayError::InvalidRecord {
            row,
            message: format!("amount '{}': {}", raw, e),
        }),
    }
}

struct StoreEntry {
    store: Store,
    can_match: bool,
    nonprofits: Vec<Nonprofit>,
    last: Option<Nonprofit>,
}

/// Raw checkout event as read from CSV.
#[derive(Debug, Deserialize)]
pub struct CheckoutRecord {
    /// begin, proxy, reconcile, choose, match, redeem, cancel
    #[serde(rename = "type")]
    pub event_type: String,
    pub store: Option<String>,
    pub amount: Option<String>,
    pub nonprofit: Option<NonprofitId>,
}

/// A parsed checkout event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckoutEvent {
    Begin { store: StoreId, amount: Amount },
    Proxy { store: StoreId },
    Reconcile { amount: Amount },
    Choose { nonprofit: NonprofitId },
    Match,
    Redeem,
    Cancel,
}

impl CheckoutRecord {
    /// Returns `None` for unknown types or missing required fields.
    pub fn parse(&self) -> Option<CheckoutEvent> {
        match self.event_type.trim().to_lowercase().as_str() {
            "begin" => Some(CheckoutEvent::Begin {
                store: self.store()?,
                amount: self.amount()?,
            }),
            "proxy" => Some(CheckoutEvent::Proxy {
                store: self.store()?,
            }),
            "reconcile" => Some(CheckoutEvent::Reconcile {
                amount: self.amount()?,
            }),
            "choose" => Some(CheckoutEvent::Choose {
                nonprofit: self.nonprofit?,
            }),
            "match" => Some(CheckoutEvent::Match),
            "redeem" => Some(CheckoutEvent::Redeem),
            "cancel" => Some(CheckoutEvent::Cancel),
            _ => None,
        }
    }

    fn store(&self) -> Option<StoreId> {
        let store = self.store.as_deref()?.trim();
        (!store.is_empty()).then(|| store.to_string())
    }

    fn amount(&self) -> Option<Amount> {
        let raw = self.amount.as_deref()?.trim();
        if raw.is_empty() {
            return None;
        }
        Amount::from_str(raw).ok().filter(|a| !a.is_negative())
    }
}

/// Replays checkout events through a coordinator backed by in-memory clients.
pub struct CheckoutReplay {
    coordinator: TransactionCoordinator,
    submissions: Arc<InMemorySubmissions>,
}

impl CheckoutReplay {
    pub fn new(config: SdkConfig, identity: StaticIdentity, directory: InMemoryDirectory) -> Self {
        let submissions = Arc::new(InMemorySubmissions::new());
        let coordinator = TransactionCoordinator::new(
            config,
            Arc::new(identity),
            Arc::new(directory),
            Arc::clone(&submissions) as Arc<dyn SubmissionClient>,
        );
        CheckoutReplay {
            coordinator,
            submissions,
        }
    }

    pub fn coordinator(&self) -> &TransactionCoordinator {
        &self.coordinator
    }

    /// Builds a directory from CSV. Unlike checkout rows, a malformed directory
    /// row is an error.
    pub fn load_directory<R: Read>(reader: R) -> Result<InMemoryDirectory, ReplayError> {
        let mut csv_reader = ReaderBuilder::new()
            .trim(Trim::All)
            .flexible(true)
            .from_reader(reader);

        // Keeps the order stores first appear in.
        let mut stores: Vec<StoreEntry> = Vec::new();

        for (row_idx, result) in csv_reader.deserialize::<DirectoryRecord>().enumerate() {
            let row = row_idx + 2; // 1-indexed, accounting for header row
            let record = result?;
            if record.store.is_empty() {
                return Err(ReplayError::InvalidRecord {
                    row,
                    message: "missing store".to_string(),
                });
            }

            let index = match stores.iter().position(|e| e.store.id == record.store) {
                Some(index) => index,
                None => {
                    let mut store = Store::new(record.store.clone());
                    store.percent = record.percent(row)?;
                    stores.push(StoreEntry {
                        store,
                        can_match: false,
                        nonprofits: Vec::new(),
                        last: None,
                    });
                    stores.len() - 1
                }
            };
            let entry = &mut stores[index];
            entry.can_match |= record.can_match.unwrap_or(false);

            if let Some(nonprofit) = record.nonprofit(row)? {
                if record.last.unwrap_or(false) {
                    entry.last = Some(nonprofit.clone());
                }
                entry.nonprofits.push(nonprofit);
            }
        }

        let directory = InMemoryDirectory::new();
        for entry in stores {
            debug!(
                "Directory: store {} with {} nonprofits",
                entry.store.id,
                entry.nonprofits.len()
            );
            let mut store_nonprofits = StoreNonprofits::new(entry.store, entry.nonprofits);
            store_nonprofits.last_nonprofit = entry.last;
            directory.insert(DirectoryListing {
                store_nonprofits,
                can_match: entry.can_match,
            });
        }
        Ok(directory)
    }

    /// Replays checkout events from a CSV reader in order.
    ///
    /// Invalid rows and rejected operations are logged at warn level and skipped.
    pub async fn process_csv<R: Read>(&mut self, reader: R) -> Result<(), ReplayError> {
        let mut csv_reader = ReaderBuilder::new()
            .trim(Trim::All)
            .flexible(true)
            .from_reader(reader);

        for (row_idx, result) in csv_reader.deserialize::<CheckoutRecord>().enumerate() {
            let row = row_idx + 2;

            match result {
                Ok(record) => match record.parse() {
                    Some(event) => {
                        if let Err(e) = self.process_event(event, row).await {
                            warn!("Row {}: {}", row, e);
                        }
                    }
                    None => warn!("Row {}: Failed to parse checkout record", row),
                },
                Err(e) => warn!("Row {}: CSV parse error: {}", row, e),
            }
        }

        Ok(())
    }

    async fn process_event(&mut self, event: CheckoutEvent, row: usize) -> Result<(), DonationError> {
        match event {
            CheckoutEvent::Begin { store, amount } => {
                let view = self
                    .coordinator
                    .begin_transaction(&store, amount, false, None)
                    .await?;
                debug!("Row {}: began at {} showing {:?}", row, store, view);
            }
            CheckoutEvent::Proxy { store } => {
                let tx = self.coordinator.begin_proxy_transaction(&store).await?;
                debug!("Row {}: began proxy {} at {}", row, tx.key(), store);
            }
            CheckoutEvent::Reconcile { amount } => {
                let key = self.current_key()?;
                self.coordinator.reconcile_amount(key, amount)?;
            }
            CheckoutEvent::Choose { nonprofit } => {
                let key = self.current_key()?;
                self.coordinator.choose_nonprofit(key, nonprofit)?;
            }
            CheckoutEvent::Match => {
                let key = self.current_key()?;
                self.coordinator.set_user_did_match(key, true)?;
            }
            CheckoutEvent::Redeem => {
                let tx = self.coordinator.redeem_current().await?;
                debug!("Row {}: redeemed {:?}", row, tx.id());
            }
            CheckoutEvent::Cancel => {
                self.coordinator.cancel_current().await?;
                debug!("Row {}: cancelled current transaction", row);
            }
        }
        Ok(())
    }

    fn current_key(&self) -> Result<TransactionKey, DonationError> {
        self.coordinator
            .current()
            .map(|tx| tx.key())
            .ok_or_else(|| DonationError::InvalidConfiguration("no current transaction".into()))
    }

    /// Writes redemptions that are still active, sorted by transaction id.
    pub fn write_output<W: Write>(&self, writer: W) -> Result<(), ReplayError> {
        let mut csv_writer = csv::Writer::from_writer(writer);

        csv_writer.write_record([
            "transaction",
            "store",
            "nonprofit",
            "amount",
            "matched",
            "match_amount",
        ])?;

        let mut redemptions = self.submissions.active();
        redemptions.sort_by_key(|r| r.id);

        for recorded in redemptions {
            let r = &recorded.redemption;
            csv_writer.write_record([
                recorded.id.to_string(),
                r.store_id.clone(),
                r.nonprofit_id.to_string(),
                r.cart_amount.to_string(),
                r.matched.to_string(),
                r.match_amount.to_string(),
            ])?;
        }

        csv_writer.flush()?;
        Ok(())
    }
}
