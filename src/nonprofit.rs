//! Store and nonprofit records returned by the directory.

use crate::amount::Amount;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Nonprofit identifier as assigned by the backend.
pub type NonprofitId = u32;

/// Store (merchant location or chain) identifier.
pub type StoreId = String;

/// Percentage the store donates when it does not configure one.
const DEFAULT_DONATION_PERCENT: Decimal = Decimal::from_parts(1, 0, 0, false, 2);

/// A nonprofit eligible to receive donations at a store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Nonprofit {
    pub id: NonprofitId,
    pub name: String,
    pub image: Option<String>,
    pub cause: Option<String>,
    pub mission_description: Option<String>,
    pub impact_description: Option<String>,
    /// Cumulative donations received so far.
    pub total_donations: Amount,
    /// Donation goal. Progress restarts every time it is met.
    pub target_donations: Amount,
}

impl Nonprofit {
    /// Creates a nonprofit with no descriptive text or image.
    pub fn new(id: NonprofitId, name: impl Into<String>) -> Self {
        Nonprofit {
            id,
            name: name.into(),
            image: None,
            cause: None,
            mission_description: None,
            impact_description: None,
            total_donations: Amount::ZERO,
            target_donations: Amount::ZERO,
        }
    }

    /// Progress towards the current goal cycle.
    ///
    /// The numerator is `total mod target`, so a bar that reaches its goal starts
    /// over instead of saturating: 250 against a target of 100 is 50%.
    pub fn progress(&self) -> Progress {
        match self.total_donations.checked_rem(self.target_donations) {
            Some(numerator) => Progress {
                numerator,
                denominator: self.target_donations,
            },
            None => Progress::EMPTY,
        }
    }

    /// Progress as shown on the impact screen, where a zero remainder is displayed
    /// as a full bar rather than an empty one. This includes a nonprofit with no
    /// donations yet.
    pub fn impact_progress(&self) -> Progress {
        let progress = self.progress();
        if progress.numerator.is_zero() {
            Progress {
                numerator: progress.denominator,
                ..progress
            }
        } else {
            progress
        }
    }

    /// Cause tag upper-cased for display.
    pub fn cause_label(&self) -> Option<String> {
        self.cause.as_deref().map(str::to_uppercase)
    }
}

/// Fraction of a donation goal reached in the current cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    pub numerator: Amount,
    pub denominator: Amount,
}

impl Progress {
    /// Progress with no goal configured.
    pub const EMPTY: Self = Progress {
        numerator: Amount::ZERO,
        denominator: Amount::ZERO,
    };

    /// Whole percent reached, truncated. Zero when there is no goal.
    pub fn percent(&self) -> u32 {
        if self.denominator.is_zero() {
            return 0;
        }
        let ratio = self.numerator.as_decimal() / self.denominator.as_decimal();
        (ratio * Decimal::ONE_HUNDRED).trunc().to_u32().unwrap_or(0)
    }

    /// Percent as shown on the chooser: never below 1% so every bar is visible.
    pub fn chooser_percent(&self) -> u32 {
        self.percent().max(1)
    }
}

/// Store descriptor: identity, donation terms and branding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Store {
    pub id: StoreId,
    pub name: Option<String>,
    /// Fraction of the cart donated (`0.05` is 5%).
    pub percent: Option<Decimal>,
    /// Fixed label replacing the percentage, e.g. "one meal".
    pub donation_name: Option<String>,
    pub donation_description: Option<String>,
    pub logo: Option<String>,
    pub rect_logo: Option<String>,
}

impl Store {
    pub fn new(id: impl Into<StoreId>) -> Self {
        Store {
            id: id.into(),
            name: None,
            percent: None,
            donation_name: None,
            donation_description: None,
            logo: None,
            rect_logo: None,
        }
    }

    /// Donation rate, falling back to 1%.
    pub fn donation_percent(&self) -> Decimal {
        self.percent.unwrap_or(DEFAULT_DONATION_PERCENT)
    }

    /// What the store gives, as a short label: the custom donation name if one is
    /// configured, else the whole percentage ("5%").
    pub fn donation_label(&self) -> String {
        if let Some(name) = &self.donation_name {
            return name.clone();
        }
        let whole = (self.donation_percent() * Decimal::ONE_HUNDRED)
            .trunc()
            .to_i64()
            .unwrap_or(0);
        format!("{}%", whole)
    }

    /// Preferred branding image: the rectangular logo, else the square one.
    pub fn logo_url(&self) -> Option<&str> {
        self.rect_logo.as_deref().or(self.logo.as_deref())
    }
}

/// Snapshot of a store's eligible nonprofits for the current shopper.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreNonprofits {
    pub store: Option<Store>,
    /// Display order is the directory's order.
    pub nonprofits: Vec<Nonprofit>,
    /// Nonprofit the shopper picked on a previous visit to this store.
    pub last_nonprofit: Option<Nonprofit>,
}

impl StoreNonprofits {
    pub fn new(store: Store, nonprofits: Vec<Nonprofit>) -> Self {
        StoreNonprofits {
            store: Some(store),
            nonprofits,
            last_nonprofit: None,
        }
    }

    pub fn with_last_nonprofit(mut self, nonprofit: Nonprofit) -> Self {
        self.last_nonprofit = Some(nonprofit);
        self
    }

    pub fn find(&self, id: NonprofitId) -> Option<&Nonprofit> {
        self.nonprofits.iter().find(|n| n.id == id)
    }
}
