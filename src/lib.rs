//! # Donation Kit
//!
//! Core of a checkout donation SDK: a merchant app lets the shopper pick a
//! nonprofit to receive a donation tied to their purchase, then confirms
//! ("redeems") the donation against the backend.
//!
//! ## Design Principles
//!
//! - **One transaction per coordinator**: a single slot, replaced by each begin
//! - **No double redemption**: redeemed and in-flight state live on the
//!   transaction and are checked before any submission
//! - **Fixed-point money**: 2 decimal places via `rust_decimal`
//! - **Injected collaborators**: directory, submission and identity are traits
//!
//! ## Example
//!
//! ```no_run
//! use donation_kit::memory::{InMemoryDirectory, InMemorySubmissions, StaticIdentity};
//! use donation_kit::{Amount, SdkConfig, TransactionCoordinator};
//! use std::str::FromStr;
//! use std::sync::Arc;
//!
//! # async fn run() -> donation_kit::Result<()> {
//! let coordinator = TransactionCoordinator::new(
//!     SdkConfig::default(),
//!     Arc::new(StaticIdentity::new(Some("user-1"))),
//!     Arc::new(InMemoryDirectory::new()),
//!     Arc::new(InMemorySubmissions::new()),
//! );
//! let view = coordinator
//!     .begin_transaction("S1", Amount::from_str("42.50").unwrap(), false, None)
//!     .await?;
//! println!("open {:?}", view);
//! coordinator.redeem_current().await?;
//! # Ok(())
//! # }
//! ```

pub mod amount;
pub mod client;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod memory;
pub mod nonprofit;
pub mod replay;
pub mod transaction;

pub use amount::Amount;
pub use client::{
    ClientError, DirectoryClient, DirectoryListing, IdentityProvider, SubmissionClient, UserId,
};
pub use config::{Environment, SdkConfig};
pub use coordinator::{FlowSnapshot, Phase, TransactionCoordinator};
pub use error::{DonationError, FailureKind, ReplayError, Result};
pub use nonprofit::{Nonprofit, NonprofitId, Progress, Store, StoreId, StoreNonprofits};
pub use replay::CheckoutReplay;
pub use transaction::{Redemption, Transaction, TransactionId, TransactionKey, ViewKind};
