//! SDK configuration.

use crate::amount::Amount;
use crate::error::{DonationError, Result};
use std::env;
use std::fmt;
use std::str::FromStr;

/// Backend environment the SDK talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Environment {
    #[default]
    Production,
    /// Diagnostic environment; allows forcing the match view on.
    Staging,
}

impl Environment {
    pub fn is_staging(&self) -> bool {
        matches!(self, Environment::Staging)
    }
}

impl FromStr for Environment {
    type Err = DonationError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "production" | "prod" => Ok(Environment::Production),
            "staging" | "stage" => Ok(Environment::Staging),
            other => Err(DonationError::invalid_configuration(format!(
                "unknown environment '{}'",
                other
            ))),
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Environment::Production => f.write_str("production"),
            Environment::Staging => f.write_str("staging"),
        }
    }
}

/// Settings fixed for the lifetime of a coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SdkConfig {
    pub environment: Environment,
    /// Cart amount given to proxy transactions until they are reconciled.
    pub proxy_amount: Amount,
}

impl SdkConfig {
    pub const ENV_VAR: &'static str = "DONATION_ENV";
    pub const PROXY_AMOUNT_VAR: &'static str = "DONATION_PROXY_AMOUNT";

    pub fn staging() -> Self {
        SdkConfig {
            environment: Environment::Staging,
            ..SdkConfig::default()
        }
    }

    /// Reads `DONATION_ENV` and `DONATION_PROXY_AMOUNT`, defaulting to production
    /// and a zero placeholder.
    pub fn from_env() -> Result<Self> {
        Self::from_vars(
            env::var(Self::ENV_VAR).ok().as_deref(),
            env::var(Self::PROXY_AMOUNT_VAR).ok().as_deref(),
        )
    }

    fn from_vars(environment: Option<&str>, proxy_amount: Option<&str>) -> Result<Self> {
        let environment = match environment {
            Some(raw) => raw.parse()?,
            None => Environment::default(),
        };
        let proxy_amount = match proxy_amount {
            Some(raw) => {
                let amount = Amount::from_str(raw).map_err(|e| {
                    DonationError::invalid_configuration(format!(
                        "{}: {}",
                        Self::PROXY_AMOUNT_VAR,
                        e
                    ))
                })?;
                if amount.is_negative() {
                    return Err(DonationError::invalid_configuration(format!(
                        "{} must not be negative",
                        Self::PROXY_AMOUNT_VAR
                    )));
                }
                amount
            }
            None => Amount::ZERO,
        };
        Ok(SdkConfig {
            environment,
            proxy_amount,
        })
    }
}
