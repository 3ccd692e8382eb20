//! Core types for the pricing subsystem.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

/// Base currency every exchange rate is quoted against.
pub const BASE_CURRENCY: &str = "USD";

/// Exchange rates relative to [`BASE_CURRENCY`], keyed by 3-letter code.
///
/// Always replaced wholesale from a single upstream fetch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExchangeRateTable {
    rates: HashMap<String, f64>,
}

impl ExchangeRateTable {
    pub fn new(rates: HashMap<String, f64>) -> Self {
        Self { rates }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    /// Rate for `code`, ignoring entries that cannot be divided by.
    pub fn rate(&self, code: &str) -> Option<f64> {
        self.rates
            .get(code)
            .copied()
            .filter(|r| r.is_finite() && *r != 0.0)
    }

    pub fn len(&self) -> usize {
        self.rates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rates.is_empty()
    }

    pub fn as_map(&self) -> &HashMap<String, f64> {
        &self.rates
    }
}

impl<S: Into<String>> FromIterator<(S, f64)> for ExchangeRateTable {
    fn from_iter<I: IntoIterator<Item = (S, f64)>>(iter: I) -> Self {
        Self {
            rates: iter.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }
}

/// Subscription prices for one currency, already denominated in it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlanPrices {
    pub monthly: f64,
    pub quarterly: f64,
    pub yearly: f64,
}

impl PlanPrices {
    pub fn amount(&self, period: BillingPeriod) -> f64 {
        match period {
            BillingPeriod::Monthly => self.monthly,
            BillingPeriod::Quarterly => self.quarterly,
            BillingPeriod::Yearly => self.yearly,
        }
    }
}

/// Billing cadence of a premium subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BillingPeriod {
    Monthly,
    Quarterly,
    Yearly,
}

impl BillingPeriod {
    pub const ALL: [BillingPeriod; 3] = [Self::Monthly, Self::Quarterly, Self::Yearly];

    pub fn months(self) -> u32 {
        match self {
            Self::Monthly => 1,
            Self::Quarterly => 3,
            Self::Yearly => 12,
        }
    }

    /// Suffix shown after the price, e.g. "/3 months".
    pub fn suffix(self) -> &'static str {
        match self {
            Self::Monthly => "/month",
            Self::Quarterly => "/3 months",
            Self::Yearly => "/year",
        }
    }
}

impl fmt::Display for BillingPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Monthly => write!(f, "monthly"),
            Self::Quarterly => write!(f, "quarterly"),
            Self::Yearly => write!(f, "yearly"),
        }
    }
}

/// Which step of the regional fallback chain produced a price triple.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriceRule {
    /// Code belongs to the emerging-market group; NGN prices apply.
    EmergingMarket,
    /// Code has its own curated entry.
    Direct,
    /// Nothing matched; USD prices apply.
    UsdFallback,
}

impl fmt::Display for PriceRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmergingMarket => write!(f, "emerging market"),
            Self::Direct => write!(f, "direct"),
            Self::UsdFallback => write!(f, "USD fallback"),
        }
    }
}

/// Country and currency of the current visitor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocationResult {
    pub country_code: String,
    pub currency_code: String,
}

impl Default for LocationResult {
    fn default() -> Self {
        Self {
            country_code: "US".into(),
            currency_code: "USD".into(),
        }
    }
}

/// Upstream failures. Never surfaced past [`super::PricingResolver`].
#[derive(Debug, Error)]
pub enum PricingError {
    #[error("network error: {0}")]
    Network(String),
    #[error("invalid API response: {0}")]
    InvalidResponse(String),
    #[error("no access key configured for {0}")]
    MissingCredential(&'static str),
    #[error("configuration error: {0}")]
    Config(String),
}

impl From<ureq::Error> for PricingError {
    fn from(err: ureq::Error) -> Self {
        match err {
            ureq::Error::Status(code, _) => Self::InvalidResponse(format!("HTTP status {}", code)),
            ureq::Error::Transport(t) => Self::Network(t.to_string()),
        }
    }
}
