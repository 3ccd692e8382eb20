//! Regional pricing subsystem for BodyVerse.
//!
//! Provides visitor geolocation, a cached USD exchange-rate table,
//! currency conversion, the curated regional price catalog, and
//! display formatting.

pub mod cache;
pub mod catalog;
pub mod display;
pub mod providers;
pub mod quote;
pub mod resolver;
pub mod types;

pub use cache::RateCache;
pub use catalog::{pricing_for, supported_currencies, symbol_for, CurrencyInfo};
pub use display::format_price;
pub use providers::{ExchangeRateApi, GeoLocator, IpStackLocator, RateSource};
pub use quote::{PlanOption, PricingQuote};
pub use resolver::{PricingResolver, RatesSnapshot};
pub use types::{
    BillingPeriod, ExchangeRateTable, LocationResult, PlanPrices, PriceRule, PricingError,
    BASE_CURRENCY,
};

/// Normalize user-supplied currency input ("ngn " → "NGN").
pub fn normalize_code(input: &str) -> String {
    input.trim().to_ascii_uppercase()
}
