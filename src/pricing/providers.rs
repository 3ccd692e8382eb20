//! Upstream providers: exchangerate-api rate tables and ipstack geolocation.
//!
//! Both are reached over blocking `ureq` agents with a bounded timeout.
//! Transport and decoding are kept apart so response handling can be
//! tested on plain JSON.

use super::types::{ExchangeRateTable, LocationResult, PricingError};
use serde::Deserialize;
use std::collections::HashMap;
use std::net::IpAddr;
use std::time::Duration;

pub const DEFAULT_RATES_URL: &str = "https://api.exchangerate-api.com/v4";
pub const DEFAULT_GEO_URL: &str = "http://api.ipstack.com";
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(5);

const USER_AGENT: &str = concat!("BodyVersePricing/", env!("CARGO_PKG_VERSION"));

/// Source of USD-based exchange rate tables.
pub trait RateSource: Send + Sync {
    fn fetch_rates(&self, base: &str) -> Result<ExchangeRateTable, PricingError>;
}

/// Source of a visitor's country and currency.
pub trait GeoLocator: Send + Sync {
    /// Locate `ip`, or the caller's own public address when `None`.
    fn locate(&self, ip: Option<IpAddr>) -> Result<LocationResult, PricingError>;
}

fn build_agent(timeout: Duration) -> ureq::Agent {
    ureq::AgentBuilder::new()
        .timeout(timeout)
        .user_agent(USER_AGENT)
        .build()
}

// ─── Exchange rates ─────────────────────────────────────────────

#[derive(Deserialize)]
struct RatesResponse {
    #[serde(default)]
    rates: Option<HashMap<String, f64>>,
}

/// Decode a `/latest/{base}` response body.
pub fn parse_rates_body(body: &str) -> Result<ExchangeRateTable, PricingError> {
    let parsed: RatesResponse =
        serde_json::from_str(body).map_err(|e| PricingError::InvalidResponse(e.to_string()))?;
    parsed
        .rates
        .map(ExchangeRateTable::new)
        .ok_or_else(|| PricingError::InvalidResponse("no rates field".into()))
}

/// exchangerate-api.com client.
pub struct ExchangeRateApi {
    agent: ureq::Agent,
    base_url: String,
}

impl ExchangeRateApi {
    pub fn new(timeout: Duration) -> Self {
        Self::with_base_url(DEFAULT_RATES_URL, timeout)
    }

    /// Point the client at another host (for testing).
    pub fn with_base_url(base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            agent: build_agent(timeout),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }
}

impl RateSource for ExchangeRateApi {
    fn fetch_rates(&self, base: &str) -> Result<ExchangeRateTable, PricingError> {
        let url = format!("{}/latest/{}", self.base_url, base);
        let body = self
            .agent
            .get(&url)
            .call()?
            .into_string()
            .map_err(|e| PricingError::InvalidResponse(e.to_string()))?;
        let table = parse_rates_body(&body)?;
        tracing::debug!(base, count = table.len(), "fetched exchange rates");
        Ok(table)
    }
}

// ─── IP geolocation ─────────────────────────────────────────────

#[derive(Deserialize)]
struct IpStackCurrency {
    code: Option<String>,
}

#[derive(Deserialize)]
struct IpStackErrorBody {
    code: Option<i64>,
    info: Option<String>,
}

#[derive(Deserialize)]
struct IpStackResponse {
    success: Option<bool>,
    error: Option<IpStackErrorBody>,
    country_code: Option<String>,
    currency: Option<IpStackCurrency>,
}

/// Decode an ipstack `/check` response body.
///
/// ipstack reports failures in-band with HTTP 200 and `"success": false`.
/// Missing fields fall back to the US/USD defaults individually.
pub fn parse_location_body(body: &str) -> Result<LocationResult, PricingError> {
    let r: IpStackResponse =
        serde_json::from_str(body).map_err(|e| PricingError::InvalidResponse(e.to_string()))?;

    if r.success == Some(false) || r.error.is_some() {
        let (code, info) = r
            .error
            .map(|e| (e.code.unwrap_or_default(), e.info.unwrap_or_default()))
            .unwrap_or_default();
        return Err(PricingError::InvalidResponse(format!(
            "ipstack error {}: {}",
            code, info
        )));
    }

    let defaults = LocationResult::default();
    let non_empty = |s: Option<String>| s.filter(|v| !v.trim().is_empty());

    Ok(LocationResult {
        country_code: non_empty(r.country_code).unwrap_or(defaults.country_code),
        currency_code: non_empty(r.currency.and_then(|c| c.code)).unwrap_or(defaults.currency_code),
    })
}

/// ipstack.com client. Without an access key it never touches the network.
pub struct IpStackLocator {
    agent: ureq::Agent,
    base_url: String,
    access_key: Option<String>,
}

impl IpStackLocator {
    pub fn new(access_key: Option<String>, timeout: Duration) -> Self {
        Self::with_base_url(DEFAULT_GEO_URL, access_key, timeout)
    }

    /// Point the client at another host (for testing).
    pub fn with_base_url(
        base_url: impl Into<String>,
        access_key: Option<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            agent: build_agent(timeout),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            access_key: access_key.filter(|k| !k.trim().is_empty()),
        }
    }

    pub fn has_credential(&self) -> bool {
        self.access_key.is_some()
    }
}

impl GeoLocator for IpStackLocator {
    fn locate(&self, ip: Option<IpAddr>) -> Result<LocationResult, PricingError> {
        let key = self
            .access_key
            .as_deref()
            .ok_or(PricingError::MissingCredential("ipstack"))?;

        // `/check` resolves whoever opened the connection.
        let url = match ip {
            Some(ip) => format!("{}/{}", self.base_url, ip),
            None => format!("{}/check", self.base_url),
        };
        let body = self
            .agent
            .get(&url)
            .query("access_key", key)
            .call()?
            .into_string()
            .map_err(|e| PricingError::InvalidResponse(e.to_string()))?;
        parse_location_body(&body)
    }
}
