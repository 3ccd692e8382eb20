//! Pricing resolver: orchestrates the fallback chains.
//!
//! Location:  ipstack (only with a key) → US/USD default
//! Rates:     fresh cache → upstream fetch → stale cache → empty table
//! Convert:   identity → rate lookup → unchanged amount
//!
//! Every upstream failure is downgraded to a default here and logged;
//! callers never see an error.

use super::cache::RateCache;
use super::catalog;
use super::display;
use super::providers::{ExchangeRateApi, GeoLocator, IpStackLocator, RateSource};
use super::quote::PricingQuote;
use super::types::{ExchangeRateTable, LocationResult, PlanPrices, PricingError, BASE_CURRENCY};
use chrono::{DateTime, Utc};
use std::net::IpAddr;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// A rate table together with the time it was fetched.
///
/// Both halves are read under one lock, so `fetched_at` always belongs to
/// `table`. `fetched_at` is `None` when nothing has been fetched yet.
#[derive(Debug, Clone)]
pub struct RatesSnapshot {
    pub table: Arc<ExchangeRateTable>,
    pub fetched_at: Option<DateTime<Utc>>,
}

struct RateState {
    cache: RateCache,
    refreshing: bool,
    generation: u64,
}

impl RateState {
    fn snapshot(&self, table: Arc<ExchangeRateTable>) -> RatesSnapshot {
        RatesSnapshot {
            table,
            fetched_at: self.cache.fetched_at(),
        }
    }

    fn stale_or_empty(&self) -> Arc<ExchangeRateTable> {
        self.cache
            .stale()
            .unwrap_or_else(|| Arc::new(ExchangeRateTable::empty()))
    }
}

/// Held by the one caller fetching upstream. Dropping it ends the refresh
/// and wakes every waiter, also when the fetch panicked.
struct InFlight<'a> {
    state: &'a Mutex<RateState>,
    refreshed: &'a Condvar,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.refreshing = false;
        state.generation = state.generation.wrapping_add(1);
        self.refreshed.notify_all();
    }
}

/// The pricing resolver with its rate cache.
///
/// Safe to share across threads. At most one upstream rate fetch runs at a
/// time and the cache lock is not held during it. Callers arriving while a
/// refresh is in flight get the stale table when there is one; otherwise
/// they wait for that refresh and share its outcome, failure included.
pub struct PricingResolver {
    rates: Box<dyn RateSource>,
    geo: Box<dyn GeoLocator>,
    state: Mutex<RateState>,
    refreshed: Condvar,
}

impl PricingResolver {
    /// Resolver backed by the public upstream APIs.
    pub fn new(geo_access_key: Option<String>, timeout: Duration) -> Self {
        let locator = IpStackLocator::new(geo_access_key, timeout);
        if !locator.has_credential() {
            tracing::debug!("IPSTACK_API_KEY not set, visitors default to US/USD");
        }
        Self::with_sources(
            Box::new(ExchangeRateApi::new(timeout)),
            Box::new(locator),
            RateCache::new(),
        )
    }

    /// Resolver with injected sources and cache (for testing).
    pub fn with_sources(
        rates: Box<dyn RateSource>,
        geo: Box<dyn GeoLocator>,
        cache: RateCache,
    ) -> Self {
        Self {
            rates,
            geo,
            state: Mutex::new(RateState {
                cache,
                refreshing: false,
                generation: 0,
            }),
            refreshed: Condvar::new(),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, RateState> {
        // The cache holds no invariant a panicking holder could break.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ─── Location ───────────────────────────────────────────────

    /// Country and currency of the machine running this process. Never fails.
    pub fn resolve_location(&self) -> LocationResult {
        self.resolve_location_of(None)
    }

    /// Country and currency of the client at `ip`, or of this machine's
    /// own public address when `ip` is `None`. Never fails.
    pub fn resolve_location_of(&self, ip: Option<IpAddr>) -> LocationResult {
        match self.geo.locate(ip) {
            Ok(loc) => {
                tracing::debug!(
                    ip = ?ip,
                    country = %loc.country_code,
                    currency = %loc.currency_code,
                    "resolved visitor location"
                );
                loc
            }
            Err(PricingError::MissingCredential(provider)) => {
                tracing::debug!(provider, "geolocation disabled, using default location");
                LocationResult::default()
            }
            Err(e) => {
                tracing::warn!(error = %e, ip = ?ip, "geolocation failed, using default location");
                LocationResult::default()
            }
        }
    }

    // ─── Exchange rates ─────────────────────────────────────────

    /// Current USD-based rate table. Never fails; may be stale or empty.
    pub fn get_rates(&self) -> Arc<ExchangeRateTable> {
        self.get_rates_at(Utc::now())
    }

    /// [`Self::get_rates`] evaluated at an explicit instant.
    pub fn get_rates_at(&self, now: DateTime<Utc>) -> Arc<ExchangeRateTable> {
        self.rates_snapshot_at(now).table
    }

    /// Current rate table paired with its fetch time.
    pub fn rates_snapshot(&self) -> RatesSnapshot {
        self.rates_snapshot_at(Utc::now())
    }

    /// [`Self::rates_snapshot`] evaluated at an explicit instant.
    pub fn rates_snapshot_at(&self, now: DateTime<Utc>) -> RatesSnapshot {
        let mut state = self.lock_state();
        if let Some(table) = state.cache.fresh(now) {
            return state.snapshot(table);
        }

        if state.refreshing {
            if let Some(stale) = state.cache.stale() {
                tracing::debug!("rate refresh in flight, serving stale table");
                return state.snapshot(stale);
            }
            let generation = state.generation;
            while state.refreshing && state.generation == generation {
                state = self
                    .refreshed
                    .wait(state)
                    .unwrap_or_else(PoisonError::into_inner);
            }
            // Whatever that refresh left behind, fresh table or nothing.
            let table = state.stale_or_empty();
            return state.snapshot(table);
        }

        state.refreshing = true;
        drop(state);
        let _in_flight = InFlight {
            state: &self.state,
            refreshed: &self.refreshed,
        };

        let outcome = self.rates.fetch_rates(BASE_CURRENCY);

        let mut state = self.lock_state();
        let table = match outcome {
            Ok(table) => {
                tracing::info!(count = table.len(), "exchange rate cache refreshed");
                state.cache.store(table, now)
            }
            Err(e) => {
                if state.cache.stale().is_some() {
                    tracing::warn!(
                        error = %e,
                        fetched_at = ?state.cache.fetched_at(),
                        "rate refresh failed, serving stale table"
                    );
                } else {
                    tracing::warn!(error = %e, "rate refresh failed with nothing cached");
                }
                state.stale_or_empty()
            }
        };
        state.snapshot(table)
    }

    /// Forget the cached table; the next lookup refetches.
    pub fn clear_cache(&self) {
        self.lock_state().cache.clear();
    }

    // ─── Conversion ─────────────────────────────────────────────

    /// Convert `amount` between currencies via the base currency.
    ///
    /// Returns `amount` unchanged when the codes are equal or either one
    /// has no usable rate. No rounding is applied.
    pub fn convert(&self, amount: f64, from: &str, to: &str) -> f64 {
        if from == to {
            return amount;
        }
        let rates = self.get_rates();
        convert_with(&rates, amount, from, to)
    }

    // ─── Catalog & display ──────────────────────────────────────

    pub fn pricing_for(&self, code: &str) -> PlanPrices {
        catalog::pricing_for(code)
    }

    pub fn symbol_for(&self, code: &str) -> String {
        catalog::symbol_for(code)
    }

    pub fn format_price(&self, amount: f64, code: &str) -> String {
        display::format_price(amount, code)
    }

    /// Full price sheet for `code`.
    pub fn quote(&self, code: &str) -> PricingQuote {
        PricingQuote::for_currency(code)
    }

    /// Price sheet in the local machine's currency.
    pub fn quote_for_visitor(&self) -> (LocationResult, PricingQuote) {
        self.quote_for_client(None)
    }

    /// Price sheet in the currency of the client at `ip`.
    pub fn quote_for_client(&self, ip: Option<IpAddr>) -> (LocationResult, PricingQuote) {
        let location = self.resolve_location_of(ip);
        let quote = self.quote(&location.currency_code);
        (location, quote)
    }
}

/// Convert using an already obtained table.
pub fn convert_with(rates: &ExchangeRateTable, amount: f64, from: &str, to: &str) -> f64 {
    if from == to {
        return amount;
    }
    match (rates.rate(from), rates.rate(to)) {
        (Some(rate_from), Some(rate_to)) => amount / rate_from * rate_to,
        _ => {
            tracing::debug!(from, to, "no rate for currency pair, amount left unchanged");
            amount
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use chrono::Duration as ChronoDuration;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Barrier;
    use std::thread;
    use std::time::Instant;

    /// Rate source that serves a fixed table, or fails, and counts calls.
    struct FakeRates {
        table: Mutex<Option<ExchangeRateTable>>,
        calls: Arc<AtomicUsize>,
        delay: Option<std::time::Duration>,
    }

    impl FakeRates {
        fn serving(table: ExchangeRateTable) -> (Self, Arc<AtomicUsize>) {
            let calls = Arc::new(AtomicUsize::new(0));
            (
                Self {
                    table: Mutex::new(Some(table)),
                    calls: Arc::clone(&calls),
                    delay: None,
                },
                calls,
            )
        }

        fn failing() -> (Self, Arc<AtomicUsize>) {
            let calls = Arc::new(AtomicUsize::new(0));
            (
                Self {
                    table: Mutex::new(None),
                    calls: Arc::clone(&calls),
                    delay: None,
                },
                calls,
            )
        }
    }

    impl RateSource for FakeRates {
        fn fetch_rates(&self, base: &str) -> Result<ExchangeRateTable, PricingError> {
            assert_eq!(base, "USD");
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(d) = self.delay {
                thread::sleep(d);
            }
            self.table
                .lock()
                .unwrap()
                .clone()
                .ok_or_else(|| PricingError::Network("connection refused".into()))
        }
    }

    /// Rate source whose behavior can be switched between calls.
    struct SwitchableRates {
        table: Arc<Mutex<Option<ExchangeRateTable>>>,
        calls: Arc<AtomicUsize>,
    }

    impl RateSource for SwitchableRates {
        fn fetch_rates(&self, _base: &str) -> Result<ExchangeRateTable, PricingError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.table
                .lock()
                .unwrap()
                .clone()
                .ok_or_else(|| PricingError::Network("timed out".into()))
        }
    }

    struct FakeGeo(Result<LocationResult, fn() -> PricingError>);

    impl GeoLocator for FakeGeo {
        fn locate(&self, _ip: Option<IpAddr>) -> Result<LocationResult, PricingError> {
            match &self.0 {
                Ok(loc) => Ok(loc.clone()),
                Err(make) => Err(make()),
            }
        }
    }

    /// Locator that records the addresses it was asked about.
    struct RecordingGeo(Arc<Mutex<Vec<Option<IpAddr>>>>);

    impl GeoLocator for RecordingGeo {
        fn locate(&self, ip: Option<IpAddr>) -> Result<LocationResult, PricingError> {
            self.0.lock().unwrap().push(ip);
            Ok(LocationResult {
                country_code: "KE".into(),
                currency_code: "KES".into(),
            })
        }
    }

    fn no_geo() -> Box<dyn GeoLocator> {
        Box::new(FakeGeo(Err(|| PricingError::MissingCredential("ipstack"))))
    }

    fn sample_rates() -> ExchangeRateTable {
        [("USD", 1.0), ("NGN", 1500.0), ("EUR", 0.9), ("GBP", 0.8)]
            .into_iter()
            .collect()
    }

    fn resolver_with(rates: impl RateSource + 'static) -> PricingResolver {
        PricingResolver::with_sources(Box::new(rates), no_geo(), RateCache::new())
    }

    // ─── Location ───────────────────────────────────────────────

    #[test]
    fn test_location_without_credential_is_default() {
        let (rates, _) = FakeRates::failing();
        let resolver = resolver_with(rates);
        assert_eq!(
            resolver.resolve_location(),
            LocationResult {
                country_code: "US".into(),
                currency_code: "USD".into(),
            }
        );
    }

    #[test]
    fn test_location_failure_is_default() {
        let (rates, _) = FakeRates::failing();
        let resolver = PricingResolver::with_sources(
            Box::new(rates),
            Box::new(FakeGeo(Err(|| PricingError::Network("dns failure".into())))),
            RateCache::new(),
        );
        assert_eq!(resolver.resolve_location(), LocationResult::default());
    }

    #[test]
    fn test_location_success_passes_through() {
        let (rates, _) = FakeRates::failing();
        let ng = LocationResult {
            country_code: "NG".into(),
            currency_code: "NGN".into(),
        };
        let resolver = PricingResolver::with_sources(
            Box::new(rates),
            Box::new(FakeGeo(Ok(ng.clone()))),
            RateCache::new(),
        );
        assert_eq!(resolver.resolve_location(), ng);
    }

    #[test]
    fn test_real_locator_without_key_is_default() {
        let resolver = PricingResolver::new(None, std::time::Duration::from_secs(1));
        assert_eq!(resolver.resolve_location(), LocationResult::default());
    }

    #[test]
    fn test_quote_for_client_locates_that_address() {
        let (rates, _) = FakeRates::failing();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let resolver = PricingResolver::with_sources(
            Box::new(rates),
            Box::new(RecordingGeo(Arc::clone(&seen))),
            RateCache::new(),
        );
        let client: IpAddr = "41.90.64.10".parse().unwrap();

        let (loc, quote) = resolver.quote_for_client(Some(client));
        assert_eq!(loc.country_code, "KE");
        assert_eq!(quote.currency, "KES");
        resolver.resolve_location();
        assert_eq!(*seen.lock().unwrap(), vec![Some(client), None]);
    }

    // ─── Rates cache ────────────────────────────────────────────

    #[test]
    fn test_rates_cached_within_hour() {
        let (rates, calls) = FakeRates::serving(sample_rates());
        let resolver = resolver_with(rates);
        let t0 = Utc::now();

        let first = resolver.get_rates_at(t0);
        let second = resolver.rates_snapshot_at(t0 + ChronoDuration::minutes(30));
        assert_eq!(*first, *second.table);
        assert_eq!(second.fetched_at, Some(t0));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_rates_refetched_after_expiry() {
        let (rates, calls) = FakeRates::serving(sample_rates());
        let resolver = resolver_with(rates);
        let t0 = Utc::now();

        resolver.get_rates_at(t0);
        resolver.get_rates_at(t0 + ChronoDuration::minutes(61));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_rates_failure_without_cache_is_empty() {
        let (rates, calls) = FakeRates::failing();
        let resolver = resolver_with(rates);
        assert!(resolver.get_rates().is_empty());
        // Failures are not cached; every call retries upstream
        let snapshot = resolver.rates_snapshot();
        assert!(snapshot.table.is_empty());
        assert!(snapshot.fetched_at.is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_rates_failure_serves_stale() {
        let table = Arc::new(Mutex::new(Some(sample_rates())));
        let calls = Arc::new(AtomicUsize::new(0));
        let resolver = resolver_with(SwitchableRates {
            table: Arc::clone(&table),
            calls: Arc::clone(&calls),
        });
        let t0 = Utc::now();
        resolver.get_rates_at(t0);

        *table.lock().unwrap() = None;
        let later = t0 + ChronoDuration::hours(3);
        let stale = resolver.rates_snapshot_at(later);
        assert_eq!(stale.table.rate("NGN"), Some(1500.0));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        // Failed refresh does not reset the clock
        assert_eq!(stale.fetched_at, Some(t0));
    }

    #[test]
    fn test_rates_success_replaces_stale() {
        let table = Arc::new(Mutex::new(Some(sample_rates())));
        let calls = Arc::new(AtomicUsize::new(0));
        let resolver = resolver_with(SwitchableRates {
            table: Arc::clone(&table),
            calls: Arc::clone(&calls),
        });
        let t0 = Utc::now();
        resolver.get_rates_at(t0);

        *table.lock().unwrap() = Some([("USD", 1.0), ("NGN", 1600.0)].into_iter().collect());
        let t1 = t0 + ChronoDuration::hours(2);
        let fresh = resolver.rates_snapshot_at(t1);
        assert_eq!(fresh.table.rate("NGN"), Some(1600.0));
        assert_eq!(fresh.table.rate("EUR"), None);
        assert_eq!(fresh.fetched_at, Some(t1));
    }

    #[test]
    fn test_clear_cache_forces_refetch() {
        let (rates, calls) = FakeRates::serving(sample_rates());
        let resolver = resolver_with(rates);
        resolver.get_rates();
        resolver.clear_cache();
        resolver.get_rates();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_concurrent_refresh_fetches_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let rates = FakeRates {
            table: Mutex::new(Some(sample_rates())),
            calls: Arc::clone(&calls),
            delay: Some(std::time::Duration::from_millis(50)),
        };
        let resolver = Arc::new(resolver_with(rates));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let r = Arc::clone(&resolver);
                thread::spawn(move || r.get_rates().len())
            })
            .collect();
        for h in handles {
            assert_eq!(h.join().unwrap(), 4);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_concurrent_failed_refresh_fetches_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let rates = FakeRates {
            table: Mutex::new(None),
            calls: Arc::clone(&calls),
            delay: Some(std::time::Duration::from_millis(200)),
        };
        let resolver = Arc::new(resolver_with(rates));
        let start = Arc::new(Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let r = Arc::clone(&resolver);
                let start = Arc::clone(&start);
                thread::spawn(move || {
                    start.wait();
                    r.get_rates().len()
                })
            })
            .collect();
        for h in handles {
            assert_eq!(h.join().unwrap(), 0);
        }
        // Waiters share the failed outcome instead of retrying one by one
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_refresh_in_flight_serves_stale_without_waiting() {
        let calls = Arc::new(AtomicUsize::new(0));
        let rates = FakeRates {
            table: Mutex::new(Some(sample_rates())),
            calls: Arc::clone(&calls),
            delay: Some(std::time::Duration::from_millis(400)),
        };
        let resolver = Arc::new(resolver_with(rates));
        let t0 = Utc::now();
        resolver.get_rates_at(t0);

        let later = t0 + ChronoDuration::hours(2);
        let refresher = {
            let r = Arc::clone(&resolver);
            thread::spawn(move || r.get_rates_at(later).len())
        };
        thread::sleep(std::time::Duration::from_millis(100));

        let started = Instant::now();
        let stale = resolver.rates_snapshot_at(later);
        assert!(started.elapsed() < std::time::Duration::from_millis(250));
        assert_eq!(stale.fetched_at, Some(t0));
        assert_eq!(stale.table.len(), 4);

        assert_eq!(refresher.join().unwrap(), 4);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(resolver.rates_snapshot_at(later).fetched_at, Some(later));
    }

    // ─── Conversion ─────────────────────────────────────────────

    #[test]
    fn test_convert_identity_without_fetch() {
        let (rates, calls) = FakeRates::serving(sample_rates());
        let resolver = resolver_with(rates);
        assert_eq!(resolver.convert(12.99, "USD", "USD"), 12.99);
        assert_eq!(resolver.convert(-3.5, "XYZ", "XYZ"), -3.5);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_convert_through_base() {
        let (rates, _) = FakeRates::serving(sample_rates());
        let resolver = resolver_with(rates);
        assert_relative_eq!(resolver.convert(10.0, "USD", "NGN"), 15000.0);
        assert_relative_eq!(resolver.convert(9.0, "EUR", "USD"), 10.0, epsilon = 1e-9);
        assert_relative_eq!(resolver.convert(9.0, "EUR", "GBP"), 8.0, epsilon = 1e-9);
    }

    #[test]
    fn test_convert_unknown_currency_unchanged() {
        let (rates, _) = FakeRates::serving(sample_rates());
        let resolver = resolver_with(rates);
        assert_eq!(resolver.convert(42.0, "JPY", "USD"), 42.0);
        assert_eq!(resolver.convert(42.0, "USD", "JPY"), 42.0);
        assert_eq!(resolver.convert(42.0, "ABC", "JPY"), 42.0);
    }

    #[test]
    fn test_convert_degrades_when_upstream_down() {
        let (rates, _) = FakeRates::failing();
        let resolver = resolver_with(rates);
        assert_eq!(resolver.convert(12.99, "USD", "NGN"), 12.99);
    }

    #[test]
    fn test_convert_with_zero_rate_unchanged() {
        let table: ExchangeRateTable = [("USD", 1.0), ("BAD", 0.0)].into_iter().collect();
        assert_eq!(convert_with(&table, 5.0, "BAD", "USD"), 5.0);
    }

    // ─── Quotes ─────────────────────────────────────────────────

    #[test]
    fn test_quote_for_visitor_uses_location_currency() {
        let (rates, calls) = FakeRates::failing();
        let resolver = PricingResolver::with_sources(
            Box::new(rates),
            Box::new(FakeGeo(Ok(LocationResult {
                country_code: "TZ".into(),
                currency_code: "TZS".into(),
            }))),
            RateCache::new(),
        );
        let (loc, quote) = resolver.quote_for_visitor();
        assert_eq!(loc.country_code, "TZ");
        assert_eq!(quote.currency, "TZS");
        assert_eq!(quote.prices, resolver.pricing_for("NGN"));
        // Quoting never touches the rate source
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_quote_for_visitor_default_is_usd() {
        let (rates, _) = FakeRates::failing();
        let resolver = resolver_with(rates);
        let (_, quote) = resolver.quote_for_visitor();
        assert_eq!(quote.currency, "USD");
        assert_eq!(resolver.format_price(quote.prices.monthly, "USD"), "$12.99");
        assert_eq!(resolver.symbol_for("EUR"), "\u{20AC}");
    }
}
