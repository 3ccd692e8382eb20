//! Compiled-in price catalog: supported currencies, curated regional
//! prices, and the ordered fallback policy that picks one of them.

use super::types::{PlanPrices, PriceRule};
use serde::Serialize;

// ─── Supported currencies ───────────────────────────────────────

struct SupportedCurrency {
    code: &'static str,
    symbol: &'static str,
}

const SUPPORTED_CURRENCIES: &[SupportedCurrency] = &[
    SupportedCurrency {
        code: "NGN",
        symbol: "\u{20A6}",
    },
    SupportedCurrency {
        code: "USD",
        symbol: "$",
    },
    SupportedCurrency {
        code: "GBP",
        symbol: "\u{00A3}",
    },
    SupportedCurrency {
        code: "EUR",
        symbol: "\u{20AC}",
    },
    SupportedCurrency {
        code: "ZAR",
        symbol: "R",
    },
    SupportedCurrency {
        code: "KES",
        symbol: "KSh",
    },
    SupportedCurrency {
        code: "GHS",
        symbol: "GH\u{20B5}",
    },
];

/// A supported currency as exposed to the CLI and API.
#[derive(Debug, Clone, Serialize)]
pub struct CurrencyInfo {
    pub code: String,
    pub symbol: String,
}

/// Every supported currency, in catalog order.
pub fn supported_currencies() -> Vec<CurrencyInfo> {
    SUPPORTED_CURRENCIES
        .iter()
        .map(|c| CurrencyInfo {
            code: c.code.to_string(),
            symbol: c.symbol.to_string(),
        })
        .collect()
}

pub fn is_supported(code: &str) -> bool {
    SUPPORTED_CURRENCIES.iter().any(|c| c.code == code)
}

/// Display symbol for `code`, or the code itself when unmapped.
pub fn symbol_for(code: &str) -> String {
    SUPPORTED_CURRENCIES
        .iter()
        .find(|c| c.code == code)
        .map(|c| c.symbol.to_string())
        .unwrap_or_else(|| code.to_string())
}

// ─── Regional prices ────────────────────────────────────────────

const EMERGING_MARKET_PRICES: PlanPrices = PlanPrices {
    monthly: 6.99,
    quarterly: 18.99,
    yearly: 59.99,
};
const USD_PRICES: PlanPrices = PlanPrices {
    monthly: 12.99,
    quarterly: 34.99,
    yearly: 129.99,
};

const REGIONAL_PRICES: &[(&str, PlanPrices)] = &[
    ("NGN", EMERGING_MARKET_PRICES),
    ("USD", USD_PRICES),
    (
        "GBP",
        PlanPrices {
            monthly: 9.99,
            quarterly: 26.99,
            yearly: 99.99,
        },
    ),
    (
        "EUR",
        PlanPrices {
            monthly: 11.99,
            quarterly: 31.99,
            yearly: 119.99,
        },
    ),
    ("ZAR", EMERGING_MARKET_PRICES),
    ("KES", EMERGING_MARKET_PRICES),
    ("GHS", EMERGING_MARKET_PRICES),
];

/// Currencies priced as the NGN-keyed emerging-market tier.
pub const EMERGING_MARKETS: &[&str] = &["NGN", "ZAR", "KES", "GHS", "TZS", "UGX"];

/// Fallback order. The last rule always matches.
const PRICE_POLICY: &[PriceRule] = &[
    PriceRule::EmergingMarket,
    PriceRule::Direct,
    PriceRule::UsdFallback,
];

fn direct_entry(code: &str) -> Option<PlanPrices> {
    REGIONAL_PRICES
        .iter()
        .find(|(c, _)| *c == code)
        .map(|(_, p)| *p)
}

fn apply_rule(rule: PriceRule, code: &str) -> Option<PlanPrices> {
    match rule {
        PriceRule::EmergingMarket if EMERGING_MARKETS.contains(&code) => direct_entry("NGN"),
        PriceRule::EmergingMarket => None,
        PriceRule::Direct => direct_entry(code),
        PriceRule::UsdFallback => Some(USD_PRICES),
    }
}

/// Resolve the price triple for `code` together with the rule that matched.
///
/// Codes are compared exactly; callers normalize user input first.
pub fn resolve_prices(code: &str) -> (PriceRule, PlanPrices) {
    PRICE_POLICY
        .iter()
        .find_map(|rule| apply_rule(*rule, code).map(|p| (*rule, p)))
        .unwrap_or((PriceRule::UsdFallback, USD_PRICES))
}

/// Price triple for `code`. Total over all inputs.
pub fn pricing_for(code: &str) -> PlanPrices {
    resolve_prices(code).1
}
