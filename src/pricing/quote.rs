//! Rendered price sheets for one currency.

use super::catalog;
use super::display::{format_free, format_price, per_month};
use super::types::{BillingPeriod, PlanPrices, PriceRule};
use serde::Serialize;

/// One billing option of the premium plan.
#[derive(Debug, Clone, Serialize)]
pub struct PlanOption {
    pub period: BillingPeriod,
    pub amount: f64,
    pub formatted: String,
    pub suffix: &'static str,
    /// Monthly equivalent, only for multi-month periods.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub per_month: Option<String>,
}

/// Everything the paywall shows for a currency.
#[derive(Debug, Clone, Serialize)]
pub struct PricingQuote {
    pub currency: String,
    pub symbol: String,
    pub rule: PriceRule,
    pub prices: PlanPrices,
    pub free: String,
    pub options: Vec<PlanOption>,
}

impl PricingQuote {
    pub fn for_currency(code: &str) -> Self {
        let (rule, prices) = catalog::resolve_prices(code);
        let options = BillingPeriod::ALL
            .iter()
            .map(|&period| {
                let amount = prices.amount(period);
                PlanOption {
                    period,
                    amount,
                    formatted: format_price(amount, code),
                    suffix: period.suffix(),
                    per_month: (period.months() > 1)
                        .then(|| format_price(per_month(amount, period), code)),
                }
            })
            .collect();

        Self {
            currency: code.to_string(),
            symbol: catalog::symbol_for(code),
            rule,
            prices,
            free: format_free(code),
            options,
        }
    }

    pub fn option(&self, period: BillingPeriod) -> Option<&PlanOption> {
        self.options.iter().find(|o| o.period == period)
    }

    /// Multi-line summary for terminal output.
    pub fn display_lines(&self) -> String {
        let mut out = format!(
            "Premium pricing in {} ({}, {})\n  Free: {} forever",
            self.currency, self.symbol, self.rule, self.free
        );
        for o in &self.options {
            out.push_str(&format!("\n  {:<9} {}{}", o.period, o.formatted, o.suffix));
            if let Some(ref pm) = o.per_month {
                out.push_str(&format!("  ({}/month)", pm));
            }
        }
        out
    }
}
