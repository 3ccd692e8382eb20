//! Presentation helpers. Rounding happens here and nowhere else.

use super::catalog::symbol_for;
use super::types::BillingPeriod;

/// Symbol followed by the amount fixed to two decimals, e.g. "$12.99".
pub fn format_price(amount: f64, code: &str) -> String {
    format!("{}{:.2}", symbol_for(code), amount)
}

/// Monthly equivalent of a price billed every `period`.
pub fn per_month(amount: f64, period: BillingPeriod) -> f64 {
    amount / f64::from(period.months())
}

/// Free tier price as shown next to the premium plan, e.g. "₦0".
pub fn format_free(code: &str) -> String {
    format!("{}0", symbol_for(code))
}
