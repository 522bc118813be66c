//! Risk-adjusted execution sizing.

use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;

use crate::models::{Analysis, RiskLevel};

/// Compute the amount to invest for one tick, given the plan's first-tick
/// snapshot and the current market analysis.
///
/// ```text
/// UA = IA * M          (risk-amplified amount)
/// RN = (UA - IA) * PF  (momentum-scaled slack)
/// amount = UA - RN when the price is going up, UA + RN otherwise
/// ```
///
/// Buying into an uptrend is dampened, buying into a dip is boosted. With
/// RiskLevel::No the multiplier is 1.0, the slack collapses to zero, and the
/// result is exactly `initial` regardless of trend.
///
/// Only applies from the second execution onward; the first tick invests the
/// plan's nominal amount unmodified.
pub fn execution_amount(initial: Decimal, risk: RiskLevel, analysis: &Analysis) -> Decimal {
    let updated = initial * risk.multiplier();
    let factor = Decimal::from_f64(analysis.price_factor).unwrap_or(Decimal::ONE);
    let slack = (updated - initial) * factor;

    if analysis.is_price_going_up {
        updated - slack
    } else {
        updated + slack
    }
}
