//! Minor-unit money arithmetic.
//!
//! Amounts are stored as `i64` minor units (paise, cents). Percentages go through `Decimal` and
//! round half-up back to whole minor units; proportional splits use exact `i128` arithmetic.

use rust_decimal::prelude::*;
use rust_decimal_macros::dec;

const HUNDRED: Decimal = dec!(100);

/// Rounds to a whole minor unit, half away from zero.
fn to_minor(value: Decimal) -> i64 {
    value
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        .to_i64()
        .unwrap_or(0)
}

/// `percent`% of `amount`, with `percent` clamped to `0..=100`.
pub fn percent_of(amount: i64, percent: Decimal) -> i64 {
    if amount <= 0 || percent <= Decimal::ZERO {
        return 0;
    }
    let percent = percent.min(HUNDRED);
    to_minor(Decimal::from(amount) * percent / HUNDRED)
}

/// Splits `total` across `weights` in proportion, using the largest-remainder method so the
/// parts always sum to `total`. Ties go to the earlier weight.
///
/// Returns all zeros when the weights sum to zero or `total` is not positive.
pub fn allocate_proportionally(total: i64, weights: &[i64]) -> Vec<i64> {
    // i64 * i64 always fits in i128
    let weight_sum: i128 = weights.iter().map(|w| i128::from((*w).max(0))).sum();
    if total <= 0 || weight_sum <= 0 {
        return vec![0; weights.len()];
    }

    let total_wide = i128::from(total);
    let mut parts = Vec::with_capacity(weights.len());
    let mut remainders = Vec::with_capacity(weights.len());
    for (idx, weight) in weights.iter().enumerate() {
        let scaled = total_wide * i128::from((*weight).max(0));
        // each part is at most `total`
        parts.push(i64::try_from(scaled / weight_sum).unwrap_or(total));
        remainders.push((idx, scaled % weight_sum));
    }

    let mut leftover = total - parts.iter().sum::<i64>();
    remainders.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
    for (idx, _) in remainders {
        if leftover <= 0 {
            break;
        }
        parts[idx] += 1;
        leftover -= 1;
    }
    parts
}

/// Formats minor units as a decimal string, e.g. `12050` -> `"120.50"`.
pub fn format_minor(amount: i64) -> String {
    Decimal::new(amount, 2).to_string()
}
