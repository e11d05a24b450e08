//! Order sizing and protective price derivation.
//!
//! Everything here is pure and exact (`rust_decimal`), so the same inputs
//! always produce the same quantities and prices:
//! - quantities are floored to a multiple of the symbol's step size
//! - protective prices are rounded to a multiple of the tick size, towards
//!   the side that keeps them on the loss side of the entry price

use rust_decimal::Decimal;

use crate::types::{ProtectivePrice, Side, SizingInput};

/// `floor((balance × buffer × leverage / price) / step) × step`.
///
/// Degenerate inputs (non-positive step, price or balance) size to zero
/// instead of failing; the caller decides whether a zero size is tradeable.
pub fn size_order(input: &SizingInput) -> Decimal {
    if input.step_size <= Decimal::ZERO
        || input.reference_price <= Decimal::ZERO
        || input.available_balance <= Decimal::ZERO
        || input.balance_buffer_ratio <= Decimal::ZERO
    {
        return Decimal::ZERO;
    }

    let raw = input
        .available_balance
        .checked_mul(input.balance_buffer_ratio)
        .and_then(|b| b.checked_mul(Decimal::from(input.leverage)))
        .and_then(|n| n.checked_div(input.reference_price));

    match raw {
        Some(raw) => floor_to_step(raw, input.step_size),
        None => Decimal::ZERO,
    }
}

/// Largest multiple of `step` that is `<= value`, at the precision of `step`.
pub fn floor_to_step(value: Decimal, step: Decimal) -> Decimal {
    to_step(value, step, Decimal::floor)
}

/// Smallest multiple of `step` that is `>= value`, at the precision of `step`.
pub fn ceil_to_step(value: Decimal, step: Decimal) -> Decimal {
    to_step(value, step, Decimal::ceil)
}

fn to_step(value: Decimal, step: Decimal, round: fn(&Decimal) -> Decimal) -> Decimal {
    if step <= Decimal::ZERO {
        return value;
    }
    let Some(units) = value.checked_div(step) else {
        return value;
    };
    let snapped = round(&units) * step;
    snapped.round_dp(step.normalize().scale())
}

/// Stop and limit prices for a reduce-only order opposite to `entry_side`.
///
/// A long (BUY entry) is protected below the fill, a short above it. The
/// limit uses the larger percentage so a triggered stop-limit still has room
/// to fill.
pub fn protective_prices(
    entry_price: Decimal,
    entry_side: Side,
    stop_loss_pct: Decimal,
    limit_loss_pct: Decimal,
    tick_size: Decimal,
) -> ProtectivePrice {
    match entry_side {
        Side::Buy => ProtectivePrice {
            stop_price: floor_to_step(entry_price * (Decimal::ONE - stop_loss_pct), tick_size),
            limit_price: floor_to_step(entry_price * (Decimal::ONE - limit_loss_pct), tick_size),
        },
        Side::Sell => ProtectivePrice {
            stop_price: ceil_to_step(entry_price * (Decimal::ONE + stop_loss_pct), tick_size),
            limit_price: ceil_to_step(entry_price * (Decimal::ONE + limit_loss_pct), tick_size),
        },
    }
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(500))]
        #[test]
        fn quantity_is_non_negative_multiple_of_step(
            balance_cents in 0i64..=100_000_000,
            leverage in 1u32..=125,
            price_ticks in 1i64..=10_000_000,
            step_exp in 0u32..=4,
            step_units in prop::sample::select(vec![1i64, 5]),
            buffer_bps in 1i64..=9_999,
        ) {
            let step = Decimal::new(step_units, step_exp);
            let input = SizingInput {
                available_balance: Decimal::new(balance_cents, 2),
                leverage,
                reference_price: Decimal::new(price_ticks, 2),
                step_size: step,
                balance_buffer_ratio: Decimal::new(buffer_bps, 4),
            };

            let q = size_order(&input);

            prop_assert!(q >= Decimal::ZERO);
            prop_assert_eq!((q / step).fract(), Decimal::ZERO);

            // never sizes above the unrounded notional
            let raw = input.available_balance * input.balance_buffer_ratio
                * Decimal::from(leverage) / input.reference_price;
            prop_assert!(q <= raw);
            prop_assert!(raw - q < step);
        }

        #[test]
        fn protection_is_strictly_on_the_loss_side(
            entry_cents in 1_000i64..=10_000_000,
            stop_bps in 1i64..=500,
            extra_bps in 0i64..=500,
            tick_exp in 0u32..=3,
            buy in any::<bool>(),
        ) {
            let entry = Decimal::new(entry_cents, 2);
            let stop_pct = Decimal::new(stop_bps, 4);
            let limit_pct = Decimal::new(stop_bps + extra_bps, 4);
            let tick = Decimal::new(1, tick_exp);
            let side = if buy { Side::Buy } else { Side::Sell };

            let p = protective_prices(entry, side, stop_pct, limit_pct, tick);

            prop_assert_eq!((p.stop_price / tick).fract(), Decimal::ZERO);
            prop_assert_eq!((p.limit_price / tick).fract(), Decimal::ZERO);
            match side {
                Side::Buy => {
                    prop_assert!(p.stop_price < entry);
                    prop_assert!(p.limit_price <= p.stop_price);
                }
                Side::Sell => {
                    prop_assert!(p.stop_price > entry);
                    prop_assert!(p.limit_price >= p.stop_price);
                }
            }
        }
    }
}
