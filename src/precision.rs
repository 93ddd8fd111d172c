//! Amount and price formatting against a market's lot and tick sizes.
//!
//! Amounts are truncated toward zero (never round an order up past what the
//! caller asked for); prices are rounded half away from zero to the nearest
//! tick. Output has no trailing zeros, so formatting an already formatted
//! value returns the same string.

use std::str::FromStr;

use anyhow::{Context, Result};
use rust_decimal::{Decimal, RoundingStrategy};

use crate::error::ExchangeError;
use crate::types::Market;

/// Truncate `amount` to the market's lot step.
///
/// Fails with [`ExchangeError::InvalidOrder`] when the truncated amount is
/// zero, i.e. the request is smaller than one lot.
pub fn amount_to_precision(market: &Market, amount: Decimal) -> Result<String> {
    let truncated = snap(market, amount, market.amount_step, RoundingStrategy::ToZero)?;
    if truncated.is_zero() {
        return Err(ExchangeError::InvalidOrder(format!(
            "{} amount {} must be greater than minimum amount precision of {}",
            market.symbol,
            amount,
            market.amount_step.normalize()
        ))
        .into());
    }
    Ok(truncated.normalize().to_string())
}

/// Round `price` to the market's tick size.
pub fn price_to_precision(market: &Market, price: Decimal) -> Result<String> {
    let rounded = snap(
        market,
        price,
        market.price_step,
        RoundingStrategy::MidpointAwayFromZero,
    )?;
    Ok(rounded.normalize().to_string())
}

/// Convert a caller-supplied float into a `Decimal` through its shortest
/// round-trip representation, so `59990.15` stays `59990.15`.
pub fn decimal_from_f64(value: f64) -> Result<Decimal> {
    if !value.is_finite() {
        return Err(ExchangeError::InvalidOrder(format!("{value} is not a finite number")).into());
    }
    Decimal::from_str(&value.to_string())
        .with_context(|| format!("{value} is out of decimal range"))
}

/// Round `value` to a whole number of `step`s. Fails instead of panicking
/// when the step count does not fit a `Decimal`.
fn snap(
    market: &Market,
    value: Decimal,
    step: Decimal,
    strategy: RoundingStrategy,
) -> Result<Decimal> {
    if step <= Decimal::ZERO {
        return Ok(value);
    }
    value
        .checked_div(step)
        .map(|steps| steps.round_dp_with_strategy(0, strategy))
        .and_then(|steps| steps.checked_mul(step))
        .ok_or_else(|| {
            ExchangeError::InvalidOrder(format!(
                "{} value {} is out of range for step {}",
                market.symbol,
                value,
                step.normalize()
            ))
            .into()
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn market(amount_step: Decimal, price_step: Decimal) -> Market {
        Market {
            symbol: "BTC/USDT:USDT".into(),
            id: "BTCUSDT".into(),
            base: "BTC".into(),
            quote: "USDT".into(),
            settle: "USDT".into(),
            amount_step,
            price_step,
            min_amount: amount_step,
            min_notional: Some(dec!(5)),
            min_leverage: Some(1),
            max_leverage: Some(125),
            active: true,
        }
    }

    #[test]
    fn amount_truncates_toward_zero() {
        let m = market(dec!(0.001), dec!(0.1));
        assert_eq!(amount_to_precision(&m, dec!(0.12389)).unwrap(), "0.123");
        assert_eq!(amount_to_precision(&m, dec!(1.9999)).unwrap(), "1.999");
    }

    #[test]
    fn amount_strips_trailing_zeros() {
        let m = market(dec!(0.0001), dec!(0.1));
        assert_eq!(amount_to_precision(&m, dec!(1.5)).unwrap(), "1.5");
        assert_eq!(amount_to_precision(&m, dec!(2)).unwrap(), "2");
    }

    #[test]
    fn amount_below_one_lot_is_rejected() {
        let m = market(dec!(0.01), dec!(0.1));
        let err = amount_to_precision(&m, dec!(0.009)).unwrap_err();
        assert!(matches!(
            ExchangeError::find(&err),
            Some(ExchangeError::InvalidOrder(_))
        ));
    }

    #[test]
    fn price_rounds_half_away_from_zero() {
        let m = market(dec!(0.001), dec!(0.1));
        assert_eq!(price_to_precision(&m, dec!(64250.25)).unwrap(), "64250.3");
        assert_eq!(price_to_precision(&m, dec!(64250.24)).unwrap(), "64250.2");
    }

    #[test]
    fn price_respects_non_decimal_tick() {
        // pricePlace=1, priceEndStep=5
        let m = market(dec!(1), dec!(0.5));
        assert_eq!(price_to_precision(&m, dec!(101.26)).unwrap(), "101.5");
        assert_eq!(price_to_precision(&m, dec!(101.24)).unwrap(), "101");
    }

    #[test]
    fn formatting_is_idempotent() {
        let m = market(dec!(0.001), dec!(0.01));
        for raw in [0.123456_f64, 17.0, 3.14159, 2500.005] {
            let value = decimal_from_f64(raw).unwrap();
            let amount = amount_to_precision(&m, value).unwrap();
            let again = amount_to_precision(&m, amount.parse().unwrap()).unwrap();
            assert_eq!(amount, again);

            let price = price_to_precision(&m, value).unwrap();
            let again = price_to_precision(&m, price.parse().unwrap()).unwrap();
            assert_eq!(price, again);
        }
    }

    #[test]
    fn oversized_values_are_rejected_not_panicking() {
        let m = market(dec!(0.0001), dec!(0.0001));
        let huge = decimal_from_f64(1e25).unwrap();

        let err = amount_to_precision(&m, huge).unwrap_err();
        assert!(matches!(
            ExchangeError::find(&err),
            Some(ExchangeError::InvalidOrder(_))
        ));
        let err = price_to_precision(&m, huge).unwrap_err();
        assert!(matches!(
            ExchangeError::find(&err),
            Some(ExchangeError::InvalidOrder(_))
        ));
    }

    #[test]
    fn non_finite_input_is_rejected() {
        assert!(decimal_from_f64(f64::NAN).is_err());
        assert!(decimal_from_f64(f64::INFINITY).is_err());
        assert_eq!(decimal_from_f64(0.1).unwrap(), dec!(0.1));
        assert_eq!(decimal_from_f64(59990.15).unwrap(), dec!(59990.15));
    }
}
