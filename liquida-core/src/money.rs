use rust_decimal::{Decimal, RoundingStrategy};

/// Default number of fractional digits kept on persisted amounts.
pub const DEFAULT_SCALE: u32 = 2;

/// Round a monetary amount half away from zero.
pub fn round_amount(value: Decimal, scale: u32) -> Decimal {
    value.round_dp_with_strategy(scale, RoundingStrategy::MidpointAwayFromZero)
}

/// Restrict `value` to the optional inclusive bounds.
pub fn clamp_between(value: Decimal, min: Option<Decimal>, max: Option<Decimal>) -> Decimal {
    let mut out = value;
    if let Some(floor) = min {
        out = out.max(floor);
    }
    if let Some(ceiling) = max {
        out = out.min(ceiling);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn rounds_half_away_from_zero() {
        assert_eq!(round_amount(dec!(10.005), 2), dec!(10.01));
        assert_eq!(round_amount(dec!(10.004), 2), dec!(10.00));
    }

    #[test]
    fn clamps_only_provided_bounds() {
        assert_eq!(clamp_between(dec!(30), None, Some(dec!(25))), dec!(25));
        assert_eq!(clamp_between(dec!(3), Some(dec!(5)), None), dec!(5));
        assert_eq!(clamp_between(dec!(7), None, None), dec!(7));
    }
}
