//! Fixed-point arithmetic for curve pricing
//! Mission: exact integer math across tokens of differing decimal precision
//! Philosophy: widen before you multiply, round only where the caller says so

use ethnum::U256;

use crate::error::{EngineError, Result};

/// Scaling base for dimensionless fixed-point quantities (log arguments,
/// log outputs, the curve shift). Monetary amounts stay in smallest units.
pub const WAD: u128 = 1_000_000_000_000_000_000;

/// Basis-point denominator: 10_000 bps = 100%.
pub const BPS_DENOMINATOR: u128 = 10_000;

/// `ln(2)` scaled by WAD, the single conversion constant between the
/// binary-digit log2 and the natural log the curve formula wants.
const LN_2_WAD: u128 = 693_147_180_559_945_309;

const TWO_WAD: u128 = 2 * WAD;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rounding {
    Down,
    Up,
}

/// Computes `a * b / denominator` with a 256-bit intermediate product.
///
/// The operating ranges here (supply in smallest units times a unit price in
/// smallest quote units) overflow `u128` routinely, so the product is always
/// widened first and only the final quotient is narrowed back.
///
/// # Errors
/// `ArithmeticOverflow` if `denominator == 0` or the quotient exceeds `u128`.
pub fn mul_div(a: u128, b: u128, denominator: u128, rounding: Rounding) -> Result<u128> {
    if denominator == 0 {
        return Err(EngineError::ArithmeticOverflow {
            op: "mul_div division by zero",
        });
    }

    let product = U256::from(a) * U256::from(b);
    let denom = U256::from(denominator);
    let mut quotient = product / denom;
    if rounding == Rounding::Up && product % denom != U256::ZERO {
        quotient += U256::ONE;
    }

    if quotient > U256::from(u128::MAX) {
        return Err(EngineError::ArithmeticOverflow {
            op: "mul_div quotient",
        });
    }
    Ok(quotient.as_u128())
}

/// Truncating division.
pub fn div_floor(a: u128, b: u128) -> Result<u128> {
    if b == 0 {
        return Err(EngineError::ArithmeticOverflow {
            op: "div_floor division by zero",
        });
    }
    Ok(a / b)
}

/// Division rounded toward positive infinity. Used wherever a tiny amount may
/// never price at zero because a minimum non-zero charge must be collectible.
pub fn div_ceil(a: u128, b: u128) -> Result<u128> {
    if b == 0 {
        return Err(EngineError::ArithmeticOverflow {
            op: "div_ceil division by zero",
        });
    }
    // Remainder form rather than (a + b - 1) / b: safe for `a` near u128::MAX.
    Ok(a / b + u128::from(a % b != 0))
}

/// `10^decimals`, the factor between a token's smallest unit and one whole
/// token. Computed once per token at engine construction and cached; no other
/// component may re-derive a power of ten.
pub fn decimals_factor(decimals: u8) -> Result<u128> {
    10u128
        .checked_pow(u32::from(decimals))
        .ok_or_else(|| EngineError::ConfigurationInvalid {
            reason: format!("token decimals {decimals} out of supported range"),
        })
}

/// Converts an amount in smallest units to a WAD-scaled whole-token value.
pub fn normalize(amount_smallest_units: u128, decimals_factor: u128) -> Result<u128> {
    mul_div(amount_smallest_units, WAD, decimals_factor, Rounding::Down)
}

/// Inverse of [`normalize`]: WAD-scaled whole-token value back to smallest units.
pub fn denormalize(value_wad: u128, decimals_factor: u128) -> Result<u128> {
    mul_div(value_wad, decimals_factor, WAD, Rounding::Down)
}

/// `amount * bps / 10_000`, floor-rounded.
pub fn bps_of(amount: u128, bps: u16) -> Result<u128> {
    mul_div(amount, u128::from(bps), BPS_DENOMINATOR, Rounding::Down)
}

/// Natural log of a WAD-scaled value, WAD-scaled result. Defined for
/// `x >= 1.0` only (the curve shift keeps every argument there).
///
/// Built as binary-digit log2 extraction times a fixed `ln 2` constant. The
/// binary expansion is truncated, never estimated, so the result is monotone
/// non-decreasing in `x`. Curve pricing stands on that property.
pub fn ln_wad(x: u128) -> Result<u128> {
    mul_div(log2_wad(x)?, LN_2_WAD, WAD, Rounding::Down)
}

/// log2 of a WAD-scaled value for `x >= 1.0`, WAD-scaled result.
///
/// The most significant bit of `x / WAD` gives the integer part; fractional
/// bits come from iterated squaring of the mantissa. Each extracted bit is a
/// true digit of the binary expansion, so truncation preserves ordering.
fn log2_wad(x: u128) -> Result<u128> {
    if x < WAD {
        return Err(EngineError::ArithmeticOverflow {
            op: "log2 argument below one",
        });
    }

    let integer_bits = 127 - (x / WAD).leading_zeros();
    let mut result = u128::from(integer_bits) * WAD;

    // Mantissa in [WAD, 2*WAD); squaring it stays far inside u128.
    let mut y = x >> integer_bits;
    if y == WAD {
        return Ok(result);
    }

    let mut delta = WAD / 2;
    while delta > 0 {
        y = y * y / WAD;
        if y >= TWO_WAD {
            result += delta;
            y >>= 1;
        }
        delta /= 2;
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn mul_div_widens_past_u128() {
        // price ~1e20 (hundreds of quote units at 18 decimals) times a supply
        // delta of 1e25 smallest units: the product is ~1e45, far past u128.
        let price = 100 * WAD;
        let delta = 10_000_000u128 * WAD;
        let cost = mul_div(price, delta, WAD, Rounding::Down).unwrap();
        assert_eq!(cost, 100 * 10_000_000 * WAD);
    }

    #[test]
    fn mul_div_rounding_modes() {
        assert_eq!(mul_div(7, 1, 2, Rounding::Down).unwrap(), 3);
        assert_eq!(mul_div(7, 1, 2, Rounding::Up).unwrap(), 4);
        assert_eq!(mul_div(8, 1, 2, Rounding::Down).unwrap(), 4);
        assert_eq!(mul_div(8, 1, 2, Rounding::Up).unwrap(), 4);
    }

    #[test]
    fn mul_div_rejects_zero_denominator() {
        assert!(matches!(
            mul_div(1, 1, 0, Rounding::Down),
            Err(EngineError::ArithmeticOverflow { .. })
        ));
    }

    #[test]
    fn mul_div_rejects_unrepresentable_quotient() {
        assert!(matches!(
            mul_div(u128::MAX, 2, 1, Rounding::Down),
            Err(EngineError::ArithmeticOverflow { .. })
        ));
    }

    #[test]
    fn div_ceil_at_u128_edge() {
        assert_eq!(div_ceil(u128::MAX, 2).unwrap(), u128::MAX / 2 + 1);
        assert_eq!(div_ceil(0, 7).unwrap(), 0);
    }

    #[test]
    fn decimals_factor_common_tokens() {
        assert_eq!(decimals_factor(6).unwrap(), 1_000_000);
        assert_eq!(decimals_factor(9).unwrap(), 1_000_000_000);
        assert_eq!(decimals_factor(18).unwrap(), WAD);
        assert!(decimals_factor(39).is_err());
    }

    #[test]
    fn normalize_round_trips_whole_tokens() {
        let factor = decimals_factor(9).unwrap();
        let amount = 123 * factor;
        let wad = normalize(amount, factor).unwrap();
        assert_eq!(wad, 123 * WAD);
        assert_eq!(denormalize(wad, factor).unwrap(), amount);
    }

    #[test]
    fn log2_exact_powers() {
        assert_eq!(log2_wad(WAD).unwrap(), 0);
        assert_eq!(log2_wad(2 * WAD).unwrap(), WAD);
        assert_eq!(log2_wad(4 * WAD).unwrap(), 2 * WAD);
        assert_eq!(log2_wad(1024 * WAD).unwrap(), 10 * WAD);
    }

    #[test]
    fn log2_rejects_sub_unit_argument() {
        assert!(log2_wad(WAD - 1).is_err());
        assert!(log2_wad(0).is_err());
    }

    #[test]
    fn ln_known_values() {
        assert_eq!(ln_wad(WAD).unwrap(), 0);

        // ln(2) should land within truncation distance of the constant.
        let ln2 = ln_wad(2 * WAD).unwrap();
        assert!(ln2.abs_diff(693_147_180_559_945_309) < 1_000);

        // ln(e) ~= 1.0: e * WAD = 2_718_281_828_459_045_235.
        let ln_e = ln_wad(2_718_281_828_459_045_235).unwrap();
        assert!(ln_e.abs_diff(WAD) < 1_000_000);

        // ln(1e7), the whole-token count at the top of the operating range.
        let ln_top = ln_wad(10_000_000 * WAD).unwrap();
        assert!(ln_top.abs_diff(16_118_095_650_958_319_788) < 1_000_000);
    }

    proptest! {
        #[test]
        fn ln_is_monotone(a in WAD..=100_000_000u128 * WAD, b in WAD..=100_000_000u128 * WAD) {
            let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
            prop_assert!(ln_wad(lo).unwrap() <= ln_wad(hi).unwrap());
        }

        #[test]
        fn div_ceil_dominates_floor(a in any::<u128>(), b in 1..=u128::MAX) {
            let floor = div_floor(a, b).unwrap();
            let ceil = div_ceil(a, b).unwrap();
            prop_assert!(ceil >= floor);
            prop_assert!(ceil - floor <= 1);
            prop_assert_eq!(ceil == floor, a % b == 0);
        }

        #[test]
        fn mul_div_up_dominates_down(a in any::<u64>(), b in any::<u64>(), d in 1..=u64::MAX) {
            let down = mul_div(a as u128, b as u128, d as u128, Rounding::Down).unwrap();
            let up = mul_div(a as u128, b as u128, d as u128, Rounding::Up).unwrap();
            prop_assert!(up >= down);
            prop_assert!(up - down <= 1);
        }
    }
}
