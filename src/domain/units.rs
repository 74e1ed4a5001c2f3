//! Conversion from on-chain 1e18-scaled integers to token units.
//!
//! Every amount read from the chain passes through [`to_token_units`] exactly
//! once before it is bucketized, summed into a checkpoint, or persisted.

use super::Decimal;
use alloy::primitives::U256;
use rust_decimal::Decimal as RustDecimal;
use thiserror::Error;

/// Number of decimals of the OVL token.
pub const TOKEN_DECIMALS: u32 = 18;

/// 10^18 as a 256-bit integer.
pub const WEI_PER_TOKEN: U256 = U256::from_limbs([1_000_000_000_000_000_000, 0, 0, 0]);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScaleError {
    #[error("raw amount {0} does not fit a token-unit decimal")]
    OutOfRange(U256),
}

/// Divide a raw 1e18-scaled amount down to token units.
///
/// Lossless for every amount whose whole-token part fits the 96-bit decimal
/// mantissa (about 7.9e28 tokens).
pub fn to_token_units(raw: U256) -> Result<Decimal, ScaleError> {
    let (whole, frac) = raw.div_rem(WEI_PER_TOKEN);

    let whole = u128::try_from(whole)
        .ok()
        .and_then(|w| i128::try_from(w).ok())
        .and_then(|w| RustDecimal::try_from_i128_with_scale(w, 0).ok())
        .ok_or(ScaleError::OutOfRange(raw))?;

    // frac < 10^18, always representable.
    let frac = u128::try_from(frac)
        .ok()
        .and_then(|f| RustDecimal::try_from_i128_with_scale(f as i128, TOKEN_DECIMALS).ok())
        .ok_or(ScaleError::OutOfRange(raw))?;

    whole
        .checked_add(frac)
        .map(Decimal::new)
        .ok_or(ScaleError::OutOfRange(raw))
}

/// Build a raw amount from whole tokens. Test and fixture helper.
pub fn from_whole_tokens(tokens: u64) -> U256 {
    U256::from(tokens) * WEI_PER_TOKEN
}
