//! Conversions between atomic token units (18 decimals) and decimal amounts.

/// Atomic units per whole token.
pub const SCALE: u128 = 1_000_000_000_000_000_000;
pub const DECIMALS: u32 = 18;

/// Decimal amount of an atomic quantity.
pub fn to_decimal(atomic: u128) -> f64 {
    (atomic / SCALE) as f64 + (atomic % SCALE) as f64 / SCALE as f64
}

/// Signed variant of [`to_decimal`] for ledger balances.
pub fn balance_to_decimal(balance: i128) -> f64 {
    let magnitude = to_decimal(balance.unsigned_abs());
    if balance < 0 {
        -magnitude
    } else {
        magnitude
    }
}

/// Atomic quantity of a decimal amount, truncated toward zero.
///
/// Negative and non-finite inputs map to zero; values past `u128::MAX`
/// saturate.
pub fn to_atomic(amount: f64) -> u128 {
    if !amount.is_finite() || amount <= 0.0 {
        return 0;
    }
    (amount * SCALE as f64) as u128
}
