//! Stake conversion between the typed decimal string, integer wei and the
//! decimal copy used for statistics.
//!
//! The integer wei amount is the single source of truth; [`to_decimal`] and
//! [`format_eth`] derive presentations from it exactly once.

use crate::domain::WagerError;
use alloy::primitives::U256;
use rust_decimal::Decimal;
use std::str::FromStr;

pub const ETH_DECIMALS: u32 = 18;

/// Parse a user-typed stake such as `"0.01"` into wei.
pub fn parse_stake(input: &str) -> Result<U256, WagerError> {
    let trimmed = input.trim();
    let value = Decimal::from_str(trimmed)
        .map_err(|_| WagerError::InvalidStake(format!("'{trimmed}' is not a number")))?;

    if value.is_sign_negative() || value.is_zero() {
        return Err(WagerError::InvalidStake("stake must be greater than zero".into()));
    }
    if value.scale() > ETH_DECIMALS {
        return Err(WagerError::InvalidStake(format!(
            "at most {ETH_DECIMALS} decimal places"
        )));
    }

    let mantissa = u128::try_from(value.mantissa())
        .map_err(|_| WagerError::InvalidStake("stake out of range".into()))?;
    let scale = U256::from(10u64).pow(U256::from(ETH_DECIMALS - value.scale()));
    Ok(U256::from(mantissa) * scale)
}

/// Decimal ETH copy of a wei amount. `None` if it exceeds decimal precision.
pub fn to_decimal(wei: U256) -> Option<Decimal> {
    let raw = u128::try_from(wei).ok()?;
    let raw = i128::try_from(raw).ok()?;
    Decimal::try_from_i128_with_scale(raw, ETH_DECIMALS)
        .ok()
        .map(|d| d.normalize())
}

/// Human-readable ETH amount, e.g. `0.01`.
pub fn format_eth(wei: U256) -> String {
    match to_decimal(wei) {
        Some(d) => d.to_string(),
        None => format!("{wei} wei"),
    }
}

/// Serde adapter storing `U256` as a base-10 integer string.
pub mod wei_string {
    use alloy::primitives::U256;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &U256, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<U256, D::Error> {
        let s = String::deserialize(deserializer)?;
        U256::from_str_radix(&s, 10).map_err(serde::de::Error::custom)
    }
}
