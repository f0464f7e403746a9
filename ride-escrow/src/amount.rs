//! Fixed-point token amounts
//!
//! Amounts are held as integer base units with 18 decimals, the same
//! precision the payment token uses on chain. Decimal strings such as
//! `"1"` or `"0.9"` are parsed through `rust_decimal`.

use crate::{error::EscrowError, EscrowResult};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

/// Number of decimal places in one whole token
pub const TOKEN_DECIMALS: u32 = 18;

const UNITS_PER_TOKEN: u128 = 1_000_000_000_000_000_000;

/// Unsigned token amount in base units
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TokenAmount(u128);

impl TokenAmount {
    pub const ZERO: TokenAmount = TokenAmount(0);

    /// Amount from raw base units
    pub const fn from_units(units: u128) -> Self {
        Self(units)
    }

    /// Amount of whole tokens
    pub fn from_tokens(tokens: u64) -> Self {
        Self(tokens as u128 * UNITS_PER_TOKEN)
    }

    /// Parse a decimal token amount such as `"0.25"`
    pub fn parse_decimal(value: &str) -> EscrowResult<Self> {
        let decimal = Decimal::from_str(value.trim())
            .map_err(|e| EscrowError::invalid_input(format!("Invalid amount '{}': {}", value, e)))?;
        Self::try_from(decimal)
    }

    pub fn units(&self) -> u128 {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    pub fn checked_add(self, other: Self) -> EscrowResult<Self> {
        self.0
            .checked_add(other.0)
            .map(Self)
            .ok_or_else(|| EscrowError::invalid_input("Token amount overflow"))
    }

    pub fn checked_sub(self, other: Self) -> EscrowResult<Self> {
        self.0.checked_sub(other.0).map(Self).ok_or_else(|| {
            EscrowError::invalid_input(format!("Cannot subtract {} from {}", other, self))
        })
    }

    pub fn saturating_sub(self, other: Self) -> Self {
        Self(self.0.saturating_sub(other.0))
    }

    /// `self * numerator / denominator`, truncated toward zero
    pub fn mul_div(self, numerator: u128, denominator: u128) -> EscrowResult<Self> {
        if denominator == 0 {
            return Err(EscrowError::invalid_input("Division by zero"));
        }
        let quotient = self.0 / denominator;
        let remainder = self.0 % denominator;
        quotient
            .checked_mul(numerator)
            .zip(remainder.checked_mul(numerator))
            .and_then(|(whole, part)| whole.checked_add(part / denominator))
            .map(Self)
            .ok_or_else(|| EscrowError::invalid_input("Token amount overflow"))
    }
}

impl TryFrom<Decimal> for TokenAmount {
    type Error = EscrowError;

    fn try_from(value: Decimal) -> Result<Self, Self::Error> {
        if value.is_sign_negative() && !value.is_zero() {
            return Err(EscrowError::invalid_input(format!(
                "Amount {} must not be negative",
                value
            )));
        }

        let normalized = value.normalize();
        let scale = normalized.scale();
        if scale > TOKEN_DECIMALS {
            return Err(EscrowError::invalid_input(format!(
                "Amount {} has more than {} decimal places",
                value, TOKEN_DECIMALS
            )));
        }

        let mantissa = normalized.mantissa().unsigned_abs();
        10u128
            .checked_pow(TOKEN_DECIMALS - scale)
            .and_then(|factor| mantissa.checked_mul(factor))
            .map(Self)
            .ok_or_else(|| EscrowError::invalid_input(format!("Amount {} is too large", value)))
    }
}

impl FromStr for TokenAmount {
    type Err = EscrowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse_decimal(s)
    }
}

impl TryFrom<String> for TokenAmount {
    type Error = EscrowError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse_decimal(&value)
    }
}

impl From<TokenAmount> for String {
    fn from(value: TokenAmount) -> Self {
        value.to_string()
    }
}

impl fmt::Display for TokenAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let whole = self.0 / UNITS_PER_TOKEN;
        let frac = self.0 % UNITS_PER_TOKEN;
        if frac == 0 {
            return write!(f, "{}", whole);
        }

        let digits = format!("{:018}", frac);
        write!(f, "{}.{}", whole, digits.trim_end_matches('0'))
    }
}
