//! Storage capacity quantities
//!
//! Parses Kubernetes quantity strings (`100G`, `1.5Gi`, `5368709120`, `1e3`)
//! into a byte count while keeping the original text for rendering.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A storage size as written in configuration, plus its size in bytes
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct StorageCapacity {
    quantity: String,
    bytes: u64,
}

impl StorageCapacity {
    /// Parse a quantity string
    ///
    /// Accepts the Kubernetes quantity grammar: a decimal number followed by
    /// a binary suffix (`Ki`..`Ei`), a decimal suffix (`n`, `u`, `m`, `k`,
    /// `M`..`E`) or an exponent (`e3`, `E-2`). Fractional byte counts round
    /// up, matching how the API server resolves quantities.
    pub fn parse(input: &str) -> Result<Self> {
        let quantity = input.trim();
        if quantity.is_empty() {
            return Err(Error::CapacityParse("empty quantity".into()));
        }
        if quantity.starts_with('-') {
            return Err(Error::CapacityParse(format!(
                "{:?} is negative",
                quantity
            )));
        }
        let unsigned = quantity.strip_prefix('+').unwrap_or(quantity);

        let split = unsigned
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(unsigned.len());
        let (number, suffix) = unsigned.split_at(split);

        let (whole, fraction) = number.split_once('.').unwrap_or((number, ""));
        if (whole.is_empty() && fraction.is_empty()) || fraction.contains('.') {
            return Err(Error::CapacityParse(format!(
                "invalid number in {:?}",
                quantity
            )));
        }
        let mantissa: u128 = format!("{}{}", whole, fraction)
            .parse()
            .map_err(|_| Error::CapacityParse(format!("invalid number in {:?}", quantity)))?;

        let scale = Scale::from_suffix(suffix).ok_or_else(|| {
            Error::CapacityParse(format!("unknown suffix {:?} in {:?}", suffix, quantity))
        })?;

        let bytes = scale
            .apply(mantissa, fraction.len() as u32)
            .and_then(|bytes| u64::try_from(bytes).ok())
            .ok_or_else(|| Error::CapacityParse(format!("{:?} overflows u64", quantity)))?;

        Ok(Self {
            quantity: quantity.to_string(),
            bytes,
        })
    }

    /// Quantity text as it is written into manifests
    pub fn quantity(&self) -> &str {
        &self.quantity
    }

    /// Size in bytes
    pub fn bytes(&self) -> u64 {
        self.bytes
    }
}

impl Default for StorageCapacity {
    /// 100G, the size every volume and claim is requested with unless
    /// configured otherwise
    fn default() -> Self {
        Self {
            quantity: "100G".to_string(),
            bytes: 100 * 1000 * 1000 * 1000,
        }
    }
}

/// Multiplier named by a quantity suffix
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scale {
    /// Power of 1024
    Binary(u32),
    /// Power of 10
    Decimal(i32),
}

impl Scale {
    fn from_suffix(suffix: &str) -> Option<Self> {
        let scale = match suffix {
            "Ki" => Scale::Binary(1),
            "Mi" => Scale::Binary(2),
            "Gi" => Scale::Binary(3),
            "Ti" => Scale::Binary(4),
            "Pi" => Scale::Binary(5),
            "Ei" => Scale::Binary(6),
            "n" => Scale::Decimal(-9),
            "u" => Scale::Decimal(-6),
            "m" => Scale::Decimal(-3),
            "" => Scale::Decimal(0),
            "k" => Scale::Decimal(3),
            "M" => Scale::Decimal(6),
            "G" => Scale::Decimal(9),
            "T" => Scale::Decimal(12),
            "P" => Scale::Decimal(15),
            "E" => Scale::Decimal(18),
            other => {
                let exponent = other.strip_prefix('e').or_else(|| other.strip_prefix('E'))?;
                Scale::Decimal(exponent.parse().ok()?)
            }
        };
        Some(scale)
    }

    /// Whole bytes for `mantissa * 10^-fraction_digits` in this scale,
    /// rounded up. `None` on overflow.
    fn apply(self, mantissa: u128, fraction_digits: u32) -> Option<u128> {
        match self {
            Scale::Binary(power) => {
                let numerator = mantissa.checked_mul(1024u128.checked_pow(power)?)?;
                Some(ceil_div(numerator, 10u128.checked_pow(fraction_digits)?))
            }
            Scale::Decimal(power) => {
                let exponent = i64::from(power) - i64::from(fraction_digits);
                if exponent >= 0 {
                    let exponent = u32::try_from(exponent).ok()?;
                    mantissa.checked_mul(10u128.checked_pow(exponent)?)
                } else {
                    let exponent = u32::try_from(-exponent).ok()?;
                    match 10u128.checked_pow(exponent) {
                        Some(divisor) => Some(ceil_div(mantissa, divisor)),
                        // Smaller than any representable divisor: at most one byte
                        None => Some(u128::from(mantissa > 0)),
                    }
                }
            }
        }
    }
}

fn ceil_div(numerator: u128, divisor: u128) -> u128 {
    numerator / divisor + u128::from(numerator % divisor != 0)
}

impl FromStr for StorageCapacity {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for StorageCapacity {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<StorageCapacity> for String {
    fn from(value: StorageCapacity) -> Self {
        value.quantity
    }
}

impl fmt::Display for StorageCapacity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.quantity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_parse_suffixes() {
        assert_eq!(StorageCapacity::parse("100G").unwrap().bytes(), 100_000_000_000);
        assert_eq!(StorageCapacity::parse("100Gi").unwrap().bytes(), 100 * 1024 * 1024 * 1024);
        assert_eq!(StorageCapacity::parse("512").unwrap().bytes(), 512);
        assert_eq!(StorageCapacity::parse("1Ti").unwrap().quantity(), "1Ti");
    }

    #[test]
    fn test_default_matches_fixed_size() {
        let capacity = StorageCapacity::default();
        assert_eq!(capacity, StorageCapacity::parse("100G").unwrap());
    }

    #[test]
    fn test_parse_fractions_and_exponents() {
        assert_eq!(
            StorageCapacity::parse("1.5Gi").unwrap().bytes(),
            3 * 512 * 1024 * 1024
        );
        assert_eq!(StorageCapacity::parse("1.5Gi").unwrap().quantity(), "1.5Gi");
        assert_eq!(StorageCapacity::parse("0.5k").unwrap().bytes(), 500);
        assert_eq!(StorageCapacity::parse(".5M").unwrap().bytes(), 500_000);
        assert_eq!(StorageCapacity::parse("1e3").unwrap().bytes(), 1000);
        assert_eq!(StorageCapacity::parse("25E-1").unwrap().bytes(), 3);
        assert_eq!(StorageCapacity::parse("+2Ki").unwrap().bytes(), 2048);
        // Sub-byte quantities round up
        assert_eq!(StorageCapacity::parse("500m").unwrap().bytes(), 1);
        assert_eq!(StorageCapacity::parse("0m").unwrap().bytes(), 0);
    }

    #[test]
    fn test_catalog_accepts_fractional_capacity() {
        let catalog = crate::catalog::Catalog::parse(
            r#"
            {"name": "standard", "classification": "unclassified", "secret": "azure-secret", "capacity": "1.5Gi"}
            {"name": "scratch", "classification": "unclassified", "secret": "azure-secret", "capacity": "500m"}
            "#,
        )
        .unwrap();
        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog.get("standard").unwrap().capacity.quantity(), "1.5Gi");
        assert_eq!(catalog.get("scratch").unwrap().capacity.bytes(), 1);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert_matches!(StorageCapacity::parse(""), Err(Error::CapacityParse(_)));
        assert_matches!(StorageCapacity::parse("Gi"), Err(Error::CapacityParse(_)));
        assert_matches!(StorageCapacity::parse("10Qi"), Err(Error::CapacityParse(_)));
        assert_matches!(StorageCapacity::parse("1.2.3Gi"), Err(Error::CapacityParse(_)));
        assert_matches!(StorageCapacity::parse("-1Gi"), Err(Error::CapacityParse(_)));
        assert_matches!(StorageCapacity::parse("1e"), Err(Error::CapacityParse(_)));
        assert_matches!(StorageCapacity::parse("99999999E"), Err(Error::CapacityParse(_)));
    }
}
