//! Storage capacity quantities
//!
//! Parses and formats the quantity strings used in claim templates
//! (`2Gi`, `500M`, `5368709120`) and the human-readable sizes printed by
//! `df -h` (`4.9G`).

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub const KIB: u64 = 1024;
pub const MIB: u64 = 1024 * KIB;
pub const GIB: u64 = 1024 * MIB;
pub const TIB: u64 = 1024 * GIB;

/// A storage size in bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Capacity(u64);

impl Capacity {
    pub const fn from_bytes(bytes: u64) -> Self {
        Self(bytes)
    }

    pub const fn from_gib(gib: u64) -> Self {
        Self(gib * GIB)
    }

    pub const fn bytes(&self) -> u64 {
        self.0
    }

    /// Whole GiB, rounding any partial GiB up
    pub fn round_up_gib(&self) -> u64 {
        self.0.div_ceil(GIB)
    }

    /// Parse a quantity string
    ///
    /// Binary suffixes (`Ki`..`Ei`) and decimal suffixes (`k`, `K`..`E`) are
    /// accepted. Single-letter uppercase suffixes are decimal per Kubernetes
    /// quantity rules.
    pub fn parse(input: &str) -> Result<Self> {
        let (number, suffix) = split_quantity(input)?;
        let multiplier: u64 = match suffix {
            "" => 1,
            "Ki" => KIB,
            "Mi" => MIB,
            "Gi" => GIB,
            "Ti" => TIB,
            "Pi" => TIB * KIB,
            "Ei" => TIB * MIB,
            "k" | "K" => 1_000,
            "M" => 1_000_000,
            "G" => 1_000_000_000,
            "T" => 1_000_000_000_000,
            "P" => 1_000_000_000_000_000,
            "E" => 1_000_000_000_000_000_000,
            other => {
                return Err(Error::CapacityParse(format!(
                    "unknown suffix '{}' in '{}'",
                    other, input
                )))
            }
        };
        scale(number, multiplier, input)
    }
}

fn split_quantity(input: &str) -> Result<(&str, &str)> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(Error::CapacityParse("empty quantity".into()));
    }
    let split = trimmed
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(trimmed.len());
    let (number, suffix) = trimmed.split_at(split);
    if number.is_empty() {
        return Err(Error::CapacityParse(format!("missing number in '{}'", input)));
    }
    Ok((number, suffix))
}

fn scale(number: &str, multiplier: u64, input: &str) -> Result<Capacity> {
    if let Ok(whole) = number.parse::<u64>() {
        return whole
            .checked_mul(multiplier)
            .map(Capacity)
            .ok_or_else(|| Error::CapacityParse(format!("'{}' overflows", input)));
    }
    let fractional: f64 = number
        .parse()
        .map_err(|_| Error::CapacityParse(format!("invalid number in '{}'", input)))?;
    let bytes = (fractional * multiplier as f64).ceil();
    if !bytes.is_finite() || bytes < 0.0 || bytes > u64::MAX as f64 {
        return Err(Error::CapacityParse(format!("'{}' out of range", input)));
    }
    Ok(Capacity(bytes as u64))
}

impl FromStr for Capacity {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Capacity {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<Capacity> for String {
    fn from(value: Capacity) -> Self {
        value.to_string()
    }
}

impl fmt::Display for Capacity {
    /// Formats with the largest binary suffix that divides evenly
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const UNITS: [(u64, &str); 4] = [(TIB, "Ti"), (GIB, "Gi"), (MIB, "Mi"), (KIB, "Ki")];
        for (unit, suffix) in UNITS {
            if self.0 >= unit && self.0 % unit == 0 {
                return write!(f, "{}{}", self.0 / unit, suffix);
            }
        }
        write!(f, "{}", self.0)
    }
}
