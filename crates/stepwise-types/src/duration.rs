//! Duration literals used by retry delays and durable sleeps.
//!
//! A literal is an integer magnitude followed by a unit suffix: `ms`, `s`,
//! `m`, `h` or `d` (e.g. `"1s"`, `"5s"`, `"1000ms"`). Literals serialize as
//! their string form so they can be written directly in YAML and JSON.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// Error returned when a duration literal cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DurationParseError {
    #[error("duration literal is empty")]
    Empty,

    #[error("duration literal '{0}' has no numeric magnitude")]
    MissingMagnitude(String),

    #[error("duration literal '{literal}' has unknown unit '{unit}' (expected ms, s, m, h or d)")]
    UnknownUnit { literal: String, unit: String },

    #[error("duration literal '{0}' overflows")]
    Overflow(String),
}

/// Unit suffix of a [`DurationLiteral`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DurationUnit {
    Milliseconds,
    Seconds,
    Minutes,
    Hours,
    Days,
}

impl DurationUnit {
    fn suffix(self) -> &'static str {
        match self {
            Self::Milliseconds => "ms",
            Self::Seconds => "s",
            Self::Minutes => "m",
            Self::Hours => "h",
            Self::Days => "d",
        }
    }

    fn millis(self) -> u64 {
        match self {
            Self::Milliseconds => 1,
            Self::Seconds => 1_000,
            Self::Minutes => 60_000,
            Self::Hours => 3_600_000,
            Self::Days => 86_400_000,
        }
    }
}

/// A parsed duration literal such as `"5s"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DurationLiteral {
    magnitude: u64,
    unit: DurationUnit,
}

impl DurationLiteral {
    pub fn new(magnitude: u64, unit: DurationUnit) -> Self {
        Self { magnitude, unit }
    }

    pub fn millis(magnitude: u64) -> Self {
        Self::new(magnitude, DurationUnit::Milliseconds)
    }

    pub fn seconds(magnitude: u64) -> Self {
        Self::new(magnitude, DurationUnit::Seconds)
    }

    pub fn magnitude(&self) -> u64 {
        self.magnitude
    }

    pub fn unit(&self) -> DurationUnit {
        self.unit
    }

    /// Convert to a std [`Duration`], saturating on overflow.
    pub fn to_duration(&self) -> Duration {
        Duration::from_millis(self.magnitude.saturating_mul(self.unit.millis()))
    }
}

impl FromStr for DurationLiteral {
    type Err = DurationParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let literal = s.trim();
        if literal.is_empty() {
            return Err(DurationParseError::Empty);
        }

        let split = literal
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(literal.len());
        let (digits, suffix) = literal.split_at(split);
        if digits.is_empty() {
            return Err(DurationParseError::MissingMagnitude(literal.to_string()));
        }

        let magnitude: u64 = digits
            .parse()
            .map_err(|_| DurationParseError::Overflow(literal.to_string()))?;

        let unit = match suffix.trim() {
            "ms" => DurationUnit::Milliseconds,
            "s" => DurationUnit::Seconds,
            "m" => DurationUnit::Minutes,
            "h" => DurationUnit::Hours,
            "d" => DurationUnit::Days,
            other => {
                return Err(DurationParseError::UnknownUnit {
                    literal: literal.to_string(),
                    unit: other.to_string(),
                });
            }
        };

        if magnitude.checked_mul(unit.millis()).is_none() {
            return Err(DurationParseError::Overflow(literal.to_string()));
        }

        Ok(Self { magnitude, unit })
    }
}

impl fmt::Display for DurationLiteral {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.magnitude, self.unit.suffix())
    }
}

impl Serialize for DurationLiteral {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for DurationLiteral {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}
