use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, AddAssign, Sub};
use std::str::FromStr;

use crate::error::ConfigError;

const NANOS_PER_SEC: u64 = 1_000_000_000;

/// Virtual simulation time with nanosecond resolution.
///
/// Written in scenario files as `<number><unit>` where unit is one of
/// `s`, `ms`, `us` or `ns` (e.g. `"2ms"`, `"20s"`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SimTime(u64);

impl SimTime {
    pub const ZERO: SimTime = SimTime(0);
    pub const MAX: SimTime = SimTime(u64::MAX);

    pub const fn from_nanos(nanos: u64) -> Self {
        Self(nanos)
    }

    pub const fn from_micros(micros: u64) -> Self {
        Self(micros.saturating_mul(1_000))
    }

    pub const fn from_millis(millis: u64) -> Self {
        Self(millis.saturating_mul(1_000_000))
    }

    pub const fn from_secs(secs: u64) -> Self {
        Self(secs.saturating_mul(NANOS_PER_SEC))
    }

    /// Rounds to the nearest nanosecond. Negative and non-finite inputs are rejected.
    pub fn from_secs_f64(secs: f64) -> Option<Self> {
        if !secs.is_finite() || secs < 0.0 {
            return None;
        }
        let nanos = (secs * NANOS_PER_SEC as f64).round();
        if nanos > u64::MAX as f64 {
            return None;
        }
        Some(Self(nanos as u64))
    }

    pub const fn as_nanos(&self) -> u64 {
        self.0
    }

    pub fn as_secs_f64(&self) -> f64 {
        self.0 as f64 / NANOS_PER_SEC as f64
    }

    /// Whole seconds and the microsecond remainder, as pcap timestamps want them.
    pub const fn secs_and_micros(&self) -> (u64, u32) {
        (self.0 / NANOS_PER_SEC, ((self.0 % NANOS_PER_SEC) / 1_000) as u32)
    }

    pub const fn saturating_add(self, rhs: SimTime) -> SimTime {
        SimTime(self.0.saturating_add(rhs.0))
    }

    pub const fn saturating_mul(self, factor: u64) -> SimTime {
        SimTime(self.0.saturating_mul(factor))
    }
}

impl Add for SimTime {
    type Output = SimTime;

    fn add(self, rhs: SimTime) -> SimTime {
        self.saturating_add(rhs)
    }
}

impl AddAssign for SimTime {
    fn add_assign(&mut self, rhs: SimTime) {
        *self = *self + rhs;
    }
}

impl Sub for SimTime {
    type Output = SimTime;

    fn sub(self, rhs: SimTime) -> SimTime {
        SimTime(self.0.saturating_sub(rhs.0))
    }
}

impl fmt::Display for SimTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let n = self.0;
        if n == 0 {
            write!(f, "0s")
        } else if n % NANOS_PER_SEC == 0 {
            write!(f, "{}s", n / NANOS_PER_SEC)
        } else if n % 1_000_000 == 0 {
            write!(f, "{}ms", n / 1_000_000)
        } else if n % 1_000 == 0 {
            write!(f, "{}us", n / 1_000)
        } else {
            write!(f, "{}ns", n)
        }
    }
}

impl FromStr for SimTime {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ConfigError::InvalidTime(s.to_string());
        let (value, unit) = split_quantity(s).ok_or_else(invalid)?;
        let scale = match unit {
            "s" | "" => 1e9,
            "ms" => 1e6,
            "us" => 1e3,
            "ns" => 1.0,
            _ => return Err(invalid()),
        };
        let nanos = (value * scale).round();
        if nanos > u64::MAX as f64 {
            return Err(invalid());
        }
        Ok(SimTime(nanos as u64))
    }
}

impl TryFrom<String> for SimTime {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<SimTime> for String {
    fn from(value: SimTime) -> Self {
        value.to_string()
    }
}

/// A bit rate in bits per second.
///
/// Accepts `bps`, `kbps`/`Kbps`, `Mbps`, `Gbps` and the byte forms
/// `Bps`, `KBps`, `MBps`, `GBps` (also written `B/s`, `KB/s`, ...).
/// Multipliers are decimal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DataRate(u64);

impl DataRate {
    pub const fn from_bps(bps: u64) -> Self {
        Self(bps)
    }

    pub const fn bps(&self) -> u64 {
        self.0
    }

    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Time to serialise `bytes` onto a wire of this rate, or `None` for a zero rate.
    pub fn tx_time(&self, bytes: u64) -> Option<SimTime> {
        if self.0 == 0 {
            return None;
        }
        let nanos = (bytes as u128 * 8 * NANOS_PER_SEC as u128) / self.0 as u128;
        Some(SimTime::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX)))
    }

    /// Same quantity as [`DataRate::tx_time`] in floating point seconds.
    pub fn tx_secs(&self, bytes: u64) -> Option<f64> {
        if self.0 == 0 {
            return None;
        }
        Some(bytes as f64 * 8.0 / self.0 as f64)
    }
}

impl fmt::Display for DataRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = self.0;
        if b != 0 && b % 1_000_000_000 == 0 {
            write!(f, "{}Gbps", b / 1_000_000_000)
        } else if b != 0 && b % 1_000_000 == 0 {
            write!(f, "{}Mbps", b / 1_000_000)
        } else if b != 0 && b % 1_000 == 0 {
            write!(f, "{}kbps", b / 1_000)
        } else {
            write!(f, "{}bps", b)
        }
    }
}

impl FromStr for DataRate {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ConfigError::InvalidDataRate(s.to_string());
        let (value, unit) = split_quantity(s).ok_or_else(invalid)?;
        let scale = match unit {
            "" | "bps" | "b/s" => 1.0,
            "kbps" | "Kbps" | "kb/s" | "Kb/s" => 1e3,
            "Mbps" | "Mb/s" => 1e6,
            "Gbps" | "Gb/s" => 1e9,
            "Bps" | "B/s" => 8.0,
            "KBps" | "KB/s" | "kBps" | "kB/s" => 8e3,
            "MBps" | "MB/s" => 8e6,
            "GBps" | "GB/s" => 8e9,
            _ => return Err(invalid()),
        };
        let bps = (value * scale).round();
        if bps > u64::MAX as f64 {
            return Err(invalid());
        }
        Ok(DataRate(bps as u64))
    }
}

impl TryFrom<String> for DataRate {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<DataRate> for String {
    fn from(value: DataRate) -> Self {
        value.to_string()
    }
}

/// Splits `"12.5ms"` into `(12.5, "ms")`. Rejects negative and non-finite numbers.
fn split_quantity(s: &str) -> Option<(f64, &str)> {
    let s = s.trim();
    let split = s
        .find(|c: char| !(c.is_ascii_digit() || c == '.' || c == 'e' || c == 'E' || c == '+' || c == '-'))
        .unwrap_or(s.len());
    // An exponent marker directly followed by a unit letter is part of the unit, not the number.
    let (number, unit) = s.split_at(split);
    let (number, unit) = match number.strip_suffix(['e', 'E']) {
        Some(stripped) => (stripped, &s[stripped.len()..]),
        None => (number, unit),
    };
    let value: f64 = number.parse().ok()?;
    if !value.is_finite() || value < 0.0 {
        return None;
    }
    Some((value, unit.trim()))
}
