//! Scan parameters: pin range, target voltage, search-space size.

use std::fmt;
use std::str::FromStr;

use serde::Serialize;

use crate::error::ValidationError;

/// Highest probe channel.
pub const MAX_PIN: u8 = 15;

/// Channels a JTAG scan needs: TCK, TMS, TDO, TDI (+ TRST).
pub fn jtag_roles(trst: bool) -> usize {
    if trst { 5 } else { 4 }
}

/// Inclusive channel range to brute-force.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ScanRange {
    pub start: u8,
    pub end: u8,
}

impl ScanRange {
    /// A validated range.
    pub fn new(start: u8, end: u8) -> Result<Self, ValidationError> {
        let range = ScanRange { start, end };
        range.validate()?;
        Ok(range)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        for pin in [self.start, self.end] {
            if pin > MAX_PIN {
                return Err(ValidationError::PinOutOfRange { pin, max: MAX_PIN });
            }
        }
        if self.start == self.end {
            return Err(ValidationError::SamePins(self.start));
        }
        if self.start > self.end {
            return Err(ValidationError::StartAfterEnd {
                start: self.start,
                end: self.end,
            });
        }
        Ok(())
    }

    /// Number of channels in the range.
    pub fn channels(&self) -> usize {
        (self.end.saturating_sub(self.start)) as usize + 1
    }

    /// Fail unless the range can carry `required` distinct signals.
    pub fn require_channels(&self, required: usize) -> Result<(), ValidationError> {
        let available = self.channels();
        if available < required {
            return Err(ValidationError::InsufficientChannels {
                required,
                available,
            });
        }
        Ok(())
    }
}

impl Default for ScanRange {
    fn default() -> Self {
        ScanRange {
            start: 0,
            end: MAX_PIN,
        }
    }
}

/// Target I/O voltage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Volts {
    #[serde(rename = "3.3")]
    V3_3,
    #[serde(rename = "1.8")]
    V1_8,
    #[serde(rename = "1.2")]
    V1_2,
}

impl Volts {
    /// `[integer part, fractional digit]`.
    pub fn wire(self) -> [u8; 2] {
        match self {
            Volts::V3_3 => [3, 3],
            Volts::V1_8 => [1, 8],
            Volts::V1_2 => [1, 2],
        }
    }
}

impl FromStr for Volts {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "3.3" => Ok(Volts::V3_3),
            "1.8" => Ok(Volts::V1_8),
            "1.2" => Ok(Volts::V1_2),
            other => Err(ValidationError::InvalidVoltage(other.to_string())),
        }
    }
}

impl fmt::Display for Volts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [int, frac] = self.wire();
        write!(f, "{int}.{frac}")
    }
}

/// Control-write payload of every Bus Auditor scan.
pub fn scan_payload(range: ScanRange, volts: Volts) -> [u8; 4] {
    let [int, frac] = volts.wire();
    [range.start, range.end, int, frac]
}

/// Ordered selections of `k` pins out of `n`: n! / (n - k)!.
pub fn permutations(n: usize, k: usize) -> u64 {
    if k > n {
        return 0;
    }
    ((n - k + 1)..=n).fold(1u64, |acc, x| acc.saturating_mul(x as u64))
}
