//! Memory quantities
//!
//! Hypervisors report and accept memory in 1 KiB blocks, so `MemorySize`
//! stores a whole number of KiB. Arithmetic saturates instead of wrapping.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;

/// Number of KiB in one KiB.
pub const KIB: u64 = 1;
/// Number of KiB in one MiB.
pub const MIB: u64 = 1024 * KIB;
/// Number of KiB in one GiB.
pub const GIB: u64 = 1024 * MIB;

/// A memory quantity, counted in KiB
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct MemorySize(u64);

impl MemorySize {
    pub const ZERO: MemorySize = MemorySize(0);

    pub const fn from_kib(kib: u64) -> Self {
        Self(kib)
    }

    pub const fn from_mib(mib: u64) -> Self {
        Self(mib.saturating_mul(MIB))
    }

    pub const fn from_gib(gib: u64) -> Self {
        Self(gib.saturating_mul(GIB))
    }

    /// Bytes are truncated to whole KiB.
    pub const fn from_bytes(bytes: u64) -> Self {
        Self(bytes / 1024)
    }

    pub const fn as_kib(self) -> u64 {
        self.0
    }

    pub const fn as_bytes(self) -> u64 {
        self.0.saturating_mul(1024)
    }

    pub fn as_gib_f64(self) -> f64 {
        self.0 as f64 / GIB as f64
    }

    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    pub const fn saturating_add(self, other: MemorySize) -> Self {
        Self(self.0.saturating_add(other.0))
    }

    pub const fn saturating_sub(self, other: MemorySize) -> Self {
        Self(self.0.saturating_sub(other.0))
    }

    pub const fn saturating_mul(self, factor: u64) -> Self {
        Self(self.0.saturating_mul(factor))
    }

    /// Round to the nearest multiple of `granularity`; exact halves round up.
    ///
    /// A zero granularity leaves the value unchanged.
    pub fn round_to_nearest(self, granularity: MemorySize) -> Self {
        if granularity.is_zero() {
            return self;
        }
        let g = granularity.0;
        let quotient = self.0 / g;
        let remainder = self.0 % g;
        let steps = if remainder >= g - remainder {
            quotient.saturating_add(1)
        } else {
            quotient
        };
        Self(steps.saturating_mul(g))
    }

    /// Largest multiple of `granularity` not above `self`.
    pub fn round_down_to(self, granularity: MemorySize) -> Self {
        if granularity.is_zero() {
            return self;
        }
        Self(self.0 - self.0 % granularity.0)
    }

    pub fn is_multiple_of(self, granularity: MemorySize) -> bool {
        granularity.is_zero() || self.0 % granularity.0 == 0
    }

    /// `self * numerator / denominator`, floored, in exact integer arithmetic.
    pub fn scale_ratio(self, numerator: MemorySize, denominator: MemorySize) -> Self {
        if denominator.is_zero() {
            return Self::ZERO;
        }
        let scaled = u128::from(self.0) * u128::from(numerator.0) / u128::from(denominator.0);
        Self(u64::try_from(scaled).unwrap_or(u64::MAX))
    }
}

impl Sum for MemorySize {
    fn sum<I: Iterator<Item = MemorySize>>(iter: I) -> Self {
        iter.fold(MemorySize::ZERO, MemorySize::saturating_add)
    }
}

impl<'a> Sum<&'a MemorySize> for MemorySize {
    fn sum<I: Iterator<Item = &'a MemorySize>>(iter: I) -> Self {
        iter.copied().sum()
    }
}

impl fmt::Display for MemorySize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered = if self.0 >= GIB && self.0 % GIB == 0 {
            format!("{} GiB", self.0 / GIB)
        } else if self.0 >= GIB {
            format!("{:.2} GiB", self.as_gib_f64())
        } else if self.0 >= MIB && self.0 % MIB == 0 {
            format!("{} MiB", self.0 / MIB)
        } else {
            format!("{} KiB", self.0)
        };
        f.pad(&rendered)
    }
}
