//! Sample - timestamped snapshot of up to 64 boolean signals
//!
//! The atomic unit of storage in a trace. Two 64-bit sets describe the
//! state: `mask` marks which signals hold a known value, `value` holds
//! those values. Bits of `value` outside `mask` carry no meaning.

use std::fmt;

use chrono::{DateTime, Utc};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Number of distinct signal indices a trace can carry.
pub const SIGNAL_COUNT: usize = 64;

/// Wall-clock instant attached to every sample.
pub type Timestamp = DateTime<Utc>;

/// Single-bit mask for a signal index, or `None` outside `[0,64)`.
#[inline]
pub fn signal_bit(index: usize) -> Option<u64> {
    (index < SIGNAL_COUNT).then(|| 1u64 << index)
}

/// Full signal state at one instant.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Sample {
    /// When the sample was recorded.
    pub when: Timestamp,
    /// Signals with a known value.
    pub mask: u64,
    /// Signal values, meaningful only where `mask` is set.
    pub value: u64,
}

impl Sample {
    pub fn new(when: Timestamp, mask: u64, value: u64) -> Self {
        Self { when, mask, value }
    }

    /// Bits that are both defined and high.
    #[inline]
    pub fn effective(&self) -> u64 {
        self.mask & self.value
    }

    /// Whether `(mask, value)` matches another sample, ignoring time.
    #[inline]
    pub fn same_state(&self, other: &Sample) -> bool {
        self.mask == other.mask && self.value == other.value
    }

    /// Level of the signal carried by `bit`.
    #[inline]
    pub fn level(&self, bit: u64) -> Level {
        if self.mask & bit == 0 {
            Level::Unknown
        } else if self.value & bit != 0 {
            Level::High
        } else {
            Level::Low
        }
    }
}

/// Four-state wire value restricted to what a boolean signal can show.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Level {
    Unknown,
    Low,
    High,
}

impl Level {
    /// Value-change token character.
    pub fn token(self) -> char {
        match self {
            Level::Unknown => 'x',
            Level::Low => '0',
            Level::High => '1',
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.token())
    }
}
