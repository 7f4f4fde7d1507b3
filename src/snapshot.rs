//! Snapshots - linearized trace copies prepared for export
//!
//! A [`Snapshot`] is taken under the trace lock and never touched by the
//! trace again. Formatting and scanning happen on the copy.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::merge::Stamped;
use crate::sample::{Level, Sample, Timestamp};

/// First printable symbol used in identifiers (`!`).
const ID_BASE: u8 = 33;
/// Number of printable symbols, `!` through `~`.
const ID_DIGITS: usize = 127 - ID_BASE as usize;

/// Short printable identifier naming one signal in a dump.
///
/// Indices are written little-endian in base 94 over `!`..`~`, so the first
/// 94 signals get a single character and identifiers stay unique across
/// every trace sharing one numbering sequence.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SignalId(String);

impl SignalId {
    pub fn from_index(index: usize) -> Self {
        let mut id = String::new();
        let mut j = index;
        loop {
            id.push(char::from(ID_BASE + (j % ID_DIGITS) as u8));
            j /= ID_DIGITS;
            if j == 0 {
                break;
            }
        }
        Self(id)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SignalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A signal as declared in a dump.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SnapshotSignal {
    /// Single-bit mask of the signal.
    pub bit: u64,
    pub id: SignalId,
    pub label: String,
}

/// Immutable export copy of one trace.
#[derive(Clone, Debug)]
pub struct Snapshot {
    pub name: String,
    pub group: String,
    pub full_mask: u64,
    /// Retained samples, oldest first.
    pub samples: Vec<Sample>,
    /// One entry per bit of `full_mask`, lowest bit first.
    pub signals: Vec<SnapshotSignal>,
}

impl Snapshot {
    /// Timestamp of the oldest retained sample.
    pub fn earliest(&self) -> Option<Timestamp> {
        self.samples.first().map(|s| s.when)
    }

    /// Whether the snapshot declares any signal.
    pub fn has_signals(&self) -> bool {
        !self.signals.is_empty()
    }
}

/// One value change flowing through the merge.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Change {
    /// Quantized time offset from the earliest sample of the export.
    pub stamp: u64,
    pub level: Level,
    pub id: SignalId,
}

impl Stamped for Change {
    fn stamp(&self) -> u64 {
        self.stamp
    }
}

impl fmt::Display for Change {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.level, self.id)
    }
}

/// Number of whole `unit`s from `earliest` to `when`. Times before
/// `earliest` quantize to zero.
pub fn quantize(when: Timestamp, earliest: Timestamp, unit: Duration) -> u64 {
    let offset = (when - earliest).to_std().unwrap_or_default();
    let ticks = offset.as_nanos() / unit.as_nanos().max(1);
    u64::try_from(ticks).unwrap_or(u64::MAX)
}

/// Iterator over the value changes of one snapshot, in sample order.
///
/// The first sample reports every signal. Later samples report signals
/// whose definedness changed and defined signals whose value changed.
#[derive(Debug)]
pub struct ChangeScan {
    snapshot: Arc<Snapshot>,
    earliest: Timestamp,
    unit: Duration,
    sample: usize,
    prev: Option<(u64, u64)>,
    pending: std::vec::IntoIter<Change>,
}

impl ChangeScan {
    pub fn new(snapshot: Arc<Snapshot>, earliest: Timestamp, unit: Duration) -> Self {
        Self {
            snapshot,
            earliest,
            unit,
            sample: 0,
            prev: None,
            pending: Vec::new().into_iter(),
        }
    }

    fn changes_at(&self, s: &Sample) -> Vec<Change> {
        let (value_delta, mask_delta) = match self.prev {
            Some((mask, value)) => (value ^ s.value, mask ^ s.mask),
            None => (u64::MAX, u64::MAX),
        };
        let any_delta = value_delta | mask_delta;
        if any_delta == 0 {
            return Vec::new();
        }

        let stamp = quantize(s.when, self.earliest, self.unit);
        self.snapshot
            .signals
            .iter()
            .filter(|sig| {
                if sig.bit & s.mask == 0 {
                    sig.bit & mask_delta != 0
                } else {
                    sig.bit & any_delta != 0
                }
            })
            .map(|sig| Change {
                stamp,
                level: s.level(sig.bit),
                id: sig.id.clone(),
            })
            .collect()
    }
}

impl Iterator for ChangeScan {
    type Item = Change;

    fn next(&mut self) -> Option<Change> {
        loop {
            if let Some(change) = self.pending.next() {
                return Some(change);
            }
            let s = *self.snapshot.samples.get(self.sample)?;
            self.pending = self.changes_at(&s).into_iter();
            self.prev = Some((s.mask, s.value));
            self.sample += 1;
        }
    }
}
