//! Trace - the sample store
//!
//! A fixed-capacity ring of [`Sample`]s. Recording is deduplicating and
//! strictly time-ordered: a sample is kept only when it is the first one,
//! or when it is newer than the last kept sample and differs from it.
//! Everything else is dropped silently so instrumentation call sites can
//! record unconditionally.
//!
//! All state lives behind one mutex. Watchers are notified inside the same
//! critical section as the ring update, without ever blocking on them.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;

use crate::config::{TraceConfig, DEFAULT_GROUP};
use crate::error::{Result, TraceError};
use crate::observer::{Subscribers, Watcher};
use crate::sample::{signal_bit, Sample, Timestamp};
use crate::snapshot::{SignalId, Snapshot, SnapshotSignal};

#[derive(Debug)]
struct TraceState {
    group: Option<String>,
    /// Ring buffer; grows up to capacity, then slots are overwritten.
    samples: Vec<Sample>,
    /// Total accepted samples. Next slot is `cursor % capacity`.
    cursor: u64,
    /// Union of every accepted sample's mask.
    full_mask: u64,
    labels: BTreeMap<usize, String>,
    subscribers: Subscribers,
}

impl TraceState {
    fn last(&self, capacity: usize) -> Option<&Sample> {
        if self.cursor == 0 {
            return None;
        }
        let idx = ((self.cursor - 1) % capacity as u64) as usize;
        self.samples.get(idx)
    }

    /// Retained samples, oldest first.
    fn window(&self, capacity: usize) -> Vec<Sample> {
        if self.samples.len() < capacity {
            return self.samples.clone();
        }
        let start = (self.cursor % capacity as u64) as usize;
        let mut out = Vec::with_capacity(capacity);
        out.extend_from_slice(&self.samples[start..]);
        out.extend_from_slice(&self.samples[..start]);
        out
    }
}

/// A bounded, thread-safe recorder for up to 64 boolean signals.
#[derive(Debug)]
pub struct Trace {
    name: String,
    capacity: usize,
    state: Mutex<TraceState>,
}

impl Trace {
    /// Create a trace retaining up to `capacity` samples. Returns `None`
    /// when `capacity` is zero; an empty name falls back to the default.
    pub fn new(name: impl Into<String>, capacity: usize) -> Option<Self> {
        Self::with_config(TraceConfig::new(name, capacity)).ok()
    }

    /// Create a trace from a validated configuration.
    pub fn with_config(config: TraceConfig) -> Result<Self> {
        config.validate()?;
        let TraceConfig {
            name,
            capacity,
            group,
        } = config.normalized();

        Ok(Self {
            name,
            capacity,
            state: Mutex::new(TraceState {
                group,
                samples: Vec::with_capacity(capacity),
                cursor: 0,
                full_mask: 0,
                labels: BTreeMap::new(),
                subscribers: Subscribers::default(),
            }),
        })
    }

    // Every mutation completes before anything that could panic runs, so a
    // poisoned lock still guards consistent state.
    fn lock(&self) -> MutexGuard<'_, TraceState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // =========================================================================
    // NAMING
    // =========================================================================

    /// Name of the trace.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Group scope name; `"ports"` unless set.
    pub fn group(&self) -> String {
        self.lock()
            .group
            .clone()
            .unwrap_or_else(|| DEFAULT_GROUP.to_owned())
    }

    /// Set the group scope name. `""` restores the default.
    pub fn set_group(&self, group: impl Into<String>) {
        let group = group.into();
        self.lock().group = (!group.is_empty()).then_some(group);
    }

    /// Label a signal. `""` restores the default `sig<index>` label.
    pub fn set_label(&self, index: usize, label: impl Into<String>) -> Result<()> {
        signal_bit(index).ok_or(TraceError::InvalidSignalIndex(index))?;
        let label = label.into();
        let mut state = self.lock();
        if label.is_empty() {
            state.labels.remove(&index);
        } else {
            state.labels.insert(index, label);
        }
        Ok(())
    }

    /// Display label of a signal.
    pub fn label(&self, index: usize) -> Result<String> {
        signal_bit(index).ok_or(TraceError::InvalidSignalIndex(index))?;
        Ok(label_of(&self.lock().labels, index))
    }

    // =========================================================================
    // RECORDING
    // =========================================================================

    /// Record the signal state at `when`.
    ///
    /// Dropped without effect unless this is the first sample, or `when` is
    /// strictly after the last retained sample and `(mask, value)` differs
    /// from it.
    pub fn record_at(&self, when: Timestamp, mask: u64, value: u64) {
        let next = Sample::new(when, mask, value);
        let mut state = self.lock();
        let prev = state.last(self.capacity).copied();
        if let Some(prev) = &prev {
            if prev.same_state(&next) || when <= prev.when {
                return;
            }
        }

        let slot = (state.cursor % self.capacity as u64) as usize;
        if slot < state.samples.len() {
            state.samples[slot] = next;
        } else {
            state.samples.push(next);
        }
        state.cursor += 1;
        state.full_mask |= mask;
        state.subscribers.dispatch(prev.as_ref(), &next);
    }

    /// Record the signal state now.
    pub fn record(&self, mask: u64, value: u64) {
        self.record_at(Utc::now(), mask, value);
    }

    // =========================================================================
    // WATCHING
    // =========================================================================

    /// Follow transitions of one signal through a buffer of `depth` events.
    /// Events that find the buffer full are dropped.
    pub fn watch(&self, index: usize, depth: usize) -> Result<Watcher> {
        let bit = signal_bit(index).ok_or(TraceError::InvalidSignalIndex(index))?;
        Ok(self.lock().subscribers.watch(index, bit, depth))
    }

    /// Close a watcher. Fails with [`TraceError::UnknownWatcher`] if it is
    /// not registered with this trace, or was already canceled.
    pub fn cancel(&self, watcher: &Watcher) -> Result<()> {
        if self.lock().subscribers.cancel(watcher) {
            Ok(())
        } else {
            Err(TraceError::UnknownWatcher)
        }
    }

    /// Number of live watchers.
    pub fn watcher_count(&self) -> usize {
        self.lock().subscribers.len()
    }

    // =========================================================================
    // READING
    // =========================================================================

    /// Ring capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Total samples accepted so far.
    pub fn cursor(&self) -> u64 {
        self.lock().cursor
    }

    /// Samples currently retained.
    pub fn len(&self) -> usize {
        self.lock().samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Union of every accepted sample's mask.
    pub fn full_mask(&self) -> u64 {
        self.lock().full_mask
    }

    /// Copy of the retained samples, oldest first.
    pub fn samples(&self) -> Vec<Sample> {
        self.lock().window(self.capacity)
    }

    /// Copy the trace out for export, assigning identifiers from `next_id`
    /// to every signal ever defined. Returns the snapshot and the next free
    /// identifier.
    pub fn snapshot(&self, next_id: usize) -> (Snapshot, usize) {
        let (group, full_mask, samples, labels) = {
            let state = self.lock();
            (
                state.group.clone(),
                state.full_mask,
                state.window(self.capacity),
                state.labels.clone(),
            )
        };

        let mut next_id = next_id;
        let signals = (0..u64::BITS as usize)
            .filter(|&i| full_mask & (1u64 << i) != 0)
            .map(|i| {
                let signal = SnapshotSignal {
                    bit: 1u64 << i,
                    id: SignalId::from_index(next_id),
                    label: label_of(&labels, i),
                };
                next_id += 1;
                signal
            })
            .collect();

        let snapshot = Snapshot {
            name: self.name.clone(),
            group: group.unwrap_or_else(|| DEFAULT_GROUP.to_owned()),
            full_mask,
            samples,
            signals,
        };
        (snapshot, next_id)
    }
}

fn label_of(labels: &BTreeMap<usize, String>, index: usize) -> String {
    labels
        .get(&index)
        .cloned()
        .unwrap_or_else(|| format!("sig{index}"))
}

/// Instrumentation interface that is safe to call on an absent trace.
///
/// Instrumented code can hold an `Option<Trace>` (e.g. the result of
/// [`Trace::new`] with a zero capacity) and use it without checks: on
/// `None` recording and naming do nothing, `set_label` and `watch` report
/// [`TraceError::InvalidSignalIndex`], and `cancel` reports
/// [`TraceError::UnknownWatcher`].
pub trait Probe {
    fn record_at(&self, when: Timestamp, mask: u64, value: u64);

    fn record(&self, mask: u64, value: u64) {
        self.record_at(Utc::now(), mask, value);
    }

    fn set_group(&self, group: &str);

    fn set_label(&self, index: usize, label: &str) -> Result<()>;

    fn watch(&self, index: usize, depth: usize) -> Result<Watcher>;

    fn cancel(&self, watcher: &Watcher) -> Result<()>;
}

impl Probe for Trace {
    fn record_at(&self, when: Timestamp, mask: u64, value: u64) {
        Trace::record_at(self, when, mask, value);
    }

    fn set_group(&self, group: &str) {
        Trace::set_group(self, group);
    }

    fn set_label(&self, index: usize, label: &str) -> Result<()> {
        Trace::set_label(self, index, label)
    }

    fn watch(&self, index: usize, depth: usize) -> Result<Watcher> {
        Trace::watch(self, index, depth)
    }

    fn cancel(&self, watcher: &Watcher) -> Result<()> {
        Trace::cancel(self, watcher)
    }
}

impl<P: Probe> Probe for Option<P> {
    fn record_at(&self, when: Timestamp, mask: u64, value: u64) {
        if let Some(probe) = self {
            probe.record_at(when, mask, value);
        }
    }

    fn set_group(&self, group: &str) {
        if let Some(probe) = self {
            probe.set_group(group);
        }
    }

    fn set_label(&self, index: usize, label: &str) -> Result<()> {
        match self {
            Some(probe) => probe.set_label(index, label),
            None => Err(TraceError::InvalidSignalIndex(index)),
        }
    }

    fn watch(&self, index: usize, depth: usize) -> Result<Watcher> {
        match self {
            Some(probe) => probe.watch(index, depth),
            None => Err(TraceError::InvalidSignalIndex(index)),
        }
    }

    fn cancel(&self, watcher: &Watcher) -> Result<()> {
        match self {
            Some(probe) => probe.cancel(watcher),
            None => Err(TraceError::UnknownWatcher),
        }
    }
}

impl<P: Probe + ?Sized> Probe for &P {
    fn record_at(&self, when: Timestamp, mask: u64, value: u64) {
        (**self).record_at(when, mask, value);
    }

    fn set_group(&self, group: &str) {
        (**self).set_group(group);
    }

    fn set_label(&self, index: usize, label: &str) -> Result<()> {
        (**self).set_label(index, label)
    }

    fn watch(&self, index: usize, depth: usize) -> Result<Watcher> {
        (**self).watch(index, depth)
    }

    fn cancel(&self, watcher: &Watcher) -> Result<()> {
        (**self).cancel(watcher)
    }
}

impl<P: Probe + ?Sized> Probe for Arc<P> {
    fn record_at(&self, when: Timestamp, mask: u64, value: u64) {
        (**self).record_at(when, mask, value);
    }

    fn set_group(&self, group: &str) {
        (**self).set_group(group);
    }

    fn set_label(&self, index: usize, label: &str) -> Result<()> {
        (**self).set_label(index, label)
    }

    fn watch(&self, index: usize, depth: usize) -> Result<Watcher> {
        (**self).watch(index, depth)
    }

    fn cancel(&self, watcher: &Watcher) -> Result<()> {
        (**self).cancel(watcher)
    }
}
