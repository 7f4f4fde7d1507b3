//! Change notification - per-signal pub/sub driven by recording
//!
//! When an accepted sample flips the effective state of a watched signal,
//! every watcher of that signal is sent an [`Event`]. Sends never block:
//! a watcher whose buffer is full misses that event, and the recording
//! producer keeps going.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam_channel::{bounded, Receiver, RecvError, Sender, TryRecvError, TrySendError};
use log::{debug, trace};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::sample::{Sample, Timestamp};

/// A single signal's transition.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Event {
    /// Timestamp of the sample that caused the transition.
    pub when: Timestamp,
    /// New state of the signal.
    pub on: bool,
}

static NEXT_WATCH_ID: AtomicU64 = AtomicU64::new(0);

/// Read side of a watch registration.
///
/// After the registration is canceled the handle still yields any events
/// already buffered, then reports disconnection.
#[derive(Debug)]
pub struct Watcher {
    id: u64,
    signal: usize,
    events: Receiver<Event>,
}

impl Watcher {
    /// Signal index this watcher follows.
    pub fn signal(&self) -> usize {
        self.signal
    }

    /// Block until the next event, or until the registration is closed
    /// and drained.
    pub fn recv(&self) -> Result<Event, RecvError> {
        self.events.recv()
    }

    pub fn try_recv(&self) -> Result<Event, TryRecvError> {
        self.events.try_recv()
    }

    /// Blocking iterator that ends once the registration is closed.
    pub fn iter(&self) -> crossbeam_channel::Iter<'_, Event> {
        self.events.iter()
    }

    /// Events currently buffered.
    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

#[derive(Debug)]
struct Sink {
    id: u64,
    tx: Sender<Event>,
}

/// Registry of event sinks keyed by single-bit signal mask.
#[derive(Debug, Default)]
pub(crate) struct Subscribers {
    sinks: BTreeMap<u64, Vec<Sink>>,
}

impl Subscribers {
    /// Register a new sink of capacity `depth` under `bit`.
    pub fn watch(&mut self, signal: usize, bit: u64, depth: usize) -> Watcher {
        let (tx, events) = bounded(depth);
        let id = NEXT_WATCH_ID.fetch_add(1, Ordering::Relaxed);
        self.sinks.entry(bit).or_default().push(Sink { id, tx });
        debug!("watcher {id} registered on signal {signal} (depth {depth})");
        Watcher { id, signal, events }
    }

    /// Remove and close the sink behind `watcher`. Returns false when it is
    /// not registered here.
    pub fn cancel(&mut self, watcher: &Watcher) -> bool {
        let found = self.sinks.iter().find_map(|(&bit, sinks)| {
            sinks
                .iter()
                .position(|s| s.id == watcher.id)
                .map(|pos| (bit, pos))
        });
        let Some((bit, pos)) = found else {
            return false;
        };
        if let Some(sinks) = self.sinks.get_mut(&bit) {
            // Dropping the sender closes the channel.
            sinks.remove(pos);
            if sinks.is_empty() {
                self.sinks.remove(&bit);
            }
        }
        debug!("watcher {} canceled", watcher.id);
        true
    }

    /// Number of live registrations.
    pub fn len(&self) -> usize {
        self.sinks.values().map(Vec::len).sum()
    }

    /// Deliver transitions between `prev` and `next`. With no previous
    /// sample every watched signal is reported.
    pub fn dispatch(&mut self, prev: Option<&Sample>, next: &Sample) {
        let delta = match prev {
            Some(prev) => prev.effective() ^ next.effective(),
            None => u64::MAX,
        };
        if delta == 0 {
            return;
        }

        let mut emptied = Vec::new();
        for (&bit, sinks) in self.sinks.iter_mut() {
            if bit & delta == 0 {
                continue;
            }
            let event = Event {
                when: next.when,
                on: next.effective() & bit != 0,
            };
            sinks.retain(|sink| match sink.tx.try_send(event) {
                Ok(()) => true,
                Err(TrySendError::Full(_)) => {
                    trace!("watcher {} full, dropped event", sink.id);
                    true
                }
                Err(TrySendError::Disconnected(_)) => {
                    debug!("watcher {} dropped by its owner, pruning", sink.id);
                    false
                }
            });
            if sinks.is_empty() {
                emptied.push(bit);
            }
        }
        for bit in emptied {
            self.sinks.remove(&bit);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeDelta};

    fn at(ms: i64, mask: u64, value: u64) -> Sample {
        let base = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        Sample::new(base + TimeDelta::milliseconds(ms), mask, value)
    }

    #[test]
    fn test_first_sample_reports_all_watched() {
        let mut subs = Subscribers::default();
        let low = subs.watch(0, 1, 4);
        let high = subs.watch(1, 2, 4);

        subs.dispatch(None, &at(0, 0b11, 0b10));

        assert!(!low.try_recv().unwrap().on);
        assert!(high.try_recv().unwrap().on);
    }

    #[test]
    fn test_only_flipped_bits_notified() {
        let mut subs = Subscribers::default();
        let w0 = subs.watch(0, 1, 4);
        let w1 = subs.watch(1, 2, 4);

        let a = at(0, 0b11, 0b01);
        let b = at(1, 0b11, 0b00);
        subs.dispatch(Some(&a), &b);

        assert_eq!(w0.try_recv().unwrap(), Event { when: b.when, on: false });
        assert!(w1.try_recv().is_err());
    }

    #[test]
    fn test_undefined_to_low_is_not_a_flip() {
        let mut subs = Subscribers::default();
        let w = subs.watch(2, 4, 4);

        subs.dispatch(Some(&at(0, 0, 0)), &at(1, 0b100, 0));
        assert!(w.is_empty());
    }

    #[test]
    fn test_full_sink_drops_without_blocking() {
        let mut subs = Subscribers::default();
        let w = subs.watch(0, 1, 1);

        subs.dispatch(Some(&at(0, 1, 0)), &at(1, 1, 1));
        subs.dispatch(Some(&at(1, 1, 1)), &at(2, 1, 0));
        assert_eq!(w.len(), 1);
        assert!(w.recv().unwrap().on);

        subs.dispatch(Some(&at(2, 1, 0)), &at(3, 1, 1));
        assert!(w.recv().unwrap().on);
    }

    #[test]
    fn test_cancel_closes_channel() {
        let mut subs = Subscribers::default();
        let w = subs.watch(5, 1 << 5, 2);

        assert!(subs.cancel(&w));
        assert!(!subs.cancel(&w));
        assert_eq!(subs.len(), 0);
        assert_eq!(w.try_recv(), Err(TryRecvError::Disconnected));
    }

    #[test]
    fn test_dropped_watcher_pruned() {
        let mut subs = Subscribers::default();
        let w = subs.watch(0, 1, 2);
        let keep = subs.watch(0, 1, 2);
        drop(w);

        subs.dispatch(None, &at(0, 1, 1));
        assert_eq!(subs.len(), 1);
        assert!(keep.try_recv().unwrap().on);
    }
}
