//! Bittrace - ring-buffer tracing of boolean signals with VCD export
//!
//! Record timestamped snapshots of up to 64 boolean signals, follow
//! individual signal transitions, and dump recorded history as a Value
//! Change Dump for waveform viewers.
//!
//! # Core Types
//!
//! - **Trace**: Bounded, thread-safe ring of samples with per-signal watchers
//! - **Sample**: Defined-mask and value bit sets at one instant
//! - **Watcher**: Non-blocking stream of one signal's transitions
//! - **DumpStream**: Line-by-line VCD text, produced concurrently
//!
//! # Architecture: Record / Watch / Export
//!
//! 1. **Record** - Producers call [`Trace::record`] from anywhere. Samples
//!    that are stale or repeat the previous state are dropped silently.
//! 2. **Watch** - [`Trace::watch`] hands out a bounded event stream. A full
//!    stream loses events; the recording producer never waits.
//! 3. **Export** - [`export_dump`] snapshots each trace, merges their value
//!    changes in time order and streams the dump text. Nothing is dropped
//!    on this path.
//!
//! # Example
//!
//! ```rust
//! use bittrace::{export_dump, Trace};
//! use std::time::Duration;
//!
//! let trace = Trace::new("sample", 100).expect("non-zero capacity");
//! trace.set_label(3, "irq").unwrap();
//! let irq = trace.watch(3, 16).unwrap();
//!
//! trace.record(0b1000, 0b1000);
//! trace.record(0b1000, 0b0000);
//!
//! trace.cancel(&irq).unwrap();
//! let states: Vec<bool> = irq.iter().map(|ev| ev.on).collect();
//! assert_eq!(states.first(), Some(&true));
//!
//! let dump = export_dump("sample", Duration::from_nanos(100), &[&trace])
//!     .unwrap()
//!     .into_string();
//! assert!(dump.contains("$var wire 1 ! irq $end"));
//! ```

mod config;
mod error;
mod export;
mod merge;
mod observer;
mod sample;
mod snapshot;
mod trace;

pub use config::{
    ExportConfig, MergeStrategy, TraceConfig, DEFAULT_GROUP, DEFAULT_HANDOFF_DEPTH, DEFAULT_NAME,
};
pub use error::{Result, TraceError};
pub use export::{export_dump, export_with, timescale, DumpStream};
pub use merge::{merge_tree, HeapMerge, Stamped};
pub use observer::{Event, Watcher};
pub use sample::{signal_bit, Level, Sample, Timestamp, SIGNAL_COUNT};
pub use snapshot::{quantize, Change, ChangeScan, SignalId, Snapshot, SnapshotSignal};
pub use trace::{Probe, Trace};
