//! Export - value change dump (VCD) text stream
//!
//! Snapshots every trace in turn (one lock at a time), numbers their
//! signals from one shared identifier sequence, and streams the header
//! followed by the merged value changes line by line from a producer
//! thread. Output is never materialized as a whole unless the caller asks
//! for it.

use std::io;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, Sender};
use log::{debug, warn};

use crate::config::{ExportConfig, MergeStrategy, DEFAULT_NAME};
use crate::error::{Result, TraceError};
use crate::merge::{merge_tree, HeapMerge};
use crate::sample::Timestamp;
use crate::snapshot::{Change, ChangeScan, Snapshot};
use crate::trace::Trace;

/// `asctime`-style layout used for the `$date` section.
const DATE_FORMAT: &str = "%a %b %e %H:%M:%S %Y";

/// Render a time unit for `$timescale`, using the largest of s/ms/us/ns
/// that divides it exactly.
pub fn timescale(unit: Duration) -> String {
    let nanos = unit.as_nanos();
    for (per, suffix) in [(1_000_000_000, "s"), (1_000_000, "ms"), (1_000, "us")] {
        if nanos >= per && nanos % per == 0 {
            return format!("{}{suffix}", nanos / per);
        }
    }
    format!("{nanos}ns")
}

/// Lines of a waveform dump, produced incrementally by a background
/// thread. Dropping the stream early stops the producer.
#[derive(Debug)]
pub struct DumpStream {
    lines: Receiver<String>,
}

impl DumpStream {
    /// Write every remaining line, newline terminated.
    pub fn write_to<W: io::Write>(self, mut out: W) -> io::Result<()> {
        for line in self.lines {
            writeln!(out, "{line}")?;
        }
        out.flush()
    }

    /// Collect the whole dump into one buffer.
    pub fn into_string(self) -> String {
        let mut dump = String::new();
        for line in self.lines {
            dump.push_str(&line);
            dump.push('\n');
        }
        dump
    }
}

impl Iterator for DumpStream {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        self.lines.recv().ok()
    }
}

/// Export `traces` as one dump with default settings.
pub fn export_dump(generator: &str, time_unit: Duration, traces: &[&Trace]) -> Result<DumpStream> {
    export_with(&ExportConfig::new(generator, time_unit), traces)
}

/// Export `traces` as one dump.
///
/// Traces that never defined a signal are skipped. Fails with
/// [`TraceError::NoTraceData`] when no trace contributes a signal.
pub fn export_with(config: &ExportConfig, traces: &[&Trace]) -> Result<DumpStream> {
    config.validate()?;

    let mut snapshots = Vec::with_capacity(traces.len());
    let mut next_id = 0;
    let mut earliest: Option<Timestamp> = None;
    for (i, trace) in traces.iter().enumerate() {
        let (snapshot, next) = trace.snapshot(next_id);
        if !snapshot.has_signals() {
            warn!("skipping trace {i} ({}): no signals recorded", trace.name());
            continue;
        }
        next_id = next;
        if let Some(first) = snapshot.earliest() {
            earliest = Some(earliest.map_or(first, |e| e.min(first)));
        }
        snapshots.push(Arc::new(snapshot));
    }
    let Some(earliest) = earliest else {
        return Err(TraceError::NoTraceData);
    };
    debug!(
        "exporting {} of {} traces, {next_id} signals",
        snapshots.len(),
        traces.len()
    );

    let scans: Vec<ChangeScan> = snapshots
        .iter()
        .map(|s| ChangeScan::new(Arc::clone(s), earliest, config.time_unit))
        .collect();
    let changes: Box<dyn Iterator<Item = Change> + Send> = match config.strategy {
        MergeStrategy::Tree => Box::new(merge_tree(scans, config.handoff_depth)?.into_iter()),
        MergeStrategy::Heap => Box::new(HeapMerge::new(scans)),
    };

    let (tx, lines) = bounded(config.handoff_depth);
    let header = Header {
        date: earliest.format(DATE_FORMAT).to_string(),
        generator: config.generator.clone(),
        timescale: timescale(config.time_unit),
        snapshots,
    };
    thread::Builder::new()
        .name("bittrace:dump".to_owned())
        .spawn(move || {
            if header
                .emit(&tx)
                .and_then(|()| emit_changes(changes, &tx))
                .is_err()
            {
                debug!("dump consumer dropped early");
            }
        })
        .map_err(TraceError::Spawn)?;

    Ok(DumpStream { lines })
}

struct Header {
    date: String,
    generator: String,
    timescale: String,
    snapshots: Vec<Arc<Snapshot>>,
}

struct Closed;

fn send(tx: &Sender<String>, line: String) -> std::result::Result<(), Closed> {
    tx.send(line).map_err(|_| Closed)
}

impl Header {
    fn emit(&self, tx: &Sender<String>) -> std::result::Result<(), Closed> {
        send(tx, format!("$date {} $end", self.date))?;
        send(tx, format!("$version {} $end", self.generator))?;
        send(tx, format!("$timescale {} $end", self.timescale))?;

        for snapshot in &self.snapshots {
            send(tx, format!("$scope module {} $end", snapshot.name))?;
            send(tx, format!("$scope module {} $end", snapshot.group))?;
            for sig in &snapshot.signals {
                send(tx, format!("$var wire 1 {} {} $end", sig.id, sig.label))?;
            }
            send(tx, "$upscope $end".to_owned())?;
            send(tx, "$upscope $end".to_owned())?;
        }

        send(tx, "$enddefinitions $end".to_owned())
    }
}

fn emit_changes(
    changes: impl Iterator<Item = Change>,
    tx: &Sender<String>,
) -> std::result::Result<(), Closed> {
    let mut current: Option<u64> = None;
    for change in changes {
        if current != Some(change.stamp) {
            send(tx, format!("#{}", change.stamp))?;
            if current.is_none() {
                send(tx, "$dumpvars".to_owned())?;
            }
            current = Some(change.stamp);
        }
        send(tx, change.to_string())?;
    }
    Ok(())
}

impl Trace {
    /// Dump this trace alone, collected into one string.
    pub fn vcd(&self, time_unit: Duration) -> Result<String> {
        export_dump(DEFAULT_NAME, time_unit, &[self]).map(DumpStream::into_string)
    }
}
