use std::collections::HashSet;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use assert_matches::assert_matches;
use chrono::{DateTime, TimeDelta};

use bittrace::{
    export_dump, export_with, ExportConfig, MergeStrategy, Probe, Timestamp, Trace, TraceError,
};

fn t(ns: i64) -> Timestamp {
    DateTime::from_timestamp(1_700_000_000, 0).unwrap() + TimeDelta::nanoseconds(ns)
}

/// Body lines after `$enddefinitions`, as (stamp, token) pairs.
fn body(dump: &str) -> Vec<(u64, String)> {
    let mut stamp = 0;
    let mut out = Vec::new();
    for line in dump.lines().skip_while(|l| *l != "$enddefinitions $end").skip(1) {
        if let Some(s) = line.strip_prefix('#') {
            stamp = s.parse().unwrap();
        } else if line != "$dumpvars" {
            out.push((stamp, line.to_owned()));
        }
    }
    out
}

fn var_ids(dump: &str) -> Vec<String> {
    dump.lines()
        .filter_map(|l| l.strip_prefix("$var wire 1 "))
        .map(|rest| rest.split(' ').next().unwrap().to_owned())
        .collect()
}

fn two_traces() -> (Trace, Trace) {
    let a = Trace::new("a", 8).unwrap();
    let b = Trace::new("b", 8).unwrap();
    b.record_at(t(0), 0b01, 0b01);
    a.record_at(t(500), 0b10, 0b10);
    b.record_at(t(500), 0b01, 0b00);
    a.record_at(t(900), 0b10, 0b00);
    b.record_at(t(1_000), 0b11, 0b11);
    (a, b)
}

#[test]
fn test_earliest_comes_from_any_trace() {
    let (a, b) = two_traces();
    let dump = export_dump("pair", Duration::from_nanos(100), &[&a, &b])
        .unwrap()
        .into_string();

    assert!(dump.starts_with("$date Tue Nov 14 22:13:20 2023 $end\n"));
    let lines = body(&dump);
    // a declares "!" and starts after b
    let first_a = lines.iter().find(|(_, l)| l.ends_with('!')).unwrap();
    assert_eq!(first_a.0, 5);
    assert!(lines.windows(2).all(|w| w[0].0 <= w[1].0));
}

#[test]
fn test_disjoint_signals_get_distinct_ids() {
    let (a, b) = two_traces();
    let dump = export_dump("pair", Duration::from_nanos(1), &[&a, &b])
        .unwrap()
        .into_string();

    let ids = var_ids(&dump);
    assert_eq!(ids.len(), 3);
    assert_eq!(ids.iter().collect::<HashSet<_>>().len(), 3);

    let scopes: Vec<&str> = dump
        .lines()
        .filter(|l| l.starts_with("$scope"))
        .collect();
    assert_eq!(
        scopes,
        vec![
            "$scope module a $end",
            "$scope module ports $end",
            "$scope module b $end",
            "$scope module ports $end",
        ]
    );
}

#[test]
fn test_timestamp_markers_and_dumpvars() {
    let (a, b) = two_traces();
    let dump = export_dump("pair", Duration::from_nanos(100), &[&a, &b])
        .unwrap()
        .into_string();

    let body: Vec<&str> = dump
        .lines()
        .skip_while(|l| *l != "$enddefinitions $end")
        .skip(1)
        .collect();
    assert_eq!(body[0], "#0");
    assert_eq!(body[1], "$dumpvars");
    assert_eq!(body.iter().filter(|l| **l == "$dumpvars").count(), 1);

    let stamps: Vec<&str> = body.iter().copied().filter(|l| l.starts_with('#')).collect();
    assert_eq!(stamps, vec!["#0", "#5", "#9", "#10"]);
}

#[test]
fn test_empty_traces_are_skipped() {
    let empty = Trace::new("idle", 4).unwrap();
    let busy = Trace::new("busy", 4).unwrap();
    busy.record_at(t(0), 1, 1);

    let dump = export_dump("x", Duration::from_nanos(1), &[&empty, &busy])
        .unwrap()
        .into_string();
    assert!(!dump.contains("module idle"));
    assert_eq!(var_ids(&dump), vec!["!"]);

    assert_matches!(
        export_dump("x", Duration::from_nanos(1), &[&empty]),
        Err(TraceError::NoTraceData)
    );
}

#[test]
fn test_strategies_agree() {
    let traces: Vec<Trace> = (0..5)
        .map(|n| {
            let trace = Trace::new(format!("t{n}"), 16).unwrap();
            for i in 0..20i64 {
                trace.record_at(t(i * 37 + n * 11), 0b111, (i as u64 * (n as u64 + 1)) & 0b111);
            }
            trace
        })
        .collect();
    let refs: Vec<&Trace> = traces.iter().collect();

    let tree = export_with(
        &ExportConfig::new("m", Duration::from_nanos(10)).with_handoff_depth(1),
        &refs,
    )
    .unwrap()
    .into_string();
    let heap = export_with(
        &ExportConfig::new("m", Duration::from_nanos(10)).with_strategy(MergeStrategy::Heap),
        &refs,
    )
    .unwrap()
    .into_string();

    assert_eq!(tree, heap);
    let lines = body(&tree);
    assert!(lines.windows(2).all(|w| w[0].0 <= w[1].0));
}

#[test]
fn test_consumer_may_stop_early() {
    let trace = Trace::new("long", 4096).unwrap();
    for i in 0..4096i64 {
        trace.record_at(t(i), 1, (i + 1) as u64 & 1);
    }
    let mut stream = export_dump("x", Duration::from_nanos(1), &[&trace]).unwrap();
    assert_eq!(stream.next().as_deref(), Some("$date Tue Nov 14 22:13:20 2023 $end"));
    drop(stream);
}

#[test]
fn test_identical_sample_no_advance_no_event() {
    let trace = Trace::new("cpu", 4).unwrap();
    let w = trace.watch(0, 4).unwrap();

    trace.record_at(t(0), 1, 1);
    trace.record_at(t(1), 1, 1);

    assert_eq!(trace.cursor(), 1);
    assert!(w.recv().unwrap().on);
    assert!(w.try_recv().is_err());
}

#[test]
fn test_absent_trace_is_a_no_op() {
    let absent: Option<Arc<Trace>> = Trace::new("void", 0).map(Arc::new);
    absent.record(1, 1);
    absent.record_at(t(0), 1, 0);
    assert!(absent.is_none());
}

#[test]
fn test_absent_trace_instrumentation_needs_no_checks() {
    let absent: Option<Trace> = Trace::new("void", 0);
    absent.set_group("bus");
    assert_matches!(
        absent.set_label(0, "irq"),
        Err(TraceError::InvalidSignalIndex(0))
    );
    assert_matches!(absent.watch(3, 8), Err(TraceError::InvalidSignalIndex(3)));

    let live = Trace::new("live", 4).unwrap();
    let w = live.watch(3, 8).unwrap();
    assert_matches!(absent.cancel(&w), Err(TraceError::UnknownWatcher));

    let present = Some(live);
    present.set_label(3, "irq").unwrap();
    present.set_group("bus");
    present.cancel(&w).unwrap();
    let live = present.unwrap();
    assert_eq!(live.label(3).unwrap(), "irq");
    assert_eq!(live.group(), "bus");
    assert_eq!(live.watcher_count(), 0);
}

#[test]
fn test_record_while_exporting() {
    let trace = Arc::new(Trace::new("live", 64).unwrap());
    trace.record_at(t(0), 1, 1);

    let producer = {
        let trace = Arc::clone(&trace);
        thread::spawn(move || {
            for i in 1..1_000i64 {
                trace.record_at(t(i), 1, (i + 1) as u64 & 1);
            }
        })
    };
    for _ in 0..10 {
        let dump = trace.vcd(Duration::from_nanos(1)).unwrap();
        let lines = body(&dump);
        assert!(!lines.is_empty());
        assert!(lines.windows(2).all(|w| w[0].0 < w[1].0));
    }
    producer.join().unwrap();
    assert_eq!(trace.cursor(), 1_000);
}
