//! Error taxonomy

use std::io;
use std::result;

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum TraceError {
    #[error("invalid signal index {0}, want [0,64)")]
    InvalidSignalIndex(usize),

    #[error("unknown watcher")]
    UnknownWatcher,

    #[error("no trace data")]
    NoTraceData,

    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),

    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[source] io::Error),
}

pub type Result<T> = result::Result<T, TraceError>;
