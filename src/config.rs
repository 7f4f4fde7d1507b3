//! Trace and export configuration

use std::time::Duration;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::{Result, TraceError};

/// Name used for traces created with an empty name, and the default
/// generator label of a dump.
pub const DEFAULT_NAME: &str = "bittrace";

/// Scope name used for a trace's signals when no group is set.
pub const DEFAULT_GROUP: &str = "ports";

/// Default capacity of each merge-tree handoff and of the line stream.
pub const DEFAULT_HANDOFF_DEPTH: usize = 64;

/// Configuration for a single trace.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TraceConfig {
    /// Owning name, rendered as the outer scope of the dump.
    pub name: String,

    /// Number of samples retained in the ring buffer.
    pub capacity: usize,

    /// Grouping name, rendered as the inner scope of the dump.
    pub group: Option<String>,
}

impl TraceConfig {
    /// Create a configuration. An empty name falls back to [`DEFAULT_NAME`].
    pub fn new(name: impl Into<String>, capacity: usize) -> Self {
        let name = name.into();
        Self {
            name: if name.is_empty() {
                DEFAULT_NAME.to_owned()
            } else {
                name
            },
            capacity,
            group: None,
        }
    }

    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        let group = group.into();
        self.group = (!group.is_empty()).then_some(group);
        self
    }

    /// Apply the name and group defaults to fields set directly.
    pub fn normalized(mut self) -> Self {
        if self.name.is_empty() {
            self.name = DEFAULT_NAME.to_owned();
        }
        self.group = self.group.filter(|g| !g.is_empty());
        self
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<()> {
        if self.capacity == 0 {
            return Err(TraceError::InvalidConfig("capacity must be > 0"));
        }
        Ok(())
    }
}

/// How per-trace change sequences are interleaved during export.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum MergeStrategy {
    /// Binary tree of merging threads joined by bounded channels.
    #[default]
    Tree,
    /// Single-threaded priority-queue merge on the streaming thread.
    Heap,
}

/// Configuration for a waveform dump.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ExportConfig {
    /// Label written into the `$version` section.
    pub generator: String,

    /// Duration represented by one tick of the dump's time axis.
    pub time_unit: Duration,

    pub strategy: MergeStrategy,

    /// Capacity of every bounded handoff between pipeline stages.
    pub handoff_depth: usize,
}

impl ExportConfig {
    /// Create a standard configuration. An empty generator label falls
    /// back to [`DEFAULT_NAME`].
    pub fn new(generator: impl Into<String>, time_unit: Duration) -> Self {
        let generator = generator.into();
        Self {
            generator: if generator.is_empty() {
                DEFAULT_NAME.to_owned()
            } else {
                generator
            },
            time_unit,
            strategy: MergeStrategy::default(),
            handoff_depth: DEFAULT_HANDOFF_DEPTH,
        }
    }

    pub fn with_strategy(mut self, strategy: MergeStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_handoff_depth(mut self, depth: usize) -> Self {
        self.handoff_depth = depth;
        self
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<()> {
        if self.time_unit.is_zero() {
            return Err(TraceError::InvalidConfig("time_unit must be > 0"));
        }
        if self.handoff_depth == 0 {
            return Err(TraceError::InvalidConfig("handoff_depth must be > 0"));
        }
        Ok(())
    }
}
