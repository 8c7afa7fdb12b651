//! Core data type for digital line streams

use std::fmt;

/// One run-length encoded level change on a digital line.
///
/// A `Sample` is sent only when the line changes state, so bandwidth scales
/// with edge density rather than capture length. The level holds from
/// `position` until the next sample's `position`. The first sample on a
/// stream establishes the initial level.
///
/// Positions are device sample indices; together with the capture's sample
/// rate they convert to wall-clock time.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Sample {
    /// Line level from this position onward.
    pub level: bool,
    /// Device sample index where this level began.
    pub position: u64,
}

impl Sample {
    /// Create a new sample.
    pub fn new(level: bool, position: u64) -> Self {
        Self { level, position }
    }

    /// Convenience for a high level.
    pub fn high(position: u64) -> Self {
        Self::new(true, position)
    }

    /// Convenience for a low level.
    pub fn low(position: u64) -> Self {
        Self::new(false, position)
    }
}

impl fmt::Display for Sample {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "Sample[{}@{}]",
            if self.level { "hi" } else { "lo" },
            self.position
        )
    }
}
