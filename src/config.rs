//! Decoder configuration
//!
//! Wiring mode, timing thresholds and diagnostic limits. Channel-to-line
//! assignment is expressed through pipeline connections (which source port
//! feeds which decoder input), so it does not appear here.

use crate::Error;

/// Physical-layer wiring of the capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WiringMode {
    /// Dedicated enable (chip select) line delimits transactions; clock
    /// polarity is free.
    FourWire,
    /// No enable line; transactions are delimited by clock-idle gaps and the
    /// clock must idle high.
    ThreeWire,
    /// 4-wire protocol captured without the enable line: transactions are
    /// delimited by idle gaps, but clock polarity is not enforced.
    FourWireOn3Channels,
    /// 3-wire protocol captured alongside an (ignored) enable line.
    ThreeWireOn4Channels,
}

impl WiringMode {
    /// Whether the decoder consumes an enable line.
    pub fn uses_enable_line(self) -> bool {
        matches!(self, Self::FourWire)
    }

    /// Whether the protocol timing is 3-wire (idle-high clock rules apply).
    pub fn is_three_wire(self) -> bool {
        matches!(self, Self::ThreeWire | Self::ThreeWireOn4Channels)
    }

    /// Whether the initial clock level must be high at a transaction start.
    pub fn enforces_idle_high_clock(self) -> bool {
        self.is_three_wire()
    }
}

/// Decoder settings with protocol-revision defaults.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DecoderConfig {
    pub wiring: WiringMode,
    /// Minimum clock-quiet time separating two transactions, in µs.
    pub min_idle_gap_us: f64,
    /// Longest clock-idle time tolerated inside a transfer, in µs.
    pub max_clock_idle_us: f64,
    /// How many excess-clocking diagnostics to report before going quiet.
    /// Negative means unlimited.
    pub clocking_alert_limit: i32,
}

impl DecoderConfig {
    /// Defaults for the given wiring mode: 10 µs inter-packet gap, 5 µs
    /// intra-transfer idle ceiling, unlimited clocking alerts.
    pub fn new(wiring: WiringMode) -> Self {
        Self {
            wiring,
            min_idle_gap_us: 10.0,
            max_clock_idle_us: 5.0,
            clocking_alert_limit: -1,
        }
    }

    /// Override the inter-packet idle gap threshold.
    pub fn with_min_idle_gap_us(mut self, us: f64) -> Self {
        self.min_idle_gap_us = us;
        self
    }

    /// Override the intra-transfer idle ceiling.
    pub fn with_max_clock_idle_us(mut self, us: f64) -> Self {
        self.max_clock_idle_us = us;
        self
    }

    /// Bound the number of excess-clocking diagnostics.
    pub fn with_clocking_alert_limit(mut self, limit: i32) -> Self {
        self.clocking_alert_limit = limit;
        self
    }

    /// Lowest sample rate the mode decodes reliably. The 3-wire floor comes
    /// from resolving the 5 µs intra-transfer idle ceiling with margin; the
    /// 4-wire floor is the device minimum.
    pub fn min_sample_rate_hz(&self) -> u32 {
        if self.wiring.is_three_wire() {
            300_000
        } else {
            10_000
        }
    }

    /// Reject threshold combinations the idle detection cannot distinguish.
    pub fn validate(&self) -> Result<(), Error> {
        if self.max_clock_idle_us <= 0.0 || self.min_idle_gap_us <= 0.0 {
            return Err(Error::Config(
                "idle thresholds must be positive".to_string(),
            ));
        }
        if self.min_idle_gap_us <= self.max_clock_idle_us {
            return Err(Error::Config(format!(
                "inter-packet gap ({} µs) must exceed the intra-transfer idle ceiling ({} µs)",
                self.min_idle_gap_us, self.max_clock_idle_us
            )));
        }
        Ok(())
    }
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self::new(WiringMode::FourWire)
    }
}
