//! Byte-pair acquisition
//!
//! Pulls one 8-bit value per data line off the clock edges, MSB first,
//! detecting desynchronization along the way: an enable transition inside a
//! byte in 4-wire mode, or an over-long clock-idle stretch in the gap
//! delimited modes.
//!
//! The clock level at the first bit selects the sampling edge for the whole
//! byte: an idle-high clock samples on the trailing (rising) edge, an
//! idle-low clock on the leading edge.

use tracing::debug;

use super::line::LineCursor;
use crate::runtime::WorkResult;

/// Result of one byte acquisition attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ByteOutcome {
    /// A full byte-pair was captured.
    Ok,
    /// A transaction boundary sat at bit 0; the cursor moved to the next
    /// transaction start and no data was captured.
    Skip,
    /// Byte sync was lost between the bit-0 check and the sampling edge.
    Reset,
    /// Byte sync was lost mid-byte.
    Error,
}

/// One acquired byte-pair. `mosi`/`miso` are undefined on non-`Ok` outcomes.
#[derive(Debug, Clone, Copy)]
pub(crate) struct BytePair {
    pub outcome: ByteOutcome,
    pub mosi: u8,
    pub miso: u8,
    /// Sample index of the byte's first sampling edge.
    pub first_sample: u64,
}

/// Idle thresholds converted to device samples.
#[derive(Debug, Clone, Copy)]
pub(crate) struct IdleTiming {
    /// Minimum inter-transaction gap.
    pub min_idle_gap: u64,
    /// Longest tolerated intra-transfer clock idle.
    pub max_clock_idle: u64,
}

impl IdleTiming {
    pub(crate) fn from_us(min_idle_gap_us: f64, max_clock_idle_us: f64, sample_rate: u32) -> Self {
        let to_samples = |us: f64| ((us * sample_rate as f64 / 1e6).ceil() as u64).max(1);
        Self {
            min_idle_gap: to_samples(min_idle_gap_us),
            max_clock_idle: to_samples(max_clock_idle_us),
        }
    }
}

/// The four line cursors plus the timing rules of the configured wiring mode.
pub(crate) struct Acquisition<'a> {
    pub clk: LineCursor<'a>,
    pub mosi: LineCursor<'a>,
    pub miso: LineCursor<'a>,
    /// Present only in 4-wire mode.
    pub enable: Option<LineCursor<'a>>,
    pub timing: IdleTiming,
    /// 3-wire rule: the clock must idle high at a transaction start.
    pub enforce_idle_high: bool,
}

impl<'a> Acquisition<'a> {
    /// Establish initial levels on all lines.
    pub(crate) fn ensure_init(&mut self) -> WorkResult<()> {
        self.clk.ensure_init()?;
        self.mosi.ensure_init()?;
        self.miso.ensure_init()?;
        if let Some(enable) = &mut self.enable {
            enable.ensure_init()?;
        }
        Ok(())
    }

    /// Whether the enable line would transition before the next clock edge.
    pub(crate) fn would_enable_toggle(&mut self) -> WorkResult<bool> {
        let Some(enable) = &mut self.enable else {
            return Ok(false);
        };
        let next_clock_edge = self.clk.next_edge_position()?;
        enable.would_transition_before(next_clock_edge)
    }

    /// Whether the clock is quiet for at least `threshold` samples from here.
    pub(crate) fn is_idle_gap(&mut self, threshold: u64) -> WorkResult<bool> {
        let distance = self
            .clk
            .next_edge_position()?
            .saturating_sub(self.clk.position());
        Ok(distance >= threshold)
    }

    /// Whether a transaction boundary is imminent: an enable toggle before
    /// the next clock edge, or an over-long clock-idle stretch.
    pub(crate) fn desync_imminent(&mut self) -> WorkResult<bool> {
        if self.enable.is_some() {
            self.would_enable_toggle()
        } else {
            self.is_idle_gap(self.timing.max_clock_idle)
        }
    }

    /// Sample index closing a partial field: the upcoming enable edge in
    /// 4-wire mode, otherwise the upcoming clock edge.
    pub(crate) fn boundary_position(&mut self) -> WorkResult<u64> {
        match &mut self.enable {
            Some(enable) => enable.next_edge_position(),
            None => self.clk.next_edge_position(),
        }
    }

    /// Move all relevant cursors to the start of the next transaction:
    /// the next enable-active edge in 4-wire mode, or past the next
    /// qualifying idle gap in the gap-delimited modes.
    pub(crate) fn advance_to_transaction_start(&mut self) -> WorkResult<()> {
        if let Some(enable) = &mut self.enable {
            // Enable is active low. From inactive the next edge is the
            // activation; from active we must pass the deactivation first.
            if enable.level() {
                enable.advance_to_next_edge()?;
            } else {
                enable.advance_to_next_edge()?;
                enable.advance_to_next_edge()?;
            }
            let start = enable.position();
            self.clk.advance_to(start)?;
            return Ok(());
        }

        loop {
            while !self.is_idle_gap(self.timing.min_idle_gap)? {
                self.clk.advance_to_next_edge()?;
            }
            if !self.enforce_idle_high || self.clk.level() {
                return Ok(());
            }
            debug!(
                position = self.clk.position(),
                "clock idles low at transaction start, searching on"
            );
            self.clk.advance_to_next_edge()?;
        }
    }

    /// Acquire one byte from each data line.
    pub(crate) fn get_byte(&mut self) -> WorkResult<BytePair> {
        let mut mosi_acc = 0u8;
        let mut miso_acc = 0u8;
        let mut first_sample = self.clk.position();
        let clk_idle_high = self.clk.level();
        let gap_delimited = self.enable.is_none();

        for bit in 0..8 {
            // Boundary checks before touching the clock: at bit 0 the
            // boundary is an ordinary transaction seam, later it means the
            // byte was cut short.
            if self.would_enable_toggle()? {
                if bit == 0 {
                    self.advance_to_transaction_start()?;
                    return Ok(BytePair {
                        outcome: ByteOutcome::Skip,
                        mosi: 0,
                        miso: 0,
                        first_sample,
                    });
                }
                return Ok(BytePair {
                    outcome: ByteOutcome::Reset,
                    mosi: mosi_acc,
                    miso: miso_acc,
                    first_sample,
                });
            }

            if gap_delimited && self.is_idle_gap(self.timing.max_clock_idle)? {
                if bit != 0 {
                    return Ok(BytePair {
                        outcome: ByteOutcome::Error,
                        mosi: mosi_acc,
                        miso: miso_acc,
                        first_sample,
                    });
                }
                // At bit 0 a full-width gap with correct polarity is the
                // ordinary inter-packet seam: the edge advance below crosses
                // it straight into the next transaction. Anything shorter
                // (or idling low) is an anomalous seam to search past.
                let proper_seam = self.is_idle_gap(self.timing.min_idle_gap)?
                    && (!self.enforce_idle_high || self.clk.level());
                if !proper_seam {
                    self.advance_to_transaction_start()?;
                    return Ok(BytePair {
                        outcome: ByteOutcome::Skip,
                        mosi: 0,
                        miso: 0,
                        first_sample,
                    });
                }
            }

            self.clk.advance_to_next_edge()?;

            if !clk_idle_high {
                // Idle-low clock samples on the leading edge.
                let at = self.clk.position();
                mosi_acc = (mosi_acc << 1) | Self::sample_line(&mut self.mosi, at)? as u8;
                miso_acc = (miso_acc << 1) | Self::sample_line(&mut self.miso, at)? as u8;
            }

            if bit == 0 {
                first_sample = self.clk.position();
            }

            // Same checks again between the two clock phases.
            if self.would_enable_toggle()? {
                return Ok(BytePair {
                    outcome: ByteOutcome::Error,
                    mosi: mosi_acc,
                    miso: miso_acc,
                    first_sample,
                });
            }
            if gap_delimited && self.is_idle_gap(self.timing.max_clock_idle)? {
                return Ok(BytePair {
                    outcome: ByteOutcome::Error,
                    mosi: mosi_acc,
                    miso: miso_acc,
                    first_sample,
                });
            }

            self.clk.advance_to_next_edge()?;

            if clk_idle_high {
                // Idle-high clock samples on the trailing edge.
                let at = self.clk.position();
                mosi_acc = (mosi_acc << 1) | Self::sample_line(&mut self.mosi, at)? as u8;
                miso_acc = (miso_acc << 1) | Self::sample_line(&mut self.miso, at)? as u8;
            }
        }

        Ok(BytePair {
            outcome: ByteOutcome::Ok,
            mosi: mosi_acc,
            miso: miso_acc,
            first_sample,
        })
    }

    /// Validate the quiet zone after a committed packet. Returns the span of
    /// any stray clocking, and leaves the cursors at the next transaction
    /// start in 4-wire mode (gap-delimited modes re-enter through the normal
    /// skip path).
    pub(crate) fn check_idle_after_packet(&mut self) -> WorkResult<Option<(u64, u64)>> {
        if self.enable.is_some() {
            let enable_edge = {
                let enable = self.enable.as_mut().expect("checked above");
                enable.next_edge_position()?
            };
            let mut span = None;
            if self.clk.would_transition_before(enable_edge)? {
                span = Some((self.clk.next_edge_position()?, enable_edge));
            }
            self.advance_to_transaction_start()?;
            return Ok(span);
        }

        if self.is_idle_gap(self.timing.min_idle_gap)? {
            return Ok(None);
        }
        let start = self.clk.next_edge_position()?;
        self.advance_to_transaction_start()?;
        let end = self.clk.next_edge_position()?;
        Ok(Some((start, end)))
    }

    fn sample_line(line: &mut LineCursor<'_>, at: u64) -> WorkResult<bool> {
        line.advance_to(at)?;
        Ok(line.level())
    }
}
