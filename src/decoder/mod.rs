//! The protocol decoder node
//!
//! [`SpiDecoder`] is a [`ProcessNode`] that pulls byte-pairs off the four
//! line inputs and runs the two per-direction field state machines in lock
//! step, host direction first. Each `work()` call decodes until a packet
//! boundary, emitting [`SpiEvent`] records on the `events` output.
//!
//! Inputs: `clk`, `mosi`, `miso`, and `enable` in 4-wire mode - all
//! [`Sample`] edge streams. Output: `events`.

mod acquisition;
mod classifier;
mod direction;
mod frame;
mod line;

pub use frame::{FieldFrame, FrameFlags, FrameKind, PacketSummary, SpiEvent};

use std::collections::VecDeque;
use tracing::{debug, trace, warn};

use crate::config::DecoderConfig;
use crate::protocol::{Direction, PacketType};
use crate::runtime::{
    InputPort, OutputPort, PortDirection, PortSchema, ProcessNode, Sample, Sender, WorkError,
    WorkResult,
};
use crate::Error;

use acquisition::{Acquisition, ByteOutcome, IdleTiming};
use classifier::{PacketClassifier, SignalOutcome};
use direction::{MisoMachine, MosiMachine, SharedCounters};
use line::{LineCursor, LineState};

const CLK: usize = 0;
const MOSI: usize = 1;
const MISO: usize = 2;
const ENABLE: usize = 3;

/// Streaming decoder for the SPI host/module protocol.
pub struct SpiDecoder {
    name: String,
    config: DecoderConfig,
    timing: IdleTiming,

    // Per-line state persisted across work() calls; the borrowed cursors are
    // rebuilt each call. Indexed by CLK/MOSI/MISO/ENABLE.
    buffers: [VecDeque<Sample>; 4],
    line_states: [LineState; 4],
    started: bool,

    mosi_machine: MosiMachine,
    miso_machine: MisoMachine,
    shared: SharedCounters,
    classifier: PacketClassifier,
    mosi_ready: bool,
    miso_ready: bool,

    /// Packet counter for logging.
    packet_count: u64,
}

impl SpiDecoder {
    /// Create a decoder for a capture at `sample_rate_hz`.
    ///
    /// Fails on inconsistent timing thresholds; a sample rate below the
    /// mode's floor is decoded best-effort with a warning.
    pub fn new(config: DecoderConfig, sample_rate_hz: u32) -> Result<Self, Error> {
        config.validate()?;
        if sample_rate_hz < config.min_sample_rate_hz() {
            warn!(
                sample_rate_hz,
                floor = config.min_sample_rate_hz(),
                "sample rate below the mode floor, decode is best-effort"
            );
        }
        let timing = IdleTiming::from_us(
            config.min_idle_gap_us,
            config.max_clock_idle_us,
            sample_rate_hz,
        );
        Ok(Self {
            name: "spi_decoder".to_string(),
            config,
            timing,
            buffers: Default::default(),
            line_states: Default::default(),
            started: false,
            mosi_machine: MosiMachine::new(),
            miso_machine: MisoMachine::new(),
            shared: SharedCounters::default(),
            classifier: PacketClassifier::new(config.clocking_alert_limit),
            mosi_ready: true,
            miso_ready: true,
            packet_count: 0,
        })
    }

    /// With custom name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

impl ProcessNode for SpiDecoder {
    fn name(&self) -> &str {
        &self.name
    }

    fn num_inputs(&self) -> usize {
        if self.config.wiring.uses_enable_line() {
            4
        } else {
            3
        }
    }

    fn num_outputs(&self) -> usize {
        1
    }

    fn input_schema(&self) -> Vec<PortSchema> {
        let mut schemas = vec![
            PortSchema::new::<Sample>("clk", CLK, PortDirection::Input),
            PortSchema::new::<Sample>("mosi", MOSI, PortDirection::Input),
            PortSchema::new::<Sample>("miso", MISO, PortDirection::Input),
        ];
        if self.config.wiring.uses_enable_line() {
            schemas.push(PortSchema::new::<Sample>("enable", ENABLE, PortDirection::Input));
        }
        schemas
    }

    fn output_schema(&self) -> Vec<PortSchema> {
        vec![PortSchema::new::<SpiEvent>("events", 0, PortDirection::Output)]
    }

    fn work(&mut self, inputs: &[InputPort], outputs: &[OutputPort]) -> WorkResult<usize> {
        let events: Sender<SpiEvent> = outputs
            .first()
            .and_then(|port| port.get::<SpiEvent>())
            .ok_or_else(|| WorkError::Node("Missing events output".into()))?;

        let uses_enable = self.config.wiring.uses_enable_line();
        let enforce_idle_high = self.config.wiring.enforces_idle_high_clock();
        let timing = self.timing;

        let Self {
            buffers,
            line_states,
            started,
            mosi_machine,
            miso_machine,
            shared,
            classifier,
            mosi_ready,
            miso_ready,
            packet_count,
            ..
        } = self;

        let [clk_buf, mosi_buf, miso_buf, enable_buf] = buffers;
        let [clk_state, mosi_state, miso_state, enable_state] = line_states;

        let missing = |line: &str| WorkError::Node(format!("Missing {line} input"));
        let clk = inputs
            .get(CLK)
            .and_then(|p| p.get::<Sample>(clk_buf))
            .ok_or_else(|| missing("clk"))?;
        let mosi = inputs
            .get(MOSI)
            .and_then(|p| p.get::<Sample>(mosi_buf))
            .ok_or_else(|| missing("mosi"))?;
        let miso = inputs
            .get(MISO)
            .and_then(|p| p.get::<Sample>(miso_buf))
            .ok_or_else(|| missing("miso"))?;
        let enable = if uses_enable {
            let rx = inputs
                .get(ENABLE)
                .and_then(|p| p.get::<Sample>(enable_buf))
                .ok_or_else(|| missing("enable"))?;
            Some(LineCursor::new(rx, enable_state))
        } else {
            None
        };

        let mut acq = Acquisition {
            clk: LineCursor::new(clk, clk_state),
            mosi: LineCursor::new(mosi, mosi_state),
            miso: LineCursor::new(miso, miso_state),
            enable,
            timing,
            enforce_idle_high,
        };

        acq.ensure_init()?;
        if !*started {
            acq.advance_to_transaction_start()?;
            *started = true;
        }

        let mut emitted = 0usize;
        let mut emit = |event: SpiEvent| -> WorkResult<()> {
            events.send(event)?;
            emitted += 1;
            Ok(())
        };

        // Decode until a packet boundary. Each byte-pair runs the host
        // machine first so the module machine sees the mirrored counters
        // within the same pair.
        loop {
            let pair = acq.get_byte()?;
            let end_sample = acq.clk.position();

            match pair.outcome {
                ByteOutcome::Skip => {
                    // Empty packet; the cursor already moved to the next
                    // transaction start.
                    trace!(position = end_sample, "transaction seam skipped");
                    continue;
                }
                ByteOutcome::Ok => {
                    let host = mosi_machine.tick(
                        pair.mosi,
                        pair.first_sample,
                        end_sample,
                        *mosi_ready,
                        shared,
                    );
                    if let Some(frame) = host.frame {
                        emit(SpiEvent::Frame(frame))?;
                    }

                    // A host retransmission repeats the module frame too;
                    // rewind the module side before it consumes the repeat.
                    if host.retransmit {
                        miso_machine.restore_snapshot();
                    }

                    let module = miso_machine.tick(
                        pair.miso,
                        pair.first_sample,
                        end_sample,
                        *miso_ready,
                        shared,
                    );
                    if let Some(frame) = module.frame {
                        emit(SpiEvent::Frame(frame))?;
                    }

                    *mosi_ready = host.terminal;
                    *miso_ready = module.terminal;

                    let mut completed = None;
                    if let Some(signal) = host.signal {
                        if let SignalOutcome::Completed(summary) =
                            classifier.signal(Direction::Mosi, signal, end_sample)
                        {
                            completed = Some(summary);
                        }
                    }
                    if let Some(signal) = module.signal {
                        if let SignalOutcome::Completed(summary) =
                            classifier.signal(Direction::Miso, signal, end_sample)
                        {
                            completed = Some(summary);
                        }
                    }

                    if let Some(summary) = completed {
                        *packet_count += 1;
                        debug!(
                            packet = *packet_count,
                            marker = ?summary.marker,
                            end = summary.end,
                            "packet committed"
                        );

                        // Transactions that verified clean on both checksums
                        // become the rollback point for retransmissions.
                        if !summary.cancelled
                            && mosi_machine.checksum_ok()
                            && miso_machine.checksum_ok()
                        {
                            mosi_machine.capture_snapshot();
                            miso_machine.capture_snapshot();
                        }

                        emit(SpiEvent::PacketDone(summary))?;

                        // Validate the quiet zone behind the packet.
                        if let Some((start, end)) = acq.check_idle_after_packet()? {
                            if classifier.take_clocking_alert() {
                                emit(SpiEvent::Frame(FieldFrame {
                                    kind: FrameKind::ExcessClocking,
                                    start,
                                    end,
                                    value: 0,
                                    aux: 0,
                                    flags: FrameFlags::ERROR | FrameFlags::DISPLAY_ERROR,
                                }))?;
                            }
                        }
                        return Ok(emitted);
                    }

                    // A transaction boundary closing in on a live field is a
                    // transport-level fragmentation error.
                    if !mosi_machine.is_terminal()
                        && !miso_machine.is_terminal()
                        && acq.desync_imminent()?
                    {
                        let boundary = acq.boundary_position()?;
                        emit(SpiEvent::Frame(
                            mosi_machine.abort(pair.first_sample, boundary),
                        ))?;
                        emit(SpiEvent::Frame(
                            miso_machine.abort(pair.first_sample, boundary),
                        ))?;
                        *mosi_ready = true;
                        *miso_ready = true;
                        if let SignalOutcome::Completed(summary) =
                            classifier.signal(Direction::Mosi, PacketType::Cancel, boundary)
                        {
                            *packet_count += 1;
                            emit(SpiEvent::PacketDone(summary))?;
                            return Ok(emitted);
                        }
                    }
                }
                ByteOutcome::Reset => {
                    // Byte sync lost before the sampling edge; drop the
                    // partial field and resynchronize at the coming seam.
                    let boundary = acq.boundary_position()?;
                    emit(SpiEvent::Frame(
                        mosi_machine.abort(pair.first_sample, boundary),
                    ))?;
                    emit(SpiEvent::Frame(
                        miso_machine.abort(pair.first_sample, boundary),
                    ))?;
                    *mosi_ready = true;
                    *miso_ready = true;
                }
                ByteOutcome::Error => {
                    let boundary = acq.boundary_position()?;
                    emit(SpiEvent::Frame(
                        mosi_machine.abort(pair.first_sample, boundary),
                    ))?;
                    emit(SpiEvent::Frame(
                        miso_machine.abort(pair.first_sample, boundary),
                    ))?;
                    *mosi_ready = true;
                    *miso_ready = true;

                    let outcome = classifier.signal(Direction::Mosi, PacketType::Cancel, boundary);
                    acq.advance_to_transaction_start()?;
                    if let SignalOutcome::Completed(summary) = outcome {
                        *packet_count += 1;
                        emit(SpiEvent::PacketDone(summary))?;
                        return Ok(emitted);
                    }
                }
            }
        }
    }
}
