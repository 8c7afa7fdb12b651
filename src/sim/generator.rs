//! Synthetic capture generator
//!
//! Fabricates the four line edge streams for whole transactions with correct
//! checksums, so the decoder can be exercised without hardware. Transactions
//! are either scripted (tests build exact sequences, faults included) or
//! randomized with seeded Bernoulli fault injection.
//!
//! Clock timing is CPHA1-style with an idle-high clock: data lines change on
//! the falling edge, the rising edge samples. That satisfies the 3-wire
//! polarity rule and works unchanged in 4-wire mode.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

use crate::crc::Crc32;
use crate::protocol::{
    CTRL_LAST_FRAG, CTRL_M, CTRL_T, CTRL_WRPD_VALID, STATUS_LAST_FRAG, STATUS_M, STATUS_NEW_PD,
};
use crate::runtime::{
    InputPort, OutputPort, PortDirection, PortSchema, ProcessNode, Sample, Sender, WorkError,
    WorkResult,
};

/// Line indices of the generator's outputs.
pub const LINE_CLK: usize = 0;
pub const LINE_MOSI: usize = 1;
pub const LINE_MISO: usize = 2;
pub const LINE_ENABLE: usize = 3;

/// Timing and fault-injection settings for a synthetic capture.
#[derive(Debug, Clone, Copy)]
pub struct SimulationConfig {
    pub sample_rate_hz: u32,
    /// Full SPI clock period in device samples.
    pub bit_period_samples: u64,
    /// Quiet time between transactions, in µs.
    pub inter_packet_gap_us: f64,
    /// Drive an enable line around each transaction.
    pub four_wire: bool,
    /// Probability of corrupting a checksum field per transaction.
    pub crc_error_rate: f64,
    /// Probability of truncating a transaction mid-byte.
    pub frag_error_rate: f64,
    /// Probability of stray clock pulses after a transaction.
    pub clocking_error_rate: f64,
    /// RNG seed for reproducible fault patterns.
    pub seed: u64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            sample_rate_hz: 50_000_000,
            bit_period_samples: 10,
            inter_packet_gap_us: 15.0,
            four_wire: true,
            crc_error_rate: 0.0,
            frag_error_rate: 0.0,
            clocking_error_rate: 0.0,
            seed: 1,
        }
    }
}

/// Deliberate defect injected into one transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// Flip bits in the host checksum field.
    CorruptMosiCrc,
    /// Flip bits in the module checksum field.
    CorruptMisoCrc,
    /// Stop driving the transaction inside the byte at this index.
    TruncateAtByte(usize),
    /// Add this many clock pulses after the last byte.
    ExtraClockPulses(u32),
}

/// One scripted transaction. Both directions' regions are padded to a common
/// length, mirroring the on-wire rule that one length field covers both.
#[derive(Debug, Clone, Default)]
pub struct Transaction {
    /// Host message region present (control `M` bit).
    pub mosi_message: bool,
    /// Host message carries the final fragment.
    pub mosi_last_fragment: bool,
    /// Module message region present (status `M` bit).
    pub miso_message: bool,
    /// Module message carries the final fragment.
    pub miso_last_fragment: bool,
    /// Raw host message region bytes (header + data, or continuation data).
    pub mosi_msg_region: Vec<u8>,
    /// Raw module message region bytes.
    pub miso_msg_region: Vec<u8>,
    pub write_pd: Vec<u8>,
    pub read_pd: Vec<u8>,
    pub app_status: u8,
    pub anb_status: u8,
    pub led_status: u16,
    pub int_mask: u8,
    pub network_time: u32,
    /// Reuse the previous transaction's toggle bit, marking this one as a
    /// retransmission.
    pub repeat_toggle: bool,
    pub fault: Option<Fault>,
}

/// Serialize a message region: 12-byte header followed by the payload,
/// padded to the transport's 16-bit quantum.
pub fn encode_message(
    source_id: u8,
    object: u8,
    instance: u16,
    command: u8,
    cmd_ext: u16,
    data: &[u8],
) -> Vec<u8> {
    let size = data.len() as u16;
    let mut region = Vec::with_capacity(12 + data.len() + 1);
    region.extend_from_slice(&size.to_le_bytes());
    region.extend_from_slice(&[0, 0]); // reserved
    region.push(source_id);
    region.push(object);
    region.extend_from_slice(&instance.to_le_bytes());
    region.push(command);
    region.push(0); // reserved
    region.extend_from_slice(&cmd_ext.to_le_bytes());
    region.extend_from_slice(data);
    if region.len() % 2 != 0 {
        region.push(0);
    }
    region
}

/// Continuation-fragment region: payload only, no header.
pub fn encode_continuation(data: &[u8]) -> Vec<u8> {
    let mut region = data.to_vec();
    if region.len() % 2 != 0 {
        region.push(0);
    }
    region
}

/// The serialized byte streams of one transaction, equal length.
#[derive(Debug, Clone)]
struct WirePair {
    mosi: Vec<u8>,
    miso: Vec<u8>,
}

/// Per-line edge stream of a generated capture.
#[derive(Debug, Clone, Default)]
pub struct Capture {
    pub clk: Vec<Sample>,
    pub mosi: Vec<Sample>,
    pub miso: Vec<Sample>,
    pub enable: Vec<Sample>,
}

impl Capture {
    fn push(&mut self, line: usize, sample: Sample) {
        match line {
            LINE_CLK => self.clk.push(sample),
            LINE_MOSI => self.mosi.push(sample),
            LINE_MISO => self.miso.push(sample),
            LINE_ENABLE => self.enable.push(sample),
            _ => unreachable!("line index out of range"),
        }
    }
}

/// Source node fabricating SPI traffic.
///
/// Outputs `clk`, `mosi`, `miso`, `enable` (leave `enable` unconnected for
/// 3-wire pipelines). One transaction per `work()` call; ends the streams
/// after the scripted transactions (plus any requested random ones) run out.
pub struct SimulationSource {
    name: String,
    config: SimulationConfig,
    rng: StdRng,
    script: std::vec::IntoIter<Transaction>,
    random_transactions: usize,

    // Line levels and the write position, persisted across transactions.
    levels: [bool; 4],
    position: u64,
    initial_sent: bool,
    toggle: u8,
    network_time: u32,
    source_id: u8,
    produced: usize,
}

impl SimulationSource {
    /// Random traffic only.
    pub fn new(config: SimulationConfig, transactions: usize) -> Self {
        Self::with_script(config, Vec::new(), transactions)
    }

    /// Scripted transactions first, then `random_transactions` random ones.
    pub fn with_script(
        config: SimulationConfig,
        script: Vec<Transaction>,
        random_transactions: usize,
    ) -> Self {
        Self {
            name: "sim_source".to_string(),
            config,
            rng: StdRng::seed_from_u64(config.seed),
            script: script.into_iter(),
            random_transactions,
            levels: [true, false, false, true], // clk high, data low, enable inactive
            position: 0,
            initial_sent: false,
            toggle: 0,
            network_time: 1,
            source_id: 1,
            produced: 0,
        }
    }

    /// With custom name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Render the whole capture into per-line edge vectors. Consumes the
    /// scripted and random transactions; useful for tests and offline runs.
    pub fn generate_capture(mut self) -> Capture {
        let mut capture = Capture::default();
        while let Some(edges) = self.next_transaction_edges() {
            for (line, sample) in edges {
                capture.push(line, sample);
            }
        }
        capture
    }

    /// Edge stream of the next transaction, interleaved in position order.
    /// `None` when the capture is exhausted.
    pub fn next_transaction_edges(&mut self) -> Option<Vec<(usize, Sample)>> {
        let transaction = match self.script.next() {
            Some(t) => t,
            None => {
                if self.random_transactions == 0 {
                    return None;
                }
                self.random_transactions -= 1;
                self.random_transaction()
            }
        };

        let mut edges = Vec::new();
        if !self.initial_sent {
            self.initial_sent = true;
            for line in [LINE_CLK, LINE_MOSI, LINE_MISO, LINE_ENABLE] {
                edges.push((line, Sample::new(self.levels[line], 0)));
            }
            self.position = 1;
        }

        self.emit_transaction(&transaction, &mut edges);
        self.produced += 1;
        debug!(
            transaction = self.produced,
            edges = edges.len(),
            "fabricated transaction"
        );
        Some(edges)
    }

    fn random_transaction(&mut self) -> Transaction {
        let mut transaction = Transaction {
            mosi_message: true,
            mosi_last_fragment: true,
            miso_message: true,
            miso_last_fragment: true,
            mosi_msg_region: encode_message(self.source_id, 0xFE, 1, 0x41, 5, &[0, 0, 0, 0]),
            miso_msg_region: encode_message(self.source_id, 0xFE, 1, 0x01, 5, &[1, 2, 3, 4]),
            write_pd: vec![0x11, 0x22, 0x33, 0x44],
            read_pd: vec![0xAA, 0xBB, 0xCC, 0xDD],
            app_status: 0x00,
            anb_status: 0x04,
            led_status: 0x0000,
            int_mask: 0x10,
            network_time: self.network_time,
            repeat_toggle: false,
            fault: None,
        };
        self.network_time = self.network_time.wrapping_add(0x1234);
        self.source_id = self.source_id.wrapping_add(1);

        if self.rng.gen_bool(self.config.crc_error_rate.clamp(0.0, 1.0)) {
            transaction.fault = Some(Fault::CorruptMosiCrc);
        } else if self.rng.gen_bool(self.config.frag_error_rate.clamp(0.0, 1.0)) {
            transaction.fault = Some(Fault::TruncateAtByte(6));
        } else if self
            .rng
            .gen_bool(self.config.clocking_error_rate.clamp(0.0, 1.0))
        {
            transaction.fault = Some(Fault::ExtraClockPulses(3));
        }
        transaction
    }

    /// Serialize both directions with checksums, mirroring the shared length
    /// fields.
    fn serialize(&mut self, t: &Transaction) -> WirePair {
        let msg_bytes = t.mosi_msg_region.len().max(t.miso_msg_region.len());
        let msg_bytes = msg_bytes + msg_bytes % 2;
        let pd_bytes = t.write_pd.len().max(t.read_pd.len());
        let pd_bytes = pd_bytes + pd_bytes % 2;

        if !t.repeat_toggle {
            self.toggle ^= CTRL_T;
        }
        let mut ctrl = self.toggle;
        if !t.write_pd.is_empty() {
            ctrl |= CTRL_WRPD_VALID;
        }
        if t.mosi_message {
            ctrl |= CTRL_M;
            if t.mosi_last_fragment {
                ctrl |= CTRL_LAST_FRAG;
            }
        }

        let mut status = 0u8;
        if !t.read_pd.is_empty() {
            status |= STATUS_NEW_PD;
        }
        if t.miso_message {
            status |= STATUS_M;
            if t.miso_last_fragment {
                status |= STATUS_LAST_FRAG;
            }
        }

        let pad_to = |region: &[u8], len: usize| {
            let mut bytes = region.to_vec();
            bytes.resize(len, 0);
            bytes
        };

        let mut mosi = vec![ctrl, 0x00];
        mosi.extend_from_slice(&((msg_bytes / 2) as u16).to_le_bytes());
        mosi.extend_from_slice(&((pd_bytes / 2) as u16).to_le_bytes());
        mosi.push(t.app_status);
        mosi.push(t.int_mask);
        mosi.extend_from_slice(&pad_to(&t.mosi_msg_region, msg_bytes));
        mosi.extend_from_slice(&pad_to(&t.write_pd, pd_bytes));
        let mut crc = Crc32::new();
        crc.update(&mosi);
        let mut mosi_crc = crc.value();
        if t.fault == Some(Fault::CorruptMosiCrc) {
            mosi_crc ^= 0x0000_00FF;
        }
        mosi.extend_from_slice(&mosi_crc.to_le_bytes());
        mosi.extend_from_slice(&[0x00, 0x00]); // pad

        let mut miso = vec![0x00, 0x00];
        miso.extend_from_slice(&t.led_status.to_le_bytes());
        miso.push(t.anb_status);
        miso.push(status);
        miso.extend_from_slice(&t.network_time.to_le_bytes());
        miso.extend_from_slice(&pad_to(&t.miso_msg_region, msg_bytes));
        miso.extend_from_slice(&pad_to(&t.read_pd, pd_bytes));
        let mut crc = Crc32::new();
        crc.update(&miso);
        let mut miso_crc = crc.value();
        if t.fault == Some(Fault::CorruptMisoCrc) {
            miso_crc ^= 0x0000_00FF;
        }
        miso.extend_from_slice(&miso_crc.to_le_bytes());

        debug_assert_eq!(mosi.len(), miso.len());
        WirePair { mosi, miso }
    }

    fn emit_transaction(&mut self, t: &Transaction, edges: &mut Vec<(usize, Sample)>) {
        let gap =
            (self.config.inter_packet_gap_us * self.config.sample_rate_hz as f64 / 1e6) as u64;
        let period = self.config.bit_period_samples.max(2);
        let half = period / 2;

        let wire = self.serialize(t);
        let truncate_at = match t.fault {
            Some(Fault::TruncateAtByte(index)) if index < wire.mosi.len() => Some(index),
            _ => None,
        };

        self.position += gap;

        if self.config.four_wire {
            self.set_level(LINE_ENABLE, false, edges);
            self.position += 2 * period;
        }

        'bytes: for (index, (&mosi_byte, &miso_byte)) in
            wire.mosi.iter().zip(wire.miso.iter()).enumerate()
        {
            let cut_bits = match truncate_at {
                Some(at) if at == index => 4, // stop mid-byte
                Some(at) if at < index => break 'bytes,
                _ => 8,
            };
            for bit in (0..8).rev().take(cut_bits) {
                // Falling edge: data becomes valid for the coming sample.
                self.set_level(LINE_CLK, false, edges);
                self.set_level(LINE_MOSI, mosi_byte >> bit & 1 != 0, edges);
                self.set_level(LINE_MISO, miso_byte >> bit & 1 != 0, edges);
                self.position += half;
                // Rising edge: sample point.
                self.set_level(LINE_CLK, true, edges);
                self.position += half;
            }
            // Inter-byte breather, well under the intra-transfer idle limit.
            self.position += half;
        }

        if let Some(Fault::ExtraClockPulses(pulses)) = t.fault {
            self.position += period;
            for _ in 0..pulses {
                self.set_level(LINE_CLK, false, edges);
                self.position += half;
                self.set_level(LINE_CLK, true, edges);
                self.position += half;
            }
        }

        self.set_level(LINE_MOSI, false, edges);
        self.set_level(LINE_MISO, false, edges);

        if self.config.four_wire {
            self.position += 2 * period;
            self.set_level(LINE_ENABLE, true, edges);
            self.position += 1;
        }
    }

    fn set_level(&mut self, line: usize, level: bool, edges: &mut Vec<(usize, Sample)>) {
        if self.levels[line] != level {
            self.levels[line] = level;
            edges.push((line, Sample::new(level, self.position)));
        }
    }
}

impl ProcessNode for SimulationSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn num_inputs(&self) -> usize {
        0
    }

    fn num_outputs(&self) -> usize {
        4
    }

    fn output_schema(&self) -> Vec<PortSchema> {
        vec![
            PortSchema::new::<Sample>("clk", LINE_CLK, PortDirection::Output),
            PortSchema::new::<Sample>("mosi", LINE_MOSI, PortDirection::Output),
            PortSchema::new::<Sample>("miso", LINE_MISO, PortDirection::Output),
            PortSchema::new::<Sample>("enable", LINE_ENABLE, PortDirection::Output),
        ]
    }

    fn work(&mut self, _inputs: &[InputPort], outputs: &[OutputPort]) -> WorkResult<usize> {
        let senders: Vec<Option<Sender<Sample>>> =
            (0..4).map(|i| outputs.get(i).and_then(|p| p.get())).collect();

        match self.next_transaction_edges() {
            Some(edges) => {
                let count = edges.len();
                for (line, sample) in edges {
                    if let Some(sender) = &senders[line] {
                        sender
                            .send(sample)
                            .map_err(|e| WorkError::Send(e.to_string()))?;
                    }
                }
                Ok(count)
            }
            None => {
                for sender in senders.into_iter().flatten() {
                    sender.close();
                }
                Err(WorkError::Shutdown)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_pair_lengths_match() {
        let mut source = SimulationSource::new(SimulationConfig::default(), 0);
        let t = Transaction {
            mosi_message: true,
            mosi_last_fragment: true,
            mosi_msg_region: encode_message(1, 0xFE, 1, 0x41, 5, &[1, 2, 3]),
            write_pd: vec![9, 9],
            ..Default::default()
        };
        let wire = source.serialize(&t);
        assert_eq!(wire.mosi.len(), wire.miso.len());
        // 8 fixed + 16 message (12 header + 3 data + pad) + 2 pd + 4 crc + 2 pad
        assert_eq!(wire.mosi.len(), 32);
    }

    #[test]
    fn encode_message_lays_out_the_header() {
        let region = encode_message(0x42, 0xFE, 0x0102, 0x41, 0x0005, &[0xAB, 0xCD]);
        assert_eq!(region.len(), 14);
        assert_eq!(&region[..2], &[0x02, 0x00]); // size
        assert_eq!(region[4], 0x42); // source id
        assert_eq!(region[5], 0xFE); // object
        assert_eq!(&region[6..8], &[0x02, 0x01]); // instance
        assert_eq!(region[8], 0x41); // command
        assert_eq!(&region[10..12], &[0x05, 0x00]); // extension
        assert_eq!(&region[12..], &[0xAB, 0xCD]);
    }

    #[test]
    fn capture_begins_with_initial_levels() {
        let source = SimulationSource::with_script(
            SimulationConfig::default(),
            vec![Transaction::default()],
            0,
        );
        let capture = source.generate_capture();
        assert_eq!(capture.clk.first(), Some(&Sample::high(0)));
        assert_eq!(capture.enable.first(), Some(&Sample::high(0)));
        assert_eq!(capture.mosi.first(), Some(&Sample::low(0)));
        // The enable line wraps the transaction: initial, fall, rise.
        assert_eq!(capture.enable.len(), 3);
        assert!(!capture.enable[1].level);
        assert!(capture.enable[2].level);
    }

    #[test]
    fn edges_are_position_ordered_per_line() {
        let source = SimulationSource::new(
            SimulationConfig {
                seed: 7,
                ..Default::default()
            },
            3,
        );
        let capture = source.generate_capture();
        for line in [&capture.clk, &capture.mosi, &capture.miso, &capture.enable] {
            for pair in line.windows(2) {
                assert!(pair[0].position < pair[1].position);
            }
        }
    }

    #[test]
    fn toggle_bit_alternates_across_transactions() {
        let mut source = SimulationSource::new(SimulationConfig::default(), 2);
        let t = Transaction::default();
        let first = source.serialize(&t);
        let second = source.serialize(&t);
        assert_eq!(first.mosi[0] & CTRL_T, CTRL_T);
        assert_eq!(second.mosi[0] & CTRL_T, 0);
    }
}
