//! Example: decode simulated SPI traffic
//!
//! Fabricates a capture with optional fault injection and prints the decoded
//! field frames and packet classifications.
//!
//! Usage:
//!   cargo run --release --example decode_demo -- -n 20
//!
//! With fault injection:
//!   cargo run --release --example decode_demo -- \
//!       -n 50 --crc-error-rate 0.1 --clocking-error-rate 0.05 --three-wire

use clap::Parser;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::info;

use abcc_spi::decoder::SpiEvent;
use abcc_spi::runtime::{InputPort, OutputPort, PortDirection, PortSchema};
use abcc_spi::sim::{SimulationConfig, SimulationSource};
use abcc_spi::{
    DecoderConfig, Pipeline, ProcessNode, SpiDecoder, WiringMode, WorkError, WorkResult,
};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Number of transactions to simulate
    #[arg(short, long, default_value = "20")]
    n: usize,

    /// Decode as 3-wire (idle-gap delimited, no enable line)
    #[arg(long)]
    three_wire: bool,

    /// Probability of a corrupted checksum per transaction
    #[arg(long, default_value = "0.0")]
    crc_error_rate: f64,

    /// Probability of a truncated transaction
    #[arg(long, default_value = "0.0")]
    frag_error_rate: f64,

    /// Probability of stray clocking after a transaction
    #[arg(long, default_value = "0.0")]
    clocking_error_rate: f64,

    /// RNG seed for the fault pattern
    #[arg(long, default_value = "1")]
    seed: u64,
}

/// Sink that prints decoded events.
struct EventPrinter {
    frames: Arc<AtomicUsize>,
    packets: Arc<AtomicUsize>,
}

impl ProcessNode for EventPrinter {
    fn name(&self) -> &str {
        "event_printer"
    }

    fn num_inputs(&self) -> usize {
        1
    }

    fn num_outputs(&self) -> usize {
        0
    }

    fn input_schema(&self) -> Vec<PortSchema> {
        vec![PortSchema::new::<SpiEvent>("events", 0, PortDirection::Input)]
    }

    fn work(&mut self, inputs: &[InputPort], _outputs: &[OutputPort]) -> WorkResult<usize> {
        let mut buffer = std::collections::VecDeque::new();
        let mut input = inputs[0]
            .get::<SpiEvent>(&mut buffer)
            .ok_or_else(|| WorkError::Node("Missing events input".to_string()))?;

        match input.recv()? {
            SpiEvent::Frame(frame) => {
                self.frames.fetch_add(1, Ordering::Relaxed);
                info!(
                    "{:>8} [{:>10}..{:<10}] = 0x{:X}{}",
                    frame.kind.tag(),
                    frame.start,
                    frame.end,
                    frame.value,
                    if frame.is_error() { "  <error>" } else { "" },
                );
            }
            SpiEvent::PacketDone(summary) => {
                self.packets.fetch_add(1, Ordering::Relaxed);
                info!(
                    "── packet #{} @{}: {:?} (mosi {:?} / miso {:?}){}",
                    self.packets.load(Ordering::Relaxed),
                    summary.end,
                    summary.marker,
                    summary.mosi,
                    summary.miso,
                    if summary.cancelled { "  CANCELLED" } else { "" },
                );
            }
        }
        Ok(1)
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let wiring = if args.three_wire {
        WiringMode::ThreeWire
    } else {
        WiringMode::FourWire
    };

    let sim = SimulationConfig {
        four_wire: !args.three_wire,
        crc_error_rate: args.crc_error_rate,
        frag_error_rate: args.frag_error_rate,
        clocking_error_rate: args.clocking_error_rate,
        seed: args.seed,
        ..Default::default()
    };

    info!("=== SPI decode demo ===");
    info!(
        "{} transactions, {:?}, sample rate {} Hz",
        args.n, wiring, sim.sample_rate_hz
    );

    let mut pipeline = Pipeline::new();
    pipeline.add_process("source", SimulationSource::new(sim, args.n))?;
    pipeline.add_process(
        "decoder",
        SpiDecoder::new(DecoderConfig::new(wiring), sim.sample_rate_hz)?,
    )?;

    pipeline.connect("source", "clk", "decoder", "clk")?;
    pipeline.connect("source", "mosi", "decoder", "mosi")?;
    pipeline.connect("source", "miso", "decoder", "miso")?;
    if wiring.uses_enable_line() {
        pipeline.connect("source", "enable", "decoder", "enable")?;
    }

    let frames = Arc::new(AtomicUsize::new(0));
    let packets = Arc::new(AtomicUsize::new(0));
    pipeline.add_process(
        "printer",
        EventPrinter {
            frames: Arc::clone(&frames),
            packets: Arc::clone(&packets),
        },
    )?;
    pipeline.connect("decoder", "events", "printer", "events")?;

    let scheduler = pipeline.build()?;
    scheduler.wait();

    info!(
        "Done: {} frames in {} packets",
        frames.load(Ordering::Relaxed),
        packets.load(Ordering::Relaxed)
    );

    Ok(())
}
