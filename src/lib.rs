//! Streaming decoder for the Anybus CompactCom SPI host/module protocol
//!
//! Decodes raw digital edge streams from a logic capture into typed protocol
//! field frames, reassembled messages and classified packets: control/status
//! bytes, length fields, message headers and data, cyclic process data, and
//! frame checksums, with transport-error recovery (fragmented transactions,
//! checksum mismatches, stray clocking).
//!
//! # Architecture
//!
//! Processing runs as a streaming node graph: sample sources feed the
//! [`SpiDecoder`] node over per-line channels, and decoded [`SpiEvent`]
//! records flow to downstream sinks. Nodes execute thread-per-node under the
//! [`runtime`] scheduler.
//!
//! # Example
//!
//! ```no_run
//! use abcc_spi::{DecoderConfig, Pipeline, SpiDecoder, WiringMode};
//! use abcc_spi::sim::{SimulationConfig, SimulationSource};
//!
//! let sim = SimulationConfig::default();
//! let mut pipeline = Pipeline::new();
//! pipeline.add_process("source", SimulationSource::new(sim, 100))?;
//! pipeline.add_process(
//!     "decoder",
//!     SpiDecoder::new(DecoderConfig::new(WiringMode::FourWire), sim.sample_rate_hz)?,
//! )?;
//! for line in ["clk", "mosi", "miso", "enable"] {
//!     pipeline.connect("source", line, "decoder", line)?;
//! }
//! // ... connect an event sink and run
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod config;
pub mod crc;
pub mod decoder;
pub mod protocol;
pub mod runtime;
pub mod sim;

pub use config::{DecoderConfig, WiringMode};
pub use crc::Crc32;
pub use decoder::{FieldFrame, FrameFlags, FrameKind, PacketSummary, SpiDecoder, SpiEvent};
pub use protocol::{Direction, MisoField, MosiField, MsgField, MsgHeader, PacketType};
pub use runtime::{Pipeline, ProcessNode, Sample, Scheduler, WorkError, WorkResult};

/// Crate-surface errors: configuration and I/O. The decode path itself never
/// fails on malformed input; anomalies degrade to classified error events.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
