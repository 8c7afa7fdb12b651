//! Simulation feeds
//!
//! Two ways to produce decoder input without hardware:
//! - [`LogFileParser`]: replay messages captured in host SDK text logs
//! - [`SimulationSource`]: fabricate line edge streams for whole
//!   transactions, with optional fault injection

pub mod generator;
pub mod logfile;

pub use generator::{
    encode_continuation, encode_message, Capture, Fault, SimulationConfig, SimulationSource,
    Transaction,
};
pub use logfile::{AnbState, LogFileParser, LogMessage, LogRecord};
