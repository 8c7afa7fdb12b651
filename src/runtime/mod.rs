//! Streaming runtime for decoder node graphs
//!
//! - **Nodes**: computation units implementing [`ProcessNode`]
//! - **Channels**: bounded crossbeam channels with put-back receivers and
//!   explicit end-of-stream signaling
//! - **Pipeline/Scheduler**: named-node graph builder and thread-per-node
//!   execution

pub mod errors;
pub mod node;
pub mod pipeline;
pub mod ports;
pub mod receiver;
pub mod sample;
pub mod scheduler;
pub mod sender;

pub use errors::{ConnectionError, WorkError, WorkResult};
pub use node::ProcessNode;
pub use pipeline::Pipeline;
pub use ports::{InputPort, OutputPort, PortDirection, PortSchema};
pub use receiver::Receiver;
pub use sample::Sample;
pub use scheduler::Scheduler;
pub use sender::{ChannelMessage, Sender};
