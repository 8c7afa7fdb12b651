//! Error types for the streaming runtime

use crossbeam_channel::RecvError;
use std::any::TypeId;

/// Error type for connection operations
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("Type mismatch: {from_node}.{from_port} ({from_type:?}) -> {to_node}.{to_port} ({to_type:?})")]
    TypeMismatch {
        from_node: String,
        from_port: String,
        from_type: TypeId,
        to_node: String,
        to_port: String,
        to_type: TypeId,
    },

    #[error("Node '{0}' not found")]
    NodeNotFound(String),

    #[error("Port '{port}' not found on node '{node}'")]
    PortNotFound { node: String, port: String },

    #[error("Node '{0}' already exists")]
    DuplicateNode(String),

    #[error("{0}")]
    DuplicateConnection(String),
}

/// Error type for work function operations
#[derive(Debug, thiserror::Error)]
pub enum WorkError {
    #[error("Failed to receive from input channel: {0}")]
    Recv(#[from] RecvError),

    #[error("Failed to send to output channel: {0}")]
    Send(String),

    #[error("Node-specific error: {0}")]
    Node(String),

    #[error("Shutdown signal received")]
    Shutdown,
}

impl<T> From<crossbeam_channel::SendError<T>> for WorkError {
    fn from(e: crossbeam_channel::SendError<T>) -> Self {
        WorkError::Send(format!("{}", e))
    }
}

/// Result type for work functions
pub type WorkResult<T = ()> = Result<T, WorkError>;
