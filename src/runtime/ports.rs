//! Port-based API for ergonomic node connections
//!
//! `PortSchema` describes a port and carries monomorphized channel factories,
//! so the pipeline can materialize correctly typed channels from type-erased
//! descriptions without any global registration step. `InputPort` and
//! `OutputPort` are the type-erased endpoints handed to nodes.

use crossbeam_channel::{bounded, Receiver as CrossbeamReceiver, Sender as CrossbeamSender};
use std::any::{Any, TypeId};
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::AtomicBool;

use super::receiver::Receiver;
use super::sender::{ChannelMessage, Sender};

/// Direction of a port
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortDirection {
    Input,
    Output,
}

type ErasedBox = Box<dyn Any + Send>;

/// Schema describing a port's metadata plus the channel factories for its
/// item type.
#[derive(Clone)]
pub struct PortSchema {
    pub name: String,
    pub type_id: TypeId,
    pub index: usize,
    pub direction: PortDirection,
    make_channel: fn(usize) -> (ErasedBox, ErasedBox),
    wrap_output: fn(Vec<ErasedBox>) -> Option<ErasedBox>,
}

impl PortSchema {
    /// Create a new port schema for item type `T`.
    pub fn new<T: Send + Clone + 'static>(
        name: impl Into<String>,
        index: usize,
        direction: PortDirection,
    ) -> Self {
        Self {
            name: name.into(),
            type_id: TypeId::of::<T>(),
            index,
            direction,
            make_channel: make_channel::<T>,
            wrap_output: wrap_output::<T>,
        }
    }

    /// Create a bounded channel for this port's item type. Returns the
    /// type-erased (sender, receiver) halves.
    pub(crate) fn make_channel(&self, buffer_size: usize) -> (ErasedBox, ErasedBox) {
        (self.make_channel)(buffer_size)
    }

    /// Bundle raw channel senders into a broadcast `Sender` for this port's
    /// item type. Returns None if any box holds the wrong type.
    pub(crate) fn wrap_output(&self, senders: Vec<ErasedBox>) -> Option<ErasedBox> {
        (self.wrap_output)(senders)
    }
}

impl fmt::Debug for PortSchema {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("PortSchema")
            .field("name", &self.name)
            .field("index", &self.index)
            .field("direction", &self.direction)
            .finish()
    }
}

fn make_channel<T: Send + Clone + 'static>(buffer_size: usize) -> (ErasedBox, ErasedBox) {
    let (tx, rx) = bounded::<ChannelMessage<T>>(buffer_size);
    (Box::new(tx), Box::new(rx))
}

fn wrap_output<T: Send + Clone + 'static>(senders: Vec<ErasedBox>) -> Option<ErasedBox> {
    let mut destinations = Vec::with_capacity(senders.len());
    for sender in senders {
        let tx = sender
            .downcast::<CrossbeamSender<ChannelMessage<T>>>()
            .ok()?;
        destinations.push(*tx);
    }
    Some(Box::new(Sender::new(destinations)))
}

// ────────────────────────────────────────────────────────────────────────────
// Type-erased port wrappers
// ────────────────────────────────────────────────────────────────────────────

/// Type-erased input port wrapping a channel receiver.
///
/// Owns the end-of-stream flag so shutdown state persists across `work()`
/// calls; the put-back buffer is owned by the node for the same reason.
pub struct InputPort {
    channel: ErasedBox,
    eos: AtomicBool,
}

impl InputPort {
    /// Create from a type-erased box (for internal use by Pipeline).
    pub(crate) fn from_type_erased(channel: ErasedBox) -> Self {
        Self {
            channel,
            eos: AtomicBool::new(false),
        }
    }

    /// Create an input port directly from a channel receiver. Intended for
    /// tests and for driving a node outside a pipeline.
    pub fn from_receiver<T: Send + 'static>(rx: CrossbeamReceiver<ChannelMessage<T>>) -> Self {
        Self {
            channel: Box::new(rx),
            eos: AtomicBool::new(false),
        }
    }

    /// A port that is not connected to anything.
    pub fn disconnected() -> Self {
        Self {
            channel: Box::new(()),
            eos: AtomicBool::new(false),
        }
    }

    /// Get a buffered Receiver over this port.
    ///
    /// Returns None if the port doesn't carry item type `T` or is not
    /// connected.
    pub fn get<'a, T: Send + 'static>(
        &'a self,
        buffer: &'a mut VecDeque<T>,
    ) -> Option<Receiver<'a, T>> {
        let receiver = self
            .channel
            .downcast_ref::<CrossbeamReceiver<ChannelMessage<T>>>()?;
        Some(Receiver::new(receiver, buffer, &self.eos))
    }
}

/// Type-erased output port wrapping a broadcast `Sender`.
pub struct OutputPort {
    channel: ErasedBox,
}

impl OutputPort {
    /// Create from a type-erased box (for internal use by Pipeline).
    pub(crate) fn from_type_erased(channel: ErasedBox) -> Self {
        Self { channel }
    }

    /// Create an output port directly from a broadcast sender. Intended for
    /// tests and for driving a node outside a pipeline.
    pub fn from_sender<T: Send + Clone + 'static>(sender: Sender<T>) -> Self {
        Self {
            channel: Box::new(sender),
        }
    }

    /// A port that is not connected to anything.
    pub fn disconnected() -> Self {
        Self {
            channel: Box::new(()),
        }
    }

    /// Get a Sender for this port (cheaply cloned from internal storage).
    ///
    /// Returns None if the port doesn't carry item type `T` or is not
    /// connected; nodes with optional outputs check before sending.
    pub fn get<T: Send + Clone + 'static>(&self) -> Option<Sender<T>> {
        self.channel.downcast_ref::<Sender<T>>().cloned()
    }
}

impl fmt::Debug for OutputPort {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "OutputPort")
    }
}
