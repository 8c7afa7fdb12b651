//! Decoded event records emitted by the decoder node

use bitflags::bitflags;

use crate::protocol::{Direction, MisoField, MosiField, MsgField, PacketType};

bitflags! {
    /// Flag word attached to every field frame.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct FrameFlags: u8 {
        /// Transport-level error (desync, stray clocking).
        const ERROR = 1 << 0;
        /// Frame belongs to the host-to-module direction.
        const MOSI = 1 << 1;
        /// First fragment of a fragmented message.
        const FIRST_FRAGMENT = 1 << 2;
        /// Message fragmentation in progress.
        const FRAGMENTED = 1 << 3;
        /// Field-specific protocol event (status change, retransmission,
        /// out-of-spec size, error response, checksum mismatch).
        const PROTOCOL_EVENT = 1 << 5;
        /// Renderers should present this frame as a warning.
        const DISPLAY_WARNING = 1 << 6;
        /// Renderers should present this frame as an error.
        const DISPLAY_ERROR = 1 << 7;
    }
}

/// What a field frame describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// A fixed host-frame field.
    Mosi(MosiField),
    /// A fixed module-frame field.
    Miso(MisoField),
    /// A message sub-field inside the host message region.
    MosiMessage(MsgField),
    /// A message sub-field inside the module message region.
    MisoMessage(MsgField),
    /// Partial data cut off by a transaction boundary.
    Fragmentation,
    /// Clock activity after the frame ended but before the transaction closed.
    ExcessClocking,
}

impl FrameKind {
    /// Short display tag used by result renderers.
    pub fn tag(self) -> &'static str {
        match self {
            Self::Mosi(f) => f.tag(),
            Self::Miso(f) => f.tag(),
            Self::MosiMessage(f) | Self::MisoMessage(f) => f.tag(),
            Self::Fragmentation => "FRAG",
            Self::ExcessClocking => "CLK_ERR",
        }
    }
}

/// One completed protocol field, the decoder's unit of output.
///
/// `value` holds the raw field bytes packed little-endian (first wire byte in
/// the low bits); `aux` carries field-specific context such as the computed
/// checksum, the owning message header, or a running byte counter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FieldFrame {
    pub kind: FrameKind,
    /// Sample index of the field's first bit.
    pub start: u64,
    /// Sample index where the field ended.
    pub end: u64,
    /// Raw field value, up to 8 bytes.
    pub value: u64,
    /// Field-specific auxiliary word.
    pub aux: u64,
    pub flags: FrameFlags,
}

impl FieldFrame {
    /// Which data line the frame was decoded from, if direction applies.
    pub fn direction(&self) -> Option<Direction> {
        match self.kind {
            FrameKind::Mosi(_) | FrameKind::MosiMessage(_) => Some(Direction::Mosi),
            FrameKind::Miso(_) | FrameKind::MisoMessage(_) => Some(Direction::Miso),
            _ => {
                if self.flags.contains(FrameFlags::MOSI) {
                    Some(Direction::Mosi)
                } else {
                    Some(Direction::Miso)
                }
            }
        }
    }

    /// Whether renderers should treat this frame as an error.
    pub fn is_error(&self) -> bool {
        self.flags
            .intersects(FrameFlags::ERROR | FrameFlags::DISPLAY_ERROR)
    }
}

/// Transaction-level summary emitted once per packet boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketSummary {
    /// Sample index at which the packet closed.
    pub end: u64,
    /// Accumulated host-direction classification.
    pub mosi: PacketType,
    /// Accumulated module-direction classification.
    pub miso: PacketType,
    /// Combined marker classification for the transaction.
    pub marker: PacketType,
    /// Packet was force-completed before both directions finished.
    pub cancelled: bool,
}

/// Records flowing out of the decoder's `events` port.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SpiEvent {
    /// One completed (or error) field frame.
    Frame(FieldFrame),
    /// A transaction boundary with its classification.
    PacketDone(PacketSummary),
}

impl SpiEvent {
    /// The frame, when this event carries one.
    pub fn as_frame(&self) -> Option<&FieldFrame> {
        match self {
            Self::Frame(frame) => Some(frame),
            _ => None,
        }
    }

    /// The packet summary, when this event carries one.
    pub fn as_packet(&self) -> Option<&PacketSummary> {
        match self {
            Self::PacketDone(summary) => Some(summary),
            _ => None,
        }
    }
}
