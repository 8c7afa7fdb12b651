//! Wire-level protocol definitions
//!
//! Field sequences, per-field byte widths, control/status bit masks, the
//! message header layout, and packet-level classification. Everything here is
//! fixed by the protocol revision; the decoder consumes these tables rather
//! than hard-coding offsets.

/// Transfer direction of one SPI data line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Host to module (controller-originated bytes).
    Mosi,
    /// Module to host (device-originated bytes).
    Miso,
}

// ─── Control / status byte bits ─────────────────────────────────────────────

/// Write process data in this transaction is valid.
pub const CTRL_WRPD_VALID: u8 = 0x01;
/// Command-count bits (flow control, not decoded further).
pub const CTRL_CMDCNT: u8 = 0x06;
/// A message field is present.
pub const CTRL_M: u8 = 0x08;
/// The message field carries the final fragment.
pub const CTRL_LAST_FRAG: u8 = 0x10;
/// Toggle bit; repeats on retransmission.
pub const CTRL_T: u8 = 0x80;

/// Module write-message buffer is full.
pub const STATUS_WRMSG_FULL: u8 = 0x01;
/// Command-count bits mirrored by the module.
pub const STATUS_CMDCNT: u8 = 0x06;
/// A message field is present in the module frame.
pub const STATUS_M: u8 = 0x08;
/// The module message field carries the final fragment.
pub const STATUS_LAST_FRAG: u8 = 0x10;
/// Read process data in this transaction is new.
pub const STATUS_NEW_PD: u8 = 0x20;

// ─── Message header bits ────────────────────────────────────────────────────

/// Command bit of the message header command byte.
pub const MSG_HEADER_C_BIT: u8 = 0x40;
/// Error bit of the message header command byte.
pub const MSG_HEADER_E_BIT: u8 = 0x80;
/// Command-number bits of the message header command byte.
pub const MSG_HEADER_CMD_BITS: u8 = 0x3F;

/// Largest message payload the protocol allows.
pub const MAX_MSG_DATA_BYTES: u16 = 1524;

/// First-data-byte marker for object-specific error payloads.
pub const OBJECT_ERROR_SENTINEL: u8 = 0xFF;

// ─── Field tables ───────────────────────────────────────────────────────────

/// Host-frame (MOSI) fields in wire order.
///
/// `Idle` is the between-transactions resting state and never appears in an
/// emitted frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MosiField {
    Idle,
    SpiControl,
    Reserved1,
    MessageLength,
    ProcessDataLength,
    ApplicationStatus,
    InterruptMask,
    MessageField,
    WriteProcessData,
    Crc32,
    Pad,
}

impl MosiField {
    /// Byte width of the field; message and process-data regions advance one
    /// byte at a time under their own counters.
    pub fn width(self) -> u32 {
        match self {
            Self::Idle => 0,
            Self::MessageLength | Self::ProcessDataLength | Self::Pad => 2,
            Self::Crc32 => 4,
            _ => 1,
        }
    }

    /// Short display tag used by result renderers.
    pub fn tag(self) -> &'static str {
        match self {
            Self::Idle => "",
            Self::SpiControl => "SPI_CTL",
            Self::Reserved1 => "RES",
            Self::MessageLength => "MSG_LEN",
            Self::ProcessDataLength => "PD_LEN",
            Self::ApplicationStatus => "APP_STS",
            Self::InterruptMask => "INT_MSK",
            Self::MessageField => "MD",
            Self::WriteProcessData => "PD",
            Self::Crc32 => "CRC32",
            Self::Pad => "PAD",
        }
    }
}

/// Module-frame (MISO) fields in wire order.
///
/// `Idle` is the between-transactions resting state and never appears in an
/// emitted frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MisoField {
    Idle,
    Reserved1,
    Reserved2,
    LedStatus,
    AnybusStatus,
    SpiStatus,
    NetworkTime,
    MessageField,
    ReadProcessData,
    Crc32,
}

impl MisoField {
    /// Byte width of the field.
    pub fn width(self) -> u32 {
        match self {
            Self::Idle => 0,
            Self::LedStatus => 2,
            Self::NetworkTime | Self::Crc32 => 4,
            _ => 1,
        }
    }

    /// Short display tag used by result renderers.
    pub fn tag(self) -> &'static str {
        match self {
            Self::Idle => "",
            Self::Reserved1 | Self::Reserved2 => "RES",
            Self::LedStatus => "LED_STS",
            Self::AnybusStatus => "ANB_STS",
            Self::SpiStatus => "SPI_STS",
            Self::NetworkTime => "TIME",
            Self::MessageField => "MD",
            Self::ReadProcessData => "PD",
            Self::Crc32 => "CRC32",
        }
    }
}

/// Message sub-fields, identical in both directions.
///
/// `DataNotValid` is not a wire state: data frames past the declared message
/// size are re-tagged with it while the transport-quantum padding drains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MsgField {
    Size,
    Reserved1,
    SourceId,
    Object,
    Instance,
    Command,
    Reserved2,
    CommandExtension,
    Data,
    DataNotValid,
}

impl MsgField {
    /// Byte width of the sub-field; `Data` repeats until the outer message
    /// region is exhausted.
    pub fn width(self) -> u32 {
        match self {
            Self::Size | Self::Reserved1 | Self::Instance | Self::CommandExtension => 2,
            _ => 1,
        }
    }

    /// Short display tag used by result renderers.
    pub fn tag(self) -> &'static str {
        match self {
            Self::Size => "MD_SIZE",
            Self::Reserved1 | Self::Reserved2 => "RES",
            Self::SourceId => "SRC_ID",
            Self::Object => "OBJ",
            Self::Instance => "INST",
            Self::Command => "CMD",
            Self::CommandExtension => "EXT",
            Self::Data | Self::DataNotValid => "MD",
        }
    }
}

// ─── Message header ─────────────────────────────────────────────────────────

/// Decoded message header, filled in as the sub-fields stream past.
///
/// Attached to later data frames so downstream interpretation knows which
/// object/instance/command owns the payload.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MsgHeader {
    pub source_id: u8,
    pub object: u8,
    pub instance: u16,
    pub command: u8,
    pub cmd_ext: u16,
}

impl MsgHeader {
    /// Pack into a frame auxiliary word. Layout: bits 0..8 command,
    /// 8..16 object, 16..32 instance, 32..48 command extension,
    /// 48..56 source id.
    pub fn pack(&self) -> u64 {
        self.command as u64
            | (self.object as u64) << 8
            | (self.instance as u64) << 16
            | (self.cmd_ext as u64) << 32
            | (self.source_id as u64) << 48
    }

    /// Inverse of [`MsgHeader::pack`].
    pub fn unpack(word: u64) -> Self {
        Self {
            command: word as u8,
            object: (word >> 8) as u8,
            instance: (word >> 16) as u16,
            cmd_ext: (word >> 32) as u16,
            source_id: (word >> 48) as u8,
        }
    }

    /// Command bit set in the command byte.
    pub fn is_command(&self) -> bool {
        self.command & MSG_HEADER_C_BIT != 0
    }

    /// Error bit set in the command byte.
    pub fn is_error_response(&self) -> bool {
        self.command & MSG_HEADER_E_BIT != 0
    }
}

/// Auxiliary context attached to a network-time frame.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct NetworkTimeInfo {
    /// Timestamp delta against the previous transaction.
    pub delta: u32,
    /// Read process data in this transaction was flagged new.
    pub new_rd_pd: bool,
    /// Write process data in this transaction was flagged valid.
    pub wr_pd_valid: bool,
}

impl NetworkTimeInfo {
    /// Pack into a frame auxiliary word.
    pub fn pack(&self) -> u64 {
        self.delta as u64 | (self.new_rd_pd as u64) << 32 | (self.wr_pd_valid as u64) << 33
    }

    /// Inverse of [`NetworkTimeInfo::pack`].
    pub fn unpack(word: u64) -> Self {
        Self {
            delta: word as u32,
            new_rd_pd: word >> 32 & 1 != 0,
            wr_pd_valid: word >> 33 & 1 != 0,
        }
    }
}

// ─── Packet classification ──────────────────────────────────────────────────

/// Per-direction classification of one transaction, merged across the events
/// the direction produced since the last packet boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PacketType {
    /// No classifiable event.
    Empty,
    Command,
    Response,
    MessageFragment,
    ErrorResponse,
    ProtocolError,
    ChecksumError,
    /// More than one normal-class event in the same transaction.
    MultiEvent,
    /// Event accumulation that involved at least one error-class event.
    MultiEventWithError,
    /// Transaction aborted before completion.
    Cancel,
}

impl PacketType {
    /// Whether this type belongs to the error class for merge purposes.
    pub fn is_error_class(self) -> bool {
        matches!(
            self,
            Self::ErrorResponse | Self::ProtocolError | Self::ChecksumError
        )
    }

    /// Merge a further classifiable event into an accumulated type.
    ///
    /// Commutative. `Empty` is the identity, `Cancel` dominates, the multi
    /// types are sticky, a second normal-class event escalates to
    /// [`PacketType::MultiEvent`], and any mixture touching the error class
    /// escalates to [`PacketType::MultiEventWithError`].
    pub fn merge(self, other: PacketType) -> PacketType {
        use PacketType::*;

        match (self, other) {
            (Empty, x) | (x, Empty) => x,
            (Cancel, _) | (_, Cancel) => Cancel,
            (MultiEventWithError, _) | (_, MultiEventWithError) => MultiEventWithError,
            (MultiEvent, x) | (x, MultiEvent) => {
                if x.is_error_class() {
                    MultiEventWithError
                } else {
                    MultiEvent
                }
            }
            (a, b) => match (a.is_error_class(), b.is_error_class()) {
                (true, true) if a == b => a,
                (true, _) | (_, true) => MultiEventWithError,
                (false, false) => MultiEvent,
            },
        }
    }

    /// Total order used to pick the packet marker when both directions have
    /// classified. Higher outranks lower.
    pub fn marker_rank(self) -> u8 {
        match self {
            Self::Empty => 0,
            Self::MessageFragment => 1,
            Self::Command => 2,
            Self::Response => 3,
            Self::MultiEvent => 4,
            Self::MultiEventWithError => 5,
            Self::ErrorResponse => 6,
            Self::ChecksumError => 7,
            Self::ProtocolError => 8,
            Self::Cancel => 9,
        }
    }

    /// Combined transaction-level classification of the two directions.
    pub fn combined(mosi: PacketType, miso: PacketType) -> PacketType {
        if miso.marker_rank() > mosi.marker_rank() {
            miso
        } else {
            mosi
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use PacketType::*;

    const ALL: [PacketType; 10] = [
        Empty,
        Command,
        Response,
        MessageFragment,
        ErrorResponse,
        ProtocolError,
        ChecksumError,
        MultiEvent,
        MultiEventWithError,
        Cancel,
    ];

    #[test]
    fn header_pack_round_trip() {
        let header = MsgHeader {
            source_id: 0x7A,
            object: 0xFE,
            instance: 0x0001,
            command: MSG_HEADER_C_BIT | 0x01,
            cmd_ext: 0x0005,
        };
        assert_eq!(MsgHeader::unpack(header.pack()), header);
        assert!(header.is_command());
        assert!(!header.is_error_response());
    }

    #[test]
    fn network_time_pack_round_trip() {
        let info = NetworkTimeInfo {
            delta: 0x1234_5678,
            new_rd_pd: true,
            wr_pd_valid: false,
        };
        assert_eq!(NetworkTimeInfo::unpack(info.pack()), info);
    }

    #[test]
    fn field_widths_match_the_wire_layout() {
        let mosi_total: u32 = [
            MosiField::SpiControl,
            MosiField::Reserved1,
            MosiField::MessageLength,
            MosiField::ProcessDataLength,
            MosiField::ApplicationStatus,
            MosiField::InterruptMask,
            MosiField::Crc32,
            MosiField::Pad,
        ]
        .iter()
        .map(|f| f.width())
        .sum();
        // Fixed host overhead outside the message/process-data regions.
        assert_eq!(mosi_total, 14);

        let miso_total: u32 = [
            MisoField::Reserved1,
            MisoField::Reserved2,
            MisoField::LedStatus,
            MisoField::AnybusStatus,
            MisoField::SpiStatus,
            MisoField::NetworkTime,
            MisoField::Crc32,
        ]
        .iter()
        .map(|f| f.width())
        .sum();
        assert_eq!(miso_total, 14);

        // Message header is 12 bytes before the data region.
        let header_total: u32 = [
            MsgField::Size,
            MsgField::Reserved1,
            MsgField::SourceId,
            MsgField::Object,
            MsgField::Instance,
            MsgField::Command,
            MsgField::Reserved2,
            MsgField::CommandExtension,
        ]
        .iter()
        .map(|f| f.width())
        .sum();
        assert_eq!(header_total, 12);
    }

    #[test]
    fn merge_is_commutative_over_all_pairs() {
        for &a in &ALL {
            for &b in &ALL {
                assert_eq!(a.merge(b), b.merge(a), "merge({a:?}, {b:?})");
            }
        }
    }

    #[test]
    fn empty_is_the_merge_identity() {
        for &x in &ALL {
            assert_eq!(Empty.merge(x), x);
            assert_eq!(x.merge(Empty), x);
        }
    }

    #[test]
    fn cancel_dominates() {
        for &x in &ALL {
            if x != Empty {
                assert_eq!(Cancel.merge(x), Cancel);
            }
        }
    }

    #[test]
    fn normal_class_pairs_escalate_to_multi_event() {
        assert_eq!(Command.merge(Command), MultiEvent);
        assert_eq!(Command.merge(Response), MultiEvent);
        assert_eq!(Response.merge(MessageFragment), MultiEvent);
        assert_eq!(MultiEvent.merge(Command), MultiEvent);
    }

    #[test]
    fn error_involvement_escalates_to_multi_event_with_error() {
        assert_eq!(Command.merge(ErrorResponse), MultiEventWithError);
        assert_eq!(ChecksumError.merge(ProtocolError), MultiEventWithError);
        assert_eq!(MultiEvent.merge(ChecksumError), MultiEventWithError);
        assert_eq!(MultiEventWithError.merge(Response), MultiEventWithError);
        // A repeat of the identical error type does not escalate.
        assert_eq!(ChecksumError.merge(ChecksumError), ChecksumError);
        assert_eq!(ProtocolError.merge(ProtocolError), ProtocolError);
    }

    #[test]
    fn marker_order_prefers_errors_then_multis() {
        assert!(ProtocolError.marker_rank() > MultiEvent.marker_rank());
        assert!(MultiEventWithError.marker_rank() > MultiEvent.marker_rank());
        assert!(MultiEvent.marker_rank() > Response.marker_rank());
        assert!(Response.marker_rank() > MessageFragment.marker_rank());
        assert!(MessageFragment.marker_rank() > Empty.marker_rank());
        assert_eq!(PacketType::combined(Command, ErrorResponse), ErrorResponse);
        assert_eq!(PacketType::combined(Empty, Response), Response);
    }
}
