//! Per-direction field state machines
//!
//! One machine per data line, advanced in lock step, one byte per tick. Each
//! tick returns an explicit [`TickResult`]: whether the machine is back at
//! idle, at most one completed field frame, and an optional packet-type
//! signal when the direction's terminal field closed.
//!
//! The host machine must tick before the module machine within a byte-pair:
//! it publishes the message and process-data byte counters both directions
//! consume (see [`SharedCounters`]).

use crate::crc::Crc32;
use crate::decoder::frame::{FieldFrame, FrameFlags, FrameKind};
use crate::protocol::{
    MisoField, MosiField, MsgField, MsgHeader, NetworkTimeInfo, PacketType, CTRL_LAST_FRAG,
    CTRL_M, CTRL_T, CTRL_WRPD_VALID, MAX_MSG_DATA_BYTES, MSG_HEADER_E_BIT, OBJECT_ERROR_SENTINEL,
    STATUS_LAST_FRAG, STATUS_M, STATUS_NEW_PD, STATUS_WRMSG_FULL,
};

/// Change-detection sentinel: no status byte can equal it on first sight
/// because the reserved high bits never read all-ones.
const STATUS_UNSEEN: u8 = 0xFF;

/// Counters computed on the host direction and consumed by both.
///
/// The length fields of the host frame declare the sizes for the *entire*
/// transaction; the module machine reads its mirrored copies, so mirroring
/// must happen in the same byte-pair that completes the host field.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct SharedCounters {
    pub mosi_msg_len: u32,
    pub mosi_pd_len: u32,
    pub miso_msg_len: u32,
    pub miso_pd_len: u32,
    /// Write process data flagged valid by the host control byte.
    pub wr_pd_valid: bool,
}

/// The rollback-relevant slice of a direction's state: fragmentation flags
/// plus the message-data counters. Snapshotted after each transaction that
/// closed with confirmed-good checksums and restored on checksum mismatch or
/// a detected retransmission, so a repeated transaction counts as a repeat
/// rather than new data.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct FragState {
    pub fragmentation: bool,
    pub first_frag: bool,
    pub last_frag: bool,
    pub md_cnt: u32,
    pub md_size: u16,
}

/// Outcome of one byte tick.
#[derive(Debug, Default)]
pub(crate) struct TickResult {
    /// The machine is idle after this byte (transaction finished or aborted).
    pub terminal: bool,
    /// Field frame completed by this byte, if any.
    pub frame: Option<FieldFrame>,
    /// Packet-type signal raised by this byte, if any.
    pub signal: Option<PacketType>,
    /// Host control byte repeated its toggle bit: the transaction is a
    /// retransmission and the module direction must roll back as well.
    pub retransmit: bool,
}

// ─── Message sub-field machine ──────────────────────────────────────────────

/// Decomposes the message region into header sub-fields and data bytes.
/// Widths come from the protocol's message-header layout; `Data` repeats
/// until the outer region ends.
#[derive(Debug)]
struct MsgSubMachine {
    state: MsgField,
    byte_cnt: u32,
}

impl MsgSubMachine {
    fn new() -> Self {
        Self {
            state: MsgField::Size,
            byte_cnt: 0,
        }
    }

    /// Restart at the size field for a fresh (non-continuation) message.
    fn reset(&mut self) {
        self.state = MsgField::Size;
        self.byte_cnt = 0;
    }

    /// Park in the not-valid state: the region carries no new message, so
    /// every byte is padding.
    fn set_data_not_valid(&mut self) {
        self.state = MsgField::DataNotValid;
        self.byte_cnt = 0;
    }

    /// Account one region byte; returns the sub-field that just completed.
    fn tick(&mut self) -> Option<MsgField> {
        self.byte_cnt += 1;
        if self.byte_cnt < self.state.width() {
            return None;
        }
        let done = self.state;
        self.byte_cnt = 0;
        self.state = match done {
            MsgField::Size => MsgField::Reserved1,
            MsgField::Reserved1 => MsgField::SourceId,
            MsgField::SourceId => MsgField::Object,
            MsgField::Object => MsgField::Instance,
            MsgField::Instance => MsgField::Command,
            MsgField::Command => MsgField::Reserved2,
            MsgField::Reserved2 => MsgField::CommandExtension,
            MsgField::CommandExtension => MsgField::Data,
            MsgField::Data => MsgField::Data,
            MsgField::DataNotValid => MsgField::DataNotValid,
        };
        Some(done)
    }
}

// ─── Host (MOSI) machine ────────────────────────────────────────────────────

/// Field state machine for the host-to-module direction.
#[derive(Debug)]
pub(crate) struct MosiMachine {
    state: MosiField,
    sub: MsgSubMachine,
    frame_data: u64,
    byte_cnt: u32,
    frame_start: u64,
    checksum: Crc32,
    header: MsgHeader,
    new_msg: bool,
    error_rsp: bool,
    frag: FragState,
    snapshot: FragState,
    crc_error: bool,
    proto_error: bool,
    retransmit: bool,
    pd_cnt: u32,
    last_app_status: u8,
    last_toggle: u8,
}

impl MosiMachine {
    pub(crate) fn new() -> Self {
        Self {
            state: MosiField::Idle,
            sub: MsgSubMachine::new(),
            frame_data: 0,
            byte_cnt: 0,
            frame_start: 0,
            checksum: Crc32::new(),
            header: MsgHeader::default(),
            new_msg: false,
            error_rsp: true,
            frag: FragState::default(),
            snapshot: FragState::default(),
            crc_error: false,
            proto_error: false,
            retransmit: false,
            pd_cnt: 0,
            last_app_status: STATUS_UNSEEN,
            last_toggle: STATUS_UNSEEN,
        }
    }

    pub(crate) fn is_terminal(&self) -> bool {
        self.state == MosiField::Idle
    }

    /// This transaction's checksum field verified clean (or has not failed
    /// yet).
    pub(crate) fn checksum_ok(&self) -> bool {
        !self.crc_error
    }

    /// Record the current fragmentation state as the rollback point.
    pub(crate) fn capture_snapshot(&mut self) {
        self.snapshot = self.frag;
    }

    /// Abort the in-flight field at a transaction boundary. Emits the
    /// fragmentation error frame spanning the partial data and resets to
    /// idle.
    pub(crate) fn abort(&mut self, byte_first_sample: u64, boundary: u64) -> FieldFrame {
        if self.byte_cnt == 0 {
            self.frame_start = byte_first_sample;
        }
        let frame = FieldFrame {
            kind: FrameKind::Fragmentation,
            start: self.frame_start,
            end: boundary,
            value: 0,
            aux: 0,
            flags: FrameFlags::ERROR | FrameFlags::DISPLAY_ERROR | FrameFlags::MOSI,
        };
        self.state = MosiField::Idle;
        self.frame_data = 0;
        self.byte_cnt = 0;
        frame
    }

    /// Advance by one acquired byte.
    pub(crate) fn tick(
        &mut self,
        byte: u8,
        first_sample: u64,
        end_sample: u64,
        reset: bool,
        shared: &mut SharedCounters,
    ) -> TickResult {
        let mut out = TickResult::default();

        if self.state == MosiField::Idle {
            self.checksum.init();
            self.frame_data = 0;
            self.byte_cnt = 0;
            self.crc_error = false;
            self.proto_error = false;
            self.retransmit = false;
            if reset {
                self.state = MosiField::SpiControl;
            } else {
                out.terminal = true;
                return out;
            }
        }

        let entry_state = self.state;

        if self.byte_cnt == 0 {
            self.frame_start = first_sample;
        }
        if self.byte_cnt < 8 {
            self.frame_data |= (byte as u64) << (8 * self.byte_cnt);
        }
        self.byte_cnt += 1;

        // The checksum covers every byte except the checksum field itself.
        if self.state != MosiField::Crc32 {
            self.checksum.update(&[byte]);
        }

        let mut add_frame = false;
        let mut sub_field = None;

        match self.state {
            MosiField::Idle => {}
            MosiField::SpiControl => {
                if self.byte_cnt >= MosiField::SpiControl.width() {
                    let ctrl = self.frame_data as u8;
                    shared.wr_pd_valid = ctrl & CTRL_WRPD_VALID != 0;

                    // A repeated toggle bit marks a retransmission: rewind
                    // to the last good state before the control bits of the
                    // repeated frame are applied.
                    let toggle = ctrl & CTRL_T;
                    if self.last_toggle == toggle {
                        self.retransmit = true;
                        self.frag = self.snapshot;
                        out.retransmit = true;
                    } else {
                        self.last_toggle = toggle;
                    }

                    self.seed_fragmentation(ctrl);
                    add_frame = true;
                    self.state = MosiField::Reserved1;
                }
            }
            MosiField::Reserved1 => {
                if self.byte_cnt >= MosiField::Reserved1.width() {
                    add_frame = true;
                    self.state = MosiField::MessageLength;
                }
            }
            MosiField::MessageLength => {
                if self.byte_cnt >= MosiField::MessageLength.width() {
                    add_frame = true;
                    // The field counts 16-bit words; mirror the byte count
                    // into the module direction before its region starts.
                    let bytes = self.frame_data as u32 * 2;
                    shared.mosi_msg_len = bytes;
                    shared.miso_msg_len = bytes;
                    self.state = MosiField::ProcessDataLength;
                }
            }
            MosiField::ProcessDataLength => {
                if self.byte_cnt >= MosiField::ProcessDataLength.width() {
                    add_frame = true;
                    let bytes = self.frame_data as u32 * 2;
                    shared.mosi_pd_len = bytes;
                    shared.miso_pd_len = bytes;
                    self.state = MosiField::ApplicationStatus;
                }
            }
            MosiField::ApplicationStatus => {
                if self.byte_cnt >= MosiField::ApplicationStatus.width() {
                    add_frame = true;
                    self.state = MosiField::InterruptMask;
                }
            }
            MosiField::InterruptMask => {
                if self.byte_cnt >= MosiField::InterruptMask.width() {
                    add_frame = true;
                    if shared.mosi_msg_len != 0 {
                        self.state = MosiField::MessageField;
                        if self.new_msg {
                            self.sub.reset();
                        }
                    } else if shared.mosi_pd_len != 0 {
                        self.state = MosiField::WriteProcessData;
                    } else {
                        self.state = MosiField::Crc32;
                    }
                }
            }
            MosiField::MessageField => {
                if self.frag.fragmentation && !self.frag.first_frag {
                    // Continuation fragment: no header, every byte is data.
                    sub_field = Some(MsgField::Data);
                    add_frame = true;
                } else if let Some(done) = self.sub.tick() {
                    sub_field = Some(done);
                    add_frame = true;
                }
                if shared.mosi_msg_len == 1 {
                    self.state = if shared.mosi_pd_len != 0 {
                        MosiField::WriteProcessData
                    } else {
                        MosiField::Crc32
                    };
                }
                shared.mosi_msg_len = shared.mosi_msg_len.saturating_sub(1);
            }
            MosiField::WriteProcessData => {
                if shared.mosi_pd_len == 1 {
                    self.state = MosiField::Crc32;
                }
                add_frame = true;
                shared.mosi_pd_len = shared.mosi_pd_len.saturating_sub(1);
            }
            MosiField::Crc32 => {
                if self.byte_cnt >= MosiField::Crc32.width() {
                    add_frame = true;
                    self.state = MosiField::Pad;
                }
            }
            MosiField::Pad => {
                if self.byte_cnt >= MosiField::Pad.width() {
                    add_frame = true;
                    self.state = MosiField::Idle;
                }
            }
        }

        if add_frame {
            let (frame, signal) = self.finish_frame(entry_state, sub_field, end_sample);
            out.frame = Some(frame);
            out.signal = signal;
            self.frame_data = 0;
            self.byte_cnt = 0;
        }

        out.terminal = self.state == MosiField::Idle;
        out
    }

    fn seed_fragmentation(&mut self, ctrl: u8) {
        match ctrl & (CTRL_LAST_FRAG | CTRL_M) {
            v if v == CTRL_M => {
                // New message, more fragments follow.
                self.new_msg = true;
                if !self.frag.fragmentation {
                    self.frag.fragmentation = true;
                    self.frag.first_frag = true;
                    self.frag.last_frag = false;
                }
            }
            v if v == (CTRL_LAST_FRAG | CTRL_M) => {
                // New message carrying the final fragment.
                self.new_msg = true;
                if self.frag.fragmentation {
                    self.frag.first_frag = false;
                    self.frag.last_frag = true;
                }
            }
            _ => {
                self.new_msg = false;
                self.sub.set_data_not_valid();
                self.frag.md_cnt = 0;
                self.frag.md_size = 0;
            }
        }
    }

    fn finish_frame(
        &mut self,
        state: MosiField,
        sub_field: Option<MsgField>,
        end: u64,
    ) -> (FieldFrame, Option<PacketType>) {
        let mut flags = FrameFlags::MOSI;
        let mut aux = 0u64;
        let value = self.frame_data;
        let mut kind = match sub_field {
            Some(f) => FrameKind::MosiMessage(f),
            None => FrameKind::Mosi(state),
        };

        match sub_field {
            Some(MsgField::Size) => {
                if value as u16 > MAX_MSG_DATA_BYTES {
                    // Out-of-spec size: treat the message as empty and drop
                    // any fragmentation bookkeeping that depended on it.
                    flags |= FrameFlags::PROTOCOL_EVENT | FrameFlags::DISPLAY_ERROR;
                    self.proto_error = true;
                    self.frag.md_size = 0;
                    self.frag.fragmentation = false;
                    self.frag.first_frag = false;
                    self.frag.last_frag = false;
                } else {
                    self.frag.md_size = value as u16;
                }
            }
            Some(MsgField::SourceId) => self.header.source_id = value as u8,
            Some(MsgField::Object) => {
                self.header.object = value as u8;
                self.frag.md_cnt = 0;
            }
            Some(MsgField::Instance) => self.header.instance = value as u16,
            Some(MsgField::Command) => {
                self.header.command = value as u8;
                aux = self.header.object as u64;
                self.error_rsp = value as u8 & MSG_HEADER_E_BIT != 0;
            }
            Some(MsgField::CommandExtension) => {
                self.header.cmd_ext = value as u16;
                aux = self.header.pack();
            }
            Some(MsgField::Data) => {
                if self.error_rsp {
                    flags |= FrameFlags::PROTOCOL_EVENT | FrameFlags::DISPLAY_ERROR;
                    // A first data byte of 0xFF announces an object-specific
                    // error code in the next byte; keep the error framing
                    // alive until that byte has been seen.
                    let byte0 = value as u8;
                    if (byte0 != OBJECT_ERROR_SENTINEL && self.frag.md_cnt == 0)
                        || self.frag.md_cnt > 1
                    {
                        self.error_rsp = false;
                    }
                }
                aux = (self.header.object as u64) << 32 | self.frag.md_cnt as u64;
                self.frag.md_cnt += 1;
                if self.frag.md_cnt > self.frag.md_size as u32 {
                    kind = FrameKind::MosiMessage(MsgField::DataNotValid);
                }
            }
            Some(_) => {}
            None => match state {
                MosiField::SpiControl => {
                    if self.retransmit {
                        flags |= FrameFlags::PROTOCOL_EVENT;
                    }
                }
                MosiField::ApplicationStatus => {
                    if self.last_app_status != value as u8 {
                        self.last_app_status = value as u8;
                        flags |= FrameFlags::PROTOCOL_EVENT;
                    }
                }
                MosiField::WriteProcessData => {
                    aux = self.pd_cnt as u64;
                    self.pd_cnt += 1;
                }
                MosiField::Crc32 => {
                    let computed = self.checksum.value() as u64;
                    aux = computed;
                    if computed != value {
                        // The whole frame is suspect: undo the speculative
                        // fragmentation progress so the retransmission reads
                        // as a repeat.
                        flags |= FrameFlags::PROTOCOL_EVENT | FrameFlags::DISPLAY_ERROR;
                        self.crc_error = true;
                        self.frag = self.snapshot;
                    }
                }
                _ => {}
            },
        }

        // The process-data byte counter survives only across consecutive
        // process-data frames.
        if !(sub_field.is_none() && state == MosiField::WriteProcessData) {
            self.pd_cnt = 0;
        }

        if self.frag.fragmentation {
            flags |= FrameFlags::FRAGMENTED;
            if self.frag.first_frag {
                flags |= FrameFlags::FIRST_FRAGMENT;
            }
            if sub_field.is_none() && state == MosiField::Pad {
                self.frag.first_frag = false;
                if self.frag.last_frag {
                    self.frag.last_frag = false;
                    self.frag.fragmentation = false;
                }
            }
        }

        let frame = FieldFrame {
            kind,
            start: self.frame_start,
            end,
            value,
            aux,
            flags,
        };

        let signal = (sub_field.is_none() && state == MosiField::Pad)
            .then(|| self.classify(frame.flags));

        (frame, signal)
    }

    fn classify(&self, terminal_flags: FrameFlags) -> PacketType {
        if self.crc_error {
            PacketType::ChecksumError
        } else if self.proto_error {
            PacketType::ProtocolError
        } else if self.new_msg {
            if terminal_flags.contains(FrameFlags::FRAGMENTED)
                && !terminal_flags.contains(FrameFlags::FIRST_FRAGMENT)
            {
                PacketType::MessageFragment
            } else if self.header.is_command() {
                PacketType::Command
            } else if self.header.is_error_response() {
                PacketType::ErrorResponse
            } else {
                PacketType::Response
            }
        } else {
            PacketType::Empty
        }
    }
}

// ─── Module (MISO) machine ──────────────────────────────────────────────────

/// Field state machine for the module-to-host direction.
#[derive(Debug)]
pub(crate) struct MisoMachine {
    state: MisoField,
    sub: MsgSubMachine,
    frame_data: u64,
    byte_cnt: u32,
    frame_start: u64,
    checksum: Crc32,
    header: MsgHeader,
    new_msg: bool,
    error_rsp: bool,
    frag: FragState,
    snapshot: FragState,
    crc_error: bool,
    proto_error: bool,
    pd_cnt: u32,
    new_rd_pd: bool,
    last_anb_status: u8,
    last_timestamp: u32,
}

impl MisoMachine {
    pub(crate) fn new() -> Self {
        Self {
            state: MisoField::Idle,
            sub: MsgSubMachine::new(),
            frame_data: 0,
            byte_cnt: 0,
            frame_start: 0,
            checksum: Crc32::new(),
            header: MsgHeader::default(),
            new_msg: false,
            error_rsp: true,
            frag: FragState::default(),
            snapshot: FragState::default(),
            crc_error: false,
            proto_error: false,
            pd_cnt: 0,
            new_rd_pd: false,
            last_anb_status: STATUS_UNSEEN,
            last_timestamp: 0,
        }
    }

    pub(crate) fn is_terminal(&self) -> bool {
        self.state == MisoField::Idle
    }

    /// This transaction's checksum field verified clean (or has not failed
    /// yet).
    pub(crate) fn checksum_ok(&self) -> bool {
        !self.crc_error
    }

    /// Record the current fragmentation state as the rollback point.
    pub(crate) fn capture_snapshot(&mut self) {
        self.snapshot = self.frag;
    }

    /// Rewind to the rollback point. Driven by the orchestrator when the
    /// host direction detects a retransmission; the module repeats its
    /// previous frame in that case.
    pub(crate) fn restore_snapshot(&mut self) {
        self.frag = self.snapshot;
    }

    /// Abort the in-flight field at a transaction boundary.
    pub(crate) fn abort(&mut self, byte_first_sample: u64, boundary: u64) -> FieldFrame {
        if self.byte_cnt == 0 {
            self.frame_start = byte_first_sample;
        }
        let frame = FieldFrame {
            kind: FrameKind::Fragmentation,
            start: self.frame_start,
            end: boundary,
            value: 0,
            aux: 0,
            flags: FrameFlags::ERROR | FrameFlags::DISPLAY_ERROR,
        };
        self.state = MisoField::Idle;
        self.frame_data = 0;
        self.byte_cnt = 0;
        frame
    }

    /// Advance by one acquired byte. Must run after the host machine's tick
    /// for the same byte-pair.
    pub(crate) fn tick(
        &mut self,
        byte: u8,
        first_sample: u64,
        end_sample: u64,
        reset: bool,
        shared: &mut SharedCounters,
    ) -> TickResult {
        let mut out = TickResult::default();

        if self.state == MisoField::Idle {
            self.checksum.init();
            self.frame_data = 0;
            self.byte_cnt = 0;
            self.crc_error = false;
            self.proto_error = false;
            if reset {
                self.state = MisoField::Reserved1;
            } else {
                out.terminal = true;
                return out;
            }
        }

        let entry_state = self.state;

        if self.byte_cnt == 0 {
            self.frame_start = first_sample;
        }
        if self.byte_cnt < 8 {
            self.frame_data |= (byte as u64) << (8 * self.byte_cnt);
        }
        self.byte_cnt += 1;

        if self.state != MisoField::Crc32 {
            self.checksum.update(&[byte]);
        }

        let mut add_frame = false;
        let mut sub_field = None;

        match self.state {
            MisoField::Idle => {}
            MisoField::Reserved1 => {
                if self.byte_cnt >= MisoField::Reserved1.width() {
                    add_frame = true;
                    self.state = MisoField::Reserved2;
                }
            }
            MisoField::Reserved2 => {
                if self.byte_cnt >= MisoField::Reserved2.width() {
                    add_frame = true;
                    self.state = MisoField::LedStatus;
                }
            }
            MisoField::LedStatus => {
                if self.byte_cnt >= MisoField::LedStatus.width() {
                    add_frame = true;
                    self.state = MisoField::AnybusStatus;
                }
            }
            MisoField::AnybusStatus => {
                if self.byte_cnt >= MisoField::AnybusStatus.width() {
                    add_frame = true;
                    self.state = MisoField::SpiStatus;
                }
            }
            MisoField::SpiStatus => {
                if self.byte_cnt >= MisoField::SpiStatus.width() {
                    let status = self.frame_data as u8;
                    self.new_rd_pd = status & STATUS_NEW_PD != 0;
                    match status & (STATUS_LAST_FRAG | STATUS_M) {
                        v if v == STATUS_M => {
                            self.new_msg = true;
                            if !self.frag.fragmentation {
                                self.frag.fragmentation = true;
                                self.frag.first_frag = true;
                                self.frag.last_frag = false;
                            }
                        }
                        v if v == (STATUS_LAST_FRAG | STATUS_M) => {
                            self.new_msg = true;
                            if self.frag.fragmentation {
                                self.frag.first_frag = false;
                                self.frag.last_frag = true;
                            }
                        }
                        _ => {
                            self.new_msg = false;
                            self.sub.set_data_not_valid();
                            self.frag.md_cnt = 0;
                            self.frag.md_size = 0;
                        }
                    }
                    add_frame = true;
                    self.state = MisoField::NetworkTime;
                }
            }
            MisoField::NetworkTime => {
                if self.byte_cnt >= MisoField::NetworkTime.width() {
                    add_frame = true;
                    if shared.miso_msg_len != 0 {
                        self.state = MisoField::MessageField;
                        if self.new_msg {
                            self.sub.reset();
                        }
                    } else if shared.miso_pd_len != 0 {
                        self.state = MisoField::ReadProcessData;
                    } else {
                        self.state = MisoField::Crc32;
                    }
                }
            }
            MisoField::MessageField => {
                if self.frag.fragmentation && !self.frag.first_frag {
                    sub_field = Some(MsgField::Data);
                    add_frame = true;
                } else if let Some(done) = self.sub.tick() {
                    sub_field = Some(done);
                    add_frame = true;
                }
                if shared.miso_msg_len == 1 {
                    self.state = if shared.miso_pd_len != 0 {
                        MisoField::ReadProcessData
                    } else {
                        MisoField::Crc32
                    };
                }
                shared.miso_msg_len = shared.miso_msg_len.saturating_sub(1);
            }
            MisoField::ReadProcessData => {
                if shared.miso_pd_len == 1 {
                    self.state = MisoField::Crc32;
                }
                add_frame = true;
                shared.miso_pd_len = shared.miso_pd_len.saturating_sub(1);
            }
            MisoField::Crc32 => {
                if self.byte_cnt >= MisoField::Crc32.width() {
                    add_frame = true;
                    self.state = MisoField::Idle;
                }
            }
        }

        if add_frame {
            let (frame, signal) = self.finish_frame(entry_state, sub_field, end_sample, shared);
            out.frame = Some(frame);
            out.signal = signal;
            self.frame_data = 0;
            self.byte_cnt = 0;
        }

        out.terminal = self.state == MisoField::Idle;
        out
    }

    fn finish_frame(
        &mut self,
        state: MisoField,
        sub_field: Option<MsgField>,
        end: u64,
        shared: &mut SharedCounters,
    ) -> (FieldFrame, Option<PacketType>) {
        let mut flags = FrameFlags::empty();
        let mut aux = 0u64;
        let value = self.frame_data;
        let mut kind = match sub_field {
            Some(f) => FrameKind::MisoMessage(f),
            None => FrameKind::Miso(state),
        };

        match sub_field {
            Some(MsgField::Size) => {
                if value as u16 > MAX_MSG_DATA_BYTES {
                    flags |= FrameFlags::PROTOCOL_EVENT | FrameFlags::DISPLAY_ERROR;
                    self.proto_error = true;
                    self.frag.md_size = 0;
                    self.frag.fragmentation = false;
                    self.frag.first_frag = false;
                    self.frag.last_frag = false;
                } else {
                    self.frag.md_size = value as u16;
                }
            }
            Some(MsgField::SourceId) => self.header.source_id = value as u8,
            Some(MsgField::Object) => {
                self.header.object = value as u8;
                self.frag.md_cnt = 0;
            }
            Some(MsgField::Instance) => self.header.instance = value as u16,
            Some(MsgField::Command) => {
                self.header.command = value as u8;
                aux = self.header.object as u64;
                self.error_rsp = value as u8 & MSG_HEADER_E_BIT != 0;
            }
            Some(MsgField::CommandExtension) => {
                self.header.cmd_ext = value as u16;
                aux = self.header.pack();
            }
            Some(MsgField::Data) => {
                if self.error_rsp {
                    flags |= FrameFlags::PROTOCOL_EVENT | FrameFlags::DISPLAY_ERROR;
                    let byte0 = value as u8;
                    if (byte0 != OBJECT_ERROR_SENTINEL && self.frag.md_cnt == 0)
                        || self.frag.md_cnt > 1
                    {
                        self.error_rsp = false;
                    }
                }
                aux = self.frag.md_cnt as u64;
                self.frag.md_cnt += 1;
                if self.frag.md_cnt > self.frag.md_size as u32 {
                    kind = FrameKind::MisoMessage(MsgField::DataNotValid);
                }
            }
            Some(_) => {}
            None => match state {
                MisoField::AnybusStatus => {
                    if self.last_anb_status != value as u8 {
                        self.last_anb_status = value as u8;
                        flags |= FrameFlags::PROTOCOL_EVENT;
                    }
                }
                MisoField::SpiStatus => {
                    if value as u8 & STATUS_WRMSG_FULL != 0 {
                        // Possible write-message overrun on the module side.
                        flags |= FrameFlags::PROTOCOL_EVENT | FrameFlags::DISPLAY_WARNING;
                    }
                }
                MisoField::NetworkTime => {
                    let timestamp = value as u32;
                    let info = NetworkTimeInfo {
                        delta: timestamp.wrapping_sub(self.last_timestamp),
                        new_rd_pd: self.new_rd_pd,
                        wr_pd_valid: shared.wr_pd_valid,
                    };
                    aux = info.pack();
                    self.new_rd_pd = false;
                    shared.wr_pd_valid = false;
                    self.last_timestamp = timestamp;
                }
                MisoField::ReadProcessData => {
                    aux = self.pd_cnt as u64;
                    self.pd_cnt += 1;
                }
                MisoField::Crc32 => {
                    let computed = self.checksum.value() as u64;
                    aux = computed;
                    if computed != value {
                        flags |= FrameFlags::PROTOCOL_EVENT | FrameFlags::DISPLAY_ERROR;
                        self.crc_error = true;
                        self.frag = self.snapshot;
                    }
                }
                _ => {}
            },
        }

        if !(sub_field.is_none() && state == MisoField::ReadProcessData) {
            self.pd_cnt = 0;
        }

        if self.frag.fragmentation {
            flags |= FrameFlags::FRAGMENTED;
            if self.frag.first_frag {
                flags |= FrameFlags::FIRST_FRAGMENT;
            }
            if sub_field.is_none() && state == MisoField::Crc32 {
                self.frag.first_frag = false;
                if self.frag.last_frag {
                    self.frag.last_frag = false;
                    self.frag.fragmentation = false;
                }
            }
        }

        let frame = FieldFrame {
            kind,
            start: self.frame_start,
            end,
            value,
            aux,
            flags,
        };

        let signal = (sub_field.is_none() && state == MisoField::Crc32)
            .then(|| self.classify(frame.flags));

        (frame, signal)
    }

    fn classify(&self, terminal_flags: FrameFlags) -> PacketType {
        if self.crc_error {
            PacketType::ChecksumError
        } else if self.proto_error {
            PacketType::ProtocolError
        } else if self.new_msg {
            if terminal_flags.contains(FrameFlags::FRAGMENTED)
                && !terminal_flags.contains(FrameFlags::FIRST_FRAGMENT)
            {
                PacketType::MessageFragment
            } else if self.header.is_command() {
                PacketType::Command
            } else if self.header.is_error_response() {
                PacketType::ErrorResponse
            } else {
                PacketType::Response
            }
        } else {
            PacketType::Empty
        }
    }
}
