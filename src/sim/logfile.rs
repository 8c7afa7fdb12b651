//! Replay parser for SDK log captures
//!
//! Host SDK logs interleave free text with message dumps and module status
//! changes. Three markers matter:
//!
//! ```text
//! Msg sent: [ MsgBuf:0x2 Size:0x2 SrcId:0x0 DestObj:0x1
//!   Inst:0x0 Cmd:0x1 CmdExt0:0x0 CmdExt1:0x0 ]
//! [ 0x01 0x02 ]
//! ANB_STATUS: ABP_ANB_STATE_PROCESS_ACTIVE
//! ```
//!
//! The two header lines use fixed field names with tolerant whitespace (some
//! SDK versions pad before the colon); the first header line may share the
//! marker's line or follow it. Data lines are space-delimited `0xNN` tokens,
//! possibly spanning lines, terminated by `]`. A malformed message yields an
//! error record and parsing continues with the next marker.

use std::fs::File;
use std::io::{BufRead, BufReader, Lines};
use std::path::Path;

use tracing::{debug, warn};

use crate::protocol::MAX_MSG_DATA_BYTES;
use crate::Error;

/// Module operating state reported by `ANB_STATUS:` lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnbState {
    Setup,
    NwInit,
    WaitProcess,
    Idle,
    ProcessActive,
    Error,
    Exception,
}

impl AnbState {
    /// The wire value of this state.
    pub fn value(self) -> u8 {
        match self {
            Self::Setup => 0x00,
            Self::NwInit => 0x01,
            Self::WaitProcess => 0x02,
            Self::Idle => 0x03,
            Self::ProcessActive => 0x04,
            Self::Error => 0x05,
            Self::Exception => 0x07,
        }
    }

    fn from_log_name(line: &str) -> Option<Self> {
        const NAMES: [(&str, AnbState); 7] = [
            ("ABP_ANB_STATE_SETUP", AnbState::Setup),
            ("ABP_ANB_STATE_NW_INIT", AnbState::NwInit),
            ("ABP_ANB_STATE_WAIT_PROCESS", AnbState::WaitProcess),
            ("ABP_ANB_STATE_IDLE", AnbState::Idle),
            ("ABP_ANB_STATE_PROCESS_ACTIVE", AnbState::ProcessActive),
            ("ABP_ANB_STATE_ERROR", AnbState::Error),
            ("ABP_ANB_STATE_EXCEPTION", AnbState::Exception),
        ];
        let line = line.trim_end();
        NAMES
            .iter()
            .find(|(name, _)| line.ends_with(name))
            .map(|&(_, state)| state)
    }
}

/// One message reconstructed from a log dump.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogMessage {
    pub data_size: u16,
    pub source_id: u8,
    pub dest_obj: u8,
    pub instance: u16,
    pub cmd: u8,
    pub cmd_ext0: u8,
    pub cmd_ext1: u8,
    pub data: Vec<u8>,
}

/// One parsed log entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogRecord {
    /// Host-to-module message (`Msg sent:`).
    Tx(LogMessage),
    /// Module-to-host message (`Msg received:`).
    Rx(LogMessage),
    /// A `Msg sent:` dump that failed to parse.
    TxError,
    /// A `Msg received:` dump that failed to parse.
    RxError,
    /// Module status change.
    StateChange(AnbState),
}

/// Line-oriented parser over a log capture.
pub struct LogFileParser<R> {
    lines: Lines<R>,
    anb_state: AnbState,
}

impl LogFileParser<BufReader<File>> {
    /// Open a log file. A missing file is reported once, here.
    pub fn open(path: impl AsRef<Path>, initial_state: AnbState) -> Result<Self, Error> {
        let file = File::open(path.as_ref())?;
        Ok(Self::new(BufReader::new(file), initial_state))
    }
}

impl<R: BufRead> LogFileParser<R> {
    /// Parse from any buffered reader.
    pub fn new(reader: R, initial_state: AnbState) -> Self {
        Self {
            lines: reader.lines(),
            anb_state: initial_state,
        }
    }

    /// The most recent module state seen (or the initial one).
    pub fn anb_state(&self) -> AnbState {
        self.anb_state
    }

    /// Next recognized record, or `None` at end of file.
    pub fn next_record(&mut self) -> Result<Option<LogRecord>, Error> {
        while let Some(line) = self.lines.next().transpose()? {
            if let Some(rest) = split_after(&line, "Msg sent:") {
                return Ok(Some(match self.parse_message(rest)? {
                    Some(message) => LogRecord::Tx(message),
                    None => LogRecord::TxError,
                }));
            }
            if let Some(rest) = split_after(&line, "Msg received:") {
                return Ok(Some(match self.parse_message(rest)? {
                    Some(message) => LogRecord::Rx(message),
                    None => LogRecord::RxError,
                }));
            }
            if line.contains("ANB_STATUS:") {
                if let Some(state) = AnbState::from_log_name(&line) {
                    self.anb_state = state;
                    return Ok(Some(LogRecord::StateChange(state)));
                }
                warn!(line = %line, "unrecognized module state name");
                return Ok(Some(LogRecord::StateChange(self.anb_state)));
            }
        }
        Ok(None)
    }

    /// Parse the two header lines and the bracketed data dump. Returns
    /// `Ok(None)` on a malformed message (the caller tags the direction).
    fn parse_message(&mut self, marker_rest: &str) -> Result<Option<LogMessage>, Error> {
        // Newer SDK versions put the first header line on the marker line
        // itself; older ones start it on the next line.
        let line1 = if marker_rest.contains("MsgBuf") {
            marker_rest.to_string()
        } else {
            match self.lines.next().transpose()? {
                Some(line) => line,
                None => return Ok(None),
            }
        };

        let size = hex_field(&line1, "Size");
        let source_id = hex_field(&line1, "SrcId");
        let dest_obj = hex_field(&line1, "DestObj");
        let (Some(size), Some(source_id), Some(dest_obj)) = (size, source_id, dest_obj) else {
            debug!(line = %line1, "bad message header line");
            return Ok(None);
        };
        if size > MAX_MSG_DATA_BYTES as u32 || source_id > u8::MAX as u32 || dest_obj > u8::MAX as u32
        {
            return Ok(None);
        }

        let Some(line2) = self.lines.next().transpose()? else {
            return Ok(None);
        };
        let instance = hex_field(&line2, "Inst");
        let cmd = hex_field(&line2, "Cmd");
        let cmd_ext0 = hex_field(&line2, "CmdExt0");
        let cmd_ext1 = hex_field(&line2, "CmdExt1");
        let (Some(instance), Some(cmd), Some(cmd_ext0), Some(cmd_ext1)) =
            (instance, cmd, cmd_ext0, cmd_ext1)
        else {
            debug!(line = %line2, "bad message header continuation");
            return Ok(None);
        };
        if instance > u16::MAX as u32
            || cmd > u8::MAX as u32
            || cmd_ext0 > u8::MAX as u32
            || cmd_ext1 > u8::MAX as u32
        {
            return Ok(None);
        }

        let Some(data) = self.parse_data_block(size as usize)? else {
            return Ok(None);
        };

        Ok(Some(LogMessage {
            data_size: size as u16,
            source_id: source_id as u8,
            dest_obj: dest_obj as u8,
            instance: instance as u16,
            cmd: cmd as u8,
            cmd_ext0: cmd_ext0 as u8,
            cmd_ext1: cmd_ext1 as u8,
            data,
        }))
    }

    /// Bracketed data dump: `[ 0xNN 0xNN ... ]`, possibly across lines.
    fn parse_data_block(&mut self, expected: usize) -> Result<Option<Vec<u8>>, Error> {
        let mut data = Vec::with_capacity(expected);
        let mut first_line = true;
        let mut brackets_seen = 0usize;

        while let Some(line) = self.lines.next().transpose()? {
            let mut line = line.replace('\t', " ");

            brackets_seen += line.matches('[').count();
            if brackets_seen > 1 {
                return Ok(None);
            }

            let mut start = 0;
            if first_line {
                first_line = false;
                if !line.starts_with('[') {
                    return Ok(None);
                }
                start = 1;
            }

            let end_of_message = match line.find(']') {
                Some(offset) => {
                    line.truncate(offset);
                    true
                }
                None => false,
            };

            let mut byte_parsed = false;
            for token in line[start..].split_whitespace() {
                if token.len() > 4 {
                    return Ok(None);
                }
                let Some(digits) = token.strip_prefix("0x").or_else(|| token.strip_prefix("0X"))
                else {
                    return Ok(None);
                };
                let Ok(byte) = u8::from_str_radix(digits, 16) else {
                    return Ok(None);
                };
                if data.len() >= MAX_MSG_DATA_BYTES as usize {
                    return Ok(None);
                }
                data.push(byte);
                byte_parsed = true;
            }

            if end_of_message {
                return Ok((data.len() == expected).then_some(data));
            }
            if !byte_parsed {
                // Neither data nor a terminator on this line.
                return Ok(None);
            }
        }

        Ok(None)
    }
}

/// Remainder of `line` after `marker`, if present.
fn split_after<'a>(line: &'a str, marker: &str) -> Option<&'a str> {
    line.find(marker).map(|idx| &line[idx + marker.len()..])
}

/// Parse `Key : 0xNN` with tolerant whitespace. The character following the
/// key must be whitespace or `:` so that `Cmd` does not match inside
/// `CmdExt0`.
fn hex_field(line: &str, key: &str) -> Option<u32> {
    for (idx, _) in line.match_indices(key) {
        let rest = &line[idx + key.len()..];
        if !rest.starts_with([' ', '\t', ':']) {
            continue;
        }
        let Some(after_colon) = rest.trim_start().strip_prefix(':') else {
            continue;
        };
        let value = after_colon.trim_start();
        let Some(digits) = value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) else {
            continue;
        };
        let hex: String = digits.chars().take_while(char::is_ascii_hexdigit).collect();
        if hex.is_empty() || hex.len() > 8 {
            continue;
        }
        return u32::from_str_radix(&hex, 16).ok();
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn parser(text: &str) -> LogFileParser<Cursor<&str>> {
        LogFileParser::new(Cursor::new(text), AnbState::Setup)
    }

    #[test]
    fn parses_a_sent_message_with_inline_header() {
        let log = "Msg sent: [ MsgBuf:0x2 Size:0x2 SrcId:0x0 DestObj:0x1\n\
                   \x20 Inst:0x0 Cmd:0x1 CmdExt0:0x0 CmdExt1:0x0 ]\n\
                   [ 0x01 0x02 ]\n";
        let record = parser(log).next_record().unwrap().unwrap();
        let LogRecord::Tx(message) = record else {
            panic!("expected Tx, got {record:?}");
        };
        assert_eq!(message.data_size, 2);
        assert_eq!(message.source_id, 0);
        assert_eq!(message.dest_obj, 1);
        assert_eq!(message.instance, 0);
        assert_eq!(message.cmd, 1);
        assert_eq!(message.cmd_ext0, 0);
        assert_eq!(message.cmd_ext1, 0);
        assert_eq!(message.data, vec![0x01, 0x02]);
    }

    #[test]
    fn parses_padded_header_on_following_line() {
        let log = "Msg received:\n\
                   [ MsgBuf:0x40002570 Size:0x4 SrcId  :0x7a DestObj:0xfe\n\
                   \x20 Inst  :0x1     Cmd :0x41   CmdExt0:0x5 CmdExt1:0x0 ]\n\
                   [ 0xde 0xad\t0xbe 0xef ]\n";
        let record = parser(log).next_record().unwrap().unwrap();
        let LogRecord::Rx(message) = record else {
            panic!("expected Rx, got {record:?}");
        };
        assert_eq!(message.data_size, 4);
        assert_eq!(message.source_id, 0x7A);
        assert_eq!(message.dest_obj, 0xFE);
        assert_eq!(message.instance, 1);
        assert_eq!(message.cmd, 0x41);
        assert_eq!(message.cmd_ext0, 5);
        assert_eq!(message.data, vec![0xDE, 0xAD, 0xBE, 0xEF]);
    }

    #[test]
    fn data_may_span_multiple_lines() {
        let log = "Msg sent: [ MsgBuf:0x1 Size:0x4 SrcId:0x2 DestObj:0x3\n\
                   \x20 Inst:0x1 Cmd:0x42 CmdExt0:0x0 CmdExt1:0x0 ]\n\
                   [ 0x10 0x20\n\
                   0x30 0x40 ]\n";
        let record = parser(log).next_record().unwrap().unwrap();
        let LogRecord::Tx(message) = record else {
            panic!("expected Tx");
        };
        assert_eq!(message.data, vec![0x10, 0x20, 0x30, 0x40]);
    }

    #[test]
    fn size_mismatch_becomes_an_error_record() {
        let log = "Msg sent: [ MsgBuf:0x1 Size:0x3 SrcId:0x0 DestObj:0x1\n\
                   \x20 Inst:0x0 Cmd:0x1 CmdExt0:0x0 CmdExt1:0x0 ]\n\
                   [ 0x01 0x02 ]\n";
        assert_eq!(
            parser(log).next_record().unwrap(),
            Some(LogRecord::TxError)
        );
    }

    #[test]
    fn malformed_message_does_not_stop_parsing() {
        let log = "Msg sent: [ MsgBuf:0x1 Size:0x1 SrcId:0x0 DestObj:0x1\n\
                   garbage where the second header line should be\n\
                   ANB_STATUS: ABP_ANB_STATE_PROCESS_ACTIVE\n";
        let mut p = parser(log);
        assert_eq!(p.next_record().unwrap(), Some(LogRecord::TxError));
        assert_eq!(
            p.next_record().unwrap(),
            Some(LogRecord::StateChange(AnbState::ProcessActive))
        );
        assert_eq!(p.anb_state(), AnbState::ProcessActive);
        assert_eq!(p.next_record().unwrap(), None);
    }

    #[test]
    fn status_lines_update_tracked_state() {
        let log = "ANB_STATUS: ABP_ANB_STATE_NW_INIT\n\
                   ANB_STATUS: ABP_ANB_STATE_EXCEPTION\n";
        let mut p = parser(log);
        assert_eq!(
            p.next_record().unwrap(),
            Some(LogRecord::StateChange(AnbState::NwInit))
        );
        assert_eq!(
            p.next_record().unwrap(),
            Some(LogRecord::StateChange(AnbState::Exception))
        );
        assert_eq!(AnbState::Exception.value(), 0x07);
    }

    #[test]
    fn zero_length_message_with_empty_brackets() {
        let log = "Msg sent: [ MsgBuf:0x1 Size:0x0 SrcId:0x0 DestObj:0x4\n\
                   \x20 Inst:0x0 Cmd:0x3 CmdExt0:0x0 CmdExt1:0x0 ]\n\
                   [ ]\n";
        let record = parser(log).next_record().unwrap().unwrap();
        let LogRecord::Tx(message) = record else {
            panic!("expected Tx");
        };
        assert!(message.data.is_empty());
    }

    #[test]
    fn double_bracket_is_rejected() {
        let log = "Msg sent: [ MsgBuf:0x1 Size:0x2 SrcId:0x0 DestObj:0x1\n\
                   \x20 Inst:0x0 Cmd:0x1 CmdExt0:0x0 CmdExt1:0x0 ]\n\
                   [ 0x01 [ 0x02 ]\n";
        assert_eq!(
            parser(log).next_record().unwrap(),
            Some(LogRecord::TxError)
        );
    }
}
