//! End-to-end decode tests: fabricate a capture, run it through a full
//! pipeline, and inspect the emitted event stream.

use std::sync::{Arc, Mutex};

use abcc_spi::decoder::{FrameFlags, FrameKind, SpiEvent};
use abcc_spi::protocol::{MisoField, MosiField, MsgField, PacketType, MSG_HEADER_C_BIT};
use abcc_spi::runtime::{InputPort, OutputPort, PortDirection, PortSchema};
use abcc_spi::sim::{
    encode_continuation, encode_message, Fault, SimulationConfig, SimulationSource, Transaction,
};
use abcc_spi::{DecoderConfig, Pipeline, ProcessNode, SpiDecoder, WiringMode, WorkError, WorkResult};

/// Sink that collects every decoder event.
struct Collector {
    events: Arc<Mutex<Vec<SpiEvent>>>,
}

impl ProcessNode for Collector {
    fn name(&self) -> &str {
        "collector"
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
        let event = input.recv()?;
        self.events.lock().unwrap().push(event);
        Ok(1)
    }
}

/// Run scripted transactions through source → decoder → collector.
fn decode_script(
    script: Vec<Transaction>,
    wiring: WiringMode,
    alert_limit: i32,
) -> Vec<SpiEvent> {
    let sim = SimulationConfig {
        four_wire: wiring.uses_enable_line(),
        ..Default::default()
    };

    let mut pipeline = Pipeline::new();
    pipeline
        .add_process("source", SimulationSource::with_script(sim, script, 0))
        .unwrap();

    let config = DecoderConfig::new(wiring).with_clocking_alert_limit(alert_limit);
    pipeline
        .add_process("decoder", SpiDecoder::new(config, sim.sample_rate_hz).unwrap())
        .unwrap();

    let events = Arc::new(Mutex::new(Vec::new()));
    pipeline
        .add_process(
            "collector",
            Collector {
                events: Arc::clone(&events),
            },
        )
        .unwrap();

    pipeline.connect("source", "clk", "decoder", "clk").unwrap();
    pipeline.connect("source", "mosi", "decoder", "mosi").unwrap();
    pipeline.connect("source", "miso", "decoder", "miso").unwrap();
    if wiring.uses_enable_line() {
        pipeline
            .connect("source", "enable", "decoder", "enable")
            .unwrap();
    }
    pipeline
        .connect("decoder", "events", "collector", "events")
        .unwrap();

    pipeline.build().unwrap().wait();

    let collected = events.lock().unwrap().clone();
    collected
}

fn frames(events: &[SpiEvent]) -> Vec<abcc_spi::FieldFrame> {
    events.iter().filter_map(|e| e.as_frame().copied()).collect()
}

fn packets(events: &[SpiEvent]) -> Vec<abcc_spi::PacketSummary> {
    events.iter().filter_map(|e| e.as_packet().copied()).collect()
}

/// A single-fragment command from host to module, response back.
fn command_response_transaction() -> Transaction {
    Transaction {
        mosi_message: true,
        mosi_last_fragment: true,
        miso_message: true,
        miso_last_fragment: true,
        mosi_msg_region: encode_message(0x01, 0xFE, 1, MSG_HEADER_C_BIT | 0x01, 5, &[0x10, 0x20]),
        miso_msg_region: encode_message(0x01, 0xFE, 1, 0x01, 5, &[0x30, 0x40]),
        write_pd: vec![0x11, 0x22],
        read_pd: vec![0xAA, 0xBB],
        app_status: 0x00,
        anb_status: 0x04,
        int_mask: 0x10,
        network_time: 0x1000,
        ..Default::default()
    }
}

#[test]
fn empty_transaction_classifies_as_empty_packet() {
    let events = decode_script(vec![Transaction::default()], WiringMode::FourWire, -1);
    let packets = packets(&events);
    assert_eq!(packets.len(), 1);
    assert_eq!(packets[0].mosi, PacketType::Empty);
    assert_eq!(packets[0].miso, PacketType::Empty);
    assert_eq!(packets[0].marker, PacketType::Empty);
    assert!(!packets[0].cancelled);

    // No error or warning frames anywhere.
    assert!(frames(&events).iter().all(|f| !f.is_error()));
}

#[test]
fn command_and_response_classify_and_carry_headers() {
    let events = decode_script(vec![command_response_transaction()], WiringMode::FourWire, -1);

    let packets = packets(&events);
    assert_eq!(packets.len(), 1);
    assert_eq!(packets[0].mosi, PacketType::Command);
    assert_eq!(packets[0].miso, PacketType::Response);
    // Response outranks command in the combined marker.
    assert_eq!(packets[0].marker, PacketType::Response);

    let frames = frames(&events);

    // Every fixed field appears exactly once, in wire order.
    for field in [
        MosiField::SpiControl,
        MosiField::Reserved1,
        MosiField::MessageLength,
        MosiField::ProcessDataLength,
        MosiField::ApplicationStatus,
        MosiField::InterruptMask,
        MosiField::Crc32,
        MosiField::Pad,
    ] {
        assert_eq!(
            frames.iter().filter(|f| f.kind == FrameKind::Mosi(field)).count(),
            1,
            "{field:?}"
        );
    }
    for field in [
        MisoField::Reserved1,
        MisoField::Reserved2,
        MisoField::LedStatus,
        MisoField::AnybusStatus,
        MisoField::SpiStatus,
        MisoField::NetworkTime,
        MisoField::Crc32,
    ] {
        assert_eq!(
            frames.iter().filter(|f| f.kind == FrameKind::Miso(field)).count(),
            1,
            "{field:?}"
        );
    }

    // Message data decodes on both directions.
    let mosi_data: Vec<u8> = frames
        .iter()
        .filter(|f| f.kind == FrameKind::MosiMessage(MsgField::Data))
        .map(|f| f.value as u8)
        .collect();
    assert_eq!(mosi_data, vec![0x10, 0x20]);
    let miso_data: Vec<u8> = frames
        .iter()
        .filter(|f| f.kind == FrameKind::MisoMessage(MsgField::Data))
        .map(|f| f.value as u8)
        .collect();
    assert_eq!(miso_data, vec![0x30, 0x40]);

    // Process data counted per byte.
    let pd_counts: Vec<u64> = frames
        .iter()
        .filter(|f| f.kind == FrameKind::Mosi(MosiField::WriteProcessData))
        .map(|f| f.aux)
        .collect();
    assert_eq!(pd_counts, vec![0, 1]);

    // Checksums verified clean on both directions.
    for kind in [
        FrameKind::Mosi(MosiField::Crc32),
        FrameKind::Miso(MisoField::Crc32),
    ] {
        let crc = frames.iter().find(|f| f.kind == kind).unwrap();
        assert_eq!(crc.value, crc.aux, "{kind:?}");
        assert!(!crc.flags.contains(FrameFlags::DISPLAY_ERROR));
    }
}

#[test]
fn fragmented_message_reassembles_in_order() {
    // 12 data bytes split 6 + 4 + 2 across three transactions.
    let payload: Vec<u8> = (1..=12).collect();
    let script = vec![
        Transaction {
            mosi_message: true,
            mosi_last_fragment: false,
            mosi_msg_region: encode_message(0x01, 0x04, 1, MSG_HEADER_C_BIT | 0x10, 0, &payload)
                [..12 + 6]
                .to_vec(),
            ..Default::default()
        },
        Transaction {
            mosi_message: true,
            mosi_last_fragment: false,
            mosi_msg_region: encode_continuation(&payload[6..10]),
            ..Default::default()
        },
        Transaction {
            mosi_message: true,
            mosi_last_fragment: true,
            mosi_msg_region: encode_continuation(&payload[10..]),
            ..Default::default()
        },
    ];

    let events = decode_script(script, WiringMode::FourWire, -1);
    let packets = packets(&events);
    assert_eq!(packets.len(), 3);
    assert_eq!(packets[0].mosi, PacketType::Command);
    assert_eq!(packets[1].mosi, PacketType::MessageFragment);
    assert_eq!(packets[2].mosi, PacketType::MessageFragment);

    // Concatenated data frames equal the original payload, byte counters in
    // sample order.
    let data: Vec<(u64, u8)> = frames(&events)
        .iter()
        .filter(|f| f.kind == FrameKind::MosiMessage(MsgField::Data))
        .map(|f| (f.aux & 0xFFFF_FFFF, f.value as u8))
        .collect();
    assert_eq!(
        data.iter().map(|&(_, byte)| byte).collect::<Vec<_>>(),
        payload
    );
    assert_eq!(
        data.iter().map(|&(count, _)| count).collect::<Vec<_>>(),
        (0..12).collect::<Vec<u64>>()
    );

    // Fragment markers: first fragment flagged, continuations not.
    let frag_frames: Vec<_> = frames(&events)
        .iter()
        .filter(|f| f.kind == FrameKind::MosiMessage(MsgField::Data))
        .map(|f| f.flags)
        .collect();
    assert!(frag_frames.iter().all(|f| f.contains(FrameFlags::FRAGMENTED)));
    assert!(frag_frames[0].contains(FrameFlags::FIRST_FRAGMENT));
    assert!(!frag_frames[6].contains(FrameFlags::FIRST_FRAGMENT));
}

#[test]
fn corrupted_checksum_classifies_and_rolls_back_fragment_progress() {
    let payload: Vec<u8> = (1..=8).collect();
    let first = Transaction {
        mosi_message: true,
        mosi_last_fragment: false,
        mosi_msg_region: encode_message(0x01, 0x04, 1, MSG_HEADER_C_BIT | 0x10, 0, &payload)
            [..12 + 4]
            .to_vec(),
        ..Default::default()
    };
    let continuation = Transaction {
        mosi_message: true,
        mosi_last_fragment: true,
        mosi_msg_region: encode_continuation(&payload[4..]),
        ..Default::default()
    };
    let corrupted = Transaction {
        fault: Some(Fault::CorruptMosiCrc),
        ..continuation.clone()
    };
    let retransmit = Transaction {
        repeat_toggle: true,
        ..continuation
    };

    let events = decode_script(
        vec![first, corrupted, retransmit],
        WiringMode::FourWire,
        -1,
    );

    let packets = packets(&events);
    assert_eq!(packets.len(), 3);
    assert_eq!(packets[1].mosi, PacketType::ChecksumError);
    assert_eq!(packets[1].marker, PacketType::ChecksumError);
    assert_eq!(packets[2].mosi, PacketType::MessageFragment);

    // The corrupted transaction consumed byte counters 4..7 speculatively;
    // the rollback makes the retransmission count 4..7 again rather than
    // continuing at 8.
    let counters: Vec<u64> = frames(&events)
        .iter()
        .filter(|f| f.kind == FrameKind::MosiMessage(MsgField::Data))
        .map(|f| f.aux & 0xFFFF_FFFF)
        .collect();
    assert_eq!(counters, vec![0, 1, 2, 3, 4, 5, 6, 7, 4, 5, 6, 7]);
}

#[test]
fn truncated_transaction_yields_one_fragmentation_frame_per_direction() {
    let script = vec![
        Transaction {
            fault: Some(Fault::TruncateAtByte(6)),
            ..command_response_transaction()
        },
        Transaction::default(),
    ];
    let events = decode_script(script, WiringMode::FourWire, -1);

    let frag: Vec<_> = frames(&events)
        .iter()
        .filter(|f| f.kind == FrameKind::Fragmentation)
        .cloned()
        .collect();
    assert_eq!(frag.len(), 2);
    assert_eq!(
        frag.iter()
            .filter(|f| f.flags.contains(FrameFlags::MOSI))
            .count(),
        1
    );
    assert!(frag.iter().all(|f| f.flags.contains(FrameFlags::ERROR)));
    assert!(frag.iter().all(|f| f.start < f.end));

    // The follow-up transaction still decodes to a packet.
    let packets = packets(&events);
    assert_eq!(packets.len(), 1);
    assert_eq!(packets[0].mosi, PacketType::Empty);
}

#[test]
fn excess_clocking_reports_within_the_alert_budget() {
    let noisy = |fault| Transaction {
        fault: Some(fault),
        ..Transaction::default()
    };
    let script = vec![
        noisy(Fault::ExtraClockPulses(3)),
        noisy(Fault::ExtraClockPulses(3)),
        noisy(Fault::ExtraClockPulses(3)),
    ];
    let events = decode_script(script, WiringMode::FourWire, 2);

    let clocking = frames(&events)
        .iter()
        .filter(|f| f.kind == FrameKind::ExcessClocking)
        .count();
    // Three faults, budget of two.
    assert_eq!(clocking, 2);
    assert_eq!(packets(&events).len(), 3);
}

#[test]
fn three_wire_capture_decodes_without_enable_line() {
    let events = decode_script(
        vec![command_response_transaction(), Transaction::default()],
        WiringMode::ThreeWire,
        -1,
    );

    let packets = packets(&events);
    assert_eq!(packets.len(), 2);
    assert_eq!(packets[0].mosi, PacketType::Command);
    assert_eq!(packets[0].miso, PacketType::Response);
    assert_eq!(packets[1].marker, PacketType::Empty);
    assert!(frames(&events)
        .iter()
        .all(|f| f.kind != FrameKind::Fragmentation));
}

#[test]
fn counters_mirror_from_host_to_module_direction() {
    // Unequal regions force the shared length to cover the larger one: the
    // module frame's region is padded to the host's length, and both message
    // regions decode the same number of bytes.
    let transaction = Transaction {
        mosi_message: true,
        mosi_last_fragment: true,
        mosi_msg_region: encode_message(0x01, 0xFE, 1, MSG_HEADER_C_BIT | 0x01, 0, &[9, 9, 9, 9]),
        ..Default::default()
    };
    let events = decode_script(vec![transaction], WiringMode::FourWire, -1);

    let frames = frames(&events);
    let mosi_region_bytes = frames
        .iter()
        .filter(|f| matches!(f.kind, FrameKind::MosiMessage(_)))
        .map(|f| {
            let width = match f.kind {
                FrameKind::MosiMessage(sub) => sub.width() as u64,
                _ => 0,
            };
            width
        })
        .sum::<u64>();
    let miso_region_bytes = frames
        .iter()
        .filter(|f| matches!(f.kind, FrameKind::MisoMessage(_)))
        .count() as u64;
    // Host region: 12-byte header + 4 data. Module mirror: 16 not-valid bytes.
    assert_eq!(mosi_region_bytes, 16);
    assert_eq!(miso_region_bytes, 16);
    assert!(frames
        .iter()
        .filter(|f| matches!(f.kind, FrameKind::MisoMessage(sub) if sub != MsgField::DataNotValid))
        .count()
        .eq(&0));
}
