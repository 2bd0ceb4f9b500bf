//! Transport protocol tests: BAM streaming, RTS/CTS flow control, sequence
//! policing, timeouts, and aborts.
use super::*;
use std::cell::Cell;
use std::rc::Rc;

/// Manually advanced clock so expiry can be tested without sleeping.
#[derive(Clone, Default)]
struct TestClock(Rc<Cell<u64>>);

impl TestClock {
    fn advance(&self, millis: u64) {
        self.0.set(self.0.get() + millis);
    }
}

impl Clock for TestClock {
    type Instant = u64;

    fn now(&self) -> u64 {
        self.0.get()
    }

    fn elapsed_ms(&self, earlier: u64) -> u64 {
        self.0.get() - earlier
    }
}

fn engine(source_address: u8) -> (TransportProtocol<TestClock>, TestClock) {
    let clock = TestClock::default();
    let mut engine = TransportProtocol::new(clock.clone());
    engine.set_source_address(source_address);
    (engine, clock)
}

fn drain_frames<K: Clock>(engine: &mut TransportProtocol<K>) -> Vec<CanFrame> {
    let mut frames = Vec::new();
    while let Some(frame) = engine.next_frame() {
        frames.push(frame);
    }
    frames
}

fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| i as u8).collect()
}

//==================================================================================TX

#[test]
fn test_bam_send_emits_announce_then_packets() {
    let (mut engine, _clock) = engine(0x80);
    let data = payload(20);

    engine.send(&data, ADDRESS_GLOBAL, 0x1234).unwrap();
    let frames = drain_frames(&mut engine);
    assert_eq!(frames.len(), 4);

    // TP.CM BAM announce: control, length, total packets, carried PGN.
    let bam = &frames[0];
    assert_eq!(bam.id.pgn(), PGN_TP_CM);
    assert_eq!(bam.id.pdu_specific(), ADDRESS_GLOBAL);
    assert_eq!(bam.id.source_address(), 0x80);
    assert_eq!(bam.data[0], 0x20);
    assert_eq!(bam.data[1], 20);
    assert_eq!(bam.data[2], 0);
    assert_eq!(bam.data[3], 3);
    assert_eq!(&bam.data[5..8], &[0x34, 0x12, 0x00]);

    // Three data packets with consecutive sequence numbers and offsets.
    for (index, frame) in frames[1..].iter().enumerate() {
        assert_eq!(frame.id.pgn(), PGN_TP_DT);
        assert_eq!(frame.data[0], index as u8 + 1);
        let offset = index * 7;
        let chunk = 7.min(20 - offset);
        assert_eq!(&frame.data[1..1 + chunk], &data[offset..offset + chunk]);
    }
    // The final packet is right-padded.
    assert_eq!(frames[3].data[7], 0xFF);

    // BAM keeps no session alive.
    assert_eq!(engine.session_count(), 0);
}

#[test]
fn test_rts_cts_happy_path() {
    let (mut engine, _clock) = engine(0x01);
    let data = payload(20);

    engine.send(&data, 0x90, 0xFEF1).unwrap();
    let frames = drain_frames(&mut engine);
    assert_eq!(frames.len(), 1);
    let rts = &frames[0];
    assert_eq!(rts.data[0], 0x10);
    assert_eq!(rts.id.pdu_specific(), 0x90);
    assert_eq!(engine.session_count(), 1);

    // Peer grants all three packets starting at sequence one.
    let mut cts = [0xFFu8; 8];
    cts[0] = 0x11;
    cts[1] = 3;
    cts[2] = 1;
    engine.handle_frame(&CanFrame {
        id: CanId::from_parts(7, false, 0xEC, 0x01, 0x90),
        data: cts,
        len: 8,
    });

    let packets = drain_frames(&mut engine);
    assert_eq!(packets.len(), 3);
    assert_eq!(
        packets.iter().map(|f| f.data[0]).collect::<Vec<_>>(),
        vec![1, 2, 3]
    );

    // The session waits for the acknowledgement, then goes away.
    assert_eq!(engine.session_count(), 1);
    let mut eom = [0xFFu8; 8];
    eom[0] = 0x13;
    engine.handle_frame(&CanFrame {
        id: CanId::from_parts(7, false, 0xEC, 0x01, 0x90),
        data: eom,
        len: 8,
    });
    assert_eq!(engine.session_count(), 0);
    assert!(engine.next_event().is_none());
}

#[test]
fn test_send_rejects_small_and_oversized_payloads() {
    let (mut engine, _clock) = engine(0x01);
    assert_eq!(
        engine.send(&payload(8), 0x90, 0x1234),
        Err(TransportError::NotSegmented { len: 8 })
    );
    assert_eq!(
        engine.send(&payload(1786), 0x90, 0x1234),
        Err(TransportError::PayloadTooLarge { len: 1786 })
    );
    assert!(engine.send(&payload(1785), ADDRESS_GLOBAL, 0x1234).is_ok());
}

#[test]
fn test_send_requires_source_address() {
    let clock = TestClock::default();
    let mut engine: TransportProtocol<TestClock> = TransportProtocol::new(clock);
    assert_eq!(
        engine.send(&payload(20), 0x90, 0x1234),
        Err(TransportError::NoSourceAddress)
    );
}

#[test]
fn test_second_session_to_same_peer_is_busy() {
    let (mut engine, _clock) = engine(0x01);
    engine.send(&payload(20), 0x90, 0x1234).unwrap();
    assert_eq!(
        engine.send(&payload(20), 0x90, 0x1234),
        Err(TransportError::SessionBusy { destination: 0x90 })
    );
}

#[test]
fn test_tx_timeout_aborts_session() {
    let (mut engine, clock) = engine(0x01);
    engine.send(&payload(20), 0x90, 0x1234).unwrap();
    drain_frames(&mut engine);

    clock.advance(TP_T3_MS + 10);
    engine.tick();

    let frames = drain_frames(&mut engine);
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].data[0], 0xFF);
    assert_eq!(frames[0].data[1], AbortCode::Timeout as u8);
    assert_eq!(frames[0].id.pdu_specific(), 0x90);
    assert_eq!(engine.session_count(), 0);
    assert_eq!(
        engine.next_event(),
        Some(TpEvent::Error {
            what: "tp timeout",
            error: ProtocolError::Timeout,
        })
    );
}

//==================================================================================RX

fn rts_frame(from: u8, to: u8, length: u16, total: u8, window: u8, pgn: u32) -> CanFrame {
    let mut data = [0xFFu8; 8];
    data[0] = 0x10;
    data[1] = (length & 0xFF) as u8;
    data[2] = (length >> 8) as u8;
    data[3] = total;
    data[4] = window;
    data[5] = (pgn & 0xFF) as u8;
    data[6] = ((pgn >> 8) & 0xFF) as u8;
    data[7] = ((pgn >> 16) & 0xFF) as u8;
    CanFrame {
        id: CanId::from_parts(7, false, 0xEC, to, from),
        data,
        len: 8,
    }
}

fn dt_frame(from: u8, to: u8, seq: u8, bytes: &[u8]) -> CanFrame {
    let mut data = [0xFFu8; 8];
    data[0] = seq;
    data[1..1 + bytes.len()].copy_from_slice(bytes);
    CanFrame {
        id: CanId::from_parts(7, false, 0xEB, to, from),
        data,
        len: 8,
    }
}

#[test]
fn test_rx_rts_answers_cts_and_reassembles() {
    let (mut engine, _clock) = engine(0x01);
    let data = payload(10);

    engine.handle_frame(&rts_frame(0x90, 0x01, 10, 2, 0xFF, 0xFEF1));
    let frames = drain_frames(&mut engine);
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].data[0], 0x11);
    assert_eq!(frames[0].data[1], 2, "grant is capped by remaining packets");
    assert_eq!(frames[0].data[2], 1);

    engine.handle_frame(&dt_frame(0x90, 0x01, 1, &data[..7]));
    engine.handle_frame(&dt_frame(0x90, 0x01, 2, &data[7..]));

    // Final packet acknowledged and payload delivered.
    let frames = drain_frames(&mut engine);
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].data[0], 0x13);

    match engine.next_event() {
        Some(TpEvent::Data { header, payload }) => {
            assert_eq!(payload, data);
            assert_eq!(header.pgn(), 0xFEF1);
            assert_eq!(header.source_address(), 0x90);
        }
        other => panic!("expected data event, got {other:?}"),
    }
    assert_eq!(engine.session_count(), 0);
}

#[test]
fn test_rx_windowed_transfer_sends_intermediate_cts() {
    let (mut engine, _clock) = engine(0x01);
    let data = payload(21);

    engine.handle_frame(&rts_frame(0x90, 0x01, 21, 3, 1, 0xFEF1));
    let cts = drain_frames(&mut engine);
    assert_eq!(cts[0].data[1], 1, "window of one grants one packet");

    engine.handle_frame(&dt_frame(0x90, 0x01, 1, &data[..7]));
    let cts = drain_frames(&mut engine);
    assert_eq!(cts.len(), 1);
    assert_eq!(cts[0].data[0], 0x11);
    assert_eq!(cts[0].data[2], 2, "next grant resumes at sequence two");

    engine.handle_frame(&dt_frame(0x90, 0x01, 2, &data[7..14]));
    drain_frames(&mut engine);
    engine.handle_frame(&dt_frame(0x90, 0x01, 3, &data[14..]));

    let frames = drain_frames(&mut engine);
    assert_eq!(frames[0].data[0], 0x13);
    assert!(matches!(engine.next_event(), Some(TpEvent::Data { .. })));
}

#[test]
fn test_rx_ignores_rts_for_other_destination() {
    let (mut engine, _clock) = engine(0x01);
    engine.handle_frame(&rts_frame(0x90, 0x02, 10, 2, 0xFF, 0xFEF1));
    assert_eq!(engine.session_count(), 0);
    assert!(engine.next_frame().is_none());
}

#[test]
fn test_rx_bam_reassembly() {
    let (mut engine, _clock) = engine(0x01);
    let data = payload(20);

    let mut bam = rts_frame(0x90, ADDRESS_GLOBAL, 20, 3, 0xFF, 0x1234);
    bam.data[0] = 0x20;
    engine.handle_frame(&bam);
    engine.handle_frame(&dt_frame(0x90, ADDRESS_GLOBAL, 1, &data[..7]));
    engine.handle_frame(&dt_frame(0x90, ADDRESS_GLOBAL, 2, &data[7..14]));
    engine.handle_frame(&dt_frame(0x90, ADDRESS_GLOBAL, 3, &data[14..]));

    // A broadcast produces no response on the bus.
    assert!(engine.next_frame().is_none());
    match engine.next_event() {
        Some(TpEvent::Data { header, payload }) => {
            assert_eq!(payload, data);
            assert_eq!(header.source_address(), 0x90);
        }
        other => panic!("expected data event, got {other:?}"),
    }
}

#[test]
fn test_rx_gap_aborts_with_bad_sequence() {
    let (mut engine, _clock) = engine(0x01);
    engine.handle_frame(&rts_frame(0x90, 0x01, 20, 3, 0xFF, 0xFEF1));
    drain_frames(&mut engine);

    engine.handle_frame(&dt_frame(0x90, 0x01, 1, &payload(7)));
    engine.handle_frame(&dt_frame(0x90, 0x01, 3, &payload(7)));

    let frames = drain_frames(&mut engine);
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].data[0], 0xFF);
    assert_eq!(frames[0].data[1], AbortCode::BadSequence as u8);
    assert_eq!(engine.session_count(), 0);
    assert_eq!(
        engine.next_event(),
        Some(TpEvent::Error {
            what: "tp sequence",
            error: ProtocolError::Abort(AbortCode::BadSequence),
        })
    );
}

#[test]
fn test_rx_duplicate_aborts() {
    let (mut engine, _clock) = engine(0x01);
    engine.handle_frame(&rts_frame(0x90, 0x01, 20, 3, 0xFF, 0xFEF1));
    drain_frames(&mut engine);

    engine.handle_frame(&dt_frame(0x90, 0x01, 1, &payload(7)));
    engine.handle_frame(&dt_frame(0x90, 0x01, 1, &payload(7)));

    let frames = drain_frames(&mut engine);
    assert_eq!(frames[0].data[1], AbortCode::DuplicateSeq as u8);
    assert_eq!(engine.session_count(), 0);
}

#[test]
fn test_rx_timeout_aborts_session() {
    let (mut engine, clock) = engine(0x01);
    engine.handle_frame(&rts_frame(0x90, 0x01, 8, 2, 1, 0xFEF1));
    let cts = drain_frames(&mut engine);
    assert_eq!(cts.len(), 1);
    assert_eq!(cts[0].data[0], 0x11);

    // No data packet arrives within T2.
    clock.advance(TP_T2_MS + 10);
    engine.tick();

    let frames = drain_frames(&mut engine);
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].data[0], 0xFF);
    assert_eq!(frames[0].data[1], AbortCode::Timeout as u8);
    assert_eq!(frames[0].id.pdu_specific(), 0x90);
    assert_eq!(engine.session_count(), 0);
    assert_eq!(
        engine.next_event(),
        Some(TpEvent::Error {
            what: "tp timeout",
            error: ProtocolError::Timeout,
        })
    );
}

#[test]
fn test_remote_abort_tears_down_tx_session() {
    let (mut engine, _clock) = engine(0x01);
    engine.send(&payload(20), 0x90, 0x1234).unwrap();
    drain_frames(&mut engine);

    let mut abort = [0xFFu8; 8];
    abort[0] = 0xFF;
    abort[1] = AbortCode::ResourcesBusy as u8;
    engine.handle_frame(&CanFrame {
        id: CanId::from_parts(7, false, 0xEC, 0x01, 0x90),
        data: abort,
        len: 8,
    });

    assert_eq!(engine.session_count(), 0);
    assert_eq!(
        engine.next_event(),
        Some(TpEvent::Error {
            what: "tp abort",
            error: ProtocolError::RemoteAbort(AbortCode::ResourcesBusy),
        })
    );
}

#[test]
fn test_simultaneous_tx_and_rx_with_same_peer() {
    let (mut engine, _clock) = engine(0x01);
    // Outgoing transfer to 0x90 and incoming transfer from 0x90 at once.
    engine.send(&payload(20), 0x90, 0x1234).unwrap();
    engine.handle_frame(&rts_frame(0x90, 0x01, 20, 3, 0xFF, 0xFEF1));

    assert_eq!(engine.session_count(), 2);
}

#[test]
fn test_full_transfer_between_two_engines() {
    let (mut sender, _c1) = engine(0x01);
    let (mut receiver, _c2) = engine(0x90);
    let data = payload(1785);

    sender.send(&data, 0x90, 0xFEF1).unwrap();
    // Shuttle frames until both sides go quiet.
    loop {
        let mut moved = false;
        while let Some(frame) = sender.next_frame() {
            receiver.handle_frame(&frame);
            moved = true;
        }
        while let Some(frame) = receiver.next_frame() {
            sender.handle_frame(&frame);
            moved = true;
        }
        if !moved {
            break;
        }
    }

    assert_eq!(sender.session_count(), 0);
    assert_eq!(receiver.session_count(), 0);
    match receiver.next_event() {
        Some(TpEvent::Data { payload, .. }) => assert_eq!(payload, data),
        other => panic!("expected data event, got {other:?}"),
    }
}
