//! J1939-21 transport protocol: segmentation and reassembly of payloads
//! larger than eight bytes over TP.CM (connection management) and TP.DT
//! (data transfer) frames.
//!
//! Both flows are supported: BAM announces a broadcast and streams its
//! packets with no flow control, RTS/CTS negotiates a peer-to-peer transfer
//! with windowed clear-to-send grants, an end-of-message acknowledgement,
//! and abort frames.
//!
//! The engine is synchronous. Outbound frames queue in an outbox and
//! completed payloads or faults queue as [`TpEvent`]s; the owner drains both
//! after every call and drives expiry through [`TransportProtocol::tick`].
use crate::error::{ProtocolError, TransportError};
use crate::protocol::transport::can_frame::CanFrame;
use crate::protocol::transport::can_id::CanId;
use crate::protocol::transport::traits::clock::Clock;
use crate::protocol::transport::{MAX_TP_PAYLOAD, TP_PACKET_DATA, TP_T2_MS, TP_T3_MS};
use crate::protocol::{ADDRESS_GLOBAL, ADDRESS_IDLE, PGN_TP_CM, PGN_TP_DT};
use core::fmt;
use std::collections::{HashMap, VecDeque};

//==================================================================================CONTROL_BYTES

/// Control codes carried in the first byte of a TP.CM payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum Control {
    /// Request to send, opens a peer-to-peer session.
    Rts = 0x10,
    /// Clear to send, grants a window of data packets.
    Cts = 0x11,
    /// End of message acknowledgement.
    EomAck = 0x13,
    /// Broadcast announce message, opens a broadcast session.
    Bam = 0x20,
    /// Connection abort.
    Abort = 0xFF,
}

impl Control {
    fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x10 => Some(Control::Rts),
            0x11 => Some(Control::Cts),
            0x13 => Some(Control::EomAck),
            0x20 => Some(Control::Bam),
            0xFF => Some(Control::Abort),
            _ => None,
        }
    }
}

/// Reasons a session ends prematurely, carried in abort frames.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum AbortCode {
    AlreadyInSession = 1,
    ResourcesBusy = 2,
    Timeout = 3,
    CtsWhileDt = 4,
    MaxRetransmit = 5,
    UnexpectedPacket = 6,
    BadSequence = 7,
    DuplicateSeq = 8,
    LengthExceeded = 9,
    Unspecified = 250,
}

impl AbortCode {
    /// Decode the abort reason byte; unknown values map to `Unspecified`.
    pub fn from_byte(byte: u8) -> Self {
        match byte {
            1 => AbortCode::AlreadyInSession,
            2 => AbortCode::ResourcesBusy,
            3 => AbortCode::Timeout,
            4 => AbortCode::CtsWhileDt,
            5 => AbortCode::MaxRetransmit,
            6 => AbortCode::UnexpectedPacket,
            7 => AbortCode::BadSequence,
            8 => AbortCode::DuplicateSeq,
            9 => AbortCode::LengthExceeded,
            _ => AbortCode::Unspecified,
        }
    }
}

impl fmt::Display for AbortCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            AbortCode::AlreadyInSession => "already in session",
            AbortCode::ResourcesBusy => "resources busy",
            AbortCode::Timeout => "timeout",
            AbortCode::CtsWhileDt => "cts during dt",
            AbortCode::MaxRetransmit => "retransmit limit",
            AbortCode::UnexpectedPacket => "unexpected packet",
            AbortCode::BadSequence => "bad sequence",
            AbortCode::DuplicateSeq => "duplicate seq",
            AbortCode::LengthExceeded => "length exceeded",
            AbortCode::Unspecified => "unspecified",
        };
        f.write_str(text)
    }
}

//==================================================================================SESSIONS

/// Transfer direction, part of the session key so a simultaneous send and
/// receive with the same peer never collide.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Direction {
    Tx,
    Rx,
}

/// Session key: (source address, destination address, direction).
type SessionKey = (u8, u8, Direction);

struct TpSession<I> {
    /// Payload buffer, sized once at session creation.
    buffer: Vec<u8>,
    total_packets: u8,
    /// Next expected (Rx) or next to transmit (Tx) sequence number, 1-based.
    /// Ranges over `1..=total_packets + 1`, so it must be wider than the
    /// wire's sequence byte: a 255-packet transfer ends with `next_seq` at
    /// 256.
    next_seq: u16,
    /// Negotiated maximum packets per CTS grant.
    window_size: u8,
    source: u8,
    destination: u8,
    /// PGN of the payload being transported.
    pgn: u32,
    bam: bool,
    last_activity: I,
}

impl<I> TpSession<I> {
    /// Packets not yet transmitted or granted. Always fits a `u8` since at
    /// most `total_packets` remain.
    fn remaining_packets(&self) -> u8 {
        (u16::from(self.total_packets) - (self.next_seq - 1)) as u8
    }

    /// Every sequence number up to `total_packets` has been handled.
    fn finished(&self) -> bool {
        self.next_seq > u16::from(self.total_packets)
    }
}

/// Notifications drained by the engine's owner.
#[derive(Debug, PartialEq, Eq)]
pub enum TpEvent {
    /// A reassembled payload arrived.
    Data {
        /// Header carrying the transported PGN and the peer's address.
        header: CanId,
        /// Reassembled bytes.
        payload: Vec<u8>,
    },
    /// A session failed.
    Error {
        /// Context of the failure.
        what: &'static str,
        /// The fault itself.
        error: ProtocolError,
    },
}

//==================================================================================ENGINE

/// Session table and frame codec for the transport protocol.
pub struct TransportProtocol<K: Clock> {
    clock: K,
    source_address: u8,
    sessions: HashMap<SessionKey, TpSession<K::Instant>>,
    outbox: VecDeque<CanFrame>,
    events: VecDeque<TpEvent>,
}

impl<K: Clock> TransportProtocol<K> {
    /// Create an engine with no address and no sessions.
    pub fn new(clock: K) -> Self {
        Self {
            clock,
            source_address: ADDRESS_IDLE,
            sessions: HashMap::new(),
            outbox: VecDeque::new(),
            events: VecDeque::new(),
        }
    }

    /// Update the local source address stamped into outgoing frames and
    /// matched against incoming RTS destinations.
    pub fn set_source_address(&mut self, source_address: u8) {
        self.source_address = source_address;
    }

    /// Local source address currently in use.
    pub fn source_address(&self) -> u8 {
        self.source_address
    }

    /// Number of live sessions.
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Pop the next outbound frame, oldest first.
    pub fn next_frame(&mut self) -> Option<CanFrame> {
        self.outbox.pop_front()
    }

    /// Pop the next notification, oldest first.
    pub fn next_event(&mut self) -> Option<TpEvent> {
        self.events.pop_front()
    }

    //==================================================================================TX_PATH

    /// Start a multi-packet transfer. Broadcast destinations use BAM and
    /// stream every packet immediately; unicast destinations open an
    /// RTS/CTS session that proceeds as the peer grants windows.
    pub fn send(&mut self, payload: &[u8], destination: u8, pgn: u32) -> Result<(), TransportError> {
        if payload.len() <= 8 {
            return Err(TransportError::NotSegmented { len: payload.len() });
        }
        if payload.len() > MAX_TP_PAYLOAD {
            return Err(TransportError::PayloadTooLarge { len: payload.len() });
        }
        if self.source_address >= ADDRESS_IDLE {
            return Err(TransportError::NoSourceAddress);
        }

        let source = self.source_address;
        let total_packets = payload.len().div_ceil(TP_PACKET_DATA) as u8;
        let mut session = TpSession {
            buffer: payload.to_vec(),
            total_packets,
            next_seq: 1,
            window_size: 0xFF,
            source,
            destination,
            pgn,
            bam: destination == ADDRESS_GLOBAL,
            last_activity: self.clock.now(),
        };

        if session.bam {
            log::debug!("tp: BAM of {} bytes from {source:#04X}", payload.len());
            self.push_cm(&session, Control::Bam, ADDRESS_GLOBAL, source);
            // No flow control: every packet goes out back to back.
            while !session.finished() {
                self.push_dt(&mut session);
            }
            return Ok(());
        }

        let key = (source, destination, Direction::Tx);
        if self.sessions.contains_key(&key) {
            return Err(TransportError::SessionBusy { destination });
        }

        log::debug!(
            "tp: RTS of {} bytes {source:#04X} -> {destination:#04X}",
            payload.len()
        );
        self.push_cm(&session, Control::Rts, destination, source);
        self.sessions.insert(key, session);
        Ok(())
    }

    //==================================================================================RX_PATH

    /// Feed one incoming frame. Only TP.CM and TP.DT PGNs are inspected.
    pub fn handle_frame(&mut self, frame: &CanFrame) {
        match frame.id.pgn() {
            PGN_TP_CM => self.handle_cm(frame),
            PGN_TP_DT => self.handle_dt(frame),
            _ => {}
        }
    }

    fn handle_cm(&mut self, frame: &CanFrame) {
        match Control::from_byte(frame.data[0]) {
            Some(Control::Rts) => self.handle_rts(frame),
            Some(Control::Cts) => self.handle_cts(frame),
            Some(Control::EomAck) => self.handle_eom_ack(frame),
            Some(Control::Bam) => self.handle_bam(frame),
            Some(Control::Abort) => self.handle_abort(frame),
            None => {}
        }
    }

    fn handle_rts(&mut self, frame: &CanFrame) {
        if frame.id.pdu_specific() != self.source_address {
            return;
        }
        let remote = frame.id.source_address();
        let length = usize::from(frame.data[1]) | (usize::from(frame.data[2]) << 8);
        let total_packets = frame.data[3];
        let window_size = frame.data[4].max(1);
        let pgn = payload_pgn(frame);

        if length == 0 || total_packets == 0 || length > MAX_TP_PAYLOAD {
            self.abort_frame(remote, self.source_address, pgn, AbortCode::LengthExceeded);
            return;
        }

        let key = (remote, self.source_address, Direction::Rx);
        if self.sessions.contains_key(&key) {
            self.abort_frame(remote, self.source_address, pgn, AbortCode::AlreadyInSession);
            return;
        }

        let session = TpSession {
            buffer: vec![0u8; length],
            total_packets,
            next_seq: 1,
            window_size,
            source: remote,
            destination: self.source_address,
            pgn,
            bam: false,
            last_activity: self.clock.now(),
        };
        self.push_cts(&session);
        self.sessions.insert(key, session);
    }

    fn handle_bam(&mut self, frame: &CanFrame) {
        let remote = frame.id.source_address();
        let length = usize::from(frame.data[1]) | (usize::from(frame.data[2]) << 8);
        let total_packets = frame.data[3];
        if length == 0 || total_packets == 0 || length > MAX_TP_PAYLOAD {
            return;
        }

        let session = TpSession {
            buffer: vec![0u8; length],
            total_packets,
            next_seq: 1,
            window_size: 0xFF,
            source: remote,
            destination: ADDRESS_GLOBAL,
            pgn: payload_pgn(frame),
            bam: true,
            last_activity: self.clock.now(),
        };
        self.sessions
            .insert((remote, ADDRESS_GLOBAL, Direction::Rx), session);
    }

    fn handle_cts(&mut self, frame: &CanFrame) {
        let remote = frame.id.source_address();
        let key = (self.source_address, remote, Direction::Tx);
        let Some(mut session) = self.sessions.remove(&key) else {
            return;
        };

        let granted = frame.data[1];
        let next_seq = frame.data[2];
        session.last_activity = self.clock.now();

        if granted == 0 {
            // Receiver holds the connection open; wait for the next grant.
            self.sessions.insert(key, session);
            return;
        }
        if next_seq == 0 || next_seq > session.total_packets {
            self.abort_frame(remote, self.source_address, session.pgn, AbortCode::BadSequence);
            self.events.push_back(TpEvent::Error {
                what: "tp cts",
                error: ProtocolError::Abort(AbortCode::BadSequence),
            });
            return;
        }

        session.next_seq = u16::from(next_seq);
        let mut granted = granted.min(session.remaining_packets());
        while granted > 0 {
            self.push_dt(&mut session);
            granted -= 1;
        }
        // All packets out: the session stays until the EOM acknowledgement.
        self.sessions.insert(key, session);
    }

    fn handle_eom_ack(&mut self, frame: &CanFrame) {
        let remote = frame.id.source_address();
        let key = (self.source_address, remote, Direction::Tx);
        if let Some(session) = self.sessions.remove(&key) {
            log::debug!(
                "tp: transfer of {} bytes to {remote:#04X} acknowledged",
                session.buffer.len()
            );
        }
    }

    fn handle_dt(&mut self, frame: &CanFrame) {
        let remote = frame.id.source_address();
        let destination = frame.id.pdu_specific();
        let key = (remote, destination, Direction::Rx);
        let Some(mut session) = self.sessions.remove(&key) else {
            return;
        };

        let seq = frame.data[0];
        let expected = session.next_seq;

        if u16::from(seq) != expected {
            let code = if u16::from(seq) < expected {
                AbortCode::DuplicateSeq
            } else {
                AbortCode::BadSequence
            };
            if !session.bam {
                self.abort_frame(session.source, session.destination, session.pgn, code);
            }
            self.events.push_back(TpEvent::Error {
                what: "tp sequence",
                error: ProtocolError::Abort(code),
            });
            return;
        }

        let offset = usize::from(seq - 1) * TP_PACKET_DATA;
        let chunk = TP_PACKET_DATA.min(session.buffer.len() - offset);
        session.buffer[offset..offset + chunk].copy_from_slice(&frame.data[1..1 + chunk]);
        session.next_seq += 1;
        session.last_activity = self.clock.now();

        if seq == session.total_packets {
            if !session.bam {
                self.push_eom_ack(&session);
            }
            let header = delivery_header(&session);
            log::debug!(
                "tp: delivered {} bytes from {remote:#04X} (pgn {:#07X})",
                session.buffer.len(),
                session.pgn
            );
            self.events.push_back(TpEvent::Data {
                header,
                payload: session.buffer,
            });
            return;
        }

        if !session.bam && seq % session.window_size == 0 {
            self.push_cts(&session);
        }
        self.sessions.insert(key, session);
    }

    fn handle_abort(&mut self, frame: &CanFrame) {
        let remote = frame.id.source_address();
        let code = AbortCode::from_byte(frame.data[1]);
        let keys = [
            (self.source_address, remote, Direction::Tx),
            (remote, self.source_address, Direction::Rx),
        ];
        for key in keys {
            if self.sessions.remove(&key).is_some() {
                log::warn!("tp: peer {remote:#04X} aborted ({code})");
                self.events.push_back(TpEvent::Error {
                    what: "tp abort",
                    error: ProtocolError::RemoteAbort(code),
                });
            }
        }
    }

    //==================================================================================EXPIRY

    /// Scan sessions and abort those whose inactivity exceeded their bound:
    /// T3 for transmitters, T2 for receivers. Call roughly every 100 ms.
    pub fn tick(&mut self) {
        let mut expired = Vec::new();
        for (key, session) in &self.sessions {
            let bound = match key.2 {
                Direction::Tx => TP_T3_MS,
                Direction::Rx => TP_T2_MS,
            };
            if self.clock.elapsed_ms(session.last_activity) > bound {
                expired.push(*key);
            }
        }

        for key in expired {
            let Some(session) = self.sessions.remove(&key) else {
                continue;
            };
            log::warn!(
                "tp: session {:#04X}->{:#04X} timed out",
                session.source,
                session.destination
            );
            if !session.bam {
                // Peer-to-peer sessions tell the other side; a broadcast
                // receive has no return path.
                let (to, from) = match key.2 {
                    Direction::Tx => (session.destination, session.source),
                    Direction::Rx => (session.source, session.destination),
                };
                self.abort_frame(to, from, session.pgn, AbortCode::Timeout);
            }
            self.events.push_back(TpEvent::Error {
                what: "tp timeout",
                error: ProtocolError::Timeout,
            });
        }
    }

    //==================================================================================FRAME_CODEC

    fn push_cm(&mut self, session: &TpSession<K::Instant>, control: Control, to: u8, from: u8) {
        let length = session.buffer.len();
        let mut data = [0u8; 8];
        data[0] = control as u8;
        data[1] = (length & 0xFF) as u8;
        data[2] = (length >> 8) as u8;
        data[3] = session.total_packets;
        data[4] = session.window_size;
        data[5] = (session.pgn & 0xFF) as u8;
        data[6] = ((session.pgn >> 8) & 0xFF) as u8;
        data[7] = ((session.pgn >> 16) & 0xFF) as u8;
        self.outbox.push_back(CanFrame {
            id: CanId::from_parts(7, false, 0xEC, to, from),
            data,
            len: 8,
        });
    }

    fn push_cts(&mut self, session: &TpSession<K::Instant>) {
        let granted = session.window_size.min(session.remaining_packets());
        let mut data = [0xFFu8; 8];
        data[0] = Control::Cts as u8;
        data[1] = granted;
        // A CTS is only emitted while packets remain, so this fits the byte.
        data[2] = session.next_seq as u8;
        data[5] = (session.pgn & 0xFF) as u8;
        data[6] = ((session.pgn >> 8) & 0xFF) as u8;
        data[7] = ((session.pgn >> 16) & 0xFF) as u8;
        self.outbox.push_back(CanFrame {
            id: CanId::from_parts(7, false, 0xEC, session.source, session.destination),
            data,
            len: 8,
        });
    }

    fn push_eom_ack(&mut self, session: &TpSession<K::Instant>) {
        let length = session.buffer.len();
        let mut data = [0xFFu8; 8];
        data[0] = Control::EomAck as u8;
        data[1] = (length & 0xFF) as u8;
        data[2] = (length >> 8) as u8;
        data[3] = session.total_packets;
        data[5] = (session.pgn & 0xFF) as u8;
        data[6] = ((session.pgn >> 8) & 0xFF) as u8;
        data[7] = ((session.pgn >> 16) & 0xFF) as u8;
        self.outbox.push_back(CanFrame {
            id: CanId::from_parts(7, false, 0xEC, session.source, session.destination),
            data,
            len: 8,
        });
    }

    fn abort_frame(&mut self, to: u8, from: u8, pgn: u32, code: AbortCode) {
        let mut data = [0xFFu8; 8];
        data[0] = Control::Abort as u8;
        data[1] = code as u8;
        data[5] = (pgn & 0xFF) as u8;
        data[6] = ((pgn >> 8) & 0xFF) as u8;
        data[7] = ((pgn >> 16) & 0xFF) as u8;
        self.outbox.push_back(CanFrame {
            id: CanId::from_parts(7, false, 0xEC, to, from),
            data,
            len: 8,
        });
    }

    /// Queue the next data packet of a transmit session. Only called while
    /// the session is unfinished, so `seq` fits the wire byte.
    fn push_dt(&mut self, session: &mut TpSession<K::Instant>) {
        let seq = session.next_seq;
        let offset = usize::from(seq - 1) * TP_PACKET_DATA;
        let chunk = TP_PACKET_DATA.min(session.buffer.len() - offset);

        let mut data = [0xFFu8; 8];
        data[0] = seq as u8;
        data[1..1 + chunk].copy_from_slice(&session.buffer[offset..offset + chunk]);

        self.outbox.push_back(CanFrame {
            id: CanId::from_parts(7, false, 0xEB, session.destination, session.source),
            data,
            len: 8,
        });
        session.next_seq += 1;
        session.last_activity = self.clock.now();
    }
}

/// PGN transported by a control frame, bytes 5 to 7, LSB first.
fn payload_pgn(frame: &CanFrame) -> u32 {
    u32::from(frame.data[5]) | (u32::from(frame.data[6]) << 8) | (u32::from(frame.data[7]) << 16)
}

/// Header handed to the application with a reassembled payload: transported
/// PGN plus the sender's address, tolerant of PGNs whose low byte is no
/// well-formed PDU1 PS.
fn delivery_header<I>(session: &TpSession<I>) -> CanId {
    let data_page = (session.pgn >> 16) & 0x01 != 0;
    let pdu_format = ((session.pgn >> 8) & 0xFF) as u8;
    let pdu_specific = if pdu_format > crate::protocol::PF_PDU1_MAX {
        (session.pgn & 0xFF) as u8
    } else if session.bam {
        ADDRESS_GLOBAL
    } else {
        session.destination
    };
    CanId::from_parts(7, data_page, pdu_format, pdu_specific, session.source)
}

//==================================================================================TESTS
#[cfg(test)]
#[path = "tests.rs"]
mod tests;
