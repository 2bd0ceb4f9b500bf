//! Error definitions shared across library modules.
//! Each type models a specific failure scenario (CAN identifier construction,
//! transport sessions, send paths, and faults surfaced through observers).
use crate::protocol::transport::transport_protocol::AbortCode;
use thiserror::Error;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
/// Errors that can occur while building a 29-bit CAN identifier.
pub enum CanIdBuildError {
    /// Attempt to build a broadcast message (PDU2) with PF < 240.
    #[error("invalid for broadcast message: PF is too low")]
    InvalidForBroadcast,
    /// Attempt to build an addressed message (PDU1) with PF >= 240.
    #[error("invalid for addressed message: PF is too high: {pf}")]
    InvalidForAddressed { pf: u8 },
    /// In PDU1 the lower 8 bits of the PGN must remain zero.
    #[error("PDU1 PGNs require PS = 0")]
    PsMustBeNull,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
/// Faults reported through the observer callbacks. These have no caller to
/// return to: they originate on the receive path or inside timer handlers.
pub enum ProtocolError {
    /// A remote claim was refused because the address belongs to a
    /// higher-priority NAME.
    #[error("address in use")]
    AddressInUse,
    /// An API was handed a value it cannot act on.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),
    /// A transport session ran out of time (T2/T3 expiry).
    #[error("transfer timed out")]
    Timeout,
    /// The peer ended a transport session with an abort frame.
    #[error("remote abort: {0}")]
    RemoteAbort(AbortCode),
    /// The local engine ended a transport session with an abort frame.
    #[error("session aborted: {0}")]
    Abort(AbortCode),
    /// Non-cancellation error reported by the underlying bus.
    #[error("bus error: {0}")]
    Io(String),
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
/// Errors raised when starting a multi-packet transfer.
pub enum TransportError {
    /// The payload fits a single frame; the transport protocol is not the
    /// right tool, send it directly.
    #[error("payload of {len} bytes fits a single frame")]
    NotSegmented { len: usize },
    /// The payload exceeds the 1785-byte TP limit.
    #[error("payload of {len} bytes exceeds the transport protocol limit")]
    PayloadTooLarge { len: usize },
    /// A session towards this destination is already running.
    #[error("session with destination {destination} is already active")]
    SessionBusy { destination: u8 },
    /// The local node owns no address to stamp as source.
    #[error("no source address claimed")]
    NoSourceAddress,
}

#[derive(Error, Debug)]
/// Errors returned by the connection send paths.
pub enum SendError<E: core::fmt::Debug> {
    /// The bus rejected or failed the write.
    #[error("bus send error: {0:?}")]
    Bus(E),
    /// The connection was configured without a local NAME.
    #[error("connection has no local name")]
    NoLocalName,
    /// The connection was configured without a target NAME.
    #[error("connection has no target name")]
    NoTargetName,
    /// The local NAME holds no claimed address.
    #[error("local name holds no source address")]
    NoSourceAddress,
    /// The destination NAME holds no claimed address.
    #[error("destination name holds no address")]
    NoDestinationAddress,
    /// The frame does not fit the selected send path.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),
    /// Failure while starting a multi-packet transfer.
    #[error(transparent)]
    Transport(#[from] TransportError),
}
