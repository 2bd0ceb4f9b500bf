//! Connection facade: binds one CAN bus to the network directory and
//! dispatches traffic between the address claimer, the transport protocol
//! engine, and the application.
//!
//! The run loop races bus reception against the nearest timer deadline, so
//! claim windows, cannot-claim jitter and transport expiry all resolve on
//! the connection's strand. Dropping the [`Connection::run`] future stops
//! the connection; cancelled waits are not errors and are never reported.
use crate::error::{ProtocolError, SendError};
use crate::protocol::managment::address_claimer::AddressClaimer;
use crate::protocol::managment::name::Name;
use crate::protocol::managment::network::Network;
use crate::protocol::transport::can_frame::CanFrame;
use crate::protocol::transport::can_id::CanId;
use crate::protocol::transport::filters::FilterPolicy;
use crate::protocol::transport::traits::can_bus::CanBus;
use crate::protocol::transport::traits::clock::Clock;
use crate::protocol::transport::traits::timer::Timer;
use crate::protocol::transport::transport_protocol::{TpEvent, TransportProtocol};
use crate::protocol::transport::TP_TICK_MS;
use crate::protocol::{ADDRESS_GLOBAL, ADDRESS_IDLE, PGN_TP_CM, PGN_TP_DT};
use futures_util::future::{select, Either};
use futures_util::pin_mut;
use std::sync::Arc;

/// Observer for connection lifecycle and traffic. Implement the methods you
/// care about; the defaults do nothing.
pub trait ConnectionObserver {
    /// The run loop started.
    fn started(&mut self) {}
    /// The connection was dropped.
    fn closed(&mut self) {}
    /// A frame arrived from the bus (before any filtering).
    fn read(&mut self, _frame: &CanFrame) {}
    /// A frame was written to the bus.
    fn sent(&mut self, _frame: &CanFrame) {}
    /// A single-frame message or a reassembled transport payload arrived.
    fn data(&mut self, _header: &CanId, _payload: &[u8]) {}
    /// A receive-path or timer-path fault occurred.
    fn error(&mut self, _what: &str, _error: &ProtocolError) {}
}

/// Observer that ignores every notification.
pub struct NopConnectionObserver;

impl ConnectionObserver for NopConnectionObserver {}

/// Per-connection configuration.
#[derive(Default)]
pub struct ConnectionConfig {
    /// NAME this connection sends from; resolves the stamped source address.
    pub local_name: Option<Name>,
    /// NAME this connection talks to; resolves the stamped destination.
    pub target_name: Option<Name>,
    /// Kernel filter set installed on the bus at construction.
    pub filters: Option<FilterPolicy>,
}

/// A message above the single-frame size: a header plus an arbitrarily
/// long payload, segmented by the transport protocol when needed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
    /// Header carrying PGN, priority, and addressing.
    pub header: CanId,
    /// Payload bytes, up to the 1785-byte transport limit.
    pub payload: Vec<u8>,
}

/// One CAN bus bound to a directory, with claim and transport dispatch.
pub struct Connection<B: CanBus, T: Timer, K: Clock> {
    bus: B,
    timer: T,
    clock: K,
    network: Arc<Network>,
    local_name: Option<Name>,
    target_name: Option<Name>,
    claimer: Option<AddressClaimer<K>>,
    transport: TransportProtocol<K>,
    observer: Box<dyn ConnectionObserver + Send>,
    last_tick: Option<K::Instant>,
}

impl<B, T, K> Connection<B, T, K>
where
    B: CanBus,
    T: Timer,
    K: Clock + Clone,
{
    /// Bind a bus to the directory and install the configured filters.
    pub fn new(
        mut bus: B,
        timer: T,
        clock: K,
        network: Arc<Network>,
        config: ConnectionConfig,
    ) -> Result<Self, B::Error> {
        if let Some(filters) = &config.filters {
            bus.set_filters(filters)?;
        }
        Ok(Self {
            bus,
            timer,
            clock: clock.clone(),
            network,
            local_name: config.local_name,
            target_name: config.target_name,
            claimer: None,
            transport: TransportProtocol::new(clock),
            observer: Box::new(NopConnectionObserver),
            last_tick: None,
        })
    }

    /// Replace the observer.
    pub fn set_observer(&mut self, observer: Box<dyn ConnectionObserver + Send>) {
        self.observer = observer;
    }

    /// Attach the claimer arbitrating for this connection's local NAME.
    pub fn attach_claimer(&mut self, claimer: AddressClaimer<K>) {
        self.claimer = Some(claimer);
    }

    /// Access the attached claimer.
    pub fn claimer_mut(&mut self) -> Option<&mut AddressClaimer<K>> {
        self.claimer.as_mut()
    }

    /// Directory this connection resolves addresses through.
    pub fn network(&self) -> &Arc<Network> {
        &self.network
    }

    /// Local NAME, if configured.
    pub fn local_name(&self) -> Option<Name> {
        self.local_name
    }

    /// Set the local NAME used for source address stamping.
    pub fn set_local_name(&mut self, name: Name) {
        self.local_name = Some(name);
    }

    /// Target NAME, if configured.
    pub fn target_name(&self) -> Option<Name> {
        self.target_name
    }

    /// Set the target NAME used for destination stamping and filtering.
    pub fn set_target_name(&mut self, name: Name) {
        self.target_name = Some(name);
    }

    //==================================================================================RUN_LOOP

    /// Drive the connection: read frames, fire deadlines, flush outboxes.
    /// Returns when the bus fails; drop the future to stop the connection.
    pub async fn run(&mut self) -> Result<(), B::Error> {
        self.observer.started();
        loop {
            self.flush().await;
            self.drain_transport_events();

            let wake_ms = self
                .claimer
                .as_ref()
                .and_then(|claimer| claimer.next_deadline_ms())
                .unwrap_or(TP_TICK_MS)
                .clamp(1, TP_TICK_MS) as u32;

            let received = {
                let recv = self.bus.recv();
                pin_mut!(recv);
                let delay = self.timer.delay_ms(wake_ms);
                pin_mut!(delay);
                match select(recv, delay).await {
                    Either::Left((result, _)) => Some(result),
                    Either::Right(((), _)) => None,
                }
            };

            match received {
                Some(Ok(frame)) => self.dispatch(&frame),
                Some(Err(error)) => {
                    self.observer
                        .error("read", &ProtocolError::Io(format!("{error:?}")));
                    return Err(error);
                }
                None => {}
            }

            if let Some(claimer) = self.claimer.as_mut() {
                claimer.poll();
            }
            let tick_due = self
                .last_tick
                .map_or(true, |last| self.clock.elapsed_ms(last) >= TP_TICK_MS);
            if tick_due {
                self.last_tick = Some(self.clock.now());
                self.sync_transport_address();
                self.transport.tick();
            }
        }
    }

    /// Route one received frame.
    fn dispatch(&mut self, frame: &CanFrame) {
        self.observer.read(frame);

        // Arbitration must see every claim on the bus, so the claim and
        // request PGNs bypass the address check and stop here.
        if frame.id.is_claim() || frame.id.is_request() {
            if let Some(claimer) = self.claimer.as_mut() {
                claimer.process(frame);
            }
            return;
        }

        if !self.check_address(&frame.id) {
            return;
        }

        let pgn = frame.id.pgn();
        if pgn == PGN_TP_CM || pgn == PGN_TP_DT {
            self.sync_transport_address();
            self.transport.handle_frame(frame);
            self.drain_transport_events();
        } else {
            self.observer.data(&frame.id, &frame.data[..frame.len]);
        }
    }

    /// Raw CAN filters cannot track dynamic addressing, so the last check
    /// happens here: broadcasts pass when they come from the target (if one
    /// is configured), addressed frames must match the configured local and
    /// target NAMEs. A PDU1 frame destined to the global address reaches
    /// every node (a BAM announce and its packets travel this way).
    fn check_address(&self, id: &CanId) -> bool {
        let resolve = |name: Name| self.network.get_address(name);
        let broadcast = id.is_broadcast() || id.destination() == Some(ADDRESS_GLOBAL);
        match (self.local_name, self.target_name) {
            (None, None) => true,
            _ if broadcast => match self.target_name {
                Some(target) => resolve(target) == Some(id.source_address()),
                None => true,
            },
            (Some(local), Some(target)) => {
                resolve(target) == Some(id.source_address())
                    && resolve(local) == Some(id.pdu_specific())
            }
            (Some(local), None) => resolve(local) == Some(id.pdu_specific()),
            (None, Some(target)) => resolve(target) == Some(id.source_address()),
        }
    }

    fn drain_transport_events(&mut self) {
        while let Some(event) = self.transport.next_event() {
            match event {
                TpEvent::Data { header, payload } => self.observer.data(&header, &payload),
                TpEvent::Error { what, error } => self.observer.error(what, &error),
            }
        }
    }

    /// Write queued claimer and transport frames to the bus. A failed write
    /// is a lost frame: it is reported and the loop carries on, the
    /// arbitration retry machinery re-emits what matters.
    async fn flush(&mut self) {
        loop {
            let frame = match self.claimer.as_mut().and_then(|c| c.next_frame()) {
                Some(frame) => frame,
                None => match self.transport.next_frame() {
                    Some(frame) => frame,
                    None => return,
                },
            };
            match self.bus.send(&frame).await {
                Ok(()) => self.observer.sent(&frame),
                Err(error) => {
                    self.observer
                        .error("write", &ProtocolError::Io(format!("{error:?}")));
                }
            }
        }
    }

    fn sync_transport_address(&mut self) {
        let source = self
            .local_name
            .and_then(|name| self.network.get_address(name))
            .unwrap_or(ADDRESS_IDLE);
        self.transport.set_source_address(source);
    }

    //==================================================================================WRITE

    /// Send a frame to the bus without any checks or stamping.
    pub async fn send_raw(&mut self, frame: &CanFrame) -> Result<(), SendError<B::Error>> {
        self.bus.send(frame).await.map_err(SendError::Bus)?;
        self.observer.sent(frame);
        Ok(())
    }

    /// Send a frame, stamping addressing from the configured NAMEs:
    /// broadcasts get the local source address, addressed frames are routed
    /// to the target NAME.
    pub async fn send(&mut self, frame: &CanFrame) -> Result<(), SendError<B::Error>> {
        if frame.id.is_broadcast() {
            let source = self.resolve_local()?;
            let mut stamped = frame.clone();
            stamped.id = stamped.id.with_source_address(source);
            self.send_raw(&stamped).await
        } else {
            let target = self.target_name.ok_or(SendError::NoTargetName)?;
            self.send_to(target, frame).await
        }
    }

    /// Send an addressed frame to a specific controller; source and
    /// destination are resolved through the directory.
    pub async fn send_to(
        &mut self,
        destination: Name,
        frame: &CanFrame,
    ) -> Result<(), SendError<B::Error>> {
        if frame.id.is_broadcast() {
            return Err(SendError::InvalidArgument(
                "broadcast frame cannot be addressed",
            ));
        }
        let source = self.resolve_local()?;
        let destination = self
            .network
            .get_address(destination)
            .filter(|address| *address < ADDRESS_IDLE)
            .ok_or(SendError::NoDestinationAddress)?;

        let mut stamped = frame.clone();
        stamped.id = stamped
            .id
            .with_source_address(source)
            .with_pdu_specific(destination);
        self.send_raw(&stamped).await
    }

    /// Send a message of any size: payloads up to eight bytes go out as one
    /// frame, larger ones start a transport protocol transfer.
    pub async fn send_message(&mut self, message: &Message) -> Result<(), SendError<B::Error>> {
        if message.payload.len() <= 8 {
            let frame = CanFrame::new(message.header, &message.payload);
            return self.send(&frame).await;
        }

        let source = self.resolve_local()?;
        self.transport.set_source_address(source);
        let destination = message.header.destination().unwrap_or(ADDRESS_GLOBAL);
        self.transport
            .send(&message.payload, destination, message.header.pgn())
            .map_err(SendError::Transport)?;
        self.flush().await;
        Ok(())
    }

    fn resolve_local(&self) -> Result<u8, SendError<B::Error>> {
        let local = self.local_name.ok_or(SendError::NoLocalName)?;
        self.network
            .get_address(local)
            .filter(|address| *address < ADDRESS_IDLE)
            .ok_or(SendError::NoSourceAddress)
    }
}

impl<B: CanBus, T: Timer, K: Clock> Drop for Connection<B, T, K> {
    fn drop(&mut self) {
        self.observer.closed();
    }
}
