/// Test doubles to simulate the CAN bus, timers and clocks during
/// integration tests.
use korri_j1939::error::ProtocolError;
use korri_j1939::protocol::connection::ConnectionObserver;
use korri_j1939::protocol::managment::address_claimer::ClaimObserver;
use korri_j1939::protocol::managment::name::Name;
use korri_j1939::protocol::transport::can_frame::CanFrame;
use korri_j1939::protocol::transport::can_id::CanId;
use korri_j1939::protocol::transport::filters::FilterPolicy;
use korri_j1939::protocol::transport::traits::{can_bus::CanBus, clock::Clock, timer::Timer};
use std::cell::Cell;
use std::rc::Rc;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::time::{sleep, Duration};

#[derive(Clone)]
#[allow(dead_code)]
/// In-memory CAN bus reproducing the `CanBus` trait behavior. Frames sent on
/// one end come out of the other, like two nodes wired to the same segment.
pub struct MockCanBus {
    tx: mpsc::UnboundedSender<CanFrame>,
    rx: Arc<Mutex<mpsc::UnboundedReceiver<CanFrame>>>,
    filters: Arc<parking_lot::Mutex<Option<FilterPolicy>>>,
}

#[allow(dead_code)]
impl MockCanBus {
    /// Construct a pair of interconnected buses (node A and node B).
    pub fn create_pair() -> (Self, Self) {
        let (a_tx, b_rx) = mpsc::unbounded_channel();
        let (b_tx, a_rx) = mpsc::unbounded_channel();

        let a_bus = Self {
            tx: a_tx,
            rx: Arc::new(Mutex::new(a_rx)),
            filters: Arc::new(parking_lot::Mutex::new(None)),
        };

        let b_bus = Self {
            tx: b_tx,
            rx: Arc::new(Mutex::new(b_rx)),
            filters: Arc::new(parking_lot::Mutex::new(None)),
        };

        (a_bus, b_bus)
    }

    /// Filter policy the connection installed, if any.
    pub fn installed_filters(&self) -> Option<FilterPolicy> {
        self.filters.lock().clone()
    }
}

impl CanBus for MockCanBus {
    type Error = ();

    async fn send<'a>(&'a mut self, frame: &'a CanFrame) -> Result<(), Self::Error> {
        self.tx.send(frame.clone()).map_err(|_| ())?;
        Ok(())
    }

    async fn recv(&mut self) -> Result<CanFrame, Self::Error> {
        let mut rx = self.rx.lock().await;
        rx.recv().await.ok_or(())
    }

    fn set_filters(&mut self, policy: &FilterPolicy) -> Result<(), Self::Error> {
        *self.filters.lock() = Some(policy.clone());
        Ok(())
    }
}

#[allow(dead_code)]
/// Timer based on `tokio::time::sleep` to drive delays in tests.
pub struct MockTimer;

impl Timer for MockTimer {
    async fn delay_ms(&mut self, millis: u32) {
        sleep(Duration::from_millis(millis as u64)).await;
    }
}

#[derive(Clone, Default)]
#[allow(dead_code)]
/// Manually advanced clock so deadlines resolve without real waiting.
pub struct TestClock(Rc<Cell<u64>>);

#[allow(dead_code)]
impl TestClock {
    pub fn advance(&self, millis: u64) {
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

//==================================================================================RECORDERS

#[derive(Default)]
#[allow(dead_code)]
/// Everything a claimer reported, for later assertions.
pub struct ClaimLog {
    pub claimed: Vec<(Name, u8)>,
    pub lost: Vec<Name>,
    pub frames: Vec<CanFrame>,
    pub errors: Vec<(String, ProtocolError)>,
}

#[derive(Clone, Default)]
#[allow(dead_code)]
/// Claim observer recording every notification.
pub struct ClaimRecorder(pub Arc<parking_lot::Mutex<ClaimLog>>);

impl ClaimObserver for ClaimRecorder {
    fn address_claimed(&mut self, name: Name, address: u8) {
        self.0.lock().claimed.push((name, address));
    }

    fn address_lost(&mut self, name: Name) {
        self.0.lock().lost.push(name);
    }

    fn frame(&mut self, frame: &CanFrame) {
        self.0.lock().frames.push(frame.clone());
    }

    fn error(&mut self, what: &str, error: &ProtocolError) {
        self.0.lock().errors.push((what.to_owned(), error.clone()));
    }
}

#[derive(Default)]
#[allow(dead_code)]
/// Everything a connection reported, for later assertions.
pub struct ConnectionLog {
    pub data: Vec<(CanId, Vec<u8>)>,
    pub read: Vec<CanFrame>,
    pub sent: Vec<CanFrame>,
    pub errors: Vec<(String, ProtocolError)>,
    pub started: usize,
    pub closed: usize,
}

#[derive(Clone, Default)]
#[allow(dead_code)]
/// Connection observer recording every notification.
pub struct ConnectionRecorder(pub Arc<parking_lot::Mutex<ConnectionLog>>);

impl ConnectionObserver for ConnectionRecorder {
    fn started(&mut self) {
        self.0.lock().started += 1;
    }

    fn closed(&mut self) {
        self.0.lock().closed += 1;
    }

    fn read(&mut self, frame: &CanFrame) {
        self.0.lock().read.push(frame.clone());
    }

    fn sent(&mut self, frame: &CanFrame) {
        self.0.lock().sent.push(frame.clone());
    }

    fn data(&mut self, header: &CanId, payload: &[u8]) {
        self.0.lock().data.push((*header, payload.to_vec()));
    }

    fn error(&mut self, what: &str, error: &ProtocolError) {
        self.0.lock().errors.push((what.to_owned(), error.clone()));
    }
}
