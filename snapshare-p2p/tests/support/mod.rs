//! Shared helpers for the session integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use snapshare_core::{PeerConnectionState, PeerIdentity};
use snapshare_p2p::infrastructure::{FrameReader, FrameWriter};
use snapshare_p2p::{
    EventSubscription, MemoryConnection, P2PError, PeerConnection, Result, SessionEvent,
    SessionManager,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub const EVENT_TIMEOUT: Duration = Duration::from_secs(2);

pub fn init_test_tracing() {
    let _ = tracing_subscriber::registry()
        .with(EnvFilter::new("debug"))
        .with(fmt::layer().with_test_writer())
        .try_init();
}

pub fn identity(name: &str) -> PeerIdentity {
    PeerIdentity::new(name).expect("valid name")
}

/// A started session with its event subscription
pub fn started(name: &str) -> (SessionManager, EventSubscription) {
    let session = SessionManager::default();
    let events = session.subscribe();
    session.start(identity(name)).expect("start session");
    (session, events)
}

pub async fn next_event(events: &mut EventSubscription) -> SessionEvent {
    tokio::time::timeout(EVENT_TIMEOUT, events.next())
        .await
        .expect("timed out waiting for an event")
        .expect("event stream ended")
}

/// Skip events until one matches, failing after the timeout
pub async fn wait_for_event<F>(events: &mut EventSubscription, mut predicate: F) -> SessionEvent
where
    F: FnMut(&SessionEvent) -> bool,
{
    loop {
        let event = next_event(events).await;
        if predicate(&event) {
            return event;
        }
    }
}

pub async fn wait_for_state(
    events: &mut EventSubscription,
    peer: &PeerIdentity,
    state: PeerConnectionState,
) {
    let peer = peer.clone();
    wait_for_event(events, move |event| {
        matches!(event, SessionEvent::PeerStateChanged { peer: p, state: s } if *p == peer && *s == state)
    })
    .await;
}

/// Assert nothing is dispatched for a short while
pub async fn expect_quiet(events: &mut EventSubscription) {
    let result = tokio::time::timeout(Duration::from_millis(100), events.next()).await;
    assert!(result.is_err(), "unexpected event: {:?}", result);
}

/// Connect two sessions to each other over an in-memory link
pub async fn link(a: &SessionManager, b: &SessionManager) {
    link_with(a, b, |conn| Box::new(conn)).await;
}

/// Like `link`, but lets the caller wrap `a`'s end of the link
pub async fn link_with<W>(a: &SessionManager, b: &SessionManager, wrap: W)
where
    W: FnOnce(MemoryConnection) -> Box<dyn PeerConnection>,
{
    let (a_end, b_end) = MemoryConnection::pair();
    let a_id = a.local_identity().expect("a started");
    let b_id = b.local_identity().expect("b started");
    a.on_peer_connection_attempt(b_id, wrap(a_end))
        .await
        .expect("a accepts b");
    b.on_peer_connection_attempt(a_id, Box::new(b_end))
        .await
        .expect("b accepts a");
}

/// Switch that makes a [`FaultyConnection`] fail its writes
#[derive(Clone, Default)]
pub struct FaultSwitch(Arc<AtomicBool>);

impl FaultSwitch {
    pub fn trip(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    fn is_tripped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Wraps an in-memory connection to inject transport faults
pub struct FaultyConnection {
    inner: MemoryConnection,
    establish_delay: Option<Duration>,
    fail_establish: bool,
    writes: FaultSwitch,
    stall: FaultSwitch,
}

impl FaultyConnection {
    pub fn new(inner: MemoryConnection) -> Self {
        Self {
            inner,
            establish_delay: None,
            fail_establish: false,
            writes: FaultSwitch::default(),
            stall: FaultSwitch::default(),
        }
    }

    pub fn with_establish_delay(mut self, delay: Duration) -> Self {
        self.establish_delay = Some(delay);
        self
    }

    pub fn failing_establish(mut self) -> Self {
        self.fail_establish = true;
        self
    }

    pub fn with_write_switch(mut self, switch: FaultSwitch) -> Self {
        self.writes = switch;
        self
    }

    /// Once tripped, reads and writes never complete
    pub fn with_stall_switch(mut self, switch: FaultSwitch) -> Self {
        self.stall = switch;
        self
    }
}

#[async_trait]
impl PeerConnection for FaultyConnection {
    async fn establish(&mut self) -> Result<()> {
        if let Some(delay) = self.establish_delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_establish {
            return Err(P2PError::ConnectionFailed("injected failure".to_string()));
        }
        self.inner.establish().await
    }

    fn split(self: Box<Self>) -> (Box<dyn FrameWriter>, Box<dyn FrameReader>) {
        let FaultyConnection {
            inner,
            writes,
            stall,
            ..
        } = *self;
        let (writer, reader) = Box::new(inner).split();
        (
            Box::new(FaultyWriter {
                inner: writer,
                writes,
                stall: stall.clone(),
            }),
            Box::new(FaultyReader {
                inner: reader,
                stall,
            }),
        )
    }
}

struct FaultyWriter {
    inner: Box<dyn FrameWriter>,
    writes: FaultSwitch,
    stall: FaultSwitch,
}

#[async_trait]
impl FrameWriter for FaultyWriter {
    async fn write_frame(&mut self, frame: &[u8]) -> Result<()> {
        if self.stall.is_tripped() {
            return futures::future::pending().await;
        }
        if self.writes.is_tripped() {
            return Err(P2PError::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "injected write failure",
            )));
        }
        self.inner.write_frame(frame).await
    }

    async fn close(&mut self) {
        self.inner.close().await;
    }
}

struct FaultyReader {
    inner: Box<dyn FrameReader>,
    stall: FaultSwitch,
}

#[async_trait]
impl FrameReader for FaultyReader {
    async fn read_frame(&mut self) -> Result<Option<Vec<u8>>> {
        if self.stall.is_tripped() {
            return futures::future::pending().await;
        }
        self.inner.read_frame().await
    }
}

/// Smallest byte sequence the codec accepts as a PNG
pub fn png() -> Vec<u8> {
    let mut bytes = vec![0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];
    bytes.extend_from_slice(&[0, 0, 0, 13, b'I', b'H', b'D', b'R', 0, 0, 0, 1, 0, 0, 0, 1]);
    bytes
}
