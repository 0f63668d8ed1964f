use cucumber::World;
use snapshare_core::{PeerConnectionState, PeerIdentity};
use snapshare_p2p::{
    DiscoveryFacade, EventSubscription, LocalNeighborhood, ServiceType, SessionEvent,
    SessionManager,
};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

/// How long a step waits for an event before failing
pub const EVENT_TIMEOUT: Duration = Duration::from_secs(2);

/// How long a step listens to prove that nothing arrives
pub const QUIET_PERIOD: Duration = Duration::from_millis(150);

/// One named participant of a scenario
pub struct TestPeer {
    pub identity: PeerIdentity,
    pub session: SessionManager,
    pub discovery: DiscoveryFacade,
    pub events: EventSubscription,
    /// Every event pulled from `events` so far, in delivery order
    pub seen: Vec<SessionEvent>,
}

impl fmt::Debug for TestPeer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestPeer")
            .field("identity", &self.identity)
            .field("session", &self.session)
            .field("seen", &self.seen.len())
            .finish()
    }
}

#[derive(Debug, World, Default)]
pub struct SessionWorld {
    /// In-process discovery shared by every peer of the scenario
    pub neighborhood: LocalNeighborhood,

    /// Peers by display name
    pub peers: HashMap<String, TestPeer>,

    /// Peer count returned by the last send
    pub last_sent: Option<usize>,

    /// Last error (for assertions)
    pub last_error: Option<String>,

    /// Bytes of the last image sent
    pub last_image: Vec<u8>,
}

impl SessionWorld {
    /// Create and start a session for `name`
    pub fn start_peer(&mut self, name: &str) {
        let identity = PeerIdentity::new(name)
            .unwrap_or_else(|e| panic!("Invalid peer name {name:?}: {e}"));
        let session = SessionManager::default();
        let events = session.subscribe();
        session
            .start(identity.clone())
            .unwrap_or_else(|e| panic!("Failed to start session for {name}: {e}"));
        let discovery = DiscoveryFacade::new(session.clone(), self.neighborhood.clone());

        self.peers.insert(
            name.to_string(),
            TestPeer {
                identity,
                session,
                discovery,
                events,
                seen: Vec::new(),
            },
        );
    }

    /// Start `name` and advertise its session
    pub async fn host(&mut self, name: &str) {
        self.start_peer(name);
        self.peer_mut(name)
            .discovery
            .start_hosting(ServiceType::default())
            .await
            .unwrap_or_else(|e| panic!("{name} could not host: {e}"));
    }

    /// Start `name`, browse until `host` shows up and join it
    pub async fn join(&mut self, name: &str, host: &str) {
        self.start_peer(name);
        let peer = self.peer_mut(name);
        let mut browser = peer
            .discovery
            .start_browsing(ServiceType::default())
            .await
            .unwrap_or_else(|e| panic!("{name} could not browse: {e}"));

        let candidate = tokio::time::timeout(EVENT_TIMEOUT, async {
            loop {
                let candidate = browser
                    .next_candidate()
                    .await
                    .unwrap_or_else(|e| panic!("{name} stopped finding hosts: {e}"));
                if candidate.identity.display_name() == host {
                    return candidate;
                }
            }
        })
        .await
        .unwrap_or_else(|_| panic!("{name} never found a session hosted by {host}"));

        let joined = browser
            .select(&candidate)
            .await
            .unwrap_or_else(|e| panic!("{name} could not join {host}: {e}"));
        assert_eq!(joined.display_name(), host);
        browser.cancel();
        peer.discovery.stop();
    }

    pub fn peer(&self, name: &str) -> &TestPeer {
        self.peers
            .get(name)
            .unwrap_or_else(|| panic!("Peer '{}' not found", name))
    }

    pub fn peer_mut(&mut self, name: &str) -> &mut TestPeer {
        self.peers
            .get_mut(name)
            .unwrap_or_else(|| panic!("Peer '{}' not found", name))
    }

    /// Find an event already seen by `name`, or wait for one to arrive
    pub async fn wait_for(
        &mut self,
        name: &str,
        description: &str,
        matches: impl Fn(&SessionEvent) -> bool,
    ) -> SessionEvent {
        let peer = self.peer_mut(name);
        if let Some(index) = peer.seen.iter().position(&matches) {
            return peer.seen.remove(index);
        }

        let found = tokio::time::timeout(EVENT_TIMEOUT, async {
            while let Some(event) = peer.events.next().await {
                if matches(&event) {
                    return Some(event);
                }
                peer.seen.push(event);
            }
            None
        })
        .await;

        match found {
            Ok(Some(event)) => event,
            Ok(None) => panic!("{name}'s event stream closed while waiting for {description}"),
            Err(_) => panic!(
                "{name} never saw {description}; events so far: {:?}",
                peer.seen
            ),
        }
    }

    /// Wait until `name` reports `other` in `state`
    pub async fn wait_for_state(&mut self, name: &str, other: &str, state: PeerConnectionState) {
        let other_id = self.peer(other).identity.id();
        self.wait_for(name, &format!("{other} {state}"), |event| {
            matches!(
                event,
                SessionEvent::PeerStateChanged { peer, state: s }
                    if peer.id() == other_id && *s == state
            )
        })
        .await;
    }

    /// Events delivered to `name` during a short quiet period
    pub async fn drain(&mut self, name: &str) -> Vec<SessionEvent> {
        let peer = self.peer_mut(name);
        let mut events = std::mem::take(&mut peer.seen);
        while let Ok(Some(event)) = tokio::time::timeout(QUIET_PERIOD, peer.events.next()).await {
            events.push(event);
        }
        events
    }

    /// Remember the outcome of a send
    pub fn record_send(&mut self, result: snapshare_p2p::Result<usize>) {
        match result {
            Ok(count) => {
                self.last_sent = Some(count);
                self.last_error = None;
            }
            Err(e) => {
                self.last_sent = None;
                self.last_error = Some(e.to_string());
            }
        }
    }
}

/// Smallest byte sequence the codec accepts as a PNG
pub fn sample_png() -> Vec<u8> {
    let mut bytes = vec![0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];
    bytes.extend_from_slice(&[0, 0, 0, 13, b'I', b'H', b'D', b'R', 0, 0, 0, 1]);
    bytes
}
