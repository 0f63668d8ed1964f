use crate::domain::{PeerId, PeerIdentity};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Connection state of a peer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PeerConnectionState {
    /// Transport offered, waiting for it to confirm
    Connecting,
    /// Transport confirmed; the peer receives fan-out sends
    Connected,
    /// Closed, failed or never confirmed
    NotConnected,
}

impl PeerConnectionState {
    /// Whether a peer currently in `from` (or unknown, if `None`) may move to `to`.
    ///
    /// `Connected` is only reachable from `Connecting`, and a peer has to pass
    /// through `NotConnected` before it can reconnect.
    pub fn is_valid_transition(from: Option<Self>, to: Self) -> bool {
        use PeerConnectionState::*;
        matches!(
            (from, to),
            (None, Connecting)
                | (Some(Connecting), Connected)
                | (Some(Connecting), NotConnected)
                | (Some(Connected), NotConnected)
                | (Some(NotConnected), NotConnected)
                | (Some(NotConnected), Connecting)
        )
    }
}

impl fmt::Display for PeerConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PeerConnectionState::Connecting => write!(f, "Connecting"),
            PeerConnectionState::Connected => write!(f, "Connected"),
            PeerConnectionState::NotConnected => write!(f, "NotConnected"),
        }
    }
}

/// Errors raised by the peer registry
#[derive(Debug, Clone, thiserror::Error, PartialEq)]
pub enum RegistryError {
    #[error("Unknown peer: {0}")]
    UnknownPeer(PeerId),

    #[error("Invalid transition for peer {peer}: {from:?} -> {to}")]
    InvalidTransition {
        peer: PeerId,
        from: Option<PeerConnectionState>,
        to: PeerConnectionState,
    },
}

/// Registry entry for a single peer
#[derive(Debug, Clone)]
pub struct PeerEntry {
    pub identity: PeerIdentity,
    pub state: PeerConnectionState,
    /// How many times this peer reached `Connected`
    pub connections: u32,
}

/// Authoritative store of every peer seen during a session.
///
/// Peers are never removed: a peer that left stays `NotConnected` so it can
/// reconnect under the same id and its display name stays resolvable.
#[derive(Debug, Default, Clone)]
pub struct PeerRegistry {
    peers: HashMap<PeerId, PeerEntry>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self {
            peers: HashMap::new(),
        }
    }

    /// Insert or update a peer's state, returning the previous state.
    pub fn upsert(
        &mut self,
        identity: &PeerIdentity,
        state: PeerConnectionState,
    ) -> Result<Option<PeerConnectionState>, RegistryError> {
        let peer = identity.id();
        let previous = self.peers.get(&peer).map(|entry| entry.state);

        if !PeerConnectionState::is_valid_transition(previous, state) {
            return Err(RegistryError::InvalidTransition {
                peer,
                from: previous,
                to: state,
            });
        }

        let entry = self.peers.entry(peer).or_insert_with(|| PeerEntry {
            identity: identity.clone(),
            state,
            connections: 0,
        });

        if entry.identity.display_name() != identity.display_name() {
            tracing::debug!(
                "Peer {} now known as {:?} (was {:?})",
                peer,
                identity.display_name(),
                entry.identity.display_name()
            );
            entry.identity = identity.clone();
        }

        entry.state = state;
        if state == PeerConnectionState::Connected {
            entry.connections += 1;
        }

        Ok(previous)
    }

    /// Snapshot of the peers currently `Connected`, ordered by display name
    pub fn connected_peers(&self) -> Vec<PeerIdentity> {
        let mut peers: Vec<PeerIdentity> = self
            .peers
            .values()
            .filter(|entry| entry.state == PeerConnectionState::Connected)
            .map(|entry| entry.identity.clone())
            .collect();
        peers.sort_by(|a, b| {
            a.display_name()
                .cmp(b.display_name())
                .then_with(|| a.id().cmp(&b.id()))
        });
        peers
    }

    pub fn is_connected(&self, peer: &PeerId) -> bool {
        self.state(peer) == Some(PeerConnectionState::Connected)
    }

    pub fn state(&self, peer: &PeerId) -> Option<PeerConnectionState> {
        self.peers.get(peer).map(|entry| entry.state)
    }

    pub fn identity(&self, peer: &PeerId) -> Option<&PeerIdentity> {
        self.peers.get(peer).map(|entry| &entry.identity)
    }

    pub fn get(&self, peer: &PeerId) -> Option<&PeerEntry> {
        self.peers.get(peer)
    }

    /// Display name of a registered peer
    pub fn display_name(&self, peer: &PeerId) -> Result<&str, RegistryError> {
        self.peers
            .get(peer)
            .map(|entry| entry.identity.display_name())
            .ok_or(RegistryError::UnknownPeer(*peer))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&PeerId, &PeerEntry)> {
        self.peers.iter()
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use PeerConnectionState::*;

    fn peer(name: &str) -> PeerIdentity {
        PeerIdentity::new(name).unwrap()
    }

    #[test]
    fn test_connect_flow() {
        let mut registry = PeerRegistry::new();
        let alice = peer("Alice");

        assert_eq!(registry.upsert(&alice, Connecting), Ok(None));
        assert!(registry.connected_peers().is_empty());

        assert_eq!(registry.upsert(&alice, Connected), Ok(Some(Connecting)));
        assert_eq!(registry.connected_peers(), vec![alice.clone()]);
        assert!(registry.is_connected(&alice.id()));
    }

    #[test]
    fn test_connected_requires_connecting() {
        let mut registry = PeerRegistry::new();
        let bob = peer("Bob");

        let result = registry.upsert(&bob, Connected);
        assert_eq!(
            result,
            Err(RegistryError::InvalidTransition {
                peer: bob.id(),
                from: None,
                to: Connected,
            })
        );
        assert!(registry.is_empty());

        registry.upsert(&bob, Connecting).unwrap();
        registry.upsert(&bob, Connected).unwrap();
        assert!(registry.upsert(&bob, Connected).is_err());
    }

    #[test]
    fn test_disconnect_removes_from_connected() {
        let mut registry = PeerRegistry::new();
        let alice = peer("Alice");
        let bob = peer("Bob");

        for p in [&alice, &bob] {
            registry.upsert(p, Connecting).unwrap();
            registry.upsert(p, Connected).unwrap();
        }
        assert_eq!(registry.connected_peers().len(), 2);

        assert_eq!(registry.upsert(&bob, NotConnected), Ok(Some(Connected)));
        assert_eq!(registry.connected_peers(), vec![alice]);
        assert_eq!(registry.state(&bob.id()), Some(NotConnected));
    }

    #[test]
    fn test_reconnect_after_not_connected() {
        let mut registry = PeerRegistry::new();
        let alice = peer("Alice");

        registry.upsert(&alice, Connecting).unwrap();
        registry.upsert(&alice, Connected).unwrap();
        registry.upsert(&alice, NotConnected).unwrap();

        // Connected -> Connecting is not allowed, but NotConnected -> Connecting is
        registry.upsert(&alice, Connecting).unwrap();
        registry.upsert(&alice, Connected).unwrap();

        assert_eq!(registry.get(&alice.id()).unwrap().connections, 2);
    }

    #[test]
    fn test_repeated_not_connected_is_idempotent() {
        let mut registry = PeerRegistry::new();
        let alice = peer("Alice");

        registry.upsert(&alice, Connecting).unwrap();
        registry.upsert(&alice, NotConnected).unwrap();
        assert_eq!(
            registry.upsert(&alice, NotConnected),
            Ok(Some(NotConnected))
        );
    }

    #[test]
    fn test_display_name_lookup() {
        let mut registry = PeerRegistry::new();
        let alice = peer("Alice");
        let stranger = PeerId::new();

        registry.upsert(&alice, Connecting).unwrap();
        assert_eq!(registry.display_name(&alice.id()), Ok("Alice"));
        assert_eq!(
            registry.display_name(&stranger),
            Err(RegistryError::UnknownPeer(stranger))
        );
    }

    #[test]
    fn test_connected_peers_matches_last_upsert() {
        let mut registry = PeerRegistry::new();
        let peers: Vec<PeerIdentity> = (0..6).map(|i| peer(&format!("P{i}"))).collect();

        for p in &peers {
            registry.upsert(p, Connecting).unwrap();
        }
        for p in peers.iter().step_by(2) {
            registry.upsert(p, Connected).unwrap();
        }
        registry.upsert(&peers[2], NotConnected).unwrap();
        registry.upsert(&peers[1], NotConnected).unwrap();

        let connected: Vec<String> = registry
            .connected_peers()
            .iter()
            .map(|p| p.display_name().to_string())
            .collect();
        assert_eq!(connected, vec!["P0", "P4"]);
    }
}
