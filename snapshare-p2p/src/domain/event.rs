use snapshare_core::{ImageFormat, PeerConnectionState, PeerIdentity};

/// Events raised by a session, delivered in order by the event dispatcher
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// A peer moved to a new connection state
    PeerStateChanged {
        peer: PeerIdentity,
        state: PeerConnectionState,
    },
    /// A text frame arrived. `sender` is the name written inside the frame,
    /// `from` the transport peer it arrived on.
    TextReceived {
        from: PeerIdentity,
        sender: String,
        body: String,
    },
    /// An image frame arrived
    PayloadReceived {
        from: PeerIdentity,
        bytes: Vec<u8>,
        format: ImageFormat,
    },
    /// An outbound frame could not be written; the peer is torn down next
    SendFailed { peer: PeerIdentity, cause: String },
}

impl SessionEvent {
    /// The transport peer this event concerns
    pub fn peer(&self) -> &PeerIdentity {
        match self {
            SessionEvent::PeerStateChanged { peer, .. } => peer,
            SessionEvent::TextReceived { from, .. } => from,
            SessionEvent::PayloadReceived { from, .. } => from,
            SessionEvent::SendFailed { peer, .. } => peer,
        }
    }

    pub fn is_state_change(&self) -> bool {
        matches!(self, SessionEvent::PeerStateChanged { .. })
    }
}
