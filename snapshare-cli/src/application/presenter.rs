use snapshare_core::PeerConnectionState;
use snapshare_p2p::SessionEvent;

/// Terminal line for an event, if it should be shown.
///
/// Images are announced by the caller once they are saved.
pub fn describe(event: &SessionEvent) -> Option<String> {
    match event {
        SessionEvent::PeerStateChanged { peer, state } => match state {
            PeerConnectionState::Connecting => None,
            PeerConnectionState::Connected => {
                Some(format!("{} joined", peer.display_name()))
            }
            PeerConnectionState::NotConnected => {
                Some(format!("{} has disconnected", peer.display_name()))
            }
        },
        SessionEvent::TextReceived { sender, body, .. } => Some(format!("[{}] {}", sender, body)),
        SessionEvent::PayloadReceived { .. } => None,
        SessionEvent::SendFailed { peer, cause } => Some(format!(
            "Could not send to {}: {}",
            peer.display_name(),
            cause
        )),
    }
}
