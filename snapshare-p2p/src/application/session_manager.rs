//! The session manager owns the peer registry and one writer task plus one
//! reader task per connected peer.
//!
//! All registry changes and all event raises happen under the session lock,
//! so the dispatch order always matches the order in which the registry
//! changed. Nothing awaits while holding that lock.

use crate::application::config::SessionConfig;
use crate::application::dispatcher::{EventDispatcher, EventHandler, EventSubscription};
use crate::domain::SessionEvent;
use crate::infrastructure::connection_trait::{FrameReader, FrameWriter, PeerConnection};
use crate::infrastructure::error::{P2PError, Result};
use futures::future::join_all;
use snapshare_core::{
    Message, PeerConnectionState, PeerId, PeerIdentity, PeerRegistry, WireCodec,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::Instrument;

type Frame = Arc<[u8]>;

#[derive(Debug)]
enum Lifecycle {
    Idle,
    Running(PeerIdentity),
    Left,
}

/// Transport tasks of one connected peer. Dropping it stops both tasks.
struct PeerLink {
    /// Distinguishes this link from earlier ones to the same peer
    generation: u64,
    outbound: mpsc::UnboundedSender<Frame>,
    stop: watch::Sender<()>,
    tasks: Vec<JoinHandle<()>>,
}

impl PeerLink {
    /// Stop both tasks and wait until the transport is closed
    async fn shutdown(self) {
        let PeerLink {
            outbound,
            stop,
            tasks,
            ..
        } = self;
        drop(outbound);
        drop(stop);

        for result in join_all(tasks).await {
            if let Err(e) = result {
                if e.is_panic() {
                    tracing::error!("Peer task panicked: {}", e);
                }
            }
        }
    }
}

struct SessionState {
    lifecycle: Lifecycle,
    registry: PeerRegistry,
    links: HashMap<PeerId, PeerLink>,
    /// Attempt that owns each `Connecting` peer
    attempts: HashMap<PeerId, u64>,
    /// Attempt ids double as the generation of the link they create
    next_generation: u64,
}

impl SessionState {
    fn local(&self) -> Result<&PeerIdentity> {
        match &self.lifecycle {
            Lifecycle::Running(local) => Ok(local),
            Lifecycle::Idle => Err(P2PError::NotStarted),
            Lifecycle::Left => Err(P2PError::SessionClosed),
        }
    }

    fn is_current(&self, peer: &PeerId, generation: u64) -> bool {
        self.links
            .get(peer)
            .is_some_and(|link| link.generation == generation)
    }
}

/// Why a peer link is being torn down
#[derive(Debug)]
enum Teardown {
    Closed,
    ReadFailed(String),
    SendFailed(String),
}

struct Inner {
    config: SessionConfig,
    codec: WireCodec,
    dispatcher: EventDispatcher,
    state: Mutex<SessionState>,
}

impl Inner {
    fn state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register `remote` as `Connecting` and return the id of this attempt
    fn begin_attempt(&self, remote: &PeerIdentity) -> Result<u64> {
        let peer = remote.id();
        let mut state = self.state();
        let local = state.local()?;
        if local.id() == peer {
            return Err(P2PError::ConnectionFailed(
                "refusing to connect to ourselves".to_string(),
            ));
        }
        if let Some(
            current @ (PeerConnectionState::Connecting | PeerConnectionState::Connected),
        ) = state.registry.state(&peer)
        {
            tracing::warn!("Ignoring second connection from {} ({})", remote, current);
            return Err(P2PError::DuplicatePeer(peer));
        }

        state
            .registry
            .upsert(remote, PeerConnectionState::Connecting)?;
        let attempt = state.next_generation;
        state.next_generation += 1;
        state.attempts.insert(peer, attempt);
        self.dispatcher.raise(SessionEvent::PeerStateChanged {
            peer: remote.clone(),
            state: PeerConnectionState::Connecting,
        });
        Ok(attempt)
    }

    /// Move a peer to `NotConnected`, raising the event only on a real change
    fn mark_not_connected(&self, state: &mut SessionState, peer: &PeerIdentity) {
        match state
            .registry
            .upsert(peer, PeerConnectionState::NotConnected)
        {
            Ok(Some(previous)) if previous != PeerConnectionState::NotConnected => {
                tracing::info!("👋 {} is no longer connected", peer);
                self.dispatcher.raise(SessionEvent::PeerStateChanged {
                    peer: peer.clone(),
                    state: PeerConnectionState::NotConnected,
                });
            }
            Ok(_) => {}
            Err(e) => tracing::warn!("Could not mark {} as disconnected: {}", peer, e),
        }
    }

    /// Remove the link, if it is still the current one, and report why
    fn teardown(&self, peer: &PeerIdentity, generation: u64, reason: Teardown) {
        let removed = {
            let mut state = self.state();
            if !state.is_current(&peer.id(), generation) {
                return;
            }
            let removed = state.links.remove(&peer.id());

            match reason {
                Teardown::Closed => tracing::debug!("{} closed the connection", peer),
                Teardown::ReadFailed(cause) => {
                    let error = P2PError::TransportReadFailed {
                        peer: peer.id(),
                        cause,
                    };
                    tracing::warn!("{}", error);
                }
                Teardown::SendFailed(cause) => {
                    let error = P2PError::TransportSendFailed {
                        peer: peer.id(),
                        cause: cause.clone(),
                    };
                    tracing::warn!("{}", error);
                    self.dispatcher.raise(SessionEvent::SendFailed {
                        peer: peer.clone(),
                        cause,
                    });
                }
            }

            self.mark_not_connected(&mut state, peer);
            removed
        };
        // dropped outside the lock; this signals the sibling task
        drop(removed);
    }

    fn deliver(&self, peer: &PeerIdentity, generation: u64, frame: &[u8]) {
        let event = match self.codec.decode(frame) {
            Ok(Message::Text { sender, body }) => {
                tracing::debug!("📨 Text from {} ({} bytes)", peer, body.len());
                SessionEvent::TextReceived {
                    from: peer.clone(),
                    sender,
                    body,
                }
            }
            Ok(Message::Payload { bytes, format }) => {
                tracing::debug!("🖼️ {} from {} ({} bytes)", format, peer, bytes.len());
                SessionEvent::PayloadReceived {
                    from: peer.clone(),
                    bytes,
                    format,
                }
            }
            Err(failure) => {
                tracing::debug!(
                    "Dropping {} byte frame from {}: {}",
                    frame.len(),
                    peer,
                    failure
                );
                return;
            }
        };

        let state = self.state();
        if state.is_current(&peer.id(), generation) {
            self.dispatcher.raise(event);
        }
    }

    fn fan_out(&self, state: &SessionState, frame: Vec<u8>) -> Result<usize> {
        if frame.len() > self.config.max_frame_len {
            return Err(P2PError::FrameTooLarge {
                len: frame.len(),
                max: self.config.max_frame_len,
            });
        }

        if state.links.is_empty() {
            tracing::debug!("No peers connected, nothing sent");
            return Ok(0);
        }

        let frame: Frame = frame.into();
        let mut queued = 0;
        for (peer, link) in &state.links {
            if link.outbound.send(frame.clone()).is_ok() {
                queued += 1;
            } else {
                tracing::debug!("Writer for {} already stopped", peer);
            }
        }

        tracing::trace!("Queued {} byte frame for {} peers", frame.len(), queued);
        Ok(queued)
    }
}

/// Wait for the transport to confirm, failing after `timeout`
pub(crate) async fn establish_within(
    connection: &mut dyn PeerConnection,
    remote: &PeerIdentity,
    timeout: Duration,
) -> Result<()> {
    match tokio::time::timeout(timeout, connection.establish()).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(P2PError::ConnectionFailed(format!("{}: {}", remote, e))),
        Err(_) => Err(P2PError::ConnectionFailed(format!(
            "{} did not confirm within {:?}",
            remote, timeout
        ))),
    }
}

async fn run_writer(
    inner: Arc<Inner>,
    peer: PeerIdentity,
    generation: u64,
    mut writer: Box<dyn FrameWriter>,
    mut outbound: mpsc::UnboundedReceiver<Frame>,
    mut stop: watch::Receiver<()>,
) {
    loop {
        let frame = tokio::select! {
            biased;
            _ = stop.changed() => break,
            frame = outbound.recv() => match frame {
                Some(frame) => frame,
                None => break,
            },
        };

        let written = tokio::select! {
            biased;
            _ = stop.changed() => break,
            written = writer.write_frame(&frame) => written,
        };

        if let Err(e) = written {
            inner.teardown(&peer, generation, Teardown::SendFailed(e.to_string()));
            break;
        }
    }

    writer.close().await;
    tracing::trace!("Writer stopped");
}

async fn run_reader(
    inner: Arc<Inner>,
    peer: PeerIdentity,
    generation: u64,
    mut reader: Box<dyn FrameReader>,
    mut stop: watch::Receiver<()>,
) {
    let reason = loop {
        let next = tokio::select! {
            biased;
            _ = stop.changed() => return,
            next = reader.read_frame() => next,
        };

        match next {
            Ok(Some(frame)) => inner.deliver(&peer, generation, &frame),
            Ok(None) => break Teardown::Closed,
            Err(e) => break Teardown::ReadFailed(e.to_string()),
        }
    };

    inner.teardown(&peer, generation, reason);
}

/// Owns the local identity, the peer registry and every peer link.
///
/// Cheap to clone; clones share the same session. Starting a session spawns
/// the event dispatch task, so `start` must run inside a Tokio runtime.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<Inner>,
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new(SessionConfig::default())
    }
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state();
        f.debug_struct("SessionManager")
            .field("lifecycle", &state.lifecycle)
            .field("peers", &state.registry.len())
            .field("links", &state.links.len())
            .finish()
    }
}

impl SessionManager {
    pub fn new(config: SessionConfig) -> Self {
        let codec = WireCodec::new(config.text_framing);
        Self {
            inner: Arc::new(Inner {
                config,
                codec,
                dispatcher: EventDispatcher::new(),
                state: Mutex::new(SessionState {
                    lifecycle: Lifecycle::Idle,
                    registry: PeerRegistry::new(),
                    links: HashMap::new(),
                    attempts: HashMap::new(),
                    next_generation: 0,
                }),
            }),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    /// Begin a session as `local`. A session can only be started once.
    pub fn start(&self, local: PeerIdentity) -> Result<()> {
        let mut state = self.inner.state();
        match state.lifecycle {
            Lifecycle::Idle => {}
            Lifecycle::Running(_) => return Err(P2PError::AlreadyStarted),
            Lifecycle::Left => return Err(P2PError::SessionClosed),
        }

        tracing::info!("🚀 Session started as {}", local);
        state.lifecycle = Lifecycle::Running(local);
        self.inner.dispatcher.start();
        Ok(())
    }

    pub fn local_identity(&self) -> Result<PeerIdentity> {
        self.inner.state().local().cloned()
    }

    pub fn is_running(&self) -> bool {
        self.inner.state().local().is_ok()
    }

    /// Events raised from now on, in dispatch order
    pub fn subscribe(&self) -> EventSubscription {
        self.inner.dispatcher.subscribe()
    }

    pub fn add_handler(&self, handler: impl EventHandler) {
        self.inner.dispatcher.add_handler(handler);
    }

    /// Take a peer connection offered by discovery.
    ///
    /// The peer is `Connecting` until the transport confirms, then
    /// `Connected`; if it does not confirm within the establish timeout it
    /// becomes `NotConnected` and the attempt fails.
    pub async fn on_peer_connection_attempt(
        &self,
        remote: PeerIdentity,
        mut connection: Box<dyn PeerConnection>,
    ) -> Result<()> {
        let attempt = self.inner.begin_attempt(&remote)?;
        tracing::info!("🔌 Connecting to {}", remote);

        let established = establish_within(
            connection.as_mut(),
            &remote,
            self.inner.config.establish_timeout,
        )
        .await;
        self.complete_attempt(remote, attempt, connection, established)
    }

    /// Take a connection whose transport has already confirmed.
    ///
    /// The peer passes through `Connecting` to `Connected` at once.
    pub fn on_peer_connected(
        &self,
        remote: PeerIdentity,
        connection: Box<dyn PeerConnection>,
    ) -> Result<()> {
        let attempt = self.inner.begin_attempt(&remote)?;
        self.complete_attempt(remote, attempt, connection, Ok(()))
    }

    fn complete_attempt(
        &self,
        remote: PeerIdentity,
        attempt: u64,
        connection: Box<dyn PeerConnection>,
        established: Result<()>,
    ) -> Result<()> {
        let peer = remote.id();
        let mut state = self.inner.state();
        if state.attempts.get(&peer) != Some(&attempt) {
            // left, or disconnected and maybe reconnected, while confirming
            state.local()?;
            return Err(P2PError::ConnectionFailed(format!(
                "{} was disconnected while connecting",
                remote
            )));
        }
        state.attempts.remove(&peer);

        if let Err(e) = established {
            tracing::warn!("{}", e);
            self.inner.mark_not_connected(&mut state, &remote);
            return Err(e);
        }

        state
            .registry
            .upsert(&remote, PeerConnectionState::Connected)?;
        self.inner.dispatcher.raise(SessionEvent::PeerStateChanged {
            peer: remote.clone(),
            state: PeerConnectionState::Connected,
        });

        let (writer, reader) = connection.split();
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let (stop, stop_rx) = watch::channel(());
        let span = tracing::info_span!("peer", peer = %remote);

        let writer_task = tokio::spawn(
            run_writer(
                self.inner.clone(),
                remote.clone(),
                attempt,
                writer,
                outbound_rx,
                stop_rx.clone(),
            )
            .instrument(span.clone()),
        );
        let reader_task = tokio::spawn(
            run_reader(
                self.inner.clone(),
                remote.clone(),
                attempt,
                reader,
                stop_rx,
            )
            .instrument(span),
        );

        state.links.insert(
            peer,
            PeerLink {
                generation: attempt,
                outbound,
                stop,
                tasks: vec![writer_task, reader_task],
            },
        );

        let connections = state
            .registry
            .get(&peer)
            .map_or(0, |entry| entry.connections);
        tracing::info!("✅ {} connected (connection #{})", remote, connections);
        Ok(())
    }

    /// Send a text message to every connected peer.
    ///
    /// Returns how many peers the frame was queued for; with nobody connected
    /// this is `Ok(0)` and nothing is sent. Write failures surface later as
    /// `SendFailed` events.
    pub fn send_text(&self, body: &str) -> Result<usize> {
        let state = self.inner.state();
        let frame = self.inner.codec.encode_text(state.local()?, body)?;
        self.inner.fan_out(&state, frame)
    }

    /// Send an image to every connected peer; same contract as `send_text`
    pub fn send_payload(&self, bytes: Vec<u8>) -> Result<usize> {
        let state = self.inner.state();
        state.local()?;
        let frame = self.inner.codec.encode_binary(bytes)?;
        self.inner.fan_out(&state, frame)
    }

    /// Close the link to one peer
    pub async fn disconnect(&self, peer: &PeerId) -> Result<()> {
        let link = {
            let mut state = self.inner.state();
            state.local()?;
            let identity = state
                .registry
                .identity(peer)
                .cloned()
                .ok_or(P2PError::UnknownPeer(*peer))?;

            let link = state.links.remove(peer);
            state.attempts.remove(peer);
            self.inner.mark_not_connected(&mut state, &identity);
            link
        };

        if let Some(link) = link {
            link.shutdown().await;
        }
        Ok(())
    }

    /// Leave the session: stop event delivery, then close every peer link.
    ///
    /// No events are delivered once this begins. Leaving twice is a no-op.
    pub async fn leave(&self) {
        let links: Vec<PeerLink> = {
            let mut state = self.inner.state();
            if matches!(state.lifecycle, Lifecycle::Left) {
                return;
            }
            state.lifecycle = Lifecycle::Left;
            self.inner.dispatcher.close();

            let active: Vec<PeerIdentity> = state
                .registry
                .iter()
                .filter(|(_, entry)| entry.state != PeerConnectionState::NotConnected)
                .map(|(_, entry)| entry.identity.clone())
                .collect();
            for peer in &active {
                if let Err(e) = state
                    .registry
                    .upsert(peer, PeerConnectionState::NotConnected)
                {
                    tracing::warn!("{}", e);
                }
            }

            state.attempts.clear();
            state.links.drain().map(|(_, link)| link).collect()
        };

        tracing::info!("🚪 Left session, closing {} peer links", links.len());
        join_all(links.into_iter().map(PeerLink::shutdown)).await;
    }

    /// Peers currently connected, ordered by display name
    pub fn connected_peers(&self) -> Vec<PeerIdentity> {
        self.inner.state().registry.connected_peers()
    }

    pub fn peer_state(&self, peer: &PeerId) -> Option<PeerConnectionState> {
        self.inner.state().registry.state(peer)
    }

    /// Display name of any peer seen in this session
    pub fn display_name(&self, peer: &PeerId) -> Result<String> {
        self.inner
            .state()
            .registry
            .display_name(peer)
            .map(str::to_string)
            .map_err(|_| P2PError::UnknownPeer(*peer))
    }
}
