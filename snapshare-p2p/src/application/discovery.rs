//! Discovery facade: advertise a session or browse for one, and hand every
//! resulting connection to the session manager.

use crate::application::session_manager::{establish_within, SessionManager};
use crate::domain::{HostCandidate, ServiceType};
use crate::infrastructure::connection_trait::{DiscoveryBackend, HostBrowser, PeerOffer};
use crate::infrastructure::error::{P2PError, Result};
use snapshare_core::PeerIdentity;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::Instrument;

enum DiscoveryMode {
    Idle,
    Hosting {
        service: ServiceType,
        address: Option<String>,
        accept_task: JoinHandle<()>,
    },
    Browsing {
        service: ServiceType,
        cancel: watch::Sender<bool>,
    },
}

/// Either hosts or browses for one session at a time
pub struct DiscoveryFacade {
    session: SessionManager,
    backend: Arc<dyn DiscoveryBackend>,
    mode: DiscoveryMode,
}

impl DiscoveryFacade {
    pub fn new(session: SessionManager, backend: impl DiscoveryBackend) -> Self {
        Self::with_backend(session, Arc::new(backend))
    }

    pub fn with_backend(session: SessionManager, backend: Arc<dyn DiscoveryBackend>) -> Self {
        Self {
            session,
            backend,
            mode: DiscoveryMode::Idle,
        }
    }

    pub fn session(&self) -> &SessionManager {
        &self.session
    }

    /// Advertise the local session and accept every peer that asks to join.
    ///
    /// Join requests are accepted automatically; each one becomes a
    /// connection attempt on the session manager.
    pub async fn start_hosting(&mut self, service: ServiceType) -> Result<()> {
        let local = self.session.local_identity()?;
        self.ensure_idle()?;

        let mut advertisement = self.backend.advertise(&service, &local).await?;
        let address = advertisement.address();
        let session = self.session.clone();
        let span = tracing::info_span!("hosting", service = %service);

        let accept_task = tokio::spawn(
            async move {
                while let Some(offer) = advertisement.accept().await {
                    tracing::info!("🤝 {} wants to join", offer.identity);
                    let session = session.clone();
                    tokio::spawn(async move {
                        let peer = offer.identity.clone();
                        if let Err(e) = session
                            .on_peer_connection_attempt(offer.identity, offer.connection)
                            .await
                        {
                            tracing::warn!("Could not accept {}: {}", peer, e);
                        }
                    });
                }
                tracing::debug!("Advertisement ended");
            }
            .instrument(span),
        );

        tracing::info!("📣 Hosting {} as {}", service, local);
        self.mode = DiscoveryMode::Hosting {
            service,
            address,
            accept_task,
        };
        Ok(())
    }

    /// Search for hosts advertising `service`.
    ///
    /// The returned browser stays valid until it is cancelled, dropped or
    /// this facade is stopped.
    pub async fn start_browsing(&mut self, service: ServiceType) -> Result<Browser> {
        let local = self.session.local_identity()?;
        self.ensure_idle()?;

        let hosts = self.backend.browse(&service, &local).await?;
        let (cancel, cancelled) = watch::channel(false);

        tracing::info!("🔍 Browsing for {}", service);
        self.mode = DiscoveryMode::Browsing {
            service: service.clone(),
            cancel,
        };

        Ok(Browser {
            session: self.session.clone(),
            backend: self.backend.clone(),
            service,
            local,
            hosts,
            candidates: Vec::new(),
            cancelled,
        })
    }

    /// Stop hosting or browsing. Connected peers stay connected.
    pub fn stop(&mut self) {
        match std::mem::replace(&mut self.mode, DiscoveryMode::Idle) {
            DiscoveryMode::Idle => {}
            DiscoveryMode::Hosting {
                service,
                accept_task,
                ..
            } => {
                accept_task.abort();
                tracing::info!("Stopped hosting {}", service);
            }
            DiscoveryMode::Browsing { service, cancel } => {
                let _ = cancel.send(true);
                tracing::info!("Stopped browsing for {}", service);
            }
        }
    }

    pub fn is_hosting(&self) -> bool {
        matches!(self.mode, DiscoveryMode::Hosting { .. })
    }

    pub fn is_browsing(&self) -> bool {
        match &self.mode {
            DiscoveryMode::Browsing { cancel, .. } => !cancel.is_closed(),
            _ => false,
        }
    }

    /// Address joiners can use to reach this host, if the backend has one
    pub fn hosting_address(&self) -> Option<&str> {
        match &self.mode {
            DiscoveryMode::Hosting { address, .. } => address.as_deref(),
            _ => None,
        }
    }

    fn ensure_idle(&mut self) -> Result<()> {
        // a browser that was cancelled or dropped no longer counts
        let abandoned = matches!(
            &self.mode,
            DiscoveryMode::Browsing { cancel, .. } if cancel.is_closed()
        );
        if abandoned {
            self.mode = DiscoveryMode::Idle;
        }

        match &self.mode {
            DiscoveryMode::Idle => Ok(()),
            DiscoveryMode::Hosting { .. } => Err(P2PError::DiscoveryBusy("hosting")),
            DiscoveryMode::Browsing { .. } => Err(P2PError::DiscoveryBusy("browsing")),
        }
    }
}

impl Drop for DiscoveryFacade {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Host search started by [`DiscoveryFacade::start_browsing`]
pub struct Browser {
    session: SessionManager,
    backend: Arc<dyn DiscoveryBackend>,
    service: ServiceType,
    local: PeerIdentity,
    hosts: Box<dyn HostBrowser>,
    candidates: Vec<HostCandidate>,
    cancelled: watch::Receiver<bool>,
}

impl Browser {
    pub fn service(&self) -> &ServiceType {
        &self.service
    }

    /// Hosts found so far, in the order they were found
    pub fn candidates(&self) -> &[HostCandidate] {
        &self.candidates
    }

    /// Wait for the next host to appear.
    ///
    /// Fails with `DiscoveryCancelled` once browsing was stopped, and with
    /// `ConnectionFailed` when the backend has nothing more to offer.
    pub async fn next_candidate(&mut self) -> Result<HostCandidate> {
        let found = tokio::select! {
            biased;
            _ = self.cancelled.wait_for(|cancelled| *cancelled) => {
                return Err(P2PError::DiscoveryCancelled);
            }
            found = self.hosts.next_host() => found,
        };

        let candidate = found.ok_or_else(|| {
            P2PError::ConnectionFailed(format!("no more hosts for {}", self.service))
        })?;
        tracing::info!("🔍 Found {}", candidate);
        self.candidates.push(candidate.clone());
        Ok(candidate)
    }

    /// Join the session hosted by `candidate`.
    ///
    /// Returns the host's identity once its connection is confirmed. The
    /// session only learns about the host after that, so cancelling at any
    /// point before leaves it untouched.
    pub async fn select(&mut self, candidate: &HostCandidate) -> Result<PeerIdentity> {
        let confirmed = connect_confirmed(
            self.backend.as_ref(),
            &self.service,
            &self.local,
            candidate,
            self.session.config().establish_timeout,
        );
        let offer = tokio::select! {
            biased;
            _ = self.cancelled.wait_for(|cancelled| *cancelled) => {
                return Err(P2PError::DiscoveryCancelled);
            }
            offer = confirmed => offer?,
        };

        let host = offer.identity.clone();
        tracing::info!("🤝 Joining {}", host);
        self.session
            .on_peer_connected(offer.identity, offer.connection)?;
        Ok(host)
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancelled.borrow()
    }

    /// Stop browsing; the facade becomes idle again
    pub fn cancel(self) {
        tracing::info!("Browsing for {} cancelled", self.service);
    }
}

async fn connect_confirmed(
    backend: &dyn DiscoveryBackend,
    service: &ServiceType,
    local: &PeerIdentity,
    candidate: &HostCandidate,
    timeout: Duration,
) -> Result<PeerOffer> {
    let mut offer = backend.connect(service, local, candidate).await?;
    establish_within(offer.connection.as_mut(), &offer.identity, timeout).await?;
    Ok(offer)
}
