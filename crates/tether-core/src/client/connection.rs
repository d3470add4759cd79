use crate::channel::{classify, Channel};
use crate::client::candidates::PendingCandidates;
use crate::client::error::ConnectError;
use crate::client::peer::{PeerConfig, PeerConnection, PeerFactory};
use crate::client::signaling::SignalingChannel;
use crate::client::types::{
    AttemptEvent, AttemptId, AttemptSink, ConnectionEvent, HandshakeState, IceCandidate,
    PeerConnectionState, PeerEvent, SessionDescription, SignalingEvent,
};
use crate::client::verifier::FingerprintVerifier;
use crate::config::ConnectConfig;
use crate::descriptor::ServerDescriptor;
use crate::identity::RemoteId;
use crate::store::{ConnectionStore, SavedConnection};

use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

/// The attempt that currently owns the orchestrator's resources.
struct LiveAttempt<P> {
    id: AttemptId,
    cancel: watch::Sender<bool>,
    /// Stays registered after success so `disconnect` can close the session.
    peer: Option<Arc<P>>,
}

/// Bounds a single await by the attempt deadline and by cancellation.
struct Watchdog {
    cancel: watch::Receiver<bool>,
    deadline: Instant,
    limit: Duration,
}

impl Watchdog {
    async fn bound<T>(&mut self, fut: impl Future<Output = T>) -> Result<T, ConnectError> {
        tokio::select! {
            biased;
            _ = self.cancel.changed() => Err(ConnectError::Cancelled),
            _ = tokio::time::sleep_until(self.deadline) => Err(ConnectError::Timeout(self.limit)),
            value = fut => Ok(value),
        }
    }
}

/// State owned by one attempt. Lives on the `connect` future, so nothing
/// outside the attempt can touch the candidate buffer.
struct Attempt<P> {
    id: AttemptId,
    remote_id: RemoteId,
    watchdog: Watchdog,
    sink: AttemptSink,
    events: async_channel::Receiver<(AttemptId, AttemptEvent)>,
    candidates: PendingCandidates,
    peer: Option<Arc<P>>,
    channel_open: bool,
}

impl<P> Attempt<P> {
    /// Next event for this attempt, or the deadline or a cancel, whichever
    /// comes first.
    async fn next_event(&mut self) -> Result<AttemptEvent, ConnectError> {
        loop {
            let (id, event) = self
                .watchdog
                .bound(self.events.recv())
                .await?
                .map_err(|_| ConnectError::ConnectionFailed("event queue closed".to_string()))?;
            if id != self.id {
                log::debug!("Ignoring stale event from attempt {} in {}", id, self.id);
                continue;
            }
            return Ok(event);
        }
    }
}

/// Drives the handshake with a remote server: signaling, fingerprint gate,
/// peer connection, data channel, server descriptor.
///
/// One attempt at a time. Calling `connect` again before the previous attempt
/// finished or was disconnected is a caller error.
pub struct Orchestrator<S, V, F: PeerFactory> {
    config: ConnectConfig,
    signaling: Arc<S>,
    verifier: Arc<V>,
    peers: Arc<F>,
    store: ConnectionStore,
    event_tx: async_channel::Sender<ConnectionEvent>,
    live: Mutex<Option<LiveAttempt<F::Peer>>>,
    state: Mutex<(AttemptId, HandshakeState)>,
    last_attempt: AtomicU64,
}

impl<S, V, F> Orchestrator<S, V, F>
where
    S: SignalingChannel,
    V: FingerprintVerifier,
    F: PeerFactory,
{
    pub fn new(
        config: ConnectConfig,
        signaling: Arc<S>,
        verifier: Arc<V>,
        peers: Arc<F>,
        store: ConnectionStore,
        event_tx: async_channel::Sender<ConnectionEvent>,
    ) -> Self {
        Self {
            config,
            signaling,
            verifier,
            peers,
            store,
            event_tx,
            live: Mutex::new(None),
            state: Mutex::new((AttemptId(0), HandshakeState::Idle)),
            last_attempt: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &ConnectConfig {
        &self.config
    }

    pub fn store(&self) -> &ConnectionStore {
        &self.store
    }

    /// State of the most recent attempt.
    pub fn state(&self) -> HandshakeState {
        self.state.lock().1
    }

    /// Attempt currently holding resources, if any.
    pub fn active_attempt(&self) -> Option<AttemptId> {
        self.live.lock().as_ref().map(|live| live.id)
    }

    /// Connect to the server behind `raw` and return its descriptor.
    ///
    /// 1. Validate the remote ID (no network on failure)
    /// 2. Open signaling and request a route, resolve ICE servers
    /// 3. Create the peer connection and data channel, send the offer
    /// 4. Verify the answer's fingerprint, apply it and drain buffered candidates
    /// 5. Read the server descriptor from the data channel and persist the result
    pub async fn connect(&self, raw: &str) -> Result<ServerDescriptor, ConnectError> {
        let deadline = Instant::now() + self.config.timeout();
        let remote_id = RemoteId::parse(raw).inspect_err(|_| {
            log::warn!("Rejected remote id {:?}", raw);
        })?;

        let id = AttemptId(self.last_attempt.fetch_add(1, Ordering::SeqCst) + 1);
        let (cancel_tx, cancel_rx) = watch::channel(false);
        {
            let mut live = self.live.lock();
            if let Some(previous) = live.as_ref() {
                log::warn!(
                    "Attempt {} started while {} is still live",
                    id,
                    previous.id
                );
            }
            *live = Some(LiveAttempt {
                id,
                cancel: cancel_tx,
                peer: None,
            });
        }

        let (tx, rx) = async_channel::unbounded();
        let mut attempt = Attempt {
            id,
            remote_id,
            watchdog: Watchdog {
                cancel: cancel_rx,
                deadline,
                limit: self.config.timeout(),
            },
            sink: AttemptSink::new(id, tx),
            events: rx,
            candidates: PendingCandidates::new(),
            peer: None,
            channel_open: false,
        };

        log::info!("Connecting to {} (attempt {})", attempt.remote_id, id);

        match self.drive(&mut attempt).await {
            Ok((descriptor, channel)) => {
                log::info!(
                    "Connected to {} running {} ({})",
                    attempt.remote_id,
                    descriptor.server_version,
                    channel
                );
                self.set_state(id, HandshakeState::Succeeded, false).await;
                let _ = self
                    .event_tx
                    .send(ConnectionEvent::Connected {
                        attempt: id,
                        descriptor: descriptor.clone(),
                        channel,
                    })
                    .await;
                Ok(descriptor)
            }
            Err(err) => {
                let still_live = self.teardown(&mut attempt).await;
                // Whatever a stale attempt ran into, its owner already moved on.
                let err = if still_live { err } else { ConnectError::Cancelled };
                if err == ConnectError::Cancelled {
                    log::info!("Attempt {} cancelled", id);
                    self.set_state(id, HandshakeState::Cancelled, false).await;
                } else {
                    log::error!("Attempt {} to {} failed: {}", id, attempt.remote_id, err);
                    self.set_state(id, HandshakeState::Failed, false).await;
                    let _ = self
                        .event_tx
                        .send(ConnectionEvent::Failed {
                            attempt: id,
                            message: err.to_string(),
                        })
                        .await;
                }
                Err(err)
            }
        }
    }

    /// Reconnect to the saved server, if there is one.
    pub async fn reconnect_saved(&self) -> Result<Option<ServerDescriptor>, ConnectError> {
        let Some(saved) = self.store.load() else {
            return Ok(None);
        };
        if saved.needs_channel_check() {
            log::info!(
                "Saved connection {} has no known version, confirming its channel",
                saved.remote_id
            );
        }
        self.connect(&saved.remote_id).await.map(Some)
    }

    /// Tear down the current attempt or session. Safe to call at any time.
    pub async fn disconnect(&self) {
        let live = self.live.lock().take();
        if let Some(live) = live {
            log::info!("Disconnecting attempt {}", live.id);
            let _ = live.cancel.send(true);
            self.set_state(live.id, HandshakeState::Cancelled, true).await;
            if let Some(peer) = live.peer {
                peer.close().await;
            }
        }
        self.signaling.disconnect().await;
    }

    async fn drive(
        &self,
        attempt: &mut Attempt<F::Peer>,
    ) -> Result<(ServerDescriptor, Channel), ConnectError> {
        self.transition(attempt, HandshakeState::SignalingConnect).await;
        attempt
            .watchdog
            .bound(self.signaling.connect(attempt.sink.clone()))
            .await?
            .map_err(ConnectError::signaling)?;

        self.transition(attempt, HandshakeState::AwaitingIceConfig).await;
        let mut ice_servers = attempt
            .watchdog
            .bound(self.signaling.request_connection(&attempt.remote_id))
            .await?
            .map_err(ConnectError::signaling)?;
        if ice_servers.is_empty() {
            log::info!(
                "Signaling returned no ICE servers, using {} built-in",
                self.config.fallback_ice_servers.len()
            );
            ice_servers = self.config.fallback_ice_servers.clone();
        }

        self.transition(attempt, HandshakeState::EstablishingPeer).await;
        let peer_config = PeerConfig {
            ice_servers,
            ice_candidate_pool_size: self.config.ice_candidate_pool_size,
        };
        let peer = attempt
            .watchdog
            .bound(self.peers.create(peer_config, attempt.sink.clone()))
            .await?
            .map_err(ConnectError::peer)?;
        let peer = Arc::new(peer);
        attempt.peer = Some(peer.clone());
        if !self.register_peer(attempt.id, &peer) {
            return Err(ConnectError::Cancelled);
        }

        attempt
            .watchdog
            .bound(peer.create_data_channel(&self.config.data_channel_label))
            .await?
            .map_err(ConnectError::peer)?;
        let offer = attempt
            .watchdog
            .bound(peer.create_offer())
            .await?
            .map_err(ConnectError::peer)?;
        attempt
            .watchdog
            .bound(peer.set_local_description(offer.clone()))
            .await?
            .map_err(ConnectError::peer)?;
        attempt
            .watchdog
            .bound(self.signaling.send_offer(&offer))
            .await?
            .map_err(ConnectError::signaling)?;

        self.transition(attempt, HandshakeState::AwaitingRemoteDescription)
            .await;
        loop {
            let event = attempt.next_event().await?;
            if let Some(done) = self.handle_event(attempt, &peer, event).await? {
                return Ok(done);
            }
        }
    }

    /// Handle one event to completion. `Some` ends the attempt successfully.
    async fn handle_event(
        &self,
        attempt: &mut Attempt<F::Peer>,
        peer: &F::Peer,
        event: AttemptEvent,
    ) -> Result<Option<(ServerDescriptor, Channel)>, ConnectError> {
        match event {
            AttemptEvent::Signaling(SignalingEvent::Answer(answer)) => {
                self.accept_answer(attempt, peer, answer).await?;
            }
            AttemptEvent::Signaling(SignalingEvent::IceCandidate(candidate)) => {
                match attempt.candidates.offer(candidate) {
                    Some(candidate) => {
                        attempt
                            .watchdog
                            .bound(apply_candidate(peer, candidate))
                            .await?
                    }
                    None => log::debug!(
                        "Buffered remote candidate ({} pending)",
                        attempt.candidates.len()
                    ),
                }
            }
            AttemptEvent::Signaling(SignalingEvent::PeerDisconnected) => {
                if !attempt.candidates.is_accepted() {
                    return Err(ConnectError::ConnectionFailed(
                        "remote server left before answering".to_string(),
                    ));
                }
                log::info!("Remote server left signaling, continuing on the direct path");
            }
            AttemptEvent::Signaling(SignalingEvent::Error(message)) => {
                return Err(ConnectError::Signaling(message));
            }
            AttemptEvent::Peer(PeerEvent::LocalCandidate(candidate)) => {
                let sent = attempt
                    .watchdog
                    .bound(self.signaling.send_ice_candidate(&candidate))
                    .await?;
                if let Err(e) = sent {
                    log::warn!("Failed to forward local candidate: {:#}", e);
                }
            }
            AttemptEvent::Peer(PeerEvent::ConnectionState(state)) => match state {
                PeerConnectionState::Failed | PeerConnectionState::Disconnected => {
                    return Err(ConnectError::ConnectionFailed(format!(
                        "peer connection {}",
                        if state == PeerConnectionState::Failed {
                            "failed"
                        } else {
                            "disconnected"
                        }
                    )));
                }
                other => log::debug!("Peer connection state: {:?}", other),
            },
            AttemptEvent::Peer(PeerEvent::ChannelOpen) => {
                attempt.channel_open = true;
                self.transition(attempt, HandshakeState::AwaitingDescriptor)
                    .await;
            }
            AttemptEvent::Peer(PeerEvent::ChannelMessage(payload)) => {
                if !attempt.channel_open {
                    log::debug!("Data channel message arrived before its open event");
                    attempt.channel_open = true;
                }
                return self.finish(attempt, &payload).map(Some);
            }
            AttemptEvent::Peer(PeerEvent::ChannelError(message)) => {
                return Err(ConnectError::ConnectionFailed(format!(
                    "data channel error: {}",
                    message
                )));
            }
            AttemptEvent::Peer(PeerEvent::ChannelClosed) => {
                return Err(ConnectError::ConnectionFailed(
                    "data channel closed before the server responded".to_string(),
                ));
            }
        }
        Ok(None)
    }

    /// Fingerprint gate, then remote description, then buffered candidates.
    async fn accept_answer(
        &self,
        attempt: &mut Attempt<F::Peer>,
        peer: &F::Peer,
        answer: SessionDescription,
    ) -> Result<(), ConnectError> {
        if attempt.candidates.is_accepted() {
            log::warn!("Ignoring extra answer for attempt {}", attempt.id);
            return Ok(());
        }

        // Verification is not interrupted; on timeout or cancel it finishes
        // detached and its result is dropped.
        let verifier = self.verifier.clone();
        let remote_id = attempt.remote_id.clone();
        let verification =
            tokio::spawn(async move { verifier.verify(&answer.sdp, &remote_id).await });
        let sanitized = attempt
            .watchdog
            .bound(verification)
            .await?
            .map_err(|e| ConnectError::ConnectionFailed(format!("verification task: {}", e)))?
            .map_err(|e| {
                log::error!(
                    "Certificate fingerprint check failed for {}: {}",
                    attempt.remote_id,
                    e
                );
                ConnectError::SecurityVerificationFailed(e.reason)
            })?;

        attempt
            .watchdog
            .bound(peer.set_remote_description(SessionDescription::answer(sanitized)))
            .await?
            .map_err(ConnectError::peer)?;

        let buffered = attempt.candidates.accept();
        if !buffered.is_empty() {
            log::debug!("Applying {} buffered remote candidates", buffered.len());
        }
        for candidate in buffered {
            attempt
                .watchdog
                .bound(apply_candidate(peer, candidate))
                .await?;
        }

        let next = if attempt.channel_open {
            HandshakeState::AwaitingDescriptor
        } else {
            HandshakeState::AwaitingChannelOpen
        };
        self.transition(attempt, next).await;
        Ok(())
    }

    /// Parse the descriptor and remember the server.
    fn finish(
        &self,
        attempt: &Attempt<F::Peer>,
        payload: &str,
    ) -> Result<(ServerDescriptor, Channel), ConnectError> {
        let descriptor = ServerDescriptor::parse(payload)
            .map_err(|e| ConnectError::InvalidServerResponse(format!("{:#}", e)))?;
        let channel = classify(&descriptor.server_version);

        let saved = SavedConnection {
            remote_id: attempt.remote_id.to_string(),
            name: descriptor.display_name(&self.config.product_name),
            version: descriptor.server_version.clone(),
            channel,
            last_connected_at: now_secs(),
        };
        if let Err(e) = self.store.save(&saved) {
            log::warn!("Failed to persist connection to {}: {:#}", saved.remote_id, e);
        }
        Ok((descriptor, channel))
    }

    /// Attach the peer to the live slot. False when the attempt went stale
    /// while the peer was being created.
    fn register_peer(&self, id: AttemptId, peer: &Arc<F::Peer>) -> bool {
        let mut live = self.live.lock();
        match live.as_mut() {
            Some(live) if live.id == id => {
                live.peer = Some(peer.clone());
                true
            }
            _ => {
                log::debug!("Attempt {} went stale during peer creation", id);
                false
            }
        }
    }

    /// Single cleanup path for every failed or cancelled attempt. Returns
    /// whether the attempt still owned the live slot.
    async fn teardown(&self, attempt: &mut Attempt<F::Peer>) -> bool {
        let still_live = {
            let mut live = self.live.lock();
            if live.as_ref().is_some_and(|l| l.id == attempt.id) {
                live.take();
                true
            } else {
                false
            }
        };

        attempt.candidates.clear();
        attempt.channel_open = false;
        if let Some(peer) = attempt.peer.take() {
            peer.close().await;
        }
        // A stale attempt must not disconnect signaling out from under
        // whoever replaced it.
        if still_live {
            self.signaling.disconnect().await;
        }
        still_live
    }

    async fn transition(&self, attempt: &mut Attempt<F::Peer>, state: HandshakeState) {
        log::info!("[{}] {}", attempt.id, state.description());
        self.set_state(attempt.id, state, false).await;
    }

    /// Record and announce `state`. Older attempts never overwrite newer ones,
    /// and a terminal state is only replaced when `force` is set.
    async fn set_state(&self, id: AttemptId, state: HandshakeState, force: bool) {
        let applied = {
            let mut current = self.state.lock();
            let newer = id > current.0;
            let same_open = id == current.0 && (force || !current.1.is_terminal());
            if newer || same_open {
                *current = (id, state);
                true
            } else {
                false
            }
        };
        if applied {
            let _ = self
                .event_tx
                .send(ConnectionEvent::StatusChanged { attempt: id, state })
                .await;
        }
    }
}

/// Candidates are redundant; one that fails to apply is not fatal.
async fn apply_candidate<P: PeerConnection>(peer: &P, candidate: IceCandidate) {
    let label = candidate.candidate.clone();
    if let Err(e) = peer.add_ice_candidate(candidate).await {
        log::warn!("Failed to apply remote candidate {:?}: {:#}", label, e);
    }
}

fn now_secs() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}
