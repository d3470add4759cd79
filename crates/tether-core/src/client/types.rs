use crate::channel::Channel;
use crate::descriptor::ServerDescriptor;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Offer or answer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpKind {
    Offer,
    Answer,
}

/// A session description as exchanged over signaling.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub kind: SdpKind,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Answer,
            sdp: sdp.into(),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mline_index: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username_fragment: Option<String>,
}

impl IceCandidate {
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            ..Default::default()
        }
    }
}

/// STUN/TURN server entry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceServer {
    pub urls: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

impl IceServer {
    pub fn stun(url: &str) -> Self {
        Self {
            urls: vec![url.to_string()],
            username: None,
            credential: None,
        }
    }
}

/// Identity of one connection attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AttemptId(pub u64);

impl fmt::Display for AttemptId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Where an attempt is in the handshake.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandshakeState {
    Idle,
    SignalingConnect,
    AwaitingIceConfig,
    EstablishingPeer,
    AwaitingRemoteDescription,
    AwaitingChannelOpen,
    AwaitingDescriptor,
    Succeeded,
    Failed,
    Cancelled,
}

impl HandshakeState {
    /// Status line shown to the user.
    pub fn description(self) -> &'static str {
        match self {
            HandshakeState::Idle => "Idle",
            HandshakeState::SignalingConnect => "Connecting to signaling server",
            HandshakeState::AwaitingIceConfig => "Requesting connection",
            HandshakeState::EstablishingPeer => "Establishing peer connection",
            HandshakeState::AwaitingRemoteDescription => "Waiting for server response",
            HandshakeState::AwaitingChannelOpen => "Opening data channel",
            HandshakeState::AwaitingDescriptor => "Waiting for server information",
            HandshakeState::Succeeded => "Connected",
            HandshakeState::Failed => "Connection failed",
            HandshakeState::Cancelled => "Disconnected",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            HandshakeState::Succeeded | HandshakeState::Failed | HandshakeState::Cancelled
        )
    }
}

/// Outward notifications for the embedding application.
#[derive(Clone, Debug)]
pub enum ConnectionEvent {
    StatusChanged {
        attempt: AttemptId,
        state: HandshakeState,
    },
    /// Sent exactly once per failed attempt.
    Failed {
        attempt: AttemptId,
        message: String,
    },
    Connected {
        attempt: AttemptId,
        descriptor: ServerDescriptor,
        channel: Channel,
    },
}

/// Events delivered by the signaling service.
#[derive(Clone, Debug)]
pub enum SignalingEvent {
    Answer(SessionDescription),
    IceCandidate(IceCandidate),
    PeerDisconnected,
    Error(String),
}

/// Connectivity of the peer connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PeerConnectionState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

/// Events raised by the peer connection and its data channel.
#[derive(Clone, Debug)]
pub enum PeerEvent {
    LocalCandidate(IceCandidate),
    ConnectionState(PeerConnectionState),
    ChannelOpen,
    ChannelMessage(String),
    ChannelError(String),
    ChannelClosed,
}

#[derive(Clone, Debug)]
pub enum AttemptEvent {
    Signaling(SignalingEvent),
    Peer(PeerEvent),
}

/// Handle collaborators use to feed events into one attempt's queue.
///
/// Every event is tagged with the attempt it was created for; once the
/// attempt is gone the queue is closed and sends are dropped.
#[derive(Clone, Debug)]
pub struct AttemptSink {
    attempt: AttemptId,
    tx: async_channel::Sender<(AttemptId, AttemptEvent)>,
}

impl AttemptSink {
    pub fn new(
        attempt: AttemptId,
        tx: async_channel::Sender<(AttemptId, AttemptEvent)>,
    ) -> Self {
        Self { attempt, tx }
    }

    pub fn attempt(&self) -> AttemptId {
        self.attempt
    }

    pub fn signaling(&self, event: SignalingEvent) {
        self.push(AttemptEvent::Signaling(event));
    }

    pub fn peer(&self, event: PeerEvent) {
        self.push(AttemptEvent::Peer(event));
    }

    /// Whether the attempt this sink belongs to is still listening.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    fn push(&self, event: AttemptEvent) {
        if self.tx.try_send((self.attempt, event)).is_err() {
            log::debug!("Dropping event for finished attempt {}", self.attempt);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_description_wire_shape() {
        let json = serde_json::to_value(SessionDescription::offer("v=0")).unwrap();
        assert_eq!(json, serde_json::json!({ "type": "offer", "sdp": "v=0" }));
    }

    #[test]
    fn ice_candidate_omits_empty_fields() {
        let json = serde_json::to_string(&IceCandidate::new("candidate:1")).unwrap();
        assert_eq!(json, r#"{"candidate":"candidate:1"}"#);
    }

    #[test]
    fn terminal_states() {
        assert!(HandshakeState::Succeeded.is_terminal());
        assert!(HandshakeState::Failed.is_terminal());
        assert!(HandshakeState::Cancelled.is_terminal());
        assert!(!HandshakeState::AwaitingDescriptor.is_terminal());
    }

    #[test]
    fn sink_tags_events_and_drops_after_close() {
        let (tx, rx) = async_channel::unbounded();
        let sink = AttemptSink::new(AttemptId(7), tx);
        sink.signaling(SignalingEvent::PeerDisconnected);

        let (attempt, event) = rx.try_recv().unwrap();
        assert_eq!(attempt, AttemptId(7));
        assert!(matches!(
            event,
            AttemptEvent::Signaling(SignalingEvent::PeerDisconnected)
        ));

        drop(rx);
        assert!(sink.is_closed());
        sink.peer(PeerEvent::ChannelOpen);
    }
}
