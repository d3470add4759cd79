//! Peer connections backed by webrtc-rs.

use tether_core::client::{
    AttemptSink, IceCandidate, IceServer, PeerConfig, PeerConnection, PeerConnectionState,
    PeerEvent, PeerFactory, SdpKind, SessionDescription,
};

use anyhow::{Context, Result};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::{APIBuilder, API};
use webrtc::data_channel::RTCDataChannel;
use webrtc::data_channel::data_channel_init::RTCDataChannelInit;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;

/// Builds [`WebRtcPeer`]s from a shared webrtc-rs API instance.
pub struct WebRtcPeerFactory {
    api: API,
}

impl WebRtcPeerFactory {
    pub fn new() -> Result<Self> {
        let mut media = MediaEngine::default();
        let registry = register_default_interceptors(Registry::new(), &mut media)
            .context("failed to register interceptors")?;
        let api = APIBuilder::new()
            .with_media_engine(media)
            .with_interceptor_registry(registry)
            .build();
        Ok(Self { api })
    }
}

impl PeerFactory for WebRtcPeerFactory {
    type Peer = WebRtcPeer;

    async fn create(&self, config: PeerConfig, sink: AttemptSink) -> Result<WebRtcPeer> {
        log::debug!(
            "Creating peer connection with {} ICE servers for attempt {}",
            config.ice_servers.len(),
            sink.attempt()
        );
        let pc = self
            .api
            .new_peer_connection(rtc_configuration(&config))
            .await
            .context("failed to create peer connection")?;
        let pc = Arc::new(pc);

        let candidate_sink = sink.clone();
        pc.on_ice_candidate(Box::new(move |candidate| {
            let sink = candidate_sink.clone();
            Box::pin(async move {
                // `None` marks the end of gathering.
                let Some(candidate) = candidate else { return };
                match candidate.to_json() {
                    Ok(init) => sink.peer(PeerEvent::LocalCandidate(from_rtc_candidate(init))),
                    Err(e) => log::warn!("Failed to serialize local candidate: {}", e),
                }
            })
        }));

        let state_sink = sink.clone();
        pc.on_peer_connection_state_change(Box::new(move |state| {
            let sink = state_sink.clone();
            Box::pin(async move {
                if let Some(state) = map_state(state) {
                    sink.peer(PeerEvent::ConnectionState(state));
                }
            })
        }));

        Ok(WebRtcPeer {
            pc,
            sink,
            channel: Mutex::new(None),
            closed: AtomicBool::new(false),
        })
    }
}

/// One peer connection and its single data channel.
pub struct WebRtcPeer {
    pc: Arc<RTCPeerConnection>,
    sink: AttemptSink,
    channel: Mutex<Option<Arc<RTCDataChannel>>>,
    closed: AtomicBool,
}

impl PeerConnection for WebRtcPeer {
    async fn create_data_channel(&self, label: &str) -> Result<()> {
        let init = RTCDataChannelInit {
            ordered: Some(true),
            ..Default::default()
        };
        let dc = self
            .pc
            .create_data_channel(label, Some(init))
            .await
            .context("failed to create data channel")?;
        attach_channel_handlers(&dc, &self.sink);
        *self.channel.lock() = Some(dc);
        Ok(())
    }

    async fn create_offer(&self) -> Result<SessionDescription> {
        let offer = self
            .pc
            .create_offer(None)
            .await
            .context("failed to create offer")?;
        Ok(SessionDescription::offer(offer.sdp))
    }

    async fn set_local_description(&self, description: SessionDescription) -> Result<()> {
        let description = to_rtc_description(description)?;
        self.pc
            .set_local_description(description)
            .await
            .context("failed to set local description")
    }

    async fn set_remote_description(&self, description: SessionDescription) -> Result<()> {
        let description = to_rtc_description(description)?;
        self.pc
            .set_remote_description(description)
            .await
            .context("failed to set remote description")
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        self.pc
            .add_ice_candidate(to_rtc_candidate(candidate))
            .await
            .context("failed to add ICE candidate")
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let channel = self.channel.lock().take();
        if let Some(dc) = channel {
            if let Err(e) = dc.close().await {
                log::debug!("Data channel close: {}", e);
            }
        }
        if let Err(e) = self.pc.close().await {
            log::warn!("Peer connection close failed: {}", e);
        }
        log::debug!("Closed peer for attempt {}", self.sink.attempt());
    }
}

fn attach_channel_handlers(dc: &Arc<RTCDataChannel>, sink: &AttemptSink) {
    let open_sink = sink.clone();
    dc.on_open(Box::new(move || {
        let sink = open_sink.clone();
        Box::pin(async move { sink.peer(PeerEvent::ChannelOpen) })
    }));

    let message_sink = sink.clone();
    dc.on_message(Box::new(move |msg: DataChannelMessage| {
        let sink = message_sink.clone();
        Box::pin(async move {
            match String::from_utf8(msg.data.to_vec()) {
                Ok(text) => sink.peer(PeerEvent::ChannelMessage(text)),
                Err(_) => sink.peer(PeerEvent::ChannelError(
                    "received a non-UTF-8 message".to_string(),
                )),
            }
        })
    }));

    let error_sink = sink.clone();
    dc.on_error(Box::new(move |err| {
        let sink = error_sink.clone();
        Box::pin(async move { sink.peer(PeerEvent::ChannelError(err.to_string())) })
    }));

    let close_sink = sink.clone();
    dc.on_close(Box::new(move || {
        let sink = close_sink.clone();
        Box::pin(async move { sink.peer(PeerEvent::ChannelClosed) })
    }));
}

fn rtc_configuration(config: &PeerConfig) -> RTCConfiguration {
    RTCConfiguration {
        ice_servers: config.ice_servers.iter().map(to_rtc_server).collect(),
        ice_candidate_pool_size: config.ice_candidate_pool_size,
        ..Default::default()
    }
}

fn to_rtc_server(server: &IceServer) -> RTCIceServer {
    RTCIceServer {
        urls: server.urls.clone(),
        username: server.username.clone().unwrap_or_default(),
        credential: server.credential.clone().unwrap_or_default(),
    }
}

fn to_rtc_description(description: SessionDescription) -> Result<RTCSessionDescription> {
    let parsed = match description.kind {
        SdpKind::Offer => RTCSessionDescription::offer(description.sdp),
        SdpKind::Answer => RTCSessionDescription::answer(description.sdp),
    };
    parsed.context("malformed session description")
}

fn to_rtc_candidate(candidate: IceCandidate) -> RTCIceCandidateInit {
    RTCIceCandidateInit {
        candidate: candidate.candidate,
        sdp_mid: candidate.sdp_mid,
        sdp_mline_index: candidate.sdp_mline_index,
        username_fragment: candidate.username_fragment,
    }
}

fn from_rtc_candidate(init: RTCIceCandidateInit) -> IceCandidate {
    IceCandidate {
        candidate: init.candidate,
        sdp_mid: init.sdp_mid,
        sdp_mline_index: init.sdp_mline_index,
        username_fragment: init.username_fragment,
    }
}

fn map_state(state: RTCPeerConnectionState) -> Option<PeerConnectionState> {
    match state {
        RTCPeerConnectionState::New => Some(PeerConnectionState::New),
        RTCPeerConnectionState::Connecting => Some(PeerConnectionState::Connecting),
        RTCPeerConnectionState::Connected => Some(PeerConnectionState::Connected),
        RTCPeerConnectionState::Disconnected => Some(PeerConnectionState::Disconnected),
        RTCPeerConnectionState::Failed => Some(PeerConnectionState::Failed),
        RTCPeerConnectionState::Closed => Some(PeerConnectionState::Closed),
        RTCPeerConnectionState::Unspecified => None,
    }
}
