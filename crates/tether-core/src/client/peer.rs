use crate::client::types::{AttemptSink, IceCandidate, IceServer, SessionDescription};

use anyhow::Result;
use std::future::Future;

/// Settings for one peer connection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PeerConfig {
    pub ice_servers: Vec<IceServer>,
    pub ice_candidate_pool_size: u8,
}

/// Creates peer connections. Each peer reports its events into the sink it
/// was created with.
pub trait PeerFactory: Send + Sync + 'static {
    type Peer: PeerConnection;

    fn create(
        &self,
        config: PeerConfig,
        sink: AttemptSink,
    ) -> impl Future<Output = Result<Self::Peer>> + Send;
}

pub trait PeerConnection: Send + Sync + 'static {
    /// Create the single ordered data channel.
    fn create_data_channel(&self, label: &str) -> impl Future<Output = Result<()>> + Send;

    fn create_offer(&self) -> impl Future<Output = Result<SessionDescription>> + Send;

    fn set_local_description(
        &self,
        description: SessionDescription,
    ) -> impl Future<Output = Result<()>> + Send;

    fn set_remote_description(
        &self,
        description: SessionDescription,
    ) -> impl Future<Output = Result<()>> + Send;

    fn add_ice_candidate(&self, candidate: IceCandidate) -> impl Future<Output = Result<()>> + Send;

    /// Close the data channel and the connection. Idempotent.
    fn close(&self) -> impl Future<Output = ()> + Send;
}
