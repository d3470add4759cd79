use crate::client::types::{AttemptSink, IceCandidate, IceServer, SessionDescription};
use crate::identity::RemoteId;

use anyhow::Result;
use std::future::Future;

/// Rendezvous service that relays the handshake to the remote server.
///
/// Implementations push [`SignalingEvent`](crate::client::SignalingEvent)s into
/// the sink handed to `connect` and drop it on `disconnect`.
pub trait SignalingChannel: Send + Sync + 'static {
    fn connect(&self, sink: AttemptSink) -> impl Future<Output = Result<()>> + Send;

    /// Ask the service to route to `remote_id`. Returns the ICE servers it
    /// hands out, possibly none.
    fn request_connection(
        &self,
        remote_id: &RemoteId,
    ) -> impl Future<Output = Result<Vec<IceServer>>> + Send;

    fn send_offer(&self, offer: &SessionDescription) -> impl Future<Output = Result<()>> + Send;

    fn send_ice_candidate(
        &self,
        candidate: &IceCandidate,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Must be safe to call when not connected.
    fn disconnect(&self) -> impl Future<Output = ()> + Send;
}
