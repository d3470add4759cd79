pub mod candidates;
pub mod connection;
pub mod error;
pub mod peer;
pub mod signaling;
pub mod types;
pub mod verifier;


pub use candidates::PendingCandidates;
pub use connection::Orchestrator;
pub use error::ConnectError;
pub use peer::{PeerConfig, PeerConnection, PeerFactory};
pub use signaling::SignalingChannel;
pub use types::{
    AttemptEvent, AttemptId, AttemptSink, ConnectionEvent, HandshakeState, IceCandidate,
    IceServer, PeerConnectionState, PeerEvent, SdpKind, SessionDescription, SignalingEvent,
};
pub use verifier::{CertificateVerificationError, FingerprintVerifier};
