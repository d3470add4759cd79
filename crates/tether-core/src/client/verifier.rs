use crate::identity::RemoteId;
use std::future::Future;

/// The certificate fingerprint in a session description does not match the
/// one encoded in the remote ID.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{reason}")]
pub struct CertificateVerificationError {
    pub reason: String,
}

impl CertificateVerificationError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Gate between a received answer and the peer connection.
pub trait FingerprintVerifier: Send + Sync + 'static {
    /// Returns the sanitized SDP to apply when the fingerprint matches.
    fn verify(
        &self,
        sdp: &str,
        remote_id: &RemoteId,
    ) -> impl Future<Output = Result<String, CertificateVerificationError>> + Send;
}
