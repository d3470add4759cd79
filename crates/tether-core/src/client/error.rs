use std::time::Duration;

/// Why a connection attempt ended without a server descriptor.
///
/// Every variant is fatal to the attempt. Display text is meant for the user.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConnectError {
    #[error("Invalid remote ID: expected 26 letters or digits")]
    InvalidIdentifier,
    #[error("Signaling error: {0}")]
    Signaling(String),
    #[error("Security verification failed: {0}. The server could not prove its identity")]
    SecurityVerificationFailed(String),
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),
    #[error("Invalid server response: {0}")]
    InvalidServerResponse(String),
    #[error("Connection timed out after {} seconds", .0.as_secs())]
    Timeout(Duration),
    #[error("Connection cancelled")]
    Cancelled,
}

impl ConnectError {
    pub(crate) fn signaling(err: anyhow::Error) -> Self {
        ConnectError::Signaling(format!("{:#}", err))
    }

    pub(crate) fn peer(err: anyhow::Error) -> Self {
        ConnectError::ConnectionFailed(format!("{:#}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn security_failure_leads_with_security() {
        let msg = ConnectError::SecurityVerificationFailed("fingerprint mismatch".into()).to_string();
        assert!(msg.starts_with("Security verification failed: fingerprint mismatch"));
    }

    #[test]
    fn timeout_message_in_seconds() {
        assert_eq!(
            ConnectError::Timeout(Duration::from_secs(30)).to_string(),
            "Connection timed out after 30 seconds"
        );
    }

    #[test]
    fn signaling_keeps_context_chain() {
        let err = anyhow::anyhow!("socket closed").context("send offer");
        assert_eq!(
            ConnectError::signaling(err).to_string(),
            "Signaling error: send offer: socket closed"
        );
    }
}
