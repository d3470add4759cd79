use crate::identity::RemoteId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Release track of a server build.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    #[default]
    Stable,
    Beta,
    Nightly,
}

impl Channel {
    pub fn as_str(self) -> &'static str {
        match self {
            Channel::Stable => "stable",
            Channel::Beta => "beta",
            Channel::Nightly => "nightly",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Version reported by development builds.
const DEV_BUILD_VERSION: &str = "0.0.0";

/// Map a server version string to its release channel.
///
/// The nightly checks run before the beta check.
pub fn classify(version: &str) -> Channel {
    if version == DEV_BUILD_VERSION || version.contains(".dev") {
        Channel::Nightly
    } else if version.contains('b') {
        Channel::Beta
    } else {
        Channel::Stable
    }
}

/// Path the caller should navigate to for a resolved server.
pub fn redirect_path(channel: Channel, remote_id: &RemoteId) -> String {
    format!(
        "/{}/?remote_id={}",
        channel,
        urlencoding::encode(remote_id.as_str())
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_known_versions() {
        assert_eq!(classify("0.0.0"), Channel::Nightly);
        assert_eq!(classify("2.1.0"), Channel::Stable);
        assert_eq!(classify("2.2.0b1"), Channel::Beta);
        assert_eq!(classify("2.2.0.dev202501271200"), Channel::Nightly);
    }

    #[test]
    fn classify_edge_cases() {
        assert_eq!(classify(""), Channel::Stable);
        assert_eq!(classify("0.0.0.1"), Channel::Stable);
        // nightly markers are checked first
        assert_eq!(classify("2.2.0b1.dev1"), Channel::Nightly);
    }

    #[test]
    fn classify_stays_in_enum() {
        for v in ["1", "abc", "0.0.0", "9.9.9b9", "x.devy", "1.0.0rc1"] {
            assert!(matches!(
                classify(v),
                Channel::Stable | Channel::Beta | Channel::Nightly
            ));
        }
    }

    #[test]
    fn channel_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Channel::Nightly).unwrap(), "\"nightly\"");
        let parsed: Channel = serde_json::from_str("\"beta\"").unwrap();
        assert_eq!(parsed, Channel::Beta);
    }

    #[test]
    fn redirect_path_format() {
        let id = RemoteId::parse("abcdefghijklmnopqrstuvwxy2").unwrap();
        assert_eq!(
            redirect_path(Channel::Beta, &id),
            "/beta/?remote_id=ABCDEFGHIJKLMNOPQRSTUVWXY2"
        );
    }
}
