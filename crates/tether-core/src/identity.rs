use crate::client::ConnectError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Length of a normalized remote ID.
pub const REMOTE_ID_LEN: usize = 26;

/// Uppercase the input and drop everything outside `[A-Z0-9]`.
pub fn normalize(raw: &str) -> String {
    raw.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_uppercase())
        .collect()
}

/// True iff the normalized form is exactly 26 ASCII letters or digits.
pub fn is_valid(identifier: &str) -> bool {
    let normalized = normalize(identifier);
    normalized.len() == REMOTE_ID_LEN
        && normalized
            .bytes()
            .all(|b| b.is_ascii_uppercase() || b.is_ascii_digit())
}

/// A validated, normalized remote ID.
///
/// Only constructible through [`RemoteId::parse`], so holding one means the
/// value already passed the fixed-length alphanumeric check.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RemoteId(String);

impl RemoteId {
    pub fn parse(raw: &str) -> Result<Self, ConnectError> {
        let normalized = normalize(raw);
        if is_valid(&normalized) {
            Ok(Self(normalized))
        } else {
            Err(ConnectError::InvalidIdentifier)
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RemoteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for RemoteId {
    type Error = ConnectError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<RemoteId> for String {
    fn from(id: RemoteId) -> Self {
        id.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALID: &str = "ABCDEFGHIJKLMNOPQRSTUVWXY2";

    #[test]
    fn normalize_uppercases_and_strips() {
        assert_eq!(normalize("ab-cd 12_x"), "ABCD12X");
        assert_eq!(normalize(""), "");
        assert_eq!(normalize("--  --"), "");
    }

    #[test]
    fn normalize_drops_non_ascii() {
        assert_eq!(normalize("äb1ß"), "B1");
    }

    #[test]
    fn normalize_is_idempotent() {
        for s in ["abc-DEF 123", "", "ÄÖÜ", VALID, "  x y z  ", "a\tb\nc"] {
            let once = normalize(s);
            assert_eq!(normalize(&once), once);
        }
    }

    #[test]
    fn is_valid_exact_length() {
        assert!(is_valid(VALID));
        assert!(!is_valid(&VALID[..25]));
        assert!(!is_valid(&format!("{VALID}A")));
        assert!(!is_valid(""));
    }

    #[test]
    fn is_valid_accepts_decorated_input() {
        let decorated = "abcde-fghij klmno-pqrst uvwxy-2";
        assert!(is_valid(decorated));
        assert_eq!(normalize(decorated), VALID);
    }

    #[test]
    fn remote_id_parse_normalizes() {
        let id = RemoteId::parse("abcde fghij klmno pqrst uvwxy 2").unwrap();
        assert_eq!(id.as_str(), VALID);
        assert_eq!(id.to_string(), VALID);
    }

    #[test]
    fn remote_id_parse_rejects_invalid() {
        assert!(matches!(
            RemoteId::parse("too-short"),
            Err(ConnectError::InvalidIdentifier)
        ));
    }

    #[test]
    fn remote_id_deserialize_validates() {
        let id: RemoteId = serde_json::from_str(&format!("\"{}\"", VALID.to_lowercase())).unwrap();
        assert_eq!(id.as_str(), VALID);
        assert!(serde_json::from_str::<RemoteId>("\"nope\"").is_err());
    }
}
