//! Circle aggregate - the one shared document per gift instance
//!
//! A `Circle` is the sole source of truth for everything on the table:
//! the marker position and its history, the wish list, letters, and
//! conditions. Two capability tokens are minted at creation; possession of
//! a token, not an identity, is what grants access.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::zone::Zone;

/// Bytes of entropy per token / id (hex-encoded to twice this length).
const TOKEN_BYTES: usize = 12;

/// Which party authored a letter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Author {
    #[serde(rename = "primary-author")]
    Primary,
    #[serde(rename = "recipient")]
    Recipient,
}

/// Access mode granted by a capability token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessMode {
    Edit,
    View,
}

/// A bare position with its derived zone.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
    pub zone: Zone,
}

/// The latest committed marker placement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CurrentPosition {
    pub x: f64,
    pub y: f64,
    pub zone: Zone,
    #[serde(with = "flexible_time")]
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// One historical position snapshot. History is newest-first, append-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionHistoryEntry {
    pub id: String,
    pub position: Position,
    #[serde(with = "flexible_time")]
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// Wish list item, in append order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BirthdayItem {
    pub id: String,
    pub text: String,
    #[serde(with = "flexible_time")]
    pub added_at: DateTime<Utc>,
    pub obtained: bool,
}

/// Condition item, in append order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Condition {
    pub id: String,
    pub text: String,
    #[serde(with = "flexible_time")]
    pub added_at: DateTime<Utc>,
    pub completed: bool,
}

/// Letter entry, newest-first, append-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LetterEntry {
    pub id: String,
    pub author: Author,
    pub content: String,
    #[serde(with = "flexible_time")]
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

/// Root aggregate, one document per gift instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Circle {
    pub id: String,
    pub edit_token: String,
    pub view_token: String,
    #[serde(with = "flexible_time")]
    pub created_at: DateTime<Utc>,
    pub current_position: CurrentPosition,
    pub birthday_list: Vec<BirthdayItem>,
    pub position_history: Vec<PositionHistoryEntry>,
    pub letters: Vec<LetterEntry>,
    pub conditions: Vec<Condition>,
}

impl Circle {
    /// Which access mode a token grants on this circle, if any.
    ///
    /// The decision is strictly by which stored field matched; the token
    /// prefixes are operator legibility only.
    pub fn mode_for_token(&self, token: &str) -> Option<AccessMode> {
        if self.edit_token == token {
            Some(AccessMode::Edit)
        } else if self.view_token == token {
            Some(AccessMode::View)
        } else {
            None
        }
    }
}

/// Fresh random hex string, `TOKEN_BYTES` bytes of OS entropy.
fn random_hex() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    getrandom::fill(&mut bytes).expect("OS entropy source unavailable");
    hex::encode(bytes)
}

/// Fresh opaque id for circles, history entries, list items.
pub fn new_id() -> String {
    random_hex()
}

/// Fresh edit/view token pair. Prefixes are for debugging legibility, not
/// access decisions.
pub fn generate_tokens() -> (String, String) {
    (
        format!("edit-{}", random_hex()),
        format!("view-{}", random_hex()),
    )
}

/// Timestamp codec tolerating both representations in the store.
///
/// Serializes as RFC 3339; deserializes from either an RFC 3339 string or
/// integer epoch milliseconds (the legacy store-native form). One explicit
/// decode per typed field, applied with `#[serde(with = "flexible_time")]`.
pub mod flexible_time {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&value.to_rfc3339())
    }

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum TimeRepr {
        Rfc3339(String),
        EpochMillis(i64),
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        match TimeRepr::deserialize(deserializer)? {
            TimeRepr::Rfc3339(s) => DateTime::parse_from_rfc3339(&s)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(serde::de::Error::custom),
            TimeRepr::EpochMillis(ms) => DateTime::<Utc>::from_timestamp_millis(ms)
                .ok_or_else(|| serde::de::Error::custom("epoch millis out of range")),
        }
    }
}
