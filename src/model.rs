//! Shared data model: collections, records and sync payloads.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// The four collections the vault stores, each with its own payload shape
/// and encryption strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CollectionKind {
    /// Free text; the payload is one opaque string.
    #[serde(rename = "text")]
    Text,
    /// Binary blob, transported as one opaque string.
    #[serde(rename = "binary")]
    Binary,
    /// Payment card; the payload is a flat map of string fields.
    #[serde(rename = "cards")]
    Card,
    /// Login/password pair; the payload is a flat map of string fields.
    #[serde(rename = "credentials")]
    Credential,
}

impl CollectionKind {
    /// Every collection, in the order clients sync them.
    pub const ALL: [CollectionKind; 4] = [
        CollectionKind::Text,
        CollectionKind::Binary,
        CollectionKind::Card,
        CollectionKind::Credential,
    ];

    /// The wire/database name of the collection.
    pub fn as_str(self) -> &'static str {
        match self {
            CollectionKind::Text => "text",
            CollectionKind::Binary => "binary",
            CollectionKind::Card => "cards",
            CollectionKind::Credential => "credentials",
        }
    }
}

impl fmt::Display for CollectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raised when a request names a collection the vault does not have.
#[derive(Debug, Clone, thiserror::Error)]
#[error("unknown collection: {0}")]
pub struct UnknownCollection(pub String);

impl FromStr for CollectionKind {
    type Err = UnknownCollection;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" => Ok(CollectionKind::Text),
            "binary" => Ok(CollectionKind::Binary),
            "cards" => Ok(CollectionKind::Card),
            "credentials" => Ok(CollectionKind::Credential),
            _ => Err(UnknownCollection(s.to_string())),
        }
    }
}

/// Free-form string key/value pairs attached to a record. Stored and
/// returned verbatim, never encrypted.
pub type Metadata = BTreeMap<String, String>;

/// One stored record.
///
/// `data` is a JSON value whose shape depends on the collection: a string
/// for Text/Binary, an object of string fields for Card/Credential. The
/// owner is taken from the verified request identity, never from a body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: String,
    pub username: String,
    pub data: serde_json::Value,
    #[serde(default)]
    pub metadata: Metadata,
}

/// All of a user's records grouped by collection.
///
/// Assembled transiently per sync; only ever persisted through the
/// snapshot codec.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncBundle {
    #[serde(default)]
    pub text: Vec<Record>,
    #[serde(default)]
    pub binary: Vec<Record>,
    #[serde(default)]
    pub cards: Vec<Record>,
    #[serde(default)]
    pub credentials: Vec<Record>,
}

impl SyncBundle {
    /// The records of one collection.
    pub fn collection(&self, kind: CollectionKind) -> &[Record] {
        match kind {
            CollectionKind::Text => &self.text,
            CollectionKind::Binary => &self.binary,
            CollectionKind::Card => &self.cards,
            CollectionKind::Credential => &self.credentials,
        }
    }

    /// Mutable access to the records of one collection.
    pub fn collection_mut(&mut self, kind: CollectionKind) -> &mut Vec<Record> {
        match kind {
            CollectionKind::Text => &mut self.text,
            CollectionKind::Binary => &mut self.binary,
            CollectionKind::Card => &mut self.cards,
            CollectionKind::Credential => &mut self.credentials,
        }
    }

    /// Total number of records across all collections.
    pub fn len(&self) -> usize {
        self.text.len() + self.binary.len() + self.cards.len() + self.credentials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ── Request bodies ──────────────────────────────────────────────

/// Body for register/login calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthRequest {
    pub username: String,
    pub password: String,
}

/// Body for storing a new record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreRequest {
    pub data: serde_json::Value,
    #[serde(default)]
    pub metadata: Metadata,
}

/// Body for updating an existing record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateRequest {
    pub record_id: String,
    pub data: serde_json::Value,
    #[serde(default)]
    pub metadata: Metadata,
}

/// Body for deleting a record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteRequest {
    pub record_id: String,
}

/// Body for device callback registration and unregistration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceRequest {
    pub socket_addr: String,
}

// ── Tests ───────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collection_parse_is_case_insensitive() {
        assert_eq!("text".parse::<CollectionKind>().unwrap(), CollectionKind::Text);
        assert_eq!("Cards".parse::<CollectionKind>().unwrap(), CollectionKind::Card);
        assert_eq!(
            "CREDENTIALS".parse::<CollectionKind>().unwrap(),
            CollectionKind::Credential
        );
        assert_eq!("Binary".parse::<CollectionKind>().unwrap(), CollectionKind::Binary);
    }

    #[test]
    fn collection_parse_rejects_unknown_names() {
        let err = "passwords".parse::<CollectionKind>().unwrap_err();
        assert_eq!(err.to_string(), "unknown collection: passwords");
    }

    #[test]
    fn collection_serde_uses_wire_names() {
        let json = serde_json::to_string(&CollectionKind::Credential).unwrap();
        assert_eq!(json, "\"credentials\"");
        let kind: CollectionKind = serde_json::from_str("\"cards\"").unwrap();
        assert_eq!(kind, CollectionKind::Card);
    }

    #[test]
    fn bundle_collection_accessors_map_to_the_right_lists() {
        let mut bundle = SyncBundle::default();
        bundle.collection_mut(CollectionKind::Card).push(Record {
            id: "r1".into(),
            username: "amy".into(),
            data: serde_json::json!({"number": "n"}),
            metadata: Metadata::new(),
        });

        assert_eq!(bundle.cards.len(), 1);
        assert_eq!(bundle.collection(CollectionKind::Card).len(), 1);
        assert!(bundle.collection(CollectionKind::Text).is_empty());
        assert_eq!(bundle.len(), 1);
        assert!(!bundle.is_empty());
    }

    #[test]
    fn record_metadata_defaults_to_empty_when_missing() {
        let record: Record = serde_json::from_str(
            r#"{"id":"r1","username":"amy","data":"hello"}"#,
        )
        .unwrap();
        assert!(record.metadata.is_empty());
    }
}
