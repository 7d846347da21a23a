//! Per-collection record payload codec.
//!
//! Wraps every write/read of a record's `data` field so the stored value
//! is never plaintext. Text and Binary payloads are one opaque string;
//! Card and Credential payloads are flat maps whose string fields are
//! each encrypted independently under their field name.

use serde_json::{Map, Value};

use super::cipher::{decrypt_str, encrypt_str};
use super::CryptoError;
use crate::model::CollectionKind;

/// Encrypt `data` for at-rest storage according to its collection.
///
/// Map payloads keep only their string fields: anything else is dropped
/// from the encoded result, not passed through. Callers that need
/// non-string values must render them as strings first.
pub fn encode_record(
    data: &Value,
    kind: CollectionKind,
    passphrase: &str,
) -> Result<Value, CryptoError> {
    transform_record(data, kind, &|value| encrypt_str(value, passphrase))
}

/// Reverse of [`encode_record`].
///
/// A wrong passphrase does not fail here — each field decrypts to
/// garbage, exactly as the buffer cipher behaves.
pub fn decode_record(
    data: &Value,
    kind: CollectionKind,
    passphrase: &str,
) -> Result<Value, CryptoError> {
    transform_record(data, kind, &|value| decrypt_str(value, passphrase))
}

/// Shared shape-dispatch for both directions. Any per-field cipher error
/// aborts the whole operation.
fn transform_record(
    data: &Value,
    kind: CollectionKind,
    apply: &dyn Fn(&str) -> Result<String, CryptoError>,
) -> Result<Value, CryptoError> {
    match kind {
        CollectionKind::Text | CollectionKind::Binary => {
            let value = data.as_str().ok_or(CryptoError::TypeMismatch {
                kind,
                expected: "a string value",
            })?;
            Ok(Value::String(apply(value)?))
        }
        CollectionKind::Card | CollectionKind::Credential => {
            let fields = data.as_object().ok_or(CryptoError::TypeMismatch {
                kind,
                expected: "an object of string fields",
            })?;
            let mut out = Map::with_capacity(fields.len());
            for (name, value) in fields {
                match value {
                    Value::String(s) => {
                        out.insert(name.clone(), Value::String(apply(s)?));
                    }
                    // Only string fields survive the codec; other types
                    // are dropped from the encoded map.
                    _ => {}
                }
            }
            Ok(Value::Object(out))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const KEY: &str = "storage-passphrase";

    #[test]
    fn text_roundtrip() {
        let plain = json!("meeting notes, do not share");
        let sealed = encode_record(&plain, CollectionKind::Text, KEY).unwrap();
        assert_ne!(sealed, plain);
        assert!(sealed.is_string());
        assert_eq!(decode_record(&sealed, CollectionKind::Text, KEY).unwrap(), plain);
    }

    #[test]
    fn binary_roundtrip() {
        let plain = json!("aGVsbG8gd29ybGQ=");
        let sealed = encode_record(&plain, CollectionKind::Binary, KEY).unwrap();
        assert_eq!(
            decode_record(&sealed, CollectionKind::Binary, KEY).unwrap(),
            plain
        );
    }

    #[test]
    fn credential_roundtrip_preserves_string_fields() {
        let plain = json!({"login": "u", "password": "p"});
        let sealed = encode_record(&plain, CollectionKind::Credential, KEY).unwrap();

        let map = sealed.as_object().unwrap();
        assert_eq!(map.len(), 2);
        assert_ne!(map["login"], json!("u"));
        assert_ne!(map["password"], json!("p"));

        let decoded = decode_record(&sealed, CollectionKind::Credential, KEY).unwrap();
        assert_eq!(decoded, plain);
    }

    #[test]
    fn card_roundtrip() {
        let plain = json!({
            "card_number": "4111111111111111",
            "cvv": "123",
            "expiration_date": "12/29",
        });
        let sealed = encode_record(&plain, CollectionKind::Card, KEY).unwrap();
        assert_eq!(decode_record(&sealed, CollectionKind::Card, KEY).unwrap(), plain);
    }

    #[test]
    fn non_string_fields_are_dropped_on_encode() {
        let plain = json!({"login": "u", "password": "p", "attempts": 7});
        let sealed = encode_record(&plain, CollectionKind::Credential, KEY).unwrap();

        let map = sealed.as_object().unwrap();
        assert_eq!(map.len(), 2);
        assert!(!map.contains_key("attempts"));

        let decoded = decode_record(&sealed, CollectionKind::Credential, KEY).unwrap();
        assert_eq!(decoded, json!({"login": "u", "password": "p"}));
    }

    #[test]
    fn text_rejects_non_string_payload() {
        let err = encode_record(&json!(42), CollectionKind::Text, KEY).unwrap_err();
        assert!(matches!(err, CryptoError::TypeMismatch { .. }));
        assert_eq!(err.to_string(), "text payload must be a string value");
    }

    #[test]
    fn card_rejects_non_object_payload() {
        let err = encode_record(&json!("4111"), CollectionKind::Card, KEY).unwrap_err();
        assert!(matches!(err, CryptoError::TypeMismatch { .. }));
    }

    #[test]
    fn empty_string_field_aborts_the_whole_encode() {
        let plain = json!({"login": "u", "password": ""});
        let err = encode_record(&plain, CollectionKind::Credential, KEY).unwrap_err();
        assert!(matches!(err, CryptoError::EmptyData));
    }

    #[test]
    fn wrong_key_decodes_to_mismatching_values() {
        let plain = json!({"login": "u", "password": "p"});
        let sealed = encode_record(&plain, CollectionKind::Credential, KEY).unwrap();
        let decoded = decode_record(&sealed, CollectionKind::Credential, "other-key").unwrap();
        assert_ne!(decoded, plain);
    }
}
