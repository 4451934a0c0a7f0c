//! Field-name transcoding between internal documents and the store's wire format.
//!
//! Internal records serialize their fields in PascalCase (`EncVaultKey`); the
//! remote store speaks snake_case (`enc_vault_key`). The mapping is a bijection
//! between the two key grammars below, so `revert(convert(x)) == x` for every
//! document `convert` accepts.
//!
//! - PascalCase key: an ASCII uppercase letter followed by ASCII letters and digits.
//! - snake_case key: an ASCII lowercase letter followed by lowercase letters,
//!   digits and underscores, where every underscore is followed by a lowercase letter.
//!
//! Keys outside the grammar are rejected with `InvalidInput`.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::{Error, Result};

/// Convert one PascalCase key to snake_case.
pub fn to_snake_key(key: &str) -> Result<String> {
    let mut chars = key.chars();
    let first = chars
        .next()
        .ok_or_else(|| Error::InvalidInput("Empty field name".to_string()))?;
    if !first.is_ascii_uppercase() {
        return Err(Error::InvalidInput(format!(
            "Field name is not PascalCase: {}",
            key
        )));
    }

    let mut out = String::with_capacity(key.len() + 4);
    out.push(first.to_ascii_lowercase());
    for c in chars {
        if c.is_ascii_uppercase() {
            out.push('_');
            out.push(c.to_ascii_lowercase());
        } else if c.is_ascii_lowercase() || c.is_ascii_digit() {
            out.push(c);
        } else {
            return Err(Error::InvalidInput(format!(
                "Field name is not PascalCase: {}",
                key
            )));
        }
    }
    Ok(out)
}

/// Convert one snake_case key back to PascalCase.
pub fn to_pascal_key(key: &str) -> Result<String> {
    let invalid = || Error::InvalidInput(format!("Field name is not snake_case: {}", key));

    let mut chars = key.chars().peekable();
    let first = chars
        .next()
        .ok_or_else(|| Error::InvalidInput("Empty field name".to_string()))?;
    if !first.is_ascii_lowercase() {
        return Err(invalid());
    }

    let mut out = String::with_capacity(key.len());
    out.push(first.to_ascii_uppercase());
    while let Some(c) = chars.next() {
        match c {
            '_' => match chars.next() {
                Some(next) if next.is_ascii_lowercase() => out.push(next.to_ascii_uppercase()),
                _ => return Err(invalid()),
            },
            c if c.is_ascii_lowercase() || c.is_ascii_digit() => out.push(c),
            _ => return Err(invalid()),
        }
    }
    Ok(out)
}

/// Rewrite every object key in `value` from PascalCase to snake_case.
///
/// Arrays are walked element by element; scalar values are untouched.
pub fn convert(value: &Value) -> Result<Value> {
    rewrite(value, &to_snake_key)
}

/// Rewrite every object key in `value` from snake_case to PascalCase.
pub fn revert(value: &Value) -> Result<Value> {
    rewrite(value, &to_pascal_key)
}

/// Serialize a record and convert its field names to the wire convention.
///
/// # Errors
/// - `Serialization` if the record cannot be encoded
/// - `InvalidInput` if a field name falls outside the PascalCase grammar
pub fn to_wire<T: Serialize>(record: &T) -> Result<Value> {
    let value = serde_json::to_value(record).map_err(|e| Error::Serialization(e.to_string()))?;
    convert(&value)
}

/// Parse a record read from the wire.
///
/// # Errors
/// - `Corrupt` if the document does not revert cleanly or does not match `T`
pub fn from_wire<T: DeserializeOwned>(value: &Value) -> Result<T> {
    let value = revert(value).map_err(|e| Error::Corrupt(e.to_string()))?;
    serde_json::from_value(value).map_err(|e| Error::Corrupt(format!("Malformed record: {}", e)))
}

fn rewrite(value: &Value, key_fn: &dyn Fn(&str) -> Result<String>) -> Result<Value> {
    match value {
        Value::Object(map) => {
            let mut out = Map::with_capacity(map.len());
            for (key, inner) in map {
                out.insert(key_fn(key)?, rewrite(inner, key_fn)?);
            }
            Ok(Value::Object(out))
        }
        Value::Array(items) => items
            .iter()
            .map(|item| rewrite(item, key_fn))
            .collect::<Result<Vec<_>>>()
            .map(Value::Array),
        scalar => Ok(scalar.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn test_key_conversion() {
        assert_eq!(to_snake_key("EncPriKey").unwrap(), "enc_pri_key");
        assert_eq!(to_snake_key("P2c").unwrap(), "p2c");
        assert_eq!(to_snake_key("UUID").unwrap(), "u_u_i_d");
        assert_eq!(to_pascal_key("u_u_i_d").unwrap(), "UUID");
        assert_eq!(to_pascal_key("enc_vault_key").unwrap(), "EncVaultKey");
    }

    #[test]
    fn test_rejects_keys_outside_grammar() {
        assert!(to_snake_key("encPriKey").is_err());
        assert!(to_snake_key("Enc_Key").is_err());
        assert!(to_snake_key("").is_err());
        assert!(to_pascal_key("Enc").is_err());
        assert!(to_pascal_key("enc__key").is_err());
        assert!(to_pascal_key("enc_").is_err());
        assert!(to_pascal_key("enc_1").is_err());
    }

    #[test]
    fn test_convert_nested_document() {
        let doc = json!({
            "EncPriKey": { "Kid": "kid", "Iv": "00ff", "Data": "abcd" },
            "EncryptedBy": "mp",
            "Members": [ { "IsAdmin": true }, 7, "Plain" ],
        });

        let wire = convert(&doc).unwrap();
        assert_eq!(wire["enc_pri_key"]["kid"], "kid");
        assert_eq!(wire["encrypted_by"], "mp");
        assert_eq!(wire["members"][0]["is_admin"], true);
        assert_eq!(wire["members"][2], "Plain");

        assert_eq!(revert(&wire).unwrap(), doc);
    }

    #[derive(Debug, PartialEq, serde::Serialize, serde::Deserialize)]
    #[serde(rename_all = "PascalCase", deny_unknown_fields)]
    struct Grant {
        member_id: String,
        wrapped_key: String,
    }

    #[test]
    fn test_record_wire_round_trip() {
        let grant = Grant {
            member_id: "u1".to_string(),
            wrapped_key: "00ff".to_string(),
        };

        let wire = to_wire(&grant).unwrap();
        assert_eq!(wire, json!({"member_id": "u1", "wrapped_key": "00ff"}));
        assert_eq!(from_wire::<Grant>(&wire).unwrap(), grant);

        let tampered = json!({"member_id": "u1", "wrapped_key": "00ff", "extra_field": 1});
        assert!(matches!(from_wire::<Grant>(&tampered), Err(Error::Corrupt(_))));
        assert!(matches!(
            from_wire::<Grant>(&json!({"MemberId": "u1"})),
            Err(Error::Corrupt(_))
        ));
    }

    fn pascal_key() -> impl Strategy<Value = String> {
        "[A-Z][A-Za-z0-9]{0,12}"
    }

    fn document() -> impl Strategy<Value = Value> {
        let leaf = prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::from),
            any::<i64>().prop_map(Value::from),
            "[ -~]{0,8}".prop_map(Value::from),
        ];
        leaf.prop_recursive(3, 24, 4, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
                prop::collection::btree_map(pascal_key(), inner, 0..4)
                    .prop_map(|m| Value::Object(m.into_iter().collect())),
            ]
        })
    }

    proptest! {
        #[test]
        fn prop_key_round_trip(key in pascal_key()) {
            let snake = to_snake_key(&key).unwrap();
            prop_assert_eq!(to_pascal_key(&snake).unwrap(), key);
        }

        #[test]
        fn prop_document_round_trip(doc in document()) {
            let wire = convert(&doc).unwrap();
            prop_assert_eq!(revert(&wire).unwrap(), doc);
        }
    }
}
