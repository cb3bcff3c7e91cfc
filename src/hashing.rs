//! Content hashes over canonical JSON.
//!
//! Objects are serialized with sorted keys and no whitespace so that two
//! semantically equal documents always produce the same digest, regardless of
//! field order in the source file.

use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt::Write;

use crate::core::Result;

pub fn to_canonical_json(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => Value::String(s.clone()).to_string(),
        Value::Array(items) => {
            let items: Vec<String> = items.iter().map(to_canonical_json).collect();
            format!("[{}]", items.join(","))
        }
        Value::Object(map) => {
            let sorted: BTreeMap<&String, String> = map
                .iter()
                .map(|(key, value)| (key, to_canonical_json(value)))
                .collect();
            let items: Vec<String> = sorted
                .into_iter()
                .map(|(key, value)| format!("{}:{}", Value::String(key.clone()), value))
                .collect();
            format!("{{{}}}", items.join(","))
        }
    }
}

/// SHA-256 of a string, lowercase hex.
pub fn hash_str(input: &str) -> String {
    let digest = Sha256::digest(input.as_bytes());
    let mut hex = String::with_capacity(digest.len() * 2);
    for byte in digest {
        let _ = write!(hex, "{:02x}", byte);
    }
    hex
}

pub fn hash_value(value: &Value) -> String {
    hash_str(&to_canonical_json(value))
}

/// Hashes any serializable document through its canonical JSON form.
pub fn hash_serialized<T: Serialize + ?Sized>(document: &T) -> Result<String> {
    let value = serde_json::to_value(document)?;
    Ok(hash_value(&value))
}
