//! CBOR decode of `raw_metadata` into a `TokenDescriptor` (spec §4.3).
//!
//! Strict on structural shape (non-map root, missing required fields, or a
//! CBOR parse error all fail with `MalformedMetadata`); tolerant of unknown
//! fields, which are preserved opaque in `extra` rather than dropped.

use super::descriptor::{TokenDescriptor, TokenType};
use crate::error::GlyphError;
use ciborium::value::Value;
use std::collections::BTreeMap;

fn value_as_text(v: &Value) -> Option<String> {
    v.as_text().map(|s| s.to_string())
}

fn value_as_u64(v: &Value) -> Option<u64> {
    v.as_integer().and_then(|i| u64::try_from(i).ok())
}

fn reencode(v: &Value) -> Vec<u8> {
    let mut buf = Vec::new();
    let _ = ciborium::ser::into_writer(v, &mut buf);
    buf
}

pub fn decode(raw_metadata: &[u8]) -> Result<TokenDescriptor, GlyphError> {
    let root: Value = ciborium::de::from_reader(raw_metadata)
        .map_err(|e| GlyphError::MalformedMetadata(format!("cbor parse error: {e}")))?;

    let map = match &root {
        Value::Map(entries) => entries,
        _ => return Err(GlyphError::MalformedMetadata("root is not a map".into())),
    };

    let mut fields: BTreeMap<String, &Value> = BTreeMap::new();
    for (k, v) in map {
        if let Some(key) = value_as_text(k) {
            fields.insert(key, v);
        }
    }

    if fields.contains_key("p") {
        decode_v2(&fields)
    } else {
        decode_v1(&fields)
    }
}

fn decode_v1(fields: &BTreeMap<String, &Value>) -> Result<TokenDescriptor, GlyphError> {
    let type_str = fields
        .get("type")
        .and_then(|v| value_as_text(v))
        .ok_or_else(|| GlyphError::MalformedMetadata("missing required field 'type'".into()))?;

    let token_type = match type_str.as_str() {
        "fungible" => TokenType::Fungible,
        "non-fungible" => TokenType::NonFungible,
        "dmint" => TokenType::DMint,
        other => {
            return Err(GlyphError::MalformedMetadata(format!(
                "unrecognized v1 type '{other}'"
            )))
        }
    };

    let known = ["type", "ref", "name", "ticker", "decimals", "supply", "attrs", "icon_ref"];
    Ok(TokenDescriptor {
        token_type,
        ref_: fields.get("ref").and_then(|v| value_as_text(v)),
        name: fields.get("name").and_then(|v| value_as_text(v)),
        ticker: fields.get("ticker").and_then(|v| value_as_text(v)),
        decimals: fields.get("decimals").and_then(|v| value_as_u64(v)).map(|d| d as u32),
        supply: fields.get("supply").and_then(|v| value_as_u64(v)),
        protocols: Vec::new(),
        token_id: None,
        contract_ref: None,
        algorithm: None,
        difficulty: None,
        reward: None,
        icon_ref: fields.get("icon_ref").and_then(|v| value_as_text(v)),
        extra: extra_fields(fields, &known),
    })
}

fn decode_v2(fields: &BTreeMap<String, &Value>) -> Result<TokenDescriptor, GlyphError> {
    let protocols: Vec<u64> = match fields.get("p") {
        Some(Value::Array(items)) => items.iter().filter_map(value_as_u64).collect(),
        _ => {
            return Err(GlyphError::MalformedMetadata(
                "missing required field 'p' (protocol array)".into(),
            ))
        }
    };

    let token_type = TokenType::from_protocols(&protocols).ok_or_else(|| {
        GlyphError::MalformedMetadata(format!("no recognized protocol id in {protocols:?}"))
    })?;

    let known = [
        "p", "tokenID", "want_tokenID", "flags", "ticker", "name", "icon_ref",
        "contract_ref", "algorithm", "difficulty", "reward", "decimals", "supply",
    ];
    Ok(TokenDescriptor {
        token_type,
        ref_: None,
        name: fields.get("name").and_then(|v| value_as_text(v)),
        ticker: fields.get("ticker").and_then(|v| value_as_text(v)),
        decimals: fields.get("decimals").and_then(|v| value_as_u64(v)).map(|d| d as u32),
        supply: fields.get("supply").and_then(|v| value_as_u64(v)),
        protocols,
        token_id: fields.get("tokenID").and_then(|v| value_as_text(v)),
        contract_ref: fields.get("contract_ref").and_then(|v| value_as_text(v)),
        algorithm: fields.get("algorithm").and_then(|v| value_as_u64(v)),
        difficulty: fields.get("difficulty").and_then(|v| value_as_u64(v)),
        reward: fields.get("reward").and_then(|v| value_as_u64(v)),
        icon_ref: fields.get("icon_ref").and_then(|v| value_as_text(v)),
        extra: extra_fields(fields, &known),
    })
}

fn extra_fields(fields: &BTreeMap<String, &Value>, known: &[&str]) -> BTreeMap<String, Vec<u8>> {
    fields
        .iter()
        .filter(|(k, _)| !known.contains(&k.as_str()))
        .map(|(k, v)| (k.clone(), reencode(v)))
        .collect()
}
