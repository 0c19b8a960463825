//! Layout output schema and normalization of raw oracle output.

use crate::bundle::ContextBundle;
use crate::error::{Error, Result};
use crate::model::{
    parse_int_literal, Encoding, Evidence, FieldLayout, LayoutAnalysis, WireOffset, WireSize,
    VARIABLE_SENTINEL,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;

/// JSON schema every oracle response must conform to
pub fn layout_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "fields": {
                "type": "array",
                "description": "Every declared field, in wire order",
                "items": {
                    "type": "object",
                    "properties": {
                        "name": { "type": "string" },
                        "wireOffset": {
                            "type": "integer",
                            "description": "Byte offset within the fixed block, -1 if in the variable block"
                        },
                        "wireSize": {
                            "type": "integer",
                            "description": "Size in bytes, -1 if variable length"
                        },
                        "encoding": {
                            "type": "string",
                            "description": format!("One of: {}", Encoding::vocabulary())
                        },
                        "isVariable": { "type": "boolean" },
                        "nullBit": {
                            "type": "integer",
                            "description": "Power-of-two presence bit; omit if the field is not optional"
                        },
                        "notes": { "type": "string" }
                    },
                    "required": ["name", "wireOffset", "wireSize", "encoding", "isVariable"]
                }
            },
            "totalFixedSize": { "type": "integer" },
            "hasVariableSection": { "type": "boolean" },
            "variableSectionStart": { "type": "integer" },
            "nullBitMappings": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "bit": { "type": "string", "description": "Bit value, e.g. \"0x01\"" },
                        "fieldName": { "type": "string" }
                    },
                    "required": ["bit", "fieldName"]
                }
            },
            "notes": { "type": "string" }
        },
        "required": ["fields", "totalFixedSize", "hasVariableSection", "nullBitMappings"]
    })
}

/// Layout as returned by the oracle, before normalization
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawLayout {
    /// Field records
    pub fields: Vec<RawField>,
    /// Fixed block size
    #[serde(default)]
    pub total_fixed_size: i64,
    /// Variable section flag
    #[serde(default)]
    pub has_variable_section: bool,
    /// Variable section start
    #[serde(default)]
    pub variable_section_start: Option<i64>,
    /// Bit → field pairs
    #[serde(default)]
    pub null_bit_mappings: Vec<RawNullBit>,
    /// Overall note
    #[serde(default)]
    pub notes: Option<String>,
}

/// One raw field record
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawField {
    /// Field name
    pub name: String,
    /// Offset or `-1`
    #[serde(default = "sentinel")]
    pub wire_offset: i64,
    /// Size or `-1`
    #[serde(default = "sentinel")]
    pub wire_size: i64,
    /// Encoding tag
    pub encoding: String,
    /// Variable block flag
    #[serde(default)]
    pub is_variable: bool,
    /// Presence bit
    #[serde(default)]
    pub null_bit: Option<i64>,
    /// Note
    #[serde(default)]
    pub notes: Option<String>,
}

/// One raw bit mapping; the bit may arrive as a string or a number
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawNullBit {
    /// Bit value
    pub bit: Value,
    /// Field name
    pub field_name: String,
}

fn sentinel() -> i64 {
    VARIABLE_SENTINEL
}

/// Decodes a raw JSON value into a [`RawLayout`].
pub fn decode(entity: &str, value: Value) -> Result<RawLayout> {
    serde_json::from_value(value).map_err(|e| Error::malformed(entity, e.to_string()))
}

/// Converts a raw layout into a validated [`LayoutAnalysis`].
///
/// "No value" markers (`null`, empty strings, non-positive bits, negative
/// start offsets) become absent values, the bit mapping list folds into a
/// bit-keyed map, and every field is marked [`Evidence::Inferred`].
pub fn normalize(bundle: &ContextBundle, raw: RawLayout) -> Result<LayoutAnalysis> {
    let entity = bundle.entity.as_str();

    let mut fields = Vec::with_capacity(raw.fields.len());
    for field in raw.fields {
        let encoding: Encoding = field.encoding.parse().map_err(|e: String| {
            Error::malformed(entity, format!("field '{}': {e}", field.name))
        })?;
        fields.push(FieldLayout {
            name: field.name,
            wire_offset: WireOffset::from_raw(field.wire_offset),
            wire_size: WireSize::from_raw(field.wire_size),
            encoding,
            is_variable: field.is_variable,
            null_bit: field.null_bit.and_then(positive_bit),
            note: non_empty(field.notes),
            evidence: Evidence::Inferred,
        });
    }

    let mut null_bits = BTreeMap::new();
    for mapping in raw.null_bit_mappings {
        let Some(bit) = parse_bit(&mapping.bit) else {
            return Err(Error::malformed(
                entity,
                format!("unreadable bit {} for '{}'", mapping.bit, mapping.field_name),
            ));
        };
        if let Some(previous) = null_bits.get(&bit) {
            return Err(Error::malformed(
                entity,
                format!(
                    "bit {} mapped to both '{previous}' and '{}'",
                    mapping.bit, mapping.field_name
                ),
            ));
        }
        if null_bits.values().any(|name| *name == mapping.field_name) {
            return Err(Error::malformed(
                entity,
                format!("field '{}' mapped to more than one bit", mapping.field_name),
            ));
        }
        null_bits.insert(bit, mapping.field_name);
    }

    let analysis = LayoutAnalysis {
        entity: entity.to_string(),
        fields,
        total_fixed_size: u32::try_from(raw.total_fixed_size.max(0)).unwrap_or(u32::MAX),
        has_variable_section: raw.has_variable_section,
        variable_section_start: raw
            .variable_section_start
            .and_then(|v| u32::try_from(v).ok()),
        null_bits,
        notes: non_empty(raw.notes),
    };

    analysis.validate(bundle.field_names())?;
    Ok(analysis)
}

fn positive_bit(raw: i64) -> Option<u32> {
    u32::try_from(raw).ok().filter(|b| *b > 0)
}

fn parse_bit(value: &Value) -> Option<u32> {
    match value {
        Value::Number(n) => n.as_i64().and_then(positive_bit),
        Value::String(s) => parse_int_literal(s).and_then(positive_bit),
        _ => None,
    }
}

fn non_empty(text: Option<String>) -> Option<String> {
    text.map(|t| t.trim().to_string()).filter(|t| !t.is_empty())
}
