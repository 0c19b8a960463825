//! Protocol entity and wire-layout data model.
//!
//! Entities ([`EnumEntity`], [`DataAggregate`], [`MessageEntity`]) are produced by
//! the extractor and never mutated afterwards. A [`LayoutAnalysis`] is produced
//! later by the inference engine and paired with its message by name, see
//! [`MessageEntity::resolved_fields`].

use crate::bundle::ContextBundle;
use crate::error::{Error, Result};
use serde::{Serialize, Serializer};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

/// Sentinel used by the layout schema for "variable / not applicable"
pub const VARIABLE_SENTINEL: i64 = -1;

/// Name-keyed lookup of accepted layouts
pub type LayoutIndex = BTreeMap<String, LayoutAnalysis>;

/// Identity shared by every protocol entity
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntityId {
    /// Simple type name, unique within a protocol version
    pub name: String,
    /// Declaring package
    pub namespace: String,
    /// Lower-cased relative directory, `root` for top-level files
    pub category: String,
    /// Source path relative to the scanned root
    pub source_path: String,
}

/// A protocol entity of any kind, borrowed from an extraction
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProtocolEntity<'a> {
    /// Enumeration
    Enum(&'a EnumEntity),
    /// Plain data aggregate
    Aggregate(&'a DataAggregate),
    /// Protocol message
    Message(&'a MessageEntity),
}

impl<'a> ProtocolEntity<'a> {
    /// Returns the identity of the entity
    pub fn id(&self) -> &'a EntityId {
        match *self {
            ProtocolEntity::Enum(e) => &e.id,
            ProtocolEntity::Aggregate(a) => &a.id,
            ProtocolEntity::Message(m) => &m.id,
        }
    }

    /// Returns the simple type name
    pub fn name(&self) -> &'a str {
        &self.id().name
    }
}

/// One enum constant
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EnumVariant {
    /// Symbolic name
    pub name: String,
    /// Explicit literal argument, or declaration index
    pub value: i64,
}

/// An enumeration type
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EnumEntity {
    /// Identity
    pub id: EntityId,
    /// Constants in declaration order
    pub variants: Vec<EnumVariant>,
}

/// A declared field of an aggregate or message
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Field {
    /// Field name
    pub name: String,
    /// Declared source type, whitespace-normalized
    pub declared_type: String,
    /// Carries an explicit `@Nullable` annotation
    pub nullable: bool,
    /// Initializer text from the field declaration
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_value: Option<String>,
    /// Upper bound recovered from validation code
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_length: Option<u32>,
}

impl Field {
    /// Creates a field with no default value or length bound
    pub fn new(name: impl Into<String>, declared_type: impl Into<String>, nullable: bool) -> Self {
        Self {
            name: name.into(),
            declared_type: declared_type.into(),
            nullable,
            default_value: None,
            max_length: None,
        }
    }
}

/// A plain data type that is not a message
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DataAggregate {
    /// Identity
    pub id: EntityId,
    /// Fields in declaration order
    pub fields: Vec<Field>,
    /// Import declarations
    pub imports: Vec<String>,
}

/// Layout constants declared on a message type
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PacketConstants {
    /// `PACKET_ID`
    pub packet_id: u32,
    /// `IS_COMPRESSED`
    pub is_compressed: bool,
    /// `NULLABLE_BIT_FIELD_SIZE`
    pub nullable_bit_field_size: u32,
    /// `FIXED_BLOCK_SIZE`
    pub fixed_block_size: u32,
    /// `VARIABLE_FIELD_COUNT`
    pub variable_field_count: u32,
    /// `VARIABLE_BLOCK_START`
    pub variable_block_start: u32,
    /// `MAX_SIZE`
    pub max_size: u64,
}

impl PacketConstants {
    /// The seven recognized constant names
    pub const NAMES: [&'static str; 7] = [
        "PACKET_ID",
        "IS_COMPRESSED",
        "NULLABLE_BIT_FIELD_SIZE",
        "FIXED_BLOCK_SIZE",
        "VARIABLE_FIELD_COUNT",
        "VARIABLE_BLOCK_START",
        "MAX_SIZE",
    ];

    /// Returns true if `name` is one of the recognized constants
    pub fn is_recognized(name: &str) -> bool {
        Self::NAMES.contains(&name)
    }

    /// Records a constant from its initializer literal.
    ///
    /// Unknown names and unparsable literals leave the set unchanged.
    pub fn apply(&mut self, name: &str, literal: &str) -> bool {
        let literal = literal.trim();
        if name == "IS_COMPRESSED" {
            return match literal {
                "true" => {
                    self.is_compressed = true;
                    true
                }
                "false" => {
                    self.is_compressed = false;
                    true
                }
                _ => false,
            };
        }

        let Some(value) = parse_int_literal(literal) else {
            return false;
        };
        let Ok(value) = u64::try_from(value) else {
            return false;
        };
        let narrow = u32::try_from(value).unwrap_or(u32::MAX);
        match name {
            "PACKET_ID" => self.packet_id = narrow,
            "NULLABLE_BIT_FIELD_SIZE" => self.nullable_bit_field_size = narrow,
            "FIXED_BLOCK_SIZE" => self.fixed_block_size = narrow,
            "VARIABLE_FIELD_COUNT" => self.variable_field_count = narrow,
            "VARIABLE_BLOCK_START" => self.variable_block_start = narrow,
            "MAX_SIZE" => self.max_size = value,
            _ => return false,
        }
        true
    }

    /// Message identifier formatted as `0xNN`
    pub fn packet_id_hex(&self) -> String {
        format!("0x{:02X}", self.packet_id)
    }
}

/// A protocol message type
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MessageEntity {
    /// Identity
    pub id: EntityId,
    /// Layout constants
    pub constants: PacketConstants,
    /// Fields in constructor (wire) order when available
    pub fields: Vec<Field>,
    /// Import declarations
    pub imports: Vec<String>,
    /// Inference input, absent when no deserialization routine exists
    #[serde(skip)]
    pub bundle: Option<ContextBundle>,
}

impl MessageEntity {
    /// Pairs each declared field with its layout record, if any.
    pub fn resolved_fields<'a>(
        &'a self,
        layout: Option<&'a LayoutAnalysis>,
    ) -> Vec<ResolvedField<'a>> {
        self.fields
            .iter()
            .map(|field| ResolvedField {
                field,
                layout: layout.and_then(|l| l.field(&field.name)),
            })
            .collect()
    }
}

/// A declared field with its optional layout record
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResolvedField<'a> {
    /// Declared field
    pub field: &'a Field,
    /// Layout facts, absent when inference failed or skipped the field
    pub layout: Option<&'a FieldLayout>,
}

/// Closed vocabulary of wire encodings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Encoding {
    /// Unsigned byte (also booleans and byte-backed enums)
    U8,
    /// Signed byte
    I8,
    /// 16-bit little-endian integer
    I16Le,
    /// 32-bit little-endian integer
    I32Le,
    /// 64-bit little-endian integer
    I64Le,
    /// 32-bit little-endian float
    F32Le,
    /// 64-bit little-endian float
    F64Le,
    /// Self-delimiting variable-length integer
    VarInt,
    /// 16-byte identifier
    Uuid,
    /// Fixed-length ASCII string of N bytes
    FixedAscii(u32),
    /// Length-prefixed ASCII string
    VarAscii,
    /// Length-prefixed UTF-8 string
    VarUtf8,
    /// Count-prefixed homogeneous array
    Array,
    /// Delegates to a nested type's deserializer
    Nested,
    /// 4-byte LE offset into the variable block
    OffsetPtr,
}

impl Encoding {
    /// Byte width when the encoding is fixed-size
    pub fn fixed_size(&self) -> Option<u32> {
        match self {
            Encoding::U8 | Encoding::I8 => Some(1),
            Encoding::I16Le => Some(2),
            Encoding::I32Le | Encoding::F32Le | Encoding::OffsetPtr => Some(4),
            Encoding::I64Le | Encoding::F64Le => Some(8),
            Encoding::Uuid => Some(16),
            Encoding::FixedAscii(n) => Some(*n),
            Encoding::VarInt
            | Encoding::VarAscii
            | Encoding::VarUtf8
            | Encoding::Array
            | Encoding::Nested => None,
        }
    }

    /// Every tag accepted by [`FromStr`], for schema descriptions
    pub fn vocabulary() -> &'static str {
        "u8, i8, i16le, i32le, i64le, f32le, f64le, varint, uuid, ascii[N], \
         varstring-ascii, varstring-utf8, array, nested, offset-ptr"
    }
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Encoding::U8 => f.write_str("u8"),
            Encoding::I8 => f.write_str("i8"),
            Encoding::I16Le => f.write_str("i16le"),
            Encoding::I32Le => f.write_str("i32le"),
            Encoding::I64Le => f.write_str("i64le"),
            Encoding::F32Le => f.write_str("f32le"),
            Encoding::F64Le => f.write_str("f64le"),
            Encoding::VarInt => f.write_str("varint"),
            Encoding::Uuid => f.write_str("uuid"),
            Encoding::FixedAscii(n) => write!(f, "ascii[{n}]"),
            Encoding::VarAscii => f.write_str("varstring-ascii"),
            Encoding::VarUtf8 => f.write_str("varstring-utf8"),
            Encoding::Array => f.write_str("array"),
            Encoding::Nested => f.write_str("nested"),
            Encoding::OffsetPtr => f.write_str("offset-ptr"),
        }
    }
}

impl FromStr for Encoding {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let tag = s.trim().to_ascii_lowercase().replace('_', "-");
        if let Some(n) = tag
            .strip_prefix("ascii[")
            .and_then(|rest| rest.strip_suffix(']'))
        {
            return n
                .trim()
                .parse()
                .map(Encoding::FixedAscii)
                .map_err(|_| format!("bad fixed ascii length in '{s}'"));
        }

        let encoding = match tag.as_str() {
            "u8" | "byte" | "bool" | "uint8" => Encoding::U8,
            "i8" | "sbyte" | "signed-byte" | "int8" => Encoding::I8,
            "i16le" | "int16le" | "u16le" => Encoding::I16Le,
            "i32le" | "int32le" | "u32le" => Encoding::I32Le,
            "i64le" | "int64le" | "u64le" => Encoding::I64Le,
            "f32le" | "float32le" => Encoding::F32Le,
            "f64le" | "float64le" => Encoding::F64Le,
            "varint" => Encoding::VarInt,
            "uuid" => Encoding::Uuid,
            "varstring-ascii" | "varascii" => Encoding::VarAscii,
            "varstring-utf8" | "varutf8" | "varstring" => Encoding::VarUtf8,
            "array" => Encoding::Array,
            "nested" => Encoding::Nested,
            "offset-ptr" | "offsetptr" => Encoding::OffsetPtr,
            _ => return Err(format!("unknown encoding tag '{s}'")),
        };
        Ok(encoding)
    }
}

impl Serialize for Encoding {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Byte offset of a field on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireOffset {
    /// Compile-time-constant offset within the fixed block
    At(u32),
    /// Lives in the variable block
    Variable,
}

/// Byte width of a field on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireSize {
    /// Fixed byte count
    Bytes(u32),
    /// Variable length
    Variable,
}

macro_rules! sentinel_conversions {
    ($ty:ident, $fixed:ident) => {
        impl $ty {
            /// Decodes a schema integer, treating any negative value as the sentinel
            pub fn from_raw(raw: i64) -> Self {
                match u32::try_from(raw) {
                    Ok(v) => $ty::$fixed(v),
                    Err(_) => $ty::Variable,
                }
            }

            /// Encodes as a schema integer with `-1` for the sentinel
            pub fn to_raw(self) -> i64 {
                match self {
                    $ty::$fixed(v) => i64::from(v),
                    $ty::Variable => VARIABLE_SENTINEL,
                }
            }
        }

        impl Serialize for $ty {
            fn serialize<S: Serializer>(
                &self,
                serializer: S,
            ) -> std::result::Result<S::Ok, S::Error> {
                serializer.serialize_i64(self.to_raw())
            }
        }
    };
}

sentinel_conversions!(WireOffset, At);
sentinel_conversions!(WireSize, Bytes);

/// How a layout fact was established
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Evidence {
    /// Read directly off the deserialization routine
    Verified,
    /// Committed by the inference oracle
    Inferred,
}

/// Wire layout of one field
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldLayout {
    /// Field name
    pub name: String,
    /// Byte offset
    pub wire_offset: WireOffset,
    /// Byte width
    pub wire_size: WireSize,
    /// Encoding tag
    pub encoding: Encoding,
    /// Located in the variable block
    pub is_variable: bool,
    /// Presence bit in the nullable bit field
    #[serde(skip_serializing_if = "Option::is_none")]
    pub null_bit: Option<u32>,
    /// Free-text note
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    /// Verified or inferred
    pub evidence: Evidence,
}

/// Recovered wire layout of one message
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LayoutAnalysis {
    /// Owning entity name
    pub entity: String,
    /// Field layouts in wire order
    pub fields: Vec<FieldLayout>,
    /// Size of the fixed block in bytes
    pub total_fixed_size: u32,
    /// A variable block follows the fixed block
    pub has_variable_section: bool,
    /// Start of the variable block
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variable_section_start: Option<u32>,
    /// Presence bit → field name
    pub null_bits: BTreeMap<u32, String>,
    /// Structural notes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl LayoutAnalysis {
    /// Looks up a field layout by name
    pub fn field(&self, name: &str) -> Option<&FieldLayout> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Number of field facts with the given evidence
    pub fn count_evidence(&self, evidence: Evidence) -> usize {
        self.fields.iter().filter(|f| f.evidence == evidence).count()
    }

    /// Checks the structural invariants every accepted layout must hold.
    ///
    /// - field names are a subset of `declared`, without repeats
    /// - every null bit is a power of two and no two fields share one
    /// - every bit-map entry has a power-of-two key, names a declared field at
    ///   most once, and agrees with that field's own bit when it has one
    pub fn validate<'a, I>(&self, declared: I) -> Result<()>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let declared: BTreeSet<&str> = declared.into_iter().collect();
        let mut seen_names = BTreeSet::new();
        let mut seen_bits = BTreeMap::new();

        for field in &self.fields {
            if !declared.contains(field.name.as_str()) {
                return Err(Error::invalid_layout(
                    &self.entity,
                    format!("field '{}' is not declared", field.name),
                ));
            }
            if !seen_names.insert(field.name.as_str()) {
                return Err(Error::invalid_layout(
                    &self.entity,
                    format!("field '{}' appears twice", field.name),
                ));
            }
            if let Some(bit) = field.null_bit {
                if !bit.is_power_of_two() {
                    return Err(Error::invalid_layout(
                        &self.entity,
                        format!("null bit {bit} of '{}' is not a power of two", field.name),
                    ));
                }
                if let Some(other) = seen_bits.insert(bit, field.name.as_str()) {
                    return Err(Error::invalid_layout(
                        &self.entity,
                        format!("null bit {bit} shared by '{other}' and '{}'", field.name),
                    ));
                }
            }
        }

        let mut mapped = BTreeSet::new();
        for (bit, name) in &self.null_bits {
            if !bit.is_power_of_two() {
                return Err(Error::invalid_layout(
                    &self.entity,
                    format!("null bit mapping {bit} is not a power of two"),
                ));
            }
            if !declared.contains(name.as_str()) {
                return Err(Error::invalid_layout(
                    &self.entity,
                    format!("null bit mapping {bit} names undeclared field '{name}'"),
                ));
            }
            if let Some(own) = self.field(name).and_then(|f| f.null_bit) {
                if own != *bit {
                    return Err(Error::invalid_layout(
                        &self.entity,
                        format!("null bit mapping {bit} disagrees with bit {own} of '{name}'"),
                    ));
                }
            }
            if !mapped.insert(name.as_str()) {
                return Err(Error::invalid_layout(
                    &self.entity,
                    format!("field '{name}' is mapped to more than one null bit"),
                ));
            }
        }

        Ok(())
    }
}

/// Parses a Java integer literal: decimal, hex, binary or octal, with
/// optional sign, underscores and `L` suffix.
pub fn parse_int_literal(text: &str) -> Option<i64> {
    let text = text.trim();
    let (negative, body) = match text.strip_prefix('-') {
        Some(rest) => (true, rest.trim_start()),
        None => (false, text.strip_prefix('+').unwrap_or(text)),
    };
    let body = body.trim_end_matches(['L', 'l']).replace('_', "");
    if body.is_empty() {
        return None;
    }

    let magnitude = if let Some(hex) = body.strip_prefix("0x").or_else(|| body.strip_prefix("0X")) {
        i64::from_str_radix(hex, 16).ok()?
    } else if let Some(bin) = body.strip_prefix("0b").or_else(|| body.strip_prefix("0B")) {
        i64::from_str_radix(bin, 2).ok()?
    } else if body.len() > 1 && body.starts_with('0') {
        i64::from_str_radix(&body[1..], 8).ok()?
    } else {
        body.parse::<i64>().ok()?
    };

    Some(if negative { -magnitude } else { magnitude })
}
