//! Deterministic layout recovery from a `deserialize` routine.
//!
//! Decompiled deserializers follow a small number of shapes: a flags byte read
//! first, fixed-offset primitive reads relative to the `offset` parameter,
//! presence checks of the form `if ((nullBits & M) != 0)`, and variable-block
//! reads addressed through offset pointers
//! (`int p = offset + B + buf.getIntLE(offset + K)`). The matcher walks the
//! routine statement by statement and turns every read it recognizes into a
//! [`Evidence::Verified`] field fact.

use crate::bundle::ContextBundle;
use crate::error::{Error, Result};
use crate::model::{
    parse_int_literal, Encoding, Evidence, FieldLayout, LayoutAnalysis, WireOffset, WireSize,
};
use crate::source::lexer::{self, find_matching, split_top_level, trim_range};
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::OnceLock;
use tracing::trace;

/// Primitive buffer reads and their encodings
const PRIMITIVES: &[(&str, Encoding)] = &[
    ("getByte", Encoding::I8),
    ("getUnsignedByte", Encoding::U8),
    ("getShortLE", Encoding::I16Le),
    ("getUnsignedShortLE", Encoding::I16Le),
    ("getIntLE", Encoding::I32Le),
    ("getUnsignedIntLE", Encoding::I32Le),
    ("getLongLE", Encoding::I64Le),
    ("getFloatLE", Encoding::F32Le),
    ("getDoubleLE", Encoding::F64Le),
];

fn guard_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"([A-Za-z_$][\w$]*)\s*(?:\[\s*(\d+)\s*\])?\s*&\s*(0[xX][0-9A-Fa-f]+|\d+)\s*\)\s*!=\s*0")
            .expect("valid regex")
    })
}

fn pointer_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^(?:final\s+)?int\s+([\w$]+)\s*=\s*([\w$]+)\s*\+\s*(0[xX][0-9A-Fa-f]+|\d+)\s*\+\s*[\w$]+\s*\.\s*getIntLE\s*\(",
        )
        .expect("valid regex")
    })
}

fn field_assign_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?s)^([\w$]+)\s*\.\s*([\w$]+)\s*=([^=].*)$").expect("valid regex")
    })
}

fn local_decl_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?s)^(?:final\s+)?[\w$.]+(?:\s*<[^=]*>)?(?:\s*\[\s*\])*\s+([\w$]+)\s*=([^=].*)$")
            .expect("valid regex")
    })
}

fn array_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"\bnew\s+[\w$.]+(?:\s*<[^()]*>)?\s*\[|\bnew\s+[\w$.]*(?:Map|List|Set)\b|\bread(?:Bytes|ByteArray)\s*\(",
        )
        .expect("valid regex")
    })
}

/// A call found in an expression: its arguments and the index past `)`
struct Call {
    receiver: Option<String>,
    args: Vec<String>,
    end: usize,
}

fn call_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?:\b([\w$]+)\s*\.\s*)?\b([\w$]+)\s*\(").expect("valid regex")
    })
}

/// Finds the first call to `name` in `expr` (masked text).
fn find_call(expr: &str, name: &str) -> Option<Call> {
    let caps = call_re().captures_iter(expr).find(|c| &c[2] == name)?;
    let whole = caps.get(0)?;
    let open = whole.end() - 1;
    let close = find_matching(expr, open, b'(', b')')?;
    let args = split_top_level(expr, open + 1..close, b',', false)
        .into_iter()
        .map(|r| expr[r].to_string())
        .collect();
    Some(Call {
        receiver: caps.get(1).map(|m| m.as_str().to_string()),
        args,
        end: close + 1,
    })
}

/// How a value was read off the wire
#[derive(Debug, Clone, PartialEq)]
enum Read {
    Fixed {
        at: u32,
        encoding: Encoding,
        size: Option<u32>,
    },
    Variable {
        encoding: Encoding,
        size: Option<u32>,
        pointer: Option<u32>,
    },
}

/// An offset pointer slot in the fixed block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OffsetPointer {
    /// Fixed-block offset of the 4-byte pointer
    pub slot: u32,
    /// Start of the variable block the pointer indexes into
    pub base: u32,
}

/// Raw outcome of scanning one routine
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PatternScan {
    /// Verified facts, in wire order
    pub facts: Vec<FieldLayout>,
    /// Offset pointers, by local variable name
    pub pointers: BTreeMap<String, OffsetPointer>,
    /// Declared fields without a fact
    pub missing: Vec<String>,
}

impl PatternScan {
    /// Returns true if every declared field was resolved
    pub fn is_complete(&self) -> bool {
        self.missing.is_empty()
    }

    /// Builds a full analysis; fails with [`Error::Unresolved`] unless complete.
    pub fn into_analysis(self, bundle: &ContextBundle) -> Result<LayoutAnalysis> {
        if !self.is_complete() {
            return Err(Error::Unresolved {
                entity: bundle.entity.clone(),
                missing: self.missing,
            });
        }

        let constants = bundle.constants;
        let fixed_end = self
            .facts
            .iter()
            .filter_map(|f| match (f.wire_offset, f.wire_size) {
                (WireOffset::At(at), WireSize::Bytes(size)) => Some(at + size),
                (WireOffset::At(at), WireSize::Variable) => Some(at),
                _ => None,
            })
            .chain(self.pointers.values().map(|p| p.slot + 4))
            .max()
            .unwrap_or(0)
            .max(constants.nullable_bit_field_size);
        let total_fixed_size = if constants.fixed_block_size > 0 {
            constants.fixed_block_size
        } else {
            fixed_end
        };

        let has_variable_section =
            self.facts.iter().any(|f| f.is_variable) || constants.variable_field_count > 0;
        let variable_section_start = has_variable_section.then(|| {
            if constants.variable_block_start > 0 {
                constants.variable_block_start
            } else {
                self.pointers
                    .values()
                    .map(|p| p.base)
                    .next()
                    .unwrap_or(total_fixed_size)
            }
        });

        let null_bits = self
            .facts
            .iter()
            .filter_map(|f| f.null_bit.map(|bit| (bit, f.name.clone())))
            .collect();

        let notes = (!self.pointers.is_empty()).then(|| {
            let slots: Vec<String> = self
                .pointers
                .values()
                .map(|p| p.slot.to_string())
                .collect();
            format!("offset pointers at fixed offsets {}", slots.join(", "))
        });

        let analysis = LayoutAnalysis {
            entity: bundle.entity.clone(),
            fields: self.facts,
            total_fixed_size,
            has_variable_section,
            variable_section_start,
            null_bits,
            notes,
        };
        analysis.validate(bundle.field_names())?;
        Ok(analysis)
    }
}

/// Deterministic pattern matcher
#[derive(Debug, Clone, Copy, Default)]
pub struct PatternMatcher;

impl PatternMatcher {
    /// Creates a new matcher
    pub fn new() -> Self {
        Self
    }

    /// Scans a bundle's `deserialize` routine for verified field facts.
    pub fn scan(&self, bundle: &ContextBundle) -> PatternScan {
        let masked = lexer::mask(&bundle.deserialize);
        let Some((params, body)) = routine_parts(&masked) else {
            return PatternScan {
                missing: bundle.field_names().map(String::from).collect(),
                ..PatternScan::default()
            };
        };

        let mut walker = Walker {
            offset_var: params.get(1).cloned().unwrap_or_else(|| "offset".to_string()),
            declared: bundle.field_names().collect(),
            flags: BTreeSet::new(),
            locals: BTreeMap::new(),
            pointers: BTreeMap::new(),
            facts: Vec::new(),
        };
        walker.walk(&masked, body);

        let mut scan = walker.finish(bundle.constants.fixed_block_size);
        scan.missing = bundle
            .field_names()
            .filter(|name| !scan.facts.iter().any(|f| f.name == *name))
            .map(String::from)
            .collect();
        trace!(
            "{}: {} verified fact(s), {} missing",
            bundle.entity,
            scan.facts.len(),
            scan.missing.len()
        );
        scan
    }
}

/// Parameter names and body range of the routine
fn routine_parts(masked: &str) -> Option<(Vec<String>, std::ops::Range<usize>)> {
    let call = find_call(masked, crate::bundle::DESERIALIZE)?;
    let params = call
        .args
        .iter()
        .filter_map(|p| {
            let p = p.trim();
            let start = p
                .rfind(|c: char| !(c.is_ascii_alphanumeric() || c == '_' || c == '$'))
                .map_or(0, |i| i + 1);
            (start < p.len()).then(|| p[start..].to_string())
        })
        .collect();
    let open = call.end + masked[call.end..].find('{')?;
    let close = find_matching(masked, open, b'{', b'}')?;
    Some((params, open + 1..close))
}

struct Walker<'a> {
    offset_var: String,
    declared: BTreeSet<&'a str>,
    flags: BTreeSet<String>,
    locals: BTreeMap<String, Read>,
    pointers: BTreeMap<String, OffsetPointer>,
    facts: Vec<(String, Read, Option<u32>)>,
}

impl<'a> Walker<'a> {
    fn walk(&mut self, masked: &str, body: std::ops::Range<usize>) {
        let bytes = masked.as_bytes();
        let mut guards: Vec<Option<u32>> = Vec::new();
        let mut start = body.start;
        let mut i = body.start;

        while i < body.end {
            match bytes[i] {
                b'(' => match find_matching(masked, i, b'(', b')') {
                    Some(close) => i = close + 1,
                    None => return,
                },
                b'{' => {
                    let header = &masked[trim_range(masked, start..i)];
                    guards.push(self.guard(header));
                    i += 1;
                    start = i;
                }
                b'}' => {
                    guards.pop();
                    i += 1;
                    start = i;
                }
                b';' => {
                    let range = trim_range(masked, start..i);
                    let guard = guards.iter().rev().find_map(|g| *g);
                    self.statement(&masked[range], guard);
                    i += 1;
                    start = i;
                }
                _ => i += 1,
            }
        }
    }

    /// Presence bit tested by a condition, if any
    fn guard(&self, condition: &str) -> Option<u32> {
        let caps = guard_re().captures(condition)?;
        let var = &caps[1];
        let lower = var.to_ascii_lowercase();
        let is_flags = self.flags.contains(var) || lower.contains("null") || lower.contains("flag");
        if !is_flags {
            return None;
        }
        let index: u32 = caps.get(2).map_or(Some(0), |m| m.as_str().parse().ok())?;
        let mask = u32::try_from(parse_int_literal(&caps[3])?).ok()?;
        mask.checked_shl(index.checked_mul(8)?).filter(|bit| bit.is_power_of_two())
    }

    fn statement(&mut self, stmt: &str, mut guard: Option<u32>) {
        let mut stmt = stmt.trim();
        if let Some(rest) = stmt.strip_prefix("else") {
            if !rest.starts_with(|c: char| c.is_ascii_alphanumeric() || c == '_') {
                stmt = rest.trim_start();
                guard = None;
            }
        }
        if stmt.starts_with("if") && stmt[2..].trim_start().starts_with('(') {
            let open = stmt.len() - stmt[2..].trim_start().len();
            let Some(close) = find_matching(stmt, open, b'(', b')') else {
                return;
            };
            if let Some(bit) = self.guard(&stmt[open..=close]) {
                guard = Some(bit);
            }
            stmt = stmt[close + 1..].trim_start();
        }
        if stmt.is_empty() {
            return;
        }
        trace!("statement: {}", stmt);

        if let Some(caps) = pointer_re().captures(stmt) {
            if &caps[2] == self.offset_var.as_str() {
                if let (Some(base), Some(call)) = (
                    parse_int_literal(&caps[3]).and_then(|b| u32::try_from(b).ok()),
                    find_call(stmt, "getIntLE"),
                ) {
                    if let Some(slot) = call.args.first().and_then(|a| self.position(a)) {
                        self.pointers
                            .insert(caps[1].to_string(), OffsetPointer { slot, base });
                        return;
                    }
                }
            }
        }

        if let Some(caps) = field_assign_re().captures(stmt) {
            let name = &caps[2];
            if self.declared.contains(name) && !self.facts.iter().any(|(n, _, _)| n == name) {
                let rhs = caps[3].trim();
                let read = self
                    .locals
                    .get(rhs)
                    .cloned()
                    .or_else(|| self.classify(rhs));
                if let Some(read) = read {
                    self.facts.push((name.to_string(), read, guard));
                }
            }
            return;
        }

        if let Some(caps) = local_decl_re().captures(stmt) {
            let name = caps[1].to_string();
            let rhs = caps[2].trim();
            if let Some(read) = self.classify(rhs) {
                if matches!(read, Read::Fixed { at: 0, .. }) && self.facts.is_empty() {
                    self.flags.insert(name.clone());
                }
                self.locals.insert(name, read);
            }
        }
    }

    /// Constant position `offset` / `offset + K`
    fn position(&self, arg: &str) -> Option<u32> {
        let arg = arg.trim();
        if arg == self.offset_var {
            return Some(0);
        }
        let (var, k) = arg.split_once('+')?;
        if var.trim() != self.offset_var {
            return None;
        }
        u32::try_from(parse_int_literal(k)?).ok()
    }

    fn pointer_slot(&self, arg: &str) -> Option<u32> {
        self.pointers.get(arg.trim()).map(|p| p.slot)
    }

    /// Classifies the expression that produces a value
    fn classify(&self, expr: &str) -> Option<Read> {
        if array_re().is_match(expr) {
            let pointer = find_call(expr, "peek")
                .and_then(|c| c.args.get(1).and_then(|a| self.pointer_slot(a)));
            return Some(Read::Variable {
                encoding: Encoding::Array,
                size: None,
                pointer,
            });
        }

        if let Some(call) = find_call(expr, "readVarString") {
            let encoding = if call.args.iter().any(|a| a.contains("ASCII")) {
                Encoding::VarAscii
            } else {
                Encoding::VarUtf8
            };
            return Some(Read::Variable {
                encoding,
                size: None,
                pointer: call.args.get(1).and_then(|a| self.pointer_slot(a)),
            });
        }

        if let Some(call) = find_call(expr, "readFixedAsciiString") {
            let len = call
                .args
                .get(2)
                .and_then(|a| parse_int_literal(a))
                .and_then(|n| u32::try_from(n).ok())?;
            return Some(self.sized(&call, Encoding::FixedAscii(len), Some(len)));
        }

        if let Some(call) = find_call(expr, "readUUID") {
            return Some(self.sized(&call, Encoding::Uuid, Some(16)));
        }

        if let Some(call) = find_call(expr, "deserialize") {
            let nested = call
                .receiver
                .as_deref()
                .is_some_and(|r| r.starts_with(|c: char| c.is_ascii_uppercase()));
            if nested {
                return Some(self.sized(&call, Encoding::Nested, None));
            }
        }

        if let Some(call) = find_call(expr, "fromValue") {
            let inner = call.args.first().and_then(|a| self.primitive(a))?;
            return Some(match inner {
                Read::Fixed { at, encoding, size } => {
                    let encoding = match encoding {
                        Encoding::I8 => Encoding::U8,
                        other => other,
                    };
                    Read::Fixed { at, encoding, size }
                }
                other => other,
            });
        }

        if let Some(call) = find_call(expr, "peek").filter(|c| c.receiver.as_deref() == Some("VarInt"))
        {
            return Some(match call.args.get(1).and_then(|a| self.position(a)) {
                Some(at) => Read::Fixed {
                    at,
                    encoding: Encoding::VarInt,
                    size: None,
                },
                None => Read::Variable {
                    encoding: Encoding::VarInt,
                    size: None,
                    pointer: None,
                },
            });
        }

        self.primitive(expr)
    }

    /// A PacketIO-style read `(buf, position, ...)`
    fn sized(&self, call: &Call, encoding: Encoding, size: Option<u32>) -> Read {
        let arg = call.args.get(1).map(String::as_str).unwrap_or_default();
        match self.position(arg) {
            Some(at) => Read::Fixed { at, encoding, size },
            None => Read::Variable {
                encoding,
                size,
                pointer: self.pointer_slot(arg),
            },
        }
    }

    fn primitive(&self, expr: &str) -> Option<Read> {
        for (name, encoding) in PRIMITIVES {
            let Some(call) = find_call(expr, name) else {
                continue;
            };
            let arg = call.args.first()?;
            let at = self.position(arg)?;
            let boolean = *name == "getByte" && expr[call.end..].trim_start().starts_with("!= 0");
            let encoding = if boolean { Encoding::U8 } else { *encoding };
            return Some(Read::Fixed {
                at,
                encoding,
                size: encoding.fixed_size(),
            });
        }
        None
    }

    /// Orders facts (fixed by offset, then variable in read order) and sizes
    /// nested fixed fields by the distance to the next known boundary.
    fn finish(self, fixed_block_size: u32) -> PatternScan {
        let mut boundaries: BTreeSet<u32> = self
            .facts
            .iter()
            .filter_map(|(_, read, _)| match read {
                Read::Fixed { at, .. } => Some(*at),
                Read::Variable { .. } => None,
            })
            .chain(self.pointers.values().map(|p| p.slot))
            .collect();
        if fixed_block_size > 0 {
            boundaries.insert(fixed_block_size);
        }

        let mut fixed = Vec::new();
        let mut variable = Vec::new();
        for (name, read, null_bit) in self.facts {
            match read {
                Read::Fixed { at, encoding, size } => {
                    let size = size.or_else(|| {
                        (encoding == Encoding::Nested)
                            .then(|| boundaries.range(at.saturating_add(1)..).next().map(|b| b - at))
                            .flatten()
                    });
                    fixed.push(FieldLayout {
                        name,
                        wire_offset: WireOffset::At(at),
                        wire_size: size.map_or(WireSize::Variable, WireSize::Bytes),
                        encoding,
                        is_variable: false,
                        null_bit,
                        note: None,
                        evidence: Evidence::Verified,
                    });
                }
                Read::Variable {
                    encoding,
                    size,
                    pointer,
                } => variable.push(FieldLayout {
                    name,
                    wire_offset: WireOffset::Variable,
                    wire_size: size.map_or(WireSize::Variable, WireSize::Bytes),
                    encoding,
                    is_variable: true,
                    null_bit,
                    note: pointer.map(|slot| format!("offset pointer at {slot}")),
                    evidence: Evidence::Verified,
                }),
            }
        }
        fixed.sort_by_key(|f| f.wire_offset.to_raw());
        fixed.extend(variable);

        PatternScan {
            facts: fixed,
            pointers: self.pointers,
            missing: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Field, PacketConstants};
    use pretty_assertions::assert_eq;

    fn bundle(fields: Vec<Field>, constants: PacketConstants, deserialize: &str) -> ContextBundle {
        ContextBundle {
            entity: "Sample".into(),
            namespace: "p".into(),
            constants,
            constant_decls: Vec::new(),
            fields,
            deserialize: deserialize.to_string(),
            helpers: Vec::new(),
            helper_calls: BTreeSet::new(),
            nested_refs: BTreeSet::new(),
        }
    }

    #[test]
    fn test_optional_string_scenario() {
        let constants = PacketConstants {
            packet_id: 3,
            nullable_bit_field_size: 1,
            fixed_block_size: 9,
            ..PacketConstants::default()
        };
        let bundle = bundle(
            vec![Field::new("id", "int", false), Field::new("name", "String", true)],
            constants,
            r#"public static Sample deserialize(@Nonnull ByteBuf buf, int offset) {
        byte nullBits = buf.getByte(offset);
        Sample obj = new Sample();
        obj.id = buf.getIntLE(offset + 1);
        if ((nullBits & 1) != 0) {
            int varPos0 = offset + 9 + buf.getIntLE(offset + 5);
            int nameLen = VarInt.peek(buf, varPos0);
            if (nameLen < 0) {
                throw ProtocolException.negativeLength("Name", nameLen);
            }
            obj.name = PacketIO.readVarString(buf, varPos0, PacketIO.UTF8);
        }
        return obj;
    }"#,
        );

        let analysis = PatternMatcher::new().scan(&bundle).into_analysis(&bundle).unwrap();
        let id = analysis.field("id").unwrap();
        assert_eq!(id.wire_offset, WireOffset::At(1));
        assert_eq!(id.wire_size, WireSize::Bytes(4));
        assert_eq!(id.encoding, Encoding::I32Le);
        assert!(!id.is_variable);
        assert_eq!(id.null_bit, None);

        let name = analysis.field("name").unwrap();
        assert!(name.is_variable);
        assert_eq!(name.null_bit, Some(1));
        assert_eq!(name.wire_offset.to_raw(), -1);
        assert_eq!(name.wire_size.to_raw(), -1);
        assert_eq!(name.encoding, Encoding::VarUtf8);
        assert_eq!(name.note.as_deref(), Some("offset pointer at 5"));

        assert_eq!(analysis.total_fixed_size, 9);
        assert!(analysis.has_variable_section);
        assert_eq!(analysis.variable_section_start, Some(9));
        assert_eq!(analysis.null_bits.get(&1).map(String::as_str), Some("name"));
        assert_eq!(analysis.count_evidence(Evidence::Verified), 2);
    }

    #[test]
    fn test_fixed_reads_and_nested_sizes() {
        let bundle = bundle(
            vec![
                Field::new("flag", "boolean", false),
                Field::new("mode", "GameMode", false),
                Field::new("pos", "Position", true),
                Field::new("uuid", "UUID", false),
                Field::new("tag", "String", false),
                Field::new("speed", "double", false),
            ],
            PacketConstants {
                fixed_block_size: 55,
                ..PacketConstants::default()
            },
            r#"public static Sample deserialize(ByteBuf buf, int offset) {
        byte nullBits = buf.getByte(offset);
        Sample obj = new Sample();
        obj.flag = buf.getByte(offset + 1) != 0;
        obj.mode = GameMode.fromValue(buf.getByte(offset + 2));
        if ((nullBits & 0x2) != 0) obj.pos = Position.deserialize(buf, offset + 3);
        obj.uuid = PacketIO.readUUID(buf, offset + 15);
        obj.tag = PacketIO.readFixedAsciiString(buf, offset + 31, 16);
        double speed = buf.getDoubleLE(offset + 47);
        obj.speed = speed;
        return obj;
    }"#,
        );

        let analysis = PatternMatcher::new().scan(&bundle).into_analysis(&bundle).unwrap();
        let summary: Vec<(&str, i64, i64, String)> = analysis
            .fields
            .iter()
            .map(|f| {
                (
                    f.name.as_str(),
                    f.wire_offset.to_raw(),
                    f.wire_size.to_raw(),
                    f.encoding.to_string(),
                )
            })
            .collect();
        assert_eq!(
            summary,
            vec![
                ("flag", 1, 1, "u8".to_string()),
                ("mode", 2, 1, "u8".to_string()),
                ("pos", 3, 12, "nested".to_string()),
                ("uuid", 15, 16, "uuid".to_string()),
                ("tag", 31, 16, "ascii[16]".to_string()),
                ("speed", 47, 8, "f64le".to_string()),
            ]
        );
        assert_eq!(analysis.field("pos").unwrap().null_bit, Some(2));
        assert!(!analysis.has_variable_section);
        assert_eq!(analysis.variable_section_start, None);
    }

    #[test]
    fn test_multi_byte_flags_and_arrays() {
        let bundle = bundle(
            vec![
                Field::new("items", "Item[]", true),
                Field::new("names", "Map<String, String>", true),
            ],
            PacketConstants::default(),
            r#"public static Sample deserialize(ByteBuf buf, int offset) {
        byte[] nullBits = PacketIO.readBytes(buf, offset, 2);
        Sample obj = new Sample();
        int pos = offset + 2;
        if ((nullBits[1] & 4) != 0) {
            int count = VarInt.peek(buf, pos);
            obj.items = new Item[count];
            for (int i = 0; i < count; i++) {
                obj.items[i] = Item.deserialize(buf, pos);
            }
        }
        if ((nullBits[0] & 1) != 0) {
            obj.names = new HashMap<>();
        }
        return obj;
    }"#,
        );

        let analysis = PatternMatcher::new().scan(&bundle).into_analysis(&bundle).unwrap();
        let items = analysis.field("items").unwrap();
        assert_eq!(items.encoding, Encoding::Array);
        assert_eq!(items.null_bit, Some(4 << 8));
        assert_eq!(analysis.field("names").unwrap().null_bit, Some(1));
        assert_eq!(analysis.null_bits.len(), 2);
    }

    #[test]
    fn test_unresolved_fields_are_reported() {
        let bundle = bundle(
            vec![Field::new("id", "int", false), Field::new("blob", "Blob", false)],
            PacketConstants::default(),
            r#"public static Sample deserialize(ByteBuf buf, int offset) {
        Sample obj = new Sample();
        obj.id = buf.getIntLE(offset);
        obj.blob = Codec.decodeSomehow(buf);
        return obj;
    }"#,
        );
        let scan = PatternMatcher::new().scan(&bundle);
        assert_eq!(scan.facts.len(), 1);
        assert_eq!(scan.missing, vec!["blob".to_string()]);
        match scan.into_analysis(&bundle) {
            Err(Error::Unresolved { missing, .. }) => assert_eq!(missing, vec!["blob".to_string()]),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_find_call() {
        let call = find_call("x = Foo.deserialize(buf, offset + (2), 3) + 1", "deserialize").unwrap();
        assert_eq!(call.receiver.as_deref(), Some("Foo"));
        assert_eq!(call.args, vec!["buf", "offset + (2)", "3"]);
    }
}
