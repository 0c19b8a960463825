//! Context bundles: the self-contained inference input for one message.
//!
//! A bundle is assembled from a message type's syntax once its field list is
//! known. It carries everything needed to recover the wire layout without going
//! back to the source tree: the recognized layout constants, the declared
//! fields, the `deserialize` routine, the in-class static helpers it relies on
//! and the external calls it makes.

use crate::model::{EntityId, Field, PacketConstants};
use crate::source::{lexer, MethodDecl, TypeDecl};
use regex::Regex;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::OnceLock;

/// Name of the routine every bundle is built around
pub const DESERIALIZE: &str = "deserialize";

/// Static helpers always included for cross-checking encoded lengths
pub const CROSS_CHECK_HELPERS: [&str; 2] = ["computeBytesConsumed", "computeSize"];

/// Method names whose receiver is treated as a nested type
const NESTED_METHODS: [&str; 2] = ["deserialize", "fromValue"];

/// Fixed reference glossary of low-level read primitives
const REFERENCE: &str = "\
buf.getByte(i)          1 byte, signed; `!= 0` reads it as a boolean
buf.getUnsignedByte(i)  1 byte, unsigned
buf.getShortLE(i)       2 bytes, little-endian signed
buf.getIntLE(i)         4 bytes, little-endian signed
buf.getLongLE(i)        8 bytes, little-endian signed
buf.getFloatLE(i)       4 bytes, little-endian IEEE 754
buf.getDoubleLE(i)      8 bytes, little-endian IEEE 754
VarInt.peek(buf, i)     self-delimiting variable-length integer (1-5 bytes)
VarInt.size(n)          encoded width of n as a VarInt
PacketIO.readUUID(buf, i)                   16 bytes, two little-endian longs
PacketIO.readFixedAsciiString(buf, i, n)    n bytes of ASCII, zero padded
PacketIO.readVarString(buf, i, charset)     VarInt length prefix followed by bytes
offset + K + buf.getIntLE(offset + K)       4-byte pointer into the variable block";

fn qualified_call_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\b([A-Za-z_$][\w$]*)\s*\.\s*([A-Za-z_$][\w$]*)\s*\(")
            .expect("valid regex")
    })
}

fn bare_call_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\b([A-Za-z_$][\w$]*)\s*\(").expect("valid regex")
    })
}

/// A `Receiver.method` call observed in a routine
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CallTarget {
    /// Receiver identifier
    pub receiver: String,
    /// Method name
    pub method: String,
}

impl fmt::Display for CallTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.receiver, self.method)
    }
}

/// Inference input for one message type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextBundle {
    /// Message type name
    pub entity: String,
    /// Declaring package
    pub namespace: String,
    /// Parsed layout constants
    pub constants: PacketConstants,
    /// Verbatim declarations of the recognized constants
    pub constant_decls: Vec<String>,
    /// Declared fields, in wire order when known
    pub fields: Vec<Field>,
    /// Full text of the `deserialize` routine
    pub deserialize: String,
    /// Text of in-class static routines the bundle depends on
    pub helpers: Vec<String>,
    /// External calls made by `deserialize`
    pub helper_calls: BTreeSet<CallTarget>,
    /// `deserialize`/`fromValue` calls on other types
    pub nested_refs: BTreeSet<CallTarget>,
}

impl ContextBundle {
    /// Assembles the bundle for a message type.
    ///
    /// Returns `None` when the type declares no `deserialize` routine; such
    /// entities are excluded from inference.
    pub fn build(
        id: &EntityId,
        decl: &TypeDecl,
        fields: &[Field],
        constants: PacketConstants,
    ) -> Option<Self> {
        let deserialize = decl.method(DESERIALIZE)?;
        let masked = lexer::mask(&deserialize.text);

        let mut constant_decls: Vec<String> = Vec::new();
        for field in decl.fields.iter().filter(|f| f.is_static()) {
            if PacketConstants::is_recognized(&field.name) && !constant_decls.contains(&field.text) {
                constant_decls.push(field.text.clone());
            }
        }

        let statics: Vec<&MethodDecl> = decl
            .methods
            .iter()
            .filter(|m| m.is_static() && m.name != DESERIALIZE)
            .collect();

        let mut called = BTreeSet::new();
        for caps in bare_call_re().captures_iter(&masked) {
            let Some(name) = caps.get(1) else { continue };
            let qualified = masked[..name.start()].trim_end().ends_with('.');
            if !qualified {
                called.insert(name.as_str().to_string());
            }
        }

        let mut helper_calls = BTreeSet::new();
        let mut nested_refs = BTreeSet::new();
        for caps in qualified_call_re().captures_iter(&masked) {
            let receiver = &caps[1];
            let method = &caps[2];
            if receiver == decl.name {
                called.insert(method.to_string());
                continue;
            }
            if !receiver.starts_with(|c: char| c.is_ascii_uppercase()) {
                continue;
            }
            let target = CallTarget {
                receiver: receiver.to_string(),
                method: method.to_string(),
            };
            if NESTED_METHODS.contains(&method) {
                nested_refs.insert(target);
            } else {
                helper_calls.insert(target);
            }
        }

        let helpers = statics
            .iter()
            .filter(|m| called.contains(&m.name) || CROSS_CHECK_HELPERS.contains(&m.name.as_str()))
            .map(|m| m.text.clone())
            .collect();

        Some(Self {
            entity: id.name.clone(),
            namespace: id.namespace.clone(),
            constants,
            constant_decls,
            fields: fields.to_vec(),
            deserialize: deserialize.text.clone(),
            helpers,
            helper_calls,
            nested_refs,
        })
    }

    /// Names of the declared fields, in order
    pub fn field_names(&self) -> impl Iterator<Item = &str> + '_ {
        self.fields.iter().map(|f| f.name.as_str())
    }

    /// Renders the bundle as labeled text sections.
    pub fn render(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for ContextBundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "ENTITY: {}", self.entity)?;
        if !self.namespace.is_empty() {
            writeln!(f, "NAMESPACE: {}", self.namespace)?;
        }

        if !self.constant_decls.is_empty() {
            f.write_str("\nCONSTANTS:\n")?;
            for decl in &self.constant_decls {
                writeln!(f, "{decl}")?;
            }
        }

        if !self.fields.is_empty() {
            f.write_str("\nFIELDS:\n")?;
            for field in &self.fields {
                let marker = if field.nullable { "@Nullable" } else { "@Nonnull" };
                writeln!(f, "- {} {}: {}", marker, field.name, field.declared_type)?;
            }
        }

        writeln!(f, "\nDESERIALIZE METHOD:\n{}", self.deserialize.trim_end())?;

        if !self.helpers.is_empty() {
            f.write_str("\nSTATIC HELPER METHODS:\n")?;
            for helper in &self.helpers {
                write!(f, "{}\n\n", helper.trim_end())?;
            }
        }

        if !self.helper_calls.is_empty() || !self.nested_refs.is_empty() {
            f.write_str("\nEXTERNAL DEPENDENCIES:\n")?;
            for call in &self.helper_calls {
                writeln!(f, "- helper: {call}")?;
            }
            for call in &self.nested_refs {
                writeln!(f, "- nested type: {call}")?;
            }
        }

        writeln!(f, "\nREFERENCE:\n{REFERENCE}")
    }
}
