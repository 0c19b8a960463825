//! Structural parsing of decompiled Java sources.
//!
//! This is not a full Java parser. It recovers the shape a decompiler emits for
//! protocol classes: package, imports, top-level and nested type declarations,
//! and for each type its fields, constructors, methods and enum constants. Method
//! bodies are kept as raw text for the bundler and the pattern matcher.
//!
//! ## Algorithm Overview
//!
//! 1. Mask comments and literal contents (see [`lexer::mask`])
//! 2. Split a range into *segments*: `;`-terminated statements and `{}` blocks
//! 3. Classify segment headers as types, methods, constructors, fields or
//!    initializers
//! 4. Recurse into type bodies

pub mod lexer;

use crate::error::{Error, Result};
use lexer::{find_matching, is_ident_byte, normalize_whitespace, split_top_level, trim_range};
use regex::Regex;
use std::ops::Range;
use std::path::Path;
use std::sync::OnceLock;
use tracing::trace;

const MODIFIERS: &[&str] = &[
    "public",
    "protected",
    "private",
    "static",
    "final",
    "abstract",
    "transient",
    "volatile",
    "synchronized",
    "native",
    "strictfp",
    "default",
    "sealed",
    "non-sealed",
];

fn package_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\bpackage\s+([\w.]+)\s*;").expect("valid regex"))
}

fn import_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?m)^\s*import\s+(?:static\s+)?([\w.]+(?:\.\*)?)\s*;").expect("valid regex")
    })
}

fn type_keyword_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?:^|[^\w$@])(class|interface|enum|record)\s+([A-Za-z_$][\w$]*)")
            .expect("valid regex")
    })
}

/// Kind of a type declaration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeKind {
    /// `class`
    Class,
    /// `interface`
    Interface,
    /// `enum`
    Enum,
    /// `record`
    Record,
}

/// A parsed source file
#[derive(Debug, Clone, Default)]
pub struct SourceFile {
    /// Declared package, empty for the default package
    pub package: String,
    /// Imported names
    pub imports: Vec<String>,
    /// Top-level type declarations
    pub types: Vec<TypeDecl>,
}

/// A class, interface, enum or record declaration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeDecl {
    /// Declaration kind
    pub kind: TypeKind,
    /// Simple name
    pub name: String,
    /// Modifiers preceding the keyword
    pub modifiers: Vec<String>,
    /// Supertypes after `extends`
    pub extends: Vec<String>,
    /// Interfaces after `implements`
    pub implements: Vec<String>,
    /// Field declarations, in source order
    pub fields: Vec<FieldDecl>,
    /// Constructors, in source order (record components become one)
    pub constructors: Vec<MethodDecl>,
    /// Methods, in source order
    pub methods: Vec<MethodDecl>,
    /// Enum constants, in source order
    pub enum_constants: Vec<EnumConstant>,
    /// Member types
    pub nested: Vec<TypeDecl>,
}

impl TypeDecl {
    fn new(kind: TypeKind, name: String) -> Self {
        Self {
            kind,
            name,
            modifiers: Vec::new(),
            extends: Vec::new(),
            implements: Vec::new(),
            fields: Vec::new(),
            constructors: Vec::new(),
            methods: Vec::new(),
            enum_constants: Vec::new(),
            nested: Vec::new(),
        }
    }

    /// Returns the first method with the given name
    pub fn method(&self, name: &str) -> Option<&MethodDecl> {
        self.methods.iter().find(|m| m.name == name)
    }

    /// Returns true if `name` appears in `implements` (ignoring type arguments
    /// and qualification)
    pub fn implements_named(&self, name: &str) -> bool {
        self.implements
            .iter()
            .chain(self.extends.iter())
            .any(|ty| simple_type_name(ty) == name)
    }

    /// Iterates over this declaration and every nested one, depth first
    pub fn walk(&self) -> Vec<&TypeDecl> {
        let mut out = vec![self];
        for nested in &self.nested {
            out.extend(nested.walk());
        }
        out
    }
}

/// A field declaration (one declarator)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDecl {
    /// Annotation names without `@`
    pub annotations: Vec<String>,
    /// Modifiers
    pub modifiers: Vec<String>,
    /// Declared type, whitespace-normalized
    pub ty: String,
    /// Field name
    pub name: String,
    /// Initializer expression text
    pub initializer: Option<String>,
    /// Full declaration text including the terminating `;`
    pub text: String,
}

impl FieldDecl {
    /// `static` modifier present
    pub fn is_static(&self) -> bool {
        self.modifiers.iter().any(|m| m == "static")
    }

    /// `final` modifier present
    pub fn is_final(&self) -> bool {
        self.modifiers.iter().any(|m| m == "final")
    }

    /// Carries `@Nullable`
    pub fn is_nullable(&self) -> bool {
        has_nullable(&self.annotations)
    }
}

/// A formal parameter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Param {
    /// Annotation names without `@`
    pub annotations: Vec<String>,
    /// Declared type, whitespace-normalized
    pub ty: String,
    /// Parameter name
    pub name: String,
}

impl Param {
    /// Carries `@Nullable`
    pub fn is_nullable(&self) -> bool {
        has_nullable(&self.annotations)
    }
}

/// A method or constructor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodDecl {
    /// Annotation names without `@`
    pub annotations: Vec<String>,
    /// Modifiers
    pub modifiers: Vec<String>,
    /// Return type; `None` for constructors
    pub return_type: Option<String>,
    /// Method name (the type name for constructors)
    pub name: String,
    /// Formal parameters
    pub params: Vec<Param>,
    /// Full text from the first annotation to the closing brace
    pub text: String,
    /// Text between the body braces; empty for bodiless declarations
    pub body: String,
}

impl MethodDecl {
    /// `static` modifier present
    pub fn is_static(&self) -> bool {
        self.modifiers.iter().any(|m| m == "static")
    }
}

/// An enum constant with its constructor arguments
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumConstant {
    /// Constant name
    pub name: String,
    /// Argument expressions, trimmed
    pub args: Vec<String>,
}

impl SourceFile {
    /// Parses the text of one source file.
    ///
    /// Fails for whitespace-only input and for unbalanced delimiters. A file
    /// without any type declaration parses successfully with no types.
    pub fn parse(path: &Path, text: &str) -> Result<Self> {
        if text.trim().is_empty() {
            return Err(Error::empty_source(path));
        }

        let masked = lexer::mask(text);
        if !lexer::is_balanced(&masked) {
            return Err(Error::source_parse(path, "unbalanced delimiters"));
        }

        let package = package_re()
            .captures(&masked)
            .map(|c| c[1].to_string())
            .unwrap_or_default();
        let imports = import_re()
            .captures_iter(&masked)
            .map(|c| c[1].to_string())
            .collect();

        let parser = Parser {
            text,
            masked: &masked,
        };
        let mut types = Vec::new();
        for segment in parser.segments(0..text.len()) {
            if let Segment::Block { header, body } = segment {
                if let Some(decl) = parser.type_decl(header, body) {
                    types.push(decl);
                }
            }
        }

        trace!(
            "Parsed {}: package '{}', {} type(s)",
            path.display(),
            package,
            types.len()
        );

        Ok(Self {
            package,
            imports,
            types,
        })
    }

    /// Returns every type declared in the file, nested ones included
    pub fn all_types(&self) -> Vec<&TypeDecl> {
        self.types.iter().flat_map(|t| t.walk()).collect()
    }
}

/// Strips package qualification and type arguments: `a.b.Foo<X>` → `Foo`
pub fn simple_type_name(ty: &str) -> &str {
    let base = ty.split('<').next().unwrap_or(ty).trim();
    let base = base.trim_end_matches("[]").trim();
    base.rsplit('.').next().unwrap_or(base)
}

fn has_nullable(annotations: &[String]) -> bool {
    annotations
        .iter()
        .any(|a| simple_type_name(a) == "Nullable")
}

enum Segment {
    Statement(Range<usize>),
    Block {
        header: Range<usize>,
        body: Range<usize>,
    },
}

struct Prefix {
    annotations: Vec<String>,
    modifiers: Vec<String>,
    rest: Range<usize>,
}

struct Parser<'a> {
    text: &'a str,
    masked: &'a str,
}

impl<'a> Parser<'a> {
    fn bytes(&self) -> &'a [u8] {
        self.masked.as_bytes()
    }

    /// Splits `range` into statements and blocks at nesting depth zero.
    fn segments(&self, range: Range<usize>) -> Vec<Segment> {
        let bytes = self.bytes();
        let mut out = Vec::new();
        let mut start = range.start;
        let mut i = range.start;

        while i < range.end {
            match bytes[i] {
                b';' => {
                    out.push(Segment::Statement(start..i));
                    i += 1;
                    start = i;
                }
                b'(' | b'[' => {
                    let close = if bytes[i] == b'(' { b')' } else { b']' };
                    match find_matching(self.masked, i, bytes[i], close) {
                        Some(end) => i = end + 1,
                        None => break,
                    }
                }
                b'{' => {
                    let Some(end) = find_matching(self.masked, i, b'{', b'}') else {
                        break;
                    };
                    if has_assignment(&self.masked[start..i]) {
                        // Array or anonymous-class initializer: keep going to `;`.
                        i = end + 1;
                        continue;
                    }
                    out.push(Segment::Block {
                        header: start..i,
                        body: i + 1..end,
                    });
                    i = end + 1;
                    start = i;
                }
                _ => i += 1,
            }
        }

        out
    }

    fn type_decl(&self, header: Range<usize>, body: Range<usize>) -> Option<TypeDecl> {
        // Annotations and their argument lists are skipped before the keyword search.
        let prefix = self.prefix(header.clone());
        let base = prefix.rest.start;
        let rest_masked = &self.masked[prefix.rest.clone()];
        let caps = type_keyword_re().captures(rest_masked)?;
        let keyword = caps.get(1)?;
        // A `(` between the modifiers and the keyword means this is a method.
        if rest_masked[..keyword.start()].contains('(') {
            return None;
        }

        let kind = match keyword.as_str() {
            "class" => TypeKind::Class,
            "interface" => TypeKind::Interface,
            "enum" => TypeKind::Enum,
            _ => TypeKind::Record,
        };
        let name = caps.get(2)?;
        let mut decl = TypeDecl::new(kind, name.as_str().to_string());

        decl.modifiers = prefix.modifiers;

        let mut tail_start = base + name.end();
        let bytes = self.bytes();
        tail_start = self.skip_ws(tail_start, header.end);
        if tail_start < header.end && bytes[tail_start] == b'<' {
            tail_start = self.skip_angle(tail_start, header.end);
        }
        tail_start = self.skip_ws(tail_start, header.end);

        if kind == TypeKind::Record && tail_start < header.end && bytes[tail_start] == b'(' {
            if let Some(close) = find_matching(self.masked, tail_start, b'(', b')') {
                let params = self.params(tail_start + 1..close);
                decl.constructors.push(MethodDecl {
                    annotations: Vec::new(),
                    modifiers: vec!["public".to_string()],
                    return_type: None,
                    name: decl.name.clone(),
                    params,
                    text: normalize_whitespace(&self.text[header.clone()]),
                    body: String::new(),
                });
                tail_start = close + 1;
            }
        }

        let tail = normalize_whitespace(&self.masked[tail_start.min(header.end)..header.end]);
        decl.extends = clause(&tail, "extends", &["implements", "permits"]);
        decl.implements = clause(&tail, "implements", &["permits"]);

        let mut members = body.clone();
        if kind == TypeKind::Enum {
            let constants_end = self.enum_constants_end(body.clone());
            decl.enum_constants = self.enum_constants(body.start..constants_end);
            members = (constants_end + 1).min(body.end)..body.end;
        }
        self.members(&mut decl, members);

        Some(decl)
    }

    fn members(&self, decl: &mut TypeDecl, range: Range<usize>) {
        for segment in self.segments(range) {
            match segment {
                Segment::Block { header, body } => {
                    let trimmed = trim_range(self.masked, header.clone());
                    let header_masked = &self.masked[trimmed.clone()];
                    if header_masked.is_empty() || header_masked == "static" {
                        continue;
                    }
                    if let Some(nested) = self.type_decl(header.clone(), body.clone()) {
                        decl.nested.push(nested);
                        continue;
                    }
                    if let Some(method) = self.method(&decl.name, trimmed, Some(body)) {
                        if method.return_type.is_none() {
                            decl.constructors.push(method);
                        } else {
                            decl.methods.push(method);
                        }
                    }
                }
                Segment::Statement(range) => {
                    let trimmed = trim_range(self.masked, range);
                    if trimmed.is_empty() {
                        continue;
                    }
                    if is_bodiless_method(&self.masked[trimmed.clone()]) {
                        if let Some(method) = self.method(&decl.name, trimmed, None) {
                            decl.methods.push(method);
                        }
                        continue;
                    }
                    decl.fields.extend(self.fields(trimmed));
                }
            }
        }
    }

    /// Reads leading annotations and modifiers.
    fn prefix(&self, range: Range<usize>) -> Prefix {
        let bytes = self.bytes();
        let mut annotations = Vec::new();
        let mut modifiers = Vec::new();
        let mut i = range.start;

        loop {
            i = self.skip_ws(i, range.end);
            if i >= range.end {
                break;
            }
            if bytes[i] == b'@' {
                let start = i + 1;
                let mut end = start;
                while end < range.end && (is_ident_byte(bytes[end]) || bytes[end] == b'.') {
                    end += 1;
                }
                // `@interface` is a declaration keyword, not an annotation.
                if &self.masked[start..end] == "interface" {
                    break;
                }
                annotations.push(self.masked[start..end].to_string());
                i = self.skip_ws(end, range.end);
                if i < range.end && bytes[i] == b'(' {
                    match find_matching(self.masked, i, b'(', b')') {
                        Some(close) => i = close + 1,
                        None => break,
                    }
                }
                continue;
            }
            if bytes[i] == b'<' {
                i = self.skip_angle(i, range.end);
                continue;
            }

            let start = i;
            let mut end = start;
            while end < range.end && (is_ident_byte(bytes[end]) || bytes[end] == b'-') {
                end += 1;
            }
            let word = &self.masked[start..end];
            if !word.is_empty() && MODIFIERS.contains(&word) {
                modifiers.push(word.to_string());
                i = end;
                continue;
            }
            break;
        }

        Prefix {
            annotations,
            modifiers,
            rest: i.min(range.end)..range.end,
        }
    }

    fn method(
        &self,
        owner: &str,
        header: Range<usize>,
        body: Option<Range<usize>>,
    ) -> Option<MethodDecl> {
        let prefix = self.prefix(header.clone());
        let rest = prefix.rest.clone();
        let bytes = self.bytes();

        let mut depth = 0i32;
        let mut open = None;
        for i in rest.clone() {
            match bytes[i] {
                b'<' => depth += 1,
                b'>' => depth -= 1,
                b'(' if depth == 0 => {
                    open = Some(i);
                    break;
                }
                _ => {}
            }
        }
        let open = open?;
        let close = find_matching(self.masked, open, b'(', b')')?;

        let before = trim_range(self.masked, rest.start..open);
        let name_start = ident_start(self.masked, before.clone());
        let name = &self.masked[name_start..before.end];
        if name.is_empty() {
            return None;
        }
        let return_text = normalize_whitespace(&self.text[rest.start..name_start]);
        let return_type = if return_text.is_empty() {
            if name != owner {
                return None;
            }
            None
        } else {
            Some(return_text)
        };

        let text_end = body.as_ref().map_or(header.end, |b| b.end + 1);
        Some(MethodDecl {
            annotations: prefix.annotations,
            modifiers: prefix.modifiers,
            return_type,
            name: name.to_string(),
            params: self.params(open + 1..close),
            text: self.text[header.start..text_end].to_string(),
            body: body.map_or_else(String::new, |b| self.text[b].to_string()),
        })
    }

    fn params(&self, range: Range<usize>) -> Vec<Param> {
        split_top_level(self.masked, range, b',', true)
            .into_iter()
            .filter_map(|piece| {
                let prefix = self.prefix(piece);
                let (ty, name) = self.typed_name(prefix.rest)?;
                Some(Param {
                    annotations: prefix.annotations,
                    ty,
                    name,
                })
            })
            .collect()
    }

    fn fields(&self, statement: Range<usize>) -> Vec<FieldDecl> {
        let prefix = self.prefix(statement.clone());
        let text = format!("{};", normalize_whitespace(&self.text[statement.clone()]));
        let mut out = Vec::new();
        let mut shared_type: Option<String> = None;

        for piece in split_top_level(self.masked, prefix.rest.clone(), b',', true) {
            let eq = assignment_index(&self.masked[piece.clone()]).map(|i| piece.start + i);
            let decl_range = trim_range(self.masked, piece.start..eq.unwrap_or(piece.end));
            let initializer = eq.map(|i| self.text[i + 1..piece.end].trim().to_string());

            let (ty, name) = match &shared_type {
                None => match self.typed_name(decl_range) {
                    Some(pair) => pair,
                    None => break,
                },
                Some(ty) => {
                    let name = self.masked[decl_range].trim().to_string();
                    if name.is_empty() || !name.bytes().all(is_ident_byte) {
                        break;
                    }
                    (ty.clone(), name)
                }
            };
            shared_type = Some(ty.clone());

            out.push(FieldDecl {
                annotations: prefix.annotations.clone(),
                modifiers: prefix.modifiers.clone(),
                ty,
                name,
                initializer,
                text: text.clone(),
            });
        }

        out
    }

    /// Splits `Type name` (with optional trailing `[]` dims) into its parts.
    fn typed_name(&self, range: Range<usize>) -> Option<(String, String)> {
        let range = trim_range(self.masked, range);
        let mut end = range.end;
        let mut dims = String::new();
        let bytes = self.bytes();
        while end >= range.start + 2 && &bytes[end - 2..end] == b"[]" {
            dims.push_str("[]");
            end = trim_range(self.masked, range.start..end - 2).end;
        }

        let name_start = ident_start(self.masked, range.start..end);
        let name = &self.masked[name_start..end];
        let ty = normalize_whitespace(&self.text[range.start..name_start]);
        if name.is_empty() || ty.is_empty() || name.as_bytes()[0].is_ascii_digit() {
            return None;
        }
        Some((format!("{ty}{dims}"), name.to_string()))
    }

    fn enum_constants_end(&self, body: Range<usize>) -> usize {
        let bytes = self.bytes();
        let mut i = body.start;
        while i < body.end {
            match bytes[i] {
                b';' => return i,
                b'(' | b'{' | b'[' => {
                    let close = match bytes[i] {
                        b'(' => b')',
                        b'{' => b'}',
                        _ => b']',
                    };
                    match find_matching(self.masked, i, bytes[i], close) {
                        Some(end) => i = end + 1,
                        None => return body.end,
                    }
                }
                _ => i += 1,
            }
        }
        body.end
    }

    fn enum_constants(&self, range: Range<usize>) -> Vec<EnumConstant> {
        let bytes = self.bytes();
        split_top_level(self.masked, range, b',', false)
            .into_iter()
            .filter_map(|piece| {
                let prefix = self.prefix(piece.clone());
                let start = prefix.rest.start;
                let mut end = start;
                while end < piece.end && is_ident_byte(bytes[end]) {
                    end += 1;
                }
                if end == start {
                    return None;
                }
                let name = self.masked[start..end].to_string();

                let open = self.skip_ws(end, piece.end);
                let args = if open < piece.end && bytes[open] == b'(' {
                    let close = find_matching(self.masked, open, b'(', b')')?;
                    split_top_level(self.masked, open + 1..close, b',', false)
                        .into_iter()
                        .map(|r| self.text[r].trim().to_string())
                        .collect()
                } else {
                    Vec::new()
                };

                Some(EnumConstant { name, args })
            })
            .collect()
    }

    fn skip_ws(&self, mut i: usize, end: usize) -> usize {
        let bytes = self.bytes();
        while i < end && bytes[i].is_ascii_whitespace() {
            i += 1;
        }
        i
    }

    fn skip_angle(&self, start: usize, end: usize) -> usize {
        let bytes = self.bytes();
        let mut depth = 0i32;
        let mut i = start;
        while i < end {
            match bytes[i] {
                b'<' => depth += 1,
                b'>' => {
                    depth -= 1;
                    if depth == 0 {
                        return i + 1;
                    }
                }
                _ => {}
            }
            i += 1;
        }
        end
    }
}

/// Start index of the identifier ending at `range.end`.
fn ident_start(text: &str, range: Range<usize>) -> usize {
    let bytes = text.as_bytes();
    let mut start = range.end;
    while start > range.start && is_ident_byte(bytes[start - 1]) {
        start -= 1;
    }
    start
}

/// Index of the first top-level `=` that is an assignment, not a comparison.
fn assignment_index(text: &str) -> Option<usize> {
    let bytes = text.as_bytes();
    let mut depth = 0i32;
    for (i, &b) in bytes.iter().enumerate() {
        match b {
            b'(' | b'[' | b'{' => depth += 1,
            b')' | b']' | b'}' => depth -= 1,
            b'=' if depth == 0 => {
                let prev = i.checked_sub(1).map(|p| bytes[p]);
                let next = bytes.get(i + 1).copied();
                let comparison = matches!(prev, Some(b'=' | b'!' | b'<' | b'>'))
                    || next == Some(b'=');
                if !comparison {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

fn has_assignment(text: &str) -> bool {
    assignment_index(text).is_some()
}

/// `void f(int x);` style declarations (interfaces, abstract and native methods).
fn is_bodiless_method(text: &str) -> bool {
    match (text.find('('), assignment_index(text)) {
        (Some(paren), Some(eq)) => paren < eq,
        (Some(_), None) => true,
        _ => false,
    }
}

/// Extracts the comma-separated list following `keyword` up to any of `stops`.
fn clause(tail: &str, keyword: &str, stops: &[&str]) -> Vec<String> {
    let words: Vec<&str> = tail.split(' ').collect();
    let Some(pos) = words.iter().position(|w| *w == keyword) else {
        return Vec::new();
    };
    let list: Vec<&str> = words[pos + 1..]
        .iter()
        .take_while(|w| !stops.contains(w))
        .copied()
        .collect();
    let joined = list.join(" ");
    split_top_level(&joined, 0..joined.len(), b',', true)
        .into_iter()
        .map(|r| joined[r].to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const PACKET: &str = r#"
package com.example.protocol.packets.auth;

import com.example.protocol.Packet;
import io.netty.buffer.ByteBuf;
import javax.annotation.Nonnull;
import javax.annotation.Nullable;

/* Decompiled */
public class Connect implements Packet {
    public static final int PACKET_ID = 0;
    public static final boolean IS_COMPRESSED = false;
    public static final int FIXED_BLOCK_SIZE = 21; // fixed
    @Nullable
    public String username;
    public int protocolVersion = 5;
    private static final String[] NAMES = {"a", "b"};

    public Connect() {
    }

    public Connect(int protocolVersion, @Nullable String username) {
        this.protocolVersion = protocolVersion;
        this.username = username;
    }

    public Connect(@Nonnull Connect other) {
        this.protocolVersion = other.protocolVersion;
    }

    @Nonnull
    public static Connect deserialize(@Nonnull ByteBuf buf, int offset) {
        Connect obj = new Connect();
        obj.protocolVersion = buf.getIntLE(offset + 1);
        if (obj.protocolVersion > 0) { obj.username = "}"; }
        return obj;
    }

    public static int computeBytesConsumed(@Nonnull ByteBuf buf, int offset) {
        return 21;
    }

    static {
        System.out.println("init");
    }
}
"#;

    fn parse(text: &str) -> SourceFile {
        SourceFile::parse(Path::new("Test.java"), text).unwrap()
    }

    #[test]
    fn test_parse_packet_class() {
        let file = parse(PACKET);
        assert_eq!(file.package, "com.example.protocol.packets.auth");
        assert_eq!(file.imports.len(), 4);
        assert_eq!(file.types.len(), 1);

        let class = &file.types[0];
        assert_eq!(class.kind, TypeKind::Class);
        assert_eq!(class.name, "Connect");
        assert_eq!(class.implements, vec!["Packet".to_string()]);
        assert!(class.implements_named("Packet"));

        let names: Vec<&str> = class.fields.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["PACKET_ID", "IS_COMPRESSED", "FIXED_BLOCK_SIZE", "username", "protocolVersion", "NAMES"]
        );
        assert!(class.fields[3].is_nullable());
        assert_eq!(class.fields[4].initializer.as_deref(), Some("5"));
        assert_eq!(class.fields[5].ty, "String[]");
        assert!(class.fields[0].is_static() && class.fields[0].is_final());
        assert_eq!(class.fields[2].text, "public static final int FIXED_BLOCK_SIZE = 21;");

        assert_eq!(class.constructors.len(), 3);
        let full = &class.constructors[1];
        assert_eq!(full.params.len(), 2);
        assert_eq!(full.params[1].name, "username");
        assert!(full.params[1].is_nullable());
        assert_eq!(class.constructors[2].params[0].ty, "Connect");

        let names: Vec<&str> = class.methods.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["deserialize", "computeBytesConsumed"]);
        let deserialize = class.method("deserialize").unwrap();
        assert!(deserialize.is_static());
        assert_eq!(deserialize.return_type.as_deref(), Some("Connect"));
        assert!(deserialize.text.starts_with("@Nonnull"));
        assert!(deserialize.body.contains("buf.getIntLE(offset + 1)"));
        assert!(deserialize.text.trim_end().ends_with('}'));
    }

    #[test]
    fn test_parse_enum() {
        let file = parse(
            r#"
package p;
public enum Mode {
    Off(0),
    On(0x10) { @Override public String toString() { return "on"; } },
    Auto,
    Custom(7, "x,y");

    public static final Mode[] VALUES = values();
    private final int value;

    private Mode(int value) { this.value = value; }
    public int getValue() { return this.value; }
}
"#,
        );
        let decl = &file.types[0];
        assert_eq!(decl.kind, TypeKind::Enum);
        let constants: Vec<(&str, usize)> = decl
            .enum_constants
            .iter()
            .map(|c| (c.name.as_str(), c.args.len()))
            .collect();
        assert_eq!(constants, vec![("Off", 1), ("On", 1), ("Auto", 0), ("Custom", 2)]);
        assert_eq!(decl.enum_constants[1].args[0], "0x10");
        assert_eq!(decl.enum_constants[3].args[1], "\"x,y\"");
        assert_eq!(decl.fields.len(), 2);
        assert_eq!(decl.constructors.len(), 1);
        assert_eq!(decl.methods.len(), 1);
    }

    #[test]
    fn test_parse_enum_without_semicolon() {
        let file = parse("public enum Side { Left, Right }");
        let names: Vec<&str> = file.types[0]
            .enum_constants
            .iter()
            .map(|c| c.name.as_str())
            .collect();
        assert_eq!(names, vec!["Left", "Right"]);
    }

    #[test]
    fn test_parse_nested_and_record() {
        let file = parse(
            r#"
public class Outer extends Base<String> implements Packet, Comparable<Outer> {
    public Map<String, Integer> counts;
    public static enum Inner { A, B }
    public record Pair(int left, @Nullable String right) {}
    public abstract void f(int x);
}
"#,
        );
        let outer = &file.types[0];
        assert_eq!(outer.extends, vec!["Base<String>".to_string()]);
        assert_eq!(outer.implements.len(), 2);
        assert_eq!(outer.fields[0].ty, "Map<String, Integer>");
        assert_eq!(outer.nested.len(), 2);
        assert_eq!(outer.nested[0].kind, TypeKind::Enum);
        assert_eq!(outer.nested[1].kind, TypeKind::Record);
        assert_eq!(outer.nested[1].constructors[0].params.len(), 2);
        assert_eq!(outer.methods[0].name, "f");
        assert!(outer.methods[0].body.is_empty());
        assert_eq!(file.all_types().len(), 3);
    }

    #[test]
    fn test_parse_annotated_types() {
        let file = parse(
            r#"
@SuppressWarnings("unused")
@Deprecated(since = "1.2", forRemoval = true)
public final class Login implements Packet {
    public static final int PACKET_ID = 4;
    @JsonIgnore(value = "x")
    public static enum State { Open, Closed }
}
"#,
        );
        assert_eq!(file.types.len(), 1);
        let login = &file.types[0];
        assert_eq!(login.kind, TypeKind::Class);
        assert_eq!(login.name, "Login");
        assert_eq!(login.modifiers, vec!["public".to_string(), "final".to_string()]);
        assert!(login.implements_named("Packet"));
        assert_eq!(login.fields[0].name, "PACKET_ID");
        assert_eq!(login.nested.len(), 1);
        assert_eq!(login.nested[0].name, "State");
    }

    #[test]
    fn test_parse_multiple_declarators() {
        let file = parse("class P { public int x, y = 2; public float[] z; }");
        let fields = &file.types[0].fields;
        assert_eq!(fields.len(), 3);
        assert_eq!(fields[1].name, "y");
        assert_eq!(fields[1].ty, "int");
        assert_eq!(fields[1].initializer.as_deref(), Some("2"));
        assert_eq!(fields[2].ty, "float[]");
    }

    #[test]
    fn test_parse_errors() {
        let err = SourceFile::parse(Path::new("E.java"), "   \n").unwrap_err();
        assert!(matches!(err, Error::EmptySource { .. }));

        let err = SourceFile::parse(Path::new("U.java"), "class U { void f() {").unwrap_err();
        assert!(matches!(err, Error::SourceParse { .. }));
    }

    #[test]
    fn test_no_types() {
        let file = parse("package only.info;");
        assert!(file.types.is_empty());
        assert_eq!(file.package, "only.info");
    }

    #[test]
    fn test_simple_type_name() {
        assert_eq!(simple_type_name("java.util.List<Foo>"), "List");
        assert_eq!(simple_type_name("Foo[]"), "Foo");
        assert_eq!(simple_type_name("javax.annotation.Nullable"), "Nullable");
    }
}
