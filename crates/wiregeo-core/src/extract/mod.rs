//! Entity extraction over a tree of decompiled protocol sources.
//!
//! ## Algorithm Overview
//!
//! 1. **Collect**: walk the root (sorted, so runs are reproducible), read and
//!    parse every source file exactly once. Unreadable, empty or unparsable
//!    files are logged and skipped.
//! 2. **Merge**: fold the parsed units into three maps.
//!    - primary pass over everything outside the packets directory: enums and
//!      data aggregates
//!    - packets pass: message types (with constants, fields and bundles) plus
//!      packet-local aggregates
//!    - secondary pass over the packets directory: enums only, never replacing
//!      one registered by the primary pass

pub mod fields;

use crate::bundle::ContextBundle;
use crate::error::{Error, Result};
use crate::model::{
    DataAggregate, EntityId, EnumEntity, LayoutIndex, MessageEntity, PacketConstants,
    ProtocolEntity,
};
use crate::source::{SourceFile, TypeDecl, TypeKind};
use crate::summary::DocumentEmitter;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Interface implemented by every message type
const MESSAGE_INTERFACE: &str = "Packet";

/// Name suffix that marks a type as a message rather than an aggregate
const MESSAGE_SUFFIX: &str = "Packet";

/// Category used for files directly under a scanned root
pub const ROOT_CATEGORY: &str = "root";

/// Configuration for the extractor
#[derive(Debug, Clone)]
pub struct ExtractorConfig {
    /// Sub-directory of the root holding message sources
    pub packets_dir: String,
    /// Source file extension, without the dot
    pub extension: String,
    /// Follow symbolic links while walking
    pub follow_links: bool,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            packets_dir: "packets".to_string(),
            extension: "java".to_string(),
            follow_links: false,
        }
    }
}

impl ExtractorConfig {
    /// Creates a new extractor config with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the message sub-directory name
    pub fn packets_dir(mut self, dir: impl Into<String>) -> Self {
        self.packets_dir = dir.into();
        self
    }

    /// Sets the source file extension
    pub fn extension(mut self, ext: impl Into<String>) -> Self {
        self.extension = ext.into();
        self
    }

    /// Sets whether symbolic links are followed
    pub fn follow_links(mut self, follow: bool) -> Self {
        self.follow_links = follow;
        self
    }
}

/// Everything extracted from one source tree
#[derive(Debug, Clone, Default, Serialize)]
pub struct Extraction {
    /// Messages grouped by category, sorted by identifier then name
    pub messages: BTreeMap<String, Vec<MessageEntity>>,
    /// Enumerations by name
    pub enums: BTreeMap<String, EnumEntity>,
    /// Data aggregates by name
    pub aggregates: BTreeMap<String, DataAggregate>,
    /// Relative paths of files skipped because of input errors
    #[serde(skip)]
    pub skipped: Vec<String>,
}

impl Extraction {
    /// Iterates over every message in category order
    pub fn all_messages(&self) -> impl Iterator<Item = &MessageEntity> + '_ {
        self.messages.values().flatten()
    }

    /// Total number of messages
    pub fn message_count(&self) -> usize {
        self.messages.values().map(Vec::len).sum()
    }

    /// Number of messages carrying a context bundle
    pub fn bundled_count(&self) -> usize {
        self.all_messages().filter(|m| m.bundle.is_some()).count()
    }

    /// Digest over the canonical JSON form of the extracted entities.
    ///
    /// Two runs over an unchanged tree produce the same fingerprint.
    pub fn fingerprint(&self) -> Result<String> {
        let canonical = serde_json::to_vec(self)?;
        Ok(blake3::hash(&canonical).to_hex().to_string())
    }

    /// Iterates over every entity: messages, then enums, then aggregates
    pub fn entities(&self) -> impl Iterator<Item = ProtocolEntity<'_>> + '_ {
        self.all_messages()
            .map(ProtocolEntity::Message)
            .chain(self.enums.values().map(ProtocolEntity::Enum))
            .chain(self.aggregates.values().map(ProtocolEntity::Aggregate))
    }

    /// Feeds every entity, paired with its layout when one exists, to an emitter
    pub fn emit(&self, layouts: &LayoutIndex, emitter: &mut dyn DocumentEmitter) -> Result<()> {
        for entity in self.entities() {
            match entity {
                ProtocolEntity::Message(m) => emitter.emit_message(m, layouts.get(&m.id.name))?,
                ProtocolEntity::Enum(e) => emitter.emit_enum(e)?,
                ProtocolEntity::Aggregate(a) => emitter.emit_aggregate(a)?,
            }
        }
        Ok(())
    }
}

/// A parsed file with its location relative to the root
struct Unit {
    rel_path: String,
    in_packets: bool,
    category: String,
    file: SourceFile,
}

/// Entity extractor
#[derive(Debug, Clone, Default)]
pub struct Extractor {
    config: ExtractorConfig,
}

impl Extractor {
    /// Creates a new extractor with default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new extractor with custom configuration
    pub fn with_config(config: ExtractorConfig) -> Self {
        Self { config }
    }

    /// Extracts every entity below `root`.
    pub fn extract(&self, root: &Path) -> Result<Extraction> {
        if !root.is_dir() {
            return Err(Error::not_a_directory(root));
        }

        let (units, skipped) = self.collect(root)?;
        info!(
            "Parsed {} source file(s), skipped {}",
            units.len(),
            skipped.len()
        );

        let mut extraction = self.merge(&units);
        extraction.skipped = skipped;

        info!(
            "Extracted {} message(s) in {} categor(ies), {} enum(s), {} aggregate(s)",
            extraction.message_count(),
            extraction.messages.len(),
            extraction.enums.len(),
            extraction.aggregates.len()
        );
        Ok(extraction)
    }

    fn collect(&self, root: &Path) -> Result<(Vec<Unit>, Vec<String>)> {
        let mut units = Vec::new();
        let mut skipped = Vec::new();

        let walker = WalkDir::new(root)
            .follow_links(self.config.follow_links)
            .sort_by_file_name();

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    let rel_path = e
                        .path()
                        .map(|p| join_components(p.strip_prefix(root).unwrap_or(p)))
                        .unwrap_or_default();
                    warn!("Skipping unreadable entry {}: {}", rel_path, e);
                    skipped.push(rel_path);
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(self.config.extension.as_str()) {
                continue;
            }

            let rel = path.strip_prefix(root).unwrap_or(path);
            let rel_path = join_components(rel);
            match self.parse_file(path) {
                Ok(file) => {
                    let (in_packets, category) = self.categorize(rel);
                    debug!(
                        "Parsed {} ({} type(s), category '{}')",
                        rel_path,
                        file.types.len(),
                        category
                    );
                    units.push(Unit {
                        rel_path,
                        in_packets,
                        category,
                        file,
                    });
                }
                Err(e) if e.is_recoverable() => {
                    warn!("Skipping {}: {}", rel_path, e);
                    skipped.push(rel_path);
                }
                Err(e) => return Err(e),
            }
        }

        Ok((units, skipped))
    }

    fn parse_file(&self, path: &Path) -> Result<SourceFile> {
        let bytes = std::fs::read(path).map_err(|e| Error::file_read(path, e))?;
        let text = String::from_utf8_lossy(&bytes);
        SourceFile::parse(path, &text)
    }

    /// Decides whether `rel` lives in the packets directory and derives its
    /// category from the directory path (relative to the packets directory for
    /// message sources).
    fn categorize(&self, rel: &Path) -> (bool, String) {
        let dirs: Vec<String> = rel
            .parent()
            .map(|p| {
                p.components()
                    .filter_map(|c| match c {
                        Component::Normal(s) => Some(s.to_string_lossy().into_owned()),
                        _ => None,
                    })
                    .collect()
            })
            .unwrap_or_default();

        let in_packets = dirs.first().is_some_and(|d| *d == self.config.packets_dir);
        let tail = if in_packets { &dirs[1..] } else { &dirs[..] };
        let category = if tail.is_empty() {
            ROOT_CATEGORY.to_string()
        } else {
            tail.join("/").to_lowercase()
        };
        (in_packets, category)
    }

    fn merge(&self, units: &[Unit]) -> Extraction {
        let mut extraction = Extraction::default();

        // Primary pass: enums and aggregates outside the packets directory.
        for unit in units.iter().filter(|u| !u.in_packets) {
            for decl in unit.file.all_types() {
                if decl.kind == TypeKind::Enum {
                    register_enum(&mut extraction, unit, decl);
                }
            }
            for decl in &unit.file.types {
                if is_aggregate_candidate(decl) && !is_message(decl) {
                    register_aggregate(&mut extraction, unit, decl);
                }
            }
        }

        // Packets pass: messages and packet-local aggregates.
        for unit in units.iter().filter(|u| u.in_packets) {
            for decl in &unit.file.types {
                if !is_aggregate_candidate(decl) {
                    continue;
                }
                if is_message(decl) {
                    let message = build_message(unit, decl);
                    debug!(
                        "Message {} ({}) with {} field(s), bundle: {}",
                        message.id.name,
                        message.constants.packet_id_hex(),
                        message.fields.len(),
                        message.bundle.is_some()
                    );
                    extraction
                        .messages
                        .entry(unit.category.clone())
                        .or_default()
                        .push(message);
                } else {
                    register_aggregate(&mut extraction, unit, decl);
                }
            }
        }

        // Secondary pass: enums declared alongside messages.
        for unit in units.iter().filter(|u| u.in_packets) {
            for decl in unit.file.all_types() {
                if decl.kind == TypeKind::Enum {
                    register_enum(&mut extraction, unit, decl);
                }
            }
        }

        for messages in extraction.messages.values_mut() {
            messages.sort_by(|a, b| {
                a.constants
                    .packet_id
                    .cmp(&b.constants.packet_id)
                    .then_with(|| a.id.name.cmp(&b.id.name))
            });
        }

        extraction
    }
}

/// Builds the identity of a declaration found in `unit`
fn entity_id(unit: &Unit, decl: &TypeDecl) -> EntityId {
    EntityId {
        name: decl.name.clone(),
        namespace: unit.file.package.clone(),
        category: unit.category.clone(),
        source_path: unit.rel_path.clone(),
    }
}

fn register_enum(extraction: &mut Extraction, unit: &Unit, decl: &TypeDecl) {
    if extraction.enums.contains_key(&decl.name) {
        debug!("Enum {} already registered, keeping first", decl.name);
        return;
    }
    let entity = EnumEntity {
        id: entity_id(unit, decl),
        variants: fields::enum_variants(&decl.enum_constants),
    };
    extraction.enums.insert(decl.name.clone(), entity);
}

fn register_aggregate(extraction: &mut Extraction, unit: &Unit, decl: &TypeDecl) {
    if decl.name.ends_with(MESSAGE_SUFFIX) || extraction.aggregates.contains_key(&decl.name) {
        return;
    }
    let aggregate = DataAggregate {
        id: entity_id(unit, decl),
        fields: fields::declared_fields(decl),
        imports: unit.file.imports.clone(),
    };
    extraction.aggregates.insert(decl.name.clone(), aggregate);
}

fn is_aggregate_candidate(decl: &TypeDecl) -> bool {
    matches!(decl.kind, TypeKind::Class | TypeKind::Record)
}

/// A message implements the message interface or declares a message identifier
fn is_message(decl: &TypeDecl) -> bool {
    decl.implements_named(MESSAGE_INTERFACE)
        || decl
            .fields
            .iter()
            .any(|f| f.is_static() && f.name == PacketConstants::NAMES[0])
}

/// Reads the recognized constants from static final declarations
pub fn packet_constants(decl: &TypeDecl) -> PacketConstants {
    let mut constants = PacketConstants::default();
    for field in decl.fields.iter().filter(|f| f.is_static() && f.is_final()) {
        if !PacketConstants::is_recognized(&field.name) {
            continue;
        }
        if let Some(init) = &field.initializer {
            if !constants.apply(&field.name, init) {
                debug!(
                    "{}: constant {} has non-literal value '{}'",
                    decl.name, field.name, init
                );
            }
        }
    }
    constants
}

fn build_message(unit: &Unit, decl: &TypeDecl) -> MessageEntity {
    let id = entity_id(unit, decl);
    let constants = packet_constants(decl);
    let fields = fields::message_fields(decl);
    let bundle = ContextBundle::build(&id, decl, &fields, constants);
    MessageEntity {
        id,
        constants,
        fields,
        imports: unit.file.imports.clone(),
        bundle,
    }
}

fn join_components(path: &Path) -> String {
    path.components()
        .filter_map(|c| match c {
            Component::Normal(s) => Some(s.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Resolves the canonical root for a source directory argument
pub fn resolve_root(path: &Path) -> Result<PathBuf> {
    if !path.is_dir() {
        return Err(Error::not_a_directory(path));
    }
    path.canonicalize().map_err(|e| Error::file_read(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::fs;
    use tempfile::TempDir;

    fn write(root: &Path, rel: &str, text: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, text).unwrap();
    }

    fn tree() -> TempDir {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        write(
            root,
            "common/GameMode.java",
            "package p.common;\npublic enum GameMode { Survival(0), Creative(1), Spectator(3); }",
        );
        write(
            root,
            "common/Vec3.java",
            "package p.common;\npublic class Vec3 { public float x; public float y; public float z = 1.0f; }",
        );
        write(
            root,
            "Settings.java",
            "package p;\npublic class Settings { @Nullable public String motd; }",
        );
        write(root, "broken/Bad.java", "public class Bad { void f() {");
        write(root, "broken/Empty.java", "  \n\n");
        write(
            root,
            "packets/Auth/Login.java",
            r#"package p.packets.auth;
import io.netty.buffer.ByteBuf;
public class Login implements Packet {
    public static final int PACKET_ID = 2;
    public static final int NULLABLE_BIT_FIELD_SIZE = 1;
    public static final int FIXED_BLOCK_SIZE = 5;
    @Nullable public String name;
    public int id;
    public Login() {}
    public Login(int id, @Nullable String name) {}
    public Login(Login other) {}
    public static Login deserialize(ByteBuf buf, int offset) {
        byte nullBits = buf.getByte(offset);
        Login obj = new Login();
        obj.id = buf.getIntLE(offset + 1);
        return obj;
    }
}
"#,
        );
        write(
            root,
            "packets/Auth/Hello.java",
            "package p.packets.auth;\npublic class Hello implements Packet { public static final int PACKET_ID = 1; public int v; }",
        );
        write(
            root,
            "packets/Auth/AuthPacket.java",
            "package p.packets.auth;\npublic class AuthPacket { public int tag; }",
        );
        write(
            root,
            "packets/Auth/Reason.java",
            "package p.packets.auth;\npublic enum Reason { Ok, Denied }",
        );
        write(
            root,
            "packets/Auth/GameMode.java",
            "package p.packets.auth;\npublic enum GameMode { Other }",
        );
        write(
            root,
            "packets/Auth/Token.java",
            "package p.packets.auth;\npublic class Token { public byte[] bytes; }",
        );
        dir
    }

    #[test]
    fn test_extract_tree() {
        let dir = tree();
        let extraction = Extractor::new().extract(dir.path()).unwrap();

        assert_eq!(extraction.messages.keys().collect::<Vec<_>>(), vec!["auth"]);
        let auth = &extraction.messages["auth"];
        let names: Vec<&str> = auth.iter().map(|m| m.id.name.as_str()).collect();
        assert_eq!(names, vec!["Hello", "Login"]);

        let login = &auth[1];
        assert_eq!(login.constants.packet_id, 2);
        assert_eq!(login.constants.fixed_block_size, 5);
        let fields: Vec<(&str, bool)> = login
            .fields
            .iter()
            .map(|f| (f.name.as_str(), f.nullable))
            .collect();
        assert_eq!(fields, vec![("id", false), ("name", true)]);
        assert!(login.bundle.is_some());
        assert!(auth[0].bundle.is_none());
        assert_eq!(login.id.source_path, "packets/Auth/Login.java");
        assert_eq!(login.imports, vec!["io.netty.buffer.ByteBuf".to_string()]);

        let aggregates: Vec<&str> = extraction.aggregates.keys().map(String::as_str).collect();
        assert_eq!(aggregates, vec!["Settings", "Token", "Vec3"]);
        assert_eq!(extraction.aggregates["Settings"].id.category, ROOT_CATEGORY);
        assert!(extraction.aggregates["Settings"].fields[0].nullable);

        assert_eq!(extraction.enums.len(), 2);
        assert_eq!(extraction.enums["GameMode"].id.category, "common");
        assert_eq!(extraction.enums["GameMode"].variants[2].value, 3);
        assert_eq!(extraction.enums["Reason"].variants[1].value, 1);

        assert_eq!(extraction.skipped.len(), 2);
        assert_eq!(extraction.bundled_count(), 1);

        let entities: Vec<&str> = extraction.entities().map(|e| e.name()).collect();
        assert_eq!(
            entities,
            vec!["Hello", "Login", "GameMode", "Reason", "Settings", "Token", "Vec3"]
        );
        let first = serde_json::to_value(extraction.entities().next().unwrap()).unwrap();
        assert_eq!(first["kind"], "message");
        assert_eq!(first["id"]["name"], "Hello");
    }

    #[test]
    fn test_extraction_is_reproducible() {
        let dir = tree();
        let first = Extractor::new().extract(dir.path()).unwrap();
        let second = Extractor::new().extract(dir.path()).unwrap();
        assert_eq!(first.fingerprint().unwrap(), second.fingerprint().unwrap());
        assert_eq!(
            serde_json::to_string(&first).unwrap(),
            serde_json::to_string(&second).unwrap()
        );
    }

    #[test]
    fn test_custom_packets_dir() {
        let dir = TempDir::new().unwrap();
        write(
            dir.path(),
            "net/Ping.java",
            "public class Ping implements Packet { public static final int PACKET_ID = 0x10; }",
        );
        let config = ExtractorConfig::new().packets_dir("net");
        let extraction = Extractor::with_config(config).extract(dir.path()).unwrap();
        assert_eq!(extraction.messages[ROOT_CATEGORY][0].constants.packet_id, 16);
    }

    #[cfg(unix)]
    #[test]
    fn test_walk_errors_are_skipped() {
        let dir = TempDir::new().unwrap();
        write(
            dir.path(),
            "packets/a/Ok.java",
            "public class Ok implements Packet { public static final int PACKET_ID = 2; }",
        );
        std::os::unix::fs::symlink(dir.path(), dir.path().join("packets/a/loop")).unwrap();

        let config = ExtractorConfig::new().follow_links(true);
        let extraction = Extractor::with_config(config).extract(dir.path()).unwrap();
        assert_eq!(extraction.message_count(), 1);
        assert_eq!(extraction.messages["a"][0].id.name, "Ok");
        assert_eq!(extraction.skipped, vec!["packets/a/loop".to_string()]);
    }

    #[test]
    fn test_missing_root() {
        let err = Extractor::new()
            .extract(Path::new("/definitely/not/here"))
            .unwrap_err();
        assert!(matches!(err, Error::NotADirectory { .. }));
    }
}
