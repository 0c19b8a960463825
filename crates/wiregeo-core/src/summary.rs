//! Document emission seam and the built-in emitters.
//!
//! [`DocumentEmitter`] receives every extracted entity, each message paired with
//! its accepted layout when one exists. Page rendering lives outside this crate;
//! the crate ships a counting emitter and a JSON summary.

use crate::error::{Error, Result};
use crate::extract::Extraction;
use crate::model::{
    DataAggregate, EnumEntity, Evidence, Field, FieldLayout, LayoutAnalysis, LayoutIndex,
    MessageEntity, PacketConstants,
};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;

/// Receives extracted entities for rendering.
///
/// Every method defaults to a no-op so implementors only handle what they
/// render.
pub trait DocumentEmitter {
    /// Emits a message with its layout, if inference produced one
    fn emit_message(&mut self, message: &MessageEntity, layout: Option<&LayoutAnalysis>) -> Result<()> {
        let _ = (message, layout);
        Ok(())
    }

    /// Emits an enumeration
    fn emit_enum(&mut self, entity: &EnumEntity) -> Result<()> {
        let _ = entity;
        Ok(())
    }

    /// Emits a data aggregate
    fn emit_aggregate(&mut self, aggregate: &DataAggregate) -> Result<()> {
        let _ = aggregate;
        Ok(())
    }
}

/// Counts what passes through it
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsEmitter {
    /// Messages seen
    pub messages: usize,
    /// Messages with an attached layout
    pub with_layout: usize,
    /// Declared message fields without a layout record
    pub bare_fields: usize,
    /// Field facts read off deserialization routines
    pub verified: usize,
    /// Field facts committed by the oracle
    pub inferred: usize,
    /// Enumerations seen
    pub enums: usize,
    /// Data aggregates seen
    pub aggregates: usize,
}

impl DocumentEmitter for StatsEmitter {
    fn emit_message(&mut self, message: &MessageEntity, layout: Option<&LayoutAnalysis>) -> Result<()> {
        self.messages += 1;
        if let Some(layout) = layout {
            self.with_layout += 1;
            self.verified += layout.count_evidence(Evidence::Verified);
            self.inferred += layout.count_evidence(Evidence::Inferred);
        }
        self.bare_fields += message
            .resolved_fields(layout)
            .iter()
            .filter(|r| r.layout.is_none())
            .count();
        Ok(())
    }

    fn emit_enum(&mut self, _entity: &EnumEntity) -> Result<()> {
        self.enums += 1;
        Ok(())
    }

    fn emit_aggregate(&mut self, _aggregate: &DataAggregate) -> Result<()> {
        self.aggregates += 1;
        Ok(())
    }
}

/// Machine-readable summary of one protocol version
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JsonSummary {
    /// Version label
    pub version: String,
    /// Extraction fingerprint
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
    /// Packets by category
    pub categories: BTreeMap<String, Vec<PacketEntry>>,
    /// Enumerations
    pub enums: Vec<EnumEntity>,
    /// Data types
    pub data_types: Vec<DataAggregate>,
}

/// One packet in the summary
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PacketEntry {
    /// Type name
    pub name: String,
    /// Declaring package
    pub namespace: String,
    /// Relative source path
    pub source_path: String,
    /// Message identifier as `0xNN`
    pub packet_id: String,
    /// Layout constants
    pub constants: PacketConstants,
    /// Declared fields paired with their layout records
    pub fields: Vec<FieldEntry>,
    /// Message-level layout facts, absent when inference failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub layout: Option<LayoutOverview>,
}

/// A declared field with its layout record
#[derive(Debug, Clone, Serialize)]
pub struct FieldEntry {
    /// Declared field
    #[serde(flatten)]
    pub field: Field,
    /// Layout record
    #[serde(skip_serializing_if = "Option::is_none")]
    pub layout: Option<FieldLayout>,
}

/// Message-level layout facts
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LayoutOverview {
    /// Fixed block size
    pub total_fixed_size: u32,
    /// A variable block follows
    pub has_variable_section: bool,
    /// Variable block start
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variable_section_start: Option<u32>,
    /// Presence bits as `0xNN` → field name
    pub null_bits: BTreeMap<String, String>,
    /// Structural notes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl From<&LayoutAnalysis> for LayoutOverview {
    fn from(layout: &LayoutAnalysis) -> Self {
        Self {
            total_fixed_size: layout.total_fixed_size,
            has_variable_section: layout.has_variable_section,
            variable_section_start: layout.variable_section_start,
            null_bits: layout
                .null_bits
                .iter()
                .map(|(bit, name)| (format!("0x{bit:02X}"), name.clone()))
                .collect(),
            notes: layout.notes.clone(),
        }
    }
}

impl JsonSummary {
    /// Creates an empty summary for a version label
    pub fn new(version: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            ..Self::default()
        }
    }

    /// Builds the summary of a whole extraction, fingerprint included
    pub fn from_extraction(
        version: impl Into<String>,
        extraction: &Extraction,
        layouts: &LayoutIndex,
    ) -> Result<Self> {
        let mut summary = Self::new(version);
        summary.fingerprint = Some(extraction.fingerprint()?);
        extraction.emit(layouts, &mut summary)?;
        Ok(summary)
    }

    /// Number of packets across all categories
    pub fn packet_count(&self) -> usize {
        self.categories.values().map(Vec::len).sum()
    }

    /// Renders the summary as pretty JSON
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Writes the summary to `path` as pretty JSON
    pub fn write_to_path(&self, path: &Path) -> Result<()> {
        let mut json = self.to_json()?;
        json.push('\n');
        std::fs::write(path, json).map_err(|e| Error::file_write(path, e))
    }
}

impl DocumentEmitter for JsonSummary {
    fn emit_message(&mut self, message: &MessageEntity, layout: Option<&LayoutAnalysis>) -> Result<()> {
        let fields = message
            .resolved_fields(layout)
            .into_iter()
            .map(|r| FieldEntry {
                field: r.field.clone(),
                layout: r.layout.cloned(),
            })
            .collect();

        self.categories
            .entry(message.id.category.clone())
            .or_default()
            .push(PacketEntry {
                name: message.id.name.clone(),
                namespace: message.id.namespace.clone(),
                source_path: message.id.source_path.clone(),
                packet_id: message.constants.packet_id_hex(),
                constants: message.constants,
                fields,
                layout: layout.map(LayoutOverview::from),
            });
        Ok(())
    }

    fn emit_enum(&mut self, entity: &EnumEntity) -> Result<()> {
        self.enums.push(entity.clone());
        Ok(())
    }

    fn emit_aggregate(&mut self, aggregate: &DataAggregate) -> Result<()> {
        self.data_types.push(aggregate.clone());
        Ok(())
    }
}
