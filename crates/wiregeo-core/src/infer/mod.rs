//! Layout inference: turns one context bundle into one validated layout.
//!
//! Two implementations sit behind [`LayoutInference`]:
//!
//! - [`PatternMatcher`]: deterministic, reads the `deserialize` routine and only
//!   answers when every declared field is accounted for
//! - [`OracleInference`]: a single schema-constrained request to a
//!   [`LayoutOracle`] per bundle
//!
//! [`InferenceEngine`] composes them: pattern matching first, the oracle only for
//! what remains, with verified facts overlaid onto the oracle's answer.
//!
//! ## Extensibility
//!
//! ```no_run
//! use async_trait::async_trait;
//! use serde_json::{json, Value};
//! use wiregeo_core::infer::{LayoutOracle, OracleRequest};
//! use wiregeo_core::Result;
//!
//! struct Canned;
//!
//! #[async_trait]
//! impl LayoutOracle for Canned {
//!     async fn complete(&self, _request: OracleRequest<'_>) -> Result<Value> {
//!         Ok(json!({ "fields": [] }))
//!     }
//! }
//! ```

mod anthropic;
mod pattern;
mod schema;

pub use anthropic::{AnthropicOracle, OracleConfig, API_KEY_ENV, DEFAULT_BASE_URL, DEFAULT_MODEL};
pub use pattern::{OffsetPointer, PatternMatcher, PatternScan};
pub use schema::{decode, layout_schema, normalize, RawField, RawLayout, RawNullBit};

use crate::bundle::ContextBundle;
use crate::error::Result;
use crate::model::{Encoding, FieldLayout, LayoutAnalysis};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::debug;

/// Instructions sent with every oracle request
pub const SYSTEM_PROMPT: &str = "\
You recover the exact binary wire layout of a network protocol message from its \
decompiled deserialization routine. Offsets are relative to the start of the \
message. Use -1 for wireOffset when a field lives in the variable block and -1 \
for wireSize when its length is variable. nullBit is the power-of-two value of \
the presence bit guarding an optional field (bits in the second flags byte are \
shifted left by 8, and so on); omit it for fields that are always present. \
Report every declared field, using best-effort values when the evidence is \
incomplete. Record the result with the provided tool.";

/// Something that can produce a layout for a bundle
#[async_trait]
pub trait LayoutInference: Send + Sync {
    /// Infers the layout of one message
    async fn infer(&self, bundle: &ContextBundle) -> Result<LayoutAnalysis>;
}

#[async_trait]
impl<T: LayoutInference + ?Sized> LayoutInference for Arc<T> {
    async fn infer(&self, bundle: &ContextBundle) -> Result<LayoutAnalysis> {
        (**self).infer(bundle).await
    }
}

#[async_trait]
impl LayoutInference for PatternMatcher {
    async fn infer(&self, bundle: &ContextBundle) -> Result<LayoutAnalysis> {
        self.scan(bundle).into_analysis(bundle)
    }
}

/// One structured-output request
#[derive(Debug, Clone, Copy)]
pub struct OracleRequest<'a> {
    /// Entity the request is about
    pub entity: &'a str,
    /// System instructions
    pub system: &'a str,
    /// Rendered bundle and task
    pub prompt: &'a str,
    /// JSON schema the answer must satisfy
    pub schema: &'a Value,
}

/// An external service answering schema-constrained requests
#[async_trait]
pub trait LayoutOracle: Send + Sync {
    /// Returns the structured output as raw JSON
    async fn complete(&self, request: OracleRequest<'_>) -> Result<Value>;
}

#[async_trait]
impl<T: LayoutOracle + ?Sized> LayoutOracle for Arc<T> {
    async fn complete(&self, request: OracleRequest<'_>) -> Result<Value> {
        (**self).complete(request).await
    }
}

/// Builds the user prompt for one bundle
pub fn build_prompt(bundle: &ContextBundle) -> String {
    let names: Vec<&str> = bundle.field_names().collect();
    format!(
        "{}\nDeclared fields (all must appear in the answer): {}\nEncoding tags: {}\n",
        bundle.render(),
        names.join(", "),
        Encoding::vocabulary()
    )
}

/// Layout inference through a [`LayoutOracle`]
#[derive(Debug, Clone)]
pub struct OracleInference<O> {
    oracle: O,
    schema: Value,
}

impl<O: LayoutOracle> OracleInference<O> {
    /// Wraps an oracle
    pub fn new(oracle: O) -> Self {
        Self {
            oracle,
            schema: layout_schema(),
        }
    }
}

#[async_trait]
impl<O: LayoutOracle> LayoutInference for OracleInference<O> {
    async fn infer(&self, bundle: &ContextBundle) -> Result<LayoutAnalysis> {
        let prompt = build_prompt(bundle);
        let value = self
            .oracle
            .complete(OracleRequest {
                entity: &bundle.entity,
                system: SYSTEM_PROMPT,
                prompt: &prompt,
                schema: &self.schema,
            })
            .await?;
        let raw = decode(&bundle.entity, value)?;
        normalize(bundle, raw)
    }
}

/// Pattern matching first, an optional fallback for unresolved bundles
pub struct InferenceEngine {
    matcher: PatternMatcher,
    fallback: Option<Box<dyn LayoutInference>>,
}

impl std::fmt::Debug for InferenceEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InferenceEngine")
            .field("matcher", &self.matcher)
            .field("fallback", &self.fallback.is_some())
            .finish()
    }
}

impl Default for InferenceEngine {
    fn default() -> Self {
        Self::offline()
    }
}

impl InferenceEngine {
    /// Pattern matching only; unresolved bundles yield [`crate::Error::Unresolved`]
    pub fn offline() -> Self {
        Self {
            matcher: PatternMatcher::new(),
            fallback: None,
        }
    }

    /// Pattern matching with `fallback` for bundles it cannot fully resolve
    pub fn with_fallback(fallback: impl LayoutInference + 'static) -> Self {
        Self {
            matcher: PatternMatcher::new(),
            fallback: Some(Box::new(fallback)),
        }
    }

    /// Pattern matching with an oracle fallback
    pub fn with_oracle<O: LayoutOracle + 'static>(oracle: O) -> Self {
        Self::with_fallback(OracleInference::new(oracle))
    }

    /// Returns true if a fallback is configured
    pub fn has_fallback(&self) -> bool {
        self.fallback.is_some()
    }
}

#[async_trait]
impl LayoutInference for InferenceEngine {
    async fn infer(&self, bundle: &ContextBundle) -> Result<LayoutAnalysis> {
        let scan = self.matcher.scan(bundle);
        let Some(fallback) = &self.fallback else {
            return scan.into_analysis(bundle);
        };

        // Facts from a complete scan that fails validation are not trusted.
        let mut verified = scan.facts.clone();
        if scan.is_complete() {
            match scan.into_analysis(bundle) {
                Ok(analysis) => {
                    debug!("{}: resolved by pattern matching", bundle.entity);
                    return Ok(analysis);
                }
                Err(e) => {
                    debug!("{}: pattern match rejected ({}), querying fallback", bundle.entity, e);
                    verified.clear();
                }
            }
        } else {
            debug!(
                "{}: {} field(s) unresolved by pattern matching, querying fallback",
                bundle.entity,
                scan.missing.len()
            );
        }

        let inferred = fallback.infer(bundle).await?;
        let merged = overlay(inferred, &verified, bundle);
        merged.validate(bundle.field_names())?;
        Ok(merged)
    }
}

/// Replaces inferred facts with verified ones.
///
/// A verified field replaces the inferred record of the same name (or is
/// appended when missing). A verified presence bit takes precedence: any other
/// field claiming the same bit loses it. The bit map is rebuilt from the field
/// records, keeping inferred mappings that do not conflict. A non-zero fixed
/// block size constant overrides the inferred total.
pub fn overlay(
    mut analysis: LayoutAnalysis,
    verified: &[FieldLayout],
    bundle: &ContextBundle,
) -> LayoutAnalysis {
    for fact in verified {
        if let Some(bit) = fact.null_bit {
            for field in analysis.fields.iter_mut() {
                if field.name != fact.name && field.null_bit == Some(bit) {
                    field.null_bit = None;
                }
            }
        }
        match analysis.fields.iter_mut().find(|f| f.name == fact.name) {
            Some(slot) => *slot = fact.clone(),
            None => analysis.fields.push(fact.clone()),
        }
    }

    let verified_names: BTreeSet<&str> = verified.iter().map(|f| f.name.as_str()).collect();
    let mut null_bits: BTreeMap<u32, String> = analysis
        .fields
        .iter()
        .filter_map(|f| f.null_bit.map(|bit| (bit, f.name.clone())))
        .collect();
    for (bit, name) in std::mem::take(&mut analysis.null_bits) {
        let conflicting = verified_names.contains(name.as_str())
            || null_bits.contains_key(&bit)
            || null_bits.values().any(|n| *n == name);
        if !conflicting {
            null_bits.insert(bit, name);
        }
    }
    analysis.null_bits = null_bits;

    if bundle.constants.fixed_block_size > 0 {
        analysis.total_fixed_size = bundle.constants.fixed_block_size;
    }
    analysis
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::model::{Evidence, Field, PacketConstants, WireOffset, WireSize};
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Canned {
        answer: Value,
        calls: AtomicUsize,
    }

    impl Canned {
        fn new(answer: Value) -> Self {
            Self {
                answer,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl LayoutOracle for Canned {
        async fn complete(&self, request: OracleRequest<'_>) -> Result<Value> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            assert!(request.prompt.contains("DESERIALIZE METHOD:"));
            assert!(request.schema.is_object());
            Ok(self.answer.clone())
        }
    }

    struct Failing;

    #[async_trait]
    impl LayoutOracle for Failing {
        async fn complete(&self, request: OracleRequest<'_>) -> Result<Value> {
            Err(Error::malformed(request.entity, "no tool output"))
        }
    }

    fn bundle(deserialize: &str) -> ContextBundle {
        ContextBundle {
            entity: "Chat".into(),
            namespace: "p".into(),
            constants: PacketConstants {
                nullable_bit_field_size: 1,
                fixed_block_size: 5,
                ..PacketConstants::default()
            },
            constant_decls: Vec::new(),
            fields: vec![
                Field::new("kind", "int", false),
                Field::new("payload", "Payload", true),
            ],
            deserialize: deserialize.to_string(),
            helpers: Vec::new(),
            helper_calls: BTreeSet::new(),
            nested_refs: BTreeSet::new(),
        }
    }

    const PARTIAL: &str = r#"public static Chat deserialize(ByteBuf buf, int offset) {
        byte nullBits = buf.getByte(offset);
        Chat obj = new Chat();
        obj.kind = buf.getIntLE(offset + 1);
        if ((nullBits & 1) != 0) {
            obj.payload = Payload.decodeWith(buf, codec);
        }
        return obj;
    }"#;

    fn oracle_answer() -> Value {
        json!({
            "fields": [
                { "name": "kind", "wireOffset": 0, "wireSize": 2, "encoding": "i16le",
                  "isVariable": false, "nullBit": 1 },
                { "name": "payload", "wireOffset": -1, "wireSize": -1, "encoding": "nested",
                  "isVariable": true, "nullBit": 2 }
            ],
            "totalFixedSize": 3,
            "hasVariableSection": true,
            "variableSectionStart": 5,
            "nullBitMappings": [
                { "bit": "1", "fieldName": "kind" },
                { "bit": "2", "fieldName": "payload" }
            ]
        })
    }

    #[tokio::test]
    async fn test_pattern_only_engine_reports_unresolved() {
        let engine = InferenceEngine::offline();
        let err = engine.infer(&bundle(PARTIAL)).await.unwrap_err();
        assert!(matches!(err, Error::Unresolved { .. }));
    }

    #[tokio::test]
    async fn test_oracle_inference_marks_inferred() {
        let inference = OracleInference::new(Canned::new(oracle_answer()));
        let analysis = inference.infer(&bundle(PARTIAL)).await.unwrap();
        assert_eq!(analysis.count_evidence(Evidence::Inferred), 2);
        assert_eq!(analysis.total_fixed_size, 3);
    }

    #[tokio::test]
    async fn test_engine_overlays_verified_facts() {
        let engine = InferenceEngine::with_oracle(Canned::new(oracle_answer()));
        let analysis = engine.infer(&bundle(PARTIAL)).await.unwrap();

        let kind = analysis.field("kind").unwrap();
        assert_eq!(kind.evidence, Evidence::Verified);
        assert_eq!(kind.wire_offset, WireOffset::At(1));
        assert_eq!(kind.wire_size, WireSize::Bytes(4));
        assert_eq!(kind.null_bit, None);

        let payload = analysis.field("payload").unwrap();
        assert_eq!(payload.evidence, Evidence::Inferred);
        assert_eq!(payload.null_bit, Some(2));

        assert_eq!(analysis.null_bits.get(&1), None);
        assert_eq!(analysis.null_bits.get(&2).map(String::as_str), Some("payload"));
        assert_eq!(analysis.total_fixed_size, 5);
    }

    #[tokio::test]
    async fn test_complete_scan_skips_oracle() {
        let deserialize = r#"public static Chat deserialize(ByteBuf buf, int offset) {
        byte nullBits = buf.getByte(offset);
        Chat obj = new Chat();
        obj.kind = buf.getIntLE(offset + 1);
        if ((nullBits & 1) != 0) {
            obj.payload = Payload.deserialize(buf, offset + 5);
        }
        return obj;
    }"#;
        let oracle = Arc::new(Canned::new(oracle_answer()));
        let engine = InferenceEngine::with_oracle(Arc::clone(&oracle));
        let analysis = engine.infer(&bundle(deserialize)).await.unwrap();
        assert_eq!(oracle.calls.load(Ordering::SeqCst), 0);
        assert_eq!(analysis.count_evidence(Evidence::Verified), 2);
    }

    #[tokio::test]
    async fn test_rejected_scan_falls_back() {
        let deserialize = r#"public static Chat deserialize(ByteBuf buf, int offset) {
        byte nullBits = buf.getByte(offset);
        Chat obj = new Chat();
        if ((nullBits & 1) != 0) {
            obj.kind = buf.getIntLE(offset + 1);
            obj.payload = Payload.deserialize(buf, offset + 5);
        }
        return obj;
    }"#;
        let err = InferenceEngine::offline()
            .infer(&bundle(deserialize))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidLayout { .. }));

        let oracle = Arc::new(Canned::new(oracle_answer()));
        let engine = InferenceEngine::with_oracle(Arc::clone(&oracle));
        let analysis = engine.infer(&bundle(deserialize)).await.unwrap();
        assert_eq!(oracle.calls.load(Ordering::SeqCst), 1);
        assert_eq!(analysis.count_evidence(Evidence::Inferred), 2);
        assert_eq!(analysis.field("kind").unwrap().null_bit, Some(1));
    }

    #[tokio::test]
    async fn test_oracle_failure_propagates() {
        let engine = InferenceEngine::with_oracle(Failing);
        let err = engine.infer(&bundle(PARTIAL)).await.unwrap_err();
        assert!(matches!(err, Error::MalformedResponse { .. }));
    }

    #[test]
    fn test_prompt_lists_fields() {
        let prompt = build_prompt(&bundle(PARTIAL));
        assert!(prompt.contains("kind, payload"));
        assert!(prompt.contains("varstring-utf8"));
    }
}
