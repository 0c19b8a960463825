//! # wiregeo-core
//!
//! A library for recovering binary wire layouts from decompiled protocol sources.
//!
//! This crate provides the core functionality for:
//! - Extracting messages, enumerations and data types from a Java source tree
//! - Bundling each message's deserialization routine with the context needed
//!   to read it
//! - Inferring field offsets, sizes, encodings and presence bits, verified by
//!   pattern matching where possible and delegated to an oracle otherwise
//! - Emitting the result through a pluggable document emitter
//!
//! ## Architecture
//!
//! - [`source`]: Structural parsing of Java sources
//! - [`extract`]: Entity extraction over a source tree
//! - [`bundle`]: Context bundles for inference
//! - [`infer`]: Pattern matcher, oracle adapter and the composed engine
//! - [`batch`]: Bounded concurrent inference over all messages
//! - [`summary`]: Emitter seam, statistics and the JSON summary
//! - [`model`]: Entity and layout data model
//! - [`error`]: Error types and handling
//!
//! ## Example
//!
//! ```no_run
//! use wiregeo_core::{BatchController, Extractor, InferenceEngine, JsonSummary};
//! use std::path::Path;
//!
//! # async fn run() -> wiregeo_core::Result<()> {
//! let extraction = Extractor::new().extract(Path::new("./decompiled"))?;
//!
//! let controller = BatchController::new(InferenceEngine::offline());
//! let layouts = controller.run(extraction.all_messages()).await;
//!
//! let summary = JsonSummary::from_extraction("1.0", &extraction, &layouts)?;
//! summary.write_to_path(Path::new("protocol-layout.json"))?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Extensibility
//!
//! - [`LayoutInference`]: Plug in another inference strategy
//! - [`LayoutOracle`]: Back the oracle fallback with another provider
//! - [`DocumentEmitter`]: Render entities in another format
//!

#![deny(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unreachable_pub)]

pub mod batch;
pub mod bundle;
pub mod error;
pub mod extract;
pub mod infer;
pub mod model;
pub mod source;
pub mod summary;

// Re-export primary types for convenience
pub use batch::{BatchConfig, BatchController, CancelToken, Progress};
pub use bundle::ContextBundle;
pub use error::{Error, Result};
pub use extract::{resolve_root, Extraction, Extractor, ExtractorConfig};
pub use infer::{
    AnthropicOracle, InferenceEngine, LayoutInference, LayoutOracle, OracleConfig, PatternMatcher,
};
pub use model::{
    DataAggregate, Encoding, EnumEntity, Evidence, Field, FieldLayout, LayoutAnalysis,
    LayoutIndex, MessageEntity, ProtocolEntity,
};
pub use summary::{DocumentEmitter, JsonSummary, StatsEmitter};

/// Crate version for programmatic access
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
