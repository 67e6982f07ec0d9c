//! Core types and contracts for vireo
//!
//! This crate defines the foundational pieces shared by the pipeline:
//! - DocId / ItemId / DocKey: identifier types
//! - PropertyKind / PropertySchema / CollectionSchema: the declared schema
//! - PropertyValue: the tagged value union with its single conversion point
//! - Document / IndexDocument: stored and indexable projections
//! - EngineError / EngineResult: the unified error surface
//! - CollectionConfig: per-collection `vireo.toml` configuration
//! - traits: collaborator contracts (stores, analyzer, hooks, matrices)

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod document;
pub mod error;
pub mod schema;
pub mod traits;
pub mod types;
pub mod value;

pub use config::{CollectionConfig, CONFIG_FILE_NAME};
pub use document::{
    raw_property, Document, ForwardInput, IndexDocument, IndexField, IndexFlags, IndexPayload,
    RawDoc,
};
pub use error::{EngineError, EngineResult};
pub use schema::{
    AnalyzerSpec, CollectionSchema, PropertyKind, PropertySchema, SummarySpec, DATE_PROPERTY,
    DOCID_PROPERTY,
};
pub use types::{CancellationToken, DocId, DocKey, ItemId, TermId};
pub use value::PropertyValue;
