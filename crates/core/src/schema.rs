//! Collection schema: property declarations and flags
//!
//! A collection declares its properties up front. Each property carries a
//! small-integer id, a type, indexing flags, and optional analyzer/summary
//! descriptors. Lookup is case-insensitive. Every collection must declare a
//! DATE property — build passes synthesize one per document when the bundle
//! omits it.

use crate::error::{EngineError, EngineResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Name of the external document id property.
pub const DOCID_PROPERTY: &str = "DOCID";
/// Name of the document date property.
pub const DATE_PROPERTY: &str = "DATE";

/// Declared type of a property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PropertyKind {
    /// Free text, possibly analyzed into a forward index.
    String,
    /// 64-bit integer, possibly multi-valued.
    Int,
    /// 64-bit float, possibly multi-valued.
    Float,
    /// Enumerated string value.
    Nominal,
    /// Compact `YYYYMMDDhhmmss` date.
    Date,
}

/// Language-analysis descriptor attached to analyzed string properties.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalyzerSpec {
    /// Identifier of the analyzer chain to run.
    pub id: String,
}

/// Summary/snippet descriptor for string properties.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummarySpec {
    /// Maximum display length per sentence, in characters.
    pub display_length: u32,
    /// Number of sentences to keep; clamped to at least 1.
    pub summary_num: u32,
}

/// Declaration of a single property.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PropertySchema {
    /// Small-integer property id, starting at 1.
    pub id: u32,
    /// Property name as it appears in bundle files.
    pub name: String,
    /// Declared type.
    pub kind: PropertyKind,
    /// Whether the property participates in the inverted index.
    pub is_index: bool,
    /// Whether string values run through the language analyzer.
    pub is_analyzed: bool,
    /// Whether the property is filterable (stored as a filter column).
    pub is_filter: bool,
    /// Whether the property may carry multiple comma-separated values.
    pub is_multi_value: bool,
    /// Whether document length is stored for this property.
    pub is_store_doc_len: bool,
    /// Analyzer descriptor; present only for analyzed properties.
    pub analyzer: Option<AnalyzerSpec>,
    /// Summary descriptor; present when snippets are requested.
    pub summary: Option<SummarySpec>,
}

impl PropertySchema {
    /// A plain stored property of the given type: not indexed, not analyzed.
    pub fn stored(id: u32, name: impl Into<String>, kind: PropertyKind) -> Self {
        PropertySchema {
            id,
            name: name.into(),
            kind,
            is_index: false,
            is_analyzed: false,
            is_filter: false,
            is_multi_value: false,
            is_store_doc_len: false,
            analyzer: None,
            summary: None,
        }
    }

    /// An indexed, filterable, non-analyzed property (R-type compatible).
    pub fn filter(id: u32, name: impl Into<String>, kind: PropertyKind) -> Self {
        PropertySchema {
            is_index: true,
            is_filter: true,
            ..Self::stored(id, name, kind)
        }
    }

    /// An analyzed full-text property with the given analyzer id.
    pub fn analyzed(id: u32, name: impl Into<String>, analyzer_id: impl Into<String>) -> Self {
        PropertySchema {
            is_index: true,
            is_analyzed: true,
            analyzer: Some(AnalyzerSpec {
                id: analyzer_id.into(),
            }),
            ..Self::stored(id, name, PropertyKind::String)
        }
    }

    /// Attach a summary descriptor.
    pub fn with_summary(mut self, display_length: u32, summary_num: u32) -> Self {
        self.summary = Some(SummarySpec {
            display_length,
            summary_num,
        });
        self
    }

    /// Mark the property multi-valued.
    pub fn multi_value(mut self) -> Self {
        self.is_multi_value = true;
        self
    }

    /// Whether a change to this property may be absorbed by an R-type
    /// (column-only) update: either it needs no re-tokenization
    /// (indexed + filterable + not analyzed) or it is not indexed at all.
    pub fn is_rtype_compatible(&self) -> bool {
        (self.is_index && self.is_filter && !self.is_analyzed) || !self.is_index
    }
}

/// The declared property set of a collection.
#[derive(Debug, Clone)]
pub struct CollectionSchema {
    properties: Vec<PropertySchema>,
    by_name: HashMap<String, usize>,
    date_index: usize,
}

impl CollectionSchema {
    /// Build a schema from property declarations.
    ///
    /// Fails if no DATE property is declared — the build path needs one to
    /// synthesize timestamps into.
    pub fn new(properties: Vec<PropertySchema>) -> EngineResult<Self> {
        let mut by_name = HashMap::with_capacity(properties.len());
        let mut date_index = None;
        for (i, prop) in properties.iter().enumerate() {
            let lower = prop.name.to_lowercase();
            if lower == DATE_PROPERTY.to_lowercase() {
                date_index = Some(i);
            }
            by_name.insert(lower, i);
        }
        let date_index = date_index
            .ok_or_else(|| EngineError::invalid_config("schema has no DATE property"))?;
        Ok(CollectionSchema {
            properties,
            by_name,
            date_index,
        })
    }

    /// Case-insensitive property lookup.
    pub fn get(&self, name: &str) -> Option<&PropertySchema> {
        self.by_name
            .get(&name.to_lowercase())
            .map(|&i| &self.properties[i])
    }

    /// The declared DATE property.
    pub fn date_property(&self) -> &PropertySchema {
        &self.properties[self.date_index]
    }

    /// Iterate all declared properties in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = &PropertySchema> {
        self.properties.iter()
    }

    /// Number of declared properties.
    pub fn len(&self) -> usize {
        self.properties.len()
    }

    /// Whether the schema declares no properties.
    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }
}
