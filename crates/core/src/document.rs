//! Document and index-document shapes
//!
//! `RawDoc` is what the bundle parser emits: property name/value pairs in
//! file order. The preparer turns a raw doc into a `Document` (the stored
//! projection) plus an `IndexDocument` (the indexable projection handed to
//! the index store).

use crate::schema::PropertySchema;
use crate::types::{DocId, TermId};
use crate::value::PropertyValue;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A parsed bundle record: `(property name, raw value)` pairs in file order.
pub type RawDoc = Vec<(String, String)>;

/// Find the first value for a property name, case-insensitively.
pub fn raw_property<'a>(doc: &'a RawDoc, name: &str) -> Option<&'a str> {
    doc.iter()
        .find(|(n, _)| n.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

// ============================================================================
// Document
// ============================================================================

/// The stored projection of a document: internal id plus typed properties.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Document {
    id: DocId,
    properties: BTreeMap<String, PropertyValue>,
}

impl Document {
    /// An empty document with id 0 (unassigned).
    pub fn new() -> Self {
        Self::default()
    }

    /// The internal document id.
    pub fn id(&self) -> DocId {
        self.id
    }

    /// Assign the internal document id.
    pub fn set_id(&mut self, id: DocId) {
        self.id = id;
    }

    /// Insert or replace a property value.
    pub fn insert(&mut self, name: impl Into<String>, value: PropertyValue) {
        self.properties.insert(name.into(), value);
    }

    /// Look up a property value by exact name.
    pub fn get(&self, name: &str) -> Option<&PropertyValue> {
        self.properties.get(name)
    }

    /// Iterate `(name, value)` pairs in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &PropertyValue)> {
        self.properties.iter()
    }

    /// Number of properties on the document.
    pub fn len(&self) -> usize {
        self.properties.len()
    }

    /// Whether the document carries no properties.
    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }

    /// Complete a partial update: start from `old`'s properties, overlay
    /// `self`'s properties on top, and keep `self`'s id.
    pub fn completed_from(&self, old: &Document) -> Document {
        let mut merged = old.clone();
        for (name, value) in &self.properties {
            merged.insert(name.clone(), value.clone());
        }
        merged.set_id(self.id);
        merged
    }
}

// ============================================================================
// IndexDocument
// ============================================================================

/// Indexing flags copied from the property schema onto each index field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexFlags {
    /// Participates in the inverted index.
    pub is_index: bool,
    /// Value was produced by the language analyzer.
    pub is_analyzed: bool,
    /// Stored as a filter column.
    pub is_filter: bool,
    /// Carries multiple values.
    pub is_multi_value: bool,
    /// Document length is stored.
    pub is_store_doc_len: bool,
}

impl From<&PropertySchema> for IndexFlags {
    fn from(schema: &PropertySchema) -> Self {
        IndexFlags {
            is_index: schema.is_index,
            is_analyzed: schema.is_analyzed,
            is_filter: schema.is_filter,
            is_multi_value: schema.is_multi_value,
            is_store_doc_len: schema.is_store_doc_len,
        }
    }
}

/// Forward-index input for one analyzed property of one document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForwardInput {
    /// The document this input belongs to.
    pub doc_id: DocId,
    /// Analyzer term ids in token order.
    pub terms: Vec<TermId>,
}

/// Payload of an index field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum IndexPayload {
    /// Plain typed value (filter column or stored-only field).
    Value(PropertyValue),
    /// Forward-index input for an analyzed property.
    Forward(ForwardInput),
    /// Forward-index input plus the filter column value.
    ForwardWithFilter(ForwardInput, PropertyValue),
}

/// One field of an index document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexField {
    /// Schema property id.
    pub property_id: u32,
    /// Schema property name.
    pub name: String,
    /// Indexing flags at preparation time.
    pub flags: IndexFlags,
    /// The field payload.
    pub payload: IndexPayload,
}

/// The indexable projection of a document handed to the index store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IndexDocument {
    /// The (new) internal document id.
    pub id: DocId,
    /// The previous id for updates; `None` for fresh inserts.
    pub old_id: Option<DocId>,
    /// Prepared fields.
    pub fields: Vec<IndexField>,
}

impl IndexDocument {
    /// An empty index document for the given ids.
    pub fn new(id: DocId, old_id: Option<DocId>) -> Self {
        IndexDocument {
            id,
            old_id,
            fields: Vec::new(),
        }
    }

    /// Append a prepared field.
    pub fn push_field(
        &mut self,
        schema: &PropertySchema,
        payload: IndexPayload,
    ) {
        self.fields.push(IndexField {
            property_id: schema.id,
            name: schema.name.clone(),
            flags: IndexFlags::from(schema),
            payload,
        });
    }

    /// Find a field by property name.
    pub fn field(&self, name: &str) -> Option<&IndexField> {
        self.fields.iter().find(|f| f.name == name)
    }
}
