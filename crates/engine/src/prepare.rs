//! Document preparation: the central mutation classifier
//!
//! `DocumentPreparer` turns a raw bundle record into the stored document
//! plus its indexable projection, deciding along the way whether an update
//! is R-type (column-only rewrite, docid preserved) or a full reindex
//! (old docid retired, new docid issued).
//!
//! Classification is conservative: if any changed property would require
//! re-tokenization, the update falls back to a full reindex. The
//! classification pass walks the record once before preparation does; it
//! is O(properties) and not a hot path.

use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};
use vireo_core::traits::{
    AnalysisGranularity, DocumentStore, IdManager, LanguageAnalyzer,
};
use vireo_core::types::{self, DocId, DocKey};
use vireo_core::{
    CollectionConfig, CollectionSchema, Document, EngineError, EngineResult, ForwardInput,
    IndexDocument, IndexPayload, PropertyKind, PropertySchema, PropertyValue, RawDoc,
    DATE_PROPERTY, DOCID_PROPERTY,
};

/// Result of preparing one raw record.
#[derive(Debug)]
pub struct Prepared {
    /// The stored projection, partial-completed for non-R-type updates.
    pub document: Document,
    /// The indexable projection.
    pub index_document: IndexDocument,
    /// Content hash of the external DOCID.
    pub key: DocKey,
    /// Previous docid for updates; `None` for fresh inserts.
    pub old_id: Option<DocId>,
    /// Whether this mutation is an R-type column rewrite.
    pub rtype: bool,
    /// New values of the changed R-type columns.
    pub rtype_fields: BTreeMap<String, PropertyValue>,
    /// Product source string, when the source field is configured.
    pub source: Option<String>,
    /// Effective timestamp of the mutation, epoch seconds.
    pub timestamp: i64,
}

struct RtypeCheck {
    rtype: bool,
    changed: bool,
    fields: BTreeMap<String, PropertyValue>,
}

impl RtypeCheck {
    fn failed() -> Self {
        RtypeCheck {
            rtype: false,
            changed: false,
            fields: BTreeMap::new(),
        }
    }
}

/// Builds in-memory documents and classifies mutations.
pub struct DocumentPreparer {
    schema: Arc<CollectionSchema>,
    config: Arc<CollectionConfig>,
    id_manager: Arc<dyn IdManager>,
    doc_store: Arc<dyn DocumentStore>,
    analyzer: Arc<dyn LanguageAnalyzer>,
}

impl DocumentPreparer {
    /// Wire a preparer to its collaborators.
    pub fn new(
        schema: Arc<CollectionSchema>,
        config: Arc<CollectionConfig>,
        id_manager: Arc<dyn IdManager>,
        doc_store: Arc<dyn DocumentStore>,
        analyzer: Arc<dyn LanguageAnalyzer>,
    ) -> Self {
        DocumentPreparer {
            schema,
            config,
            id_manager,
            doc_store,
            analyzer,
        }
    }

    /// Prepare one raw record.
    ///
    /// `insert` selects insert semantics; updates whose DOCID does not
    /// resolve fall back to insert. `bundle_timestamp` (epoch seconds) is
    /// used when the record carries no DATE of its own.
    ///
    /// Returns `Ok(None)` for the benign no-op case: an update where no
    /// property value actually changed.
    pub fn prepare(
        &self,
        raw: &RawDoc,
        insert: bool,
        bundle_timestamp: i64,
    ) -> EngineResult<Option<Prepared>> {
        if raw.is_empty() {
            return Err(EngineError::schema("empty record"));
        }

        let mut insert_mode = insert;
        let mut document = Document::new();
        let mut rtype = false;
        let mut rtype_fields = BTreeMap::new();
        let mut old_id: Option<DocId> = None;
        let mut source = None;
        let mut timestamp = bundle_timestamp;
        let mut date_in_doc = false;
        let mut key: Option<DocKey> = None;

        for (name, value) in raw {
            if let Some(source_field) = &self.config.product_source_field {
                if name.eq_ignore_ascii_case(source_field) {
                    source = Some(value.clone());
                }
            }

            if name.eq_ignore_ascii_case(DOCID_PROPERTY) {
                let doc_key = DocKey::from_name(value.trim());
                key = Some(doc_key);

                if !insert_mode {
                    let check = self.check_rtype(raw);
                    rtype = check.rtype;
                    rtype_fields = check.fields;
                    if rtype && !check.changed {
                        debug!(
                            target: "vireo::worker",
                            docid = %value,
                            "skipping update: no property value changed"
                        );
                        return Ok(None);
                    }
                    match self.create_update_doc_id(doc_key, rtype) {
                        Some((previous, new_id)) => {
                            old_id = previous;
                            document.set_id(new_id);
                        }
                        // Unknown content hash: the update becomes an insert.
                        None => insert_mode = true,
                    }
                }

                if insert_mode {
                    let new_id = self.create_insert_doc_id(doc_key)?;
                    document.set_id(new_id);
                }
                document.insert(DOCID_PROPERTY, PropertyValue::Text(value.clone()));
            } else if name.eq_ignore_ascii_case(DATE_PROPERTY) {
                date_in_doc = true;
                let seconds = types::parse_compact_date(value)?;
                timestamp = seconds;
                document.insert(
                    self.schema.date_property().name.clone(),
                    PropertyValue::Text(types::compact_date_string(seconds)),
                );
            } else if let Some(prop) = self.schema.get(name) {
                match prop.kind {
                    PropertyKind::String | PropertyKind::Nominal => {
                        document.insert(prop.name.clone(), PropertyValue::Text(value.clone()));
                        if prop.is_analyzed {
                            if let Some(summary) = prop.summary {
                                // At least one sentence is required for a summary.
                                let num = summary.summary_num.max(1);
                                let blocks =
                                    make_sentence_blocks(value, summary.display_length, num);
                                document.insert(
                                    format!("{}.blocks", prop.name),
                                    PropertyValue::Blocks(blocks),
                                );
                            }
                        }
                    }
                    PropertyKind::Int | PropertyKind::Float => {
                        // Numeric casts happen at index preparation; the
                        // stored projection keeps the raw text.
                        document.insert(prop.name.clone(), PropertyValue::Text(value.clone()));
                    }
                    PropertyKind::Date => {
                        let seconds = types::parse_compact_date(value)?;
                        document.insert(
                            prop.name.clone(),
                            PropertyValue::Text(types::compact_date_string(seconds)),
                        );
                    }
                }
            }
            // Unknown properties are not part of the schema and are dropped.
        }

        let key = key.ok_or_else(|| EngineError::schema("record has no DOCID"))?;

        if !date_in_doc {
            document.insert(
                self.schema.date_property().name.clone(),
                PropertyValue::Text(types::compact_date_string(timestamp)),
            );
        }

        if !insert_mode && !rtype {
            let previous =
                old_id.ok_or_else(|| EngineError::store("update lost its previous docid"))?;
            let old_doc = self.doc_store.get_document(previous).ok_or_else(|| {
                EngineError::store(format!("old document {} missing for update", previous))
            })?;
            document = document.completed_from(&old_doc);
        }

        let index_document = self.prepare_index_document(old_id, timestamp, &document)?;

        Ok(Some(Prepared {
            document,
            index_document,
            key,
            old_id,
            rtype,
            rtype_fields,
            source,
            timestamp,
        }))
    }

    /// R-type classification: every differing property must be either
    /// (indexed ∧ filterable ∧ not-analyzed) or not indexed at all.
    ///
    /// Any violation, unknown property, unresolvable DOCID, or unreadable
    /// old value fails the classification, which falls back to a full
    /// reindex.
    fn check_rtype(&self, raw: &RawDoc) -> RtypeCheck {
        let mut doc_id: Option<DocId> = None;
        let mut changed = false;
        let mut fields = BTreeMap::new();

        for (name, value) in raw {
            let Some(prop) = self.schema.get(name) else {
                return RtypeCheck::failed();
            };

            if name.eq_ignore_ascii_case(DOCID_PROPERTY) {
                match self.id_manager.resolve(DocKey::from_name(value.trim())) {
                    Some(id) => doc_id = Some(id),
                    None => return RtypeCheck::failed(),
                }
                continue;
            }

            let mut new_text = value.clone();
            if name.eq_ignore_ascii_case(DATE_PROPERTY) {
                match types::parse_compact_date(value) {
                    Ok(seconds) => new_text = types::compact_date_string(seconds),
                    Err(_) => return RtypeCheck::failed(),
                }
            }

            let Some(doc_id) = doc_id else {
                // DOCID has to come first; without it there is nothing to
                // compare against.
                return RtypeCheck::failed();
            };
            let Some(old_value) = self.doc_store.get_property_value(doc_id, &prop.name) else {
                return RtypeCheck::failed();
            };

            if new_text == old_value.compare_text() {
                continue;
            }

            if prop.is_index && prop.is_filter && !prop.is_analyzed {
                let parsed = PropertyValue::try_from_raw(&new_text, prop.kind)
                    .unwrap_or(PropertyValue::Text(new_text.clone()));
                fields.insert(prop.name.clone(), parsed);
                changed = true;
            } else if !prop.is_index {
                changed = true;
            } else {
                return RtypeCheck::failed();
            }
        }

        RtypeCheck {
            rtype: true,
            changed,
            fields,
        }
    }

    /// Docid assignment for updates. `None` means the key is unknown and
    /// the operation becomes an insert.
    fn create_update_doc_id(&self, key: DocKey, rtype: bool) -> Option<(Option<DocId>, DocId)> {
        if rtype {
            // R-type updates keep the docid.
            let id = self.id_manager.resolve(key)?;
            Some((Some(id), id))
        } else {
            let (old, new) = self.id_manager.update_existing(key)?;
            Some((Some(old), new))
        }
    }

    /// Docid assignment for inserts.
    pub(crate) fn create_insert_doc_id(&self, key: DocKey) -> EngineResult<DocId> {
        let new_id = match self.id_manager.resolve(key) {
            Some(existing) => {
                if !self.doc_store.is_deleted(existing) {
                    return Err(EngineError::id_conflict(format!(
                        "docid {} already inserted for key {}",
                        existing, key
                    )));
                }
                // Deleted before: reissue under a fresh id.
                let (_, new_id) = self
                    .id_manager
                    .update_existing(key)
                    .ok_or_else(|| EngineError::id_conflict(format!("key {} vanished", key)))?;
                new_id
            }
            None => self.id_manager.assign_new(key)?.1,
        };

        if new_id <= self.doc_store.max_doc_id() {
            return Err(EngineError::id_conflict(format!(
                "assigned docid {} is not above the store's max docid",
                new_id
            )));
        }
        Ok(new_id)
    }

    /// Build the indexable projection of a prepared document.
    pub fn prepare_index_document(
        &self,
        old_id: Option<DocId>,
        timestamp: i64,
        document: &Document,
    ) -> EngineResult<IndexDocument> {
        let mut index_doc = IndexDocument::new(document.id(), old_id);
        let date_name = self.schema.date_property().name.clone();

        for (name, value) in document.iter() {
            if name.eq_ignore_ascii_case(DOCID_PROPERTY) {
                continue;
            }
            if name.eq_ignore_ascii_case(&date_name) {
                let date_prop = self.schema.date_property().clone();
                let date_prop = PropertySchema {
                    is_index: true,
                    is_filter: true,
                    is_analyzed: false,
                    is_multi_value: false,
                    ..date_prop
                };
                index_doc.push_field(&date_prop, IndexPayload::Value(PropertyValue::Int(timestamp)));
                continue;
            }
            let Some(prop) = self.schema.get(name) else {
                // Derived names like `Title.blocks` live only in the
                // document store.
                continue;
            };

            match prop.kind {
                PropertyKind::String | PropertyKind::Nominal => {
                    let Some(text) = value.as_text() else { continue };
                    if text.is_empty() {
                        continue;
                    }
                    let payload = if !prop.is_index {
                        IndexPayload::Value(PropertyValue::Text(text.to_string()))
                    } else {
                        match &prop.analyzer {
                            None => IndexPayload::Value(self.filter_value(prop, text)),
                            Some(spec) => {
                                let terms = self.analyzer.term_ids(
                                    text,
                                    spec,
                                    AnalysisGranularity::Sentence,
                                )?;
                                let forward = ForwardInput {
                                    doc_id: document.id(),
                                    terms,
                                };
                                if prop.is_filter {
                                    IndexPayload::ForwardWithFilter(
                                        forward,
                                        self.filter_value(prop, text),
                                    )
                                } else {
                                    IndexPayload::Forward(forward)
                                }
                            }
                        }
                    };
                    index_doc.push_field(prop, payload);
                }
                PropertyKind::Int | PropertyKind::Float => {
                    if !prop.is_index {
                        continue;
                    }
                    let raw = value.compare_text();
                    match numeric_value(prop, &raw) {
                        Some(parsed) => {
                            index_doc.push_field(prop, IndexPayload::Value(parsed))
                        }
                        None => {
                            warn!(
                                target: "vireo::worker",
                                docid = document.id(),
                                property = %prop.name,
                                value = %raw,
                                "unparseable numeric value, field not indexed"
                            );
                        }
                    }
                }
                PropertyKind::Date => {
                    // Secondary date-typed properties index as seconds.
                    if let Some(text) = value.as_text() {
                        if let Ok(seconds) = types::parse_compact_date(text) {
                            index_doc
                                .push_field(prop, IndexPayload::Value(PropertyValue::Int(seconds)));
                        }
                    }
                }
            }
        }

        Ok(index_doc)
    }

    /// Snapshot the previous values of the R-type columns an update is
    /// about to rewrite. Fails when the old document is missing.
    pub fn prepare_partial_document(&self, document: &Document) -> EngineResult<IndexDocument> {
        let old_doc = self.doc_store.get_document(document.id()).ok_or_else(|| {
            EngineError::store(format!(
                "document {} missing for partial update",
                document.id()
            ))
        })?;

        let date_name = self.schema.date_property().name.clone();
        let mut index_doc = IndexDocument::new(document.id(), Some(document.id()));

        for (name, _) in document.iter() {
            if name.eq_ignore_ascii_case(DOCID_PROPERTY) || name.eq_ignore_ascii_case(&date_name) {
                continue;
            }
            let Some(prop) = self.schema.get(name) else {
                continue;
            };
            if !(prop.is_index && prop.is_filter && !prop.is_analyzed) {
                continue;
            }
            let Some(old_value) = old_doc.get(&prop.name) else {
                continue;
            };
            let raw = old_value.compare_text();
            let payload = match prop.kind {
                PropertyKind::Int | PropertyKind::Float => match numeric_value(prop, &raw) {
                    Some(parsed) => IndexPayload::Value(parsed),
                    None => continue,
                },
                _ => IndexPayload::Value(self.filter_value(prop, &raw)),
            };
            index_doc.push_field(prop, payload);
        }

        Ok(index_doc)
    }

    fn filter_value(&self, prop: &PropertySchema, text: &str) -> PropertyValue {
        if prop.is_filter && prop.is_multi_value {
            PropertyValue::text_list(text)
        } else {
            PropertyValue::Text(text.to_string())
        }
    }
}

/// Parse a numeric property value, honoring declared multi-value columns.
fn numeric_value(prop: &PropertySchema, raw: &str) -> Option<PropertyValue> {
    let parsed = PropertyValue::try_from_raw(raw, prop.kind).ok()?;
    if prop.is_multi_value {
        // Declared multi-value columns always carry lists.
        Some(match parsed {
            PropertyValue::Int(v) => PropertyValue::IntList(vec![v]),
            PropertyValue::Float(v) => PropertyValue::FloatList(vec![v]),
            other => other,
        })
    } else {
        Some(parsed)
    }
}

/// Compute sentence offset blocks for summaries: flat `[start, end, ...]`
/// character offsets, each sentence capped at `display_length` characters,
/// at most `summary_num` sentences.
pub fn make_sentence_blocks(text: &str, display_length: u32, summary_num: u32) -> Vec<u32> {
    const TERMINATORS: [char; 6] = ['.', '!', '?', '\u{3002}', '\u{ff01}', '\u{ff1f}'];

    let display_length = display_length.max(1) as usize;
    let mut blocks = Vec::new();
    let mut start = 0usize;
    let mut count = 0u32;

    let chars: Vec<char> = text.chars().collect();
    for (pos, c) in chars.iter().enumerate() {
        let is_end = TERMINATORS.contains(c) || pos + 1 == chars.len();
        if !is_end {
            continue;
        }
        let end = (pos + 1).min(start + display_length);
        if end > start {
            blocks.push(start as u32);
            blocks.push(end as u32);
            count += 1;
            if count >= summary_num {
                break;
            }
        }
        start = pos + 1;
    }

    blocks
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memstore::{MemDocumentStore, MemIdManager, WhitespaceAnalyzer};
    use std::path::Path;

    fn schema() -> Arc<CollectionSchema> {
        Arc::new(
            CollectionSchema::new(vec![
                PropertySchema::filter(1, "DOCID", PropertyKind::String),
                PropertySchema::filter(2, "DATE", PropertyKind::Date),
                PropertySchema::analyzed(3, "Title", "la_standard"),
                PropertySchema::filter(4, "Price", PropertyKind::Int),
                PropertySchema::stored(5, "Note", PropertyKind::String),
                PropertySchema::filter(6, "Tags", PropertyKind::String).multi_value(),
            ])
            .unwrap(),
        )
    }

    struct Fixture {
        preparer: DocumentPreparer,
        doc_store: Arc<MemDocumentStore>,
        analyzer: Arc<WhitespaceAnalyzer>,
    }

    fn fixture() -> Fixture {
        let doc_store = Arc::new(MemDocumentStore::new());
        let analyzer = Arc::new(WhitespaceAnalyzer::new());
        let preparer = DocumentPreparer::new(
            schema(),
            Arc::new(CollectionConfig::for_collection("c", Path::new("/tmp/c"))),
            Arc::new(MemIdManager::new()),
            Arc::clone(&doc_store) as Arc<dyn DocumentStore>,
            Arc::clone(&analyzer) as Arc<dyn LanguageAnalyzer>,
        );
        Fixture {
            preparer,
            doc_store,
            analyzer,
        }
    }

    fn raw(entries: &[(&str, &str)]) -> RawDoc {
        entries
            .iter()
            .map(|(n, v)| (n.to_string(), v.to_string()))
            .collect()
    }

    fn insert(fx: &Fixture, entries: &[(&str, &str)]) -> Prepared {
        let prepared = fx
            .preparer
            .prepare(&raw(entries), true, 1_700_000_000)
            .unwrap()
            .unwrap();
        fx.doc_store.insert_document(&prepared.document).unwrap();
        prepared
    }

    #[test]
    fn insert_assigns_id_and_synthesizes_date() {
        let fx = fixture();
        let prepared = insert(&fx, &[("DOCID", "A"), ("Title", "hello world")]);

        assert!(prepared.document.id() > 0);
        assert!(!prepared.rtype);
        assert!(prepared.old_id.is_none());
        // No DATE in the record: synthesized from the build timestamp.
        let date = prepared.document.get("DATE").unwrap().as_text().unwrap();
        assert_eq!(date, types::compact_date_string(1_700_000_000));
    }

    #[test]
    fn explicit_date_sets_timestamp() {
        let fx = fixture();
        let prepared = insert(&fx, &[("DOCID", "A"), ("DATE", "20091009163011")]);
        assert_eq!(prepared.timestamp, types::parse_compact_date("20091009163011").unwrap());
    }

    #[test]
    fn duplicate_insert_is_id_conflict() {
        let fx = fixture();
        insert(&fx, &[("DOCID", "A"), ("Title", "x")]);
        let err = fx
            .preparer
            .prepare(&raw(&[("DOCID", "A"), ("Title", "y")]), true, 0)
            .unwrap_err();
        assert!(matches!(err, EngineError::IdConflict { .. }));
    }

    #[test]
    fn rtype_update_preserves_docid_and_skips_analysis() {
        let fx = fixture();
        let original = insert(&fx, &[("DOCID", "A"), ("Title", "x y"), ("Price", "10")]);
        let analyzer_calls = fx.analyzer.call_count();

        let updated = fx
            .preparer
            .prepare(&raw(&[("DOCID", "A"), ("Price", "12")]), false, 0)
            .unwrap()
            .unwrap();

        assert!(updated.rtype);
        assert_eq!(updated.document.id(), original.document.id());
        assert_eq!(
            updated.rtype_fields.get("Price"),
            Some(&PropertyValue::Int(12))
        );
        // Only the changed filter column flows; the title was not retokenized.
        assert_eq!(fx.analyzer.call_count(), analyzer_calls);
    }

    #[test]
    fn analyzed_change_falls_back_to_full_update() {
        let fx = fixture();
        let original = insert(&fx, &[("DOCID", "A"), ("Title", "x"), ("Price", "10")]);

        let updated = fx
            .preparer
            .prepare(&raw(&[("DOCID", "A"), ("Title", "y")]), false, 0)
            .unwrap()
            .unwrap();

        assert!(!updated.rtype);
        assert_eq!(updated.old_id, Some(original.document.id()));
        assert!(updated.document.id() > original.document.id());
        // Partial completion carried the untouched price over.
        assert_eq!(
            updated.document.get("Price").unwrap().as_text(),
            Some("10")
        );
    }

    #[test]
    fn unchanged_update_is_a_noop() {
        let fx = fixture();
        insert(&fx, &[("DOCID", "A"), ("Price", "10")]);
        let result = fx
            .preparer
            .prepare(&raw(&[("DOCID", "A"), ("Price", "10")]), false, 0)
            .unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn update_of_unknown_docid_becomes_insert() {
        let fx = fixture();
        let prepared = fx
            .preparer
            .prepare(&raw(&[("DOCID", "Z"), ("Price", "10")]), false, 0)
            .unwrap()
            .unwrap();
        assert!(prepared.old_id.is_none());
        assert!(prepared.document.id() > 0);
    }

    #[test]
    fn missing_docid_is_schema_violation() {
        let fx = fixture();
        let err = fx
            .preparer
            .prepare(&raw(&[("Title", "x")]), true, 0)
            .unwrap_err();
        assert!(matches!(err, EngineError::SchemaViolation { .. }));
    }

    #[test]
    fn missing_old_document_fails_full_update() {
        let fx = fixture();
        // Map the key without storing the document.
        let prepared = fx
            .preparer
            .prepare(&raw(&[("DOCID", "A"), ("Title", "x")]), true, 0)
            .unwrap()
            .unwrap();
        drop(prepared);
        let err = fx
            .preparer
            .prepare(&raw(&[("DOCID", "A"), ("Title", "y")]), false, 0)
            .unwrap_err();
        assert!(matches!(err, EngineError::StoreError { .. }));
    }

    #[test]
    fn forward_index_built_for_analyzed_property() {
        let fx = fixture();
        let prepared = insert(&fx, &[("DOCID", "A"), ("Title", "hello world")]);
        let field = prepared.index_document.field("Title").unwrap();
        match &field.payload {
            IndexPayload::Forward(forward) => {
                assert_eq!(forward.doc_id, prepared.document.id());
                assert_eq!(forward.terms.len(), 2);
            }
            other => panic!("expected forward payload, got {:?}", other),
        }
    }

    #[test]
    fn multi_value_filter_splits_on_commas() {
        let fx = fixture();
        let prepared = insert(&fx, &[("DOCID", "A"), ("Tags", "red, blue ,green")]);
        let field = prepared.index_document.field("Tags").unwrap();
        assert_eq!(
            field.payload,
            IndexPayload::Value(PropertyValue::TextList(vec![
                "red".into(),
                "blue".into(),
                "green".into()
            ]))
        );
    }

    #[test]
    fn numeric_range_value_indexes_as_list() {
        let fx = fixture();
        let prepared = insert(&fx, &[("DOCID", "A"), ("Price", "10~20")]);
        let field = prepared.index_document.field("Price").unwrap();
        assert_eq!(
            field.payload,
            IndexPayload::Value(PropertyValue::IntList(vec![10, 20]))
        );
    }

    #[test]
    fn partial_document_snapshots_old_columns() {
        let fx = fixture();
        insert(&fx, &[("DOCID", "A"), ("Price", "10"), ("Title", "x")]);

        let updated = fx
            .preparer
            .prepare(&raw(&[("DOCID", "A"), ("Price", "12")]), false, 0)
            .unwrap()
            .unwrap();
        assert!(updated.rtype);

        let old_columns = fx
            .preparer
            .prepare_partial_document(&updated.document)
            .unwrap();
        let field = old_columns.field("Price").unwrap();
        assert_eq!(field.payload, IndexPayload::Value(PropertyValue::Int(10)));
        // Analyzed columns are never part of an R-type snapshot.
        assert!(old_columns.field("Title").is_none());
    }

    #[test]
    fn sentence_blocks_respect_bounds() {
        // Three sentences, summary capped at 2, display length 5
        let blocks = make_sentence_blocks("abcdefgh. second one. third.", 5, 2);
        assert_eq!(blocks.len(), 4);
        assert_eq!(&blocks[0..2], &[0, 5]);
        // Second sentence starts after the terminator
        assert_eq!(blocks[2], 9);

        // Text without terminators still yields one block
        let single = make_sentence_blocks("no terminator here", 100, 1);
        assert_eq!(single.len(), 2);
    }
}
