//! Collaborator contracts
//!
//! The pipeline is parameterized over its storage and analysis engines.
//! Everything behind these traits is an external collaborator: the engine
//! only relies on the narrow interfaces below. In-memory reference
//! implementations live in `vireo_engine::memstore`.

use crate::document::{Document, IndexDocument};
use crate::error::EngineResult;
use crate::schema::AnalyzerSpec;
use crate::types::{DocId, DocKey, ItemId, TermId};
use crate::value::PropertyValue;

// ============================================================================
// Id manager
// ============================================================================

/// Maps 128-bit content keys to internal document ids.
///
/// Invariant: for a given key, at most one live docid. Issued docids are
/// strictly increasing.
pub trait IdManager: Send + Sync {
    /// Look up the live docid for a key.
    fn resolve(&self, key: DocKey) -> Option<DocId>;

    /// Issue a fresh docid for the key, retiring any previous mapping.
    /// Returns `(previous docid if any, new docid)`.
    fn assign_new(&self, key: DocKey) -> EngineResult<(Option<DocId>, DocId)>;

    /// Retire the key's current docid and issue a new one.
    /// Returns `None` when the key has no live mapping.
    fn update_existing(&self, key: DocKey) -> Option<(DocId, DocId)>;

    /// Persist pending id mappings.
    fn flush(&self) -> EngineResult<()>;
}

// ============================================================================
// Document store
// ============================================================================

/// The durable document store.
pub trait DocumentStore: Send + Sync {
    /// Insert a fully prepared document under its id.
    fn insert_document(&self, doc: &Document) -> EngineResult<()>;

    /// Mark a document deleted. Returns `false` when the id is unknown or
    /// already deleted.
    fn remove_document(&self, id: DocId) -> bool;

    /// Rewrite only the properties present on `doc`, preserving the rest.
    fn update_partial_document(&self, doc: &Document) -> EngineResult<()>;

    /// Fetch a live document by id.
    fn get_document(&self, id: DocId) -> Option<Document>;

    /// Fetch a single property value of a live document.
    fn get_property_value(&self, id: DocId, name: &str) -> Option<PropertyValue>;

    /// Highest docid ever stored (0 when empty).
    fn max_doc_id(&self) -> DocId;

    /// Whether the id is marked deleted.
    fn is_deleted(&self, id: DocId) -> bool;

    /// Persist pending writes.
    fn flush(&self) -> EngineResult<()>;
}

// ============================================================================
// Index store
// ============================================================================

/// Commit behavior selected per build pass from the total bundle size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexMode {
    /// Commit eagerly; suited to small incremental loads.
    Realtime,
    /// Defer the commit to the end of the pass.
    Batch,
}

/// The inverted-index storage engine.
pub trait IndexStore: Send + Sync {
    /// Index a fresh document.
    fn insert_document(&self, doc: &IndexDocument) -> EngineResult<()>;

    /// Replace the old docid's postings with the new document's.
    fn update_document(&self, doc: &IndexDocument) -> EngineResult<()>;

    /// Rewrite only the filter columns carried by `new`, using `old` for
    /// the previous column values. The docid is unchanged.
    fn update_rtype_document(
        &self,
        old: &IndexDocument,
        new: &IndexDocument,
    ) -> EngineResult<()>;

    /// Remove a document from the index.
    fn remove_document(&self, id: DocId) -> EngineResult<()>;

    /// Number of live documents in the index.
    fn num_docs(&self) -> u64;

    /// Select the commit behavior for the coming writes.
    fn set_index_mode(&self, mode: IndexMode);

    /// Commit pending index mutations.
    fn commit(&self) -> EngineResult<()>;

    /// Pause background segment merging (held during mining).
    fn pause_merge(&self);

    /// Resume background segment merging.
    fn resume_merge(&self);

    /// Merge segments down to an optimal layout.
    fn optimize(&self) -> EngineResult<()>;

    /// Persist pending index state.
    fn flush(&self) -> EngineResult<()>;
}

// ============================================================================
// Language analysis
// ============================================================================

/// Token granularity requested from the analyzer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnalysisGranularity {
    /// Whole-field tokenization.
    Field,
    /// Sentence-level tokenization.
    Sentence,
}

/// The language analyzer building forward-index inputs.
pub trait LanguageAnalyzer: Send + Sync {
    /// Tokenize `text` with the given analyzer chain and return term ids.
    fn term_ids(
        &self,
        text: &str,
        analyzer: &AnalyzerSpec,
        granularity: AnalysisGranularity,
    ) -> EngineResult<Vec<TermId>>;
}

// ============================================================================
// Hooks and mining
// ============================================================================

/// Observer of index mutations, consulted before each write.
///
/// Hook timestamps are microsecond-scale; a `false` return vetoes the write.
pub trait IndexingHook: Send + Sync {
    /// About to insert. Veto by returning `false`.
    fn on_insert(&self, doc: &Document, index_doc: &IndexDocument, timestamp_us: i64) -> bool;

    /// About to update. Veto by returning `false`.
    fn on_update(
        &self,
        doc: &Document,
        index_doc: &IndexDocument,
        timestamp_us: i64,
        rtype: bool,
    ) -> bool;

    /// About to delete. Veto by returning `false`.
    fn on_delete(&self, id: DocId, timestamp_us: i64) -> bool;

    /// A build pass finished its dispatch loop. Returning `false` aborts
    /// the pass.
    fn on_finish(&self) -> bool;
}

/// The mining collaborator run after each build pass under a merge pause.
pub trait MiningService: Send + Sync {
    /// Run a mining pass over the collection.
    fn mine_collection(&self) -> EngineResult<()>;
}

// ============================================================================
// Recommendation collaborators
// ============================================================================

/// Resolves external item strings to item ids.
pub trait ItemIdResolver: Send + Sync {
    /// Look up (or intern) the item id for an item string.
    fn resolve(&self, item: &str) -> Option<ItemId>;
}

/// A co-occurrence matrix channel.
///
/// `old_items` is the set already attributed to the entity (session or
/// user); `new_items` are the arrivals to correlate against it.
pub trait RecommendMatrix: Send + Sync {
    /// Feed a co-occurrence update into the matrix.
    fn update(&self, old_items: &[ItemId], new_items: &[ItemId]);
}

/// The similarity-matrix rebuild collaborator.
pub trait UpdateRecommendBase: Send + Sync {
    /// Rebuild the purchase similarity matrix from accumulated updates.
    fn build_purchase_sim_matrix(&self) -> EngineResult<()>;

    /// Persist the recommend matrix.
    fn flush_recommend_matrix(&self) -> EngineResult<()>;

    /// Whether accumulated updates warrant a similarity rebuild.
    fn need_rebuild_purchase_sim_matrix(&self) -> bool;
}
