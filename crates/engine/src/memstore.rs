//! In-memory reference implementations of the collaborator contracts
//!
//! These back the unit and scenario tests, and serve as executable
//! documentation of the store contracts. They are deliberately simple:
//! DashMap-backed maps with the same invariants the durable engines keep.

use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use vireo_core::traits::{
    AnalysisGranularity, DocumentStore, IdManager, IndexMode, IndexStore, IndexingHook,
    ItemIdResolver, LanguageAnalyzer, MiningService, RecommendMatrix, UpdateRecommendBase,
};
use vireo_core::{
    AnalyzerSpec, DocId, DocKey, Document, EngineError, EngineResult, IndexDocument, ItemId,
    PropertyValue, TermId,
};

// ============================================================================
// Id manager
// ============================================================================

/// In-memory id manager. Issued docids are strictly increasing from 1.
#[derive(Default)]
pub struct MemIdManager {
    live: DashMap<DocKey, DocId>,
    next: AtomicU32,
    flushes: AtomicU64,
}

impl MemIdManager {
    /// Fresh manager with no mappings.
    pub fn new() -> Self {
        Self::default()
    }

    fn issue(&self) -> DocId {
        self.next.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Number of flushes observed (test instrumentation).
    pub fn flush_count(&self) -> u64 {
        self.flushes.load(Ordering::Relaxed)
    }
}

impl IdManager for MemIdManager {
    fn resolve(&self, key: DocKey) -> Option<DocId> {
        self.live.get(&key).map(|id| *id)
    }

    fn assign_new(&self, key: DocKey) -> EngineResult<(Option<DocId>, DocId)> {
        let new_id = self.issue();
        let old = self.live.insert(key, new_id);
        Ok((old, new_id))
    }

    fn update_existing(&self, key: DocKey) -> Option<(DocId, DocId)> {
        let mut entry = self.live.get_mut(&key)?;
        let old = *entry;
        let new_id = self.issue();
        *entry = new_id;
        Some((old, new_id))
    }

    fn flush(&self) -> EngineResult<()> {
        self.flushes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

// ============================================================================
// Document store
// ============================================================================

/// In-memory document store with a deleted-mark set.
#[derive(Default)]
pub struct MemDocumentStore {
    docs: DashMap<DocId, Document>,
    deleted: DashMap<DocId, ()>,
    max_id: AtomicU32,
    flushes: AtomicU64,
}

impl MemDocumentStore {
    /// Fresh, empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live (non-deleted) documents.
    pub fn live_count(&self) -> usize {
        self.docs
            .iter()
            .filter(|e| !self.deleted.contains_key(e.key()))
            .count()
    }

    /// Number of flushes observed (test instrumentation).
    pub fn flush_count(&self) -> u64 {
        self.flushes.load(Ordering::Relaxed)
    }
}

impl DocumentStore for MemDocumentStore {
    fn insert_document(&self, doc: &Document) -> EngineResult<()> {
        if doc.id() == 0 {
            return Err(EngineError::store("document has no id"));
        }
        self.docs.insert(doc.id(), doc.clone());
        self.deleted.remove(&doc.id());
        self.max_id.fetch_max(doc.id(), Ordering::Relaxed);
        Ok(())
    }

    fn remove_document(&self, id: DocId) -> bool {
        if !self.docs.contains_key(&id) || self.deleted.contains_key(&id) {
            return false;
        }
        self.deleted.insert(id, ());
        true
    }

    fn update_partial_document(&self, doc: &Document) -> EngineResult<()> {
        let mut entry = self
            .docs
            .get_mut(&doc.id())
            .ok_or_else(|| EngineError::store(format!("docid {} not found", doc.id())))?;
        for (name, value) in doc.iter() {
            entry.insert(name.clone(), value.clone());
        }
        Ok(())
    }

    fn get_document(&self, id: DocId) -> Option<Document> {
        if self.deleted.contains_key(&id) {
            return None;
        }
        self.docs.get(&id).map(|d| d.clone())
    }

    fn get_property_value(&self, id: DocId, name: &str) -> Option<PropertyValue> {
        self.get_document(id)?.get(name).cloned()
    }

    fn max_doc_id(&self) -> DocId {
        self.max_id.load(Ordering::Relaxed)
    }

    fn is_deleted(&self, id: DocId) -> bool {
        self.deleted.contains_key(&id)
    }

    fn flush(&self) -> EngineResult<()> {
        self.flushes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

// ============================================================================
// Index store
// ============================================================================

/// In-memory index store recording enough to assert pipeline behavior:
/// per-document fields, removal order, commit count, and rtype rewrites.
#[derive(Default)]
pub struct MemIndexStore {
    docs: DashMap<DocId, IndexDocument>,
    removal_order: Mutex<Vec<DocId>>,
    rtype_updates: AtomicU64,
    commits: AtomicU64,
    flushes: AtomicU64,
    mode: Mutex<Option<IndexMode>>,
    merge_paused: AtomicBool,
    optimized: AtomicU64,
}

impl MemIndexStore {
    /// Fresh, empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// The index document currently held for a docid.
    pub fn document(&self, id: DocId) -> Option<IndexDocument> {
        self.docs.get(&id).map(|d| d.clone())
    }

    /// Order in which docids were removed (test instrumentation).
    pub fn removal_order(&self) -> Vec<DocId> {
        self.removal_order.lock().clone()
    }

    /// Number of R-type column rewrites applied.
    pub fn rtype_update_count(&self) -> u64 {
        self.rtype_updates.load(Ordering::Relaxed)
    }

    /// Number of commits observed.
    pub fn commit_count(&self) -> u64 {
        self.commits.load(Ordering::Relaxed)
    }

    /// The last index mode selected, if any.
    pub fn mode(&self) -> Option<IndexMode> {
        *self.mode.lock()
    }

    /// Whether merging is currently paused.
    pub fn merge_is_paused(&self) -> bool {
        self.merge_paused.load(Ordering::Relaxed)
    }

    /// Number of optimize passes run.
    pub fn optimize_count(&self) -> u64 {
        self.optimized.load(Ordering::Relaxed)
    }

    /// Number of flushes observed (test instrumentation).
    pub fn flush_count(&self) -> u64 {
        self.flushes.load(Ordering::Relaxed)
    }
}

impl IndexStore for MemIndexStore {
    fn insert_document(&self, doc: &IndexDocument) -> EngineResult<()> {
        self.docs.insert(doc.id, doc.clone());
        Ok(())
    }

    fn update_document(&self, doc: &IndexDocument) -> EngineResult<()> {
        if let Some(old_id) = doc.old_id {
            self.docs.remove(&old_id);
        }
        self.docs.insert(doc.id, doc.clone());
        Ok(())
    }

    fn update_rtype_document(
        &self,
        _old: &IndexDocument,
        new: &IndexDocument,
    ) -> EngineResult<()> {
        let mut entry = self
            .docs
            .get_mut(&new.id)
            .ok_or_else(|| EngineError::store(format!("docid {} not indexed", new.id)))?;
        for field in &new.fields {
            match entry.fields.iter_mut().find(|f| f.name == field.name) {
                Some(existing) => *existing = field.clone(),
                None => entry.fields.push(field.clone()),
            }
        }
        self.rtype_updates.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn remove_document(&self, id: DocId) -> EngineResult<()> {
        self.docs.remove(&id);
        self.removal_order.lock().push(id);
        Ok(())
    }

    fn num_docs(&self) -> u64 {
        self.docs.len() as u64
    }

    fn set_index_mode(&self, mode: IndexMode) {
        *self.mode.lock() = Some(mode);
    }

    fn commit(&self) -> EngineResult<()> {
        self.commits.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn pause_merge(&self) {
        self.merge_paused.store(true, Ordering::Relaxed);
    }

    fn resume_merge(&self) {
        self.merge_paused.store(false, Ordering::Relaxed);
    }

    fn optimize(&self) -> EngineResult<()> {
        self.optimized.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn flush(&self) -> EngineResult<()> {
        self.flushes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

// ============================================================================
// Analyzer
// ============================================================================

/// Whitespace analyzer interning terms to ids. Counts invocations so tests
/// can assert which properties were (not) re-tokenized.
#[derive(Default)]
pub struct WhitespaceAnalyzer {
    terms: DashMap<String, TermId>,
    next: AtomicU32,
    calls: AtomicU64,
}

impl WhitespaceAnalyzer {
    /// Fresh analyzer with an empty term table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of analysis invocations so far.
    pub fn call_count(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }
}

impl LanguageAnalyzer for WhitespaceAnalyzer {
    fn term_ids(
        &self,
        text: &str,
        _analyzer: &AnalyzerSpec,
        _granularity: AnalysisGranularity,
    ) -> EngineResult<Vec<TermId>> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        Ok(text
            .split_whitespace()
            .map(|token| {
                *self
                    .terms
                    .entry(token.to_lowercase())
                    .or_insert_with(|| self.next.fetch_add(1, Ordering::Relaxed) + 1)
            })
            .collect())
    }
}

// ============================================================================
// Hooks, mining, recommendation doubles
// ============================================================================

/// Hook that records every notification timestamp it receives.
#[derive(Default)]
pub struct RecordingHook {
    /// Microsecond timestamps seen by insert notifications.
    pub insert_timestamps: Mutex<Vec<i64>>,
    finishes: AtomicU64,
    /// When set, `on_finish` returns `false` and aborts the pass.
    pub veto_finish: AtomicBool,
}

impl RecordingHook {
    /// Fresh hook.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of finish notifications.
    pub fn finish_count(&self) -> u64 {
        self.finishes.load(Ordering::Relaxed)
    }
}

impl IndexingHook for RecordingHook {
    fn on_insert(&self, _doc: &Document, _index_doc: &IndexDocument, timestamp_us: i64) -> bool {
        self.insert_timestamps.lock().push(timestamp_us);
        true
    }

    fn on_update(
        &self,
        _doc: &Document,
        _index_doc: &IndexDocument,
        _timestamp_us: i64,
        _rtype: bool,
    ) -> bool {
        true
    }

    fn on_delete(&self, _id: DocId, _timestamp_us: i64) -> bool {
        true
    }

    fn on_finish(&self) -> bool {
        self.finishes.fetch_add(1, Ordering::Relaxed);
        !self.veto_finish.load(Ordering::Relaxed)
    }
}

/// Mining double that counts passes and asserts merge is paused around it.
#[derive(Default)]
pub struct CountingMiner {
    runs: AtomicU64,
}

impl CountingMiner {
    /// Fresh miner.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of mining passes run.
    pub fn run_count(&self) -> u64 {
        self.runs.load(Ordering::Relaxed)
    }
}

impl MiningService for CountingMiner {
    fn mine_collection(&self) -> EngineResult<()> {
        self.runs.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

/// Item resolver interning item strings; set `reject` to refuse everything
/// unknown instead.
#[derive(Default)]
pub struct MemItemResolver {
    items: DashMap<String, ItemId>,
    next: AtomicU32,
    /// When set, unknown items resolve to `None` instead of being interned.
    pub reject_unknown: AtomicBool,
}

impl MemItemResolver {
    /// Fresh resolver that interns every item it sees.
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-register an item (useful with `reject_unknown`).
    pub fn register(&self, item: &str) -> ItemId {
        *self
            .items
            .entry(item.to_string())
            .or_insert_with(|| self.next.fetch_add(1, Ordering::Relaxed) + 1)
    }
}

impl ItemIdResolver for MemItemResolver {
    fn resolve(&self, item: &str) -> Option<ItemId> {
        if self.reject_unknown.load(Ordering::Relaxed) {
            return self.items.get(item).map(|id| *id);
        }
        Some(self.register(item))
    }
}

/// Matrix double recording every co-occurrence update.
#[derive(Default)]
pub struct RecordingMatrix {
    updates: Mutex<Vec<(Vec<ItemId>, Vec<ItemId>)>>,
}

impl RecordingMatrix {
    /// Fresh matrix.
    pub fn new() -> Self {
        Self::default()
    }

    /// All `(old_items, new_items)` updates received so far.
    pub fn updates(&self) -> Vec<(Vec<ItemId>, Vec<ItemId>)> {
        self.updates.lock().clone()
    }

    /// Number of updates received.
    pub fn update_count(&self) -> usize {
        self.updates.lock().len()
    }
}

impl RecommendMatrix for RecordingMatrix {
    fn update(&self, old_items: &[ItemId], new_items: &[ItemId]) {
        self.updates
            .lock()
            .push((old_items.to_vec(), new_items.to_vec()));
    }
}

/// Similarity-rebuild double with a controllable staleness flag.
#[derive(Default)]
pub struct MemRecommendBase {
    /// Staleness reported to the cron flush.
    pub stale: AtomicBool,
    builds: AtomicU64,
    matrix_flushes: AtomicU64,
}

impl MemRecommendBase {
    /// Fresh collaborator reporting a fresh (non-stale) matrix.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of similarity rebuilds run.
    pub fn build_count(&self) -> u64 {
        self.builds.load(Ordering::Relaxed)
    }

    /// Number of matrix flushes run.
    pub fn matrix_flush_count(&self) -> u64 {
        self.matrix_flushes.load(Ordering::Relaxed)
    }
}

impl UpdateRecommendBase for MemRecommendBase {
    fn build_purchase_sim_matrix(&self) -> EngineResult<()> {
        self.builds.fetch_add(1, Ordering::Relaxed);
        self.stale.store(false, Ordering::Relaxed);
        Ok(())
    }

    fn flush_recommend_matrix(&self) -> EngineResult<()> {
        self.matrix_flushes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn need_rebuild_purchase_sim_matrix(&self) -> bool {
        self.stale.load(Ordering::Relaxed)
    }
}
